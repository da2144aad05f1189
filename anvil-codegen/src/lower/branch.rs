//! Control-flow lowerings: fused compare-and-branch selection, jump
//! tables, calls and returns.

use anvil_asm::{
    AMode, CondBrKind, Inst, OperandSize, Reg, RegClass, Writable,
};

use crate::abi::{self, AbiArg};
use crate::error::CodegenResult;
use crate::ir::{Block, FuncRef, InstData, JumpTable, Opcode, Type, Value};
use crate::lower::{mov_for_type, LowerCtx};

use super::alu;

/// Pick the cheapest branch form for `brif`:
/// CBZ/CBNZ for compares against zero, TBZ/TBNZ for single-bit tests,
/// CMP plus B.cond otherwise.
pub(crate) fn lower_brif(
    ctx: &mut LowerCtx,
    cond: Value,
    then_dest: Block,
    else_dest: Block,
) -> CodegenResult<()> {
    let then_label = ctx.block_label(then_dest);
    let else_label = ctx.block_label(else_dest);

    match ctx.value_def(cond).cloned() {
        Some(InstData::IntCompare { cond: cc, args }) => {
            let size = LowerCtx::alu_size(ctx.func().value_type(args[0]));
            let zero_rhs = ctx.value_const(args[1]) == Some(0);
            match cc {
                crate::ir::IntCC::Eq if zero_rhs => {
                    let rt = ctx.value_reg(args[0]);
                    ctx.emit(Inst::CondBr {
                        target: then_label,
                        kind: CondBrKind::Zero(rt, size),
                    });
                }
                crate::ir::IntCC::Ne if zero_rhs => {
                    let rt = ctx.value_reg(args[0]);
                    ctx.emit(Inst::CondBr {
                        target: then_label,
                        kind: CondBrKind::NotZero(rt, size),
                    });
                }
                _ => {
                    alu::emit_cmp(ctx, size, args[0], args[1]);
                    ctx.emit(Inst::CondBr {
                        target: then_label,
                        kind: CondBrKind::Cond(cc.cond()),
                    });
                }
            }
        }
        Some(InstData::Binary { op: Opcode::Band, args })
            if single_bit_mask(ctx, args[1]).is_some() =>
        {
            let bit = single_bit_mask(ctx, args[1]).unwrap();
            let rt = ctx.value_reg(args[0]);
            ctx.emit(Inst::TestBitBr {
                rt,
                bit,
                branch_if_set: true,
                target: then_label,
            });
        }
        _ => {
            let size = LowerCtx::alu_size(ctx.func().value_type(cond));
            let rt = ctx.value_reg(cond);
            ctx.emit(Inst::CondBr {
                target: then_label,
                kind: CondBrKind::NotZero(rt, size),
            });
        }
    }

    ctx.emit(Inst::Jump { dest: else_label });
    Ok(())
}

fn single_bit_mask(ctx: &LowerCtx, value: Value) -> Option<u8> {
    let c = ctx.value_const(value)?;
    (c.count_ones() == 1).then(|| c.trailing_zeros() as u8)
}

/// Jump-table dispatch. The table size is always materialized into a
/// register so the bounds compare never overflows an immediate field.
pub(crate) fn lower_br_table(
    ctx: &mut LowerCtx,
    index: Value,
    table: JumpTable,
    default: Block,
) -> CodegenResult<()> {
    let targets: Vec<_> = ctx
        .func()
        .jump_table(table)
        .targets
        .iter()
        .map(|&b| ctx.block_label(b))
        .collect();
    let default_label = ctx.block_label(default);

    // Zero-extend a narrow index so the 64-bit compare is sound.
    let raw_idx = ctx.value_reg(index);
    let idx_ty = ctx.func().value_type(index);
    let ridx = if idx_ty.bits() < 64 {
        let widened = ctx.alloc_writable(RegClass::Int);
        ctx.emit(Inst::Extend {
            rd: widened,
            rn: raw_idx,
            signed: false,
            from_bits: idx_ty.bits() as u8,
            to_bits: 64,
        });
        widened.to_reg()
    } else {
        raw_idx
    };

    let rbound = alu::materialize_const(ctx, targets.len() as u64, OperandSize::Size64);
    let rtmp1 = ctx.alloc_writable(RegClass::Int);
    let rtmp2 = ctx.alloc_writable(RegClass::Int);
    ctx.emit(Inst::JTSequence {
        ridx,
        rbound,
        rtmp1,
        rtmp2,
        default: default_label,
        targets,
    });
    Ok(())
}

fn store_outgoing(ctx: &mut LowerCtx, ty: Type, value: Value, off: i64) {
    let rd = ctx.value_reg(value);
    let mem = AMode::SpOffset { off };
    let inst = match ty {
        Type::I8 => Inst::Store8 { rd, mem },
        Type::I16 => Inst::Store16 { rd, mem },
        Type::I32 => Inst::Store32 { rd, mem },
        Type::I64 => Inst::Store64 { rd, mem },
        Type::F32 => Inst::FpuStore32 { rd, mem },
        Type::F64 => Inst::FpuStore64 { rd, mem },
        _ => Inst::FpuStore128 { rd, mem },
    };
    ctx.emit(inst);
}

/// Move argument values into their AAPCS64 homes.
fn emit_call_args(ctx: &mut LowerCtx, plan: &abi::AbiPlan, args: &[Value]) {
    ctx.record_outgoing_args(plan.stack_arg_space);
    for (&value, (ty, place)) in args.iter().zip(plan.args.iter()) {
        match place {
            AbiArg::Reg(preg) => {
                let dst = Writable::from_reg(Reg::Phys(*preg));
                let src = ctx.value_reg(value);
                ctx.emit(mov_for_type(*ty, dst, src));
            }
            AbiArg::Stack(off) => store_outgoing(ctx, *ty, value, *off),
        }
    }
}

/// Copy return registers into the results' fresh vregs.
fn emit_call_rets(ctx: &mut LowerCtx, plan: &abi::AbiPlan, results: &[Value]) {
    for (&value, (ty, place)) in results.iter().zip(plan.rets.iter()) {
        if let AbiArg::Reg(preg) = place {
            let dst = ctx.def_value(value);
            ctx.emit(mov_for_type(*ty, dst, Reg::Phys(*preg)));
        }
    }
}

pub(crate) fn lower_call(
    ctx: &mut LowerCtx,
    func: FuncRef,
    args: &[Value],
    results: &[Value],
) -> CodegenResult<()> {
    let ext = ctx.func().ext_func(func).clone();
    let plan = abi::classify(&ext.signature);
    emit_call_args(ctx, &plan, args);
    ctx.emit(Inst::Call { callee: ext.name });
    emit_call_rets(ctx, &plan, results);
    Ok(())
}

pub(crate) fn lower_call_indirect(
    ctx: &mut LowerCtx,
    callee: Value,
    args: &[Value],
    results: &[Value],
) -> CodegenResult<()> {
    // Classify from the value types at the call site.
    let sig = crate::ir::Signature::new(
        args.iter().map(|&v| ctx.func().value_type(v)).collect(),
        results.iter().map(|&v| ctx.func().value_type(v)).collect(),
    );
    let plan = abi::classify(&sig);
    let rn = ctx.value_reg(callee);
    emit_call_args(ctx, &plan, args);
    ctx.emit(Inst::CallInd { rn });
    emit_call_rets(ctx, &plan, results);
    Ok(())
}

/// Move return values into their homes, then `ret`. The epilogue is
/// synthesized in front of the return at emission.
pub(crate) fn lower_return(ctx: &mut LowerCtx, args: &[Value]) -> CodegenResult<()> {
    let plan = abi::classify(&ctx.func().signature);
    for (&value, (ty, place)) in args.iter().zip(plan.rets.iter()) {
        if let AbiArg::Reg(preg) = place {
            let dst = Writable::from_reg(Reg::Phys(*preg));
            let src = ctx.value_reg(value);
            ctx.emit(mov_for_type(*ty, dst, src));
        }
    }
    ctx.emit(Inst::Ret);
    Ok(())
}

pub(crate) fn lower_return_call(
    ctx: &mut LowerCtx,
    func: FuncRef,
    args: &[Value],
) -> CodegenResult<()> {
    let ext = ctx.func().ext_func(func).clone();
    let plan = abi::classify(&ext.signature);
    emit_call_args(ctx, &plan, args);
    ctx.emit(Inst::TailCall { callee: ext.name });
    Ok(())
}

pub(crate) fn lower_return_call_indirect(
    ctx: &mut LowerCtx,
    callee: Value,
    args: &[Value],
) -> CodegenResult<()> {
    let sig = crate::ir::Signature::new(
        args.iter().map(|&v| ctx.func().value_type(v)).collect(),
        Vec::new(),
    );
    let plan = abi::classify(&sig);
    let rn = ctx.value_reg(callee);
    emit_call_args(ctx, &plan, args);
    ctx.emit(Inst::TailCallInd { rn });
    Ok(())
}
