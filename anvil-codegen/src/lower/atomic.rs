//! Atomic lowerings: the LSE read-modify-write encodings when the target
//! has them (and prefers them), the LDXR/STXR retry loop otherwise. Both
//! paths draw from the same instruction vocabulary; the choice is made
//! here and nowhere else.

use anvil_asm::{
    AluOp, AtomicRmwOp, Cond, CondBrKind, CondSelOp, Inst, OperandSize, RegClass, Writable,
};

use crate::error::{CodegenError, CodegenResult};
use crate::ir::{AtomicOp, Type, Value};
use crate::lower::LowerCtx;

fn access_size(ty: Type) -> CodegenResult<OperandSize> {
    OperandSize::from_bits(ty.bits()).ok_or(CodegenError::UnsupportedType(ty))
}

pub(crate) fn lower_atomic_rmw(
    ctx: &mut LowerCtx,
    op: AtomicOp,
    ty: Type,
    result: Value,
    args: [Value; 2],
) -> CodegenResult<()> {
    let access = access_size(ty)?;
    let [ptr, operand] = args;
    let rn = ctx.value_reg(ptr);
    let rs = ctx.value_reg(operand);

    if ctx.isa().use_lse_atomics() {
        let (rmw, rs) = match op {
            AtomicOp::Add => (AtomicRmwOp::Add, rs),
            AtomicOp::Or => (AtomicRmwOp::Set, rs),
            AtomicOp::Xor => (AtomicRmwOp::Eor, rs),
            AtomicOp::Xchg => (AtomicRmwOp::Swp, rs),
            AtomicOp::Smax => (AtomicRmwOp::Smax, rs),
            AtomicOp::Smin => (AtomicRmwOp::Smin, rs),
            AtomicOp::Umax => (AtomicRmwOp::Umax, rs),
            AtomicOp::Umin => (AtomicRmwOp::Umin, rs),
            AtomicOp::And => {
                // LDCLR clears the bits that are set in its operand.
                let inv = ctx.alloc_writable(RegClass::Int);
                ctx.emit(Inst::AluRRR {
                    op: AluOp::Orn,
                    size: access,
                    rd: inv,
                    rn: anvil_asm::zero_reg(),
                    rm: rs,
                });
                (AtomicRmwOp::Clr, inv.to_reg())
            }
        };
        let rt = ctx.def_value(result);
        ctx.emit(Inst::AtomicRmw {
            op: rmw,
            access,
            rs,
            rt,
            rn,
        });
        return Ok(());
    }

    // LDAXR / compute / STLXR retry loop.
    let retry = ctx.alloc_label();
    ctx.bind_label(retry);
    let old = ctx.def_value(result);
    ctx.emit(Inst::LoadExclusive {
        access,
        acquire: true,
        rt: old,
        rn,
    });

    let new = ctx.alloc_writable(RegClass::Int);
    match op {
        AtomicOp::Add => ctx.emit(Inst::AluRRR {
            op: AluOp::Add,
            size: access,
            rd: new,
            rn: old.to_reg(),
            rm: rs,
        }),
        AtomicOp::And => ctx.emit(Inst::AluRRR {
            op: AluOp::And,
            size: access,
            rd: new,
            rn: old.to_reg(),
            rm: rs,
        }),
        AtomicOp::Or => ctx.emit(Inst::AluRRR {
            op: AluOp::Orr,
            size: access,
            rd: new,
            rn: old.to_reg(),
            rm: rs,
        }),
        AtomicOp::Xor => ctx.emit(Inst::AluRRR {
            op: AluOp::Eor,
            size: access,
            rd: new,
            rn: old.to_reg(),
            rm: rs,
        }),
        AtomicOp::Xchg => ctx.emit(Inst::MovRR {
            size: OperandSize::Size64,
            rd: new,
            rm: rs,
        }),
        AtomicOp::Smax | AtomicOp::Smin | AtomicOp::Umax | AtomicOp::Umin => {
            ctx.emit(Inst::AluRRR {
                op: AluOp::Subs,
                size: access,
                rd: Writable::from_reg(anvil_asm::zero_reg()),
                rn: old.to_reg(),
                rm: rs,
            });
            let keep_old = match op {
                AtomicOp::Smax => Cond::Gt,
                AtomicOp::Smin => Cond::Lt,
                AtomicOp::Umax => Cond::Hi,
                AtomicOp::Umin => Cond::Lo,
                _ => unreachable!(),
            };
            ctx.emit(Inst::CondSel {
                op: CondSelOp::Sel,
                size: access,
                rd: new,
                rn: old.to_reg(),
                rm: rs,
                cond: keep_old,
            });
        }
    }

    let status = ctx.alloc_writable(RegClass::Int);
    ctx.emit(Inst::StoreExclusive {
        access,
        release: true,
        rs: status,
        rt: new.to_reg(),
        rn,
    });
    ctx.emit(Inst::CondBr {
        target: retry,
        kind: CondBrKind::NotZero(status.to_reg(), OperandSize::Size32),
    });
    Ok(())
}

pub(crate) fn lower_atomic_cas(
    ctx: &mut LowerCtx,
    ty: Type,
    result: Value,
    args: [Value; 3],
) -> CodegenResult<()> {
    let access = access_size(ty)?;
    let [ptr, expected, new] = args;
    let rn = ctx.value_reg(ptr);
    let expected_reg = ctx.value_reg(expected);
    let new_reg = ctx.value_reg(new);

    if ctx.isa().use_lse_atomics() {
        // CASAL reads the expected value from its status operand and
        // writes the observed value back into it.
        let rs = ctx.def_value(result);
        ctx.emit(Inst::MovRR {
            size: OperandSize::Size64,
            rd: rs,
            rm: expected_reg,
        });
        ctx.emit(Inst::Cas {
            access,
            rs,
            rt: new_reg,
            rn,
        });
        return Ok(());
    }

    let retry = ctx.alloc_label();
    let done = ctx.alloc_label();
    ctx.bind_label(retry);
    let old = ctx.def_value(result);
    ctx.emit(Inst::LoadExclusive {
        access,
        acquire: true,
        rt: old,
        rn,
    });
    ctx.emit(Inst::AluRRR {
        op: AluOp::Subs,
        size: access,
        rd: Writable::from_reg(anvil_asm::zero_reg()),
        rn: old.to_reg(),
        rm: expected_reg,
    });
    ctx.emit(Inst::CondBr {
        target: done,
        kind: CondBrKind::Cond(Cond::Ne),
    });
    let status = ctx.alloc_writable(RegClass::Int);
    ctx.emit(Inst::StoreExclusive {
        access,
        release: true,
        rs: status,
        rt: new_reg,
        rn,
    });
    ctx.emit(Inst::CondBr {
        target: retry,
        kind: CondBrKind::NotZero(status.to_reg(), OperandSize::Size32),
    });
    ctx.bind_label(done);
    Ok(())
}

pub(crate) fn lower_atomic_load(
    ctx: &mut LowerCtx,
    ty: Type,
    result: Value,
    ptr: Value,
) -> CodegenResult<()> {
    let access = access_size(ty)?;
    let rn = ctx.value_reg(ptr);
    let rt = ctx.def_value(result);
    ctx.emit(Inst::LoadAcquire { access, rt, rn });
    Ok(())
}

pub(crate) fn lower_atomic_store(
    ctx: &mut LowerCtx,
    ty: Type,
    value: Value,
    ptr: Value,
) -> CodegenResult<()> {
    let access = access_size(ty)?;
    let rt = ctx.value_reg(value);
    let rn = ctx.value_reg(ptr);
    ctx.emit(Inst::StoreRelease { access, rt, rn });
    Ok(())
}
