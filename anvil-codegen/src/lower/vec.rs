//! NEON vector lowerings: element-wise arithmetic, lane traffic,
//! narrowing and widening.

use anvil_asm::{Inst, RegClass, VecAluOp, VecMiscOp, VectorSize};

use crate::error::{CodegenError, CodegenResult};
use crate::ir::{InstData, Opcode, Value};
use crate::lower::LowerCtx;

pub(crate) fn lower_vec_binary(
    ctx: &mut LowerCtx,
    op: Opcode,
    result: Value,
    args: [Value; 2],
) -> CodegenResult<()> {
    let ty = ctx.func().value_type(result);
    let size = LowerCtx::vector_size(ty);
    let vop = match op {
        Opcode::Iadd => VecAluOp::Add,
        Opcode::Isub => VecAluOp::Sub,
        Opcode::Imul => VecAluOp::Mul,
        Opcode::Band => VecAluOp::And,
        Opcode::Bor => VecAluOp::Orr,
        Opcode::Bxor => VecAluOp::Eor,
        Opcode::Smax => VecAluOp::Smax,
        Opcode::Smin => VecAluOp::Smin,
        Opcode::Umax => VecAluOp::Umax,
        Opcode::Umin => VecAluOp::Umin,
        Opcode::SaddSat => VecAluOp::Sqadd,
        Opcode::UaddSat => VecAluOp::Uqadd,
        Opcode::SsubSat => VecAluOp::Sqsub,
        Opcode::UsubSat => VecAluOp::Uqsub,
        Opcode::Fadd => VecAluOp::Fadd,
        Opcode::Fsub => VecAluOp::Fsub,
        Opcode::Fmul => VecAluOp::Fmul,
        Opcode::Fmax => VecAluOp::Fmax,
        Opcode::Fmin => VecAluOp::Fmin,
        _ => return Err(CodegenError::UnimplementedOpcode("vec-binary")),
    };
    let rn = ctx.value_reg(args[0]);
    let rm = ctx.value_reg(args[1]);
    let rd = ctx.def_value(result);
    ctx.emit(Inst::VecRRR {
        op: vop,
        size,
        rd,
        rn,
        rm,
    });
    Ok(())
}

pub(crate) fn lower_splat(ctx: &mut LowerCtx, result: Value, arg: Value) -> CodegenResult<()> {
    let res_ty = ctx.func().value_type(result);
    let arg_ty = ctx.func().value_type(arg);
    let size = LowerCtx::vector_size(res_ty);

    // DUP broadcasts from the integer file; float scalars take a bit-exact
    // detour through it.
    let rn = if arg_ty.is_float() {
        let gpr = ctx.alloc_writable(RegClass::Int);
        ctx.emit(Inst::MovFromFpu {
            size: LowerCtx::size_for_type(arg_ty),
            rd: gpr,
            rn: ctx.value_reg(arg),
        });
        gpr.to_reg()
    } else {
        ctx.value_reg(arg)
    };
    let rd = ctx.def_value(result);
    ctx.emit(Inst::VecDup { size, rd, rn });
    Ok(())
}

pub(crate) fn lower_extract_lane(
    ctx: &mut LowerCtx,
    result: Value,
    arg: Value,
    lane: u8,
) -> CodegenResult<()> {
    let res_ty = ctx.func().value_type(result);
    let vec_ty = ctx.func().value_type(arg);
    let size = LowerCtx::vector_size(vec_ty);
    let rn = ctx.value_reg(arg);

    if res_ty.is_float() {
        let gpr = ctx.alloc_writable(RegClass::Int);
        ctx.emit(Inst::MovFromVecElem {
            size,
            signed: false,
            rd: gpr,
            rn,
            idx: lane,
        });
        let rd = ctx.def_value(result);
        ctx.emit(Inst::MovToFpu {
            size: LowerCtx::size_for_type(res_ty),
            rd,
            rn: gpr.to_reg(),
        });
    } else {
        let rd = ctx.def_value(result);
        ctx.emit(Inst::MovFromVecElem {
            size,
            signed: false,
            rd,
            rn,
            idx: lane,
        });
    }
    Ok(())
}

pub(crate) fn lower_insert_lane(
    ctx: &mut LowerCtx,
    result: Value,
    args: [Value; 2],
    lane: u8,
) -> CodegenResult<()> {
    let vec_ty = ctx.func().value_type(args[0]);
    let lane_ty = ctx.func().value_type(args[1]);
    let size = LowerCtx::vector_size(vec_ty);

    let scalar = if lane_ty.is_float() {
        let gpr = ctx.alloc_writable(RegClass::Int);
        ctx.emit(Inst::MovFromFpu {
            size: LowerCtx::size_for_type(lane_ty),
            rd: gpr,
            rn: ctx.value_reg(args[1]),
        });
        gpr.to_reg()
    } else {
        ctx.value_reg(args[1])
    };

    // INS preserves the other lanes, so copy the source vector first.
    let src = ctx.value_reg(args[0]);
    let rd = ctx.def_value(result);
    ctx.emit(Inst::VecRRR {
        op: VecAluOp::Orr,
        size: VectorSize::Size8x16,
        rd,
        rn: src,
        rm: src,
    });
    ctx.emit(Inst::MovToVecElem {
        size,
        rd,
        rn: scalar,
        idx: lane,
    });
    Ok(())
}

pub(crate) fn lower_narrow(
    ctx: &mut LowerCtx,
    op: Opcode,
    result: Value,
    arg: Value,
) -> CodegenResult<()> {
    let res_ty = ctx.func().value_type(result);
    let misc = match op {
        Opcode::Snarrow => VecMiscOp::Sqxtn,
        Opcode::Unarrow => VecMiscOp::Sqxtun,
        Opcode::Uunarrow => VecMiscOp::Uqxtn,
        _ => unreachable!(),
    };
    let rn = ctx.value_reg(arg);
    let rd = ctx.def_value(result);
    ctx.emit(Inst::VecMisc {
        op: misc,
        size: LowerCtx::vector_size(res_ty),
        rd,
        rn,
    });
    Ok(())
}

pub(crate) fn lower_widen(
    ctx: &mut LowerCtx,
    op: Opcode,
    result: Value,
    arg: Value,
) -> CodegenResult<()> {
    let src_ty = ctx.func().value_type(arg);
    let rn = ctx.value_reg(arg);
    let rd = ctx.def_value(result);
    ctx.emit(Inst::VecWiden {
        signed: op == Opcode::SwidenLow,
        size: LowerCtx::vector_size(src_ty),
        rd,
        rn,
    });
    Ok(())
}

/// Vector fused multiply-add. The by-element form applies when the
/// multiplier is a broadcast lane; the accumulator is copied first since
/// FMLA accumulates in place.
pub(crate) fn lower_vec_fma(
    ctx: &mut LowerCtx,
    result: Value,
    args: [Value; 3],
) -> CodegenResult<()> {
    let ty = ctx.func().value_type(result);
    let size = LowerCtx::vector_size(ty);
    if !matches!(size, VectorSize::Size32x4 | VectorSize::Size64x2) {
        return Err(CodegenError::UnsupportedType(ty));
    }

    let (rm, idx) = match ctx.value_def(args[1]).cloned() {
        Some(InstData::Unary { op: Opcode::Splat, arg }) => {
            match ctx.value_def(arg).cloned() {
                Some(InstData::ExtractLane { arg: vec, lane }) => (ctx.value_reg(vec), lane),
                _ => {
                    // A splat of any scalar is lane zero of its own splat.
                    (ctx.value_reg(args[1]), 0)
                }
            }
        }
        _ => return Err(CodegenError::UnimplementedOpcode("vec-fma-general")),
    };

    let acc = ctx.value_reg(args[2]);
    let rn = ctx.value_reg(args[0]);
    let rd = ctx.def_value(result);
    ctx.emit(Inst::VecRRR {
        op: VecAluOp::Orr,
        size: VectorSize::Size8x16,
        rd,
        rn: acc,
        rm: acc,
    });
    ctx.emit(Inst::VecFmlaElem {
        size,
        rd,
        rn,
        rm,
        idx,
    });
    Ok(())
}
