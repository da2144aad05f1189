//! Scalar floating-point lowerings.

use anvil_asm::{FpuOp1, FpuOp2, FpuOp3, Inst, OperandSize};

use crate::error::{CodegenError, CodegenResult};
use crate::ir::{FloatCC, Opcode, Value};
use crate::lower::LowerCtx;

/// Expand a VFP `imm8` into the 64-bit pattern it denotes.
fn vfp_expand_imm8_f64(imm8: u8) -> u64 {
    let sign = ((imm8 >> 7) & 1) as u64;
    let b6 = ((imm8 >> 6) & 1) as u64;
    let exp = ((b6 ^ 1) << 10) | (if b6 == 1 { 0xff << 2 } else { 0 }) | ((imm8 as u64 >> 4) & 0b11);
    let frac = (imm8 as u64 & 0xf) << 48;
    (sign << 63) | (exp << 52) | frac
}

/// Expand a VFP `imm8` into the 32-bit pattern it denotes.
fn vfp_expand_imm8_f32(imm8: u8) -> u32 {
    let sign = ((imm8 >> 7) & 1) as u32;
    let b6 = ((imm8 >> 6) & 1) as u32;
    let exp = ((b6 ^ 1) << 7) | (if b6 == 1 { 0b11111 << 2 } else { 0 }) | ((imm8 as u32 >> 4) & 0b11);
    let frac = (imm8 as u32 & 0xf) << 19;
    (sign << 31) | (exp << 23) | frac
}

/// The `imm8` denoting this 64-bit float pattern, if one exists.
pub(crate) fn vfp_imm8_from_f64_bits(bits: u64) -> Option<u8> {
    (0..=255u8).find(|&imm8| vfp_expand_imm8_f64(imm8) == bits)
}

/// The `imm8` denoting this 32-bit float pattern, if one exists.
pub(crate) fn vfp_imm8_from_f32_bits(bits: u32) -> Option<u8> {
    (0..=255u8).find(|&imm8| vfp_expand_imm8_f32(imm8) == bits)
}

fn lower_fconst(
    ctx: &mut LowerCtx,
    result: Value,
    bits: u64,
    size: OperandSize,
    imm8: Option<u8>,
) -> CodegenResult<()> {
    let rd = ctx.def_value(result);
    if let Some(imm8) = imm8 {
        ctx.emit(Inst::FpuMoveImm { size, rd, imm8 });
        return Ok(());
    }
    // Through the integer file: a move-wide sequence plus an FMOV.
    let tmp = super::alu::materialize_const(ctx, bits, size);
    ctx.emit(Inst::MovToFpu { size, rd, rn: tmp });
    Ok(())
}

pub(crate) fn lower_f32const(ctx: &mut LowerCtx, result: Value, bits: u32) -> CodegenResult<()> {
    lower_fconst(
        ctx,
        result,
        bits as u64,
        OperandSize::Size32,
        vfp_imm8_from_f32_bits(bits),
    )
}

pub(crate) fn lower_f64const(ctx: &mut LowerCtx, result: Value, bits: u64) -> CodegenResult<()> {
    lower_fconst(
        ctx,
        result,
        bits,
        OperandSize::Size64,
        vfp_imm8_from_f64_bits(bits),
    )
}

pub(crate) fn lower_fp_unary(
    ctx: &mut LowerCtx,
    op: Opcode,
    result: Value,
    arg: Value,
) -> CodegenResult<()> {
    let arg_ty = ctx.func().value_type(arg);
    let res_ty = ctx.func().value_type(result);
    let rn = ctx.value_reg(arg);
    let rd = ctx.def_value(result);

    let simple = |op1: FpuOp1| Inst::FpuRR {
        op: op1,
        size: LowerCtx::size_for_type(res_ty),
        rd,
        rn,
    };

    let inst = match op {
        Opcode::Fneg => simple(FpuOp1::Neg),
        Opcode::Fabs => simple(FpuOp1::Abs),
        Opcode::Sqrt => simple(FpuOp1::Sqrt),
        Opcode::Floor => simple(FpuOp1::RintM),
        Opcode::Ceil => simple(FpuOp1::RintP),
        Opcode::Trunc => simple(FpuOp1::RintZ),
        Opcode::Nearest => simple(FpuOp1::RintN),
        Opcode::Fpromote => Inst::FpuCvt {
            from: OperandSize::Size32,
            to: OperandSize::Size64,
            rd,
            rn,
        },
        Opcode::Fdemote => Inst::FpuCvt {
            from: OperandSize::Size64,
            to: OperandSize::Size32,
            rd,
            rn,
        },
        Opcode::FcvtToSint | Opcode::FcvtToUint => Inst::FpuToInt {
            signed: op == Opcode::FcvtToSint,
            fp_size: LowerCtx::size_for_type(arg_ty),
            int_size: LowerCtx::alu_size(res_ty),
            rd,
            rn,
        },
        Opcode::FcvtFromSint | Opcode::FcvtFromUint => Inst::IntToFpu {
            signed: op == Opcode::FcvtFromSint,
            fp_size: LowerCtx::size_for_type(res_ty),
            int_size: LowerCtx::alu_size(arg_ty),
            rd,
            rn,
        },
        _ => return Err(CodegenError::UnimplementedOpcode("fp-unary")),
    };
    ctx.emit(inst);
    Ok(())
}

pub(crate) fn lower_fp_binary(
    ctx: &mut LowerCtx,
    op: Opcode,
    result: Value,
    args: [Value; 2],
) -> CodegenResult<()> {
    let ty = ctx.func().value_type(result);
    let op2 = match op {
        Opcode::Fadd => FpuOp2::Add,
        Opcode::Fsub => FpuOp2::Sub,
        Opcode::Fmul => FpuOp2::Mul,
        Opcode::Fdiv => FpuOp2::Div,
        Opcode::Fmax => FpuOp2::Max,
        Opcode::Fmin => FpuOp2::Min,
        _ => return Err(CodegenError::UnimplementedOpcode("fp-binary")),
    };
    let rn = ctx.value_reg(args[0]);
    let rm = ctx.value_reg(args[1]);
    let rd = ctx.def_value(result);
    ctx.emit(Inst::FpuRRR {
        op: op2,
        size: LowerCtx::size_for_type(ty),
        rd,
        rn,
        rm,
    });
    Ok(())
}

pub(crate) fn lower_fma(
    ctx: &mut LowerCtx,
    result: Value,
    args: [Value; 3],
) -> CodegenResult<()> {
    let ty = ctx.func().value_type(result);
    if ty.is_vector() {
        return super::vec::lower_vec_fma(ctx, result, args);
    }
    let rn = ctx.value_reg(args[0]);
    let rm = ctx.value_reg(args[1]);
    let ra = ctx.value_reg(args[2]);
    let rd = ctx.def_value(result);
    ctx.emit(Inst::FpuRRRR {
        op: FpuOp3::MAdd,
        size: LowerCtx::size_for_type(ty),
        rd,
        rn,
        rm,
        ra,
    });
    Ok(())
}

pub(crate) fn lower_fcmp_bool(
    ctx: &mut LowerCtx,
    cond: FloatCC,
    result: Value,
    args: [Value; 2],
) -> CodegenResult<()> {
    let ty = ctx.func().value_type(args[0]);
    let rn = ctx.value_reg(args[0]);
    let rm = ctx.value_reg(args[1]);
    ctx.emit(Inst::FpuCmp {
        size: LowerCtx::size_for_type(ty),
        rn,
        rm,
    });
    let rd = ctx.def_value(result);
    ctx.emit(Inst::CSet {
        size: OperandSize::Size32,
        rd,
        cond: cond.cond(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vfp_imm8_covers_common_constants() {
        // 1.0, 2.0, -1.0, 0.5 are representable.
        assert!(vfp_imm8_from_f64_bits(1.0f64.to_bits()).is_some());
        assert!(vfp_imm8_from_f64_bits(2.0f64.to_bits()).is_some());
        assert!(vfp_imm8_from_f64_bits((-1.0f64).to_bits()).is_some());
        assert!(vfp_imm8_from_f64_bits(0.5f64.to_bits()).is_some());
        // 0.0 and 0.1 are not.
        assert!(vfp_imm8_from_f64_bits(0.0f64.to_bits()).is_none());
        assert!(vfp_imm8_from_f64_bits(0.1f64.to_bits()).is_none());
        assert!(vfp_imm8_from_f32_bits(1.0f32.to_bits()).is_some());
        assert!(vfp_imm8_from_f32_bits(0.1f32.to_bits()).is_none());
    }

    #[test]
    fn vfp_expansion_matches_ieee() {
        // imm8 0x70 denotes 1.0.
        assert_eq!(vfp_expand_imm8_f64(0x70), 1.0f64.to_bits());
        assert_eq!(vfp_expand_imm8_f32(0x70), 1.0f32.to_bits());
    }
}
