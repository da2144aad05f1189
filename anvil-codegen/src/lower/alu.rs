//! Integer ALU lowerings: immediate-form selection with register fallback,
//! wide-constant materialization, overflow checks, saturating arithmetic,
//! comparisons and selects.

use anvil_asm::{
    zero_reg, AluOp, AluOp3, CondBrKind, CondSelOp, Imm12, ImmLogic, ImmShift, Inst,
    OperandSize, Reg, RegClass, VecAluOp, Writable,
};

use crate::error::{CodegenError, CodegenResult};
use crate::ir::{InstData, IntCC, Opcode, TrapCode, Value};
use crate::lower::LowerCtx;

/// Materialize a constant into a fresh virtual register.
pub(crate) fn materialize_const(ctx: &mut LowerCtx, value: u64, size: OperandSize) -> Reg {
    let rd = ctx.alloc_writable(RegClass::Int);
    ctx.emit(Inst::MovImm {
        size,
        rd,
        imm: value,
    });
    rd.to_reg()
}

pub(crate) fn lower_iconst(ctx: &mut LowerCtx, result: Value, value: u64) -> CodegenResult<()> {
    let ty = ctx.func().value_type(result);
    let rd = ctx.def_value(result);
    ctx.emit(Inst::MovImm {
        size: LowerCtx::alu_size(ty),
        rd,
        imm: value,
    });
    Ok(())
}

/// Add/sub with an immediate operand when it fits, falling back to the
/// register-register form.
fn add_sub_imm_or_rrr(
    ctx: &mut LowerCtx,
    op: AluOp,
    size: OperandSize,
    rd: Writable<Reg>,
    rn: Reg,
    b: Value,
) {
    if let Some(c) = ctx.value_const(b) {
        if let Some(imm12) = Imm12::maybe_from_u64(c) {
            ctx.emit(Inst::AluRRImm12 { op, size, rd, rn, imm12 });
            return;
        }
        // A negative constant flips between the add and sub forms.
        let negated = (c as i64).unsigned_abs();
        if (c as i64) < 0 {
            if let Some(imm12) = Imm12::maybe_from_u64(negated) {
                let flipped = match op {
                    AluOp::Add => AluOp::Sub,
                    AluOp::Sub => AluOp::Add,
                    AluOp::Adds => AluOp::Subs,
                    AluOp::Subs => AluOp::Adds,
                    other => other,
                };
                ctx.emit(Inst::AluRRImm12 { op: flipped, size, rd, rn, imm12 });
                return;
            }
        }
        let rm = materialize_const(ctx, c, size);
        ctx.emit(Inst::AluRRR { op, size, rd, rn, rm });
        return;
    }
    let rm = ctx.value_reg(b);
    ctx.emit(Inst::AluRRR { op, size, rd, rn, rm });
}

/// Logical operation with a bitmask immediate when the constant is
/// encodable, falling back to the register-register form.
fn logic_imm_or_rrr(
    ctx: &mut LowerCtx,
    op: AluOp,
    size: OperandSize,
    rd: Writable<Reg>,
    rn: Reg,
    b: Value,
) {
    if let Some(c) = ctx.value_const(b) {
        if let Some(imml) = ImmLogic::maybe_from_u64(c, size) {
            ctx.emit(Inst::AluRRImmLogic { op, size, rd, rn, imml });
            return;
        }
        let rm = materialize_const(ctx, c, size);
        ctx.emit(Inst::AluRRR { op, size, rd, rn, rm });
        return;
    }
    let rm = ctx.value_reg(b);
    ctx.emit(Inst::AluRRR { op, size, rd, rn, rm });
}

fn shift_imm_or_rrr(
    ctx: &mut LowerCtx,
    op: AluOp,
    size: OperandSize,
    rd: Writable<Reg>,
    rn: Reg,
    b: Value,
) {
    if let Some(c) = ctx.value_const(b) {
        let amount = c & (size.bits() as u64 - 1);
        if let Some(immshift) = ImmShift::maybe_from_u64(amount, size) {
            ctx.emit(Inst::AluRRImmShift { op, size, rd, rn, immshift });
            return;
        }
    }
    let rm = ctx.value_reg(b);
    ctx.emit(Inst::AluRRR { op, size, rd, rn, rm });
}

pub(crate) fn lower_int_binary(
    ctx: &mut LowerCtx,
    op: Opcode,
    result: Value,
    args: [Value; 2],
) -> CodegenResult<()> {
    let ty = ctx.func().value_type(result);
    let size = LowerCtx::alu_size(ty);
    let rn = ctx.value_reg(args[0]);
    let rd = ctx.def_value(result);

    match op {
        Opcode::Iadd => add_sub_imm_or_rrr(ctx, AluOp::Add, size, rd, rn, args[1]),
        Opcode::Isub => add_sub_imm_or_rrr(ctx, AluOp::Sub, size, rd, rn, args[1]),
        Opcode::Imul => {
            let rm = ctx.value_reg(args[1]);
            ctx.emit(Inst::AluRRRR {
                op: AluOp3::MAdd,
                size,
                rd,
                rn,
                rm,
                ra: zero_reg(),
            });
        }
        Opcode::Smulhi | Opcode::Umulhi => {
            let rm = ctx.value_reg(args[1]);
            if size.is64() {
                let alu = if op == Opcode::Smulhi { AluOp::SMulH } else { AluOp::UMulH };
                ctx.emit(Inst::AluRRR { op: alu, size, rd, rn, rm });
            } else {
                // Widen through the 64-bit product, then take its top half.
                let wide = ctx.alloc_writable(RegClass::Int);
                let mull = if op == Opcode::Smulhi { AluOp3::SMAddL } else { AluOp3::UMAddL };
                ctx.emit(Inst::AluRRRR {
                    op: mull,
                    size: OperandSize::Size64,
                    rd: wide,
                    rn,
                    rm,
                    ra: zero_reg(),
                });
                let shift = if op == Opcode::Smulhi { AluOp::Asr } else { AluOp::Lsr };
                ctx.emit(Inst::AluRRImmShift {
                    op: shift,
                    size: OperandSize::Size64,
                    rd,
                    rn: wide.to_reg(),
                    immshift: ImmShift::maybe_from_u64(32, OperandSize::Size64)
                        .expect("32 is a valid 64-bit shift"),
                });
            }
        }
        Opcode::Sdiv | Opcode::Udiv => {
            let rm = ctx.value_reg(args[1]);
            let alu = if op == Opcode::Sdiv { AluOp::SDiv } else { AluOp::UDiv };
            ctx.emit(Inst::AluRRR { op: alu, size, rd, rn, rm });
        }
        Opcode::Band => logic_imm_or_rrr(ctx, AluOp::And, size, rd, rn, args[1]),
        Opcode::Bor => logic_imm_or_rrr(ctx, AluOp::Orr, size, rd, rn, args[1]),
        Opcode::Bxor => logic_imm_or_rrr(ctx, AluOp::Eor, size, rd, rn, args[1]),
        Opcode::BandNot => {
            // AND with the complemented immediate when that encodes.
            if let Some(c) = ctx.value_const(args[1]) {
                let inverted = match size {
                    OperandSize::Size32 => !(c as u32) as u64,
                    _ => !c,
                };
                if let Some(imml) = ImmLogic::maybe_from_u64(inverted, size) {
                    ctx.emit(Inst::AluRRImmLogic { op: AluOp::And, size, rd, rn, imml });
                    return Ok(());
                }
            }
            let rm = ctx.value_reg(args[1]);
            ctx.emit(Inst::AluRRR { op: AluOp::Bic, size, rd, rn, rm });
        }
        Opcode::BorNot => {
            let rm = ctx.value_reg(args[1]);
            ctx.emit(Inst::AluRRR { op: AluOp::Orn, size, rd, rn, rm });
        }
        Opcode::Ishl => shift_imm_or_rrr(ctx, AluOp::Lsl, size, rd, rn, args[1]),
        Opcode::Ushr => shift_imm_or_rrr(ctx, AluOp::Lsr, size, rd, rn, args[1]),
        Opcode::Sshr => shift_imm_or_rrr(ctx, AluOp::Asr, size, rd, rn, args[1]),
        Opcode::Rotr => shift_imm_or_rrr(ctx, AluOp::Ror, size, rd, rn, args[1]),
        _ => return Err(CodegenError::UnimplementedOpcode("int-binary")),
    }
    Ok(())
}

pub(crate) fn lower_int_unary(
    ctx: &mut LowerCtx,
    op: Opcode,
    result: Value,
    arg: Value,
) -> CodegenResult<()> {
    let ty = ctx.func().value_type(result);
    let size = LowerCtx::alu_size(ty);
    let rn = ctx.value_reg(arg);
    let rd = ctx.def_value(result);

    match op {
        Opcode::Bnot => {
            // MVN is ORN with a zeroed first source.
            ctx.emit(Inst::AluRRR {
                op: AluOp::Orn,
                size,
                rd,
                rn: zero_reg(),
                rm: rn,
            });
        }
        Opcode::Clz => ctx.emit(Inst::BitRR { op: anvil_asm::BitOp::Clz, size, rd, rn }),
        Opcode::Cls => ctx.emit(Inst::BitRR { op: anvil_asm::BitOp::Cls, size, rd, rn }),
        Opcode::Bitrev => ctx.emit(Inst::BitRR { op: anvil_asm::BitOp::Rbit, size, rd, rn }),
        Opcode::Bswap => {
            let bitop = match ty.bits() {
                16 => anvil_asm::BitOp::Rev16,
                32 => anvil_asm::BitOp::Rev32,
                64 => anvil_asm::BitOp::Rev64,
                other => return Err(CodegenError::UnsupportedIntegerSize(other)),
            };
            ctx.emit(Inst::BitRR { op: bitop, size, rd, rn });
        }
        _ => return Err(CodegenError::UnimplementedOpcode("int-unary")),
    }
    Ok(())
}

pub(crate) fn lower_width_change(
    ctx: &mut LowerCtx,
    op: Opcode,
    result: Value,
    arg: Value,
) -> CodegenResult<()> {
    let from_ty = ctx.func().value_type(arg);
    let to_ty = ctx.func().value_type(result);

    if op == Opcode::Ireduce {
        // A narrowing is a re-view of the same bits.
        let reg = ctx.value_reg(arg);
        ctx.set_value_reg(result, reg);
        return Ok(());
    }

    let rn = ctx.value_reg(arg);
    let rd = ctx.def_value(result);
    ctx.emit(Inst::Extend {
        rd,
        rn,
        signed: op == Opcode::Sextend,
        from_bits: from_ty.bits() as u8,
        to_bits: to_ty.bits() as u8,
    });
    Ok(())
}

/// Saturating add/sub on scalars routes through the FP register file; the
/// vector unit is the only one with saturating ALUs.
pub(crate) fn lower_saturating(
    ctx: &mut LowerCtx,
    op: Opcode,
    result: Value,
    args: [Value; 2],
) -> CodegenResult<()> {
    let ty = ctx.func().value_type(result);
    let lane = OperandSize::from_bits(ty.bits())
        .ok_or(CodegenError::UnsupportedIntegerSize(ty.bits()))?;
    let vop = match op {
        Opcode::SaddSat => VecAluOp::Sqadd,
        Opcode::UaddSat => VecAluOp::Uqadd,
        Opcode::SsubSat => VecAluOp::Sqsub,
        Opcode::UsubSat => VecAluOp::Uqsub,
        _ => unreachable!(),
    };

    let an = ctx.value_reg(args[0]);
    let am = ctx.value_reg(args[1]);
    let mov_size = if ty.bits() == 64 { OperandSize::Size64 } else { OperandSize::Size32 };

    let fn_ = ctx.alloc_writable(RegClass::Float);
    ctx.emit(Inst::MovToFpu { size: mov_size, rd: fn_, rn: an });
    let fm = ctx.alloc_writable(RegClass::Float);
    ctx.emit(Inst::MovToFpu { size: mov_size, rd: fm, rn: am });
    let fd = ctx.alloc_writable(RegClass::Float);
    ctx.emit(Inst::VecRRRScalar {
        op: vop,
        size: lane,
        rd: fd,
        rn: fn_.to_reg(),
        rm: fm.to_reg(),
    });
    let rd = ctx.def_value(result);
    ctx.emit(Inst::MovFromFpu { size: mov_size, rd, rn: fd.to_reg() });
    Ok(())
}

/// Compare `a` against `b`, immediate form when it fits.
pub(crate) fn emit_cmp(ctx: &mut LowerCtx, size: OperandSize, a: Value, b: Value) {
    let rn = ctx.value_reg(a);
    let rd = Writable::from_reg(zero_reg());
    if let Some(c) = ctx.value_const(b) {
        if let Some(imm12) = Imm12::maybe_from_u64(c) {
            ctx.emit(Inst::AluRRImm12 { op: AluOp::Subs, size, rd, rn, imm12 });
            return;
        }
        let rm = materialize_const(ctx, c, size);
        ctx.emit(Inst::AluRRR { op: AluOp::Subs, size, rd, rn, rm });
        return;
    }
    let rm = ctx.value_reg(b);
    ctx.emit(Inst::AluRRR { op: AluOp::Subs, size, rd, rn, rm });
}

pub(crate) fn lower_icmp_bool(
    ctx: &mut LowerCtx,
    cond: IntCC,
    result: Value,
    args: [Value; 2],
) -> CodegenResult<()> {
    let size = LowerCtx::alu_size(ctx.func().value_type(args[0]));
    emit_cmp(ctx, size, args[0], args[1]);
    let rd = ctx.def_value(result);
    ctx.emit(Inst::CSet {
        size: OperandSize::Size32,
        rd,
        cond: cond.cond(),
    });
    Ok(())
}

pub(crate) fn lower_select(
    ctx: &mut LowerCtx,
    result: Value,
    args: [Value; 3],
) -> CodegenResult<()> {
    let [cond, x, y] = args;
    let ty = ctx.func().value_type(result);
    if ty.is_vector() {
        return Err(CodegenError::UnsupportedType(ty));
    }

    // Fuse a compare feeding the select.
    let cc = match ctx.value_def(cond).cloned() {
        Some(InstData::IntCompare { cond: cc, args: cmp_args }) => {
            let size = LowerCtx::alu_size(ctx.func().value_type(cmp_args[0]));
            emit_cmp(ctx, size, cmp_args[0], cmp_args[1]);
            cc.cond()
        }
        _ => {
            let size = LowerCtx::alu_size(ctx.func().value_type(cond));
            let rn = ctx.value_reg(cond);
            ctx.emit(Inst::AluRRImm12 {
                op: AluOp::Subs,
                size,
                rd: Writable::from_reg(zero_reg()),
                rn,
                imm12: Imm12::zero(),
            });
            anvil_asm::Cond::Ne
        }
    };

    let rn = ctx.value_reg(x);
    let rm = ctx.value_reg(y);
    let rd = ctx.def_value(result);
    if ty.is_float() {
        ctx.emit(Inst::FpuCSel {
            size: LowerCtx::size_for_type(ty),
            rd,
            rn,
            rm,
            cond: cc,
        });
    } else {
        ctx.emit(Inst::CondSel {
            op: CondSelOp::Sel,
            size: LowerCtx::alu_size(ty),
            rd,
            rn,
            rm,
            cond: cc,
        });
    }
    Ok(())
}

/// Overflow-checked arithmetic that traps: flag-setting op, conditional
/// skip over a UDF carrying the trap code.
pub(crate) fn lower_overflow_trap(
    ctx: &mut LowerCtx,
    op: Opcode,
    code: TrapCode,
    result: Value,
    args: [Value; 2],
) -> CodegenResult<()> {
    let ty = ctx.func().value_type(result);
    let size = LowerCtx::alu_size(ty);
    let rn = ctx.value_reg(args[0]);
    let rm = ctx.value_reg(args[1]);
    let rd = ctx.def_value(result);
    let skip = ctx.alloc_label();

    match op {
        Opcode::UaddOverflowTrap | Opcode::SaddOverflowTrap | Opcode::UsubOverflowTrap
        | Opcode::SsubOverflowTrap => {
            let alu = match op {
                Opcode::UaddOverflowTrap | Opcode::SaddOverflowTrap => AluOp::Adds,
                _ => AluOp::Subs,
            };
            ctx.emit(Inst::AluRRR { op: alu, size, rd, rn, rm });
            let no_overflow = match op {
                Opcode::UaddOverflowTrap => anvil_asm::Cond::Lo,
                Opcode::UsubOverflowTrap => anvil_asm::Cond::Hs,
                _ => anvil_asm::Cond::Vc,
            };
            ctx.emit(Inst::CondBr {
                target: skip,
                kind: CondBrKind::Cond(no_overflow),
            });
        }
        Opcode::UmulOverflowTrap if size.is64() => {
            ctx.emit(Inst::AluRRRR {
                op: AluOp3::MAdd,
                size,
                rd,
                rn,
                rm,
                ra: zero_reg(),
            });
            let hi = ctx.alloc_writable(RegClass::Int);
            ctx.emit(Inst::AluRRR { op: AluOp::UMulH, size, rd: hi, rn, rm });
            ctx.emit(Inst::CondBr {
                target: skip,
                kind: CondBrKind::Zero(hi.to_reg(), OperandSize::Size64),
            });
        }
        Opcode::SmulOverflowTrap if size.is64() => {
            ctx.emit(Inst::AluRRRR {
                op: AluOp3::MAdd,
                size,
                rd,
                rn,
                rm,
                ra: zero_reg(),
            });
            let hi = ctx.alloc_writable(RegClass::Int);
            ctx.emit(Inst::AluRRR { op: AluOp::SMulH, size, rd: hi, rn, rm });
            // The product fits iff the high half is the sign extension of
            // the low half.
            let sign = ctx.alloc_writable(RegClass::Int);
            ctx.emit(Inst::AluRRImmShift {
                op: AluOp::Asr,
                size,
                rd: sign,
                rn: rd.to_reg(),
                immshift: ImmShift::maybe_from_u64(63, size).expect("valid shift"),
            });
            ctx.emit(Inst::AluRRR {
                op: AluOp::Subs,
                size,
                rd: Writable::from_reg(zero_reg()),
                rn: hi.to_reg(),
                rm: sign.to_reg(),
            });
            ctx.emit(Inst::CondBr {
                target: skip,
                kind: CondBrKind::Cond(anvil_asm::Cond::Eq),
            });
        }
        Opcode::UmulOverflowTrap | Opcode::SmulOverflowTrap => {
            // 32-bit forms widen through a 64-bit product.
            let signed = op == Opcode::SmulOverflowTrap;
            let wide = ctx.alloc_writable(RegClass::Int);
            ctx.emit(Inst::AluRRRR {
                op: if signed { AluOp3::SMAddL } else { AluOp3::UMAddL },
                size: OperandSize::Size64,
                rd: wide,
                rn,
                rm,
                ra: zero_reg(),
            });
            ctx.emit(Inst::MovRR {
                size: OperandSize::Size32,
                rd,
                rm: wide.to_reg(),
            });
            if signed {
                // The product fits iff the wide result equals the sign
                // extension of its own low word.
                let sext = ctx.alloc_writable(RegClass::Int);
                ctx.emit(Inst::Extend {
                    rd: sext,
                    rn: wide.to_reg(),
                    signed: true,
                    from_bits: 32,
                    to_bits: 64,
                });
                ctx.emit(Inst::AluRRR {
                    op: AluOp::Subs,
                    size: OperandSize::Size64,
                    rd: Writable::from_reg(zero_reg()),
                    rn: wide.to_reg(),
                    rm: sext.to_reg(),
                });
                ctx.emit(Inst::CondBr {
                    target: skip,
                    kind: CondBrKind::Cond(anvil_asm::Cond::Eq),
                });
            } else {
                let hi = ctx.alloc_writable(RegClass::Int);
                ctx.emit(Inst::AluRRImmShift {
                    op: AluOp::Lsr,
                    size: OperandSize::Size64,
                    rd: hi,
                    rn: wide.to_reg(),
                    immshift: ImmShift::maybe_from_u64(32, OperandSize::Size64)
                        .expect("valid shift"),
                });
                ctx.emit(Inst::CondBr {
                    target: skip,
                    kind: CondBrKind::Zero(hi.to_reg(), OperandSize::Size64),
                });
            }
        }
        _ => return Err(CodegenError::UnimplementedOpcode("overflow-trap")),
    }

    ctx.emit(Inst::Udf {
        trap_code: code.code(),
    });
    ctx.bind_label(skip);
    Ok(())
}

/// Carry-in arithmetic returning the result and the carry/overflow bit.
pub(crate) fn lower_overflow_cin(
    ctx: &mut LowerCtx,
    op: Opcode,
    result: Value,
    flag_out: Value,
    args: [Value; 3],
) -> CodegenResult<()> {
    let ty = ctx.func().value_type(result);
    let size = LowerCtx::alu_size(ty);
    let [a, b, cin] = args;

    // subs xzr, cin, #1 moves the carry-in into the C flag.
    let cin_reg = ctx.value_reg(cin);
    ctx.emit(Inst::AluRRImm12 {
        op: AluOp::Subs,
        size: OperandSize::Size64,
        rd: Writable::from_reg(zero_reg()),
        rn: cin_reg,
        imm12: Imm12::maybe_from_u64(1).expect("1 fits imm12"),
    });

    let rn = ctx.value_reg(a);
    let rm = ctx.value_reg(b);
    let rd = ctx.def_value(result);
    let alu = match op {
        Opcode::UaddOverflowCin | Opcode::SaddOverflowCin => AluOp::Adcs,
        _ => AluOp::Sbcs,
    };
    ctx.emit(Inst::AluRRR { op: alu, size, rd, rn, rm });

    let flag_cond = match op {
        Opcode::UaddOverflowCin => anvil_asm::Cond::Hs,
        Opcode::UsubOverflowCin => anvil_asm::Cond::Lo,
        _ => anvil_asm::Cond::Vs,
    };
    let fd = ctx.def_value(flag_out);
    ctx.emit(Inst::CSet {
        size: OperandSize::Size32,
        rd: fd,
        cond: flag_cond,
    });
    Ok(())
}
