//! Memory lowerings: typed loads and stores, stack-slot addressing and
//! global-value materialization.

use anvil_asm::{
    pinned_reg, AMode, AluOp, Imm12, Inst, OperandSize, Reg, RegClass, UImm12Scaled, Writable,
};

use crate::error::{CodegenError, CodegenResult};
use crate::ir::{GlobalValue, GlobalValueData, Opcode, StackSlot, Type, Value};
use crate::lower::LowerCtx;

fn access_bytes(op: Opcode, ty: Type) -> u8 {
    match op {
        Opcode::Uload8 | Opcode::Sload8 | Opcode::Istore8 => 1,
        Opcode::Uload16 | Opcode::Sload16 | Opcode::Istore16 => 2,
        Opcode::Uload32 | Opcode::Sload32 | Opcode::Istore32 => 4,
        _ => (ty.bits() / 8) as u8,
    }
}

/// Build an addressing mode for `ptr + offset`, materializing the offset
/// when no single encoding covers it.
fn amode_for(ctx: &mut LowerCtx, ptr: Value, offset: i32, access: u8) -> AMode {
    let base = ctx.value_reg(ptr);
    if offset == 0 {
        return AMode::UnsignedOffset {
            rn: base,
            uimm12: UImm12Scaled::zero(access),
        };
    }
    if let Some(uimm12) = UImm12Scaled::maybe_from_i64(offset as i64, access) {
        return AMode::UnsignedOffset { rn: base, uimm12 };
    }
    if let Some(simm9) = anvil_asm::SImm9::maybe_from_i64(offset as i64) {
        return AMode::Unscaled { rn: base, simm9 };
    }
    // Fold the displacement into a scratch base.
    let rd = ctx.alloc_writable(RegClass::Int);
    if let Some(imm12) = Imm12::maybe_from_u64(offset.unsigned_abs() as u64) {
        let op = if offset < 0 { AluOp::Sub } else { AluOp::Add };
        ctx.emit(Inst::AluRRImm12 {
            op,
            size: OperandSize::Size64,
            rd,
            rn: base,
            imm12,
        });
    } else {
        let tmp = super::alu::materialize_const(ctx, offset as i64 as u64, OperandSize::Size64);
        ctx.emit(Inst::AluRRR {
            op: AluOp::Add,
            size: OperandSize::Size64,
            rd,
            rn: base,
            rm: tmp,
        });
    }
    AMode::UnsignedOffset {
        rn: rd.to_reg(),
        uimm12: UImm12Scaled::zero(access),
    }
}

fn load_inst(op: Opcode, ty: Type, rd: Writable<Reg>, mem: AMode) -> CodegenResult<Inst> {
    Ok(match op {
        Opcode::Uload8 => Inst::ULoad8 { rd, mem },
        Opcode::Sload8 => Inst::SLoad8 { rd, mem },
        Opcode::Uload16 => Inst::ULoad16 { rd, mem },
        Opcode::Sload16 => Inst::SLoad16 { rd, mem },
        Opcode::Uload32 => Inst::ULoad32 { rd, mem },
        Opcode::Sload32 => Inst::SLoad32 { rd, mem },
        Opcode::Load => match ty {
            Type::I8 => Inst::ULoad8 { rd, mem },
            Type::I16 => Inst::ULoad16 { rd, mem },
            Type::I32 => Inst::ULoad32 { rd, mem },
            Type::I64 => Inst::ULoad64 { rd, mem },
            Type::F32 => Inst::FpuLoad32 { rd, mem },
            Type::F64 => Inst::FpuLoad64 { rd, mem },
            _ => Inst::FpuLoad128 { rd, mem },
        },
        _ => return Err(CodegenError::UnsupportedType(ty)),
    })
}

fn store_inst(op: Opcode, ty: Type, rd: Reg, mem: AMode) -> CodegenResult<Inst> {
    Ok(match op {
        Opcode::Istore8 => Inst::Store8 { rd, mem },
        Opcode::Istore16 => Inst::Store16 { rd, mem },
        Opcode::Istore32 => Inst::Store32 { rd, mem },
        Opcode::Store => match ty {
            Type::I8 => Inst::Store8 { rd, mem },
            Type::I16 => Inst::Store16 { rd, mem },
            Type::I32 => Inst::Store32 { rd, mem },
            Type::I64 => Inst::Store64 { rd, mem },
            Type::F32 => Inst::FpuStore32 { rd, mem },
            Type::F64 => Inst::FpuStore64 { rd, mem },
            _ => Inst::FpuStore128 { rd, mem },
        },
        _ => return Err(CodegenError::UnsupportedType(ty)),
    })
}

pub(crate) fn lower_load(
    ctx: &mut LowerCtx,
    op: Opcode,
    result: Value,
    ptr: Value,
    offset: i32,
) -> CodegenResult<()> {
    let ty = ctx.func().value_type(result);
    let mem = amode_for(ctx, ptr, offset, access_bytes(op, ty));
    let rd = ctx.def_value(result);
    let inst = load_inst(op, ty, rd, mem)?;
    ctx.emit(inst);
    Ok(())
}

pub(crate) fn lower_store(
    ctx: &mut LowerCtx,
    op: Opcode,
    value: Value,
    ptr: Value,
    offset: i32,
) -> CodegenResult<()> {
    let ty = ctx.func().value_type(value);
    let mem = amode_for(ctx, ptr, offset, access_bytes(op, ty));
    let rd = ctx.value_reg(value);
    let inst = store_inst(op, ty, rd, mem)?;
    ctx.emit(inst);
    Ok(())
}

pub(crate) fn lower_stack_addr(
    ctx: &mut LowerCtx,
    result: Value,
    slot: StackSlot,
    offset: i32,
) -> CodegenResult<()> {
    let off = ctx.stack_slot_offset(slot, offset as i64);
    let rd = ctx.def_value(result);
    ctx.emit(Inst::NominalSpAddr { rd, off });
    Ok(())
}

pub(crate) fn lower_stack_load(
    ctx: &mut LowerCtx,
    result: Value,
    slot: StackSlot,
    offset: i32,
) -> CodegenResult<()> {
    let ty = ctx.func().value_type(result);
    let off = ctx.stack_slot_offset(slot, offset as i64);
    let mem = AMode::NominalSpOffset { off };
    let rd = ctx.def_value(result);
    let inst = load_inst(Opcode::Load, ty, rd, mem)?;
    ctx.emit(inst);
    Ok(())
}

pub(crate) fn lower_stack_store(
    ctx: &mut LowerCtx,
    value: Value,
    slot: StackSlot,
    offset: i32,
) -> CodegenResult<()> {
    let ty = ctx.func().value_type(value);
    let off = ctx.stack_slot_offset(slot, offset as i64);
    let mem = AMode::NominalSpOffset { off };
    let rd = ctx.value_reg(value);
    let inst = store_inst(Opcode::Store, ty, rd, mem)?;
    ctx.emit(inst);
    Ok(())
}

/// Materialize a global value into a register, recursing through derived
/// globals.
fn global_value_to_reg(ctx: &mut LowerCtx, gv: GlobalValue) -> CodegenResult<Reg> {
    let data = ctx.func().global_value(gv).clone();
    match data {
        GlobalValueData::VmCtx => {
            // The VM context rides in the pinned register.
            let rd = ctx.alloc_writable(RegClass::Int);
            ctx.emit(Inst::MovRR {
                size: OperandSize::Size64,
                rd,
                rm: pinned_reg(),
            });
            Ok(rd.to_reg())
        }
        GlobalValueData::Symbol { name, offset } => {
            // Page plus low-twelve pair, two relocations on one symbol.
            let page = ctx.alloc_writable(RegClass::Int);
            ctx.emit(Inst::AdrpSymbol {
                rd: page,
                symbol: name.clone(),
                addend: offset,
            });
            let rd = ctx.alloc_writable(RegClass::Int);
            ctx.emit(Inst::AddSymbolLo12 {
                rd,
                rn: page.to_reg(),
                symbol: name,
                addend: offset,
            });
            Ok(rd.to_reg())
        }
        GlobalValueData::IAddImm { base, offset } => {
            let rn = global_value_to_reg(ctx, base)?;
            let rd = ctx.alloc_writable(RegClass::Int);
            if let Some(imm12) = Imm12::maybe_from_u64(offset.unsigned_abs()) {
                let op = if offset < 0 { AluOp::Sub } else { AluOp::Add };
                ctx.emit(Inst::AluRRImm12 {
                    op,
                    size: OperandSize::Size64,
                    rd,
                    rn,
                    imm12,
                });
            } else {
                let rm = super::alu::materialize_const(ctx, offset as u64, OperandSize::Size64);
                ctx.emit(Inst::AluRRR {
                    op: AluOp::Add,
                    size: OperandSize::Size64,
                    rd,
                    rn,
                    rm,
                });
            }
            Ok(rd.to_reg())
        }
        GlobalValueData::Load { base, offset } => {
            let rn = global_value_to_reg(ctx, base)?;
            let rd = ctx.alloc_writable(RegClass::Int);
            let mem = if let Some(uimm12) = UImm12Scaled::maybe_from_i64(offset as i64, 8) {
                AMode::UnsignedOffset { rn, uimm12 }
            } else {
                let simm9 = anvil_asm::SImm9::maybe_from_i64(offset as i64)
                    .ok_or(CodegenError::StackOffsetOutOfRange {
                        offset: offset as i64,
                    })?;
                AMode::Unscaled { rn, simm9 }
            };
            ctx.emit(Inst::ULoad64 { rd, mem });
            Ok(rd.to_reg())
        }
    }
}

pub(crate) fn lower_global_value(
    ctx: &mut LowerCtx,
    result: Value,
    gv: GlobalValue,
) -> CodegenResult<()> {
    let reg = global_value_to_reg(ctx, gv)?;
    ctx.set_value_reg(result, reg);
    Ok(())
}
