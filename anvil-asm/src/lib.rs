//! AArch64 machine layer of the Anvil code generator.
//!
//! This crate owns the operand model (registers, immediates, condition
//! codes, addressing modes), the closed [`Inst`] sum type covering every
//! instruction the back end emits, the relocating [`CodeBuffer`], and the
//! bit-exact encoder. Nothing here knows about the IR, the ABI, or register
//! allocation; those live in `anvil-codegen`.

#![warn(missing_docs)]

mod args;
mod buffer;
mod encode;
mod imm;
mod inst;
mod reg;


pub use args::{
    AMode, BranchTarget, Cond, CondBrKind, ExtendOp, OperandSize, PairAMode, ShiftOp,
    ShiftOpAndAmt, VectorSize,
};
pub use buffer::{
    BufferError, CodeBuffer, CodeOffset, Label, LabelUseKind, Reloc, RelocKind, TrapRecord,
};
pub use encode::{mov_imm_sequence, EmitState};
pub use imm::{Imm12, ImmLogic, ImmShift, MoveWideConst, SImm7Scaled, SImm9, UImm12Scaled};
pub use inst::{
    AluOp, AluOp3, AtomicRmwOp, BitOp, CondSelOp, FpuOp1, FpuOp2, FpuOp3, Inst, MoveWideOp,
    OperandKind, VecAluOp, VecMiscOp,
};
pub use reg::{
    fp_reg, link_reg, pinned_reg, show_freg, show_ireg, show_ireg_sp, show_vreg, stack_reg,
    vreg, writable_fp_reg, writable_link_reg, writable_stack_reg, writable_vreg, writable_xreg,
    xreg, zero_reg, PReg, Reg, RegClass, VReg, Writable,
};
