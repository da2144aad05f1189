//! Instruction operand vocabulary: operand sizes, condition codes, extend and
//! shift operators, and addressing modes.

use core::fmt;

use crate::buffer::Label;
use crate::imm::{SImm7Scaled, SImm9, UImm12Scaled};
use crate::reg::{Reg, Writable};

/// Width of a scalar operand.
///
/// For ALU instructions only the 32- and 64-bit widths are legal; byte and
/// half widths select the narrow load/store encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OperandSize {
    /// 8 bits.
    Size8,
    /// 16 bits.
    Size16,
    /// 32 bits.
    Size32,
    /// 64 bits.
    Size64,
}

impl OperandSize {
    /// Width in bits.
    pub const fn bits(&self) -> u32 {
        match self {
            OperandSize::Size8 => 8,
            OperandSize::Size16 => 16,
            OperandSize::Size32 => 32,
            OperandSize::Size64 => 64,
        }
    }

    /// Width in bytes.
    pub const fn bytes(&self) -> u32 {
        self.bits() / 8
    }

    /// The `sf` bit: set only for 64-bit operands.
    pub const fn sf_bit(&self) -> u32 {
        matches!(self, OperandSize::Size64) as u32
    }

    /// True for the 64-bit width.
    pub const fn is64(&self) -> bool {
        matches!(self, OperandSize::Size64)
    }

    /// The `size` field of load/store encodings (log2 of the byte width).
    pub const fn ldst_size_bits(&self) -> u32 {
        match self {
            OperandSize::Size8 => 0b00,
            OperandSize::Size16 => 0b01,
            OperandSize::Size32 => 0b10,
            OperandSize::Size64 => 0b11,
        }
    }

    /// Operand size for an integer width in bits, if supported.
    pub const fn from_bits(bits: u32) -> Option<OperandSize> {
        match bits {
            8 => Some(OperandSize::Size8),
            16 => Some(OperandSize::Size16),
            32 => Some(OperandSize::Size32),
            64 => Some(OperandSize::Size64),
            _ => None,
        }
    }
}

/// Arrangement of a full 128-bit vector register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VectorSize {
    /// Sixteen byte lanes.
    Size8x16,
    /// Eight halfword lanes.
    Size16x8,
    /// Four word lanes.
    Size32x4,
    /// Two doubleword lanes.
    Size64x2,
}

impl VectorSize {
    /// The two-bit `size` field of most vector encodings.
    pub const fn enc_size(&self) -> u32 {
        match self {
            VectorSize::Size8x16 => 0b00,
            VectorSize::Size16x8 => 0b01,
            VectorSize::Size32x4 => 0b10,
            VectorSize::Size64x2 => 0b11,
        }
    }

    /// Lane width.
    pub const fn lane_size(&self) -> OperandSize {
        match self {
            VectorSize::Size8x16 => OperandSize::Size8,
            VectorSize::Size16x8 => OperandSize::Size16,
            VectorSize::Size32x4 => OperandSize::Size32,
            VectorSize::Size64x2 => OperandSize::Size64,
        }
    }

    /// Number of lanes.
    pub const fn lanes(&self) -> u32 {
        128 / self.lane_size().bits()
    }

    /// Arrangement suffix for display (`16b`, `8h`, `4s`, `2d`).
    pub const fn suffix(&self) -> &'static str {
        match self {
            VectorSize::Size8x16 => "16b",
            VectorSize::Size16x8 => "8h",
            VectorSize::Size32x4 => "4s",
            VectorSize::Size64x2 => "2d",
        }
    }
}

/// The sixteen condition codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Cond {
    /// Equal.
    Eq = 0,
    /// Not equal.
    Ne = 1,
    /// Carry set / unsigned higher or same.
    Hs = 2,
    /// Carry clear / unsigned lower.
    Lo = 3,
    /// Negative.
    Mi = 4,
    /// Nonnegative.
    Pl = 5,
    /// Overflow.
    Vs = 6,
    /// No overflow.
    Vc = 7,
    /// Unsigned higher.
    Hi = 8,
    /// Unsigned lower or same.
    Ls = 9,
    /// Signed greater or equal.
    Ge = 10,
    /// Signed less.
    Lt = 11,
    /// Signed greater.
    Gt = 12,
    /// Signed less or equal.
    Le = 13,
    /// Always.
    Al = 14,
    /// Always (second encoding).
    Nv = 15,
}

impl Cond {
    /// The condition with the opposite meaning.
    pub const fn invert(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Hs => Cond::Lo,
            Cond::Lo => Cond::Hs,
            Cond::Mi => Cond::Pl,
            Cond::Pl => Cond::Mi,
            Cond::Vs => Cond::Vc,
            Cond::Vc => Cond::Vs,
            Cond::Hi => Cond::Ls,
            Cond::Ls => Cond::Hi,
            Cond::Ge => Cond::Lt,
            Cond::Lt => Cond::Ge,
            Cond::Gt => Cond::Le,
            Cond::Le => Cond::Gt,
            Cond::Al => Cond::Nv,
            Cond::Nv => Cond::Al,
        }
    }

    /// The four-bit condition field.
    pub const fn bits(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Hs => "hs",
            Cond::Lo => "lo",
            Cond::Mi => "mi",
            Cond::Pl => "pl",
            Cond::Vs => "vs",
            Cond::Vc => "vc",
            Cond::Hi => "hi",
            Cond::Ls => "ls",
            Cond::Ge => "ge",
            Cond::Lt => "lt",
            Cond::Gt => "gt",
            Cond::Le => "le",
            Cond::Al => "al",
            Cond::Nv => "nv",
        };
        f.write_str(s)
    }
}

/// Register-extension operators for extended-register operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ExtendOp {
    /// Unsigned extend byte.
    Uxtb = 0b000,
    /// Unsigned extend halfword.
    Uxth = 0b001,
    /// Unsigned extend word.
    Uxtw = 0b010,
    /// No-op extend of a 64-bit value.
    Uxtx = 0b011,
    /// Signed extend byte.
    Sxtb = 0b100,
    /// Signed extend halfword.
    Sxth = 0b101,
    /// Signed extend word.
    Sxtw = 0b110,
    /// No-op extend of a 64-bit value (signed form).
    Sxtx = 0b111,
}

impl ExtendOp {
    /// The three-bit `option` field.
    pub const fn bits(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ExtendOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtendOp::Uxtb => "uxtb",
            ExtendOp::Uxth => "uxth",
            ExtendOp::Uxtw => "uxtw",
            ExtendOp::Uxtx => "uxtx",
            ExtendOp::Sxtb => "sxtb",
            ExtendOp::Sxth => "sxth",
            ExtendOp::Sxtw => "sxtw",
            ExtendOp::Sxtx => "sxtx",
        };
        f.write_str(s)
    }
}

/// Shift operators for shifted-register operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ShiftOp {
    /// Logical shift left.
    Lsl = 0b00,
    /// Logical shift right.
    Lsr = 0b01,
    /// Arithmetic shift right.
    Asr = 0b10,
    /// Rotate right.
    Ror = 0b11,
}

impl ShiftOp {
    /// The two-bit `shift` field.
    pub const fn bits(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ShiftOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShiftOp::Lsl => "lsl",
            ShiftOp::Lsr => "lsr",
            ShiftOp::Asr => "asr",
            ShiftOp::Ror => "ror",
        };
        f.write_str(s)
    }
}

/// A shift operator with its amount, for shifted-register ALU forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ShiftOpAndAmt {
    op: ShiftOp,
    amt: u8,
}

impl ShiftOpAndAmt {
    /// Maximum shift amount.
    pub const MAX_AMT: u8 = 63;

    /// Combine an operator with an amount.
    pub const fn new(op: ShiftOp, amt: u8) -> Self {
        assert!(amt <= Self::MAX_AMT);
        Self { op, amt }
    }

    /// The operator.
    pub const fn op(&self) -> ShiftOp {
        self.op
    }

    /// The amount.
    pub const fn amt(&self) -> u8 {
        self.amt
    }
}

impl fmt::Display for ShiftOpAndAmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.op, self.amt)
    }
}

/// Addressing mode of a single-register load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AMode {
    /// `[rn, #simm9]`, unscaled signed offset.
    Unscaled {
        /// Base register.
        rn: Reg,
        /// Unscaled byte offset.
        simm9: SImm9,
    },
    /// `[rn, #uimm12 * size]`, scaled unsigned offset.
    UnsignedOffset {
        /// Base register.
        rn: Reg,
        /// Scaled offset.
        uimm12: UImm12Scaled,
    },
    /// `[rn, rm]`, register offset.
    RegOffset {
        /// Base register.
        rn: Reg,
        /// Offset register.
        rm: Reg,
    },
    /// `[rn, rm, lsl #log2(size)]`, scaled register offset.
    RegScaled {
        /// Base register.
        rn: Reg,
        /// Offset register.
        rm: Reg,
    },
    /// `[rn, rm, <extend>]`, extended register offset, scaled.
    RegExtended {
        /// Base register.
        rn: Reg,
        /// Offset register.
        rm: Reg,
        /// Extension applied to `rm`.
        extendop: ExtendOp,
    },
    /// `[rn, #simm9]!`, pre-indexed with base writeback.
    PreIndexed {
        /// Base register, written back.
        rn: Writable<Reg>,
        /// Byte offset.
        simm9: SImm9,
    },
    /// `[rn], #simm9`, post-indexed with base writeback.
    PostIndexed {
        /// Base register, written back.
        rn: Writable<Reg>,
        /// Byte offset.
        simm9: SImm9,
    },
    /// `[sp, #off]` against the real stack pointer.
    SpOffset {
        /// Byte offset from SP.
        off: i64,
    },
    /// `[sp, #off]` against the nominal stack base (above the outgoing
    /// argument area); resolved to a real SP offset at emission.
    NominalSpOffset {
        /// Byte offset from the nominal base.
        off: i64,
    },
}

/// Addressing mode of a paired load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PairAMode {
    /// `[rn, #simm7 * size]`.
    SignedOffset {
        /// Base register.
        rn: Reg,
        /// Scaled pair offset.
        simm7: SImm7Scaled,
    },
    /// `[rn, #simm7 * size]!`.
    PreIndexed {
        /// Base register, written back.
        rn: Writable<Reg>,
        /// Scaled pair offset.
        simm7: SImm7Scaled,
    },
    /// `[rn], #simm7 * size`.
    PostIndexed {
        /// Base register, written back.
        rn: Writable<Reg>,
        /// Scaled pair offset.
        simm7: SImm7Scaled,
    },
}

/// Kind of conditional branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CondBrKind {
    /// `cbz`: branch if the register is zero.
    Zero(Reg, OperandSize),
    /// `cbnz`: branch if the register is nonzero.
    NotZero(Reg, OperandSize),
    /// `b.cond` on the current flags.
    Cond(Cond),
}

impl CondBrKind {
    /// The branch taken under the opposite condition.
    pub fn invert(self) -> CondBrKind {
        match self {
            CondBrKind::Zero(r, size) => CondBrKind::NotZero(r, size),
            CondBrKind::NotZero(r, size) => CondBrKind::Zero(r, size),
            CondBrKind::Cond(c) => CondBrKind::Cond(c.invert()),
        }
    }
}

/// A branch destination: an intra-function label.
pub type BranchTarget = Label;

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn cond_inversion_is_involutive() {
        for cond in Cond::iter() {
            assert_eq!(cond.invert().invert(), cond);
            assert_eq!(cond.bits() ^ 1, cond.invert().bits());
        }
    }

    #[test]
    fn operand_size_fields() {
        assert_eq!(OperandSize::Size64.sf_bit(), 1);
        assert_eq!(OperandSize::Size32.sf_bit(), 0);
        assert_eq!(OperandSize::Size8.ldst_size_bits(), 0b00);
        assert_eq!(OperandSize::Size64.ldst_size_bits(), 0b11);
        assert_eq!(OperandSize::from_bits(24), None);
        assert_eq!(OperandSize::from_bits(16), Some(OperandSize::Size16));
    }

    #[test]
    fn vector_arrangements() {
        assert_eq!(VectorSize::Size8x16.lanes(), 16);
        assert_eq!(VectorSize::Size64x2.lanes(), 2);
        assert_eq!(VectorSize::Size32x4.suffix(), "4s");
    }

    #[test]
    fn extend_and_shift_bits() {
        assert_eq!(ExtendOp::Uxtw.bits(), 0b010);
        assert_eq!(ExtendOp::Sxtx.bits(), 0b111);
        assert_eq!(ShiftOp::Ror.bits(), 0b11);
    }
}
