//! The machine-instruction set: one variant per emittable instruction family.
//!
//! Variants carry only operands and immediates. Defined operands are
//! [`Writable`]; used operands are plain [`Reg`]; the allocator walks both
//! through [`Inst::visit_regs`]. Fixed SP/XZR operands are implicit in the
//! variant identity and never appear as register fields.

use core::fmt;

use smallvec::SmallVec;

use crate::args::{
    AMode, Cond, CondBrKind, ExtendOp, OperandSize, PairAMode, ShiftOpAndAmt, VectorSize,
};
use crate::buffer::Label;
use crate::imm::{Imm12, ImmLogic, ImmShift, MoveWideConst};
use crate::reg::{show_freg, show_ireg, show_ireg_sp, show_vreg, Reg, Writable};

/// Two-source integer ALU operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AluOp {
    /// Add.
    Add,
    /// Subtract.
    Sub,
    /// Add, setting flags.
    Adds,
    /// Subtract, setting flags.
    Subs,
    /// Add with carry, setting flags.
    Adcs,
    /// Subtract with carry, setting flags.
    Sbcs,
    /// Bitwise AND.
    And,
    /// Bitwise AND, setting flags.
    Ands,
    /// Bitwise OR.
    Orr,
    /// Bitwise OR NOT.
    Orn,
    /// Bitwise exclusive OR.
    Eor,
    /// Bitwise clear (AND NOT).
    Bic,
    /// Logical shift left (variable).
    Lsl,
    /// Logical shift right (variable).
    Lsr,
    /// Arithmetic shift right (variable).
    Asr,
    /// Rotate right (variable).
    Ror,
    /// Signed divide.
    SDiv,
    /// Unsigned divide.
    UDiv,
    /// High 64 bits of a signed 64×64 product.
    SMulH,
    /// High 64 bits of an unsigned 64×64 product.
    UMulH,
}

impl AluOp {
    /// Mnemonic.
    pub const fn name(&self) -> &'static str {
        match self {
            AluOp::Add => "add",
            AluOp::Sub => "sub",
            AluOp::Adds => "adds",
            AluOp::Subs => "subs",
            AluOp::Adcs => "adcs",
            AluOp::Sbcs => "sbcs",
            AluOp::And => "and",
            AluOp::Ands => "ands",
            AluOp::Orr => "orr",
            AluOp::Orn => "orn",
            AluOp::Eor => "eor",
            AluOp::Bic => "bic",
            AluOp::Lsl => "lsl",
            AluOp::Lsr => "lsr",
            AluOp::Asr => "asr",
            AluOp::Ror => "ror",
            AluOp::SDiv => "sdiv",
            AluOp::UDiv => "udiv",
            AluOp::SMulH => "smulh",
            AluOp::UMulH => "umulh",
        }
    }
}

/// Three-source integer multiply-accumulate operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AluOp3 {
    /// Multiply-add.
    MAdd,
    /// Multiply-subtract.
    MSub,
    /// Signed widening multiply-add (32×32+64).
    SMAddL,
    /// Unsigned widening multiply-add (32×32+64).
    UMAddL,
}

impl AluOp3 {
    /// Mnemonic.
    pub const fn name(&self) -> &'static str {
        match self {
            AluOp3::MAdd => "madd",
            AluOp3::MSub => "msub",
            AluOp3::SMAddL => "smaddl",
            AluOp3::UMAddL => "umaddl",
        }
    }
}

/// One-source bit-manipulation operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BitOp {
    /// Count leading zeros.
    Clz,
    /// Count leading sign bits.
    Cls,
    /// Reverse bits.
    Rbit,
    /// Byte-swap each halfword.
    Rev16,
    /// Byte-swap each word.
    Rev32,
    /// Byte-swap the doubleword.
    Rev64,
}

impl BitOp {
    /// Mnemonic.
    pub const fn name(&self) -> &'static str {
        match self {
            BitOp::Clz => "clz",
            BitOp::Cls => "cls",
            BitOp::Rbit => "rbit",
            BitOp::Rev16 => "rev16",
            BitOp::Rev32 => "rev32",
            BitOp::Rev64 => "rev64",
        }
    }
}

/// Move-wide operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MoveWideOp {
    /// Move with zero.
    MovZ,
    /// Move with NOT.
    MovN,
    /// Move, keeping other bits.
    MovK,
}

/// Conditional-select operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CondSelOp {
    /// Select.
    Sel,
    /// Select or increment.
    SInc,
    /// Select or invert.
    SInv,
    /// Select or negate.
    SNeg,
}

impl CondSelOp {
    /// Mnemonic.
    pub const fn name(&self) -> &'static str {
        match self {
            CondSelOp::Sel => "csel",
            CondSelOp::SInc => "csinc",
            CondSelOp::SInv => "csinv",
            CondSelOp::SNeg => "csneg",
        }
    }
}

/// One-source scalar FP operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FpuOp1 {
    /// Copy.
    Mov,
    /// Absolute value.
    Abs,
    /// Negate.
    Neg,
    /// Square root.
    Sqrt,
    /// Round toward minus infinity.
    RintM,
    /// Round to nearest, ties to even.
    RintN,
    /// Round toward plus infinity.
    RintP,
    /// Round toward zero.
    RintZ,
}

impl FpuOp1 {
    /// Mnemonic.
    pub const fn name(&self) -> &'static str {
        match self {
            FpuOp1::Mov => "fmov",
            FpuOp1::Abs => "fabs",
            FpuOp1::Neg => "fneg",
            FpuOp1::Sqrt => "fsqrt",
            FpuOp1::RintM => "frintm",
            FpuOp1::RintN => "frintn",
            FpuOp1::RintP => "frintp",
            FpuOp1::RintZ => "frintz",
        }
    }
}

/// Two-source scalar FP operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FpuOp2 {
    /// Add.
    Add,
    /// Subtract.
    Sub,
    /// Multiply.
    Mul,
    /// Divide.
    Div,
    /// Maximum.
    Max,
    /// Minimum.
    Min,
}

impl FpuOp2 {
    /// Mnemonic.
    pub const fn name(&self) -> &'static str {
        match self {
            FpuOp2::Add => "fadd",
            FpuOp2::Sub => "fsub",
            FpuOp2::Mul => "fmul",
            FpuOp2::Div => "fdiv",
            FpuOp2::Max => "fmax",
            FpuOp2::Min => "fmin",
        }
    }
}

/// Three-source scalar FP operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FpuOp3 {
    /// Fused multiply-add.
    MAdd,
    /// Fused multiply-subtract.
    MSub,
}

impl FpuOp3 {
    /// Mnemonic.
    pub const fn name(&self) -> &'static str {
        match self {
            FpuOp3::MAdd => "fmadd",
            FpuOp3::MSub => "fmsub",
        }
    }
}

/// Element-wise vector ALU operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VecAluOp {
    /// Integer add.
    Add,
    /// Integer subtract.
    Sub,
    /// Integer multiply.
    Mul,
    /// Bitwise AND.
    And,
    /// Bitwise OR.
    Orr,
    /// Bitwise exclusive OR.
    Eor,
    /// Signed maximum.
    Smax,
    /// Signed minimum.
    Smin,
    /// Unsigned maximum.
    Umax,
    /// Unsigned minimum.
    Umin,
    /// Signed saturating add.
    Sqadd,
    /// Unsigned saturating add.
    Uqadd,
    /// Signed saturating subtract.
    Sqsub,
    /// Unsigned saturating subtract.
    Uqsub,
    /// FP add.
    Fadd,
    /// FP subtract.
    Fsub,
    /// FP multiply.
    Fmul,
    /// FP maximum.
    Fmax,
    /// FP minimum.
    Fmin,
    /// Interleave low halves.
    Zip1,
    /// Interleave high halves.
    Zip2,
    /// Concatenate even lanes.
    Uzp1,
    /// Concatenate odd lanes.
    Uzp2,
    /// Transpose even lanes.
    Trn1,
    /// Transpose odd lanes.
    Trn2,
}

impl VecAluOp {
    /// Mnemonic.
    pub const fn name(&self) -> &'static str {
        match self {
            VecAluOp::Add => "add",
            VecAluOp::Sub => "sub",
            VecAluOp::Mul => "mul",
            VecAluOp::And => "and",
            VecAluOp::Orr => "orr",
            VecAluOp::Eor => "eor",
            VecAluOp::Smax => "smax",
            VecAluOp::Smin => "smin",
            VecAluOp::Umax => "umax",
            VecAluOp::Umin => "umin",
            VecAluOp::Sqadd => "sqadd",
            VecAluOp::Uqadd => "uqadd",
            VecAluOp::Sqsub => "sqsub",
            VecAluOp::Uqsub => "uqsub",
            VecAluOp::Fadd => "fadd",
            VecAluOp::Fsub => "fsub",
            VecAluOp::Fmul => "fmul",
            VecAluOp::Fmax => "fmax",
            VecAluOp::Fmin => "fmin",
            VecAluOp::Zip1 => "zip1",
            VecAluOp::Zip2 => "zip2",
            VecAluOp::Uzp1 => "uzp1",
            VecAluOp::Uzp2 => "uzp2",
            VecAluOp::Trn1 => "trn1",
            VecAluOp::Trn2 => "trn2",
        }
    }
}

/// One-source vector operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VecMiscOp {
    /// Byte-swap within halfwords.
    Rev16,
    /// Byte-swap within words.
    Rev32,
    /// Byte-swap within doublewords.
    Rev64,
    /// Signed saturating extract narrow.
    Sqxtn,
    /// Signed saturating extract unsigned narrow.
    Sqxtun,
    /// Unsigned saturating extract narrow.
    Uqxtn,
}

impl VecMiscOp {
    /// Mnemonic.
    pub const fn name(&self) -> &'static str {
        match self {
            VecMiscOp::Rev16 => "rev16",
            VecMiscOp::Rev32 => "rev32",
            VecMiscOp::Rev64 => "rev64",
            VecMiscOp::Sqxtn => "sqxtn",
            VecMiscOp::Sqxtun => "sqxtun",
            VecMiscOp::Uqxtn => "uqxtn",
        }
    }
}

/// Read-modify-write operations of the large-system-extension atomics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AtomicRmwOp {
    /// Atomic add.
    Add,
    /// Atomic bit clear.
    Clr,
    /// Atomic exclusive OR.
    Eor,
    /// Atomic bit set.
    Set,
    /// Atomic signed maximum.
    Smax,
    /// Atomic signed minimum.
    Smin,
    /// Atomic unsigned maximum.
    Umax,
    /// Atomic unsigned minimum.
    Umin,
    /// Atomic swap.
    Swp,
}

impl AtomicRmwOp {
    /// Mnemonic of the acquire-release form.
    pub const fn name(&self) -> &'static str {
        match self {
            AtomicRmwOp::Add => "ldaddal",
            AtomicRmwOp::Clr => "ldclral",
            AtomicRmwOp::Eor => "ldeoral",
            AtomicRmwOp::Set => "ldsetal",
            AtomicRmwOp::Smax => "ldsmaxal",
            AtomicRmwOp::Smin => "ldsminal",
            AtomicRmwOp::Umax => "ldumaxal",
            AtomicRmwOp::Umin => "lduminal",
            AtomicRmwOp::Swp => "swpal",
        }
    }
}

/// Whether an operand is read or written, for the allocator's visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// The instruction reads the register.
    Use,
    /// The instruction writes the register.
    Def,
}

/// A machine instruction.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Inst {
    /// Two-source ALU operation, register-register form.
    AluRRR {
        /// Operation.
        op: AluOp,
        /// Operand width.
        size: OperandSize,
        /// Destination.
        rd: Writable<Reg>,
        /// First source.
        rn: Reg,
        /// Second source.
        rm: Reg,
    },
    /// ALU operation with a 12-bit immediate.
    AluRRImm12 {
        /// Operation (add/sub families only).
        op: AluOp,
        /// Operand width.
        size: OperandSize,
        /// Destination.
        rd: Writable<Reg>,
        /// Source.
        rn: Reg,
        /// Immediate.
        imm12: Imm12,
    },
    /// Logical operation with a bitmask immediate.
    AluRRImmLogic {
        /// Operation (and/orr/eor families only).
        op: AluOp,
        /// Operand width.
        size: OperandSize,
        /// Destination.
        rd: Writable<Reg>,
        /// Source.
        rn: Reg,
        /// Bitmask immediate.
        imml: ImmLogic,
    },
    /// Shift by a constant amount (UBFM/SBFM/EXTR aliases).
    AluRRImmShift {
        /// Operation (lsl/lsr/asr/ror only).
        op: AluOp,
        /// Operand width.
        size: OperandSize,
        /// Destination.
        rd: Writable<Reg>,
        /// Source.
        rn: Reg,
        /// Shift amount.
        immshift: ImmShift,
    },
    /// ALU operation with a shifted-register operand.
    AluRRRShift {
        /// Operation.
        op: AluOp,
        /// Operand width.
        size: OperandSize,
        /// Destination.
        rd: Writable<Reg>,
        /// First source.
        rn: Reg,
        /// Shifted source.
        rm: Reg,
        /// Shift applied to `rm`.
        shiftop: ShiftOpAndAmt,
    },
    /// ALU operation with an extended-register operand.
    AluRRRExtend {
        /// Operation (add/sub families only).
        op: AluOp,
        /// Operand width.
        size: OperandSize,
        /// Destination.
        rd: Writable<Reg>,
        /// First source.
        rn: Reg,
        /// Extended source.
        rm: Reg,
        /// Extension applied to `rm`.
        extendop: ExtendOp,
    },
    /// Three-source multiply-accumulate.
    AluRRRR {
        /// Operation.
        op: AluOp3,
        /// Operand width.
        size: OperandSize,
        /// Destination.
        rd: Writable<Reg>,
        /// Multiplicand.
        rn: Reg,
        /// Multiplier.
        rm: Reg,
        /// Accumulator.
        ra: Reg,
    },
    /// One-source bit-manipulation operation.
    BitRR {
        /// Operation.
        op: BitOp,
        /// Operand width.
        size: OperandSize,
        /// Destination.
        rd: Writable<Reg>,
        /// Source.
        rn: Reg,
    },
    /// Register-register move (ORR with the zero register).
    MovRR {
        /// Operand width.
        size: OperandSize,
        /// Destination.
        rd: Writable<Reg>,
        /// Source.
        rm: Reg,
    },
    /// MOVZ/MOVN/MOVK with a 16-bit chunk.
    MovWide {
        /// Which move-wide form.
        op: MoveWideOp,
        /// Operand width.
        size: OperandSize,
        /// Destination.
        rd: Writable<Reg>,
        /// Chunk and position.
        imm: MoveWideConst,
    },
    /// Synthetic 64-bit constant materialization; expands to MOVZ/MOVN plus
    /// up to three MOVK.
    MovImm {
        /// Operand width.
        size: OperandSize,
        /// Destination.
        rd: Writable<Reg>,
        /// Constant value.
        imm: u64,
    },
    /// Integer width change (SXTB/SXTH/SXTW/UXTB/UXTH aliases of the
    /// bitfield moves, or a 32-bit move for unsigned word extension).
    Extend {
        /// Destination.
        rd: Writable<Reg>,
        /// Source.
        rn: Reg,
        /// Sign-extend rather than zero-extend.
        signed: bool,
        /// Source width in bits.
        from_bits: u8,
        /// Destination width in bits.
        to_bits: u8,
    },
    /// Conditional select family.
    CondSel {
        /// Operation.
        op: CondSelOp,
        /// Operand width.
        size: OperandSize,
        /// Destination.
        rd: Writable<Reg>,
        /// Value when the condition holds.
        rn: Reg,
        /// Value otherwise.
        rm: Reg,
        /// Condition.
        cond: Cond,
    },
    /// Set a register to 1 under a condition (CSINC alias).
    CSet {
        /// Operand width.
        size: OperandSize,
        /// Destination.
        rd: Writable<Reg>,
        /// Condition.
        cond: Cond,
    },
    /// Conditionally increment (CSINC alias).
    CInc {
        /// Operand width.
        size: OperandSize,
        /// Destination.
        rd: Writable<Reg>,
        /// Source.
        rn: Reg,
        /// Condition under which to increment.
        cond: Cond,
    },
    /// Unsigned 8-bit load, zero-extended.
    ULoad8 {
        /// Destination.
        rd: Writable<Reg>,
        /// Address.
        mem: AMode,
    },
    /// Signed 8-bit load, sign-extended to the 64-bit width.
    SLoad8 {
        /// Destination.
        rd: Writable<Reg>,
        /// Address.
        mem: AMode,
    },
    /// Unsigned 16-bit load.
    ULoad16 {
        /// Destination.
        rd: Writable<Reg>,
        /// Address.
        mem: AMode,
    },
    /// Signed 16-bit load.
    SLoad16 {
        /// Destination.
        rd: Writable<Reg>,
        /// Address.
        mem: AMode,
    },
    /// Unsigned 32-bit load.
    ULoad32 {
        /// Destination.
        rd: Writable<Reg>,
        /// Address.
        mem: AMode,
    },
    /// Signed 32-bit load (LDRSW).
    SLoad32 {
        /// Destination.
        rd: Writable<Reg>,
        /// Address.
        mem: AMode,
    },
    /// 64-bit load.
    ULoad64 {
        /// Destination.
        rd: Writable<Reg>,
        /// Address.
        mem: AMode,
    },
    /// 8-bit store.
    Store8 {
        /// Stored value.
        rd: Reg,
        /// Address.
        mem: AMode,
    },
    /// 16-bit store.
    Store16 {
        /// Stored value.
        rd: Reg,
        /// Address.
        mem: AMode,
    },
    /// 32-bit store.
    Store32 {
        /// Stored value.
        rd: Reg,
        /// Address.
        mem: AMode,
    },
    /// 64-bit store.
    Store64 {
        /// Stored value.
        rd: Reg,
        /// Address.
        mem: AMode,
    },
    /// 64-bit load pair.
    LoadP64 {
        /// First destination.
        rt: Writable<Reg>,
        /// Second destination.
        rt2: Writable<Reg>,
        /// Address.
        mem: PairAMode,
    },
    /// 64-bit store pair.
    StoreP64 {
        /// First stored value.
        rt: Reg,
        /// Second stored value.
        rt2: Reg,
        /// Address.
        mem: PairAMode,
    },
    /// Scalar FP 32-bit load.
    FpuLoad32 {
        /// Destination.
        rd: Writable<Reg>,
        /// Address.
        mem: AMode,
    },
    /// Scalar FP 64-bit load.
    FpuLoad64 {
        /// Destination.
        rd: Writable<Reg>,
        /// Address.
        mem: AMode,
    },
    /// Vector 128-bit load.
    FpuLoad128 {
        /// Destination.
        rd: Writable<Reg>,
        /// Address.
        mem: AMode,
    },
    /// Scalar FP 32-bit store.
    FpuStore32 {
        /// Stored value.
        rd: Reg,
        /// Address.
        mem: AMode,
    },
    /// Scalar FP 64-bit store.
    FpuStore64 {
        /// Stored value.
        rd: Reg,
        /// Address.
        mem: AMode,
    },
    /// Vector 128-bit store.
    FpuStore128 {
        /// Stored value.
        rd: Reg,
        /// Address.
        mem: AMode,
    },
    /// Load-exclusive (LDXR/LDAXR).
    LoadExclusive {
        /// Access width.
        access: OperandSize,
        /// Acquire ordering.
        acquire: bool,
        /// Destination.
        rt: Writable<Reg>,
        /// Address base.
        rn: Reg,
    },
    /// Store-exclusive (STXR/STLXR); `rs` receives the status word.
    StoreExclusive {
        /// Access width.
        access: OperandSize,
        /// Release ordering.
        release: bool,
        /// Status result, 0 on success.
        rs: Writable<Reg>,
        /// Stored value.
        rt: Reg,
        /// Address base.
        rn: Reg,
    },
    /// Load-acquire (LDAR).
    LoadAcquire {
        /// Access width.
        access: OperandSize,
        /// Destination.
        rt: Writable<Reg>,
        /// Address base.
        rn: Reg,
    },
    /// Store-release (STLR).
    StoreRelease {
        /// Access width.
        access: OperandSize,
        /// Stored value.
        rt: Reg,
        /// Address base.
        rn: Reg,
    },
    /// Compare-and-swap with acquire-release ordering (CASAL). `rs` holds
    /// the expected value on entry and the observed value on exit.
    Cas {
        /// Access width.
        access: OperandSize,
        /// Expected value in, observed value out.
        rs: Writable<Reg>,
        /// Replacement value.
        rt: Reg,
        /// Address base.
        rn: Reg,
    },
    /// One of the LSE read-modify-write atomics, acquire-release ordering.
    /// `rt` receives the previous memory value.
    AtomicRmw {
        /// Operation.
        op: AtomicRmwOp,
        /// Access width.
        access: OperandSize,
        /// Operand value.
        rs: Reg,
        /// Previous memory value.
        rt: Writable<Reg>,
        /// Address base.
        rn: Reg,
    },
    /// Unconditional branch.
    Jump {
        /// Target.
        dest: Label,
    },
    /// Conditional branch (B.cond or CBZ/CBNZ).
    CondBr {
        /// Target when the condition holds.
        target: Label,
        /// Kind of test.
        kind: CondBrKind,
    },
    /// Test a single bit and branch (TBZ/TBNZ).
    TestBitBr {
        /// Tested register.
        rt: Reg,
        /// Bit number, `0..64`.
        bit: u8,
        /// Branch when the bit is zero (TBZ) or one (TBNZ).
        branch_if_set: bool,
        /// Target.
        target: Label,
    },
    /// Indirect branch.
    IndirectBr {
        /// Target address.
        rn: Reg,
    },
    /// Direct call to an external symbol (BL).
    Call {
        /// Callee symbol.
        callee: String,
    },
    /// Indirect call (BLR).
    CallInd {
        /// Target address.
        rn: Reg,
    },
    /// Return. The epilogue is synthesized in front of it at emission.
    Ret,
    /// Tail call to an external symbol: epilogue then B.
    TailCall {
        /// Callee symbol.
        callee: String,
    },
    /// Indirect tail call: epilogue then BR.
    TailCallInd {
        /// Target address.
        rn: Reg,
    },
    /// Jump-table dispatch: bounds check, table load, indirect branch and
    /// the table itself, as one allocation-aware unit.
    JTSequence {
        /// Zero-based index.
        ridx: Reg,
        /// Register holding the table size.
        rbound: Reg,
        /// Scratch: table base, then final target.
        rtmp1: Writable<Reg>,
        /// Scratch: scaled index, then loaded entry.
        rtmp2: Writable<Reg>,
        /// Out-of-bounds target.
        default: Label,
        /// Per-index targets.
        targets: Vec<Label>,
    },
    /// Address of a nominal-SP offset: an ADD from SP whose displacement is
    /// completed with the outgoing-argument area size at emission.
    NominalSpAddr {
        /// Destination.
        rd: Writable<Reg>,
        /// Byte offset from the nominal stack base.
        off: i64,
    },
    /// ADR: address of a label.
    Adr {
        /// Destination.
        rd: Writable<Reg>,
        /// Referenced label.
        label: Label,
    },
    /// ADRP: page address of an external symbol, with relocation.
    AdrpSymbol {
        /// Destination.
        rd: Writable<Reg>,
        /// Symbol name.
        symbol: String,
        /// Constant addend.
        addend: i64,
    },
    /// ADD :lo12: of an external symbol, with relocation.
    AddSymbolLo12 {
        /// Destination.
        rd: Writable<Reg>,
        /// Page base.
        rn: Reg,
        /// Symbol name.
        symbol: String,
        /// Constant addend.
        addend: i64,
    },
    /// No operation.
    Nop,
    /// Breakpoint.
    Brk,
    /// Undefined instruction carrying a 16-bit trap code; records a trap.
    Udf {
        /// Trap code.
        trap_code: u16,
    },
    /// Instruction synchronization barrier.
    Isb,
    /// One-source scalar FP operation.
    FpuRR {
        /// Operation.
        op: FpuOp1,
        /// Scalar width (32 or 64).
        size: OperandSize,
        /// Destination.
        rd: Writable<Reg>,
        /// Source.
        rn: Reg,
    },
    /// Two-source scalar FP operation.
    FpuRRR {
        /// Operation.
        op: FpuOp2,
        /// Scalar width.
        size: OperandSize,
        /// Destination.
        rd: Writable<Reg>,
        /// First source.
        rn: Reg,
        /// Second source.
        rm: Reg,
    },
    /// Three-source scalar FP operation.
    FpuRRRR {
        /// Operation.
        op: FpuOp3,
        /// Scalar width.
        size: OperandSize,
        /// Destination.
        rd: Writable<Reg>,
        /// Multiplicand.
        rn: Reg,
        /// Multiplier.
        rm: Reg,
        /// Accumulator.
        ra: Reg,
    },
    /// Scalar FP compare, setting flags.
    FpuCmp {
        /// Scalar width.
        size: OperandSize,
        /// First operand.
        rn: Reg,
        /// Second operand.
        rm: Reg,
    },
    /// Scalar FP conditional select.
    FpuCSel {
        /// Scalar width.
        size: OperandSize,
        /// Destination.
        rd: Writable<Reg>,
        /// Value when the condition holds.
        rn: Reg,
        /// Value otherwise.
        rm: Reg,
        /// Condition.
        cond: Cond,
    },
    /// Scalar FP constant move from an 8-bit VFP immediate.
    FpuMoveImm {
        /// Scalar width.
        size: OperandSize,
        /// Destination.
        rd: Writable<Reg>,
        /// VFP-encoded immediate.
        imm8: u8,
    },
    /// Convert between the two scalar FP widths.
    FpuCvt {
        /// Source width.
        from: OperandSize,
        /// Destination width.
        to: OperandSize,
        /// Destination.
        rd: Writable<Reg>,
        /// Source.
        rn: Reg,
    },
    /// FP to integer conversion, round toward zero.
    FpuToInt {
        /// Signed destination.
        signed: bool,
        /// FP source width.
        fp_size: OperandSize,
        /// Integer destination width (32 or 64).
        int_size: OperandSize,
        /// Destination.
        rd: Writable<Reg>,
        /// Source.
        rn: Reg,
    },
    /// Integer to FP conversion.
    IntToFpu {
        /// Signed source.
        signed: bool,
        /// FP destination width.
        fp_size: OperandSize,
        /// Integer source width.
        int_size: OperandSize,
        /// Destination.
        rd: Writable<Reg>,
        /// Source.
        rn: Reg,
    },
    /// Bit-exact move from an integer register to an FP register.
    MovToFpu {
        /// Width.
        size: OperandSize,
        /// FP destination.
        rd: Writable<Reg>,
        /// Integer source.
        rn: Reg,
    },
    /// Bit-exact move from an FP register to an integer register.
    MovFromFpu {
        /// Width.
        size: OperandSize,
        /// Integer destination.
        rd: Writable<Reg>,
        /// FP source.
        rn: Reg,
    },
    /// Element-wise vector operation.
    VecRRR {
        /// Operation.
        op: VecAluOp,
        /// Arrangement.
        size: VectorSize,
        /// Destination.
        rd: Writable<Reg>,
        /// First source.
        rn: Reg,
        /// Second source.
        rm: Reg,
    },
    /// Scalar form of a saturating vector operation, on one lane.
    VecRRRScalar {
        /// Operation (saturating family only).
        op: VecAluOp,
        /// Lane width.
        size: OperandSize,
        /// Destination.
        rd: Writable<Reg>,
        /// First source.
        rn: Reg,
        /// Second source.
        rm: Reg,
    },
    /// One-source vector operation, including saturating narrows.
    VecMisc {
        /// Operation.
        op: VecMiscOp,
        /// Source arrangement.
        size: VectorSize,
        /// Destination.
        rd: Writable<Reg>,
        /// Source.
        rn: Reg,
    },
    /// Widening shift-left-long of the low half (SSHLL/USHLL #0).
    VecWiden {
        /// Sign-extend lanes.
        signed: bool,
        /// Source arrangement; lanes widen to the next size.
        size: VectorSize,
        /// Destination.
        rd: Writable<Reg>,
        /// Source.
        rn: Reg,
    },
    /// Broadcast a general register into every lane.
    VecDup {
        /// Arrangement.
        size: VectorSize,
        /// Destination.
        rd: Writable<Reg>,
        /// Integer source.
        rn: Reg,
    },
    /// Insert a general register into one lane (INS).
    MovToVecElem {
        /// Arrangement.
        size: VectorSize,
        /// Destination vector.
        rd: Writable<Reg>,
        /// Integer source.
        rn: Reg,
        /// Lane index.
        idx: u8,
    },
    /// Extract one lane into a general register (UMOV/SMOV).
    MovFromVecElem {
        /// Arrangement.
        size: VectorSize,
        /// Sign-extend the lane.
        signed: bool,
        /// Integer destination.
        rd: Writable<Reg>,
        /// Source vector.
        rn: Reg,
        /// Lane index.
        idx: u8,
    },
    /// Fused multiply-add by element (FMLA by lane).
    VecFmlaElem {
        /// Arrangement (word or doubleword lanes).
        size: VectorSize,
        /// Accumulator and destination.
        rd: Writable<Reg>,
        /// Multiplicand.
        rn: Reg,
        /// Multiplier vector.
        rm: Reg,
        /// Multiplier lane.
        idx: u8,
    },
    /// Pseudo-instruction: bind a label at this point in the stream.
    /// Emits nothing.
    BindLabel {
        /// The label bound here.
        label: Label,
    },
}

fn visit_amode<F: FnMut(&mut Reg, OperandKind)>(mem: &mut AMode, f: &mut F) {
    match mem {
        AMode::Unscaled { rn, .. } | AMode::UnsignedOffset { rn, .. } => f(rn, OperandKind::Use),
        AMode::RegOffset { rn, rm }
        | AMode::RegScaled { rn, rm }
        | AMode::RegExtended { rn, rm, .. } => {
            f(rn, OperandKind::Use);
            f(rm, OperandKind::Use);
        }
        AMode::PreIndexed { rn, .. } | AMode::PostIndexed { rn, .. } => {
            f(rn.reg_mut(), OperandKind::Use);
            f(rn.reg_mut(), OperandKind::Def);
        }
        AMode::SpOffset { .. } | AMode::NominalSpOffset { .. } => {}
    }
}

fn visit_pair_amode<F: FnMut(&mut Reg, OperandKind)>(mem: &mut PairAMode, f: &mut F) {
    match mem {
        PairAMode::SignedOffset { rn, .. } => f(rn, OperandKind::Use),
        PairAMode::PreIndexed { rn, .. } | PairAMode::PostIndexed { rn, .. } => {
            f(rn.reg_mut(), OperandKind::Use);
            f(rn.reg_mut(), OperandKind::Def);
        }
    }
}

impl Inst {
    /// Visit every register operand, reporting whether each is read or
    /// written. The allocator uses this both to compute liveness and to
    /// rewrite virtual operands in place.
    pub fn visit_regs<F: FnMut(&mut Reg, OperandKind)>(&mut self, f: &mut F) {
        use OperandKind::*;
        match self {
            Inst::AluRRR { rd, rn, rm, .. } => {
                f(rn, Use);
                f(rm, Use);
                f(rd.reg_mut(), Def);
            }
            Inst::AluRRImm12 { rd, rn, .. }
            | Inst::AluRRImmLogic { rd, rn, .. }
            | Inst::AluRRImmShift { rd, rn, .. } => {
                f(rn, Use);
                f(rd.reg_mut(), Def);
            }
            Inst::AluRRRShift { rd, rn, rm, .. } | Inst::AluRRRExtend { rd, rn, rm, .. } => {
                f(rn, Use);
                f(rm, Use);
                f(rd.reg_mut(), Def);
            }
            Inst::AluRRRR { rd, rn, rm, ra, .. } => {
                f(rn, Use);
                f(rm, Use);
                f(ra, Use);
                f(rd.reg_mut(), Def);
            }
            Inst::BitRR { rd, rn, .. } => {
                f(rn, Use);
                f(rd.reg_mut(), Def);
            }
            Inst::MovRR { rd, rm, .. } => {
                f(rm, Use);
                f(rd.reg_mut(), Def);
            }
            Inst::MovWide { op, rd, .. } => {
                // MOVK reads the bits it keeps.
                if *op == MoveWideOp::MovK {
                    f(rd.reg_mut(), Use);
                }
                f(rd.reg_mut(), Def);
            }
            Inst::MovImm { rd, .. } | Inst::NominalSpAddr { rd, .. } => f(rd.reg_mut(), Def),
            Inst::Extend { rd, rn, .. } => {
                f(rn, Use);
                f(rd.reg_mut(), Def);
            }
            Inst::CondSel { rd, rn, rm, .. } => {
                f(rn, Use);
                f(rm, Use);
                f(rd.reg_mut(), Def);
            }
            Inst::CSet { rd, .. } => f(rd.reg_mut(), Def),
            Inst::CInc { rd, rn, .. } => {
                f(rn, Use);
                f(rd.reg_mut(), Def);
            }
            Inst::ULoad8 { rd, mem }
            | Inst::SLoad8 { rd, mem }
            | Inst::ULoad16 { rd, mem }
            | Inst::SLoad16 { rd, mem }
            | Inst::ULoad32 { rd, mem }
            | Inst::SLoad32 { rd, mem }
            | Inst::ULoad64 { rd, mem }
            | Inst::FpuLoad32 { rd, mem }
            | Inst::FpuLoad64 { rd, mem }
            | Inst::FpuLoad128 { rd, mem } => {
                visit_amode(mem, f);
                f(rd.reg_mut(), Def);
            }
            Inst::Store8 { rd, mem }
            | Inst::Store16 { rd, mem }
            | Inst::Store32 { rd, mem }
            | Inst::Store64 { rd, mem }
            | Inst::FpuStore32 { rd, mem }
            | Inst::FpuStore64 { rd, mem }
            | Inst::FpuStore128 { rd, mem } => {
                f(rd, Use);
                visit_amode(mem, f);
            }
            Inst::LoadP64 { rt, rt2, mem } => {
                visit_pair_amode(mem, f);
                f(rt.reg_mut(), Def);
                f(rt2.reg_mut(), Def);
            }
            Inst::StoreP64 { rt, rt2, mem } => {
                f(rt, Use);
                f(rt2, Use);
                visit_pair_amode(mem, f);
            }
            Inst::LoadExclusive { rt, rn, .. } => {
                f(rn, Use);
                f(rt.reg_mut(), Def);
            }
            Inst::StoreExclusive { rs, rt, rn, .. } => {
                f(rt, Use);
                f(rn, Use);
                f(rs.reg_mut(), Def);
            }
            Inst::LoadAcquire { rt, rn, .. } => {
                f(rn, Use);
                f(rt.reg_mut(), Def);
            }
            Inst::StoreRelease { rt, rn, .. } => {
                f(rt, Use);
                f(rn, Use);
            }
            Inst::Cas { rs, rt, rn, .. } => {
                f(rs.reg_mut(), Use);
                f(rt, Use);
                f(rn, Use);
                f(rs.reg_mut(), Def);
            }
            Inst::AtomicRmw { rs, rt, rn, .. } => {
                f(rs, Use);
                f(rn, Use);
                f(rt.reg_mut(), Def);
            }
            Inst::Jump { .. } => {}
            Inst::CondBr { kind, .. } => match kind {
                CondBrKind::Zero(r, _) | CondBrKind::NotZero(r, _) => f(r, Use),
                CondBrKind::Cond(_) => {}
            },
            Inst::TestBitBr { rt, .. } => f(rt, Use),
            Inst::IndirectBr { rn } | Inst::CallInd { rn } | Inst::TailCallInd { rn } => {
                f(rn, Use)
            }
            Inst::Call { .. } | Inst::Ret | Inst::TailCall { .. } => {}
            Inst::JTSequence {
                ridx,
                rbound,
                rtmp1,
                rtmp2,
                ..
            } => {
                f(ridx, Use);
                f(rbound, Use);
                f(rtmp1.reg_mut(), Def);
                f(rtmp2.reg_mut(), Def);
            }
            Inst::Adr { rd, .. } | Inst::AdrpSymbol { rd, .. } => f(rd.reg_mut(), Def),
            Inst::AddSymbolLo12 { rd, rn, .. } => {
                f(rn, Use);
                f(rd.reg_mut(), Def);
            }
            Inst::Nop | Inst::Brk | Inst::Udf { .. } | Inst::Isb | Inst::BindLabel { .. } => {}
            Inst::FpuRR { rd, rn, .. } => {
                f(rn, Use);
                f(rd.reg_mut(), Def);
            }
            Inst::FpuRRR { rd, rn, rm, .. } => {
                f(rn, Use);
                f(rm, Use);
                f(rd.reg_mut(), Def);
            }
            Inst::FpuRRRR { rd, rn, rm, ra, .. } => {
                f(rn, Use);
                f(rm, Use);
                f(ra, Use);
                f(rd.reg_mut(), Def);
            }
            Inst::FpuCmp { rn, rm, .. } => {
                f(rn, Use);
                f(rm, Use);
            }
            Inst::FpuCSel { rd, rn, rm, .. } => {
                f(rn, Use);
                f(rm, Use);
                f(rd.reg_mut(), Def);
            }
            Inst::FpuMoveImm { rd, .. } => f(rd.reg_mut(), Def),
            Inst::FpuCvt { rd, rn, .. }
            | Inst::FpuToInt { rd, rn, .. }
            | Inst::IntToFpu { rd, rn, .. }
            | Inst::MovToFpu { rd, rn, .. }
            | Inst::MovFromFpu { rd, rn, .. } => {
                f(rn, Use);
                f(rd.reg_mut(), Def);
            }
            Inst::VecRRR { rd, rn, rm, .. } | Inst::VecRRRScalar { rd, rn, rm, .. } => {
                f(rn, Use);
                f(rm, Use);
                f(rd.reg_mut(), Def);
            }
            Inst::VecMisc { rd, rn, .. }
            | Inst::VecWiden { rd, rn, .. }
            | Inst::VecDup { rd, rn, .. } => {
                f(rn, Use);
                f(rd.reg_mut(), Def);
            }
            Inst::MovToVecElem { rd, rn, .. } => {
                // INS preserves the other lanes.
                f(rn, Use);
                f(rd.reg_mut(), Use);
                f(rd.reg_mut(), Def);
            }
            Inst::MovFromVecElem { rd, rn, .. } => {
                f(rn, Use);
                f(rd.reg_mut(), Def);
            }
            Inst::VecFmlaElem { rd, rn, rm, .. } => {
                f(rn, Use);
                f(rm, Use);
                f(rd.reg_mut(), Use);
                f(rd.reg_mut(), Def);
            }
        }
    }

    /// Registers this instruction writes.
    pub fn defs(&self) -> SmallVec<[Reg; 2]> {
        let mut out = SmallVec::new();
        let mut clone = self.clone();
        clone.visit_regs(&mut |reg, kind| {
            if kind == OperandKind::Def {
                out.push(*reg);
            }
        });
        out
    }

    /// Registers this instruction reads.
    pub fn uses(&self) -> SmallVec<[Reg; 4]> {
        let mut out = SmallVec::new();
        let mut clone = self.clone();
        clone.visit_regs(&mut |reg, kind| {
            if kind == OperandKind::Use {
                out.push(*reg);
            }
        });
        out
    }

    /// True for control-flow terminators.
    pub fn is_term(&self) -> bool {
        matches!(
            self,
            Inst::Jump { .. }
                | Inst::CondBr { .. }
                | Inst::TestBitBr { .. }
                | Inst::IndirectBr { .. }
                | Inst::Ret
                | Inst::TailCall { .. }
                | Inst::TailCallInd { .. }
                | Inst::JTSequence { .. }
        )
    }

    /// True for calls that clobber the caller-saved registers.
    pub fn is_call(&self) -> bool {
        matches!(self, Inst::Call { .. } | Inst::CallInd { .. })
    }
}

fn show_scalar_freg(reg: Reg, pre: &str) -> String {
    match reg {
        Reg::Phys(p) => format!("{pre}{}", p.index()),
        Reg::Virt(v) => format!("{pre}v{}", v.index()),
    }
}

fn show_amode(mem: &AMode) -> String {
    match mem {
        AMode::Unscaled { rn, simm9 } => {
            format!("[{}, {}]", show_ireg_sp(*rn, true), simm9)
        }
        AMode::UnsignedOffset { rn, uimm12 } => {
            if uimm12.value() == 0 {
                format!("[{}]", show_ireg_sp(*rn, true))
            } else {
                format!("[{}, {}]", show_ireg_sp(*rn, true), uimm12)
            }
        }
        AMode::RegOffset { rn, rm } => {
            format!("[{}, {}]", show_ireg_sp(*rn, true), show_ireg(*rm, true))
        }
        AMode::RegScaled { rn, rm } => {
            format!(
                "[{}, {}, lsl]",
                show_ireg_sp(*rn, true),
                show_ireg(*rm, true)
            )
        }
        AMode::RegExtended { rn, rm, extendop } => {
            format!(
                "[{}, {}, {}]",
                show_ireg_sp(*rn, true),
                show_ireg(*rm, true),
                extendop
            )
        }
        AMode::PreIndexed { rn, simm9 } => {
            format!("[{}, {}]!", show_ireg_sp(rn.to_reg(), true), simm9)
        }
        AMode::PostIndexed { rn, simm9 } => {
            format!("[{}], {}", show_ireg_sp(rn.to_reg(), true), simm9)
        }
        AMode::SpOffset { off } => format!("[sp, #{off}]"),
        AMode::NominalSpOffset { off } => format!("[sp, #{off}+outgoing]"),
    }
}

fn show_pair_amode(mem: &PairAMode) -> String {
    match mem {
        PairAMode::SignedOffset { rn, simm7 } => {
            format!("[{}, {}]", show_ireg_sp(*rn, true), simm7)
        }
        PairAMode::PreIndexed { rn, simm7 } => {
            format!("[{}, {}]!", show_ireg_sp(rn.to_reg(), true), simm7)
        }
        PairAMode::PostIndexed { rn, simm7 } => {
            format!("[{}], {}", show_ireg_sp(rn.to_reg(), true), simm7)
        }
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inst::AluRRR { op, size, rd, rn, rm } => {
                let is64 = size.is64();
                write!(
                    f,
                    "{} {}, {}, {}",
                    op.name(),
                    show_ireg(rd.to_reg(), is64),
                    show_ireg(*rn, is64),
                    show_ireg(*rm, is64)
                )
            }
            Inst::AluRRImm12 { op, size, rd, rn, imm12 } => {
                let is64 = size.is64();
                write!(
                    f,
                    "{} {}, {}, {}",
                    op.name(),
                    show_ireg_sp(rd.to_reg(), is64),
                    show_ireg_sp(*rn, is64),
                    imm12
                )
            }
            Inst::AluRRImmLogic { op, size, rd, rn, imml } => {
                let is64 = size.is64();
                write!(
                    f,
                    "{} {}, {}, {}",
                    op.name(),
                    show_ireg(rd.to_reg(), is64),
                    show_ireg(*rn, is64),
                    imml
                )
            }
            Inst::AluRRImmShift { op, size, rd, rn, immshift } => {
                let is64 = size.is64();
                write!(
                    f,
                    "{} {}, {}, {}",
                    op.name(),
                    show_ireg(rd.to_reg(), is64),
                    show_ireg(*rn, is64),
                    immshift
                )
            }
            Inst::AluRRRShift { op, size, rd, rn, rm, shiftop } => {
                let is64 = size.is64();
                write!(
                    f,
                    "{} {}, {}, {}, {}",
                    op.name(),
                    show_ireg(rd.to_reg(), is64),
                    show_ireg(*rn, is64),
                    show_ireg(*rm, is64),
                    shiftop
                )
            }
            Inst::AluRRRExtend { op, size, rd, rn, rm, extendop } => {
                let is64 = size.is64();
                write!(
                    f,
                    "{} {}, {}, {}, {}",
                    op.name(),
                    show_ireg_sp(rd.to_reg(), is64),
                    show_ireg_sp(*rn, is64),
                    show_ireg(*rm, is64),
                    extendop
                )
            }
            Inst::AluRRRR { op, size, rd, rn, rm, ra } => {
                let is64 = size.is64();
                write!(
                    f,
                    "{} {}, {}, {}, {}",
                    op.name(),
                    show_ireg(rd.to_reg(), is64),
                    show_ireg(*rn, is64),
                    show_ireg(*rm, is64),
                    show_ireg(*ra, is64)
                )
            }
            Inst::BitRR { op, size, rd, rn } => {
                let is64 = size.is64();
                write!(
                    f,
                    "{} {}, {}",
                    op.name(),
                    show_ireg(rd.to_reg(), is64),
                    show_ireg(*rn, is64)
                )
            }
            Inst::MovRR { size, rd, rm } => {
                let is64 = size.is64();
                write!(
                    f,
                    "mov {}, {}",
                    show_ireg(rd.to_reg(), is64),
                    show_ireg(*rm, is64)
                )
            }
            Inst::MovWide { op, size, rd, imm } => {
                let name = match op {
                    MoveWideOp::MovZ => "movz",
                    MoveWideOp::MovN => "movn",
                    MoveWideOp::MovK => "movk",
                };
                write!(f, "{} {}, {}", name, show_ireg(rd.to_reg(), size.is64()), imm)
            }
            Inst::MovImm { size, rd, imm } => {
                write!(f, "mov {}, #{:#x}", show_ireg(rd.to_reg(), size.is64()), imm)
            }
            Inst::Extend { rd, rn, signed, from_bits, to_bits } => {
                let sign = if *signed { "s" } else { "u" };
                let width = match from_bits {
                    8 => "b",
                    16 => "h",
                    _ => "w",
                };
                write!(
                    f,
                    "{sign}xt{width} {}, {}",
                    show_ireg(rd.to_reg(), *to_bits == 64),
                    show_ireg(*rn, false)
                )
            }
            Inst::NominalSpAddr { rd, off } => {
                write!(f, "add {}, sp, #{off}+outgoing", show_ireg_sp(rd.to_reg(), true))
            }
            Inst::CondSel { op, size, rd, rn, rm, cond } => {
                let is64 = size.is64();
                write!(
                    f,
                    "{} {}, {}, {}, {}",
                    op.name(),
                    show_ireg(rd.to_reg(), is64),
                    show_ireg(*rn, is64),
                    show_ireg(*rm, is64),
                    cond
                )
            }
            Inst::CSet { size, rd, cond } => {
                write!(f, "cset {}, {}", show_ireg(rd.to_reg(), size.is64()), cond)
            }
            Inst::CInc { size, rd, rn, cond } => {
                let is64 = size.is64();
                write!(
                    f,
                    "cinc {}, {}, {}",
                    show_ireg(rd.to_reg(), is64),
                    show_ireg(*rn, is64),
                    cond
                )
            }
            Inst::ULoad8 { rd, mem } => {
                write!(f, "ldrb {}, {}", show_ireg(rd.to_reg(), false), show_amode(mem))
            }
            Inst::SLoad8 { rd, mem } => {
                write!(f, "ldrsb {}, {}", show_ireg(rd.to_reg(), true), show_amode(mem))
            }
            Inst::ULoad16 { rd, mem } => {
                write!(f, "ldrh {}, {}", show_ireg(rd.to_reg(), false), show_amode(mem))
            }
            Inst::SLoad16 { rd, mem } => {
                write!(f, "ldrsh {}, {}", show_ireg(rd.to_reg(), true), show_amode(mem))
            }
            Inst::ULoad32 { rd, mem } => {
                write!(f, "ldr {}, {}", show_ireg(rd.to_reg(), false), show_amode(mem))
            }
            Inst::SLoad32 { rd, mem } => {
                write!(f, "ldrsw {}, {}", show_ireg(rd.to_reg(), true), show_amode(mem))
            }
            Inst::ULoad64 { rd, mem } => {
                write!(f, "ldr {}, {}", show_ireg(rd.to_reg(), true), show_amode(mem))
            }
            Inst::Store8 { rd, mem } => {
                write!(f, "strb {}, {}", show_ireg(*rd, false), show_amode(mem))
            }
            Inst::Store16 { rd, mem } => {
                write!(f, "strh {}, {}", show_ireg(*rd, false), show_amode(mem))
            }
            Inst::Store32 { rd, mem } => {
                write!(f, "str {}, {}", show_ireg(*rd, false), show_amode(mem))
            }
            Inst::Store64 { rd, mem } => {
                write!(f, "str {}, {}", show_ireg(*rd, true), show_amode(mem))
            }
            Inst::LoadP64 { rt, rt2, mem } => {
                write!(
                    f,
                    "ldp {}, {}, {}",
                    show_ireg(rt.to_reg(), true),
                    show_ireg(rt2.to_reg(), true),
                    show_pair_amode(mem)
                )
            }
            Inst::StoreP64 { rt, rt2, mem } => {
                write!(
                    f,
                    "stp {}, {}, {}",
                    show_ireg(*rt, true),
                    show_ireg(*rt2, true),
                    show_pair_amode(mem)
                )
            }
            Inst::FpuLoad32 { rd, mem } => {
                write!(f, "ldr {}, {}", show_freg(rd.to_reg(), false), show_amode(mem))
            }
            Inst::FpuLoad64 { rd, mem } => {
                write!(f, "ldr {}, {}", show_freg(rd.to_reg(), true), show_amode(mem))
            }
            Inst::FpuLoad128 { rd, mem } => {
                write!(f, "ldr {}, {}", show_scalar_freg(rd.to_reg(), "q"), show_amode(mem))
            }
            Inst::FpuStore32 { rd, mem } => {
                write!(f, "str {}, {}", show_freg(*rd, false), show_amode(mem))
            }
            Inst::FpuStore64 { rd, mem } => {
                write!(f, "str {}, {}", show_freg(*rd, true), show_amode(mem))
            }
            Inst::FpuStore128 { rd, mem } => {
                write!(f, "str {}, {}", show_scalar_freg(*rd, "q"), show_amode(mem))
            }
            Inst::LoadExclusive { access, acquire, rt, rn } => {
                let name = match (access, acquire) {
                    (OperandSize::Size8, false) => "ldxrb",
                    (OperandSize::Size16, false) => "ldxrh",
                    (_, false) => "ldxr",
                    (OperandSize::Size8, true) => "ldaxrb",
                    (OperandSize::Size16, true) => "ldaxrh",
                    (_, true) => "ldaxr",
                };
                write!(
                    f,
                    "{} {}, [{}]",
                    name,
                    show_ireg(rt.to_reg(), access.is64()),
                    show_ireg_sp(*rn, true)
                )
            }
            Inst::StoreExclusive { access, release, rs, rt, rn } => {
                let name = match (access, release) {
                    (OperandSize::Size8, false) => "stxrb",
                    (OperandSize::Size16, false) => "stxrh",
                    (_, false) => "stxr",
                    (OperandSize::Size8, true) => "stlxrb",
                    (OperandSize::Size16, true) => "stlxrh",
                    (_, true) => "stlxr",
                };
                write!(
                    f,
                    "{} {}, {}, [{}]",
                    name,
                    show_ireg(rs.to_reg(), false),
                    show_ireg(*rt, access.is64()),
                    show_ireg_sp(*rn, true)
                )
            }
            Inst::LoadAcquire { access, rt, rn } => {
                let name = match access {
                    OperandSize::Size8 => "ldarb",
                    OperandSize::Size16 => "ldarh",
                    _ => "ldar",
                };
                write!(
                    f,
                    "{} {}, [{}]",
                    name,
                    show_ireg(rt.to_reg(), access.is64()),
                    show_ireg_sp(*rn, true)
                )
            }
            Inst::StoreRelease { access, rt, rn } => {
                let name = match access {
                    OperandSize::Size8 => "stlrb",
                    OperandSize::Size16 => "stlrh",
                    _ => "stlr",
                };
                write!(
                    f,
                    "{} {}, [{}]",
                    name,
                    show_ireg(*rt, access.is64()),
                    show_ireg_sp(*rn, true)
                )
            }
            Inst::Cas { access, rs, rt, rn } => {
                write!(
                    f,
                    "casal {}, {}, [{}]",
                    show_ireg(rs.to_reg(), access.is64()),
                    show_ireg(*rt, access.is64()),
                    show_ireg_sp(*rn, true)
                )
            }
            Inst::AtomicRmw { op, access, rs, rt, rn } => {
                write!(
                    f,
                    "{} {}, {}, [{}]",
                    op.name(),
                    show_ireg(*rs, access.is64()),
                    show_ireg(rt.to_reg(), access.is64()),
                    show_ireg_sp(*rn, true)
                )
            }
            Inst::Jump { dest } => write!(f, "b {dest}"),
            Inst::CondBr { target, kind } => match kind {
                CondBrKind::Zero(r, size) => {
                    write!(f, "cbz {}, {}", show_ireg(*r, size.is64()), target)
                }
                CondBrKind::NotZero(r, size) => {
                    write!(f, "cbnz {}, {}", show_ireg(*r, size.is64()), target)
                }
                CondBrKind::Cond(c) => write!(f, "b.{c} {target}"),
            },
            Inst::TestBitBr { rt, bit, branch_if_set, target } => {
                let name = if *branch_if_set { "tbnz" } else { "tbz" };
                write!(f, "{} {}, #{}, {}", name, show_ireg(*rt, true), bit, target)
            }
            Inst::IndirectBr { rn } => write!(f, "br {}", show_ireg(*rn, true)),
            Inst::Call { callee } => write!(f, "bl {callee}"),
            Inst::CallInd { rn } => write!(f, "blr {}", show_ireg(*rn, true)),
            Inst::Ret => write!(f, "ret"),
            Inst::TailCall { callee } => write!(f, "b {callee}"),
            Inst::TailCallInd { rn } => write!(f, "br {}", show_ireg(*rn, true)),
            Inst::JTSequence { ridx, rbound, default, targets, .. } => {
                write!(
                    f,
                    "jt_sequence {}, {}, default={}, targets={}",
                    show_ireg(*ridx, true),
                    show_ireg(*rbound, true),
                    default,
                    targets.len()
                )
            }
            Inst::Adr { rd, label } => {
                write!(f, "adr {}, {}", show_ireg(rd.to_reg(), true), label)
            }
            Inst::AdrpSymbol { rd, symbol, addend } => {
                write!(f, "adrp {}, {}+{}", show_ireg(rd.to_reg(), true), symbol, addend)
            }
            Inst::AddSymbolLo12 { rd, rn, symbol, addend } => {
                write!(
                    f,
                    "add {}, {}, :lo12:{}+{}",
                    show_ireg_sp(rd.to_reg(), true),
                    show_ireg_sp(*rn, true),
                    symbol,
                    addend
                )
            }
            Inst::Nop => write!(f, "nop"),
            Inst::Brk => write!(f, "brk #0"),
            Inst::Udf { trap_code } => write!(f, "udf #{trap_code}"),
            Inst::Isb => write!(f, "isb"),
            Inst::FpuRR { op, size, rd, rn } => {
                let is64 = size.is64();
                write!(
                    f,
                    "{} {}, {}",
                    op.name(),
                    show_freg(rd.to_reg(), is64),
                    show_freg(*rn, is64)
                )
            }
            Inst::FpuRRR { op, size, rd, rn, rm } => {
                let is64 = size.is64();
                write!(
                    f,
                    "{} {}, {}, {}",
                    op.name(),
                    show_freg(rd.to_reg(), is64),
                    show_freg(*rn, is64),
                    show_freg(*rm, is64)
                )
            }
            Inst::FpuRRRR { op, size, rd, rn, rm, ra } => {
                let is64 = size.is64();
                write!(
                    f,
                    "{} {}, {}, {}, {}",
                    op.name(),
                    show_freg(rd.to_reg(), is64),
                    show_freg(*rn, is64),
                    show_freg(*rm, is64),
                    show_freg(*ra, is64)
                )
            }
            Inst::FpuCmp { size, rn, rm } => {
                let is64 = size.is64();
                write!(f, "fcmp {}, {}", show_freg(*rn, is64), show_freg(*rm, is64))
            }
            Inst::FpuCSel { size, rd, rn, rm, cond } => {
                let is64 = size.is64();
                write!(
                    f,
                    "fcsel {}, {}, {}, {}",
                    show_freg(rd.to_reg(), is64),
                    show_freg(*rn, is64),
                    show_freg(*rm, is64),
                    cond
                )
            }
            Inst::FpuMoveImm { size, rd, imm8 } => {
                write!(
                    f,
                    "fmov {}, #vfp({imm8:#04x})",
                    show_freg(rd.to_reg(), size.is64())
                )
            }
            Inst::FpuCvt { from, to, rd, rn } => {
                write!(
                    f,
                    "fcvt {}, {}",
                    show_freg(rd.to_reg(), to.is64()),
                    show_freg(*rn, from.is64())
                )
            }
            Inst::FpuToInt { signed, fp_size, int_size, rd, rn } => {
                let name = if *signed { "fcvtzs" } else { "fcvtzu" };
                write!(
                    f,
                    "{} {}, {}",
                    name,
                    show_ireg(rd.to_reg(), int_size.is64()),
                    show_freg(*rn, fp_size.is64())
                )
            }
            Inst::IntToFpu { signed, fp_size, int_size, rd, rn } => {
                let name = if *signed { "scvtf" } else { "ucvtf" };
                write!(
                    f,
                    "{} {}, {}",
                    name,
                    show_freg(rd.to_reg(), fp_size.is64()),
                    show_ireg(*rn, int_size.is64())
                )
            }
            Inst::MovToFpu { size, rd, rn } => {
                write!(
                    f,
                    "fmov {}, {}",
                    show_freg(rd.to_reg(), size.is64()),
                    show_ireg(*rn, size.is64())
                )
            }
            Inst::MovFromFpu { size, rd, rn } => {
                write!(
                    f,
                    "fmov {}, {}",
                    show_ireg(rd.to_reg(), size.is64()),
                    show_freg(*rn, size.is64())
                )
            }
            Inst::VecRRR { op, size, rd, rn, rm } => {
                let t = size.suffix();
                write!(
                    f,
                    "{} {}.{t}, {}.{t}, {}.{t}",
                    op.name(),
                    show_vreg(rd.to_reg()),
                    show_vreg(*rn),
                    show_vreg(*rm)
                )
            }
            Inst::VecRRRScalar { op, size, rd, rn, rm } => {
                let pre = match size {
                    OperandSize::Size8 => "b",
                    OperandSize::Size16 => "h",
                    OperandSize::Size32 => "s",
                    OperandSize::Size64 => "d",
                };
                write!(
                    f,
                    "{} {}, {}, {}",
                    op.name(),
                    show_scalar_freg(rd.to_reg(), pre),
                    show_scalar_freg(*rn, pre),
                    show_scalar_freg(*rm, pre)
                )
            }
            Inst::VecMisc { op, size, rd, rn } => {
                let t = size.suffix();
                write!(
                    f,
                    "{} {}.{t}, {}.{t}",
                    op.name(),
                    show_vreg(rd.to_reg()),
                    show_vreg(*rn)
                )
            }
            Inst::VecWiden { signed, size, rd, rn } => {
                let name = if *signed { "sshll" } else { "ushll" };
                write!(
                    f,
                    "{} {}, {}.{}, #0",
                    name,
                    show_vreg(rd.to_reg()),
                    show_vreg(*rn),
                    size.suffix()
                )
            }
            Inst::VecDup { size, rd, rn } => {
                write!(
                    f,
                    "dup {}.{}, {}",
                    show_vreg(rd.to_reg()),
                    size.suffix(),
                    show_ireg(*rn, size.lane_size().is64())
                )
            }
            Inst::MovToVecElem { size, rd, rn, idx } => {
                write!(
                    f,
                    "ins {}.{}[{}], {}",
                    show_vreg(rd.to_reg()),
                    size.suffix(),
                    idx,
                    show_ireg(*rn, size.lane_size().is64())
                )
            }
            Inst::MovFromVecElem { size, signed, rd, rn, idx } => {
                let name = if *signed { "smov" } else { "umov" };
                write!(
                    f,
                    "{} {}, {}.{}[{}]",
                    name,
                    show_ireg(rd.to_reg(), size.lane_size().is64()),
                    show_vreg(*rn),
                    size.suffix(),
                    idx
                )
            }
            Inst::VecFmlaElem { size, rd, rn, rm, idx } => {
                let t = size.suffix();
                write!(
                    f,
                    "fmla {}.{t}, {}.{t}, {}.{t}[{}]",
                    show_vreg(rd.to_reg()),
                    show_vreg(*rn),
                    show_vreg(*rm),
                    idx
                )
            }
            Inst::BindLabel { label } => write!(f, "{label}:"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reg::{writable_xreg, xreg};

    #[test]
    fn defs_and_uses_of_alu() {
        let inst = Inst::AluRRR {
            op: AluOp::Add,
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rn: xreg(1),
            rm: xreg(2),
        };
        assert_eq!(inst.defs().as_slice(), &[xreg(0)]);
        assert_eq!(inst.uses().as_slice(), &[xreg(1), xreg(2)]);
    }

    #[test]
    fn movk_reads_its_destination() {
        let inst = Inst::MovWide {
            op: MoveWideOp::MovK,
            size: OperandSize::Size64,
            rd: writable_xreg(5),
            imm: MoveWideConst::from_chunk(0xbeef, 1),
        };
        assert_eq!(inst.uses().as_slice(), &[xreg(5)]);
        assert_eq!(inst.defs().as_slice(), &[xreg(5)]);
    }

    #[test]
    fn store_has_no_defs() {
        let inst = Inst::Store64 {
            rd: xreg(3),
            mem: AMode::SpOffset { off: 16 },
        };
        assert!(inst.defs().is_empty());
        assert_eq!(inst.uses().as_slice(), &[xreg(3)]);
    }

    #[test]
    fn display_basics() {
        let add = Inst::AluRRR {
            op: AluOp::Add,
            size: OperandSize::Size64,
            rd: writable_xreg(0),
            rn: xreg(1),
            rm: xreg(2),
        };
        assert_eq!(add.to_string(), "add x0, x1, x2");

        let subw = Inst::AluRRR {
            op: AluOp::Sub,
            size: OperandSize::Size32,
            rd: writable_xreg(3),
            rn: xreg(4),
            rm: xreg(5),
        };
        assert_eq!(subw.to_string(), "sub w3, w4, w5");
    }

    #[test]
    fn terminators() {
        assert!(Inst::Ret.is_term());
        assert!(!Inst::Nop.is_term());
        assert!(Inst::Call { callee: "f".into() }.is_call());
    }
}
