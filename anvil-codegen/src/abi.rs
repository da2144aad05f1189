//! AAPCS64 argument classification and call-frame construction.
//!
//! Integer arguments fill `x0..x7`, floating-point and vector arguments fill
//! `v0..v7`; the two counters are independent. Arguments that do not fit go
//! to the outgoing-argument area at `[sp, #0]`, `[sp, #8]`, … Return values
//! use `x0`/`x1` and `v0` under the same rule.

use smallvec::SmallVec;
use tracing::debug;

use anvil_asm::{
    fp_reg, link_reg, stack_reg, writable_fp_reg, writable_link_reg, writable_stack_reg,
    writable_xreg, xreg, AMode, AluOp, CodeBuffer, CodeOffset, EmitState, Imm12, Inst,
    OperandSize, PReg, PairAMode, Reg, RegClass, SImm7Scaled, UImm12Scaled, Writable,
};

use crate::ir::{Signature, Type};

/// Where one argument or return value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AbiArg {
    /// In a register.
    Reg(PReg),
    /// On the stack at this byte offset into the argument area.
    Stack(i64),
}

/// The placement of every argument and return value of one signature.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AbiPlan {
    /// Per-parameter placements, with their types.
    pub args: Vec<(Type, AbiArg)>,
    /// Per-return placements, with their types.
    pub rets: Vec<(Type, AbiArg)>,
    /// Bytes of stack-argument area this signature needs from its caller.
    pub stack_arg_space: u32,
}

const MAX_REG_ARGS: u8 = 8;

fn classify_list(types: &[Type]) -> (Vec<(Type, AbiArg)>, u32) {
    let mut next_xreg = 0u8;
    let mut next_vreg = 0u8;
    let mut next_stack = 0i64;
    let mut out = Vec::with_capacity(types.len());

    for &ty in types {
        let place = if ty.is_int() {
            if next_xreg < MAX_REG_ARGS {
                let r = PReg::new(RegClass::Int, next_xreg);
                next_xreg += 1;
                AbiArg::Reg(r)
            } else {
                let off = next_stack;
                next_stack += 8;
                AbiArg::Stack(off)
            }
        } else if next_vreg < MAX_REG_ARGS {
            let r = PReg::new(RegClass::Float, next_vreg);
            next_vreg += 1;
            AbiArg::Reg(r)
        } else {
            if ty.is_vector() {
                next_stack = (next_stack + 15) & !15;
            }
            let off = next_stack;
            next_stack += if ty.is_vector() { 16 } else { 8 };
            AbiArg::Stack(off)
        };
        out.push((ty, place));
    }

    let space = ((next_stack + 15) & !15) as u32;
    (out, space)
}

/// Classify a signature into an [`AbiPlan`].
pub fn classify(sig: &Signature) -> AbiPlan {
    let (args, stack_arg_space) = classify_list(&sig.params);
    let (rets, _) = classify_list(&sig.returns);
    AbiPlan {
        args,
        rets,
        stack_arg_space,
    }
}

impl AbiPlan {
    /// Rebuild the signature this plan was computed from. Placement is a
    /// bijection with the input types, so this is exact.
    pub fn reassemble(&self) -> Signature {
        Signature {
            params: self.args.iter().map(|(ty, _)| *ty).collect(),
            returns: self.rets.iter().map(|(ty, _)| *ty).collect(),
        }
    }
}

/// True for registers the callee must preserve.
pub fn is_callee_saved(reg: PReg) -> bool {
    match reg.class() {
        RegClass::Int => (19..=28).contains(&reg.index()),
        RegClass::Float => (8..=15).contains(&reg.index()),
    }
}

/// The finished frame shape, known once allocation has run.
#[derive(Debug, Clone, Default)]
pub struct FrameLayout {
    /// Bytes of IR stack slots plus allocator spill slots (the nominal
    /// stack area).
    pub nominal_size: u32,
    /// Bytes of the outgoing-argument area below the nominal area.
    pub outgoing_args_size: u32,
    /// Callee-saved registers the allocator touched, in save order.
    pub clobbered_callee_saves: Vec<PReg>,
}

impl FrameLayout {
    /// Bytes subtracted from SP past the saved FP/LR pair, 16-aligned.
    pub fn total_frame_size(&self) -> u32 {
        let raw = self.outgoing_args_size
            + self.nominal_size
            + 8 * self.clobbered_callee_saves.len() as u32;
        (raw + 15) & !15
    }

    /// Byte offset from SP of the `i`-th callee-save slot.
    fn callee_save_offset(&self, i: usize) -> i64 {
        (self.outgoing_args_size + self.nominal_size) as i64 + 8 * i as i64
    }
}

/// One call-frame-information directive, positioned at a code offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CfiDirective {
    /// `DW_CFA_def_cfa_offset`.
    DefCfaOffset(u32),
    /// `DW_CFA_def_cfa_register`.
    DefCfaRegister(u8),
    /// `DW_CFA_offset`: register saved at CFA minus the given offset.
    Offset {
        /// DWARF register number.
        reg: u8,
        /// Displacement below the CFA, in bytes.
        cfa_offset: u32,
    },
}

/// CFI directives recorded while the prologue was emitted.
pub type PrologueCfi = SmallVec<[(CodeOffset, CfiDirective); 8]>;

/// Frame-pointer scratch for frame sizes beyond the 12-bit immediate.
/// Safe here: at the frame edges only argument and return registers are
/// live, and x16 carries neither.
const FRAME_SCRATCH: u8 = 16;

fn emit_sp_adjust(buf: &mut CodeBuffer, state: &EmitState, op: AluOp, amount: u32) {
    if let Some(imm12) = Imm12::maybe_from_u64(amount as u64) {
        Inst::AluRRImm12 {
            op,
            size: OperandSize::Size64,
            rd: writable_stack_reg(),
            rn: stack_reg(),
            imm12,
        }
        .emit(buf, state);
    } else {
        Inst::MovImm {
            size: OperandSize::Size64,
            rd: writable_xreg(FRAME_SCRATCH),
            imm: amount as u64,
        }
        .emit(buf, state);
        // SP-relative arithmetic needs the extended-register form.
        Inst::AluRRRExtend {
            op,
            size: OperandSize::Size64,
            rd: writable_stack_reg(),
            rn: stack_reg(),
            rm: xreg(FRAME_SCRATCH),
            extendop: anvil_asm::ExtendOp::Uxtx,
        }
        .emit(buf, state);
    }
}

/// Emit the function prologue and record its CFI shape.
pub fn emit_prologue(buf: &mut CodeBuffer, state: &EmitState, frame: &FrameLayout) -> PrologueCfi {
    let mut cfi = PrologueCfi::new();

    // stp x29, x30, [sp, #-16]!
    Inst::StoreP64 {
        rt: fp_reg(),
        rt2: link_reg(),
        mem: PairAMode::PreIndexed {
            rn: writable_stack_reg(),
            simm7: SImm7Scaled::maybe_from_i64(-16, OperandSize::Size64)
                .expect("fixed pair offset"),
        },
    }
    .emit(buf, state);
    cfi.push((buf.cur_offset(), CfiDirective::DefCfaOffset(16)));
    cfi.push((buf.cur_offset(), CfiDirective::Offset { reg: 29, cfa_offset: 16 }));
    cfi.push((buf.cur_offset(), CfiDirective::Offset { reg: 30, cfa_offset: 8 }));

    // mov x29, sp
    Inst::AluRRImm12 {
        op: AluOp::Add,
        size: OperandSize::Size64,
        rd: writable_fp_reg(),
        rn: stack_reg(),
        imm12: Imm12::zero(),
    }
    .emit(buf, state);
    cfi.push((buf.cur_offset(), CfiDirective::DefCfaRegister(29)));

    let frame_size = frame.total_frame_size();
    if frame_size > 0 {
        emit_sp_adjust(buf, state, AluOp::Sub, frame_size);
        cfi.push((buf.cur_offset(), CfiDirective::DefCfaOffset(16 + frame_size)));
    }

    for (i, &reg) in frame.clobbered_callee_saves.iter().enumerate() {
        let off = frame.callee_save_offset(i);
        let mem = AMode::SpOffset { off };
        match reg.class() {
            RegClass::Int => Inst::Store64 {
                rd: Reg::Phys(reg),
                mem,
            }
            .emit(buf, state),
            RegClass::Float => Inst::FpuStore64 {
                rd: Reg::Phys(reg),
                mem,
            }
            .emit(buf, state),
        }
        // Position below the CFA: the save slot sits frame_size + 16 - off
        // bytes under the entry SP.
        let cfa_offset = (frame_size as i64 + 16 - off) as u32;
        cfi.push((
            buf.cur_offset(),
            CfiDirective::Offset {
                reg: dwarf_regnum(reg),
                cfa_offset,
            },
        ));
    }

    debug!(
        frame_size,
        callee_saves = frame.clobbered_callee_saves.len(),
        "prologue emitted"
    );
    cfi
}

/// Emit the epilogue, up to but not including the final branch.
pub fn emit_epilogue(buf: &mut CodeBuffer, state: &EmitState, frame: &FrameLayout) {
    for (i, &reg) in frame.clobbered_callee_saves.iter().enumerate() {
        let off = frame.callee_save_offset(i);
        let mem = AMode::SpOffset { off };
        match reg.class() {
            RegClass::Int => Inst::ULoad64 {
                rd: Writable::from_reg(Reg::Phys(reg)),
                mem,
            }
            .emit(buf, state),
            RegClass::Float => Inst::FpuLoad64 {
                rd: Writable::from_reg(Reg::Phys(reg)),
                mem,
            }
            .emit(buf, state),
        }
    }

    let frame_size = frame.total_frame_size();
    if frame_size > 0 {
        emit_sp_adjust(buf, state, AluOp::Add, frame_size);
    }

    // ldp x29, x30, [sp], #16
    Inst::LoadP64 {
        rt: writable_fp_reg(),
        rt2: writable_link_reg(),
        mem: PairAMode::PostIndexed {
            rn: writable_stack_reg(),
            simm7: SImm7Scaled::maybe_from_i64(16, OperandSize::Size64)
                .expect("fixed pair offset"),
        },
    }
    .emit(buf, state);
}

/// DWARF register numbering: `x0..x30` are 0..30, `v0..v31` are 64..95.
pub fn dwarf_regnum(reg: PReg) -> u8 {
    match reg.class() {
        RegClass::Int => reg.index(),
        RegClass::Float => 64 + reg.index(),
    }
}

/// Incoming-argument address for a stack argument, relative to the frame
/// pointer: the saved FP/LR pair sits between FP and the argument area.
/// The offset is scaled by the access width of `ty`.
pub fn incoming_arg_amode(ty: Type, offset: i64) -> AMode {
    let scale = (ty.bits() / 8).min(16) as u8;
    AMode::UnsignedOffset {
        rn: fp_reg(),
        uimm12: UImm12Scaled::maybe_from_i64(16 + offset, scale)
            .expect("incoming argument offset within the unsigned range"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn int_sig(n: usize) -> Signature {
        Signature::new(vec![Type::I64; n], vec![Type::I64])
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(8)]
    #[case(9)]
    #[case(12)]
    fn integer_args_split_at_eight(#[case] n: usize) {
        let plan = classify(&int_sig(n));
        let in_regs = plan
            .args
            .iter()
            .filter(|(_, p)| matches!(p, AbiArg::Reg(_)))
            .count();
        assert_eq!(in_regs, n.min(8));
        for (i, (_, place)) in plan.args.iter().enumerate() {
            match place {
                AbiArg::Reg(r) => {
                    assert_eq!(r.class(), RegClass::Int);
                    assert_eq!(r.index() as usize, i);
                }
                AbiArg::Stack(off) => {
                    assert_eq!(*off, 8 * (i as i64 - 8));
                }
            }
        }
    }

    #[test]
    fn float_and_int_counters_are_independent() {
        let sig = Signature::new(
            vec![
                Type::I64,
                Type::F64,
                Type::I64,
                Type::F32,
                Type::I32,
                Type::F64,
            ],
            vec![Type::F64],
        );
        let plan = classify(&sig);
        let expect = [
            AbiArg::Reg(PReg::new(RegClass::Int, 0)),
            AbiArg::Reg(PReg::new(RegClass::Float, 0)),
            AbiArg::Reg(PReg::new(RegClass::Int, 1)),
            AbiArg::Reg(PReg::new(RegClass::Float, 1)),
            AbiArg::Reg(PReg::new(RegClass::Int, 2)),
            AbiArg::Reg(PReg::new(RegClass::Float, 2)),
        ];
        for (got, want) in plan.args.iter().zip(expect) {
            assert_eq!(got.1, want);
        }
        assert_eq!(plan.rets[0].1, AbiArg::Reg(PReg::new(RegClass::Float, 0)));
        assert_eq!(plan.stack_arg_space, 0);
    }

    #[test]
    fn mixed_signature_fills_both_files_before_spilling() {
        let mut params = vec![Type::I64; 9];
        params.extend(vec![Type::F64; 9]);
        let plan = classify(&Signature::new(params, vec![]));
        let stack_args: Vec<i64> = plan
            .args
            .iter()
            .filter_map(|(_, p)| match p {
                AbiArg::Stack(off) => Some(*off),
                _ => None,
            })
            .collect();
        assert_eq!(stack_args, vec![0, 8]);
        assert_eq!(plan.stack_arg_space, 16);
    }

    #[test]
    fn reassemble_round_trips() {
        let sig = Signature::new(
            vec![Type::I8, Type::F32, Type::I64, Type::I32X4],
            vec![Type::I64, Type::I64],
        );
        assert_eq!(classify(&sig).reassemble(), sig);
    }

    #[test]
    fn multi_word_integer_returns_use_x0_x1() {
        let plan = classify(&Signature::new(vec![], vec![Type::I64, Type::I64]));
        assert_eq!(plan.rets[0].1, AbiArg::Reg(PReg::new(RegClass::Int, 0)));
        assert_eq!(plan.rets[1].1, AbiArg::Reg(PReg::new(RegClass::Int, 1)));
    }

    #[test]
    fn frame_size_is_sixteen_aligned() {
        let frame = FrameLayout {
            nominal_size: 24,
            outgoing_args_size: 0,
            clobbered_callee_saves: vec![PReg::new(RegClass::Int, 19)],
        };
        assert_eq!(frame.total_frame_size(), 32);
    }

    #[test]
    fn callee_saved_partition() {
        assert!(is_callee_saved(PReg::new(RegClass::Int, 19)));
        assert!(is_callee_saved(PReg::new(RegClass::Int, 27)));
        assert!(!is_callee_saved(PReg::new(RegClass::Int, 0)));
        assert!(!is_callee_saved(PReg::new(RegClass::Int, 17)));
        assert!(is_callee_saved(PReg::new(RegClass::Float, 8)));
        assert!(!is_callee_saved(PReg::new(RegClass::Float, 16)));
    }

    #[test]
    fn prologue_shape() {
        let mut buf = CodeBuffer::new();
        let state = EmitState::default();
        let frame = FrameLayout {
            nominal_size: 32,
            outgoing_args_size: 0,
            clobbered_callee_saves: vec![],
        };
        let cfi = emit_prologue(&mut buf, &state, &frame);
        // stp, mov fp, sub sp.
        assert_eq!(buf.cur_offset(), 12);
        let stp = u32::from_le_bytes(buf.data()[0..4].try_into().unwrap());
        assert_eq!(stp, 0xa9bf_7bfd);
        let mov = u32::from_le_bytes(buf.data()[4..8].try_into().unwrap());
        assert_eq!(mov, 0x9100_03fd);
        let sub = u32::from_le_bytes(buf.data()[8..12].try_into().unwrap());
        assert_eq!(sub, 0xd100_83ff);
        assert_eq!(cfi[0], (4, CfiDirective::DefCfaOffset(16)));
        assert_eq!(cfi[3], (8, CfiDirective::DefCfaRegister(29)));
        assert_eq!(cfi[4], (12, CfiDirective::DefCfaOffset(48)));
    }

    #[test]
    fn large_frames_materialize_a_scratch_constant() {
        let mut buf = CodeBuffer::new();
        let state = EmitState::default();
        let frame = FrameLayout {
            nominal_size: 0x12340,
            outgoing_args_size: 0,
            clobbered_callee_saves: vec![],
        };
        emit_prologue(&mut buf, &state, &frame);
        // stp + mov + movz + movk + sub-extended.
        assert_eq!(buf.cur_offset(), 20);
        let movz = u32::from_le_bytes(buf.data()[8..12].try_into().unwrap());
        assert_eq!(movz, 0xd284_6810, "movz x16, #0x2340");
        let movk = u32::from_le_bytes(buf.data()[12..16].try_into().unwrap());
        assert_eq!(movk, 0xf2a0_0030, "movk x16, #1, lsl #16");
        let sub = u32::from_le_bytes(buf.data()[16..20].try_into().unwrap());
        assert_eq!(sub, 0xcb30_63ff, "sub sp, sp, x16, uxtx");
    }
}
