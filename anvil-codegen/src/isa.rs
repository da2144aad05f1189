//! The ISA descriptor and the compilation façade.
//!
//! `Isa::compile_function` runs the straight-line pipeline: lower,
//! allocate, legalize stack offsets, encode, finalize, attach unwind
//! information. The descriptor owns the feature bits and tuning flags that
//! steer selection; the encoder never sees them.

use bitflags::bitflags;
use tracing::debug;

use anvil_asm::{
    AMode, BufferError, CodeBuffer, EmitState, Inst, Reloc, TrapRecord,
};

use crate::abi::{self, FrameLayout};
use crate::error::{CodegenError, CodegenResult};
use crate::ir::Function;
use crate::lower::{lower_function, VCode};
use crate::regalloc;
use crate::unwind::{CommonInfoEntry, FrameDescriptionEntry, UnwindInfo};

bitflags! {
    /// CPU feature bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IsaFlags: u32 {
        /// Large System Extensions (ARMv8.1 atomics).
        const LSE = 1 << 0;
        /// Pointer authentication.
        const PAUTH = 1 << 1;
        /// Branch target identification.
        const BTI = 1 << 2;
        /// Half-precision floating point.
        const FP16 = 1 << 3;
        /// Scalable vectors.
        const SVE = 1 << 4;
        /// Scalable matrices.
        const SME = 1 << 5;
        /// Advanced SIMD.
        const NEON = 1 << 6;
        /// Cryptographic extensions.
        const CRYPTO = 1 << 7;
    }
}

/// Target operating system; fixes the code-page granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TargetOs {
    /// macOS.
    MacOs,
    /// iOS.
    Ios,
    /// Linux and everything else.
    #[default]
    Linux,
}

impl TargetOs {
    /// log2 of the code-page size.
    pub const fn page_align_log2(&self) -> u32 {
        match self {
            TargetOs::MacOs | TargetOs::Ios => 14,
            TargetOs::Linux => 16,
        }
    }
}

/// Builder for an [`Isa`], validating feature/tuning combinations.
#[derive(Debug, Clone, Default)]
pub struct IsaBuilder {
    flags: IsaFlags,
    prefer_lse_atomics: bool,
    sign_return_address: bool,
    use_bti: bool,
    os: TargetOs,
}

impl IsaBuilder {
    /// Start from an empty feature set on Linux.
    pub fn new() -> Self {
        Self {
            flags: IsaFlags::NEON,
            ..Self::default()
        }
    }

    /// Enable CPU features.
    pub fn features(mut self, flags: IsaFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Prefer the LSE encodings for atomics when available.
    pub fn prefer_lse_atomics(mut self, prefer: bool) -> Self {
        self.prefer_lse_atomics = prefer;
        self
    }

    /// Sign the return address in prologues (requires PAUTH).
    pub fn sign_return_address(mut self, sign: bool) -> Self {
        self.sign_return_address = sign;
        self
    }

    /// Emit BTI landing pads (requires BTI).
    pub fn use_bti(mut self, bti: bool) -> Self {
        self.use_bti = bti;
        self
    }

    /// Select the target operating system.
    pub fn target_os(mut self, os: TargetOs) -> Self {
        self.os = os;
        self
    }

    /// Validate and produce the descriptor.
    pub fn build(self) -> CodegenResult<Isa> {
        if self.sign_return_address && !self.flags.contains(IsaFlags::PAUTH) {
            return Err(CodegenError::PauthNotAvailable);
        }
        if self.use_bti && !self.flags.contains(IsaFlags::BTI) {
            return Err(CodegenError::BtiNotAvailable);
        }
        Ok(Isa {
            flags: self.flags,
            prefer_lse_atomics: self.prefer_lse_atomics,
            sign_return_address: self.sign_return_address,
            use_bti: self.use_bti,
            os: self.os,
        })
    }
}

/// A validated target descriptor.
#[derive(Debug, Clone)]
pub struct Isa {
    flags: IsaFlags,
    prefer_lse_atomics: bool,
    sign_return_address: bool,
    use_bti: bool,
    os: TargetOs,
}

impl Isa {
    /// The feature bits.
    pub fn flags(&self) -> IsaFlags {
        self.flags
    }

    /// The target operating system.
    pub fn target_os(&self) -> TargetOs {
        self.os
    }

    /// Whether return addresses are signed.
    pub fn signs_return_address(&self) -> bool {
        self.sign_return_address
    }

    /// Whether BTI landing pads are emitted.
    pub fn uses_bti(&self) -> bool {
        self.use_bti
    }

    /// Whether atomics select the LSE encodings. A preference without the
    /// feature bit silently falls back to LL/SC.
    pub fn use_lse_atomics(&self) -> bool {
        self.prefer_lse_atomics && self.flags.contains(IsaFlags::LSE)
    }

    /// Compile one IR function into machine code and metadata.
    pub fn compile_function(&self, func: &Function) -> CodegenResult<CompiledCode> {
        let mut lowered = lower_function(func, self)?;

        let alloc = regalloc::allocate(&mut lowered.vcode, lowered.nominal_size)?;
        debug_assert!(regalloc::fully_allocated(&lowered.vcode));

        let frame = FrameLayout {
            nominal_size: lowered.nominal_size + alloc.spill_bytes,
            outgoing_args_size: lowered.outgoing_args_size,
            clobbered_callee_saves: alloc.callee_saves_used,
        };
        let state = EmitState {
            nominal_sp_offset: frame.outgoing_args_size as i64,
        };
        legalize_stack_offsets(&lowered.vcode, &state)?;

        let mut buf = CodeBuffer::new();
        buf.reserve_labels(lowered.vcode.num_labels);

        let cfi = abi::emit_prologue(&mut buf, &state, &frame);

        for inst in &lowered.vcode.insts {
            match inst {
                Inst::Ret | Inst::TailCall { .. } | Inst::TailCallInd { .. } => {
                    abi::emit_epilogue(&mut buf, &state, &frame);
                    inst.emit(&mut buf, &state);
                }
                _ => inst.emit(&mut buf, &state),
            }
        }

        buf.finalize().map_err(|e| match e {
            BufferError::UnresolvedLabel { label } | BufferError::VeneerOutOfRange { label } => {
                CodegenError::UnresolvedLabel(label)
            }
        })?;

        let code_size = buf.cur_offset();
        let mut fde = FrameDescriptionEntry::from_prologue(cfi);
        fde.pc_begin = 0;
        fde.code_size = code_size;

        let (code, relocations, traps) = buf.into_parts();
        debug!(
            func = %func.name,
            bytes = code.len(),
            relocs = relocations.len(),
            traps = traps.len(),
            frame = frame.total_frame_size(),
            "compiled function"
        );

        Ok(CompiledCode {
            code,
            relocations,
            traps,
            stack_frame_size: frame.total_frame_size(),
            unwind: UnwindInfo {
                cie: CommonInfoEntry::new(),
                fde,
            },
        })
    }
}

/// Reject stack offsets beyond every load/store encoding before emission;
/// the encoder panics on them, the pipeline returns an error instead.
fn legalize_stack_offsets(vcode: &VCode, state: &EmitState) -> CodegenResult<()> {
    for inst in &vcode.insts {
        let (mem, scale) = match inst {
            Inst::ULoad8 { mem, .. } | Inst::SLoad8 { mem, .. } | Inst::Store8 { mem, .. } => {
                (mem, 1)
            }
            Inst::ULoad16 { mem, .. } | Inst::SLoad16 { mem, .. } | Inst::Store16 { mem, .. } => {
                (mem, 2)
            }
            Inst::ULoad32 { mem, .. }
            | Inst::SLoad32 { mem, .. }
            | Inst::Store32 { mem, .. }
            | Inst::FpuLoad32 { mem, .. }
            | Inst::FpuStore32 { mem, .. } => (mem, 4),
            Inst::ULoad64 { mem, .. }
            | Inst::Store64 { mem, .. }
            | Inst::FpuLoad64 { mem, .. }
            | Inst::FpuStore64 { mem, .. } => (mem, 8),
            Inst::FpuLoad128 { mem, .. } | Inst::FpuStore128 { mem, .. } => (mem, 16),
            _ => continue,
        };
        let off = match mem {
            AMode::SpOffset { off } => *off,
            AMode::NominalSpOffset { off } => off + state.nominal_sp_offset,
            _ => continue,
        };
        let encodable = anvil_asm::UImm12Scaled::maybe_from_i64(off, scale).is_some()
            || anvil_asm::SImm9::maybe_from_i64(off).is_some();
        if !encodable {
            return Err(CodegenError::StackOffsetOutOfRange { offset: off });
        }
    }
    Ok(())
}

/// The finished artifact of one function compilation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CompiledCode {
    /// Little-endian ARMv8-A machine code, 4-byte aligned words.
    pub code: Vec<u8>,
    /// External-symbol relocations.
    pub relocations: Vec<Reloc>,
    /// Trap records.
    pub traps: Vec<TrapRecord>,
    /// Bytes subtracted from SP past the FP/LR pair.
    pub stack_frame_size: u32,
    /// DWARF call-frame information.
    pub unwind: UnwindInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_validation() {
        assert_eq!(
            IsaBuilder::new().sign_return_address(true).build().unwrap_err(),
            CodegenError::PauthNotAvailable
        );
        assert_eq!(
            IsaBuilder::new().use_bti(true).build().unwrap_err(),
            CodegenError::BtiNotAvailable
        );
        assert!(IsaBuilder::new()
            .features(IsaFlags::PAUTH | IsaFlags::BTI)
            .sign_return_address(true)
            .use_bti(true)
            .build()
            .is_ok());
    }

    #[test]
    fn lse_preference_needs_the_feature() {
        let without = IsaBuilder::new().prefer_lse_atomics(true).build().unwrap();
        assert!(!without.use_lse_atomics());
        let with = IsaBuilder::new()
            .features(IsaFlags::LSE)
            .prefer_lse_atomics(true)
            .build()
            .unwrap();
        assert!(with.use_lse_atomics());
        let unpreferred = IsaBuilder::new().features(IsaFlags::LSE).build().unwrap();
        assert!(!unpreferred.use_lse_atomics());
    }

    #[test]
    fn page_alignment_by_os() {
        assert_eq!(TargetOs::MacOs.page_align_log2(), 14);
        assert_eq!(TargetOs::Ios.page_align_log2(), 14);
        assert_eq!(TargetOs::Linux.page_align_log2(), 16);
    }
}
