//! Compilation error taxonomy.
//!
//! Constructor-level immediate failures are recoverable: the default
//! lowering paths fall back to register forms and never surface them.
//! Type-shape and configuration failures are returned to the caller.
//! Fatals abort the compilation of the current function.

use thiserror::Error;

use anvil_asm::Label;

use crate::ir::Type;

/// Errors surfaced by the back end.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodegenError {
    /// A 12-bit-immediate form was requested for a value it cannot hold.
    #[error("immediate {value:#x} does not fit the imm12 encoding")]
    ImmediateOutOfRange {
        /// The rejected value.
        value: u64,
    },
    /// A logical-immediate form was requested for a value that is not a
    /// rotated run of ones.
    #[error("{value:#x} is not encodable as a logical immediate")]
    InvalidLogicalImmediate {
        /// The rejected value.
        value: u64,
    },
    /// A load/store width the ISA does not directly support.
    #[error("unsupported type {0} for a memory access")]
    UnsupportedType(Type),
    /// An integer width with no machine representation.
    #[error("unsupported integer size of {0} bits")]
    UnsupportedIntegerSize(u32),
    /// A float width with no machine representation.
    #[error("unsupported float size of {0} bits")]
    UnsupportedFloatSize(u32),
    /// Return-address signing was requested without pointer authentication.
    #[error("sign_return_address requires the pauth feature")]
    PauthNotAvailable,
    /// Branch-target identification was requested without the BTI feature.
    #[error("use_bti requires the bti feature")]
    BtiNotAvailable,
    /// A label survived to finalize without a binding.
    #[error("unresolved label {0} at finalize")]
    UnresolvedLabel(Label),
    /// The allocator found no assignable register and no spill candidate.
    #[error("register allocator saturated at instruction {at}")]
    AllocatorSaturation {
        /// Index of the instruction being allocated.
        at: usize,
    },
    /// A stack offset exceeded every load/store addressing encoding.
    #[error("stack offset {offset} exceeds the addressable range")]
    StackOffsetOutOfRange {
        /// The offending byte offset.
        offset: i64,
    },
    /// An IR opcode the selector has no lowering for.
    #[error("no lowering for opcode {0}")]
    UnimplementedOpcode(&'static str),
}

impl CodegenError {
    /// True for failures a constructor recovers from by falling back to a
    /// register form.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CodegenError::ImmediateOutOfRange { .. }
                | CodegenError::InvalidLogicalImmediate { .. }
        )
    }
}

/// Convenience alias used across the crate.
pub type CodegenResult<T> = Result<T, CodegenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverability_split() {
        assert!(CodegenError::ImmediateOutOfRange { value: 1 << 40 }.is_recoverable());
        assert!(CodegenError::InvalidLogicalImmediate { value: 0x1234 }.is_recoverable());
        assert!(!CodegenError::PauthNotAvailable.is_recoverable());
        assert!(!CodegenError::UnresolvedLabel(Label::new(0)).is_recoverable());
    }
}
