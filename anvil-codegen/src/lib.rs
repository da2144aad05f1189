//! AArch64 code generation for the Anvil back end: instruction selection,
//! AAPCS64 argument classification and frame construction, linear-scan
//! register allocation, and DWARF unwind information.
//!
//! The entry point is [`Isa::compile_function`]: given an [`ir::Function`]
//! it produces a [`CompiledCode`] with the encoded bytes, relocations,
//! trap records, frame size and unwind record. The machine layer —
//! instruction model, encoder and code buffer — lives in `anvil-asm`.

#![warn(missing_docs)]

pub mod abi;
mod error;
pub mod ir;
mod isa;
mod lower;
mod regalloc;
pub mod unwind;

pub use error::{CodegenError, CodegenResult};
pub use isa::{CompiledCode, Isa, IsaBuilder, IsaFlags, TargetOs};
pub use lower::{lower_function, LoweredFunction, VCode};
pub use regalloc::{allocate, fully_allocated, AllocationResult};
