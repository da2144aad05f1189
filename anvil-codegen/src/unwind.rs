//! DWARF call-frame information for the prologue shape this back end
//! emits.
//!
//! One module-wide CIE, one FDE per function. The CIE carries the fixed
//! constants of the target: 4-byte code alignment, -8 data alignment, the
//! link register as return-address column, and `CFA = SP + 0` on entry.

use anvil_asm::CodeOffset;

use crate::abi::{CfiDirective, PrologueCfi};

const DW_CFA_NOP: u8 = 0x00;
const DW_CFA_ADVANCE_LOC: u8 = 0x40;
const DW_CFA_OFFSET: u8 = 0x80;
const DW_CFA_ADVANCE_LOC1: u8 = 0x02;
const DW_CFA_ADVANCE_LOC2: u8 = 0x03;
const DW_CFA_ADVANCE_LOC4: u8 = 0x04;
const DW_CFA_DEF_CFA_REGISTER: u8 = 0x0d;
const DW_CFA_DEF_CFA_OFFSET: u8 = 0x0e;
const DW_CFA_DEF_CFA: u8 = 0x0c;

fn put_uleb128(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn put_sleb128(out: &mut Vec<u8>, mut value: i64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let sign = byte & 0x40 != 0;
        if (value == 0 && !sign) || (value == -1 && sign) {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

/// The common information entry shared by every function of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CommonInfoEntry {
    /// CIE format version.
    pub version: u8,
    /// Code alignment factor: the instruction width.
    pub code_alignment: u32,
    /// Data alignment factor: negative slot size.
    pub data_alignment: i32,
    /// DWARF column of the return address.
    pub return_address_register: u8,
}

impl CommonInfoEntry {
    /// The canonical entry for this target.
    pub const fn new() -> Self {
        CommonInfoEntry {
            version: 1,
            code_alignment: 4,
            data_alignment: -8,
            return_address_register: 30,
        }
    }

    /// Serialize into `.eh_frame` CIE bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_le_bytes()); // CIE id
        body.push(self.version);
        body.push(0); // empty augmentation string
        put_uleb128(&mut body, self.code_alignment as u64);
        put_sleb128(&mut body, self.data_alignment as i64);
        put_uleb128(&mut body, self.return_address_register as u64);
        // def_cfa sp, 0
        body.push(DW_CFA_DEF_CFA);
        put_uleb128(&mut body, 31);
        put_uleb128(&mut body, 0);
        while (body.len() + 4) % 8 != 0 {
            body.push(DW_CFA_NOP);
        }

        let mut out = Vec::with_capacity(body.len() + 4);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend(body);
        out
    }
}

impl Default for CommonInfoEntry {
    fn default() -> Self {
        Self::new()
    }
}

/// The per-function frame description entry.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameDescriptionEntry {
    /// Start of the function's code; patched by the façade.
    pub pc_begin: u64,
    /// Size of the function's code in bytes; patched by the façade.
    pub code_size: u32,
    /// CFI directives at their code offsets, in offset order.
    pub instructions: Vec<(CodeOffset, CfiDirective)>,
}

impl FrameDescriptionEntry {
    /// An FDE from the directives recorded during prologue emission.
    pub fn from_prologue(cfi: PrologueCfi) -> Self {
        FrameDescriptionEntry {
            pc_begin: 0,
            code_size: 0,
            instructions: cfi.into_vec(),
        }
    }

    /// Serialize into `.eh_frame` FDE bytes, given the offset of the CIE
    /// this entry refers back to.
    pub fn encode(&self, cie_offset: u32) -> Vec<u8> {
        let mut body = Vec::new();
        // The pointer field holds the distance back to the CIE, measured
        // from the field itself; the caller passes the section offset at
        // which this FDE begins.
        body.extend_from_slice(&(cie_offset + 8).to_le_bytes());
        body.extend_from_slice(&self.pc_begin.to_le_bytes());
        body.extend_from_slice(&(self.code_size as u64).to_le_bytes());

        let mut loc: CodeOffset = 0;
        for &(offset, directive) in &self.instructions {
            let delta_words = (offset - loc) / 4;
            if delta_words > 0 {
                if delta_words < 0x40 {
                    body.push(DW_CFA_ADVANCE_LOC | delta_words as u8);
                } else if delta_words <= u8::MAX as u32 {
                    body.push(DW_CFA_ADVANCE_LOC1);
                    body.push(delta_words as u8);
                } else if delta_words <= u16::MAX as u32 {
                    body.push(DW_CFA_ADVANCE_LOC2);
                    body.extend_from_slice(&(delta_words as u16).to_le_bytes());
                } else {
                    body.push(DW_CFA_ADVANCE_LOC4);
                    body.extend_from_slice(&delta_words.to_le_bytes());
                }
            }
            loc = offset;

            match directive {
                CfiDirective::DefCfaOffset(off) => {
                    body.push(DW_CFA_DEF_CFA_OFFSET);
                    put_uleb128(&mut body, off as u64);
                }
                CfiDirective::DefCfaRegister(reg) => {
                    body.push(DW_CFA_DEF_CFA_REGISTER);
                    put_uleb128(&mut body, reg as u64);
                }
                CfiDirective::Offset { reg, cfa_offset } => {
                    // Factored by the data alignment of -8.
                    body.push(DW_CFA_OFFSET | (reg & 0x3f));
                    put_uleb128(&mut body, (cfa_offset / 8) as u64);
                }
            }
        }
        while (body.len() + 4) % 8 != 0 {
            body.push(DW_CFA_NOP);
        }

        let mut out = Vec::with_capacity(body.len() + 4);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend(body);
        out
    }
}

/// The unwind record attached to a compiled function.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UnwindInfo {
    /// The module-wide entry.
    pub cie: CommonInfoEntry,
    /// The function's entry.
    pub fde: FrameDescriptionEntry,
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn cie_constants() {
        let cie = CommonInfoEntry::new();
        assert_eq!(cie.version, 1);
        assert_eq!(cie.code_alignment, 4);
        assert_eq!(cie.data_alignment, -8);
        assert_eq!(cie.return_address_register, 30);
    }

    #[test]
    fn cie_bytes_start_with_length_and_id() {
        let bytes = CommonInfoEntry::new().encode();
        assert_eq!(bytes.len() % 8, 0);
        let len = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        assert_eq!(len as usize, bytes.len() - 4);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
        assert_eq!(bytes[8], 1);
        assert_eq!(bytes[9], 0);
        // ULEB 4, SLEB -8, ULEB 30.
        assert_eq!(bytes[10], 4);
        assert_eq!(bytes[11], 0x78);
        assert_eq!(bytes[12], 30);
        // def_cfa sp, 0
        assert_eq!(&bytes[13..16], &[0x0c, 31, 0]);
    }

    #[test]
    fn fde_advances_and_offsets() {
        let fde = FrameDescriptionEntry {
            pc_begin: 0x1000,
            code_size: 64,
            instructions: vec![
                (4, CfiDirective::DefCfaOffset(16)),
                (4, CfiDirective::Offset { reg: 29, cfa_offset: 16 }),
                (4, CfiDirective::Offset { reg: 30, cfa_offset: 8 }),
                (8, CfiDirective::DefCfaRegister(29)),
                (12, CfiDirective::DefCfaOffset(48)),
            ],
        };
        let bytes = fde.encode(0);
        assert_eq!(bytes.len() % 8, 0);
        // pc_begin and range as 8-byte fields after the pointer.
        assert_eq!(&bytes[8..16], &0x1000u64.to_le_bytes());
        assert_eq!(&bytes[16..24], &64u64.to_le_bytes());
        let ops = &bytes[24..];
        // advance_loc 1; def_cfa_offset 16; offset r29 at 2 slots;
        // offset r30 at 1 slot; advance_loc 1; def_cfa_register 29;
        // advance_loc 1; def_cfa_offset 48.
        assert_eq!(
            &ops[0..12],
            &[
                DW_CFA_ADVANCE_LOC | 1,
                DW_CFA_DEF_CFA_OFFSET,
                16,
                DW_CFA_OFFSET | 29,
                2,
                DW_CFA_OFFSET | 30,
                1,
                DW_CFA_ADVANCE_LOC | 1,
                DW_CFA_DEF_CFA_REGISTER,
                29,
                DW_CFA_ADVANCE_LOC | 1,
                DW_CFA_DEF_CFA_OFFSET,
            ]
        );
    }

    #[test]
    fn fde_from_prologue_records() {
        let cfi: PrologueCfi = smallvec![
            (4, CfiDirective::DefCfaOffset(16)),
            (8, CfiDirective::DefCfaRegister(29)),
        ];
        let fde = FrameDescriptionEntry::from_prologue(cfi);
        assert_eq!(fde.instructions.len(), 2);
        assert_eq!(fde.pc_begin, 0);
        assert_eq!(fde.code_size, 0);
    }
}
