//! The relocating code buffer.
//!
//! Machine words are appended in emission order; label references are
//! recorded as fixups and patched in [`CodeBuffer::finalize`]. A conditional
//! branch whose displacement exceeds its encoding's reach is retargeted at an
//! island veneer appended past the end of the body, where an unconditional
//! branch covers the remaining distance.

use core::fmt;

use smallvec::SmallVec;

/// A byte offset into the code buffer.
pub type CodeOffset = u32;

/// An intra-function label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Label(u32);

impl Label {
    /// A label with an explicit dense index. Indices are allocated either by
    /// a [`CodeBuffer`] or by the lowering context that owns the function;
    /// the two ranges are kept disjoint via [`CodeBuffer::reserve_labels`].
    pub const fn new(index: u32) -> Self {
        Label(index)
    }

    /// Dense label index.
    pub const fn index(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "label{}", self.0)
    }
}

/// How a label use is encoded into the referring instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LabelUseKind {
    /// 26-bit branch displacement (B, BL), ±128 MiB.
    Branch26,
    /// 19-bit branch displacement (B.cond, CBZ/CBNZ), ±1 MiB.
    Branch19,
    /// 14-bit branch displacement (TBZ/TBNZ), ±32 KiB.
    Branch14,
    /// 21-bit byte displacement of ADR, ±1 MiB.
    Adr21,
    /// Page-granular 21-bit displacement of ADRP, ±1 MiB resolution window.
    AdrPrelPgHi21,
    /// Low twelve bits of the target, for ADD :lo12:.
    AddAbsLo12Nc,
    /// Low twelve bits of the target scaled by eight, for LDR/STR :lo12:.
    Ldst64AbsLo12Nc,
    /// Raw 32-bit signed offset word, for jump-table entries.
    PcRel32,
}

impl LabelUseKind {
    /// Maximum forward reach in bytes.
    pub const fn max_pos_range(&self) -> CodeOffset {
        match self {
            LabelUseKind::Branch26 => (1 << 27) - 4,
            LabelUseKind::Branch19 => (1 << 20) - 4,
            LabelUseKind::Branch14 => (1 << 15) - 4,
            LabelUseKind::Adr21 => (1 << 20) - 4,
            LabelUseKind::AdrPrelPgHi21 => (1 << 20) - 4,
            // Non-relative once the same-page placement is guaranteed.
            LabelUseKind::AddAbsLo12Nc | LabelUseKind::Ldst64AbsLo12Nc => u32::MAX,
            LabelUseKind::PcRel32 => i32::MAX as u32,
        }
    }

    /// Maximum backward reach in bytes.
    pub const fn max_neg_range(&self) -> CodeOffset {
        match self {
            LabelUseKind::AddAbsLo12Nc | LabelUseKind::Ldst64AbsLo12Nc => u32::MAX,
            _ => self.max_pos_range() + 4,
        }
    }

    /// Whether an out-of-range use of this kind can be redirected through an
    /// island veneer.
    pub const fn supports_veneer(&self) -> bool {
        matches!(self, LabelUseKind::Branch19 | LabelUseKind::Branch14)
    }

    fn in_range(&self, use_offset: CodeOffset, target: CodeOffset) -> bool {
        if target >= use_offset {
            target - use_offset <= self.max_pos_range()
        } else {
            use_offset - target <= self.max_neg_range()
        }
    }

    fn patch_word(&self, word: u32, use_offset: CodeOffset, target: CodeOffset) -> u32 {
        let delta = target.wrapping_sub(use_offset) as i64 as i32;
        match self {
            LabelUseKind::Branch26 => {
                let imm26 = ((delta >> 2) as u32) & 0x03ff_ffff;
                (word & !0x03ff_ffff) | imm26
            }
            LabelUseKind::Branch19 => {
                let imm19 = ((delta >> 2) as u32) & 0x7ffff;
                (word & !(0x7ffff << 5)) | (imm19 << 5)
            }
            LabelUseKind::Branch14 => {
                let imm14 = ((delta >> 2) as u32) & 0x3fff;
                (word & !(0x3fff << 5)) | (imm14 << 5)
            }
            LabelUseKind::Adr21 => {
                let immlo = (delta as u32) & 0b11;
                let immhi = ((delta >> 2) as u32) & 0x7ffff;
                (word & !((0b11 << 29) | (0x7ffff << 5))) | (immlo << 29) | (immhi << 5)
            }
            LabelUseKind::AdrPrelPgHi21 => {
                let page_delta = ((target as i64 >> 12) - (use_offset as i64 >> 12)) as i32;
                let immlo = (page_delta as u32) & 0b11;
                let immhi = ((page_delta >> 2) as u32) & 0x7ffff;
                (word & !((0b11 << 29) | (0x7ffff << 5))) | (immlo << 29) | (immhi << 5)
            }
            LabelUseKind::AddAbsLo12Nc => {
                let imm12 = target & 0xfff;
                (word & !(0xfff << 10)) | (imm12 << 10)
            }
            LabelUseKind::Ldst64AbsLo12Nc => {
                let imm12 = (target & 0xfff) >> 3;
                (word & !(0xfff << 10)) | (imm12 << 10)
            }
            LabelUseKind::PcRel32 => delta as u32,
        }
    }
}

/// External-symbol relocation kinds preserved for the linker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RelocKind {
    /// Absolute 64-bit address.
    Abs64,
    /// PC-relative 32-bit offset.
    PcRel32,
    /// PC-relative 32-bit offset through the GOT.
    GotPcRel32,
    /// 26-bit call displacement (BL).
    Call26,
    /// Page-granular ADRP displacement to the symbol.
    AdrPrelPgHi21,
    /// Low twelve bits of the symbol address, for ADD.
    AddAbsLo12Nc,
    /// Low twelve bits of the symbol address scaled by eight, for LDR.
    Ldst64AbsLo12Nc,
}

/// A relocation against an external symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reloc {
    /// Byte offset of the patched word.
    pub offset: CodeOffset,
    /// Relocation kind.
    pub kind: RelocKind,
    /// Referenced symbol name.
    pub symbol: String,
    /// Constant addend.
    pub addend: i64,
}

/// A runtime trap site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrapRecord {
    /// Byte offset of the trapping instruction.
    pub offset: CodeOffset,
    /// Trap code carried in the UDF immediate.
    pub code: u16,
}

#[derive(Debug, Clone, Copy)]
struct Fixup {
    offset: CodeOffset,
    label: Label,
    kind: LabelUseKind,
    addend: i32,
}

/// Failures surfaced by [`CodeBuffer::finalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// A label was used but never bound.
    UnresolvedLabel {
        /// The unbound label.
        label: Label,
    },
    /// A veneer could not bring the target into range.
    VeneerOutOfRange {
        /// The label whose distance exceeds even the veneer reach.
        label: Label,
    },
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::UnresolvedLabel { label } => {
                write!(f, "unresolved {label} at finalize")
            }
            BufferError::VeneerOutOfRange { label } => {
                write!(f, "island veneer for {label} is itself out of range")
            }
        }
    }
}

impl std::error::Error for BufferError {}

/// The append-only, relocating machine-code sink.
#[derive(Debug, Default)]
pub struct CodeBuffer {
    data: Vec<u8>,
    label_offsets: Vec<Option<CodeOffset>>,
    fixups: Vec<Fixup>,
    relocs: Vec<Reloc>,
    traps: Vec<TrapRecord>,
    finalized: bool,
}

impl CodeBuffer {
    /// An empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current end-of-buffer offset.
    pub fn cur_offset(&self) -> CodeOffset {
        self.data.len() as CodeOffset
    }

    /// Append one 32-bit instruction word, little-endian.
    pub fn put4(&mut self, word: u32) {
        debug_assert!(self.cur_offset() % 4 == 0);
        self.data.extend_from_slice(&word.to_le_bytes());
    }

    /// Append raw bytes.
    pub fn put_data(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    fn ensure_label(&mut self, label: Label) {
        let needed = label.index() as usize + 1;
        if self.label_offsets.len() < needed {
            self.label_offsets.resize(needed, None);
        }
    }

    /// Reserve index space for `count` externally allocated labels, keeping
    /// buffer-allocated labels disjoint from them.
    pub fn reserve_labels(&mut self, count: u32) {
        if self.label_offsets.len() < count as usize {
            self.label_offsets.resize(count as usize, None);
        }
    }

    /// Allocate a fresh, unbound label.
    pub fn get_label(&mut self) -> Label {
        let label = Label(self.label_offsets.len() as u32);
        self.label_offsets.push(None);
        label
    }

    /// Bind `label` to the current offset.
    pub fn bind_label(&mut self, label: Label) {
        self.ensure_label(label);
        let offset = self.cur_offset();
        let slot = &mut self.label_offsets[label.index() as usize];
        debug_assert!(slot.is_none(), "{label} bound twice");
        *slot = Some(offset);
    }

    /// Offset a bound label resolves to.
    pub fn label_offset(&self, label: Label) -> Option<CodeOffset> {
        self.label_offsets.get(label.index() as usize).copied().flatten()
    }

    /// Record a use of `label` at byte offset `offset`, to be patched with
    /// the given encoding kind at finalize.
    pub fn use_label_at_offset(&mut self, offset: CodeOffset, label: Label, kind: LabelUseKind) {
        self.use_label_with_addend(offset, label, kind, 0);
    }

    /// Record a label use whose patched value is biased by `addend` bytes.
    /// Jump-table entries use this to express table-relative offsets.
    pub fn use_label_with_addend(
        &mut self,
        offset: CodeOffset,
        label: Label,
        kind: LabelUseKind,
        addend: i32,
    ) {
        self.fixups.push(Fixup {
            offset,
            label,
            kind,
            addend,
        });
    }

    /// Record a use of `label` by the word that was just emitted.
    pub fn use_label(&mut self, label: Label, kind: LabelUseKind) {
        debug_assert!(self.cur_offset() >= 4);
        self.use_label_at_offset(self.cur_offset() - 4, label, kind);
    }

    /// Record an external-symbol relocation for the word that was just
    /// emitted.
    pub fn add_reloc(&mut self, kind: RelocKind, symbol: &str, addend: i64) {
        debug_assert!(self.cur_offset() >= 4);
        self.relocs.push(Reloc {
            offset: self.cur_offset() - 4,
            kind,
            symbol: symbol.to_string(),
            addend,
        });
    }

    /// Record a trap for the word that is about to be emitted at the current
    /// offset.
    pub fn add_trap(&mut self, code: u16) {
        self.traps.push(TrapRecord {
            offset: self.cur_offset(),
            code,
        });
    }

    fn read4(&self, offset: CodeOffset) -> u32 {
        let i = offset as usize;
        u32::from_le_bytes(self.data[i..i + 4].try_into().unwrap())
    }

    fn write4(&mut self, offset: CodeOffset, word: u32) {
        let i = offset as usize;
        self.data[i..i + 4].copy_from_slice(&word.to_le_bytes());
    }

    fn patch(&mut self, fixup: Fixup, target: CodeOffset) {
        let biased = (target as i64 + fixup.addend as i64) as CodeOffset;
        let word = self.read4(fixup.offset);
        let patched = fixup.kind.patch_word(word, fixup.offset, biased);
        self.write4(fixup.offset, patched);
    }

    /// Resolve every recorded label use, emitting island veneers for
    /// conditional branches whose target is out of reach.
    pub fn finalize(&mut self) -> Result<(), BufferError> {
        debug_assert!(!self.finalized);
        self.finalized = true;

        let fixups = std::mem::take(&mut self.fixups);
        // Veneers shared per label: many short branches to one far target
        // funnel through one island.
        let mut veneers: SmallVec<[(Label, CodeOffset); 4]> = SmallVec::new();

        for fixup in fixups {
            let target = self
                .label_offset(fixup.label)
                .ok_or(BufferError::UnresolvedLabel { label: fixup.label })?;

            if fixup.kind.in_range(fixup.offset, target) {
                self.patch(fixup, target);
                continue;
            }

            if !fixup.kind.supports_veneer() {
                return Err(BufferError::VeneerOutOfRange { label: fixup.label });
            }

            let veneer = match veneers.iter().find(|(l, _)| *l == fixup.label) {
                Some((_, off)) => *off,
                None => {
                    // Island: a branch26 thunk past the end of the body.
                    let off = self.cur_offset();
                    self.put4(0x1400_0000);
                    let thunk = Fixup {
                        offset: off,
                        label: fixup.label,
                        kind: LabelUseKind::Branch26,
                        addend: 0,
                    };
                    if !LabelUseKind::Branch26.in_range(off, target) {
                        return Err(BufferError::VeneerOutOfRange { label: fixup.label });
                    }
                    self.patch(thunk, target);
                    veneers.push((fixup.label, off));
                    off
                }
            };

            if !fixup.kind.in_range(fixup.offset, veneer) {
                return Err(BufferError::VeneerOutOfRange { label: fixup.label });
            }
            let retargeted = Fixup { addend: 0, ..fixup };
            self.patch(retargeted, veneer);
        }

        Ok(())
    }

    /// Finished bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Recorded external relocations.
    pub fn relocs(&self) -> &[Reloc] {
        &self.relocs
    }

    /// Recorded trap sites.
    pub fn traps(&self) -> &[TrapRecord] {
        &self.traps
    }

    /// Consume the buffer, yielding bytes, relocations and traps.
    pub fn into_parts(self) -> (Vec<u8>, Vec<Reloc>, Vec<TrapRecord>) {
        (self.data, self.relocs, self.traps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backward_branch_resolves() {
        let mut buf = CodeBuffer::new();
        let top = buf.get_label();
        buf.bind_label(top);
        buf.put4(0xd503_201f); // nop
        buf.put4(0x1400_0000); // b
        buf.use_label(top, LabelUseKind::Branch26);
        buf.finalize().unwrap();
        // Displacement -4 words... -1 word.
        let word = u32::from_le_bytes(buf.data()[4..8].try_into().unwrap());
        assert_eq!(word, 0x1400_0000 | 0x03ff_ffff);
    }

    #[test]
    fn forward_branch19_resolves() {
        let mut buf = CodeBuffer::new();
        let skip = buf.get_label();
        buf.put4(0x5400_0000); // b.eq
        buf.use_label(skip, LabelUseKind::Branch19);
        buf.put4(0xd503_201f);
        buf.bind_label(skip);
        buf.finalize().unwrap();
        let word = u32::from_le_bytes(buf.data()[0..4].try_into().unwrap());
        // +8 bytes = 2 words in imm19.
        assert_eq!(word, 0x5400_0000 | (2 << 5));
    }

    #[test]
    fn unresolved_label_is_fatal() {
        let mut buf = CodeBuffer::new();
        let dangling = buf.get_label();
        buf.put4(0x1400_0000);
        buf.use_label(dangling, LabelUseKind::Branch26);
        assert_eq!(
            buf.finalize(),
            Err(BufferError::UnresolvedLabel { label: dangling })
        );
    }

    #[test]
    fn pcrel32_table_entry_with_addend() {
        let mut buf = CodeBuffer::new();
        let target = buf.get_label();
        // Table base at 0; entry word biased to be table-relative.
        buf.put4(0);
        buf.use_label_with_addend(0, target, LabelUseKind::PcRel32, 0);
        buf.put4(0xd503_201f);
        buf.bind_label(target);
        buf.finalize().unwrap();
        let entry = i32::from_le_bytes(buf.data()[0..4].try_into().unwrap());
        assert_eq!(entry, 8);
    }

    #[test]
    fn out_of_range_branch19_gets_island() {
        let mut buf = CodeBuffer::new();
        let top = buf.get_label();
        buf.bind_label(top);
        // Pad past the ±1 MiB reach of branch19, then branch back to the top.
        for _ in 0..(1 << 18) + 4 {
            buf.put4(0xd503_201f);
        }
        buf.put4(0x5400_0001); // b.ne placeholder
        buf.use_label(top, LabelUseKind::Branch19);
        let branch_off = buf.cur_offset() - 4;
        let body_end = buf.cur_offset();
        buf.finalize().unwrap();

        // An island thunk was appended past the body and the conditional
        // branch was retargeted at it.
        assert_eq!(buf.cur_offset(), body_end + 4);
        let cond =
            u32::from_le_bytes(buf.data()[branch_off as usize..branch_off as usize + 4].try_into().unwrap());
        let imm19 = (cond >> 5) & 0x7ffff;
        assert_eq!(imm19 << 2, body_end - branch_off, "retargeted at the island");
        let thunk =
            u32::from_le_bytes(buf.data()[body_end as usize..body_end as usize + 4].try_into().unwrap());
        assert_eq!(thunk >> 26, 0b000101);
        let imm26 = thunk & 0x03ff_ffff;
        let delta = ((imm26 << 6) as i32) >> 4; // sign-extend, times 4
        assert_eq!(body_end as i32 + delta, 0, "island thunks back to the top");
    }
}
