//! Submission parse state.
//!
//! The wire protocol fixes the record order inside one submission: command
//! buffers, then relocations, then wait checks, then relocation shifts.
//! [`PendingCounts::expected`] is the single place that order is encoded;
//! the stream assembler never consults anything else to decide what a byte
//! belongs to.

use osprey_protocol::{
    OspreyCmdbuf, OspreyReloc, OspreyRelocShift, OspreySubmitHdrExt, OspreyWaitchk,
};

/// Payload record kinds, in wire order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    Cmdbuf,
    Reloc,
    Waitchk,
    RelocShift,
}

impl RecordKind {
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::Cmdbuf => OspreyCmdbuf::SIZE_BYTES,
            Self::Reloc => OspreyReloc::SIZE_BYTES,
            Self::Waitchk => OspreyWaitchk::SIZE_BYTES,
            Self::RelocShift => OspreyRelocShift::SIZE_BYTES,
        }
    }
}

/// Records still outstanding for the active submission, per kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub cmdbufs: u32,
    pub relocs: u32,
    pub waitchks: u32,
    pub reloc_shifts: u32,
}

impl PendingCounts {
    /// Seed the counters from an accepted header.
    ///
    /// The shift counter mirrors the relocation count for submit versions
    /// with a shift phase; the header's own shift field is advisory and not
    /// trusted.
    pub fn from_header(hdr: &OspreySubmitHdrExt) -> Self {
        Self {
            cmdbufs: hdr.num_cmdbufs,
            relocs: hdr.num_relocs,
            waitchks: hdr.num_waitchks,
            reloc_shifts: if hdr.has_reloc_shifts() {
                hdr.num_relocs
            } else {
                0
            },
        }
    }

    pub fn is_drained(&self) -> bool {
        self.cmdbufs == 0 && self.relocs == 0 && self.waitchks == 0 && self.reloc_shifts == 0
    }

    /// The record kind the stream must supply next, or `None` once every
    /// declared record has arrived. First nonzero counter wins, in wire
    /// order.
    pub fn expected(&self) -> Option<RecordKind> {
        if self.cmdbufs > 0 {
            Some(RecordKind::Cmdbuf)
        } else if self.relocs > 0 {
            Some(RecordKind::Reloc)
        } else if self.waitchks > 0 {
            Some(RecordKind::Waitchk)
        } else if self.reloc_shifts > 0 {
            Some(RecordKind::RelocShift)
        } else {
            None
        }
    }
}

/// Where a channel stands in the submit protocol.
///
/// Exactly one variant holds at any instant. `Idle` and `Ready` both accept
/// a new header (accepting in `Ready` abandons the staged job); only `Ready`
/// may flush.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitPhase {
    /// No submission declared; the next streamed bytes are a header.
    Idle,
    /// Header accepted; declared records outstanding.
    Collecting(PendingCounts),
    /// Every declared record received; the staged job may be flushed.
    Ready,
}

impl SubmitPhase {
    pub fn accepts_header(&self) -> bool {
        matches!(self, Self::Idle | Self::Ready)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn pending(&self) -> Option<&PendingCounts> {
        match self {
            Self::Collecting(counts) => Some(counts),
            _ => None,
        }
    }
}
