//! Submit-stream record layouts.
//!
//! Every record is a run of little-endian `u32` words. Parsers must consume
//! whole records only: when fewer bytes than one record remain, consumption
//! stalls until the producer supplies the rest.

/* ---- Submit versions ---- */

/// Legacy streamed submissions. The header carries no version field and the
/// stream has no relocation-shift phase.
pub const OSPREY_SUBMIT_VERSION_V0: u32 = 0;
/// Explicit version field (extended header), still no relocation-shift phase.
pub const OSPREY_SUBMIT_VERSION_V1: u32 = 1;
/// Adds the relocation-shift phase: one shift record per relocation record,
/// streamed after the wait-check records.
pub const OSPREY_SUBMIT_VERSION_V2: u32 = 2;
/// Newest version this host accepts. Headers declaring a greater version are
/// rejected without touching channel state.
pub const OSPREY_SUBMIT_VERSION_MAX_SUPPORTED: u32 = OSPREY_SUBMIT_VERSION_V2;

/// Whether `version` streams a relocation-shift record per relocation.
pub const fn submit_version_has_reloc_shifts(version: u32) -> bool {
    version >= OSPREY_SUBMIT_VERSION_V2
}

/* ---- Header records ---- */

/// Legacy submit header, the first record of every streamed submission.
///
/// Declares how many records of each kind follow and the syncpoint range the
/// job will signal. Implies [`OSPREY_SUBMIT_VERSION_V0`].
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OspreySubmitHdr {
    pub syncpt_id: u32,
    pub syncpt_incrs: u32,
    pub num_cmdbufs: u32,
    pub num_relocs: u32,
    pub num_waitchks: u32,
    /// Aggregate mask of syncpoints referenced by the wait-check records.
    pub waitchk_mask: u32,
}

impl OspreySubmitHdr {
    pub const SIZE_BYTES: usize = 24;

    pub fn decode_from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE_BYTES {
            return None;
        }
        Some(Self {
            syncpt_id: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            syncpt_incrs: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            num_cmdbufs: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            num_relocs: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            num_waitchks: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            waitchk_mask: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
        })
    }

    pub fn encode_to_le_bytes(&self) -> [u8; Self::SIZE_BYTES] {
        let mut out = [0u8; Self::SIZE_BYTES];
        out[0..4].copy_from_slice(&self.syncpt_id.to_le_bytes());
        out[4..8].copy_from_slice(&self.syncpt_incrs.to_le_bytes());
        out[8..12].copy_from_slice(&self.num_cmdbufs.to_le_bytes());
        out[12..16].copy_from_slice(&self.num_relocs.to_le_bytes());
        out[16..20].copy_from_slice(&self.num_waitchks.to_le_bytes());
        out[20..24].copy_from_slice(&self.waitchk_mask.to_le_bytes());
        out
    }
}

/// Extended submit header: the legacy fields plus an explicit submit version
/// and, for versions with a shift phase, the declared shift-record count
/// (`num_reloc_shifts` mirrors `num_relocs` on well-formed submissions).
///
/// Delivered out of band through the typed submit operation rather than the
/// byte stream.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OspreySubmitHdrExt {
    pub syncpt_id: u32,
    pub syncpt_incrs: u32,
    pub num_cmdbufs: u32,
    pub num_relocs: u32,
    pub num_waitchks: u32,
    pub waitchk_mask: u32,
    pub submit_version: u32,
    pub num_reloc_shifts: u32,
}

impl OspreySubmitHdrExt {
    pub const SIZE_BYTES: usize = 32;

    pub fn decode_from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE_BYTES {
            return None;
        }
        Some(Self {
            syncpt_id: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            syncpt_incrs: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            num_cmdbufs: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            num_relocs: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            num_waitchks: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            waitchk_mask: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            submit_version: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
            num_reloc_shifts: u32::from_le_bytes(buf[28..32].try_into().unwrap()),
        })
    }

    pub fn encode_to_le_bytes(&self) -> [u8; Self::SIZE_BYTES] {
        let mut out = [0u8; Self::SIZE_BYTES];
        out[0..4].copy_from_slice(&self.syncpt_id.to_le_bytes());
        out[4..8].copy_from_slice(&self.syncpt_incrs.to_le_bytes());
        out[8..12].copy_from_slice(&self.num_cmdbufs.to_le_bytes());
        out[12..16].copy_from_slice(&self.num_relocs.to_le_bytes());
        out[16..20].copy_from_slice(&self.num_waitchks.to_le_bytes());
        out[20..24].copy_from_slice(&self.waitchk_mask.to_le_bytes());
        out[24..28].copy_from_slice(&self.submit_version.to_le_bytes());
        out[28..32].copy_from_slice(&self.num_reloc_shifts.to_le_bytes());
        out
    }

    /// Whether this submission streams a relocation-shift phase.
    pub const fn has_reloc_shifts(&self) -> bool {
        submit_version_has_reloc_shifts(self.submit_version)
    }
}

impl From<OspreySubmitHdr> for OspreySubmitHdrExt {
    fn from(hdr: OspreySubmitHdr) -> Self {
        Self {
            syncpt_id: hdr.syncpt_id,
            syncpt_incrs: hdr.syncpt_incrs,
            num_cmdbufs: hdr.num_cmdbufs,
            num_relocs: hdr.num_relocs,
            num_waitchks: hdr.num_waitchks,
            waitchk_mask: hdr.waitchk_mask,
            submit_version: OSPREY_SUBMIT_VERSION_V0,
            num_reloc_shifts: 0,
        }
    }
}

/// A submit header in either accepted form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OspreySubmitHeader {
    Legacy(OspreySubmitHdr),
    Ext(OspreySubmitHdrExt),
}

impl OspreySubmitHeader {
    /// Normalized extended view. Legacy headers become version-0 extended
    /// headers with no shift records.
    pub fn to_ext(&self) -> OspreySubmitHdrExt {
        match *self {
            Self::Legacy(hdr) => hdr.into(),
            Self::Ext(hdr) => hdr,
        }
    }

    pub fn version(&self) -> u32 {
        match self {
            Self::Legacy(_) => OSPREY_SUBMIT_VERSION_V0,
            Self::Ext(hdr) => hdr.submit_version,
        }
    }
}

/* ---- Payload records ---- */

/// One command buffer to gather into the job, `words` 32-bit words starting
/// at `offset` bytes into the buffer named by `handle`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OspreyCmdbuf {
    pub handle: u32,
    pub offset: u32,
    pub words: u32,
}

impl OspreyCmdbuf {
    pub const SIZE_BYTES: usize = 12;

    pub fn decode_from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE_BYTES {
            return None;
        }
        Some(Self {
            handle: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            offset: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            words: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
        })
    }

    pub fn encode_to_le_bytes(&self) -> [u8; Self::SIZE_BYTES] {
        let mut out = [0u8; Self::SIZE_BYTES];
        out[0..4].copy_from_slice(&self.handle.to_le_bytes());
        out[4..8].copy_from_slice(&self.offset.to_le_bytes());
        out[8..12].copy_from_slice(&self.words.to_le_bytes());
        out
    }
}

/// One relocation: the device address of `target_handle` (plus
/// `target_offset`) is patched into the command buffer `cmdbuf_handle` at
/// `cmdbuf_offset` once the target is pinned.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OspreyReloc {
    pub cmdbuf_handle: u32,
    pub cmdbuf_offset: u32,
    pub target_handle: u32,
    pub target_offset: u32,
}

impl OspreyReloc {
    pub const SIZE_BYTES: usize = 16;

    pub fn decode_from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE_BYTES {
            return None;
        }
        Some(Self {
            cmdbuf_handle: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            cmdbuf_offset: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            target_handle: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            target_offset: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        })
    }

    pub fn encode_to_le_bytes(&self) -> [u8; Self::SIZE_BYTES] {
        let mut out = [0u8; Self::SIZE_BYTES];
        out[0..4].copy_from_slice(&self.cmdbuf_handle.to_le_bytes());
        out[4..8].copy_from_slice(&self.cmdbuf_offset.to_le_bytes());
        out[8..12].copy_from_slice(&self.target_handle.to_le_bytes());
        out[12..16].copy_from_slice(&self.target_offset.to_le_bytes());
        out
    }
}

/// One wait check: before consuming the gathers, the device verifies syncpoint
/// `syncpt_id` has reached `thresh`; `handle`/`offset` name the command-buffer
/// word the wait was encoded at so a satisfied wait can be patched out.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OspreyWaitchk {
    pub handle: u32,
    pub offset: u32,
    pub syncpt_id: u32,
    pub thresh: u32,
}

impl OspreyWaitchk {
    pub const SIZE_BYTES: usize = 16;

    pub fn decode_from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE_BYTES {
            return None;
        }
        Some(Self {
            handle: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            offset: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            syncpt_id: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            thresh: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        })
    }

    pub fn encode_to_le_bytes(&self) -> [u8; Self::SIZE_BYTES] {
        let mut out = [0u8; Self::SIZE_BYTES];
        out[0..4].copy_from_slice(&self.handle.to_le_bytes());
        out[4..8].copy_from_slice(&self.offset.to_le_bytes());
        out[8..12].copy_from_slice(&self.syncpt_id.to_le_bytes());
        out[12..16].copy_from_slice(&self.thresh.to_le_bytes());
        out
    }
}

/// One relocation shift, streamed only for submit versions with a shift
/// phase. Shift records apply to the relocations of the current submission in
/// the order those relocations were streamed.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OspreyRelocShift {
    pub shift: u32,
}

impl OspreyRelocShift {
    pub const SIZE_BYTES: usize = 4;

    pub fn decode_from_le_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE_BYTES {
            return None;
        }
        Some(Self {
            shift: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
        })
    }

    pub fn encode_to_le_bytes(&self) -> [u8; Self::SIZE_BYTES] {
        self.shift.to_le_bytes()
    }
}

const _: () = {
    assert!(core::mem::size_of::<OspreySubmitHdr>() == OspreySubmitHdr::SIZE_BYTES);
    assert!(core::mem::size_of::<OspreySubmitHdrExt>() == OspreySubmitHdrExt::SIZE_BYTES);
    assert!(core::mem::size_of::<OspreyCmdbuf>() == OspreyCmdbuf::SIZE_BYTES);
    assert!(core::mem::size_of::<OspreyReloc>() == OspreyReloc::SIZE_BYTES);
    assert!(core::mem::size_of::<OspreyWaitchk>() == OspreyWaitchk::SIZE_BYTES);
    assert!(core::mem::size_of::<OspreyRelocShift>() == OspreyRelocShift::SIZE_BYTES);
};
