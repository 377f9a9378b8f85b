//! Job descriptor: one submission's assembled work.
//!
//! The descriptor is owned by its channel and reused across submissions.
//! Accepting a header re-seeds the metadata and reserves the sequences to
//! the declared counts; assembly only ever appends, so the achieved counts
//! are simply the sequence lengths. After a flush the sequences are cleared
//! while the channel metadata (client id, priority, timeout) persists.

use std::collections::HashSet;
use std::fmt;
use std::mem;

use osprey_protocol::{OspreyReloc, OspreySubmitHdrExt, OspreyWaitchk};

use crate::error::{OspreyChannelError, Result};

/// Opaque reference to an externally-owned memory buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OspreyMemHandle(pub u32);

impl fmt::Display for OspreyMemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Channel scheduling priority.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum OspreyPriority {
    Low,
    #[default]
    Medium,
    High,
}

/// One gathered command buffer: `words` 32-bit words at `offset` bytes into
/// the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OspreyGather {
    pub handle: OspreyMemHandle,
    pub words: u32,
    pub offset: u32,
}

/// One relocation slot. `shift` arrives in the later shift phase (submit
/// versions that stream one) and stays unset otherwise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OspreyPinSlot {
    pub cmdbuf_handle: OspreyMemHandle,
    pub cmdbuf_offset: u32,
    pub target_handle: OspreyMemHandle,
    pub target_offset: u32,
    pub shift: Option<u32>,
}

/// One wait check the device verifies before consuming the gathers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OspreyWaitCheck {
    pub handle: OspreyMemHandle,
    pub offset: u32,
    pub syncpt_id: u32,
    pub thresh: u32,
}

/// Hard caps on declared record counts. Headers are guest-controlled input;
/// counts above these bounds fail descriptor growth instead of driving
/// outsized reservations.
pub const OSPREY_MAX_SUBMIT_CMDBUFS: u32 = 4096;
pub const OSPREY_MAX_SUBMIT_RELOCS: u32 = 4096;
pub const OSPREY_MAX_SUBMIT_WAITCHKS: u32 = 4096;

/// One submission's assembled work plus the channel metadata it runs with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OspreyJob {
    /// Channel client that assembled this job.
    pub client_id: u32,
    pub priority: OspreyPriority,
    /// Milliseconds the device may run before the watchdog fires; 0 means no
    /// timeout.
    pub timeout_ms: u32,
    /// Run the submission without reaching hardware (debug hook).
    pub null_kickoff: bool,

    pub syncpt_id: u32,
    pub syncpt_incrs: u32,
    /// Final syncpoint value this job signals; populated by a successful
    /// submission.
    pub syncpt_end: Option<u32>,

    /// Aggregate mask of syncpoints the wait checks reference.
    pub waitchk_mask: u32,

    gathers: Vec<OspreyGather>,
    pins: Vec<OspreyPinSlot>,
    waitchks: Vec<OspreyWaitCheck>,
}

fn reserve_records<T>(vec: &mut Vec<T>, declared: u32, cap: u32) -> Result<()> {
    if declared > cap {
        return Err(OspreyChannelError::OutOfMemory {
            bytes: (declared as usize).saturating_mul(mem::size_of::<T>()),
        });
    }
    let declared = declared as usize;
    vec.try_reserve_exact(declared)
        .map_err(|_| OspreyChannelError::OutOfMemory {
            bytes: declared * mem::size_of::<T>(),
        })
}

impl OspreyJob {
    pub(crate) fn new(client_id: u32, priority: OspreyPriority, timeout_ms: u32) -> Self {
        Self {
            client_id,
            priority,
            timeout_ms,
            null_kickoff: false,
            syncpt_id: 0,
            syncpt_incrs: 0,
            syncpt_end: None,
            waitchk_mask: 0,
            gathers: Vec::new(),
            pins: Vec::new(),
            waitchks: Vec::new(),
        }
    }

    /// Re-seed for a freshly accepted header: drop any previously staged
    /// sequences, copy the header's syncpoint range and wait mask, take the
    /// channel's current timeout and priority, and reserve storage for the
    /// declared counts.
    pub(crate) fn begin(
        &mut self,
        hdr: &OspreySubmitHdrExt,
        timeout_ms: u32,
        priority: OspreyPriority,
    ) -> Result<()> {
        self.gathers.clear();
        self.pins.clear();
        self.waitchks.clear();

        self.priority = priority;
        self.timeout_ms = timeout_ms;
        self.null_kickoff = false;
        self.syncpt_id = hdr.syncpt_id;
        self.syncpt_incrs = hdr.syncpt_incrs;
        self.syncpt_end = None;
        self.waitchk_mask = hdr.waitchk_mask;

        reserve_records(&mut self.gathers, hdr.num_cmdbufs, OSPREY_MAX_SUBMIT_CMDBUFS)?;
        reserve_records(&mut self.pins, hdr.num_relocs, OSPREY_MAX_SUBMIT_RELOCS)?;
        reserve_records(&mut self.waitchks, hdr.num_waitchks, OSPREY_MAX_SUBMIT_WAITCHKS)?;
        Ok(())
    }

    /// Caller (the stream assembler) guarantees the append stays within the
    /// header's declared count.
    pub(crate) fn append_gather(&mut self, handle: OspreyMemHandle, words: u32, offset: u32) {
        self.gathers.push(OspreyGather {
            handle,
            words,
            offset,
        });
    }

    pub(crate) fn append_pin(&mut self, reloc: &OspreyReloc) {
        self.pins.push(OspreyPinSlot {
            cmdbuf_handle: OspreyMemHandle(reloc.cmdbuf_handle),
            cmdbuf_offset: reloc.cmdbuf_offset,
            target_handle: OspreyMemHandle(reloc.target_handle),
            target_offset: reloc.target_offset,
            shift: None,
        });
    }

    pub(crate) fn append_waitchks(&mut self, records: &[OspreyWaitchk]) {
        self.waitchks.extend(records.iter().map(|chk| OspreyWaitCheck {
            handle: OspreyMemHandle(chk.handle),
            offset: chk.offset,
            syncpt_id: chk.syncpt_id,
            thresh: chk.thresh,
        }));
    }

    /// Resolve the shift of a previously appended pin. `index` is computed
    /// by the assembler as `num_pins() - remaining shift records`, which is
    /// in range by construction (the shift phase only runs after every
    /// relocation record has arrived).
    pub(crate) fn resolve_pin_shift(&mut self, index: usize, shift: u32) {
        debug_assert!(self.pins[index].shift.is_none());
        self.pins[index].shift = Some(shift);
    }

    /// Clear the staged sequences while keeping channel metadata and the
    /// last recorded syncpoint end. Capacity is retained for reuse.
    pub(crate) fn reset_sequences(&mut self) {
        self.gathers.clear();
        self.pins.clear();
        self.waitchks.clear();
    }

    pub fn gathers(&self) -> &[OspreyGather] {
        &self.gathers
    }

    pub fn pins(&self) -> &[OspreyPinSlot] {
        &self.pins
    }

    pub fn waitchks(&self) -> &[OspreyWaitCheck] {
        &self.waitchks
    }

    pub fn num_gathers(&self) -> usize {
        self.gathers.len()
    }

    pub fn num_pins(&self) -> usize {
        self.pins.len()
    }

    pub fn num_waitchks(&self) -> usize {
        self.waitchks.len()
    }

    /// Every buffer this job references, deduplicated, in first-appearance
    /// order: gather buffers first, then each relocation's command buffer
    /// and target. This is the pin order the flush path uses.
    pub fn referenced_handles(&self) -> Vec<OspreyMemHandle> {
        let mut seen = HashSet::new();
        let mut handles = Vec::new();
        let mut push = |handle: OspreyMemHandle| {
            if seen.insert(handle) {
                handles.push(handle);
            }
        };
        for gather in &self.gathers {
            push(gather.handle);
        }
        for pin in &self.pins {
            push(pin.cmdbuf_handle);
            push(pin.target_handle);
        }
        handles
    }
}
