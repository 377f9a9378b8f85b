//! Collaborator boundaries for pinning and device submission.
//!
//! The channel core never touches memory management or hardware directly;
//! it reaches both through the traits here. Implementations may execute
//! immediately (synchronous) or hand work to a real device queue, but
//! `submit` is a blocking call either way: it returns once the job is queued
//! and its syncpoint-end value is known.

use thiserror::Error;

use crate::job::{OspreyJob, OspreyMemHandle};

/// Device address handed back by a successful pin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OspreyDeviceAddr(pub u64);

/// Why the pinning collaborator refused a buffer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct OspreyPinError {
    pub reason: String,
}

/// Why the device-submission collaborator rejected a job.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct OspreySubmitError {
    pub reason: String,
}

/// Boundary between job assembly and the memory system that owns the
/// referenced buffers.
///
/// `pin` acquires a reference to the buffer and returns the device address
/// its relocations patch against. The flush path pins each unique handle at
/// most once per flush and, on any later failure, calls `unpin` exactly once
/// per acquired handle, in reverse acquisition order.
pub trait OspreyPinner {
    fn pin(&mut self, handle: OspreyMemHandle) -> Result<OspreyDeviceAddr, OspreyPinError>;
    fn unpin(&mut self, handle: OspreyMemHandle);
}

/// Boundary between the channel and device execution.
///
/// The job is fully assembled and fully pinned when `submit` is called. The
/// call may block while the device queue has no free slot; it must not
/// retain the job beyond the call. On success it returns the job's
/// syncpoint-end value, the counter value the external synchronization
/// mechanism watches for completion.
pub trait OspreySubmitBackend {
    fn submit(&mut self, job: &OspreyJob) -> Result<u32, OspreySubmitError>;
}

/// Backend that accepts every job without executing anything.
///
/// Reports a syncpoint end of `syncpt_incrs` as if the counter started at
/// zero.
#[derive(Debug, Default)]
pub struct NullOspreyBackend;

impl NullOspreyBackend {
    pub fn new() -> Self {
        Self
    }
}

impl OspreySubmitBackend for NullOspreyBackend {
    fn submit(&mut self, job: &OspreyJob) -> Result<u32, OspreySubmitError> {
        Ok(job.syncpt_incrs)
    }
}

/// Backend that completes jobs immediately against a running syncpoint
/// counter and records what was submitted.
///
/// Supports scripting one submission failure, for unwind tests.
#[derive(Debug, Default)]
pub struct ImmediateOspreyBackend {
    syncpt_value: u32,
    submitted: Vec<OspreyJob>,
    fail_next: Option<OspreySubmitError>,
}

impl ImmediateOspreyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_syncpt_value(syncpt_value: u32) -> Self {
        Self {
            syncpt_value,
            ..Self::default()
        }
    }

    /// Current syncpoint counter value.
    pub fn syncpt_value(&self) -> u32 {
        self.syncpt_value
    }

    /// Jobs accepted so far, in submission order.
    pub fn submitted(&self) -> &[OspreyJob] {
        &self.submitted
    }

    /// Make the next `submit` call fail with `reason`.
    pub fn fail_next_submit(&mut self, reason: &str) {
        self.fail_next = Some(OspreySubmitError {
            reason: reason.to_owned(),
        });
    }
}

impl OspreySubmitBackend for ImmediateOspreyBackend {
    fn submit(&mut self, job: &OspreyJob) -> Result<u32, OspreySubmitError> {
        if let Some(err) = self.fail_next.take() {
            return Err(err);
        }
        self.syncpt_value = self.syncpt_value.wrapping_add(job.syncpt_incrs);
        self.submitted.push(job.clone());
        Ok(self.syncpt_value)
    }
}

/// Pinner that hands out arithmetic device addresses and records every pin
/// and unpin, for rollback tests.
#[derive(Debug, Default)]
pub struct RecordingPinner {
    fail_nth: Option<usize>,
    pins: Vec<OspreyMemHandle>,
    unpins: Vec<OspreyMemHandle>,
    held: Vec<OspreyMemHandle>,
}

impl RecordingPinner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the Nth `pin` call (zero-based) fail.
    pub fn fail_nth_pin(&mut self, n: usize) {
        self.fail_nth = Some(n);
    }

    /// Every successful pin, in acquisition order.
    pub fn pins(&self) -> &[OspreyMemHandle] {
        &self.pins
    }

    /// Every unpin, in release order.
    pub fn unpins(&self) -> &[OspreyMemHandle] {
        &self.unpins
    }

    /// Handles currently held pinned.
    pub fn held(&self) -> &[OspreyMemHandle] {
        &self.held
    }
}

impl OspreyPinner for RecordingPinner {
    fn pin(&mut self, handle: OspreyMemHandle) -> Result<OspreyDeviceAddr, OspreyPinError> {
        if self.fail_nth == Some(self.pins.len()) {
            return Err(OspreyPinError {
                reason: format!("scripted pin failure for {handle}"),
            });
        }
        self.pins.push(handle);
        self.held.push(handle);
        Ok(OspreyDeviceAddr(u64::from(handle.0) << 12))
    }

    fn unpin(&mut self, handle: OspreyMemHandle) {
        self.unpins.push(handle);
        if let Some(pos) = self.held.iter().rposition(|held| *held == handle) {
            self.held.remove(pos);
        }
    }
}
