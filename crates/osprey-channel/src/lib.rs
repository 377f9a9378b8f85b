//! Osprey channel submission core.
//!
//! This crate implements the host-side command-submission path for Osprey
//! compute channels, while keeping the abstraction boundary between:
//! - the channel side (streamed submit records, job assembly, submission
//!   state), and
//! - the device side (buffer pinning and job execution), reached only
//!   through the [`backend`] collaborator traits.
//!
//! A producer opens a channel on an [`device::OspreyDevice`], streams a
//! submit header plus its declared records through [`channel::OspreyChannel`]
//! in chunks of any size, then flushes. The flush pins every referenced
//! buffer, hands the assembled [`job::OspreyJob`] to the submit backend and
//! returns the job's syncpoint-end value; any failure unwinds the pins it
//! acquired. Register access, syncpoint arithmetic and channel scheduling
//! live outside this crate.
#![forbid(unsafe_code)]

pub mod backend;
pub mod channel;
pub mod device;
pub mod error;
pub mod job;
pub mod source;
pub mod state;

#[cfg(test)]
mod proptests;

pub use backend::{
    ImmediateOspreyBackend, NullOspreyBackend, OspreyDeviceAddr, OspreyPinError, OspreyPinner,
    OspreySubmitBackend, OspreySubmitError, RecordingPinner,
};
pub use channel::{OspreyChannel, OspreyDebugOverrides, TimeoutOverride};
pub use device::{OspreyDevice, OspreyDeviceInfo};
pub use error::{OspreyChannelError, ProtocolViolation};
pub use job::{
    OspreyGather, OspreyJob, OspreyMemHandle, OspreyPinSlot, OspreyPriority, OspreyWaitCheck,
};
pub use source::{SliceSource, SourceFault, SubmitSource};
pub use state::{PendingCounts, RecordKind, SubmitPhase};
