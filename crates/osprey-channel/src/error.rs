//! Channel submission error taxonomy.
//!
//! Every failure on the submission path is a returned error, never a panic.
//! Parse-level failures additionally reset the channel's in-progress
//! submission state before they surface; pin and submit failures release the
//! resources acquired up to the failure point.

use std::fmt;

use thiserror::Error;

use crate::backend::{OspreyPinError, OspreySubmitError};
use crate::job::OspreyMemHandle;
use crate::source::SourceFault;

pub type Result<T> = std::result::Result<T, OspreyChannelError>;

/// The specific protocol rule a submission broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// A new header or a flush arrived while declared records of the
    /// previous submission were still outstanding.
    OutOfSync,
    /// Flush with no fully assembled submission staged.
    NothingStaged,
    /// The header declared zero command buffers.
    EmptySubmission,
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfSync => write!(f, "channel submit out of sync"),
            Self::NothingStaged => write!(f, "flush with no submission staged"),
            Self::EmptySubmission => write!(f, "submit declares no command buffers"),
        }
    }
}

/// Errors surfaced by channel submission operations.
#[derive(Debug, Error)]
pub enum OspreyChannelError {
    #[error("submission protocol violation: {violation}")]
    Protocol { violation: ProtocolViolation },

    #[error("submit version {requested} > max supported {max}")]
    UnsupportedVersion { requested: u32, max: u32 },

    /// The caller-supplied byte source could not deliver a record's bytes.
    #[error("submit stream fault at byte {offset} of write")]
    TruncatedInput {
        offset: usize,
        #[source]
        fault: SourceFault,
    },

    #[error("failed to pin buffer {handle}")]
    PinFailure {
        handle: OspreyMemHandle,
        #[source]
        source: OspreyPinError,
    },

    #[error("device rejected job")]
    SubmitFailure {
        #[source]
        source: OspreySubmitError,
    },

    /// Job descriptor growth could not be satisfied (reservation failure or
    /// a declared count above the per-kind cap).
    #[error("job descriptor growth to {bytes} bytes failed")]
    OutOfMemory { bytes: usize },
}

impl OspreyChannelError {
    pub(crate) fn protocol(violation: ProtocolViolation) -> Self {
        Self::Protocol { violation }
    }
}
