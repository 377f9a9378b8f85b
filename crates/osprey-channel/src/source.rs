//! Caller-supplied submit byte source.
//!
//! Mirrors the copy-in surface of a user write: the channel pulls whole
//! records out of the source, and a source may fail to deliver (the
//! producer's buffer became unreadable mid-write). Tests inject faulting
//! sources to exercise that path.

use core::fmt;

/// Failure to deliver requested bytes from a submit source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceFault {
    pub offset: usize,
    pub len: usize,
}

impl fmt::Display for SourceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "submit source could not supply bytes: offset=0x{:x}, len=0x{:x}",
            self.offset, self.len
        )
    }
}

impl std::error::Error for SourceFault {}

/// Minimal submit-stream source interface.
///
/// Offsets are relative to the start of the current write call. The channel
/// only requests ranges inside `0..len()`.
pub trait SubmitSource {
    /// Total bytes this write supplies.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `dst.len()` bytes starting at `offset` into `dst`.
    fn read(&self, offset: usize, dst: &mut [u8]) -> Result<(), SourceFault>;
}

/// Slice-backed source for in-process producers.
#[derive(Clone, Copy, Debug)]
pub struct SliceSource<'a> {
    bytes: &'a [u8],
}

impl<'a> SliceSource<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }
}

impl SubmitSource for SliceSource<'_> {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, offset: usize, dst: &mut [u8]) -> Result<(), SourceFault> {
        let end = offset.checked_add(dst.len()).ok_or(SourceFault {
            offset,
            len: dst.len(),
        })?;
        let src = self.bytes.get(offset..end).ok_or(SourceFault {
            offset,
            len: dst.len(),
        })?;
        dst.copy_from_slice(src);
        Ok(())
    }
}
