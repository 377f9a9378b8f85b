//! Wire ABI for the Osprey channel submit stream.
//!
//! A submission is streamed into a channel as a sequence of fixed-size
//! little-endian records: one submit header followed by the command-buffer,
//! relocation, wait-check and (for newer submit versions) relocation-shift
//! records the header declares. Field order and record sizes are ABI shared
//! with guest userspace; do not reorder or resize fields without bumping the
//! submit version.
//!
//! This crate only defines the byte layout. Stream assembly, ordering rules
//! and submission state live in `osprey-channel`.

#![forbid(unsafe_code)]

mod submit;
mod writer;

pub use submit::*;
pub use writer::OspreySubmitWriter;
