//! Device descriptor and channel creation.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::channel::OspreyChannel;

/// Static description of one accelerator engine exposed through a channel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OspreyDeviceInfo {
    /// Channel index on the host.
    pub index: u32,
    pub name: String,
    /// Mask of syncpoints the engine may signal.
    pub syncpts: u32,
    /// Mask of wait bases backing those syncpoints.
    pub waitbases: u32,
    /// Mask of module mutexes the engine can take.
    pub modmutexes: u32,
    /// Timeout seeded into newly opened channels, in milliseconds; 0 means
    /// no timeout.
    pub default_timeout_ms: u32,
}

/// One accelerator engine. Owns the client-id counter its channels draw
/// from, so ids stay unique across concurrently opened handles.
#[derive(Debug)]
pub struct OspreyDevice {
    info: OspreyDeviceInfo,
    next_client_id: AtomicU32,
}

impl OspreyDevice {
    pub fn new(info: OspreyDeviceInfo) -> Self {
        Self {
            info,
            next_client_id: AtomicU32::new(0),
        }
    }

    pub fn info(&self) -> &OspreyDeviceInfo {
        &self.info
    }

    /// Open a submission channel: empty job descriptor, medium priority,
    /// the device's default timeout and a fresh client id.
    pub fn open_channel(&self) -> OspreyChannel {
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed) + 1;
        OspreyChannel::new(self.info.clone(), client_id)
    }
}
