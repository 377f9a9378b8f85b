//! Channel context: streaming record assembly, submission guard and the
//! flush sequencer.
//!
//! The write path mirrors the wire contract exactly: while a submission is
//! idle the next bytes are a header; afterwards bytes are consumed as the
//! record kind the pending counts expect, one whole record at a time (wait
//! checks batch), stalling on a partial record until the producer supplies
//! the rest. A source fault or malformed header abandons the submission and
//! resets the channel to idle.
//!
//! Flushing a fully assembled submission pins every referenced buffer,
//! applies the injected debug overrides, then hands the job to the submit
//! backend. Failures release every pin acquired during this flush before
//! they surface.

use osprey_protocol::{
    OspreyCmdbuf, OspreyReloc, OspreyRelocShift, OspreySubmitHdr, OspreySubmitHdrExt,
    OspreySubmitHeader, OspreyWaitchk, OSPREY_SUBMIT_VERSION_MAX_SUPPORTED,
};
use tracing::{debug, trace, warn};

use crate::backend::{OspreyPinner, OspreySubmitBackend};
use crate::device::OspreyDeviceInfo;
use crate::error::{OspreyChannelError, ProtocolViolation, Result};
use crate::job::{OspreyJob, OspreyMemHandle, OspreyPriority};
use crate::source::{SliceSource, SubmitSource};
use crate::state::{PendingCounts, RecordKind, SubmitPhase};

/// Fault-injection hooks applied at flush, keyed by client id and channel
/// index. Always passed explicitly; the core never consults ambient state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OspreyDebugOverrides {
    /// Clients whose flushes run as null kickoffs.
    pub null_kickoff_clients: Vec<u32>,
    /// Forced job timeouts for specific (client, channel) pairs.
    pub timeout_overrides: Vec<TimeoutOverride>,
}

/// Forces `timeout_ms` onto jobs flushed by `client_id` on the channel with
/// index `channel_index`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeoutOverride {
    pub client_id: u32,
    pub channel_index: u32,
    pub timeout_ms: u32,
}

impl OspreyDebugOverrides {
    fn forces_null_kickoff(&self, client_id: u32) -> bool {
        self.null_kickoff_clients.contains(&client_id)
    }

    fn forced_timeout(&self, client_id: u32, channel_index: u32) -> Option<u32> {
        self.timeout_overrides
            .iter()
            .find(|o| o.client_id == client_id && o.channel_index == channel_index)
            .map(|o| o.timeout_ms)
    }
}

/// One open submission channel.
///
/// A handle belongs to a single submitting actor at a time: every operation
/// takes `&mut self`, so interleaving a second producer onto the same handle
/// requires an external lock held across its whole stream-then-flush
/// sequence. Dropping the handle abandons any in-progress submission.
#[derive(Debug)]
pub struct OspreyChannel {
    info: OspreyDeviceInfo,
    client_id: u32,
    phase: SubmitPhase,
    job: OspreyJob,
    timeout_ms: u32,
    priority: OspreyPriority,
}

fn release_pins(pinner: &mut dyn OspreyPinner, pinned: &[OspreyMemHandle]) {
    for handle in pinned.iter().rev() {
        pinner.unpin(*handle);
    }
}

impl OspreyChannel {
    pub(crate) fn new(info: OspreyDeviceInfo, client_id: u32) -> Self {
        let priority = OspreyPriority::default();
        let timeout_ms = info.default_timeout_ms;
        Self {
            job: OspreyJob::new(client_id, priority, timeout_ms),
            info,
            client_id,
            phase: SubmitPhase::Idle,
            timeout_ms,
            priority,
        }
    }

    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    pub fn info(&self) -> &OspreyDeviceInfo {
        &self.info
    }

    pub fn phase(&self) -> SubmitPhase {
        self.phase
    }

    /// The channel's job descriptor. Between a successful flush and the next
    /// accepted header this still carries the last recorded syncpoint end.
    pub fn job(&self) -> &OspreyJob {
        &self.job
    }

    /// Mask of syncpoints the underlying engine may signal.
    pub fn syncpoints(&self) -> u32 {
        self.info.syncpts
    }

    /// Mask of wait bases backing the engine's syncpoints.
    pub fn wait_bases(&self) -> u32 {
        self.info.waitbases
    }

    /// Mask of module mutexes the engine can take.
    pub fn mod_mutexes(&self) -> u32 {
        self.info.modmutexes
    }

    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    /// Set the timeout copied into subsequently accepted headers; 0 disables
    /// the watchdog for those jobs. The staged job, if any, is unaffected.
    pub fn set_timeout(&mut self, timeout_ms: u32) {
        debug!(client = self.client_id, timeout_ms, "channel timeout set");
        self.timeout_ms = timeout_ms;
    }

    pub fn priority(&self) -> OspreyPriority {
        self.priority
    }

    /// Set the priority copied into subsequently accepted headers.
    pub fn set_priority(&mut self, priority: OspreyPriority) {
        self.priority = priority;
    }

    /// Abandon any in-progress submission: counters zeroed, staged records
    /// dropped, channel metadata kept.
    pub fn reset_submission(&mut self) {
        self.phase = SubmitPhase::Idle;
        self.job.reset_sequences();
    }

    /// Accept a submit header, seeding the job descriptor and the pending
    /// record counts.
    ///
    /// Rejected out of sync while records of a previous header are
    /// outstanding (which also abandons that submission). Accepting a header
    /// while a fully assembled submission is staged replaces it.
    pub fn begin_submit(&mut self, header: OspreySubmitHeader) -> Result<()> {
        if !self.phase.accepts_header() {
            warn!(
                client = self.client_id,
                channel = self.info.index,
                "channel submit out of sync"
            );
            self.reset_submission();
            return Err(OspreyChannelError::protocol(ProtocolViolation::OutOfSync));
        }

        let hdr = header.to_ext();
        if hdr.submit_version > OSPREY_SUBMIT_VERSION_MAX_SUPPORTED {
            warn!(
                client = self.client_id,
                requested = hdr.submit_version,
                max = OSPREY_SUBMIT_VERSION_MAX_SUPPORTED,
                "submit version not supported"
            );
            return Err(OspreyChannelError::UnsupportedVersion {
                requested: hdr.submit_version,
                max: OSPREY_SUBMIT_VERSION_MAX_SUPPORTED,
            });
        }

        if hdr.num_cmdbufs == 0 {
            self.reset_submission();
            return Err(OspreyChannelError::protocol(
                ProtocolViolation::EmptySubmission,
            ));
        }

        if let Err(err) = self.job.begin(&hdr, self.timeout_ms, self.priority) {
            self.phase = SubmitPhase::Idle;
            return Err(err);
        }

        self.phase = SubmitPhase::Collecting(PendingCounts::from_header(&hdr));
        debug!(
            client = self.client_id,
            version = hdr.submit_version,
            cmdbufs = hdr.num_cmdbufs,
            relocs = hdr.num_relocs,
            waitchks = hdr.num_waitchks,
            syncpt_id = hdr.syncpt_id,
            syncpt_incrs = hdr.syncpt_incrs,
            "submit header accepted"
        );
        Ok(())
    }

    /// Typed extended-header submission (the out-of-band submit operation).
    pub fn begin_submit_ext(&mut self, hdr: OspreySubmitHdrExt) -> Result<()> {
        self.begin_submit(OspreySubmitHeader::Ext(hdr))
    }

    /// Stream submission bytes from a slice. See [`Self::write_stream`].
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        self.write_stream(&SliceSource::new(bytes))
    }

    /// Consume as many whole records from `src` as the submission state
    /// allows and return the number of bytes consumed.
    ///
    /// A partial trailing record is left unconsumed; the producer resubmits
    /// those bytes (and the rest of the stream) in a later call. A source
    /// fault or a rejected header abandons the in-progress submission and
    /// surfaces the error instead of a byte count.
    pub fn write_stream(&mut self, src: &dyn SubmitSource) -> Result<usize> {
        let total = src.len();
        let mut offset = 0usize;

        while offset < total {
            let remaining = total - offset;
            match self.phase {
                SubmitPhase::Idle | SubmitPhase::Ready => {
                    if remaining < OspreySubmitHdr::SIZE_BYTES {
                        break;
                    }
                    let mut raw = [0u8; OspreySubmitHdr::SIZE_BYTES];
                    self.pull(src, offset, &mut raw)?;
                    let hdr = OspreySubmitHdr::decode_from_le_bytes(&raw).unwrap();
                    self.begin_submit(OspreySubmitHeader::Legacy(hdr))?;
                    offset += OspreySubmitHdr::SIZE_BYTES;
                }
                SubmitPhase::Collecting(counts) => {
                    let Some(kind) = counts.expected() else {
                        self.phase = SubmitPhase::Ready;
                        continue;
                    };
                    if remaining < kind.size_bytes() {
                        break;
                    }

                    let mut counts = counts;
                    match kind {
                        RecordKind::Cmdbuf => {
                            let mut raw = [0u8; OspreyCmdbuf::SIZE_BYTES];
                            self.pull(src, offset, &mut raw)?;
                            let cmdbuf = OspreyCmdbuf::decode_from_le_bytes(&raw).unwrap();
                            trace!(
                                client = self.client_id,
                                handle = cmdbuf.handle,
                                words = cmdbuf.words,
                                offset = cmdbuf.offset,
                                "cmdbuf record"
                            );
                            self.job.append_gather(
                                OspreyMemHandle(cmdbuf.handle),
                                cmdbuf.words,
                                cmdbuf.offset,
                            );
                            counts.cmdbufs -= 1;
                            offset += OspreyCmdbuf::SIZE_BYTES;
                        }
                        RecordKind::Reloc => {
                            let mut raw = [0u8; OspreyReloc::SIZE_BYTES];
                            self.pull(src, offset, &mut raw)?;
                            let reloc = OspreyReloc::decode_from_le_bytes(&raw).unwrap();
                            trace!(client = self.client_id, "reloc record");
                            self.job.append_pin(&reloc);
                            counts.relocs -= 1;
                            offset += OspreyReloc::SIZE_BYTES;
                        }
                        RecordKind::Waitchk => {
                            let whole = remaining / OspreyWaitchk::SIZE_BYTES;
                            let batch_len = whole.min(counts.waitchks as usize);
                            let mut batch = Vec::with_capacity(batch_len);
                            for n in 0..batch_len {
                                let mut raw = [0u8; OspreyWaitchk::SIZE_BYTES];
                                self.pull(src, offset + n * OspreyWaitchk::SIZE_BYTES, &mut raw)?;
                                batch.push(OspreyWaitchk::decode_from_le_bytes(&raw).unwrap());
                            }
                            trace!(
                                client = self.client_id,
                                count = batch_len,
                                mask = self.job.waitchk_mask,
                                "waitchk batch"
                            );
                            self.job.append_waitchks(&batch);
                            counts.waitchks -= batch_len as u32;
                            offset += batch_len * OspreyWaitchk::SIZE_BYTES;
                        }
                        RecordKind::RelocShift => {
                            let mut raw = [0u8; OspreyRelocShift::SIZE_BYTES];
                            self.pull(src, offset, &mut raw)?;
                            let record = OspreyRelocShift::decode_from_le_bytes(&raw).unwrap();
                            // The shift phase runs only after every reloc
                            // arrived, so this index is always in range.
                            let slot = self.job.num_pins() - counts.reloc_shifts as usize;
                            self.job.resolve_pin_shift(slot, record.shift);
                            counts.reloc_shifts -= 1;
                            offset += OspreyRelocShift::SIZE_BYTES;
                        }
                    }

                    self.phase = if counts.is_drained() {
                        SubmitPhase::Ready
                    } else {
                        SubmitPhase::Collecting(counts)
                    };
                }
            }
        }

        Ok(offset)
    }

    fn pull(&mut self, src: &dyn SubmitSource, offset: usize, dst: &mut [u8]) -> Result<()> {
        if let Err(fault) = src.read(offset, dst) {
            warn!(
                client = self.client_id,
                channel = self.info.index,
                offset,
                "submit stream fault"
            );
            self.reset_submission();
            return Err(OspreyChannelError::TruncatedInput { offset, fault });
        }
        Ok(())
    }

    /// Flush the staged submission. See [`Self::flush_null_kickoff`] for the
    /// forced-null variant.
    ///
    /// Pins every buffer the job references, applies `overrides`, submits
    /// through `backend` and returns the job's syncpoint-end value, which is
    /// also recorded on the job descriptor. Regardless of outcome the
    /// channel returns to idle, ready for a new header; on failure every pin
    /// acquired by this flush has been released.
    pub fn flush(
        &mut self,
        pinner: &mut dyn OspreyPinner,
        backend: &mut dyn OspreySubmitBackend,
        overrides: &OspreyDebugOverrides,
    ) -> Result<u32> {
        self.flush_inner(pinner, backend, overrides, false)
    }

    /// Flush with null kickoff forced: the device goes through submission
    /// bookkeeping without executing the gathers.
    pub fn flush_null_kickoff(
        &mut self,
        pinner: &mut dyn OspreyPinner,
        backend: &mut dyn OspreySubmitBackend,
        overrides: &OspreyDebugOverrides,
    ) -> Result<u32> {
        self.flush_inner(pinner, backend, overrides, true)
    }

    fn flush_inner(
        &mut self,
        pinner: &mut dyn OspreyPinner,
        backend: &mut dyn OspreySubmitBackend,
        overrides: &OspreyDebugOverrides,
        force_null_kickoff: bool,
    ) -> Result<u32> {
        debug!(
            client = self.client_id,
            channel = self.info.index,
            "channel flush"
        );

        match self.phase {
            SubmitPhase::Collecting(_) => {
                warn!(
                    client = self.client_id,
                    channel = self.info.index,
                    "channel submit out of sync"
                );
                self.reset_submission();
                return Err(OspreyChannelError::protocol(ProtocolViolation::OutOfSync));
            }
            SubmitPhase::Idle => {
                return Err(OspreyChannelError::protocol(
                    ProtocolViolation::NothingStaged,
                ));
            }
            SubmitPhase::Ready => {}
        }

        let mut pinned: Vec<OspreyMemHandle> = Vec::new();
        for handle in self.job.referenced_handles() {
            match pinner.pin(handle) {
                Ok(_) => pinned.push(handle),
                Err(source) => {
                    warn!(
                        client = self.client_id,
                        %handle,
                        error = %source,
                        "buffer pin failed"
                    );
                    release_pins(pinner, &pinned);
                    self.reset_submission();
                    return Err(OspreyChannelError::PinFailure { handle, source });
                }
            }
        }

        let null_kickoff = force_null_kickoff || overrides.forces_null_kickoff(self.client_id);
        if null_kickoff {
            debug!(client = self.client_id, "null kickoff");
        }
        self.job.null_kickoff = null_kickoff;
        if let Some(timeout_ms) = overrides.forced_timeout(self.client_id, self.info.index) {
            debug!(
                client = self.client_id,
                channel = self.info.index,
                timeout_ms,
                "forced timeout override"
            );
            self.job.timeout_ms = timeout_ms;
        }

        match backend.submit(&self.job) {
            Ok(syncpt_end) => {
                self.job.syncpt_end = Some(syncpt_end);
                self.reset_submission();
                Ok(syncpt_end)
            }
            Err(source) => {
                warn!(
                    client = self.client_id,
                    error = %source,
                    "device submission failed"
                );
                release_pins(pinner, &pinned);
                self.reset_submission();
                Err(OspreyChannelError::SubmitFailure { source })
            }
        }
    }
}
