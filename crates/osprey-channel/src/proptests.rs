use proptest::prelude::*;
use proptest::test_runner::{TestCaseError, TestCaseResult};

use osprey_protocol::{
    OspreyCmdbuf, OspreyReloc, OspreyRelocShift, OspreySubmitHdr, OspreySubmitHdrExt,
    OspreySubmitWriter, OspreyWaitchk, OSPREY_SUBMIT_VERSION_V2,
};

use crate::backend::{ImmediateOspreyBackend, RecordingPinner};
use crate::channel::{OspreyChannel, OspreyDebugOverrides};
use crate::device::{OspreyDevice, OspreyDeviceInfo};
use crate::job::OspreyJob;
use crate::state::SubmitPhase;

const MAX_RECORDS_PER_KIND: u32 = 8;
const MAX_CHUNKS: usize = 16;

/// One randomly shaped submission: header counts plus the record payloads a
/// well-formed producer would stream for them.
#[derive(Debug, Clone)]
struct Submission {
    num_cmdbufs: u32,
    num_relocs: u32,
    num_waitchks: u32,
    extended_v2: bool,
}

fn submission_strategy() -> impl Strategy<Value = Submission> {
    (
        1u32..=MAX_RECORDS_PER_KIND,
        0u32..=MAX_RECORDS_PER_KIND,
        0u32..=MAX_RECORDS_PER_KIND,
        any::<bool>(),
    )
        .prop_map(|(num_cmdbufs, num_relocs, num_waitchks, extended_v2)| Submission {
            num_cmdbufs,
            num_relocs,
            num_waitchks,
            extended_v2,
        })
}

/// Split points partitioning a stream of `len` bytes into 1..=MAX_CHUNKS
/// chunks at arbitrary byte boundaries.
fn chunk_splits_strategy(len: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0..=len, 0..MAX_CHUNKS).prop_map(move |mut cuts| {
        cuts.sort_unstable();
        cuts.dedup();
        cuts
    })
}

fn test_channel() -> OspreyChannel {
    OspreyDevice::new(OspreyDeviceInfo {
        index: 1,
        name: "osprey-gr".to_owned(),
        syncpts: 0xffff_ffff,
        ..OspreyDeviceInfo::default()
    })
    .open_channel()
}

fn header_for(sub: &Submission) -> OspreySubmitHdr {
    OspreySubmitHdr {
        syncpt_id: 3,
        syncpt_incrs: 1,
        num_cmdbufs: sub.num_cmdbufs,
        num_relocs: sub.num_relocs,
        num_waitchks: sub.num_waitchks,
        waitchk_mask: 1 << 3,
    }
}

/// The exact record payload bytes for `sub`, excluding any legacy header.
fn payload_bytes(sub: &Submission) -> Vec<u8> {
    let mut w = OspreySubmitWriter::new();
    for n in 0..sub.num_cmdbufs {
        w.push_cmdbuf(OspreyCmdbuf {
            handle: 0x100 + n,
            offset: 4 * n,
            words: 8 + n,
        });
    }
    for n in 0..sub.num_relocs {
        w.push_reloc(OspreyReloc {
            cmdbuf_handle: 0x100,
            cmdbuf_offset: 8 * n,
            target_handle: 0x200 + n,
            target_offset: n,
        });
    }
    for n in 0..sub.num_waitchks {
        w.push_waitchk(OspreyWaitchk {
            handle: 0x300,
            offset: 4 * n,
            syncpt_id: 3,
            thresh: 10 + n,
        });
    }
    if sub.extended_v2 {
        for n in 0..sub.num_relocs {
            w.push_reloc_shift(OspreyRelocShift { shift: n });
        }
    }
    w.into_bytes()
}

/// Drive `bytes` through the channel split at `cuts`, re-offering the
/// unconsumed tail of each chunk together with the next one, the way a
/// producer retries a short write.
fn feed_chunked(ch: &mut OspreyChannel, bytes: &[u8], cuts: &[usize]) -> TestCaseResult {
    let total = bytes.len();
    let mut consumed = 0usize;
    for &cut in cuts.iter().chain(std::iter::once(&total)) {
        let cut = cut.min(total);
        if cut <= consumed {
            continue;
        }
        consumed += ch
            .write(&bytes[consumed..cut])
            .map_err(|e| TestCaseError::fail(format!("write failed: {e}")))?;
        prop_assert!(consumed <= cut);
    }
    // Everything offered so far plus a final full-tail write drains the
    // stream: nothing the producer wrote is ever silently dropped.
    consumed += ch
        .write(&bytes[consumed..])
        .map_err(|e| TestCaseError::fail(format!("final write failed: {e}")))?;
    prop_assert_eq!(consumed, bytes.len());
    Ok(())
}

fn stream_whole(sub: &Submission) -> (OspreyChannel, TestCaseResult) {
    let mut ch = test_channel();
    let res = stream_into(&mut ch, sub, &[]);
    (ch, res)
}

fn stream_into(ch: &mut OspreyChannel, sub: &Submission, cuts: &[usize]) -> TestCaseResult {
    if sub.extended_v2 {
        ch.begin_submit_ext(OspreySubmitHdrExt {
            syncpt_id: 3,
            syncpt_incrs: 1,
            num_cmdbufs: sub.num_cmdbufs,
            num_relocs: sub.num_relocs,
            num_waitchks: sub.num_waitchks,
            waitchk_mask: 1 << 3,
            submit_version: OSPREY_SUBMIT_VERSION_V2,
            num_reloc_shifts: sub.num_relocs,
        })
        .map_err(|e| TestCaseError::fail(format!("begin_submit_ext failed: {e}")))?;
        feed_chunked(ch, &payload_bytes(sub), cuts)
    } else {
        let mut bytes = header_for(sub).encode_to_le_bytes().to_vec();
        bytes.extend_from_slice(&payload_bytes(sub));
        feed_chunked(ch, &bytes, cuts)
    }
}

fn snapshot(job: &OspreyJob) -> (Vec<crate::OspreyGather>, Vec<crate::OspreyPinSlot>, Vec<crate::OspreyWaitCheck>) {
    (
        job.gathers().to_vec(),
        job.pins().to_vec(),
        job.waitchks().to_vec(),
    )
}

proptest! {
    /// Delivering a submission in arbitrarily split chunks assembles the
    /// same job as delivering it in one write.
    #[test]
    fn chunking_is_transparent(
        sub in submission_strategy(),
        cuts in chunk_splits_strategy(
            OspreySubmitHdrExt::SIZE_BYTES
                + MAX_RECORDS_PER_KIND as usize
                    * (OspreyCmdbuf::SIZE_BYTES
                        + OspreyReloc::SIZE_BYTES
                        + OspreyWaitchk::SIZE_BYTES
                        + OspreyRelocShift::SIZE_BYTES)
        ),
    ) {
        let (whole, res) = stream_whole(&sub);
        res?;

        let mut chunked = test_channel();
        stream_into(&mut chunked, &sub, &cuts)?;

        prop_assert_eq!(whole.phase(), SubmitPhase::Ready);
        prop_assert_eq!(chunked.phase(), SubmitPhase::Ready);
        prop_assert_eq!(snapshot(chunked.job()), snapshot(whole.job()));
    }

    /// The assembled sequence lengths always equal the header's declared
    /// counts, and a flush then succeeds.
    #[test]
    fn assembled_counts_match_declared(sub in submission_strategy()) {
        let (mut ch, res) = stream_whole(&sub);
        res?;

        prop_assert_eq!(ch.job().num_gathers() as u32, sub.num_cmdbufs);
        prop_assert_eq!(ch.job().num_pins() as u32, sub.num_relocs);
        prop_assert_eq!(ch.job().num_waitchks() as u32, sub.num_waitchks);
        for pin in ch.job().pins() {
            prop_assert_eq!(pin.shift.is_some(), sub.extended_v2);
        }

        let mut pinner = RecordingPinner::new();
        let mut backend = ImmediateOspreyBackend::new();
        let end = ch
            .flush(&mut pinner, &mut backend, &OspreyDebugOverrides::default())
            .map_err(|e| TestCaseError::fail(format!("flush failed: {e}")))?;
        prop_assert_eq!(end, backend.syncpt_value());
        prop_assert_eq!(backend.submitted().len(), 1);
        prop_assert_eq!(ch.phase(), SubmitPhase::Idle);
    }

    /// A pin failure at any position leaves zero pins held afterwards.
    #[test]
    fn pin_failure_never_leaks(sub in submission_strategy(), fail_nth in 0usize..24) {
        let (mut ch, res) = stream_whole(&sub);
        res?;
        let referenced = ch.job().referenced_handles().len();

        let mut pinner = RecordingPinner::new();
        pinner.fail_nth_pin(fail_nth);
        let mut backend = ImmediateOspreyBackend::new();
        let flush = ch.flush(&mut pinner, &mut backend, &OspreyDebugOverrides::default());

        if fail_nth < referenced {
            prop_assert!(flush.is_err());
            prop_assert_eq!(pinner.pins().len(), fail_nth);
            prop_assert!(backend.submitted().is_empty());
            // Every pin acquired before the failure was released.
            prop_assert!(pinner.held().is_empty());
        } else {
            prop_assert!(flush.is_ok());
            prop_assert_eq!(pinner.pins().len(), referenced);
        }
        prop_assert_eq!(ch.phase(), SubmitPhase::Idle);
    }
}
