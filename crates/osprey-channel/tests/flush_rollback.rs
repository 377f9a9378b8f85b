//! Flush failure unwinding and the injected debug overrides.

use osprey_channel::{
    ImmediateOspreyBackend, OspreyChannel, OspreyChannelError, OspreyDebugOverrides, OspreyDevice,
    OspreyDeviceInfo, OspreyMemHandle, RecordingPinner, SubmitPhase, TimeoutOverride,
};
use osprey_protocol::{OspreyCmdbuf, OspreyReloc, OspreySubmitHdr, OspreySubmitWriter};
use pretty_assertions::assert_eq;

const CHANNEL_INDEX: u32 = 5;

fn staged_channel(num_relocs: u32) -> OspreyChannel {
    let mut ch = OspreyDevice::new(OspreyDeviceInfo {
        index: CHANNEL_INDEX,
        name: "osprey-gr3d".to_owned(),
        default_timeout_ms: 1000,
        ..OspreyDeviceInfo::default()
    })
    .open_channel();

    let mut w = OspreySubmitWriter::new();
    w.push_header(OspreySubmitHdr {
        syncpt_id: 9,
        syncpt_incrs: 1,
        num_cmdbufs: 2,
        num_relocs,
        num_waitchks: 0,
        waitchk_mask: 0,
    });
    w.push_cmdbuf(OspreyCmdbuf {
        handle: 0x11,
        offset: 0,
        words: 8,
    });
    w.push_cmdbuf(OspreyCmdbuf {
        handle: 0x12,
        offset: 0,
        words: 8,
    });
    for n in 0..num_relocs {
        w.push_reloc(OspreyReloc {
            cmdbuf_handle: 0x11,
            cmdbuf_offset: 4 * n,
            target_handle: 0x20 + n,
            target_offset: 0,
        });
    }
    assert_eq!(ch.write(w.as_bytes()).unwrap(), w.len());
    assert_eq!(ch.phase(), SubmitPhase::Ready);
    ch
}

#[test]
fn pin_failure_releases_exactly_the_acquired_prefix() {
    // References, in pin order: 0x11, 0x12, 0x20, 0x21, 0x22.
    let mut ch = staged_channel(3);
    let mut pinner = RecordingPinner::new();
    pinner.fail_nth_pin(3);
    let mut backend = ImmediateOspreyBackend::new();

    let err = ch
        .flush(&mut pinner, &mut backend, &OspreyDebugOverrides::default())
        .unwrap_err();
    let OspreyChannelError::PinFailure { handle, .. } = err else {
        panic!("expected PinFailure, got {err:?}");
    };
    assert_eq!(handle, OspreyMemHandle(0x21));

    // The three pins acquired before the failure were released, newest
    // first, and nothing reached the device.
    assert_eq!(
        pinner.pins(),
        &[
            OspreyMemHandle(0x11),
            OspreyMemHandle(0x12),
            OspreyMemHandle(0x20)
        ]
    );
    assert_eq!(
        pinner.unpins(),
        &[
            OspreyMemHandle(0x20),
            OspreyMemHandle(0x12),
            OspreyMemHandle(0x11)
        ]
    );
    assert!(pinner.held().is_empty());
    assert!(backend.submitted().is_empty());
    assert_eq!(ch.phase(), SubmitPhase::Idle);
}

#[test]
fn duplicate_handles_are_pinned_once() {
    // The reloc's cmdbuf handle 0x11 is already referenced by a gather.
    let mut ch = staged_channel(1);
    let mut pinner = RecordingPinner::new();
    let mut backend = ImmediateOspreyBackend::new();

    ch.flush(&mut pinner, &mut backend, &OspreyDebugOverrides::default())
        .unwrap();
    assert_eq!(
        pinner.pins(),
        &[
            OspreyMemHandle(0x11),
            OspreyMemHandle(0x12),
            OspreyMemHandle(0x20)
        ]
    );
}

#[test]
fn submit_failure_unpins_everything() {
    let mut ch = staged_channel(0);
    let mut pinner = RecordingPinner::new();
    let mut backend = ImmediateOspreyBackend::new();
    backend.fail_next_submit("no free queue slot");

    let err = ch
        .flush(&mut pinner, &mut backend, &OspreyDebugOverrides::default())
        .unwrap_err();
    assert!(matches!(err, OspreyChannelError::SubmitFailure { .. }));
    assert!(pinner.held().is_empty());
    assert_eq!(ch.job().syncpt_end, None);
    assert_eq!(ch.phase(), SubmitPhase::Idle);

    // The same submission streamed again goes through once the device
    // recovers.
    let mut retry = staged_channel(0);
    assert!(retry
        .flush(&mut pinner, &mut backend, &OspreyDebugOverrides::default())
        .is_ok());
}

#[test]
fn timeout_override_applies_to_the_flushed_job() {
    let mut ch = staged_channel(0);
    let overrides = OspreyDebugOverrides {
        null_kickoff_clients: Vec::new(),
        timeout_overrides: vec![TimeoutOverride {
            client_id: ch.client_id(),
            channel_index: CHANNEL_INDEX,
            timeout_ms: 7,
        }],
    };

    let mut pinner = RecordingPinner::new();
    let mut backend = ImmediateOspreyBackend::new();
    ch.flush(&mut pinner, &mut backend, &overrides).unwrap();
    assert_eq!(backend.submitted()[0].timeout_ms, 7);
    // The channel's own configuration is untouched.
    assert_eq!(ch.timeout_ms(), 1000);
}

#[test]
fn timeout_override_for_another_channel_is_ignored() {
    let mut ch = staged_channel(0);
    let overrides = OspreyDebugOverrides {
        null_kickoff_clients: Vec::new(),
        timeout_overrides: vec![TimeoutOverride {
            client_id: ch.client_id(),
            channel_index: CHANNEL_INDEX + 1,
            timeout_ms: 7,
        }],
    };

    let mut pinner = RecordingPinner::new();
    let mut backend = ImmediateOspreyBackend::new();
    ch.flush(&mut pinner, &mut backend, &overrides).unwrap();
    assert_eq!(backend.submitted()[0].timeout_ms, 1000);
}

#[test]
fn null_kickoff_override_marks_the_job() {
    let mut ch = staged_channel(0);
    let overrides = OspreyDebugOverrides {
        null_kickoff_clients: vec![ch.client_id()],
        timeout_overrides: Vec::new(),
    };

    let mut pinner = RecordingPinner::new();
    let mut backend = ImmediateOspreyBackend::new();
    ch.flush(&mut pinner, &mut backend, &overrides).unwrap();
    assert!(backend.submitted()[0].null_kickoff);
}

#[test]
fn forced_null_kickoff_flush_needs_no_override() {
    let mut ch = staged_channel(0);
    let mut pinner = RecordingPinner::new();
    let mut backend = ImmediateOspreyBackend::new();

    ch.flush_null_kickoff(&mut pinner, &mut backend, &OspreyDebugOverrides::default())
        .unwrap();
    assert!(backend.submitted()[0].null_kickoff);
}
