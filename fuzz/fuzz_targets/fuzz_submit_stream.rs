#![no_main]

use arbitrary::Unstructured;
use libfuzzer_sys::fuzz_target;

use osprey_channel::{
    ImmediateOspreyBackend, OspreyDebugOverrides, OspreyDevice, OspreyDeviceInfo, RecordingPinner,
    SubmitPhase,
};
use osprey_protocol::OspreySubmitHdr;

const MAX_INPUT_LEN: usize = 8192;
const MAX_OPS: usize = 32;

// Arbitrary bytes split at arbitrary boundaries through the streaming write
// path, interleaved with flushes and synthesized headers with small counts
// (raw random headers mostly trip the count caps, so deeper phases need
// plausible ones). The channel must never panic, and any error must leave it
// idle and ready for a fresh submission.
fuzz_target!(|data: &[u8]| {
    let data = &data[..data.len().min(MAX_INPUT_LEN)];
    let mut u = Unstructured::new(data);

    let device = OspreyDevice::new(OspreyDeviceInfo {
        index: 0,
        name: "osprey-fuzz".to_owned(),
        syncpts: 0xffff_ffff,
        waitbases: 0xff,
        modmutexes: 0xf,
        default_timeout_ms: 1000,
    });
    let mut ch = device.open_channel();
    let mut pinner = RecordingPinner::new();
    let mut backend = ImmediateOspreyBackend::new();

    for _ in 0..MAX_OPS {
        if u.is_empty() {
            break;
        }
        match u.arbitrary::<u8>().unwrap_or(0) % 4 {
            0 => {
                // Plausible legacy header, maybe split across two writes.
                let hdr = OspreySubmitHdr {
                    syncpt_id: u.arbitrary::<u8>().unwrap_or(0) as u32,
                    syncpt_incrs: u.arbitrary::<u8>().unwrap_or(1) as u32,
                    num_cmdbufs: (u.arbitrary::<u8>().unwrap_or(1) % 8) as u32,
                    num_relocs: (u.arbitrary::<u8>().unwrap_or(0) % 8) as u32,
                    num_waitchks: (u.arbitrary::<u8>().unwrap_or(0) % 8) as u32,
                    waitchk_mask: u.arbitrary().unwrap_or(0),
                };
                let bytes = hdr.encode_to_le_bytes();
                let split = u.arbitrary::<u8>().unwrap_or(0) as usize % (bytes.len() + 1);
                let mut consumed = match ch.write(&bytes[..split]) {
                    Ok(n) => n,
                    Err(_) => {
                        assert_eq!(ch.phase(), SubmitPhase::Idle);
                        continue;
                    }
                };
                match ch.write(&bytes[consumed..]) {
                    Ok(n) => consumed += n,
                    Err(_) => {
                        assert_eq!(ch.phase(), SubmitPhase::Idle);
                        continue;
                    }
                }
                assert!(consumed <= bytes.len());
            }
            1 => {
                if u.arbitrary().unwrap_or(false) {
                    pinner.fail_nth_pin(
                        pinner.pins().len() + u.arbitrary::<u8>().unwrap_or(0) as usize % 8,
                    );
                }
                if ch
                    .flush(&mut pinner, &mut backend, &OspreyDebugOverrides::default())
                    .is_err()
                {
                    assert_eq!(ch.phase(), SubmitPhase::Idle);
                    assert!(pinner.held().is_empty() || !backend.submitted().is_empty());
                }
            }
            _ => {
                let len = u.arbitrary::<u16>().unwrap_or(0) as usize % 512;
                let chunk = u.bytes(len.min(u.len())).unwrap_or(&[]);
                match ch.write(chunk) {
                    Ok(consumed) => assert!(consumed <= chunk.len()),
                    Err(_) => assert_eq!(ch.phase(), SubmitPhase::Idle),
                }
            }
        }
    }
});
