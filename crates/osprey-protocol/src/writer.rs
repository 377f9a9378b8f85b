//! Host-side submit-stream builder.
//!
//! Produces the exact byte sequence a guest producer would write into a
//! channel, so tests and tooling can drive the real parse path. The writer
//! appends records verbatim; it does not check that the stream matches the
//! header's declared counts.

use crate::{OspreyCmdbuf, OspreyReloc, OspreyRelocShift, OspreySubmitHdr, OspreyWaitchk};

#[derive(Debug, Default)]
pub struct OspreySubmitWriter {
    buf: Vec<u8>,
}

impl OspreySubmitWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn push_header(&mut self, hdr: OspreySubmitHdr) {
        self.buf.extend_from_slice(&hdr.encode_to_le_bytes());
    }

    pub fn push_cmdbuf(&mut self, cmdbuf: OspreyCmdbuf) {
        self.buf.extend_from_slice(&cmdbuf.encode_to_le_bytes());
    }

    pub fn push_reloc(&mut self, reloc: OspreyReloc) {
        self.buf.extend_from_slice(&reloc.encode_to_le_bytes());
    }

    pub fn push_waitchk(&mut self, waitchk: OspreyWaitchk) {
        self.buf.extend_from_slice(&waitchk.encode_to_le_bytes());
    }

    pub fn push_reloc_shift(&mut self, shift: OspreyRelocShift) {
        self.buf.extend_from_slice(&shift.encode_to_le_bytes());
    }

    /// Raw bytes escape hatch for malformed-stream tests.
    pub fn push_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OspreyRelocShift;
    use pretty_assertions::assert_eq;

    #[test]
    fn writer_concatenates_records_in_push_order() {
        let mut w = OspreySubmitWriter::new();
        w.push_header(OspreySubmitHdr {
            syncpt_id: 4,
            syncpt_incrs: 1,
            num_cmdbufs: 1,
            num_relocs: 0,
            num_waitchks: 0,
            waitchk_mask: 0,
        });
        w.push_cmdbuf(OspreyCmdbuf {
            handle: 0x10,
            offset: 0,
            words: 8,
        });
        w.push_reloc_shift(OspreyRelocShift { shift: 2 });

        assert_eq!(
            w.len(),
            OspreySubmitHdr::SIZE_BYTES + OspreyCmdbuf::SIZE_BYTES + OspreyRelocShift::SIZE_BYTES
        );
        let bytes = w.as_bytes();
        assert_eq!(
            OspreySubmitHdr::decode_from_le_bytes(bytes).unwrap().syncpt_id,
            4
        );
        let cmdbuf_at = OspreySubmitHdr::SIZE_BYTES;
        assert_eq!(
            OspreyCmdbuf::decode_from_le_bytes(&bytes[cmdbuf_at..]).unwrap().handle,
            0x10
        );
    }
}
