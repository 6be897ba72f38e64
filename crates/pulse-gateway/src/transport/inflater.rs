//! Streaming zlib decompression
//!
//! The gateway sends one continuous zlib stream split across frames. A
//! frame only completes a logical message when it ends with the zlib
//! flush marker `00 00 FF FF`; anything else is buffered.

use flate2::{Decompress, FlushDecompress, Status};

/// Marker terminating a flushable chunk of the shared zlib stream
const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// Incremental inflater for the gateway's zlib-stream transport
pub struct ZlibInflater {
    decompress: Decompress,
    buffer: Vec<u8>,
}

impl ZlibInflater {
    /// Create a fresh inflater (one per connection; the stream state spans
    /// the whole connection)
    #[must_use]
    pub fn new() -> Self {
        Self {
            decompress: Decompress::new(true),
            buffer: Vec::new(),
        }
    }

    /// Feed one inbound frame
    ///
    /// Returns the inflated bytes of a complete message once the flush
    /// marker arrives, `None` while the chunk is still partial.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, flate2::DecompressError> {
        self.buffer.extend_from_slice(chunk);

        if self.buffer.len() < ZLIB_SUFFIX.len() || !self.buffer.ends_with(&ZLIB_SUFFIX) {
            return Ok(None);
        }

        let mut output = Vec::with_capacity((self.buffer.len() * 3).max(4096));
        let mut consumed = 0usize;

        loop {
            let in_before = self.decompress.total_in();
            let out_before = output.len();

            let status = self.decompress.decompress_vec(
                &self.buffer[consumed..],
                &mut output,
                FlushDecompress::Sync,
            )?;
            let took = (self.decompress.total_in() - in_before) as usize;
            consumed += took;

            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => {
                    let produced = output.len() > out_before;

                    if output.len() == output.capacity() {
                        // Output filled up; make room and keep going
                        output.reserve(8192);
                        continue;
                    }
                    if consumed >= self.buffer.len() {
                        break;
                    }
                    if took == 0 && !produced {
                        // No forward progress; bail instead of spinning
                        break;
                    }
                }
            }
        }

        self.buffer.clear();
        Ok(Some(output))
    }

    /// Bytes currently buffered awaiting the flush marker
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for ZlibInflater {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compress, Compression, FlushCompress};

    /// Compress `data` as one sync-flushed chunk of a shared stream
    fn deflate_chunk(compress: &mut Compress, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len() + 64);
        compress
            .compress_vec(data, &mut out, FlushCompress::Sync)
            .unwrap();
        out
    }

    #[test]
    fn test_single_chunk_roundtrip() {
        let mut compress = Compress::new(Compression::default(), true);
        let chunk = deflate_chunk(&mut compress, b"{\"op\":11}");
        assert!(chunk.ends_with(&ZLIB_SUFFIX));

        let mut inflater = ZlibInflater::new();
        let out = inflater.push(&chunk).unwrap().expect("complete chunk");
        assert_eq!(out, b"{\"op\":11}");
        assert_eq!(inflater.pending(), 0);
    }

    #[test]
    fn test_partial_chunk_buffers() {
        let mut compress = Compress::new(Compression::default(), true);
        let chunk = deflate_chunk(&mut compress, b"{\"op\":1,\"d\":42}");

        let mut inflater = ZlibInflater::new();
        let (head, tail) = chunk.split_at(chunk.len() / 2);

        // First half has no flush marker: nothing emitted
        assert!(inflater.push(head).unwrap().is_none());
        assert!(inflater.pending() > 0);

        // Second half completes the message
        let out = inflater.push(tail).unwrap().expect("complete after tail");
        assert_eq!(out, b"{\"op\":1,\"d\":42}");
    }

    #[test]
    fn test_stream_state_spans_messages() {
        let mut compress = Compress::new(Compression::default(), true);
        let first = deflate_chunk(&mut compress, b"first message payload");
        let second = deflate_chunk(&mut compress, b"second message payload");

        let mut inflater = ZlibInflater::new();
        assert_eq!(
            inflater.push(&first).unwrap().unwrap(),
            b"first message payload"
        );
        // The second chunk reuses the dictionary established by the first
        assert_eq!(
            inflater.push(&second).unwrap().unwrap(),
            b"second message payload"
        );
    }

    #[test]
    fn test_large_payload_grows_output() {
        let big: Vec<u8> = std::iter::repeat(b"abcdefgh".as_slice())
            .take(8192)
            .flatten()
            .copied()
            .collect();

        let mut compress = Compress::new(Compression::default(), true);
        let chunk = deflate_chunk(&mut compress, &big);

        let mut inflater = ZlibInflater::new();
        let out = inflater.push(&chunk).unwrap().expect("complete chunk");
        assert_eq!(out, big);
    }
}
