//! Newline frame decoder for chunked response bodies
//!
//! The backend streams a body whose text is split into frames by `\n`, but
//! the transport hands us byte chunks cut at arbitrary offsets: in the
//! middle of a frame, in the middle of a multi-byte UTF-8 character, or
//! right between a `\r` and its `\n`.
//!
//! [`FrameCodec`] keeps the raw bytes and only decodes a frame once its
//! delimiter has arrived. A `\n` byte never occurs inside a multi-byte UTF-8
//! sequence, so decoding complete lines is safe no matter where the chunks
//! were cut. Invalid sequences decode to U+FFFD instead of failing.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// `tokio_util` codec splitting a byte buffer into text frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec {
    /// Offset already scanned for a delimiter, so repeated calls with a
    /// growing buffer do not rescan the same bytes.
    next_index: usize,
}

impl FrameCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> std::result::Result<Option<String>, Self::Error> {
        let search_from = self.next_index.min(buf.len());
        match buf[search_from..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let line = buf.split_to(search_from + offset + 1);
                self.next_index = 0;
                Ok(Some(decode_frame(&line[..line.len() - 1])))
            }
            None => {
                self.next_index = buf.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(
        &mut self,
        buf: &mut BytesMut,
    ) -> std::result::Result<Option<String>, Self::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }

        self.next_index = 0;
        if buf.is_empty() {
            return Ok(None);
        }

        let residual = buf.split();
        Ok(Some(decode_frame(&residual)))
    }
}

/// Decode one frame's bytes, dropping a trailing `\r`.
fn decode_frame(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Frame decoder owning the partial-frame buffer of one stream session.
///
/// # Examples
///
/// ```
/// use notestream::stream::decoder::FrameDecoder;
///
/// let mut decoder = FrameDecoder::new();
/// assert!(decoder.feed(b"data: {\"a\"").is_empty());
/// assert_eq!(decoder.feed(b":1}\ndata: tail"), vec!["data: {\"a\":1}".to_string()]);
/// assert_eq!(decoder.flush(), Some("data: tail".to_string()));
/// assert_eq!(decoder.flush(), None);
/// ```
#[derive(Debug, Default)]
pub struct FrameDecoder {
    codec: FrameCodec,
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create a decoder with an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every frame it completed, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Frame decoder error: {}", e);
                    break;
                }
            }
        }
        frames
    }

    /// Drain the buffer at end of stream.
    ///
    /// Returns the residual frame when the server did not terminate its
    /// last line. Emitted at most once; the buffer is empty afterwards.
    pub fn flush(&mut self) -> Option<String> {
        match self.codec.decode_eof(&mut self.buffer) {
            Ok(frame) => frame.filter(|f| !f.is_empty()),
            Err(e) => {
                tracing::warn!("Frame decoder error at end of stream: {}", e);
                self.buffer.clear();
                None
            }
        }
    }

    /// Number of buffered bytes not yet emitted as a frame
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}
