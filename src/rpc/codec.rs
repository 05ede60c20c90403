//! NDJSON codec for the bridge helper's stdio.
//!
//! Every request the client writes and every response the helper prints is
//! one JSON document on one `\n`-terminated line. [`BridgeCodec`] frames
//! those lines on top of [`tokio_util::codec::LinesCodec`] and caps their
//! length so a misbehaving helper cannot make the client allocate without
//! bound.
//!
//! The bridge channel reads the helper's stdout through a
//! [`tokio_util::codec::FramedRead`] and writes its stdin through a
//! [`tokio_util::codec::FramedWrite`], each with its own codec instance.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum accepted line length: 1 MiB.
///
/// Model file paths and parameter values are short; a response this long
/// means the helper is printing something other than protocol lines.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Line codec for bridge requests and responses.
///
/// # Decoder
///
/// Yields one response line at a time, without its terminator. A partial
/// line stays buffered until the rest arrives. Lines longer than
/// [`MAX_LINE_BYTES`] fail with `AppError::Io("line too long: …")`.
///
/// # Encoder
///
/// Writes each request as `item\n`. The length limit only guards inbound
/// data and is not enforced here.
#[derive(Debug)]
pub struct BridgeCodec(LinesCodec);

impl BridgeCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for BridgeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for BridgeCodec {
    type Item = String;
    type Error = AppError;

    /// Next complete response line from `src`, or `Ok(None)` while the
    /// helper is still writing it.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    /// Like [`Self::decode`], but a final line without `\n` is returned
    /// once the helper has closed its stdout.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for BridgeCodec {
    type Error = AppError;

    /// Append `item` and a newline to `dst`.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

/// Both codec failures surface as `AppError::Io`; the bridge treats either
/// as a broken helper.
fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => AppError::Io(format!(
            "line too long: exceeded {MAX_LINE_BYTES} bytes"
        )),
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
