//! VICP frame codec
//!
//! LeCroy's Visual Instrument Control Protocol carries SCPI commands and
//! bulk image data over TCP port 1861 as framed binary messages:
//!
//! ```text
//! [op:1][version:1][sequence:1][reserved:1][payload_len:4 BE] <payload>
//! ```
//!
//! Only frames with the DATA flag contribute payload; a frame with the EOI
//! flag ends a message. Scopes routinely close the connection instead of
//! flagging EOI on the last frame, so a drained stream that ends early is
//! still a complete result.

use bytes::{BufMut, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

/// Operation flag bits carried in the first header byte.
pub mod op {
    /// Frame payload is message data
    pub const DATA: u8 = 0x80;
    /// Remote-control mode
    pub const REMOTE: u8 = 0x40;
    /// Local lockout
    pub const LOCKOUT: u8 = 0x20;
    /// Device clear
    pub const CLEAR: u8 = 0x10;
    /// Service request
    pub const SRQ: u8 = 0x08;
    /// Request to send
    pub const REQSEND: u8 = 0x04;
    /// End of message
    pub const EOI: u8 = 0x01;
}

/// Header length in bytes
pub const HEADER_LEN: usize = 8;

/// Protocol version byte sent in every outgoing frame
pub const PROTOCOL_VERSION: u8 = 0x01;

// Largest payload a single frame may declare. Scopes send multi-megabyte
// BMPs split across frames; a length past this is a corrupt header.
const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// One decoded VICP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Operation flags (see [`op`])
    pub op: u8,
    /// Protocol version from the header
    pub version: u8,
    /// Sequence number from the header
    pub sequence: u8,
    /// Frame payload
    pub payload: Bytes,
}

impl Frame {
    /// Frame carries message data
    pub fn is_data(&self) -> bool {
        self.op & op::DATA != 0
    }

    /// Frame ends the message
    pub fn is_eoi(&self) -> bool {
        self.op & op::EOI != 0
    }
}

/// Per-connection frame sequence counter.
///
/// Wraps 255 -> 1 and never yields 0. Each transport owns its own counter;
/// sequence numbers are meaningless across connections.
#[derive(Debug, Default)]
pub struct SequenceCounter(u8);

impl SequenceCounter {
    /// Create a counter whose first value will be 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance and return the next sequence number in `[1, 255]`
    pub fn next(&mut self) -> u8 {
        self.0 = self.0 % 255 + 1;
        self.0
    }
}

/// Frame-level encoder/decoder for use with `tokio_util::codec`.
///
/// Encoding stamps DATA|REMOTE|EOI, the protocol version, and the next
/// sequence number onto the command; decoding accumulates partial reads
/// until a full header and payload are buffered.
#[derive(Debug, Default)]
pub struct VicpCodec {
    sequence: SequenceCounter,
}

impl VicpCodec {
    /// Create a codec with a fresh sequence counter
    pub fn new() -> Self {
        Self::default()
    }
}

impl<'a> Encoder<&'a str> for VicpCodec {
    type Error = std::io::Error;

    fn encode(&mut self, command: &'a str, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = command.as_bytes();
        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u8(op::DATA | op::REMOTE | op::EOI);
        dst.put_u8(PROTOCOL_VERSION);
        dst.put_u8(self.sequence.next());
        dst.put_u8(0x00);
        dst.put_u32(payload.len() as u32);
        dst.put_slice(payload);
        Ok(())
    }
}

impl Decoder for VicpCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN - src.len());
            return Ok(None);
        }

        let payload_len =
            u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("frame declares {payload_len} payload bytes"),
            ));
        }

        if src.len() < HEADER_LEN + payload_len {
            src.reserve(HEADER_LEN + payload_len - src.len());
            return Ok(None);
        }

        let header = src.split_to(HEADER_LEN);
        let payload = src.split_to(payload_len).freeze();
        let frame = Frame {
            op: header[0],
            version: header[1],
            sequence: header[2],
            payload,
        };
        trace!(
            op = frame.op,
            seq = frame.sequence,
            len = frame.payload.len(),
            "decoded frame"
        );
        Ok(Some(frame))
    }
}

/// Result of draining a framed stream until EOI, timeout, or close.
#[derive(Debug, Default)]
pub struct StreamOutcome {
    /// Concatenated payloads of all DATA frames, in arrival order
    pub data: Vec<u8>,
    /// Number of complete frames consumed, DATA or not
    pub frames: u32,
    /// Whether an EOI-flagged frame ended the stream
    pub saw_eoi: bool,
}

/// Drain frames from `stream` until an EOI frame arrives.
///
/// DATA payloads accumulate in arrival order; other frames (SRQ and the
/// like) are consumed and discarded. A per-read timeout, a remote close, or
/// a read error before EOI ends the stream *successfully* with whatever has
/// accumulated; callers decide whether zero frames is a failure.
pub async fn drain_stream<S>(stream: &mut S, per_read_timeout: Duration) -> StreamOutcome
where
    S: Stream<Item = Result<Frame, std::io::Error>> + Unpin,
{
    let mut outcome = StreamOutcome::default();

    loop {
        let frame = match tokio::time::timeout(per_read_timeout, stream.next()).await {
            Err(_) => {
                debug!(
                    frames = outcome.frames,
                    bytes = outcome.data.len(),
                    "read timed out before EOI, keeping accumulated data"
                );
                break;
            }
            Ok(None) => {
                debug!(
                    frames = outcome.frames,
                    bytes = outcome.data.len(),
                    "remote closed before EOI, keeping accumulated data"
                );
                break;
            }
            Ok(Some(Err(e))) => {
                debug!(
                    frames = outcome.frames,
                    bytes = outcome.data.len(),
                    error = %e,
                    "read failed before EOI, keeping accumulated data"
                );
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        outcome.frames += 1;
        if frame.is_data() {
            outcome.data.extend_from_slice(&frame.payload);
        }
        if frame.is_eoi() {
            outcome.saw_eoi = true;
            break;
        }
    }

    outcome
}
