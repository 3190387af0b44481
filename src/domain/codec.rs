//! Frame Codec - Text and Binary Feed Frame Decoding
//!
//! Pure functions that turn one raw transport message into either a
//! typed batch of samples or a control event. No state is kept here;
//! the feed session owns error counters and format detection.
//!
//! Binary layout (big-endian):
//!
//! ```text
//! u8 frame_code | u32 sample_count | sample_count x record
//! record = f64 seq | f64 series_seq | f64 t_ms | u8 id_len | id | u8 payload_type | payload
//! ```
//!
//! Decoding never reads past the end of the buffer: a record that would
//! overrun ends the batch and the frame is flagged `truncated`.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::sample::{FrameKind, Payload, RawMessage, Sample};

/// Fixed header: frame code + sample count.
pub const BINARY_HEADER_LEN: usize = 5;

/// Smallest possible record: three f64, id length, payload type.
const MIN_RECORD_LEN: usize = 8 * 3 + 1 + 1;

/// Errors that cause a whole frame to be dropped.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary frame too short: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("unknown binary frame code: {0}")]
    UnknownFrameCode(u8),
}

/// Server control messages that carry no samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// Snapshot bounds for this session's history replay.
    InitBegin { min_seq: u64, wm_seq: u64 },
    /// Server acknowledged resume point; history phase done.
    InitComplete { resume_from: u64, resume_truncated: bool },
    /// Server clock ping.
    Heartbeat { ts_ms: i64 },
    /// Scripted test source finished.
    TestDone,
    /// Server-side error report.
    ServerError { message: Option<String> },
    /// Server announced it is closing the stream.
    Closed { reason: Option<String> },
}

/// A batch of samples tagged with its handoff phase.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    pub kind: FrameKind,
    pub samples: Vec<Sample>,
    /// Set when trailing records were cut off by a short buffer.
    pub truncated: bool,
}

/// Result of decoding one transport message.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Data(DataFrame),
    Control(ControlEvent),
}

/// JSON envelope, discriminated by `type`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TextMessage {
    History {
        #[serde(default)]
        samples: Vec<Sample>,
    },
    Delta {
        #[serde(default)]
        samples: Vec<Sample>,
    },
    Live {
        #[serde(default)]
        samples: Vec<Sample>,
    },
    InitBegin {
        #[serde(default)]
        min_seq: u64,
        #[serde(default)]
        wm_seq: u64,
    },
    InitComplete {
        #[serde(default)]
        resume_from: u64,
        #[serde(default)]
        resume_truncated: bool,
    },
    Heartbeat {
        ts_ms: i64,
    },
    TestDone,
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    Closed {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl From<TextMessage> for DecodedFrame {
    fn from(msg: TextMessage) -> Self {
        let data = |kind, samples| {
            Self::Data(DataFrame {
                kind,
                samples,
                truncated: false,
            })
        };
        match msg {
            TextMessage::History { samples } => data(FrameKind::History, samples),
            TextMessage::Delta { samples } => data(FrameKind::Delta, samples),
            TextMessage::Live { samples } => data(FrameKind::Live, samples),
            TextMessage::InitBegin { min_seq, wm_seq } => {
                Self::Control(ControlEvent::InitBegin { min_seq, wm_seq })
            }
            TextMessage::InitComplete {
                resume_from,
                resume_truncated,
            } => Self::Control(ControlEvent::InitComplete {
                resume_from,
                resume_truncated,
            }),
            TextMessage::Heartbeat { ts_ms } => Self::Control(ControlEvent::Heartbeat { ts_ms }),
            TextMessage::TestDone => Self::Control(ControlEvent::TestDone),
            TextMessage::Error { message } => Self::Control(ControlEvent::ServerError { message }),
            TextMessage::Closed { reason } => Self::Control(ControlEvent::Closed { reason }),
        }
    }
}

/// The one client-to-server message.
#[derive(Debug, Serialize)]
struct ResumeRequest {
    #[serde(rename = "type")]
    kind: &'static str,
    from_seq: u64,
}

/// Serialize `{"type":"resume","from_seq":N}`.
///
/// # Errors
/// Only if serde_json fails, which it cannot for this shape.
pub fn encode_resume_request(from_seq: u64) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ResumeRequest {
        kind: "resume",
        from_seq,
    })
}

/// Decode any transport message, picking the format from its nature.
///
/// # Errors
/// See [`decode_text`] and [`decode_binary`].
pub fn decode(raw: &RawMessage) -> Result<DecodedFrame, DecodeError> {
    match raw {
        RawMessage::Text(text) => decode_text(text),
        RawMessage::Binary(bytes) if bytes.first() == Some(&b'{') => {
            let msg: TextMessage = serde_json::from_slice(bytes)?;
            Ok(msg.into())
        }
        RawMessage::Binary(bytes) => decode_binary(bytes),
    }
}

/// Decode a JSON text frame.
///
/// # Errors
/// Returns [`DecodeError::Json`] for malformed JSON or an unknown `type`.
pub fn decode_text(text: &str) -> Result<DecodedFrame, DecodeError> {
    let msg: TextMessage = serde_json::from_str(text)?;
    Ok(msg.into())
}

/// Decode a binary data frame.
///
/// # Errors
/// Returns [`DecodeError::Truncated`] when the header itself is short and
/// [`DecodeError::UnknownFrameCode`] for a code outside 1..=3. Short
/// records never error; they end the batch.
pub fn decode_binary(buf: &[u8]) -> Result<DecodedFrame, DecodeError> {
    if buf.len() < BINARY_HEADER_LEN {
        return Err(DecodeError::Truncated {
            need: BINARY_HEADER_LEN,
            have: buf.len(),
        });
    }

    let code = buf[0];
    let kind = FrameKind::from_code(code).ok_or(DecodeError::UnknownFrameCode(code))?;
    let declared = BigEndian::read_u32(&buf[1..BINARY_HEADER_LEN]) as usize;

    // The declared count is untrusted; size the batch by what could fit.
    let fits = (buf.len() - BINARY_HEADER_LEN) / MIN_RECORD_LEN;
    let mut samples = Vec::with_capacity(declared.min(fits));

    let mut reader = FrameReader::new(&buf[BINARY_HEADER_LEN..]);
    let mut truncated = false;

    for _ in 0..declared {
        match reader.sample() {
            Some(sample) => samples.push(sample),
            None => {
                truncated = true;
                break;
            }
        }
    }

    Ok(DecodedFrame::Data(DataFrame {
        kind,
        samples,
        truncated,
    }))
}

/// Bounds-checked cursor over a frame body.
///
/// Every read returns `None` instead of indexing past the end. A failed
/// read leaves the position unspecified; callers stop at the first `None`.
struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let bytes = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn f64(&mut self) -> Option<f64> {
        self.take(8).map(BigEndian::read_f64)
    }

    fn str8(&mut self) -> Option<String> {
        let len = self.u8()? as usize;
        self.take(len)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    fn sample(&mut self) -> Option<Sample> {
        let seq = self.f64()?;
        let series_seq = self.f64()?;
        let t_ms = self.f64()?;
        let series_id = self.str8()?;
        let payload_type = self.u8()?;
        let payload = self.payload(payload_type)?;

        Some(Sample {
            seq: wire_u64(seq).unwrap_or(0),
            series_id,
            series_seq: wire_u64(series_seq).filter(|s| *s > 0),
            t_ms: wire_i64(t_ms),
            payload,
        })
    }

    fn payload(&mut self, payload_type: u8) -> Option<Payload> {
        let payload = match payload_type {
            1 => Payload::Tick {
                price: self.f64()?,
                volume: self.f64()?,
            },
            2 => Payload::Scalar { value: self.f64()? },
            3 => Payload::Ohlc {
                open: self.f64()?,
                high: self.f64()?,
                low: self.f64()?,
                close: self.f64()?,
            },
            4 => Payload::Signal {
                strategy: self.str8()?,
                side: self.str8()?,
                qty: self.f64()?,
                price: self.f64()?,
                reason: self.str8()?,
            },
            5 => Payload::Marker {
                strategy: self.str8()?,
                side: self.str8()?,
                tag: self.str8()?,
                price: self.f64()?,
                qty: self.f64()?,
            },
            6 => Payload::Pnl { value: self.f64()? },
            // Unknown kinds carry no bytes we know how to skip.
            _ => Payload::Empty,
        };
        Some(payload)
    }
}

/// Sequence numbers travel as f64; negative or non-finite means absent.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn wire_u64(v: f64) -> Option<u64> {
    (v.is_finite() && v >= 0.0).then(|| v as u64)
}

#[allow(clippy::cast_possible_truncation)]
fn wire_i64(v: f64) -> i64 {
    if v.is_finite() { v as i64 } else { 0 }
}

/// Encode a binary data frame. Used by replay tooling, benches and tests.
///
/// Strings longer than 255 bytes are cut at the nearest char boundary.
#[allow(clippy::cast_precision_loss)]
pub fn encode_binary_frame(kind: FrameKind, samples: &[Sample]) -> Vec<u8> {
    let mut out = Vec::with_capacity(BINARY_HEADER_LEN + samples.len() * 64);
    out.push(kind.code());
    let count = u32::try_from(samples.len()).unwrap_or(u32::MAX);
    out.extend_from_slice(&count.to_be_bytes());

    for sample in samples.iter().take(count as usize) {
        put_f64(&mut out, sample.seq as f64);
        put_f64(&mut out, sample.series_seq.unwrap_or(0) as f64);
        put_f64(&mut out, sample.t_ms as f64);
        put_str8(&mut out, &sample.series_id);
        out.push(sample.payload.type_code());

        match &sample.payload {
            Payload::Tick { price, volume } => {
                put_f64(&mut out, *price);
                put_f64(&mut out, *volume);
            }
            Payload::Scalar { value } | Payload::Pnl { value } => put_f64(&mut out, *value),
            Payload::Ohlc {
                open,
                high,
                low,
                close,
            } => {
                for v in [open, high, low, close] {
                    put_f64(&mut out, *v);
                }
            }
            Payload::Signal {
                strategy,
                side,
                qty,
                price,
                reason,
            } => {
                put_str8(&mut out, strategy);
                put_str8(&mut out, side);
                put_f64(&mut out, *qty);
                put_f64(&mut out, *price);
                put_str8(&mut out, reason);
            }
            Payload::Marker {
                strategy,
                side,
                tag,
                price,
                qty,
            } => {
                put_str8(&mut out, strategy);
                put_str8(&mut out, side);
                put_str8(&mut out, tag);
                put_f64(&mut out, *price);
                put_f64(&mut out, *qty);
            }
            Payload::Empty => {}
        }
    }

    out
}

fn put_f64(out: &mut Vec<u8>, v: f64) {
    let mut tmp = [0u8; 8];
    BigEndian::write_f64(&mut tmp, v);
    out.extend_from_slice(&tmp);
}

fn put_str8(out: &mut Vec<u8>, s: &str) {
    let mut end = s.len().min(usize::from(u8::MAX));
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    // end <= 255 by construction
    #[allow(clippy::cast_possible_truncation)]
    out.push(end as u8);
    out.extend_from_slice(&s.as_bytes()[..end]);
}
