//! Core stream data types.
//!
//! Defines the sample model shared by the codec, the protocol state
//! machine, the ingest queue and the series store. Payloads are passed
//! through verbatim; nothing in this crate computes on them.

use serde::{Deserialize, Serialize};

/// Series identifier as it appears on the wire.
pub type SeriesId = String;

/// A single decoded point of the multiplexed stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Global sequence number, strictly increasing across the stream.
    pub seq: u64,
    /// Series this sample belongs to.
    #[serde(alias = "id")]
    pub series_id: SeriesId,
    /// Per-series sequence number, when the source provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_seq: Option<u64>,
    /// Event time (Unix ms).
    pub t_ms: i64,
    /// Typed payload.
    #[serde(default)]
    pub payload: Payload,
}

impl Sample {
    /// Value plotted on the y axis for this sample, if it has one.
    pub fn y_value(&self) -> Option<f64> {
        match &self.payload {
            Payload::Tick { price, .. } => Some(*price),
            Payload::Scalar { value } | Payload::Pnl { value } => Some(*value),
            Payload::Ohlc { close, .. } => Some(*close),
            Payload::Signal { price, .. } | Payload::Marker { price, .. } => Some(*price),
            Payload::Empty => None,
        }
    }
}

/// Closed union of the payload kinds a source may emit.
///
/// Unknown kinds decode to [`Payload::Empty`] instead of failing the frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Trade print.
    Tick { price: f64, volume: f64 },
    /// Single indicator value.
    Scalar { value: f64 },
    /// Bar.
    Ohlc {
        #[serde(alias = "o")]
        open: f64,
        #[serde(alias = "h")]
        high: f64,
        #[serde(alias = "l")]
        low: f64,
        #[serde(alias = "c")]
        close: f64,
    },
    /// Strategy order signal.
    Signal {
        strategy: String,
        side: String,
        qty: f64,
        price: f64,
        #[serde(default)]
        reason: String,
    },
    /// Strategy chart annotation.
    Marker {
        strategy: String,
        side: String,
        #[serde(default)]
        tag: String,
        price: f64,
        qty: f64,
    },
    /// Running profit and loss.
    Pnl { value: f64 },
    /// Unknown or missing payload.
    #[default]
    #[serde(other)]
    Empty,
}

impl Payload {
    /// Binary wire code for this payload kind (0 for `Empty`).
    pub const fn type_code(&self) -> u8 {
        match self {
            Self::Tick { .. } => 1,
            Self::Scalar { .. } => 2,
            Self::Ohlc { .. } => 3,
            Self::Signal { .. } => 4,
            Self::Marker { .. } => 5,
            Self::Pnl { .. } => 6,
            Self::Empty => 0,
        }
    }
}

/// Phase of the resumable handoff a data frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// Bulk backfill from the server's ring buffer.
    History,
    /// Catch-up between the snapshot watermark and the live tail.
    Delta,
    /// Real-time tail.
    Live,
}

impl FrameKind {
    /// Map a binary frame code to a kind.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::History),
            2 => Some(Self::Delta),
            3 => Some(Self::Live),
            _ => None,
        }
    }

    /// Binary frame code for this kind.
    pub const fn code(self) -> u8 {
        match self {
            Self::History => 1,
            Self::Delta => 2,
            Self::Live => 3,
        }
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::History => write!(f, "history"),
            Self::Delta => write!(f, "delta"),
            Self::Live => write!(f, "live"),
        }
    }
}

/// Encoding detected from the first message of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// Nothing received yet on this connection.
    #[default]
    Unknown,
    /// JSON text frames.
    Text,
    /// Big-endian binary frames.
    Binary,
}

/// A raw message as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawMessage {
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl RawMessage {
    /// Format this message will be decoded as.
    ///
    /// Binary frames starting with `{` carry JSON and are treated as text.
    pub fn wire_format(&self) -> WireFormat {
        match self {
            Self::Text(_) => WireFormat::Text,
            Self::Binary(bytes) if bytes.first() == Some(&b'{') => WireFormat::Text,
            Self::Binary(_) => WireFormat::Binary,
        }
    }
}
