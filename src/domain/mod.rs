//! Domain layer - Stream protocol and bounded storage logic.
//!
//! Pure, synchronous logic for the feed: frame decoding, the resumable
//! handoff state machine, gap accounting, the ingest queue and the
//! circular series store. No I/O here (hexagonal architecture inner ring).

pub mod backoff;
pub mod codec;
pub mod feed_state;
pub mod ingest_queue;
pub mod registry;
pub mod ring;
pub mod sample;
pub mod series_store;

// Re-export core types for convenience
pub use backoff::{ReconnectPolicy, ReconnectStatus};
pub use codec::{ControlEvent, DataFrame, DecodeError, DecodedFrame};
pub use feed_state::{DisconnectKind, FeedSession, FeedStatus, MessageOutcome, RateMeter, Stage};
pub use ingest_queue::{EnqueueOutcome, IngestQueue, OverflowPolicy, QueueLimits, QueueStats};
pub use registry::{RegistryRow, SeriesRegistry};
pub use ring::{CircularBuffer, LinearSeries, OhlcColumns};
pub use sample::{FrameKind, Payload, RawMessage, Sample, SeriesId, WireFormat};
pub use series_store::{SeriesStore, StoreLimits, StoreStats};
