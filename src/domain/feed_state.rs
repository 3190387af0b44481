//! Feed Session - Resumable Handoff Protocol State Machine
//!
//! Sans-I/O core of the feed client. Owns the stage, the dedup cursor,
//! resume bookkeeping, history accounting, global gap accounting and
//! the series registry. The async client feeds it raw messages and
//! socket events; it never touches the network itself.
//!
//! Stages: `idle -> connecting -> history -> delta -> live`, with
//! `closed`/`error` reachable from anywhere on disconnect.
//!
//! Every sample of every frame goes through the same acceptance rule:
//! - `seq <= last_seq`: duplicate from replay overlap, dropped silently
//! - `last_seq > 0 && seq > last_seq + 1`: global gap, counted, then accepted
//! - otherwise accepted

use serde::Serialize;
use tracing::{debug, info, warn};

use super::backoff::ReconnectStatus;
use super::codec::{self, ControlEvent, DataFrame, DecodeError, DecodedFrame};
use super::registry::SeriesRegistry;
use super::sample::{FrameKind, RawMessage, Sample, WireFormat};

/// Protocol stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Connecting,
    History,
    Delta,
    Live,
    Closed,
    Error,
}

impl Stage {
    /// Numeric code for gauges.
    pub const fn code(self) -> i64 {
        match self {
            Self::Idle => 0,
            Self::Connecting => 1,
            Self::History => 2,
            Self::Delta => 3,
            Self::Live => 4,
            Self::Closed => 5,
            Self::Error => 6,
        }
    }

    /// Whether a connection is established.
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::History | Self::Delta | Self::Live)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::History => "history",
            Self::Delta => "delta",
            Self::Live => "live",
            Self::Closed => "closed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectKind {
    /// Orderly close, by either side.
    Closed,
    /// Socket or connect error.
    Error,
}

/// Per-format decode failure counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DecodeCounters {
    pub text_errors: u64,
    pub binary_errors: u64,
    /// Binary frames delivered short because a record overran the buffer.
    pub truncated_frames: u64,
}

/// Snapshot bounds announced by `init_begin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SnapshotBounds {
    pub min_seq: u64,
    pub wm_seq: u64,
}

/// Resume bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ResumeState {
    /// `from_seq` sent in the last resume request.
    pub requested: Option<u64>,
    /// Resume point acknowledged by `init_complete`.
    pub server: Option<u64>,
    /// Server could not replay the full requested range.
    pub truncated: bool,
}

/// History replay progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistoryProgress {
    pub expected: u64,
    pub received: u64,
    pub pct: f64,
}

/// Gap and duplicate totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GapTotals {
    pub global: u32,
    pub global_missing: u64,
    pub series: u64,
    pub series_missing: u64,
    pub duplicates: u64,
}

/// Immutable status snapshot published to the display layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedStatus {
    pub stage: Stage,
    pub last_seq: u64,
    pub bounds: Option<SnapshotBounds>,
    pub resume: ResumeState,
    pub history: HistoryProgress,
    /// Accepted samples per second.
    pub rate: f64,
    pub heartbeat_lag_ms: Option<i64>,
    pub wire_format: WireFormat,
    pub gaps: GapTotals,
    pub decode: DecodeCounters,
    pub reconnect: ReconnectStatus,
    pub accepted: u64,
    pub series: usize,
    pub last_server_error: Option<String>,
    pub emitted_at_ms: i64,
}

impl FeedStatus {
    /// Status before anything happened.
    pub fn initial(cursor: u64) -> Self {
        FeedSession::new(cursor).status(0.0, ReconnectStatus::default(), 0)
    }

    /// Whether the server's watermark fell below the cursor we resumed from.
    ///
    /// That only happens after a server restart, in which case the caller
    /// should reset the cursor and reconnect.
    pub fn indicates_server_restart(&self) -> bool {
        match (self.bounds, self.resume.requested) {
            (Some(bounds), Some(from)) => bounds.wm_seq < from.saturating_sub(1),
            _ => false,
        }
    }
}

/// What one message did to the session.
#[derive(Debug, Default)]
pub struct MessageOutcome {
    /// Newly accepted samples, in arrival order.
    pub accepted: Vec<Sample>,
    pub stage_changed: bool,
    pub control: Option<ControlEvent>,
    pub decode_failed: bool,
}

/// Protocol state for one logical stream.
#[derive(Debug)]
pub struct FeedSession {
    stage: Stage,
    last_seq: u64,
    resume: ResumeState,
    bounds: Option<SnapshotBounds>,
    expected_history: u64,
    history_received: u64,
    registry: SeriesRegistry,
    gaps: GapTotals,
    accepted_total: u64,
    decode: DecodeCounters,
    wire_format: WireFormat,
    heartbeat_lag_ms: Option<i64>,
    last_server_error: Option<String>,
}

impl FeedSession {
    /// Create an idle session resuming after `cursor`.
    pub fn new(cursor: u64) -> Self {
        Self {
            stage: Stage::Idle,
            last_seq: cursor,
            resume: ResumeState::default(),
            bounds: None,
            expected_history: 0,
            history_received: 0,
            registry: SeriesRegistry::new(),
            gaps: GapTotals::default(),
            accepted_total: 0,
            decode: DecodeCounters::default(),
            wire_format: WireFormat::Unknown,
            heartbeat_lag_ms: None,
            last_server_error: None,
        }
    }

    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Last accepted global sequence (the cursor).
    pub const fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub const fn registry(&self) -> &SeriesRegistry {
        &self.registry
    }

    pub const fn registry_mut(&mut self) -> &mut SeriesRegistry {
        &mut self.registry
    }

    pub const fn gaps(&self) -> GapTotals {
        self.gaps
    }

    pub const fn decode_counters(&self) -> DecodeCounters {
        self.decode
    }

    pub const fn expected_history(&self) -> u64 {
        self.expected_history
    }

    pub const fn wire_format(&self) -> WireFormat {
        self.wire_format
    }

    /// Start an explicit connect: per-series state and gap counters are
    /// rebuilt from scratch. The cursor survives.
    pub fn connect(&mut self) -> bool {
        self.registry.clear();
        self.gaps = GapTotals::default();
        self.begin_connecting()
    }

    /// Start a (re)connect attempt, keeping registry continuity.
    pub fn begin_connecting(&mut self) -> bool {
        self.wire_format = WireFormat::Unknown;
        self.heartbeat_lag_ms = None;
        self.set_stage(Stage::Connecting)
    }

    /// Connection is open; returns the `from_seq` to request.
    pub fn resume_request(&mut self) -> u64 {
        let from_seq = self.last_seq.saturating_add(1);
        self.resume = ResumeState {
            requested: Some(from_seq),
            server: None,
            truncated: false,
        };
        from_seq
    }

    /// Connection ended. Returns whether the stage changed.
    pub fn on_disconnect(&mut self, kind: DisconnectKind) -> bool {
        let stage = match kind {
            DisconnectKind::Closed => Stage::Closed,
            DisconnectKind::Error => Stage::Error,
        };
        self.set_stage(stage)
    }

    /// Zero the cursor and resume state.
    pub fn reset_cursor(&mut self) {
        info!(previous = self.last_seq, "Cursor reset");
        self.last_seq = 0;
        self.resume = ResumeState::default();
        self.bounds = None;
        self.expected_history = 0;
        self.history_received = 0;
    }

    /// Decode and apply one transport message.
    ///
    /// Decode failures are counted and the message is dropped; they never
    /// change the stage or end the connection.
    pub fn handle_message(&mut self, raw: &RawMessage, now_ms: i64) -> MessageOutcome {
        let format = raw.wire_format();
        if self.wire_format == WireFormat::Unknown {
            debug!(format = ?format, "Wire format detected");
            self.wire_format = format;
        }

        match codec::decode(raw) {
            Ok(frame) => self.apply_frame(frame, now_ms),
            Err(e) => {
                self.count_decode_error(format, &e);
                MessageOutcome {
                    decode_failed: true,
                    ..MessageOutcome::default()
                }
            }
        }
    }

    /// Apply an already decoded frame.
    pub fn apply_frame(&mut self, frame: DecodedFrame, now_ms: i64) -> MessageOutcome {
        match frame {
            DecodedFrame::Data(data) => self.apply_data(data),
            DecodedFrame::Control(event) => {
                let stage_changed = self.apply_control(&event, now_ms);
                MessageOutcome {
                    stage_changed,
                    control: Some(event),
                    ..MessageOutcome::default()
                }
            }
        }
    }

    fn apply_data(&mut self, frame: DataFrame) -> MessageOutcome {
        if frame.truncated {
            self.decode.truncated_frames += 1;
            warn!(
                kind = %frame.kind,
                kept = frame.samples.len(),
                "Binary frame truncated mid-record"
            );
        }

        let next = match (self.stage, frame.kind) {
            (Stage::History, FrameKind::Delta) => Some(Stage::Delta),
            (Stage::History | Stage::Delta, FrameKind::Live) => Some(Stage::Live),
            // Data before init_begin: trust the frame kind.
            (Stage::Connecting, FrameKind::History) => Some(Stage::History),
            (Stage::Connecting, FrameKind::Delta) => Some(Stage::Delta),
            (Stage::Connecting, FrameKind::Live) => Some(Stage::Live),
            _ => None,
        };
        let stage_changed = next.is_some_and(|s| self.set_stage(s));

        let accepted = self.accept(frame.samples);
        if frame.kind == FrameKind::History {
            self.history_received += accepted.len() as u64;
        }

        MessageOutcome {
            accepted,
            stage_changed,
            ..MessageOutcome::default()
        }
    }

    /// Global dedup + gap accounting + registry update.
    fn accept(&mut self, samples: Vec<Sample>) -> Vec<Sample> {
        let mut accepted = Vec::with_capacity(samples.len());

        for sample in samples {
            let seq = sample.seq;
            if seq <= self.last_seq {
                self.gaps.duplicates += 1;
                continue;
            }
            if self.last_seq > 0 && seq > self.last_seq + 1 {
                let missing = seq - self.last_seq - 1;
                self.gaps.global = self.gaps.global.saturating_add(1);
                self.gaps.global_missing += missing;
                warn!(after = self.last_seq, seq, missing, "Global sequence gap");
            }

            self.last_seq = seq;
            if let Some(missing) = self.registry.record(&sample) {
                self.gaps.series += 1;
                self.gaps.series_missing += missing;
                debug!(series = %sample.series_id, missing, "Series sequence gap");
            }
            accepted.push(sample);
        }

        self.accepted_total += accepted.len() as u64;
        accepted
    }

    fn apply_control(&mut self, event: &ControlEvent, now_ms: i64) -> bool {
        match event {
            ControlEvent::InitBegin { min_seq, wm_seq } => {
                let from_seq = self
                    .resume
                    .requested
                    .unwrap_or_else(|| self.last_seq.saturating_add(1));
                let start = from_seq.max(*min_seq);
                self.expected_history = if *wm_seq >= start {
                    wm_seq - start + 1
                } else {
                    0
                };
                self.history_received = 0;
                self.bounds = Some(SnapshotBounds {
                    min_seq: *min_seq,
                    wm_seq: *wm_seq,
                });
                info!(
                    min_seq,
                    wm_seq,
                    from_seq,
                    expected = self.expected_history,
                    "History replay starting"
                );
                self.set_stage(Stage::History)
            }
            ControlEvent::InitComplete {
                resume_from,
                resume_truncated,
            } => {
                self.resume.server = Some(*resume_from);
                self.resume.truncated = *resume_truncated;
                if *resume_truncated {
                    warn!(
                        requested = ?self.resume.requested,
                        server = resume_from,
                        "Server could not replay full history range"
                    );
                }
                self.set_stage(Stage::Live)
            }
            ControlEvent::Heartbeat { ts_ms } => {
                self.heartbeat_lag_ms = Some(now_ms.saturating_sub(*ts_ms));
                false
            }
            ControlEvent::TestDone => {
                info!("Server reported test_done");
                false
            }
            ControlEvent::ServerError { message } => {
                warn!(message = ?message, "Server reported error");
                self.last_server_error = Some(message.clone().unwrap_or_default());
                false
            }
            ControlEvent::Closed { reason } => {
                info!(reason = ?reason, "Server announced close");
                false
            }
        }
    }

    fn count_decode_error(&mut self, format: WireFormat, err: &DecodeError) {
        match format {
            WireFormat::Binary => self.decode.binary_errors += 1,
            WireFormat::Text | WireFormat::Unknown => self.decode.text_errors += 1,
        }
        warn!(format = ?format, error = %err, "Dropping undecodable frame");
    }

    fn set_stage(&mut self, stage: Stage) -> bool {
        if self.stage == stage {
            return false;
        }
        info!(from = %self.stage, to = %stage, "Feed stage transition");
        self.stage = stage;
        true
    }

    /// Build an immutable status snapshot.
    #[allow(clippy::cast_precision_loss)]
    pub fn status(&self, rate: f64, reconnect: ReconnectStatus, now_ms: i64) -> FeedStatus {
        let pct = if self.expected_history == 0 {
            100.0
        } else {
            (self.history_received as f64 / self.expected_history as f64 * 100.0).min(100.0)
        };

        FeedStatus {
            stage: self.stage,
            last_seq: self.last_seq,
            bounds: self.bounds,
            resume: self.resume,
            history: HistoryProgress {
                expected: self.expected_history,
                received: self.history_received,
                pct,
            },
            rate,
            heartbeat_lag_ms: self.heartbeat_lag_ms,
            wire_format: self.wire_format,
            gaps: self.gaps,
            decode: self.decode,
            reconnect,
            accepted: self.accepted_total,
            series: self.registry.len(),
            last_server_error: self.last_server_error.clone(),
            emitted_at_ms: now_ms,
        }
    }
}

/// Accepted-samples-per-second meter over at least one-second windows.
#[derive(Debug, Clone, Default)]
pub struct RateMeter {
    window_start_ms: Option<i64>,
    window_count: u64,
    rate: f64,
}

impl RateMeter {
    const MIN_WINDOW_MS: i64 = 1_000;

    pub fn record(&mut self, n: usize) {
        self.window_count += n as u64;
    }

    /// Current rate; rolls the window once it is long enough.
    #[allow(clippy::cast_precision_loss)]
    pub fn rate(&mut self, now_ms: i64) -> f64 {
        let start = *self.window_start_ms.get_or_insert(now_ms);
        let elapsed = now_ms - start;
        if elapsed >= Self::MIN_WINDOW_MS {
            self.rate = self.window_count as f64 * 1000.0 / elapsed as f64;
            self.window_count = 0;
            self.window_start_ms = Some(now_ms);
        }
        self.rate
    }
}
