//! Feed Client - Connection Lifecycle Around the Protocol Session
//!
//! Drives a [`FeedSession`] over a [`FeedConnector`]:
//! 1. Connects and sends `{"type":"resume","from_seq": cursor + 1}`
//! 2. Feeds every message through the session (decode, dedup, gaps)
//! 3. Persists the cursor after each batch of newly accepted samples
//! 4. Sends accepted batches downstream on a bounded channel
//! 5. Publishes status/registry snapshots on a throttle, or at once on
//!    any stage change
//! 6. On an unexpected close/error, schedules a cancellable reconnect
//!    with exponential backoff
//!
//! All session mutation happens on this task; callers steer it through
//! a [`FeedHandle`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::AppConfig;
use crate::domain::backoff::ReconnectPolicy;
use crate::domain::codec::encode_resume_request;
use crate::domain::feed_state::{DisconnectKind, FeedSession, FeedStatus, RateMeter, Stage};
use crate::domain::registry::RegistryRow;
use crate::domain::sample::{RawMessage, Sample};
use crate::ports::cursor_store::{CursorError, KeyValueStore, load_cursor, save_cursor};
use crate::ports::feed_transport::{FeedConnection, FeedConnector};

/// Control requests accepted by a running client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedCommand {
    /// Explicit connect after a close; rebuilds the registry.
    Connect,
    /// Drop the current connection and reconnect immediately.
    Reconnect,
    /// Close and stay closed; cancels any pending reconnect.
    Close,
    /// Zero the cursor, optionally persisting 0.
    ResetCursor { persist: bool },
    /// Toggle auto-reconnect (clears the backoff attempt counter).
    SetAutoReconnect(bool),
}

/// Cloneable control handle. Every call is fire-and-forget and idempotent.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    tx: mpsc::Sender<FeedCommand>,
}

impl FeedHandle {
    async fn send(&self, cmd: FeedCommand) {
        if self.tx.send(cmd).await.is_err() {
            debug!(command = ?cmd, "Feed client already stopped");
        }
    }

    pub async fn connect(&self) {
        self.send(FeedCommand::Connect).await;
    }

    pub async fn reconnect(&self) {
        self.send(FeedCommand::Reconnect).await;
    }

    pub async fn close(&self) {
        self.send(FeedCommand::Close).await;
    }

    pub async fn reset_cursor(&self, persist: bool) {
        self.send(FeedCommand::ResetCursor { persist }).await;
    }

    pub async fn set_auto_reconnect(&self, enabled: bool) {
        self.send(FeedCommand::SetAutoReconnect(enabled)).await;
    }
}

/// Consumer ends of the client's output channels.
pub struct FeedOutputs {
    /// Accepted, deduplicated batches in arrival order.
    pub samples: mpsc::Receiver<Vec<Sample>>,
    /// Latest status snapshot.
    pub status: watch::Receiver<FeedStatus>,
    /// Latest registry rows, updated when the registry changed.
    pub registry: watch::Receiver<Vec<RegistryRow>>,
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionEnd {
    Shutdown,
    CloseRequested,
    ReconnectRequested,
    Dropped(DisconnectKind),
}

/// What to do after waiting while disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Connect { fresh: bool },
    Shutdown,
}

/// Feed client task state.
pub struct FeedClient {
    url: String,
    cursor_key: String,
    status_throttle_ms: i64,
    session: FeedSession,
    reconnect: ReconnectPolicy,
    rate: RateMeter,
    connector: Arc<dyn FeedConnector>,
    store: Arc<dyn KeyValueStore>,
    persisted_cursor: u64,
    last_status_ms: Option<i64>,
    sample_tx: mpsc::Sender<Vec<Sample>>,
    status_tx: watch::Sender<FeedStatus>,
    registry_tx: watch::Sender<Vec<RegistryRow>>,
    command_rx: mpsc::Receiver<FeedCommand>,
}

impl FeedClient {
    /// Build a client, reading the persisted cursor.
    ///
    /// A malformed stored cursor is logged and treated as 0.
    ///
    /// # Errors
    /// Fails if the key/value store itself cannot be read.
    pub async fn new(
        config: &AppConfig,
        connector: Arc<dyn FeedConnector>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<(Self, FeedHandle, FeedOutputs)> {
        let cursor_key = config.feed.cursor_key.clone();
        let cursor = match load_cursor(store.as_ref(), &cursor_key).await {
            Ok(cursor) => cursor,
            Err(e @ CursorError::Malformed { .. }) => {
                warn!(error = %e, "Ignoring malformed persisted cursor");
                0
            }
            Err(CursorError::Store(e)) => return Err(e.context("Failed to load feed cursor")),
        };
        info!(cursor, key = %cursor_key, "Feed cursor loaded");

        let (sample_tx, sample_rx) = mpsc::channel(config.feed.channel_capacity);
        let (status_tx, status_rx) = watch::channel(FeedStatus::initial(cursor));
        let (registry_tx, registry_rx) = watch::channel(Vec::new());
        let (command_tx, command_rx) = mpsc::channel(32);

        let client = Self {
            url: config.feed.url.clone(),
            cursor_key,
            status_throttle_ms: i64::try_from(config.feed.status_throttle_ms).unwrap_or(i64::MAX),
            session: FeedSession::new(cursor),
            reconnect: config.reconnect.policy(),
            rate: RateMeter::default(),
            connector,
            store,
            persisted_cursor: cursor,
            last_status_ms: None,
            sample_tx,
            status_tx,
            registry_tx,
            command_rx,
        };

        let outputs = FeedOutputs {
            samples: sample_rx,
            status: status_rx,
            registry: registry_rx,
        };

        Ok((client, FeedHandle { tx: command_tx }, outputs))
    }

    /// Run until shutdown. Connection failures never end this loop.
    ///
    /// # Errors
    /// Currently infallible; the signature leaves room for fatal setup
    /// errors in future transports.
    #[instrument(skip_all, fields(url = %self.url))]
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let mut fresh = true;

        loop {
            if fresh {
                self.session.connect();
            } else {
                self.session.begin_connecting();
            }
            self.publish_status(true);

            let next = match self.run_connection(&mut shutdown_rx).await {
                ConnectionEnd::Shutdown => Next::Shutdown,
                ConnectionEnd::ReconnectRequested => Next::Connect { fresh: false },
                ConnectionEnd::CloseRequested => {
                    self.session.on_disconnect(DisconnectKind::Closed);
                    self.publish_status(true);
                    info!("Feed closed on request");
                    self.wait(None, &mut shutdown_rx).await
                }
                ConnectionEnd::Dropped(kind) => {
                    self.session.on_disconnect(kind);
                    let delay = self.reconnect.next_delay();
                    self.publish_status(true);
                    match delay {
                        Some(d) => info!(
                            delay_ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX),
                            attempt = self.reconnect.attempts(),
                            "Feed disconnected, reconnect scheduled"
                        ),
                        None => info!("Feed disconnected, auto-reconnect disabled"),
                    }
                    self.wait(delay, &mut shutdown_rx).await
                }
            };

            match next {
                Next::Connect { fresh: f } => fresh = f,
                Next::Shutdown => {
                    info!(cursor = self.session.last_seq(), "Feed client shut down");
                    return Ok(());
                }
            }
        }
    }

    /// One connection: connect, resume, stream until it ends.
    async fn run_connection(&mut self, shutdown_rx: &mut broadcast::Receiver<()>) -> ConnectionEnd {
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let mut connect = connector.connect(&url);

        // Commands stay live while the attempt is in flight.
        let connected = loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => return ConnectionEnd::Shutdown,
                Some(cmd) = self.command_rx.recv() => match cmd {
                    FeedCommand::Close => {
                        info!("Connect attempt abandoned on close");
                        return ConnectionEnd::CloseRequested;
                    }
                    FeedCommand::Connect | FeedCommand::Reconnect => {
                        debug!(command = ?cmd, "Already connecting");
                    }
                    other => self.apply_command(other).await,
                },
                result = &mut connect => break result,
            }
        };
        let mut conn = match connected {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Feed connection failed");
                return ConnectionEnd::Dropped(DisconnectKind::Error);
            }
        };

        if let Err(e) = self.send_resume(conn.as_mut()).await {
            warn!(error = %e, "Failed to send resume request");
            conn.close().await;
            return ConnectionEnd::Dropped(DisconnectKind::Error);
        }

        let throttle = Duration::from_millis(u64::try_from(self.status_throttle_ms).unwrap_or(250).max(1));
        let mut status_tick = tokio::time::interval(throttle);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    conn.close().await;
                    return ConnectionEnd::Shutdown;
                }
                Some(cmd) = self.command_rx.recv() => match cmd {
                    FeedCommand::Close => {
                        conn.close().await;
                        return ConnectionEnd::CloseRequested;
                    }
                    FeedCommand::Reconnect => {
                        conn.close().await;
                        return ConnectionEnd::ReconnectRequested;
                    }
                    other => self.apply_command(other).await,
                },
                msg = conn.next_message() => match msg {
                    Some(Ok(raw)) => self.handle_raw(&raw).await,
                    Some(Err(e)) => {
                        warn!(error = %e, "Feed socket error");
                        return ConnectionEnd::Dropped(DisconnectKind::Error);
                    }
                    None => {
                        info!("Feed stream closed by server");
                        return ConnectionEnd::Dropped(DisconnectKind::Closed);
                    }
                },
                _ = status_tick.tick() => self.publish_status(false),
            }
        }
    }

    async fn send_resume(&mut self, conn: &mut dyn FeedConnection) -> Result<()> {
        let from_seq = self.session.resume_request();
        let request = encode_resume_request(from_seq).context("Failed to encode resume request")?;
        conn.send_text(request).await?;
        info!(from_seq, "Resume requested");
        Ok(())
    }

    /// Wait while disconnected, for the backoff delay or a command.
    async fn wait(&mut self, delay: Option<Duration>, shutdown_rx: &mut broadcast::Receiver<()>) -> Next {
        let mut deadline = delay.map(|d| Instant::now() + d);

        loop {
            let sleep = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => return Next::Shutdown,
                Some(cmd) = self.command_rx.recv() => match cmd {
                    FeedCommand::Close => {
                        if deadline.take().is_some() {
                            info!("Pending reconnect cancelled");
                        }
                        if self.session.stage() != Stage::Closed {
                            self.session.on_disconnect(DisconnectKind::Closed);
                            self.publish_status(true);
                        }
                    }
                    FeedCommand::Connect => return Next::Connect { fresh: true },
                    FeedCommand::Reconnect => return Next::Connect { fresh: false },
                    FeedCommand::SetAutoReconnect(false) => {
                        self.apply_command(cmd).await;
                        deadline = None;
                    }
                    other => self.apply_command(other).await,
                },
                () = sleep => return Next::Connect { fresh: false },
            }
        }
    }

    async fn apply_command(&mut self, cmd: FeedCommand) {
        match cmd {
            FeedCommand::ResetCursor { persist } => {
                self.session.reset_cursor();
                self.reconnect.reset();
                if persist {
                    self.persist_cursor().await;
                }
                self.publish_status(true);
            }
            FeedCommand::SetAutoReconnect(enabled) => {
                info!(enabled, "Auto-reconnect toggled");
                self.reconnect.set_enabled(enabled);
                self.publish_status(true);
            }
            FeedCommand::Connect | FeedCommand::Reconnect | FeedCommand::Close => {}
        }
    }

    /// Run one message through the session and fan out the results.
    async fn handle_raw(&mut self, raw: &RawMessage) {
        let outcome = self.session.handle_message(raw, now_ms());

        if !outcome.accepted.is_empty() {
            self.rate.record(outcome.accepted.len());
            self.persist_cursor().await;
            if self.sample_tx.send(outcome.accepted).await.is_err() {
                debug!("Sample consumer gone, batch discarded");
            }
        }

        self.publish_status(outcome.stage_changed);
    }

    /// Write the cursor if it moved. Failures are logged, not fatal.
    async fn persist_cursor(&mut self) {
        let cursor = self.session.last_seq();
        if cursor == self.persisted_cursor {
            return;
        }
        match save_cursor(self.store.as_ref(), &self.cursor_key, cursor).await {
            Ok(()) => self.persisted_cursor = cursor,
            Err(e) => warn!(error = %e, cursor, "Failed to persist feed cursor"),
        }
    }

    /// Publish status when forced or the throttle interval elapsed.
    fn publish_status(&mut self, force: bool) {
        let now = now_ms();
        let due = self
            .last_status_ms
            .is_none_or(|last| now - last >= self.status_throttle_ms);
        if !force && !due {
            return;
        }
        self.last_status_ms = Some(now);

        let status = self
            .session
            .status(self.rate.rate(now), self.reconnect.status(), now);
        self.status_tx.send_replace(status);

        if self.session.registry_mut().take_dirty() {
            self.registry_tx.send_replace(self.session.registry().rows());
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
