//! The single push connection.
//!
//! The controller is an actor: one task owns the connection and reacts to
//! commands (`set_topics`, `reconnect`, `shutdown`) and to the stream itself.
//! Its state is published on a `watch` channel so every observer sees the
//! same snapshot.
//!
//! ```text
//! Idle -> Connecting -> Open -> Reconnecting -> Connecting ...
//!            |           |          |
//!            +-----------+----------+--> Closed   (topic set empty)
//!                                   +--> Offline  (retry cap reached)
//! ```
//!
//! `Offline` is left only by a topic change or an explicit `reconnect()`.
//! Any topic change while `Connecting` abandons the in-flight attempt.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use pulse_core::BackoffConfig;
use pulse_settings::StreamSettings;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::connector::{EventStream, StreamConnector};
use crate::wire::{StreamEvent, decode_event};

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Never connected; no topics yet.
    Idle,
    /// Opening the channel.
    Connecting,
    /// Channel live.
    Open,
    /// Waiting out a backoff delay.
    Reconnecting,
    /// Torn down (no topics, or shut down).
    Closed,
    /// Retry cap reached; waiting for a topic change or `reconnect()`.
    Offline,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
            Self::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// What observers see of the connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Topics the open channel carries (empty unless `Open`).
    pub active_topics: BTreeSet<String>,
    /// Consecutive failed attempts since the last `Open`.
    pub retry_count: u32,
    /// Most recent failure, if any.
    pub last_error: Option<String>,
}

impl Default for ConnectionSnapshot {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            active_topics: BTreeSet::new(),
            retry_count: 0,
            last_error: None,
        }
    }
}

/// Controller tuning.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Reconnect backoff.
    pub backoff: BackoffConfig,
    /// Bound on one connect attempt.
    pub connect_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from(&StreamSettings::default())
    }
}

impl From<&StreamSettings> for ControllerConfig {
    fn from(settings: &StreamSettings) -> Self {
        Self {
            backoff: settings.reconnect.clone(),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
        }
    }
}

#[derive(Debug)]
enum Command {
    SetTopics(BTreeSet<String>),
    Reconnect,
    Shutdown,
}

/// Handle to the connection actor.
///
/// Dropping the last handle stops the actor.
#[derive(Debug)]
pub struct ConnectionController {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionSnapshot>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionController {
    /// Start the actor. Decoded events are sent to `events`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        connector: Arc<dyn StreamConnector>,
        config: ControllerConfig,
        events: mpsc::UnboundedSender<StreamEvent>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionSnapshot::default());

        let actor = Actor {
            connector,
            backoff: Backoff::new(config.backoff),
            connect_timeout: config.connect_timeout,
            commands: command_rx,
            status: status_tx,
            events,
            desired: BTreeSet::new(),
            snapshot: ConnectionSnapshot::default(),
        };
        let task = tokio::spawn(actor.run());

        Self {
            commands,
            status,
            task: Mutex::new(Some(task)),
        }
    }

    /// Replace the topic set the channel should carry.
    ///
    /// Never blocks; the actor converges asynchronously.
    pub fn set_topics(&self, topics: BTreeSet<String>) {
        let _ = self.commands.send(Command::SetTopics(topics));
    }

    /// Reopen now, skipping any backoff wait. Leaves `Offline`.
    pub fn reconnect(&self) {
        let _ = self.commands.send(Command::Reconnect);
    }

    /// Close the channel and stop the actor. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.status.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    pub fn watch(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.status.clone()
    }
}

/// Where the actor goes next.
enum Phase {
    Waiting,
    Connecting,
    Open(EventStream),
    Reconnecting,
    Stopped,
}

struct Actor {
    connector: Arc<dyn StreamConnector>,
    backoff: Backoff,
    connect_timeout: Duration,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<ConnectionSnapshot>,
    events: mpsc::UnboundedSender<StreamEvent>,
    desired: BTreeSet<String>,
    snapshot: ConnectionSnapshot,
}

impl Actor {
    async fn run(mut self) {
        let mut phase = Phase::Waiting;
        loop {
            phase = match phase {
                Phase::Waiting => self.wait().await,
                Phase::Connecting => self.connect().await,
                Phase::Open(stream) => self.pump(stream).await,
                Phase::Reconnecting => self.back_off().await,
                Phase::Stopped => break,
            };
        }
        self.close();
        debug!("connection controller stopped");
    }

    /// Idle, Closed, or Offline: nothing to do until told.
    async fn wait(&mut self) -> Phase {
        loop {
            match self.commands.recv().await {
                None | Some(Command::Shutdown) => return Phase::Stopped,
                Some(Command::SetTopics(topics)) => {
                    let changed = topics != self.desired;
                    self.desired = topics;
                    if self.desired.is_empty() {
                        if self.snapshot.state == ConnectionState::Offline {
                            self.close();
                        }
                        continue;
                    }
                    if changed || self.snapshot.state != ConnectionState::Offline {
                        self.snapshot.retry_count = 0;
                        return Phase::Connecting;
                    }
                }
                Some(Command::Reconnect) => {
                    if !self.desired.is_empty() {
                        self.snapshot.retry_count = 0;
                        return Phase::Connecting;
                    }
                }
            }
        }
    }

    async fn connect(&mut self) -> Phase {
        let topics = self.desired.clone();
        self.publish(ConnectionState::Connecting, BTreeSet::new());
        debug!(topics = topics.len(), retry_count = self.snapshot.retry_count, "connecting");

        let connector = Arc::clone(&self.connector);
        let attempt_topics = topics.clone();
        let attempt = tokio::time::timeout(self.connect_timeout, async move {
            connector.connect(&attempt_topics).await
        });
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                biased;
                cmd = self.commands.recv() => match cmd {
                    None | Some(Command::Shutdown) => return Phase::Stopped,
                    Some(Command::SetTopics(next)) => {
                        if next == self.desired {
                            continue;
                        }
                        self.desired = next;
                        debug!("topics changed mid-connect, abandoning attempt");
                        if self.desired.is_empty() {
                            self.close();
                            return Phase::Waiting;
                        }
                        return Phase::Connecting;
                    }
                    Some(Command::Reconnect) => {}
                },
                result = &mut attempt => {
                    return match result {
                        Ok(Ok(stream)) => {
                            self.snapshot.retry_count = 0;
                            self.snapshot.last_error = None;
                            self.publish(ConnectionState::Open, topics);
                            info!(topics = %self.topics_label(), "push channel open");
                            Phase::Open(stream)
                        }
                        Ok(Err(e)) if e.is_session_expired() => {
                            warn!("session expired, push channel going offline");
                            self.snapshot.last_error = Some(e.to_string());
                            self.publish(ConnectionState::Offline, BTreeSet::new());
                            Phase::Waiting
                        }
                        Ok(Err(e)) => {
                            warn!(error = %e, category = %e.category(), "connect failed");
                            self.snapshot.last_error = Some(e.to_string());
                            Phase::Reconnecting
                        }
                        Err(_) => {
                            warn!(timeout_ms = self.connect_timeout.as_millis(), "connect timed out");
                            self.snapshot.last_error = Some("connect timed out".to_owned());
                            Phase::Reconnecting
                        }
                    };
                }
            }
        }
    }

    async fn pump(&mut self, mut stream: EventStream) -> Phase {
        loop {
            tokio::select! {
                biased;
                cmd = self.commands.recv() => match cmd {
                    None | Some(Command::Shutdown) => return Phase::Stopped,
                    Some(Command::SetTopics(next)) => {
                        if next == self.desired {
                            continue;
                        }
                        self.desired = next;
                        if self.desired.is_empty() {
                            info!("no topics left, closing push channel");
                            self.close();
                            return Phase::Waiting;
                        }
                        if !self.connector.supports_incremental() {
                            debug!("topics changed, reopening push channel");
                            return Phase::Connecting;
                        }
                        match self.connector.update_topics(&self.desired).await {
                            Ok(()) => {
                                let topics = self.desired.clone();
                                self.publish(ConnectionState::Open, topics);
                                debug!(topics = %self.topics_label(), "topics updated in place");
                            }
                            Err(e) => {
                                warn!(error = %e, "incremental update failed, reopening");
                                return Phase::Connecting;
                            }
                        }
                    }
                    Some(Command::Reconnect) => return Phase::Connecting,
                },
                item = stream.next() => match item {
                    Some(Ok(event)) => {
                        if let Some(event) = decode_event(&event) {
                            if self.events.send(event).is_err() {
                                return Phase::Stopped;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "push channel error");
                        self.snapshot.last_error = Some(e.to_string());
                        return Phase::Reconnecting;
                    }
                    None => {
                        info!("push channel closed by server");
                        self.snapshot.last_error = Some("stream closed by server".to_owned());
                        return Phase::Reconnecting;
                    }
                },
            }
        }
    }

    async fn back_off(&mut self) -> Phase {
        if self.snapshot.retry_count >= self.backoff.max_retries() {
            warn!(
                retry_count = self.snapshot.retry_count,
                "reconnect attempts exhausted, going offline"
            );
            self.publish(ConnectionState::Offline, BTreeSet::new());
            return Phase::Waiting;
        }

        let delay = self.backoff.next_delay(self.snapshot.retry_count);
        self.snapshot.retry_count += 1;
        self.publish(ConnectionState::Reconnecting, BTreeSet::new());
        metrics::counter!("pulse_reconnects_total").increment(1);
        info!(
            retry_count = self.snapshot.retry_count,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnecting after backoff"
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                cmd = self.commands.recv() => match cmd {
                    None | Some(Command::Shutdown) => return Phase::Stopped,
                    Some(Command::SetTopics(next)) => {
                        if next.is_empty() {
                            self.desired = next;
                            self.close();
                            return Phase::Waiting;
                        }
                        if next != self.desired {
                            debug!(
                                topics = next.len(),
                                "topic set changed during backoff, reconnecting now"
                            );
                            self.desired = next;
                            return Phase::Connecting;
                        }
                    }
                    Some(Command::Reconnect) => return Phase::Connecting,
                },
                () = &mut sleep => return Phase::Connecting,
            }
        }
    }

    fn close(&mut self) {
        self.snapshot.retry_count = 0;
        self.publish(ConnectionState::Closed, BTreeSet::new());
    }

    fn publish(&mut self, state: ConnectionState, active_topics: BTreeSet<String>) {
        let from = self.snapshot.state;
        self.snapshot.state = state;
        self.snapshot.active_topics = active_topics;
        if from != state {
            debug!(%from, to = %state, "connection state");
        }
        let _ = self.status.send_replace(self.snapshot.clone());
    }

    fn topics_label(&self) -> String {
        crate::connector::encode_topics(&self.snapshot.active_topics)
    }
}
