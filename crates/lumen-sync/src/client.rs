//! Sync Client
//!
//! [`SyncClient`] is a cheap handle; the connection lifecycle runs in one spawned
//! task (the actor) that owns the transport, the heartbeat and the backoff timer.
//! Handle and actor share only the state snapshot, the Experience Buffer and the
//! notification channel.
//!
//! Every Experience is evolved synchronously on the caller's thread, pushed to the
//! buffer and then flushed by the actor. While the actor is not connected the
//! flush is a no-op, so offline Experiences simply wait in the buffer and are
//! replayed in order after the next successful open. Replay sends one item per
//! turn of the session loop, so commands and server frames are still handled
//! while a long backlog drains.

use async_trait::async_trait;
use lumen_core::protocol::{
    ExperiencePayload, InjectionRequestPayload, QueryPayload, StateSyncPayload,
};
use lumen_core::time::now_millis;
use lumen_core::{
    Experience, EvolutionEngine, ExperienceInput, InjectionKind, LumenError, Message, Result,
    StateSnapshot,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::buffer::{ExperienceBuffer, ExperienceSink};
use crate::config::SyncClientConfig;
use crate::notify::{ConnectionState, Notifier, SyncNotification};
use crate::transport::{SyncConnection, SyncTransport, WebSocketTransport};

#[derive(Debug)]
enum Command {
    Connect,
    Reset,
    Flush,
    Send(Message),
    Shutdown,
}

/// Handle to one instance's sync layer
pub struct SyncClient {
    config: Arc<SyncClientConfig>,
    engine: EvolutionEngine,
    state: Arc<Mutex<StateSnapshot>>,
    buffer: Arc<ExperienceBuffer>,
    notifier: Notifier,
    connection: watch::Receiver<ConnectionState>,
    commands: mpsc::UnboundedSender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncClient {
    /// Create a client starting from `config.initial_score`
    ///
    /// Spawns the connection actor, so it must be called inside a tokio runtime.
    /// The client stays `Disconnected` until [`connect`](Self::connect).
    pub fn new(config: SyncClientConfig, transport: Arc<dyn SyncTransport>) -> Result<Self> {
        let engine = EvolutionEngine::new(config.evolution.clone())?;
        let initial =
            engine.initial_state(config.instance_id.clone(), config.initial_score, now_millis());
        Self::with_state(config, transport, initial)
    }

    /// Create a client over the WebSocket transport
    pub fn websocket(config: SyncClientConfig) -> Result<Self> {
        let transport = WebSocketTransport::new(config.connect_timeout, config.pong_timeout);
        Self::new(config, Arc::new(transport))
    }

    /// Create a client resuming from a previously persisted snapshot
    pub fn with_state(
        config: SyncClientConfig,
        transport: Arc<dyn SyncTransport>,
        initial: StateSnapshot,
    ) -> Result<Self> {
        config.validate()?;
        if initial.instance_id() != config.instance_id {
            return Err(LumenError::invalid(format!(
                "snapshot belongs to '{}', not '{}'",
                initial.instance_id(),
                config.instance_id
            )));
        }

        let url = config.connection_url()?;
        let engine = EvolutionEngine::new(config.evolution.clone())?;
        let initial = initial.normalized(&engine.config().phases);
        let config = Arc::new(config);

        let state = Arc::new(Mutex::new(initial));
        let buffer = Arc::new(ExperienceBuffer::new(config.buffer_capacity));
        let notifier = Notifier::new(config.notification_capacity);
        let (status_tx, status_rx) = watch::channel(ConnectionState::Disconnected);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            config: config.clone(),
            engine: engine.clone(),
            state: state.clone(),
            buffer: buffer.clone(),
            notifier: notifier.clone(),
            transport,
            url,
            status: status_tx,
            commands: command_rx,
            attempts: 0,
        };
        let task = tokio::spawn(actor.run());

        Ok(Self {
            config,
            engine,
            state,
            buffer,
            notifier,
            connection: status_rx,
            commands: command_tx,
            task: Mutex::new(Some(task)),
        })
    }

    /// Evolve local state with one Experience and queue it for delivery
    ///
    /// Never blocks on the network and never fails: transport problems only
    /// affect when the Experience reaches the server.
    pub fn process_experience(&self, input: ExperienceInput) -> StateSnapshot {
        let (after, evicted) = {
            let mut state = self.state.lock();
            let experience = self.engine.record(&state, input, now_millis());
            *state = experience.state_after().clone();
            // Pushed under the state lock so buffer order matches evolution order
            let evicted = self.buffer.push(experience);
            (state.clone(), evicted)
        };

        if let Some(evicted) = evicted {
            self.notifier
                .publish(SyncNotification::ExperienceDropped(evicted.id()));
        }
        self.notifier
            .publish(SyncNotification::StateChanged(after.clone()));
        self.command(Command::Flush);
        after
    }

    /// Start connecting; a no-op while already connecting or connected
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Leave standalone mode with a fresh attempt budget
    pub fn reset(&self) {
        self.command(Command::Reset);
    }

    /// Ask the server for its view of this instance's state
    pub fn request_state(&self) {
        self.command(Command::Send(Message::GetState));
    }

    /// Send a free-form query; the answer arrives as [`SyncNotification::QueryAnswered`]
    pub fn query(&self, query: impl Into<String>, params: serde_json::Value) {
        self.command(Command::Send(Message::Query(QueryPayload {
            query: query.into(),
            params,
        })));
    }

    /// Request an Injection; updates arrive as [`SyncNotification::InjectionUpdate`]
    pub fn request_injection(
        &self,
        target_process: impl Into<String>,
        kind: InjectionKind,
        requested_level: f64,
    ) {
        self.command(Command::Send(Message::InjectionRequest(InjectionRequestPayload {
            target_process: target_process.into(),
            kind,
            requested_level,
        })));
    }

    /// Stop the actor and close any open connection
    ///
    /// Local state and buffered Experiences are left untouched.
    pub async fn shutdown(&self) {
        self.command(Command::Shutdown);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Sync client task ended abnormally");
            }
        }
    }

    /// Current local state
    pub fn state(&self) -> StateSnapshot {
        self.state.lock().clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Watch connection state transitions
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    /// Subscribe to notifications published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotification> {
        self.notifier.subscribe()
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Undelivered Experiences, oldest first
    pub fn buffered(&self) -> Vec<Experience> {
        self.buffer.snapshot()
    }

    /// Experiences lost to buffer overflow
    pub fn dropped_experiences(&self) -> u64 {
        self.buffer.dropped()
    }

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    pub fn config(&self) -> &SyncClientConfig {
        &self.config
    }

    fn command(&self, command: Command) {
        if let Err(mpsc::error::SendError(command)) = self.commands.send(command) {
            debug!(?command, "Sync client task has stopped, ignoring command");
        }
    }
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("instance_id", &self.config.instance_id)
            .field("connection", &self.connection_state())
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

enum SessionEnd {
    Lost(String),
    Shutdown,
}

/// Owns the connection and every timer; runs until shutdown
struct Actor {
    config: Arc<SyncClientConfig>,
    engine: EvolutionEngine,
    state: Arc<Mutex<StateSnapshot>>,
    buffer: Arc<ExperienceBuffer>,
    notifier: Notifier,
    transport: Arc<dyn SyncTransport>,
    url: Option<Url>,
    status: watch::Sender<ConnectionState>,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Reconnect cycles since the last successful open
    attempts: u32,
}

impl Actor {
    async fn run(mut self) {
        loop {
            let keep_running = match self.current() {
                ConnectionState::Disconnected | ConnectionState::Standalone => self.idle().await,
                ConnectionState::Connecting | ConnectionState::Connected => self.connect().await,
                ConnectionState::Reconnecting => self.backoff().await,
            };
            if !keep_running {
                break;
            }
        }
        debug!(instance = %self.config.instance_id, "Sync client task stopped");
    }

    fn current(&self) -> ConnectionState {
        *self.status.borrow()
    }

    fn set_state(&self, to: ConnectionState) {
        let from = self.status.send_replace(to);
        if from != to {
            debug!(instance = %self.config.instance_id, %from, %to, "Connection state changed");
            self.notifier
                .publish(SyncNotification::ConnectionChanged { from, to });
        }
    }

    /// Disconnected or standalone: wait for instructions
    async fn idle(&mut self) -> bool {
        let command = self.commands.recv().await;
        match command {
            Some(Command::Connect) if self.current() == ConnectionState::Standalone => {
                debug!("Ignoring connect while standalone; reset first");
                true
            }
            Some(Command::Connect) if self.url.is_none() => {
                info!(
                    instance = %self.config.instance_id,
                    "No endpoint configured, running standalone"
                );
                self.set_state(ConnectionState::Standalone);
                true
            }
            Some(Command::Connect) => {
                self.set_state(ConnectionState::Connecting);
                true
            }
            Some(Command::Reset) => {
                if self.current() == ConnectionState::Standalone {
                    info!(instance = %self.config.instance_id, "Leaving standalone mode");
                    self.attempts = 0;
                    self.set_state(ConnectionState::Disconnected);
                }
                true
            }
            other => self.offline_command(other),
        }
    }

    /// Commands arriving while no connection is open
    fn offline_command(&mut self, command: Option<Command>) -> bool {
        match command {
            None | Some(Command::Shutdown) => {
                self.set_state(ConnectionState::Disconnected);
                false
            }
            Some(Command::Connect) | Some(Command::Reset) => {
                debug!(state = %self.current(), "Connection attempt already scheduled");
                true
            }
            // Experiences wait in the buffer until the next open
            Some(Command::Flush) => true,
            Some(Command::Send(message)) => {
                debug!(kind = %message.kind(), "Not connected, dropping message");
                true
            }
        }
    }

    async fn connect(&mut self) -> bool {
        let Some(url) = self.url.clone() else {
            self.set_state(ConnectionState::Standalone);
            return true;
        };
        self.set_state(ConnectionState::Connecting);
        debug!(url = %url, attempt = self.attempts, "Opening sync connection");

        let transport = Arc::clone(&self.transport);
        let attempt = timeout(self.config.connect_timeout, transport.connect(&url));
        tokio::pin!(attempt);

        let result = loop {
            tokio::select! {
                result = &mut attempt => break result,
                command = self.commands.recv() => {
                    if !self.offline_command(command) {
                        return false;
                    }
                }
            }
        };

        let connection = match result {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                warn!(url = %url, error = %e, "Sync connection failed");
                self.connection_lost(&e.to_string());
                return true;
            }
            Err(_) => {
                warn!(url = %url, timeout = ?self.config.connect_timeout, "Sync connection timed out");
                self.connection_lost("connect timeout");
                return true;
            }
        };

        self.attempts = 0;
        self.set_state(ConnectionState::Connected);
        info!(instance = %self.config.instance_id, url = %url, "Sync connection open");

        match self.run_session(connection).await {
            SessionEnd::Lost(reason) => {
                self.connection_lost(&reason);
                true
            }
            SessionEnd::Shutdown => {
                self.set_state(ConnectionState::Disconnected);
                false
            }
        }
    }

    async fn backoff(&mut self) -> bool {
        let delay = self.config.reconnect.delay(self.attempts);
        let timer = sleep(delay);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                _ = &mut timer => break,
                command = self.commands.recv() => {
                    if !self.offline_command(command) {
                        return false;
                    }
                }
            }
        }

        self.attempts += 1;
        self.set_state(ConnectionState::Connecting);
        true
    }

    fn connection_lost(&mut self, reason: &str) {
        let max_attempts = self.config.reconnect.max_attempts;
        if self.attempts < max_attempts {
            info!(
                instance = %self.config.instance_id,
                attempt = self.attempts + 1,
                max_attempts,
                delay = ?self.config.reconnect.delay(self.attempts),
                reason,
                "Scheduling reconnect"
            );
            self.set_state(ConnectionState::Reconnecting);
        } else {
            error!(
                instance = %self.config.instance_id,
                attempts = self.attempts,
                reason,
                buffered = self.buffer.len(),
                "Reconnect attempts exhausted, entering standalone mode"
            );
            self.set_state(ConnectionState::Standalone);
            self.notifier.publish(SyncNotification::Exhausted {
                attempts: self.attempts,
            });
        }
    }

    async fn run_session(&mut self, mut connection: Box<dyn SyncConnection>) -> SessionEnd {
        let mut next_replay = (!self.buffer.is_empty()).then(Instant::now);
        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pong_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                inbound = connection.recv() => match inbound {
                    None => return SessionEnd::Lost("closed by server".to_string()),
                    Some(Err(e)) if e.is_transport() => return SessionEnd::Lost(e.to_string()),
                    Some(Err(e)) => self.protocol_violation(e),
                    Some(Ok(envelope)) => match Message::from_envelope(&envelope) {
                        Ok(Message::Pong) => pong_deadline = None,
                        Ok(Message::Ping) => {
                            if let Err(e) = send(connection.as_mut(), &Message::Pong).await {
                                return SessionEnd::Lost(e.to_string());
                            }
                        }
                        Ok(message) => self.handle_message(message),
                        Err(e) => self.protocol_violation(e),
                    },
                },

                _ = wait_until(pong_deadline) => {
                    warn!(
                        instance = %self.config.instance_id,
                        timeout = ?self.config.pong_timeout,
                        "Heartbeat timed out"
                    );
                    connection.close().await;
                    return SessionEnd::Lost("heartbeat timeout".to_string());
                }

                _ = heartbeat.tick() => {
                    if pong_deadline.is_none() {
                        if let Err(e) = send(connection.as_mut(), &Message::Ping).await {
                            return SessionEnd::Lost(e.to_string());
                        }
                        pong_deadline = Some(Instant::now() + self.config.pong_timeout);
                    }
                }

                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => {
                        connection.close().await;
                        return SessionEnd::Shutdown;
                    }
                    Some(Command::Flush) => {
                        if next_replay.is_none() && !self.buffer.is_empty() {
                            next_replay = Some(Instant::now());
                        }
                    }
                    Some(Command::Send(message)) => {
                        if let Err(e) = send(connection.as_mut(), &message).await {
                            return SessionEnd::Lost(e.to_string());
                        }
                    }
                    Some(Command::Connect) | Some(Command::Reset) => {
                        debug!("Already connected");
                    }
                },

                _ = wait_until(next_replay) => {
                    next_replay = None;
                    if let Err(e) = self.replay_one(connection.as_mut()).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                    if !self.buffer.is_empty() {
                        next_replay = Some(Instant::now() + self.config.drain_pacing);
                    }
                }
            }
        }
    }

    /// Send the oldest buffered Experience
    async fn replay_one(&self, connection: &mut dyn SyncConnection) -> Result<()> {
        let mut sink = ConnectionSink {
            connection,
            platform: &self.config.platform,
        };
        if let Some(id) = self.buffer.deliver_next(&mut sink).await? {
            debug!(id = %id, remaining = self.buffer.len(), "Replayed buffered experience");
        }
        Ok(())
    }

    fn handle_message(&self, message: Message) {
        match message {
            Message::Connected(payload) => {
                info!(
                    session = %payload.session_id,
                    backend_available = payload.backend_available,
                    "Server accepted session"
                );
                self.notifier.publish(SyncNotification::Connected {
                    session_id: payload.session_id,
                    capabilities: payload.capabilities,
                    backend_available: payload.backend_available,
                });
            }
            Message::ExperienceAck(ack) => {
                self.buffer.remove(ack.id);
                self.notifier
                    .publish(SyncNotification::ExperienceAcknowledged(ack.id));
            }
            Message::StateSync(payload) => self.reconcile(payload),
            Message::StateResponse(mut payload) => {
                let phases = &self.engine.config().phases;
                payload.state = payload.state.map(|s| s.normalized(phases));
                self.notifier.publish(SyncNotification::StateReport(payload));
            }
            Message::QueryResponse(payload) => {
                self.notifier.publish(SyncNotification::QueryAnswered(payload));
            }
            Message::InjectionResult(injection) => {
                debug!(
                    injection = %injection.injection_id,
                    status = %injection.status(),
                    "Injection update"
                );
                self.notifier
                    .publish(SyncNotification::InjectionUpdate(injection));
            }
            Message::Status(payload) => {
                info!(
                    backend_available = payload.backend_available,
                    message = %payload.message,
                    "Server backend status changed"
                );
                self.notifier.publish(SyncNotification::BackendStatus(payload));
            }
            Message::Error(payload) => {
                warn!(message = %payload.message, "Server reported an error");
                self.notifier
                    .publish(SyncNotification::ServerError(payload.message));
            }
            other => self.protocol_violation(LumenError::protocol(format!(
                "unexpected '{}' message from server",
                other.kind()
            ))),
        }
    }

    /// Adopt a pushed state unless it is degraded or older than ours
    fn reconcile(&self, payload: StateSyncPayload) {
        let incoming = payload.state.normalized(&self.engine.config().phases);
        if incoming.instance_id() != self.config.instance_id {
            self.protocol_violation(LumenError::protocol(format!(
                "state_sync for foreign instance '{}'",
                incoming.instance_id()
            )));
            return;
        }

        let adopted = {
            let mut state = self.state.lock();
            let adopt = !payload.degraded && incoming.updated_at() >= state.updated_at();
            if adopt {
                *state = incoming.clone();
            }
            adopt
        };

        debug!(
            score = incoming.score(),
            phase = %incoming.phase(),
            degraded = payload.degraded,
            adopted,
            "Received server state"
        );
        self.notifier.publish(SyncNotification::AuthoritativeState {
            state: incoming.clone(),
            degraded: payload.degraded,
            adopted,
        });
        if adopted {
            self.notifier.publish(SyncNotification::StateChanged(incoming));
        }
    }

    fn protocol_violation(&self, error: LumenError) {
        warn!(error = %error, "Dropping malformed message");
        self.notifier
            .publish(SyncNotification::ProtocolViolation(error.to_string()));
    }
}

/// Adapts an open connection to the buffer's delivery
struct ConnectionSink<'a> {
    connection: &'a mut dyn SyncConnection,
    platform: &'a str,
}

#[async_trait]
impl ExperienceSink for ConnectionSink<'_> {
    async fn deliver(&mut self, experience: &Experience) -> Result<()> {
        let payload = ExperiencePayload::from_experience(experience, self.platform);
        send(&mut *self.connection, &Message::Experience(payload)).await
    }
}

async fn send(connection: &mut dyn SyncConnection, message: &Message) -> Result<()> {
    connection.send(message.to_envelope(now_millis())?).await
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
