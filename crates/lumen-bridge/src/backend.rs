//! Outbound leg to the backend authority
//!
//! The bridge speaks the same envelope protocol to the backend as clients speak
//! to the bridge, so the outbound leg reuses the sync client's transport seam.
//! Each session gets its own leg, run by a relay task that owns the connection.

use lumen_core::time::now_millis;
use lumen_core::{LumenError, Message, Result, SessionId};
use lumen_sync::{SyncConnection, SyncTransport, WebSocketTransport};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::BridgeConfig;
use crate::session::SessionTable;

/// Platform reported for legs opened on behalf of HTTP requests
pub const HTTP_PLATFORM: &str = "http";

/// Opens backend legs
pub struct Backend {
    transport: Arc<dyn SyncTransport>,
    base: Option<Url>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl Backend {
    /// Backend reached over WebSocket at `config.backend_url`
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let transport = WebSocketTransport::new(
            config.backend_connect_timeout,
            config.backend_connect_timeout,
        );
        Ok(Self::new(
            Arc::new(transport),
            config.backend_base()?,
            config.backend_connect_timeout,
        )
        .with_request_timeout(config.backend_request_timeout))
    }

    pub fn new(
        transport: Arc<dyn SyncTransport>,
        base: Option<Url>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            base,
            connect_timeout,
            request_timeout: connect_timeout,
        }
    }

    /// Time allowed for [`request`](Self::request) to get its answer
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.base.is_some()
    }

    /// `<base>/<instance_id>?platform=<platform>`
    pub fn url_for(&self, instance_id: &str, platform: &str) -> Result<Option<Url>> {
        let Some(mut url) = self.base.clone() else {
            return Ok(None);
        };
        if url.cannot_be_a_base() {
            return Err(LumenError::config(format!("backend url '{url}' cannot be a base")));
        }
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(instance_id);
        }
        url.query_pairs_mut().append_pair("platform", platform);
        Ok(Some(url))
    }

    /// Open one leg; any failure is reported as backend unavailability
    pub async fn open(
        &self,
        instance_id: &str,
        platform: &str,
    ) -> Result<Box<dyn SyncConnection>> {
        let url = self
            .url_for(instance_id, platform)?
            .ok_or_else(|| LumenError::backend_unavailable("no backend configured"))?;

        match timeout(self.connect_timeout, self.transport.connect(&url)).await {
            Ok(Ok(connection)) => {
                debug!(url = %url, "Backend leg open");
                Ok(connection)
            }
            Ok(Err(e)) => Err(LumenError::backend_unavailable(e.to_string())),
            Err(_) => Err(LumenError::backend_unavailable(format!(
                "connect timeout after {:?}",
                self.connect_timeout
            ))),
        }
    }

    /// Send one request over a short-lived leg and collect the answer
    ///
    /// Everything the backend pushes before the reply is returned with it, so a
    /// `state_sync` sent ahead of an `experience_ack` is not lost.
    pub async fn request(&self, instance_id: &str, message: &Message) -> Result<Vec<Message>> {
        let mut connection = self.open(instance_id, HTTP_PLATFORM).await?;
        let result = timeout(self.request_timeout, exchange(connection.as_mut(), message)).await;
        connection.close().await;
        match result {
            Ok(Ok(replies)) => Ok(replies),
            Ok(Err(e)) => Err(LumenError::backend_unavailable(e.to_string())),
            Err(_) => Err(LumenError::backend_unavailable(format!(
                "no answer to '{}' within {:?}",
                message.kind(),
                self.request_timeout
            ))),
        }
    }
}

async fn exchange(
    connection: &mut dyn SyncConnection,
    request: &Message,
) -> Result<Vec<Message>> {
    send(connection, request).await?;
    let mut replies = Vec::new();
    loop {
        let envelope = match connection.recv().await {
            None => return Err(LumenError::transport("backend closed before answering")),
            Some(Err(e)) if e.is_transport() => return Err(e),
            Some(Err(e)) => {
                warn!(error = %e, "Malformed backend frame");
                continue;
            }
            Some(Ok(envelope)) => envelope,
        };
        match Message::from_envelope(&envelope) {
            Ok(Message::Ping) => send(connection, &Message::Pong).await?,
            Ok(Message::Pong | Message::Connected(_)) => {}
            Ok(reply) => {
                let done = answers(request, &reply);
                replies.push(reply);
                if done {
                    return Ok(replies);
                }
            }
            Err(e) => warn!(error = %e, "Dropping backend message"),
        }
    }
}

/// Whether `reply` is the backend's answer to the client message `pending`
fn answers(pending: &Message, reply: &Message) -> bool {
    match (pending, reply) {
        (Message::GetState, Message::StateResponse(_)) => true,
        (Message::Query(query), Message::QueryResponse(response)) => {
            query.query == response.query
        }
        (Message::Experience(experience), Message::ExperienceAck(ack)) => {
            experience.id == ack.id
        }
        _ => false,
    }
}

fn expects_reply(message: &Message) -> bool {
    matches!(
        message,
        Message::GetState | Message::Query(_) | Message::Experience(_)
    )
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("base", &self.base.as_ref().map(Url::as_str))
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

/// Ping schedule of a leg
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegHeartbeat {
    pub interval: Duration,
    pub pong_timeout: Duration,
}

impl LegHeartbeat {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            interval: config.backend_heartbeat_interval,
            pong_timeout: config.backend_pong_timeout,
        }
    }
}

/// How a leg ended
#[derive(Debug, Clone, PartialEq)]
pub struct LegClosed {
    pub reason: String,
    /// Client messages the backend never answered, oldest first
    ///
    /// Covers requests sent but not replied to as well as messages still queued
    /// when the leg stopped.
    pub unanswered: Vec<Message>,
}

/// Handle to a running relay task
#[derive(Debug)]
pub struct BackendLeg {
    to_backend: mpsc::UnboundedSender<Message>,
    task: JoinHandle<LegClosed>,
}

impl BackendLeg {
    /// Start relaying between `connection` and the client writer `to_client`
    ///
    /// Messages from the backend are forwarded to the client unchanged, except
    /// that `state_sync` pushes are also recorded as the session's latest state
    /// and backend heartbeats are answered here. The leg pings the backend on
    /// `heartbeat.interval` and gives up when a pong does not arrive in time.
    pub fn spawn(
        session_id: SessionId,
        connection: Box<dyn SyncConnection>,
        to_client: mpsc::UnboundedSender<Message>,
        sessions: Arc<SessionTable>,
        heartbeat: LegHeartbeat,
    ) -> Self {
        let (to_backend, from_client) = mpsc::unbounded_channel();
        let relay = Relay {
            session_id,
            connection,
            from_client,
            to_client,
            sessions,
            outstanding: VecDeque::new(),
        };
        let task = tokio::spawn(relay.run(heartbeat));
        Self { to_backend, task }
    }

    /// Queue a client message for the backend
    ///
    /// Hands the message back once the relay has stopped. A message accepted
    /// here and then left unanswered is returned by [`closed`](Self::closed).
    pub fn forward(&self, message: Message) -> std::result::Result<(), Message> {
        self.to_backend.send(message).map_err(|e| e.0)
    }

    /// Resolves once the relay stops
    ///
    /// Must not be polled again after it has resolved.
    pub async fn closed(&mut self) -> LegClosed {
        match (&mut self.task).await {
            Ok(closed) => closed,
            Err(e) => LegClosed {
                reason: format!("relay task failed: {e}"),
                unanswered: Vec::new(),
            },
        }
    }

    /// Close the backend connection and wait for the relay to finish
    pub async fn shutdown(self, grace: Duration) {
        let Self { to_backend, mut task } = self;
        drop(to_backend);
        if timeout(grace, &mut task).await.is_err() {
            task.abort();
        }
    }
}

struct Relay {
    session_id: SessionId,
    connection: Box<dyn SyncConnection>,
    from_client: mpsc::UnboundedReceiver<Message>,
    to_client: mpsc::UnboundedSender<Message>,
    sessions: Arc<SessionTable>,
    /// Forwarded requests waiting for their reply
    outstanding: VecDeque<Message>,
}

impl Relay {
    async fn run(mut self, heartbeat: LegHeartbeat) -> LegClosed {
        let reason = self.pump(heartbeat).await;

        self.from_client.close();
        let mut unanswered: Vec<Message> = self.outstanding.drain(..).collect();
        while let Ok(message) = self.from_client.try_recv() {
            unanswered.push(message);
        }
        if !unanswered.is_empty() {
            debug!(
                session = %self.session_id,
                count = unanswered.len(),
                "Returning unanswered messages to the session"
            );
        }
        LegClosed { reason, unanswered }
    }

    async fn pump(&mut self, heartbeat: LegHeartbeat) -> String {
        let mut ticks = interval_at(Instant::now() + heartbeat.interval, heartbeat.interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pong_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                inbound = self.connection.recv() => match inbound {
                    None => return "backend closed the connection".to_string(),
                    Some(Err(e)) if e.is_transport() => return e.to_string(),
                    Some(Err(e)) => {
                        warn!(session = %self.session_id, error = %e, "Malformed backend frame");
                    }
                    Some(Ok(envelope)) => match Message::from_envelope(&envelope) {
                        Ok(Message::Ping) => {
                            if let Err(e) = send(self.connection.as_mut(), &Message::Pong).await {
                                return e.to_string();
                            }
                        }
                        Ok(Message::Pong) => pong_deadline = None,
                        Ok(Message::Connected(payload)) => {
                            debug!(
                                session = %self.session_id,
                                backend_session = %payload.session_id,
                                "Backend accepted leg"
                            );
                        }
                        Ok(message) => {
                            if let Some(reason) = self.relay_to_client(message).await {
                                return reason;
                            }
                        }
                        Err(e) => warn!(
                            session = %self.session_id,
                            error = %e,
                            "Dropping backend message"
                        ),
                    },
                },

                _ = wait_until(pong_deadline) => {
                    warn!(
                        session = %self.session_id,
                        timeout = ?heartbeat.pong_timeout,
                        "Backend heartbeat timed out"
                    );
                    self.connection.close().await;
                    return "backend heartbeat timeout".to_string();
                }

                _ = ticks.tick() => {
                    if pong_deadline.is_none() {
                        if let Err(e) = send(self.connection.as_mut(), &Message::Ping).await {
                            return e.to_string();
                        }
                        pong_deadline = Some(Instant::now() + heartbeat.pong_timeout);
                    }
                }

                outbound = self.from_client.recv() => match outbound {
                    Some(message) => {
                        let result = send(self.connection.as_mut(), &message).await;
                        if expects_reply(&message) {
                            self.outstanding.push_back(message);
                        }
                        if let Err(e) = result {
                            return e.to_string();
                        }
                    }
                    None => {
                        info!(session = %self.session_id, "Closing backend leg");
                        self.connection.close().await;
                        return "session closed".to_string();
                    }
                },
            }
        }
    }

    /// Forward one backend message; `Some` with a reason if the client is gone
    async fn relay_to_client(&mut self, message: Message) -> Option<String> {
        if let Some(answered) = self.outstanding.iter().position(|p| answers(p, &message)) {
            self.outstanding.remove(answered);
        }
        if let Message::StateSync(payload) = &message {
            self.sessions
                .record_state(self.session_id, payload.state.clone());
        }
        if self.to_client.send(message).is_err() {
            self.connection.close().await;
            return Some("client writer closed".to_string());
        }
        None
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
