//! WebSocket connection handling
//!
//! One handler per accepted client. The handler owns the read half of the
//! socket, the session's backend leg and its Injection tasks; a single writer
//! task owns the write half so every message to the client goes out in the
//! order it was queued.

use axum::extract::ws::{Message as Frame, WebSocket};
use futures::stream::StreamExt;
use futures::SinkExt;
use lumen_core::protocol::{ConnectedPayload, ExperienceAck, ExperiencePayload, StatusPayload};
use lumen_core::time::now_millis;
use lumen_core::{Message, SessionId};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::backend::{BackendLeg, LegClosed, LegHeartbeat};
use crate::injection::InjectionRunner;
use crate::server::BridgeState;
use crate::session::SessionGuard;

const WRITER_GRACE: Duration = Duration::from_secs(1);

/// Serve one client connection until either side closes it
pub async fn handle_connection(
    mut socket: WebSocket,
    state: BridgeState,
    instance_id: String,
    platform: String,
) {
    let Some(session_id) = state.sessions.open(&instance_id, &platform, now_millis()) else {
        warn!(instance = %instance_id, "Session limit reached, refusing connection");
        if let Ok(text) = Message::error("session limit reached").to_json() {
            let _ = socket.send(Frame::Text(text)).await;
        }
        let _ = socket.close().await;
        return;
    };
    let guard = SessionGuard::new(state.sessions.clone(), session_id);
    info!(
        session = %session_id,
        instance = %instance_id,
        platform = %platform,
        "Client connected"
    );

    let (sink, mut stream) = socket.split();
    let (outbound, queued) = mpsc::unbounded_channel();
    let writer = spawn_writer(session_id, sink, queued);

    let mut leg = open_backend_leg(&state, session_id, &instance_id, &platform, &outbound).await;
    let _ = outbound.send(Message::Connected(ConnectedPayload {
        session_id,
        capabilities: state.config.capabilities.clone(),
        backend_available: leg.is_some(),
    }));

    let handler = SessionHandler {
        runner: InjectionRunner::new(
            state.sessions.clone(),
            outbound.clone(),
            state.config.injection_step,
        ),
        state,
        session_id,
        instance_id,
        outbound,
    };
    let mut injections = JoinSet::new();

    loop {
        tokio::select! {
            frame = stream.next() => {
                let text = match frame {
                    Some(Ok(Frame::Text(text))) => text,
                    Some(Ok(Frame::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => text,
                        Err(_) => {
                            handler.reply(Message::error("binary frame is not UTF-8"));
                            continue;
                        }
                    },
                    Some(Ok(Frame::Ping(_))) | Some(Ok(Frame::Pong(_))) => continue,
                    Some(Ok(Frame::Close(frame))) => {
                        debug!(session = %session_id, ?frame, "Client sent close");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(session = %session_id, error = %e, "Client socket error");
                        break;
                    }
                    None => break,
                };
                handler.handle_text(&text, &leg, &mut injections);
            }

            closed = leg_closed(&mut leg) => {
                leg = None;
                handler.backend_lost(&closed.reason);
                for message in closed.unanswered {
                    handler.answer_locally(message);
                }
            }

            Some(joined) = injections.join_next() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        warn!(session = %session_id, error = %e, "Injection task panicked");
                    }
                }
            }
        }
    }

    // Teardown: Injections, backend leg, table entry, writer
    injections.shutdown().await;
    if let Some(leg) = leg.take() {
        leg.shutdown(handler.state.config.backend_connect_timeout).await;
    }
    guard.teardown();
    drop(handler);
    finish_writer(writer).await;
    info!(session = %session_id, "Client disconnected");
}

async fn open_backend_leg(
    state: &BridgeState,
    session_id: SessionId,
    instance_id: &str,
    platform: &str,
    outbound: &mpsc::UnboundedSender<Message>,
) -> Option<BackendLeg> {
    if !state.backend.is_configured() {
        return None;
    }
    match state.backend.open(instance_id, platform).await {
        Ok(connection) => {
            state.sessions.set_backend_connected(session_id, true);
            Some(BackendLeg::spawn(
                session_id,
                connection,
                outbound.clone(),
                state.sessions.clone(),
                LegHeartbeat::from_config(&state.config),
            ))
        }
        Err(e) => {
            warn!(session = %session_id, error = %e, "Backend unavailable, using fallback");
            None
        }
    }
}

fn spawn_writer(
    session_id: SessionId,
    mut sink: futures::stream::SplitSink<WebSocket, Frame>,
    mut queued: mpsc::UnboundedReceiver<Message>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = queued.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(session = %session_id, error = %e, "Failed to encode message");
                    continue;
                }
            };
            if let Err(e) = sink.send(Frame::Text(text)).await {
                debug!(session = %session_id, error = %e, "Client write failed");
                break;
            }
        }
        let _ = sink.close().await;
    })
}

async fn finish_writer(mut writer: JoinHandle<()>) {
    if timeout(WRITER_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
}

async fn leg_closed(leg: &mut Option<BackendLeg>) -> LegClosed {
    match leg {
        Some(leg) => leg.closed().await,
        None => std::future::pending().await,
    }
}

/// Message routing for one session
struct SessionHandler {
    state: BridgeState,
    session_id: SessionId,
    instance_id: String,
    outbound: mpsc::UnboundedSender<Message>,
    runner: InjectionRunner,
}

impl SessionHandler {
    fn reply(&self, message: Message) {
        // Fails only after the writer stopped, i.e. the client is gone
        let _ = self.outbound.send(message);
    }

    /// Forward to the backend, or answer locally when there is no live leg
    fn dispatch(&self, leg: &Option<BackendLeg>, message: Message) {
        let unsent = match leg {
            Some(leg) => leg.forward(message).err(),
            None => Some(message),
        };
        if let Some(message) = unsent {
            self.answer_locally(message);
        }
    }

    /// Degraded answer synthesized from the state held for this session
    fn answer_locally(&self, message: Message) {
        let latest = self.state.sessions.latest_state(self.session_id);
        let fallback = &self.state.fallback;
        match message {
            Message::GetState => {
                let response = fallback.state_response(&self.instance_id, latest);
                self.reply(Message::StateResponse(response));
            }
            Message::Query(query) => {
                let response = fallback.query_response(&self.instance_id, latest, &query);
                self.reply(Message::QueryResponse(response));
            }
            Message::Experience(payload) => {
                debug!(
                    session = %self.session_id,
                    experience = %payload.id,
                    "Experience handled locally"
                );
                let state = fallback.current_state(&self.instance_id, latest);
                self.reply(Message::ExperienceAck(ExperienceAck { id: payload.id }));
                self.reply(Message::StateSync(fallback.state_sync(state)));
            }
            other => debug!(
                session = %self.session_id,
                kind = %other.kind(),
                "Nothing to answer locally"
            ),
        }
    }

    fn handle_text(
        &self,
        text: &str,
        leg: &Option<BackendLeg>,
        injections: &mut JoinSet<()>,
    ) {
        self.state.sessions.touch(self.session_id, now_millis());

        let message = match Message::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(session = %self.session_id, error = %e, "Malformed client message");
                self.reply(Message::error(e.to_string()));
                return;
            }
        };

        match message {
            Message::Ping => self.reply(Message::Pong),
            Message::Pong => {}
            Message::Experience(payload) => self.on_experience(leg, payload),
            message @ (Message::GetState | Message::Query(_)) => self.dispatch(leg, message),
            Message::InjectionRequest(request) => {
                let runner = self.runner.clone();
                let session_id = self.session_id;
                injections.spawn(async move {
                    if let Err(e) = runner.run(session_id, request).await {
                        warn!(session = %session_id, error = %e, "Injection aborted");
                    }
                });
            }
            other => {
                let kind = other.kind();
                warn!(session = %self.session_id, %kind, "Unexpected message from client");
                self.reply(Message::error(format!("unexpected '{kind}' message from client")));
            }
        }
    }

    fn on_experience(&self, leg: &Option<BackendLeg>, payload: ExperiencePayload) {
        let sessions = &self.state.sessions;
        let latest = sessions.latest_state(self.session_id);
        let state = self
            .state
            .fallback
            .apply_experience(&self.instance_id, latest, &payload);
        sessions.record_state(self.session_id, state);
        sessions.record_experience(self.session_id);
        self.dispatch(leg, Message::Experience(payload));
    }

    fn backend_lost(&self, reason: &str) {
        warn!(session = %self.session_id, reason, "Backend leg lost, switching to fallback");
        self.state
            .sessions
            .set_backend_connected(self.session_id, false);
        self.reply(Message::Status(StatusPayload {
            backend_available: false,
            message: format!("backend unavailable: {reason}"),
        }));
    }
}
