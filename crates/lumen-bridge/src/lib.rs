//! Lumen Bridge - session multiplexer between sync clients and a backend
//!
//! Accepts client WebSocket connections, pairs each with an outbound backend
//! leg when one is available, and answers locally (tagged `degraded`) when it
//! is not. Sessions and their Injections live in one [`SessionTable`].

#![allow(missing_docs)]
#![forbid(unsafe_code)]

pub mod backend;
pub mod config;
pub mod fallback;
pub mod http;
pub mod injection;
pub mod server;
pub mod session;
pub mod websocket;

pub use backend::{Backend, BackendLeg, LegClosed, LegHeartbeat};
pub use config::BridgeConfig;
pub use fallback::Fallback;
pub use injection::InjectionRunner;
pub use server::{BridgeServer, BridgeState, BridgeStatus};
pub use session::{is_mobile, ConnectionSession, SessionGuard, SessionSummary, SessionTable};
