//! Lumen testing infrastructure
//!
//! In-memory transports and backends plus small fixtures shared by the
//! integration tests of the sync client and the bridge.
//!
//! ```toml
//! [dev-dependencies]
//! lumen-testkit = { path = "../lumen-testkit" }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

pub mod backend;
pub mod fixtures;
pub mod transport;

pub use backend::{channel_backend, unavailable_backend, MEMORY_BACKEND_URL};
pub use fixtures::*;
pub use transport::{MemoryConnection, MemoryTransport, ServerEnd};
