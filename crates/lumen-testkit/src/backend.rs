//! Backends for bridge tests

use lumen_bridge::Backend;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::transport::MemoryTransport;

/// Base URL the in-memory backends pretend to live at
pub const MEMORY_BACKEND_URL: &str = "ws://backend.test/sync";

/// Backend that is configured but refuses every leg
pub fn unavailable_backend() -> Backend {
    memory_backend(MemoryTransport::refusing())
}

/// Backend whose legs are driven by the returned transport
pub fn channel_backend() -> (Backend, MemoryTransport) {
    let transport = MemoryTransport::new();
    (memory_backend(transport.clone()), transport)
}

fn memory_backend(transport: MemoryTransport) -> Backend {
    let base = Url::parse(MEMORY_BACKEND_URL).expect("static url parses");
    Backend::new(Arc::new(transport), Some(base), Duration::from_secs(1))
}
