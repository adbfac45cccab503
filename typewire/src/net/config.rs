//! Construction-time configuration for servers and clients.

use std::time::Duration;

use crate::pool::DEFAULT_BLOCK_SIZE;

/// Configuration for one server or client.
///
/// Everything is supplied at construction; there is no runtime
/// reconfiguration.
#[derive(Clone, Debug)]
pub struct NetConfig {
    /// Listen address for a server, dial address for a client.
    pub endpoint: String,

    /// Upper bound on a single framed write. Combined with cancellation:
    /// whichever fires first aborts the write.
    pub write_timeout: Duration,

    /// Block size of the payload buffer pool.
    pub pool_block_size: usize,

    /// Whether stale pool returns raise instead of being no-ops.
    pub strict_pool: bool,
}

impl NetConfig {
    /// Configuration with defaults for everything but the endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            write_timeout: Duration::from_secs(5),
            pool_block_size: DEFAULT_BLOCK_SIZE,
            strict_pool: false,
        }
    }

    /// Override the per-write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Override the buffer-pool block size.
    pub fn with_pool_block_size(mut self, block_size: usize) -> Self {
        self.pool_block_size = block_size;
        self
    }

    /// Make stale pool returns raise instead of silently doing nothing.
    pub fn with_strict_pool(mut self) -> Self {
        self.strict_pool = true;
        self
    }
}
