//! Session configuration.

use std::time::Duration;

/// Default timeout of a single USB transfer.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default bulk chunk size.
///
/// Tied to the timeout: at the *64 KiB/s* some SoCs manage, a *512 KiB* chunk still completes in
/// about 8 seconds.
const DEFAULT_MAX_BULK: usize = 512 * 1024;
/// Largest block moved by a single FEL read or write request.
const FEL_MAX_BLOCK: u32 = 64 * 1024;

/// Transfer limits and timeouts used by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    timeout: Duration,
    max_bulk_transfer: usize,
    max_block_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            timeout: DEFAULT_TIMEOUT,
            max_bulk_transfer: DEFAULT_MAX_BULK,
            max_block_size: FEL_MAX_BLOCK,
        }
    }
}

impl Config {
    /// Sets the timeout applied to every single USB transfer.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the largest chunk handed to the USB stack in one bulk transfer.
    ///
    /// Zero is treated as one byte.
    pub fn with_max_bulk_transfer(mut self, size: usize) -> Self {
        self.max_bulk_transfer = size.max(1);
        self
    }

    /// Sets the largest block moved by one FEL read or write request.
    ///
    /// Zero is treated as one byte.
    pub fn with_max_block_size(mut self, size: u32) -> Self {
        self.max_block_size = size.max(1);
        self
    }

    /// Gets the per-transfer timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Gets the bulk transfer chunk size.
    pub fn max_bulk_transfer(&self) -> usize {
        self.max_bulk_transfer
    }

    /// Gets the FEL block size.
    pub fn max_block_size(&self) -> u32 {
        self.max_block_size
    }
}
