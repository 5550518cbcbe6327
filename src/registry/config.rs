//! Registry configuration

use std::time::Duration;

use crate::server::upgrade::MAX_REQUEST_HEAD;

const MIN_REQUEST_HEAD: usize = 1024;

/// Settings shared by every front door a registry creates
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Reading the upgrade request head must finish within this time
    pub handshake_timeout: Duration,

    /// Upper bound for closing a front door or stream server
    pub close_timeout: Duration,

    /// Largest accepted upgrade request head
    pub max_request_head: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
            max_request_head: MAX_REQUEST_HEAD,
        }
    }
}

impl RegistryConfig {
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the request head limit (at least 1 KiB)
    pub fn max_request_head(mut self, size: usize) -> Self {
        self.max_request_head = size.max(MIN_REQUEST_HEAD);
        self
    }

    pub(crate) fn request_head_limit(&self) -> usize {
        self.max_request_head.max(MIN_REQUEST_HEAD)
    }
}
