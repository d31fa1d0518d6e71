//! Runtime configuration for the tunnel client.

use crate::vpn_core::error::{VpnError, VpnResult};
use crate::vpn_core::routes::Platform;
use std::time::Duration;

/// Interval between client heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);

/// Deadline for a single frame write on the tunnel connection.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for establishing the TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed delay between reconnection cycles.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(3);

/// Prefix length of the tunnel network assigned to the interface.
pub const DEFAULT_PREFIX_LEN: u8 = 24;

/// Capacity of the outbound frame queue.
///
/// Producers (interface reader, heartbeat) block when it is full, so a slow
/// link holds back reads from the TUN device instead of growing memory.
pub const DEFAULT_OUTBOUND_QUEUE_SIZE: usize = 1024;

/// Timers used by the supervisor and its sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimings {
    pub heartbeat_interval: Duration,
    pub write_timeout: Duration,
    pub connect_timeout: Duration,
    pub cooldown: Duration,
}

impl Default for ClientTimings {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// Tunnel client configuration.
#[derive(Debug, Clone)]
pub struct VpnClientConfig {
    /// Static server address, used when discovery yields nothing.
    pub server_addr: Option<String>,
    /// Shared secret sent during authorization.
    pub auth_key: String,
    /// Prefix length for the interface address.
    pub prefix_len: u8,
    /// Outbound queue capacity in frames.
    pub outbound_queue_size: usize,
    /// Command profile for interface and route setup.
    pub platform: Platform,
    pub timings: ClientTimings,
}

impl VpnClientConfig {
    /// Configuration with defaults for everything but the key.
    pub fn new(auth_key: impl Into<String>) -> Self {
        Self {
            server_addr: None,
            auth_key: auth_key.into(),
            prefix_len: DEFAULT_PREFIX_LEN,
            outbound_queue_size: DEFAULT_OUTBOUND_QUEUE_SIZE,
            platform: Platform::current(),
            timings: ClientTimings::default(),
        }
    }

    /// Set the static server address.
    pub fn with_server_addr(mut self, addr: impl Into<String>) -> Self {
        self.server_addr = Some(addr.into());
        self
    }

    /// Override the timers.
    pub fn with_timings(mut self, timings: ClientTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Override the command profile.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn validate(&self) -> VpnResult<()> {
        if self.prefix_len == 0 || self.prefix_len > 30 {
            return Err(VpnError::config(format!(
                "Invalid prefix length {}: must be 1-30",
                self.prefix_len
            )));
        }
        if self.outbound_queue_size == 0 {
            return Err(VpnError::config("Outbound queue size must be at least 1"));
        }
        if self.timings.heartbeat_interval.is_zero() {
            return Err(VpnError::config("Heartbeat interval must be non-zero"));
        }
        Ok(())
    }
}
