//! Centralized configuration for outproc.
//!
//! Constants for the wire format, agent call behavior and the child host.

use std::time::Duration;

/// Channel and framing limits.
pub struct ChannelConfig;

impl ChannelConfig {
    /// Largest frame (kind byte + payload) accepted on either side.
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16MB
    /// Size of the length prefix in front of every frame.
    pub const LENGTH_PREFIX_SIZE: usize = 4;
}

/// Parent-side agent configuration.
pub struct AgentConfig;

impl AgentConfig {
    /// Default bound on `call()`. `None` blocks until a reply or channel failure.
    pub const DEFAULT_CALL_TIMEOUT: Option<Duration> = None;
    /// How long `wait_for_exit` waits after a polite dispose by default.
    pub const EXIT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);
    /// How long `wait_for_exit` waits after a kill by default.
    pub const KILL_WAIT_TIMEOUT: Duration = Duration::from_secs(2);
    /// How often `wait_for_exit` checks whether the child has exited.
    pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);
}

/// Child-side host configuration.
pub struct HostConfig;

impl HostConfig {
    /// Log filter used when `RUST_LOG` is unset.
    pub const DEFAULT_LOG_FILTER: &'static str = "warn";
    /// Exit code for a fatal protocol violation inside the handler loop.
    pub const PROTOCOL_VIOLATION_EXIT_CODE: u8 = 2;
    /// Exit code when the launch contract could not be honoured.
    pub const BOOTSTRAP_FAILURE_EXIT_CODE: u8 = 3;
}
