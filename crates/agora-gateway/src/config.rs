use std::time::Duration;

/// Relay tunables.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How long an unauthenticated socket may stay open before sending `auth`.
    pub handshake_timeout: Duration,
    /// Server sends a Ping this often.
    pub heartbeat_interval: Duration,
    /// Consecutive unanswered Pings before the connection is dropped.
    pub max_missed_heartbeats: u8,
    /// Answer bad frames with an `error` frame instead of only logging them.
    pub protocol_error_frames: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
            max_missed_heartbeats: 2,
            protocol_error_frames: true,
        }
    }
}
