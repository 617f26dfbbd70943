//! Runtime tunables for the server

use std::time::Duration;

/// Interval between stats broadcasts.
pub const TICK_DURATION: Duration = Duration::from_millis(100);
/// Time allowed to write one frame to a peer.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);
/// Time allowed between pongs before a peer is considered gone.
pub const PONG_WAIT: Duration = Duration::from_secs(60);
/// Largest inbound frame accepted from a peer, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 512;
/// Outbound frames a player may have queued before being evicted.
pub const OUTBOUND_QUEUE_DEPTH: usize = 10;
/// Pending registry commands buffered ahead of the hub.
pub const HUB_COMMAND_CAPACITY: usize = 1024;
/// Request path that accepts the connection upgrade.
pub const WEBSOCKET_PATH: &str = "/websocket";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tick_duration: Duration,
    pub write_wait: Duration,
    pub pong_wait: Duration,
    pub max_message_size: usize,
    pub outbound_queue_depth: usize,
    pub hub_command_capacity: usize,
    pub websocket_path: String,
}

impl ServerConfig {
    /// Keepalive ping period. Kept below `pong_wait` so a healthy peer always
    /// answers before its read deadline lapses.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait * 9 / 10
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_duration: TICK_DURATION,
            write_wait: WRITE_WAIT,
            pong_wait: PONG_WAIT,
            max_message_size: MAX_MESSAGE_SIZE,
            outbound_queue_depth: OUTBOUND_QUEUE_DEPTH,
            hub_command_capacity: HUB_COMMAND_CAPACITY,
            websocket_path: WEBSOCKET_PATH.to_string(),
        }
    }
}
