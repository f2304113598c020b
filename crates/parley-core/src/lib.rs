pub mod call;
pub mod error;
pub mod gateway;
pub mod hub;
pub mod meeting;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod rooms;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

pub use error::CoreError;
pub use hub::GatewayHandle;

/// Tunables for the signaling tables, owned by the hub.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub max_connections_per_user: usize,
    /// Seconds a call may ring unanswered; 0 disables expiry.
    pub ring_timeout_secs: u64,
    pub reject_duplicate_initiate: bool,
    pub sweep_interval_secs: u64,
    pub max_meeting_participants: usize,
    /// Depth of the hub command queue shared by all sockets.
    pub command_buffer: usize,
}

impl GatewayConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_connections_per_user: 5,
            ring_timeout_secs: 45,
            reject_duplicate_initiate: false,
            sweep_interval_secs: 5,
            max_meeting_participants: meeting::DEFAULT_MAX_PARTICIPANTS,
            command_buffer: 4096,
        }
    }
}

/// Socket-side limits read by the WebSocket endpoint.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub max_connections: usize,
    pub max_events_per_minute: u32,
    pub max_typing_events_per_minute: u32,
    pub outbound_buffer: usize,
    pub idle_timeout_secs: u64,
    pub ping_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_connections: 2000,
            max_events_per_minute: 240,
            max_typing_events_per_minute: 120,
            outbound_buffer: 256,
            idle_timeout_secs: 60,
            ping_interval_secs: 20,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub gateway: GatewayHandle,
    pub config: AppConfig,
    /// Notified once when the server begins shutting down.
    pub shutdown: Arc<Notify>,
}

impl AppState {
    pub fn new(gateway: GatewayHandle, config: AppConfig) -> Self {
        Self {
            gateway,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }
}
