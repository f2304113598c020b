use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gateway: GatewayLimits,
    #[serde(default)]
    pub calls: CallsConfig,
    #[serde(default)]
    pub meetings: MeetingsConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

/// Socket and connection limits.
#[derive(Debug, Deserialize, Serialize)]
pub struct GatewayLimits {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_connections_per_user")]
    pub max_connections_per_user: usize,
    #[serde(default = "default_max_events_per_minute")]
    pub max_events_per_minute: u32,
    #[serde(default = "default_max_typing_events_per_minute")]
    pub max_typing_events_per_minute: u32,
    /// Events queued per socket before new ones are dropped.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

impl Default for GatewayLimits {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_connections_per_user: default_max_connections_per_user(),
            max_events_per_minute: default_max_events_per_minute(),
            max_typing_events_per_minute: default_max_typing_events_per_minute(),
            outbound_buffer: default_outbound_buffer(),
            idle_timeout_secs: default_idle_timeout_secs(),
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CallsConfig {
    /// 0 keeps ringing calls until someone resolves them.
    #[serde(default = "default_ring_timeout_secs")]
    pub ring_timeout_secs: u64,
    #[serde(default)]
    pub reject_duplicate_initiate: bool,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for CallsConfig {
    fn default() -> Self {
        Self {
            ring_timeout_secs: default_ring_timeout_secs(),
            reject_duplicate_initiate: false,
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MeetingsConfig {
    #[serde(default = "default_max_participants")]
    pub max_participants: usize,
}

impl Default for MeetingsConfig {
    fn default() -> Self {
        Self {
            max_participants: default_max_participants(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".into()
}
fn default_max_connections() -> usize {
    2000
}
fn default_max_connections_per_user() -> usize {
    5
}
fn default_max_events_per_minute() -> u32 {
    240
}
fn default_max_typing_events_per_minute() -> u32 {
    120
}
fn default_outbound_buffer() -> usize {
    256
}
fn default_idle_timeout_secs() -> u64 {
    60
}
fn default_ping_interval_secs() -> u64 {
    20
}
fn default_ring_timeout_secs() -> u64 {
    45
}
fn default_sweep_interval_secs() -> u64 {
    5
}
fn default_max_participants() -> usize {
    16
}

fn generate_config_template(config: &Config) -> String {
    format!(
        r#"# Parley Server Configuration
# Generated automatically on first run. Edit as needed.

[server]
bind_address = "{bind_address}"

[gateway]
# Sockets accepted across the whole server; extra sockets are closed with 1013.
max_connections = {max_connections}
# Registered connections (devices, tabs) per user.
max_connections_per_user = {max_connections_per_user}
# Inbound event budgets per user, per minute.
max_events_per_minute = {max_events_per_minute}
max_typing_events_per_minute = {max_typing_events_per_minute}
outbound_buffer = {outbound_buffer}
idle_timeout_secs = {idle_timeout_secs}
ping_interval_secs = {ping_interval_secs}

[calls]
# Unanswered calls end after this many seconds (0 = never).
ring_timeout_secs = {ring_timeout_secs}
# Answer a second call:initiate between the same two users with "busy".
reject_duplicate_initiate = {reject_duplicate_initiate}
sweep_interval_secs = {sweep_interval_secs}

[meetings]
max_participants = {max_participants}
"#,
        bind_address = config.server.bind_address,
        max_connections = config.gateway.max_connections,
        max_connections_per_user = config.gateway.max_connections_per_user,
        max_events_per_minute = config.gateway.max_events_per_minute,
        max_typing_events_per_minute = config.gateway.max_typing_events_per_minute,
        outbound_buffer = config.gateway.outbound_buffer,
        idle_timeout_secs = config.gateway.idle_timeout_secs,
        ping_interval_secs = config.gateway.ping_interval_secs,
        ring_timeout_secs = config.calls.ring_timeout_secs,
        reject_duplicate_initiate = config.calls.reject_duplicate_initiate,
        sweep_interval_secs = config.calls.sweep_interval_secs,
        max_participants = config.meetings.max_participants,
    )
}

/// Apply `name` when set. Unparsable values keep the current setting.
fn override_from_env<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(value) = std::env::var(name) {
        match value.trim().parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!("Ignoring invalid {} value '{}'", name, value),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!(
                "Config file not found at '{}', generating defaults...",
                path
            );
            let config = Config::default();

            if let Some(parent) = std::path::Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }

            fs::write(path, generate_config_template(&config))?;
            tracing::info!("Generated default config at '{}'", path);
            config
        };

        // Environment variable overrides
        if let Ok(value) = std::env::var("PARLEY_BIND_ADDRESS") {
            config.server.bind_address = value;
        }
        let gateway = &mut config.gateway;
        override_from_env("PARLEY_MAX_CONNECTIONS", &mut gateway.max_connections);
        override_from_env(
            "PARLEY_MAX_CONNECTIONS_PER_USER",
            &mut gateway.max_connections_per_user,
        );
        override_from_env("PARLEY_MAX_EVENTS_PER_MINUTE", &mut gateway.max_events_per_minute);
        override_from_env(
            "PARLEY_MAX_TYPING_EVENTS_PER_MINUTE",
            &mut gateway.max_typing_events_per_minute,
        );
        override_from_env("PARLEY_OUTBOUND_BUFFER", &mut gateway.outbound_buffer);
        override_from_env("PARLEY_IDLE_TIMEOUT_SECS", &mut gateway.idle_timeout_secs);
        override_from_env("PARLEY_PING_INTERVAL_SECS", &mut gateway.ping_interval_secs);
        let calls = &mut config.calls;
        override_from_env("PARLEY_RING_TIMEOUT_SECS", &mut calls.ring_timeout_secs);
        override_from_env(
            "PARLEY_REJECT_DUPLICATE_INITIATE",
            &mut calls.reject_duplicate_initiate,
        );
        override_from_env("PARLEY_SWEEP_INTERVAL_SECS", &mut calls.sweep_interval_secs);
        override_from_env(
            "PARLEY_MAX_MEETING_PARTICIPANTS",
            &mut config.meetings.max_participants,
        );

        Ok(config)
    }

    pub fn gateway_config(&self) -> parley_core::GatewayConfig {
        parley_core::GatewayConfig {
            max_connections_per_user: self.gateway.max_connections_per_user,
            ring_timeout_secs: self.calls.ring_timeout_secs,
            reject_duplicate_initiate: self.calls.reject_duplicate_initiate,
            sweep_interval_secs: self.calls.sweep_interval_secs,
            max_meeting_participants: self.meetings.max_participants,
            ..parley_core::GatewayConfig::default()
        }
    }

    pub fn app_config(&self) -> parley_core::AppConfig {
        parley_core::AppConfig {
            max_connections: self.gateway.max_connections,
            max_events_per_minute: self.gateway.max_events_per_minute,
            max_typing_events_per_minute: self.gateway.max_typing_events_per_minute,
            outbound_buffer: self.gateway.outbound_buffer,
            idle_timeout_secs: self.gateway.idle_timeout_secs,
            ping_interval_secs: self.gateway.ping_interval_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, GatewayLimits};
    use std::sync::{Mutex, MutexGuard};

    // `Config::load` reads PARLEY_* variables, which are process-wide.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[test]
    fn gateway_defaults_match_documented_limits() {
        let limits = GatewayLimits::default();
        assert_eq!(limits.max_connections, 2000);
        assert_eq!(limits.max_connections_per_user, 5);
        assert_eq!(limits.max_events_per_minute, 240);
        assert_eq!(limits.max_typing_events_per_minute, 120);
    }

    #[test]
    fn missing_file_is_generated_and_reloadable() {
        let _env = env_lock();
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("nested").join("parley-test.toml");
        let path = config_path.to_str().expect("config path utf8");

        let generated = Config::load(path).expect("generate config");
        assert!(config_path.exists());
        let reloaded = Config::load(path).expect("reload config");
        assert_eq!(reloaded.server.bind_address, generated.server.bind_address);
        assert_eq!(reloaded.calls.ring_timeout_secs, 45);
        assert_eq!(reloaded.meetings.max_participants, 16);
        assert!(!reloaded.calls.reject_duplicate_initiate);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_sections() {
        let _env = env_lock();
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("partial.toml");
        std::fs::write(&config_path, "[calls]\nring_timeout_secs = 0\n").expect("write config");

        let config = Config::load(config_path.to_str().expect("config path utf8")).expect("load config");
        assert_eq!(config.calls.ring_timeout_secs, 0);
        assert_eq!(config.calls.sweep_interval_secs, 5);
        assert_eq!(config.gateway.outbound_buffer, 256);
        assert_eq!(config.gateway_config().ring_timeout_secs, 0);
    }

    #[test]
    fn env_overrides_apply_and_invalid_values_are_ignored() {
        let _env = env_lock();
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("parley-env.toml");
        std::env::set_var("PARLEY_REJECT_DUPLICATE_INITIATE", "true");
        std::env::set_var("PARLEY_MAX_MEETING_PARTICIPANTS", "not-a-number");
        let config =
            Config::load(config_path.to_str().expect("config path utf8")).expect("load config");
        std::env::remove_var("PARLEY_REJECT_DUPLICATE_INITIATE");
        std::env::remove_var("PARLEY_MAX_MEETING_PARTICIPANTS");
        assert!(config.calls.reject_duplicate_initiate);
        assert_eq!(config.meetings.max_participants, 16);
        assert!(config.gateway_config().reject_duplicate_initiate);
    }
}
