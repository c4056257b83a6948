use std::time::Duration;

use rvb_matchmaker::{CoordinatorConfig, WatchdogConfig};

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Graceful shutdown timeout in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Coordinator poll interval in milliseconds (default: `1500`).
    pub poll_interval_ms: u64,
    /// Delay between "partner found" and the redirect, in milliseconds
    /// (default: `2000`).
    pub redirect_delay_ms: u64,
    /// Session watchdog poll interval in milliseconds (default: `2000`).
    pub watchdog_interval_ms: u64,
    /// Grace period before an abandoned session is declared expired, in
    /// milliseconds (default: `3000`).
    pub watchdog_grace_ms: u64,
    /// Orphan session sweep cadence in seconds (default: `30`).
    pub sweep_interval_secs: u64,
    /// Minimum age before an active session counts as orphaned, in seconds
    /// (default: `60`). Long enough that an in-flight pairing is never
    /// swept mid-sequence.
    pub sweep_grace_secs: i64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                    |
    /// |-------------------------|----------------------------|
    /// | `HOST`                  | `0.0.0.0`                  |
    /// | `PORT`                  | `3000`                     |
    /// | `CORS_ORIGINS`          | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                       |
    /// | `POLL_INTERVAL_MS`      | `1500`                     |
    /// | `REDIRECT_DELAY_MS`     | `2000`                     |
    /// | `WATCHDOG_INTERVAL_MS`  | `2000`                     |
    /// | `WATCHDOG_GRACE_MS`     | `3000`                     |
    /// | `ORPHAN_SWEEP_INTERVAL_SECS` | `30`                  |
    /// | `ORPHAN_GRACE_SECS`     | `60`                       |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs: env_u64("REQUEST_TIMEOUT_SECS", 30),
            shutdown_timeout_secs: env_u64("SHUTDOWN_TIMEOUT_SECS", 30),
            poll_interval_ms: env_u64("POLL_INTERVAL_MS", 1500),
            redirect_delay_ms: env_u64("REDIRECT_DELAY_MS", 2000),
            watchdog_interval_ms: env_u64("WATCHDOG_INTERVAL_MS", 2000),
            watchdog_grace_ms: env_u64("WATCHDOG_GRACE_MS", 3000),
            sweep_interval_secs: env_u64("ORPHAN_SWEEP_INTERVAL_SECS", 30),
            sweep_grace_secs: env_u64("ORPHAN_GRACE_SECS", 60) as i64,
        }
    }

    /// Coordinator timing derived from this configuration.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            redirect_delay: Duration::from_millis(self.redirect_delay_ms),
        }
    }

    /// Watchdog timing derived from this configuration.
    pub fn watchdog_config(&self) -> WatchdogConfig {
        WatchdogConfig {
            poll_interval: Duration::from_millis(self.watchdog_interval_ms),
            grace: Duration::from_millis(self.watchdog_grace_ms),
        }
    }
}

fn env_u64(var: &str, default: u64) -> u64 {
    match std::env::var(var) {
        Ok(value) => value
            .parse()
            .unwrap_or_else(|_| panic!("{var} must be a valid u64")),
        Err(_) => default,
    }
}
