//! Command-line configuration for the server binary.
//!
//! Every flag can also be set through a `BULWARK_*` environment variable.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::admission::{ConfigError, LimiterConfig};
use crate::background::NotifierConfig;
use crate::network::{Environment, NetworkConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "bulwark-server", version, about)]
pub struct ServerArgs {
    /// Address to bind the HTTP listener to.
    #[arg(long, env = "BULWARK_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on. 0 picks a free port.
    #[arg(long, env = "BULWARK_PORT", default_value_t = 4000)]
    pub port: u16,

    #[arg(long, env = "BULWARK_ENV", value_enum, default_value_t = Environment::Development)]
    pub env: Environment,

    /// Tokens added to each client's bucket per second.
    #[arg(long, env = "BULWARK_LIMITER_RPS", default_value_t = 2.0)]
    pub limiter_rps: f64,

    /// Bucket capacity: the largest burst a client can send.
    #[arg(long, env = "BULWARK_LIMITER_BURST", default_value_t = 4)]
    pub limiter_burst: u32,

    /// Enable per-client rate limiting.
    #[arg(
        long,
        env = "BULWARK_LIMITER_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub limiter_enabled: bool,

    /// Trusted CORS origins, separated by spaces or commas.
    #[arg(long, env = "BULWARK_CORS_TRUSTED_ORIGINS", default_value = "")]
    pub cors_trusted_origins: String,

    /// Endpoint receiving notifications as JSON. Without it they are logged.
    #[arg(long, env = "BULWARK_NOTIFY_WEBHOOK_URL")]
    pub notify_webhook_url: Option<String>,

    /// Sender identity attached to outgoing notifications.
    #[arg(
        long,
        env = "BULWARK_NOTIFY_SENDER",
        default_value = "Bulwark <no-reply@bulwark.local>"
    )]
    pub notify_sender: String,

    #[arg(long, env = "BULWARK_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "BULWARK_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    #[arg(long, env = "BULWARK_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// How long shutdown waits for background tasks.
    #[arg(long, env = "BULWARK_SHUTDOWN_TIMEOUT_SECS", default_value_t = 30)]
    pub shutdown_timeout_secs: u64,

    /// `PostgreSQL` DSN. Without it data is kept in memory.
    #[cfg(feature = "postgres")]
    #[arg(long, env = "BULWARK_DB_DSN")]
    pub db_dsn: Option<String>,
}

impl ServerArgs {
    #[must_use]
    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            env: self.env,
            cors_trusted_origins: split_origins(&self.cors_trusted_origins),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }

    /// # Errors
    ///
    /// Returns [`ConfigError`] if the burst is zero or the rate is not a
    /// positive finite number.
    pub fn limiter_config(&self) -> Result<LimiterConfig, ConfigError> {
        let config = LimiterConfig {
            capacity: self.limiter_burst,
            refill_rate: self.limiter_rps,
            enabled: self.limiter_enabled,
        };
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn notifier_config(&self) -> NotifierConfig {
        NotifierConfig {
            webhook_url: self.notify_webhook_url.clone(),
            sender: self.notify_sender.clone(),
            ..NotifierConfig::default()
        }
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
