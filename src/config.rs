//! Configuration, built from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram bot token from @BotFather.
    pub bot_token: String,
    /// OAuth application client id.
    pub client_id: String,
    /// OAuth application client secret.
    pub client_secret: SecretString,
    /// Redirect URI registered with the OAuth application.
    pub redirect_uri: String,
    /// Bind address for the local redirect-capture server.
    pub oauth_listen_addr: SocketAddr,
    /// Wait between the end of one poll cycle and the start of the next.
    pub poll_interval: Duration,
    /// Per-user cap on cached notification records (oldest evicted first).
    pub cache_cap: usize,
}

impl Config {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = require("BOT_TOKEN")?;
        let client_id = require("YANDEX_CLIENT_ID")?;
        let client_secret = SecretString::from(require("YANDEX_CLIENT_SECRET")?);

        let redirect_uri = std::env::var("OAUTH_REDIRECT_URI")
            .unwrap_or_else(|_| "http://localhost:8080/oauth2callback".to_string());

        let oauth_listen_addr: SocketAddr = std::env::var("OAUTH_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue {
                key: "OAUTH_LISTEN_ADDR".into(),
                message: format!("{e}"),
            })?;

        let poll_interval_secs: u64 = std::env::var("MAIL_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let cache_cap: usize = std::env::var("MAIL_CACHE_CAP")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(200);

        Ok(Self {
            bot_token,
            client_id,
            client_secret,
            redirect_uri,
            oauth_listen_addr,
            poll_interval: Duration::from_secs(poll_interval_secs),
            cache_cap,
        })
    }
}

fn require(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}
