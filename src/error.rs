//! Error types for mailbell.

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox error: {0}")]
    Mail(#[from] MailError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),

    #[error("OAuth error: {0}")]
    Oauth(#[from] OauthError),

    #[error("Bot API error: {0}")]
    Bot(#[from] BotError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mailbox session errors.
///
/// The variants are deliberately distinct: only `Auth` surfaces as "please
/// re-authorize" to the user, while `Network` and `Protocol` are transient
/// and retried on the next poll cycle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MailError {
    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl MailError {
    /// Whether this failure requires the user to re-authorize.
    pub fn needs_reauth(&self) -> bool {
        matches!(self, MailError::Auth(_))
    }
}

impl From<std::io::Error> for MailError {
    fn from(e: std::io::Error) -> Self {
        MailError::Network(e.to_string())
    }
}

/// Outbound mail submission errors. Reported once to the caller, never
/// retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Compose(String),

    #[error("Submission rejected by server: {0}")]
    Rejected(String),

    #[error("SMTP transport error: {0}")]
    Transport(String),
}

/// OAuth code-exchange errors.
#[derive(Debug, thiserror::Error)]
pub enum OauthError {
    #[error("Token request failed: {0}")]
    Http(String),

    #[error("Token endpoint rejected the code: {status} {body}")]
    Rejected { status: u16, body: String },

    #[error("User info lookup failed: {0}")]
    UserInfo(String),

    #[error("User info response carried no mailbox address")]
    MissingEmail,
}

/// Telegram Bot API errors.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("Telegram request failed: {0}")]
    Http(String),

    #[error("Telegram API call {method} failed: {reason}")]
    Api { method: String, reason: String },
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;
