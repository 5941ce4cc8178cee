//! The closed set of supported mail providers.
//!
//! All provider-specific branching (hosts, OAuth endpoints, whether IMAP
//! takes a bearer token or an app password) lives here so the poll loop and
//! the dispatch path stay provider-agnostic.

use serde::{Deserialize, Serialize};

/// A supported mail provider and its authentication variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provider {
    /// Yandex Mail. OAuth identifies the mailbox, but IMAP/SMTP log in with
    /// a per-application password the user generates separately.
    Yandex,
    /// Gmail. IMAP/SMTP accept the OAuth bearer token directly (XOAUTH2).
    Gmail,
}

impl Provider {
    pub fn imap_host(self) -> &'static str {
        match self {
            Provider::Yandex => "imap.yandex.ru",
            Provider::Gmail => "imap.gmail.com",
        }
    }

    pub fn smtp_host(self) -> &'static str {
        match self {
            Provider::Yandex => "smtp.yandex.ru",
            Provider::Gmail => "smtp.gmail.com",
        }
    }

    pub fn auth_url(self) -> &'static str {
        match self {
            Provider::Yandex => "https://oauth.yandex.ru/authorize",
            Provider::Gmail => "https://accounts.google.com/o/oauth2/v2/auth",
        }
    }

    pub fn token_url(self) -> &'static str {
        match self {
            Provider::Yandex => "https://oauth.yandex.ru/token",
            Provider::Gmail => "https://oauth2.googleapis.com/token",
        }
    }

    pub fn userinfo_url(self) -> &'static str {
        match self {
            Provider::Yandex => "https://login.yandex.ru/info",
            Provider::Gmail => "https://openidconnect.googleapis.com/v1/userinfo",
        }
    }

    pub fn oauth_scope(self) -> &'static str {
        match self {
            Provider::Yandex => "mail:imap_full",
            Provider::Gmail => "https://mail.google.com/ openid email",
        }
    }

    /// Whether IMAP/SMTP need a separate app password instead of the
    /// OAuth bearer token.
    pub fn uses_app_password(self) -> bool {
        matches!(self, Provider::Yandex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yandex_uses_app_password() {
        assert!(Provider::Yandex.uses_app_password());
        assert!(!Provider::Gmail.uses_app_password());
    }

    #[test]
    fn hosts_match_providers() {
        assert_eq!(Provider::Yandex.imap_host(), "imap.yandex.ru");
        assert_eq!(Provider::Yandex.smtp_host(), "smtp.yandex.ru");
        assert_eq!(Provider::Gmail.imap_host(), "imap.gmail.com");
    }
}
