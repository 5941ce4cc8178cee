//! In-memory per-user session state: credentials, poll baselines and the
//! presentation cache consulted by the show-full/hide toggles.
//!
//! All state lives for the lifetime of the process. Each user's entry is
//! written by exactly two paths: the bot handlers (create/delete on
//! authorize/de-authorize) and that user's own polling task (baseline and
//! cache updates), both funneled through the narrow accessors below.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::RwLock;

use crate::mail::Provider;

/// Telegram chat/user identifier.
pub type UserId = i64;

/// Character budget for the short (truncated) form of a message body.
pub const SHORT_TEXT_LIMIT: usize = 200;

/// Mail account credentials, owned by the user's session entry.
#[derive(Clone)]
pub struct Credential {
    /// Mailbox address resolved during authorization.
    pub email: String,
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub provider: Provider,
    /// App password for providers whose IMAP/SMTP reject bearer tokens.
    pub app_password: Option<SecretString>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("email", &self.email)
            .field("provider", &self.provider)
            .field("has_app_password", &self.app_password.is_some())
            .finish_non_exhaustive()
    }
}

/// Cached display data for one detected message. Never mutated after
/// creation; the toggle handlers only read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRecord {
    pub short_text: String,
    pub full_text: String,
    pub from_addr: String,
    pub subject: String,
    pub date: String,
}

impl NotificationRecord {
    pub fn new(from_addr: String, subject: String, date: String, full_text: String) -> Self {
        Self {
            short_text: truncate_chars(&full_text, SHORT_TEXT_LIMIT),
            full_text,
            from_addr,
            subject,
            date,
        }
    }
}

/// Truncate to `limit` characters, appending a marker when anything was cut.
/// Char-based, not byte-based: bodies are mostly Cyrillic.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let mut short: String = text.chars().take(limit).collect();
        short.push_str("...");
        short
    }
}

/// Composite identity for one message: `"{user_id}_{imap_uid}"`. Used as the
/// cache key and embedded verbatim in callback-button payloads.
pub fn record_key(user: UserId, uid: u32) -> String {
    format!("{user}_{uid}")
}

/// Per-user session entry.
struct UserSession {
    credential: Credential,
    /// Identifier set considered "already seen". `None` until the first
    /// successful listing seeds it; the poller must not notify before then.
    baseline: Option<BTreeSet<u32>>,
    cache: HashMap<String, Arc<NotificationRecord>>,
    /// Insertion order of cache keys, for oldest-first eviction.
    cache_order: VecDeque<String>,
}

/// Concurrent store of all user sessions.
pub struct SessionStore {
    inner: RwLock<HashMap<UserId, UserSession>>,
    cache_cap: usize,
}

impl SessionStore {
    pub fn new(cache_cap: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            cache_cap,
        }
    }

    /// Create a session for `user`, replacing any previous one (a fresh
    /// authorization discards the old credential, baseline and cache).
    /// Returns whether an existing session was replaced.
    pub async fn authorize(&self, user: UserId, credential: Credential) -> bool {
        let mut inner = self.inner.write().await;
        inner
            .insert(
                user,
                UserSession {
                    credential,
                    baseline: None,
                    cache: HashMap::new(),
                    cache_order: VecDeque::new(),
                },
            )
            .is_some()
    }

    /// Remove the user's session. The user's polling task observes the
    /// removal at the top of its next cycle and stops.
    pub async fn deauthorize(&self, user: UserId) -> bool {
        self.inner.write().await.remove(&user).is_some()
    }

    pub async fn is_authorized(&self, user: UserId) -> bool {
        self.inner.read().await.contains_key(&user)
    }

    pub async fn credential(&self, user: UserId) -> Option<Credential> {
        self.inner
            .read()
            .await
            .get(&user)
            .map(|s| s.credential.clone())
    }

    /// The user's baseline, or `None` while still unseeded (or no session).
    pub async fn baseline(&self, user: UserId) -> Option<BTreeSet<u32>> {
        self.inner
            .read()
            .await
            .get(&user)
            .and_then(|s| s.baseline.clone())
    }

    /// Unconditionally replace the baseline with the current identifier set.
    pub async fn set_baseline(&self, user: UserId, ids: BTreeSet<u32>) {
        if let Some(session) = self.inner.write().await.get_mut(&user) {
            session.baseline = Some(ids);
        }
    }

    /// Store a notification record under its composite key, evicting the
    /// oldest entry when the per-user cap is exceeded. Returns the key, or
    /// `None` if the session vanished mid-cycle.
    pub async fn store_record(
        &self,
        user: UserId,
        uid: u32,
        record: NotificationRecord,
    ) -> Option<String> {
        let key = record_key(user, uid);
        let mut inner = self.inner.write().await;
        let session = inner.get_mut(&user)?;
        if session.cache.insert(key.clone(), Arc::new(record)).is_none() {
            session.cache_order.push_back(key.clone());
        }
        while session.cache.len() > self.cache_cap {
            match session.cache_order.pop_front() {
                Some(oldest) => {
                    session.cache.remove(&oldest);
                }
                None => break,
            }
        }
        Some(key)
    }

    /// Look up a cached record by composite key, scoped to `user`. A miss
    /// means the record was never created or the session was reset.
    pub async fn record(&self, user: UserId, key: &str) -> Option<Arc<NotificationRecord>> {
        self.inner.read().await.get(&user)?.cache.get(key).cloned()
    }
}
