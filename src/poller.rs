//! Per-user mailbox polling: baseline seeding, change detection and
//! notification fan-out.
//!
//! Each authorized user gets one long-running task. A cycle opens a session,
//! lists the inbox, diffs against the baseline, fetches and decodes the new
//! messages newest-first, caches a notification record per message and hands
//! it to the [`Notifier`]. The baseline then becomes the current identifier
//! set, unconditionally. Cycles are strictly sequential; the task suspends
//! only on the fixed wait between cycles and inside network I/O.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::MailError;
use crate::mail::{self, Connect, DecodedEmail};
use crate::state::{Credential, NotificationRecord, SessionStore, UserId};

/// Outbound side of the poller — the chat transport it notifies through.
/// Delivery failures stay inside the implementation; they must not block
/// baseline advancement.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// A new message was detected; `key` addresses its cached record.
    async fn new_mail(&self, user: UserId, key: &str, record: &NotificationRecord);

    /// A whole cycle failed (session open or listing). Auth errors should be
    /// worded as "please re-authorize".
    async fn poll_failed(&self, user: UserId, error: &MailError);
}

/// Everything a polling task needs.
#[derive(Clone)]
pub struct PollerDeps {
    pub store: Arc<SessionStore>,
    pub connector: Arc<dyn Connect>,
    pub notifier: Arc<dyn Notifier>,
    /// Wait between the end of one cycle and the start of the next.
    pub interval: Duration,
}

/// Registry of running polling tasks, keyed by user.
///
/// Start is idempotent: a user whose task is still live keeps it (the task
/// reads the credential fresh from the store every cycle, so a
/// re-authorization takes effect without a restart).
pub struct PollerSet {
    tasks: Mutex<HashMap<UserId, JoinHandle<()>>>,
}

impl PollerSet {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn start(&self, user: UserId, deps: PollerDeps) {
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|_, handle| !handle.is_finished());
        if tasks.contains_key(&user) {
            tracing::debug!(user, "poller already running");
            return;
        }
        tasks.insert(user, tokio::spawn(poll_loop(user, deps)));
    }

    pub async fn is_running(&self, user: UserId) -> bool {
        self.tasks
            .lock()
            .await
            .get(&user)
            .is_some_and(|h| !h.is_finished())
    }
}

impl Default for PollerSet {
    fn default() -> Self {
        Self::new()
    }
}

async fn poll_loop(user: UserId, deps: PollerDeps) {
    tracing::info!(user, "mail poller started");
    loop {
        // Cooperative cancellation: checked once per cycle, no mid-cycle
        // interruption.
        if !deps.store.is_authorized(user).await {
            tracing::info!(user, "session removed; mail poller stopping");
            return;
        }
        run_cycle(user, &deps).await;
        tokio::time::sleep(deps.interval).await;
    }
}

/// Execute one poll cycle for `user`.
///
/// The first successful listing after authorization seeds the baseline and
/// emits nothing. A failed seeding cycle leaves the baseline unset rather
/// than fabricating an empty one, so pre-existing mail is never announced
/// once connectivity returns.
pub async fn run_cycle(user: UserId, deps: &PollerDeps) {
    let Some(credential) = deps.store.credential(user).await else {
        return;
    };
    let baseline = deps.store.baseline(user).await;
    let connector = Arc::clone(&deps.connector);

    let outcome = tokio::task::spawn_blocking(move || {
        collect(connector.as_ref(), &credential, baseline.as_ref())
    })
    .await
    .unwrap_or_else(|e| Err(MailError::Protocol(format!("poll task panicked: {e}"))));

    match outcome {
        Ok(cycle) => {
            for (uid, decoded) in cycle.new_messages {
                let record = NotificationRecord::new(
                    decoded.from_addr,
                    decoded.subject,
                    mail::format_date(decoded.date_raw.as_deref()),
                    decoded.body,
                );
                let Some(key) = deps.store.store_record(user, uid, record.clone()).await
                else {
                    // Session vanished mid-cycle; drop the rest silently.
                    return;
                };
                deps.notifier.new_mail(user, &key, &record).await;
            }
            deps.store.set_baseline(user, cycle.current_ids).await;
        }
        Err(e) => {
            tracing::error!(user, error = %e, "poll cycle failed");
            deps.notifier.poll_failed(user, &e).await;
        }
    }
}

struct CycleOutcome {
    current_ids: BTreeSet<u32>,
    /// Newest-first, already decoded. Per-item failures were logged and
    /// skipped inside [`collect`].
    new_messages: Vec<(u32, DecodedEmail)>,
}

/// The blocking half of a cycle: open, list, fetch what is new, close.
fn collect(
    connector: &dyn Connect,
    credential: &Credential,
    baseline: Option<&BTreeSet<u32>>,
) -> Result<CycleOutcome, MailError> {
    let mut mailbox = connector.connect(credential)?;
    let current_ids = match mailbox.list_all_ids() {
        Ok(ids) => ids,
        Err(e) => {
            mailbox.close();
            return Err(e);
        }
    };

    let mut new_messages = Vec::new();
    if let Some(baseline) = baseline {
        // Reverse numeric order approximates newest-first: provider
        // identifiers ascend over time. Heuristic, not a guarantee.
        let mut new_ids: Vec<u32> = current_ids.difference(baseline).copied().collect();
        new_ids.sort_unstable_by(|a, b| b.cmp(a));

        for uid in new_ids {
            match mailbox.fetch(uid) {
                Ok(raw) => match mail::decode_message(&raw) {
                    Some(decoded) => new_messages.push((uid, decoded)),
                    None => tracing::warn!(uid, "unparseable message skipped"),
                },
                Err(e) => tracing::warn!(uid, error = %e, "fetch failed; message skipped"),
            }
        }
    }

    mailbox.close();
    Ok(CycleOutcome {
        current_ids,
        new_messages,
    })
}
