//! Update dispatch: commands, the authorization and compose dialogs, and
//! the show-full/hide/reply button handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::Mutex;

use crate::bot::api::{CallbackQuery, InlineButton, Keyboard, Message, TelegramApi};
use crate::config::Config;
use crate::error::MailError;
use crate::mail::{self, Connect, Provider};
use crate::oauth::OauthClient;
use crate::poller::{Notifier, PollerDeps, PollerSet};
use crate::state::{Credential, NotificationRecord, SessionStore, UserId};

/// Callback payload prefixes. The suffix is always the composite record key.
pub const SHOW_FULL_PREFIX: &str = "show_full_";
pub const HIDE_FULL_PREFIX: &str = "hide_full_";
pub const REPLY_PREFIX: &str = "reply_to_";

const AUTH_YANDEX: &str = "auth_yandex";
const AUTH_GMAIL: &str = "auth_gmail";

const NOT_FOUND_TEXT: &str = "❌ Текст письма не найден";

/// Where a user currently is in a multi-step dialog.
enum Dialog {
    AwaitAuthCode {
        provider: Provider,
    },
    AwaitAppPassword {
        provider: Provider,
        email: String,
        access_token: SecretString,
        refresh_token: Option<SecretString>,
    },
    AwaitRecipient,
    AwaitSubject {
        to: String,
    },
    AwaitBody {
        to: String,
        subject: String,
    },
    AwaitReplyBody {
        to: String,
        subject: String,
    },
}

/// The bot: long-poll loop plus all per-update handling.
pub struct BotApp {
    api: Arc<TelegramApi>,
    store: Arc<SessionStore>,
    pollers: PollerSet,
    oauth: OauthClient,
    connector: Arc<dyn Connect>,
    notifier: Arc<dyn Notifier>,
    config: Config,
    dialogs: Mutex<HashMap<UserId, Dialog>>,
}

impl BotApp {
    pub fn new(config: Config, connector: Arc<dyn Connect>) -> Self {
        let api = Arc::new(TelegramApi::new(config.bot_token.clone()));
        let oauth = OauthClient::new(
            config.client_id.clone(),
            config.client_secret.clone(),
            config.redirect_uri.clone(),
        );
        Self {
            notifier: Arc::new(ChatNotifier {
                api: Arc::clone(&api),
            }),
            api,
            store: Arc::new(SessionStore::new(config.cache_cap)),
            pollers: PollerSet::new(),
            oauth,
            connector,
            config,
            dialogs: Mutex::new(HashMap::new()),
        }
    }

    fn poller_deps(&self) -> PollerDeps {
        PollerDeps {
            store: Arc::clone(&self.store),
            connector: Arc::clone(&self.connector),
            notifier: Arc::clone(&self.notifier),
            interval: self.config.poll_interval,
        }
    }

    /// Long-poll Telegram and dispatch updates forever.
    pub async fn run(&self) -> crate::error::Result<()> {
        tracing::info!("bot listening for updates");
        let mut offset = 0i64;
        loop {
            let updates = match self.api.get_updates(offset).await {
                Ok(updates) => updates,
                Err(e) => {
                    tracing::warn!("getUpdates failed: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    continue;
                }
            };
            for update in updates {
                offset = offset.max(update.update_id + 1);
                if let Some(message) = update.message {
                    self.handle_message(message).await;
                } else if let Some(callback) = update.callback_query {
                    self.handle_callback(callback).await;
                }
            }
        }
    }

    // ── Text messages ───────────────────────────────────────────────

    async fn handle_message(&self, message: Message) {
        let chat_id = message.chat.id;
        let Some(text) = message.text.as_deref() else {
            return;
        };
        let text = text.trim();

        if text.starts_with('/') {
            self.handle_command(chat_id, text).await;
            return;
        }

        let dialog = self.dialogs.lock().await.remove(&chat_id);
        match dialog {
            Some(Dialog::AwaitAuthCode { provider }) => {
                self.handle_auth_code(chat_id, provider, text).await;
            }
            Some(Dialog::AwaitAppPassword {
                provider,
                email,
                access_token,
                refresh_token,
            }) => {
                // The pasted password should not stay in the chat history.
                if let Err(e) = self.api.delete_message(chat_id, message.message_id).await {
                    tracing::warn!(chat_id, "could not delete password message: {e}");
                }
                let credential = Credential {
                    email,
                    access_token,
                    refresh_token,
                    provider,
                    app_password: Some(SecretString::from(text.to_string())),
                };
                self.finish_authorization(chat_id, credential).await;
            }
            Some(Dialog::AwaitRecipient) => {
                if text.contains('@') {
                    self.set_dialog(chat_id, Dialog::AwaitSubject { to: text.to_string() })
                        .await;
                    self.send(chat_id, "Укажите тему письма:").await;
                } else {
                    self.set_dialog(chat_id, Dialog::AwaitRecipient).await;
                    self.send(chat_id, "❌ Это не похоже на адрес. Укажите адрес получателя:")
                        .await;
                }
            }
            Some(Dialog::AwaitSubject { to }) => {
                self.set_dialog(
                    chat_id,
                    Dialog::AwaitBody {
                        to,
                        subject: text.to_string(),
                    },
                )
                .await;
                self.send(chat_id, "Введите текст письма:").await;
            }
            Some(Dialog::AwaitBody { to, subject })
            | Some(Dialog::AwaitReplyBody { to, subject }) => {
                self.dispatch_mail(chat_id, to, subject, text.to_string()).await;
            }
            None => {
                self.send(
                    chat_id,
                    "Я понимаю команды /start, /send и /stop, а также кнопки под письмами.",
                )
                .await;
            }
        }
    }

    async fn handle_command(&self, chat_id: UserId, command: &str) {
        match command.split_whitespace().next().unwrap_or("") {
            "/start" => {
                let keyboard: Keyboard = vec![
                    vec![InlineButton::new("🔑 Авторизоваться в Яндекс", AUTH_YANDEX)],
                    vec![InlineButton::new("🔑 Авторизоваться в Gmail", AUTH_GMAIL)],
                ];
                if let Err(e) = self
                    .api
                    .send_message(
                        chat_id,
                        "Привет! Я бот для работы с почтой.\n\
                         Нажмите кнопку ниже, чтобы авторизоваться:",
                        Some(&keyboard),
                    )
                    .await
                {
                    tracing::error!(chat_id, "greeting failed: {e}");
                }
            }
            "/send" => {
                if self.store.is_authorized(chat_id).await {
                    self.set_dialog(chat_id, Dialog::AwaitRecipient).await;
                    self.send(chat_id, "Кому отправить письмо? Укажите адрес получателя:")
                        .await;
                } else {
                    self.send(chat_id, "❌ Сначала авторизуйтесь через /start.").await;
                }
            }
            "/stop" => {
                if self.store.deauthorize(chat_id).await {
                    // The poll task observes the removal within one interval.
                    self.send(chat_id, "🔕 Проверка почты остановлена, данные удалены.")
                        .await;
                } else {
                    self.send(chat_id, "Вы и так не авторизованы.").await;
                }
            }
            _ => {
                self.send(chat_id, "Неизвестная команда. Доступны /start, /send, /stop.")
                    .await;
            }
        }
    }

    async fn handle_auth_code(&self, chat_id: UserId, provider: Provider, code: &str) {
        let token = match self.oauth.exchange_code(provider, code).await {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(chat_id, "code exchange failed: {e}");
                self.set_dialog(chat_id, Dialog::AwaitAuthCode { provider }).await;
                self.send(chat_id, "❌ Ошибка авторизации. Пожалуйста, попробуйте снова.")
                    .await;
                return;
            }
        };

        let email = match self.oauth.fetch_email(provider, &token.access_token).await {
            Ok(email) => email,
            Err(e) => {
                tracing::error!(chat_id, "user info lookup failed: {e}");
                self.send(chat_id, "❌ Не удалось получить email пользователя.").await;
                return;
            }
        };

        let access_token = SecretString::from(token.access_token);
        let refresh_token = token.refresh_token.map(SecretString::from);

        if provider.uses_app_password() {
            self.set_dialog(
                chat_id,
                Dialog::AwaitAppPassword {
                    provider,
                    email,
                    access_token,
                    refresh_token,
                },
            )
            .await;
            self.send(
                chat_id,
                "✅ Авторизация успешна!\n\n\
                 Для доступа к почте через IMAP вам нужно:\n\
                 1. Перейдите в настройки безопасности Яндекс: https://id.yandex.ru/security\n\
                 2. В разделе «Пароли приложений» создайте новый пароль\n\
                 3. Выберите «Почта» в качестве приложения\n\
                 4. Скопируйте сгенерированный пароль и отправьте его мне",
            )
            .await;
        } else {
            let credential = Credential {
                email,
                access_token,
                refresh_token,
                provider,
                app_password: None,
            };
            self.finish_authorization(chat_id, credential).await;
        }
    }

    async fn finish_authorization(&self, chat_id: UserId, credential: Credential) {
        let replaced = self.store.authorize(chat_id, credential).await;
        if replaced {
            tracing::info!(chat_id, "authorization replaced an existing session");
        }
        self.pollers.start(chat_id, self.poller_deps()).await;
        self.send(chat_id, "✅ Готово! Теперь я буду проверять вашу почту.").await;
    }

    async fn dispatch_mail(&self, chat_id: UserId, to: String, subject: String, body: String) {
        let Some(credential) = self.store.credential(chat_id).await else {
            self.send(chat_id, "❌ Сначала авторизуйтесь через /start.").await;
            return;
        };

        let to_for_report = to.clone();
        let result = tokio::task::spawn_blocking(move || {
            mail::send_mail(&credential, &to, &subject, &body)
        })
        .await;

        match result {
            Ok(Ok(())) => {
                self.send(chat_id, &format!("✅ Письмо для {to_for_report} отправлено."))
                    .await;
            }
            Ok(Err(e)) => {
                tracing::error!(chat_id, "submission failed: {e}");
                self.send(chat_id, &format!("❌ Не удалось отправить письмо: {e}")).await;
            }
            Err(e) => {
                tracing::error!(chat_id, "send task panicked: {e}");
                self.send(chat_id, "❌ Не удалось отправить письмо.").await;
            }
        }
    }

    // ── Button presses ──────────────────────────────────────────────

    async fn handle_callback(&self, callback: CallbackQuery) {
        let user = callback.from.id;
        let Some(data) = callback.data.as_deref() else {
            self.answer(&callback.id, None, false).await;
            return;
        };

        if data == AUTH_YANDEX || data == AUTH_GMAIL {
            let provider = if data == AUTH_GMAIL {
                Provider::Gmail
            } else {
                Provider::Yandex
            };
            self.set_dialog(user, Dialog::AwaitAuthCode { provider }).await;
            self.send(
                user,
                &format!(
                    "Пожалуйста, перейдите по ссылке для авторизации:\n{}\n\n\
                     После авторизации отправьте мне полученный код.",
                    self.oauth.auth_url(provider)
                ),
            )
            .await;
            self.answer(&callback.id, None, false).await;
            return;
        }

        if let Some(key) = data.strip_prefix(SHOW_FULL_PREFIX) {
            self.toggle_view(user, &callback, key, true).await;
        } else if let Some(key) = data.strip_prefix(HIDE_FULL_PREFIX) {
            self.toggle_view(user, &callback, key, false).await;
        } else if let Some(key) = data.strip_prefix(REPLY_PREFIX) {
            self.start_reply(user, &callback, key).await;
        } else {
            self.answer(&callback.id, None, false).await;
        }
    }

    /// Edit the notification message to its full or short form, swapping the
    /// toggle button. A missing record answers with an alert, never crashes.
    async fn toggle_view(&self, user: UserId, callback: &CallbackQuery, key: &str, full: bool) {
        let Some(record) = self.store.record(user, key).await else {
            self.answer(&callback.id, Some(NOT_FOUND_TEXT), true).await;
            return;
        };
        let Some(message) = callback.message.as_ref() else {
            self.answer(&callback.id, Some(NOT_FOUND_TEXT), true).await;
            return;
        };

        let text = render_notification(&record, full, false);
        let keyboard = if full {
            hide_keyboard(key)
        } else {
            show_keyboard(key)
        };
        if let Err(e) = self
            .api
            .edit_message(message.chat.id, message.message_id, &text, Some(&keyboard))
            .await
        {
            tracing::error!(user, "edit failed: {e}");
            self.answer(&callback.id, Some("❌ Произошла ошибка при отображении письма"), true)
                .await;
            return;
        }
        self.answer(&callback.id, None, false).await;
    }

    async fn start_reply(&self, user: UserId, callback: &CallbackQuery, key: &str) {
        let Some(record) = self.store.record(user, key).await else {
            self.answer(&callback.id, Some(NOT_FOUND_TEXT), true).await;
            return;
        };

        let to = extract_address(&record.from_addr);
        let subject = reply_subject(&record.subject);
        self.set_dialog(
            user,
            Dialog::AwaitReplyBody {
                to: to.clone(),
                subject,
            },
        )
        .await;
        self.send(user, &format!("Введите текст ответа для {to}:")).await;
        self.answer(&callback.id, None, false).await;
    }

    // ── Small helpers ───────────────────────────────────────────────

    async fn set_dialog(&self, user: UserId, dialog: Dialog) {
        self.dialogs.lock().await.insert(user, dialog);
    }

    async fn send(&self, chat_id: UserId, text: &str) {
        if let Err(e) = self.api.send_message(chat_id, text, None).await {
            tracing::error!(chat_id, "sendMessage failed: {e}");
        }
    }

    async fn answer(&self, callback_id: &str, text: Option<&str>, alert: bool) {
        if let Err(e) = self.api.answer_callback(callback_id, text, alert).await {
            tracing::warn!("answerCallbackQuery failed: {e}");
        }
    }
}

// ── Notifier ────────────────────────────────────────────────────────

/// Delivers poller output into the chat. Delivery failures are logged and
/// swallowed so they never block baseline advancement.
struct ChatNotifier {
    api: Arc<TelegramApi>,
}

#[async_trait]
impl Notifier for ChatNotifier {
    async fn new_mail(&self, user: UserId, key: &str, record: &NotificationRecord) {
        let text = render_notification(record, false, true);
        if let Err(e) = self
            .api
            .send_message(user, &text, Some(&show_keyboard(key)))
            .await
        {
            tracing::error!(user, "notification delivery failed: {e}");
        }
    }

    async fn poll_failed(&self, user: UserId, error: &MailError) {
        let text = if error.needs_reauth() {
            "❌ Почта отклонила доступ. Пожалуйста, авторизуйтесь заново через /start.".to_string()
        } else {
            format!("❌ Произошла ошибка при проверке почты: {error}")
        };
        if let Err(e) = self.api.send_message(user, &text, None).await {
            tracing::error!(user, "error notification delivery failed: {e}");
        }
    }
}

// ── Rendering ───────────────────────────────────────────────────────

/// The notification template. `fresh` distinguishes the first announcement
/// of a new message from subsequent toggle edits.
pub fn render_notification(record: &NotificationRecord, full: bool, fresh: bool) -> String {
    let header = if fresh { "📧 Новое письмо:" } else { "📧 Письмо:" };
    let text = if full {
        &record.full_text
    } else {
        &record.short_text
    };
    format!(
        "{header}\nОт: {}\nТема: {}\nДата: {}\n\nТекст письма:\n{text}",
        record.from_addr, record.subject, record.date,
    )
}

pub fn show_keyboard(key: &str) -> Keyboard {
    vec![
        vec![InlineButton::new(
            "📖 Показать полностью",
            format!("{SHOW_FULL_PREFIX}{key}"),
        )],
        vec![InlineButton::new("✉️ Ответить", format!("{REPLY_PREFIX}{key}"))],
    ]
}

pub fn hide_keyboard(key: &str) -> Keyboard {
    vec![
        vec![InlineButton::new(
            "📖 Скрыть",
            format!("{HIDE_FULL_PREFIX}{key}"),
        )],
        vec![InlineButton::new("✉️ Ответить", format!("{REPLY_PREFIX}{key}"))],
    ]
}

/// Pull the bare address out of a `Display Name <addr>` From header.
pub fn extract_address(from: &str) -> String {
    match (from.rfind('<'), from.rfind('>')) {
        (Some(open), Some(close)) if open < close => from[open + 1..close].trim().to_string(),
        _ => from.trim().to_string(),
    }
}

/// Reply subject: prefix with `Re:` unless one is already there.
pub fn reply_subject(subject: &str) -> String {
    if subject.trim_start().to_lowercase().starts_with("re:") {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}
