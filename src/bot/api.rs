//! Telegram Bot API client — long-polls getUpdates, sends and edits
//! messages with inline keyboards, answers button presses.

use serde::{Deserialize, Serialize};

use crate::error::BotError;

/// Character budget for one outbound chat message. Longer texts are split
/// on line boundaries; only the first chunk carries the inline keyboard.
pub const MESSAGE_LIMIT: usize = 4000;

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

// No `#[serde(default)]` on `result`: the derive would demand `T: Default`,
// and serde already reads a missing `Option` field as `None`.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    description: Option<String>,
    result: Option<T>,
}

/// One inline keyboard button with an opaque callback payload.
#[derive(Debug, Clone, Serialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Rows of inline buttons.
pub type Keyboard = Vec<Vec<InlineButton>>;

// ── Client ──────────────────────────────────────────────────────────

pub struct TelegramApi {
    bot_token: String,
    client: reqwest::Client,
}

impl TelegramApi {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<Option<T>, BotError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| BotError::Http(e.to_string()))?;

        let parsed: ApiResponse<T> = resp
            .json()
            .await
            .map_err(|e| BotError::Http(e.to_string()))?;

        if !parsed.ok {
            return Err(BotError::Api {
                method: method.to_string(),
                reason: parsed.description.unwrap_or_else(|| "unknown error".into()),
            });
        }
        Ok(parsed.result)
    }

    /// Long-poll for updates past `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, BotError> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": 30,
            "allowed_updates": ["message", "callback_query"],
        });
        Ok(self
            .call::<Vec<Update>>("getUpdates", &body)
            .await?
            .unwrap_or_default())
    }

    /// Send a text message, splitting over the character budget on line
    /// boundaries. The keyboard is attached only to the first chunk.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), BotError> {
        for (i, chunk) in split_message(text, MESSAGE_LIMIT).iter().enumerate() {
            let mut body = serde_json::json!({
                "chat_id": chat_id,
                "text": chunk,
            });
            if i == 0 && let Some(kb) = keyboard {
                body["reply_markup"] = serde_json::json!({ "inline_keyboard": kb });
            }
            self.call::<serde_json::Value>("sendMessage", &body).await?;
        }
        Ok(())
    }

    /// Edit a message in place. Edits cannot be split, so the text is hard-
    /// capped to the budget.
    pub async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), BotError> {
        let capped = crate::state::truncate_chars(text, MESSAGE_LIMIT);
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": capped,
        });
        if let Some(kb) = keyboard {
            body["reply_markup"] = serde_json::json!({ "inline_keyboard": kb });
        }
        self.call::<serde_json::Value>("editMessageText", &body)
            .await?;
        Ok(())
    }

    /// Delete a message from the chat.
    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), BotError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
        });
        self.call::<serde_json::Value>("deleteMessage", &body).await?;
        Ok(())
    }

    /// Answer a button press, optionally with an alert popup.
    pub async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), BotError> {
        let mut body = serde_json::json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = serde_json::Value::String(text.to_string());
            body["show_alert"] = serde_json::Value::Bool(show_alert);
        }
        self.call::<serde_json::Value>("answerCallbackQuery", &body)
            .await?;
        Ok(())
    }
}

// ── Message splitting ───────────────────────────────────────────────

/// Split `text` into chunks of at most `max_chars` characters, preferring
/// line boundaries; a single over-long line is hard-cut at a char boundary.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.split('\n') {
        let mut line = line;
        let mut line_len = line.chars().count();

        while line_len > max_chars {
            if current_len > 0 {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let cut: String = line.chars().take(max_chars).collect();
            line = &line[cut.len()..];
            line_len -= max_chars;
            chunks.push(cut);
        }

        let needed = if current_len == 0 { line_len } else { line_len + 1 };
        if current_len > 0 && current_len + needed > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_embeds_token() {
        let api = TelegramApi::new("123:ABC".into());
        assert_eq!(
            api.api_url("getUpdates"),
            "https://api.telegram.org/bot123:ABC/getUpdates"
        );
    }

    // ── Splitting ───────────────────────────────────────────────────

    #[test]
    fn split_short_message_untouched() {
        assert_eq!(split_message("Привет", 4000), vec!["Привет"]);
    }

    #[test]
    fn split_exact_limit_single_chunk() {
        let msg = "ф".repeat(4000);
        let chunks = split_message(&msg, 4000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chars().count(), 4000);
    }

    #[test]
    fn split_prefers_line_boundaries() {
        let msg = format!("{}\n{}", "a".repeat(2500), "b".repeat(2500));
        let chunks = split_message(&msg, 4000);
        assert_eq!(chunks, vec!["a".repeat(2500), "b".repeat(2500)]);
    }

    #[test]
    fn split_9000_chars_into_at_least_three() {
        let msg = "строка\n".repeat(1286); // ~9000 chars
        let chunks = split_message(&msg, 4000);
        assert!(chunks.len() >= 3, "got {} chunks", chunks.len());
        assert!(chunks.iter().all(|c| c.chars().count() <= 4000));
    }

    #[test]
    fn split_hard_cuts_unbreakable_line() {
        let msg = "x".repeat(9000);
        let chunks = split_message(&msg, 4000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 4000);
        assert_eq!(chunks[2].chars().count(), 1000);
    }

    #[test]
    fn split_multibyte_respects_char_boundaries() {
        let msg = "ю".repeat(4001);
        let chunks = split_message(&msg, 4000);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 4000);
        assert_eq!(chunks[1], "ю");
    }

    #[test]
    fn split_reassembles_to_original_modulo_breaks() {
        let msg = format!("{}\n{}\n{}", "a".repeat(3000), "b".repeat(3000), "c".repeat(3000));
        let chunks = split_message(&msg, 4000);
        assert_eq!(chunks.join("\n"), msg);
    }

    // ── Wire type parsing ───────────────────────────────────────────

    #[test]
    fn api_response_parses_without_result_field() {
        let ok: ApiResponse<Vec<Update>> =
            serde_json::from_str(r#"{"ok": true, "result": []}"#).unwrap();
        assert!(ok.ok);
        assert_eq!(ok.result.map(|r| r.len()), Some(0));

        let err: ApiResponse<Vec<Update>> =
            serde_json::from_str(r#"{"ok": false, "description": "Bad Request"}"#).unwrap();
        assert!(!err.ok);
        assert!(err.result.is_none());
        assert_eq!(err.description.as_deref(), Some("Bad Request"));
    }

    #[test]
    fn update_with_callback_query_parses() {
        let json = r#"{
            "update_id": 10,
            "callback_query": {
                "id": "cb1",
                "from": {"id": 7},
                "message": {"message_id": 44, "chat": {"id": 7}},
                "data": "show_full_7_42"
            }
        }"#;
        let update: Update = serde_json::from_str(json).unwrap();
        let cb = update.callback_query.unwrap();
        assert_eq!(cb.from.id, 7);
        assert_eq!(cb.data.as_deref(), Some("show_full_7_42"));
        assert_eq!(cb.message.unwrap().message_id, 44);
    }

    #[test]
    fn update_with_text_message_parses() {
        let json = r#"{
            "update_id": 11,
            "message": {"message_id": 45, "chat": {"id": 7}, "text": "/start"}
        }"#;
        let update: Update = serde_json::from_str(json).unwrap();
        assert_eq!(update.message.unwrap().text.as_deref(), Some("/start"));
    }
}
