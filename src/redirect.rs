//! Local capture of the OAuth redirect.
//!
//! The provider redirects the browser here with a `code` query parameter;
//! the page renders it as plain text so the user can copy it into the chat.
//! No state is shared with the rest of the bot.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::Router;
use axum::extract::Query;
use axum::routing::get;

async fn oauth_callback(Query(params): Query<HashMap<String, String>>) -> String {
    match params.get("code").filter(|c| !c.is_empty()) {
        Some(code) => {
            tracing::info!("received OAuth code via redirect");
            format!(
                "Код авторизации получен: {code}\nПожалуйста, скопируйте его и отправьте боту."
            )
        }
        None => "Ошибка: код не получен".to_string(),
    }
}

pub fn router() -> Router {
    Router::new().route("/oauth2callback", get(oauth_callback))
}

/// Spawn the redirect-capture server in the background.
pub async fn spawn(addr: SocketAddr) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "OAuth callback server started");
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router()).await {
            tracing::error!("OAuth callback server stopped: {e}");
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn callback_echoes_code() {
        let params = HashMap::from([("code".to_string(), "abc123".to_string())]);
        let body = oauth_callback(Query(params)).await;
        assert!(body.contains("abc123"));
        assert!(body.contains("отправьте боту"));
    }

    #[tokio::test]
    async fn callback_without_code_reports_error() {
        let body = oauth_callback(Query(HashMap::new())).await;
        assert_eq!(body, "Ошибка: код не получен");
    }
}
