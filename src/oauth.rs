//! Authorization-code exchange and mailbox-address lookup.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::OauthError;
use crate::mail::Provider;

/// Tokens returned by a successful code exchange.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    default_email: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

/// OAuth client for the provider token and user-info endpoints.
pub struct OauthClient {
    client_id: String,
    client_secret: SecretString,
    redirect_uri: String,
    http: reqwest::Client,
}

impl OauthClient {
    pub fn new(client_id: String, client_secret: SecretString, redirect_uri: String) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_uri,
            http: reqwest::Client::new(),
        }
    }

    /// The URL the user opens in a browser to grant access.
    pub fn auth_url(&self, provider: Provider) -> String {
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}",
            provider.auth_url(),
            self.client_id,
            self.redirect_uri,
            provider.oauth_scope(),
        )
    }

    /// Exchange a user-supplied authorization code for tokens.
    pub async fn exchange_code(
        &self,
        provider: Provider,
        code: &str,
    ) -> Result<TokenResponse, OauthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", &self.client_id),
            ("client_secret", self.client_secret.expose_secret()),
            ("redirect_uri", &self.redirect_uri),
        ];

        let resp = self
            .http
            .post(provider.token_url())
            .form(&params)
            .send()
            .await
            .map_err(|e| OauthError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(status, "token request failed: {body}");
            return Err(OauthError::Rejected { status, body });
        }

        resp.json::<TokenResponse>()
            .await
            .map_err(|e| OauthError::Http(e.to_string()))
    }

    /// Resolve the mailbox address behind an access token.
    pub async fn fetch_email(
        &self,
        provider: Provider,
        access_token: &str,
    ) -> Result<String, OauthError> {
        let resp = self
            .http
            .get(provider.userinfo_url())
            .header("Authorization", format!("OAuth {access_token}"))
            .send()
            .await
            .map_err(|e| OauthError::UserInfo(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(OauthError::UserInfo(format!(
                "user info endpoint returned {}",
                resp.status()
            )));
        }

        let info: UserInfo = resp
            .json()
            .await
            .map_err(|e| OauthError::UserInfo(e.to_string()))?;

        info.default_email
            .or(info.email)
            .filter(|e| !e.is_empty())
            .ok_or(OauthError::MissingEmail)
    }
}
