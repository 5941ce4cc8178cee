//! Outbound dispatch — one-shot SMTP submission via lettre.

use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::{Credentials as SmtpCredentials, Mechanism};
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use crate::error::SendError;
use crate::state::Credential;

/// Build and transmit a single plain-text message through the provider's
/// submission endpoint. Authenticates with the app password where the
/// provider requires one, otherwise reuses the IMAP bearer token over
/// XOAUTH2. Failures carry a displayable reason and are never retried here.
pub fn send_mail(
    credential: &Credential,
    to: &str,
    subject: &str,
    body: &str,
) -> Result<(), SendError> {
    let from = credential
        .email
        .parse()
        .map_err(|e| SendError::InvalidAddress {
            address: credential.email.clone(),
            reason: format!("{e}"),
        })?;
    let to_mbox = to.parse().map_err(|e| SendError::InvalidAddress {
        address: to.to_string(),
        reason: format!("{e}"),
    })?;

    let message = Message::builder()
        .from(from)
        .to(to_mbox)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| SendError::Compose(e.to_string()))?;

    let builder = SmtpTransport::relay(credential.provider.smtp_host())
        .map_err(|e| SendError::Transport(e.to_string()))?;

    let transport = if credential.provider.uses_app_password() {
        let password = credential
            .app_password
            .as_ref()
            .ok_or_else(|| SendError::Rejected("no app password stored".into()))?;
        builder
            .credentials(SmtpCredentials::new(
                credential.email.clone(),
                password.expose_secret().to_string(),
            ))
            .build()
    } else {
        builder
            .authentication(vec![Mechanism::Xoauth2])
            .credentials(SmtpCredentials::new(
                credential.email.clone(),
                credential.access_token.expose_secret().to_string(),
            ))
            .build()
    };

    match transport.send(&message) {
        Ok(_) => {
            tracing::info!(to, "mail submitted");
            Ok(())
        }
        Err(e) if e.is_permanent() => Err(SendError::Rejected(e.to_string())),
        Err(e) => Err(SendError::Transport(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;
    use crate::mail::Provider;

    fn credential(provider: Provider) -> Credential {
        Credential {
            email: "user@yandex.ru".into(),
            access_token: SecretString::from("token"),
            refresh_token: None,
            provider,
            app_password: Some(SecretString::from("app-pass")),
        }
    }

    #[test]
    fn invalid_recipient_is_reported() {
        let err = send_mail(&credential(Provider::Yandex), "not-an-address", "s", "b")
            .unwrap_err();
        assert!(matches!(err, SendError::InvalidAddress { .. }));
    }

    #[test]
    fn invalid_sender_is_reported() {
        let mut cred = credential(Provider::Yandex);
        cred.email = "broken".into();
        let err = send_mail(&cred, "ok@example.com", "s", "b").unwrap_err();
        assert!(matches!(err, SendError::InvalidAddress { .. }));
    }

    #[test]
    fn missing_app_password_is_rejected() {
        let mut cred = credential(Provider::Yandex);
        cred.app_password = None;
        let err = send_mail(&cred, "ok@example.com", "s", "b").unwrap_err();
        assert!(matches!(err, SendError::Rejected(_)));
    }
}
