//! Mailbox sessions — raw IMAP over rustls TLS.
//!
//! Everything here is blocking and meant to run inside
//! `tokio::task::spawn_blocking`; the poller opens one session per cycle.
//! The `Mailbox`/`Connect` traits form the seam the poller is tested
//! against.

use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use secrecy::ExposeSecret;

use crate::error::MailError;
use crate::state::Credential;

/// An open, authenticated mailbox with INBOX selected.
pub trait Mailbox: Send {
    /// Identifiers of every message currently in the inbox.
    fn list_all_ids(&mut self) -> Result<BTreeSet<u32>, MailError>;

    /// Raw RFC 822 bytes of one message. A missing or already-deleted
    /// message is a recoverable per-item error, not fatal to the session.
    fn fetch(&mut self, uid: u32) -> Result<Vec<u8>, MailError>;

    /// Graceful sign-off. Failure to close is logged, never propagated.
    fn close(&mut self);
}

/// Opens authenticated mailbox sessions for a credential.
pub trait Connect: Send + Sync {
    fn connect(&self, credential: &Credential) -> Result<Box<dyn Mailbox>, MailError>;
}

/// Production connector: IMAP over TLS against the credential's provider.
pub struct ImapConnector;

impl Connect for ImapConnector {
    fn connect(&self, credential: &Credential) -> Result<Box<dyn Mailbox>, MailError> {
        Ok(Box::new(ImapSession::open(credential)?))
    }
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// One blocking IMAP connection. Generic over the stream so the protocol
/// exchange can be tested against scripted bytes.
pub struct ImapSession<S = TlsStream> {
    stream: S,
    tag_counter: u32,
}

impl ImapSession {
    /// Connect, authenticate (password LOGIN or XOAUTH2 depending on the
    /// provider) and select INBOX.
    pub fn open(credential: &Credential) -> Result<Self, MailError> {
        let host = credential.provider.imap_host();
        let tcp = TcpStream::connect((host, 993))?;
        tcp.set_read_timeout(Some(Duration::from_secs(30)))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|e| MailError::Protocol(format!("invalid server name {host}: {e}")))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| MailError::Network(e.to_string()))?;

        let mut session = Self {
            stream: rustls::StreamOwned::new(conn, tcp),
            tag_counter: 0,
        };

        let _greeting = session.read_line()?;
        session.authenticate(credential)?;

        let select = session.send_cmd("SELECT \"INBOX\"")?;
        if !tagged_ok(&select) {
            return Err(MailError::Protocol(format!(
                "SELECT INBOX failed: {}",
                last_line(&select)
            )));
        }

        Ok(session)
    }
}

impl<S: Read + Write> ImapSession<S> {
    fn authenticate(&mut self, credential: &Credential) -> Result<(), MailError> {
        let lines = if credential.provider.uses_app_password() {
            let password = credential.app_password.as_ref().ok_or_else(|| {
                MailError::Auth("no app password stored for this account".into())
            })?;
            self.send_cmd(&format!(
                "LOGIN \"{}\" \"{}\"",
                credential.email,
                password.expose_secret()
            ))?
        } else {
            let sasl = BASE64.encode(format!(
                "user={}\x01auth=Bearer {}\x01\x01",
                credential.email,
                credential.access_token.expose_secret()
            ));
            self.send_cmd(&format!("AUTHENTICATE XOAUTH2 {sasl}"))?
        };

        if tagged_ok(&lines) {
            Ok(())
        } else {
            Err(MailError::Auth(last_line(&lines)))
        }
    }

    /// Send one command under a fresh tag and collect lines through the
    /// tagged completion. A `+` continuation (XOAUTH2 error payload) is
    /// answered with an empty line so the server finishes the exchange.
    fn send_cmd(&mut self, cmd: &str) -> Result<Vec<String>, MailError> {
        self.tag_counter += 1;
        let tag = format!("A{}", self.tag_counter);
        self.stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        self.stream.flush()?;

        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            if line.starts_with("+ ") || line == "+" {
                self.stream.write_all(b"\r\n")?;
                self.stream.flush()?;
                continue;
            }
            let done = line.starts_with(&tag);
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    fn read_line(&mut self) -> Result<String, MailError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.stream.read(&mut byte) {
                Ok(0) => return Err(MailError::Network("IMAP connection closed".into())),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        buf.truncate(buf.len() - 2);
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl<S: Read + Write + Send> Mailbox for ImapSession<S> {
    fn list_all_ids(&mut self) -> Result<BTreeSet<u32>, MailError> {
        // UID commands: identifiers stay stable when other messages are
        // deleted, so old mail cannot resurface as new after a renumbering.
        let lines = self.send_cmd("UID SEARCH ALL")?;
        if !tagged_ok(&lines) {
            return Err(MailError::Protocol(format!(
                "UID SEARCH failed: {}",
                last_line(&lines)
            )));
        }
        let mut ids = BTreeSet::new();
        for line in &lines {
            ids.extend(parse_search_line(line));
        }
        Ok(ids)
    }

    fn fetch(&mut self, uid: u32) -> Result<Vec<u8>, MailError> {
        self.tag_counter += 1;
        let tag = format!("A{}", self.tag_counter);
        self.stream
            .write_all(format!("{tag} UID FETCH {uid} (RFC822)\r\n").as_bytes())?;
        self.stream.flush()?;

        let mut body: Option<Vec<u8>> = None;
        loop {
            let line = self.read_line()?;
            if line.starts_with(&tag) {
                return if line.contains(" OK") {
                    body.ok_or_else(|| {
                        MailError::Protocol(format!("FETCH {uid} returned no message body"))
                    })
                } else {
                    Err(MailError::Protocol(format!("FETCH {uid} failed: {line}")))
                };
            }
            if body.is_none()
                && let Some(size) = parse_literal_size(&line)
            {
                let mut buf = vec![0u8; size];
                self.stream.read_exact(&mut buf)?;
                body = Some(buf);
            }
        }
    }

    fn close(&mut self) {
        if let Err(e) = self.send_cmd("LOGOUT") {
            tracing::warn!("IMAP logout failed: {e}");
        }
    }
}

/// Identifiers from a `* SEARCH n n n` response line.
fn parse_search_line(line: &str) -> Vec<u32> {
    let Some(rest) = line.strip_prefix("* SEARCH") else {
        return Vec::new();
    };
    rest.split_whitespace()
        .filter_map(|t| t.parse().ok())
        .collect()
}

/// Size of a `{N}` literal announced at the end of a FETCH response line.
fn parse_literal_size(line: &str) -> Option<usize> {
    let open = line.rfind('{')?;
    let close = line.rfind('}')?;
    if close < open {
        return None;
    }
    line[open + 1..close].parse().ok()
}

fn tagged_ok(lines: &[String]) -> bool {
    lines.last().is_some_and(|l| l.contains(" OK"))
}

fn last_line(lines: &[String]) -> String {
    lines.last().cloned().unwrap_or_default()
}
