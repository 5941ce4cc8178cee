//! Mail-provider plumbing: decoding, date formatting, IMAP sessions and
//! SMTP dispatch.

pub mod date;
pub mod decode;
pub mod providers;
pub mod session;
pub mod smtp;

pub use date::format_date;
pub use decode::{DecodedEmail, decode_header, decode_message, extract_text, strip_html};
pub use providers::Provider;
pub use session::{Connect, ImapConnector, ImapSession, Mailbox};
pub use smtp::send_mail;
