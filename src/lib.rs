//! mailbell — mailbox-to-Telegram notification bot.

pub mod bot;
pub mod config;
pub mod error;
pub mod mail;
pub mod oauth;
pub mod poller;
pub mod redirect;
pub mod state;
