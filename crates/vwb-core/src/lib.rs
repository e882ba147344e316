//! Core domain + application logic for the Version Watcher bot.
//!
//! This crate is framework-agnostic. Telegram, the endoflife.date feed and
//! SQLite live behind ports (traits); the Telegram adapter lives in
//! `vwb-telegram`.

pub mod config;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod feed;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod pipeline;
pub mod scheduler;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use errors::{Error, Result};
