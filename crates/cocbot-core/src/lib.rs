//! Core of the clash bot: configuration, errors, logging, the messaging port,
//! and the contest session subsystem.
//!
//! Framework-agnostic. Telegram and the completion endpoint live behind ports
//! (traits) implemented in adapter crates.

pub mod clash;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod security;

pub use errors::{Error, Result};
