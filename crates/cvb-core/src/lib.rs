//! Core domain + application logic for the Kick currency-conversion bot.
//!
//! Kick, the exchange-rate service and storage live behind ports (traits)
//! implemented in adapter crates.

pub mod bot;
pub mod commands;
pub mod config;
pub mod conversion;
pub mod currency;
pub mod dedup;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod ports;
pub mod registry;
pub mod scheduler;
pub mod subscriptions;
pub mod tokens;
pub mod webhook;

#[cfg(test)]
mod test_support;

pub use errors::{Error, Result};
