#![warn(clippy::unwrap_used)]

pub mod config;
pub mod error;
pub mod event_bus;
pub mod loyalty;
pub mod store;

pub use config::{AppConfig, LoyaltyConfig};
pub use error::{LedgerError, LedgerResult};
