#![warn(clippy::unwrap_used)]

//! Points ledger engine for the loyalty program.
//!
//! Converts purchases into expiring point batches, stacks campaign and
//! manual bonuses, redeems FIFO across batches, and derives balances and
//! upcoming expirations lazily from `(batches, now)`. Ledgers live in a
//! DashMap store behind the `LedgerStore` trait; swap for a database-backed
//! implementation in production.

pub mod accrual;
pub mod bonus;
pub mod engine;
pub mod expiration;
pub mod grants;
pub mod redemption;
pub mod registry;
pub mod store;

pub use bonus::{BonusResolver, ResolvedBonus};
pub use engine::{LoyaltyEngine, PurchaseReceipt, PurchaseRequest, RedemptionReceipt};
pub use expiration::{ExpirationRuleSelector, ExpirationView};
pub use registry::InMemoryBonusRegistry;
pub use store::{atomic_update, InMemoryLedgerStore};
