//! Collaborator contracts consumed by the loyalty engine: ledger persistence,
//! the campaign bonus registry, and the configuration provider.

use crate::config::LoyaltyConfig;
use crate::error::LedgerResult;
use crate::loyalty::{AudienceFlags, BonusRule, CashPaymentBonus, ClientLedger, ExpirationRule};
use chrono::NaiveDate;

/// Persistence for client ledgers with optimistic concurrency.
///
/// Implementations must make `compare_and_swap` atomic per client: the write
/// succeeds only if the stored `version` still equals `ledger.version`, and the
/// committed copy carries the bumped version.
pub trait LedgerStore: Send + Sync {
    /// Fails with `ClientNotFound` when no ledger exists.
    fn get_ledger(&self, client_id: &str) -> LedgerResult<ClientLedger>;

    /// Fails with `ClientExists` when a ledger is already registered.
    fn create_ledger(&self, ledger: ClientLedger) -> LedgerResult<ClientLedger>;

    /// Fails with `ConcurrentConflict` when another write landed first.
    fn compare_and_swap(&self, ledger: ClientLedger) -> LedgerResult<ClientLedger>;
}

/// Source of campaign bonus rules.
pub trait BonusRegistry: Send + Sync {
    fn active_bonuses(&self, today: NaiveDate, audience: AudienceFlags) -> Vec<BonusRule>;
}

/// Program-wide accrual and grant settings.
pub trait LoyaltySettings: Send + Sync {
    fn conversion_rate(&self) -> f64;
    fn expiration_rules(&self) -> Vec<ExpirationRule>;
    fn cash_payment_bonus(&self) -> CashPaymentBonus;
    fn default_validity_days(&self) -> u32;
    /// 0 disables the welcome grant.
    fn welcome_bonus_points(&self) -> i64;
    /// 0 disables the birthday grant.
    fn birthday_bonus_points(&self) -> i64;
    fn birthday_window_days(&self) -> u32;
}

impl LoyaltySettings for LoyaltyConfig {
    fn conversion_rate(&self) -> f64 {
        self.conversion_rate
    }

    fn expiration_rules(&self) -> Vec<ExpirationRule> {
        self.expiration_rules.clone()
    }

    fn cash_payment_bonus(&self) -> CashPaymentBonus {
        self.cash_payment_bonus.clone()
    }

    fn default_validity_days(&self) -> u32 {
        self.default_validity_days
    }

    fn welcome_bonus_points(&self) -> i64 {
        self.welcome_bonus_points
    }

    fn birthday_bonus_points(&self) -> i64 {
        self.birthday_bonus_points
    }

    fn birthday_window_days(&self) -> u32 {
        self.birthday_window_days
    }
}
