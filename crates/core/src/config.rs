use crate::error::LedgerResult;
use crate::loyalty::{CashPaymentBonus, ExpirationRule};
use serde::Deserialize;
use tracing::debug;

/// Root configuration. Loaded from environment variables with the prefix
/// `LOYALTY_LEDGER__` and an optional TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub loyalty: LoyaltyConfig,
}

// ─── Loyalty Config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct LoyaltyConfig {
    /// Money required per point. Values below 1 are treated as 1.
    #[serde(default = "default_conversion_rate")]
    pub conversion_rate: f64,
    #[serde(default)]
    pub expiration_rules: Vec<ExpirationRule>,
    /// Validity used when no expiration rule is configured.
    #[serde(default = "default_validity_days")]
    pub default_validity_days: u32,
    #[serde(default)]
    pub cash_payment_bonus: CashPaymentBonus,
    /// 0 disables the welcome grant.
    #[serde(default)]
    pub welcome_bonus_points: i64,
    /// 0 disables the birthday grant.
    #[serde(default)]
    pub birthday_bonus_points: i64,
    #[serde(default)]
    pub birthday_window_days: u32,
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
    #[serde(default = "default_upcoming_expirations_limit")]
    pub upcoming_expirations_limit: usize,
}

fn default_conversion_rate() -> f64 {
    100.0
}

fn default_validity_days() -> u32 {
    90
}

fn default_max_conflict_retries() -> u32 {
    5
}

fn default_upcoming_expirations_limit() -> usize {
    5
}

impl Default for LoyaltyConfig {
    fn default() -> Self {
        Self {
            conversion_rate: default_conversion_rate(),
            expiration_rules: Vec::new(),
            default_validity_days: default_validity_days(),
            cash_payment_bonus: CashPaymentBonus::default(),
            welcome_bonus_points: 0,
            birthday_bonus_points: 0,
            birthday_window_days: 0,
            max_conflict_retries: default_max_conflict_retries(),
            upcoming_expirations_limit: default_upcoming_expirations_limit(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> LedgerResult<Self> {
        let config = config::Config::builder()
            .add_source(Self::environment())
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Load a TOML file, with environment variables layered on top.
    pub fn load_from(path: &str) -> LedgerResult<Self> {
        debug!(path = path, "Loading configuration");
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(Self::environment())
            .build()?;
        Ok(config.try_deserialize()?)
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix("LOYALTY_LEDGER")
            .separator("__")
            .try_parsing(true)
    }
}
