//! Loyalty ledger domain types: point batches, per-client ledgers,
//! expiration tiers, and promotional bonus rules.
//!
//! - Every grant of points is a `PointBatch` with its own expiration clock
//! - A `ClientLedger` keeps batches in grant order plus a cached balance
//! - Expiration is derived from `(batch, now)` on every read

use crate::error::{LedgerError, LedgerResult};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Point Batches ──────────────────────────────────────────────────────────

/// Derived lifecycle state of a batch at a given instant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Spendable points remain and the validity window is open.
    Active,
    /// Every granted point has been redeemed.
    Depleted,
    /// The validity window has closed, or a sweep flagged the batch.
    Expired,
}

/// What produced a batch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BatchSource {
    #[default]
    Purchase,
    Welcome,
    Birthday,
    Adjustment,
}

/// One discrete grant of points.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PointBatch {
    pub id: Uuid,
    pub amount_granted: i64,
    pub amount_remaining: i64,
    pub granted_at: DateTime<Utc>,
    /// Validity window in days; `None` never expires.
    pub expiry_days: Option<u32>,
    /// Free-text audit description, e.g. "Purchase $250 (Campaign x2)".
    pub origin_label: String,
    #[serde(default)]
    pub source: BatchSource,
    /// Set once by an explicit sweep. Never cleared.
    #[serde(default)]
    pub expired_flag: bool,
}

impl PointBatch {
    /// A zero-day window is stored as "never expires".
    pub fn new(
        amount: i64,
        granted_at: DateTime<Utc>,
        expiry_days: Option<u32>,
        origin_label: impl Into<String>,
        source: BatchSource,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            amount_granted: amount,
            amount_remaining: amount,
            granted_at,
            expiry_days: expiry_days.filter(|days| *days > 0),
            origin_label: origin_label.into(),
            source,
            expired_flag: false,
        }
    }

    /// Instant after which the batch is no longer spendable.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expiry_days
            .map(|days| self.granted_at + Duration::days(i64::from(days)))
    }

    /// Whether the validity window has closed at `now`.
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|t| now > t)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expired_flag || self.is_lapsed(now)
    }

    pub fn status(&self, now: DateTime<Utc>) -> BatchStatus {
        if self.expired_flag {
            BatchStatus::Expired
        } else if self.amount_remaining == 0 {
            BatchStatus::Depleted
        } else if self.is_lapsed(now) {
            BatchStatus::Expired
        } else {
            BatchStatus::Active
        }
    }

    /// Points that can still be redeemed at `now`.
    pub fn spendable(&self, now: DateTime<Utc>) -> i64 {
        if self.is_expired(now) {
            0
        } else {
            self.amount_remaining
        }
    }
}

// ─── Client Ledger ──────────────────────────────────────────────────────────

/// Complete points ledger for one client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientLedger {
    pub client_id: String,
    /// Insertion order is chronological grant order.
    pub batches: Vec<PointBatch>,
    /// Sum of `amount_remaining` over non-expired batches as of the last mutation.
    pub cached_balance: i64,
    /// Money below the conversion threshold, replaced on each accrual.
    pub monetary_carryover: f64,
    pub total_spent: f64,
    pub last_purchase_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub welcome_granted: bool,
    #[serde(default)]
    pub last_birthday_grant_year: Option<i32>,
    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped by the store on every commit.
    #[serde(default)]
    pub version: u64,
}

impl ClientLedger {
    pub fn new(client_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            client_id: client_id.into(),
            batches: Vec::new(),
            cached_balance: 0,
            monetary_carryover: 0.0,
            total_spent: 0.0,
            last_purchase_at: None,
            welcome_granted: false,
            last_birthday_grant_year: None,
            created_at: now,
            version: 0,
        }
    }

    /// True spendable balance at `now`, derived from the batches.
    pub fn available_points(&self, now: DateTime<Utc>) -> i64 {
        self.batches
            .iter()
            .fold(0i64, |total, b| total.saturating_add(b.spendable(now)))
    }

    /// Re-derive the cached balance, dropping anything that lapsed since the
    /// last mutation.
    pub fn refresh_balance(&mut self, now: DateTime<Utc>) -> i64 {
        self.cached_balance = self.available_points(now);
        self.cached_balance
    }

    /// Append a freshly granted batch and credit it to the cached balance.
    ///
    /// Fails without touching the batches when the balance would overflow.
    pub fn append_batch(&mut self, batch: PointBatch, now: DateTime<Utc>) -> LedgerResult<()> {
        let current = self.refresh_balance(now);
        let credited = current.checked_add(batch.spendable(now)).ok_or_else(|| {
            LedgerError::InvalidInput(format!(
                "granting {} points would overflow the balance of {}",
                batch.amount_granted, current
            ))
        })?;
        self.cached_balance = credited;
        self.batches.push(batch);
        Ok(())
    }

    /// Flag every lapsed batch as expired. Returns how many were newly flagged.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> usize {
        let mut flagged = 0;
        for batch in self.batches.iter_mut() {
            if !batch.expired_flag && batch.is_lapsed(now) {
                batch.expired_flag = true;
                flagged += 1;
            }
        }
        self.refresh_balance(now);
        flagged
    }

    pub fn is_consistent(&self, now: DateTime<Utc>) -> bool {
        self.cached_balance == self.available_points(now)
    }
}

// ─── Expiration Tiers ───────────────────────────────────────────────────────

/// One step of the validity step-function over granted quantity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExpirationRule {
    pub min_points: i64,
    pub validity_days: u32,
}

impl ExpirationRule {
    pub fn new(min_points: i64, validity_days: u32) -> Self {
        Self {
            min_points,
            validity_days,
        }
    }
}

// ─── Promotional Bonuses ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BonusKind {
    /// Scales the purchase amount before conversion.
    Multiplier,
    /// Whole points added after conversion.
    FixedAdd,
    /// Display-only; never changes the computed points.
    Informational,
}

/// Who a campaign bonus is visible to.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BonusAudience {
    #[default]
    Public,
    /// Only applies to clients flagged as test-cohort members.
    TestCohort,
}

/// Audience flags of the client a bonus is being resolved for.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudienceFlags {
    pub test_cohort: bool,
}

impl AudienceFlags {
    pub fn test_cohort() -> Self {
        Self { test_cohort: true }
    }
}

/// A campaign bonus with an inclusive date window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BonusRule {
    pub id: Uuid,
    pub name: String,
    pub kind: BonusKind,
    pub value: f64,
    pub active_from: NaiveDate,
    pub active_to: NaiveDate,
    #[serde(default)]
    pub audience: BonusAudience,
}

impl BonusRule {
    pub fn new(
        name: impl Into<String>,
        kind: BonusKind,
        value: f64,
        active_from: NaiveDate,
        active_to: NaiveDate,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            value,
            active_from,
            active_to,
            audience: BonusAudience::Public,
        }
    }

    pub fn for_audience(mut self, audience: BonusAudience) -> Self {
        self.audience = audience;
        self
    }

    pub fn is_active_on(&self, today: NaiveDate) -> bool {
        self.active_from <= today && today <= self.active_to
    }

    pub fn applies_to(&self, flags: AudienceFlags) -> bool {
        match self.audience {
            BonusAudience::Public => true,
            BonusAudience::TestCohort => flags.test_cohort,
        }
    }
}

/// A single-transaction multiplier picked by the cashier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManualBonus {
    pub name: String,
    pub multiplier: f64,
}

impl ManualBonus {
    pub fn new(name: impl Into<String>, multiplier: f64) -> Self {
        Self {
            name: name.into(),
            multiplier,
        }
    }

    /// Non-finite or non-positive multipliers are ignored.
    pub fn is_usable(&self) -> bool {
        self.multiplier.is_finite() && self.multiplier > 0.0
    }
}

// ─── Cash Payment Incentive ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CashBonusMode {
    /// Flat whole points on top.
    #[default]
    Add,
    /// Scale the scoped points and keep the increment.
    #[serde(alias = "mul")]
    Multiply,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CashBonusScope {
    /// Points from conversion only.
    #[default]
    Base,
    /// Points after fixed campaign bonuses were added.
    #[serde(alias = "post")]
    PostBonus,
}

/// Incentive applied when a purchase is settled in cash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CashPaymentBonus {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub mode: CashBonusMode,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub scope: CashBonusScope,
}

impl Default for CashPaymentBonus {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: CashBonusMode::Add,
            value: 0.0,
            scope: CashBonusScope::Base,
        }
    }
}
