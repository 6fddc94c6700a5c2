//! Loyalty ledger engine: purchase accrual, FIFO redemption, manual
//! adjustments, welcome/birthday grants, and read-time balance views.
//!
//! Every mutation is a read → compute → write cycle through
//! [`atomic_update`]; events go out only after the write committed.

use crate::accrual::{self, AccrualInput, AccrualOutcome};
use crate::bonus::{BonusResolver, ResolvedBonus};
use crate::expiration::{
    ExpirationRuleSelector, ExpirationSummary, ExpirationView, UpcomingExpiration,
};
use crate::grants;
use crate::redemption::{self, Adjustment, RedemptionOutcome};
use crate::store::atomic_update;
use chrono::{DateTime, NaiveDate, Utc};
use ledger_core::config::LoyaltyConfig;
use ledger_core::event_bus::{
    AccrualCompleted, BalanceAdjusted, EventSink, LedgerEvent, RedemptionCompleted,
};
use ledger_core::loyalty::{
    AudienceFlags, BatchSource, BatchStatus, ClientLedger, ManualBonus, PointBatch,
};
use ledger_core::store::{BonusRegistry, LedgerStore, LoyaltySettings};
use ledger_core::{LedgerError, LedgerResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ─── Requests & Receipts ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub client_id: String,
    pub amount: f64,
    #[serde(default)]
    pub paid_in_cash: bool,
    /// Single cashier-selected multiplier for this transaction.
    #[serde(default)]
    pub manual_bonus: Option<ManualBonus>,
    #[serde(default)]
    pub audience: AudienceFlags,
}

impl PurchaseRequest {
    pub fn new(client_id: impl Into<String>, amount: f64) -> Self {
        Self {
            client_id: client_id.into(),
            amount,
            paid_in_cash: false,
            manual_bonus: None,
            audience: AudienceFlags::default(),
        }
    }

    pub fn paid_in_cash(mut self) -> Self {
        self.paid_in_cash = true;
        self
    }

    pub fn with_manual_bonus(mut self, bonus: ManualBonus) -> Self {
        self.manual_bonus = Some(bonus);
        self
    }

    pub fn with_audience(mut self, audience: AudienceFlags) -> Self {
        self.audience = audience;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    pub client_id: String,
    pub outcome: AccrualOutcome,
    pub bonus: ResolvedBonus,
    /// `None` when the purchase earned no points.
    pub batch: Option<PointBatch>,
    pub new_balance: i64,
    pub carryover: f64,
    pub expiration: ExpirationSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionReceipt {
    pub client_id: String,
    pub reward_name: String,
    pub outcome: RedemptionOutcome,
    pub new_balance: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub client_id: String,
    /// Derived from the batches at the requested instant.
    pub available_points: i64,
    /// Value stored at the last mutation.
    pub cached_balance: i64,
    pub monetary_carryover: f64,
    pub total_spent: f64,
    pub last_purchase_at: Option<DateTime<Utc>>,
    pub expiration: ExpirationSummary,
}

/// One batch as shown in the client's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchView {
    pub id: Uuid,
    pub amount_granted: i64,
    pub amount_remaining: i64,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub origin_label: String,
    pub source: BatchSource,
    pub status: BatchStatus,
}

impl BatchView {
    fn of(batch: &PointBatch, now: DateTime<Utc>) -> Self {
        Self {
            id: batch.id,
            amount_granted: batch.amount_granted,
            amount_remaining: batch.amount_remaining,
            granted_at: batch.granted_at,
            expires_at: batch.expires_at(),
            origin_label: batch.origin_label.clone(),
            source: batch.source,
            status: batch.status(now),
        }
    }
}

// ─── Engine ─────────────────────────────────────────────────────────────────

/// Loyalty ledger engine. Stateless apart from its collaborators; safe to
/// share across threads.
pub struct LoyaltyEngine {
    max_conflict_retries: u32,
    upcoming_expirations_limit: usize,
    settings: Arc<dyn LoyaltySettings>,
    store: Arc<dyn LedgerStore>,
    bonuses: Arc<dyn BonusRegistry>,
    events: Arc<dyn EventSink>,
}

impl LoyaltyEngine {
    pub fn new(
        config: &LoyaltyConfig,
        store: Arc<dyn LedgerStore>,
        bonuses: Arc<dyn BonusRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        info!(
            conversion_rate = config.conversion_rate,
            expiration_rules = config.expiration_rules.len(),
            cash_bonus = config.cash_payment_bonus.enabled,
            welcome_points = config.welcome_bonus_points,
            birthday_points = config.birthday_bonus_points,
            "Loyalty engine initialized"
        );
        Self {
            max_conflict_retries: config.max_conflict_retries,
            upcoming_expirations_limit: config.upcoming_expirations_limit,
            settings: Arc::new(config.clone()),
            store,
            bonuses,
            events,
        }
    }

    /// Replace the program settings provider, e.g. with one backed by a live
    /// admin store. Every accrual and grant setting is read from it on each
    /// operation; `max_conflict_retries` and `upcoming_expirations_limit`
    /// stay as given to [`LoyaltyEngine::new`].
    pub fn with_settings(mut self, settings: Arc<dyn LoyaltySettings>) -> Self {
        info!(
            conversion_rate = settings.conversion_rate(),
            welcome_points = settings.welcome_bonus_points(),
            birthday_points = settings.birthday_bonus_points(),
            "Loyalty settings provider replaced"
        );
        self.settings = settings;
        self
    }

    fn selector(&self) -> ExpirationRuleSelector {
        ExpirationRuleSelector::new(&self.settings.expiration_rules())
            .with_fallback(self.settings.default_validity_days())
    }

    /// Validity for a grant of `points`; 0 when the grant is disabled.
    fn grant_validity(&self, points: i64) -> u32 {
        if points > 0 {
            self.selector().validity_days(points)
        } else {
            0
        }
    }

    fn update<T, F>(&self, client_id: &str, mutate: F) -> LedgerResult<(T, ClientLedger)>
    where
        F: FnMut(&mut ClientLedger) -> LedgerResult<T>,
    {
        atomic_update(
            self.store.as_ref(),
            client_id,
            self.max_conflict_retries,
            mutate,
        )
    }

    // ─── Enrollment & Grants ────────────────────────────────────────────

    /// Create the client's ledger, with the welcome bonus already on it when
    /// one is configured. A single write: the ledger either exists with its
    /// welcome batch or not at all.
    pub fn enroll_client(
        &self,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<ClientLedger> {
        if client_id.trim().is_empty() {
            return Err(LedgerError::InvalidInput("client id must not be empty".into()));
        }

        let points = self.settings.welcome_bonus_points();
        let mut ledger = ClientLedger::new(client_id, now);
        let welcome = grants::grant_welcome(&mut ledger, points, self.grant_validity(points), now)?;

        let ledger = self.store.create_ledger(ledger)?;
        info!(
            client_id = %client_id,
            welcome_points = welcome.as_ref().map_or(0, |b| b.amount_granted),
            "Client enrolled"
        );

        if let Some(batch) = &welcome {
            self.emit_accrual(&ledger, batch.amount_granted, grants::WELCOME_LABEL, now);
        }
        Ok(ledger)
    }

    /// One-time welcome grant. `Ok(None)` when disabled or already granted.
    pub fn grant_welcome_bonus(
        &self,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<Option<PointBatch>> {
        let points = self.settings.welcome_bonus_points();
        let expiry_days = self.grant_validity(points);

        let (batch, ledger) = self.update(client_id, |ledger| {
            grants::grant_welcome(ledger, points, expiry_days, now)
        })?;

        if let Some(batch) = &batch {
            self.emit_accrual(&ledger, batch.amount_granted, grants::WELCOME_LABEL, now);
        }
        Ok(batch)
    }

    /// Yearly birthday grant within the configured window around `birthday`.
    pub fn grant_birthday_bonus(
        &self,
        client_id: &str,
        birthday: NaiveDate,
        now: DateTime<Utc>,
    ) -> LedgerResult<Option<PointBatch>> {
        let points = self.settings.birthday_bonus_points();
        let window = self.settings.birthday_window_days();
        let expiry_days = self.grant_validity(points);

        let (batch, ledger) = self.update(client_id, |ledger| {
            grants::grant_birthday(ledger, birthday, points, expiry_days, window, now)
        })?;

        match &batch {
            Some(batch) => {
                self.emit_accrual(&ledger, batch.amount_granted, grants::BIRTHDAY_LABEL, now);
            }
            None => debug!(client_id = %client_id, "Birthday bonus not eligible"),
        }
        Ok(batch)
    }

    // ─── Accrual ────────────────────────────────────────────────────────

    /// Convert a purchase into points and append the resulting batch.
    pub fn record_purchase(
        &self,
        request: &PurchaseRequest,
        now: DateTime<Utc>,
    ) -> LedgerResult<PurchaseReceipt> {
        accrual::validate_purchase_amount(request.amount)?;

        let today = now.date_naive();
        let campaigns = self.bonuses.active_bonuses(today, request.audience);
        let bonus = BonusResolver::resolve(
            today,
            &campaigns,
            request.manual_bonus.as_ref(),
            request.audience,
        );
        let conversion_rate = self.settings.conversion_rate();
        let cash_bonus = self.settings.cash_payment_bonus();
        let selector = self.selector();

        let ((outcome, batch), ledger) = self.update(&request.client_id, |ledger| {
            let outcome = accrual::compute(&AccrualInput {
                purchase_amount: request.amount,
                prior_carryover: ledger.monetary_carryover,
                conversion_rate,
                bonus: &bonus,
                cash_bonus: Some(&cash_bonus),
                paid_in_cash: request.paid_in_cash,
            })?;

            let expiry_days = if outcome.final_points > 0 {
                selector.validity_days(outcome.final_points)
            } else {
                0
            };
            let label = accrual::origin_label(request.amount, &bonus.labels, outcome.cash_extra);
            let batch = accrual::apply(ledger, request.amount, &outcome, expiry_days, label, now)?;
            Ok((outcome, batch))
        })?;

        let expiration = ExpirationView::summarize(&ledger, now);
        if outcome.final_points > 0 {
            metrics::counter!("loyalty.points_accrued").increment(outcome.final_points as u64);
        }

        info!(
            client_id = %request.client_id,
            amount = request.amount,
            points = outcome.final_points,
            balance = ledger.cached_balance,
            carryover = ledger.monetary_carryover,
            "Purchase recorded"
        );

        let mut labels = bonus.labels.clone();
        if outcome.cash_extra > 0 {
            labels.push(format!("Cash +{}", outcome.cash_extra));
        }
        self.events.emit(LedgerEvent::PointsAccrued(AccrualCompleted {
            client_id: request.client_id.clone(),
            final_points: outcome.final_points,
            new_balance: ledger.cached_balance,
            next_expiry_date: expiration.next_expiry_date,
            points_expiring_on_next_date: expiration.points_expiring,
            labels,
            occurred_at: now,
        }));

        Ok(PurchaseReceipt {
            client_id: request.client_id.clone(),
            outcome,
            bonus,
            batch,
            new_balance: ledger.cached_balance,
            carryover: ledger.monetary_carryover,
            expiration,
        })
    }

    fn emit_accrual(&self, ledger: &ClientLedger, points: i64, label: &str, now: DateTime<Utc>) {
        let expiration = ExpirationView::summarize(ledger, now);
        metrics::counter!("loyalty.points_accrued").increment(points as u64);
        info!(
            client_id = %ledger.client_id,
            points = points,
            balance = ledger.cached_balance,
            "Bonus points granted"
        );
        self.events.emit(LedgerEvent::PointsAccrued(AccrualCompleted {
            client_id: ledger.client_id.clone(),
            final_points: points,
            new_balance: ledger.cached_balance,
            next_expiry_date: expiration.next_expiry_date,
            points_expiring_on_next_date: expiration.points_expiring,
            labels: vec![label.to_string()],
            occurred_at: now,
        }));
    }

    // ─── Redemption & Adjustment ────────────────────────────────────────

    /// Spend points on a reward, oldest batches first.
    pub fn redeem(
        &self,
        client_id: &str,
        amount: i64,
        reward_name: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<RedemptionReceipt> {
        redemption::validate_amount(amount)?;

        let result = self.update(client_id, |ledger| redemption::debit_fifo(ledger, amount, now));
        let (outcome, ledger) = match result {
            Ok(done) => done,
            Err(e @ LedgerError::InsufficientBalance { .. }) => {
                metrics::counter!("loyalty.redemptions_rejected").increment(1);
                warn!(
                    client_id = %client_id,
                    requested = amount,
                    reward = %reward_name,
                    "Redemption rejected: {}",
                    e
                );
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        metrics::counter!("loyalty.points_redeemed").increment(amount as u64);
        metrics::counter!("loyalty.redemptions").increment(1);
        info!(
            client_id = %client_id,
            reward = %reward_name,
            cost = amount,
            batches = outcome.debits.len(),
            new_balance = ledger.cached_balance,
            "Points redeemed"
        );

        self.events.emit(LedgerEvent::PointsRedeemed(RedemptionCompleted {
            client_id: client_id.to_string(),
            redeemed_amount: amount,
            reward_name: reward_name.to_string(),
            new_balance: ledger.cached_balance,
            occurred_at: now,
        }));

        Ok(RedemptionReceipt {
            client_id: client_id.to_string(),
            reward_name: reward_name.to_string(),
            outcome,
            new_balance: ledger.cached_balance,
        })
    }

    /// Administrative override of the balance to `new_balance`.
    pub fn adjust_balance(
        &self,
        client_id: &str,
        new_balance: i64,
        justification: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<Adjustment> {
        if new_balance < 0 {
            return Err(LedgerError::InvalidInput(format!(
                "balance cannot be negative, got {new_balance}"
            )));
        }

        let (adjustment, _) = self.update(client_id, |ledger| {
            redemption::adjust_balance(ledger, new_balance, justification, now)
        })?;

        if adjustment.delta != 0 {
            metrics::counter!("loyalty.adjustments").increment(1);
            info!(
                client_id = %client_id,
                previous = adjustment.previous_balance,
                delta = adjustment.delta,
                new_balance = adjustment.new_balance,
                justification = %justification.trim(),
                "Balance adjusted"
            );
            self.events.emit(LedgerEvent::BalanceAdjusted(BalanceAdjusted {
                client_id: client_id.to_string(),
                delta: adjustment.delta,
                new_balance: adjustment.new_balance,
                justification: justification.trim().to_string(),
                occurred_at: now,
            }));
        }
        Ok(adjustment)
    }

    /// Flag lapsed batches as expired for display. Returns the number newly
    /// flagged.
    pub fn sweep_expired(&self, client_id: &str, now: DateTime<Utc>) -> LedgerResult<usize> {
        let (flagged, ledger) = self.update(client_id, |ledger| Ok(ledger.sweep_expired(now)))?;
        if flagged > 0 {
            metrics::counter!("loyalty.batches_swept").increment(flagged as u64);
            debug!(
                client_id = %client_id,
                flagged = flagged,
                balance = ledger.cached_balance,
                "Expired batches flagged"
            );
        }
        Ok(flagged)
    }

    // ─── Reads ──────────────────────────────────────────────────────────

    pub fn balance(&self, client_id: &str, now: DateTime<Utc>) -> LedgerResult<BalanceSnapshot> {
        let ledger = self.store.get_ledger(client_id)?;
        Ok(BalanceSnapshot {
            client_id: ledger.client_id.clone(),
            available_points: ledger.available_points(now),
            cached_balance: ledger.cached_balance,
            monetary_carryover: ledger.monetary_carryover,
            total_spent: ledger.total_spent,
            last_purchase_at: ledger.last_purchase_at,
            expiration: ExpirationView::summarize(&ledger, now),
        })
    }

    /// Distinct upcoming expiry dates, soonest first. Defaults to the
    /// configured limit.
    pub fn upcoming_expirations(
        &self,
        client_id: &str,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> LedgerResult<Vec<UpcomingExpiration>> {
        let ledger = self.store.get_ledger(client_id)?;
        let limit = limit.unwrap_or(self.upcoming_expirations_limit);
        Ok(ExpirationView::upcoming(&ledger, now, limit))
    }

    /// Every batch, newest first.
    pub fn history(&self, client_id: &str, now: DateTime<Utc>) -> LedgerResult<Vec<BatchView>> {
        let ledger = self.store.get_ledger(client_id)?;
        Ok(ledger
            .batches
            .iter()
            .rev()
            .map(|batch| BatchView::of(batch, now))
            .collect())
    }
}
