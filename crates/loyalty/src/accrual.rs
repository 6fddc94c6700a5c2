//! Purchase-to-points conversion.
//!
//! The stages run in a fixed order and each feeds the next:
//! multiplier → carryover → conversion (the only floor of money) →
//! fixed bonuses → cash incentive.

use crate::bonus::ResolvedBonus;
use chrono::{DateTime, Utc};
use ledger_core::loyalty::{
    BatchSource, CashBonusMode, CashBonusScope, CashPaymentBonus, ClientLedger, PointBatch,
};
use ledger_core::{LedgerError, LedgerResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configured rates below 1 (or non-finite) are coerced to 1.
pub fn effective_conversion_rate(configured: f64) -> f64 {
    if configured.is_finite() && configured >= 1.0 {
        configured
    } else {
        1.0
    }
}

pub fn validate_purchase_amount(amount: f64) -> LedgerResult<()> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(LedgerError::InvalidInput(format!(
            "purchase amount must be a positive finite number, got {amount}"
        )))
    }
}

/// Inputs of a single conversion.
#[derive(Debug, Clone)]
pub struct AccrualInput<'a> {
    pub purchase_amount: f64,
    pub prior_carryover: f64,
    pub conversion_rate: f64,
    pub bonus: &'a ResolvedBonus,
    pub cash_bonus: Option<&'a CashPaymentBonus>,
    pub paid_in_cash: bool,
}

/// Every intermediate of the conversion, kept for audit and tests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccrualOutcome {
    pub adjusted_amount: f64,
    pub potential: f64,
    pub conversion_rate: f64,
    pub base_points: i64,
    pub points_with_fixed: i64,
    pub cash_extra: i64,
    pub final_points: i64,
    pub new_carryover: f64,
}

pub fn compute(input: &AccrualInput<'_>) -> LedgerResult<AccrualOutcome> {
    validate_purchase_amount(input.purchase_amount)?;
    let rate = effective_conversion_rate(input.conversion_rate);
    let prior = if input.prior_carryover.is_finite() && input.prior_carryover > 0.0 {
        input.prior_carryover
    } else {
        0.0
    };

    let adjusted_amount = input.purchase_amount * input.bonus.multiplier;
    let potential = adjusted_amount + prior;
    let (base_points, new_carryover) = convert(potential, rate)?;
    let points_with_fixed = base_points
        .checked_add(input.bonus.fixed_add)
        .ok_or_else(|| points_overflow(input.purchase_amount))?;

    let cash_extra = match input.cash_bonus {
        Some(cash) if input.paid_in_cash && cash.enabled => {
            cash_extra(cash, base_points, points_with_fixed)
        }
        _ => 0,
    };
    let final_points = points_with_fixed
        .checked_add(cash_extra)
        .ok_or_else(|| points_overflow(input.purchase_amount))?;

    debug!(
        purchase = input.purchase_amount,
        multiplier = input.bonus.multiplier,
        potential = potential,
        base_points = base_points,
        fixed_add = input.bonus.fixed_add,
        cash_extra = cash_extra,
        final_points = final_points,
        carryover = new_carryover,
        "Accrual computed"
    );

    Ok(AccrualOutcome {
        adjusted_amount,
        potential,
        conversion_rate: rate,
        base_points,
        points_with_fixed,
        cash_extra,
        final_points,
        new_carryover,
    })
}

fn points_overflow(purchase_amount: f64) -> LedgerError {
    LedgerError::InvalidInput(format!(
        "purchase of {purchase_amount} converts to more points than a ledger can hold"
    ))
}

/// `(floor(potential / rate), potential mod rate)`, with the remainder kept
/// inside `[0, rate)`.
fn convert(potential: f64, rate: f64) -> LedgerResult<(i64, f64)> {
    if !potential.is_finite() {
        return Err(LedgerError::InvalidInput(format!(
            "bonus-adjusted amount is not finite: {potential}"
        )));
    }
    if potential <= 0.0 {
        return Ok((0, 0.0));
    }
    let whole = (potential / rate).floor();
    // i64::MAX as f64 rounds up to 2^63, the first value that no longer fits
    if whole >= i64::MAX as f64 {
        return Err(points_overflow(potential));
    }
    let mut points = whole as i64;
    let mut carryover = potential.rem_euclid(rate);
    // rem_euclid may round up to exactly `rate`
    if carryover >= rate {
        carryover -= rate;
        points += 1;
    }
    Ok((points, carryover.max(0.0)))
}

pub fn cash_extra(cash: &CashPaymentBonus, base_points: i64, points_with_fixed: i64) -> i64 {
    if !cash.value.is_finite() {
        return 0;
    }
    match cash.mode {
        CashBonusMode::Add => (cash.value.floor() as i64).max(0),
        CashBonusMode::Multiply => {
            let scoped = match cash.scope {
                CashBonusScope::Base => base_points,
                CashBonusScope::PostBonus => points_with_fixed,
            };
            // Float-to-int casts saturate; the subtraction must too
            ((scoped as f64 * cash.value).floor() as i64)
                .saturating_sub(scoped)
                .max(0)
        }
    }
}

/// Audit label such as `"Purchase $250 (Double Days x2, Cash +2)"`.
pub fn origin_label(purchase_amount: f64, labels: &[String], cash_extra: i64) -> String {
    let amount = if purchase_amount.fract() == 0.0 {
        format!("{purchase_amount:.0}")
    } else {
        format!("{purchase_amount:.2}")
    };

    let mut tags: Vec<String> = labels.to_vec();
    if cash_extra > 0 {
        tags.push(format!("Cash +{cash_extra}"));
    }

    if tags.is_empty() {
        format!("Purchase ${amount}")
    } else {
        format!("Purchase ${amount} ({})", tags.join(", "))
    }
}

/// Write a computed accrual into the ledger. A batch is appended only when
/// points were earned; carryover and audit fields are always updated.
///
/// Fails without touching the ledger when the batch would overflow the
/// balance.
pub fn apply(
    ledger: &mut ClientLedger,
    purchase_amount: f64,
    outcome: &AccrualOutcome,
    expiry_days: u32,
    label: String,
    now: DateTime<Utc>,
) -> LedgerResult<Option<PointBatch>> {
    let batch = if outcome.final_points > 0 {
        let batch = PointBatch::new(
            outcome.final_points,
            now,
            Some(expiry_days),
            label,
            BatchSource::Purchase,
        );
        ledger.append_batch(batch.clone(), now)?;
        Some(batch)
    } else {
        ledger.refresh_balance(now);
        None
    };

    ledger.monetary_carryover = outcome.new_carryover;
    ledger.total_spent += purchase_amount;
    ledger.last_purchase_at = Some(now);
    Ok(batch)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ledger_core::loyalty::{CashBonusMode, CashBonusScope};

    fn input<'a>(
        amount: f64,
        carry: f64,
        rate: f64,
        bonus: &'a ResolvedBonus,
    ) -> AccrualInput<'a> {
        AccrualInput {
            purchase_amount: amount,
            prior_carryover: carry,
            conversion_rate: rate,
            bonus,
            cash_bonus: None,
            paid_in_cash: false,
        }
    }

    fn cash(mode: CashBonusMode, value: f64, scope: CashBonusScope) -> CashPaymentBonus {
        CashPaymentBonus {
            enabled: true,
            mode,
            value,
            scope,
        }
    }

    #[test]
    fn test_plain_purchase_keeps_remainder() {
        let bonus = ResolvedBonus::default();
        let out = compute(&input(250.0, 0.0, 100.0, &bonus)).unwrap();
        assert_eq!(out.base_points, 2);
        assert_eq!(out.final_points, 2);
        assert!((out.new_carryover - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_carryover_completes_a_point() {
        let bonus = ResolvedBonus::default();
        let out = compute(&input(80.0, 30.0, 100.0, &bonus)).unwrap();
        assert!((out.potential - 110.0).abs() < 1e-9);
        assert_eq!(out.base_points, 1);
        assert!((out.new_carryover - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_multiplier_then_fixed_bonus() {
        let bonus = ResolvedBonus {
            multiplier: 2.0,
            campaign_multiplier: 2.0,
            fixed_add: 10,
            ..ResolvedBonus::default()
        };
        let out = compute(&input(100.0, 0.0, 100.0, &bonus)).unwrap();
        assert!((out.adjusted_amount - 200.0).abs() < 1e-9);
        assert_eq!(out.base_points, 2);
        assert_eq!(out.final_points, 12);
    }

    #[test]
    fn test_multiplier_applies_before_carryover() {
        let bonus = ResolvedBonus {
            multiplier: 2.0,
            campaign_multiplier: 2.0,
            ..ResolvedBonus::default()
        };
        // 45 * 2 + 20 = 110, not (45 + 20) * 2
        let out = compute(&input(45.0, 20.0, 100.0, &bonus)).unwrap();
        assert_eq!(out.base_points, 1);
        assert!((out.new_carryover - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_cash_multiply_on_base_scope() {
        let cfg = cash(CashBonusMode::Multiply, 1.2, CashBonusScope::Base);
        assert_eq!(cash_extra(&cfg, 10, 15), 2);
    }

    #[test]
    fn test_cash_multiply_on_post_bonus_scope() {
        let cfg = cash(CashBonusMode::Multiply, 1.2, CashBonusScope::PostBonus);
        // floor(20 * 1.2) - 20
        assert_eq!(cash_extra(&cfg, 10, 20), 4);
    }

    #[test]
    fn test_cash_add_guards_negative() {
        assert_eq!(cash_extra(&cash(CashBonusMode::Add, 5.7, CashBonusScope::Base), 3, 3), 5);
        assert_eq!(cash_extra(&cash(CashBonusMode::Add, -4.0, CashBonusScope::Base), 3, 3), 0);
        let shrink = cash(CashBonusMode::Multiply, 0.5, CashBonusScope::Base);
        assert_eq!(cash_extra(&shrink, 10, 10), 0);
    }

    #[test]
    fn test_cash_bonus_requires_cash_and_enabled() {
        let bonus = ResolvedBonus {
            fixed_add: 3,
            ..ResolvedBonus::default()
        };
        let enabled = cash(CashBonusMode::Multiply, 1.2, CashBonusScope::Base);
        let disabled = CashPaymentBonus {
            enabled: false,
            ..enabled.clone()
        };

        let mut req = input(1000.0, 0.0, 100.0, &bonus);
        req.cash_bonus = Some(&enabled);
        assert_eq!(compute(&req).unwrap().final_points, 13);

        req.paid_in_cash = true;
        // base 10 → +2, on top of the fixed 3
        assert_eq!(compute(&req).unwrap().final_points, 15);

        req.cash_bonus = Some(&disabled);
        assert_eq!(compute(&req).unwrap().final_points, 13);
    }

    #[test]
    fn test_rate_below_one_is_coerced() {
        assert!((effective_conversion_rate(0.25) - 1.0).abs() < f64::EPSILON);
        assert!((effective_conversion_rate(f64::NAN) - 1.0).abs() < f64::EPSILON);
        assert!((effective_conversion_rate(10.0) - 10.0).abs() < f64::EPSILON);

        let bonus = ResolvedBonus::default();
        let out = compute(&input(7.5, 0.0, 0.1, &bonus)).unwrap();
        assert_eq!(out.base_points, 7);
        assert!((out.new_carryover - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_non_positive_or_non_finite_amount() {
        let bonus = ResolvedBonus::default();
        for amount in [0.0, -10.0, f64::NAN, f64::INFINITY] {
            let err = compute(&input(amount, 0.0, 100.0, &bonus)).unwrap_err();
            assert!(matches!(err, LedgerError::InvalidInput(_)));
        }
    }

    #[test]
    fn test_carryover_stays_below_rate() {
        let bonus = ResolvedBonus::default();
        let mut carry = 0.0;
        for amount in [33.3, 66.7, 99.99, 0.01, 250.5, 12.34] {
            let out = compute(&input(amount, carry, 100.0, &bonus)).unwrap();
            assert!(out.new_carryover >= 0.0 && out.new_carryover < 100.0);
            carry = out.new_carryover;
        }
    }

    #[test]
    fn test_apply_replaces_carryover_without_batch() {
        let now = Utc::now();
        let mut ledger = ClientLedger::new("c-1", now);
        ledger.monetary_carryover = 30.0;

        let bonus = ResolvedBonus::default();
        let out = compute(&input(40.0, ledger.monetary_carryover, 100.0, &bonus)).unwrap();
        let batch = apply(&mut ledger, 40.0, &out, 30, "Purchase $40".into(), now).unwrap();

        assert!(batch.is_none());
        assert!(ledger.batches.is_empty());
        assert!((ledger.monetary_carryover - 70.0).abs() < 1e-9);
        assert!((ledger.total_spent - 40.0).abs() < 1e-9);
        assert_eq!(ledger.last_purchase_at, Some(now));
    }

    #[test]
    fn test_huge_purchase_rejected_instead_of_overflowing() {
        let bonus = ResolvedBonus {
            fixed_add: 10,
            ..ResolvedBonus::default()
        };
        let err = compute(&input(1e300, 0.0, 100.0, &bonus)).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));

        // Finite amount whose bonus-adjusted value is infinite
        let doubled = ResolvedBonus {
            multiplier: 2.0,
            campaign_multiplier: 2.0,
            ..ResolvedBonus::default()
        };
        let err = compute(&input(f64::MAX, 0.0, 1.0, &doubled)).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
    }

    #[test]
    fn test_fixed_and_cash_additions_are_checked() {
        // 9e18 base points fit, adding the fixed bonus on top does not
        let bonus = ResolvedBonus {
            fixed_add: i64::MAX / 2,
            ..ResolvedBonus::default()
        };
        let err = compute(&input(9e20, 0.0, 100.0, &bonus)).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));

        let big = cash(CashBonusMode::Multiply, 4.0, CashBonusScope::Base);
        assert_eq!(
            cash_extra(&big, i64::MAX / 2, i64::MAX / 2),
            i64::MAX - i64::MAX / 2
        );
        let one = ResolvedBonus {
            fixed_add: 1,
            ..ResolvedBonus::default()
        };
        // 9e18 + 1 + (i64::MAX - 9e18)
        let mut req = input(9e20, 0.0, 100.0, &one);
        req.cash_bonus = Some(&big);
        req.paid_in_cash = true;
        assert!(matches!(compute(&req), Err(LedgerError::InvalidInput(_))));
    }

    #[test]
    fn test_apply_overflow_leaves_ledger_untouched() {
        let now = Utc::now();
        let mut ledger = ClientLedger::new("c-1", now);
        let bonus = ResolvedBonus::default();
        let out = compute(&input(9e20, 0.0, 100.0, &bonus)).unwrap();
        apply(&mut ledger, 9e20, &out, 30, "first".into(), now).unwrap();

        let err = apply(&mut ledger, 9e20, &out, 30, "second".into(), now).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
        assert_eq!(ledger.batches.len(), 1);
        assert!((ledger.total_spent - 9e20).abs() < 1e6);
        assert!(ledger.is_consistent(now));
    }

    #[test]
    fn test_origin_label_format() {
        assert_eq!(origin_label(250.0, &[], 0), "Purchase $250");
        assert_eq!(
            origin_label(12.5, &["Double Days x2".into()], 2),
            "Purchase $12.50 (Double Days x2, Cash +2)"
        );
    }
}
