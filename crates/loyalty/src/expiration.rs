//! Expiration tiers and the read-time expiration view.
//!
//! Nothing here mutates a ledger: expiry is always derived from
//! `(batches, now)`.

use chrono::{DateTime, NaiveDate, Utc};
use ledger_core::loyalty::{ClientLedger, ExpirationRule};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Validity used when no expiration rule is configured.
pub const DEFAULT_VALIDITY_DAYS: u32 = 90;

/// Resolves how long a batch of a given size stays valid.
#[derive(Debug, Clone)]
pub struct ExpirationRuleSelector {
    /// Sorted by `min_points`, highest first.
    rules: Vec<ExpirationRule>,
    fallback_days: u32,
}

impl ExpirationRuleSelector {
    pub fn new(rules: &[ExpirationRule]) -> Self {
        let mut rules = rules.to_vec();
        // Stable: equal thresholds keep configuration order
        rules.sort_by(|a, b| b.min_points.cmp(&a.min_points));
        Self {
            rules,
            fallback_days: DEFAULT_VALIDITY_DAYS,
        }
    }

    pub fn with_fallback(mut self, days: u32) -> Self {
        self.fallback_days = days;
        self
    }

    /// Highest tier the quantity reaches; below every tier the lowest one
    /// applies, and an empty rule set falls back to the default window.
    pub fn validity_days(&self, points: i64) -> u32 {
        if self.rules.is_empty() {
            warn!(
                points = points,
                fallback_days = self.fallback_days,
                "No expiration rules configured, using default validity"
            );
            return self.fallback_days;
        }

        self.rules
            .iter()
            .find(|rule| rule.min_points <= points)
            .or_else(|| self.rules.last())
            .map(|rule| rule.validity_days)
            .unwrap_or(self.fallback_days)
    }
}

/// Next expiration date and the points lapsing on it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExpirationSummary {
    /// Exact instant of the earliest upcoming expiry.
    pub next_expiry_at: Option<DateTime<Utc>>,
    pub next_expiry_date: Option<NaiveDate>,
    /// Points lapsing on the same calendar day as `next_expiry_at`.
    pub points_expiring: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpcomingExpiration {
    pub date: NaiveDate,
    pub points: i64,
}

/// Read-only aggregation over a ledger snapshot.
pub struct ExpirationView;

impl ExpirationView {
    /// `(expiry instant, remaining points)` for every batch that still has
    /// points and will lapse at or after `now`.
    fn pending(
        ledger: &ClientLedger,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = (DateTime<Utc>, i64)> + '_ {
        ledger
            .batches
            .iter()
            .filter(|b| b.amount_remaining > 0 && !b.expired_flag)
            .filter_map(|b| b.expires_at().map(|at| (at, b.amount_remaining)))
            .filter(move |(at, _)| *at >= now)
    }

    pub fn summarize(ledger: &ClientLedger, now: DateTime<Utc>) -> ExpirationSummary {
        let pending: Vec<(DateTime<Utc>, i64)> = Self::pending(ledger, now).collect();

        let Some(next) = pending.iter().map(|(at, _)| *at).min() else {
            return ExpirationSummary::default();
        };
        let next_date = next.date_naive();

        let points_expiring = pending
            .iter()
            .filter(|(at, _)| at.date_naive() == next_date)
            .map(|(_, points)| points)
            .sum();

        ExpirationSummary {
            next_expiry_at: Some(next),
            next_expiry_date: Some(next_date),
            points_expiring,
        }
    }

    /// First `limit` distinct expiry dates with their totals, soonest first.
    pub fn upcoming(
        ledger: &ClientLedger,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Vec<UpcomingExpiration> {
        let mut by_date: BTreeMap<NaiveDate, i64> = BTreeMap::new();
        for (at, points) in Self::pending(ledger, now) {
            *by_date.entry(at.date_naive()).or_insert(0) += points;
        }

        by_date
            .into_iter()
            .take(limit)
            .map(|(date, points)| UpcomingExpiration { date, points })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ledger_core::loyalty::{BatchSource, PointBatch};

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn tiers() -> Vec<ExpirationRule> {
        vec![ExpirationRule::new(0, 30), ExpirationRule::new(500, 365)]
    }

    #[test]
    fn test_selector_picks_highest_reached_tier() {
        let selector = ExpirationRuleSelector::new(&tiers());
        assert_eq!(selector.validity_days(50), 30);
        assert_eq!(selector.validity_days(500), 365);
        assert_eq!(selector.validity_days(600), 365);
    }

    #[test]
    fn test_selector_lowest_tier_is_floor() {
        let selector = ExpirationRuleSelector::new(&[
            ExpirationRule::new(1000, 365),
            ExpirationRule::new(100, 60),
        ]);
        // Below every threshold: the smallest tier still applies
        assert_eq!(selector.validity_days(5), 60);
        assert_eq!(selector.validity_days(150), 60);
        assert_eq!(selector.validity_days(1500), 365);
    }

    #[test]
    fn test_selector_empty_rules_default() {
        let selector = ExpirationRuleSelector::new(&[]);
        assert_eq!(selector.validity_days(10), DEFAULT_VALIDITY_DAYS);
        assert_eq!(
            ExpirationRuleSelector::new(&[]).with_fallback(45).validity_days(10),
            45
        );
    }

    fn ledger_with(batches: Vec<PointBatch>) -> ClientLedger {
        let mut ledger = ClientLedger::new("c-1", ts("2024-01-01T00:00:00Z"));
        ledger.batches = batches;
        ledger
    }

    #[test]
    fn test_summary_buckets_same_calendar_day() {
        let morning = ts("2024-01-10T08:00:00Z");
        let evening = ts("2024-01-10T21:30:00Z");
        let ledger = ledger_with(vec![
            PointBatch::new(10, morning, Some(30), "a", BatchSource::Purchase),
            PointBatch::new(15, evening, Some(30), "b", BatchSource::Purchase),
            PointBatch::new(99, morning, Some(60), "c", BatchSource::Purchase),
        ]);

        let summary = ExpirationView::summarize(&ledger, ts("2024-01-20T00:00:00Z"));
        assert_eq!(summary.next_expiry_at, Some(morning + Duration::days(30)));
        assert_eq!(
            summary.next_expiry_date,
            NaiveDate::from_ymd_opt(2024, 2, 9)
        );
        assert_eq!(summary.points_expiring, 25);
    }

    #[test]
    fn test_summary_skips_lapsed_depleted_and_permanent() {
        let granted = ts("2024-01-01T00:00:00Z");
        let mut depleted = PointBatch::new(40, granted, Some(90), "d", BatchSource::Purchase);
        depleted.amount_remaining = 0;
        let ledger = ledger_with(vec![
            PointBatch::new(10, granted, Some(5), "lapsed", BatchSource::Purchase),
            depleted,
            PointBatch::new(70, granted, None, "manual", BatchSource::Adjustment),
        ]);

        let summary = ExpirationView::summarize(&ledger, granted + Duration::days(10));
        assert_eq!(summary, ExpirationSummary::default());
    }

    #[test]
    fn test_summary_ignores_flagged_batches() {
        let granted = ts("2024-01-01T00:00:00Z");
        let mut flagged = PointBatch::new(10, granted, Some(30), "a", BatchSource::Purchase);
        flagged.expired_flag = true;
        let ledger = ledger_with(vec![
            flagged,
            PointBatch::new(4, granted, Some(40), "b", BatchSource::Purchase),
        ]);

        let summary = ExpirationView::summarize(&ledger, granted);
        assert_eq!(summary.points_expiring, 4);
    }

    #[test]
    fn test_summary_is_idempotent() {
        let granted = ts("2024-01-01T00:00:00Z");
        let ledger = ledger_with(vec![PointBatch::new(
            12,
            granted,
            Some(30),
            "a",
            BatchSource::Purchase,
        )]);
        let now = granted + Duration::days(1);
        assert_eq!(
            ExpirationView::summarize(&ledger, now),
            ExpirationView::summarize(&ledger, now)
        );
    }

    #[test]
    fn test_upcoming_lists_distinct_dates_ascending() {
        let granted = ts("2024-01-01T12:00:00Z");
        let ledger = ledger_with(vec![
            PointBatch::new(5, granted, Some(60), "a", BatchSource::Purchase),
            PointBatch::new(7, granted, Some(30), "b", BatchSource::Purchase),
            PointBatch::new(3, granted + Duration::hours(2), Some(30), "c", BatchSource::Purchase),
            PointBatch::new(9, granted, Some(90), "d", BatchSource::Purchase),
        ]);

        let upcoming = ExpirationView::upcoming(&ledger, granted, 2);
        assert_eq!(upcoming.len(), 2);
        assert_eq!(upcoming[0].date, NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
        assert_eq!(upcoming[0].points, 10);
        assert_eq!(upcoming[1].date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(upcoming[1].points, 5);
    }
}
