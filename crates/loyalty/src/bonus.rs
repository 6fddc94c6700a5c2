//! Combines active campaign bonuses and an optional manual bonus into one
//! effective multiplier and a fixed point adder.

use chrono::NaiveDate;
use ledger_core::loyalty::{AudienceFlags, BonusKind, BonusRule, ManualBonus};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Effective bonus for a single transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedBonus {
    /// `campaign_multiplier * manual_multiplier`.
    pub multiplier: f64,
    pub campaign_multiplier: f64,
    pub manual_multiplier: f64,
    pub fixed_add: i64,
    /// Audit tags, one per applied bonus.
    pub labels: Vec<String>,
}

impl Default for ResolvedBonus {
    fn default() -> Self {
        Self {
            multiplier: 1.0,
            campaign_multiplier: 1.0,
            manual_multiplier: 1.0,
            fixed_add: 0,
            labels: Vec::new(),
        }
    }
}

pub struct BonusResolver;

impl BonusResolver {
    /// Campaign multipliers do not compound: only the largest active one is
    /// used, then it is multiplied by the manual bonus. Fixed bonuses sum.
    pub fn resolve(
        today: NaiveDate,
        campaigns: &[BonusRule],
        manual: Option<&ManualBonus>,
        audience: AudienceFlags,
    ) -> ResolvedBonus {
        let mut resolved = ResolvedBonus::default();
        let mut best_multiplier: Option<&BonusRule> = None;
        let mut informational: Vec<&BonusRule> = Vec::new();

        let active = campaigns
            .iter()
            .filter(|rule| rule.is_active_on(today) && rule.applies_to(audience))
            .filter(|rule| rule.value.is_finite());

        for rule in active {
            match rule.kind {
                BonusKind::Multiplier => {
                    if rule.value <= 0.0 {
                        continue;
                    }
                    // Strict comparison: ties keep the first rule found
                    if best_multiplier.map_or(true, |best| rule.value > best.value) {
                        best_multiplier = Some(rule);
                    }
                }
                BonusKind::FixedAdd => {
                    let points = rule.value.trunc() as i64;
                    if points != 0 {
                        resolved.fixed_add = resolved.fixed_add.saturating_add(points);
                        resolved.labels.push(format!("{} {:+}", rule.name, points));
                    }
                }
                BonusKind::Informational => informational.push(rule),
            }
        }

        if let Some(rule) = best_multiplier {
            resolved.campaign_multiplier = rule.value;
            resolved
                .labels
                .insert(0, format!("{} x{}", rule.name, rule.value));
        }

        if let Some(bonus) = manual {
            if bonus.is_usable() {
                resolved.manual_multiplier = bonus.multiplier;
                resolved
                    .labels
                    .push(format!("{} x{}", bonus.name, bonus.multiplier));
            } else {
                debug!(
                    name = %bonus.name,
                    multiplier = bonus.multiplier,
                    "Ignoring unusable manual bonus"
                );
            }
        }

        resolved
            .labels
            .extend(informational.into_iter().map(|rule| rule.name.clone()));
        resolved.multiplier = resolved.campaign_multiplier * resolved.manual_multiplier;
        resolved
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ledger_core::loyalty::BonusAudience;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn rule(name: &str, kind: BonusKind, value: f64) -> BonusRule {
        BonusRule::new(name, kind, value, day(1), day(31))
    }

    #[test]
    fn test_no_bonuses_is_identity() {
        let resolved = BonusResolver::resolve(day(10), &[], None, AudienceFlags::default());
        assert_eq!(resolved, ResolvedBonus::default());
    }

    #[test]
    fn test_campaign_multipliers_take_max_not_product() {
        let rules = vec![
            rule("Spring", BonusKind::Multiplier, 1.5),
            rule("Double Days", BonusKind::Multiplier, 2.0),
            rule("Weekend", BonusKind::Multiplier, 1.2),
        ];
        let resolved = BonusResolver::resolve(day(10), &rules, None, AudienceFlags::default());
        assert!((resolved.multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(resolved.labels, vec!["Double Days x2".to_string()]);
    }

    #[test]
    fn test_multiplier_tie_keeps_first() {
        let rules = vec![
            rule("First", BonusKind::Multiplier, 2.0),
            rule("Second", BonusKind::Multiplier, 2.0),
        ];
        let resolved = BonusResolver::resolve(day(10), &rules, None, AudienceFlags::default());
        assert_eq!(resolved.labels, vec!["First x2".to_string()]);
    }

    #[test]
    fn test_manual_bonus_stacks_multiplicatively() {
        let rules = vec![rule("Double Days", BonusKind::Multiplier, 2.0)];
        let manual = ManualBonus::new("Staff pick", 1.5);
        let resolved =
            BonusResolver::resolve(day(10), &rules, Some(&manual), AudienceFlags::default());
        assert!((resolved.multiplier - 3.0).abs() < f64::EPSILON);
        assert!((resolved.manual_multiplier - 1.5).abs() < f64::EPSILON);
        assert_eq!(resolved.labels.len(), 2);
    }

    #[test]
    fn test_invalid_manual_bonus_ignored() {
        for value in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let manual = ManualBonus::new("Broken", value);
            let resolved =
                BonusResolver::resolve(day(10), &[], Some(&manual), AudienceFlags::default());
            assert!((resolved.multiplier - 1.0).abs() < f64::EPSILON);
            assert!(resolved.labels.is_empty());
        }
    }

    #[test]
    fn test_invalid_campaign_values_ignored() {
        let rules = vec![
            rule("Nan", BonusKind::Multiplier, f64::NAN),
            rule("Inf", BonusKind::Multiplier, f64::INFINITY),
            rule("Zero", BonusKind::Multiplier, 0.0),
            rule("Negative", BonusKind::Multiplier, -2.0),
            rule("Nan fixed", BonusKind::FixedAdd, f64::NAN),
        ];
        let resolved = BonusResolver::resolve(day(10), &rules, None, AudienceFlags::default());
        assert!((resolved.multiplier - 1.0).abs() < f64::EPSILON);
        assert!((resolved.campaign_multiplier - 1.0).abs() < f64::EPSILON);
        assert_eq!(resolved.fixed_add, 0);
        assert!(resolved.labels.is_empty());
    }

    #[test]
    fn test_fixed_bonus_sum_saturates() {
        let rules = vec![
            rule("Huge", BonusKind::FixedAdd, 9e18),
            rule("Huger", BonusKind::FixedAdd, 9e18),
        ];
        let resolved = BonusResolver::resolve(day(10), &rules, None, AudienceFlags::default());
        assert_eq!(resolved.fixed_add, i64::MAX);
    }

    #[test]
    fn test_fixed_bonuses_sum() {
        let rules = vec![
            rule("Launch", BonusKind::FixedAdd, 10.0),
            rule("Anniversary", BonusKind::FixedAdd, 5.0),
        ];
        let resolved = BonusResolver::resolve(day(10), &rules, None, AudienceFlags::default());
        assert_eq!(resolved.fixed_add, 15);
        assert_eq!(
            resolved.labels,
            vec!["Launch +10".to_string(), "Anniversary +5".to_string()]
        );
    }

    #[test]
    fn test_inactive_and_test_cohort_rules_filtered() {
        let expired = BonusRule::new("Old", BonusKind::Multiplier, 3.0, day(1), day(5));
        let beta = rule("Beta", BonusKind::FixedAdd, 50.0)
            .for_audience(BonusAudience::TestCohort);
        let rules = vec![expired, beta];

        let public = BonusResolver::resolve(day(10), &rules, None, AudienceFlags::default());
        assert!((public.multiplier - 1.0).abs() < f64::EPSILON);
        assert_eq!(public.fixed_add, 0);

        let tester = BonusResolver::resolve(day(10), &rules, None, AudienceFlags::test_cohort());
        assert_eq!(tester.fixed_add, 50);
    }

    #[test]
    fn test_informational_rules_only_label() {
        let rules = vec![rule("Members week", BonusKind::Informational, 4.0)];
        let resolved = BonusResolver::resolve(day(10), &rules, None, AudienceFlags::default());
        assert!((resolved.multiplier - 1.0).abs() < f64::EPSILON);
        assert_eq!(resolved.fixed_add, 0);
        assert_eq!(resolved.labels, vec!["Members week".to_string()]);
    }
}
