//! In-memory campaign bonus registry.

use chrono::NaiveDate;
use ledger_core::loyalty::{AudienceFlags, BonusRule};
use ledger_core::store::BonusRegistry;
use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

/// Campaign bonuses in registration order.
#[derive(Default)]
pub struct InMemoryBonusRegistry {
    rules: RwLock<Vec<BonusRule>>,
}

impl InMemoryBonusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<BonusRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
        }
    }

    pub fn register(&self, rule: BonusRule) -> Uuid {
        info!(
            id = %rule.id,
            name = %rule.name,
            kind = ?rule.kind,
            value = rule.value,
            from = %rule.active_from,
            to = %rule.active_to,
            "Bonus rule registered"
        );
        let id = rule.id;
        self.rules.write().push(rule);
        id
    }

    pub fn remove(&self, id: Uuid) -> Option<BonusRule> {
        let mut rules = self.rules.write();
        let index = rules.iter().position(|r| r.id == id)?;
        Some(rules.remove(index))
    }

    pub fn list(&self) -> Vec<BonusRule> {
        self.rules.read().clone()
    }
}

impl BonusRegistry for InMemoryBonusRegistry {
    fn active_bonuses(&self, today: NaiveDate, audience: AudienceFlags) -> Vec<BonusRule> {
        self.rules
            .read()
            .iter()
            .filter(|r| r.is_active_on(today) && r.applies_to(audience))
            .cloned()
            .collect()
    }
}
