//! Ledger event bus: the trait for handing completed ledger operations to the
//! notification layer.
//!
//! The engine accepts an `Arc<dyn EventSink>` and emits one event after each
//! committed accrual, redemption, or manual adjustment. Sinks never feed back
//! into the ledger.

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Points granted by a purchase or promotional grant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccrualCompleted {
    pub client_id: String,
    pub final_points: i64,
    pub new_balance: i64,
    pub next_expiry_date: Option<NaiveDate>,
    pub points_expiring_on_next_date: i64,
    pub labels: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Points spent on a reward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedemptionCompleted {
    pub client_id: String,
    pub redeemed_amount: i64,
    pub reward_name: String,
    pub new_balance: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Administrative balance override.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BalanceAdjusted {
    pub client_id: String,
    pub delta: i64,
    pub new_balance: i64,
    pub justification: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    PointsAccrued(AccrualCompleted),
    PointsRedeemed(RedemptionCompleted),
    BalanceAdjusted(BalanceAdjusted),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventType {
    PointsAccrued,
    PointsRedeemed,
    BalanceAdjusted,
}

impl LedgerEvent {
    pub fn event_type(&self) -> LedgerEventType {
        match self {
            LedgerEvent::PointsAccrued(_) => LedgerEventType::PointsAccrued,
            LedgerEvent::PointsRedeemed(_) => LedgerEventType::PointsRedeemed,
            LedgerEvent::BalanceAdjusted(_) => LedgerEventType::BalanceAdjusted,
        }
    }

    pub fn client_id(&self) -> &str {
        match self {
            LedgerEvent::PointsAccrued(e) => &e.client_id,
            LedgerEvent::PointsRedeemed(e) => &e.client_id,
            LedgerEvent::BalanceAdjusted(e) => &e.client_id,
        }
    }
}

/// Receives ledger events. Implementations route them to push, email, or
/// messaging dispatchers.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LedgerEvent);
}

/// No-op sink for callers that don't dispatch notifications.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: LedgerEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<LedgerEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn count_type(&self, event_type: LedgerEventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: LedgerEvent) {
        self.events.lock().push(event);
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
