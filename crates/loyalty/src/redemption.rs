//! FIFO point debits and administrative balance overrides.

use chrono::{DateTime, Utc};
use ledger_core::loyalty::{BatchSource, ClientLedger, PointBatch};
use ledger_core::{LedgerError, LedgerResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Points taken from one batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchDebit {
    pub batch_id: Uuid,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedemptionOutcome {
    pub redeemed: i64,
    pub debits: Vec<BatchDebit>,
    pub balance_after: i64,
}

pub fn validate_amount(requested: i64) -> LedgerResult<()> {
    if requested > 0 {
        Ok(())
    } else {
        Err(LedgerError::InvalidInput(format!(
            "redemption amount must be positive, got {requested}"
        )))
    }
}

/// Debit `requested` points, oldest eligible batch first.
///
/// Either the full amount is debited or the ledger is left untouched.
pub fn debit_fifo(
    ledger: &mut ClientLedger,
    requested: i64,
    now: DateTime<Utc>,
) -> LedgerResult<RedemptionOutcome> {
    validate_amount(requested)?;

    let available = ledger.available_points(now);
    if requested > available {
        return Err(LedgerError::InsufficientBalance {
            requested,
            available,
        });
    }

    let mut order: Vec<usize> = ledger
        .batches
        .iter()
        .enumerate()
        .filter(|(_, b)| b.spendable(now) > 0)
        .map(|(i, _)| i)
        .collect();
    // Stable: same-instant grants keep insertion order
    order.sort_by_key(|&i| ledger.batches[i].granted_at);

    let mut remaining = requested;
    let mut debits = Vec::new();
    for index in order {
        if remaining == 0 {
            break;
        }
        let batch = &mut ledger.batches[index];
        let consumed = batch.amount_remaining.min(remaining);
        batch.amount_remaining -= consumed;
        remaining -= consumed;
        debits.push(BatchDebit {
            batch_id: batch.id,
            amount: consumed,
        });
    }

    ledger.cached_balance = available - requested;

    Ok(RedemptionOutcome {
        redeemed: requested,
        debits,
        balance_after: ledger.cached_balance,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdjustmentOutcome {
    Unchanged,
    Credited(PointBatch),
    Debited(RedemptionOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub previous_balance: i64,
    pub new_balance: i64,
    pub delta: i64,
    pub outcome: AdjustmentOutcome,
}

/// Set the balance to an explicit value. Credits never expire; debits go
/// through the FIFO path.
pub fn adjust_balance(
    ledger: &mut ClientLedger,
    new_balance: i64,
    justification: &str,
    now: DateTime<Utc>,
) -> LedgerResult<Adjustment> {
    if new_balance < 0 {
        return Err(LedgerError::InvalidInput(format!(
            "balance cannot be negative, got {new_balance}"
        )));
    }

    let previous_balance = ledger.available_points(now);
    let delta = new_balance - previous_balance;
    let justification = justification.trim();

    if delta != 0 && justification.is_empty() {
        return Err(LedgerError::InvalidInput(
            "a justification is required to change the balance".into(),
        ));
    }

    let outcome = if delta > 0 {
        let batch = PointBatch::new(delta, now, None, justification, BatchSource::Adjustment);
        ledger.append_batch(batch.clone(), now)?;
        AdjustmentOutcome::Credited(batch)
    } else if delta < 0 {
        AdjustmentOutcome::Debited(debit_fifo(ledger, -delta, now)?)
    } else {
        ledger.refresh_balance(now);
        AdjustmentOutcome::Unchanged
    };

    Ok(Adjustment {
        previous_balance,
        new_balance: ledger.cached_balance,
        delta,
        outcome,
    })
}
