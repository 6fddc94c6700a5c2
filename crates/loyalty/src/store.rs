//! In-memory ledger store backed by DashMap, plus the optimistic
//! read-modify-write loop every ledger mutation goes through.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ledger_core::loyalty::ClientLedger;
use ledger_core::store::LedgerStore;
use ledger_core::{LedgerError, LedgerResult};
use tracing::{debug, info, warn};

/// Thread-safe in-memory store keyed by client id.
pub struct InMemoryLedgerStore {
    ledgers: DashMap<String, ClientLedger>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        info!("Ledger store initialized (in-memory)");
        Self {
            ledgers: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.ledgers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ledgers.is_empty()
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn get_ledger(&self, client_id: &str) -> LedgerResult<ClientLedger> {
        self.ledgers
            .get(client_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| LedgerError::ClientNotFound(client_id.to_string()))
    }

    fn create_ledger(&self, ledger: ClientLedger) -> LedgerResult<ClientLedger> {
        match self.ledgers.entry(ledger.client_id.clone()) {
            Entry::Occupied(_) => Err(LedgerError::ClientExists(ledger.client_id)),
            Entry::Vacant(slot) => {
                slot.insert(ledger.clone());
                Ok(ledger)
            }
        }
    }

    fn compare_and_swap(&self, mut ledger: ClientLedger) -> LedgerResult<ClientLedger> {
        // Shard write lock held for the whole check-and-write
        let mut entry = self
            .ledgers
            .get_mut(&ledger.client_id)
            .ok_or_else(|| LedgerError::ClientNotFound(ledger.client_id.clone()))?;

        if entry.version != ledger.version {
            debug!(
                client_id = %ledger.client_id,
                stored = entry.version,
                attempted = ledger.version,
                "Stale ledger version"
            );
            return Err(LedgerError::ConcurrentConflict {
                client_id: ledger.client_id,
            });
        }

        ledger.version += 1;
        *entry = ledger.clone();
        Ok(ledger)
    }
}

/// Read the ledger, apply `mutate`, and commit with a version check,
/// re-reading and recomputing on conflict.
///
/// `mutate` must be a pure function of the ledger it receives; it runs once
/// per attempt. Errors it returns abort without writing.
pub fn atomic_update<T, F>(
    store: &dyn LedgerStore,
    client_id: &str,
    max_attempts: u32,
    mut mutate: F,
) -> LedgerResult<(T, ClientLedger)>
where
    F: FnMut(&mut ClientLedger) -> LedgerResult<T>,
{
    let attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut ledger = store.get_ledger(client_id)?;
        let value = mutate(&mut ledger)?;

        match store.compare_and_swap(ledger) {
            Ok(committed) => return Ok((value, committed)),
            Err(e) if e.is_retryable() && attempt < attempts => {
                metrics::counter!("loyalty.conflict_retries").increment(1);
                warn!(
                    client_id = %client_id,
                    attempt = attempt,
                    max_attempts = attempts,
                    "Ledger write conflict, retrying"
                );
            }
            Err(e) => return Err(e),
        }
    }
}
