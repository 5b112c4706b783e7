#![deny(clippy::print_stdout, clippy::print_stderr)]

//! In-process persistence driver for the accounting engine.
//!
//! The store keeps every table of the engine in one [`State`] value behind a
//! `tokio` mutex. A [`Transaction`] stages a copy of the state while holding
//! the lock; committing publishes the staged copy, dropping discards it.
//! Because the lock is held for the whole transaction, writers are fully
//! serialized: sequence bumps and inventory counter updates behave as if
//! every row were locked `FOR UPDATE`.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::OwnedMutexGuard;

mod rows;
mod state;

pub use rows::*;
pub use state::NewInventoryMovement;
pub use state::NewJournalEntry;
pub use state::NewJournalLine;
pub use state::State;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("row not found: {0}")]
    NotFound(String),
    #[error("unique constraint violated: {0}")]
    Conflict(String),
}

#[derive(Clone, Default)]
pub struct Store {
    state: Arc<Mutex<State>>,
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a transaction. The returned handle owns the store lock until it
    /// is committed or dropped; a dropped transaction leaves no trace.
    pub async fn begin(&self) -> Transaction {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Transaction { guard, staged }
    }

    /// Runs a read-only closure against the committed state.
    pub async fn read<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        let guard = self.state.lock().await;
        f(&guard)
    }
}

pub struct Transaction {
    guard: OwnedMutexGuard<State>,
    staged: State,
}

impl Transaction {
    #[must_use]
    pub fn state(&self) -> &State {
        &self.staged
    }

    pub fn state_mut(&mut self) -> &mut State {
        &mut self.staged
    }

    /// Publishes the staged state. Consuming `self` releases the lock.
    pub fn commit(mut self) {
        *self.guard = std::mem::take(&mut self.staged);
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let store = Store::new();

        let mut tx = store.begin().await;
        tx.state_mut()
            .insert_company("1000", "Demo Traders", "INR")
            .expect("insert company");
        tx.commit();

        let code = store
            .read(|state| state.company_by_code("1000").map(|c| c.base_currency.clone()))
            .await
            .expect("company present");
        assert_eq!(code, "INR");
    }

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let store = Store::new();

        {
            let mut tx = store.begin().await;
            tx.state_mut()
                .insert_company("1000", "Demo Traders", "INR")
                .expect("insert company");
            // dropped without commit
        }

        let missing = store
            .read(|state| state.company_by_code("1000").is_err())
            .await;
        assert!(missing);
    }

    #[tokio::test]
    async fn duplicate_company_code_conflicts() {
        let store = Store::new();
        let mut tx = store.begin().await;
        tx.state_mut()
            .insert_company("1000", "Demo Traders", "INR")
            .expect("first insert");
        let err = tx
            .state_mut()
            .insert_company("1000", "Shadow Co", "USD")
            .expect_err("duplicate code must conflict");
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn sequence_values_are_monotonic_and_rollback_safe() {
        let store = Store::new();

        let mut tx = store.begin().await;
        let company = tx
            .state_mut()
            .insert_company("1000", "Demo Traders", "INR")
            .expect("company");
        assert_eq!(tx.state_mut().next_sequence_value(company.id, "PO", "2026"), 1);
        assert_eq!(tx.state_mut().next_sequence_value(company.id, "PO", "2026"), 2);
        tx.commit();

        // A discarded transaction must not consume a number.
        {
            let mut tx = store.begin().await;
            let id = tx.state().company_by_code("1000").expect("company").id;
            assert_eq!(tx.state_mut().next_sequence_value(id, "PO", "2026"), 3);
        }

        let mut tx = store.begin().await;
        let id = tx.state().company_by_code("1000").expect("company").id;
        assert_eq!(tx.state_mut().next_sequence_value(id, "PO", "2026"), 3);
    }

    #[tokio::test]
    async fn idempotency_key_is_unique_across_entries() {
        let store = Store::new();
        let mut tx = store.begin().await;
        let company = tx
            .state_mut()
            .insert_company("1000", "Demo Traders", "INR")
            .expect("company");

        let new_entry = |key: Option<&str>| NewJournalEntry {
            company_id: company.id,
            posting_date: date(2026, 4, 1),
            document_date: date(2026, 4, 1),
            narration: "test".into(),
            reference_type: None,
            reference_id: None,
            idempotency_key: key.map(str::to_string),
            reversed_entry_id: None,
            created_by: "tester".into(),
        };

        tx.state_mut()
            .insert_journal_entry(new_entry(Some("abc")))
            .expect("first entry");
        let err = tx
            .state_mut()
            .insert_journal_entry(new_entry(Some("abc")))
            .expect_err("duplicate key must conflict");
        assert!(matches!(err, StoreError::Conflict(_)));

        // Null keys never collide.
        tx.state_mut()
            .insert_journal_entry(new_entry(None))
            .expect("null key entry");
        tx.state_mut()
            .insert_journal_entry(new_entry(None))
            .expect("second null key entry");
    }

    #[tokio::test]
    async fn ensure_inventory_item_starts_zeroed() {
        let store = Store::new();
        let mut tx = store.begin().await;
        let company = tx
            .state_mut()
            .insert_company("1000", "Demo Traders", "INR")
            .expect("company");

        let item = tx.state_mut().ensure_inventory_item(company.id, 7, 1);
        assert_eq!(item.qty_on_hand, Decimal::ZERO);
        assert_eq!(item.qty_reserved, Decimal::ZERO);
        assert_eq!(item.unit_cost, Decimal::ZERO);
    }
}
