#![deny(clippy::print_stdout, clippy::print_stderr)]

//! The ledger: sole writer of journal entries and journal lines.
//!
//! A [`Proposal`] is the only way anything reaches the ledger. It is
//! validated against the double-entry invariants, then committed atomically;
//! entries and lines are append-only and corrections happen exclusively
//! through compensating entries ([`Ledger::reverse`]).

use chrono::NaiveDate;
use khata_store::AccountId;
use khata_store::CompanyId;
use khata_store::EntryId;
use khata_store::NewJournalEntry;
use khata_store::NewJournalLine;
use khata_store::State;
use khata_store::Store;
use khata_store::StoreError;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub mod money;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("account {code} not found for company {company}")]
    UnknownAccount { company: String, code: String },
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => LedgerError::NotFound(what),
            StoreError::Conflict(what) => LedgerError::Persistence(what),
        }
    }
}

impl From<khata_docnum::DocnumError> for LedgerError {
    fn from(err: khata_docnum::DocnumError) -> Self {
        LedgerError::Persistence(err.to_string())
    }
}

fn default_created_by() -> String {
    "system".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalLine {
    pub account_code: String,
    pub is_debit: bool,
    /// Transaction-currency amount, strictly positive.
    pub amount: Decimal,
}

/// A balance-checked journal entry awaiting commit. Transient: it is
/// materialized as document + entry + lines only when committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub company_code: String,
    pub document_type_code: String,
    pub posting_date: NaiveDate,
    pub document_date: NaiveDate,
    pub narration: String,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    pub transaction_currency: String,
    pub exchange_rate: Decimal,
    #[serde(default)]
    pub reference_type: Option<String>,
    #[serde(default)]
    pub reference_id: Option<i64>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default = "default_created_by")]
    pub created_by: String,
    pub lines: Vec<ProposalLine>,
}

impl Proposal {
    /// The stateless invariants: shape, positivity, balance. Company and
    /// account existence are checked against the store at commit time.
    pub fn validate(&self) -> LedgerResult<()> {
        if self.lines.len() < 2 {
            return Err(LedgerError::Validation(
                "a journal entry needs at least two lines".into(),
            ));
        }
        if self.exchange_rate <= Decimal::ZERO {
            return Err(LedgerError::Validation(
                "exchange rate must be positive".into(),
            ));
        }
        if let Some(confidence) = self.confidence
            && !(0.0..=1.0).contains(&confidence)
        {
            return Err(LedgerError::Validation(
                "confidence must lie in [0, 1]".into(),
            ));
        }
        for line in &self.lines {
            if line.amount <= Decimal::ZERO {
                return Err(LedgerError::Validation(format!(
                    "line amount for {} must be strictly positive",
                    line.account_code
                )));
            }
        }

        let (debits, credits) = self.base_totals();
        if debits != credits {
            return Err(LedgerError::Validation(format!(
                "entry does not balance: debits {debits} vs credits {credits}"
            )));
        }
        Ok(())
    }

    /// Base-currency totals, each line rounded to minor units first so the
    /// check matches exactly what gets stored.
    #[must_use]
    pub fn base_totals(&self) -> (Decimal, Decimal) {
        self.lines
            .iter()
            .fold((Decimal::ZERO, Decimal::ZERO), |(d, c), line| {
                let base = money::to_base(line.amount, self.exchange_rate);
                if line.is_debit { (d + base, c) } else { (d, c + base) }
            })
    }
}

/// Outcome of a commit. A duplicate idempotency key is not an error: the
/// caller gets back the entry the key already produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed {
        entry_id: EntryId,
        document_number: Option<String>,
    },
    AlreadyCommitted {
        entry_id: EntryId,
    },
}

impl CommitOutcome {
    #[must_use]
    pub fn entry_id(&self) -> EntryId {
        match self {
            CommitOutcome::Committed { entry_id, .. }
            | CommitOutcome::AlreadyCommitted { entry_id } => *entry_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountBalance {
    pub account_code: String,
    pub name: String,
    pub balance: Decimal,
}

/// Commits a validated proposal inside the caller's transaction. Used by the
/// order, procurement and inventory services so that ledger rows and their
/// domain rows publish together.
pub fn commit_in_tx(state: &mut State, proposal: &Proposal) -> LedgerResult<CommitOutcome> {
    proposal.validate()?;

    let company = state
        .company_by_code(&proposal.company_code)
        .map_err(|_| LedgerError::NotFound(format!("company {}", proposal.company_code)))?;
    let company_id = company.id;
    if proposal.transaction_currency == company.base_currency
        && proposal.exchange_rate != Decimal::ONE
    {
        return Err(LedgerError::Validation(format!(
            "exchange rate must be 1 when posting in the base currency {}",
            company.base_currency
        )));
    }

    if let Some(key) = &proposal.idempotency_key
        && let Some(existing) = state.entry_by_idempotency_key(key)
    {
        return Ok(CommitOutcome::AlreadyCommitted {
            entry_id: existing.id,
        });
    }

    let account_ids = resolve_accounts(state, company_id, proposal)?;

    // Journal-entry proposals carry their own document; invoice and order
    // postings reference the document their service already created.
    let mut document_number = None;
    let mut reference_type = proposal.reference_type.clone();
    let mut reference_id = proposal.reference_id;
    if proposal.document_type_code == "JE" {
        let doc_id = khata_docnum::create_draft(
            state,
            company_id,
            "JE",
            proposal.document_date,
        )?;
        let assigned = khata_docnum::post_document(state, doc_id, proposal.posting_date)?;
        if reference_type.is_none() {
            reference_type = Some("document".into());
            reference_id = Some(doc_id);
        }
        document_number = Some(assigned.document_number);
    }

    let entry_id = state.insert_journal_entry(NewJournalEntry {
        company_id,
        posting_date: proposal.posting_date,
        document_date: proposal.document_date,
        narration: proposal.narration.clone(),
        reference_type,
        reference_id,
        idempotency_key: proposal.idempotency_key.clone(),
        reversed_entry_id: None,
        created_by: proposal.created_by.clone(),
    })?;

    for (line, account_id) in proposal.lines.iter().zip(account_ids) {
        let base = money::to_base(line.amount, proposal.exchange_rate);
        let (debit_base, credit_base) = if line.is_debit {
            (base, Decimal::ZERO)
        } else {
            (Decimal::ZERO, base)
        };
        state.insert_journal_line(NewJournalLine {
            entry_id,
            account_id,
            transaction_currency: proposal.transaction_currency.clone(),
            exchange_rate: proposal.exchange_rate,
            amount_transaction: money::round_minor(line.amount),
            debit_base,
            credit_base,
        })?;
    }

    Ok(CommitOutcome::Committed {
        entry_id,
        document_number,
    })
}

fn resolve_accounts(
    state: &State,
    company_id: CompanyId,
    proposal: &Proposal,
) -> LedgerResult<Vec<AccountId>> {
    proposal
        .lines
        .iter()
        .map(|line| {
            state
                .account_by_code(company_id, &line.account_code)
                .map(|account| account.id)
                .map_err(|_| LedgerError::UnknownAccount {
                    company: proposal.company_code.clone(),
                    code: line.account_code.clone(),
                })
        })
        .collect()
}

#[derive(Clone)]
pub struct Ledger {
    store: Store,
}

impl Ledger {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Full validation without writing: stateless invariants plus company,
    /// currency and account checks against committed state.
    pub async fn validate(&self, proposal: &Proposal) -> LedgerResult<()> {
        proposal.validate()?;
        let proposal = proposal.clone();
        self.store
            .read(move |state| {
                let company = state
                    .company_by_code(&proposal.company_code)
                    .map_err(|_| {
                        LedgerError::NotFound(format!("company {}", proposal.company_code))
                    })?;
                if proposal.transaction_currency == company.base_currency
                    && proposal.exchange_rate != Decimal::ONE
                {
                    return Err(LedgerError::Validation(format!(
                        "exchange rate must be 1 when posting in the base currency {}",
                        company.base_currency
                    )));
                }
                resolve_accounts(state, company.id, &proposal).map(|_| ())
            })
            .await
    }

    /// Validates and commits in one transaction of its own.
    pub async fn commit(
        &self,
        proposal: &Proposal,
        cancel: &CancellationToken,
    ) -> LedgerResult<CommitOutcome> {
        if cancel.is_cancelled() {
            return Err(LedgerError::Cancelled);
        }
        let mut tx = self.store.begin().await;
        let outcome = commit_in_tx(tx.state_mut(), proposal)?;
        if cancel.is_cancelled() {
            return Err(LedgerError::Cancelled);
        }
        tx.commit();
        if let CommitOutcome::Committed { entry_id, .. } = &outcome {
            info!(entry_id, narration = %proposal.narration, "journal entry committed");
        }
        Ok(outcome)
    }

    /// Per-account `Σ debit_base − Σ credit_base` for one company.
    pub async fn balances(&self, company_code: &str) -> LedgerResult<Vec<AccountBalance>> {
        let company_code = company_code.to_string();
        self.store
            .read(move |state| {
                let company = state
                    .company_by_code(&company_code)
                    .map_err(|_| LedgerError::NotFound(format!("company {company_code}")))?;
                let mut balances = Vec::new();
                for account in state.accounts_for_company(company.id) {
                    let balance = state
                        .journal_lines()
                        .iter()
                        .filter(|line| line.account_id == account.id)
                        .fold(Decimal::ZERO, |acc, line| {
                            acc + line.debit_base - line.credit_base
                        });
                    balances.push(AccountBalance {
                        account_code: account.code.clone(),
                        name: account.name.clone(),
                        balance,
                    });
                }
                Ok(balances)
            })
            .await
    }

    /// Creates the compensating entry for `entry_id`: same accounts and
    /// amounts with debit and credit swapped, back-linked through
    /// `reversed_entry_id`.
    pub async fn reverse(
        &self,
        entry_id: EntryId,
        reason: &str,
        cancel: &CancellationToken,
    ) -> LedgerResult<EntryId> {
        if cancel.is_cancelled() {
            return Err(LedgerError::Cancelled);
        }
        let mut tx = self.store.begin().await;
        let state = tx.state_mut();

        let original = state.journal_entry(entry_id)?.clone();
        let lines: Vec<_> = state
            .lines_for_entry(entry_id)
            .into_iter()
            .cloned()
            .collect();
        if lines.is_empty() {
            return Err(LedgerError::NotFound(format!("lines for entry {entry_id}")));
        }

        let doc_id = khata_docnum::create_draft(
            state,
            original.company_id,
            "JE",
            original.document_date,
        )?;
        khata_docnum::post_document(state, doc_id, original.posting_date)?;

        let reversal_id = state.insert_journal_entry(NewJournalEntry {
            company_id: original.company_id,
            posting_date: original.posting_date,
            document_date: original.document_date,
            narration: format!("Reversal of {entry_id}: {reason}"),
            reference_type: Some("document".into()),
            reference_id: Some(doc_id),
            idempotency_key: None,
            reversed_entry_id: Some(entry_id),
            created_by: original.created_by.clone(),
        })?;

        for line in lines {
            state.insert_journal_line(NewJournalLine {
                entry_id: reversal_id,
                account_id: line.account_id,
                transaction_currency: line.transaction_currency.clone(),
                exchange_rate: line.exchange_rate,
                amount_transaction: line.amount_transaction,
                debit_base: line.credit_base,
                credit_base: line.debit_base,
            })?;
        }

        tx.commit();
        info!(entry_id, reversal_id, "journal entry reversed");
        Ok(reversal_id)
    }
}

#[cfg(test)]
mod tests {
    use khata_store::AccountType;
    use khata_store::DocumentTypeRow;
    use khata_store::NumberingStrategy;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    async fn seeded_store() -> Store {
        let store = Store::new();
        let mut tx = store.begin().await;
        let company = tx
            .state_mut()
            .insert_company("1000", "Demo Traders", "INR")
            .expect("company");
        for (code, name, account_type) in [
            ("1100", "Bank", AccountType::Asset),
            ("1200", "Accounts Receivable", AccountType::Asset),
            ("4000", "Revenue", AccountType::Revenue),
        ] {
            tx.state_mut()
                .insert_account(company.id, code, name, account_type)
                .expect("account");
        }
        tx.state_mut()
            .insert_document_type(DocumentTypeRow {
                code: "JE".into(),
                numbering: NumberingStrategy::PerFiscalYear,
                resets_every_fy: true,
            })
            .expect("doc type");
        tx.commit();
        store
    }

    fn proposal(lines: Vec<ProposalLine>) -> Proposal {
        Proposal {
            company_code: "1000".into(),
            document_type_code: "JE".into(),
            posting_date: date(2026, 7, 1),
            document_date: date(2026, 7, 1),
            narration: "Invoice INV-1".into(),
            reasoning: None,
            confidence: None,
            transaction_currency: "INR".into(),
            exchange_rate: Decimal::ONE,
            reference_type: None,
            reference_id: None,
            idempotency_key: None,
            created_by: "tester".into(),
            lines,
        }
    }

    fn line(code: &str, is_debit: bool, amount: Decimal) -> ProposalLine {
        ProposalLine {
            account_code: code.into(),
            is_debit,
            amount,
        }
    }

    #[test]
    fn validation_rejects_single_line() {
        let p = proposal(vec![line("1200", true, dec!(100))]);
        assert!(matches!(p.validate(), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn validation_rejects_unbalanced_entry() {
        let p = proposal(vec![
            line("1200", true, dec!(100)),
            line("4000", false, dec!(90)),
        ]);
        assert!(matches!(p.validate(), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn validation_rejects_non_positive_amounts() {
        let p = proposal(vec![
            line("1200", true, dec!(0)),
            line("4000", false, dec!(0)),
        ]);
        assert!(matches!(p.validate(), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn validation_rejects_non_positive_rate() {
        let mut p = proposal(vec![
            line("1200", true, dec!(100)),
            line("4000", false, dec!(100)),
        ]);
        p.exchange_rate = Decimal::ZERO;
        assert!(matches!(p.validate(), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn balance_is_checked_after_per_line_rounding() {
        // 0.005 + 0.005 rounds to 0.00 per line under banker's rounding,
        // which no single 0.01 credit can balance.
        let mut p = proposal(vec![
            line("1200", true, dec!(0.005)),
            line("1100", true, dec!(0.005)),
            line("4000", false, dec!(0.01)),
        ]);
        p.exchange_rate = Decimal::ONE;
        assert!(matches!(p.validate(), Err(LedgerError::Validation(_))));
    }

    #[tokio::test]
    async fn domestic_commit_moves_balances() {
        let store = seeded_store().await;
        let ledger = Ledger::new(store);
        let cancel = CancellationToken::new();

        let outcome = ledger
            .commit(
                &proposal(vec![
                    line("1200", true, dec!(100.00)),
                    line("4000", false, dec!(100.00)),
                ]),
                &cancel,
            )
            .await
            .expect("commit");
        assert!(matches!(outcome, CommitOutcome::Committed { .. }));

        let balances = ledger.balances("1000").await.expect("balances");
        let by_code = |code: &str| {
            balances
                .iter()
                .find(|b| b.account_code == code)
                .map(|b| b.balance)
                .expect("account present")
        };
        assert_eq!(by_code("1200"), dec!(100.00));
        assert_eq!(by_code("4000"), dec!(-100.00));
    }

    #[tokio::test]
    async fn foreign_currency_lines_store_base_amounts() {
        let store = seeded_store().await;
        let ledger = Ledger::new(store.clone());
        let cancel = CancellationToken::new();

        let mut p = proposal(vec![
            line("1100", true, dec!(500.00)),
            line("4000", false, dec!(500.00)),
        ]);
        p.transaction_currency = "USD".into();
        p.exchange_rate = dec!(82.50);

        let outcome = ledger.commit(&p, &cancel).await.expect("commit");
        let entry_id = outcome.entry_id();

        let lines = store
            .read(move |state| {
                state
                    .lines_for_entry(entry_id)
                    .into_iter()
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].amount_transaction, dec!(500.00));
        assert_eq!(lines[0].debit_base, dec!(41250.00));
        assert_eq!(lines[1].credit_base, dec!(41250.00));
    }

    #[tokio::test]
    async fn base_currency_rate_must_be_one() {
        let store = seeded_store().await;
        let ledger = Ledger::new(store);
        let mut p = proposal(vec![
            line("1200", true, dec!(100.00)),
            line("4000", false, dec!(100.00)),
        ]);
        p.exchange_rate = dec!(2);
        let err = ledger.validate(&p).await.expect_err("rate must be 1");
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_account_is_reported_with_company() {
        let store = seeded_store().await;
        let ledger = Ledger::new(store);
        let cancel = CancellationToken::new();
        let p = proposal(vec![
            line("9999", true, dec!(100.00)),
            line("4000", false, dec!(100.00)),
        ]);
        let err = ledger.commit(&p, &cancel).await.expect_err("no account");
        assert!(matches!(err, LedgerError::UnknownAccount { .. }));
    }

    #[tokio::test]
    async fn idempotent_commit_returns_the_first_entry() {
        let store = seeded_store().await;
        let ledger = Ledger::new(store.clone());
        let cancel = CancellationToken::new();

        let mut p = proposal(vec![
            line("1200", true, dec!(100.00)),
            line("4000", false, dec!(100.00)),
        ]);
        p.idempotency_key = Some("abc".into());

        let first = ledger.commit(&p, &cancel).await.expect("first commit");
        let second = ledger.commit(&p, &cancel).await.expect("second commit");
        assert_eq!(
            second,
            CommitOutcome::AlreadyCommitted {
                entry_id: first.entry_id()
            }
        );

        let entry_count = store
            .read(|state| {
                let company = state.company_by_code("1000").expect("company");
                state.entries_for_company(company.id).len()
            })
            .await;
        assert_eq!(entry_count, 1);
    }

    #[tokio::test]
    async fn reversal_swaps_debits_and_credits() {
        let store = seeded_store().await;
        let ledger = Ledger::new(store.clone());
        let cancel = CancellationToken::new();

        let outcome = ledger
            .commit(
                &proposal(vec![
                    line("1200", true, dec!(250.00)),
                    line("4000", false, dec!(250.00)),
                ]),
                &cancel,
            )
            .await
            .expect("commit");
        let original_id = outcome.entry_id();

        let reversal_id = ledger
            .reverse(original_id, "posted to the wrong month", &cancel)
            .await
            .expect("reverse");

        let (reversal, original_lines, reversal_lines) = store
            .read(move |state| {
                let entry = state.journal_entry(reversal_id).expect("entry").clone();
                let original: Vec<_> = state
                    .lines_for_entry(original_id)
                    .into_iter()
                    .cloned()
                    .collect();
                let reversed: Vec<_> = state
                    .lines_for_entry(reversal_id)
                    .into_iter()
                    .cloned()
                    .collect();
                (entry, original, reversed)
            })
            .await;

        assert_eq!(reversal.reversed_entry_id, Some(original_id));
        for (orig, rev) in original_lines.iter().zip(&reversal_lines) {
            assert_eq!(orig.debit_base, rev.credit_base);
            assert_eq!(orig.credit_base, rev.debit_base);
            assert_eq!(orig.account_id, rev.account_id);
        }

        // Net effect is zero on every touched account.
        let balances = ledger.balances("1000").await.expect("balances");
        for balance in balances {
            assert_eq!(balance.balance, Decimal::ZERO, "{}", balance.account_code);
        }
    }

    #[tokio::test]
    async fn cancelled_commit_writes_nothing() {
        let store = seeded_store().await;
        let ledger = Ledger::new(store.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ledger
            .commit(
                &proposal(vec![
                    line("1200", true, dec!(100.00)),
                    line("4000", false, dec!(100.00)),
                ]),
                &cancel,
            )
            .await
            .expect_err("cancelled");
        assert!(matches!(err, LedgerError::Cancelled));

        let entry_count = store
            .read(|state| {
                let company = state.company_by_code("1000").expect("company");
                state.entries_for_company(company.id).len()
            })
            .await;
        assert_eq!(entry_count, 0);
    }
}
