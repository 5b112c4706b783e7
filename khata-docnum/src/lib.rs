#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Gapless document numbering per `(company, document type, fiscal year)`.
//!
//! Numbers are assigned inside the caller's transaction: the sequence bump
//! and the caller's other writes publish together or not at all, so the
//! committed numbers for a group are exactly `1..=N`. A number staged by a
//! transaction that never commits is never observed.

use chrono::Datelike;
use chrono::NaiveDate;
use khata_store::CompanyId;
use khata_store::DocumentId;
use khata_store::DocumentStatus;
use khata_store::NumberingStrategy;
use khata_store::State;
use khata_store::StoreError;

pub type DocnumResult<T> = Result<T, DocnumError>;

#[derive(Debug, thiserror::Error)]
pub enum DocnumError {
    #[error("document storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("document {0} is not in DRAFT")]
    NotDraft(DocumentId),
}

/// A freshly assigned document number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedNumber {
    pub document_number: String,
    pub fiscal_year: String,
    pub sequence: i64,
}

/// April-to-March fiscal year, labelled by the calendar year it opens in:
/// 2026-07-01 is FY 2026, 2026-02-15 still belongs to FY 2025.
#[must_use]
pub fn fiscal_year_for(date: NaiveDate) -> i32 {
    if date.month() >= 4 {
        date.year()
    } else {
        date.year() - 1
    }
}

/// Bumps the sequence for `(company, type, fy-or-global)` and formats the
/// external number: `{TYPE}-{FY}-{seq:05}` or `{TYPE}-GLOBAL-{seq:05}`.
pub fn assign_number(
    state: &mut State,
    company_id: CompanyId,
    type_code: &str,
    posting_date: NaiveDate,
) -> DocnumResult<AssignedNumber> {
    let doc_type = state.document_type(type_code)?;
    let scope = match doc_type.numbering {
        NumberingStrategy::Global => "GLOBAL".to_string(),
        NumberingStrategy::PerFiscalYear => fiscal_year_for(posting_date).to_string(),
    };
    let sequence = state.next_sequence_value(company_id, type_code, &scope);
    Ok(AssignedNumber {
        document_number: format!("{type_code}-{scope}-{sequence:05}"),
        fiscal_year: scope,
        sequence,
    })
}

/// Inserts a DRAFT document row for the caller's transaction.
pub fn create_draft(
    state: &mut State,
    company_id: CompanyId,
    type_code: &str,
    document_date: NaiveDate,
) -> DocnumResult<DocumentId> {
    let fy = fiscal_year_for(document_date).to_string();
    Ok(state.insert_document(company_id, type_code, document_date, &fy)?)
}

/// Assigns a number to a DRAFT document and flips it to POSTED, all within
/// the caller's transaction.
pub fn post_document(
    state: &mut State,
    document_id: DocumentId,
    posting_date: NaiveDate,
) -> DocnumResult<AssignedNumber> {
    let doc = state.document(document_id)?;
    if doc.status != DocumentStatus::Draft {
        return Err(DocnumError::NotDraft(document_id));
    }
    let company_id = doc.company_id;
    let type_code = doc.type_code.clone();
    let assigned = assign_number(state, company_id, &type_code, posting_date)?;
    state.mark_document_posted(document_id, &assigned.document_number)?;
    Ok(assigned)
}
