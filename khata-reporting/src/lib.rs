#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Point-in-time, read-only reports computed directly over journal lines.

use chrono::Datelike;
use chrono::NaiveDate;
use khata_store::AccountType;
use khata_store::JournalLineRow;
use khata_store::State;
use khata_store::Store;
use khata_store::StoreError;
use rust_decimal::Decimal;

pub type ReportingResult<T> = Result<T, ReportingError>;

#[derive(Debug, thiserror::Error)]
pub enum ReportingError {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl From<StoreError> for ReportingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ReportingError::NotFound(what),
            StoreError::Conflict(what) => ReportingError::Persistence(what),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatementLine {
    pub entry_id: i64,
    pub posting_date: NaiveDate,
    pub narration: String,
    pub debit: Decimal,
    pub credit: Decimal,
    pub running_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountStatement {
    pub account_code: String,
    pub account_name: String,
    pub opening_balance: Decimal,
    pub lines: Vec<StatementLine>,
    pub closing_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportLine {
    pub account_code: String,
    pub account_name: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfitAndLoss {
    pub year: i32,
    pub month: u32,
    pub revenue: Vec<ReportLine>,
    pub expenses: Vec<ReportLine>,
    pub total_revenue: Decimal,
    pub total_expense: Decimal,
    pub net_income: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceSheet {
    pub as_of: NaiveDate,
    pub assets: Vec<ReportLine>,
    pub liabilities: Vec<ReportLine>,
    pub equity: Vec<ReportLine>,
    pub total_assets: Decimal,
    pub total_liabilities: Decimal,
    pub total_equity: Decimal,
    pub is_balanced: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrialBalanceRow {
    pub account_code: String,
    pub account_name: String,
    pub debit: Decimal,
    pub credit: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrialBalance {
    pub as_of: NaiveDate,
    pub rows: Vec<TrialBalanceRow>,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
}

#[derive(Clone)]
pub struct ReportingService {
    store: Store,
}

impl ReportingService {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Chronological account activity ordered by `posting_date, entry_id`
    /// with the running balance folded in after the rows arrive ordered.
    pub async fn account_statement(
        &self,
        company_code: &str,
        account_code: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> ReportingResult<AccountStatement> {
        let company_code = company_code.to_string();
        let account_code = account_code.to_string();
        self.store
            .read(move |state| {
                let company_id = state.company_by_code(&company_code)?.id;
                let account = state.account_by_code(company_id, &account_code)?.clone();

                let mut dated: Vec<(NaiveDate, String, JournalLineRow)> = Vec::new();
                let mut opening_balance = Decimal::ZERO;
                for line in state.journal_lines() {
                    if line.account_id != account.id {
                        continue;
                    }
                    let entry = state.journal_entry(line.entry_id)?;
                    if let Some(from) = from
                        && entry.posting_date < from
                    {
                        opening_balance += line.debit_base - line.credit_base;
                        continue;
                    }
                    if let Some(to) = to
                        && entry.posting_date > to
                    {
                        continue;
                    }
                    dated.push((entry.posting_date, entry.narration.clone(), line.clone()));
                }
                dated.sort_by_key(|(date, _, line)| (*date, line.entry_id, line.id));

                let mut running = opening_balance;
                let lines = dated
                    .into_iter()
                    .map(|(posting_date, narration, line)| {
                        running += line.debit_base - line.credit_base;
                        StatementLine {
                            entry_id: line.entry_id,
                            posting_date,
                            narration,
                            debit: line.debit_base,
                            credit: line.credit_base,
                            running_balance: running,
                        }
                    })
                    .collect();

                Ok(AccountStatement {
                    account_code: account.code,
                    account_name: account.name,
                    opening_balance,
                    lines,
                    closing_balance: running,
                })
            })
            .await
    }

    /// Net movement of revenue and expense accounts within one calendar
    /// month; `net_income = Σ revenue − Σ expense`.
    pub async fn profit_and_loss(
        &self,
        company_code: &str,
        year: i32,
        month: u32,
    ) -> ReportingResult<ProfitAndLoss> {
        let company_code = company_code.to_string();
        self.store
            .read(move |state| {
                let company_id = state.company_by_code(&company_code)?.id;
                let in_period = |date: NaiveDate| date.year() == year && date.month() == month;

                let mut revenue = Vec::new();
                let mut expenses = Vec::new();
                for account in state.accounts_for_company(company_id) {
                    if !matches!(
                        account.account_type,
                        AccountType::Revenue | AccountType::Expense
                    ) {
                        continue;
                    }
                    let mut movement = Decimal::ZERO;
                    for line in state.journal_lines() {
                        if line.account_id != account.id {
                            continue;
                        }
                        let entry = state.journal_entry(line.entry_id)?;
                        if !in_period(entry.posting_date) {
                            continue;
                        }
                        movement += line.debit_base - line.credit_base;
                    }
                    if movement.is_zero() {
                        continue;
                    }
                    let line = ReportLine {
                        account_code: account.code.clone(),
                        account_name: account.name.clone(),
                        amount: if account.account_type == AccountType::Revenue {
                            -movement
                        } else {
                            movement
                        },
                    };
                    if account.account_type == AccountType::Revenue {
                        revenue.push(line);
                    } else {
                        expenses.push(line);
                    }
                }

                let total_revenue: Decimal = revenue.iter().map(|l| l.amount).sum();
                let total_expense: Decimal = expenses.iter().map(|l| l.amount).sum();
                Ok(ProfitAndLoss {
                    year,
                    month,
                    revenue,
                    expenses,
                    total_revenue,
                    total_expense,
                    net_income: total_revenue - total_expense,
                })
            })
            .await
    }

    /// Cumulative position as of a date, sectioned by account type. Current
    /// earnings (revenue less expense to date) are folded into equity so the
    /// accounting equation closes.
    pub async fn balance_sheet(
        &self,
        company_code: &str,
        as_of: NaiveDate,
    ) -> ReportingResult<BalanceSheet> {
        let company_code = company_code.to_string();
        self.store
            .read(move |state| {
                let company_id = state.company_by_code(&company_code)?.id;

                let mut assets = Vec::new();
                let mut liabilities = Vec::new();
                let mut equity = Vec::new();
                let mut earnings = Decimal::ZERO;
                for account in state.accounts_for_company(company_id) {
                    let balance = cumulative_balance(state, account.id, as_of)?;
                    match account.account_type {
                        AccountType::Asset => {
                            if !balance.is_zero() {
                                assets.push(ReportLine {
                                    account_code: account.code.clone(),
                                    account_name: account.name.clone(),
                                    amount: balance,
                                });
                            }
                        }
                        AccountType::Liability => {
                            if !balance.is_zero() {
                                liabilities.push(ReportLine {
                                    account_code: account.code.clone(),
                                    account_name: account.name.clone(),
                                    amount: -balance,
                                });
                            }
                        }
                        AccountType::Equity => {
                            if !balance.is_zero() {
                                equity.push(ReportLine {
                                    account_code: account.code.clone(),
                                    account_name: account.name.clone(),
                                    amount: -balance,
                                });
                            }
                        }
                        AccountType::Revenue => earnings -= balance,
                        AccountType::Expense => earnings -= balance,
                    }
                }
                if !earnings.is_zero() {
                    equity.push(ReportLine {
                        account_code: String::new(),
                        account_name: "Current Period Earnings".into(),
                        amount: earnings,
                    });
                }

                let total_assets: Decimal = assets.iter().map(|l| l.amount).sum();
                let total_liabilities: Decimal = liabilities.iter().map(|l| l.amount).sum();
                let total_equity: Decimal = equity.iter().map(|l| l.amount).sum();
                let gap = total_assets - (total_liabilities + total_equity);
                Ok(BalanceSheet {
                    as_of,
                    assets,
                    liabilities,
                    equity,
                    total_assets,
                    total_liabilities,
                    total_equity,
                    is_balanced: gap.abs() < Decimal::new(1, 2),
                })
            })
            .await
    }

    /// Cumulative debit/credit totals per account as of a date.
    pub async fn trial_balance(
        &self,
        company_code: &str,
        as_of: NaiveDate,
    ) -> ReportingResult<TrialBalance> {
        let company_code = company_code.to_string();
        self.store
            .read(move |state| {
                let company_id = state.company_by_code(&company_code)?.id;
                let mut rows = Vec::new();
                let mut total_debit = Decimal::ZERO;
                let mut total_credit = Decimal::ZERO;
                for account in state.accounts_for_company(company_id) {
                    let balance = cumulative_balance(state, account.id, as_of)?;
                    if balance.is_zero() {
                        continue;
                    }
                    let (debit, credit) = if balance > Decimal::ZERO {
                        (balance, Decimal::ZERO)
                    } else {
                        (Decimal::ZERO, -balance)
                    };
                    total_debit += debit;
                    total_credit += credit;
                    rows.push(TrialBalanceRow {
                        account_code: account.code.clone(),
                        account_name: account.name.clone(),
                        debit,
                        credit,
                    });
                }
                Ok(TrialBalance {
                    as_of,
                    rows,
                    total_debit,
                    total_credit,
                })
            })
            .await
    }

    /// Reports read journal lines directly, so the refresh has nothing to
    /// rebuild; it still serializes through the store lock so concurrent
    /// callers cannot interleave with a writer.
    pub async fn refresh_views(&self) -> ReportingResult<()> {
        self.store.read(|_| ()).await;
        Ok(())
    }
}

fn cumulative_balance(
    state: &State,
    account_id: i64,
    as_of: NaiveDate,
) -> ReportingResult<Decimal> {
    let mut balance = Decimal::ZERO;
    for line in state.journal_lines() {
        if line.account_id != account_id {
            continue;
        }
        let entry = state.journal_entry(line.entry_id)?;
        if entry.posting_date > as_of {
            continue;
        }
        balance += line.debit_base - line.credit_base;
    }
    Ok(balance)
}
