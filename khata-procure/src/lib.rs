#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Purchase-order lifecycle.
//!
//! ```text
//! DRAFT --approve--> APPROVED --receive--> RECEIVED --invoice--> INVOICED --pay--> PAID
//! ```
//!
//! Goods lines flow through the inventory service (weighted-average recost
//! plus `DR Inventory / CR AP`); service lines post straight to expense.
//! A vendor invoice deviating more than 5% from the order total produces a
//! warning beside the successful result, never an error.

use chrono::NaiveDate;
use khata_inventory::InventoryError;
use khata_inventory::receive_stock_tx;
use khata_ledger::LedgerError;
use khata_ledger::Proposal;
use khata_ledger::ProposalLine;
use khata_ledger::commit_in_tx;
use khata_ledger::money;
use khata_rules::RulesError;
use khata_rules::resolve_in;
use khata_rules::rule_types;
use khata_store::PoLineId;
use khata_store::PurchaseOrderId;
use khata_store::PurchaseOrderLineRow;
use khata_store::PurchaseOrderRow;
use khata_store::PurchaseOrderStatus;
use khata_store::Store;
use khata_store::StoreError;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

pub type ProcureResult<T> = Result<T, ProcureError>;

#[derive(Debug, thiserror::Error)]
pub enum ProcureError {
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition {
        from: PurchaseOrderStatus,
        to: String,
    },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Inventory(#[from] InventoryError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Rules(#[from] RulesError),
    #[error("operation cancelled")]
    Cancelled,
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl From<StoreError> for ProcureError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ProcureError::NotFound(what),
            StoreError::Conflict(what) => ProcureError::Persistence(what),
        }
    }
}

impl From<khata_docnum::DocnumError> for ProcureError {
    fn from(err: khata_docnum::DocnumError) -> Self {
        ProcureError::Persistence(err.to_string())
    }
}

/// Non-fatal advisory returned beside a successful result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPoLine {
    /// None for pure service/expense lines.
    pub product_code: Option<String>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    /// Expense account for service lines; goods lines post to inventory.
    pub expense_account_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatePoRequest {
    pub company_code: String,
    pub vendor_code: String,
    pub po_date: NaiveDate,
    /// Defaults to the company's base currency at rate 1.
    pub currency: Option<String>,
    pub exchange_rate: Option<Decimal>,
    pub notes: String,
    pub lines: Vec<NewPoLine>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoReceiptLine {
    pub po_line_id: PoLineId,
    pub qty_received: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorInvoiceRecord {
    pub pi_document_number: String,
    pub warnings: Vec<Warning>,
}

#[derive(Clone)]
pub struct PurchaseOrderService {
    store: Store,
}

impl PurchaseOrderService {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn create_po(
        &self,
        request: CreatePoRequest,
        cancel: &CancellationToken,
    ) -> ProcureResult<PurchaseOrderId> {
        if cancel.is_cancelled() {
            return Err(ProcureError::Cancelled);
        }
        if request.lines.is_empty() {
            return Err(ProcureError::Validation(
                "a purchase order needs at least one line".into(),
            ));
        }

        let mut tx = self.store.begin().await;
        let state = tx.state_mut();
        let company = state.company_by_code(&request.company_code)?.clone();
        let vendor_id = state.vendor_by_code(company.id, &request.vendor_code)?.id;

        let currency = request
            .currency
            .unwrap_or_else(|| company.base_currency.clone());
        let exchange_rate = request.exchange_rate.unwrap_or(Decimal::ONE);
        if exchange_rate <= Decimal::ZERO {
            return Err(ProcureError::Validation(
                "exchange rate must be positive".into(),
            ));
        }
        if currency == company.base_currency && exchange_rate != Decimal::ONE {
            return Err(ProcureError::Validation(
                "exchange rate must be 1 for base-currency orders".into(),
            ));
        }

        let mut rows = Vec::with_capacity(request.lines.len());
        let mut total_transaction = Decimal::ZERO;
        let mut total_base = Decimal::ZERO;
        for line in &request.lines {
            if line.quantity <= Decimal::ZERO {
                return Err(ProcureError::Validation(format!(
                    "quantity for '{}' must be strictly positive",
                    line.description
                )));
            }
            if line.unit_cost < Decimal::ZERO {
                return Err(ProcureError::Validation(format!(
                    "unit cost for '{}' must not be negative",
                    line.description
                )));
            }
            let product_id = match &line.product_code {
                Some(code) => Some(state.product_by_code(company.id, code)?.id),
                None => None,
            };
            if product_id.is_none() && line.expense_account_code.is_none() {
                return Err(ProcureError::Validation(format!(
                    "line '{}' needs a product or an expense account",
                    line.description
                )));
            }
            let line_total_tx = money::round_minor(line.quantity * line.unit_cost);
            total_transaction += line_total_tx;
            total_base += money::to_base(line_total_tx, exchange_rate);
            rows.push(PurchaseOrderLineRow {
                id: 0,
                product_id,
                description: line.description.clone(),
                quantity: line.quantity,
                unit_cost: line.unit_cost,
                expense_account_code: line.expense_account_code.clone(),
                received_qty: Decimal::ZERO,
            });
        }

        let po_id = state.insert_purchase_order(PurchaseOrderRow {
            id: 0,
            company_id: company.id,
            vendor_id,
            po_number: None,
            status: PurchaseOrderStatus::Draft,
            po_date: request.po_date,
            currency,
            exchange_rate,
            total_transaction,
            total_base,
            notes: request.notes,
            lines: rows,
            invoice_number: None,
            invoice_date: None,
            invoice_amount: None,
            pi_document_number: None,
            approved_at: None,
            received_at: None,
            invoiced_at: None,
            paid_at: None,
        });
        tx.commit();
        info!(po_id, "purchase order created");
        Ok(po_id)
    }

    /// Assigns the gapless per-FY PO number. Approving an already-approved
    /// order is a no-op returning the existing number.
    pub async fn approve_po(
        &self,
        po_id: PurchaseOrderId,
        cancel: &CancellationToken,
    ) -> ProcureResult<String> {
        if cancel.is_cancelled() {
            return Err(ProcureError::Cancelled);
        }
        let mut tx = self.store.begin().await;
        let state = tx.state_mut();
        let po = state.purchase_order(po_id)?.clone();

        if po.status == PurchaseOrderStatus::Approved
            && let Some(number) = &po.po_number
        {
            return Ok(number.clone());
        }
        expect_status(&po, PurchaseOrderStatus::Draft, "APPROVED")?;

        let assigned = khata_docnum::assign_number(state, po.company_id, "PO", po.po_date)?;
        let now = state.timestamp();
        let row = state.purchase_order_mut(po_id)?;
        row.status = PurchaseOrderStatus::Approved;
        row.po_number = Some(assigned.document_number.clone());
        row.approved_at = Some(now);

        if cancel.is_cancelled() {
            return Err(ProcureError::Cancelled);
        }
        tx.commit();
        info!(po_id, number = %assigned.document_number, "purchase order approved");
        Ok(assigned.document_number)
    }

    /// Receives goods and services against an approved order. Goods lines
    /// recost inventory and post `DR Inventory / CR AP`; service lines post
    /// `DR expense / CR AP` in one entry. Everything shares the transaction.
    pub async fn receive_po(
        &self,
        po_id: PurchaseOrderId,
        warehouse_code: Option<&str>,
        receipt_lines: &[PoReceiptLine],
        receive_date: NaiveDate,
        cancel: &CancellationToken,
    ) -> ProcureResult<()> {
        if cancel.is_cancelled() {
            return Err(ProcureError::Cancelled);
        }
        if receipt_lines.is_empty() {
            return Err(ProcureError::Validation(
                "a receipt needs at least one line".into(),
            ));
        }

        let mut tx = self.store.begin().await;
        let state = tx.state_mut();
        let po = state.purchase_order(po_id)?.clone();
        expect_status(&po, PurchaseOrderStatus::Approved, "RECEIVED")?;
        let company = state.company(po.company_id)?.clone();
        let vendor_code = state.vendor(po.vendor_id)?.code.clone();
        let warehouse_id = state
            .warehouse_by_code(po.company_id, warehouse_code.unwrap_or("MAIN"))?
            .id;
        let reference = po.po_number.clone().unwrap_or_default();

        let ap_account = resolve_in(
            state,
            po.company_id,
            rule_types::AP,
            &[("vendor", vendor_code.as_str())],
            receive_date,
        )?;

        // Expense lines accumulate into one entry; goods lines post theirs
        // inside receive_stock_tx. Sort for the fixed inventory lock order.
        let mut goods: Vec<(PoLineId, i64, Decimal, Decimal)> = Vec::new();
        let mut expenses: Vec<(String, Decimal)> = Vec::new();
        for receipt in receipt_lines {
            let line = po
                .lines
                .iter()
                .find(|l| l.id == receipt.po_line_id)
                .ok_or_else(|| {
                    ProcureError::NotFound(format!("po line {}", receipt.po_line_id))
                })?;
            if receipt.qty_received <= Decimal::ZERO {
                return Err(ProcureError::Validation(format!(
                    "received quantity for line {} must be strictly positive",
                    line.id
                )));
            }
            if line.received_qty + receipt.qty_received > line.quantity {
                return Err(ProcureError::Validation(format!(
                    "line {} over-received: ordered {}, already received {}",
                    line.id, line.quantity, line.received_qty
                )));
            }
            let unit_cost_base = line.unit_cost * po.exchange_rate;
            match line.product_id {
                Some(product_id) => {
                    goods.push((line.id, product_id, receipt.qty_received, unit_cost_base));
                }
                None => {
                    let account =
                        line.expense_account_code.clone().ok_or_else(|| {
                            ProcureError::Validation(format!(
                                "service line {} has no expense account",
                                line.id
                            ))
                        })?;
                    let amount =
                        money::round_minor(receipt.qty_received * unit_cost_base);
                    expenses.push((account, amount));
                }
            }
        }

        goods.sort_by_key(|(_, product_id, _, _)| (*product_id, warehouse_id));
        for (po_line_id, product_id, qty, unit_cost_base) in &goods {
            receive_stock_tx(
                state,
                po.company_id,
                *product_id,
                warehouse_id,
                *qty,
                *unit_cost_base,
                Some(&ap_account),
                Some(*po_line_id),
                receive_date,
                &reference,
            )?;
        }

        if !expenses.is_empty() {
            let total: Decimal = expenses.iter().map(|(_, amount)| *amount).sum();
            let mut lines: Vec<ProposalLine> = expenses
                .into_iter()
                .map(|(account_code, amount)| ProposalLine {
                    account_code,
                    is_debit: true,
                    amount,
                })
                .collect();
            lines.push(ProposalLine {
                account_code: ap_account.clone(),
                is_debit: false,
                amount: total,
            });
            commit_in_tx(
                state,
                &Proposal {
                    company_code: company.code.clone(),
                    document_type_code: "PI".into(),
                    posting_date: receive_date,
                    document_date: receive_date,
                    narration: format!("Services received against {reference}"),
                    reasoning: None,
                    confidence: None,
                    transaction_currency: company.base_currency.clone(),
                    exchange_rate: Decimal::ONE,
                    reference_type: Some("purchase_order".into()),
                    reference_id: Some(po_id),
                    idempotency_key: None,
                    created_by: "procurement".into(),
                    lines,
                },
            )?;
        }

        let now = state.timestamp();
        let row = state.purchase_order_mut(po_id)?;
        for receipt in receipt_lines {
            if let Some(line) = row.lines.iter_mut().find(|l| l.id == receipt.po_line_id) {
                line.received_qty += receipt.qty_received;
            }
        }
        row.status = PurchaseOrderStatus::Received;
        row.received_at = Some(now);

        if cancel.is_cancelled() {
            return Err(ProcureError::Cancelled);
        }
        tx.commit();
        info!(po_id, "purchase order received");
        Ok(())
    }

    /// Records the vendor invoice: posts a gapless PI document and flags a
    /// deviation above 5% of the order total as a warning, not an error.
    pub async fn record_vendor_invoice(
        &self,
        po_id: PurchaseOrderId,
        invoice_number: &str,
        invoice_date: NaiveDate,
        invoice_amount: Decimal,
        cancel: &CancellationToken,
    ) -> ProcureResult<VendorInvoiceRecord> {
        if cancel.is_cancelled() {
            return Err(ProcureError::Cancelled);
        }
        if invoice_amount <= Decimal::ZERO {
            return Err(ProcureError::Validation(
                "invoice amount must be strictly positive".into(),
            ));
        }

        let mut tx = self.store.begin().await;
        let state = tx.state_mut();
        let po = state.purchase_order(po_id)?.clone();
        expect_status(&po, PurchaseOrderStatus::Received, "INVOICED")?;

        let doc_id = khata_docnum::create_draft(state, po.company_id, "PI", invoice_date)?;
        let assigned = khata_docnum::post_document(state, doc_id, invoice_date)?;

        let mut warnings = Vec::new();
        if !po.total_base.is_zero() {
            let deviation = (invoice_amount - po.total_base).abs() / po.total_base;
            if deviation > Decimal::new(5, 2) {
                let message = format!(
                    "invoice amount {invoice_amount} deviates {:.1}% from order total {}",
                    deviation * Decimal::ONE_HUNDRED,
                    po.total_base
                );
                warn!(po_id, %message);
                warnings.push(Warning { message });
            }
        }

        let now = state.timestamp();
        let row = state.purchase_order_mut(po_id)?;
        row.status = PurchaseOrderStatus::Invoiced;
        row.invoice_number = Some(invoice_number.to_string());
        row.invoice_date = Some(invoice_date);
        row.invoice_amount = Some(invoice_amount);
        row.pi_document_number = Some(assigned.document_number.clone());
        row.invoiced_at = Some(now);

        if cancel.is_cancelled() {
            return Err(ProcureError::Cancelled);
        }
        tx.commit();
        info!(po_id, number = %assigned.document_number, "vendor invoice recorded");
        Ok(VendorInvoiceRecord {
            pi_document_number: assigned.document_number,
            warnings,
        })
    }

    /// Settles the payable: `DR AP / CR Bank` atomically with the status
    /// flip to PAID.
    pub async fn pay_vendor(
        &self,
        po_id: PurchaseOrderId,
        bank_account_code: Option<&str>,
        payment_date: NaiveDate,
        cancel: &CancellationToken,
    ) -> ProcureResult<()> {
        if cancel.is_cancelled() {
            return Err(ProcureError::Cancelled);
        }
        let mut tx = self.store.begin().await;
        let state = tx.state_mut();
        let po = state.purchase_order(po_id)?.clone();
        expect_status(&po, PurchaseOrderStatus::Invoiced, "PAID")?;
        let company = state.company(po.company_id)?.clone();
        let vendor_code = state.vendor(po.vendor_id)?.code.clone();

        let bank_account = match bank_account_code {
            Some(code) => code.to_string(),
            None => resolve_in(
                state,
                po.company_id,
                rule_types::BANK_DEFAULT,
                &[],
                payment_date,
            )?,
        };
        let ap_account = resolve_in(
            state,
            po.company_id,
            rule_types::AP,
            &[("vendor", vendor_code.as_str())],
            payment_date,
        )?;

        commit_in_tx(
            state,
            &Proposal {
                company_code: company.code.clone(),
                document_type_code: "PI".into(),
                posting_date: payment_date,
                document_date: payment_date,
                narration: format!(
                    "Payment to {vendor_code} for {}",
                    po.po_number.as_deref().unwrap_or("?")
                ),
                reasoning: None,
                confidence: None,
                transaction_currency: company.base_currency.clone(),
                exchange_rate: Decimal::ONE,
                reference_type: Some("purchase_order".into()),
                reference_id: Some(po_id),
                idempotency_key: None,
                created_by: "procurement".into(),
                lines: vec![
                    ProposalLine {
                        account_code: ap_account,
                        is_debit: true,
                        amount: po.total_base,
                    },
                    ProposalLine {
                        account_code: bank_account,
                        is_debit: false,
                        amount: po.total_base,
                    },
                ],
            },
        )?;

        let now = state.timestamp();
        let row = state.purchase_order_mut(po_id)?;
        row.status = PurchaseOrderStatus::Paid;
        row.paid_at = Some(now);

        if cancel.is_cancelled() {
            return Err(ProcureError::Cancelled);
        }
        tx.commit();
        info!(po_id, "vendor paid");
        Ok(())
    }

    pub async fn get_po(&self, po_id: PurchaseOrderId) -> ProcureResult<PurchaseOrderRow> {
        self.store
            .read(move |state| Ok(state.purchase_order(po_id)?.clone()))
            .await
    }

    pub async fn list_pos(&self, company_code: &str) -> ProcureResult<Vec<PurchaseOrderRow>> {
        let company_code = company_code.to_string();
        self.store
            .read(move |state| {
                let company_id = state.company_by_code(&company_code)?.id;
                Ok(state
                    .purchase_orders_for_company(company_id)
                    .into_iter()
                    .cloned()
                    .collect())
            })
            .await
    }
}

fn expect_status(
    po: &PurchaseOrderRow,
    expected: PurchaseOrderStatus,
    target: &str,
) -> ProcureResult<()> {
    if po.status != expected {
        return Err(ProcureError::IllegalTransition {
            from: po.status,
            to: target.to_string(),
        });
    }
    Ok(())
}
