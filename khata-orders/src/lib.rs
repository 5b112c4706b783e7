#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Sales-order lifecycle.
//!
//! ```text
//! DRAFT --confirm--> CONFIRMED --ship--> SHIPPED --invoice--> INVOICED --pay--> PAID
//!   |                    |
//!   +------cancel--------+--> CANCELLED
//! ```
//!
//! Every transition runs in one store transaction: order row, stock
//! counters, document numbers and journal rows publish together or not at
//! all.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use khata_inventory::InventoryError;
use khata_inventory::release_reservation_tx;
use khata_inventory::reserve_stock_tx;
use khata_inventory::ship_stock_tx;
use khata_ledger::LedgerError;
use khata_ledger::Proposal;
use khata_ledger::ProposalLine;
use khata_ledger::commit_in_tx;
use khata_ledger::money;
use khata_rules::RulesError;
use khata_rules::resolve_in;
use khata_rules::rule_types;
use khata_store::ProductKind;
use khata_store::SalesOrderId;
use khata_store::SalesOrderLineRow;
use khata_store::SalesOrderRow;
use khata_store::SalesOrderStatus;
use khata_store::State;
use khata_store::Store;
use khata_store::StoreError;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub type OrderResult<T> = Result<T, OrderError>;

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: SalesOrderStatus, to: String },
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

impl From<StoreError> for OrderError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => OrderError::NotFound(what),
            StoreError::Conflict(what) => OrderError::Persistence(what),
        }
    }
}

impl From<khata_docnum::DocnumError> for OrderError {
    fn from(err: khata_docnum::DocnumError) -> Self {
        OrderError::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderLine {
    pub product_code: String,
    pub quantity: Decimal,
    /// Falls back to the product's list price.
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateOrderRequest {
    pub company_code: String,
    pub customer_code: String,
    pub warehouse_code: String,
    pub order_date: NaiveDate,
    /// Defaults to the company's base currency at rate 1.
    pub currency: Option<String>,
    pub exchange_rate: Option<Decimal>,
    pub notes: String,
    pub lines: Vec<NewOrderLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoicePosting {
    pub document_number: String,
    pub entry_id: i64,
}

#[derive(Clone)]
pub struct OrderService {
    store: Store,
}

impl OrderService {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
        cancel: &CancellationToken,
    ) -> OrderResult<SalesOrderId> {
        if cancel.is_cancelled() {
            return Err(OrderError::Cancelled);
        }
        if request.lines.is_empty() {
            return Err(OrderError::Validation("an order needs at least one line".into()));
        }

        let mut tx = self.store.begin().await;
        let state = tx.state_mut();
        let company = state.company_by_code(&request.company_code)?.clone();
        let customer_id = state.customer_by_code(company.id, &request.customer_code)?.id;
        let warehouse_id = state
            .warehouse_by_code(company.id, &request.warehouse_code)?
            .id;

        let currency = request
            .currency
            .unwrap_or_else(|| company.base_currency.clone());
        let exchange_rate = request.exchange_rate.unwrap_or(Decimal::ONE);
        if exchange_rate <= Decimal::ZERO {
            return Err(OrderError::Validation("exchange rate must be positive".into()));
        }
        if currency == company.base_currency && exchange_rate != Decimal::ONE {
            return Err(OrderError::Validation(
                "exchange rate must be 1 for base-currency orders".into(),
            ));
        }

        let mut rows = Vec::with_capacity(request.lines.len());
        let mut total_transaction = Decimal::ZERO;
        let mut total_base = Decimal::ZERO;
        for line in &request.lines {
            if line.quantity <= Decimal::ZERO {
                return Err(OrderError::Validation(format!(
                    "quantity for {} must be strictly positive",
                    line.product_code
                )));
            }
            let product = state.product_by_code(company.id, &line.product_code)?;
            let unit_price = line.unit_price.unwrap_or(product.unit_price);
            if unit_price < Decimal::ZERO {
                return Err(OrderError::Validation(format!(
                    "unit price for {} must not be negative",
                    line.product_code
                )));
            }
            let line_total_tx = money::round_minor(line.quantity * unit_price);
            let line_total_base = money::to_base(line_total_tx, exchange_rate);
            total_transaction += line_total_tx;
            total_base += line_total_base;
            rows.push(SalesOrderLineRow {
                id: 0,
                product_id: product.id,
                quantity: line.quantity,
                unit_price,
                line_total_tx,
                line_total_base,
            });
        }

        let order_id = state.insert_sales_order(SalesOrderRow {
            id: 0,
            company_id: company.id,
            customer_id,
            order_number: None,
            status: SalesOrderStatus::Draft,
            order_date: request.order_date,
            currency,
            exchange_rate,
            total_transaction,
            total_base,
            notes: request.notes,
            warehouse_id,
            lines: rows,
        });
        tx.commit();
        info!(order_id, "sales order created");
        Ok(order_id)
    }

    /// Assigns the order number and reserves stock for every physical line.
    /// Partial reservation is not allowed: one short line aborts everything.
    pub async fn confirm_order(
        &self,
        order_id: SalesOrderId,
        cancel: &CancellationToken,
    ) -> OrderResult<String> {
        if cancel.is_cancelled() {
            return Err(OrderError::Cancelled);
        }
        let mut tx = self.store.begin().await;
        let state = tx.state_mut();
        let order = state.sales_order(order_id)?.clone();
        expect_status(&order, SalesOrderStatus::Draft, "CONFIRMED")?;

        let assigned =
            khata_docnum::assign_number(state, order.company_id, "SO", order.order_date)?;

        // Fixed lock order across inventory rows.
        let mut physical = physical_lines(state, &order)?;
        physical.sort_by_key(|line| (line.product_id, order.warehouse_id));
        for line in &physical {
            reserve_stock_tx(
                state,
                order.company_id,
                line.product_id,
                order.warehouse_id,
                line.quantity,
                order.order_date,
                &assigned.document_number,
            )?;
        }

        let row = state.sales_order_mut(order_id)?;
        row.status = SalesOrderStatus::Confirmed;
        row.order_number = Some(assigned.document_number.clone());

        if cancel.is_cancelled() {
            return Err(OrderError::Cancelled);
        }
        tx.commit();
        info!(order_id, number = %assigned.document_number, "sales order confirmed");
        Ok(assigned.document_number)
    }

    /// Ships every physical line, consuming the confirmation reservations
    /// and booking COGS per line at the running weighted-average cost.
    pub async fn ship_order(
        &self,
        order_id: SalesOrderId,
        ship_date: NaiveDate,
        cancel: &CancellationToken,
    ) -> OrderResult<()> {
        if cancel.is_cancelled() {
            return Err(OrderError::Cancelled);
        }
        let mut tx = self.store.begin().await;
        let state = tx.state_mut();
        let order = state.sales_order(order_id)?.clone();
        expect_status(&order, SalesOrderStatus::Confirmed, "SHIPPED")?;
        let reference = order.order_number.clone().unwrap_or_default();

        let mut physical = physical_lines(state, &order)?;
        physical.sort_by_key(|line| (line.product_id, order.warehouse_id));
        for line in &physical {
            ship_stock_tx(
                state,
                order.company_id,
                line.product_id,
                order.warehouse_id,
                line.quantity,
                ship_date,
                &reference,
            )?;
        }

        state.sales_order_mut(order_id)?.status = SalesOrderStatus::Shipped;
        if cancel.is_cancelled() {
            return Err(OrderError::Cancelled);
        }
        tx.commit();
        info!(order_id, "sales order shipped");
        Ok(())
    }

    /// Posts the sales invoice: an SI document plus one journal entry of
    /// `DR AR / CR Revenue` pairs, revenue grouped by the product's revenue
    /// account. Pairing per group keeps each group balanced after per-line
    /// rounding.
    pub async fn invoice_order(
        &self,
        order_id: SalesOrderId,
        invoice_date: NaiveDate,
        cancel: &CancellationToken,
    ) -> OrderResult<InvoicePosting> {
        if cancel.is_cancelled() {
            return Err(OrderError::Cancelled);
        }
        let mut tx = self.store.begin().await;
        let state = tx.state_mut();
        let order = state.sales_order(order_id)?.clone();
        expect_status(&order, SalesOrderStatus::Shipped, "INVOICED")?;
        let company_code = state.company(order.company_id)?.code.clone();

        let ar_account = resolve_in(
            state,
            order.company_id,
            rule_types::AR,
            &[],
            invoice_date,
        )?;

        let mut revenue_by_account: BTreeMap<String, Decimal> = BTreeMap::new();
        for line in &order.lines {
            let product = state.product(line.product_id)?;
            *revenue_by_account
                .entry(product.revenue_account_code.clone())
                .or_default() += line.line_total_tx;
        }

        let doc_id =
            khata_docnum::create_draft(state, order.company_id, "SI", invoice_date)?;
        let assigned = khata_docnum::post_document(state, doc_id, invoice_date)?;

        let mut lines = Vec::new();
        for (account_code, amount) in revenue_by_account {
            if amount.is_zero() {
                continue;
            }
            lines.push(ProposalLine {
                account_code: ar_account.clone(),
                is_debit: true,
                amount,
            });
            lines.push(ProposalLine {
                account_code,
                is_debit: false,
                amount,
            });
        }

        let outcome = commit_in_tx(
            state,
            &Proposal {
                company_code,
                document_type_code: "SI".into(),
                posting_date: invoice_date,
                document_date: invoice_date,
                narration: format!(
                    "Sales invoice {} for order {}",
                    assigned.document_number,
                    order.order_number.as_deref().unwrap_or("?")
                ),
                reasoning: None,
                confidence: None,
                transaction_currency: order.currency.clone(),
                exchange_rate: order.exchange_rate,
                reference_type: Some("sales_order".into()),
                reference_id: Some(order_id),
                idempotency_key: None,
                created_by: "orders".into(),
                lines,
            },
        )?;

        state.sales_order_mut(order_id)?.status = SalesOrderStatus::Invoiced;
        if cancel.is_cancelled() {
            return Err(OrderError::Cancelled);
        }
        tx.commit();
        info!(order_id, number = %assigned.document_number, "sales order invoiced");
        Ok(InvoicePosting {
            document_number: assigned.document_number,
            entry_id: outcome.entry_id(),
        })
    }

    /// Settles the invoice: `DR Bank / CR AR` at the order's captured rate.
    pub async fn record_payment(
        &self,
        order_id: SalesOrderId,
        bank_account_code: Option<&str>,
        payment_date: NaiveDate,
        cancel: &CancellationToken,
    ) -> OrderResult<()> {
        if cancel.is_cancelled() {
            return Err(OrderError::Cancelled);
        }
        let mut tx = self.store.begin().await;
        let state = tx.state_mut();
        let order = state.sales_order(order_id)?.clone();
        expect_status(&order, SalesOrderStatus::Invoiced, "PAID")?;
        let company_code = state.company(order.company_id)?.code.clone();

        let bank_account = match bank_account_code {
            Some(code) => code.to_string(),
            None => resolve_in(
                state,
                order.company_id,
                rule_types::BANK_DEFAULT,
                &[],
                payment_date,
            )?,
        };
        let ar_account = resolve_in(
            state,
            order.company_id,
            rule_types::AR,
            &[],
            payment_date,
        )?;

        commit_in_tx(
            state,
            &Proposal {
                company_code,
                document_type_code: "SI".into(),
                posting_date: payment_date,
                document_date: payment_date,
                narration: format!(
                    "Payment for order {}",
                    order.order_number.as_deref().unwrap_or("?")
                ),
                reasoning: None,
                confidence: None,
                transaction_currency: order.currency.clone(),
                exchange_rate: order.exchange_rate,
                reference_type: Some("sales_order".into()),
                reference_id: Some(order_id),
                idempotency_key: None,
                created_by: "orders".into(),
                lines: vec![
                    ProposalLine {
                        account_code: bank_account,
                        is_debit: true,
                        amount: order.total_transaction,
                    },
                    ProposalLine {
                        account_code: ar_account,
                        is_debit: false,
                        amount: order.total_transaction,
                    },
                ],
            },
        )?;

        state.sales_order_mut(order_id)?.status = SalesOrderStatus::Paid;
        if cancel.is_cancelled() {
            return Err(OrderError::Cancelled);
        }
        tx.commit();
        info!(order_id, "sales order paid");
        Ok(())
    }

    /// Cancels a DRAFT or CONFIRMED order; confirmed orders hand their
    /// reservations back.
    pub async fn cancel_order(
        &self,
        order_id: SalesOrderId,
        cancel: &CancellationToken,
    ) -> OrderResult<()> {
        if cancel.is_cancelled() {
            return Err(OrderError::Cancelled);
        }
        let mut tx = self.store.begin().await;
        let state = tx.state_mut();
        let order = state.sales_order(order_id)?.clone();

        match order.status {
            SalesOrderStatus::Draft => {}
            SalesOrderStatus::Confirmed => {
                let reference = order.order_number.clone().unwrap_or_default();
                let mut physical = physical_lines(state, &order)?;
                physical.sort_by_key(|line| (line.product_id, order.warehouse_id));
                for line in &physical {
                    release_reservation_tx(
                        state,
                        order.company_id,
                        line.product_id,
                        order.warehouse_id,
                        line.quantity,
                        order.order_date,
                        &reference,
                    )?;
                }
            }
            from => {
                return Err(OrderError::IllegalTransition {
                    from,
                    to: "CANCELLED".into(),
                });
            }
        }

        state.sales_order_mut(order_id)?.status = SalesOrderStatus::Cancelled;
        tx.commit();
        info!(order_id, "sales order cancelled");
        Ok(())
    }

    pub async fn get_order(&self, order_id: SalesOrderId) -> OrderResult<SalesOrderRow> {
        self.store
            .read(move |state| Ok(state.sales_order(order_id)?.clone()))
            .await
    }
}

fn expect_status(
    order: &SalesOrderRow,
    expected: SalesOrderStatus,
    target: &str,
) -> OrderResult<()> {
    if order.status != expected {
        return Err(OrderError::IllegalTransition {
            from: order.status,
            to: target.to_string(),
        });
    }
    Ok(())
}

/// The order's lines whose product is physical.
fn physical_lines<'a>(
    state: &State,
    order: &'a SalesOrderRow,
) -> OrderResult<Vec<&'a SalesOrderLineRow>> {
    let mut lines = Vec::new();
    for line in &order.lines {
        if state.product(line.product_id)?.kind == ProductKind::Physical {
            lines.push(line);
        }
    }
    Ok(lines)
}
