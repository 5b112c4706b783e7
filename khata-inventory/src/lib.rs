#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Stock levels, soft reservations, weighted-average costing and the COGS
//! postings that go with them.
//!
//! Transaction-scoped functions take the caller's open transaction state so
//! inventory counters and ledger rows publish atomically; the
//! [`InventoryService`] wraps them for stand-alone use and read queries.

use chrono::NaiveDate;
use khata_ledger::LedgerError;
use khata_ledger::Proposal;
use khata_ledger::ProposalLine;
use khata_ledger::commit_in_tx;
use khata_ledger::money;
use khata_rules::RulesError;
use khata_rules::resolve_in;
use khata_rules::rule_types;
use khata_store::CompanyId;
use khata_store::MovementType;
use khata_store::NewInventoryMovement;
use khata_store::PoLineId;
use khata_store::ProductId;
use khata_store::ProductKind;
use khata_store::State;
use khata_store::Store;
use khata_store::StoreError;
use khata_store::WarehouseId;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub type InventoryResult<T> = Result<T, InventoryError>;

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("insufficient stock: available {available}, requested {requested}")]
    InsufficientStock {
        available: Decimal,
        requested: Decimal,
    },
    #[error("reservation underflow: reserved {reserved}, requested release {requested}")]
    ReservationUnderflow {
        reserved: Decimal,
        requested: Decimal,
    },
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Rules(#[from] RulesError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("operation cancelled")]
    Cancelled,
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl From<StoreError> for InventoryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => InventoryError::NotFound(what),
            StoreError::Conflict(what) => InventoryError::Persistence(what),
        }
    }
}

impl From<khata_docnum::DocnumError> for InventoryError {
    fn from(err: khata_docnum::DocnumError) -> Self {
        InventoryError::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptPosting {
    pub movement_id: i64,
    pub document_number: String,
    pub new_unit_cost: Decimal,
    pub entry_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReceiveOutcome {
    Posted(ReceiptPosting),
    /// Service products carry no stock row: nothing moves, nothing posts.
    SkippedService,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShipmentPosting {
    pub movement_id: i64,
    pub document_number: String,
    pub cogs_base: Decimal,
    pub entry_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShipOutcome {
    Posted(ShipmentPosting),
    SkippedService,
}

fn require_positive(qty: Decimal, what: &str) -> InventoryResult<()> {
    if qty <= Decimal::ZERO {
        return Err(InventoryError::Validation(format!(
            "{what} must be strictly positive, got {qty}"
        )));
    }
    Ok(())
}

/// Receives stock into a warehouse within the caller's transaction: recosts
/// the item to the quantity-weighted mean, logs a RECEIPT movement and posts
/// `DR Inventory / CR credit-account` (default: the RECEIPT_CREDIT rule).
#[allow(clippy::too_many_arguments)]
pub fn receive_stock_tx(
    state: &mut State,
    company_id: CompanyId,
    product_id: ProductId,
    warehouse_id: WarehouseId,
    qty: Decimal,
    unit_cost: Decimal,
    credit_account: Option<&str>,
    po_line_id: Option<PoLineId>,
    movement_date: NaiveDate,
    reference: &str,
) -> InventoryResult<ReceiveOutcome> {
    require_positive(qty, "received quantity")?;
    require_positive(unit_cost, "unit cost")?;

    let product = state.product(product_id)?;
    if product.kind == ProductKind::Service {
        return Ok(ReceiveOutcome::SkippedService);
    }
    let product_code = product.code.clone();
    let company_code = state.company(company_id)?.code.clone();

    let item = state.ensure_inventory_item(company_id, product_id, warehouse_id);
    let new_unit_cost = if item.qty_on_hand.is_zero() {
        unit_cost
    } else {
        (item.qty_on_hand * item.unit_cost + qty * unit_cost) / (item.qty_on_hand + qty)
    };
    item.qty_on_hand += qty;
    item.unit_cost = new_unit_cost;

    let movement_id = state.insert_movement(NewInventoryMovement {
        company_id,
        product_id,
        warehouse_id,
        movement_type: MovementType::Receipt,
        quantity: qty,
        unit_cost,
        movement_date,
        po_line_id,
        reference: reference.to_string(),
    });

    let inventory_account = resolve_in(
        state,
        company_id,
        rule_types::INVENTORY,
        &[],
        movement_date,
    )?;
    let credit_account = match credit_account {
        Some(code) => code.to_string(),
        None => resolve_in(
            state,
            company_id,
            rule_types::RECEIPT_CREDIT,
            &[],
            movement_date,
        )?,
    };

    let doc_id = khata_docnum::create_draft(state, company_id, "GR", movement_date)?;
    let assigned = khata_docnum::post_document(state, doc_id, movement_date)?;
    let currency = base_currency(state, company_id)?;

    let amount = money::round_minor(qty * unit_cost);
    let outcome = commit_in_tx(
        state,
        &Proposal {
            company_code,
            document_type_code: "GR".into(),
            posting_date: movement_date,
            document_date: movement_date,
            narration: format!("Goods receipt {}: {qty} x {product_code}", assigned.document_number),
            reasoning: None,
            confidence: None,
            transaction_currency: currency,
            exchange_rate: Decimal::ONE,
            reference_type: Some("document".into()),
            reference_id: Some(doc_id),
            idempotency_key: None,
            created_by: "inventory".into(),
            lines: vec![
                ProposalLine {
                    account_code: inventory_account,
                    is_debit: true,
                    amount,
                },
                ProposalLine {
                    account_code: credit_account,
                    is_debit: false,
                    amount,
                },
            ],
        },
    )?;

    Ok(ReceiveOutcome::Posted(ReceiptPosting {
        movement_id,
        document_number: assigned.document_number,
        new_unit_cost,
        entry_id: outcome.entry_id(),
    }))
}

/// Soft-reserves stock for a confirmed order. Reservations never reduce
/// `qty_on_hand`; they only shrink what later callers may reserve.
pub fn reserve_stock_tx(
    state: &mut State,
    company_id: CompanyId,
    product_id: ProductId,
    warehouse_id: WarehouseId,
    qty: Decimal,
    movement_date: NaiveDate,
    reference: &str,
) -> InventoryResult<()> {
    require_positive(qty, "reserved quantity")?;

    let item = state
        .inventory_item_mut(company_id, product_id, warehouse_id)
        .ok_or_else(|| InventoryError::InsufficientStock {
            available: Decimal::ZERO,
            requested: qty,
        })?;
    let available = item.qty_on_hand - item.qty_reserved;
    if available < qty {
        return Err(InventoryError::InsufficientStock {
            available,
            requested: qty,
        });
    }
    item.qty_reserved += qty;
    let unit_cost = item.unit_cost;

    state.insert_movement(NewInventoryMovement {
        company_id,
        product_id,
        warehouse_id,
        movement_type: MovementType::Reservation,
        quantity: qty,
        unit_cost,
        movement_date,
        po_line_id: None,
        reference: reference.to_string(),
    });
    Ok(())
}

/// Releases part or all of an existing reservation.
pub fn release_reservation_tx(
    state: &mut State,
    company_id: CompanyId,
    product_id: ProductId,
    warehouse_id: WarehouseId,
    qty: Decimal,
    movement_date: NaiveDate,
    reference: &str,
) -> InventoryResult<()> {
    require_positive(qty, "released quantity")?;

    let item = state
        .inventory_item_mut(company_id, product_id, warehouse_id)
        .ok_or_else(|| InventoryError::ReservationUnderflow {
            reserved: Decimal::ZERO,
            requested: qty,
        })?;
    if item.qty_reserved < qty {
        return Err(InventoryError::ReservationUnderflow {
            reserved: item.qty_reserved,
            requested: qty,
        });
    }
    item.qty_reserved -= qty;
    let unit_cost = item.unit_cost;

    state.insert_movement(NewInventoryMovement {
        company_id,
        product_id,
        warehouse_id,
        movement_type: MovementType::ReservationCancel,
        quantity: -qty,
        unit_cost,
        movement_date,
        po_line_id: None,
        reference: reference.to_string(),
    });
    Ok(())
}

/// Ships reserved stock: consumes the reservation taken at confirmation,
/// logs a SHIPMENT movement and books COGS at the current weighted-average
/// unit cost, all within the caller's transaction.
pub fn ship_stock_tx(
    state: &mut State,
    company_id: CompanyId,
    product_id: ProductId,
    warehouse_id: WarehouseId,
    qty: Decimal,
    movement_date: NaiveDate,
    reference: &str,
) -> InventoryResult<ShipOutcome> {
    require_positive(qty, "shipped quantity")?;

    let product = state.product(product_id)?;
    if product.kind == ProductKind::Service {
        return Ok(ShipOutcome::SkippedService);
    }
    let product_code = product.code.clone();
    let company_code = state.company(company_id)?.code.clone();

    let item = state
        .inventory_item_mut(company_id, product_id, warehouse_id)
        .ok_or_else(|| InventoryError::InsufficientStock {
            available: Decimal::ZERO,
            requested: qty,
        })?;
    if item.qty_on_hand < qty {
        return Err(InventoryError::InsufficientStock {
            available: item.qty_on_hand,
            requested: qty,
        });
    }
    if item.qty_reserved < qty {
        return Err(InventoryError::ReservationUnderflow {
            reserved: item.qty_reserved,
            requested: qty,
        });
    }
    item.qty_on_hand -= qty;
    item.qty_reserved -= qty;
    let unit_cost = item.unit_cost;

    let movement_id = state.insert_movement(NewInventoryMovement {
        company_id,
        product_id,
        warehouse_id,
        movement_type: MovementType::Shipment,
        quantity: -qty,
        unit_cost,
        movement_date,
        po_line_id: None,
        reference: reference.to_string(),
    });

    let cogs_account = resolve_in(state, company_id, rule_types::COGS, &[], movement_date)?;
    let inventory_account = resolve_in(
        state,
        company_id,
        rule_types::INVENTORY,
        &[],
        movement_date,
    )?;

    let doc_id = khata_docnum::create_draft(state, company_id, "GI", movement_date)?;
    let assigned = khata_docnum::post_document(state, doc_id, movement_date)?;
    let currency = base_currency(state, company_id)?;

    let cogs_base = money::round_minor(qty * unit_cost);
    let outcome = commit_in_tx(
        state,
        &Proposal {
            company_code,
            document_type_code: "GI".into(),
            posting_date: movement_date,
            document_date: movement_date,
            narration: format!("Goods issue {}: {qty} x {product_code}", assigned.document_number),
            reasoning: None,
            confidence: None,
            transaction_currency: currency,
            exchange_rate: Decimal::ONE,
            reference_type: Some("document".into()),
            reference_id: Some(doc_id),
            idempotency_key: None,
            created_by: "inventory".into(),
            lines: vec![
                ProposalLine {
                    account_code: cogs_account,
                    is_debit: true,
                    amount: cogs_base,
                },
                ProposalLine {
                    account_code: inventory_account,
                    is_debit: false,
                    amount: cogs_base,
                },
            ],
        },
    )?;

    Ok(ShipOutcome::Posted(ShipmentPosting {
        movement_id,
        document_number: assigned.document_number,
        cogs_base,
        entry_id: outcome.entry_id(),
    }))
}

/// Signed stock correction with its balancing posting against the
/// INV_ADJUST rule account.
pub fn adjust_stock_tx(
    state: &mut State,
    company_id: CompanyId,
    product_id: ProductId,
    warehouse_id: WarehouseId,
    qty_delta: Decimal,
    movement_date: NaiveDate,
    reason: &str,
) -> InventoryResult<()> {
    if qty_delta.is_zero() {
        return Err(InventoryError::Validation(
            "adjustment quantity must be non-zero".into(),
        ));
    }
    let company_code = state.company(company_id)?.code.clone();

    let item = state
        .inventory_item_mut(company_id, product_id, warehouse_id)
        .ok_or_else(|| InventoryError::NotFound(format!("inventory item {product_id}")))?;
    let new_on_hand = item.qty_on_hand + qty_delta;
    if new_on_hand < item.qty_reserved {
        return Err(InventoryError::InsufficientStock {
            available: item.qty_on_hand - item.qty_reserved,
            requested: -qty_delta,
        });
    }
    item.qty_on_hand = new_on_hand;
    let unit_cost = item.unit_cost;

    state.insert_movement(NewInventoryMovement {
        company_id,
        product_id,
        warehouse_id,
        movement_type: MovementType::Adjustment,
        quantity: qty_delta,
        unit_cost,
        movement_date,
        po_line_id: None,
        reference: reason.to_string(),
    });

    let inventory_account = resolve_in(
        state,
        company_id,
        rule_types::INVENTORY,
        &[],
        movement_date,
    )?;
    let adjust_account = resolve_in(
        state,
        company_id,
        rule_types::INV_ADJUST,
        &[],
        movement_date,
    )?;

    let amount = money::round_minor(qty_delta.abs() * unit_cost);
    if amount.is_zero() {
        return Ok(());
    }
    let gain = qty_delta > Decimal::ZERO;
    let currency = base_currency(state, company_id)?;
    commit_in_tx(
        state,
        &Proposal {
            company_code,
            document_type_code: "JE".into(),
            posting_date: movement_date,
            document_date: movement_date,
            narration: format!("Stock adjustment: {reason}"),
            reasoning: None,
            confidence: None,
            transaction_currency: currency,
            exchange_rate: Decimal::ONE,
            reference_type: None,
            reference_id: None,
            idempotency_key: None,
            created_by: "inventory".into(),
            lines: vec![
                ProposalLine {
                    account_code: inventory_account,
                    is_debit: gain,
                    amount,
                },
                ProposalLine {
                    account_code: adjust_account,
                    is_debit: !gain,
                    amount,
                },
            ],
        },
    )?;
    Ok(())
}

fn base_currency(state: &State, company_id: CompanyId) -> InventoryResult<String> {
    Ok(state.company(company_id)?.base_currency.clone())
}

#[derive(Debug, Clone, PartialEq)]
pub struct StockLevel {
    pub product_code: String,
    pub warehouse_code: String,
    pub qty_on_hand: Decimal,
    pub qty_reserved: Decimal,
    pub qty_available: Decimal,
    pub unit_cost: Decimal,
}

#[derive(Clone)]
pub struct InventoryService {
    store: Store,
}

impl InventoryService {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Stand-alone receipt: opens and commits its own transaction.
    #[allow(clippy::too_many_arguments)]
    pub async fn receive_stock(
        &self,
        company_code: &str,
        product_code: &str,
        warehouse_code: &str,
        qty: Decimal,
        unit_cost: Decimal,
        credit_account: Option<&str>,
        movement_date: NaiveDate,
        cancel: &CancellationToken,
    ) -> InventoryResult<ReceiveOutcome> {
        if cancel.is_cancelled() {
            return Err(InventoryError::Cancelled);
        }
        let mut tx = self.store.begin().await;
        let state = tx.state_mut();
        let company_id = state.company_by_code(company_code)?.id;
        let product_id = state.product_by_code(company_id, product_code)?.id;
        let warehouse_id = state.warehouse_by_code(company_id, warehouse_code)?.id;
        let outcome = receive_stock_tx(
            state,
            company_id,
            product_id,
            warehouse_id,
            qty,
            unit_cost,
            credit_account,
            None,
            movement_date,
            "manual receipt",
        )?;
        if cancel.is_cancelled() {
            return Err(InventoryError::Cancelled);
        }
        tx.commit();
        info!(product_code, %qty, "stock received");
        Ok(outcome)
    }

    /// Stand-alone signed adjustment.
    pub async fn adjust_stock(
        &self,
        company_code: &str,
        product_code: &str,
        warehouse_code: &str,
        qty_delta: Decimal,
        movement_date: NaiveDate,
        reason: &str,
        cancel: &CancellationToken,
    ) -> InventoryResult<()> {
        if cancel.is_cancelled() {
            return Err(InventoryError::Cancelled);
        }
        let mut tx = self.store.begin().await;
        let state = tx.state_mut();
        let company_id = state.company_by_code(company_code)?.id;
        let product_id = state.product_by_code(company_id, product_code)?.id;
        let warehouse_id = state.warehouse_by_code(company_id, warehouse_code)?.id;
        adjust_stock_tx(
            state,
            company_id,
            product_id,
            warehouse_id,
            qty_delta,
            movement_date,
            reason,
        )?;
        tx.commit();
        Ok(())
    }

    pub async fn stock_levels(&self, company_code: &str) -> InventoryResult<Vec<StockLevel>> {
        let company_code = company_code.to_string();
        self.store
            .read(move |state| {
                let company_id = state.company_by_code(&company_code)?.id;
                let mut levels = Vec::new();
                for item in state.inventory_items_for_company(company_id) {
                    let product = state.product(item.product_id)?;
                    let warehouse = state.warehouse(item.warehouse_id)?;
                    levels.push(StockLevel {
                        product_code: product.code.clone(),
                        warehouse_code: warehouse.code.clone(),
                        qty_on_hand: item.qty_on_hand,
                        qty_reserved: item.qty_reserved,
                        qty_available: item.qty_on_hand - item.qty_reserved,
                        unit_cost: item.unit_cost,
                    });
                }
                Ok(levels)
            })
            .await
    }

    /// Availability check for order entry and the agent's read tools.
    pub async fn check_availability(
        &self,
        company_code: &str,
        product_code: &str,
        warehouse_code: &str,
        qty: Decimal,
    ) -> InventoryResult<bool> {
        let company_code = company_code.to_string();
        let product_code = product_code.to_string();
        let warehouse_code = warehouse_code.to_string();
        self.store
            .read(move |state| {
                let company_id = state.company_by_code(&company_code)?.id;
                let product_id = state.product_by_code(company_id, &product_code)?.id;
                let warehouse_id = state.warehouse_by_code(company_id, &warehouse_code)?.id;
                let available = state
                    .inventory_item(company_id, product_id, warehouse_id)
                    .map(|item| item.qty_on_hand - item.qty_reserved)
                    .unwrap_or(Decimal::ZERO);
                Ok(available >= qty)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use khata_store::AccountRuleRow;
    use khata_store::AccountType;
    use khata_store::DocumentTypeRow;
    use khata_store::NumberingStrategy;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    struct Fixture {
        store: Store,
        company_id: CompanyId,
        product_id: ProductId,
        service_id: ProductId,
        warehouse_id: WarehouseId,
    }

    async fn fixture() -> Fixture {
        let store = Store::new();
        let mut tx = store.begin().await;
        let state = tx.state_mut();
        let company = state
            .insert_company("1000", "Demo Traders", "INR")
            .expect("company");
        for (code, name, account_type) in [
            ("1400", "Inventory", AccountType::Asset),
            ("2000", "Accounts Payable", AccountType::Liability),
            ("5000", "Cost of Goods Sold", AccountType::Expense),
            ("5900", "Inventory Adjustments", AccountType::Expense),
        ] {
            state
                .insert_account(company.id, code, name, account_type)
                .expect("account");
        }
        for (code, numbering) in [
            ("JE", NumberingStrategy::PerFiscalYear),
            ("GR", NumberingStrategy::PerFiscalYear),
            ("GI", NumberingStrategy::PerFiscalYear),
        ] {
            state
                .insert_document_type(DocumentTypeRow {
                    code: code.into(),
                    numbering,
                    resets_every_fy: true,
                })
                .expect("doc type");
        }
        for (rule_type, account_code) in [
            (rule_types::INVENTORY, "1400"),
            (rule_types::RECEIPT_CREDIT, "2000"),
            (rule_types::COGS, "5000"),
            (rule_types::INV_ADJUST, "5900"),
        ] {
            state
                .insert_rule(AccountRuleRow {
                    id: 0,
                    company_id: company.id,
                    rule_type: rule_type.into(),
                    account_code: account_code.into(),
                    qualifier_key: None,
                    qualifier_value: None,
                    priority: 0,
                    effective_from: date(2020, 4, 1),
                    effective_to: None,
                })
                .expect("rule");
        }
        let product = state
            .insert_product(
                company.id,
                "P002",
                "Steel Bracket",
                ProductKind::Physical,
                dec!(400.00),
                "4000",
            )
            .expect("product");
        let service = state
            .insert_product(
                company.id,
                "P001",
                "Site Survey",
                ProductKind::Service,
                dec!(1500.00),
                "4000",
            )
            .expect("service product");
        let warehouse = state
            .insert_warehouse(company.id, "MAIN", "Main Warehouse")
            .expect("warehouse");
        tx.commit();
        Fixture {
            store,
            company_id: company.id,
            product_id: product.id,
            service_id: service.id,
            warehouse_id: warehouse.id,
        }
    }

    #[tokio::test]
    async fn receipt_sets_weighted_average_cost() {
        let f = fixture().await;
        let mut tx = f.store.begin().await;
        let state = tx.state_mut();

        receive_stock_tx(
            state,
            f.company_id,
            f.product_id,
            f.warehouse_id,
            dec!(100),
            dec!(250.00),
            None,
            None,
            date(2026, 7, 1),
            "opening",
        )
        .expect("first receipt");
        receive_stock_tx(
            state,
            f.company_id,
            f.product_id,
            f.warehouse_id,
            dec!(50),
            dec!(310.00),
            None,
            None,
            date(2026, 7, 2),
            "restock",
        )
        .expect("second receipt");

        let item = state
            .inventory_item(f.company_id, f.product_id, f.warehouse_id)
            .expect("item");
        assert_eq!(item.qty_on_hand, dec!(150));
        // (100*250 + 50*310) / 150 = 270
        assert_eq!(item.unit_cost, dec!(270));
    }

    #[tokio::test]
    async fn receipt_of_service_product_is_skipped() {
        let f = fixture().await;
        let mut tx = f.store.begin().await;
        let outcome = receive_stock_tx(
            tx.state_mut(),
            f.company_id,
            f.service_id,
            f.warehouse_id,
            dec!(5),
            dec!(100.00),
            None,
            None,
            date(2026, 7, 1),
            "noop",
        )
        .expect("skip");
        assert_eq!(outcome, ReceiveOutcome::SkippedService);
        assert!(tx
            .state()
            .inventory_item(f.company_id, f.service_id, f.warehouse_id)
            .is_none());
    }

    #[tokio::test]
    async fn zero_quantity_receipt_is_rejected() {
        let f = fixture().await;
        let mut tx = f.store.begin().await;
        let err = receive_stock_tx(
            tx.state_mut(),
            f.company_id,
            f.product_id,
            f.warehouse_id,
            dec!(0),
            dec!(250.00),
            None,
            None,
            date(2026, 7, 1),
            "zero",
        )
        .expect_err("zero quantity");
        assert!(matches!(err, InventoryError::Validation(_)));
    }

    #[tokio::test]
    async fn reserve_respects_available_not_on_hand() {
        let f = fixture().await;
        let mut tx = f.store.begin().await;
        let state = tx.state_mut();
        receive_stock_tx(
            state,
            f.company_id,
            f.product_id,
            f.warehouse_id,
            dec!(10),
            dec!(250.00),
            None,
            None,
            date(2026, 7, 1),
            "opening",
        )
        .expect("receipt");
        reserve_stock_tx(
            state,
            f.company_id,
            f.product_id,
            f.warehouse_id,
            dec!(5),
            date(2026, 7, 2),
            "SO-1",
        )
        .expect("first reservation");

        let err = reserve_stock_tx(
            state,
            f.company_id,
            f.product_id,
            f.warehouse_id,
            dec!(7),
            date(2026, 7, 2),
            "SO-2",
        )
        .expect_err("over-reserve");
        match err {
            InventoryError::InsufficientStock {
                available,
                requested,
            } => {
                assert_eq!(available, dec!(5));
                assert_eq!(requested, dec!(7));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn release_more_than_reserved_underflows() {
        let f = fixture().await;
        let mut tx = f.store.begin().await;
        let state = tx.state_mut();
        receive_stock_tx(
            state,
            f.company_id,
            f.product_id,
            f.warehouse_id,
            dec!(10),
            dec!(250.00),
            None,
            None,
            date(2026, 7, 1),
            "opening",
        )
        .expect("receipt");
        reserve_stock_tx(
            state,
            f.company_id,
            f.product_id,
            f.warehouse_id,
            dec!(4),
            date(2026, 7, 2),
            "SO-1",
        )
        .expect("reserve");

        let err = release_reservation_tx(
            state,
            f.company_id,
            f.product_id,
            f.warehouse_id,
            dec!(5),
            date(2026, 7, 3),
            "SO-1",
        )
        .expect_err("underflow");
        assert!(matches!(err, InventoryError::ReservationUnderflow { .. }));
    }

    #[tokio::test]
    async fn shipment_consumes_reservation_and_books_cogs() {
        let f = fixture().await;
        let mut tx = f.store.begin().await;
        let state = tx.state_mut();
        receive_stock_tx(
            state,
            f.company_id,
            f.product_id,
            f.warehouse_id,
            dec!(100),
            dec!(250.00),
            None,
            None,
            date(2026, 7, 1),
            "opening",
        )
        .expect("receipt");
        reserve_stock_tx(
            state,
            f.company_id,
            f.product_id,
            f.warehouse_id,
            dec!(20),
            date(2026, 7, 2),
            "SO-1",
        )
        .expect("reserve");

        let outcome = ship_stock_tx(
            state,
            f.company_id,
            f.product_id,
            f.warehouse_id,
            dec!(20),
            date(2026, 7, 3),
            "SO-1",
        )
        .expect("ship");
        let posting = match outcome {
            ShipOutcome::Posted(posting) => posting,
            other => panic!("unexpected outcome {other:?}"),
        };
        assert_eq!(posting.cogs_base, dec!(5000.00));

        let item = state
            .inventory_item(f.company_id, f.product_id, f.warehouse_id)
            .expect("item");
        assert_eq!(item.qty_on_hand, dec!(80));
        assert_eq!(item.qty_reserved, dec!(0));

        let lines = state.lines_for_entry(posting.entry_id);
        let total_debits: Decimal = lines.iter().map(|l| l.debit_base).sum();
        assert_eq!(total_debits, dec!(5000.00));
    }

    #[tokio::test]
    async fn receive_then_ship_returns_on_hand_to_prior_level() {
        let f = fixture().await;
        let mut tx = f.store.begin().await;
        let state = tx.state_mut();
        receive_stock_tx(
            state,
            f.company_id,
            f.product_id,
            f.warehouse_id,
            dec!(30),
            dec!(100.00),
            None,
            None,
            date(2026, 7, 1),
            "r",
        )
        .expect("receipt");
        reserve_stock_tx(
            state,
            f.company_id,
            f.product_id,
            f.warehouse_id,
            dec!(30),
            date(2026, 7, 1),
            "SO-1",
        )
        .expect("reserve");
        ship_stock_tx(
            state,
            f.company_id,
            f.product_id,
            f.warehouse_id,
            dec!(30),
            date(2026, 7, 2),
            "SO-1",
        )
        .expect("ship");

        let item = state
            .inventory_item(f.company_id, f.product_id, f.warehouse_id)
            .expect("item");
        assert_eq!(item.qty_on_hand, Decimal::ZERO);
        assert_eq!(item.qty_reserved, Decimal::ZERO);
    }

    #[tokio::test]
    async fn negative_adjustment_cannot_break_reservations() {
        let f = fixture().await;
        let mut tx = f.store.begin().await;
        let state = tx.state_mut();
        receive_stock_tx(
            state,
            f.company_id,
            f.product_id,
            f.warehouse_id,
            dec!(10),
            dec!(250.00),
            None,
            None,
            date(2026, 7, 1),
            "r",
        )
        .expect("receipt");
        reserve_stock_tx(
            state,
            f.company_id,
            f.product_id,
            f.warehouse_id,
            dec!(8),
            date(2026, 7, 1),
            "SO-1",
        )
        .expect("reserve");

        let err = adjust_stock_tx(
            state,
            f.company_id,
            f.product_id,
            f.warehouse_id,
            dec!(-5),
            date(2026, 7, 2),
            "stocktake",
        )
        .expect_err("would leave on-hand below reserved");
        assert!(matches!(err, InventoryError::InsufficientStock { .. }));
    }

    #[tokio::test]
    async fn stock_levels_report_available_quantity() {
        let f = fixture().await;
        let service = InventoryService::new(f.store.clone());
        let cancel = CancellationToken::new();
        service
            .receive_stock(
                "1000",
                "P002",
                "MAIN",
                dec!(100),
                dec!(250.00),
                None,
                date(2026, 7, 1),
                &cancel,
            )
            .await
            .expect("receive");

        let levels = service.stock_levels("1000").await.expect("levels");
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].product_code, "P002");
        assert_eq!(levels[0].qty_available, dec!(100));

        assert!(service
            .check_availability("1000", "P002", "MAIN", dec!(100))
            .await
            .expect("check"));
        assert!(!service
            .check_availability("1000", "P002", "MAIN", dec!(101))
            .await
            .expect("check"));
    }
}
