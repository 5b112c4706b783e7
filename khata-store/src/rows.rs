use std::fmt::Display;

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use rust_decimal::Decimal;

pub type CompanyId = i64;
pub type AccountId = i64;
pub type DocumentId = i64;
pub type EntryId = i64;
pub type LineId = i64;
pub type ProductId = i64;
pub type WarehouseId = i64;
pub type CustomerId = i64;
pub type VendorId = i64;
pub type RuleId = i64;
pub type SalesOrderId = i64;
pub type PurchaseOrderId = i64;
pub type PoLineId = i64;
pub type MovementId = i64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyRow {
    pub id: CompanyId,
    pub code: String,
    pub name: String,
    /// ISO-4217 reporting currency; immutable once the company exists.
    pub base_currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountType::Asset => write!(f, "asset"),
            AccountType::Liability => write!(f, "liability"),
            AccountType::Equity => write!(f, "equity"),
            AccountType::Revenue => write!(f, "revenue"),
            AccountType::Expense => write!(f, "expense"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRow {
    pub id: AccountId,
    pub company_id: CompanyId,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberingStrategy {
    Global,
    PerFiscalYear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentTypeRow {
    pub code: String,
    pub numbering: NumberingStrategy,
    pub resets_every_fy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    Draft,
    Posted,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRow {
    pub id: DocumentId,
    pub company_id: CompanyId,
    pub type_code: String,
    pub status: DocumentStatus,
    /// Assigned only when the document reaches `Posted`.
    pub document_number: Option<String>,
    pub document_date: NaiveDate,
    pub fiscal_year: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntryRow {
    pub id: EntryId,
    pub company_id: CompanyId,
    pub posting_date: NaiveDate,
    pub document_date: NaiveDate,
    pub narration: String,
    pub reference_type: Option<String>,
    pub reference_id: Option<i64>,
    pub idempotency_key: Option<String>,
    pub reversed_entry_id: Option<EntryId>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

/// Exactly one of `debit_base` / `credit_base` is non-zero per line.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalLineRow {
    pub id: LineId,
    pub entry_id: EntryId,
    pub account_id: AccountId,
    pub transaction_currency: String,
    pub exchange_rate: Decimal,
    pub amount_transaction: Decimal,
    pub debit_base: Decimal,
    pub credit_base: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductKind {
    Physical,
    Service,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductRow {
    pub id: ProductId,
    pub company_id: CompanyId,
    pub code: String,
    pub name: String,
    pub kind: ProductKind,
    pub unit_price: Decimal,
    pub revenue_account_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseRow {
    pub id: WarehouseId,
    pub company_id: CompanyId,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerRow {
    pub id: CustomerId,
    pub company_id: CompanyId,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorRow {
    pub id: VendorId,
    pub company_id: CompanyId,
    pub code: String,
    pub name: String,
}

/// Stock counters for one `(company, product, warehouse)` triple.
///
/// `qty_on_hand - qty_reserved` is the quantity a new order may reserve;
/// both counters stay non-negative across every committed transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryItemRow {
    pub company_id: CompanyId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub qty_on_hand: Decimal,
    pub qty_reserved: Decimal,
    /// Weighted-average unit cost, full decimal precision.
    pub unit_cost: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementType {
    Receipt,
    Reservation,
    ReservationCancel,
    Shipment,
    Adjustment,
}

impl Display for MovementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MovementType::Receipt => write!(f, "RECEIPT"),
            MovementType::Reservation => write!(f, "RESERVATION"),
            MovementType::ReservationCancel => write!(f, "RESERVATION_CANCEL"),
            MovementType::Shipment => write!(f, "SHIPMENT"),
            MovementType::Adjustment => write!(f, "ADJUSTMENT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InventoryMovementRow {
    pub id: MovementId,
    pub company_id: CompanyId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub movement_type: MovementType,
    /// Signed by type: receipts positive, shipments negative.
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub movement_date: NaiveDate,
    pub po_line_id: Option<PoLineId>,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRuleRow {
    pub id: RuleId,
    pub company_id: CompanyId,
    pub rule_type: String,
    pub account_code: String,
    pub qualifier_key: Option<String>,
    pub qualifier_value: Option<String>,
    pub priority: i32,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SalesOrderStatus {
    Draft,
    Confirmed,
    Shipped,
    Invoiced,
    Paid,
    Cancelled,
}

impl Display for SalesOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SalesOrderStatus::Draft => write!(f, "DRAFT"),
            SalesOrderStatus::Confirmed => write!(f, "CONFIRMED"),
            SalesOrderStatus::Shipped => write!(f, "SHIPPED"),
            SalesOrderStatus::Invoiced => write!(f, "INVOICED"),
            SalesOrderStatus::Paid => write!(f, "PAID"),
            SalesOrderStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SalesOrderLineRow {
    pub id: LineId,
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub line_total_tx: Decimal,
    pub line_total_base: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SalesOrderRow {
    pub id: SalesOrderId,
    pub company_id: CompanyId,
    pub customer_id: CustomerId,
    /// Assigned on CONFIRMED, gapless per fiscal year.
    pub order_number: Option<String>,
    pub status: SalesOrderStatus,
    pub order_date: NaiveDate,
    pub currency: String,
    pub exchange_rate: Decimal,
    pub total_transaction: Decimal,
    pub total_base: Decimal,
    pub notes: String,
    pub warehouse_id: WarehouseId,
    pub lines: Vec<SalesOrderLineRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseOrderStatus {
    Draft,
    Approved,
    Received,
    Invoiced,
    Paid,
}

impl Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PurchaseOrderStatus::Draft => write!(f, "DRAFT"),
            PurchaseOrderStatus::Approved => write!(f, "APPROVED"),
            PurchaseOrderStatus::Received => write!(f, "RECEIVED"),
            PurchaseOrderStatus::Invoiced => write!(f, "INVOICED"),
            PurchaseOrderStatus::Paid => write!(f, "PAID"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseOrderLineRow {
    pub id: PoLineId,
    /// None for service/expense lines.
    pub product_id: Option<ProductId>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub expense_account_code: Option<String>,
    pub received_qty: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseOrderRow {
    pub id: PurchaseOrderId,
    pub company_id: CompanyId,
    pub vendor_id: VendorId,
    /// Assigned on APPROVED.
    pub po_number: Option<String>,
    pub status: PurchaseOrderStatus,
    pub po_date: NaiveDate,
    pub currency: String,
    pub exchange_rate: Decimal,
    pub total_transaction: Decimal,
    pub total_base: Decimal,
    pub notes: String,
    pub lines: Vec<PurchaseOrderLineRow>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub invoice_amount: Option<Decimal>,
    pub pi_document_number: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub invoiced_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
}
