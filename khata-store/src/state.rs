use std::collections::HashMap;

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use rust_decimal::Decimal;

use crate::StoreError;
use crate::StoreResult;
use crate::rows::*;

/// Column values for a journal-entry insert; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewJournalEntry {
    pub company_id: CompanyId,
    pub posting_date: NaiveDate,
    pub document_date: NaiveDate,
    pub narration: String,
    pub reference_type: Option<String>,
    pub reference_id: Option<i64>,
    pub idempotency_key: Option<String>,
    pub reversed_entry_id: Option<EntryId>,
    pub created_by: String,
}

#[derive(Debug, Clone)]
pub struct NewJournalLine {
    pub entry_id: EntryId,
    pub account_id: AccountId,
    pub transaction_currency: String,
    pub exchange_rate: Decimal,
    pub amount_transaction: Decimal,
    pub debit_base: Decimal,
    pub credit_base: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewInventoryMovement {
    pub company_id: CompanyId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub movement_date: NaiveDate,
    pub po_line_id: Option<PoLineId>,
    pub reference: String,
}

/// Every table of the engine, plus the monotonic sequences that stand in
/// for database-assigned primary keys.
#[derive(Debug, Default, Clone)]
pub struct State {
    companies: HashMap<CompanyId, CompanyRow>,
    accounts: HashMap<AccountId, AccountRow>,
    document_types: HashMap<String, DocumentTypeRow>,
    document_sequences: HashMap<(CompanyId, String, String), i64>,
    documents: HashMap<DocumentId, DocumentRow>,
    journal_entries: HashMap<EntryId, JournalEntryRow>,
    journal_lines: Vec<JournalLineRow>,
    products: HashMap<ProductId, ProductRow>,
    warehouses: HashMap<WarehouseId, WarehouseRow>,
    customers: HashMap<CustomerId, CustomerRow>,
    vendors: HashMap<VendorId, VendorRow>,
    inventory_items: HashMap<(CompanyId, ProductId, WarehouseId), InventoryItemRow>,
    inventory_movements: Vec<InventoryMovementRow>,
    account_rules: HashMap<RuleId, AccountRuleRow>,
    sales_orders: HashMap<SalesOrderId, SalesOrderRow>,
    purchase_orders: HashMap<PurchaseOrderId, PurchaseOrderRow>,

    company_seq: i64,
    account_seq: i64,
    document_seq: i64,
    entry_seq: i64,
    line_seq: i64,
    product_seq: i64,
    warehouse_seq: i64,
    party_seq: i64,
    movement_seq: i64,
    rule_seq: i64,
    so_seq: i64,
    so_line_seq: i64,
    po_seq: i64,
    po_line_seq: i64,
    now_override: Option<DateTime<Utc>>,
}

impl State {
    fn now(&self) -> DateTime<Utc> {
        self.now_override.unwrap_or_else(Utc::now)
    }

    /// Pins `created_at`/transition timestamps, for deterministic tests.
    pub fn set_now(&mut self, now: DateTime<Utc>) {
        self.now_override = Some(now);
    }

    // ---- companies ----------------------------------------------------

    pub fn insert_company(
        &mut self,
        code: &str,
        name: &str,
        base_currency: &str,
    ) -> StoreResult<CompanyRow> {
        if self.companies.values().any(|c| c.code == code) {
            return Err(StoreError::Conflict(format!("company code {code}")));
        }
        self.company_seq += 1;
        let row = CompanyRow {
            id: self.company_seq,
            code: code.to_string(),
            name: name.to_string(),
            base_currency: base_currency.to_string(),
        };
        self.companies.insert(row.id, row.clone());
        Ok(row)
    }

    pub fn company(&self, id: CompanyId) -> StoreResult<&CompanyRow> {
        self.companies
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("company {id}")))
    }

    pub fn company_by_code(&self, code: &str) -> StoreResult<&CompanyRow> {
        self.companies
            .values()
            .find(|c| c.code == code)
            .ok_or_else(|| StoreError::NotFound(format!("company {code}")))
    }

    pub fn companies(&self) -> Vec<&CompanyRow> {
        let mut rows: Vec<&CompanyRow> = self.companies.values().collect();
        rows.sort_by_key(|c| c.id);
        rows
    }

    // ---- accounts ------------------------------------------------------

    pub fn insert_account(
        &mut self,
        company_id: CompanyId,
        code: &str,
        name: &str,
        account_type: AccountType,
    ) -> StoreResult<AccountRow> {
        self.company(company_id)?;
        if self
            .accounts
            .values()
            .any(|a| a.company_id == company_id && a.code == code)
        {
            return Err(StoreError::Conflict(format!(
                "account code {code} for company {company_id}"
            )));
        }
        self.account_seq += 1;
        let row = AccountRow {
            id: self.account_seq,
            company_id,
            code: code.to_string(),
            name: name.to_string(),
            account_type,
        };
        self.accounts.insert(row.id, row.clone());
        Ok(row)
    }

    pub fn account(&self, id: AccountId) -> StoreResult<&AccountRow> {
        self.accounts
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))
    }

    pub fn account_by_code(&self, company_id: CompanyId, code: &str) -> StoreResult<&AccountRow> {
        self.accounts
            .values()
            .find(|a| a.company_id == company_id && a.code == code)
            .ok_or_else(|| StoreError::NotFound(format!("account {code}")))
    }

    pub fn accounts_for_company(&self, company_id: CompanyId) -> Vec<&AccountRow> {
        let mut rows: Vec<&AccountRow> = self
            .accounts
            .values()
            .filter(|a| a.company_id == company_id)
            .collect();
        rows.sort_by(|a, b| a.code.cmp(&b.code));
        rows
    }

    // ---- document types and sequences ---------------------------------

    pub fn insert_document_type(&mut self, row: DocumentTypeRow) -> StoreResult<()> {
        if self.document_types.contains_key(&row.code) {
            return Err(StoreError::Conflict(format!("document type {}", row.code)));
        }
        self.document_types.insert(row.code.clone(), row);
        Ok(())
    }

    pub fn document_type(&self, code: &str) -> StoreResult<&DocumentTypeRow> {
        self.document_types
            .get(code)
            .ok_or_else(|| StoreError::NotFound(format!("document type {code}")))
    }

    /// Bumps the `(company, type, fiscal_year)` sequence and returns the new
    /// value. Upsert semantics: a missing row starts at zero. The caller's
    /// transaction holds the store lock, so two callers can never observe
    /// the same value.
    pub fn next_sequence_value(
        &mut self,
        company_id: CompanyId,
        type_code: &str,
        fiscal_year: &str,
    ) -> i64 {
        let key = (company_id, type_code.to_string(), fiscal_year.to_string());
        let last = self.document_sequences.entry(key).or_insert(0);
        *last += 1;
        *last
    }

    // ---- documents -----------------------------------------------------

    pub fn insert_document(
        &mut self,
        company_id: CompanyId,
        type_code: &str,
        document_date: NaiveDate,
        fiscal_year: &str,
    ) -> StoreResult<DocumentId> {
        self.company(company_id)?;
        self.document_type(type_code)?;
        self.document_seq += 1;
        let row = DocumentRow {
            id: self.document_seq,
            company_id,
            type_code: type_code.to_string(),
            status: DocumentStatus::Draft,
            document_number: None,
            document_date,
            fiscal_year: fiscal_year.to_string(),
        };
        self.documents.insert(row.id, row);
        Ok(self.document_seq)
    }

    pub fn document(&self, id: DocumentId) -> StoreResult<&DocumentRow> {
        self.documents
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("document {id}")))
    }

    pub fn mark_document_posted(&mut self, id: DocumentId, number: &str) -> StoreResult<()> {
        let unique = !self.documents.values().any(|d| {
            d.status == DocumentStatus::Posted && d.document_number.as_deref() == Some(number)
        });
        if !unique {
            return Err(StoreError::Conflict(format!("document number {number}")));
        }
        let row = self
            .documents
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("document {id}")))?;
        row.status = DocumentStatus::Posted;
        row.document_number = Some(number.to_string());
        Ok(())
    }

    pub fn documents_for_company(&self, company_id: CompanyId) -> Vec<&DocumentRow> {
        let mut rows: Vec<&DocumentRow> = self
            .documents
            .values()
            .filter(|d| d.company_id == company_id)
            .collect();
        rows.sort_by_key(|d| d.id);
        rows
    }

    // ---- journal -------------------------------------------------------

    pub fn entry_by_idempotency_key(&self, key: &str) -> Option<&JournalEntryRow> {
        self.journal_entries
            .values()
            .find(|e| e.idempotency_key.as_deref() == Some(key))
    }

    pub fn insert_journal_entry(&mut self, new: NewJournalEntry) -> StoreResult<EntryId> {
        self.company(new.company_id)?;
        if let Some(key) = &new.idempotency_key
            && self.entry_by_idempotency_key(key).is_some()
        {
            return Err(StoreError::Conflict(format!("idempotency key {key}")));
        }
        self.entry_seq += 1;
        let row = JournalEntryRow {
            id: self.entry_seq,
            company_id: new.company_id,
            posting_date: new.posting_date,
            document_date: new.document_date,
            narration: new.narration,
            reference_type: new.reference_type,
            reference_id: new.reference_id,
            idempotency_key: new.idempotency_key,
            reversed_entry_id: new.reversed_entry_id,
            created_at: self.now(),
            created_by: new.created_by,
        };
        self.journal_entries.insert(row.id, row);
        Ok(self.entry_seq)
    }

    pub fn insert_journal_line(&mut self, new: NewJournalLine) -> StoreResult<LineId> {
        if !self.journal_entries.contains_key(&new.entry_id) {
            return Err(StoreError::NotFound(format!("entry {}", new.entry_id)));
        }
        self.line_seq += 1;
        self.journal_lines.push(JournalLineRow {
            id: self.line_seq,
            entry_id: new.entry_id,
            account_id: new.account_id,
            transaction_currency: new.transaction_currency,
            exchange_rate: new.exchange_rate,
            amount_transaction: new.amount_transaction,
            debit_base: new.debit_base,
            credit_base: new.credit_base,
        });
        Ok(self.line_seq)
    }

    pub fn journal_entry(&self, id: EntryId) -> StoreResult<&JournalEntryRow> {
        self.journal_entries
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("entry {id}")))
    }

    pub fn entries_for_company(&self, company_id: CompanyId) -> Vec<&JournalEntryRow> {
        let mut rows: Vec<&JournalEntryRow> = self
            .journal_entries
            .values()
            .filter(|e| e.company_id == company_id)
            .collect();
        rows.sort_by_key(|e| e.id);
        rows
    }

    pub fn lines_for_entry(&self, entry_id: EntryId) -> Vec<&JournalLineRow> {
        self.journal_lines
            .iter()
            .filter(|l| l.entry_id == entry_id)
            .collect()
    }

    pub fn journal_lines(&self) -> &[JournalLineRow] {
        &self.journal_lines
    }

    // ---- catalog: products, warehouses, parties ------------------------

    pub fn insert_product(
        &mut self,
        company_id: CompanyId,
        code: &str,
        name: &str,
        kind: ProductKind,
        unit_price: Decimal,
        revenue_account_code: &str,
    ) -> StoreResult<ProductRow> {
        if self
            .products
            .values()
            .any(|p| p.company_id == company_id && p.code == code)
        {
            return Err(StoreError::Conflict(format!("product code {code}")));
        }
        self.product_seq += 1;
        let row = ProductRow {
            id: self.product_seq,
            company_id,
            code: code.to_string(),
            name: name.to_string(),
            kind,
            unit_price,
            revenue_account_code: revenue_account_code.to_string(),
        };
        self.products.insert(row.id, row.clone());
        Ok(row)
    }

    pub fn product(&self, id: ProductId) -> StoreResult<&ProductRow> {
        self.products
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("product {id}")))
    }

    pub fn product_by_code(&self, company_id: CompanyId, code: &str) -> StoreResult<&ProductRow> {
        self.products
            .values()
            .find(|p| p.company_id == company_id && p.code == code)
            .ok_or_else(|| StoreError::NotFound(format!("product {code}")))
    }

    pub fn products_for_company(&self, company_id: CompanyId) -> Vec<&ProductRow> {
        let mut rows: Vec<&ProductRow> = self
            .products
            .values()
            .filter(|p| p.company_id == company_id)
            .collect();
        rows.sort_by(|a, b| a.code.cmp(&b.code));
        rows
    }

    pub fn insert_warehouse(
        &mut self,
        company_id: CompanyId,
        code: &str,
        name: &str,
    ) -> StoreResult<WarehouseRow> {
        if self
            .warehouses
            .values()
            .any(|w| w.company_id == company_id && w.code == code)
        {
            return Err(StoreError::Conflict(format!("warehouse code {code}")));
        }
        self.warehouse_seq += 1;
        let row = WarehouseRow {
            id: self.warehouse_seq,
            company_id,
            code: code.to_string(),
            name: name.to_string(),
        };
        self.warehouses.insert(row.id, row.clone());
        Ok(row)
    }

    pub fn warehouse(&self, id: WarehouseId) -> StoreResult<&WarehouseRow> {
        self.warehouses
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("warehouse {id}")))
    }

    pub fn warehouse_by_code(
        &self,
        company_id: CompanyId,
        code: &str,
    ) -> StoreResult<&WarehouseRow> {
        self.warehouses
            .values()
            .find(|w| w.company_id == company_id && w.code == code)
            .ok_or_else(|| StoreError::NotFound(format!("warehouse {code}")))
    }

    pub fn insert_customer(
        &mut self,
        company_id: CompanyId,
        code: &str,
        name: &str,
    ) -> StoreResult<CustomerRow> {
        if self
            .customers
            .values()
            .any(|c| c.company_id == company_id && c.code == code)
        {
            return Err(StoreError::Conflict(format!("customer code {code}")));
        }
        self.party_seq += 1;
        let row = CustomerRow {
            id: self.party_seq,
            company_id,
            code: code.to_string(),
            name: name.to_string(),
        };
        self.customers.insert(row.id, row.clone());
        Ok(row)
    }

    pub fn customer(&self, id: CustomerId) -> StoreResult<&CustomerRow> {
        self.customers
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("customer {id}")))
    }

    pub fn customer_by_code(&self, company_id: CompanyId, code: &str) -> StoreResult<&CustomerRow> {
        self.customers
            .values()
            .find(|c| c.company_id == company_id && c.code == code)
            .ok_or_else(|| StoreError::NotFound(format!("customer {code}")))
    }

    pub fn insert_vendor(
        &mut self,
        company_id: CompanyId,
        code: &str,
        name: &str,
    ) -> StoreResult<VendorRow> {
        if self
            .vendors
            .values()
            .any(|v| v.company_id == company_id && v.code == code)
        {
            return Err(StoreError::Conflict(format!("vendor code {code}")));
        }
        self.party_seq += 1;
        let row = VendorRow {
            id: self.party_seq,
            company_id,
            code: code.to_string(),
            name: name.to_string(),
        };
        self.vendors.insert(row.id, row.clone());
        Ok(row)
    }

    pub fn vendor(&self, id: VendorId) -> StoreResult<&VendorRow> {
        self.vendors
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("vendor {id}")))
    }

    pub fn vendor_by_code(&self, company_id: CompanyId, code: &str) -> StoreResult<&VendorRow> {
        self.vendors
            .values()
            .find(|v| v.company_id == company_id && v.code == code)
            .ok_or_else(|| StoreError::NotFound(format!("vendor {code}")))
    }

    pub fn vendors_for_company(&self, company_id: CompanyId) -> Vec<&VendorRow> {
        let mut rows: Vec<&VendorRow> = self
            .vendors
            .values()
            .filter(|v| v.company_id == company_id)
            .collect();
        rows.sort_by(|a, b| a.code.cmp(&b.code));
        rows
    }

    // ---- inventory -----------------------------------------------------

    pub fn inventory_item(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Option<&InventoryItemRow> {
        self.inventory_items
            .get(&(company_id, product_id, warehouse_id))
    }

    pub fn inventory_item_mut(
        &mut self,
        company_id: CompanyId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Option<&mut InventoryItemRow> {
        self.inventory_items
            .get_mut(&(company_id, product_id, warehouse_id))
    }

    /// Inserts a zeroed stock row on first receipt of a product in a
    /// warehouse.
    pub fn ensure_inventory_item(
        &mut self,
        company_id: CompanyId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> &mut InventoryItemRow {
        self.inventory_items
            .entry((company_id, product_id, warehouse_id))
            .or_insert_with(|| InventoryItemRow {
                company_id,
                product_id,
                warehouse_id,
                qty_on_hand: Decimal::ZERO,
                qty_reserved: Decimal::ZERO,
                unit_cost: Decimal::ZERO,
            })
    }

    pub fn inventory_items_for_company(&self, company_id: CompanyId) -> Vec<&InventoryItemRow> {
        let mut rows: Vec<&InventoryItemRow> = self
            .inventory_items
            .values()
            .filter(|i| i.company_id == company_id)
            .collect();
        rows.sort_by_key(|i| (i.product_id, i.warehouse_id));
        rows
    }

    pub fn insert_movement(&mut self, new: NewInventoryMovement) -> MovementId {
        self.movement_seq += 1;
        self.inventory_movements.push(InventoryMovementRow {
            id: self.movement_seq,
            company_id: new.company_id,
            product_id: new.product_id,
            warehouse_id: new.warehouse_id,
            movement_type: new.movement_type,
            quantity: new.quantity,
            unit_cost: new.unit_cost,
            movement_date: new.movement_date,
            po_line_id: new.po_line_id,
            reference: new.reference,
        });
        self.movement_seq
    }

    pub fn movements(&self) -> &[InventoryMovementRow] {
        &self.inventory_movements
    }

    // ---- account rules -------------------------------------------------

    pub fn insert_rule(&mut self, mut row: AccountRuleRow) -> StoreResult<RuleId> {
        self.company(row.company_id)?;
        self.rule_seq += 1;
        row.id = self.rule_seq;
        self.account_rules.insert(row.id, row);
        Ok(self.rule_seq)
    }

    pub fn rules_for(&self, company_id: CompanyId, rule_type: &str) -> Vec<&AccountRuleRow> {
        self.account_rules
            .values()
            .filter(|r| r.company_id == company_id && r.rule_type == rule_type)
            .collect()
    }

    // ---- sales orders --------------------------------------------------

    pub fn insert_sales_order(&mut self, mut row: SalesOrderRow) -> SalesOrderId {
        self.so_seq += 1;
        row.id = self.so_seq;
        for line in &mut row.lines {
            self.so_line_seq += 1;
            line.id = self.so_line_seq;
        }
        self.sales_orders.insert(row.id, row);
        self.so_seq
    }

    pub fn sales_order(&self, id: SalesOrderId) -> StoreResult<&SalesOrderRow> {
        self.sales_orders
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("sales order {id}")))
    }

    pub fn sales_order_mut(&mut self, id: SalesOrderId) -> StoreResult<&mut SalesOrderRow> {
        self.sales_orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("sales order {id}")))
    }

    // ---- purchase orders -----------------------------------------------

    pub fn insert_purchase_order(&mut self, mut row: PurchaseOrderRow) -> PurchaseOrderId {
        self.po_seq += 1;
        row.id = self.po_seq;
        for line in &mut row.lines {
            self.po_line_seq += 1;
            line.id = self.po_line_seq;
        }
        self.purchase_orders.insert(row.id, row);
        self.po_seq
    }

    pub fn purchase_order(&self, id: PurchaseOrderId) -> StoreResult<&PurchaseOrderRow> {
        self.purchase_orders
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("purchase order {id}")))
    }

    pub fn purchase_order_mut(
        &mut self,
        id: PurchaseOrderId,
    ) -> StoreResult<&mut PurchaseOrderRow> {
        self.purchase_orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("purchase order {id}")))
    }

    pub fn purchase_orders_for_company(&self, company_id: CompanyId) -> Vec<&PurchaseOrderRow> {
        let mut rows: Vec<&PurchaseOrderRow> = self
            .purchase_orders
            .values()
            .filter(|p| p.company_id == company_id)
            .collect();
        rows.sort_by_key(|p| p.id);
        rows
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.now()
    }
}
