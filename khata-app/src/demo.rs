//! Demo provisioning: one company with a working chart, document types,
//! posting rules, catalog and opening stock. Used by local runs and the
//! contract tests.

use chrono::NaiveDate;
use khata_store::AccountRuleRow;
use khata_store::AccountType;
use khata_store::DocumentTypeRow;
use khata_store::NumberingStrategy;
use khata_store::ProductKind;
use khata_store::Store;
use rust_decimal::Decimal;

use crate::AppError;
use crate::AppResult;

/// Seeds company 1000 (INR) with the standard demo data set.
pub async fn seed_demo(store: &Store) -> AppResult<()> {
    let mut tx = store.begin().await;
    let state = tx.state_mut();

    let company = state.insert_company("1000", "Demo Traders Pvt Ltd", "INR")?;

    for (code, name, account_type) in [
        ("1100", "Bank", AccountType::Asset),
        ("1200", "Accounts Receivable", AccountType::Asset),
        ("1400", "Inventory", AccountType::Asset),
        ("2000", "Accounts Payable", AccountType::Liability),
        ("3000", "Opening Balances", AccountType::Equity),
        ("4000", "Product Revenue", AccountType::Revenue),
        ("4100", "Service Revenue", AccountType::Revenue),
        ("5000", "Cost of Goods Sold", AccountType::Expense),
        ("5900", "Inventory Adjustments", AccountType::Expense),
        ("6100", "Freight Inward", AccountType::Expense),
    ] {
        state.insert_account(company.id, code, name, account_type)?;
    }

    for code in ["JE", "SI", "PI", "SO", "GR", "GI", "PO"] {
        state.insert_document_type(DocumentTypeRow {
            code: code.into(),
            numbering: NumberingStrategy::PerFiscalYear,
            resets_every_fy: true,
        })?;
    }

    let effective_from =
        NaiveDate::from_ymd_opt(2020, 4, 1).ok_or_else(|| AppError::Config("bad seed date".into()))?;
    for (rule_type, account_code) in [
        ("AR", "1200"),
        ("AP", "2000"),
        ("INVENTORY", "1400"),
        ("COGS", "5000"),
        ("BANK_DEFAULT", "1100"),
        ("RECEIPT_CREDIT", "2000"),
        ("INV_ADJUST", "5900"),
    ] {
        state.insert_rule(AccountRuleRow {
            id: 0,
            company_id: company.id,
            rule_type: rule_type.into(),
            account_code: account_code.into(),
            qualifier_key: None,
            qualifier_value: None,
            priority: 0,
            effective_from,
            effective_to: None,
        })?;
    }

    let warehouse = state.insert_warehouse(company.id, "MAIN", "Main Warehouse")?;
    state.insert_customer(company.id, "C001", "Acme Retail")?;
    state.insert_vendor(company.id, "V001", "Sharma Metals")?;

    state.insert_product(
        company.id,
        "P001",
        "Site Survey",
        ProductKind::Service,
        Decimal::new(1_500_00, 2),
        "4100",
    )?;
    let bracket = state.insert_product(
        company.id,
        "P002",
        "Steel Bracket",
        ProductKind::Physical,
        Decimal::new(400_00, 2),
        "4000",
    )?;
    state.insert_product(
        company.id,
        "P003",
        "Copper Pipe",
        ProductKind::Physical,
        Decimal::new(450_00, 2),
        "4000",
    )?;

    // Opening stock arrives against equity, not a payable.
    let opening_date =
        NaiveDate::from_ymd_opt(2026, 6, 1).ok_or_else(|| AppError::Config("bad seed date".into()))?;
    khata_inventory::receive_stock_tx(
        state,
        company.id,
        bracket.id,
        warehouse.id,
        Decimal::from(100),
        Decimal::new(250_00, 2),
        Some("3000"),
        None,
        opening_date,
        "opening stock",
    )?;

    tx.commit();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seed_provisions_a_working_company() {
        let store = Store::new();
        seed_demo(&store).await.expect("seed");

        let (accounts, products, stock) = store
            .read(|state| {
                let company = state.company_by_code("1000").expect("company").clone();
                let accounts = state.accounts_for_company(company.id).len();
                let products = state.products_for_company(company.id).len();
                let stock = state.inventory_items_for_company(company.id).len();
                (accounts, products, stock)
            })
            .await;
        assert_eq!(accounts, 10);
        assert_eq!(products, 3);
        assert_eq!(stock, 1);
    }

    #[tokio::test]
    async fn seeding_twice_conflicts_on_company_code() {
        let store = Store::new();
        seed_demo(&store).await.expect("first seed");
        let err = seed_demo(&store).await.expect_err("duplicate seed");
        assert!(matches!(err, AppError::Persistence(_)));
    }
}
