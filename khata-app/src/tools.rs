//! The agent's tool registry: read tools wired to the domain services,
//! write tools registered as schema-only so the loop must surface them for
//! confirmation instead of executing them.

use std::sync::Arc;

use async_trait::async_trait;
use khata_agent::ReadToolHandler;
use khata_agent::ToolRegistry;
use khata_agent::ToolSpec;
use khata_inventory::InventoryService;
use khata_ledger::Ledger;
use khata_procure::PurchaseOrderService;
use khata_reporting::ReportingService;
use khata_store::Store;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;

pub fn build_registry(
    store: Store,
    ledger: Ledger,
    inventory: InventoryService,
    procurement: PurchaseOrderService,
    reporting: ReportingService,
    company_code: &str,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let company = company_code.to_string();

    registry.register_read(
        ToolSpec {
            name: "search_accounts".into(),
            description: "Search the chart of accounts by code or name fragment.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Code or name fragment; empty lists everything"}
                },
                "additionalProperties": false
            }),
        },
        Arc::new(SearchAccountsTool {
            store: store.clone(),
            company: company.clone(),
        }),
    );
    registry.register_read(
        ToolSpec {
            name: "get_account_balance".into(),
            description: "Base-currency balance (debits minus credits) of one account.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "account_code": {"type": "string"}
                },
                "required": ["account_code"],
                "additionalProperties": false
            }),
        },
        Arc::new(GetAccountBalanceTool {
            ledger: ledger.clone(),
            company: company.clone(),
        }),
    );
    registry.register_read(
        ToolSpec {
            name: "get_stock_levels".into(),
            description: "On-hand, reserved and available quantity per product and warehouse."
                .into(),
            input_schema: json!({"type": "object", "additionalProperties": false}),
        },
        Arc::new(GetStockLevelsTool {
            inventory: inventory.clone(),
            company: company.clone(),
        }),
    );
    registry.register_read(
        ToolSpec {
            name: "check_stock_availability".into(),
            description: "Whether a quantity of a product is available to promise.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "product_code": {"type": "string"},
                    "warehouse_code": {"type": "string"},
                    "quantity": {"type": "number"}
                },
                "required": ["product_code", "quantity"],
                "additionalProperties": false
            }),
        },
        Arc::new(CheckStockAvailabilityTool {
            inventory,
            company: company.clone(),
        }),
    );
    registry.register_read(
        ToolSpec {
            name: "get_pl_report".into(),
            description: "Profit and loss for one calendar month.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "year": {"type": "integer"},
                    "month": {"type": "integer"}
                },
                "required": ["year", "month"],
                "additionalProperties": false
            }),
        },
        Arc::new(GetPlReportTool {
            reporting,
            company: company.clone(),
        }),
    );
    registry.register_read(
        ToolSpec {
            name: "get_vendors".into(),
            description: "List known vendors.".into(),
            input_schema: json!({"type": "object", "additionalProperties": false}),
        },
        Arc::new(GetVendorsTool {
            store: store.clone(),
            company: company.clone(),
        }),
    );
    registry.register_read(
        ToolSpec {
            name: "search_products".into(),
            description: "Search products by code or name fragment.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"}
                },
                "additionalProperties": false
            }),
        },
        Arc::new(SearchProductsTool {
            store,
            company: company.clone(),
        }),
    );
    registry.register_read(
        ToolSpec {
            name: "list_purchase_orders".into(),
            description: "List purchase orders with status and totals.".into(),
            input_schema: json!({"type": "object", "additionalProperties": false}),
        },
        Arc::new(ListPurchaseOrdersTool {
            procurement,
            company,
        }),
    );

    for spec in write_tool_specs() {
        registry.register_write(spec);
    }
    registry
}

/// Stable JSON shapes; adapter forms are pre-populated from these schemas.
fn write_tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "create_purchase_order".into(),
            description: "Draft a purchase order to a vendor. Requires human confirmation."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "vendor_code": {"type": "string"},
                    "po_date": {"type": "string", "description": "YYYY-MM-DD"},
                    "notes": {"type": "string"},
                    "lines": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "product_code": {"type": "string"},
                                "description": {"type": "string"},
                                "quantity": {"type": "number"},
                                "unit_cost": {"type": "number"},
                                "expense_account_code": {"type": "string"}
                            },
                            "required": ["description", "quantity", "unit_cost"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["vendor_code", "po_date", "lines"],
                "additionalProperties": false
            }),
        },
        ToolSpec {
            name: "approve_po".into(),
            description: "Approve a draft purchase order, assigning its number.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "po_id": {"type": "integer"}
                },
                "required": ["po_id"],
                "additionalProperties": false
            }),
        },
        ToolSpec {
            name: "receive_po".into(),
            description: "Receive goods or services against an approved purchase order.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "po_id": {"type": "integer"},
                    "warehouse_code": {"type": "string"},
                    "lines": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "po_line_id": {"type": "integer"},
                                "qty_received": {"type": "number"}
                            },
                            "required": ["po_line_id", "qty_received"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["po_id", "lines"],
                "additionalProperties": false
            }),
        },
        ToolSpec {
            name: "record_vendor_invoice".into(),
            description: "Record the vendor's invoice against a received purchase order.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "po_id": {"type": "integer"},
                    "invoice_number": {"type": "string"},
                    "invoice_date": {"type": "string", "description": "YYYY-MM-DD"},
                    "invoice_amount": {"type": "number"}
                },
                "required": ["po_id", "invoice_number", "invoice_date", "invoice_amount"],
                "additionalProperties": false
            }),
        },
        ToolSpec {
            name: "pay_vendor".into(),
            description: "Pay the vendor for an invoiced purchase order.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "po_id": {"type": "integer"},
                    "bank_account_code": {"type": "string"},
                    "payment_date": {"type": "string", "description": "YYYY-MM-DD"}
                },
                "required": ["po_id", "payment_date"],
                "additionalProperties": false
            }),
        },
    ]
}

fn parse<T: for<'de> Deserialize<'de>>(arguments: Value) -> Result<T, String> {
    serde_json::from_value(arguments).map_err(|err| format!("invalid arguments: {err}"))
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    #[serde(default)]
    query: Option<String>,
}

struct SearchAccountsTool {
    store: Store,
    company: String,
}

#[async_trait]
impl ReadToolHandler for SearchAccountsTool {
    async fn handle(&self, arguments: Value) -> Result<String, String> {
        let args: SearchArgs = parse(arguments)?;
        let company = self.company.clone();
        let needle = args.query.unwrap_or_default().to_lowercase();
        self.store
            .read(move |state| {
                let company_id = state
                    .company_by_code(&company)
                    .map_err(|err| err.to_string())?
                    .id;
                let accounts: Vec<Value> = state
                    .accounts_for_company(company_id)
                    .into_iter()
                    .filter(|a| {
                        needle.is_empty()
                            || a.code.to_lowercase().contains(&needle)
                            || a.name.to_lowercase().contains(&needle)
                    })
                    .map(|a| {
                        json!({
                            "code": a.code,
                            "name": a.name,
                            "type": a.account_type.to_string(),
                        })
                    })
                    .collect();
                Ok(json!({"accounts": accounts}).to_string())
            })
            .await
    }
}

#[derive(Debug, Deserialize)]
struct AccountBalanceArgs {
    account_code: String,
}

struct GetAccountBalanceTool {
    ledger: Ledger,
    company: String,
}

#[async_trait]
impl ReadToolHandler for GetAccountBalanceTool {
    async fn handle(&self, arguments: Value) -> Result<String, String> {
        let args: AccountBalanceArgs = parse(arguments)?;
        let balances = self
            .ledger
            .balances(&self.company)
            .await
            .map_err(|err| err.to_string())?;
        let found = balances
            .into_iter()
            .find(|b| b.account_code == args.account_code)
            .ok_or_else(|| format!("account {} not found", args.account_code))?;
        Ok(json!({
            "account_code": found.account_code,
            "name": found.name,
            "balance": found.balance,
        })
        .to_string())
    }
}

struct GetStockLevelsTool {
    inventory: InventoryService,
    company: String,
}

#[async_trait]
impl ReadToolHandler for GetStockLevelsTool {
    async fn handle(&self, _arguments: Value) -> Result<String, String> {
        let levels = self
            .inventory
            .stock_levels(&self.company)
            .await
            .map_err(|err| err.to_string())?;
        let rows: Vec<Value> = levels
            .into_iter()
            .map(|level| {
                json!({
                    "product_code": level.product_code,
                    "warehouse_code": level.warehouse_code,
                    "qty_on_hand": level.qty_on_hand,
                    "qty_reserved": level.qty_reserved,
                    "qty_available": level.qty_available,
                    "unit_cost": level.unit_cost,
                })
            })
            .collect();
        Ok(json!({"stock": rows}).to_string())
    }
}

#[derive(Debug, Deserialize)]
struct AvailabilityArgs {
    product_code: String,
    #[serde(default)]
    warehouse_code: Option<String>,
    quantity: Decimal,
}

struct CheckStockAvailabilityTool {
    inventory: InventoryService,
    company: String,
}

#[async_trait]
impl ReadToolHandler for CheckStockAvailabilityTool {
    async fn handle(&self, arguments: Value) -> Result<String, String> {
        let args: AvailabilityArgs = parse(arguments)?;
        let warehouse = args.warehouse_code.as_deref().unwrap_or("MAIN");
        let available = self
            .inventory
            .check_availability(&self.company, &args.product_code, warehouse, args.quantity)
            .await
            .map_err(|err| err.to_string())?;
        Ok(json!({
            "product_code": args.product_code,
            "warehouse_code": warehouse,
            "quantity": args.quantity,
            "available": available,
        })
        .to_string())
    }
}

#[derive(Debug, Deserialize)]
struct PlArgs {
    year: i32,
    month: u32,
}

struct GetPlReportTool {
    reporting: ReportingService,
    company: String,
}

#[async_trait]
impl ReadToolHandler for GetPlReportTool {
    async fn handle(&self, arguments: Value) -> Result<String, String> {
        let args: PlArgs = parse(arguments)?;
        if !(1..=12).contains(&args.month) {
            return Err(format!("month must be 1-12, got {}", args.month));
        }
        let pl = self
            .reporting
            .profit_and_loss(&self.company, args.year, args.month)
            .await
            .map_err(|err| err.to_string())?;
        Ok(json!({
            "year": pl.year,
            "month": pl.month,
            "total_revenue": pl.total_revenue,
            "total_expense": pl.total_expense,
            "net_income": pl.net_income,
        })
        .to_string())
    }
}

struct GetVendorsTool {
    store: Store,
    company: String,
}

#[async_trait]
impl ReadToolHandler for GetVendorsTool {
    async fn handle(&self, _arguments: Value) -> Result<String, String> {
        let company = self.company.clone();
        self.store
            .read(move |state| {
                let company_id = state
                    .company_by_code(&company)
                    .map_err(|err| err.to_string())?
                    .id;
                let vendors: Vec<Value> = state
                    .vendors_for_company(company_id)
                    .into_iter()
                    .map(|v| json!({"code": v.code, "name": v.name}))
                    .collect();
                Ok(json!({"vendors": vendors}).to_string())
            })
            .await
    }
}

struct SearchProductsTool {
    store: Store,
    company: String,
}

#[async_trait]
impl ReadToolHandler for SearchProductsTool {
    async fn handle(&self, arguments: Value) -> Result<String, String> {
        let args: SearchArgs = parse(arguments)?;
        let company = self.company.clone();
        let needle = args.query.unwrap_or_default().to_lowercase();
        self.store
            .read(move |state| {
                let company_id = state
                    .company_by_code(&company)
                    .map_err(|err| err.to_string())?
                    .id;
                let products: Vec<Value> = state
                    .products_for_company(company_id)
                    .into_iter()
                    .filter(|p| {
                        needle.is_empty()
                            || p.code.to_lowercase().contains(&needle)
                            || p.name.to_lowercase().contains(&needle)
                    })
                    .map(|p| {
                        json!({
                            "code": p.code,
                            "name": p.name,
                            "unit_price": p.unit_price,
                        })
                    })
                    .collect();
                Ok(json!({"products": products}).to_string())
            })
            .await
    }
}

struct ListPurchaseOrdersTool {
    procurement: PurchaseOrderService,
    company: String,
}

#[async_trait]
impl ReadToolHandler for ListPurchaseOrdersTool {
    async fn handle(&self, _arguments: Value) -> Result<String, String> {
        let pos = self
            .procurement
            .list_pos(&self.company)
            .await
            .map_err(|err| err.to_string())?;
        let rows: Vec<Value> = pos
            .into_iter()
            .map(|po| {
                json!({
                    "po_id": po.id,
                    "po_number": po.po_number,
                    "status": po.status.to_string(),
                    "total_base": po.total_base,
                })
            })
            .collect();
        Ok(json!({"purchase_orders": rows}).to_string())
    }
}
