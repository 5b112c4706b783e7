#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Application service: the single interface adapters talk to.
//!
//! Composes every domain service over one store, runs the agent loop, parks
//! proposed write actions for human confirmation and dispatches confirmed
//! ones to the owning service.

use std::sync::Arc;

use chrono::NaiveDate;
use chrono::Utc;
use khata_agent::AgentError;
use khata_agent::AgentLoop;
use khata_agent::AgentOutcome;
use khata_agent::ImageAttachment;
use khata_agent::LlmClient;
use khata_agent::LlmError;
use khata_agent::LlmReply;
use khata_agent::LlmRequest;
use khata_agent::ToolRegistry;
use khata_agent::Turn;
use khata_inventory::InventoryError;
use khata_inventory::InventoryService;
use khata_ledger::CommitOutcome;
use khata_ledger::Ledger;
use khata_ledger::LedgerError;
use khata_ledger::Proposal;
use khata_ledger::ProposalLine;
use khata_orders::OrderError;
use khata_orders::OrderService;
use khata_procure::CreatePoRequest;
use khata_procure::NewPoLine;
use khata_procure::PoReceiptLine;
use khata_procure::ProcureError;
use khata_procure::PurchaseOrderService;
use khata_procure::Warning;
use khata_reporting::ReportingError;
use khata_reporting::ReportingService;
use khata_rules::RuleEngine;
use khata_rules::RulesError;
use khata_store::Store;
use khata_store::StoreError;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod config;
pub mod demo;
mod pending;
mod tools;

pub use config::Config;
pub use config::ConfigError;
pub use pending::PROPOSAL_TTL_MINUTES;
pub use pending::PendingAction;
pub use pending::PendingActionStore;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Orders(#[from] OrderError),
    #[error(transparent)]
    Procure(#[from] ProcureError),
    #[error(transparent)]
    Inventory(#[from] InventoryError),
    #[error(transparent)]
    Reporting(#[from] ReportingError),
    #[error(transparent)]
    Rules(#[from] RulesError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error("no pending proposal {0}")]
    UnknownProposal(String),
    #[error("proposal has expired")]
    ExpiredProposal,
    #[error("unknown write tool {0}")]
    UnknownTool(String),
    #[error("invalid tool arguments: {0}")]
    InvalidArgs(String),
    #[error("llm output not usable: {0}")]
    LlmMalformed(String),
    #[error("proposal rejected: {0}")]
    ProposalRejected(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::Persistence(format!("not found: {what}")),
            StoreError::Conflict(what) => AppError::Persistence(what),
        }
    }
}

/// What `ask` hands back to the adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum AskOutcome {
    Answer { text: String },
    Clarification { question: String },
    /// A write action awaiting confirmation through `execute_pending`.
    PendingAction(PendingAction),
    /// A validated journal-entry proposal awaiting confirmation through
    /// `commit_proposal`.
    JournalProposal(Proposal),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub summary: String,
    pub warnings: Vec<Warning>,
}

pub struct ApplicationService {
    store: Store,
    ledger: Ledger,
    rules: RuleEngine,
    inventory: InventoryService,
    orders: OrderService,
    procurement: PurchaseOrderService,
    reporting: ReportingService,
    agent: AgentLoop,
    registry: ToolRegistry,
    pending: Arc<PendingActionStore>,
    llm: Arc<dyn LlmClient>,
    company_code: String,
}

impl ApplicationService {
    /// Builds the service graph over one store for a known company.
    pub fn new(store: Store, llm: Arc<dyn LlmClient>, company_code: &str) -> Self {
        let ledger = Ledger::new(store.clone());
        let inventory = InventoryService::new(store.clone());
        let procurement = PurchaseOrderService::new(store.clone());
        let reporting = ReportingService::new(store.clone());
        let registry = tools::build_registry(
            store.clone(),
            ledger.clone(),
            inventory.clone(),
            procurement.clone(),
            reporting.clone(),
            company_code,
        );
        Self {
            ledger,
            rules: RuleEngine::new(store.clone()),
            inventory,
            orders: OrderService::new(store.clone()),
            procurement,
            reporting,
            agent: AgentLoop::new(llm.clone()),
            registry,
            pending: PendingActionStore::shared(),
            llm,
            company_code: company_code.to_string(),
            store,
        }
    }

    /// Company selection per deployment contract: an explicit `COMPANY_CODE`
    /// wins; otherwise a single-company store auto-selects, and anything
    /// else is a configuration error.
    pub async fn from_config(
        store: Store,
        llm: Arc<dyn LlmClient>,
        config: &Config,
    ) -> AppResult<Self> {
        let codes: Vec<String> = store
            .read(|state| state.companies().iter().map(|c| c.code.clone()).collect())
            .await;
        let company_code = match &config.company_code {
            Some(code) => {
                if !codes.iter().any(|c| c == code) {
                    return Err(AppError::Config(format!("company {code} does not exist")));
                }
                code.clone()
            }
            None => match codes.as_slice() {
                [only] => only.clone(),
                [] => return Err(AppError::Config("no companies provisioned".into())),
                _ => {
                    return Err(AppError::Config(
                        "COMPANY_CODE is required when multiple companies exist".into(),
                    ));
                }
            },
        };
        Ok(Self::new(store, llm, &company_code))
    }

    /// Starts the pending-store sweeper; stops with the given token.
    pub fn spawn_housekeeping(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.pending.spawn_sweeper(cancel)
    }

    #[must_use]
    pub fn company_code(&self) -> &str {
        &self.company_code
    }

    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    #[must_use]
    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    #[must_use]
    pub fn inventory(&self) -> &InventoryService {
        &self.inventory
    }

    #[must_use]
    pub fn orders(&self) -> &OrderService {
        &self.orders
    }

    #[must_use]
    pub fn procurement(&self) -> &PurchaseOrderService {
        &self.procurement
    }

    #[must_use]
    pub fn reporting(&self) -> &ReportingService {
        &self.reporting
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Runs the agent loop over a natural-language request. Nothing is
    /// written: write intents come back as pending actions or validated
    /// journal proposals for a human to confirm.
    pub async fn ask(
        &self,
        text: &str,
        images: Vec<ImageAttachment>,
        cancel: &CancellationToken,
    ) -> AppResult<AskOutcome> {
        let system_prompt = format!(
            "You are the accounting assistant for company {}. Use the read \
             tools to look things up; propose write tools for any change. \
             Route free-form business events to route_to_journal_entry.",
            self.company_code
        );
        let outcome = self
            .agent
            .run(&self.registry, &system_prompt, text, images, cancel)
            .await?;

        match outcome {
            AgentOutcome::Answer { text } => Ok(AskOutcome::Answer { text }),
            AgentOutcome::Clarification { question } => {
                Ok(AskOutcome::Clarification { question })
            }
            AgentOutcome::ProposedAction {
                tool_name,
                tool_args,
            } => {
                let action = self.pending.park(tool_name, tool_args).await;
                info!(id = %action.id, tool = %action.tool_name, "write action parked");
                Ok(AskOutcome::PendingAction(action))
            }
            AgentOutcome::JournalEntryEvent { description } => {
                let proposal = self
                    .propose_journal_entry(&description, Utc::now().date_naive(), cancel)
                    .await?;
                Ok(AskOutcome::JournalProposal(proposal))
            }
        }
    }

    /// Confirms a parked write action and dispatches it to the owning
    /// domain service. Expired or unknown tokens never execute.
    pub async fn execute_pending(
        &self,
        proposal_id: &str,
        cancel: &CancellationToken,
    ) -> AppResult<ExecutionOutcome> {
        let action = self.pending.take(proposal_id).await.map_err(|err| match err {
            pending::TakeError::NotFound => AppError::UnknownProposal(proposal_id.to_string()),
            pending::TakeError::Expired => AppError::ExpiredProposal,
        })?;
        info!(id = %action.id, tool = %action.tool_name, "executing confirmed action");
        self.dispatch(&action.tool_name, action.tool_args, cancel)
            .await
    }

    async fn dispatch(
        &self,
        tool_name: &str,
        args: serde_json::Value,
        cancel: &CancellationToken,
    ) -> AppResult<ExecutionOutcome> {
        match tool_name {
            "create_purchase_order" => {
                let args: CreatePurchaseOrderArgs = parse_args(args)?;
                let request = CreatePoRequest {
                    company_code: self.company_code.clone(),
                    vendor_code: args.vendor_code,
                    po_date: args.po_date,
                    currency: None,
                    exchange_rate: None,
                    notes: args.notes.unwrap_or_default(),
                    lines: args
                        .lines
                        .into_iter()
                        .map(|line| NewPoLine {
                            product_code: line.product_code,
                            description: line.description,
                            quantity: line.quantity,
                            unit_cost: line.unit_cost,
                            expense_account_code: line.expense_account_code,
                        })
                        .collect(),
                };
                let po_id = self.procurement.create_po(request, cancel).await?;
                Ok(ExecutionOutcome {
                    summary: format!("created purchase order {po_id} in DRAFT"),
                    warnings: Vec::new(),
                })
            }
            "approve_po" => {
                let args: PoIdArgs = parse_args(args)?;
                let number = self.procurement.approve_po(args.po_id, cancel).await?;
                Ok(ExecutionOutcome {
                    summary: format!("approved purchase order {number}"),
                    warnings: Vec::new(),
                })
            }
            "receive_po" => {
                let args: ReceivePoArgs = parse_args(args)?;
                let lines: Vec<PoReceiptLine> = args
                    .lines
                    .iter()
                    .map(|line| PoReceiptLine {
                        po_line_id: line.po_line_id,
                        qty_received: line.qty_received,
                    })
                    .collect();
                self.procurement
                    .receive_po(
                        args.po_id,
                        args.warehouse_code.as_deref(),
                        &lines,
                        Utc::now().date_naive(),
                        cancel,
                    )
                    .await?;
                Ok(ExecutionOutcome {
                    summary: format!("received purchase order {}", args.po_id),
                    warnings: Vec::new(),
                })
            }
            "record_vendor_invoice" => {
                let args: RecordVendorInvoiceArgs = parse_args(args)?;
                let record = self
                    .procurement
                    .record_vendor_invoice(
                        args.po_id,
                        &args.invoice_number,
                        args.invoice_date,
                        args.invoice_amount,
                        cancel,
                    )
                    .await?;
                Ok(ExecutionOutcome {
                    summary: format!("recorded vendor invoice {}", record.pi_document_number),
                    warnings: record.warnings,
                })
            }
            "pay_vendor" => {
                let args: PayVendorArgs = parse_args(args)?;
                self.procurement
                    .pay_vendor(
                        args.po_id,
                        args.bank_account_code.as_deref(),
                        args.payment_date,
                        cancel,
                    )
                    .await?;
                Ok(ExecutionOutcome {
                    summary: format!("paid vendor for purchase order {}", args.po_id),
                    warnings: Vec::new(),
                })
            }
            other => Err(AppError::UnknownTool(other.to_string())),
        }
    }

    /// Asks the model for a structured journal entry for a business event,
    /// then validates it against the full ledger invariants. The proposal is
    /// returned for confirmation, never committed here.
    pub async fn propose_journal_entry(
        &self,
        event_description: &str,
        as_of: NaiveDate,
        cancel: &CancellationToken,
    ) -> AppResult<Proposal> {
        let chart = self
            .store
            .read({
                let company = self.company_code.clone();
                move |state| {
                    let company_id = state.company_by_code(&company)?.id;
                    Ok::<_, StoreError>(
                        state
                            .accounts_for_company(company_id)
                            .into_iter()
                            .map(|a| format!("{} - {} ({})", a.code, a.name, a.account_type))
                            .collect::<Vec<_>>()
                            .join("\n"),
                    )
                }
            })
            .await?;

        let system_prompt = "You are an expert accountant. Suggest balanced double-entry \
             journal entries. Return ONLY valid JSON matching the requested schema."
            .to_string();
        let user_prompt = format!(
            "Business event:\n{event_description}\n\n\
             Available accounts:\n{chart}\n\n\
             Return ONLY valid JSON:\n\
             {{\n\
               \"narration\": \"string\",\n\
               \"confidence\": number (0.0-1.0),\n\
               \"reasoning\": \"string\",\n\
               \"lines\": [\n\
                 {{\"account_code\": \"string\", \"is_debit\": true, \"amount\": number}}\n\
               ]\n\
             }}"
        );

        let request = LlmRequest {
            system_prompt,
            turns: vec![Turn::User(user_prompt)],
            tool_catalog: Vec::new(),
            images: Vec::new(),
        };

        // One retry on malformed output, same contract as the loop.
        let mut last_err = String::new();
        for _ in 0..2 {
            if cancel.is_cancelled() {
                return Err(AppError::Agent(AgentError::Cancelled));
            }
            let reply = match self.llm.complete(request.clone()).await {
                Ok(reply) => reply,
                Err(LlmError::Malformed(detail)) => {
                    last_err = detail;
                    continue;
                }
                Err(LlmError::Transport(detail)) => {
                    return Err(AppError::Agent(AgentError::Llm(detail)));
                }
            };
            let text = match reply {
                LlmReply::Text(text) => text,
                LlmReply::ToolCall { .. } => {
                    last_err = "expected text, got a tool call".into();
                    continue;
                }
            };
            match serde_json::from_str::<JournalSuggestion>(&text) {
                Ok(suggestion) => {
                    let proposal = self.build_proposal(suggestion, as_of).await?;
                    self.ledger.validate(&proposal).await?;
                    return Ok(proposal);
                }
                Err(err) => {
                    last_err = err.to_string();
                }
            }
        }
        Err(AppError::LlmMalformed(last_err))
    }

    async fn build_proposal(
        &self,
        suggestion: JournalSuggestion,
        as_of: NaiveDate,
    ) -> AppResult<Proposal> {
        if suggestion.confidence < 0.5 {
            return Err(AppError::ProposalRejected(format!(
                "confidence too low: {}",
                suggestion.confidence
            )));
        }
        let base_currency = self
            .store
            .read({
                let company = self.company_code.clone();
                move |state| {
                    state
                        .company_by_code(&company)
                        .map(|c| c.base_currency.clone())
                }
            })
            .await?;
        Ok(Proposal {
            company_code: self.company_code.clone(),
            document_type_code: "JE".into(),
            posting_date: as_of,
            document_date: as_of,
            narration: suggestion.narration,
            reasoning: Some(suggestion.reasoning),
            confidence: Some(suggestion.confidence),
            transaction_currency: suggestion
                .transaction_currency
                .unwrap_or(base_currency),
            exchange_rate: suggestion.exchange_rate.unwrap_or(Decimal::ONE),
            reference_type: None,
            reference_id: None,
            idempotency_key: None,
            created_by: "agent".into(),
            lines: suggestion
                .lines
                .into_iter()
                .map(|line| ProposalLine {
                    account_code: line.account_code,
                    is_debit: line.is_debit,
                    amount: line.amount,
                })
                .collect(),
        })
    }

    /// Commits a human-confirmed journal proposal.
    pub async fn commit_proposal(
        &self,
        proposal: &Proposal,
        cancel: &CancellationToken,
    ) -> AppResult<CommitOutcome> {
        Ok(self.ledger.commit(proposal, cancel).await?)
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(args: serde_json::Value) -> AppResult<T> {
    serde_json::from_value(args).map_err(|err| AppError::InvalidArgs(err.to_string()))
}

#[derive(Debug, Deserialize)]
struct CreatePoLineArgs {
    #[serde(default)]
    product_code: Option<String>,
    description: String,
    quantity: Decimal,
    unit_cost: Decimal,
    #[serde(default)]
    expense_account_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatePurchaseOrderArgs {
    vendor_code: String,
    po_date: NaiveDate,
    #[serde(default)]
    notes: Option<String>,
    lines: Vec<CreatePoLineArgs>,
}

#[derive(Debug, Deserialize)]
struct PoIdArgs {
    po_id: i64,
}

#[derive(Debug, Deserialize)]
struct ReceivePoLineArgs {
    po_line_id: i64,
    qty_received: Decimal,
}

#[derive(Debug, Deserialize)]
struct ReceivePoArgs {
    po_id: i64,
    #[serde(default)]
    warehouse_code: Option<String>,
    lines: Vec<ReceivePoLineArgs>,
}

#[derive(Debug, Deserialize)]
struct RecordVendorInvoiceArgs {
    po_id: i64,
    invoice_number: String,
    invoice_date: NaiveDate,
    invoice_amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct PayVendorArgs {
    po_id: i64,
    #[serde(default)]
    bank_account_code: Option<String>,
    payment_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct SuggestedJournalLine {
    account_code: String,
    is_debit: bool,
    amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct JournalSuggestion {
    narration: String,
    confidence: f32,
    reasoning: String,
    #[serde(default)]
    transaction_currency: Option<String>,
    #[serde(default)]
    exchange_rate: Option<Decimal>,
    lines: Vec<SuggestedJournalLine>,
}

#[cfg(test)]
mod tests {
    use khata_agent::testing::ScriptedLlm;
    use pretty_assertions::assert_eq;

    use super::*;

    fn scripted(replies: Vec<LlmReply>) -> Arc<ScriptedLlm> {
        Arc::new(ScriptedLlm::new(replies))
    }

    #[tokio::test]
    async fn from_config_auto_selects_a_single_company() {
        let store = Store::new();
        demo::seed_demo(&store).await.expect("seed");
        let service = ApplicationService::from_config(
            store,
            scripted(Vec::new()),
            &Config::default(),
        )
        .await
        .expect("service");
        assert_eq!(service.company_code(), "1000");
    }

    #[tokio::test]
    async fn from_config_requires_company_code_with_many_companies() {
        let store = Store::new();
        demo::seed_demo(&store).await.expect("seed");
        {
            let mut tx = store.begin().await;
            tx.state_mut()
                .insert_company("2000", "Second Co", "USD")
                .expect("company");
            tx.commit();
        }

        let result = ApplicationService::from_config(
            store.clone(),
            scripted(Vec::new()),
            &Config::default(),
        )
        .await;
        assert!(matches!(result, Err(AppError::Config(_))));

        let config = Config {
            company_code: Some("2000".into()),
            ..Config::default()
        };
        let service = ApplicationService::from_config(store, scripted(Vec::new()), &config)
            .await
            .expect("explicit code");
        assert_eq!(service.company_code(), "2000");
    }

    #[tokio::test]
    async fn unknown_pending_id_does_not_execute() {
        let store = Store::new();
        demo::seed_demo(&store).await.expect("seed");
        let service = ApplicationService::new(store, scripted(Vec::new()), "1000");
        let err = service
            .execute_pending("not-a-real-id", &CancellationToken::new())
            .await
            .expect_err("unknown id");
        assert!(matches!(err, AppError::UnknownProposal(_)));
    }

    #[tokio::test]
    async fn low_confidence_journal_suggestion_is_rejected() {
        let store = Store::new();
        demo::seed_demo(&store).await.expect("seed");
        let reply = LlmReply::Text(
            serde_json::json!({
                "narration": "Paid rent",
                "confidence": 0.2,
                "reasoning": "guesswork",
                "lines": [
                    {"account_code": "6100", "is_debit": true, "amount": 100},
                    {"account_code": "1100", "is_debit": false, "amount": 100}
                ]
            })
            .to_string(),
        );
        let service = ApplicationService::new(store, scripted(vec![reply]), "1000");
        let err = service
            .propose_journal_entry(
                "paid rent",
                NaiveDate::from_ymd_opt(2026, 7, 1).expect("date"),
                &CancellationToken::new(),
            )
            .await
            .expect_err("low confidence");
        assert!(matches!(err, AppError::ProposalRejected(_)));
    }
}
