#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Bounded tool-calling orchestration around an external LLM.
//!
//! The model is an opaque text-in / structured-out oracle behind
//! [`LlmClient`]. Read tools execute autonomously inside the loop; a write
//! tool terminates the loop and surfaces a [`AgentOutcome::ProposedAction`]
//! for human confirmation - the loop itself never mutates anything.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

pub mod testing;

/// Rounds before the loop gives up and answers with whatever it has.
pub const MAX_ROUNDS: usize = 5;

pub const META_REQUEST_CLARIFICATION: &str = "request_clarification";
pub const META_ROUTE_TO_JOURNAL_ENTRY: &str = "route_to_journal_entry";

pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("llm transport failure: {0}")]
    Llm(String),
    #[error("tool handler failure: {0}")]
    Handler(String),
    #[error("operation cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Output that does not conform to the structured schema. The loop
    /// retries once per round before degrading to a plain answer.
    #[error("malformed llm output: {0}")]
    Malformed(String),
    #[error("llm transport failure: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub media_type: String,
    pub data: Vec<u8>,
}

/// One turn of the accumulated conversation the model sees each round.
#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    User(String),
    Assistant(String),
    ToolCall { name: String, arguments: Value },
    ToolResult { name: String, content: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub turns: Vec<Turn>,
    pub tool_catalog: Vec<ToolSpec>,
    pub images: Vec<ImageAttachment>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LlmReply {
    Text(String),
    ToolCall { name: String, arguments: Value },
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<LlmReply, LlmError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema for the arguments object.
    pub input_schema: Value,
}

#[async_trait]
pub trait ReadToolHandler: Send + Sync {
    /// Executes the tool and returns its JSON result as a string.
    async fn handle(&self, arguments: Value) -> Result<String, String>;
}

enum RegisteredTool {
    Read {
        spec: ToolSpec,
        handler: Arc<dyn ReadToolHandler>,
    },
    /// No handler on purpose: producing a call to one of these terminates
    /// the loop with a proposed action for a human to confirm.
    Write { spec: ToolSpec },
}

impl RegisteredTool {
    fn spec(&self) -> &ToolSpec {
        match self {
            RegisteredTool::Read { spec, .. } | RegisteredTool::Write { spec } => spec,
        }
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_read(&mut self, spec: ToolSpec, handler: Arc<dyn ReadToolHandler>) {
        self.tools
            .insert(spec.name.clone(), RegisteredTool::Read { spec, handler });
    }

    pub fn register_write(&mut self, spec: ToolSpec) {
        self.tools
            .insert(spec.name.clone(), RegisteredTool::Write { spec });
    }

    #[must_use]
    pub fn is_write_tool(&self, name: &str) -> bool {
        matches!(self.tools.get(name), Some(RegisteredTool::Write { .. }))
    }

    /// The catalog handed to the model: registered tools plus the two meta
    /// tools every conversation carries.
    #[must_use]
    pub fn catalog(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec().clone()).collect();
        specs.push(ToolSpec {
            name: META_REQUEST_CLARIFICATION.into(),
            description: "Ask the user one clarifying question when the request is ambiguous."
                .into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "question": {"type": "string"}
                },
                "required": ["question"],
                "additionalProperties": false
            }),
        });
        specs.push(ToolSpec {
            name: META_ROUTE_TO_JOURNAL_ENTRY.into(),
            description: "Route a described business event to the journal-entry proposal flow."
                .into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "event_description": {"type": "string"}
                },
                "required": ["event_description"],
                "additionalProperties": false
            }),
        });
        specs
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutcome {
    Answer { text: String },
    /// A write tool was called; nothing was executed.
    ProposedAction { tool_name: String, tool_args: Value },
    Clarification { question: String },
    JournalEntryEvent { description: String },
}

#[derive(Debug, Deserialize)]
struct ClarificationArgs {
    question: String,
}

#[derive(Debug, Deserialize)]
struct RouteArgs {
    event_description: String,
}

pub struct AgentLoop {
    llm: Arc<dyn LlmClient>,
}

impl AgentLoop {
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Runs up to [`MAX_ROUNDS`] rounds against the model. Terminal events:
    /// plain text, a write-tool call, either meta tool, cancellation, or
    /// round exhaustion.
    pub async fn run(
        &self,
        registry: &ToolRegistry,
        system_prompt: &str,
        user_text: &str,
        images: Vec<ImageAttachment>,
        cancel: &CancellationToken,
    ) -> AgentResult<AgentOutcome> {
        let catalog = registry.catalog();
        let mut turns = vec![Turn::User(user_text.to_string())];

        for round in 0..MAX_ROUNDS {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            let request = LlmRequest {
                system_prompt: system_prompt.to_string(),
                turns: turns.clone(),
                tool_catalog: catalog.clone(),
                images: images.clone(),
            };
            let reply = match self.complete_with_retry(request, cancel).await? {
                Some(reply) => reply,
                // Malformed twice: degrade to a generic answer.
                None => {
                    warn!(round, "llm output stayed malformed after retry");
                    return Ok(AgentOutcome::Answer {
                        text: "I could not complete that request; please rephrase it.".into(),
                    });
                }
            };

            match reply {
                LlmReply::Text(text) => {
                    return Ok(AgentOutcome::Answer { text });
                }
                LlmReply::ToolCall { name, arguments } => {
                    debug!(round, tool = %name, "model called tool");
                    if name == META_REQUEST_CLARIFICATION {
                        let args: ClarificationArgs = parse_args(&arguments)?;
                        return Ok(AgentOutcome::Clarification {
                            question: args.question,
                        });
                    }
                    if name == META_ROUTE_TO_JOURNAL_ENTRY {
                        let args: RouteArgs = parse_args(&arguments)?;
                        return Ok(AgentOutcome::JournalEntryEvent {
                            description: args.event_description,
                        });
                    }

                    match registry.tools.get(&name) {
                        Some(RegisteredTool::Write { .. }) => {
                            return Ok(AgentOutcome::ProposedAction {
                                tool_name: name,
                                tool_args: arguments,
                            });
                        }
                        Some(RegisteredTool::Read { handler, .. }) => {
                            let content = tokio::select! {
                                () = cancel.cancelled() => return Err(AgentError::Cancelled),
                                result = handler.handle(arguments.clone()) => match result {
                                    Ok(content) => content,
                                    Err(message) => format!("{{\"error\": {}}}",
                                        Value::String(message)),
                                },
                            };
                            turns.push(Turn::ToolCall {
                                name: name.clone(),
                                arguments,
                            });
                            turns.push(Turn::ToolResult { name, content });
                        }
                        None => {
                            // Let the model recover from hallucinated names.
                            turns.push(Turn::ToolCall {
                                name: name.clone(),
                                arguments,
                            });
                            turns.push(Turn::ToolResult {
                                name: name.clone(),
                                content: format!("{{\"error\": \"unknown tool {name}\"}}"),
                            });
                        }
                    }
                }
            }
        }

        Ok(AgentOutcome::Answer {
            text: "I ran out of steps before finishing; please try again.".into(),
        })
    }

    /// One retry on malformed output, as the structured-response contract
    /// allows. `Ok(None)` means the model stayed malformed.
    async fn complete_with_retry(
        &self,
        request: LlmRequest,
        cancel: &CancellationToken,
    ) -> AgentResult<Option<LlmReply>> {
        for attempt in 0..2 {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            let reply = tokio::select! {
                () = cancel.cancelled() => return Err(AgentError::Cancelled),
                reply = self.llm.complete(request.clone()) => reply,
            };
            match reply {
                Ok(reply) => return Ok(Some(reply)),
                Err(LlmError::Malformed(detail)) => {
                    warn!(attempt, %detail, "malformed llm output");
                }
                Err(LlmError::Transport(detail)) => return Err(AgentError::Llm(detail)),
            }
        }
        Ok(None)
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(arguments: &Value) -> AgentResult<T> {
    serde_json::from_value(arguments.clone())
        .map_err(|err| AgentError::Handler(format!("invalid meta-tool arguments: {err}")))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::testing::ScriptedLlm;
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl ReadToolHandler for EchoTool {
        async fn handle(&self, arguments: Value) -> Result<String, String> {
            Ok(json!({"echo": arguments}).to_string())
        }
    }

    fn spec(name: &str) -> ToolSpec {
        ToolSpec {
            name: name.into(),
            description: format!("{name} test tool"),
            input_schema: json!({"type": "object"}),
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register_read(spec("search_vendors"), Arc::new(EchoTool));
        registry.register_write(spec("create_purchase_order"));
        registry
    }

    #[tokio::test]
    async fn plain_text_reply_is_an_answer() {
        let llm = Arc::new(ScriptedLlm::new(vec![LlmReply::Text(
            "Your AR balance is 2,300".into(),
        )]));
        let agent = AgentLoop::new(llm);
        let outcome = agent
            .run(
                &registry(),
                "you are an accountant",
                "what is my AR balance?",
                Vec::new(),
                &CancellationToken::new(),
            )
            .await
            .expect("run");
        assert_eq!(
            outcome,
            AgentOutcome::Answer {
                text: "Your AR balance is 2,300".into()
            }
        );
    }

    #[tokio::test]
    async fn read_tool_result_feeds_the_next_round() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            LlmReply::ToolCall {
                name: "search_vendors".into(),
                arguments: json!({"query": "V001"}),
            },
            LlmReply::Text("found it".into()),
        ]));
        let agent = AgentLoop::new(llm.clone());
        let outcome = agent
            .run(
                &registry(),
                "sys",
                "find vendor V001",
                Vec::new(),
                &CancellationToken::new(),
            )
            .await
            .expect("run");
        assert_eq!(outcome, AgentOutcome::Answer { text: "found it".into() });

        // The second request must have carried the tool call and result.
        let requests = llm.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].turns.len(), 3);
        assert!(matches!(requests[1].turns[1], Turn::ToolCall { .. }));
        assert!(matches!(requests[1].turns[2], Turn::ToolResult { .. }));
    }

    #[tokio::test]
    async fn write_tool_terminates_without_execution() {
        let llm = Arc::new(ScriptedLlm::new(vec![LlmReply::ToolCall {
            name: "create_purchase_order".into(),
            arguments: json!({"vendor_code": "V001"}),
        }]));
        let agent = AgentLoop::new(llm);
        let outcome = agent
            .run(
                &registry(),
                "sys",
                "order 50 pipes",
                Vec::new(),
                &CancellationToken::new(),
            )
            .await
            .expect("run");
        assert_eq!(
            outcome,
            AgentOutcome::ProposedAction {
                tool_name: "create_purchase_order".into(),
                tool_args: json!({"vendor_code": "V001"}),
            }
        );
    }

    #[tokio::test]
    async fn meta_tools_terminate_with_their_outcomes() {
        let llm = Arc::new(ScriptedLlm::new(vec![LlmReply::ToolCall {
            name: META_REQUEST_CLARIFICATION.into(),
            arguments: json!({"question": "Which warehouse?"}),
        }]));
        let agent = AgentLoop::new(llm);
        let outcome = agent
            .run(&registry(), "sys", "receive the PO", Vec::new(), &CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(
            outcome,
            AgentOutcome::Clarification {
                question: "Which warehouse?".into()
            }
        );

        let llm = Arc::new(ScriptedLlm::new(vec![LlmReply::ToolCall {
            name: META_ROUTE_TO_JOURNAL_ENTRY.into(),
            arguments: json!({"event_description": "paid rent 15,000 by bank"}),
        }]));
        let agent = AgentLoop::new(llm);
        let outcome = agent
            .run(&registry(), "sys", "record rent", Vec::new(), &CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(
            outcome,
            AgentOutcome::JournalEntryEvent {
                description: "paid rent 15,000 by bank".into()
            }
        );
    }

    #[tokio::test]
    async fn loop_stops_after_five_rounds() {
        let calls: Vec<LlmReply> = (0..6)
            .map(|i| LlmReply::ToolCall {
                name: "search_vendors".into(),
                arguments: json!({"round": i}),
            })
            .collect();
        let llm = Arc::new(ScriptedLlm::new(calls));
        let agent = AgentLoop::new(llm.clone());
        let outcome = agent
            .run(&registry(), "sys", "loop forever", Vec::new(), &CancellationToken::new())
            .await
            .expect("run");
        assert!(matches!(outcome, AgentOutcome::Answer { .. }));
        assert_eq!(llm.requests().len(), MAX_ROUNDS);
    }

    #[tokio::test]
    async fn malformed_output_is_retried_once_then_degrades() {
        let llm = Arc::new(ScriptedLlm::with_errors(vec![
            Err(LlmError::Malformed("bad json".into())),
            Err(LlmError::Malformed("still bad".into())),
        ]));
        let agent = AgentLoop::new(llm.clone());
        let outcome = agent
            .run(&registry(), "sys", "hello", Vec::new(), &CancellationToken::new())
            .await
            .expect("run");
        assert!(matches!(outcome, AgentOutcome::Answer { .. }));
        assert_eq!(llm.requests().len(), 2);

        // A single malformed reply recovers on the retry.
        let llm = Arc::new(ScriptedLlm::with_errors(vec![
            Err(LlmError::Malformed("bad json".into())),
            Ok(LlmReply::Text("recovered".into())),
        ]));
        let agent = AgentLoop::new(llm);
        let outcome = agent
            .run(&registry(), "sys", "hello", Vec::new(), &CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(outcome, AgentOutcome::Answer { text: "recovered".into() });
    }

    #[tokio::test]
    async fn cancellation_short_circuits_the_loop() {
        let llm = Arc::new(ScriptedLlm::new(vec![LlmReply::Text("never seen".into())]));
        let agent = AgentLoop::new(llm);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = agent
            .run(&registry(), "sys", "hello", Vec::new(), &cancel)
            .await
            .expect_err("cancelled");
        assert!(matches!(err, AgentError::Cancelled));
    }

    #[tokio::test]
    async fn unknown_tool_name_is_surfaced_to_the_model() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            LlmReply::ToolCall {
                name: "no_such_tool".into(),
                arguments: json!({}),
            },
            LlmReply::Text("sorry, wrong tool".into()),
        ]));
        let agent = AgentLoop::new(llm.clone());
        let outcome = agent
            .run(&registry(), "sys", "hello", Vec::new(), &CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(
            outcome,
            AgentOutcome::Answer {
                text: "sorry, wrong tool".into()
            }
        );
        let requests = llm.requests();
        let Turn::ToolResult { content, .. } = &requests[1].turns[2] else {
            panic!("expected tool result turn");
        };
        assert!(content.contains("unknown tool"));
    }

    #[test]
    fn catalog_always_carries_the_meta_tools() {
        let registry = registry();
        let names: Vec<String> = registry.catalog().into_iter().map(|s| s.name).collect();
        assert!(names.contains(&META_REQUEST_CLARIFICATION.to_string()));
        assert!(names.contains(&META_ROUTE_TO_JOURNAL_ENTRY.to_string()));
        assert!(names.contains(&"create_purchase_order".to_string()));
    }
}
