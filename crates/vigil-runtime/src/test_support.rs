//! Scripted provider and backend shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use vigil_core::constants::{SCREENSHOT_TOOL, SNAPSHOT_TOOL};
use vigil_core::messages::{Message, ToolCall};
use vigil_core::tools::{ToolDefinition, ToolOutcome};
use vigil_llm::{Provider, ProviderError, ProviderOptions, ProviderResult, ProviderTurn};
use vigil_transport::{ToolBackend, TransportResult};

use crate::session::{AppContext, Session, SessionConfig};

/// Replays queued turns and records what it was sent.
#[derive(Default)]
pub(crate) struct MockProvider {
    turns: Mutex<VecDeque<ProviderResult<ProviderTurn>>>,
    requests: Mutex<Vec<Vec<Message>>>,
    offered: Mutex<Vec<Vec<String>>>,
    budgets: Mutex<Vec<u32>>,
}

impl MockProvider {
    pub(crate) fn new(turns: Vec<ProviderTurn>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into_iter().map(Ok).collect()),
            ..Self::default()
        })
    }

    pub(crate) fn failing(error: ProviderError) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(VecDeque::from([Err(error)])),
            ..Self::default()
        })
    }

    pub(crate) fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub(crate) fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().clone()
    }

    pub(crate) fn offered_tools(&self) -> Vec<Vec<String>> {
        self.offered.lock().clone()
    }

    pub(crate) fn budgets(&self) -> Vec<u32> {
        self.budgets.lock().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn execute_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &ProviderOptions,
    ) -> ProviderResult<ProviderTurn> {
        self.requests.lock().push(messages.to_vec());
        self.offered
            .lock()
            .push(tools.iter().map(|t| t.name.clone()).collect());
        self.budgets.lock().push(options.max_iterations);
        self.turns.lock().pop_front().unwrap_or_else(|| {
            Err(ProviderError::Malformed {
                message: "mock script exhausted".into(),
            })
        })
    }
}

/// Answers every tool with a canned success unless a queued override
/// exists for that tool name.
#[derive(Default)]
pub(crate) struct MockBackend {
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
    overrides: Mutex<HashMap<String, VecDeque<TransportResult<ToolOutcome>>>>,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue `outcome` for the next call of `name`.
    pub(crate) fn respond(self, name: &str, outcome: ToolOutcome) -> Self {
        self.queue(name, Ok(outcome))
    }

    /// Queue any result, including a transport error, for the next call of `name`.
    pub(crate) fn queue(self, name: &str, result: TransportResult<ToolOutcome>) -> Self {
        self.overrides
            .lock()
            .entry(name.to_owned())
            .or_default()
            .push_back(result);
        self
    }

    pub(crate) fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.calls.lock().clone()
    }

    pub(crate) fn call_names(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(n, _)| n.clone()).collect()
    }
}

#[async_trait]
impl ToolBackend for MockBackend {
    async fn execute(&self, name: &str, arguments: &Map<String, Value>) -> TransportResult<ToolOutcome> {
        let n = {
            let mut calls = self.calls.lock();
            calls.push((name.to_owned(), arguments.clone()));
            calls.len()
        };
        if let Some(result) = self.overrides.lock().get_mut(name).and_then(VecDeque::pop_front) {
            return result;
        }
        Ok(match name {
            SNAPSHOT_TOOL => ToolOutcome::ok("captured").with_content(format!("- page snapshot #{n}")),
            SCREENSHOT_TOOL => {
                let file = arguments
                    .get("filename")
                    .and_then(Value::as_str)
                    .map_or_else(|| format!("shot-{n}.png"), str::to_owned);
                ToolOutcome::ok("saved").with_path(file)
            }
            other => ToolOutcome::ok(format!("{other} ok")),
        })
    }
}

pub(crate) fn call(id: &str, name: &str, args: Value) -> ToolCall {
    let arguments = match args {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    ToolCall::new(id, name, arguments)
}

pub(crate) fn tools_turn(calls: Vec<ToolCall>) -> ProviderTurn {
    ProviderTurn::incomplete(None, calls)
}

pub(crate) fn session_with(provider: Arc<MockProvider>, config: SessionConfig) -> Session {
    let app = AppContext {
        name: "Shop".into(),
        base_url: "https://shop.test".into(),
        description: None,
    };
    Session::new(provider, app, config).with_system_prompt("You test web apps.")
}

pub(crate) fn session(provider: Arc<MockProvider>) -> Session {
    session_with(provider, SessionConfig::default())
}
