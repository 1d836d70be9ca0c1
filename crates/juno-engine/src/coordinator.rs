//! Turn state machine.
//!
//! `Received → Classified → ToolDispatched → {Escalated | ContextEnriched →
//! ModelCalled → Responded}`
//!
//! Every tool of a turn is called concurrently under its own timeout. The
//! first escalation in intent order ends the turn before any model call or
//! store write. Otherwise context is retrieved, the user utterance is stored
//! in the background, and the model sees the enriched prompt.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use juno_core::ids::TurnId;
use juno_core::provider::{CompletionOptions, LlmProvider};
use juno_core::records::Role;
use juno_core::tenant::TenantIdentity;
use juno_core::tools::{Escalation, ToolClient, ToolError, ToolResult};

use crate::context::ContextPipeline;
use crate::error::EngineError;
use crate::prompt::{build_prompt, truncate_at_boundary, LocationContext, PromptInput, ToolSection};
use crate::router::{Router, ToolIntent};
use crate::session_pool::ClientPool;

pub const APOLOGY_REPLY: &str =
    "I'm having trouble generating a response right now. Please try again in a moment.";

const FALLBACK_PREFIX: &str =
    "I couldn't put together a full answer right now, but here is the data I fetched for you:";

const FALLBACK_DATA_BYTES: usize = 4 * 1024;

#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    pub tool_timeout: Duration,
    pub completion: CompletionOptions,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tool_timeout: Duration::from_secs(8),
            completion: CompletionOptions::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TurnRequest {
    pub tenant: TenantIdentity,
    pub query: String,
    pub location: Option<LocationContext>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Received,
    Classified,
    ToolDispatched,
    Escalated,
    ContextEnriched,
    ModelCalled,
    Responded,
}

/// Transitions a turn went through, in order.
#[derive(Clone, Debug, Serialize)]
pub struct TurnTrace {
    pub id: TurnId,
    pub states: Vec<TurnState>,
}

impl TurnTrace {
    fn new() -> Self {
        Self {
            id: TurnId::new(),
            states: vec![TurnState::Received],
        }
    }

    fn advance(&mut self, next: TurnState) {
        let from = self.states.last().copied().unwrap_or(TurnState::Received);
        debug!(turn = %self.id, ?from, to = ?next, "turn transition");
        self.states.push(next);
    }

    pub fn current(&self) -> TurnState {
        self.states.last().copied().unwrap_or(TurnState::Received)
    }
}

#[derive(Clone, Debug)]
pub struct ToolOutcome {
    pub intent: ToolIntent,
    pub result: ToolResult,
}

impl ToolOutcome {
    fn data(&self) -> Option<&str> {
        match &self.result {
            ToolResult::Data(data) => Some(data),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TurnReply {
    pub text: String,
    /// Tools that returned data.
    pub tools_used: Vec<String>,
    /// Similar records folded into the prompt.
    pub context_used: usize,
    /// True when the model failed and the reply is a fallback.
    pub degraded: bool,
    pub trace: TurnTrace,
}

#[derive(Clone, Debug)]
pub enum TurnOutcome {
    Reply(TurnReply),
    Escalated {
        escalation: Escalation,
        tool_name: String,
        trace: TurnTrace,
    },
}

impl TurnOutcome {
    pub fn trace(&self) -> &TurnTrace {
        match self {
            Self::Reply(reply) => &reply.trace,
            Self::Escalated { trace, .. } => trace,
        }
    }
}

pub struct TurnCoordinator {
    router: Arc<dyn Router>,
    pool: Arc<dyn ClientPool>,
    model: Arc<dyn LlmProvider>,
    context: ContextPipeline,
    config: CoordinatorConfig,
}

impl TurnCoordinator {
    pub fn new(
        router: Arc<dyn Router>,
        pool: Arc<dyn ClientPool>,
        model: Arc<dyn LlmProvider>,
        context: ContextPipeline,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            router,
            pool,
            model,
            context,
            config,
        }
    }

    pub fn pool(&self) -> &Arc<dyn ClientPool> {
        &self.pool
    }

    pub fn context(&self) -> &ContextPipeline {
        &self.context
    }

    /// Run one turn to completion.
    #[instrument(skip_all, fields(tenant = %request.tenant))]
    pub async fn handle(&self, request: TurnRequest) -> Result<TurnOutcome, EngineError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(EngineError::InvalidRequest("query must not be empty".into()));
        }
        let tenant = &request.tenant;
        let mut trace = TurnTrace::new();

        let intents = self.router.classify(query);
        trace.advance(TurnState::Classified);
        debug!(
            turn = %trace.id,
            tools = ?intents.iter().map(|i| i.tool_name.as_str()).collect::<Vec<_>>(),
            "intents classified"
        );

        let outcomes = self.dispatch(tenant, intents).await;
        trace.advance(TurnState::ToolDispatched);

        if let Some((escalation, tool_name)) = first_escalation(&outcomes) {
            trace.advance(TurnState::Escalated);
            info!(turn = %trace.id, tool = %tool_name, resume_url = escalation.resume_url(), "turn escalated to login");
            return Ok(TurnOutcome::Escalated {
                escalation,
                tool_name,
                trace,
            });
        }

        let similar = self.context.retrieve(tenant, query).await;
        let recent = self.context.recent(tenant);
        self.context.store_detached(tenant.clone(), Role::User, query.to_owned());
        trace.advance(TurnState::ContextEnriched);

        let sections: Vec<ToolSection<'_>> = outcomes
            .iter()
            .map(|o| ToolSection {
                tool_name: &o.intent.tool_name,
                data: o.data(),
            })
            .collect();
        let prompt = build_prompt(&PromptInput {
            query,
            location: request.location.as_ref(),
            similar: &similar,
            recent: &recent,
            tools: &sections,
        });

        let completion = self.model.complete(&prompt, &self.config.completion).await;
        trace.advance(TurnState::ModelCalled);

        let tools_used: Vec<String> = outcomes
            .iter()
            .filter(|o| o.data().is_some())
            .map(|o| o.intent.tool_name.clone())
            .collect();

        let (text, degraded) = match completion {
            Ok(text) => {
                self.context
                    .store_detached(tenant.clone(), Role::Assistant, text.clone());
                (text, false)
            }
            Err(e) => {
                warn!(
                    turn = %trace.id,
                    model = self.model.model(),
                    error_kind = e.error_kind(),
                    error = %e,
                    "model call failed, using fallback reply"
                );
                (fallback_reply(&outcomes), true)
            }
        };
        trace.advance(TurnState::Responded);

        Ok(TurnOutcome::Reply(TurnReply {
            text,
            tools_used,
            context_used: similar.len(),
            degraded,
            trace,
        }))
    }

    /// Acquire the tenant's client once, then call every tool concurrently.
    async fn dispatch(&self, tenant: &TenantIdentity, intents: Vec<ToolIntent>) -> Vec<ToolOutcome> {
        if intents.is_empty() {
            return Vec::new();
        }
        let timeout = self.config.tool_timeout;

        let client = match tokio::time::timeout(timeout, self.pool.acquire(tenant)).await {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => return fail_all(intents, &e),
            Err(_) => return fail_all(intents, &ToolError::Timeout(timeout)),
        };

        let calls = intents
            .into_iter()
            .map(|intent| call_tool(Arc::clone(&client), intent, timeout));
        join_all(calls).await
    }
}

async fn call_tool(client: Arc<dyn ToolClient>, intent: ToolIntent, timeout: Duration) -> ToolOutcome {
    let result = match tokio::time::timeout(timeout, client.call(&intent.tool_name)).await {
        Ok(result) => result,
        Err(_) => ToolResult::Error(ToolError::Timeout(timeout)),
    };
    if let ToolResult::Error(e) = &result {
        warn!(
            tenant = %client.tenant(),
            tool = %intent.tool_name,
            error_kind = e.error_kind(),
            error = %e,
            "tool call failed"
        );
    }
    ToolOutcome { intent, result }
}

fn fail_all(intents: Vec<ToolIntent>, error: &ToolError) -> Vec<ToolOutcome> {
    warn!(error_kind = error.error_kind(), error = %error, "tool client unavailable");
    intents
        .into_iter()
        .map(|intent| ToolOutcome {
            intent,
            result: ToolResult::Error(error.clone()),
        })
        .collect()
}

fn first_escalation(outcomes: &[ToolOutcome]) -> Option<(Escalation, String)> {
    outcomes.iter().find_map(|o| match &o.result {
        ToolResult::Escalation(e) => Some((e.clone(), o.intent.tool_name.clone())),
        _ => None,
    })
}

fn fallback_reply(outcomes: &[ToolOutcome]) -> String {
    let data: Vec<(&str, &str)> = outcomes
        .iter()
        .filter_map(|o| o.data().map(|d| (o.intent.tool_name.as_str(), d)))
        .collect();
    if data.is_empty() {
        return APOLOGY_REPLY.to_owned();
    }
    let mut out = String::from(FALLBACK_PREFIX);
    for (tool, payload) in data {
        out.push_str("\n\n");
        out.push_str(tool);
        out.push_str(":\n");
        out.push_str(truncate_at_boundary(payload, FALLBACK_DATA_BYTES));
    }
    out
}
