use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::tenant::TenantIdentity;

/// Status value a tool provider uses to ask for an interactive login.
pub const LOGIN_REQUIRED: &str = "login_required";

/// Outcome of one tool call. Exactly one of data, escalation, or error.
#[derive(Clone, Debug)]
pub enum ToolResult {
    Data(String),
    Escalation(Escalation),
    Error(ToolError),
}

impl ToolResult {
    /// Classify the text content a provider returned.
    ///
    /// A JSON object whose `status` is `login_required` becomes an
    /// escalation; everything else is data. The payload is parsed, never
    /// substring-matched, so data that merely mentions the marker stays data.
    pub fn from_content(text: String) -> Self {
        let trimmed = text.trim_start();
        if trimmed.starts_with('{') {
            if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                if let Some(escalation) = Escalation::from_payload(value) {
                    return Self::Escalation(escalation);
                }
            }
        }
        Self::Data(text)
    }

    pub fn is_escalation(&self) -> bool {
        matches!(self, Self::Escalation(_))
    }
}

/// Structured re-authentication signal from a tool provider.
///
/// Keeps the provider's payload exactly as received so it can be relayed to
/// the client unmodified.
#[derive(Clone, Debug, PartialEq)]
pub struct Escalation {
    resume_url: String,
    session_ref: Option<String>,
    payload: Value,
}

impl Escalation {
    /// Parse a provider payload. Returns `None` unless it is an object with
    /// `status == "login_required"` and a resume URL.
    pub fn from_payload(payload: Value) -> Option<Self> {
        let obj = payload.as_object()?;
        if obj.get("status").and_then(Value::as_str) != Some(LOGIN_REQUIRED) {
            return None;
        }
        let resume_url = ["resumeUrl", "resume_url", "login_url", "loginUrl"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))?
            .to_owned();
        let session_ref = ["sessionRef", "session_ref", "session_id", "sessionId"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))
            .map(str::to_owned);
        Some(Self {
            resume_url,
            session_ref,
            payload,
        })
    }

    pub fn resume_url(&self) -> &str {
        &self.resume_url
    }

    pub fn session_ref(&self) -> Option<&str> {
        self.session_ref.as_deref()
    }

    /// The provider payload, verbatim.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum ToolError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("session closed")]
    Closed,
}

impl ToolError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Transport(_) => "transport",
            Self::Provider(_) => "provider",
            Self::Protocol(_) => "protocol",
            Self::Timeout(_) => "timeout",
            Self::Closed => "closed",
        }
    }
}

/// A network client bound to one tool provider and one tenant identity.
#[async_trait]
pub trait ToolClient: Send + Sync {
    fn tenant(&self) -> &TenantIdentity;

    /// Provider-assigned session token, if the provider issued one.
    fn session_token(&self) -> Option<&str>;

    async fn call(&self, tool_name: &str) -> ToolResult;

    /// Tear down the provider session. Best effort.
    async fn close(&self);
}

/// Builds tool clients. Construction may involve a slow handshake.
#[async_trait]
pub trait ToolConnector: Send + Sync {
    async fn connect(&self, tenant: &TenantIdentity) -> Result<Arc<dyn ToolClient>, ToolError>;
}
