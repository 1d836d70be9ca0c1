//! Tool provider client over streamable HTTP JSON-RPC.
//!
//! Handshake: `initialize` (the provider may assign a session via the
//! `Mcp-Session-Id` header), then `notifications/initialized`. Calls are
//! `tools/call` requests carrying that header. Responses arrive either as a
//! JSON body or as SSE `data:` frames.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use juno_core::tenant::TenantIdentity;
use juno_core::tools::{ToolClient, ToolConnector, ToolError, ToolResult};

pub const SESSION_HEADER: &str = "Mcp-Session-Id";
const PROTOCOL_VERSION: &str = "2025-03-26";

#[derive(Clone, Debug)]
pub struct HttpToolConfig {
    /// Provider base URL; requests go to `{base_url}/mcp/`.
    pub base_url: String,
    /// Bound on the whole handshake.
    pub connect_timeout: Duration,
    /// Bound on a single HTTP exchange.
    pub request_timeout: Duration,
}

impl HttpToolConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(8),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/mcp/", self.base_url.trim_end_matches('/'))
    }
}

/// One JSON-RPC exchange result.
struct RpcReply {
    session: Option<String>,
    message: Option<Value>,
}

#[derive(Clone)]
struct RpcTransport {
    http: Client,
    endpoint: String,
    request_timeout: Duration,
}

impl RpcTransport {
    async fn post(&self, session: Option<&str>, body: &Value) -> Result<RpcReply, ToolError> {
        let mut req = self
            .http
            .post(&self.endpoint)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(session) = session {
            req = req.header(SESSION_HEADER, session);
        }

        let resp = req.send().await.map_err(|e| self.map_reqwest(e))?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND && session.is_some() {
            return Err(ToolError::Closed);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ToolError::Transport(format!("status {}: {}", status.as_u16(), body)));
        }

        let session = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let is_sse = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let text = resp.text().await.map_err(|e| self.map_reqwest(e))?;

        let message = if text.trim().is_empty() {
            None
        } else {
            Some(parse_rpc_body(&text, is_sse)?)
        };
        Ok(RpcReply { session, message })
    }

    fn map_reqwest(&self, e: reqwest::Error) -> ToolError {
        if e.is_timeout() {
            ToolError::Timeout(self.request_timeout)
        } else {
            ToolError::Transport(e.to_string())
        }
    }
}

/// Parse a JSON-RPC response body. SSE bodies yield the first `data:` frame
/// that carries a `result` or `error`.
fn parse_rpc_body(text: &str, is_sse: bool) -> Result<Value, ToolError> {
    let trimmed = text.trim_start();
    if is_sse || trimmed.starts_with("event:") || trimmed.starts_with("data:") {
        let mut frame = String::new();
        for line in text.lines().chain(std::iter::once("")) {
            if let Some(data) = line.strip_prefix("data:") {
                if !frame.is_empty() {
                    frame.push('\n');
                }
                frame.push_str(data.trim_start());
            } else if line.trim().is_empty() && !frame.is_empty() {
                if let Ok(value) = serde_json::from_str::<Value>(&frame) {
                    if value.get("result").is_some() || value.get("error").is_some() {
                        return Ok(value);
                    }
                }
                frame.clear();
            }
        }
        return Err(ToolError::Protocol("no JSON-RPC response in event stream".into()));
    }
    serde_json::from_str(text).map_err(|e| ToolError::Protocol(format!("invalid JSON body: {e}")))
}

/// Split a JSON-RPC response into its `result`, mapping `error` objects.
fn into_result(message: Value) -> Result<Value, ToolError> {
    if let Some(err) = message.get("error") {
        let msg = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown provider error");
        return Err(ToolError::Provider(msg.to_string()));
    }
    message
        .get("result")
        .cloned()
        .ok_or_else(|| ToolError::Protocol("response has neither result nor error".into()))
}

/// Map a `tools/call` result to a [`ToolResult`].
fn interpret_call_result(result: &Value) -> ToolResult {
    let text: String = result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        let detail = if text.is_empty() { "tool reported an error".to_string() } else { text };
        return ToolResult::Error(ToolError::Provider(detail));
    }
    if text.is_empty() {
        return ToolResult::Data(result.get("content").unwrap_or(result).to_string());
    }
    ToolResult::from_content(text)
}

/// Builds [`HttpToolClient`]s by running the provider handshake.
pub struct HttpToolConnector {
    config: HttpToolConfig,
    transport: RpcTransport,
}

impl HttpToolConnector {
    pub fn new(config: HttpToolConfig) -> Result<Self, ToolError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ToolError::Connect(format!("http client: {e}")))?;
        let transport = RpcTransport {
            http,
            endpoint: config.endpoint(),
            request_timeout: config.request_timeout,
        };
        Ok(Self { config, transport })
    }

    async fn handshake(&self, tenant: &TenantIdentity) -> Result<Option<String>, ToolError> {
        let init = json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "juno", "version": env!("CARGO_PKG_VERSION")},
            },
        });
        let reply = self.transport.post(None, &init).await?;
        let message = reply
            .message
            .ok_or_else(|| ToolError::Protocol("empty initialize response".into()))?;
        let _ = into_result(message)?;

        let session = reply.session;
        let initialized = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        let _ = self.transport.post(session.as_deref(), &initialized).await?;

        debug!(tenant = %tenant, session = ?session, "tool provider handshake complete");
        Ok(session)
    }
}

#[async_trait]
impl ToolConnector for HttpToolConnector {
    #[instrument(skip_all, fields(tenant = %tenant))]
    async fn connect(&self, tenant: &TenantIdentity) -> Result<Arc<dyn ToolClient>, ToolError> {
        let timeout = self.config.connect_timeout;
        let session = match tokio::time::timeout(timeout, self.handshake(tenant)).await {
            Ok(Ok(session)) => session,
            Ok(Err(ToolError::Connect(msg))) => return Err(ToolError::Connect(msg)),
            Ok(Err(e)) => return Err(ToolError::Connect(e.to_string())),
            Err(_) => return Err(ToolError::Connect(format!("handshake timed out after {timeout:?}"))),
        };

        Ok(Arc::new(HttpToolClient {
            transport: self.transport.clone(),
            tenant: tenant.clone(),
            session,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }))
    }
}

/// A provider session bound to one tenant.
pub struct HttpToolClient {
    transport: RpcTransport,
    tenant: TenantIdentity,
    session: Option<String>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

#[async_trait]
impl ToolClient for HttpToolClient {
    fn tenant(&self) -> &TenantIdentity {
        &self.tenant
    }

    fn session_token(&self) -> Option<&str> {
        self.session.as_deref()
    }

    #[instrument(skip_all, fields(tool = tool_name))]
    async fn call(&self, tool_name: &str) -> ToolResult {
        if self.closed.load(Ordering::SeqCst) {
            return ToolResult::Error(ToolError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {
                "name": tool_name,
                "arguments": {"user_id": self.tenant.sub},
            },
        });

        let reply = match self.transport.post(self.session.as_deref(), &body).await {
            Ok(reply) => reply,
            Err(e) => return ToolResult::Error(e),
        };
        let Some(message) = reply.message else {
            return ToolResult::Error(ToolError::Protocol("empty tools/call response".into()));
        };
        match into_result(message) {
            Ok(result) => interpret_call_result(&result),
            Err(e) => ToolResult::Error(e),
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(session) = self.session.as_deref() else {
            return;
        };
        let resp = self
            .transport
            .http
            .delete(&self.transport.endpoint)
            .header(SESSION_HEADER, session)
            .send()
            .await;
        if let Err(e) = resp {
            warn!(tenant = %self.tenant, error = %e, "tool session teardown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn tenant() -> TenantIdentity {
        TenantIdentity::new("uid42", "1111111111")
    }

    async fn mount_handshake(server: &MockServer, session: &str) {
        Mock::given(method("POST"))
            .and(path("/mcp/"))
            .and(body_partial_json(json!({"method": "initialize"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(SESSION_HEADER, session)
                    .set_body_json(json!({"jsonrpc": "2.0", "id": 0, "result": {"protocolVersion": PROTOCOL_VERSION}})),
            )
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/mcp/"))
            .and(header(SESSION_HEADER, session))
            .and(body_partial_json(json!({"method": "notifications/initialized"})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(server)
            .await;
    }

    fn connector(server: &MockServer) -> HttpToolConnector {
        HttpToolConnector::new(HttpToolConfig::new(server.uri())).unwrap()
    }

    fn call_reply(result: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": result}))
    }

    #[tokio::test]
    async fn handshake_stores_session_token() {
        let server = MockServer::start().await;
        mount_handshake(&server, "sess-1").await;

        let client = connector(&server).connect(&tenant()).await.unwrap();
        assert_eq!(client.session_token(), Some("sess-1"));
        assert_eq!(client.tenant(), &tenant());
    }

    #[tokio::test]
    async fn call_returns_text_content() {
        let server = MockServer::start().await;
        mount_handshake(&server, "sess-1").await;
        Mock::given(method("POST"))
            .and(header(SESSION_HEADER, "sess-1"))
            .and(body_partial_json(json!({
                "method": "tools/call",
                "params": {"name": "fetch_net_worth", "arguments": {"user_id": "1111111111"}}
            })))
            .respond_with(call_reply(json!({
                "content": [{"type": "text", "text": "Net worth: "}, {"type": "text", "text": "12,00,000"}]
            })))
            .mount(&server)
            .await;

        let client = connector(&server).connect(&tenant()).await.unwrap();
        let result = client.call("fetch_net_worth").await;
        assert!(matches!(result, ToolResult::Data(ref s) if s == "Net worth: 12,00,000"));
    }

    #[tokio::test]
    async fn sse_body_is_parsed() {
        let server = MockServer::start().await;
        mount_handshake(&server, "sess-2").await;
        let frame = json!({"jsonrpc": "2.0", "id": 1, "result": {"content": [{"type": "text", "text": "EPF: 4,20,000"}]}});
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "tools/call"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(format!("event: message\ndata: {frame}\n\n"), "text/event-stream"),
            )
            .mount(&server)
            .await;

        let client = connector(&server).connect(&tenant()).await.unwrap();
        let result = client.call("fetch_epf_details").await;
        assert!(matches!(result, ToolResult::Data(ref s) if s == "EPF: 4,20,000"));
    }

    #[tokio::test]
    async fn login_required_becomes_escalation() {
        let server = MockServer::start().await;
        mount_handshake(&server, "sess-3").await;
        let payload = json!({"status": "login_required", "login_url": "http://fi/login?s=sess-3", "session_id": "sess-3"});
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "tools/call"})))
            .respond_with(call_reply(json!({"content": [{"type": "text", "text": payload.to_string()}]})))
            .mount(&server)
            .await;

        let client = connector(&server).connect(&tenant()).await.unwrap();
        let ToolResult::Escalation(esc) = client.call("fetch_net_worth").await else {
            panic!("expected escalation");
        };
        assert_eq!(esc.resume_url(), "http://fi/login?s=sess-3");
        assert_eq!(esc.payload(), &payload);
    }

    #[tokio::test]
    async fn is_error_maps_to_provider_error() {
        let server = MockServer::start().await;
        mount_handshake(&server, "sess-4").await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "tools/call"})))
            .respond_with(call_reply(json!({"isError": true, "content": [{"type": "text", "text": "unknown tool"}]})))
            .mount(&server)
            .await;

        let client = connector(&server).connect(&tenant()).await.unwrap();
        let result = client.call("fetch_nothing").await;
        assert!(matches!(result, ToolResult::Error(ToolError::Provider(ref m)) if m == "unknown tool"));
    }

    #[tokio::test]
    async fn rpc_error_maps_to_provider_error() {
        let server = MockServer::start().await;
        mount_handshake(&server, "sess-5").await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "tools/call"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32602, "message": "bad params"}}),
            ))
            .mount(&server)
            .await;

        let client = connector(&server).connect(&tenant()).await.unwrap();
        let result = client.call("fetch_net_worth").await;
        assert!(matches!(result, ToolResult::Error(ToolError::Provider(ref m)) if m == "bad params"));
    }

    #[tokio::test]
    async fn failed_handshake_is_connect_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .mount(&server)
            .await;

        let err = connector(&server).connect(&tenant()).await.err().unwrap();
        assert!(matches!(err, ToolError::Connect(_)));
    }

    #[tokio::test]
    async fn close_deletes_session_and_blocks_calls() {
        let server = MockServer::start().await;
        mount_handshake(&server, "sess-6").await;
        Mock::given(method("DELETE"))
            .and(path("/mcp/"))
            .and(header(SESSION_HEADER, "sess-6"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = connector(&server).connect(&tenant()).await.unwrap();
        client.close().await;
        client.close().await;
        assert!(matches!(client.call("fetch_net_worth").await, ToolResult::Error(ToolError::Closed)));
    }

    #[test]
    fn sse_without_response_is_protocol_error() {
        let err = parse_rpc_body("event: ping\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"ping\"}\n\n", true).unwrap_err();
        assert!(matches!(err, ToolError::Protocol(_)));
    }

    #[test]
    fn empty_content_falls_back_to_raw_json() {
        let result = interpret_call_result(&json!({"content": [{"type": "image", "data": "..."}]}));
        assert!(matches!(result, ToolResult::Data(ref s) if s.contains("image")));
    }
}
