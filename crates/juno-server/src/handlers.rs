//! RPC method handlers.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{info, warn};

use juno_core::tenant::TenantIdentity;
use juno_engine::{EngineError, LocationContext, TurnCoordinator, TurnOutcome, TurnRequest};

use crate::compat;
use crate::rpc::{self, RpcResponse};

pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const MAX_HISTORY_LIMIT: usize = 500;

/// Shared state available to all handlers.
pub struct HandlerState {
    pub coordinator: Arc<TurnCoordinator>,
    pub started_at: Instant,
}

impl HandlerState {
    pub fn new(coordinator: Arc<TurnCoordinator>) -> Self {
        Self {
            coordinator,
            started_at: Instant::now(),
        }
    }
}

/// Route one request to its handler. Never fails: every error becomes an
/// error response carrying the request id.
pub async fn dispatch(state: &HandlerState, method: &str, params: &Value, id: Value) -> RpcResponse {
    let params = compat::normalize_params(params);

    match method {
        "process_query" => process_query(state, &params, id).await,
        "cleanup_user" => cleanup_user(state, &params, id).await,
        "load_chat_history" => load_chat_history(state, &params, id),
        "clear_history" => clear_history(state, &params, id).await,
        "purge_tenant" => purge_tenant(state, &params, id).await,
        "ping" => RpcResponse::success(id, json!({"status": "ok"})),
        "health" => RpcResponse::success(id, health(state)),
        _ => RpcResponse::method_not_found(id, method),
    }
}

pub fn health(state: &HandlerState) -> Value {
    json!({
        "status": "ok",
        "active_sessions": state.coordinator.pool().active_count(),
        "pending_writes": state.coordinator.context().pending_writes(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    })
}

fn tenant_from(params: &Value) -> TenantIdentity {
    TenantIdentity::from_parts(
        rpc::optional_str(params, "firebase_uid"),
        rpc::optional_str(params, "user_id"),
    )
}

async fn process_query(state: &HandlerState, params: &Value, id: Value) -> RpcResponse {
    let query = match rpc::require_str(params, "query") {
        Ok(q) => q,
        Err(msg) => return RpcResponse::invalid_params(id, msg),
    };
    let location = match params.get("location_context") {
        None | Some(Value::Null) => None,
        Some(raw) => match serde_json::from_value::<LocationContext>(raw.clone()) {
            Ok(loc) => Some(loc),
            Err(e) => {
                warn!(error = %e, "ignoring malformed location_context");
                None
            }
        },
    };
    let request = TurnRequest {
        tenant: tenant_from(params),
        query: query.to_owned(),
        location,
    };

    match state.coordinator.handle(request).await {
        Ok(TurnOutcome::Reply(reply)) => RpcResponse::success(
            id,
            json!({
                "response": reply.text,
                "tools_used": reply.tools_used,
                "context_used": reply.context_used,
                "degraded": reply.degraded,
                "turn_id": reply.trace.id,
            }),
        ),
        // relayed unmodified so the client can open the login flow and replay
        Ok(TurnOutcome::Escalated { escalation, .. }) => RpcResponse::success(id, escalation.into_payload()),
        Err(EngineError::InvalidRequest(msg)) => RpcResponse::invalid_params(id, msg),
    }
}

async fn cleanup_user(state: &HandlerState, params: &Value, id: Value) -> RpcResponse {
    let primary = match rpc::require_str(params, "firebase_uid") {
        Ok(p) => p,
        Err(msg) => return RpcResponse::invalid_params(id, msg),
    };
    let released = state.coordinator.pool().release_primary(primary).await;
    info!(primary, released, "user cleanup");
    RpcResponse::success(id, json!({"status": "cleanup_completed", "released": released}))
}

fn load_chat_history(state: &HandlerState, params: &Value, id: Value) -> RpcResponse {
    let tenant = tenant_from(params);
    let limit = rpc::optional_u64(params, "limit")
        .map_or(DEFAULT_HISTORY_LIMIT, |l| usize::try_from(l).unwrap_or(MAX_HISTORY_LIMIT))
        .clamp(1, MAX_HISTORY_LIMIT);

    match state.coordinator.context().store_handle().history(&tenant, limit) {
        Ok(records) => {
            let messages: Vec<Value> = records
                .iter()
                .map(|r| {
                    json!({
                        "id": r.id,
                        "role": r.role,
                        "text": r.text,
                        "created_at": r.created_at,
                    })
                })
                .collect();
            RpcResponse::success(id, json!({"count": messages.len(), "messages": messages}))
        }
        Err(e) => {
            warn!(tenant = %tenant, error = %e, "history load failed");
            RpcResponse::internal_error(id, e.to_string())
        }
    }
}

async fn clear_history(state: &HandlerState, params: &Value, id: Value) -> RpcResponse {
    let tenant = tenant_from(params);
    let context = state.coordinator.context();
    // this tenant's queued writes must land before the delete
    context.drain_tenant(&tenant).await;
    match context.store_handle().clear(&tenant) {
        Ok(deleted) => {
            info!(tenant = %tenant, deleted, "history cleared");
            RpcResponse::success(id, json!({"status": "cleared", "deleted": deleted}))
        }
        Err(e) => {
            warn!(tenant = %tenant, error = %e, "history clear failed");
            RpcResponse::internal_error(id, e.to_string())
        }
    }
}

async fn purge_tenant(state: &HandlerState, params: &Value, id: Value) -> RpcResponse {
    let primary = match rpc::require_str(params, "firebase_uid") {
        Ok(p) => p,
        Err(msg) => return RpcResponse::invalid_params(id, msg),
    };
    let released = state.coordinator.pool().release_primary(primary).await;
    let context = state.coordinator.context();
    context.drain_primary(primary).await;
    match context.store_handle().purge_primary(primary) {
        Ok(deleted) => {
            info!(primary, deleted, released, "tenant purged");
            RpcResponse::success(
                id,
                json!({"status": "purged", "deleted": deleted, "released": released}),
            )
        }
        Err(e) => {
            warn!(primary, error = %e, "tenant purge failed");
            RpcResponse::internal_error(id, e.to_string())
        }
    }
}
