pub mod errors;
pub mod ids;
pub mod provider;
pub mod records;
pub mod tenant;
pub mod tools;

pub use errors::GatewayError;
pub use records::{ConversationRecord, Role, ScoredRecord};
pub use tenant::TenantIdentity;
pub use tools::{Escalation, ToolClient, ToolConnector, ToolError, ToolResult};
