pub mod context;
pub mod coordinator;
pub mod error;
pub mod http_tool;
pub mod prompt;
pub mod router;
pub mod session_pool;

pub use context::{ContextConfig, ContextPipeline, ContextSnippet};
pub use coordinator::{
    CoordinatorConfig, ToolOutcome, TurnCoordinator, TurnOutcome, TurnReply, TurnRequest,
    TurnState, TurnTrace,
};
pub use error::EngineError;
pub use http_tool::{HttpToolClient, HttpToolConfig, HttpToolConnector};
pub use prompt::LocationContext;
pub use router::{IntentCategory, KeywordRouter, Router, ToolIntent};
pub use session_pool::{ClientPool, SessionPool};
