/// Errors a turn can surface to its caller. Tool, model and store failures
/// degrade inside the turn and never reach here.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
