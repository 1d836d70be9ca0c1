//! Duplex channel for the orchestration core: JSON-RPC envelopes over
//! WebSocket frames or newline-delimited TCP, with per-connection request
//! correlation.

pub mod client;
pub mod compat;
pub mod connection;
pub mod correlation;
pub mod handlers;
pub mod rpc;
pub mod server;

pub use client::RpcClient;
pub use correlation::{ChannelError, CorrelationKey, PendingMap};
pub use handlers::HandlerState;
pub use server::{start, ServerConfig, ServerHandle};
