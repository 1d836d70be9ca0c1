pub mod demo;
pub mod gemini;
pub mod reliable;

pub mod mock;

pub use demo::{DemoProvider, HashEmbedder};
pub use gemini::{GeminiConfig, GeminiEmbedder, GeminiProvider};
pub use reliable::{ReliableConfig, ReliableProvider};
