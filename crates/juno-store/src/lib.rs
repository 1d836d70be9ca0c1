pub mod conversations;
pub mod database;
pub mod error;
pub mod row_helpers;
pub mod schema;
pub mod vector;

pub use conversations::{ConversationRepo, DocumentStore};
pub use database::Database;
pub use error::StoreError;
