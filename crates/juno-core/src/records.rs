use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::RecordId;
use crate::tenant::TenantIdentity;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// One side of a conversational exchange. Immutable once created.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: RecordId,
    pub tenant: TenantIdentity,
    pub role: Role,
    pub text: String,
    #[serde(skip_serializing, default)]
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl ConversationRecord {
    pub fn new(tenant: TenantIdentity, role: Role, text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: RecordId::new(),
            tenant,
            role,
            text: text.into(),
            embedding,
            created_at: Utc::now(),
        }
    }
}

/// A record returned from a similarity query, with its cosine score.
#[derive(Clone, Debug, Serialize)]
pub struct ScoredRecord {
    pub record: ConversationRecord,
    pub similarity: f32,
}
