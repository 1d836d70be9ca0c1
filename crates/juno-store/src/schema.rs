/// SQL DDL for the conversation store.
/// WAL mode enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

/// `primary_identity` is the empty string for legacy-mode tenants.
pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS conversation_records (
    id TEXT PRIMARY KEY,
    primary_identity TEXT NOT NULL,
    sub_identity TEXT NOT NULL,
    role TEXT NOT NULL,
    text TEXT NOT NULL,
    embedding BLOB NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_tenant_time
    ON conversation_records(primary_identity, sub_identity, created_at);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
