use chrono::SecondsFormat;
use rusqlite::params;
use tracing::debug;

use juno_core::ids::RecordId;
use juno_core::records::{ConversationRecord, Role, ScoredRecord};
use juno_core::tenant::TenantIdentity;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{get, parse_enum, parse_timestamp};
use crate::vector::{blob_to_f32_vec, cosine_similarity, f32_slice_to_blob};

const TABLE: &str = "conversation_records";

const SELECT_COLUMNS: &str =
    "SELECT id, primary_identity, sub_identity, role, text, embedding, created_at FROM conversation_records";

/// Vector-indexed persistence for conversation records.
///
/// Every read is scoped to one tenant in the query itself.
pub trait DocumentStore: Send + Sync {
    /// Insert a record, replacing any record with the same id.
    fn upsert(&self, record: &ConversationRecord) -> Result<(), StoreError>;

    /// Up to `k` records of `tenant` whose cosine similarity to `embedding`
    /// is strictly greater than `threshold`, most similar first.
    fn query_similar(
        &self,
        tenant: &TenantIdentity,
        embedding: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredRecord>, StoreError>;

    /// The latest `limit` records of `tenant`, oldest first.
    fn history(&self, tenant: &TenantIdentity, limit: usize) -> Result<Vec<ConversationRecord>, StoreError>;

    /// Delete every record of `tenant`. Returns the number deleted.
    fn clear(&self, tenant: &TenantIdentity) -> Result<usize, StoreError>;

    /// Delete every record owned by `primary`, across all sub-identities.
    fn purge_primary(&self, primary: &str) -> Result<usize, StoreError>;
}

/// SQLite-backed [`DocumentStore`] with brute-force cosine ranking.
#[derive(Clone)]
pub struct ConversationRepo {
    db: Database,
}

impl ConversationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Count records for a tenant.
    pub fn count(&self, tenant: &TenantIdentity) -> Result<usize, StoreError> {
        let (primary, sub) = tenant_columns(tenant);
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT count(*) FROM conversation_records WHERE primary_identity = ?1 AND sub_identity = ?2",
                params![primary, sub],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }
}

/// Legacy tenants are stored with an empty primary column.
fn tenant_columns(tenant: &TenantIdentity) -> (&str, &str) {
    (tenant.primary.as_deref().unwrap_or(""), tenant.sub.as_str())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<ConversationRecord, StoreError> {
    let id: String = get(row, 0, TABLE, "id")?;
    let primary: String = get(row, 1, TABLE, "primary_identity")?;
    let sub: String = get(row, 2, TABLE, "sub_identity")?;
    let role: String = get(row, 3, TABLE, "role")?;
    let text: String = get(row, 4, TABLE, "text")?;
    let embedding: Vec<u8> = get(row, 5, TABLE, "embedding")?;
    let created_at: String = get(row, 6, TABLE, "created_at")?;

    let tenant = if primary.is_empty() {
        TenantIdentity::legacy(sub)
    } else {
        TenantIdentity::new(primary, sub)
    };

    Ok(ConversationRecord {
        id: RecordId::from_raw(id),
        tenant,
        role: parse_enum::<Role>(&role, TABLE, "role")?,
        text,
        embedding: blob_to_f32_vec(&embedding),
        created_at: parse_timestamp(&created_at, TABLE, "created_at")?,
    })
}

impl DocumentStore for ConversationRepo {
    fn upsert(&self, record: &ConversationRecord) -> Result<(), StoreError> {
        let (primary, sub) = tenant_columns(&record.tenant);
        let created_at = record.created_at.to_rfc3339_opts(SecondsFormat::Micros, true);
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT OR REPLACE INTO conversation_records
                    (id, primary_identity, sub_identity, role, text, embedding, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id.as_str(),
                    primary,
                    sub,
                    record.role.to_string(),
                    record.text,
                    f32_slice_to_blob(&record.embedding),
                    created_at,
                ],
            )?;
            Ok(())
        })
    }

    fn query_similar(
        &self,
        tenant: &TenantIdentity,
        embedding: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredRecord>, StoreError> {
        if k == 0 || embedding.is_empty() {
            return Ok(Vec::new());
        }
        let (primary, sub) = tenant_columns(tenant);
        let candidates = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} WHERE primary_identity = ?1 AND sub_identity = ?2"
            ))?;
            let mut rows = stmt.query(params![primary, sub])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_record(row)?);
            }
            Ok(out)
        })?;

        let scanned = candidates.len();
        let mut scored: Vec<ScoredRecord> = candidates
            .into_iter()
            .filter_map(|record| {
                let similarity = cosine_similarity(embedding, &record.embedding);
                (similarity > threshold).then_some(ScoredRecord { record, similarity })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);

        debug!(tenant = %tenant, scanned, matched = scored.len(), "similarity query");
        Ok(scored)
    }

    fn history(&self, tenant: &TenantIdentity, limit: usize) -> Result<Vec<ConversationRecord>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let (primary, sub) = tenant_columns(tenant);
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS}
                 WHERE primary_identity = ?1 AND sub_identity = ?2
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?3"
            ))?;
            let mut rows = stmt.query(params![primary, sub, limit as i64])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_record(row)?);
            }
            // newest-first from SQL, oldest-first to callers
            out.reverse();
            Ok(out)
        })
    }

    fn clear(&self, tenant: &TenantIdentity) -> Result<usize, StoreError> {
        let (primary, sub) = tenant_columns(tenant);
        self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM conversation_records WHERE primary_identity = ?1 AND sub_identity = ?2",
                params![primary, sub],
            )?)
        })
    }

    fn purge_primary(&self, primary: &str) -> Result<usize, StoreError> {
        if primary.is_empty() {
            return Ok(0);
        }
        self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM conversation_records WHERE primary_identity = ?1",
                params![primary],
            )?)
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn repo() -> ConversationRepo {
        ConversationRepo::new(Database::in_memory().unwrap())
    }

    fn alice() -> TenantIdentity {
        TenantIdentity::new("alice", "1111111111")
    }

    fn bob() -> TenantIdentity {
        TenantIdentity::new("bob", "1111111111")
    }

    fn record(tenant: TenantIdentity, role: Role, text: &str, embedding: Vec<f32>) -> ConversationRecord {
        ConversationRecord::new(tenant, role, text, embedding)
    }

    /// Unit vector at `angle` radians in the plane.
    fn at(angle: f32) -> Vec<f32> {
        vec![angle.cos(), angle.sin()]
    }

    #[test]
    fn upsert_and_history_roundtrip() {
        let repo = repo();
        let rec = record(alice(), Role::User, "what's my balance", vec![1.0, 0.0]);
        repo.upsert(&rec).unwrap();

        let history = repo.history(&alice(), 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, rec.id);
        assert_eq!(history[0].text, "what's my balance");
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].tenant, alice());
        assert_eq!(history[0].embedding, vec![1.0, 0.0]);
    }

    #[test]
    fn upsert_same_id_replaces() {
        let repo = repo();
        let mut rec = record(alice(), Role::User, "first", vec![1.0]);
        repo.upsert(&rec).unwrap();
        rec.text = "second".into();
        repo.upsert(&rec).unwrap();
        let history = repo.history(&alice(), 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "second");
    }

    #[test]
    fn query_similar_is_tenant_scoped() {
        let repo = repo();
        repo.upsert(&record(alice(), Role::User, "alice balance", vec![1.0, 0.0])).unwrap();
        repo.upsert(&record(bob(), Role::User, "bob balance", vec![1.0, 0.0])).unwrap();
        repo.upsert(&record(TenantIdentity::legacy("1111111111"), Role::User, "legacy", vec![1.0, 0.0]))
            .unwrap();

        let hits = repo.query_similar(&alice(), &[1.0, 0.0], 5, 0.7).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.text, "alice balance");
        assert!(hits.iter().all(|h| h.record.tenant == alice()));
    }

    #[test]
    fn query_similar_threshold_is_strict() {
        let repo = repo();
        // cos(angle) == 0.7 exactly is excluded; use a value just below.
        let below = 0.7_f32.acos() + 0.01;
        repo.upsert(&record(alice(), Role::User, "near", at(0.1))).unwrap();
        repo.upsert(&record(alice(), Role::User, "far", at(below))).unwrap();
        repo.upsert(&record(alice(), Role::User, "opposite", at(std::f32::consts::PI))).unwrap();

        let hits = repo.query_similar(&alice(), &at(0.0), 5, 0.7).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.text, "near");
        assert!(hits[0].similarity > 0.7);
    }

    #[test]
    fn query_similar_limits_and_orders() {
        let repo = repo();
        for i in 0..8 {
            let angle = 0.05 * i as f32;
            repo.upsert(&record(alice(), Role::Assistant, &format!("r{i}"), at(angle))).unwrap();
        }

        let hits = repo.query_similar(&alice(), &at(0.0), 5, 0.7).unwrap();
        assert_eq!(hits.len(), 5);
        for w in hits.windows(2) {
            assert!(w[0].similarity >= w[1].similarity);
        }
        assert_eq!(hits[0].record.text, "r0");
        assert!(hits.iter().all(|h| h.similarity > 0.7));
    }

    #[test]
    fn dimension_mismatch_never_matches() {
        let repo = repo();
        repo.upsert(&record(alice(), Role::User, "3d", vec![1.0, 0.0, 0.0])).unwrap();
        let hits = repo.query_similar(&alice(), &[1.0, 0.0], 5, 0.7).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn empty_store_returns_empty() {
        let hits = repo().query_similar(&alice(), &[1.0, 0.0], 5, 0.7).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn history_returns_latest_oldest_first() {
        let repo = repo();
        let base = Utc::now();
        for i in 0..6 {
            let mut rec = record(alice(), Role::User, &format!("m{i}"), vec![1.0]);
            rec.created_at = base + Duration::seconds(i);
            repo.upsert(&rec).unwrap();
        }

        let recent = repo.history(&alice(), 4).unwrap();
        let texts: Vec<&str> = recent.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4", "m5"]);
        assert!(repo.history(&alice(), 0).unwrap().is_empty());
    }

    #[test]
    fn clear_only_touches_one_tenant() {
        let repo = repo();
        repo.upsert(&record(alice(), Role::User, "a1", vec![1.0])).unwrap();
        repo.upsert(&record(alice(), Role::Assistant, "a2", vec![1.0])).unwrap();
        repo.upsert(&record(bob(), Role::User, "b1", vec![1.0])).unwrap();

        assert_eq!(repo.clear(&alice()).unwrap(), 2);
        assert_eq!(repo.count(&alice()).unwrap(), 0);
        assert_eq!(repo.count(&bob()).unwrap(), 1);
        assert_eq!(repo.clear(&alice()).unwrap(), 0);
    }

    #[test]
    fn purge_primary_spans_sub_identities() {
        let repo = repo();
        repo.upsert(&record(TenantIdentity::new("alice", "1"), Role::User, "x", vec![1.0])).unwrap();
        repo.upsert(&record(TenantIdentity::new("alice", "2"), Role::User, "y", vec![1.0])).unwrap();
        repo.upsert(&record(bob(), Role::User, "z", vec![1.0])).unwrap();
        repo.upsert(&record(TenantIdentity::legacy("1"), Role::User, "w", vec![1.0])).unwrap();

        assert_eq!(repo.purge_primary("alice").unwrap(), 2);
        assert_eq!(repo.count(&bob()).unwrap(), 1);
        assert_eq!(repo.count(&TenantIdentity::legacy("1")).unwrap(), 1);
        assert_eq!(repo.purge_primary("").unwrap(), 0);
    }

    #[test]
    fn corrupt_role_is_reported() {
        let repo = repo();
        repo.upsert(&record(alice(), Role::User, "x", vec![1.0])).unwrap();
        repo.db
            .with_conn(|conn| {
                let _ = conn.execute("UPDATE conversation_records SET role = 'system'", [])?;
                Ok(())
            })
            .unwrap();
        let err = repo.history(&alice(), 5).unwrap_err();
        assert!(matches!(err, StoreError::CorruptRow { column: "role", .. }));
    }
}
