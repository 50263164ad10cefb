//! Relational backend on sqlx.
//!
//! Filterable fields live in normalized columns so queries hit indexes;
//! the opaque payload and evidence metadata are stored as JSON text.
//! The `seq` rowid records persistence order and backs range fetches.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::record::{
    Actor, ActorKind, AuditRecord, CorrelationIds, EventCategory, EventType, Severity,
};
use crate::storage::{AuditStorage, QueryFilter, SortOrder};

const SELECT_COLUMNS: &str = "SELECT id, ts, event_type, category, severity, \
     actor_kind, actor_id, actor_name, actor_origin, \
     transaction_id, entity_id, rule_id, alert_id, request_id, session_id, external_ref, \
     description, data, evidence, previous_hash, record_hash \
     FROM audit_records";

pub struct SqlStorage {
    pool: SqlitePool,
}

impl SqlStorage {
    /// Connect to the database behind `url` (e.g. `sqlite://ledger.db`
    /// or `sqlite::memory:`), creating the file if missing.
    pub async fn connect(url: &str) -> LedgerResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| LedgerError::Config(format!("Invalid database URL: {}", e)))?
            .create_if_missing(true);

        // In-memory SQLite databases are per-connection, so the pool is
        // pinned to a single connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(SqlStorage { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        SqlStorage { pool }
    }

    async fn run_migrations(&self) -> LedgerResult<()> {
        let schema = include_str!("../migrations/001_audit_records.sql");
        for statement in schema.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Audit record schema applied");
        Ok(())
    }

    async fn seq_of(&self, id: Uuid) -> LedgerResult<Option<i64>> {
        let row = sqlx::query("SELECT seq FROM audit_records WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>(0)))
    }
}

fn ts_column(ts: &DateTime<Utc>) -> String {
    // Fixed-width RFC 3339 keeps lexicographic and chronological order
    // identical for the TEXT column comparisons below.
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> LedgerResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| LedgerError::Storage(format!("Invalid timestamp column: {}", e)))
}

fn row_to_record(row: &SqliteRow) -> LedgerResult<AuditRecord> {
    let id: String = row.try_get("id")?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| LedgerError::Storage(format!("Invalid id column: {}", e)))?;

    let ts: String = row.try_get("ts")?;
    let event_type: String = row.try_get("event_type")?;
    let category: String = row.try_get("category")?;
    let severity: String = row.try_get("severity")?;

    let actor = match row.try_get::<Option<String>, _>("actor_kind")? {
        Some(kind) => Some(Actor {
            kind: ActorKind::parse(&kind)
                .ok_or_else(|| LedgerError::Storage(format!("Unknown actor kind: {}", kind)))?,
            id: row.try_get::<Option<String>, _>("actor_id")?.unwrap_or_default(),
            name: row.try_get("actor_name")?,
            origin: row.try_get("actor_origin")?,
        }),
        None => None,
    };

    let data: String = row.try_get("data")?;
    let evidence: Option<String> = row.try_get("evidence")?;

    Ok(AuditRecord {
        id,
        timestamp: parse_ts(&ts)?,
        event_type: EventType::parse(&event_type)
            .ok_or_else(|| LedgerError::Storage(format!("Unknown event type: {}", event_type)))?,
        actor,
        correlation: CorrelationIds {
            transaction_id: row.try_get("transaction_id")?,
            entity_id: row.try_get("entity_id")?,
            rule_id: row.try_get("rule_id")?,
            alert_id: row.try_get("alert_id")?,
            request_id: row.try_get("request_id")?,
            session_id: row.try_get("session_id")?,
            external_ref: row.try_get("external_ref")?,
        },
        category: EventCategory::parse(&category)
            .ok_or_else(|| LedgerError::Storage(format!("Unknown category: {}", category)))?,
        severity: Severity::parse(&severity)
            .ok_or_else(|| LedgerError::Storage(format!("Unknown severity: {}", severity)))?,
        description: row.try_get("description")?,
        data: serde_json::from_str(&data)?,
        evidence: match evidence {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        },
        previous_hash: row.try_get("previous_hash")?,
        record_hash: row.try_get("record_hash")?,
    })
}

fn insert_query(record: &AuditRecord) -> LedgerResult<QueryBuilder<'static, Sqlite>> {
    let mut qb = QueryBuilder::new(
        "INSERT INTO audit_records (\
         id, ts, event_type, category, severity, \
         actor_kind, actor_id, actor_name, actor_origin, \
         transaction_id, entity_id, rule_id, alert_id, request_id, session_id, external_ref, \
         description, data, evidence, previous_hash, record_hash) VALUES (",
    );

    let evidence_json = match &record.evidence {
        Some(items) => Some(serde_json::to_string(items)?),
        None => None,
    };

    let mut fields = qb.separated(", ");
    fields.push_bind(record.id.to_string());
    fields.push_bind(ts_column(&record.timestamp));
    fields.push_bind(record.event_type.as_str());
    fields.push_bind(record.category.as_str());
    fields.push_bind(record.severity.as_str());
    fields.push_bind(record.actor.as_ref().map(|a| a.kind.as_str()));
    fields.push_bind(record.actor.as_ref().map(|a| a.id.clone()));
    fields.push_bind(record.actor.as_ref().and_then(|a| a.name.clone()));
    fields.push_bind(record.actor.as_ref().and_then(|a| a.origin.clone()));
    fields.push_bind(record.correlation.transaction_id.clone());
    fields.push_bind(record.correlation.entity_id.clone());
    fields.push_bind(record.correlation.rule_id.clone());
    fields.push_bind(record.correlation.alert_id.clone());
    fields.push_bind(record.correlation.request_id.clone());
    fields.push_bind(record.correlation.session_id.clone());
    fields.push_bind(record.correlation.external_ref.clone());
    fields.push_bind(record.description.clone());
    fields.push_bind(serde_json::to_string(&record.data)?);
    fields.push_bind(evidence_json);
    fields.push_bind(record.previous_hash.clone());
    fields.push_bind(record.record_hash.clone());
    qb.push(")");

    Ok(qb)
}

/// Append the WHERE clause for `filter`. Ordering and pagination are
/// the caller's concern.
fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &QueryFilter) {
    qb.push(" WHERE 1=1");

    if let Some(types) = &filter.event_types {
        qb.push(" AND event_type IN (");
        let mut sep = qb.separated(", ");
        for t in types {
            sep.push_bind(t.as_str());
        }
        qb.push(")");
    }
    if let Some(categories) = &filter.categories {
        qb.push(" AND category IN (");
        let mut sep = qb.separated(", ");
        for c in categories {
            sep.push_bind(c.as_str());
        }
        qb.push(")");
    }
    if let Some(severities) = &filter.severities {
        qb.push(" AND severity IN (");
        let mut sep = qb.separated(", ");
        for s in severities {
            sep.push_bind(s.as_str());
        }
        qb.push(")");
    }
    if let Some(actor_id) = &filter.actor_id {
        qb.push(" AND actor_id = ").push_bind(actor_id.clone());
    }

    let axes = [
        ("transaction_id", &filter.transaction_id),
        ("entity_id", &filter.entity_id),
        ("rule_id", &filter.rule_id),
        ("alert_id", &filter.alert_id),
        ("request_id", &filter.request_id),
        ("session_id", &filter.session_id),
        ("external_ref", &filter.external_ref),
    ];
    for (column, value) in axes {
        if let Some(value) = value {
            qb.push(format!(" AND {} = ", column)).push_bind(value.clone());
        }
    }

    if let Some(from) = &filter.from {
        qb.push(" AND ts >= ").push_bind(ts_column(from));
    }
    if let Some(to) = &filter.to {
        qb.push(" AND ts < ").push_bind(ts_column(to));
    }
}

#[async_trait]
impl AuditStorage for SqlStorage {
    async fn init(&self) -> LedgerResult<()> {
        self.run_migrations().await
    }

    async fn insert(&self, record: &AuditRecord) -> LedgerResult<()> {
        insert_query(record)?.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_batch(&self, records: &[AuditRecord]) -> LedgerResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for record in records {
            insert_query(record)?.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        debug!(count = records.len(), "Persisted audit batch");
        Ok(())
    }

    async fn query(&self, filter: &QueryFilter) -> LedgerResult<Vec<AuditRecord>> {
        let mut qb = QueryBuilder::new(SELECT_COLUMNS);
        push_filter(&mut qb, filter);

        match filter.order {
            SortOrder::TimestampAsc => qb.push(" ORDER BY ts ASC, seq ASC"),
            SortOrder::TimestampDesc => qb.push(" ORDER BY ts DESC, seq DESC"),
        };

        match (filter.limit, filter.offset) {
            (Some(limit), offset) => {
                qb.push(" LIMIT ").push_bind(limit as i64);
                if let Some(offset) = offset {
                    qb.push(" OFFSET ").push_bind(offset as i64);
                }
            }
            (None, Some(offset)) => {
                // SQLite needs a LIMIT clause before OFFSET; -1 is unbounded.
                qb.push(" LIMIT -1 OFFSET ").push_bind(offset as i64);
            }
            (None, None) => {}
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn get(&self, id: Uuid) -> LedgerResult<Option<AuditRecord>> {
        let sql = format!("{} WHERE id = ?", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn get_last_record(&self) -> LedgerResult<Option<AuditRecord>> {
        let sql = format!("{} ORDER BY seq DESC LIMIT 1", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn get_range(
        &self,
        from_id: Option<Uuid>,
        to_id: Option<Uuid>,
        max: usize,
    ) -> LedgerResult<Vec<AuditRecord>> {
        let from_seq = match from_id {
            Some(id) => match self.seq_of(id).await? {
                Some(seq) => Some(seq),
                None => return Ok(Vec::new()),
            },
            None => None,
        };
        let to_seq = match to_id {
            Some(id) => match self.seq_of(id).await? {
                Some(seq) => Some(seq),
                None => return Ok(Vec::new()),
            },
            None => None,
        };

        let mut qb = QueryBuilder::new(SELECT_COLUMNS);
        qb.push(" WHERE 1=1");
        if let Some(seq) = from_seq {
            qb.push(" AND seq >= ").push_bind(seq);
        }
        if let Some(seq) = to_seq {
            qb.push(" AND seq <= ").push_bind(seq);
        }
        qb.push(" ORDER BY seq ASC LIMIT ").push_bind(max as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn count(&self, filter: Option<&QueryFilter>) -> LedgerResult<u64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM audit_records");
        if let Some(filter) = filter {
            push_filter(&mut qb, filter);
        }
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> LedgerResult<u64> {
        let result = sqlx::query("DELETE FROM audit_records WHERE ts < ?")
            .bind(ts_column(&cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn close(&self) -> LedgerResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

impl std::fmt::Debug for SqlStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlStorage").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{now_micros, NewEvent};
    use crate::record::hashing::{compute_record_hash, DigestAlgorithm};

    async fn test_storage() -> SqlStorage {
        let storage = SqlStorage::connect("sqlite::memory:").await.unwrap();
        storage.init().await.unwrap();
        storage
    }

    fn build_record(event: NewEvent, previous_hash: Option<String>) -> AuditRecord {
        let mut record = AuditRecord {
            id: Uuid::new_v4(),
            timestamp: now_micros(),
            event_type: event.event_type,
            actor: event.actor,
            correlation: event.correlation,
            category: event.category,
            severity: event.severity,
            description: event.description,
            data: event.data,
            evidence: event.evidence,
            previous_hash,
            record_hash: String::new(),
        };
        record.record_hash = compute_record_hash(&record, DigestAlgorithm::Sha256);
        record
    }

    #[tokio::test]
    async fn test_round_trip_preserves_hash() {
        let storage = test_storage().await;

        let record = build_record(
            NewEvent::new(
                EventType::RuleTriggered,
                EventCategory::Compliance,
                Severity::Warn,
                "threshold rule fired",
            )
            .with_actor(Actor::system("rule-engine"))
            .with_transaction_id("tx-42")
            .with_data(serde_json::json!({"rule": "aml-threshold", "score": 0.92})),
            None,
        );
        storage.insert(&record).await.unwrap();

        let fetched = storage.get(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.record_hash, record.record_hash);
        assert_eq!(fetched.timestamp, record.timestamp);
        assert_eq!(fetched.data, record.data);
        // The stored hash must still match a recomputation from the
        // round-tripped fields.
        assert!(fetched.verify_hash(DigestAlgorithm::Sha256));
    }

    #[tokio::test]
    async fn test_insert_batch_is_atomic() {
        let storage = test_storage().await;

        let good = build_record(
            NewEvent::new(
                EventType::AlertRaised,
                EventCategory::Risk,
                Severity::Error,
                "alert",
            ),
            None,
        );
        // Same id twice violates the UNIQUE constraint mid-batch.
        let mut dup = good.clone();
        dup.description = "duplicate id".to_string();

        let result = storage.insert_batch(&[good, dup]).await;
        assert!(result.is_err());
        assert_eq!(storage.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_query_filters_and_range() {
        let storage = test_storage().await;

        let mut prev: Option<String> = None;
        let mut ids = Vec::new();
        for severity in [Severity::Info, Severity::Warn, Severity::Critical] {
            let record = build_record(
                NewEvent::new(
                    EventType::TransactionFlagged,
                    EventCategory::Compliance,
                    severity,
                    "flagged",
                ),
                prev.clone(),
            );
            prev = Some(record.record_hash.clone());
            ids.push(record.id);
            storage.insert(&record).await.unwrap();
        }

        let filter = QueryFilter {
            severities: Some(vec![Severity::Critical]),
            ..Default::default()
        };
        let found = storage.query(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, ids[2]);

        let range = storage
            .get_range(Some(ids[0]), Some(ids[1]), 100)
            .await
            .unwrap();
        assert_eq!(range.len(), 2);

        let last = storage.get_last_record().await.unwrap().unwrap();
        assert_eq!(last.id, ids[2]);
    }

    #[tokio::test]
    async fn test_delete_older_than_counts_rows() {
        let storage = test_storage().await;

        let record = build_record(
            NewEvent::new(
                EventType::DataAccess,
                EventCategory::Security,
                Severity::Info,
                "read",
            ),
            None,
        );
        storage.insert(&record).await.unwrap();

        let deleted = storage
            .delete_older_than(Utc::now() + chrono::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(storage.count(None).await.unwrap(), 0);
    }
}
