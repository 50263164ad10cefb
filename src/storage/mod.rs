//! Storage Backends
//!
//! Pluggable persistence behind one trait. Two implementations ship
//! with the crate: an in-memory reference backend and a relational
//! backend on sqlx. Both honor identical filter semantics so query and
//! verification behavior is backend-independent.

pub mod memory;
pub mod relational;

pub use memory::MemoryStorage;
pub use relational::SqlStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{LedgerConfig, StorageKind};
use crate::error::{LedgerError, LedgerResult};
use crate::record::{AuditRecord, EventCategory, EventType, Severity};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    TimestampAsc,
    TimestampDesc,
}

/// Query filter shared by every backend.
///
/// Time range is `from` inclusive, `to` exclusive. `limit`/`offset`
/// paginate after ordering.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub event_types: Option<Vec<EventType>>,
    pub categories: Option<Vec<EventCategory>>,
    pub severities: Option<Vec<Severity>>,
    pub actor_id: Option<String>,
    pub transaction_id: Option<String>,
    pub entity_id: Option<String>,
    pub rule_id: Option<String>,
    pub alert_id: Option<String>,
    pub request_id: Option<String>,
    pub session_id: Option<String>,
    pub external_ref: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub order: SortOrder,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl QueryFilter {
    /// Predicate form of the filter, ignoring ordering and pagination.
    ///
    /// The memory backend and the ledger's pending-batch lookups both
    /// run through this, so their semantics cannot drift apart.
    pub fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(types) = &self.event_types {
            if !types.contains(&record.event_type) {
                return false;
            }
        }
        if let Some(categories) = &self.categories {
            if !categories.contains(&record.category) {
                return false;
            }
        }
        if let Some(severities) = &self.severities {
            if !severities.contains(&record.severity) {
                return false;
            }
        }
        if let Some(actor_id) = &self.actor_id {
            match &record.actor {
                Some(actor) if actor.id == *actor_id => {}
                _ => return false,
            }
        }

        let corr = &record.correlation;
        let axes = [
            (&self.transaction_id, &corr.transaction_id),
            (&self.entity_id, &corr.entity_id),
            (&self.rule_id, &corr.rule_id),
            (&self.alert_id, &corr.alert_id),
            (&self.request_id, &corr.request_id),
            (&self.session_id, &corr.session_id),
            (&self.external_ref, &corr.external_ref),
        ];
        for (wanted, actual) in axes {
            if let Some(wanted) = wanted {
                if actual.as_deref() != Some(wanted.as_str()) {
                    return false;
                }
            }
        }

        if let Some(from) = &self.from {
            if record.timestamp < *from {
                return false;
            }
        }
        if let Some(to) = &self.to {
            if record.timestamp >= *to {
                return false;
            }
        }

        true
    }
}

/// Default ceiling for open-ended `get_range` fetches.
pub const DEFAULT_RANGE_LIMIT: usize = 10_000;

/// Persistence contract every backend satisfies.
///
/// Append-only by design: there is no update operation, and the only
/// deletion path is bulk removal by age (retention pruning).
#[async_trait]
pub trait AuditStorage: Send + Sync {
    /// Prepare the backend (create schema, open files). Idempotent.
    async fn init(&self) -> LedgerResult<()>;

    /// Persist a single record.
    async fn insert(&self, record: &AuditRecord) -> LedgerResult<()>;

    /// Persist a batch atomically: either every record lands or none do.
    async fn insert_batch(&self, records: &[AuditRecord]) -> LedgerResult<()>;

    /// Filtered, ordered, paginated fetch.
    async fn query(&self, filter: &QueryFilter) -> LedgerResult<Vec<AuditRecord>>;

    /// Point lookup. Unknown ids are `Ok(None)`, not an error.
    async fn get(&self, id: Uuid) -> LedgerResult<Option<AuditRecord>>;

    /// The most recently persisted record, used to seed the chain head
    /// at service startup.
    async fn get_last_record(&self) -> LedgerResult<Option<AuditRecord>>;

    /// Records in persistence order, bounded inclusively by the given
    /// ids. An open end falls back to the start/end of the log, capped
    /// at `max` records. Unknown bound ids yield an empty result.
    async fn get_range(
        &self,
        from_id: Option<Uuid>,
        to_id: Option<Uuid>,
        max: usize,
    ) -> LedgerResult<Vec<AuditRecord>>;

    /// Count matching records; `None` counts everything.
    async fn count(&self, filter: Option<&QueryFilter>) -> LedgerResult<u64>;

    /// Bulk retention deletion. Returns the number of records removed.
    /// Breaks chain verifiability for any range spanning the deletion.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> LedgerResult<u64>;

    async fn close(&self) -> LedgerResult<()>;
}

/// Build the backend selected by configuration.
pub async fn from_config(config: &LedgerConfig) -> LedgerResult<Arc<dyn AuditStorage>> {
    match config.storage {
        StorageKind::Memory => Ok(Arc::new(MemoryStorage::new())),
        StorageKind::Relational => {
            let url = config.database_url.as_deref().ok_or_else(|| {
                LedgerError::Config(
                    "Relational storage selected but no database URL configured".to_string(),
                )
            })?;
            let storage = SqlStorage::connect(url).await?;
            Ok(Arc::new(storage))
        }
    }
}
