//! In-memory reference backend.
//!
//! An id-keyed map plus an insertion-order index, for tests and
//! low-durability deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::LedgerResult;
use crate::record::AuditRecord;
use crate::storage::{AuditStorage, QueryFilter, SortOrder};

#[derive(Default)]
struct MemoryInner {
    records: HashMap<Uuid, AuditRecord>,
    /// Persistence order. Ranges and `get_last_record` read this.
    order: Vec<Uuid>,
}

#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage").finish_non_exhaustive()
    }
}

fn sort_and_page(mut records: Vec<AuditRecord>, filter: &QueryFilter) -> Vec<AuditRecord> {
    // Stable sort keeps insertion order for equal timestamps.
    match filter.order {
        SortOrder::TimestampAsc => records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp)),
        SortOrder::TimestampDesc => records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
    }

    let offset = filter.offset.unwrap_or(0);
    let records = if offset >= records.len() {
        Vec::new()
    } else {
        records.split_off(offset)
    };

    match filter.limit {
        Some(limit) => records.into_iter().take(limit).collect(),
        None => records,
    }
}

#[async_trait]
impl AuditStorage for MemoryStorage {
    async fn init(&self) -> LedgerResult<()> {
        Ok(())
    }

    async fn insert(&self, record: &AuditRecord) -> LedgerResult<()> {
        let mut inner = self.inner.lock().await;
        inner.records.insert(record.id, record.clone());
        inner.order.push(record.id);
        Ok(())
    }

    async fn insert_batch(&self, records: &[AuditRecord]) -> LedgerResult<()> {
        // Single lock acquisition makes the batch all-or-nothing.
        let mut inner = self.inner.lock().await;
        for record in records {
            inner.records.insert(record.id, record.clone());
            inner.order.push(record.id);
        }
        Ok(())
    }

    async fn query(&self, filter: &QueryFilter) -> LedgerResult<Vec<AuditRecord>> {
        let inner = self.inner.lock().await;
        let matching: Vec<AuditRecord> = inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        Ok(sort_and_page(matching, filter))
    }

    async fn get(&self, id: Uuid) -> LedgerResult<Option<AuditRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.records.get(&id).cloned())
    }

    async fn get_last_record(&self) -> LedgerResult<Option<AuditRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .order
            .last()
            .and_then(|id| inner.records.get(id))
            .cloned())
    }

    async fn get_range(
        &self,
        from_id: Option<Uuid>,
        to_id: Option<Uuid>,
        max: usize,
    ) -> LedgerResult<Vec<AuditRecord>> {
        let inner = self.inner.lock().await;

        let start = match from_id {
            Some(id) => match inner.order.iter().position(|x| *x == id) {
                Some(pos) => pos,
                None => return Ok(Vec::new()),
            },
            None => 0,
        };
        let end = match to_id {
            Some(id) => match inner.order.iter().position(|x| *x == id) {
                Some(pos) => pos + 1,
                None => return Ok(Vec::new()),
            },
            None => inner.order.len(),
        };
        if start >= end {
            return Ok(Vec::new());
        }

        Ok(inner.order[start..end]
            .iter()
            .take(max)
            .filter_map(|id| inner.records.get(id))
            .cloned()
            .collect())
    }

    async fn count(&self, filter: Option<&QueryFilter>) -> LedgerResult<u64> {
        let inner = self.inner.lock().await;
        let count = match filter {
            Some(filter) => inner
                .records
                .values()
                .filter(|r| filter.matches(r))
                .count(),
            None => inner.records.len(),
        };
        Ok(count as u64)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> LedgerResult<u64> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let doomed: Vec<Uuid> = inner
            .records
            .values()
            .filter(|r| r.timestamp < cutoff)
            .map(|r| r.id)
            .collect();
        for id in &doomed {
            inner.records.remove(id);
        }
        let records = &inner.records;
        inner.order.retain(|id| records.contains_key(id));
        Ok(doomed.len() as u64)
    }

    async fn close(&self) -> LedgerResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{
        AuditRecord, CorrelationIds, EventCategory, EventType, Severity,
    };
    use chrono::{Duration, TimeZone};

    fn record_at(minute: u32, severity: Severity) -> AuditRecord {
        AuditRecord {
            id: Uuid::new_v4(),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 10, minute, 0).unwrap(),
            event_type: EventType::TransactionScreened,
            actor: None,
            correlation: CorrelationIds::default(),
            category: EventCategory::Transaction,
            severity,
            description: format!("record at minute {}", minute),
            data: serde_json::Value::Null,
            evidence: None,
            previous_hash: None,
            record_hash: "sha256:test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let storage = MemoryStorage::new();
        let record = record_at(0, Severity::Info);
        storage.insert(&record).await.unwrap();

        let fetched = storage.get(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, record.id);
        assert!(storage.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_severity_and_time_range() {
        let storage = MemoryStorage::new();
        let records = vec![
            record_at(0, Severity::Info),
            record_at(5, Severity::Warn),
            record_at(10, Severity::Critical),
        ];
        storage.insert_batch(&records).await.unwrap();

        let filter = QueryFilter {
            severities: Some(vec![Severity::Critical]),
            ..Default::default()
        };
        let found = storage.query(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Critical);

        // from inclusive, to exclusive
        let filter = QueryFilter {
            from: Some(Utc.with_ymd_and_hms(2024, 6, 1, 10, 5, 0).unwrap()),
            to: Some(Utc.with_ymd_and_hms(2024, 6, 1, 10, 10, 0).unwrap()),
            ..Default::default()
        };
        let found = storage.query(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, Severity::Warn);
    }

    #[tokio::test]
    async fn test_query_order_and_pagination() {
        let storage = MemoryStorage::new();
        for minute in 0..5 {
            storage
                .insert(&record_at(minute, Severity::Info))
                .await
                .unwrap();
        }

        let filter = QueryFilter {
            order: SortOrder::TimestampDesc,
            limit: Some(2),
            offset: Some(1),
            ..Default::default()
        };
        let found = storage.query(&filter).await.unwrap();
        assert_eq!(found.len(), 2);
        use chrono::Timelike;
        assert!(found[0].timestamp > found[1].timestamp);
        assert_eq!(found[0].timestamp.minute(), 3);
        assert_eq!(found[1].timestamp.minute(), 2);
    }

    #[tokio::test]
    async fn test_get_range_by_ids() {
        let storage = MemoryStorage::new();
        let records: Vec<AuditRecord> = (0..4).map(|m| record_at(m, Severity::Info)).collect();
        for r in &records {
            storage.insert(r).await.unwrap();
        }

        let range = storage
            .get_range(Some(records[1].id), Some(records[2].id), 100)
            .await
            .unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].id, records[1].id);
        assert_eq!(range[1].id, records[2].id);

        // Unknown bound id yields empty, not an error.
        let range = storage
            .get_range(Some(Uuid::new_v4()), None, 100)
            .await
            .unwrap();
        assert!(range.is_empty());
    }

    #[tokio::test]
    async fn test_delete_older_than() {
        let storage = MemoryStorage::new();
        for minute in 0..4 {
            storage
                .insert(&record_at(minute, Severity::Info))
                .await
                .unwrap();
        }

        let cutoff = Utc.with_ymd_and_hms(2024, 6, 1, 10, 2, 0).unwrap();
        let deleted = storage.delete_older_than(cutoff).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(storage.count(None).await.unwrap(), 2);

        // Insertion order survives the deletion.
        let last = storage.get_last_record().await.unwrap().unwrap();
        assert_eq!(last.timestamp, cutoff + Duration::minutes(1));
    }
}
