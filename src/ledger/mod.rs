//! Ledger Service
//!
//! Owns the hash-chain head, batches incoming records, flushes them to
//! the storage backend, answers queries and exports, and runs integrity
//! verification.
//!
//! Durability contract: `record_event` returns once the record is
//! chained and queued, *before* it reaches durable storage. A crash
//! loses still-pending records; after restart the chain continues from
//! the last persisted record. Callers needing a durability barrier must
//! call `flush` explicitly.

pub mod export;
pub mod retention;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::evidence::{
    EvidenceAttachment, EvidenceData, EvidenceStore, FsEvidenceStore, NewEvidence,
};
use crate::record::hashing::{compute_record_hash, hash_bytes};
use crate::record::{now_micros, Actor, AuditRecord, EventCategory, EventType, NewEvent, Severity};
use crate::storage::{self, AuditStorage, QueryFilter, DEFAULT_RANGE_LIMIT};

use export::ExportCursor;
use retention::RetentionManager;

/// Ceiling on the record scan behind [`AuditLedger::stats`]. Ledgers
/// larger than this get approximate per-bucket counts; `total_records`
/// stays exact.
pub const STATS_SCAN_LIMIT: usize = 10_000;

/// Outcome of a chain verification walk.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityCheckResult {
    pub valid: bool,
    pub records_checked: usize,
    pub first_invalid_id: Option<Uuid>,
    pub error: Option<String>,
}

impl IntegrityCheckResult {
    fn ok(records_checked: usize) -> Self {
        IntegrityCheckResult {
            valid: true,
            records_checked,
            first_invalid_id: None,
            error: None,
        }
    }

    fn invalid(records_checked: usize, id: Uuid, error: String) -> Self {
        IntegrityCheckResult {
            valid: false,
            records_checked,
            first_invalid_id: Some(id),
            error: Some(error),
        }
    }
}

/// Aggregate counts over the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerStats {
    pub total_records: u64,
    pub by_event_type: HashMap<String, u64>,
    pub by_category: HashMap<String, u64>,
    pub by_severity: HashMap<String, u64>,
    pub evidence_count: u64,
    pub evidence_total_bytes: u64,
    pub oldest_record: Option<DateTime<Utc>>,
    pub newest_record: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Initializing,
    Ready,
    ShuttingDown,
    Closed,
}

/// Chain head plus pending batch. Guarded by one mutex: the
/// read-modify-write of the head and the batch append are a single
/// serialized critical section (the single-writer discipline).
struct ChainState {
    lifecycle: Lifecycle,
    last_hash: Option<String>,
    pending: Vec<AuditRecord>,
}

struct LedgerInner {
    config: LedgerConfig,
    storage: Arc<dyn AuditStorage>,
    evidence: Option<Arc<dyn EvidenceStore>>,
    state: Mutex<ChainState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// The audit ledger service. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AuditLedger {
    inner: Arc<LedgerInner>,
}

fn check_lifecycle(lifecycle: Lifecycle) -> LedgerResult<()> {
    match lifecycle {
        Lifecycle::Ready => Ok(()),
        Lifecycle::ShuttingDown | Lifecycle::Closed => Err(LedgerError::Closed),
        Lifecycle::Uninitialized | Lifecycle::Initializing => Err(LedgerError::NotInitialized),
    }
}

impl AuditLedger {
    /// Build a ledger with backends selected by configuration.
    pub async fn connect(config: LedgerConfig) -> LedgerResult<Self> {
        config.validate()?;
        let storage = storage::from_config(&config).await?;
        let evidence: Option<Arc<dyn EvidenceStore>> = if config.evidence.enabled {
            Some(Arc::new(FsEvidenceStore::open(
                config.evidence.storage_path.clone(),
                config.evidence.compress,
            )?))
        } else {
            None
        };
        Ok(Self::with_backends(config, storage, evidence))
    }

    /// Build a ledger around explicit backend instances.
    pub fn with_backends(
        config: LedgerConfig,
        storage: Arc<dyn AuditStorage>,
        evidence: Option<Arc<dyn EvidenceStore>>,
    ) -> Self {
        AuditLedger {
            inner: Arc::new(LedgerInner {
                config,
                storage,
                evidence,
                state: Mutex::new(ChainState {
                    lifecycle: Lifecycle::Uninitialized,
                    last_hash: None,
                    pending: Vec::new(),
                }),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.inner.config
    }

    /// Initialize storage, seed the chain head from the last persisted
    /// record, and start the background flush and retention tasks.
    pub async fn init(&self) -> LedgerResult<()> {
        {
            let mut state = self.inner.state.lock().await;
            if state.lifecycle != Lifecycle::Uninitialized {
                return Err(LedgerError::Config(
                    "Ledger already initialized".to_string(),
                ));
            }
            state.lifecycle = Lifecycle::Initializing;
        }

        self.inner.storage.init().await?;

        if self.inner.config.hash_chaining {
            let last = self.inner.storage.get_last_record().await?;
            let mut state = self.inner.state.lock().await;
            state.last_hash = last.map(|r| r.record_hash);
            if state.last_hash.is_some() {
                debug!("Chain head seeded from last persisted record");
            }
        }

        let mut tasks = self.inner.tasks.lock().await;
        tasks.push(self.spawn_flush_task());
        if self.inner.config.retention_days > 0 {
            tasks.push(self.spawn_retention_task());
        }
        drop(tasks);

        self.inner.state.lock().await.lifecycle = Lifecycle::Ready;
        info!(
            storage = ?self.inner.config.storage,
            batch_size = self.inner.config.batch_size,
            "Audit ledger ready"
        );
        Ok(())
    }

    /// Record a business event as a new chained audit record.
    ///
    /// Assigns id and timestamp, links the record to the current chain
    /// head, and queues it for the next flush. The returned record is
    /// chain-ordered but not yet durable.
    pub async fn record_event(&self, event: NewEvent) -> LedgerResult<AuditRecord> {
        let config = &self.inner.config;
        let mut state = self.inner.state.lock().await;
        check_lifecycle(state.lifecycle)?;

        let previous_hash = if config.hash_chaining {
            state.last_hash.clone()
        } else {
            None
        };

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
        record.record_hash = compute_record_hash(&record, config.digest);

        if config.hash_chaining {
            state.last_hash = Some(record.record_hash.clone());
        }
        state.pending.push(record.clone());

        if state.pending.len() >= config.batch_size {
            if let Err(e) = self.flush_locked(&mut state).await {
                // The record stays queued and chained; the next flush
                // retries it. The caller gets the record back either way.
                error!("Size-triggered audit flush failed: {}", e);
            }
        }

        Ok(record)
    }

    /// Drain the pending batch to storage.
    ///
    /// On failure the batch is restored to the front of the queue in
    /// creation order and the error is returned; the chain head is
    /// never rolled back.
    pub async fn flush(&self) -> LedgerResult<()> {
        let mut state = self.inner.state.lock().await;
        match state.lifecycle {
            Lifecycle::Closed => return Err(LedgerError::Closed),
            Lifecycle::Uninitialized => return Err(LedgerError::NotInitialized),
            _ => {}
        }
        self.flush_locked(&mut state).await
    }

    async fn flush_locked(&self, state: &mut ChainState) -> LedgerResult<()> {
        if state.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut state.pending);
        match self.inner.storage.insert_batch(&batch).await {
            Ok(()) => {
                debug!(count = batch.len(), "Flushed audit batch");
                Ok(())
            }
            Err(e) => {
                // Restore at the front so redelivery preserves order.
                let mut restored = batch;
                restored.append(&mut state.pending);
                state.pending = restored;
                Err(e)
            }
        }
    }

    /// Filtered query. Flushes the pending batch first so results are
    /// consistent with just-submitted records.
    pub async fn query_events(&self, filter: &QueryFilter) -> LedgerResult<Vec<AuditRecord>> {
        self.ensure_ready().await?;
        self.flush().await?;
        self.inner.storage.query(filter).await
    }

    /// Paged export starting at offset 0. Pages are fetched lazily; the
    /// full result set is never buffered.
    pub async fn export_events(&self, filter: QueryFilter) -> LedgerResult<ExportCursor> {
        self.export_events_from(filter, 0).await
    }

    /// Paged export restarted from a previously observed offset.
    pub async fn export_events_from(
        &self,
        filter: QueryFilter,
        offset: usize,
    ) -> LedgerResult<ExportCursor> {
        self.ensure_ready().await?;
        self.flush().await?;
        Ok(ExportCursor::new(
            self.inner.storage.clone(),
            filter,
            offset,
        ))
    }

    /// Point lookup by record id. Consults the pending batch first, so
    /// records are visible immediately after `record_event` returns.
    pub async fn get_record(&self, id: Uuid) -> LedgerResult<Option<AuditRecord>> {
        self.ensure_ready().await?;
        {
            let state = self.inner.state.lock().await;
            if let Some(record) = state.pending.iter().find(|r| r.id == id) {
                return Ok(Some(record.clone()));
            }
        }
        self.inner.storage.get(id).await
    }

    pub async fn get_by_transaction_id(&self, id: &str) -> LedgerResult<Vec<AuditRecord>> {
        self.correlated_lookup(QueryFilter {
            transaction_id: Some(id.to_string()),
            ..Default::default()
        })
        .await
    }

    pub async fn get_by_entity_id(&self, id: &str) -> LedgerResult<Vec<AuditRecord>> {
        self.correlated_lookup(QueryFilter {
            entity_id: Some(id.to_string()),
            ..Default::default()
        })
        .await
    }

    /// Correlation lookup across persisted records and the pending
    /// batch, without forcing a flush.
    async fn correlated_lookup(&self, filter: QueryFilter) -> LedgerResult<Vec<AuditRecord>> {
        self.ensure_ready().await?;
        let mut results = self.inner.storage.query(&filter).await?;
        let state = self.inner.state.lock().await;
        for record in &state.pending {
            if filter.matches(record) {
                results.push(record.clone());
            }
        }
        Ok(results)
    }

    /// Walk the persisted chain and verify every link and every record
    /// hash. Bounded by ids when given, otherwise over the full log up
    /// to the default range ceiling.
    ///
    /// A broken chain is a finding, never auto-repaired.
    pub async fn verify_integrity(
        &self,
        from_id: Option<Uuid>,
        to_id: Option<Uuid>,
    ) -> LedgerResult<IntegrityCheckResult> {
        if !self.inner.config.hash_chaining {
            return Ok(IntegrityCheckResult::ok(0));
        }
        self.ensure_ready().await?;
        self.flush().await?;

        let records = self
            .inner
            .storage
            .get_range(from_id, to_id, DEFAULT_RANGE_LIMIT)
            .await?;

        let mut expected_previous: Option<String> = None;
        for (index, record) in records.iter().enumerate() {
            if index > 0 && record.previous_hash != expected_previous {
                warn!(id = %record.id, "Chain link mismatch");
                return Ok(IntegrityCheckResult::invalid(
                    index + 1,
                    record.id,
                    format!(
                        "Chain broken: expected previous hash {:?}, found {:?}",
                        expected_previous, record.previous_hash
                    ),
                ));
            }
            let recomputed = compute_record_hash(record, self.inner.config.digest);
            if recomputed != record.record_hash {
                warn!(id = %record.id, "Record hash mismatch");
                return Ok(IntegrityCheckResult::invalid(
                    index + 1,
                    record.id,
                    "Record hash does not match record contents".to_string(),
                ));
            }
            expected_previous = Some(record.record_hash.clone());
        }

        debug!(records_checked = records.len(), "Chain verification passed");
        Ok(IntegrityCheckResult::ok(records.len()))
    }

    /// Store evidence content, returning its metadata with the opaque
    /// storage locator filled in. Fails before any write when the
    /// content exceeds the configured maximum size.
    pub async fn store_evidence(&self, input: NewEvidence) -> LedgerResult<EvidenceAttachment> {
        self.ensure_ready().await?;
        let store = self
            .inner
            .evidence
            .as_ref()
            .ok_or(LedgerError::EvidenceDisabled)?;

        let max = self.inner.config.evidence.max_size;
        if input.content.len() > max {
            return Err(LedgerError::EvidenceTooLarge {
                size: input.content.len(),
                max,
            });
        }

        let mut attachment = EvidenceAttachment {
            id: Uuid::new_v4(),
            evidence_type: input.evidence_type,
            mime_type: input.mime_type,
            filename: input.filename,
            size: input.content.len() as u64,
            content_hash: hash_bytes(self.inner.config.digest, &input.content),
            captured_at: now_micros(),
            description: input.description,
            storage_ref: String::new(),
        };
        attachment.storage_ref = store.store(&attachment, &input.content).await?;
        Ok(attachment)
    }

    /// Fetch evidence content and metadata by id.
    pub async fn get_evidence(&self, id: Uuid) -> LedgerResult<Option<EvidenceData>> {
        self.ensure_ready().await?;
        match &self.inner.evidence {
            Some(store) => store.find_by_id(id).await,
            None => Ok(None),
        }
    }

    /// Delete an evidence item. Evidence lifecycle is independent of
    /// record persistence.
    pub async fn delete_evidence(&self, id: Uuid) -> LedgerResult<bool> {
        self.ensure_ready().await?;
        let store = match &self.inner.evidence {
            Some(store) => store,
            None => return Ok(false),
        };
        match store.find_by_id(id).await? {
            Some(data) => store.delete(&data.attachment.storage_ref).await,
            None => Ok(false),
        }
    }

    /// Aggregate statistics over a bounded scan of the ledger.
    pub async fn stats(&self) -> LedgerResult<LedgerStats> {
        self.ensure_ready().await?;
        self.flush().await?;

        let filter = QueryFilter {
            limit: Some(STATS_SCAN_LIMIT),
            ..Default::default()
        };
        let records = self.inner.storage.query(&filter).await?;
        let total_records = self.inner.storage.count(None).await?;

        let mut by_event_type: HashMap<String, u64> = HashMap::new();
        let mut by_category: HashMap<String, u64> = HashMap::new();
        let mut by_severity: HashMap<String, u64> = HashMap::new();
        let mut oldest: Option<DateTime<Utc>> = None;
        let mut newest: Option<DateTime<Utc>> = None;

        for record in &records {
            *by_event_type
                .entry(record.event_type.as_str().to_string())
                .or_insert(0) += 1;
            *by_category
                .entry(record.category.as_str().to_string())
                .or_insert(0) += 1;
            *by_severity
                .entry(record.severity.as_str().to_string())
                .or_insert(0) += 1;
            if oldest.map_or(true, |t| record.timestamp < t) {
                oldest = Some(record.timestamp);
            }
            if newest.map_or(true, |t| record.timestamp > t) {
                newest = Some(record.timestamp);
            }
        }

        let (evidence_count, evidence_total_bytes) = match &self.inner.evidence {
            Some(store) => (store.count().await?, store.total_size().await?),
            None => (0, 0),
        };

        Ok(LedgerStats {
            total_records,
            by_event_type,
            by_category,
            by_severity,
            evidence_count,
            evidence_total_bytes,
            oldest_record: oldest,
            newest_record: newest,
        })
    }

    /// Bulk retention deletion with an audit trail of its own.
    ///
    /// Chain verification spanning the pruned range fails afterwards by
    /// design; the deletion is recorded as a new audit record.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> LedgerResult<u64> {
        self.ensure_ready().await?;
        self.flush().await?;
        let deleted = self.inner.storage.delete_older_than(cutoff).await?;
        if deleted > 0 {
            warn!(
                deleted,
                %cutoff,
                "Retention pruning removed chain members; verification across the pruned range will fail"
            );
            let event = NewEvent::new(
                EventType::RetentionPruned,
                EventCategory::System,
                Severity::Warn,
                format!("Retention pruning removed {} records older than {}", deleted, cutoff),
            )
            .with_actor(Actor::system("retention-manager"))
            .with_data(serde_json::json!({
                "deleted": deleted,
                "cutoff": cutoff.to_rfc3339(),
            }));
            self.record_event(event).await?;
        }
        Ok(deleted)
    }

    /// Final flush, stop background tasks, close storage. The ledger
    /// accepts no further operations afterwards.
    pub async fn shutdown(&self) -> LedgerResult<()> {
        let flush_result = {
            let mut state = self.inner.state.lock().await;
            if state.lifecycle == Lifecycle::Closed {
                return Ok(());
            }
            state.lifecycle = Lifecycle::ShuttingDown;
            let result = self.flush_locked(&mut state).await;
            state.lifecycle = Lifecycle::Closed;
            result
        };

        for handle in self.inner.tasks.lock().await.drain(..) {
            handle.abort();
        }
        self.inner.storage.close().await?;
        info!("Audit ledger closed");
        flush_result
    }

    async fn ensure_ready(&self) -> LedgerResult<()> {
        check_lifecycle(self.inner.state.lock().await.lifecycle)
    }

    fn spawn_flush_task(&self) -> JoinHandle<()> {
        let ledger = self.clone();
        let interval =
            tokio::time::Duration::from_millis(self.inner.config.flush_interval_ms.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match ledger.flush().await {
                    Ok(()) => {}
                    Err(LedgerError::Closed) => break,
                    Err(e) => error!("Periodic audit flush failed: {}", e),
                }
            }
        })
    }

    fn spawn_retention_task(&self) -> JoinHandle<()> {
        let manager = RetentionManager::new(
            self.inner.storage.clone(),
            self.inner.config.retention_days,
        );
        tokio::spawn(async move {
            tokio::time::sleep(retention::STARTUP_DELAY).await;
            let mut ticker = tokio::time::interval(retention::SWEEP_INTERVAL);
            loop {
                // First tick fires immediately: the startup run.
                ticker.tick().await;
                if let Err(e) = manager.sweep().await {
                    error!("Retention sweep failed: {}", e);
                }
            }
        })
    }
}

impl std::fmt::Debug for AuditLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLedger")
            .field("storage", &self.inner.config.storage)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn test_ledger() -> AuditLedger {
        let config = LedgerConfig {
            // Large batch and long interval keep flushing under test control.
            batch_size: 1000,
            flush_interval_ms: 3_600_000,
            evidence: crate::config::EvidenceConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };
        AuditLedger::with_backends(config, Arc::new(MemoryStorage::new()), None)
    }

    fn sample_event(description: &str) -> NewEvent {
        NewEvent::new(
            EventType::TransactionScreened,
            EventCategory::Transaction,
            Severity::Info,
            description,
        )
    }

    #[tokio::test]
    async fn test_operations_require_init() {
        let ledger = test_ledger();
        let result = ledger.record_event(sample_event("too early")).await;
        assert!(matches!(result, Err(LedgerError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_closed_ledger_rejects_operations() {
        let ledger = test_ledger();
        ledger.init().await.unwrap();
        ledger.shutdown().await.unwrap();

        let result = ledger.record_event(sample_event("too late")).await;
        assert!(matches!(result, Err(LedgerError::Closed)));

        // Shutdown is idempotent.
        assert!(ledger.shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn test_records_chain_in_creation_order() {
        let ledger = test_ledger();
        ledger.init().await.unwrap();

        let first = ledger.record_event(sample_event("first")).await.unwrap();
        let second = ledger.record_event(sample_event("second")).await.unwrap();

        assert!(first.previous_hash.is_none());
        assert!(second.follows(&first));
    }

    #[tokio::test]
    async fn test_pending_records_visible_to_point_lookup() {
        let ledger = test_ledger();
        ledger.init().await.unwrap();

        let record = ledger.record_event(sample_event("pending")).await.unwrap();

        // Not yet flushed, but visible by id.
        let found = ledger.get_record(record.id).await.unwrap().unwrap();
        assert_eq!(found.id, record.id);

        // Invisible to storage until a flush happens.
        assert_eq!(ledger.inner.storage.count(None).await.unwrap(), 0);
        ledger.flush().await.unwrap();
        assert_eq!(ledger.inner.storage.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_size_threshold_triggers_flush() {
        let config = LedgerConfig {
            batch_size: 2,
            flush_interval_ms: 3_600_000,
            evidence: crate::config::EvidenceConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let storage = Arc::new(MemoryStorage::new());
        let ledger = AuditLedger::with_backends(config, storage.clone(), None);
        ledger.init().await.unwrap();

        ledger.record_event(sample_event("one")).await.unwrap();
        assert_eq!(storage.count(None).await.unwrap(), 0);
        ledger.record_event(sample_event("two")).await.unwrap();
        assert_eq!(storage.count(None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_chain_seeded_from_persisted_head_after_restart() {
        let storage = Arc::new(MemoryStorage::new());
        let config = LedgerConfig {
            evidence: crate::config::EvidenceConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };

        let ledger = AuditLedger::with_backends(config.clone(), storage.clone(), None);
        ledger.init().await.unwrap();
        let first = ledger.record_event(sample_event("before restart")).await.unwrap();
        ledger.shutdown().await.unwrap();

        // New service instance over the same storage.
        let ledger = AuditLedger::with_backends(config, storage, None);
        ledger.init().await.unwrap();
        let second = ledger.record_event(sample_event("after restart")).await.unwrap();
        assert_eq!(second.previous_hash.as_deref(), Some(first.record_hash.as_str()));
    }

    #[tokio::test]
    async fn test_verify_is_noop_without_chaining() {
        let config = LedgerConfig {
            hash_chaining: false,
            evidence: crate::config::EvidenceConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let ledger = AuditLedger::with_backends(config, Arc::new(MemoryStorage::new()), None);
        ledger.init().await.unwrap();

        let record = ledger.record_event(sample_event("unchained")).await.unwrap();
        assert!(record.previous_hash.is_none());

        let result = ledger.verify_integrity(None, None).await.unwrap();
        assert!(result.valid);
        assert_eq!(result.records_checked, 0);
    }
}
