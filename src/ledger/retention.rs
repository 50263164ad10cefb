//! Retention
//!
//! Periodic retention sweep. The sweep is archival-first: it reports
//! what has aged past the retention window but deletes nothing. Actual
//! deletion only happens through the ledger's explicit prune operation,
//! which leaves an audit record of its own.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::time;
use tracing::{debug, warn};

use crate::error::LedgerResult;
use crate::storage::{AuditStorage, QueryFilter};

/// Time between retention sweeps.
pub(crate) const SWEEP_INTERVAL: time::Duration = time::Duration::from_secs(24 * 60 * 60);

/// Delay before the startup sweep, so the sweep never races service
/// initialization.
pub(crate) const STARTUP_DELAY: time::Duration = time::Duration::from_secs(30);

/// What a sweep found.
#[derive(Debug, Clone, Copy)]
pub struct RetentionReport {
    pub cutoff: DateTime<Utc>,
    /// Records older than the cutoff, still in place.
    pub affected: u64,
}

pub struct RetentionManager {
    storage: Arc<dyn AuditStorage>,
    retention_days: u32,
}

impl RetentionManager {
    pub fn new(storage: Arc<dyn AuditStorage>, retention_days: u32) -> Self {
        RetentionManager {
            storage,
            retention_days,
        }
    }

    /// The current retention cutoff, or `None` when retention is
    /// disabled (`retention_days` of 0 keeps everything).
    pub fn cutoff(&self) -> Option<DateTime<Utc>> {
        if self.retention_days == 0 {
            return None;
        }
        Some(Utc::now() - Duration::days(i64::from(self.retention_days)))
    }

    /// Count records past the retention window and surface the finding.
    /// Never deletes.
    pub async fn sweep(&self) -> LedgerResult<Option<RetentionReport>> {
        let cutoff = match self.cutoff() {
            Some(cutoff) => cutoff,
            None => return Ok(None),
        };

        let filter = QueryFilter {
            to: Some(cutoff),
            ..Default::default()
        };
        let affected = self.storage.count(Some(&filter)).await?;

        if affected == 0 {
            debug!(%cutoff, "Retention sweep found nothing to act on");
        } else {
            warn!(
                affected,
                %cutoff,
                "Retention sweep found records past the retention window; \
                 archive them before pruning, pruning breaks chain verification \
                 across the removed range"
            );
        }

        Ok(Some(RetentionReport { cutoff, affected }))
    }
}

impl std::fmt::Debug for RetentionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionManager")
            .field("retention_days", &self.retention_days)
            .finish_non_exhaustive()
    }
}
