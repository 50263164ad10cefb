//! In-memory evidence store, for tests and low-durability deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::LedgerResult;
use crate::evidence::{EvidenceAttachment, EvidenceData, EvidenceStore};

#[derive(Default)]
struct MemoryEvidenceInner {
    /// Keyed by storage locator.
    items: HashMap<String, EvidenceData>,
    by_id: HashMap<Uuid, String>,
}

#[derive(Clone, Default)]
pub struct MemoryEvidenceStore {
    inner: Arc<Mutex<MemoryEvidenceInner>>,
}

impl MemoryEvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EvidenceStore for MemoryEvidenceStore {
    async fn store(
        &self,
        attachment: &EvidenceAttachment,
        content: &[u8],
    ) -> LedgerResult<String> {
        let storage_ref = format!("mem:{}", attachment.id);
        let mut stored = attachment.clone();
        stored.storage_ref = storage_ref.clone();

        let mut inner = self.inner.lock().await;
        inner.by_id.insert(attachment.id, storage_ref.clone());
        inner.items.insert(
            storage_ref.clone(),
            EvidenceData {
                attachment: stored,
                content: content.to_vec(),
            },
        );
        Ok(storage_ref)
    }

    async fn retrieve(&self, storage_ref: &str) -> LedgerResult<Option<EvidenceData>> {
        let inner = self.inner.lock().await;
        Ok(inner.items.get(storage_ref).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> LedgerResult<Option<EvidenceData>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .by_id
            .get(&id)
            .and_then(|r| inner.items.get(r))
            .cloned())
    }

    async fn delete(&self, storage_ref: &str) -> LedgerResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.items.remove(storage_ref) {
            Some(data) => {
                inner.by_id.remove(&data.attachment.id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn total_size(&self) -> LedgerResult<u64> {
        let inner = self.inner.lock().await;
        Ok(inner.items.values().map(|d| d.attachment.size).sum())
    }

    async fn count(&self) -> LedgerResult<u64> {
        let inner = self.inner.lock().await;
        Ok(inner.items.len() as u64)
    }
}

impl std::fmt::Debug for MemoryEvidenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEvidenceStore").finish_non_exhaustive()
    }
}
