//! Evidence Store
//!
//! Content-addressed blob storage for evidence attached to audit
//! records. Evidence has its own lifecycle: items are stored and
//! deleted independently of any record's persistence timing, and are
//! referenced from records by opaque storage locators.

pub mod fs;
pub mod memory;

pub use fs::FsEvidenceStore;
pub use memory::MemoryEvidenceStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LedgerResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    Screenshot,
    Document,
    TransactionSnapshot,
    SystemLog,
    ApiResponse,
    Other,
}

impl EvidenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Screenshot => "screenshot",
            Self::Document => "document",
            Self::TransactionSnapshot => "transaction_snapshot",
            Self::SystemLog => "system_log",
            Self::ApiResponse => "api_response",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for EvidenceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Evidence metadata, without the content bytes.
///
/// `content_hash` is the digest of the raw content; re-hashing
/// retrieved content must reproduce it. `storage_ref` is an opaque
/// locator produced by the store — callers never parse it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceAttachment {
    pub id: Uuid,
    pub evidence_type: EvidenceType,
    pub mime_type: String,
    pub filename: Option<String>,
    pub size: u64,
    pub content_hash: String,
    pub captured_at: DateTime<Utc>,
    pub description: String,
    pub storage_ref: String,
}

/// Attachment metadata plus the actual bytes.
#[derive(Debug, Clone)]
pub struct EvidenceData {
    pub attachment: EvidenceAttachment,
    pub content: Vec<u8>,
}

/// Caller-supplied input for storing evidence. The ledger assigns id,
/// capture time, content hash, and storage locator.
#[derive(Debug, Clone)]
pub struct NewEvidence {
    pub evidence_type: EvidenceType,
    pub mime_type: String,
    pub filename: Option<String>,
    pub description: String,
    pub content: Vec<u8>,
}

/// Blob storage backend for evidence content.
///
/// Full attachment metadata is persisted alongside content and
/// returned verbatim on retrieval.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Store content plus metadata, returning the opaque storage
    /// locator. `attachment.storage_ref` is ignored on input.
    async fn store(&self, attachment: &EvidenceAttachment, content: &[u8])
        -> LedgerResult<String>;

    /// Fetch by storage locator. Unknown locators are `Ok(None)`.
    async fn retrieve(&self, storage_ref: &str) -> LedgerResult<Option<EvidenceData>>;

    /// Fetch by evidence id. Unknown ids are `Ok(None)`.
    async fn find_by_id(&self, id: Uuid) -> LedgerResult<Option<EvidenceData>>;

    /// Remove an item. Returns whether anything was deleted.
    async fn delete(&self, storage_ref: &str) -> LedgerResult<bool>;

    /// Total logical (uncompressed) bytes stored.
    async fn total_size(&self) -> LedgerResult<u64>;

    async fn count(&self) -> LedgerResult<u64>;
}
