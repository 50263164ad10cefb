//! Append-only, tamper-evident audit ledger for compliance systems.
//!
//! Records are immutable, hash-chained, batched into pluggable storage
//! backends, and optionally carry content-addressed evidence.

pub mod config;
pub mod error;
pub mod evidence;
pub mod ledger;
pub mod record;
pub mod storage;

pub use config::{EvidenceConfig, LedgerConfig, StorageKind};
pub use error::{LedgerError, LedgerResult};
pub use evidence::{EvidenceAttachment, EvidenceData, EvidenceStore, EvidenceType, NewEvidence};
pub use ledger::{AuditLedger, IntegrityCheckResult, LedgerStats};
pub use record::hashing::DigestAlgorithm;
pub use record::{
    Actor, ActorKind, AuditRecord, CorrelationIds, EventCategory, EventType, NewEvent, Severity,
};
pub use storage::{AuditStorage, QueryFilter, SortOrder};
