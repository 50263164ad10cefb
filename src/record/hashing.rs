//! Canonical record hashing.
//!
//! Every field that contributes to a record's hash is listed explicitly
//! in [`canonical_string`] so nothing is accidentally omitted.
//!
//! Hash input layout (one `|`-separated line, in order):
//!   1. id as hyphenated UUID
//!   2. timestamp as RFC 3339
//!   3. event_type / category / severity as their wire names
//!   4. actor as `kind:id:name:origin` (`none` when absent)
//!   5. correlation axes in fixed order, empty string for unset axes
//!   6. description verbatim
//!   7. data as compact JSON (serde_json sorts object keys, so two
//!      semantically identical payloads hash identically regardless of
//!      field insertion order)
//!   8. previous_hash, or the `genesis` sentinel for a chain's first
//!      record

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};

use super::AuditRecord;

/// Digest used for record hashes and evidence content hashes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sha256" => Some(Self::Sha256),
            "sha384" => Some(Self::Sha384),
            "sha512" => Some(Self::Sha512),
            _ => None,
        }
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sentinel used in the hash input when a record has no predecessor.
const GENESIS_SENTINEL: &str = "genesis";

/// Digest raw bytes, returning `<algorithm>:<hex>`.
///
/// Used for evidence content hashes: the digest runs over the raw
/// bytes, never a text encoding of them.
pub fn hash_bytes(algorithm: DigestAlgorithm, bytes: &[u8]) -> String {
    let hex = match algorithm {
        DigestAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
        DigestAlgorithm::Sha384 => hex::encode(Sha384::digest(bytes)),
        DigestAlgorithm::Sha512 => hex::encode(Sha512::digest(bytes)),
    };
    format!("{}:{}", algorithm.as_str(), hex)
}

/// Build the canonical string a record's hash commits to.
///
/// Covers {id, timestamp, event_type, actor, correlation, category,
/// severity, description, data, previous_hash} — everything except
/// `record_hash` itself and the evidence attachment list.
///
/// # Panics
///
/// Panics if `data` cannot be serialized to JSON, which cannot happen
/// for a well-formed `serde_json::Value`.
pub fn canonical_string(record: &AuditRecord) -> String {
    let actor = match &record.actor {
        Some(a) => format!(
            "{}:{}:{}:{}",
            a.kind.as_str(),
            a.id,
            a.name.as_deref().unwrap_or(""),
            a.origin.as_deref().unwrap_or("")
        ),
        None => "none".to_string(),
    };

    let correlation = record
        .correlation
        .axes()
        .iter()
        .map(|(axis, value)| format!("{}={}", axis, value.unwrap_or("")))
        .collect::<Vec<_>>()
        .join(",");

    // serde_json's default map type is a BTreeMap, so object keys come
    // out sorted and the encoding is insertion-order independent.
    let data = serde_json::to_string(&record.data)
        .expect("serde_json::Value must always be serializable");

    format!(
        "id:{}|timestamp:{}|event_type:{}|actor:{}|correlation:{}|category:{}|severity:{}|description:{}|data:{}|previous_hash:{}",
        record.id,
        record.timestamp.to_rfc3339(),
        record.event_type.as_str(),
        actor,
        correlation,
        record.category.as_str(),
        record.severity.as_str(),
        record.description,
        data,
        record.previous_hash.as_deref().unwrap_or(GENESIS_SENTINEL),
    )
}

/// Compute a record's hash over its canonical field set.
pub fn compute_record_hash(record: &AuditRecord, algorithm: DigestAlgorithm) -> String {
    hash_bytes(algorithm, canonical_string(record).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{
        Actor, AuditRecord, CorrelationIds, EventCategory, EventType, Severity,
    };
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use uuid::Uuid;

    fn test_record() -> AuditRecord {
        AuditRecord {
            id: Uuid::nil(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            event_type: EventType::TransactionScreened,
            actor: Some(Actor::user("analyst-7")),
            correlation: CorrelationIds {
                transaction_id: Some("tx-100".to_string()),
                ..Default::default()
            },
            category: EventCategory::Transaction,
            severity: Severity::Info,
            description: "screened inbound wire".to_string(),
            data: json!({"amount": 1500, "currency": "EUR"}),
            evidence: None,
            previous_hash: None,
            record_hash: String::new(),
        }
    }

    #[test]
    fn test_hash_is_deterministic() {
        let record = test_record();
        let h1 = compute_record_hash(&record, DigestAlgorithm::Sha256);
        let h2 = compute_record_hash(&record, DigestAlgorithm::Sha256);
        assert_eq!(h1, h2);
        assert!(h1.starts_with("sha256:"));
        assert_eq!(h1.len(), "sha256:".len() + 64);
    }

    #[test]
    fn test_data_field_order_does_not_matter() {
        let mut a = test_record();
        let mut b = test_record();
        a.data = json!({"amount": 1500, "currency": "EUR", "channel": "swift"});
        b.data = json!({"channel": "swift", "currency": "EUR", "amount": 1500});
        assert_eq!(
            compute_record_hash(&a, DigestAlgorithm::Sha256),
            compute_record_hash(&b, DigestAlgorithm::Sha256)
        );
    }

    #[test]
    fn test_any_hashed_field_changes_the_hash() {
        let base = test_record();
        let base_hash = compute_record_hash(&base, DigestAlgorithm::Sha256);

        let mut changed = base.clone();
        changed.description = "screened outbound wire".to_string();
        assert_ne!(
            base_hash,
            compute_record_hash(&changed, DigestAlgorithm::Sha256)
        );

        let mut changed = base.clone();
        changed.previous_hash = Some("sha256:abc".to_string());
        assert_ne!(
            base_hash,
            compute_record_hash(&changed, DigestAlgorithm::Sha256)
        );

        let mut changed = base;
        changed.data = json!({"amount": 1501, "currency": "EUR"});
        assert_ne!(
            base_hash,
            compute_record_hash(&changed, DigestAlgorithm::Sha256)
        );
    }

    #[test]
    fn test_digest_widths() {
        let record = test_record();
        let h384 = compute_record_hash(&record, DigestAlgorithm::Sha384);
        let h512 = compute_record_hash(&record, DigestAlgorithm::Sha512);
        assert_eq!(h384.len(), "sha384:".len() + 96);
        assert_eq!(h512.len(), "sha512:".len() + 128);
    }

    #[test]
    fn test_evidence_is_not_hashed() {
        let mut a = test_record();
        a.evidence = Some(vec![]);
        let b = test_record();
        assert_eq!(
            compute_record_hash(&a, DigestAlgorithm::Sha256),
            compute_record_hash(&b, DigestAlgorithm::Sha256)
        );
    }

    #[test]
    fn test_hash_bytes_raw_content() {
        let h = hash_bytes(DigestAlgorithm::Sha256, b"evidence bytes");
        assert!(h.starts_with("sha256:"));
        assert_eq!(h, hash_bytes(DigestAlgorithm::Sha256, b"evidence bytes"));
        assert_ne!(h, hash_bytes(DigestAlgorithm::Sha256, b"evidence byteS"));
    }
}
