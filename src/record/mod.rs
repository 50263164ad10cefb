//! Audit Record Model
//!
//! Defines the immutable audit record, its closed enumerations, and the
//! canonical hashing contract that links records into a tamper-evident
//! chain.

pub mod hashing;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::evidence::EvidenceAttachment;

/// What happened. Closed enumeration; corrections to past records are
/// new records, never edits (see [`AuditRecord`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TransactionScreened,
    TransactionFlagged,
    TransactionBlocked,
    RuleTriggered,
    AlertRaised,
    AlertResolved,
    CaseOpened,
    CaseClosed,
    ReportGenerated,
    ConfigChanged,
    UserAction,
    DataAccess,
    RetentionPruned,
    SystemStarted,
    SystemStopped,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransactionScreened => "transaction_screened",
            Self::TransactionFlagged => "transaction_flagged",
            Self::TransactionBlocked => "transaction_blocked",
            Self::RuleTriggered => "rule_triggered",
            Self::AlertRaised => "alert_raised",
            Self::AlertResolved => "alert_resolved",
            Self::CaseOpened => "case_opened",
            Self::CaseClosed => "case_closed",
            Self::ReportGenerated => "report_generated",
            Self::ConfigChanged => "config_changed",
            Self::UserAction => "user_action",
            Self::DataAccess => "data_access",
            Self::RetentionPruned => "retention_pruned",
            Self::SystemStarted => "system_started",
            Self::SystemStopped => "system_stopped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transaction_screened" => Some(Self::TransactionScreened),
            "transaction_flagged" => Some(Self::TransactionFlagged),
            "transaction_blocked" => Some(Self::TransactionBlocked),
            "rule_triggered" => Some(Self::RuleTriggered),
            "alert_raised" => Some(Self::AlertRaised),
            "alert_resolved" => Some(Self::AlertResolved),
            "case_opened" => Some(Self::CaseOpened),
            "case_closed" => Some(Self::CaseClosed),
            "report_generated" => Some(Self::ReportGenerated),
            "config_changed" => Some(Self::ConfigChanged),
            "user_action" => Some(Self::UserAction),
            "data_access" => Some(Self::DataAccess),
            "retention_pruned" => Some(Self::RetentionPruned),
            "system_started" => Some(Self::SystemStarted),
            "system_stopped" => Some(Self::SystemStopped),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse filtering axis, orthogonal to [`EventType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Transaction,
    Compliance,
    Risk,
    Security,
    Configuration,
    System,
    Reporting,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::Compliance => "compliance",
            Self::Risk => "risk",
            Self::Security => "security",
            Self::Configuration => "configuration",
            Self::System => "system",
            Self::Reporting => "reporting",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transaction" => Some(Self::Transaction),
            "compliance" => Some(Self::Compliance),
            "risk" => Some(Self::Risk),
            "security" => Some(Self::Security),
            "configuration" => Some(Self::Configuration),
            "system" => Some(Self::System),
            "reporting" => Some(Self::Reporting),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    User,
    System,
    Api,
    Plugin,
}

impl ActorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
            Self::Api => "api",
            Self::Plugin => "plugin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "system" => Some(Self::System),
            "api" => Some(Self::Api),
            "plugin" => Some(Self::Plugin),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who originated the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub kind: ActorKind,
    pub id: String,
    pub name: Option<String>,
    /// Network origin (IP address or hostname), when known.
    pub origin: Option<String>,
}

impl Actor {
    pub fn system(id: impl Into<String>) -> Self {
        Actor {
            kind: ActorKind::System,
            id: id.into(),
            name: None,
            origin: None,
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Actor {
            kind: ActorKind::User,
            id: id.into(),
            name: None,
            origin: None,
        }
    }
}

/// Secondary identifiers linking a record to business entities for
/// trail reconstruction. Not part of chain integrity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationIds {
    pub transaction_id: Option<String>,
    pub entity_id: Option<String>,
    pub rule_id: Option<String>,
    pub alert_id: Option<String>,
    pub request_id: Option<String>,
    pub session_id: Option<String>,
    pub external_ref: Option<String>,
}

impl CorrelationIds {
    /// All axes in the fixed order used for canonical hashing and export.
    pub fn axes(&self) -> [(&'static str, Option<&str>); 7] {
        [
            ("transaction", self.transaction_id.as_deref()),
            ("entity", self.entity_id.as_deref()),
            ("rule", self.rule_id.as_deref()),
            ("alert", self.alert_id.as_deref()),
            ("request", self.request_id.as_deref()),
            ("session", self.session_id.as_deref()),
            ("external", self.external_ref.as_deref()),
        ]
    }
}

/// The atomic, immutable unit of the ledger.
///
/// Once created, `record_hash` and every hashed field never change;
/// corrections are recorded as new records that reference the original
/// through `correlation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub actor: Option<Actor>,
    pub correlation: CorrelationIds,
    pub category: EventCategory,
    pub severity: Severity,
    pub description: String,
    /// Arbitrary structured payload, opaque to the ledger. Hashed as-is.
    pub data: serde_json::Value,
    /// Attached evidence metadata. Not part of the record hash; evidence
    /// integrity is covered by per-item content hashes.
    pub evidence: Option<Vec<EvidenceAttachment>>,
    /// Hash of the chain's immediately prior record, or `None` for the
    /// first record of a chain.
    pub previous_hash: Option<String>,
    pub record_hash: String,
}

impl AuditRecord {
    /// Check that `record_hash` matches the record's current contents.
    pub fn verify_hash(&self, algorithm: hashing::DigestAlgorithm) -> bool {
        self.record_hash == hashing::compute_record_hash(self, algorithm)
    }

    /// Check that this record links to `previous` in the chain.
    pub fn follows(&self, previous: &AuditRecord) -> bool {
        self.previous_hash.as_deref() == Some(previous.record_hash.as_str())
    }
}

/// Caller-supplied input for a new audit record. The ledger assigns
/// id, timestamp, and hashes.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: EventType,
    pub actor: Option<Actor>,
    pub correlation: CorrelationIds,
    pub category: EventCategory,
    pub severity: Severity,
    pub description: String,
    pub data: serde_json::Value,
    pub evidence: Option<Vec<EvidenceAttachment>>,
}

impl NewEvent {
    pub fn new(
        event_type: EventType,
        category: EventCategory,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        NewEvent {
            event_type,
            actor: None,
            correlation: CorrelationIds::default(),
            category,
            severity,
            description: description.into(),
            data: serde_json::Value::Null,
            evidence: None,
        }
    }

    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_transaction_id(mut self, id: impl Into<String>) -> Self {
        self.correlation.transaction_id = Some(id.into());
        self
    }

    pub fn with_entity_id(mut self, id: impl Into<String>) -> Self {
        self.correlation.entity_id = Some(id.into());
        self
    }
}

/// Current UTC time truncated to microsecond precision.
///
/// Timestamps round-trip through RFC 3339 storage columns; truncating
/// at creation keeps the canonical hash input identical before and
/// after persistence.
pub(crate) fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    now - chrono::Duration::nanoseconds(i64::from(now.timestamp_subsec_nanos() % 1000))
}
