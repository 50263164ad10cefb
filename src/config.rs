use serde::{Deserialize, Serialize};
use std::env;

use crate::error::{LedgerError, LedgerResult};
use crate::record::hashing::DigestAlgorithm;

/// Which persistence backend the ledger writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Memory,
    Relational,
}

impl StorageKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "memory" => Some(Self::Memory),
            "relational" => Some(Self::Relational),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceConfig {
    pub enabled: bool,
    pub storage_path: String,
    /// Maximum size in bytes accepted for a single evidence item.
    pub max_size: usize,
    pub compress: bool,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        EvidenceConfig {
            enabled: true,
            storage_path: "./evidence".to_string(),
            max_size: 10 * 1024 * 1024,
            compress: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub storage: StorageKind,
    /// Connection string, required when `storage` is `Relational`.
    pub database_url: Option<String>,
    pub hash_chaining: bool,
    pub digest: DigestAlgorithm,
    pub evidence: EvidenceConfig,
    /// Records older than this many days are subject to the retention
    /// sweep. 0 means keep everything.
    pub retention_days: u32,
    /// Pending records that trigger an immediate flush.
    pub batch_size: usize,
    pub flush_interval_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            storage: StorageKind::Memory,
            database_url: None,
            hash_chaining: true,
            digest: DigestAlgorithm::Sha256,
            evidence: EvidenceConfig::default(),
            retention_days: 0,
            batch_size: 100,
            flush_interval_ms: 5000,
        }
    }
}

impl LedgerConfig {
    /// Load configuration from `LEDGER_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn load() -> LedgerResult<Self> {
        let defaults = LedgerConfig::default();

        let storage = match env::var("LEDGER_STORAGE") {
            Ok(s) => StorageKind::parse(&s)
                .ok_or_else(|| LedgerError::Config(format!("Unknown storage backend: {}", s)))?,
            Err(_) => defaults.storage,
        };

        let database_url = env::var("LEDGER_DATABASE_URL").ok();

        let digest = match env::var("LEDGER_DIGEST") {
            Ok(s) => DigestAlgorithm::parse(&s)
                .ok_or_else(|| LedgerError::Config(format!("Unknown digest algorithm: {}", s)))?,
            Err(_) => defaults.digest,
        };

        let config = LedgerConfig {
            storage,
            database_url,
            hash_chaining: env_bool("LEDGER_HASH_CHAINING", defaults.hash_chaining)?,
            digest,
            evidence: EvidenceConfig {
                enabled: env_bool("LEDGER_EVIDENCE_ENABLED", defaults.evidence.enabled)?,
                storage_path: env::var("LEDGER_EVIDENCE_PATH")
                    .unwrap_or(defaults.evidence.storage_path),
                max_size: env_parse("LEDGER_EVIDENCE_MAX_SIZE", defaults.evidence.max_size)?,
                compress: env_bool("LEDGER_EVIDENCE_COMPRESS", defaults.evidence.compress)?,
            },
            retention_days: env_parse("LEDGER_RETENTION_DAYS", defaults.retention_days)?,
            batch_size: env_parse("LEDGER_BATCH_SIZE", defaults.batch_size)?,
            flush_interval_ms: env_parse("LEDGER_FLUSH_INTERVAL_MS", defaults.flush_interval_ms)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Fatal configuration checks, run before any backend is opened.
    pub fn validate(&self) -> LedgerResult<()> {
        if self.storage == StorageKind::Relational && self.database_url.is_none() {
            return Err(LedgerError::Config(
                "Relational storage selected but no database URL configured".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(LedgerError::Config(
                "Batch size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_bool(key: &str, default: bool) -> LedgerResult<bool> {
    match env::var(key) {
        Ok(v) => match v.as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(LedgerError::Config(format!(
                "Invalid boolean for {}: {}",
                key, v
            ))),
        },
        Err(_) => Ok(default),
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> LedgerResult<T> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| LedgerError::Config(format!("Invalid value for {}: {}", key, v))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LedgerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 100);
        assert!(config.hash_chaining);
    }

    #[test]
    fn test_relational_requires_database_url() {
        let config = LedgerConfig {
            storage: StorageKind::Relational,
            database_url: None,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(LedgerError::Config(_))));
    }

    #[test]
    fn test_storage_kind_parse() {
        assert_eq!(StorageKind::parse("memory"), Some(StorageKind::Memory));
        assert_eq!(
            StorageKind::parse("relational"),
            Some(StorageKind::Relational)
        );
        assert_eq!(StorageKind::parse("surreal"), None);
    }
}
