use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use compliance_ledger::storage::SqlStorage;
use compliance_ledger::{AuditLedger, LedgerConfig, StorageKind};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("verify-ledger")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Verify audit ledger hash-chain integrity")
        .arg(
            Arg::new("database-url")
                .short('d')
                .long("database-url")
                .value_name("URL")
                .help("Connection string of the ledger database")
                .required(true),
        )
        .arg(
            Arg::new("from")
                .long("from")
                .value_name("UUID")
                .help("First record id of the range to verify"),
        )
        .arg(
            Arg::new("to")
                .long("to")
                .value_name("UUID")
                .help("Last record id of the range to verify"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Suppress output except errors"),
        )
        .get_matches();

    let quiet = matches.get_flag("quiet");
    let level = if quiet {
        tracing::Level::ERROR
    } else if matches.get_flag("verbose") {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let database_url = matches
        .get_one::<String>("database-url")
        .ok_or_else(|| anyhow!("Missing database URL"))?;
    let from_id = parse_uuid(matches.get_one::<String>("from"), "--from")?;
    let to_id = parse_uuid(matches.get_one::<String>("to"), "--to")?;

    info!("Opening ledger at {}", database_url);
    let storage = Arc::new(SqlStorage::connect(database_url).await?);
    let config = LedgerConfig {
        storage: StorageKind::Relational,
        database_url: Some(database_url.clone()),
        evidence: compliance_ledger::EvidenceConfig {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let ledger = AuditLedger::with_backends(config, storage, None);
    ledger.init().await?;

    let result = ledger.verify_integrity(from_id, to_id).await?;
    ledger.shutdown().await?;

    if result.valid {
        if !quiet {
            println!(
                "✓ Chain valid: {} records verified",
                result.records_checked
            );
        }
        Ok(())
    } else {
        eprintln!(
            "✗ Chain INVALID after {} records",
            result.records_checked
        );
        if let Some(id) = result.first_invalid_id {
            eprintln!("  First invalid record: {}", id);
        }
        if let Some(error) = result.error {
            eprintln!("  {}", error);
        }
        std::process::exit(1);
    }
}

fn parse_uuid(value: Option<&String>, flag: &str) -> Result<Option<Uuid>> {
    match value {
        Some(s) => Uuid::parse_str(s)
            .map(Some)
            .map_err(|_| anyhow!("Invalid UUID for {}: {}", flag, s)),
        None => Ok(None),
    }
}
