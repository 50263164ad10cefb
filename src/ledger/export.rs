//! Export
//!
//! Paged record export plus NDJSON and CSV serializers. The cursor
//! fetches pages on demand so arbitrarily large result sets export in
//! constant memory, and a failed export can restart from the last
//! observed offset.

use std::io::Write;
use std::sync::Arc;

use crate::error::{LedgerError, LedgerResult};
use crate::record::AuditRecord;
use crate::storage::{AuditStorage, QueryFilter};

/// Records fetched per cursor page.
pub const EXPORT_PAGE_SIZE: usize = 100;

/// Column order for CSV export. Fixed regardless of which fields are
/// populated.
pub const CSV_HEADER: &str =
    "id,timestamp,eventType,category,severity,actorId,transactionId,entityId,description";

/// A restartable paging cursor over a filtered export.
pub struct ExportCursor {
    storage: Arc<dyn AuditStorage>,
    filter: QueryFilter,
    offset: usize,
    done: bool,
}

impl ExportCursor {
    pub(crate) fn new(storage: Arc<dyn AuditStorage>, filter: QueryFilter, offset: usize) -> Self {
        ExportCursor {
            storage,
            filter,
            offset,
            done: false,
        }
    }

    /// Offset of the next unfetched record. Feed this back into
    /// `export_events_from` to resume an interrupted export.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Fetch the next page. `Ok(None)` once the result set is exhausted.
    ///
    /// A short page marks the cursor done, so exports whose size is a
    /// multiple of the page size still terminate with one extra empty
    /// fetch at most.
    pub async fn next_page(&mut self) -> LedgerResult<Option<Vec<AuditRecord>>> {
        if self.done {
            return Ok(None);
        }
        let page_filter = QueryFilter {
            limit: Some(EXPORT_PAGE_SIZE),
            offset: Some(self.offset),
            ..self.filter.clone()
        };
        let page = self.storage.query(&page_filter).await?;
        if page.is_empty() {
            self.done = true;
            return Ok(None);
        }
        self.offset += page.len();
        if page.len() < EXPORT_PAGE_SIZE {
            self.done = true;
        }
        Ok(Some(page))
    }
}

impl std::fmt::Debug for ExportCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportCursor")
            .field("offset", &self.offset)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

fn write_err(e: std::io::Error) -> LedgerError {
    LedgerError::Storage(format!("Export write failed: {}", e))
}

/// Write records as newline-delimited JSON, one full record per line.
pub fn write_ndjson<W: Write>(out: &mut W, records: &[AuditRecord]) -> LedgerResult<()> {
    for record in records {
        let line = serde_json::to_string(record)?;
        out.write_all(line.as_bytes()).map_err(write_err)?;
        out.write_all(b"\n").map_err(write_err)?;
    }
    Ok(())
}

/// Write records as CSV rows. Emits [`CSV_HEADER`] first when
/// `include_header` is set; resumed exports pass `false`.
pub fn write_csv<W: Write>(
    out: &mut W,
    records: &[AuditRecord],
    include_header: bool,
) -> LedgerResult<()> {
    if include_header {
        writeln!(out, "{}", CSV_HEADER).map_err(write_err)?;
    }
    for record in records {
        writeln!(out, "{}", csv_row(record)).map_err(write_err)?;
    }
    Ok(())
}

/// One CSV row in [`CSV_HEADER`] order. The free-text description is
/// always quoted, with embedded quotes doubled.
pub fn csv_row(record: &AuditRecord) -> String {
    let actor_id = record.actor.as_ref().map(|a| a.id.as_str()).unwrap_or("");
    let transaction_id = record.correlation.transaction_id.as_deref().unwrap_or("");
    let entity_id = record.correlation.entity_id.as_deref().unwrap_or("");
    format!(
        "{},{},{},{},{},{},{},{},\"{}\"",
        record.id,
        record.timestamp.to_rfc3339(),
        record.event_type,
        record.category,
        record.severity,
        actor_id,
        transaction_id,
        entity_id,
        record.description.replace('"', "\"\""),
    )
}
