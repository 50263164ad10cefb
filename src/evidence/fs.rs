//! Filesystem evidence store.
//!
//! Each item becomes two files under the storage directory: a content
//! file (optionally gzip-compressed) and a JSON metadata sidecar. The
//! sidecar carries the full attachment metadata, so retrieval returns
//! exactly what was stored.

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::evidence::{EvidenceAttachment, EvidenceData, EvidenceStore};

const META_SUFFIX: &str = ".meta.json";

/// Metadata sidecar contents.
#[derive(Serialize, Deserialize)]
struct SidecarMeta {
    attachment: EvidenceAttachment,
    compressed: bool,
}

pub struct FsEvidenceStore {
    root: PathBuf,
    compress: bool,
}

impl FsEvidenceStore {
    /// Open or create an evidence directory.
    pub fn open(root: impl Into<PathBuf>, compress: bool) -> LedgerResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| LedgerError::Evidence(format!("Failed to create evidence dir: {}", e)))?;
        Ok(FsEvidenceStore { root, compress })
    }

    fn content_path(&self, storage_ref: &str) -> PathBuf {
        self.root.join(storage_ref)
    }

    fn meta_path_for_ref(&self, storage_ref: &str) -> PathBuf {
        // Sidecar is keyed by the evidence id, which is the ref's stem.
        let stem = storage_ref
            .trim_end_matches(".gz")
            .trim_end_matches(".dat");
        self.root.join(format!("{}{}", stem, META_SUFFIX))
    }

    fn read_meta(&self, path: &Path) -> LedgerResult<SidecarMeta> {
        let json = fs::read_to_string(path)
            .map_err(|e| LedgerError::Evidence(format!("Failed to read metadata: {}", e)))?;
        Ok(serde_json::from_str(&json)?)
    }

    fn read_content(&self, meta: &SidecarMeta) -> LedgerResult<Vec<u8>> {
        let path = self.content_path(&meta.attachment.storage_ref);
        let raw = fs::read(&path)
            .map_err(|e| LedgerError::Evidence(format!("Failed to read evidence: {}", e)))?;
        if meta.compressed {
            let mut decoder = GzDecoder::new(raw.as_slice());
            let mut content = Vec::with_capacity(meta.attachment.size as usize);
            decoder
                .read_to_end(&mut content)
                .map_err(|e| LedgerError::Evidence(format!("Failed to decompress: {}", e)))?;
            Ok(content)
        } else {
            Ok(raw)
        }
    }

    fn retrieve_at(&self, meta_path: &Path) -> LedgerResult<Option<EvidenceData>> {
        if !meta_path.exists() {
            return Ok(None);
        }
        let meta = self.read_meta(meta_path)?;
        let content = self.read_content(&meta)?;
        Ok(Some(EvidenceData {
            attachment: meta.attachment,
            content,
        }))
    }

    fn meta_paths(&self) -> LedgerResult<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| LedgerError::Evidence(format!("Failed to list evidence dir: {}", e)))?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| LedgerError::Evidence(format!("Failed to list evidence dir: {}", e)))?;
            let path = entry.path();
            if path.to_string_lossy().ends_with(META_SUFFIX) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

#[async_trait]
impl EvidenceStore for FsEvidenceStore {
    async fn store(
        &self,
        attachment: &EvidenceAttachment,
        content: &[u8],
    ) -> LedgerResult<String> {
        let storage_ref = if self.compress {
            format!("{}.dat.gz", attachment.id)
        } else {
            format!("{}.dat", attachment.id)
        };

        let bytes = if self.compress {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(content)
                .map_err(|e| LedgerError::Evidence(format!("Failed to compress: {}", e)))?;
            encoder
                .finish()
                .map_err(|e| LedgerError::Evidence(format!("Failed to compress: {}", e)))?
        } else {
            content.to_vec()
        };

        fs::write(self.content_path(&storage_ref), bytes)
            .map_err(|e| LedgerError::Evidence(format!("Failed to write evidence: {}", e)))?;

        let mut stored = attachment.clone();
        stored.storage_ref = storage_ref.clone();
        let meta = SidecarMeta {
            attachment: stored,
            compressed: self.compress,
        };
        let meta_path = self.root.join(format!("{}{}", attachment.id, META_SUFFIX));
        fs::write(&meta_path, serde_json::to_vec(&meta)?)
            .map_err(|e| LedgerError::Evidence(format!("Failed to write metadata: {}", e)))?;

        debug!(id = %attachment.id, size = attachment.size, "Stored evidence");
        Ok(storage_ref)
    }

    async fn retrieve(&self, storage_ref: &str) -> LedgerResult<Option<EvidenceData>> {
        self.retrieve_at(&self.meta_path_for_ref(storage_ref))
    }

    async fn find_by_id(&self, id: Uuid) -> LedgerResult<Option<EvidenceData>> {
        self.retrieve_at(&self.root.join(format!("{}{}", id, META_SUFFIX)))
    }

    async fn delete(&self, storage_ref: &str) -> LedgerResult<bool> {
        let meta_path = self.meta_path_for_ref(storage_ref);
        if !meta_path.exists() {
            return Ok(false);
        }
        let content_path = self.content_path(storage_ref);
        fs::remove_file(&meta_path)
            .map_err(|e| LedgerError::Evidence(format!("Failed to delete metadata: {}", e)))?;
        if content_path.exists() {
            fs::remove_file(&content_path)
                .map_err(|e| LedgerError::Evidence(format!("Failed to delete evidence: {}", e)))?;
        }
        Ok(true)
    }

    async fn total_size(&self) -> LedgerResult<u64> {
        let mut total = 0;
        for path in self.meta_paths()? {
            total += self.read_meta(&path)?.attachment.size;
        }
        Ok(total)
    }

    async fn count(&self) -> LedgerResult<u64> {
        Ok(self.meta_paths()?.len() as u64)
    }
}

impl std::fmt::Debug for FsEvidenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsEvidenceStore")
            .field("root", &self.root)
            .field("compress", &self.compress)
            .finish()
    }
}
