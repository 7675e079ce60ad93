//! File-backed sync ledger
//!
//! A single JSON document under the data directory holds the set of synced
//! post ids. Every mutation writes a sibling temp file and renames it over
//! the ledger, so a crash mid-write never corrupts previously durable
//! state. Single-writer: one engine process per data directory.

use async_trait::async_trait;
use mirrorpost_domain::{LedgerError, SyncLedger};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

const LEDGER_FILE: &str = "synced_posts.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerDocument {
    synced_ids: Vec<String>,
}

/// JSON-file sync ledger
pub struct FileLedger {
    path: PathBuf,
    ids: RwLock<BTreeSet<String>>,
}

impl FileLedger {
    /// Open (or create) the ledger under the given data directory and load
    /// the persisted id set
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let data_dir = data_dir.as_ref();
        tokio::fs::create_dir_all(data_dir).await?;
        let path = data_dir.join(LEDGER_FILE);

        let ids = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let doc: LedgerDocument = serde_json::from_slice(&bytes)?;
                doc.synced_ids.into_iter().collect()
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(error) => return Err(error.into()),
        };

        tracing::debug!(path = %path.display(), count = ids.len(), "Loaded sync ledger");
        Ok(Self {
            path,
            ids: RwLock::new(ids),
        })
    }

    /// Number of ids currently in the ledger
    pub fn len(&self) -> usize {
        self.ids.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.read().unwrap().is_empty()
    }

    async fn persist(&self, snapshot: Vec<String>) -> Result<(), LedgerError> {
        let doc = LedgerDocument {
            synced_ids: snapshot,
        };
        let bytes = serde_json::to_vec_pretty(&doc)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SyncLedger for FileLedger {
    async fn contains(&self, id: &str) -> bool {
        self.ids.read().unwrap().contains(id)
    }

    async fn mark_synced(&self, id: &str) -> Result<(), LedgerError> {
        let snapshot: Vec<String> = {
            let mut ids = self.ids.write().unwrap();
            if !ids.insert(id.to_string()) {
                // Already durable from an earlier call.
                return Ok(());
            }
            ids.iter().cloned().collect()
        };

        if let Err(error) = self.persist(snapshot).await {
            // Keep memory and disk consistent so a later retry re-persists.
            self.ids.write().unwrap().remove(id);
            return Err(error);
        }
        Ok(())
    }
}
