//! In-memory sync ledger for testing and dry runs

use async_trait::async_trait;
use mirrorpost_domain::{LedgerError, SyncLedger};
use std::collections::HashSet;
use std::sync::RwLock;

/// In-memory ledger; nothing survives the process
pub struct MemoryLedger {
    ids: RwLock<HashSet<String>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            ids: RwLock::new(HashSet::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.read().unwrap().is_empty()
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncLedger for MemoryLedger {
    async fn contains(&self, id: &str) -> bool {
        self.ids.read().unwrap().contains(id)
    }

    async fn mark_synced(&self, id: &str) -> Result<(), LedgerError> {
        self.ids.write().unwrap().insert(id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mark_and_contains() {
        let ledger = MemoryLedger::new();
        assert!(!ledger.contains("1").await);

        ledger.mark_synced("1").await.unwrap();
        assert!(ledger.contains("1").await);
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn duplicates_collapse() {
        let ledger = MemoryLedger::new();
        ledger.mark_synced("1").await.unwrap();
        ledger.mark_synced("1").await.unwrap();
        assert_eq!(ledger.len(), 1);
    }
}
