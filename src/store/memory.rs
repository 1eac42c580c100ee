use anyhow::{bail, Result};
use parking_lot::RwLock;

use crate::model::{ObjectId, PortfolioSummary};
use crate::store::document::{apply_update, summary_from_document};
use crate::store::traits::{Document, PortfolioStore, UpdateOp, UpdateResult};

#[derive(Debug, Clone)]
struct Entry {
    id: ObjectId,
    document: Document,
}

/// In-process document store. Used for local development (`database.backend =
/// "memory"`) and tests; contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<Vec<Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PortfolioStore for MemoryStore {
    async fn insert_portfolio(&self, id: &ObjectId, document: Document) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.iter().any(|entry| entry.id == *id) {
            bail!("Portfolio {} already exists", id);
        }
        entries.push(Entry { id: *id, document });
        Ok(())
    }

    async fn find_portfolio(&self, id: &ObjectId) -> Result<Option<Document>> {
        let entries = self.entries.read();
        Ok(entries
            .iter()
            .find(|entry| entry.id == *id)
            .map(|entry| entry.document.clone()))
    }

    async fn list_portfolios(&self) -> Result<Vec<PortfolioSummary>> {
        let documents: Vec<Document> = self
            .entries
            .read()
            .iter()
            .map(|entry| entry.document.clone())
            .collect();
        documents.into_iter().map(summary_from_document).collect()
    }

    async fn update_portfolio(&self, id: &ObjectId, op: UpdateOp) -> Result<UpdateResult> {
        let mut entries = self.entries.write();
        let Some(entry) = entries.iter_mut().find(|entry| entry.id == *id) else {
            return Ok(UpdateResult::unmatched());
        };

        // Work on a copy so a failing op leaves the stored document untouched.
        let mut document = entry.document.clone();
        let modified = apply_update(&mut document, &op)?;
        if modified {
            entry.document = document;
        }

        Ok(UpdateResult {
            matched_count: 1,
            modified_count: u64::from(modified),
        })
    }

    async fn delete_portfolio(&self, id: &ObjectId) -> Result<bool> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|entry| entry.id != *id);
        Ok(entries.len() != before)
    }
}
