use std::ops::AddAssign;
use std::sync::Arc;

use crate::media::storage::{is_single_component, ContentStorage};
use crate::model::ItemRecord;

/// Outcome of one cleanup pass. Files already gone count as attempted only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub attempted: usize,
    pub removed: usize,
    pub failed: usize,
}

impl AddAssign for CleanupReport {
    fn add_assign(&mut self, other: Self) {
        self.attempted += other.attempted;
        self.removed += other.removed;
        self.failed += other.failed;
    }
}

/// Removes the stored files behind items that no longer exist. Never fails;
/// every problem is logged and the pass moves on.
#[derive(Clone)]
pub struct FileCleanup {
    storage: Arc<dyn ContentStorage>,
}

impl FileCleanup {
    pub fn new(storage: Arc<dyn ContentStorage>) -> Self {
        Self { storage }
    }

    /// Main file always, thumbnail only when it points at a stored file.
    pub async fn cleanup_item(&self, item: &ItemRecord) -> CleanupReport {
        let mut report = CleanupReport::default();

        self.remove(&item.filename, &mut report).await;

        match item.thumbnail_url.as_deref() {
            Some(thumbnail) if thumbnail.starts_with("data:") => {
                log::debug!("skipping inline thumbnail of {}", item.filename);
            }
            Some(thumbnail) if !thumbnail.is_empty() => {
                self.remove(thumbnail, &mut report).await;
            }
            _ => {}
        }

        report
    }

    pub async fn cleanup_portfolio(&self, items: &[ItemRecord]) -> CleanupReport {
        let mut report = CleanupReport::default();
        for item in items {
            report += self.cleanup_item(item).await;
        }
        log::info!(
            "file cleanup finished items={} attempted={} removed={} failed={}",
            items.len(),
            report.attempted,
            report.removed,
            report.failed
        );
        report
    }

    async fn remove(&self, reference: &str, report: &mut CleanupReport) {
        let Some(name) = file_name_of(reference) else {
            log::warn!("not cleaning up unusable file reference '{}'", reference);
            report.failed += 1;
            return;
        };

        report.attempted += 1;
        match self.storage.delete(name).await {
            Ok(true) => {
                log::debug!("deleted stored file {}", name);
                report.removed += 1;
            }
            Ok(false) => log::debug!("stored file {} already absent", name),
            Err(err) => {
                log::warn!("failed to delete stored file {}: {:#}", name, err);
                report.failed += 1;
            }
        }
    }
}

/// Last path segment of a stored name or public URL (`/uploads/a.jpg` gives
/// `a.jpg`), provided it is a plain file name.
pub fn file_name_of(reference: &str) -> Option<&str> {
    let without_query = reference.split(|c: char| c == '?' || c == '#').next().unwrap_or(reference);
    let name = without_query.rsplit('/').next().unwrap_or(without_query);
    is_single_component(name).then_some(name)
}
