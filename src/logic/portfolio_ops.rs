use chrono::Utc;
use itertools::Itertools;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::PortfolioError;
use crate::logic::identifier::resolve;
use crate::logic::locate::find;
use crate::logic::mutate::AggregateMutator;
use crate::media::cleanup::FileCleanup;
use crate::model::{
    validate_item_patch, ChildKind, Item, ItemRecord, NewItem, NewPortfolio, NewSection, Portfolio,
    PortfolioRecord, PortfolioSummary, Section, SectionRecord,
};
use crate::store::{PortfolioStore, UpdateOp};

/// Portfolio, section and item operations as exposed over HTTP. Identifiers
/// arrive raw and are resolved here before anything is read.
pub struct PortfolioService<S: PortfolioStore> {
    mutator: AggregateMutator<S>,
    cleanup: FileCleanup,
}

impl<S: PortfolioStore> PortfolioService<S> {
    pub fn new(store: Arc<S>, cleanup: FileCleanup) -> Self {
        Self {
            mutator: AggregateMutator::new(store),
            cleanup,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        self.mutator.store()
    }

    // ----- portfolios -------------------------------------------------------

    pub async fn create_portfolio(&self, input: NewPortfolio) -> Result<Portfolio, PortfolioError> {
        let record = PortfolioRecord::new(input);
        self.store()
            .insert_portfolio(&record.id, record.to_document()?)
            .await?;
        log::info!("created portfolio {} title={:?}", record.id, record.title);
        Ok(record.into())
    }

    pub async fn list_portfolios(&self) -> Result<Vec<PortfolioSummary>, PortfolioError> {
        Ok(self.store().list_portfolios().await?)
    }

    pub async fn get_portfolio(&self, raw_id: &str) -> Result<Portfolio, PortfolioError> {
        let id = resolve(raw_id, "portfolio")?;
        Ok(self.mutator.load(&id).await?.into())
    }

    /// Replace title and description and refresh the modification timestamp.
    pub async fn update_portfolio(
        &self,
        raw_id: &str,
        input: NewPortfolio,
    ) -> Result<Portfolio, PortfolioError> {
        let id = resolve(raw_id, "portfolio")?;
        let now = serde_json::to_value(Utc::now())
            .map_err(|e| anyhow::anyhow!("Failed to encode timestamp: {}", e))?;
        let description = input.description.map(Value::String).unwrap_or(Value::Null);

        let result = self
            .store()
            .update_portfolio(
                &id,
                UpdateOp::Set(vec![
                    ("title".to_string(), Value::String(input.title)),
                    ("description".to_string(), description),
                    ("updated_at".to_string(), now),
                ]),
            )
            .await?;
        if result.matched_count == 0 {
            return Err(PortfolioError::PortfolioNotFound(id.to_hex()));
        }

        log::info!("updated portfolio {}", id);
        Ok(self.mutator.load(&id).await?.into())
    }

    /// Delete the portfolio, then remove the files of every item it held.
    pub async fn delete_portfolio(&self, raw_id: &str) -> Result<(), PortfolioError> {
        let id = resolve(raw_id, "portfolio")?;
        let snapshot = self.mutator.load(&id).await?;

        if !self.store().delete_portfolio(&id).await? {
            return Err(PortfolioError::PortfolioNotFound(id.to_hex()));
        }
        log::info!("deleted portfolio {} items={}", id, snapshot.items.len());

        self.cleanup.cleanup_portfolio(&snapshot.items).await;
        Ok(())
    }

    // ----- items ------------------------------------------------------------

    pub async fn add_item(&self, raw_id: &str, input: NewItem) -> Result<Item, PortfolioError> {
        let id = resolve(raw_id, "portfolio")?;
        let record = input.into_record();
        self.mutator.insert(&id, &record).await?;
        Ok(record.into())
    }

    pub async fn patch_item(
        &self,
        raw_id: &str,
        raw_item_id: &str,
        fields: Map<String, Value>,
    ) -> Result<Item, PortfolioError> {
        let id = resolve(raw_id, "portfolio")?;
        resolve(raw_item_id, "item")?;
        validate_item_patch(&fields)?;

        let item: ItemRecord = self.mutator.patch_child(&id, raw_item_id, fields).await?;
        Ok(item.into())
    }

    /// Remove one item and its files. Returns how many items were removed.
    pub async fn delete_item(&self, raw_id: &str, raw_item_id: &str) -> Result<usize, PortfolioError> {
        let id = resolve(raw_id, "portfolio")?;
        resolve(raw_item_id, "item")?;

        let parent = self.mutator.load(&id).await?;
        let snapshot = find::<ItemRecord>(&parent, raw_item_id)?.child.clone();

        if !self
            .mutator
            .remove_child::<ItemRecord>(&id, raw_item_id)
            .await?
        {
            // Located a moment ago, gone now: someone else removed it.
            return Err(PortfolioError::ChildNotFound {
                kind: ChildKind::Item,
                id: raw_item_id.to_string(),
            });
        }

        self.cleanup.cleanup_item(&snapshot).await;
        Ok(1)
    }

    // ----- sections ---------------------------------------------------------

    pub async fn create_section(
        &self,
        raw_id: &str,
        input: NewSection,
    ) -> Result<Section, PortfolioError> {
        let id = resolve(raw_id, "portfolio")?;
        let record = input.into_record();
        self.mutator.insert(&id, &record).await?;
        Ok(record.into())
    }

    /// Sections in stored order.
    pub async fn list_sections(&self, raw_id: &str) -> Result<Vec<Section>, PortfolioError> {
        let id = resolve(raw_id, "portfolio")?;
        let parent = self.mutator.load(&id).await?;
        Ok(parent.sections.into_iter().map(Section::from).collect())
    }

    pub async fn update_section(
        &self,
        raw_id: &str,
        raw_section_id: &str,
        input: NewSection,
    ) -> Result<Section, PortfolioError> {
        let id = resolve(raw_id, "portfolio")?;
        resolve(raw_section_id, "section")?;

        let section: SectionRecord = self
            .mutator
            .patch_child(&id, raw_section_id, input.replacement_fields())
            .await?;
        Ok(section.into())
    }

    /// Detach every item filed under the section, then remove the section.
    /// Items are never deleted.
    pub async fn delete_section(&self, raw_id: &str, raw_section_id: &str) -> Result<(), PortfolioError> {
        let id = resolve(raw_id, "portfolio")?;
        resolve(raw_section_id, "section")?;

        let parent = self.mutator.load(&id).await?;
        let section = find::<SectionRecord>(&parent, raw_section_id)?.child;

        // Items reference sections by string; match both the id as requested
        // and the rendering of the id the section is actually stored under.
        let references: Vec<String> = std::iter::once(raw_section_id.to_string())
            .chain(section.primary_id.iter().map(|id| id.render()))
            .chain(section.legacy_id.iter().map(|id| id.render()))
            .unique()
            .collect();

        self.mutator.detach_section_items(&id, &references).await?;

        if !self
            .mutator
            .remove_child::<SectionRecord>(&id, raw_section_id)
            .await?
        {
            return Err(PortfolioError::ChildNotFound {
                kind: ChildKind::Section,
                id: raw_section_id.to_string(),
            });
        }

        log::info!("deleted section {} from portfolio {}", raw_section_id, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::storage::LocalContentStorage;
    use crate::model::{ItemMetadata, MediaKind, ObjectId, StoredId};
    use crate::store::MemoryStore;
    use serde_json::json;

    struct Fixture {
        service: PortfolioService<MemoryStore>,
        dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalContentStorage::new(dir.path()));
        let service = PortfolioService::new(Arc::new(MemoryStore::new()), FileCleanup::new(storage));
        Fixture { service, dir }
    }

    fn new_item(filename: &str, section_id: Option<String>) -> NewItem {
        NewItem {
            kind: MediaKind::Video,
            filename: filename.to_string(),
            original_name: "clip.mp4".to_string(),
            url: format!("/uploads/{}", filename),
            thumbnail_url: Some(format!("/uploads/{}_thumb.jpg", filename.trim_end_matches(".mp4"))),
            title: "Clip".to_string(),
            description: String::new(),
            metadata: ItemMetadata {
                size: 10,
                dimensions: None,
                duration: Some(4),
                format: "mp4".to_string(),
            },
            section_id,
            order: 0,
        }
    }

    async fn demo(service: &PortfolioService<MemoryStore>) -> String {
        service
            .create_portfolio(NewPortfolio {
                title: "Demo".to_string(),
                description: Some("first".to_string()),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_portfolio_lifecycle() {
        let Fixture { service, .. } = fixture();
        let id = demo(&service).await;

        let listed = service.list_portfolios().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
        assert_eq!(listed[0].description.as_deref(), Some("first"));

        let updated = service
            .update_portfolio(
                &id,
                NewPortfolio {
                    title: "Renamed".to_string(),
                    description: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.description, None);
        assert!(updated.updated_at >= updated.created_at);

        service.delete_portfolio(&id).await.unwrap();
        assert!(matches!(
            service.get_portfolio(&id).await,
            Err(PortfolioError::PortfolioNotFound(_))
        ));
        assert!(matches!(
            service.delete_portfolio(&id).await,
            Err(PortfolioError::PortfolioNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_ids_fail_before_lookup() {
        let Fixture { service, .. } = fixture();
        let id = demo(&service).await;

        assert!(matches!(
            service.get_portfolio("nope").await,
            Err(PortfolioError::InvalidIdentifier { kind: "portfolio", .. })
        ));
        assert!(matches!(
            service.delete_item(&id, "nope").await,
            Err(PortfolioError::InvalidIdentifier { kind: "item", .. })
        ));
        assert!(matches!(
            service.delete_section(&id, "nope").await,
            Err(PortfolioError::InvalidIdentifier { kind: "section", .. })
        ));
    }

    #[tokio::test]
    async fn test_patch_item_allow_list() {
        let Fixture { service, .. } = fixture();
        let id = demo(&service).await;
        let item = service.add_item(&id, new_item("a.mp4", None)).await.unwrap();
        let item_id = item.id.unwrap();

        let patched = service
            .patch_item(&id, &item_id, json!({"title": "New"}).as_object().unwrap().clone())
            .await
            .unwrap();
        assert_eq!(patched.title, "New");
        assert_eq!(patched.filename, "a.mp4");

        assert!(matches!(
            service
                .patch_item(&id, &item_id, json!({"filename": "x"}).as_object().unwrap().clone())
                .await,
            Err(PortfolioError::InvalidField { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_item_removes_files() {
        let Fixture { service, dir } = fixture();
        let id = demo(&service).await;
        std::fs::write(dir.path().join("a.mp4"), b"video").unwrap();
        std::fs::write(dir.path().join("a_thumb.jpg"), b"thumb").unwrap();

        let item = service.add_item(&id, new_item("a.mp4", None)).await.unwrap();
        let item_id = item.id.unwrap();

        assert_eq!(service.delete_item(&id, &item_id).await.unwrap(), 1);
        assert!(!dir.path().join("a.mp4").exists());
        assert!(!dir.path().join("a_thumb.jpg").exists());

        assert!(matches!(
            service.delete_item(&id, &item_id).await,
            Err(PortfolioError::ChildNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_portfolio_cleans_all_items() {
        let Fixture { service, dir } = fixture();
        let id = demo(&service).await;
        for name in ["a.mp4", "b.mp4"] {
            std::fs::write(dir.path().join(name), b"video").unwrap();
            service.add_item(&id, new_item(name, None)).await.unwrap();
        }

        service.delete_portfolio(&id).await.unwrap();
        assert!(!dir.path().join("a.mp4").exists());
        assert!(!dir.path().join("b.mp4").exists());
    }

    #[tokio::test]
    async fn test_section_update_and_list() {
        let Fixture { service, .. } = fixture();
        let id = demo(&service).await;
        let section = service
            .create_section(
                &id,
                NewSection {
                    title: "Work".to_string(),
                    description: None,
                    order: 0,
                },
            )
            .await
            .unwrap();
        let section_id = section.id.unwrap();

        let updated = service
            .update_section(
                &id,
                &section_id,
                NewSection {
                    title: "Play".to_string(),
                    description: Some("fun".to_string()),
                    order: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "Play");
        assert_eq!(updated.order, 2);

        let sections = service.list_sections(&id).await.unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].description.as_deref(), Some("fun"));

        assert!(matches!(
            service
                .update_section(
                    &id,
                    &ObjectId::new().to_hex(),
                    NewSection {
                        title: "x".to_string(),
                        description: None,
                        order: 0,
                    },
                )
                .await,
            Err(PortfolioError::ChildNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_section_detaches_items() {
        let Fixture { service, .. } = fixture();
        let id = demo(&service).await;
        let section_id = service
            .create_section(
                &id,
                NewSection {
                    title: "Work".to_string(),
                    description: None,
                    order: 0,
                },
            )
            .await
            .unwrap()
            .id
            .unwrap();
        service
            .add_item(&id, new_item("a.mp4", Some(section_id.clone())))
            .await
            .unwrap();

        service.delete_section(&id, &section_id).await.unwrap();

        let portfolio = service.get_portfolio(&id).await.unwrap();
        assert!(portfolio.sections.is_empty());
        assert_eq!(portfolio.items.len(), 1);
        assert_eq!(portfolio.items[0].section_id, None);
        assert!(service.list_sections(&id).await.unwrap().is_empty());

        assert!(matches!(
            service.delete_section(&id, &section_id).await,
            Err(PortfolioError::ChildNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_legacy_section() {
        let Fixture { service, .. } = fixture();
        let id = demo(&service).await;
        let oid = resolve(&id, "portfolio").unwrap();
        let section_oid = ObjectId::new();

        // Older writes stored sections under `id` with a string value.
        let legacy = SectionRecord {
            primary_id: None,
            legacy_id: Some(StoredId::Plain(section_oid.to_hex())),
            title: "Old".to_string(),
            description: None,
            order: 0,
            created_at: None,
            updated_at: None,
        };
        service
            .store()
            .update_portfolio(
                &oid,
                UpdateOp::Push {
                    array: "sections".to_string(),
                    value: serde_json::to_value(&legacy).unwrap(),
                },
            )
            .await
            .unwrap();
        service
            .add_item(&id, new_item("a.mp4", Some(section_oid.to_hex())))
            .await
            .unwrap();

        service.delete_section(&id, &section_oid.to_hex()).await.unwrap();
        let portfolio = service.get_portfolio(&id).await.unwrap();
        assert!(portfolio.sections.is_empty());
        assert_eq!(portfolio.items[0].section_id, None);
    }
}
