use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::PortfolioError;
use crate::logic::locate::{find, EmbeddedChild};
use crate::model::{ObjectId, PortfolioRecord, StoredId};
use crate::store::{ElementFilter, PortfolioStore, UpdateOp, UpdateResult};

/// Structural and in-place mutations of a portfolio's embedded children.
///
/// Every call is one or more single-document store updates. Sequences are not
/// atomic: a patch computes the child's array index from one read and writes
/// to that index in the next call, so a concurrent insert or removal in the
/// same array can redirect the write (lost update). Single-editor access is
/// assumed.
pub struct AggregateMutator<S: PortfolioStore> {
    store: Arc<S>,
}

impl<S: PortfolioStore> Clone for AggregateMutator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: PortfolioStore> AggregateMutator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Load and decode the parent, or report it missing.
    pub async fn load(&self, parent_id: &ObjectId) -> Result<PortfolioRecord, PortfolioError> {
        let document = self
            .store
            .find_portfolio(parent_id)
            .await?
            .ok_or_else(|| PortfolioError::PortfolioNotFound(parent_id.to_hex()))?;
        Ok(PortfolioRecord::from_document(document)?)
    }

    /// Append `child` to its array. Its identifier must already be assigned
    /// and canonical, so the primary lookup rule finds it afterwards.
    pub async fn insert<C: EmbeddedChild>(
        &self,
        parent_id: &ObjectId,
        child: &C,
    ) -> Result<(), PortfolioError> {
        if !matches!(child.primary_id(), Some(StoredId::Canonical(_))) {
            return Err(PortfolioError::InvalidField {
                field: "_id".to_string(),
                reason: format!("new {} must carry a canonical identifier", C::KIND),
            });
        }

        let value = serde_json::to_value(child)
            .map_err(|e| anyhow::anyhow!("Failed to encode {}: {}", C::KIND, e))?;
        let result = self
            .store
            .update_portfolio(
                parent_id,
                UpdateOp::Push {
                    array: C::KIND.array_field().to_string(),
                    value,
                },
            )
            .await?;
        expect_parent(parent_id, result)?;

        log::info!("inserted {} into portfolio {}", C::KIND, parent_id);
        self.touch_after_mutation(parent_id).await;
        Ok(())
    }

    /// Write each of `fields` onto the child addressed by `raw_child_id`,
    /// leaving its other fields untouched, and return the child as stored
    /// afterwards.
    pub async fn patch_child<C: EmbeddedChild>(
        &self,
        parent_id: &ObjectId,
        raw_child_id: &str,
        fields: Map<String, Value>,
    ) -> Result<C, PortfolioError> {
        for key in fields.keys() {
            if key.is_empty() || key.contains('.') || key.starts_with('$') {
                return Err(PortfolioError::InvalidField {
                    field: key.clone(),
                    reason: "field names cannot be empty, dotted or start with '$'".to_string(),
                });
            }
        }

        let parent = self.load(parent_id).await?;
        let index = find::<C>(&parent, raw_child_id)?.index;

        let array = C::KIND.array_field();
        let assignments = fields
            .into_iter()
            .map(|(key, value)| (format!("{}.{}.{}", array, index, key), value))
            .collect();

        let result = self
            .store
            .update_portfolio(parent_id, UpdateOp::Set(assignments))
            .await?;
        expect_parent(parent_id, result)?;
        log::info!(
            "patched {} {} at {}.{} in portfolio {}",
            C::KIND,
            raw_child_id,
            array,
            index,
            parent_id
        );

        // The write does not hand back the document, so read it again.
        let updated = self.load(parent_id).await?;
        let child = find::<C>(&updated, raw_child_id)?.child.clone();

        self.touch_after_mutation(parent_id).await;
        Ok(child)
    }

    /// Remove the child addressed by `raw_child_id`. Returns whether anything
    /// was removed; a missing child leaves the parent untouched.
    ///
    /// The caller must take a snapshot of the child beforehand if it needs the
    /// removed child's file references.
    pub async fn remove_child<C: EmbeddedChild>(
        &self,
        parent_id: &ObjectId,
        raw_child_id: &str,
    ) -> Result<bool, PortfolioError> {
        let array = C::KIND.array_field();
        for filter in removal_filters(raw_child_id) {
            let result = self
                .store
                .update_portfolio(
                    parent_id,
                    UpdateOp::Pull {
                        array: array.to_string(),
                        filter: filter.clone(),
                    },
                )
                .await?;
            expect_parent(parent_id, result)?;

            if result.modified_count > 0 {
                log::info!(
                    "removed {} {} from portfolio {} (matched on '{}')",
                    C::KIND,
                    raw_child_id,
                    parent_id,
                    filter.field
                );
                self.touch_after_mutation(parent_id).await;
                return Ok(true);
            }
        }

        log::debug!(
            "no {} {} to remove in portfolio {}",
            C::KIND,
            raw_child_id,
            parent_id
        );
        Ok(false)
    }

    /// Clear `section_id` on every item whose reference equals one of
    /// `section_refs` (string comparison). Safe to repeat.
    pub async fn detach_section_items(
        &self,
        parent_id: &ObjectId,
        section_refs: &[String],
    ) -> Result<bool, PortfolioError> {
        let mut detached = false;
        for reference in section_refs {
            let result = self
                .store
                .update_portfolio(
                    parent_id,
                    UpdateOp::UnsetWhere {
                        array: "items".to_string(),
                        filter: ElementFilter::new("section_id", Value::String(reference.clone())),
                        field: "section_id".to_string(),
                    },
                )
                .await?;
            expect_parent(parent_id, result)?;
            detached |= result.modified_count > 0;
        }

        if detached {
            log::info!(
                "detached items from section {:?} in portfolio {}",
                section_refs,
                parent_id
            );
        }
        Ok(detached)
    }

    /// Set the parent's modification timestamp to now.
    pub async fn touch_parent(&self, parent_id: &ObjectId) -> Result<(), PortfolioError> {
        let now = serde_json::to_value(Utc::now())
            .map_err(|e| anyhow::anyhow!("Failed to encode timestamp: {}", e))?;
        let result = self
            .store
            .update_portfolio(
                parent_id,
                UpdateOp::Set(vec![("updated_at".to_string(), now)]),
            )
            .await?;
        expect_parent(parent_id, result)
    }

    /// The child mutation is already committed when this runs; a failed touch
    /// is logged rather than turning the request into an error.
    async fn touch_after_mutation(&self, parent_id: &ObjectId) {
        if let Err(err) = self.touch_parent(parent_id).await {
            log::warn!(
                "failed to refresh updated_at on portfolio {}: {:#}",
                parent_id,
                err
            );
        }
    }
}

/// A zero-matched update means the parent disappeared.
fn expect_parent(parent_id: &ObjectId, result: UpdateResult) -> Result<(), PortfolioError> {
    if result.matched_count == 0 {
        return Err(PortfolioError::PortfolioNotFound(parent_id.to_hex()));
    }
    Ok(())
}

/// Pull predicates tried in order until one removes something: canonical
/// `_id`, then the string-rendered legacy `id`, then the two remaining
/// combinations so every encoding the locator accepts can also be removed.
fn removal_filters(raw: &str) -> Vec<ElementFilter> {
    let canonical = ObjectId::parse_str(raw).ok().map(|oid| oid.to_document());
    let plain = Value::String(raw.to_string());

    let mut filters = Vec::with_capacity(4);
    if let Some(canonical) = &canonical {
        filters.push(ElementFilter::new("_id", canonical.clone()));
    }
    filters.push(ElementFilter::new("id", plain.clone()));
    if let Some(canonical) = canonical {
        filters.push(ElementFilter::new("id", canonical));
    }
    filters.push(ElementFilter::new("_id", plain));
    filters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::locate::locate;
    use crate::model::{
        ItemMetadata, ItemRecord, MediaKind, NewPortfolio, NewSection, SectionRecord,
    };
    use crate::store::MemoryStore;
    use chrono::DateTime;
    use serde_json::json;

    async fn setup() -> (AggregateMutator<MemoryStore>, ObjectId) {
        let store = Arc::new(MemoryStore::new());
        let record = PortfolioRecord::new(NewPortfolio {
            title: "Demo".to_string(),
            description: None,
        });
        store
            .insert_portfolio(&record.id, record.to_document().unwrap())
            .await
            .unwrap();
        (AggregateMutator::new(store), record.id)
    }

    fn new_item(title: &str, section: Option<&str>) -> ItemRecord {
        ItemRecord {
            primary_id: Some(StoredId::Canonical(ObjectId::new())),
            legacy_id: None,
            kind: MediaKind::Image,
            filename: format!("{}.png", title),
            original_name: format!("{}.png", title),
            url: format!("/uploads/{}.png", title),
            thumbnail_url: None,
            title: title.to_string(),
            description: String::new(),
            metadata: ItemMetadata {
                size: 42,
                dimensions: None,
                duration: None,
                format: "png".to_string(),
            },
            section_id: section.map(str::to_string),
            order: 0,
            created_at: None,
            updated_at: None,
        }
    }

    fn id_of(item: &ItemRecord) -> String {
        item.primary_id.as_ref().unwrap().render()
    }

    /// Raw documents with legacy identifier shapes go straight into the array.
    async fn push_raw(mutator: &AggregateMutator<MemoryStore>, parent: &ObjectId, doc: Value) {
        mutator
            .store()
            .update_portfolio(
                parent,
                UpdateOp::Push {
                    array: "items".to_string(),
                    value: doc,
                },
            )
            .await
            .unwrap();
    }

    fn legacy_doc(id: Value, field: &str, title: &str) -> Value {
        let mut doc = serde_json::to_value(new_item(title, None)).unwrap();
        let map = doc.as_object_mut().unwrap();
        map.remove("_id");
        map.insert(field.to_string(), id);
        doc
    }

    const STALE: &str = "2000-01-01T00:00:00Z";

    /// Move the parent's modification time far into the past.
    async fn backdate(mutator: &AggregateMutator<MemoryStore>, parent: &ObjectId) -> DateTime<Utc> {
        mutator
            .store()
            .update_portfolio(
                parent,
                UpdateOp::Set(vec![("updated_at".to_string(), json!(STALE))]),
            )
            .await
            .unwrap();
        let stale = mutator.load(parent).await.unwrap().updated_at.unwrap();
        assert_eq!(stale, STALE.parse::<DateTime<Utc>>().unwrap());
        stale
    }

    async fn updated_at(mutator: &AggregateMutator<MemoryStore>, parent: &ObjectId) -> DateTime<Utc> {
        mutator.load(parent).await.unwrap().updated_at.unwrap()
    }

    #[tokio::test]
    async fn test_insert_then_locate_and_touch() {
        let (mutator, parent) = setup().await;
        let stale = backdate(&mutator, &parent).await;

        let item = new_item("first", None);
        mutator.insert(&parent, &item).await.unwrap();

        let loaded = mutator.load(&parent).await.unwrap();
        assert_eq!(loaded.items.len(), 1);
        let located = locate(&loaded.items, &id_of(&item)).unwrap();
        assert_eq!(located.child.title, "first");
        assert!(loaded.updated_at.unwrap() > stale);
    }

    #[tokio::test]
    async fn test_patch_and_remove_touch_parent() {
        let (mutator, parent) = setup().await;
        let item = new_item("first", None);
        mutator.insert(&parent, &item).await.unwrap();

        let stale = backdate(&mutator, &parent).await;
        let fields = json!({"title": "renamed"}).as_object().unwrap().clone();
        mutator
            .patch_child::<ItemRecord>(&parent, &id_of(&item), fields)
            .await
            .unwrap();
        assert!(updated_at(&mutator, &parent).await > stale);

        let stale = backdate(&mutator, &parent).await;
        assert!(mutator
            .remove_child::<ItemRecord>(&parent, &id_of(&item))
            .await
            .unwrap());
        assert!(updated_at(&mutator, &parent).await > stale);
    }

    #[tokio::test]
    async fn test_remove_of_unknown_child_keeps_timestamp() {
        let (mutator, parent) = setup().await;
        mutator.insert(&parent, &new_item("kept", None)).await.unwrap();
        let stale = backdate(&mutator, &parent).await;

        assert!(!mutator
            .remove_child::<ItemRecord>(&parent, &ObjectId::new().to_hex())
            .await
            .unwrap());
        assert_eq!(updated_at(&mutator, &parent).await, stale);
    }

    #[tokio::test]
    async fn test_insert_requires_canonical_id() {
        let (mutator, parent) = setup().await;
        let mut item = new_item("x", None);
        item.primary_id = Some(StoredId::Plain("abc".to_string()));
        assert!(matches!(
            mutator.insert(&parent, &item).await,
            Err(PortfolioError::InvalidField { .. })
        ));
        item.primary_id = None;
        assert!(mutator.insert(&parent, &item).await.is_err());
    }

    #[tokio::test]
    async fn test_insert_into_missing_parent() {
        let (mutator, _) = setup().await;
        let missing = ObjectId::new();
        assert!(matches!(
            mutator.insert(&missing, &new_item("x", None)).await,
            Err(PortfolioError::PortfolioNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_patch_changes_exactly_the_submitted_fields() {
        let (mutator, parent) = setup().await;
        let first = new_item("first", None);
        let second = new_item("second", None);
        mutator.insert(&parent, &first).await.unwrap();
        mutator.insert(&parent, &second).await.unwrap();

        let before = mutator.load(&parent).await.unwrap();
        let fields = json!({"title": "renamed", "order": 7});
        let patched: ItemRecord = mutator
            .patch_child(&parent, &id_of(&second), fields.as_object().unwrap().clone())
            .await
            .unwrap();

        assert_eq!(patched.title, "renamed");
        assert_eq!(patched.order, 7);

        let mut expected = before.items[1].clone();
        expected.title = "renamed".to_string();
        expected.order = 7;
        assert_eq!(patched, expected);

        let after = mutator.load(&parent).await.unwrap();
        assert_eq!(after.items[0], before.items[0]);
        assert_eq!(after.items[1], expected);
    }

    #[tokio::test]
    async fn test_patch_reaches_legacy_item() {
        let (mutator, parent) = setup().await;
        mutator.insert(&parent, &new_item("first", None)).await.unwrap();
        let raw = ObjectId::new().to_hex();
        push_raw(&mutator, &parent, legacy_doc(json!(raw.clone()), "id", "legacy")).await;

        let fields = json!({"description": "found it"});
        let patched: ItemRecord = mutator
            .patch_child(&parent, &raw, fields.as_object().unwrap().clone())
            .await
            .unwrap();
        assert_eq!(patched.title, "legacy");
        assert_eq!(patched.description, "found it");

        let loaded = mutator.load(&parent).await.unwrap();
        assert_eq!(loaded.items[0].description, "");
    }

    #[tokio::test]
    async fn test_patch_missing_child_and_parent() {
        let (mutator, parent) = setup().await;
        let fields = json!({"title": "x"}).as_object().unwrap().clone();
        let missing = ObjectId::new().to_hex();

        assert!(matches!(
            mutator
                .patch_child::<ItemRecord>(&parent, &missing, fields.clone())
                .await,
            Err(PortfolioError::ChildNotFound { .. })
        ));
        assert!(matches!(
            mutator
                .patch_child::<ItemRecord>(&ObjectId::new(), &missing, fields)
                .await,
            Err(PortfolioError::PortfolioNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_patch_rejects_path_keys() {
        let (mutator, parent) = setup().await;
        let item = new_item("first", None);
        mutator.insert(&parent, &item).await.unwrap();
        let fields = json!({"metadata.size": 1}).as_object().unwrap().clone();
        assert!(matches!(
            mutator
                .patch_child::<ItemRecord>(&parent, &id_of(&item), fields)
                .await,
            Err(PortfolioError::InvalidField { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_existing_and_missing() {
        let (mutator, parent) = setup().await;
        let keep = new_item("keep", None);
        let drop = new_item("drop", None);
        mutator.insert(&parent, &keep).await.unwrap();
        mutator.insert(&parent, &drop).await.unwrap();

        assert!(mutator
            .remove_child::<ItemRecord>(&parent, &id_of(&drop))
            .await
            .unwrap());
        let loaded = mutator.load(&parent).await.unwrap();
        assert!(locate(&loaded.items, &id_of(&drop)).is_none());
        assert_eq!(loaded.items.len(), 1);

        let snapshot = mutator.store().find_portfolio(&parent).await.unwrap();
        assert!(!mutator
            .remove_child::<ItemRecord>(&parent, &ObjectId::new().to_hex())
            .await
            .unwrap());
        assert_eq!(mutator.store().find_portfolio(&parent).await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_remove_legacy_encodings() {
        let (mutator, parent) = setup().await;
        let as_legacy_string = ObjectId::new();
        let as_legacy_canonical = ObjectId::new();
        let as_primary_string = ObjectId::new();
        push_raw(&mutator, &parent, legacy_doc(json!(as_legacy_string.to_hex()), "id", "a")).await;
        push_raw(&mutator, &parent, legacy_doc(as_legacy_canonical.to_document(), "id", "b")).await;
        push_raw(&mutator, &parent, legacy_doc(json!(as_primary_string.to_hex()), "_id", "c")).await;

        for id in [as_legacy_string, as_legacy_canonical, as_primary_string] {
            assert!(mutator
                .remove_child::<ItemRecord>(&parent, &id.to_hex())
                .await
                .unwrap());
        }
        assert!(mutator.load(&parent).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn test_remove_uppercase_canonical_id() {
        let (mutator, parent) = setup().await;
        let oid = ObjectId::new();
        let mut doc = serde_json::to_value(new_item("shouty", None)).unwrap();
        doc["_id"] = json!({"$oid": oid.to_hex().to_uppercase()});
        push_raw(&mutator, &parent, doc).await;

        let loaded = mutator.load(&parent).await.unwrap();
        assert_eq!(locate(&loaded.items, &oid.to_hex()).map(|l| l.index), Some(0));

        assert!(mutator
            .remove_child::<ItemRecord>(&parent, &oid.to_hex())
            .await
            .unwrap());
        assert!(mutator.load(&parent).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn test_remove_from_missing_parent() {
        let (mutator, _) = setup().await;
        assert!(matches!(
            mutator
                .remove_child::<ItemRecord>(&ObjectId::new(), &ObjectId::new().to_hex())
                .await,
            Err(PortfolioError::PortfolioNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_detach_then_remove_section() {
        let (mutator, parent) = setup().await;
        let section = NewSection {
            title: "Work".to_string(),
            description: None,
            order: 0,
        }
        .into_record();
        let section_id = section.primary_id.as_ref().unwrap().render();
        mutator.insert(&parent, &section).await.unwrap();
        mutator
            .insert(&parent, &new_item("in", Some(&section_id)))
            .await
            .unwrap();
        mutator
            .insert(&parent, &new_item("elsewhere", Some("other")))
            .await
            .unwrap();

        let refs = vec![section_id.clone()];
        assert!(mutator.detach_section_items(&parent, &refs).await.unwrap());
        // Repeating the detach is harmless.
        assert!(!mutator.detach_section_items(&parent, &refs).await.unwrap());

        assert!(mutator
            .remove_child::<SectionRecord>(&parent, &section_id)
            .await
            .unwrap());

        let loaded = mutator.load(&parent).await.unwrap();
        assert!(loaded.sections.is_empty());
        assert_eq!(loaded.items.len(), 2);
        assert_eq!(loaded.items[0].section_id, None);
        assert_eq!(loaded.items[1].section_id.as_deref(), Some("other"));
    }

    #[tokio::test]
    async fn test_touch_parent() {
        let (mutator, parent) = setup().await;
        let stale = backdate(&mutator, &parent).await;
        mutator.touch_parent(&parent).await.unwrap();
        assert!(updated_at(&mutator, &parent).await > stale);

        assert!(matches!(
            mutator.touch_parent(&ObjectId::new()).await,
            Err(PortfolioError::PortfolioNotFound(_))
        ));
    }

    #[test]
    fn test_removal_filter_order() {
        let raw = "507f1f77bcf86cd799439011";
        let filters = removal_filters(raw);
        assert_eq!(filters.len(), 4);
        assert_eq!(filters[0], ElementFilter::new("_id", json!({"$oid": raw})));
        assert_eq!(filters[1], ElementFilter::new("id", json!(raw)));

        // Non-canonical input still gets the string comparisons.
        assert_eq!(removal_filters("legacy").len(), 2);
    }
}
