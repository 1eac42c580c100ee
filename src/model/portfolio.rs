use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::PortfolioError;
use crate::model::object_id::{ObjectId, StoredId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            other => Err(format!("unknown media kind '{}'", other)),
        }
    }
}

/// Which embedded collection of a portfolio a child lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    Item,
    Section,
}

impl ChildKind {
    /// Name of the array field holding this kind of child.
    pub fn array_field(&self) -> &'static str {
        match self {
            ChildKind::Item => "items",
            ChildKind::Section => "sections",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChildKind::Item => "item",
            ChildKind::Section => "section",
        }
    }
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Derived during ingestion, never supplied by users directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
    /// Whole seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    pub format: String,
}

/// Children that can be addressed by identifier inside a portfolio array.
pub trait Addressable {
    /// The primary `_id` field.
    fn primary_id(&self) -> Option<&StoredId>;
    /// The legacy `id` field some older writes used instead.
    fn legacy_id(&self) -> Option<&StoredId>;

    /// Whichever identifier field is populated, primary first.
    fn any_id(&self) -> Option<&StoredId> {
        self.primary_id().or(self.legacy_id())
    }
}

/// Item as persisted inside `portfolio.items`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub primary_id: Option<StoredId>,
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub legacy_id: Option<StoredId>,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub filename: String,
    pub original_name: String,
    pub url: String,
    /// Either `/uploads/<name>` or, for rows written by older revisions, an inline `data:` URI.
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub metadata: ItemMetadata,
    #[serde(default)]
    pub section_id: Option<String>,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Addressable for ItemRecord {
    fn primary_id(&self) -> Option<&StoredId> {
        self.primary_id.as_ref()
    }

    fn legacy_id(&self) -> Option<&StoredId> {
        self.legacy_id.as_ref()
    }
}

/// Section as persisted inside `portfolio.sections`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub primary_id: Option<StoredId>,
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub legacy_id: Option<StoredId>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Addressable for SectionRecord {
    fn primary_id(&self) -> Option<&StoredId> {
        self.primary_id.as_ref()
    }

    fn legacy_id(&self) -> Option<&StoredId> {
        self.legacy_id.as_ref()
    }
}

/// The aggregate root as persisted in the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRecord {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub items: Vec<ItemRecord>,
    #[serde(default)]
    pub sections: Vec<SectionRecord>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PortfolioRecord {
    pub fn new(input: NewPortfolio) -> Self {
        let now = Utc::now();
        Self {
            id: ObjectId::new(),
            title: input.title,
            description: input.description,
            items: Vec::new(),
            sections: Vec::new(),
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    pub fn from_document(document: Value) -> anyhow::Result<Self> {
        serde_json::from_value(document)
            .map_err(|e| anyhow::anyhow!("Failed to decode portfolio document: {}", e))
    }

    pub fn to_document(&self) -> anyhow::Result<Value> {
        serde_json::to_value(self)
            .map_err(|e| anyhow::anyhow!("Failed to encode portfolio document: {}", e))
    }
}

// ---------------------------------------------------------------------------
// API views

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub filename: String,
    pub original_name: String,
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub title: String,
    pub description: String,
    pub metadata: ItemMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    pub order: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<ItemRecord> for Item {
    fn from(record: ItemRecord) -> Self {
        Self {
            id: record.any_id().map(StoredId::render),
            kind: record.kind,
            filename: record.filename,
            original_name: record.original_name,
            url: record.url,
            thumbnail_url: record.thumbnail_url,
            title: record.title,
            description: record.description,
            metadata: record.metadata,
            section_id: record.section_id,
            order: record.order,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    pub id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub order: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<SectionRecord> for Section {
    fn from(record: SectionRecord) -> Self {
        Self {
            id: record.any_id().map(StoredId::render),
            title: record.title,
            description: record.description,
            order: record.order,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Portfolio {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub items: Vec<Item>,
    pub sections: Vec<Section>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<PortfolioRecord> for Portfolio {
    fn from(record: PortfolioRecord) -> Self {
        Self {
            id: record.id.to_hex(),
            title: record.title,
            description: record.description,
            items: record.items.into_iter().map(Item::from).collect(),
            sections: record.sections.into_iter().map(Section::from).collect(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Listing projection: basic fields only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Request bodies

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewPortfolio {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewSection {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub order: i64,
}

impl NewSection {
    pub fn into_record(self) -> SectionRecord {
        let now = Utc::now();
        SectionRecord {
            primary_id: Some(StoredId::Canonical(ObjectId::new())),
            legacy_id: None,
            title: self.title,
            description: self.description,
            order: self.order,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    /// Fields written by a full-field section replace.
    pub fn replacement_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("title".to_string(), Value::String(self.title.clone()));
        fields.insert(
            "description".to_string(),
            self.description
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        fields.insert("order".to_string(), Value::from(self.order));
        fields.insert(
            "updated_at".to_string(),
            serde_json::to_value(Utc::now()).unwrap_or(Value::Null),
        );
        fields
    }
}

/// Attach request: usually the upload result plus the user's title and placement.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewItem {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub filename: String,
    pub original_name: String,
    pub url: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub metadata: ItemMetadata,
    #[serde(default)]
    pub section_id: Option<String>,
    #[serde(default)]
    pub order: i64,
}

impl NewItem {
    pub fn into_record(self) -> ItemRecord {
        let now = Utc::now();
        ItemRecord {
            primary_id: Some(StoredId::Canonical(ObjectId::new())),
            legacy_id: None,
            kind: self.kind,
            filename: self.filename,
            original_name: self.original_name,
            url: self.url,
            thumbnail_url: self.thumbnail_url,
            title: self.title,
            description: self.description,
            metadata: self.metadata,
            section_id: self.section_id,
            order: self.order,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }
}

// ---------------------------------------------------------------------------
// Item patch validation

#[derive(Debug, Clone, Copy)]
enum PatchType {
    Text,
    OptionalText,
    Integer,
}

// File references (`filename`, `url`, `thumbnail_url`) are fixed at upload
// time; cleanup deletes whatever they name.
const ITEM_PATCH_FIELDS: &[(&str, PatchType)] = &[
    ("title", PatchType::Text),
    ("description", PatchType::Text),
    ("section_id", PatchType::OptionalText),
    ("order", PatchType::Integer),
    ("original_name", PatchType::Text),
];

/// Check that a partial item update only touches patchable fields with values
/// of the right shape, so the patched document still decodes as an item.
pub fn validate_item_patch(fields: &Map<String, Value>) -> Result<(), PortfolioError> {
    if fields.is_empty() {
        return Err(PortfolioError::InvalidField {
            field: String::new(),
            reason: "patch must contain at least one field".to_string(),
        });
    }

    for (key, value) in fields {
        let Some((_, expected)) = ITEM_PATCH_FIELDS.iter().find(|(name, _)| name == key) else {
            return Err(PortfolioError::InvalidField {
                field: key.clone(),
                reason: "field cannot be patched".to_string(),
            });
        };

        let ok = match expected {
            PatchType::Text => value.is_string(),
            PatchType::OptionalText => value.is_string() || value.is_null(),
            PatchType::Integer => value.is_i64(),
        };
        if !ok {
            let reason = match expected {
                PatchType::Text => "expected a string",
                PatchType::OptionalText => "expected a string or null",
                PatchType::Integer => "expected an integer",
            };
            return Err(PortfolioError::InvalidField {
                field: key.clone(),
                reason: reason.to_string(),
            });
        }
    }

    Ok(())
}
