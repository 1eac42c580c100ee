use crate::model::{ObjectId, PortfolioSummary};
use anyhow::Result;
use serde_json::Value;

/// A portfolio aggregate as the store holds it: one JSON document with its
/// sections and items embedded.
pub type Document = Value;

/// Equality match against one field of an array element.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementFilter {
    pub field: String,
    pub equals: Value,
}

impl ElementFilter {
    pub fn new(field: impl Into<String>, equals: Value) -> Self {
        Self {
            field: field.into(),
            equals,
        }
    }

    /// Canonical `{"$oid": ..}` values compare by identifier, so hex case does
    /// not matter. Anything else needs exact JSON equality: a canonical value
    /// never equals its string rendering.
    pub fn matches(&self, element: &Value) -> bool {
        let Some(value) = element.get(&self.field) else {
            return false;
        };
        match (
            ObjectId::from_document(value),
            ObjectId::from_document(&self.equals),
        ) {
            (Some(stored), Some(wanted)) => stored == wanted,
            _ => value == &self.equals,
        }
    }
}

/// The single-document update primitives the store offers.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// Write values at dotted paths; numeric segments address array positions
    /// (`items.3.title`).
    Set(Vec<(String, Value)>),
    /// Append to an array field.
    Push { array: String, value: Value },
    /// Remove every array element matching the filter.
    Pull { array: String, filter: ElementFilter },
    /// Remove `field` from every array element matching the filter.
    UnsetWhere {
        array: String,
        filter: ElementFilter,
        field: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
}

impl UpdateResult {
    pub fn unmatched() -> Self {
        Self::default()
    }
}

/// Document store collaborator. Each call is atomic for the one document it
/// touches; nothing spans calls.
#[async_trait::async_trait]
pub trait PortfolioStore: Send + Sync {
    async fn insert_portfolio(&self, id: &ObjectId, document: Document) -> Result<()>;
    async fn find_portfolio(&self, id: &ObjectId) -> Result<Option<Document>>;
    /// Summary projection of every portfolio in creation order.
    async fn list_portfolios(&self) -> Result<Vec<PortfolioSummary>>;
    async fn update_portfolio(&self, id: &ObjectId, op: UpdateOp) -> Result<UpdateResult>;
    async fn delete_portfolio(&self, id: &ObjectId) -> Result<bool>;
    /// Release connections. Called once by the process owner on shutdown.
    async fn close(&self) {}
}
