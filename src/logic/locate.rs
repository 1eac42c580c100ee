//! Finding children inside a portfolio's embedded arrays.
//!
//! Over time children have been written with their identifier under `_id` or
//! under a legacy `id` field, and either in canonical `{"$oid": ..}` form or as
//! a bare string. Lookups try an ordered table of match rules so every one of
//! those encodings stays addressable.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::PortfolioError;
use crate::model::{
    Addressable, ChildKind, ItemRecord, ObjectId, PortfolioRecord, SectionRecord, StoredId,
};

/// One way of comparing a requested identifier with a stored child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdMatchRule {
    /// `_id` holds the canonical identifier.
    PrimaryCanonical,
    /// The legacy `id` field holds the canonical identifier.
    LegacyCanonical,
    /// The string rendering of whichever field is populated equals the raw request.
    StringRendering,
}

/// Tried in order; the first rule with a matching child wins.
pub const ID_MATCH_RULES: &[IdMatchRule] = &[
    IdMatchRule::PrimaryCanonical,
    IdMatchRule::LegacyCanonical,
    IdMatchRule::StringRendering,
];

impl IdMatchRule {
    pub fn matches<C: Addressable>(&self, child: &C, canonical: Option<&ObjectId>, raw: &str) -> bool {
        match self {
            IdMatchRule::PrimaryCanonical => is_canonical(child.primary_id(), canonical),
            IdMatchRule::LegacyCanonical => is_canonical(child.legacy_id(), canonical),
            IdMatchRule::StringRendering => child.any_id().map(StoredId::render).as_deref() == Some(raw),
        }
    }
}

fn is_canonical(stored: Option<&StoredId>, canonical: Option<&ObjectId>) -> bool {
    match (stored, canonical) {
        (Some(StoredId::Canonical(stored)), Some(wanted)) => stored == wanted,
        _ => false,
    }
}

/// A child found in its parent array.
#[derive(Debug, PartialEq)]
pub struct Located<'a, C> {
    /// Position in the parent array; the only handle positional updates accept.
    pub index: usize,
    pub child: &'a C,
    pub rule: IdMatchRule,
}

/// Find `raw` among `children`, scanning in stored order for each rule in turn.
pub fn locate<'a, C: Addressable>(children: &'a [C], raw: &str) -> Option<Located<'a, C>> {
    let canonical = ObjectId::parse_str(raw).ok();
    ID_MATCH_RULES.iter().find_map(|rule| {
        children
            .iter()
            .position(|child| rule.matches(child, canonical.as_ref(), raw))
            .map(|index| Located {
                index,
                child: &children[index],
                rule: *rule,
            })
    })
}

/// A child type embedded in a portfolio.
pub trait EmbeddedChild: Addressable + Serialize + DeserializeOwned + Clone + Send + Sync {
    const KIND: ChildKind;

    fn children_of(parent: &PortfolioRecord) -> &[Self];
}

impl EmbeddedChild for ItemRecord {
    const KIND: ChildKind = ChildKind::Item;

    fn children_of(parent: &PortfolioRecord) -> &[Self] {
        &parent.items
    }
}

impl EmbeddedChild for SectionRecord {
    const KIND: ChildKind = ChildKind::Section;

    fn children_of(parent: &PortfolioRecord) -> &[Self] {
        &parent.sections
    }
}

/// Locate a child of kind `C` in `parent`, or report it missing.
pub fn find<'a, C: EmbeddedChild>(
    parent: &'a PortfolioRecord,
    raw: &str,
) -> Result<Located<'a, C>, PortfolioError> {
    let located = locate(C::children_of(parent), raw).ok_or_else(|| PortfolioError::ChildNotFound {
        kind: C::KIND,
        id: raw.to_string(),
    })?;

    if located.rule != IdMatchRule::PrimaryCanonical {
        log::debug!(
            "located {} {} in portfolio {} via {:?}",
            C::KIND,
            raw,
            parent.id,
            located.rule
        );
    }

    Ok(located)
}
