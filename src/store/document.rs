//! In-document update engine shared by the store backends.
//!
//! Both backends load the document, apply one [`UpdateOp`] here and write the
//! result back, so positional paths and array predicates behave identically.

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::model::{ObjectId, PortfolioSummary};
use crate::store::traits::{ElementFilter, UpdateOp};

/// Apply `op` to `document`. Returns whether anything changed.
pub fn apply_update(document: &mut Value, op: &UpdateOp) -> Result<bool> {
    match op {
        UpdateOp::Set(assignments) => {
            let mut modified = false;
            for (path, value) in assignments {
                modified |= set_path(document, path, value.clone())
                    .with_context(|| format!("Cannot set path '{}'", path))?;
            }
            Ok(modified)
        }
        UpdateOp::Push { array, value } => {
            array_mut(document, array, true)?.push(value.clone());
            Ok(true)
        }
        UpdateOp::Pull { array, filter } => {
            let elements = array_mut(document, array, false)?;
            let before = elements.len();
            elements.retain(|element| !filter.matches(element));
            Ok(elements.len() != before)
        }
        UpdateOp::UnsetWhere {
            array,
            filter,
            field,
        } => Ok(unset_where(array_mut(document, array, false)?, filter, field)),
    }
}

fn unset_where(elements: &mut [Value], filter: &ElementFilter, field: &str) -> bool {
    let mut modified = false;
    for element in elements.iter_mut().filter(|e| filter.matches(e)) {
        if let Some(map) = element.as_object_mut() {
            modified |= map.remove(field).is_some();
        }
    }
    modified
}

fn root_mut(document: &mut Value) -> Result<&mut Map<String, Value>> {
    document
        .as_object_mut()
        .ok_or_else(|| anyhow!("Document root is not an object"))
}

/// The top-level array `field`. A missing field reads as empty; when `create`
/// is set it is materialised so it can be appended to.
fn array_mut<'a>(document: &'a mut Value, field: &str, create: bool) -> Result<&'a mut Vec<Value>> {
    let root = root_mut(document)?;
    if !root.contains_key(field) || (create && root.get(field) == Some(&Value::Null)) {
        root.insert(field.to_string(), Value::Array(Vec::new()));
    }
    match root.get_mut(field) {
        Some(Value::Array(elements)) => Ok(elements),
        Some(Value::Null) => bail!("Field '{}' is null", field),
        _ => bail!("Field '{}' is not an array", field),
    }
}

fn set_path(document: &mut Value, path: &str, value: Value) -> Result<bool> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        bail!("Empty path segment");
    }

    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| anyhow!("Empty path"))?;

    let mut current = document;
    for segment in parents {
        current = match current {
            Value::Object(map) => map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(elements) => {
                let index = parse_index(segment)?;
                elements
                    .get_mut(index)
                    .ok_or_else(|| anyhow!("Array index {} out of range", index))?
            }
            _ => bail!("Segment '{}' does not address a container", segment),
        };
    }

    match current {
        Value::Object(map) => {
            let previous = map.insert(last.to_string(), value.clone());
            Ok(previous.as_ref() != Some(&value))
        }
        Value::Array(elements) => {
            let index = parse_index(last)?;
            let slot = elements
                .get_mut(index)
                .ok_or_else(|| anyhow!("Array index {} out of range", index))?;
            let changed = *slot != value;
            *slot = value;
            Ok(changed)
        }
        _ => bail!("Segment '{}' does not address a container", last),
    }
}

fn parse_index(segment: &str) -> Result<usize> {
    segment
        .parse::<usize>()
        .map_err(|_| anyhow!("Expected array index, got '{}'", segment))
}

#[derive(Deserialize)]
struct SummaryRecord {
    #[serde(rename = "_id")]
    id: ObjectId,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Project a portfolio document (or a partial projection of one) onto its summary fields.
pub fn summary_from_document(document: Value) -> Result<PortfolioSummary> {
    let record: SummaryRecord =
        serde_json::from_value(document).context("Failed to decode portfolio summary")?;
    Ok(PortfolioSummary {
        id: record.id.to_hex(),
        title: record.title,
        description: record.description,
        created_at: record.created_at,
    })
}
