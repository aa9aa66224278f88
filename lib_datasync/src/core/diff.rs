//! # Structural Diff Detector
//!
//! Compares two payloads of the same segment and reports which top-level
//! entities were added, removed or changed.
//!
//! ## Entities
//! Each key owned by the segment is a collection:
//! - an array of objects is indexed by each element's `id`; a repeated `id`
//!   makes the collection incomparable,
//! - an object is indexed by its own keys,
//! - `null` is an empty collection,
//! - any other scalar is a single entity named after the collection.
//!
//! Keys outside the segment's scope are never inspected. Partial responses carry
//! empty placeholders for them, and comparing those would report every partial
//! sync as wiping unrelated data.
//!
//! ## Equality
//! Objects compare by key set. Arrays whose elements all carry distinct `id`s
//! are compared as sets keyed by `id`; every other array is compared in order.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::errors::{Result, SyncError};
use crate::model::{Payload, Segment};

/// Collection name used for localization bundle entries.
pub const LOCALIZATION_COLLECTION: &str = "localization";

/// Identifier of one top-level entity, qualified by its collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityId {
    pub collection: String,
    pub id: String,
}

impl EntityId {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

/// Added, removed and changed entities between two payload versions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub added: BTreeSet<EntityId>,
    pub removed: BTreeSet<EntityId>,
    pub changed: BTreeSet<EntityId>,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.added.len() + self.removed.len() + self.changed.len()
    }

    /// Folds `other` into `self`. Sets deduplicate entities reported twice,
    /// e.g. by FULL and by the partial that owns them.
    pub fn merge(&mut self, other: &DiffSummary) {
        self.added.extend(other.added.iter().cloned());
        self.removed.extend(other.removed.iter().cloned());
        self.changed.extend(other.changed.iter().cloned());
    }

    /// Added and changed ids grouped by collection, for notifications.
    pub fn touched_by_collection(&self) -> BTreeMap<String, Vec<String>> {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entity in self.added.iter().chain(self.changed.iter()) {
            grouped
                .entry(entity.collection.clone())
                .or_default()
                .push(entity.id.clone());
        }
        for ids in grouped.values_mut() {
            ids.sort();
            ids.dedup();
        }
        grouped
    }
}

/// Diffs `new` against `old` within `scope`.
///
/// With `old == None` every in-scope entity of `new` is reported as added.
/// Fails with [`SyncError::DiffComparisonError`] when `new` is not an object,
/// misses a key of `scope`, or holds a collection that cannot be indexed.
pub fn diff(old: Option<&Payload>, new: &Payload, scope: Segment) -> Result<DiffSummary> {
    let new_obj = as_object(new, "new payload")?;
    let old_obj = old.map(|o| as_object(o, "previous payload")).transpose()?;

    let mut summary = DiffSummary::default();
    for key in scope.owned_keys() {
        let new_value = new_obj.get(key).ok_or_else(|| {
            SyncError::DiffComparisonError(format!(
                "payload for {scope} is missing top-level key '{key}'"
            ))
        })?;
        // A key missing from the previous payload compares as empty.
        let old_value = old_obj.and_then(|o| o.get(key));
        diff_collection(key, old_value, new_value, &mut summary)?;
    }
    Ok(summary)
}

/// Diffs two localization bundles. Every top-level key is one entity.
///
/// Works for both bundle shapes: a map of language files, or a single archive field.
pub fn diff_bundle(old: Option<&Payload>, new: &Payload) -> Result<DiffSummary> {
    let new_obj = as_object(new, "new bundle")?;
    let empty = Map::new();
    let old_obj = match old {
        Some(o) => as_object(o, "previous bundle")?,
        None => &empty,
    };
    Ok(compare_indexes(
        LOCALIZATION_COLLECTION,
        &old_obj.iter().map(|(k, v)| (k.clone(), v)).collect(),
        &new_obj.iter().map(|(k, v)| (k.clone(), v)).collect(),
    ))
}

fn as_object<'a>(payload: &'a Payload, what: &str) -> Result<&'a Map<String, Value>> {
    payload.as_object().ok_or_else(|| {
        SyncError::DiffComparisonError(format!("{what} is not a JSON object"))
    })
}

fn diff_collection(
    collection: &str,
    old: Option<&Value>,
    new: &Value,
    summary: &mut DiffSummary,
) -> Result<()> {
    let old_index = match old {
        Some(value) => index_collection(collection, value)?,
        None => BTreeMap::new(),
    };
    let new_index = index_collection(collection, new)?;
    summary.merge(&compare_indexes(collection, &old_index, &new_index));
    Ok(())
}

fn compare_indexes(
    collection: &str,
    old: &BTreeMap<String, &Value>,
    new: &BTreeMap<String, &Value>,
) -> DiffSummary {
    let mut summary = DiffSummary::default();
    for (id, new_value) in new {
        match old.get(id) {
            None => {
                summary.added.insert(EntityId::new(collection, id.clone()));
            }
            Some(old_value) if !structurally_equal(old_value, new_value) => {
                summary.changed.insert(EntityId::new(collection, id.clone()));
            }
            Some(_) => {}
        }
    }
    for id in old.keys().filter(|id| !new.contains_key(*id)) {
        summary.removed.insert(EntityId::new(collection, id.clone()));
    }
    summary
}

fn index_collection<'a>(collection: &str, value: &'a Value) -> Result<BTreeMap<String, &'a Value>> {
    match value {
        Value::Null => Ok(BTreeMap::new()),
        Value::Array(items) => {
            let mut index = BTreeMap::new();
            for (position, item) in items.iter().enumerate() {
                let id = entity_id(item).ok_or_else(|| {
                    SyncError::DiffComparisonError(format!(
                        "element {position} of '{collection}' has no usable 'id'"
                    ))
                })?;
                if index.insert(id.clone(), item).is_some() {
                    return Err(SyncError::DiffComparisonError(format!(
                        "'{collection}' holds id '{id}' more than once"
                    )));
                }
            }
            Ok(index)
        }
        Value::Object(map) => Ok(map.iter().map(|(k, v)| (k.clone(), v)).collect()),
        scalar => Ok(BTreeMap::from([(collection.to_string(), scalar)])),
    }
}

fn entity_id(item: &Value) -> Option<String> {
    match item.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Deep equality, order-insensitive for id-keyed arrays.
pub fn structurally_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| structurally_equal(v, w)))
        }
        (Value::Array(x), Value::Array(y)) => {
            if x.len() != y.len() {
                return false;
            }
            match (keyed_by_id(x), keyed_by_id(y)) {
                (Some(xk), Some(yk)) => {
                    xk.len() == yk.len()
                        && xk
                            .iter()
                            .all(|(id, v)| yk.get(id).is_some_and(|w| structurally_equal(v, w)))
                }
                _ => x.iter().zip(y).all(|(v, w)| structurally_equal(v, w)),
            }
        }
        _ => a == b,
    }
}

/// `None` when any element lacks an id or an id repeats.
fn keyed_by_id(items: &[Value]) -> Option<BTreeMap<String, &Value>> {
    if items.is_empty() {
        return None;
    }
    let keyed: BTreeMap<String, &Value> = items
        .iter()
        .map(|item| entity_id(item).map(|id| (id, item)))
        .collect::<Option<_>>()?;
    (keyed.len() == items.len()).then_some(keyed)
}
