//! Slash-delimited path access over the configuration tree.
//!
//! The tree is a `serde_value::Value`. Inner nodes are maps keyed by
//! `Value::String`; record collections are maps keyed by decimal ids.

use std::collections::BTreeMap;

use serde_value::Value;

use crate::error::{Error, Result};

pub fn key(segment: &str) -> Value {
    Value::String(segment.to_string())
}

pub fn empty() -> Value {
    Value::Map(BTreeMap::new())
}

pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

/// Joins path fragments, ignoring empty ones.
pub fn join(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|part| segments(part))
        .collect::<Vec<_>>()
        .join("/")
}

/// Leftovers of a blank node: empty strings, unit and `None`.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Unit | Value::Option(None) => true,
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}

/// Renders a stored scalar as text. Containers yield `None`.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Char(c) => Some(c.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::U8(n) => Some(n.to_string()),
        Value::U16(n) => Some(n.to_string()),
        Value::U32(n) => Some(n.to_string()),
        Value::U64(n) => Some(n.to_string()),
        Value::I8(n) => Some(n.to_string()),
        Value::I16(n) => Some(n.to_string()),
        Value::I32(n) => Some(n.to_string()),
        Value::I64(n) => Some(n.to_string()),
        Value::F32(n) => Some(n.to_string()),
        Value::F64(n) => Some(n.to_string()),
        Value::Option(Some(inner)) | Value::Newtype(inner) => scalar_text(inner),
        _ => None,
    }
}

fn child<'a>(node: &'a Value, segment: &str) -> Option<&'a Value> {
    match node {
        Value::Map(map) => map.get(&key(segment)),
        Value::Seq(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn child_mut<'a>(node: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match node {
        Value::Map(map) => map.get_mut(&key(segment)),
        Value::Seq(items) => segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
        _ => None,
    }
}

pub fn get<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path).try_fold(tree, child)
}

pub fn get_mut<'a>(tree: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    segments(path).try_fold(tree, child_mut)
}

fn not_a_container(path: &str, segment: &str) -> Error {
    Error::server(
        "CONFIG_PATH_NOT_A_CONTAINER",
        format!("Cannot descend into `{segment}` while writing config path `{path}`"),
    )
}

fn ensure_container(node: &mut Value, path: &str, segment: &str) -> Result<()> {
    if matches!(node, Value::Map(_) | Value::Seq(_)) {
        return Ok(());
    }
    if is_blank(node) {
        *node = empty();
        return Ok(());
    }
    Err(not_a_container(path, segment))
}

/// Writes `value` at `path`, creating intermediate maps as needed.
pub fn set(tree: &mut Value, path: &str, value: Value) -> Result<()> {
    let parts: Vec<&str> = segments(path).collect();
    let Some((last, parents)) = parts.split_last() else {
        *tree = value;
        return Ok(());
    };

    let mut node = tree;
    for segment in parents {
        ensure_container(node, path, segment)?;
        node = match node {
            Value::Map(map) => map.entry(key(segment)).or_insert_with(empty),
            Value::Seq(items) => {
                let index = segment
                    .parse::<usize>()
                    .map_err(|_| not_a_container(path, segment))?;
                if index == items.len() {
                    items.push(empty());
                }
                items
                    .get_mut(index)
                    .ok_or_else(|| not_a_container(path, segment))?
            }
            _ => return Err(not_a_container(path, segment)),
        };
    }

    ensure_container(node, path, last)?;
    match node {
        Value::Map(map) => {
            map.insert(key(last), value);
        }
        Value::Seq(items) => {
            let index = last
                .parse::<usize>()
                .map_err(|_| not_a_container(path, last))?;
            match index.cmp(&items.len()) {
                std::cmp::Ordering::Less => items[index] = value,
                std::cmp::Ordering::Equal => items.push(value),
                std::cmp::Ordering::Greater => return Err(not_a_container(path, last)),
            }
        }
        _ => return Err(not_a_container(path, last)),
    }

    Ok(())
}

/// Removes and returns the node at `path`.
pub fn remove(tree: &mut Value, path: &str) -> Option<Value> {
    let parts: Vec<&str> = segments(path).collect();
    let (last, parents) = parts.split_last()?;
    let parent = parents.iter().try_fold(tree, |node, segment| child_mut(node, segment))?;

    match parent {
        Value::Map(map) => map.remove(&key(last)),
        Value::Seq(items) => {
            let index = last.parse::<usize>().ok()?;
            (index < items.len()).then(|| items.remove(index))
        }
        _ => None,
    }
}

/// Ids of the records stored in a collection, ascending.
///
/// Returns `None` when the node does not have the shape of a record
/// collection.
pub fn record_ids(collection: Option<&Value>) -> Option<Vec<usize>> {
    match collection {
        None => Some(Vec::new()),
        Some(blank) if is_blank(blank) => Some(Vec::new()),
        Some(Value::Seq(items)) => items
            .iter()
            .all(|item| matches!(item, Value::Map(_)))
            .then(|| (0..items.len()).collect()),
        Some(Value::Map(map)) => map_record_ids(map),
        Some(_) => None,
    }
}

fn map_record_ids(map: &BTreeMap<Value, Value>) -> Option<Vec<usize>> {
    let mut ids = Vec::with_capacity(map.len());
    for (k, v) in map {
        let Value::String(k) = k else { return None };
        let id = k.parse::<usize>().ok()?;
        if id.to_string() != *k || !matches!(v, Value::Map(_)) {
            return None;
        }
        ids.push(id);
    }
    ids.sort_unstable();
    Some(ids)
}

/// Id for the next record appended to `collection`.
///
/// Empty collections start at 0, dense ones continue at their count and
/// collections with gaps left by deletions continue after the highest id.
/// Any other shape yields `None`.
pub fn next_id(collection: Option<&Value>) -> Option<usize> {
    let ids = record_ids(collection)?;
    let dense = ids.iter().enumerate().all(|(index, id)| index == *id);

    Some(match ids.last() {
        None => 0,
        Some(_) if dense => ids.len(),
        Some(max) => max + 1,
    })
}

fn is_record_map(map: &BTreeMap<Value, Value>) -> bool {
    !map.is_empty() && map_record_ids(map).is_some()
}

/// Converts record collections into positional sequences for persistence.
pub fn to_persisted(value: &Value) -> Value {
    match value {
        Value::Map(map) if is_record_map(map) => {
            let mut entries: Vec<(usize, &Value)> = map
                .iter()
                .filter_map(|(k, v)| match k {
                    Value::String(k) => k.parse::<usize>().ok().map(|id| (id, v)),
                    _ => None,
                })
                .collect();
            entries.sort_by_key(|(id, _)| *id);
            Value::Seq(entries.into_iter().map(|(_, v)| to_persisted(v)).collect())
        }
        Value::Map(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), to_persisted(v)))
                .collect(),
        ),
        Value::Seq(items) => Value::Seq(items.iter().map(to_persisted).collect()),
        other => other.clone(),
    }
}

/// Inverse of [`to_persisted`]: sequences of tables become id-keyed maps,
/// numbered by position.
pub fn from_persisted(value: Value) -> Value {
    match value {
        Value::Seq(items) if !items.is_empty() && items.iter().all(|i| matches!(i, Value::Map(_))) => {
            Value::Map(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(id, item)| (key(&id.to_string()), from_persisted(item)))
                    .collect(),
            )
        }
        Value::Seq(items) => Value::Seq(items.into_iter().map(from_persisted).collect()),
        Value::Map(map) => Value::Map(
            map.into_iter()
                .map(|(k, v)| (k, from_persisted(v)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> Value {
        let mut map = BTreeMap::new();
        map.insert(key("name"), key(name));
        Value::Map(map)
    }

    #[test]
    fn test_set_creates_intermediate_maps() {
        let mut tree = empty();
        set(&mut tree, "system/webgui/port", key("443")).unwrap();
        assert_eq!(get(&tree, "system/webgui/port"), Some(&key("443")));
        assert_eq!(get(&tree, "/system//webgui/port/"), Some(&key("443")));
        assert!(get(&tree, "system/missing").is_none());
    }

    #[test]
    fn test_set_replaces_blank_leaf_with_map() {
        let mut tree = empty();
        set(&mut tree, "routes", key("")).unwrap();
        set(&mut tree, "routes/0", record("a")).unwrap();
        assert_eq!(get(&tree, "routes/0/name"), Some(&key("a")));
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let mut tree = empty();
        set(&mut tree, "system/hostname", key("fw")).unwrap();
        let err = set(&mut tree, "system/hostname/x", key("y")).unwrap_err();
        assert_eq!(err.response_id(), "CONFIG_PATH_NOT_A_CONTAINER");
    }

    #[test]
    fn test_remove_returns_node() {
        let mut tree = empty();
        set(&mut tree, "a/b", key("c")).unwrap();
        assert_eq!(remove(&mut tree, "a/b"), Some(key("c")));
        assert_eq!(remove(&mut tree, "a/b"), None);
        assert_eq!(remove(&mut tree, ""), None);
    }

    #[test]
    fn test_next_id_shapes() {
        let mut tree = empty();
        assert_eq!(next_id(get(&tree, "routes")), Some(0));

        set(&mut tree, "routes/0", record("a")).unwrap();
        set(&mut tree, "routes/1", record("b")).unwrap();
        set(&mut tree, "routes/2", record("c")).unwrap();
        assert_eq!(next_id(get(&tree, "routes")), Some(3));

        remove(&mut tree, "routes/1");
        assert_eq!(next_id(get(&tree, "routes")), Some(3));

        set(&mut tree, "settings/enable", key("yes")).unwrap();
        assert_eq!(next_id(get(&tree, "settings")), None);
        assert_eq!(next_id(get(&tree, "settings/enable")), None);
    }

    #[test]
    fn test_persisted_form_compacts_ids() {
        let mut tree = empty();
        set(&mut tree, "routes/0", record("a")).unwrap();
        set(&mut tree, "routes/2", record("c")).unwrap();

        let persisted = to_persisted(&tree);
        assert!(matches!(get(&persisted, "routes"), Some(Value::Seq(items)) if items.len() == 2));

        let restored = from_persisted(persisted);
        assert_eq!(get(&restored, "routes/1/name"), Some(&key("c")));
        assert!(get(&restored, "routes/2").is_none());
    }
}
