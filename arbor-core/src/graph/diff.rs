//! Structural Diff
//!
//! Compares the previous and the new value of a written node and produces the
//! leaf-level change records the notifier delivers.
//!
//! # Base Levels
//!
//! Every record carries the level it has at the node where it occurred:
//!
//! - `-1`: a key was created or deleted
//! - `0`: a value changed
//! - `1`: an array was replaced by deep-equal contents (written node only)
//!
//! A node `d` levels above the record sees `base + d`. Shallow listeners
//! only care about level `<= 0`, i.e. their own value or their key set.
//!
//! # Array Reconciliation
//!
//! When the first previous element is a keyed container holding one of the
//! configured identity fields, elements are matched by that field. Matched
//! elements that changed index produce a [`Move`] so the node graph can
//! re-key the element's node; the element itself is then compared against
//! its own previous value rather than whatever used to sit at its new index.
//! Any move also yields one structural record for the whole array.

use std::collections::HashMap;

use tracing::warn;

use crate::value::{deep_equal, format_path, Key, PathType, Value};

/// One change below (or at) the written node.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawChange {
    /// Path from the written node.
    pub path: Vec<Key>,
    /// Container kind of each level of `path`.
    pub path_types: Vec<PathType>,
    pub value: Value,
    pub prev: Value,
    pub base_level: i32,
    /// The key set, length or order of the container holding this record
    /// changed.
    pub structural: bool,
    /// The value at `path` was replaced wholesale, so existing descendant
    /// nodes need their own comparison.
    pub descend: bool,
}

/// An identity-matched array element that changed index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Move {
    /// Path of the array from the written node.
    pub array_path: Vec<Key>,
    pub from: usize,
    pub to: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Diff {
    pub changes: Vec<RawChange>,
    pub moves: Vec<Move>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.moves.is_empty()
    }
}

/// Diff two values of the same node.
pub(crate) fn diff(prev: &Value, value: &Value, id_fields: &[String]) -> Diff {
    let mut walker = Walker {
        id_fields,
        path: Vec::new(),
        types: Vec::new(),
        out: Diff::default(),
    };

    if let (Value::Array(_), Value::Array(_)) = (prev, value) {
        if deep_equal(prev, value) {
            walker.record(prev, value, 1, false, false);
            return walker.out;
        }
    }

    walker.walk(prev, value);
    walker.out
}

struct Walker<'a> {
    id_fields: &'a [String],
    path: Vec<Key>,
    types: Vec<PathType>,
    out: Diff,
}

impl Walker<'_> {
    fn record(&mut self, prev: &Value, value: &Value, base_level: i32, structural: bool, descend: bool) {
        self.out.changes.push(RawChange {
            path: self.path.clone(),
            path_types: self.types.clone(),
            value: value.clone(),
            prev: prev.clone(),
            base_level,
            structural,
            descend,
        });
    }

    fn enter(&mut self, key: Key, kind: PathType) {
        self.path.push(key);
        self.types.push(kind);
    }

    fn leave(&mut self) {
        self.path.pop();
        self.types.pop();
    }

    fn walk(&mut self, prev: &Value, value: &Value) {
        if deep_equal(prev, value) {
            return;
        }

        match (prev, value) {
            (Value::Object(old), Value::Object(new)) => self.walk_keyed(old, new, PathType::Object),
            (Value::Map(old), Value::Map(new)) => self.walk_keyed(old, new, PathType::Map),
            (Value::Array(old), Value::Array(new)) => self.walk_array(old, new),
            (Value::Set(_), Value::Set(_)) => self.record(prev, value, 0, true, false),
            _ => {
                let existence_changed = prev.is_undefined() || value.is_undefined();
                let base_level = if existence_changed { -1 } else { 0 };
                let structural = existence_changed || prev.is_container() || value.is_container();
                self.record(prev, value, base_level, structural, true);
            }
        }
    }

    fn walk_keyed(
        &mut self,
        old: &indexmap::IndexMap<String, Value>,
        new: &indexmap::IndexMap<String, Value>,
        kind: PathType,
    ) {
        for (key, prev) in old {
            if !new.contains_key(key) {
                self.enter(Key::Field(key.clone()), kind);
                self.walk(prev, &Value::Undefined);
                self.leave();
            }
        }
        for (key, value) in new {
            let prev = old.get(key).unwrap_or(&Value::Undefined);
            self.enter(Key::Field(key.clone()), kind);
            self.walk(prev, value);
            self.leave();
        }
    }

    fn identity_field(&self, old: &[Value]) -> Option<&str> {
        let first = match old.first()? {
            Value::Object(map) | Value::Map(map) => map,
            _ => return None,
        };
        self.id_fields
            .iter()
            .find(|field| first.contains_key(field.as_str()))
            .map(String::as_str)
    }

    fn walk_array(&mut self, old: &[Value], new: &[Value]) {
        let Some(field) = self.identity_field(old) else {
            self.walk_positional(old, new, 0);
            return;
        };

        let mut by_id: HashMap<String, usize> = HashMap::new();
        for (index, item) in old.iter().enumerate() {
            if let Some(id) = identity_of(item, field) {
                if by_id.contains_key(&id) {
                    warn!(path = %format_path(&self.path), id = %id, "duplicate id in array");
                    continue;
                }
                by_id.insert(id, index);
            }
        }

        let mut matched = vec![false; old.len()];
        let mut pairs = Vec::with_capacity(new.len());
        let mut moves = Vec::new();
        for (to, item) in new.iter().enumerate() {
            let from = identity_of(item, field)
                .and_then(|id| by_id.get(&id).copied())
                .filter(|&from| !matched[from]);
            match from {
                Some(from) => {
                    matched[from] = true;
                    if from != to {
                        moves.push(Move {
                            array_path: self.path.clone(),
                            from,
                            to,
                        });
                    }
                    pairs.push(Some(from));
                }
                None => pairs.push(None),
            }
        }

        if !moves.is_empty() {
            let prev = Value::Array(old.to_vec());
            let value = Value::Array(new.to_vec());
            self.record(&prev, &value, 0, true, false);
        }
        self.out.moves.extend(moves);

        for (to, item) in new.iter().enumerate() {
            let prev = match pairs[to] {
                Some(from) => &old[from],
                None => old.get(to).unwrap_or(&Value::Undefined),
            };
            self.enter(Key::Index(to), PathType::Array);
            self.walk(prev, item);
            self.leave();
        }
        self.walk_positional(old, &[], new.len());
    }

    /// Compare elements index by index, starting at `from`.
    fn walk_positional(&mut self, old: &[Value], new: &[Value], from: usize) {
        let len = old.len().max(new.len());
        for index in from..len {
            let prev = old.get(index).unwrap_or(&Value::Undefined);
            let value = new.get(index).unwrap_or(&Value::Undefined);
            self.enter(Key::Index(index), PathType::Array);
            self.walk(prev, value);
            self.leave();
        }
    }
}

fn identity_of(item: &Value, field: &str) -> Option<String> {
    let map = match item {
        Value::Object(map) | Value::Map(map) => map,
        _ => return None,
    };
    match map.get(field)? {
        Value::String(s) => Some(format!("s:{s}")),
        Value::Number(n) => Some(format!("n:{n}")),
        Value::Bool(b) => Some(format!("b:{b}")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids() -> Vec<String> {
        vec!["id".to_owned(), "_id".to_owned()]
    }

    fn run(prev: serde_json::Value, value: serde_json::Value) -> Diff {
        diff(&Value::from(prev), &Value::from(value), &ids())
    }

    fn paths(diff: &Diff) -> Vec<String> {
        diff.changes.iter().map(|c| format_path(&c.path)).collect()
    }

    #[test]
    fn equal_values_produce_nothing() {
        assert!(run(json!({"a": 1, "b": [1, 2]}), json!({"b": [1, 2], "a": 1})).is_empty());
        assert!(run(json!(5), json!(5)).is_empty());
    }

    #[test]
    fn equal_array_replace_is_reported_at_level_one() {
        let diff = run(json!([1, 2]), json!([1, 2]));
        assert_eq!(diff.changes.len(), 1);
        assert_eq!(diff.changes[0].base_level, 1);
        assert!(diff.changes[0].path.is_empty());
    }

    #[test]
    fn leaf_change_is_reported_at_its_path() {
        let diff = run(json!({"a": {"b": 1}}), json!({"a": {"b": 2}}));

        assert_eq!(paths(&diff), vec!["a.b"]);
        let change = &diff.changes[0];
        assert_eq!(change.base_level, 0);
        assert!(!change.structural);
        assert_eq!(change.path_types, vec![PathType::Object, PathType::Object]);
        assert_eq!(change.prev, Value::from(1));
        assert_eq!(change.value, Value::from(2));
    }

    #[test]
    fn removals_come_before_additions() {
        let diff = run(json!({"a": 1, "b": 2}), json!({"b": 2, "c": 3}));

        assert_eq!(paths(&diff), vec!["a", "c"]);
        assert!(diff.changes.iter().all(|c| c.base_level == -1 && c.structural));
        assert!(diff.changes[0].value.is_undefined());
    }

    #[test]
    fn type_changes_replace_the_node() {
        let diff = run(json!({"a": {"b": 1}}), json!({"a": 7}));

        assert_eq!(paths(&diff), vec!["a"]);
        assert!(diff.changes[0].descend);
        assert!(diff.changes[0].structural);
    }

    #[test]
    fn sets_are_reported_as_one_structural_change() {
        let prev = Value::Set(vec![Value::from(1), Value::from(2)]);
        let value = Value::Set(vec![Value::from(2), Value::from(3)]);
        let diff = diff(&prev, &value, &ids());

        assert_eq!(diff.changes.len(), 1);
        assert!(diff.changes[0].structural);
        assert!(!diff.changes[0].descend);
    }

    #[test]
    fn positional_arrays_compare_index_by_index() {
        let diff = run(json!([1, 2, 3]), json!([1, 5]));

        assert_eq!(paths(&diff), vec!["1", "2"]);
        assert_eq!(diff.changes[0].base_level, 0);
        assert_eq!(diff.changes[1].base_level, -1);
        assert!(diff.moves.is_empty());
    }

    #[test]
    fn identity_swap_produces_moves_and_a_reorder_record() {
        let diff = run(
            json!([{"id": 1}, {"id": 2}, {"id": 3}]),
            json!([{"id": 1}, {"id": 3}, {"id": 2}]),
        );

        assert_eq!(
            diff.moves,
            vec![
                Move { array_path: vec![], from: 2, to: 1 },
                Move { array_path: vec![], from: 1, to: 2 },
            ]
        );
        assert_eq!(diff.changes.len(), 1);
        assert!(diff.changes[0].path.is_empty());
        assert!(diff.changes[0].structural);
        assert_eq!(diff.changes[0].base_level, 0);
    }

    #[test]
    fn moved_elements_diff_against_their_own_previous_value() {
        let diff = run(
            json!([{"id": "a", "n": 1}, {"id": "b", "n": 1}]),
            json!([{"id": "b", "n": 1}, {"id": "a", "n": 2}]),
        );

        let leaf: Vec<_> = diff.changes.iter().filter(|c| !c.path.is_empty()).collect();
        assert_eq!(leaf.len(), 1);
        assert_eq!(format_path(&leaf[0].path), "1.n");
        assert_eq!(leaf[0].prev, Value::from(1));
    }

    #[test]
    fn nested_arrays_report_their_own_path() {
        let diff = run(
            json!({"list": [{"_id": 1}, {"_id": 2}]}),
            json!({"list": [{"_id": 2}, {"_id": 1}]}),
        );

        assert_eq!(diff.moves.len(), 2);
        assert_eq!(diff.moves[0].array_path, vec![Key::Field("list".to_owned())]);
    }
}
