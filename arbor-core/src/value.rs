//! Value Model
//!
//! The state tree holds dynamically typed values. Containers are objects,
//! arrays, map-like and set-like collections; everything else is a leaf.
//!
//! # Equality
//!
//! Equality is structural. Two values are equal when they have the same shape
//! and the same leaves, regardless of key order in objects and maps or element
//! order in sets. `NaN` compares equal to itself so that writing `NaN` twice is
//! idempotent.

use std::fmt;

use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::Error;

/// Shared `Undefined` used when a path does not resolve.
pub(crate) static UNDEFINED: Value = Value::Undefined;

/// Most holes one write may add past the end of an array.
pub const MAX_ARRAY_GAP: usize = 1024;

/// Why a write could not be applied at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PathError {
    /// The value at `path[..depth]` cannot hold children.
    NotAContainer { depth: usize },
    /// `path[depth]` indexes too far past the end of its array.
    IndexTooFar { depth: usize, index: usize },
}

impl PathError {
    fn at(self, depth: usize) -> Self {
        match self {
            PathError::NotAContainer { .. } => PathError::NotAContainer { depth },
            PathError::IndexTooFar { index, .. } => PathError::IndexTooFar { depth, index },
        }
    }

    /// The engine error for a write to `path`.
    pub fn into_error(self, path: &[Key]) -> Error {
        match self {
            PathError::NotAContainer { depth } => Error::NotAContainer {
                path: format_path(&path[..depth]),
            },
            PathError::IndexTooFar { depth, index } => Error::IndexOutOfRange {
                path: format_path(&path[..depth]),
                index,
            },
        }
    }
}

/// A key addressing one child of a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    /// Index into an array.
    Index(usize),
    /// Property of an object or entry of a map.
    Field(String),
}

impl Key {
    /// Interpret the key as an array index.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Key::Index(i) => Some(*i),
            Key::Field(f) => f.parse().ok(),
        }
    }

    /// Interpret the key as an object field name.
    pub fn as_field(&self) -> std::borrow::Cow<'_, str> {
        match self {
            Key::Index(i) => std::borrow::Cow::Owned(i.to_string()),
            Key::Field(f) => std::borrow::Cow::Borrowed(f.as_str()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(i) => write!(f, "{i}"),
            Key::Field(name) => f.write_str(name),
        }
    }
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Key::Index(i)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Field(s.to_owned())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Field(s)
    }
}

/// Render a key path as `a.b.0.c`, or `<root>` for the empty path.
pub fn format_path(path: &[Key]) -> String {
    if path.is_empty() {
        return "<root>".to_owned();
    }
    path.iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

/// The kind of container holding one level of a change path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathType {
    Object,
    Array,
    Map,
}

/// A dynamically typed value stored in the state tree.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// An absent value: a missing key, a removed node, or a value not yet loaded.
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
    /// A map-like collection. Children are addressed by field keys.
    Map(IndexMap<String, Value>),
    /// A set-like collection. Has membership semantics and no children.
    Set(Vec<Value>),
}

impl Value {
    /// Create an empty object.
    pub fn object() -> Self {
        Value::Object(IndexMap::new())
    }

    /// Create an empty array.
    pub fn array() -> Self {
        Value::Array(Vec::new())
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Null and undefined are both "nothing" for container creation.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Whether this value can have addressable children.
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Object(_) | Value::Map(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_f64().filter(|n| n.fract() == 0.0).map(|n| n as i64)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// JavaScript-style truthiness, used by `Runtime::when`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Number of children for containers, zero otherwise.
    pub fn len(&self) -> usize {
        match self {
            Value::Array(items) | Value::Set(items) => items.len(),
            Value::Object(map) | Value::Map(map) => map.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The path type tag of this container, if it is one.
    pub fn path_type(&self) -> Option<PathType> {
        match self {
            Value::Array(_) => Some(PathType::Array),
            Value::Object(_) => Some(PathType::Object),
            Value::Map(_) => Some(PathType::Map),
            _ => None,
        }
    }

    /// Get a direct child.
    pub fn get(&self, key: &Key) -> Option<&Value> {
        match self {
            Value::Array(items) => key.as_index().and_then(|i| items.get(i)),
            Value::Object(map) | Value::Map(map) => map.get(key.as_field().as_ref()),
            _ => None,
        }
    }

    /// Resolve a path, returning `Undefined` when any segment is missing.
    pub fn get_path(&self, path: &[Key]) -> &Value {
        let mut current = self;
        for key in path {
            match current.get(key) {
                Some(next) => current = next,
                None => return &UNDEFINED,
            }
        }
        current
    }

    /// Store `value` under `key`, growing arrays with `Undefined` holes as needed.
    ///
    /// Arrays grow by at most [`MAX_ARRAY_GAP`] holes per write.
    pub(crate) fn insert(&mut self, key: &Key, value: Value) -> Result<(), PathError> {
        match self {
            Value::Array(items) => match key.as_index() {
                Some(i) => {
                    if i.saturating_sub(items.len()) > MAX_ARRAY_GAP {
                        return Err(PathError::IndexTooFar { depth: 0, index: i });
                    }
                    if i >= items.len() {
                        items.resize(i + 1, Value::Undefined);
                    }
                    items[i] = value;
                    Ok(())
                }
                None => Err(PathError::NotAContainer { depth: 0 }),
            },
            Value::Object(map) | Value::Map(map) => {
                map.insert(key.as_field().into_owned(), value);
                Ok(())
            }
            _ => Err(PathError::NotAContainer { depth: 0 }),
        }
    }

    /// Remove `key`. Array elements are spliced out, shifting later elements.
    pub(crate) fn remove(&mut self, key: &Key) -> Option<Value> {
        match self {
            Value::Array(items) => match key.as_index() {
                Some(i) if i < items.len() => Some(items.remove(i)),
                _ => None,
            },
            Value::Object(map) | Value::Map(map) => map.shift_remove(key.as_field().as_ref()),
            _ => None,
        }
    }

    /// Mutable access to a direct child, creating the container for `next`
    /// when the child is null or undefined.
    fn child_container_mut(&mut self, key: &Key, next: &Key) -> Result<&mut Value, PathError> {
        let needs_container = self.get(key).map_or(true, Value::is_nullish);
        if needs_container {
            let fresh = match next {
                Key::Index(_) => Value::array(),
                Key::Field(_) => Value::object(),
            };
            self.insert(key, fresh)?;
        }
        let child = match self {
            Value::Array(items) => key.as_index().and_then(move |i| items.get_mut(i)),
            Value::Object(map) | Value::Map(map) => map.get_mut(key.as_field().as_ref()),
            _ => None,
        };
        child.ok_or(PathError::NotAContainer { depth: 0 })
    }

    /// Write `value` at `path`, creating intermediate containers.
    ///
    /// An `Undefined` value removes the final key.
    pub(crate) fn set_path(&mut self, path: &[Key], value: Value) -> Result<(), PathError> {
        let Some((last, parents)) = path.split_last() else {
            *self = value;
            return Ok(());
        };

        let mut current = self;
        for (depth, key) in parents.iter().enumerate() {
            if current.is_nullish() {
                *current = match key {
                    Key::Index(_) => Value::array(),
                    Key::Field(_) => Value::object(),
                };
            }
            let next = path.get(depth + 1).unwrap_or(last);
            current = current
                .child_container_mut(key, next)
                .map_err(|err| err.at(depth))?;
        }

        if current.is_nullish() {
            if value.is_undefined() {
                return Ok(());
            }
            *current = match last {
                Key::Index(_) => Value::array(),
                Key::Field(_) => Value::object(),
            };
        }

        if value.is_undefined() {
            if current.is_container() {
                current.remove(last);
                return Ok(());
            }
            return Err(PathError::NotAContainer { depth: parents.len() });
        }

        current.insert(last, value).map_err(|err| err.at(parents.len()))
    }
}

fn numbers_equal(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

/// Structural equality between two values.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) => true,
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => numbers_equal(*a, *b),
        (Value::String(a), Value::String(b)) => a == b,

        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| deep_equal(x, y))
        }

        (Value::Object(a), Value::Object(b)) | (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, va)| b.get(key).is_some_and(|vb| deep_equal(va, vb)))
        }

        (Value::Set(a), Value::Set(b)) => {
            a.len() == b.len() && a.iter().all(|x| b.iter().any(|y| deep_equal(x, y)))
        }

        _ => false,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        deep_equal(self, other)
    }
}

// ----------------------------------------------------------------------------
// Conversions
// ----------------------------------------------------------------------------

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            ),
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) | Value::Set(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            Value::Object(map) | Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

macro_rules! impl_from_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(n: $ty) -> Self {
                    Value::Number(n as f64)
                }
            }
        )*
    };
}

impl_from_number!(i32, i64, u32, u64, usize, f32, f64);

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Undefined, Into::into)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Undefined | Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) | Value::Set(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(map) | Value::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_equal_ignores_object_key_order() {
        let a = Value::from(json!({"a": 1, "b": [1, 2]}));
        let b = Value::from(json!({"b": [1, 2], "a": 1}));
        assert_eq!(a, b);

        let c = Value::from(json!({"a": 1, "b": [2, 1]}));
        assert_ne!(a, c);
    }

    #[test]
    fn sets_compare_by_membership() {
        let a = Value::Set(vec![1.into(), 2.into()]);
        let b = Value::Set(vec![2.into(), 1.into()]);
        assert_eq!(a, b);
        assert_ne!(a, Value::Set(vec![1.into()]));
    }

    #[test]
    fn nan_is_equal_to_itself() {
        assert_eq!(Value::Number(f64::NAN), Value::Number(f64::NAN));
    }

    fn k(path: &[&str]) -> Vec<Key> {
        path.iter()
            .map(|seg| match seg.parse::<usize>() {
                Ok(i) => Key::Index(i),
                Err(_) => Key::from(*seg),
            })
            .collect()
    }

    #[test]
    fn get_path_returns_undefined_for_missing_segments() {
        let v = Value::from(json!({"a": {"b": [10, 20]}}));
        assert_eq!(v.get_path(&k(&["a", "b", "1"])), &Value::from(20));
        assert!(v.get_path(&k(&["a", "x"])).is_undefined());
        assert!(v.get_path(&k(&["a", "b", "q"])).is_undefined());
    }

    #[test]
    fn set_path_creates_intermediate_containers() {
        let mut v = Value::Undefined;
        v.set_path(&k(&["a", "1", "b"]), Value::from(true)).unwrap();

        assert_eq!(v.get_path(&k(&["a", "1", "b"])), &Value::Bool(true));
        assert_eq!(v.get_path(&k(&["a"])).len(), 2);
        // The skipped slot is a hole, not null
        assert!(v.get_path(&k(&["a", "0"])).is_undefined());
    }

    #[test]
    fn set_path_refuses_to_write_through_a_primitive() {
        let mut v = Value::from(json!({"a": 5}));
        assert_eq!(
            v.set_path(&k(&["a", "b"]), Value::from(1)),
            Err(PathError::NotAContainer { depth: 1 })
        );
    }

    #[test]
    fn set_path_refuses_indices_far_past_the_end() {
        let mut v = Value::from(json!({"list": [1]}));

        let far = vec![Key::from("list"), Key::Index(usize::MAX)];
        assert_eq!(
            v.set_path(&far, Value::from(2)),
            Err(PathError::IndexTooFar { depth: 1, index: usize::MAX })
        );
        let huge = vec![Key::from("list"), Key::Index(1_000_000_000_000), Key::from("x")];
        assert!(v.set_path(&huge, Value::from(2)).is_err());
        assert_eq!(v, Value::from(json!({"list": [1]})));

        // Small gaps are still padded with holes
        v.set_path(&k(&["list", "3"]), Value::from(4)).unwrap();
        assert_eq!(v.get_path(&k(&["list"])).len(), 4);
    }

    #[test]
    fn removing_an_array_element_splices() {
        let mut v = Value::from(json!([1, 2, 3]));
        v.set_path(&k(&["1"]), Value::Undefined).unwrap();
        assert_eq!(v, Value::from(json!([1, 3])));
    }
}
