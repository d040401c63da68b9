//! Key paths into structured document data
//!
//! A [`Path`] is an ordered, non-empty list of segments. Traversal never
//! overloads "missing" with "null": [`get`] reports whether the value was
//! found, stored as null, absent under an existing parent, or unreachable
//! because an ancestor does not exist.

use std::fmt;
use std::str::FromStr;
use serde_json::Value;
use thiserror::Error;
use crate::core::error::Error;

/// One step of a [`Path`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Mapping key
    Key(String),
    /// Sequence index
    Index(usize),
}

/// Ordered, non-empty sequence of segments locating a value in a document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path(Vec<PathSegment>);

/// Result of resolving a path against a document
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<'a> {
    /// A non-null value is stored at the path
    Found(&'a Value),
    /// The path holds an explicit null
    Null,
    /// The parent exists but holds nothing under the final segment
    Absent,
    /// Some ancestor of the final segment does not exist
    ParentMissing,
}

/// Parent node of a path's final segment
#[derive(Debug)]
pub struct ParentLocation<'a, N> {
    /// Container holding the final segment, if the ancestor chain exists
    pub parent: Option<N>,
    /// Final segment of the path
    pub final_key: &'a PathSegment,
}

/// Failures of [`set`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Some ancestor of the final segment does not exist
    #[error("parent does not exist")]
    ParentMissing,
    /// A non-numeric key was used on a sequence
    #[error("segment '{0}' cannot address a sequence")]
    NotAddressable(String),
    /// Index beyond the append position of a sequence
    #[error("index {index} is past the end of a sequence of length {len}")]
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Sequence length at the time of the write
        len: usize,
    },
}

impl Path {
    /// Build a path from segments; empty paths are rejected
    pub fn new(segments: Vec<PathSegment>) -> Result<Self, Error> {
        if segments.is_empty() {
            return Err(Error::invalid_path("path must have at least one segment"));
        }
        Ok(Path(segments))
    }

    /// Single-segment path naming a top-level key
    pub fn key(key: impl Into<String>) -> Self {
        Path(vec![PathSegment::Key(key.into())])
    }

    /// Path made only of mapping keys
    pub fn from_keys<I, S>(keys: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(keys.into_iter().map(|k| PathSegment::Key(k.into())).collect())
    }

    /// Extend this path by one segment
    pub fn child(&self, segment: PathSegment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Path(segments)
    }

    /// All segments in order
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Segments leading to the parent of the final segment
    pub fn ancestors(&self) -> &[PathSegment] {
        &self.0[..self.0.len() - 1]
    }

    /// Final segment
    pub fn last(&self) -> &PathSegment {
        // Construction guarantees at least one segment
        &self.0[self.0.len() - 1]
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the path has no segments; never true for a constructed path
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(i) => write!(f, "[{}]", i),
            PathSegment::Key(k) if is_plain_key(k) => write!(f, "{}", k),
            PathSegment::Key(k) => write!(f, "[{:?}]", k),
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 && matches!(segment, PathSegment::Key(k) if is_plain_key(k)) {
                write!(f, ".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

fn is_plain_key(key: &str) -> bool {
    !key.is_empty() && !key.contains(['.', '[', ']', '"'])
}

/// Parses dotted notation: `a.b[0].c`, with `["odd.key"]` for keys that
/// contain separators.
impl FromStr for Path {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segments = Vec::new();
        let mut chars = s.chars();
        let mut current = String::new();
        let mut after_bracket = false;

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if current.is_empty() && !after_bracket {
                        return Err(Error::invalid_path(format!("empty segment in '{}'", s)));
                    }
                    if !current.is_empty() {
                        segments.push(PathSegment::Key(std::mem::take(&mut current)));
                    }
                    after_bracket = false;
                }
                '[' => {
                    if !current.is_empty() {
                        segments.push(PathSegment::Key(std::mem::take(&mut current)));
                    }
                    let mut inner = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == ']' {
                            closed = true;
                            break;
                        }
                        inner.push(c);
                    }
                    if !closed {
                        return Err(Error::invalid_path(format!("unclosed '[' in '{}'", s)));
                    }
                    segments.push(parse_bracket(&inner, s)?);
                    after_bracket = true;
                }
                ']' => return Err(Error::invalid_path(format!("unexpected ']' in '{}'", s))),
                _ => {
                    current.push(c);
                    after_bracket = false;
                }
            }
        }

        if !current.is_empty() {
            segments.push(PathSegment::Key(current));
        } else if s.ends_with('.') {
            return Err(Error::invalid_path(format!("trailing '.' in '{}'", s)));
        }

        Path::new(segments)
    }
}

fn parse_bracket(inner: &str, raw: &str) -> Result<PathSegment, Error> {
    let inner = inner.trim();
    if let Some(quoted) = inner.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')) {
        return Ok(PathSegment::Key(quoted.to_string()));
    }
    inner
        .parse::<usize>()
        .map(PathSegment::Index)
        .map_err(|_| Error::invalid_path(format!("bad index '{}' in '{}'", inner, raw)))
}

impl TryFrom<&str> for Path {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Step from a container into one of its children.
/// `Err(())` means `node` cannot hold children at all.
fn child<'a>(node: &'a Value, segment: &PathSegment) -> Result<Option<&'a Value>, ()> {
    match (node, segment) {
        (Value::Object(map), PathSegment::Key(k)) => Ok(map.get(k)),
        (Value::Object(map), PathSegment::Index(i)) => Ok(map.get(&i.to_string())),
        (Value::Array(items), PathSegment::Index(i)) => Ok(items.get(*i)),
        (Value::Array(items), PathSegment::Key(k)) => Ok(k.parse::<usize>().ok().and_then(|i| items.get(i))),
        _ => Err(()),
    }
}

fn child_mut<'a>(node: &'a mut Value, segment: &PathSegment) -> Option<&'a mut Value> {
    match (node, segment) {
        (Value::Object(map), PathSegment::Key(k)) => map.get_mut(k),
        (Value::Object(map), PathSegment::Index(i)) => map.get_mut(&i.to_string()),
        (Value::Array(items), PathSegment::Index(i)) => items.get_mut(*i),
        (Value::Array(items), PathSegment::Key(k)) => {
            k.parse::<usize>().ok().and_then(move |i| items.get_mut(i))
        }
        _ => None,
    }
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

/// Find the container holding the final segment of `path`
pub fn locate_parent<'a, 'p>(data: &'a Value, path: &'p Path) -> ParentLocation<'p, &'a Value> {
    let mut node = Some(data);
    for segment in path.ancestors() {
        node = node.and_then(|n| child(n, segment).ok().flatten());
    }
    ParentLocation {
        parent: node.filter(|n| is_container(n)),
        final_key: path.last(),
    }
}

/// Mutable variant of [`locate_parent`]
pub fn locate_parent_mut<'a, 'p>(data: &'a mut Value, path: &'p Path) -> ParentLocation<'p, &'a mut Value> {
    let mut node = Some(data);
    for segment in path.ancestors() {
        node = node.and_then(|n| child_mut(n, segment));
    }
    ParentLocation {
        parent: node.filter(|n| is_container(n)),
        final_key: path.last(),
    }
}

impl<N> ParentLocation<'_, N> {
    /// Whether every ancestor of the final segment exists
    pub fn parent_exists(&self) -> bool {
        self.parent.is_some()
    }
}

/// Resolve `path` inside `data`
pub fn get<'a>(data: &'a Value, path: &Path) -> Lookup<'a> {
    let location = locate_parent(data, path);
    let Some(parent) = location.parent else {
        return Lookup::ParentMissing;
    };
    match child(parent, location.final_key) {
        Ok(Some(Value::Null)) => Lookup::Null,
        Ok(Some(value)) => Lookup::Found(value),
        Ok(None) | Err(()) => Lookup::Absent,
    }
}

/// Value at `path`, with null standing in for absent or unreachable values
pub fn get_or_null(data: &Value, path: &Path) -> Value {
    match get(data, path) {
        Lookup::Found(value) => value.clone(),
        Lookup::Null | Lookup::Absent | Lookup::ParentMissing => Value::Null,
    }
}

/// Write `value` at `path`, returning the value it replaced.
///
/// The final segment need not exist yet but its parent must. Sequences
/// replace in-range indices and append at `index == len`; anything further
/// is rejected and leaves the sequence untouched.
pub fn set(data: &mut Value, path: &Path, value: Value) -> Result<Option<Value>, PathError> {
    let location = locate_parent_mut(data, path);
    let Some(parent) = location.parent else {
        return Err(PathError::ParentMissing);
    };

    match (parent, location.final_key) {
        (Value::Object(map), PathSegment::Key(k)) => Ok(map.insert(k.clone(), value)),
        (Value::Object(map), PathSegment::Index(i)) => Ok(map.insert(i.to_string(), value)),
        (Value::Array(items), segment) => {
            let index = match segment {
                PathSegment::Index(i) => *i,
                PathSegment::Key(k) => k
                    .parse::<usize>()
                    .map_err(|_| PathError::NotAddressable(k.clone()))?,
            };
            let len = items.len();
            match index.cmp(&len) {
                std::cmp::Ordering::Less => Ok(Some(std::mem::replace(&mut items[index], value))),
                std::cmp::Ordering::Equal => {
                    items.push(value);
                    Ok(None)
                }
                std::cmp::Ordering::Greater => Err(PathError::IndexOutOfRange { index, len }),
            }
        }
        // locate_parent_mut only yields containers
        (_, _) => Err(PathError::ParentMissing),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn p(s: &str) -> Path {
        s.parse().unwrap()
    }

    #[test]
    fn parse_dotted_and_indexed() {
        let path = p("a.b[2].c");
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Key("a".into()),
                PathSegment::Key("b".into()),
                PathSegment::Index(2),
                PathSegment::Key("c".into()),
            ]
        );
        assert_eq!(path.to_string(), "a.b[2].c");
    }

    #[test]
    fn parse_quoted_key() {
        let path = p(r#"tags["x.y"]"#);
        assert_eq!(path.last(), &PathSegment::Key("x.y".into()));
        assert_eq!(path.to_string(), r#"tags["x.y"]"#);
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!("".parse::<Path>().is_err());
        assert!("a..b".parse::<Path>().is_err());
        assert!("a.".parse::<Path>().is_err());
        assert!("a[1".parse::<Path>().is_err());
        assert!("a[x]".parse::<Path>().is_err());
        assert!("a]".parse::<Path>().is_err());
        assert!(Path::new(Vec::new()).is_err());
    }

    #[test]
    fn get_distinguishes_all_outcomes() {
        let data = json!({"a": {"b": 1, "n": null}, "list": [10, 20]});
        assert_eq!(get(&data, &p("a.b")), Lookup::Found(&json!(1)));
        assert_eq!(get(&data, &p("a.n")), Lookup::Null);
        assert_eq!(get(&data, &p("a.zzz")), Lookup::Absent);
        assert_eq!(get(&data, &p("x.y")), Lookup::ParentMissing);
        assert_eq!(get(&data, &p("a.b.c")), Lookup::ParentMissing);
        assert_eq!(get(&data, &p("list[1]")), Lookup::Found(&json!(20)));
        assert_eq!(get(&data, &p("list[5]")), Lookup::Absent);
        assert_eq!(get(&data, &p("a.n.deeper")), Lookup::ParentMissing);
    }

    #[test]
    fn locate_parent_reports_existence() {
        let data = json!({"a": {"b": 1}});
        let path = p("a.c");
        let location = locate_parent(&data, &path);
        assert!(location.parent_exists());
        assert_eq!(location.final_key, &PathSegment::Key("c".into()));

        let path = p("q.c");
        assert!(!locate_parent(&data, &path).parent_exists());
    }

    #[test]
    fn set_requires_parent() {
        let mut data = json!({"a": {"b": 1}});
        assert_eq!(set(&mut data, &p("a.b"), json!(2)), Ok(Some(json!(1))));
        assert_eq!(set(&mut data, &p("a.new"), json!("x")), Ok(None));
        assert_eq!(set(&mut data, &p("missing.b"), json!(3)), Err(PathError::ParentMissing));
        assert_eq!(data, json!({"a": {"b": 2, "new": "x"}}));
    }

    #[test]
    fn set_rejects_index_past_append_position() {
        let mut data = json!({"list": [1]});
        assert_eq!(
            set(&mut data, &p("list[3]"), json!(5)),
            Err(PathError::IndexOutOfRange { index: 3, len: 1 })
        );
        let huge = Path::key("list").child(PathSegment::Index(usize::MAX));
        assert_eq!(
            set(&mut data, &huge, json!(5)),
            Err(PathError::IndexOutOfRange { index: usize::MAX, len: 1 })
        );
        assert_eq!(data, json!({"list": [1]}));
    }

    #[test]
    fn set_on_sequences() {
        let mut data = json!({"list": [1, 2]});
        set(&mut data, &p("list[0]"), json!(9)).unwrap();
        set(&mut data, &p("list[2]"), json!(3)).unwrap();
        assert_eq!(data, json!({"list": [9, 2, 3]}));
        assert_eq!(
            set(&mut data, &p("list.name"), json!(0)),
            Err(PathError::NotAddressable("name".into()))
        );
    }

    #[test]
    fn get_or_null_flattens() {
        let data = json!({"a": 1});
        assert_eq!(get_or_null(&data, &p("a")), json!(1));
        assert_eq!(get_or_null(&data, &p("b")), Value::Null);
        assert_eq!(get_or_null(&data, &p("b.c")), Value::Null);
    }

    fn nest(keys: &[String], leaf: Value) -> Value {
        keys.iter().rev().fold(leaf, |acc, key| {
            let mut map = serde_json::Map::new();
            map.insert(key.clone(), acc);
            Value::Object(map)
        })
    }

    proptest! {
        #[test]
        fn nested_value_is_found(keys in prop::collection::vec("[a-z]{1,6}", 1..5), leaf in any::<i64>()) {
            let expected = json!(leaf);
            let data = nest(&keys, expected.clone());
            let path = Path::from_keys(keys.clone()).unwrap();
            prop_assert_eq!(get(&data, &path), Lookup::Found(&expected));
        }

        #[test]
        fn set_below_missing_parent_leaves_data_alone(keys in prop::collection::vec("[a-z]{1,6}", 2..5)) {
            let mut data = json!({"other": true});
            let before = data.clone();
            let path = Path::from_keys(keys).unwrap();
            prop_assert_eq!(set(&mut data, &path, json!(1)), Err(PathError::ParentMissing));
            prop_assert_eq!(data, before);
        }

        #[test]
        fn set_then_get(keys in prop::collection::vec("[a-z]{1,6}", 1..5), leaf in "[a-z]{0,8}") {
            let mut data = nest(&keys[..keys.len() - 1], json!({}));
            let path = Path::from_keys(keys).unwrap();
            let expected = json!(leaf);
            set(&mut data, &path, expected.clone()).unwrap();
            prop_assert_eq!(get(&data, &path), Lookup::Found(&expected));
        }
    }
}
