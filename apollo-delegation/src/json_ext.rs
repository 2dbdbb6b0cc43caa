//! Paths into documents and response data, and helpers to walk JSON values along them.

use std::fmt;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
pub use serde_json_bytes::Value;

/// A JSON object.
pub type Object = Map<ByteString, Value>;

/// One segment of a [`Path`].
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum PathElement {
    /// A list index.
    Index(usize),

    /// A field response key (the alias when there is one, otherwise the field name).
    Key(String),
}

impl PathElement {
    pub fn as_key(&self) -> Option<&str> {
        match self {
            PathElement::Key(key) => Some(key.as_str()),
            PathElement::Index(_) => None,
        }
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Index(index) => write!(f, "{index}"),
            PathElement::Key(key) => write!(f, "{key}"),
        }
    }
}

impl From<&str> for PathElement {
    fn from(key: &str) -> Self {
        PathElement::Key(key.to_string())
    }
}

impl From<String> for PathElement {
    fn from(key: String) -> Self {
        PathElement::Key(key)
    }
}

impl From<usize> for PathElement {
    fn from(index: usize) -> Self {
        PathElement::Index(index)
    }
}

/// A path into a selection set or into response data.
///
/// The same type locates a field in a document (only [`PathElement::Key`] segments are
/// meaningful there, indexes are skipped) and a value in a response, where it uses the
/// `path` format of GraphQL errors: `["user", "friends", 0, "name"]`.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Path {
        Path(Vec::new())
    }

    pub fn from_slice<T: Into<PathElement> + Clone>(elements: &[T]) -> Self {
        Path(elements.iter().cloned().map(Into::into).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn push(&mut self, element: impl Into<PathElement>) {
        self.0.push(element.into())
    }

    pub fn last(&self) -> Option<&PathElement> {
        self.0.last()
    }

    /// The last segment, when it is a field key.
    pub fn last_key(&self) -> Option<&str> {
        self.last().and_then(PathElement::as_key)
    }

    /// The path without its last segment, or `None` for the empty path.
    pub fn parent(&self) -> Option<Path> {
        if self.is_empty() {
            None
        } else {
            Some(Path(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn join(&self, other: impl AsRef<Path>) -> Self {
        let other = other.as_ref();
        let mut elements = Vec::with_capacity(self.len() + other.len());
        elements.extend_from_slice(&self.0);
        elements.extend_from_slice(&other.0);
        Path(elements)
    }

    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// The segments following `prefix`, or `None` if this path is not under `prefix`.
    pub fn strip_prefix(&self, prefix: &Path) -> Option<Path> {
        self.0
            .strip_prefix(prefix.0.as_slice())
            .map(|rest| Path(rest.to_vec()))
    }

    /// Match `prefix` against the start of this path, skipping the list indexes of this path
    /// that `prefix` does not mention.
    ///
    /// Returns the matched part, indexes included, and the rest. `["users", 1, "name", "x"]`
    /// matched against `["users", "name"]` gives `["users", 1, "name"]` and `["x"]`.
    pub fn match_prefix(&self, prefix: &Path) -> Option<(Path, Path)> {
        let mut matched = Vec::with_capacity(prefix.len());
        let mut remaining = self.0.as_slice();
        for expected in prefix.iter() {
            loop {
                let (element, rest) = remaining.split_first()?;
                remaining = rest;
                matched.push(element.clone());
                match (expected, element) {
                    (PathElement::Key(_), PathElement::Index(_)) => continue,
                    _ if expected == element => break,
                    _ => return None,
                }
            }
        }
        Some((Path(matched), Path(remaining.to_vec())))
    }

    /// Field keys only, in order. List indexes do not exist in documents.
    pub(crate) fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter_map(PathElement::as_key)
    }
}

impl AsRef<Path> for Path {
    fn as_ref(&self) -> &Path {
        self
    }
}

impl<T> From<Vec<T>> for Path
where
    T: Into<PathElement>,
{
    fn from(elements: Vec<T>) -> Self {
        Path(elements.into_iter().map(Into::into).collect())
    }
}

impl FromIterator<PathElement> for Path {
    fn from_iter<I: IntoIterator<Item = PathElement>>(iter: I) -> Self {
        Path(iter.into_iter().collect())
    }
}

impl IntoIterator for Path {
    type Item = PathElement;
    type IntoIter = std::vec::IntoIter<PathElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in self.iter() {
            write!(f, "/{element}")?;
        }
        Ok(())
    }
}

/// Walking helpers on response values.
pub trait ValueExt {
    /// Get the value at `path`, following indexes literally.
    fn get_path(&self, path: &Path) -> Option<&Value>;

    /// Call `f` on every value selected by `path`.
    ///
    /// Lists met before the end of the path are traversed item by item, so `["users", "name"]`
    /// selects the `name` of every user. A `null` (or any other leaf) met before the end of the
    /// path selects nothing. When the last key is missing from an object it is inserted as
    /// `null` before calling `f`.
    fn select_values_and_paths_mut<F, E>(&mut self, path: &Path, f: F) -> Result<(), E>
    where
        F: FnMut(&Path, &mut Value) -> Result<(), E>;
}

impl ValueExt for Value {
    fn get_path(&self, path: &Path) -> Option<&Value> {
        path.iter().try_fold(self, |current, element| match element {
            PathElement::Key(key) => current.as_object()?.get(key.as_str()),
            PathElement::Index(index) => current.as_array()?.get(*index),
        })
    }

    fn select_values_and_paths_mut<F, E>(&mut self, path: &Path, mut f: F) -> Result<(), E>
    where
        F: FnMut(&Path, &mut Value) -> Result<(), E>,
    {
        let mut current_path = Path::empty();
        select_mut(self, &path.0, &mut current_path, &mut f)
    }
}

fn select_mut<F, E>(
    value: &mut Value,
    path: &[PathElement],
    current_path: &mut Path,
    f: &mut F,
) -> Result<(), E>
where
    F: FnMut(&Path, &mut Value) -> Result<(), E>,
{
    let Some((head, rest)) = path.split_first() else {
        return f(current_path, value);
    };

    match (head, value) {
        (PathElement::Index(index), Value::Array(items)) => {
            if let Some(item) = items.get_mut(*index) {
                current_path.push(*index);
                let result = select_mut(item, rest, current_path, f);
                current_path.0.pop();
                result?;
            }
            Ok(())
        }
        (PathElement::Key(_), Value::Array(items)) => {
            for (index, item) in items.iter_mut().enumerate() {
                current_path.push(index);
                let result = select_mut(item, path, current_path, f);
                current_path.0.pop();
                result?;
            }
            Ok(())
        }
        (PathElement::Key(key), Value::Object(object)) => {
            let child = if rest.is_empty() {
                Some(object.entry(key.as_str()).or_insert(Value::Null))
            } else {
                object.get_mut(key.as_str())
            };
            if let Some(child) = child {
                current_path.push(key.as_str());
                let result = select_mut(child, rest, current_path, f);
                current_path.0.pop();
                result?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
