use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::value::Json;

// ————————————————————————————————————————————————————————————————————————————
// PATHS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Position inside a (possibly nested) input, rendered as `a.b[2].c`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Path(Vec<Segment>);

impl Path {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(Segment::Key(key.into()));
        Path(segments)
    }

    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(Segment::Index(index));
        Path(segments)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                Segment::Key(k) if i == 0 => write!(f, "{k}")?,
                Segment::Key(k) => write!(f, ".{k}")?,
                Segment::Index(ix) => write!(f, "[{ix}]")?,
            }
        }
        Ok(())
    }
}

// ————————————————————————————————————————————————————————————————————————————
// REQUEST-TIME ERRORS
// ————————————————————————————————————————————————————————————————————————————

/// One decode failure. Serialized as `{"path", "error", "value"}`; this shape is
/// what outer layers render as a 400 body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEntry {
    pub path: String,
    pub error: String,
    pub value: Json,
}

impl ErrorEntry {
    pub fn new(path: &Path, error: impl Into<String>, value: Json) -> Self {
        Self { path: path.to_string(), error: error.into(), value }
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{} (got {})", self.error, self.value)
        } else {
            write!(f, "{}: {} (got {})", self.path, self.error, self.value)
        }
    }
}

/// An invalid retrieval specification. Validation fails fast, so there is
/// only ever one.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}", render_retrieve_error(.path, .message))]
pub struct RetrieveError {
    pub path: String,
    pub message: String,
    pub value: Json,
}

fn render_retrieve_error(path: &str, message: &str) -> String {
    if path.is_empty() { message.to_string() } else { format!("{path}: {message}") }
}

impl RetrieveError {
    pub fn new(path: &Path, message: impl Into<String>, value: Json) -> Self {
        Self { path: path.to_string(), message: message.into(), value }
    }
}

impl From<RetrieveError> for ErrorEntry {
    fn from(e: RetrieveError) -> Self {
        ErrorEntry { path: e.path, error: e.message, value: e.value }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// PROGRAMMER ERRORS
// ————————————————————————————————————————————————————————————————————————————

/// A node definition that can never be satisfied or is otherwise malformed.
/// Raised while building a registry; callers should refuse to start.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DefinitionError {
    #[error("type `{0}` is referenced but never defined")]
    Undefined(String),
    #[error("type name `{0}` is declared twice")]
    DuplicateName(String),
    #[error("{node}: contradictory bounds: {message}")]
    Bounds { node: String, message: String },
    #[error("{node}: invalid pattern `{pattern}`: {message}")]
    Pattern { node: String, pattern: String, message: String },
    #[error("{node}: union has no variants")]
    EmptyUnion { node: String },
    #[error("{node}: variants `{first}` and `{second}` decode to the same value and cannot be told apart when encoding")]
    AmbiguousUnion { node: String, first: String, second: String },
    #[error("{node}: enum has no members")]
    EmptyEnum { node: String },
    #[error("{node}: custom kind `{kind}` is not registered")]
    UnknownCustomKind { node: String, kind: String },
    #[error("{node}: capability references undeclared field `{field}`")]
    UnknownCapabilityField { node: String, field: String },
    #[error("{node}: relation field `{field}` must point at an entity")]
    RelationTarget { node: String, field: String },
    #[error("{node}: reference chain never reaches a concrete node")]
    RefCycle { node: String },
    #[error("{node}: {message}")]
    Options { node: String, message: String },
}

/// `encode` was handed a value that does not conform to the node.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("{path}: {expected} expected, got {actual}")]
    Mismatch { path: String, expected: String, actual: String },
    #[error("{path}: required field missing")]
    MissingField { path: String },
    #[error("{path}: value matches no union variant")]
    NoVariant { path: String },
    #[error("{path}: {message}")]
    Custom { path: String, message: String },
    #[error("value contains fields outside of the promised selection")]
    Projection,
    #[error("{path}: maximum depth exceeded")]
    Depth { path: String },
}

/// Failure to load a definition file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("at JSON path {path} → {message}")]
    Syntax { path: String, message: String },
    #[error("{path}: unknown type `{name}`")]
    UnknownType { path: String, name: String },
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error("function `{function}`: {source}")]
    Function { function: String, source: RetrieveError },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn paths_render_dot_bracket() {
        let p = Path::root().key("author").key("posts").index(2).key("title");
        assert_eq!(p.to_string(), "author.posts[2].title");
        assert_eq!(Path::root().index(2).to_string(), "[2]");
        assert_eq!(Path::root().to_string(), "");
    }

    #[test]
    fn entry_serializes_as_triple() {
        let e = ErrorEntry::new(&Path::root().key("age"), "number expected", json!("30"));
        assert_eq!(
            serde_json::to_value(&e).unwrap(),
            json!({"path": "age", "error": "number expected", "value": "30"})
        );
    }
}
