//! The spanned document tree that every recipe and settings format parses
//! into before record binding.

use indexmap::IndexMap;
use miette::SourceSpan;

use super::error::{BindError, BindResult};

/// A node of a parsed document: a mapping, a sequence or a scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Mapping(Mapping),
    Sequence(Sequence),
    Scalar(Scalar),
}

/// A key/value mapping with declaration order preserved.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    entries: IndexMap<String, Entry>,
    span: SourceSpan,
}

impl Default for Mapping {
    fn default() -> Self {
        Self {
            entries: IndexMap::default(),
            span: SourceSpan::new(0.into(), 0),
        }
    }
}

/// A single mapping entry, keeping the span of its key for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key_span: SourceSpan,
    pub value: Node,
}

/// An ordered sequence of nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    items: Vec<Node>,
    span: SourceSpan,
}

impl Default for Sequence {
    fn default() -> Self {
        Self {
            items: Vec::default(),
            span: SourceSpan::new(0.into(), 0),
        }
    }
}

/// A scalar value, stored in its string form together with a tag describing
/// how the source spelled it (so `"1"` and `1` can be told apart where it
/// matters).
#[derive(Debug, Clone, PartialEq)]
pub struct Scalar {
    value: String,
    style: ScalarStyle,
    span: SourceSpan,
}

/// How a scalar was written in the source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarStyle {
    /// A quoted string
    String,
    /// An unquoted number
    Number,
    /// `true` / `false`
    Bool,
    /// An explicit null
    Null,
}

impl Node {
    pub fn span(&self) -> SourceSpan {
        match self {
            Node::Mapping(m) => m.span,
            Node::Sequence(s) => s.span,
            Node::Scalar(s) => s.span,
        }
    }

    /// A short name for the node's shape, used in type-mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Mapping(_) => "mapping",
            Node::Sequence(_) => "sequence",
            Node::Scalar(s) => match s.style {
                ScalarStyle::Null => "null",
                _ => "scalar",
            },
        }
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Node::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&Sequence> {
        match self {
            Node::Sequence(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Node::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Like [`Node::as_mapping`] but producing a bind error on mismatch.
    pub fn expect_mapping(&self) -> BindResult<&Mapping> {
        self.as_mapping()
            .ok_or_else(|| BindError::type_mismatch("mapping", self.kind(), self.span()))
    }

    pub fn expect_sequence(&self) -> BindResult<&Sequence> {
        self.as_sequence()
            .ok_or_else(|| BindError::type_mismatch("sequence", self.kind(), self.span()))
    }

    pub fn expect_scalar(&self) -> BindResult<&Scalar> {
        self.as_scalar()
            .ok_or_else(|| BindError::type_mismatch("scalar", self.kind(), self.span()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Scalar(s) if s.style == ScalarStyle::Null)
    }
}

impl Mapping {
    pub fn new(span: SourceSpan) -> Self {
        Self {
            entries: IndexMap::new(),
            span,
        }
    }

    /// Insert an entry, returning the previous value if the key repeats.
    pub fn insert(&mut self, key: String, key_span: SourceSpan, value: Node) -> Option<Entry> {
        self.entries.insert(key, Entry { key_span, value })
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Node> {
        self.entries.get_mut(key).map(|e| &mut e.value)
    }

    pub fn entry(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn span(&self) -> SourceSpan {
        self.span
    }

    pub(crate) fn set_span(&mut self, span: SourceSpan) {
        self.span = span;
    }
}

impl Sequence {
    pub fn new(items: Vec<Node>, span: SourceSpan) -> Self {
        Self { items, span }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Node> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn span(&self) -> SourceSpan {
        self.span
    }
}

impl Scalar {
    pub fn new(value: impl Into<String>, style: ScalarStyle, span: SourceSpan) -> Self {
        Self {
            value: value.into(),
            style,
            span,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn style(&self) -> ScalarStyle {
        self.style
    }

    pub fn span(&self) -> SourceSpan {
        self.span
    }

    /// Parse the scalar as a boolean. Only `true`/`false` are accepted.
    pub fn to_bool(&self) -> BindResult<bool> {
        match self.value.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(BindError::type_mismatch("boolean", "scalar", self.span)),
        }
    }

    /// Parse the scalar as a signed integer.
    pub fn to_i64(&self) -> BindResult<i64> {
        self.value
            .parse()
            .map_err(|_| BindError::type_mismatch("integer", "scalar", self.span))
    }

    /// Parse the scalar as an unsigned integer.
    pub fn to_u64(&self) -> BindResult<u64> {
        self.value
            .parse()
            .map_err(|_| BindError::type_mismatch("integer", "scalar", self.span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> SourceSpan {
        SourceSpan::from(0..1)
    }

    #[test]
    fn mapping_preserves_declaration_order() {
        let mut m = Mapping::new(span());
        for key in ["zeta", "alpha", "mid"] {
            m.insert(
                key.to_string(),
                span(),
                Node::Scalar(Scalar::new("1", ScalarStyle::Number, span())),
            );
        }
        let keys: Vec<_> = m.keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn scalar_conversions() {
        let s = Scalar::new("true", ScalarStyle::Bool, span());
        assert!(s.to_bool().unwrap());
        let s = Scalar::new("-17", ScalarStyle::Number, span());
        assert_eq!(s.to_i64().unwrap(), -17);
        assert!(s.to_u64().is_err());
        let s = Scalar::new("yes", ScalarStyle::String, span());
        assert!(s.to_bool().is_err());
    }

    #[test]
    fn expect_reports_actual_kind() {
        let node = Node::Sequence(Sequence::new(vec![], span()));
        let err = node.expect_mapping().unwrap_err();
        assert!(err.to_string().contains("expected mapping"));
    }
}
