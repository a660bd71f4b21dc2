//! Binding of document nodes to typed records.
//!
//! Records implement [`BindRecord`] and pull their fields out of a
//! [`Binder`], which tracks which keys were consumed so that strict mode can
//! reject the rest with their exact location. Alias-this composition is a
//! [`Binder::flatten`] call: the flattened record binds from the same
//! mapping and shares the consumed-key bookkeeping, so a clash between a
//! parent field and a flattened field surfaces as a duplicate key.

use std::collections::HashSet;

use indexmap::IndexMap;
use miette::SourceSpan;
use tracing::warn;

use super::{
    error::{line_column, BindError, BindResult},
    node::{Mapping, Node},
    SetInfo,
};

/// How unmatched document keys are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrictMode {
    /// Reject unknown keys with an error
    #[default]
    Error,
    /// Log a warning and continue
    Warn,
    /// Silently accept extras
    Ignore,
}

/// Context shared by a whole binding pass.
#[derive(Debug, Clone)]
pub struct BindContext {
    pub strict: StrictMode,
    /// Displayed in warn-mode messages, usually the file path
    pub source_name: String,
    /// The document text, used to derive line/column in warn mode
    pub source_text: String,
}

impl BindContext {
    pub fn new(strict: StrictMode, source_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            strict,
            source_name: source_name.into(),
            source_text: text.into(),
        }
    }
}

impl Default for BindContext {
    fn default() -> Self {
        Self {
            strict: StrictMode::Error,
            source_name: "<memory>".to_string(),
            source_text: String::new(),
        }
    }
}

/// A type constructible from a document node.
pub trait FromDocument: Sized {
    fn from_document(node: &Node, ctx: &BindContext) -> BindResult<Self>;
}

/// A record bound field-by-field through a [`Binder`].
///
/// Implementations pull each field with the binder method matching the
/// field's schema (required, optional, pattern, duration, …). The optional
/// [`BindRecord::validate`] hook runs after binding; a returned message is
/// wrapped into a construction failure carrying the record's span.
pub trait BindRecord: Sized {
    fn bind(binder: &mut Binder<'_>) -> BindResult<Self>;

    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Bind a full record from a node: shape check, field binding, strict-mode
/// unknown-key check, then validation.
pub fn bind_record<T: BindRecord>(node: &Node, ctx: &BindContext) -> BindResult<T> {
    let mapping = node.expect_mapping()?;
    let mut binder = Binder::new(mapping, ctx);
    let value = T::bind(&mut binder)?;
    binder.finish()?;
    if let Err(message) = value.validate() {
        let name = std::any::type_name::<T>().rsplit("::").next().unwrap_or("record");
        return Err(BindError::construction(name, message, node.span()));
    }
    Ok(value)
}

/// Implements [`FromDocument`] for record types in terms of [`bind_record`].
macro_rules! impl_from_document_record {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::document::FromDocument for $ty {
            fn from_document(
                node: &$crate::document::Node,
                ctx: &$crate::document::BindContext,
            ) -> $crate::document::BindResult<Self> {
                $crate::document::bind_record(node, ctx)
            }
        }
    )+};
}
pub(crate) use impl_from_document_record;

/// Implements [`FromDocument`] for scalar types through their `FromStr`.
macro_rules! impl_from_document_scalar {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::document::FromDocument for $ty {
            fn from_document(
                node: &$crate::document::Node,
                _ctx: &$crate::document::BindContext,
            ) -> $crate::document::BindResult<Self> {
                let scalar = node.expect_scalar()?;
                scalar.as_str().parse::<$ty>().map_err(|err| {
                    $crate::document::BindError::construction(
                        stringify!($ty),
                        err.to_string(),
                        scalar.span(),
                    )
                })
            }
        }
    )+};
}
pub(crate) use impl_from_document_scalar;

/// Field-by-field reader over a mapping node.
pub struct Binder<'a> {
    mapping: &'a Mapping,
    ctx: &'a BindContext,
    consumed: HashSet<String>,
}

impl<'a> Binder<'a> {
    pub fn new(mapping: &'a Mapping, ctx: &'a BindContext) -> Self {
        Self {
            mapping,
            ctx,
            consumed: HashSet::new(),
        }
    }

    pub fn context(&self) -> &BindContext {
        self.ctx
    }

    pub fn span(&self) -> SourceSpan {
        self.mapping.span()
    }

    pub(crate) fn mapping(&self) -> &Mapping {
        self.mapping
    }

    /// Record that a field claims `key`. Claiming the same key twice is a
    /// schema error (two fields with the same external name, or a flattened
    /// record clashing with its parent).
    pub(crate) fn claim(&mut self, key: &str) -> BindResult<()> {
        if !self.consumed.insert(key.to_string()) {
            let span = self
                .mapping
                .entry(key)
                .map(|e| e.key_span)
                .unwrap_or_else(|| self.mapping.span());
            return Err(BindError::duplicate_key(key, span).with_help(
                "the key is claimed by more than one field (a rename or a flattened record)",
            ));
        }
        Ok(())
    }

    /// A field that must be present.
    pub fn required<T: FromDocument>(&mut self, key: &str) -> BindResult<T> {
        self.claim(key)?;
        match self.mapping.get(key) {
            Some(node) => T::from_document(node, self.ctx),
            None => Err(BindError::missing_key(key, self.mapping.span())),
        }
    }

    /// A field that may be absent. An explicit null counts as absent.
    pub fn optional<T: FromDocument>(&mut self, key: &str) -> BindResult<Option<T>> {
        self.claim(key)?;
        match self.mapping.get(key) {
            Some(node) if node.is_null() => Ok(None),
            Some(node) => T::from_document(node, self.ctx).map(Some),
            None => Ok(None),
        }
    }

    /// An optional field falling back to the type's default.
    pub fn optional_or_default<T: FromDocument + Default>(&mut self, key: &str) -> BindResult<T> {
        Ok(self.optional(key)?.unwrap_or_default())
    }

    /// An optional field with an explicit fallback, for fields whose declared
    /// initializer differs from the type's zero value.
    pub fn optional_or<T: FromDocument>(
        &mut self,
        key: &str,
        fallback: impl FnOnce() -> T,
    ) -> BindResult<T> {
        Ok(self.optional(key)?.unwrap_or_else(fallback))
    }

    /// A boolean field; booleans always bind as optional-false.
    pub fn boolean(&mut self, key: &str) -> BindResult<bool> {
        Ok(self.optional(key)?.unwrap_or(false))
    }

    /// A field accepted under a rename. The external name wins; providing
    /// both spellings is an error.
    pub fn renamed<T: FromDocument>(
        &mut self,
        declared: &str,
        external: &str,
    ) -> BindResult<Option<T>> {
        self.claim(external)?;
        self.claim(declared)?;
        match (self.mapping.entry(external), self.mapping.entry(declared)) {
            (Some(_), Some(old)) => Err(BindError::duplicate_key(declared, old.key_span)
                .with_help(format!("`{declared}` was renamed to `{external}`; keep one"))),
            (Some(e), None) | (None, Some(e)) => {
                if e.value.is_null() {
                    Ok(None)
                } else {
                    T::from_document(&e.value, self.ctx).map(Some)
                }
            }
            (None, None) => Ok(None),
        }
    }

    /// A scalar-with-set-flag field: always yields a value, remembering
    /// whether the document provided one.
    pub fn set_info<T: FromDocument + Default>(&mut self, key: &str) -> BindResult<SetInfo<T>> {
        Ok(match self.optional(key)? {
            Some(value) => SetInfo::explicit(value),
            None => SetInfo::default(),
        })
    }

    /// A pattern field: collects every `prefix-<suffix>` key into
    /// `suffix → value`, plus the bare `prefix` key under the empty suffix.
    ///
    /// Runs before the strict-mode check, so matched keys are never flagged
    /// as unknown.
    pub fn pattern<T: FromDocument>(&mut self, prefix: &str) -> BindResult<IndexMap<String, T>> {
        let dashed = format!("{prefix}-");
        let keys: Vec<String> = self
            .mapping
            .keys()
            .filter(|k| *k == prefix || k.starts_with(&dashed))
            .map(str::to_string)
            .collect();

        let mut out = IndexMap::new();
        for key in keys {
            self.claim(&key)?;
            let suffix = key.strip_prefix(&dashed).unwrap_or("");
            let node = self.mapping.get(&key).expect("key listed above");
            out.insert(suffix.to_string(), T::from_document(node, self.ctx)?);
        }
        Ok(out)
    }

    /// Interpret an `enabled` gate. When the gate resolves false the caller
    /// is expected to [`Binder::skip_remaining`] and return defaults.
    pub fn is_enabled(&mut self, default: bool) -> BindResult<bool> {
        Ok(self.optional::<bool>("enabled")?.unwrap_or(default))
    }

    /// Interpret a `disabled` gate; returns true when the record is disabled.
    pub fn is_disabled(&mut self, default: bool) -> BindResult<bool> {
        Ok(self.optional::<bool>("disabled")?.unwrap_or(default))
    }

    /// Mark every remaining key as consumed. Used after a failed gate so a
    /// disabled record never trips strict mode.
    pub fn skip_remaining(&mut self) {
        for key in self.mapping.keys() {
            self.consumed.insert(key.to_string());
        }
    }

    /// Alias-this composition: bind `T` from this same mapping. Consumed-key
    /// bookkeeping is shared, so clashes between the parent's fields and the
    /// flattened record's fields are rejected.
    pub fn flatten<T: BindRecord>(&mut self) -> BindResult<T> {
        T::bind(self)
    }

    /// Evaluate strict mode over the keys no field claimed.
    pub fn finish(self) -> BindResult<()> {
        if self.ctx.strict == StrictMode::Ignore {
            return Ok(());
        }
        for (key, entry) in self.mapping.iter() {
            if self.consumed.contains(key) {
                continue;
            }
            match self.ctx.strict {
                StrictMode::Error => {
                    return Err(BindError::unknown_key(key, entry.key_span));
                }
                StrictMode::Warn => {
                    let (line, column) =
                        line_column(&self.ctx.source_text, entry.key_span.offset());
                    warn!(
                        "{}:{line}:{column}: ignoring unknown key `{key}`",
                        self.ctx.source_name
                    );
                }
                StrictMode::Ignore => unreachable!(),
            }
        }
        Ok(())
    }
}

// Scalar leaf types

impl FromDocument for String {
    fn from_document(node: &Node, _ctx: &BindContext) -> BindResult<Self> {
        Ok(node.expect_scalar()?.as_str().to_string())
    }
}

impl FromDocument for bool {
    fn from_document(node: &Node, _ctx: &BindContext) -> BindResult<Self> {
        node.expect_scalar()?.to_bool()
    }
}

impl FromDocument for std::path::PathBuf {
    fn from_document(node: &Node, _ctx: &BindContext) -> BindResult<Self> {
        Ok(std::path::PathBuf::from(node.expect_scalar()?.as_str()))
    }
}

macro_rules! impl_from_document_int {
    ($($ty:ty),+) => {$(
        impl FromDocument for $ty {
            fn from_document(node: &Node, _ctx: &BindContext) -> BindResult<Self> {
                let scalar = node.expect_scalar()?;
                scalar.to_i64()?.try_into().map_err(|_| {
                    BindError::construction(
                        stringify!($ty),
                        "integer out of range",
                        scalar.span(),
                    )
                })
            }
        }
    )+};
}
impl_from_document_int!(i32, i64, u16, u32, u64, usize);

// Aggregates

impl<T: FromDocument> FromDocument for Vec<T> {
    fn from_document(node: &Node, ctx: &BindContext) -> BindResult<Self> {
        match node {
            Node::Sequence(seq) => seq.iter().map(|item| T::from_document(item, ctx)).collect(),
            // a lone value is accepted as a one-element list
            _ => Ok(vec![T::from_document(node, ctx)?]),
        }
    }
}

impl<T: FromDocument> FromDocument for IndexMap<String, T> {
    fn from_document(node: &Node, ctx: &BindContext) -> BindResult<Self> {
        let mapping = node.expect_mapping()?;
        let mut out = IndexMap::new();
        for (key, entry) in mapping.iter() {
            out.insert(key.to_string(), T::from_document(&entry.value, ctx)?);
        }
        Ok(out)
    }
}

impl<T: FromDocument> FromDocument for std::collections::BTreeMap<String, T> {
    fn from_document(node: &Node, ctx: &BindContext) -> BindResult<Self> {
        let mapping = node.expect_mapping()?;
        let mut out = std::collections::BTreeMap::new();
        for (key, entry) in mapping.iter() {
            out.insert(key.to_string(), T::from_document(&entry.value, ctx)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::json::parse_json;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Default, PartialEq)]
    struct Sample {
        name: String,
        count: u32,
        tags: Vec<String>,
        extras: IndexMap<String, String>,
    }

    impl BindRecord for Sample {
        fn bind(b: &mut Binder<'_>) -> BindResult<Self> {
            Ok(Sample {
                name: b.required("name")?,
                count: b.optional_or_default("count")?,
                tags: b.optional_or_default("tags")?,
                extras: b.pattern("extra")?,
            })
        }

        fn validate(&self) -> Result<(), String> {
            if self.name.is_empty() {
                return Err("name must not be empty".to_string());
            }
            Ok(())
        }
    }

    fn bind(text: &str, strict: StrictMode) -> BindResult<Sample> {
        let node = parse_json(text).unwrap();
        let ctx = BindContext::new(strict, "test.json", text);
        bind_record(&node, &ctx)
    }

    #[test]
    fn binds_required_and_optional_fields() {
        let sample = bind(
            r#"{"name": "demo", "tags": ["a", "b"]}"#,
            StrictMode::Error,
        )
        .unwrap();
        assert_eq!(sample.name, "demo");
        assert_eq!(sample.count, 0);
        assert_eq!(sample.tags, vec!["a", "b"]);
    }

    #[test]
    fn missing_required_key() {
        let err = bind(r#"{"count": 3}"#, StrictMode::Error).unwrap_err();
        assert!(matches!(err, BindError::MissingRequiredKey { ref key, .. } if key == "name"));
    }

    #[test]
    fn strict_mode_rejects_unknown_keys_with_location() {
        let text = "{\"name\": \"x\",\n \"bogus\": 1}";
        let err = bind(text, StrictMode::Error).unwrap_err();
        match err {
            BindError::UnknownKey { key, span, .. } => {
                assert_eq!(key, "bogus");
                let (line, column) = line_column(text, span.offset());
                assert_eq!((line, column), (2, 2));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn warn_and_ignore_accept_unknown_keys() {
        for mode in [StrictMode::Warn, StrictMode::Ignore] {
            let sample = bind(r#"{"name": "x", "bogus": 1}"#, mode).unwrap();
            assert_eq!(sample.name, "x");
        }
    }

    #[test]
    fn pattern_keys_do_not_trip_strict_mode() {
        let sample = bind(
            r#"{"name": "x", "extra": "base", "extra-linux": "l", "extra-windows-x86": "w"}"#,
            StrictMode::Error,
        )
        .unwrap();
        assert_eq!(sample.extras.get(""), Some(&"base".to_string()));
        assert_eq!(sample.extras.get("linux"), Some(&"l".to_string()));
        assert_eq!(sample.extras.get("windows-x86"), Some(&"w".to_string()));
    }

    #[test]
    fn validate_hook_rejects() {
        let err = bind(r#"{"name": ""}"#, StrictMode::Error).unwrap_err();
        assert!(matches!(err, BindError::ConstructionFailure { .. }));
        assert!(err.to_string().contains("name must not be empty"));
    }

    #[test]
    fn scalar_accepted_as_single_element_list() {
        let sample = bind(r#"{"name": "x", "tags": "solo"}"#, StrictMode::Error).unwrap();
        assert_eq!(sample.tags, vec!["solo"]);
    }

    #[test]
    fn null_counts_as_absent() {
        let sample = bind(r#"{"name": "x", "tags": null}"#, StrictMode::Error).unwrap();
        assert!(sample.tags.is_empty());
    }

    // alias-this

    #[derive(Debug, Default, PartialEq)]
    struct Inner {
        flags: Vec<String>,
    }

    impl BindRecord for Inner {
        fn bind(b: &mut Binder<'_>) -> BindResult<Self> {
            Ok(Inner {
                flags: b.optional_or_default("flags")?,
            })
        }
    }

    #[derive(Debug, PartialEq)]
    struct Outer {
        name: String,
        inner: Inner,
    }

    impl BindRecord for Outer {
        fn bind(b: &mut Binder<'_>) -> BindResult<Self> {
            Ok(Outer {
                name: b.required("name")?,
                inner: b.flatten()?,
            })
        }
    }

    #[test]
    fn alias_this_flattens_into_parent_mapping() {
        let text = r#"{"name": "x", "flags": ["-g"]}"#;
        let node = parse_json(text).unwrap();
        let ctx = BindContext::new(StrictMode::Error, "t", text);
        let outer: Outer = bind_record(&node, &ctx).unwrap();
        assert_eq!(outer.inner.flags, vec!["-g"]);
    }

    #[derive(Debug)]
    struct Clashing;

    impl BindRecord for Clashing {
        fn bind(b: &mut Binder<'_>) -> BindResult<Self> {
            let _: String = b.required("name")?;
            let _: Inner = b.flatten()?;
            let _: Vec<String> = b.optional_or_default("flags")?;
            Ok(Clashing)
        }
    }

    #[test]
    fn alias_this_clash_is_a_duplicate_key() {
        let text = r#"{"name": "x", "flags": []}"#;
        let node = parse_json(text).unwrap();
        let ctx = BindContext::new(StrictMode::Error, "t", text);
        let err = bind_record::<Clashing>(&node, &ctx).unwrap_err();
        assert!(matches!(err, BindError::DuplicateKey { ref key, .. } if key == "flags"));
    }

    // renames

    #[derive(Debug)]
    struct Renamed {
        target: Option<String>,
    }

    impl BindRecord for Renamed {
        fn bind(b: &mut Binder<'_>) -> BindResult<Self> {
            Ok(Renamed {
                target: b.renamed("target_name", "targetName")?,
            })
        }
    }

    #[test]
    fn rename_accepts_either_spelling_but_not_both() {
        let ctx = BindContext::default();

        let node = parse_json(r#"{"targetName": "app"}"#).unwrap();
        let r: Renamed = bind_record(&node, &ctx).unwrap();
        assert_eq!(r.target.as_deref(), Some("app"));

        let node = parse_json(r#"{"target_name": "app"}"#).unwrap();
        let r: Renamed = bind_record(&node, &ctx).unwrap();
        assert_eq!(r.target.as_deref(), Some("app"));

        let node = parse_json(r#"{"targetName": "a", "target_name": "b"}"#).unwrap();
        let err = bind_record::<Renamed>(&node, &ctx).unwrap_err();
        assert!(matches!(err, BindError::DuplicateKey { .. }));
    }

    // enabled/disabled gating

    #[derive(Debug, Default, PartialEq)]
    struct Gated {
        enabled: bool,
        level: u32,
    }

    impl BindRecord for Gated {
        fn bind(b: &mut Binder<'_>) -> BindResult<Self> {
            if !b.is_enabled(true)? {
                b.skip_remaining();
                return Ok(Gated::default());
            }
            Ok(Gated {
                enabled: true,
                level: b.optional_or_default("level")?,
            })
        }
    }

    #[test]
    fn failed_gate_yields_defaults_and_skips_strict_mode() {
        let ctx = BindContext::default();
        let node = parse_json(r#"{"enabled": false, "level": 9, "junk": true}"#).unwrap();
        let gated: Gated = bind_record(&node, &ctx).unwrap();
        assert_eq!(gated, Gated::default());

        let node = parse_json(r#"{"level": 9}"#).unwrap();
        let gated: Gated = bind_record(&node, &ctx).unwrap();
        assert_eq!(gated.level, 9);
    }
}
