//! Error types for document parsing and record binding

use miette::{Diagnostic, NamedSource, SourceSpan};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for binding operations
pub type BindResult<T> = Result<T, BindError>;

/// Errors raised while binding a document node to a record.
///
/// Every variant carries the span of the offending node so the error can be
/// rendered with file, line and column once a source is attached.
#[derive(Debug, Error, Diagnostic, Clone)]
pub enum BindError {
    /// The node had a different shape than the record expects
    #[error("expected {expected} but got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
        #[label("this should be a {expected}")]
        span: SourceSpan,
    },

    /// Strict mode rejected a key that matched no field and no pattern prefix
    #[error("unknown key `{key}`")]
    UnknownKey {
        key: String,
        #[label("not a recognized field")]
        span: SourceSpan,
        #[help]
        help: Option<String>,
    },

    /// A required field was absent from the mapping
    #[error("missing required key `{key}`")]
    MissingRequiredKey {
        key: String,
        #[label("add `{key}` to this mapping")]
        span: SourceSpan,
    },

    /// A duration was given in both the mapping-of-units and the
    /// `_<unit>`-suffixed scalar form
    #[error("duration `{field}` specified in more than one form")]
    DurationAmbiguity {
        field: String,
        #[label("conflicting duration forms")]
        span: SourceSpan,
    },

    /// A value hook (converter, `FromStr` or `validate`) rejected the value
    #[error("failed to construct `{field}`: {message}")]
    ConstructionFailure {
        field: String,
        message: String,
        #[label("{message}")]
        span: SourceSpan,
    },

    /// A rename collided with a real field name, or an alias-this flattened
    /// field clashed with a field of the enclosing record
    #[error("duplicate key `{key}`")]
    DuplicateKey {
        key: String,
        #[label("this key is claimed twice")]
        span: SourceSpan,
        #[help]
        help: Option<String>,
    },

    /// The document text itself could not be parsed
    #[error("syntax error: {message}")]
    Syntax {
        message: String,
        #[label("{message}")]
        span: SourceSpan,
    },
}

impl BindError {
    pub fn type_mismatch(expected: &'static str, actual: &'static str, span: SourceSpan) -> Self {
        Self::TypeMismatch {
            expected,
            actual,
            span,
        }
    }

    pub fn unknown_key(key: impl Into<String>, span: SourceSpan) -> Self {
        Self::UnknownKey {
            key: key.into(),
            span,
            help: None,
        }
    }

    pub fn missing_key(key: impl Into<String>, span: SourceSpan) -> Self {
        Self::MissingRequiredKey {
            key: key.into(),
            span,
        }
    }

    pub fn construction(
        field: impl Into<String>,
        message: impl Into<String>,
        span: SourceSpan,
    ) -> Self {
        Self::ConstructionFailure {
            field: field.into(),
            message: message.into(),
            span,
        }
    }

    pub fn duplicate_key(key: impl Into<String>, span: SourceSpan) -> Self {
        Self::DuplicateKey {
            key: key.into(),
            span,
            help: None,
        }
    }

    pub fn syntax(message: impl Into<String>, span: SourceSpan) -> Self {
        Self::Syntax {
            message: message.into(),
            span,
        }
    }

    /// Attach a help message where the variant supports one
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        match &mut self {
            Self::UnknownKey { help: h, .. } | Self::DuplicateKey { help: h, .. } => {
                *h = Some(help.into());
            }
            _ => {}
        }
        self
    }

    /// The span of the offending node
    pub fn span(&self) -> SourceSpan {
        match self {
            Self::TypeMismatch { span, .. }
            | Self::UnknownKey { span, .. }
            | Self::MissingRequiredKey { span, .. }
            | Self::DurationAmbiguity { span, .. }
            | Self::ConstructionFailure { span, .. }
            | Self::DuplicateKey { span, .. }
            | Self::Syntax { span, .. } => *span,
        }
    }
}

/// A [`BindError`] tied to the document text it came from. Displays as
/// `file:line:column: message`; a miette renderer additionally underlines
/// the span.
#[derive(Debug, Error)]
pub struct BindErrorWithSource {
    pub src: NamedSource<String>,
    #[source]
    pub source_error: BindError,
}

impl std::fmt::Display for BindErrorWithSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (line, column) = line_column(self.src.inner(), self.source_error.span().offset());
        write!(
            f,
            "{}:{line}:{column}: {}",
            self.src.name(),
            self.source_error
        )
    }
}

impl Diagnostic for BindErrorWithSource {
    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        Some(&self.src)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = miette::LabeledSpan> + '_>> {
        self.source_error.labels()
    }

    fn help<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        self.source_error.help()
    }
}

impl BindError {
    /// Attach the document text and name for rendering
    pub fn with_source(self, name: impl AsRef<str>, text: impl Into<String>) -> BindErrorWithSource {
        BindErrorWithSource {
            src: NamedSource::new(name, text.into()),
            source_error: self,
        }
    }
}

/// Errors raised while loading a document from disk
#[derive(Debug, Error, Diagnostic)]
pub enum DocumentError {
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Bind(#[from] Box<BindErrorWithSource>),
}

impl DocumentError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn bind(path: impl AsRef<std::path::Path>, text: impl Into<String>, err: BindError) -> Self {
        Self::Bind(Box::new(
            err.with_source(path.as_ref().to_string_lossy(), text),
        ))
    }
}

/// Compute the 1-based line and column of a byte offset in `text`.
///
/// Used by warn-mode diagnostics where no miette renderer is involved.
pub fn line_column(text: &str, offset: usize) -> (usize, usize) {
    let clamped = offset.min(text.len());
    let mut line = 1;
    let mut column = 1;
    for ch in text[..clamped].chars() {
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}
