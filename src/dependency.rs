//! Dependency specifications: what a recipe may demand of another package.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::document::{BindContext, BindError, BindRecord, BindResult, Binder, FromDocument, Node};
use crate::version::{Version, VersionRange};

/// How a dependency is located.
#[derive(Debug, Clone, PartialEq)]
pub enum Locator {
    /// A version range against a supplier's published versions
    Range(VersionRange),
    /// A directory relative to the depending package, optionally pinned to
    /// the version the directory is expected to report
    Path {
        path: PathBuf,
        version: Option<Version>,
    },
    /// A repository URL plus a commit-or-ref to check out
    Repository { url: String, reference: String },
}

/// A single dependency specification.
#[derive(Debug, Clone, PartialEq)]
pub struct Dependency {
    pub locator: Locator,
    /// Optional dependencies are skipped unless selected or marked default
    pub optional: bool,
    /// An optional dependency included by default
    pub default: bool,
}

impl Dependency {
    /// The `*` dependency.
    pub fn any() -> Self {
        Self::from_range(VersionRange::Any)
    }

    pub fn from_range(range: VersionRange) -> Self {
        Dependency {
            locator: Locator::Range(range),
            optional: false,
            default: false,
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Dependency {
            locator: Locator::Path {
                path: path.into(),
                version: None,
            },
            optional: false,
            default: false,
        }
    }

    /// The range constraint this dependency imposes, if any. Path and
    /// repository locators constrain through their version pin when present.
    pub fn range(&self) -> Option<&VersionRange> {
        match &self.locator {
            Locator::Range(range) => Some(range),
            _ => None,
        }
    }

    /// Check a concrete version against this specification. Non-range
    /// locators accept a version only when it satisfies their pin (or
    /// always, without one).
    pub fn matches(&self, version: &Version) -> bool {
        match &self.locator {
            Locator::Range(range) => range.matches(version),
            Locator::Path { version: pin, .. } => {
                pin.as_ref().map(|p| p == version).unwrap_or(true)
            }
            Locator::Repository { .. } => true,
        }
    }

    /// Whether this dependency participates in resolution at all.
    pub fn is_effective(&self) -> bool {
        !self.optional || self.default
    }
}

impl FromStr for Dependency {
    type Err = crate::version::VersionError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Ok(Dependency::from_range(text.parse()?))
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.locator {
            Locator::Range(range) => range.fmt(f),
            Locator::Path { path, version } => {
                write!(f, "path:{}", path.display())?;
                if let Some(pin) = version {
                    write!(f, "@{pin}")?;
                }
                Ok(())
            }
            Locator::Repository { url, reference } => write!(f, "{url}#{reference}"),
        }
    }
}

/// The mapping form: `{ "path": …, "optional": … }` and friends.
#[derive(Debug)]
struct DependencyTable {
    version: Option<String>,
    path: Option<PathBuf>,
    repository: Option<String>,
    optional: bool,
    default: bool,
}

impl BindRecord for DependencyTable {
    fn bind(b: &mut Binder<'_>) -> BindResult<Self> {
        Ok(DependencyTable {
            version: b.optional("version")?,
            path: b.optional("path")?,
            repository: b.optional("repository")?,
            optional: b.boolean("optional")?,
            default: b.boolean("default")?,
        })
    }
}

impl FromDocument for Dependency {
    fn from_document(node: &Node, ctx: &BindContext) -> BindResult<Self> {
        if let Some(scalar) = node.as_scalar() {
            let range: VersionRange = scalar.as_str().parse().map_err(|err| {
                BindError::construction("dependency", format!("{err}"), scalar.span())
            })?;
            return Ok(Dependency::from_range(range));
        }

        let span = node.span();
        let table: DependencyTable = crate::document::bind_record(node, ctx)?;
        let locator = if let Some(path) = table.path {
            if table.repository.is_some() {
                return Err(BindError::construction(
                    "dependency",
                    "`path` and `repository` are mutually exclusive",
                    span,
                ));
            }
            let version = table
                .version
                .as_deref()
                .map(|v| {
                    v.parse::<Version>().map_err(|err| {
                        BindError::construction("version", format!("{err}"), span)
                    })
                })
                .transpose()?;
            Locator::Path { path, version }
        } else if let Some(url) = table.repository {
            let reference = table.version.clone().ok_or_else(|| {
                BindError::construction(
                    "dependency",
                    "a `repository` dependency requires a `version` ref",
                    span,
                )
            })?;
            Locator::Repository { url, reference }
        } else if let Some(version) = table.version {
            let range: VersionRange = version.parse().map_err(|err| {
                BindError::construction("version", format!("{err}"), span)
            })?;
            Locator::Range(range)
        } else {
            return Err(BindError::construction(
                "dependency",
                "one of `version`, `path` or `repository` is required",
                span,
            ));
        };

        Ok(Dependency {
            locator,
            optional: table.optional,
            default: table.default,
        })
    }
}
