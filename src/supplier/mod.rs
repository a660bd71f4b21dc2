//! Package suppliers: everything that can enumerate and deliver packages.

pub mod client;
pub mod filesystem;
pub mod install;
pub mod maven;
pub mod registry;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use itertools::Itertools;
use thiserror::Error;
use url::Url;

use crate::dependency::Dependency;
use crate::version::{Version, VersionRange};

pub use client::HttpClient;
pub use filesystem::FileSystemSupplier;
pub use install::{install_archive, validate_archive};
pub use maven::MavenSupplier;
pub use registry::RegistrySupplier;

/// The default public registry consulted unless `--skip-registry` says
/// otherwise.
pub const DEFAULT_REGISTRY_URL: &str = "https://code.dlang.org/";

#[derive(Debug, Error)]
pub enum SupplierError {
    #[error("failed to set up the HTTP client")]
    ClientSetup(#[source] reqwest::Error),

    #[error("request to {url} failed")]
    Http {
        url: Url,
        #[source]
        source: reqwest_middleware::Error,
    },

    #[error("{url} returned status {status}")]
    Status {
        url: Url,
        status: reqwest::StatusCode,
    },

    #[error("{url} was not found")]
    NotFound { url: Url },

    #[error("request to {url} exceeded the {limit:?} time budget")]
    Timeout { url: Url, limit: Duration },

    #[error("metadata from {url} is not usable: {reason}")]
    InvalidMetadata { url: Url, reason: String },

    #[error("failed to access {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive for `{name}` is corrupt: {reason}")]
    CorruptArchive { name: String, reason: String },

    #[error("no supplier knows a package named `{0}`")]
    UnknownPackage(String),

    #[error("no version of `{name}` satisfies `{requirement}` (known: {known})")]
    NoMatchingVersion {
        name: String,
        requirement: VersionRange,
        known: String,
    },

    #[error("`{name}` cannot be fetched from {supplier}: {reason}")]
    Unfetchable {
        name: String,
        supplier: String,
        reason: String,
    },
}

/// One hit of a registry search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub name: String,
    pub version: Option<Version>,
    pub description: Option<String>,
}

/// A source of packages: the local filesystem, the public registry or an
/// archive mirror.
#[async_trait]
pub trait PackageSupplier: Send + Sync {
    /// A human-readable identification, shown in diagnostics.
    fn description(&self) -> String;

    /// Every version of `name` the supplier can deliver, ascending.
    async fn versions(&self, name: &str) -> Result<Vec<Version>, SupplierError>;

    /// Download the archive for `name` satisfying `dep` into `dest`.
    async fn fetch(
        &self,
        name: &str,
        dep: &Dependency,
        pre_releases: bool,
        dest: &Path,
    ) -> Result<Version, SupplierError>;

    /// The supplier's raw metadata document for `name`.
    async fn metadata(&self, name: &str) -> Result<serde_json::Value, SupplierError>;

    /// Full-text search; only registries implement this.
    async fn search(&self, _term: &str) -> Result<Vec<SearchResult>, SupplierError> {
        Ok(Vec::new())
    }
}

/// Pick the greatest version matching `range`. Pre-releases are ignored
/// unless the policy opts in or nothing but pre-releases matches.
pub fn select_best_version(
    versions: &[Version],
    range: &VersionRange,
    pre_releases: bool,
) -> Option<Version> {
    let matching: Vec<&Version> = versions.iter().filter(|v| range.matches(v)).collect();
    if matching.is_empty() {
        return None;
    }
    let releases_only: Vec<&&Version> = matching.iter().filter(|v| !v.is_prerelease()).collect();
    if pre_releases || releases_only.is_empty() {
        matching.iter().max().map(|v| (*v).clone())
    } else {
        releases_only.iter().max().map(|v| (**v).clone())
    }
}

/// Query the supplier chain in order; the first supplier advertising a
/// matching version wins ties on equal versions.
pub async fn find_best_supplier<'a>(
    suppliers: &'a [Box<dyn PackageSupplier>],
    name: &str,
    range: &VersionRange,
    pre_releases: bool,
) -> Result<(&'a dyn PackageSupplier, Version), SupplierError> {
    let mut best: Option<(&dyn PackageSupplier, Version)> = None;
    let mut known = Vec::new();
    let mut seen_any = false;

    for supplier in suppliers {
        let versions = match supplier.versions(name).await {
            Ok(versions) => versions,
            Err(SupplierError::UnknownPackage(_)) | Err(SupplierError::NotFound { .. }) => {
                continue;
            }
            Err(err) => return Err(err),
        };
        seen_any = true;
        known.extend(versions.iter().cloned());
        if let Some(candidate) = select_best_version(&versions, range, pre_releases) {
            // strictly-greater keeps the earlier supplier on ties
            let better = match &best {
                Some((_, current)) => candidate > *current,
                None => true,
            };
            if better {
                best = Some((supplier.as_ref(), candidate));
            }
        }
    }

    match best {
        Some(found) => Ok(found),
        None if !seen_any => Err(SupplierError::UnknownPackage(name.to_string())),
        None => {
            known.sort();
            known.dedup();
            let known = known.iter().map(Version::to_string).join(", ");
            Err(SupplierError::NoMatchingVersion {
                name: name.to_string(),
                requirement: range.clone(),
                known: if known.is_empty() { "none".into() } else { known },
            })
        }
    }
}
