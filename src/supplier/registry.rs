//! The HTTP registry supplier.
//!
//! Metadata comes from `<registry>/packages/<name>.json` and archives from
//! `<registry>/packages/<name>/<version>.zip`. Metadata is cached
//! in-process per name. A registry URL may carry space-separated fallback
//! URLs; downloads rotate to the next fallback between retries. Corrupt
//! archives are retried with exponential backoff; server errors are
//! handled by the client's retry middleware; connection failures fail
//! fast.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;

use async_trait::async_trait;
use itertools::Itertools;
use retry_policies::{policies::ExponentialBackoff, RetryDecision, RetryPolicy};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::{
    client::{HttpClient, MAX_RETRIES},
    install::validate_archive,
    select_best_version, PackageSupplier, SearchResult, SupplierError,
};
use crate::dependency::{Dependency, Locator};
use crate::version::Version;

pub struct RegistrySupplier {
    /// The primary URL followed by its fallbacks
    urls: Vec<Url>,
    client: HttpClient,
    metadata_cache: Mutex<HashMap<String, Value>>,
}

impl RegistrySupplier {
    /// Build from a registry definition: a URL optionally followed by
    /// space-separated fallback URLs.
    pub fn from_definition(definition: &str, client: HttpClient) -> Result<Self, SupplierError> {
        let mut urls = Vec::new();
        for part in definition.split_whitespace() {
            let url = Url::parse(part).map_err(|err| SupplierError::InvalidMetadata {
                url: Url::parse("invalid:").expect("static url"),
                reason: format!("invalid registry URL `{part}`: {err}"),
            })?;
            urls.push(url);
        }
        if urls.is_empty() {
            return Err(SupplierError::InvalidMetadata {
                url: Url::parse("invalid:").expect("static url"),
                reason: "empty registry definition".to_string(),
            });
        }
        Ok(RegistrySupplier {
            urls,
            client,
            metadata_cache: Mutex::new(HashMap::new()),
        })
    }

    fn metadata_url(&self, base: &Url, name: &str) -> Result<Url, SupplierError> {
        base.join(&format!("packages/{name}.json"))
            .map_err(|err| SupplierError::InvalidMetadata {
                url: base.clone(),
                reason: err.to_string(),
            })
    }

    fn archive_url(&self, base: &Url, name: &str, version: &Version) -> Result<Url, SupplierError> {
        base.join(&format!("packages/{name}/{version}.zip"))
            .map_err(|err| SupplierError::InvalidMetadata {
                url: base.clone(),
                reason: err.to_string(),
            })
    }

    /// Fetch (or recall) the metadata document for `name`.
    async fn cached_metadata(&self, name: &str) -> Result<Value, SupplierError> {
        if let Some(found) = self
            .metadata_cache
            .lock()
            .expect("metadata cache poisoned")
            .get(name)
        {
            return Ok(found.clone());
        }

        let mut last_error = None;
        for base in &self.urls {
            let url = self.metadata_url(base, name)?;
            match self.client.get_json(&url).await {
                Ok(value) => {
                    self.metadata_cache
                        .lock()
                        .expect("metadata cache poisoned")
                        .insert(name.to_string(), value.clone());
                    return Ok(value);
                }
                Err(SupplierError::NotFound { .. }) => {
                    return Err(SupplierError::UnknownPackage(name.to_string()));
                }
                Err(err) => {
                    warn!("metadata request to {url} failed: {err}");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| SupplierError::UnknownPackage(name.to_string())))
    }

    fn parse_versions(&self, name: &str, metadata: &Value) -> Result<Vec<Version>, SupplierError> {
        let entries = metadata
            .get("versions")
            .and_then(Value::as_array)
            .ok_or_else(|| SupplierError::InvalidMetadata {
                url: self.urls[0].clone(),
                reason: format!("metadata for `{name}` has no `versions` array"),
            })?;
        let mut versions = Vec::new();
        for entry in entries {
            let Some(text) = entry.get("version").and_then(Value::as_str) else {
                continue;
            };
            match text.parse::<Version>() {
                Ok(version) => versions.push(version),
                Err(err) => debug!("skipping unparsable version of `{name}`: {err}"),
            }
        }
        versions.sort();
        Ok(versions)
    }
}

#[async_trait]
impl PackageSupplier for RegistrySupplier {
    fn description(&self) -> String {
        format!("registry at {}", self.urls[0])
    }

    async fn versions(&self, name: &str) -> Result<Vec<Version>, SupplierError> {
        let metadata = self.cached_metadata(name).await?;
        self.parse_versions(name, &metadata)
    }

    async fn fetch(
        &self,
        name: &str,
        dep: &Dependency,
        pre_releases: bool,
        dest: &Path,
    ) -> Result<Version, SupplierError> {
        let range = match &dep.locator {
            Locator::Range(range) => range.clone(),
            Locator::Path { .. } => {
                return Err(SupplierError::Unfetchable {
                    name: name.to_string(),
                    supplier: self.description(),
                    reason: "path dependencies are not fetched".into(),
                })
            }
            Locator::Repository { .. } => {
                return Err(SupplierError::Unfetchable {
                    name: name.to_string(),
                    supplier: self.description(),
                    reason: "repository dependencies are not served by registries".into(),
                })
            }
        };

        let versions = self.versions(name).await?;
        let best = select_best_version(&versions, &range, pre_releases).ok_or_else(|| {
            SupplierError::NoMatchingVersion {
                name: name.to_string(),
                requirement: range.clone(),
                known: versions.iter().map(Version::to_string).join(", "),
            }
        })?;

        self.download_archive(name, &best, dest).await?;
        Ok(best)
    }

    async fn metadata(&self, name: &str) -> Result<Value, SupplierError> {
        self.cached_metadata(name).await
    }

    async fn search(&self, term: &str) -> Result<Vec<SearchResult>, SupplierError> {
        let base = &self.urls[0];
        let url = base
            .join(&format!("api/packages/search?q={}", urlencode(term)))
            .map_err(|err| SupplierError::InvalidMetadata {
                url: base.clone(),
                reason: err.to_string(),
            })?;
        let value = self.client.get_json(&url).await?;
        let mut out = Vec::new();
        for entry in value.as_array().into_iter().flatten() {
            let Some(name) = entry.get("name").and_then(Value::as_str) else {
                continue;
            };
            out.push(SearchResult {
                name: name.to_string(),
                version: entry
                    .get("version")
                    .and_then(Value::as_str)
                    .and_then(|v| v.parse().ok()),
                description: entry
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
        Ok(out)
    }
}

/// One archive-download strategy, retried by [`run_with_retry`].
#[async_trait]
trait ArchiveFetch: Send {
    async fn attempt(&mut self, attempt: u32) -> Result<(), SupplierError>;
}

/// Should a failed attempt be repeated? Corrupt bodies are worth another
/// try; connection failures and definitive responses are not.
fn is_retryable(err: &SupplierError) -> bool {
    matches!(err, SupplierError::CorruptArchive { .. })
}

/// Run a download in at most [`MAX_RETRIES`] attempts, backing off
/// exponentially after each retryable failure.
async fn run_with_retry(fetch: &mut dyn ArchiveFetch) -> Result<(), SupplierError> {
    let policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);
    let started = SystemTime::now();
    let mut last_error = None;

    for attempt in 0..MAX_RETRIES {
        match fetch.attempt(attempt).await {
            Ok(()) => return Ok(()),
            Err(err) if is_retryable(&err) => {
                warn!("archive download attempt {} failed: {err}", attempt + 1);
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }

        if attempt + 1 < MAX_RETRIES {
            if let RetryDecision::Retry { execute_after } = policy.should_retry(started, attempt) {
                if let Ok(wait) = execute_after.duration_since(SystemTime::now()) {
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
    Err(last_error.expect("loop ran at least once"))
}

/// Downloads one archive from a registry, rotating through the fallback
/// URLs between attempts and validating the body before accepting it.
struct RegistryArchiveFetch<'a> {
    supplier: &'a RegistrySupplier,
    name: &'a str,
    version: &'a Version,
    dest: &'a Path,
}

#[async_trait]
impl ArchiveFetch for RegistryArchiveFetch<'_> {
    async fn attempt(&mut self, attempt: u32) -> Result<(), SupplierError> {
        let base = &self.supplier.urls[attempt as usize % self.supplier.urls.len()];
        let url = self.supplier.archive_url(base, self.name, self.version)?;
        self.supplier.client.download(&url, self.dest).await?;
        validate_archive(self.dest, self.name)
    }
}

impl RegistrySupplier {
    async fn download_archive(
        &self,
        name: &str,
        version: &Version,
        dest: &Path,
    ) -> Result<(), SupplierError> {
        run_with_retry(&mut RegistryArchiveFetch {
            supplier: self,
            name,
            version,
            dest,
        })
        .await
    }
}

fn urlencode(text: &str) -> String {
    let mut out = String::new();
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
