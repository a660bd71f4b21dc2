//! A maven-layout archive mirror supplier.
//!
//! Layout: `<base>/<name>/<version>/<name>-<version>.zip`, with available
//! versions advertised through the repository's `maven-metadata.xml`
//! listing per package.

use std::path::Path;

use async_trait::async_trait;
use itertools::Itertools;
use tracing::debug;
use url::Url;

use super::{
    client::HttpClient, install::validate_archive, select_best_version, PackageSupplier,
    SupplierError,
};
use crate::dependency::{Dependency, Locator};
use crate::version::Version;

pub struct MavenSupplier {
    base: Url,
    client: HttpClient,
}

impl MavenSupplier {
    pub fn new(base: Url, client: HttpClient) -> Self {
        MavenSupplier { base, client }
    }

    fn join(&self, relative: &str) -> Result<Url, SupplierError> {
        self.base
            .join(relative)
            .map_err(|err| SupplierError::InvalidMetadata {
                url: self.base.clone(),
                reason: err.to_string(),
            })
    }
}

/// Pull the `<version>` entries out of a metadata listing without a full
/// XML parse; mirrors emit the plain maven layout.
fn listed_versions(listing: &str) -> Vec<Version> {
    let mut versions = Vec::new();
    let mut rest = listing;
    while let Some(start) = rest.find("<version>") {
        rest = &rest[start + "<version>".len()..];
        let Some(end) = rest.find("</version>") else {
            break;
        };
        if let Ok(version) = rest[..end].trim().parse::<Version>() {
            versions.push(version);
        }
        rest = &rest[end..];
    }
    versions.sort();
    versions.dedup();
    versions
}

#[async_trait]
impl PackageSupplier for MavenSupplier {
    fn description(&self) -> String {
        format!("maven repository at {}", self.base)
    }

    async fn versions(&self, name: &str) -> Result<Vec<Version>, SupplierError> {
        let url = self.join(&format!("{name}/maven-metadata.xml"))?;
        let listing = match self.client.get_text(&url).await {
            Ok(listing) => listing,
            Err(SupplierError::NotFound { .. }) => {
                return Err(SupplierError::UnknownPackage(name.to_string()))
            }
            Err(err) => return Err(err),
        };
        let versions = listed_versions(&listing);
        if versions.is_empty() {
            return Err(SupplierError::UnknownPackage(name.to_string()));
        }
        Ok(versions)
    }

    async fn fetch(
        &self,
        name: &str,
        dep: &Dependency,
        pre_releases: bool,
        dest: &Path,
    ) -> Result<Version, SupplierError> {
        let Locator::Range(range) = &dep.locator else {
            return Err(SupplierError::Unfetchable {
                name: name.to_string(),
                supplier: self.description(),
                reason: "mirrors serve version requirements only".into(),
            });
        };
        let versions = self.versions(name).await?;
        let best = select_best_version(&versions, range, pre_releases).ok_or_else(|| {
            SupplierError::NoMatchingVersion {
                name: name.to_string(),
                requirement: range.clone(),
                known: versions.iter().map(Version::to_string).join(", "),
            }
        })?;

        let url = self.join(&format!("{name}/{best}/{name}-{best}.zip"))?;
        debug!("downloading {url}");
        self.client.download(&url, dest).await?;
        validate_archive(dest, name)?;
        Ok(best)
    }

    async fn metadata(&self, name: &str) -> Result<serde_json::Value, SupplierError> {
        let versions = self.versions(name).await?;
        let versions: Vec<serde_json::Value> = versions
            .iter()
            .map(|v| serde_json::json!({ "version": v.to_string() }))
            .collect();
        Ok(serde_json::json!({ "name": name, "versions": versions }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn versions_parse_from_listing() {
        let listing = r#"
            <metadata>
              <groupId>drover</groupId>
              <artifactId>logger</artifactId>
              <versioning>
                <versions>
                  <version>1.0.0</version>
                  <version>1.1.0</version>
                  <version>1.1.0</version>
                  <version>not-a-version</version>
                </versions>
              </versioning>
            </metadata>
        "#;
        let versions = listed_versions(listing);
        let texts: Vec<String> = versions.iter().map(Version::to_string).collect();
        assert_eq!(texts, vec!["1.0.0", "1.1.0"]);
    }

    #[test]
    fn empty_listing_has_no_versions() {
        assert!(listed_versions("<metadata></metadata>").is_empty());
    }
}
