//! A supplier over a plain directory of `<name>_<version>.zip` archives.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use itertools::Itertools;
use fs_err as fs;
use serde_json::json;

use super::{select_best_version, PackageSupplier, SupplierError};
use crate::dependency::{Dependency, Locator};
use crate::version::Version;

pub struct FileSystemSupplier {
    dir: PathBuf,
}

impl FileSystemSupplier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileSystemSupplier { dir: dir.into() }
    }

    fn archive_path(&self, name: &str, version: &Version) -> PathBuf {
        self.dir.join(format!("{name}_{version}.zip"))
    }

    fn scan_versions(&self, name: &str) -> Result<Vec<Version>, SupplierError> {
        let prefix = format!("{name}_");
        let entries = fs::read_dir(&self.dir).map_err(|source| SupplierError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| SupplierError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(stem) = file_name.strip_suffix(".zip") else {
                continue;
            };
            let Some(version_text) = stem.strip_prefix(&prefix) else {
                continue;
            };
            if let Ok(version) = version_text.parse::<Version>() {
                versions.push(version);
            }
        }
        if versions.is_empty() {
            return Err(SupplierError::UnknownPackage(name.to_string()));
        }
        versions.sort();
        Ok(versions)
    }
}

#[async_trait]
impl PackageSupplier for FileSystemSupplier {
    fn description(&self) -> String {
        format!("file repository at {}", self.dir.display())
    }

    async fn versions(&self, name: &str) -> Result<Vec<Version>, SupplierError> {
        self.scan_versions(name)
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
            _ => {
                return Err(SupplierError::Unfetchable {
                    name: name.to_string(),
                    supplier: self.description(),
                    reason: "only version requirements can be served from a directory".into(),
                })
            }
        };
        let versions = self.scan_versions(name)?;
        let best = select_best_version(&versions, &range, pre_releases).ok_or_else(|| {
            SupplierError::NoMatchingVersion {
                name: name.to_string(),
                requirement: range.clone(),
                known: versions.iter().map(Version::to_string).join(", "),
            }
        })?;

        let archive = self.archive_path(name, &best);
        fs::copy(&archive, dest).map_err(|source| SupplierError::Io {
            path: archive,
            source,
        })?;
        Ok(best)
    }

    async fn metadata(&self, name: &str) -> Result<serde_json::Value, SupplierError> {
        let versions = self.scan_versions(name)?;
        let versions: Vec<serde_json::Value> = versions
            .iter()
            .map(|v| json!({ "version": v.to_string() }))
            .collect();
        Ok(json!({ "name": name, "versions": versions }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn make_archive(dir: &Path, name: &str, version: &str) {
        let file = fs_err::File::create(dir.join(format!("{name}_{version}.zip"))).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("dub.json", SimpleFileOptions::default())
            .unwrap();
        writer
            .write_all(format!(r#"{{"name": "{name}", "version": "{version}"}}"#).as_bytes())
            .unwrap();
        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn lists_and_fetches_archives() {
        let dir = tempfile::tempdir().unwrap();
        make_archive(dir.path(), "logger", "1.0.0");
        make_archive(dir.path(), "logger", "1.1.0");
        make_archive(dir.path(), "other", "0.1.0");

        let supplier = FileSystemSupplier::new(dir.path());
        let versions = supplier.versions("logger").await.unwrap();
        assert_eq!(versions.len(), 2);

        let dest = dir.path().join("out.zip");
        let fetched = supplier
            .fetch("logger", &"~>1.0".parse().unwrap(), false, &dest)
            .await
            .unwrap();
        assert_eq!(fetched.to_string(), "1.1.0");
        assert!(dest.is_file());
    }

    #[tokio::test]
    async fn unknown_package_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        make_archive(dir.path(), "other", "0.1.0");
        let supplier = FileSystemSupplier::new(dir.path());
        assert!(matches!(
            supplier.versions("missing").await,
            Err(SupplierError::UnknownPackage(_))
        ));
    }

    #[tokio::test]
    async fn metadata_lists_versions() {
        let dir = tempfile::tempdir().unwrap();
        make_archive(dir.path(), "logger", "1.0.0");
        let supplier = FileSystemSupplier::new(dir.path());
        let metadata = supplier.metadata("logger").await.unwrap();
        assert_eq!(metadata["name"], "logger");
        assert_eq!(metadata["versions"][0]["version"], "1.0.0");
    }
}
