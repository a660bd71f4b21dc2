//! The package manager: every package the process knows about.
//!
//! The manager owns the local cache (`<cache root>/packages/…`), the
//! user-registered local packages and search paths, and the override table.
//! It is populated once at startup and handed by reference to the resolver
//! and planner; fetched packages register as they land in the cache.

use std::path::{Path, PathBuf};

use fs_err as fs;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{Package, PackageError};
use crate::version::{Version, VersionRange};

/// Subdirectory of the cache root holding fetched package sources.
pub const PACKAGES_DIR: &str = "packages";
/// Registered local packages, persisted under the packages directory.
const LOCAL_PACKAGES_FILE: &str = "local-packages.json";
/// Persisted overrides.
const OVERRIDES_FILE: &str = "local-overrides.json";

/// A user-registered local package or search path.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalPackage {
    pub path: PathBuf,
    /// A pinned version for `add-local`; search paths have none
    pub version: Option<Version>,
}

/// What an override redirects to.
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideTarget {
    Path(PathBuf),
    Version(Version),
}

/// Redirects every selection of `package` matching `source` to the target.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageOverride {
    pub package: String,
    pub source: VersionRange,
    pub target: OverrideTarget,
}

/// The process-wide package registry and cache owner.
#[derive(Debug)]
pub struct PackageManager {
    cache_root: PathBuf,
    /// Directories scanned for packages in addition to the cache
    search_paths: Vec<PathBuf>,
    local_packages: Vec<LocalPackage>,
    overrides: Vec<PackageOverride>,
    packages: Vec<Package>,
}

impl PackageManager {
    /// Create a manager over `cache_root`, loading the persisted local
    /// package and override tables and scanning for known packages.
    pub fn new(
        cache_root: impl Into<PathBuf>,
        extra_search_paths: Vec<PathBuf>,
    ) -> Result<PackageManager, PackageError> {
        let cache_root = cache_root.into();
        let mut manager = PackageManager {
            cache_root,
            search_paths: extra_search_paths,
            local_packages: Vec::new(),
            overrides: Vec::new(),
            packages: Vec::new(),
        };
        manager.local_packages = manager.load_local_packages()?;
        manager.overrides = manager.load_overrides()?;
        manager.refresh()?;
        Ok(manager)
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// The cache directory a fetched package extracts into:
    /// `packages/<name>/<version>/<name>`.
    pub fn cache_path(&self, name: &str, version: &Version) -> PathBuf {
        self.cache_root
            .join(PACKAGES_DIR)
            .join(name)
            .join(version.to_string())
            .join(name)
    }

    /// Rescan the cache, search paths and registered local packages.
    pub fn refresh(&mut self) -> Result<(), PackageError> {
        self.packages.clear();

        let packages_dir = self.cache_root.join(PACKAGES_DIR);
        if packages_dir.is_dir() {
            self.scan_cache_dir(&packages_dir)?;
        }
        let search_paths = self.search_paths.clone();
        for dir in search_paths {
            self.scan_flat_dir(&dir);
        }
        let local_packages = self.local_packages.clone();
        for local in local_packages {
            match local.version {
                // add-local: one package with a pinned version
                Some(version) => {
                    if let Err(err) = self.register_dir(&local.path, Some(version)) {
                        warn!(
                            "ignoring local package at {}: {err}",
                            local.path.display()
                        );
                    }
                }
                // add-path: a directory of packages
                None => self.scan_flat_dir(&local.path),
            }
        }
        debug!(count = self.packages.len(), "package scan complete");
        Ok(())
    }

    /// `packages/<name>/<version>/<name>` layout.
    fn scan_cache_dir(&mut self, packages_dir: &Path) -> Result<(), PackageError> {
        let names = read_dir_sorted(packages_dir);
        for name_dir in names {
            let name = match name_dir.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            for version_dir in read_dir_sorted(&name_dir) {
                let Some(version) = version_dir
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|v| v.parse::<Version>().ok())
                else {
                    continue;
                };
                let package_dir = version_dir.join(&name);
                if !package_dir.is_dir() {
                    continue;
                }
                if let Err(err) = self.register_dir(&package_dir, Some(version)) {
                    warn!(
                        "ignoring cached package at {}: {err}",
                        package_dir.display()
                    );
                }
            }
        }
        Ok(())
    }

    /// A directory whose immediate children are package roots.
    fn scan_flat_dir(&mut self, dir: &Path) {
        for child in read_dir_sorted(dir) {
            if crate::recipe::RECIPE_FILE_NAMES
                .iter()
                .any(|name| child.join(name).is_file())
            {
                if let Err(err) = self.register_dir(&child, None) {
                    warn!("ignoring package at {}: {err}", child.display());
                }
            }
        }
    }

    /// Load and register the package at `dir` plus its subpackages.
    pub fn register_dir(
        &mut self,
        dir: &Path,
        version: Option<Version>,
    ) -> Result<&Package, PackageError> {
        let package = Package::load(dir, version)?;
        self.register(package)
    }

    /// Register an already-loaded package plus its subpackages. A package
    /// already known under the same name and version is kept; first
    /// registration wins, so the cache and earlier search paths take
    /// priority.
    pub fn register(&mut self, package: Package) -> Result<&Package, PackageError> {
        let subs = package.sub_packages()?;
        let index = match self.find_index(package.name(), package.version()) {
            Some(existing) => existing,
            None => {
                self.packages.push(package);
                self.packages.len() - 1
            }
        };
        for sub in subs {
            if self.find_index(sub.name(), sub.version()).is_none() {
                self.packages.push(sub);
            }
        }
        Ok(&self.packages[index])
    }

    fn find_index(&self, name: &str, version: &Version) -> Option<usize> {
        self.packages
            .iter()
            .position(|p| p.name() == name && p.version() == version)
    }

    /// Exact lookup by qualified name and version.
    pub fn get_package(&self, name: &str, version: &Version) -> Option<&Package> {
        self.find_index(name, version).map(|i| &self.packages[i])
    }

    /// The highest known version of `name` matching `range`.
    pub fn get_best_package(&self, name: &str, range: &VersionRange) -> Option<&Package> {
        self.packages
            .iter()
            .filter(|p| p.name() == name && range.matches(p.version()))
            .max_by(|a, b| a.version().cmp(b.version()))
    }

    /// Every known version of `name`, ascending.
    pub fn known_versions(&self, name: &str) -> Vec<Version> {
        let mut versions: Vec<Version> = self
            .packages
            .iter()
            .filter(|p| p.name() == name)
            .map(|p| p.version().clone())
            .collect();
        versions.sort();
        versions.dedup();
        versions
    }

    /// All registered packages, for `list`.
    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    /// Delete a cached package from disk and forget it.
    pub fn remove_cached(&mut self, name: &str, version: &Version) -> Result<(), PackageError> {
        let dir = self
            .cache_root
            .join(PACKAGES_DIR)
            .join(name)
            .join(version.to_string());
        if !dir.is_dir() {
            return Err(PackageError::NotCached {
                name: name.to_string(),
                version: version.clone(),
            });
        }
        fs::remove_dir_all(&dir).map_err(|source| PackageError::Io { path: dir, source })?;
        self.packages
            .retain(|p| !(p.base_name() == name && p.version() == version));
        Ok(())
    }

    // local packages and search paths

    pub fn local_packages(&self) -> &[LocalPackage] {
        &self.local_packages
    }

    pub fn add_local_package(
        &mut self,
        path: PathBuf,
        version: Option<Version>,
    ) -> Result<(), PackageError> {
        self.local_packages.retain(|l| l.path != path);
        self.local_packages.push(LocalPackage { path, version });
        self.save_local_packages()?;
        self.refresh()
    }

    pub fn remove_local_package(&mut self, path: &Path) -> Result<bool, PackageError> {
        let before = self.local_packages.len();
        self.local_packages
            .retain(|l| !(l.path == path && l.version.is_some()));
        let removed = self.local_packages.len() != before;
        if removed {
            self.save_local_packages()?;
            self.refresh()?;
        }
        Ok(removed)
    }

    pub fn add_search_path(&mut self, path: PathBuf) -> Result<(), PackageError> {
        self.local_packages
            .retain(|l| !(l.path == path && l.version.is_none()));
        self.local_packages.push(LocalPackage {
            path,
            version: None,
        });
        self.save_local_packages()?;
        self.refresh()
    }

    pub fn remove_search_path(&mut self, path: &Path) -> Result<bool, PackageError> {
        let before = self.local_packages.len();
        self.local_packages
            .retain(|l| !(l.path == path && l.version.is_none()));
        let removed = self.local_packages.len() != before;
        if removed {
            self.save_local_packages()?;
            self.refresh()?;
        }
        Ok(removed)
    }

    // overrides

    pub fn overrides(&self) -> &[PackageOverride] {
        &self.overrides
    }

    /// Apply the override table to a selected name/version pair.
    pub fn resolve_override(&self, name: &str, version: &Version) -> Option<&PackageOverride> {
        self.overrides
            .iter()
            .find(|o| o.package == name && o.source.matches(version))
    }

    pub fn add_override(&mut self, override_: PackageOverride) -> Result<(), PackageError> {
        self.overrides
            .retain(|o| !(o.package == override_.package && o.source == override_.source));
        self.overrides.push(override_);
        self.save_overrides()
    }

    pub fn remove_override(
        &mut self,
        package: &str,
        source: &VersionRange,
    ) -> Result<bool, PackageError> {
        let before = self.overrides.len();
        self.overrides
            .retain(|o| !(o.package == package && &o.source == source));
        let removed = self.overrides.len() != before;
        if removed {
            self.save_overrides()?;
        }
        Ok(removed)
    }

    // persistence

    fn local_packages_file(&self) -> PathBuf {
        self.cache_root.join(PACKAGES_DIR).join(LOCAL_PACKAGES_FILE)
    }

    fn overrides_file(&self) -> PathBuf {
        self.cache_root.join(PACKAGES_DIR).join(OVERRIDES_FILE)
    }

    fn load_local_packages(&self) -> Result<Vec<LocalPackage>, PackageError> {
        let path = self.local_packages_file();
        let Some(value) = read_json_if_present(&path)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for entry in value.as_array().into_iter().flatten() {
            let Some(dir) = entry.get("path").and_then(Value::as_str) else {
                continue;
            };
            let version = entry
                .get("version")
                .and_then(Value::as_str)
                .and_then(|v| v.parse().ok());
            out.push(LocalPackage {
                path: PathBuf::from(dir),
                version,
            });
        }
        Ok(out)
    }

    fn save_local_packages(&self) -> Result<(), PackageError> {
        let entries: Vec<Value> = self
            .local_packages
            .iter()
            .map(|l| match &l.version {
                Some(version) => json!({
                    "path": l.path.to_string_lossy(),
                    "version": version.to_string(),
                }),
                None => json!({ "path": l.path.to_string_lossy() }),
            })
            .collect();
        write_json(&self.local_packages_file(), &Value::Array(entries))
    }

    fn load_overrides(&self) -> Result<Vec<PackageOverride>, PackageError> {
        let path = self.overrides_file();
        let Some(value) = read_json_if_present(&path)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for entry in value.as_array().into_iter().flatten() {
            let (Some(package), Some(source)) = (
                entry.get("name").and_then(Value::as_str),
                entry
                    .get("version")
                    .and_then(Value::as_str)
                    .and_then(|v| v.parse::<VersionRange>().ok()),
            ) else {
                warn!("skipping malformed override entry in {}", path.display());
                continue;
            };
            let target = if let Some(dir) = entry.get("targetPath").and_then(Value::as_str) {
                OverrideTarget::Path(PathBuf::from(dir))
            } else if let Some(v) = entry
                .get("targetVersion")
                .and_then(Value::as_str)
                .and_then(|v| v.parse().ok())
            {
                OverrideTarget::Version(v)
            } else {
                warn!("skipping override without target in {}", path.display());
                continue;
            };
            out.push(PackageOverride {
                package: package.to_string(),
                source,
                target,
            });
        }
        Ok(out)
    }

    fn save_overrides(&self) -> Result<(), PackageError> {
        let entries: Vec<Value> = self
            .overrides
            .iter()
            .map(|o| {
                let mut entry = serde_json::Map::new();
                entry.insert("name".into(), json!(o.package));
                entry.insert("version".into(), json!(o.source.to_string()));
                match &o.target {
                    OverrideTarget::Path(path) => {
                        entry.insert("targetPath".into(), json!(path.to_string_lossy()));
                    }
                    OverrideTarget::Version(version) => {
                        entry.insert("targetVersion".into(), json!(version.to_string()));
                    }
                }
                Value::Object(entry)
            })
            .collect();
        write_json(&self.overrides_file(), &Value::Array(entries))
    }
}

fn read_dir_sorted(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .map(|iter| {
            iter.filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.is_dir())
                .collect()
        })
        .unwrap_or_default();
    entries.sort();
    entries
}

fn read_json_if_present(path: &Path) -> Result<Option<Value>, PackageError> {
    if !path.is_file() {
        return Ok(None);
    }
    let text = fs::read_to_string(path).map_err(|source| PackageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match serde_json::from_str(&text) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            warn!("ignoring malformed {}: {err}", path.display());
            Ok(None)
        }
    }
}

fn write_json(path: &Path, value: &Value) -> Result<(), PackageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| PackageError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let mut text = serde_json::to_string_pretty(value).expect("json values serialize");
    text.push('\n');
    fs::write(path, text).map_err(|source| PackageError::Io {
        path: path.to_path_buf(),
        source,
    })
}
