//! Packages on disk and the process-wide package manager.

pub mod manager;
pub mod selections;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::recipe::{self, Recipe, RecipeError};
use crate::version::Version;

pub use manager::{LocalPackage, OverrideTarget, PackageManager, PackageOverride};
pub use selections::{
    find_selections, FoundSelections, SelectedVersion, SelectionsError, SelectionsFile,
    SELECTIONS_FILE_NAME,
};

#[derive(Debug, Error)]
pub enum PackageError {
    #[error(transparent)]
    Recipe(#[from] RecipeError),

    #[error(transparent)]
    Selections(#[from] SelectionsError),

    #[error("failed to access {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("package `{name}` {version} is not present in the local cache")]
    NotCached { name: String, version: Version },
}

/// A package instance rooted at a directory, with its recipe loaded.
///
/// Subpackages materialize as their own instances carrying the qualified
/// `parent:sub` name and the parent's version.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    name: String,
    version: Version,
    recipe: Recipe,
    path: PathBuf,
}

impl Package {
    /// Load the package rooted at `dir`. `version_hint` overrides the
    /// recipe's own version, used when the directory name (or a selections
    /// entry) pins one.
    pub fn load(dir: &Path, version_hint: Option<Version>) -> Result<Package, PackageError> {
        let recipe = Recipe::load(dir)?;
        let version = version_hint.unwrap_or_else(|| recipe.version_or_default());
        Ok(Package {
            name: recipe.name.clone(),
            version,
            recipe,
            path: dir.to_path_buf(),
        })
    }

    pub(crate) fn from_parts(
        name: String,
        version: Version,
        recipe: Recipe,
        path: PathBuf,
    ) -> Package {
        Package {
            name,
            version,
            recipe,
            path,
        }
    }

    /// The qualified name (`base` or `base:sub`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The unqualified base package name.
    pub fn base_name(&self) -> &str {
        self.name.split(':').next().unwrap_or(&self.name)
    }

    pub fn is_sub_package(&self) -> bool {
        self.name.contains(':')
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    /// The package root directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Instantiate this package's subpackages, sharing its version.
    pub fn sub_packages(&self) -> Result<Vec<Package>, PackageError> {
        let mut out = Vec::new();
        for sub_name in self.recipe.subpackage_names() {
            let sub_recipe = self.recipe.subpackage(&sub_name, &self.path)?;
            let dir = match self
                .recipe
                .sub_packages
                .iter()
                .find_map(|spec| match spec {
                    recipe::SubPackageSpec::Path(rel)
                        if rel.file_name().and_then(|n| n.to_str()) == Some(sub_name.as_str()) =>
                    {
                        Some(self.path.join(rel))
                    }
                    _ => None,
                }) {
                Some(dir) => dir,
                None => self.path.clone(),
            };
            out.push(Package {
                name: format!("{}:{}", self.name, sub_name),
                version: self.version.clone(),
                recipe: sub_recipe,
                path: dir,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fs_err as fs;
    use pretty_assertions::assert_eq;

    fn write_package(dir: &Path, text: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("dub.json"), text).unwrap();
    }

    #[test]
    fn loads_package_and_subpackages() {
        let dir = tempfile::tempdir().unwrap();
        write_package(
            dir.path(),
            r#"{
                "name": "b",
                "version": "1.0.0",
                "subPackages": [{"name": "a"}, {"name": "b"}]
            }"#,
        );

        let package = Package::load(dir.path(), None).unwrap();
        assert_eq!(package.name(), "b");
        assert_eq!(package.version().to_string(), "1.0.0");

        let subs = package.sub_packages().unwrap();
        let names: Vec<_> = subs.iter().map(Package::name).collect();
        assert_eq!(names, vec!["b:a", "b:b"]);
        assert_eq!(subs[0].version().to_string(), "1.0.0");
        assert_eq!(subs[0].base_name(), "b");
        assert!(subs[0].is_sub_package());
    }

    #[test]
    fn version_hint_overrides_recipe() {
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path(), r#"{"name": "x", "version": "1.0.0"}"#);
        let package = Package::load(dir.path(), Some("2.0.0".parse().unwrap())).unwrap();
        assert_eq!(package.version().to_string(), "2.0.0");
    }

    #[test]
    fn path_subpackages_load_from_their_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_package(
            dir.path(),
            r#"{"name": "parent", "version": "0.5.0", "subPackages": ["./comp"]}"#,
        );
        write_package(&dir.path().join("comp"), r#"{"name": "comp"}"#);

        let package = Package::load(dir.path(), None).unwrap();
        let subs = package.sub_packages().unwrap();
        assert_eq!(subs[0].name(), "parent:comp");
        assert_eq!(subs[0].version().to_string(), "0.5.0");
        assert_eq!(subs[0].path(), dir.path().join("comp"));
    }
}
