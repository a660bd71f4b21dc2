//! The project: the transient view rooted at the user-invoked directory.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::package::{
    find_selections, FoundSelections, Package, PackageError, SelectionsError, SelectionsFile,
};
use crate::recipe::{single_file, RecipeError};
use crate::resolver::{resolve, ResolveContext, ResolveError, UpgradePolicy};

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error(transparent)]
    Recipe(#[from] RecipeError),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Selections(#[from] SelectionsError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// A loaded project: the root package plus the selections that apply to
/// its directory.
pub struct Project {
    root: Package,
    root_dir: PathBuf,
    selections: Option<FoundSelections>,
}

impl Project {
    /// Load the project at `path`: a package directory, a recipe file, or
    /// a single-file package.
    pub fn load(path: &Path) -> Result<Project, ProjectError> {
        let (root, root_dir) = if path.is_file() {
            if path.extension().and_then(|e| e.to_str()) == Some("d") {
                let recipe = single_file::load_single_file_package(path)?;
                let dir = path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."));
                let version = recipe.version_or_default();
                let name = recipe.name.clone();
                (
                    Package::from_parts(name, version, recipe, dir.clone()),
                    dir,
                )
            } else {
                let dir = path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."));
                let recipe = crate::recipe::Recipe::load(path)?;
                let version = recipe.version_or_default();
                let name = recipe.name.clone();
                (
                    Package::from_parts(name, version, recipe, dir.clone()),
                    dir,
                )
            }
        } else {
            (Package::load(path, None)?, path.to_path_buf())
        };

        let selections = find_selections(&root_dir)?;
        if let Some(found) = &selections {
            if found.inherited {
                info!(
                    "using selections inherited from {}",
                    found.owner_dir.display()
                );
            }
        }
        Ok(Project {
            root,
            root_dir,
            selections,
        })
    }

    pub fn root(&self) -> &Package {
        &self.root
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// The selections applying to this project, inherited ones included.
    pub fn selections(&self) -> Option<&SelectionsFile> {
        self.selections.as_ref().map(|found| &found.file)
    }

    /// Resolve dependencies against the current selections.
    pub async fn resolve(
        &self,
        policy: &UpgradePolicy,
        ctx: &mut ResolveContext<'_>,
    ) -> Result<SelectionsFile, ProjectError> {
        Ok(resolve(&self.root, policy, self.selections(), ctx).await?)
    }

    /// Persist a resolution. The file owned by this project's directory is
    /// rewritten in place (keeping its `inheritable` flag); an inherited
    /// ancestor file is never modified, a fresh file lands in the root
    /// directory instead.
    pub fn write_selections(
        &mut self,
        mut resolved: SelectionsFile,
    ) -> Result<PathBuf, ProjectError> {
        let own_file = self
            .selections
            .as_ref()
            .filter(|found| !found.inherited);
        resolved.inheritable = own_file.map(|found| found.file.inheritable).unwrap_or(false);

        let path = resolved.save(&self.root_dir)?;
        self.selections = Some(FoundSelections {
            file: resolved,
            owner_dir: self.root_dir.clone(),
            inherited: false,
        });
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{PackageManager, SelectedVersion, SELECTIONS_FILE_NAME};
    use fs_err as fs;
    use pretty_assertions::assert_eq;

    fn write_package(dir: &Path, text: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("dub.json"), text).unwrap();
    }

    #[test]
    fn loads_a_directory_project() {
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path(), r#"{"name": "app", "version": "0.1.0"}"#);
        let project = Project::load(dir.path()).unwrap();
        assert_eq!(project.root().name(), "app");
        assert!(project.selections().is_none());
    }

    #[test]
    fn loads_a_single_file_project() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tool.d");
        fs::write(&file, "/+ dub.sdl:\n name \"tool\"\n+/\nvoid main() {}\n").unwrap();
        let project = Project::load(&file).unwrap();
        assert_eq!(project.root().name(), "tool");
    }

    /// Inheritable selections in the root serve a subdirectory project
    /// with rewritten paths; `upgrade --select` writes the subdirectory's
    /// own file and leaves the ancestor untouched.
    #[tokio::test]
    async fn inherited_selections_and_upgrade_write_discipline() {
        let tree = tempfile::tempdir().unwrap();
        let root = tree.path();

        write_package(
            &root.join("pkg1"),
            r#"{"name": "pkg1", "version": "0.1.0"}"#,
        );
        write_package(
            &root.join("pkg2"),
            r#"{"name": "pkg2", "version": "0.1.0", "dependencies": {"pkg1": "*"}}"#,
        );

        let mut ancestor = SelectionsFile {
            inheritable: true,
            ..Default::default()
        };
        ancestor.select("pkg1", SelectedVersion::Path(PathBuf::from("pkg1")));
        ancestor.save(root).unwrap();
        let ancestor_bytes = fs::read(root.join(SELECTIONS_FILE_NAME)).unwrap();

        // loading pkg2 sees pkg1 through the inherited file, path rewritten
        let mut project = Project::load(&root.join("pkg2")).unwrap();
        assert_eq!(
            project.selections().unwrap().get("pkg1"),
            Some(&SelectedVersion::Path(PathBuf::from("../pkg1")))
        );

        // resolve and write: the new file lands in pkg2
        let cache = tempfile::tempdir().unwrap();
        let mut manager = PackageManager::new(cache.path(), vec![]).unwrap();
        let suppliers = vec![];
        let mut ctx = ResolveContext {
            manager: &mut manager,
            suppliers: &suppliers,
            root_dir: project.root_dir().to_path_buf(),
        };
        let resolved = project
            .resolve(&UpgradePolicy::default(), &mut ctx)
            .await
            .unwrap();
        let written = project.write_selections(resolved).unwrap();

        assert_eq!(written, root.join("pkg2").join(SELECTIONS_FILE_NAME));
        assert!(written.is_file());
        // the ancestor file is byte-identical
        assert_eq!(
            fs::read(root.join(SELECTIONS_FILE_NAME)).unwrap(),
            ancestor_bytes
        );
        // the new file is not inheritable by default
        let reloaded = SelectionsFile::load(&written).unwrap();
        assert!(!reloaded.inheritable);
        assert_eq!(
            reloaded.get("pkg1"),
            Some(&SelectedVersion::Path(PathBuf::from("../pkg1")))
        );
    }

    #[test]
    fn own_selections_file_keeps_its_inheritable_flag() {
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path(), r#"{"name": "app"}"#);
        let own = SelectionsFile {
            inheritable: true,
            ..Default::default()
        };
        own.save(dir.path()).unwrap();

        let mut project = Project::load(dir.path()).unwrap();
        let resolved = SelectionsFile::default();
        project.write_selections(resolved).unwrap();

        let reloaded =
            SelectionsFile::load(&dir.path().join(SELECTIONS_FILE_NAME)).unwrap();
        assert!(reloaded.inheritable);
    }
}
