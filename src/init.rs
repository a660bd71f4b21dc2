//! Project scaffolding for the `init` command.
//!
//! Every requested dependency is checked against the supplier chain
//! before anything is written, so a failed `init` leaves no files behind.

use std::path::{Path, PathBuf};

use fs_err as fs;
use thiserror::Error;
use tracing::info;

use crate::recipe::is_valid_name;
use crate::supplier::{select_best_version, PackageSupplier, SupplierError};
use crate::version::{Version, VersionRange};

#[derive(Debug, Error)]
pub enum InitError {
    #[error("invalid package name `{0}`: names use lowercase letters, digits, `-` and `_`")]
    InvalidName(String),

    #[error("{} already contains a package", dir.display())]
    AlreadyExists { dir: PathBuf },

    #[error("dependency `{0}` is not known to any package supplier")]
    UnknownDependency(String),

    #[error(transparent)]
    Supplier(#[from] SupplierError),

    #[error("failed to write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The skeleton flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ProjectTemplate {
    #[default]
    Minimal,
    /// A web application skeleton; implies a `vibe-d` dependency
    #[value(name = "vibe.d")]
    VibeD,
    /// A C library binding skeleton
    Deimos,
}

/// Create a new package in `dir` with the given dependencies.
pub async fn init_project(
    dir: &Path,
    name: &str,
    dependencies: &[String],
    template: ProjectTemplate,
    suppliers: &[Box<dyn PackageSupplier>],
) -> Result<(), InitError> {
    if !is_valid_name(name) {
        return Err(InitError::InvalidName(name.to_string()));
    }
    for candidate in [dir.join("dub.json"), dir.join("dub.sdl")] {
        if candidate.exists() {
            return Err(InitError::AlreadyExists {
                dir: dir.to_path_buf(),
            });
        }
    }

    let mut wanted: Vec<String> = dependencies.to_vec();
    if template == ProjectTemplate::VibeD && !wanted.iter().any(|d| d == "vibe-d") {
        wanted.push("vibe-d".to_string());
    }

    // verify and pin every dependency before creating any file
    let mut resolved: Vec<(String, Version)> = Vec::new();
    for dep in &wanted {
        let version = latest_version(dep, suppliers).await?;
        resolved.push((dep.clone(), version));
    }

    let io = |path: &Path, source: std::io::Error| InitError::Io {
        path: path.to_path_buf(),
        source,
    };
    fs::create_dir_all(dir).map_err(|source| io(dir, source))?;

    let mut recipe = serde_json::Map::new();
    recipe.insert("name".into(), serde_json::json!(name));
    recipe.insert(
        "description".into(),
        serde_json::json!("A minimal D application."),
    );
    recipe.insert("authors".into(), serde_json::json!([] as [&str; 0]));
    if !resolved.is_empty() {
        let mut deps = serde_json::Map::new();
        for (dep, version) in &resolved {
            let requirement = match version {
                Version::Semver(_) => format!("~>{version}"),
                other => other.to_string(),
            };
            deps.insert(dep.clone(), serde_json::json!(requirement));
        }
        recipe.insert("dependencies".into(), serde_json::Value::Object(deps));
    }

    let recipe_path = dir.join("dub.json");
    let mut text = serde_json::to_string_pretty(&serde_json::Value::Object(recipe))
        .expect("recipe values serialize");
    text.push('\n');
    fs::write(&recipe_path, text).map_err(|source| io(&recipe_path, source))?;

    let source_dir = dir.join("source");
    fs::create_dir_all(&source_dir).map_err(|source| io(&source_dir, source))?;
    let app = source_dir.join("app.d");
    fs::write(&app, skeleton_source(template, name)).map_err(|source| io(&app, source))?;

    let gitignore = dir.join(".gitignore");
    fs::write(&gitignore, format!(".dub\n{name}\n{name}.exe\n*.o\n*.obj\n"))
        .map_err(|source| io(&gitignore, source))?;

    info!("created package `{name}` in {}", dir.display());
    Ok(())
}

async fn latest_version(
    name: &str,
    suppliers: &[Box<dyn PackageSupplier>],
) -> Result<Version, InitError> {
    let mut best: Option<Version> = None;
    for supplier in suppliers {
        match supplier.versions(name).await {
            Ok(versions) => {
                if let Some(candidate) =
                    select_best_version(&versions, &VersionRange::Any, false)
                {
                    if best.as_ref().map(|b| candidate > *b).unwrap_or(true) {
                        best = Some(candidate);
                    }
                }
            }
            Err(SupplierError::UnknownPackage(_)) | Err(SupplierError::NotFound { .. }) => {}
            Err(err) => return Err(err.into()),
        }
    }
    best.ok_or_else(|| InitError::UnknownDependency(name.to_string()))
}

fn skeleton_source(template: ProjectTemplate, name: &str) -> String {
    match template {
        ProjectTemplate::Minimal | ProjectTemplate::Deimos => {
            "import std.stdio;\n\nvoid main()\n{\n\twriteln(\"Edit source/app.d to start your project.\");\n}\n"
                .to_string()
        }
        ProjectTemplate::VibeD => format!(
            "import vibe.vibe;\n\nvoid main()\n{{\n\tauto settings = new HTTPServerSettings;\n\tsettings.port = 8080;\n\tlistenHTTP(settings, &handleRequest);\n\trunApplication();\n}}\n\nvoid handleRequest(HTTPServerRequest req, HTTPServerResponse res)\n{{\n\tres.writeBody(\"Hello from {name}!\");\n}}\n",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supplier::FileSystemSupplier;
    use pretty_assertions::assert_eq;
    use std::io::Write as _;
    use zip::write::SimpleFileOptions;

    fn make_archive(dir: &Path, name: &str, version: &str) {
        let file = fs::File::create(dir.join(format!("{name}_{version}.zip"))).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("dub.json", SimpleFileOptions::default())
            .unwrap();
        writer
            .write_all(format!(r#"{{"name": "{name}"}}"#).as_bytes())
            .unwrap();
        writer.finish().unwrap();
    }

    fn suppliers(repo: &Path) -> Vec<Box<dyn PackageSupplier>> {
        vec![Box::new(FileSystemSupplier::new(repo))]
    }

    #[tokio::test]
    async fn scaffolds_with_verified_dependencies() {
        let repo = tempfile::tempdir().unwrap();
        make_archive(repo.path(), "openssl", "1.1.0");
        make_archive(repo.path(), "logger", "2.0.0");
        make_archive(repo.path(), "vibe-d", "0.9.5");

        let tree = tempfile::tempdir().unwrap();
        let pack = tree.path().join("pack");
        init_project(
            &pack,
            "pack",
            &["openssl".to_string(), "logger".to_string()],
            ProjectTemplate::VibeD,
            &suppliers(repo.path()),
        )
        .await
        .unwrap();

        let recipe = crate::recipe::Recipe::load(&pack).unwrap();
        assert_eq!(recipe.name, "pack");
        for dep in ["openssl", "logger", "vibe-d"] {
            assert!(recipe.dependencies.contains_key(dep), "missing {dep}");
        }
        assert!(recipe.dependencies["logger"].matches(&"2.0.0".parse().unwrap()));
        assert!(pack.join("source/app.d").is_file());
    }

    #[tokio::test]
    async fn unknown_dependency_creates_nothing() {
        let repo = tempfile::tempdir().unwrap();
        make_archive(repo.path(), "logger", "2.0.0");

        let tree = tempfile::tempdir().unwrap();
        let pack = tree.path().join("pack");
        let err = init_project(
            &pack,
            "pack",
            &["logger".to_string(), "package_dont_exist".to_string()],
            ProjectTemplate::Minimal,
            &suppliers(repo.path()),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, InitError::UnknownDependency(ref name) if name == "package_dont_exist"));
        assert!(!pack.exists());
    }

    #[tokio::test]
    async fn existing_package_is_not_overwritten() {
        let tree = tempfile::tempdir().unwrap();
        fs::write(tree.path().join("dub.json"), "{}").unwrap();
        let err = init_project(
            tree.path(),
            "pack",
            &[],
            ProjectTemplate::Minimal,
            &[],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, InitError::AlreadyExists { .. }));
    }
}
