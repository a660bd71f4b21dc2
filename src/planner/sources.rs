//! Source file collection for one package.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSetBuilder};
use walkdir::WalkDir;

use crate::recipe::BuildSettings;

/// Directories probed when a recipe declares no source paths.
const DEFAULT_SOURCE_DIRS: &[&str] = &["source", "src"];

/// Collect the package's source files: declared source paths walked
/// recursively for `.d`/`.di` files, plus explicit source files, minus the
/// excluded globs, plus the main source file. Paths are absolute and
/// sorted for determinism.
pub fn collect_sources(
    package_root: &Path,
    settings: &BuildSettings,
) -> std::io::Result<Vec<PathBuf>> {
    let mut out: BTreeSet<PathBuf> = BTreeSet::new();

    let source_dirs: Vec<PathBuf> = if settings.source_paths.is_empty() {
        DEFAULT_SOURCE_DIRS
            .iter()
            .map(|dir| package_root.join(dir))
            .filter(|dir| dir.is_dir())
            .collect()
    } else {
        settings
            .source_paths
            .iter()
            .map(|dir| package_root.join(dir))
            .collect()
    };

    let exclusions = build_exclusions(&settings.excluded_source_files)?;

    for dir in source_dirs {
        if !dir.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::other)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("d") | Some("di")
            ) {
                continue;
            }
            if excluded(&exclusions, package_root, path) {
                continue;
            }
            out.insert(path.to_path_buf());
        }
    }

    for file in &settings.source_files {
        let path = package_root.join(file);
        if !excluded(&exclusions, package_root, &path) {
            out.insert(path);
        }
    }

    if let Some(main) = &settings.main_source_file {
        let path = package_root.join(main);
        if path.is_file() && !excluded(&exclusions, package_root, &path) {
            out.insert(path);
        }
    }

    Ok(out.into_iter().collect())
}

fn build_exclusions(patterns: &[String]) -> std::io::Result<Option<globset::GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(std::io::Error::other)?;
        builder.add(glob);
    }
    Ok(Some(builder.build().map_err(std::io::Error::other)?))
}

fn excluded(exclusions: &Option<globset::GlobSet>, root: &Path, path: &Path) -> bool {
    let Some(set) = exclusions else {
        return false;
    };
    let relative = path.strip_prefix(root).unwrap_or(path);
    set.is_match(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fs_err as fs;
    use pretty_assertions::assert_eq;

    fn write(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "module m;").unwrap();
    }

    #[test]
    fn default_source_directory_is_walked() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "source/app.d");
        write(dir.path(), "source/sub/extra.d");
        write(dir.path(), "source/readme.txt");

        let sources = collect_sources(dir.path(), &BuildSettings::default()).unwrap();
        let names: Vec<String> = sources
            .iter()
            .map(|p| {
                p.strip_prefix(dir.path())
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        assert_eq!(names, vec!["source/app.d", "source/sub/extra.d"]);
    }

    #[test]
    fn declared_source_paths_replace_the_default() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "source/ignored.d");
        write(dir.path(), "lib/kept.d");

        let settings = BuildSettings {
            source_paths: vec!["lib".into()],
            ..BuildSettings::default()
        };
        let sources = collect_sources(dir.path(), &settings).unwrap();
        assert_eq!(sources.len(), 1);
        assert!(sources[0].ends_with("lib/kept.d"));
    }

    #[test]
    fn excluded_globs_drop_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "source/app.d");
        write(dir.path(), "source/gen/generated.d");

        let settings = BuildSettings {
            excluded_source_files: vec!["source/gen/*.d".into()],
            ..BuildSettings::default()
        };
        let sources = collect_sources(dir.path(), &settings).unwrap();
        assert_eq!(sources.len(), 1);
        assert!(sources[0].ends_with("source/app.d"));
    }

    #[test]
    fn explicit_files_and_main_source_are_included() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "extras/special.d");
        write(dir.path(), "main.d");

        let settings = BuildSettings {
            source_files: vec!["extras/special.d".into()],
            main_source_file: Some("main.d".into()),
            ..BuildSettings::default()
        };
        let sources = collect_sources(dir.path(), &settings).unwrap();
        assert_eq!(sources.len(), 2);
    }
}
