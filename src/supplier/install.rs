//! Archive validation and two-phase installation into the package cache.

use std::io::Read;
use std::path::{Component, Path, PathBuf};

use fs_err as fs;
use fs_err::File;
use tracing::debug;
use zip::ZipArchive;

use super::SupplierError;

/// Open the archive and walk its central directory. A failure here marks
/// the download as corrupt, which the fetch loop retries.
pub fn validate_archive(path: &Path, name: &str) -> Result<(), SupplierError> {
    let corrupt = |reason: String| SupplierError::CorruptArchive {
        name: name.to_string(),
        reason,
    };
    let file = File::open(path).map_err(|source| SupplierError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut archive = ZipArchive::new(file).map_err(|err| corrupt(err.to_string()))?;
    if archive.is_empty() {
        return Err(corrupt("archive contains no entries".to_string()));
    }
    for index in 0..archive.len() {
        archive
            .by_index(index)
            .map_err(|err| corrupt(err.to_string()))?;
    }
    Ok(())
}

/// Extract `archive` into `dest_dir` atomically: unpack into a temporary
/// sibling, then rename into place. An archive whose entries share a single
/// top-level directory is stripped of it, so the package recipe lands at
/// the destination root.
pub fn install_archive(archive_path: &Path, dest_dir: &Path, name: &str) -> Result<(), SupplierError> {
    let corrupt = |reason: String| SupplierError::CorruptArchive {
        name: name.to_string(),
        reason,
    };
    let io = |path: &Path, source: std::io::Error| SupplierError::Io {
        path: path.to_path_buf(),
        source,
    };

    let parent = dest_dir
        .parent()
        .ok_or_else(|| corrupt("destination has no parent directory".to_string()))?;
    fs::create_dir_all(parent).map_err(|source| io(parent, source))?;

    let staging = tempfile::tempdir_in(parent).map_err(|source| io(parent, source))?;

    let file = File::open(archive_path).map_err(|source| io(archive_path, source))?;
    let mut archive = ZipArchive::new(file).map_err(|err| corrupt(err.to_string()))?;

    let strip = common_root(&mut archive).map_err(|err| corrupt(err.to_string()))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| corrupt(err.to_string()))?;
        let Some(raw) = entry.enclosed_name() else {
            return Err(corrupt(format!("unsafe entry path `{}`", entry.name())));
        };
        let relative = match &strip {
            Some(root) => match raw.strip_prefix(root) {
                Ok(stripped) => stripped.to_path_buf(),
                Err(_) => raw.clone(),
            },
            None => raw.clone(),
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let out_path = staging.path().join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|source| io(&out_path, source))?;
            continue;
        }
        if let Some(dir) = out_path.parent() {
            fs::create_dir_all(dir).map_err(|source| io(dir, source))?;
        }
        let mut contents = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut contents)
            .map_err(|err| corrupt(format!("entry `{}`: {err}", relative.display())))?;
        fs::write(&out_path, contents).map_err(|source| io(&out_path, source))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode));
        }
    }

    // atomic swap into the final location
    if dest_dir.exists() {
        fs::remove_dir_all(dest_dir).map_err(|source| io(dest_dir, source))?;
    }
    let staged = staging.keep();
    fs::rename(&staged, dest_dir).map_err(|source| io(dest_dir, source))?;
    debug!("installed `{name}` into {}", dest_dir.display());
    Ok(())
}

/// The single top-level directory shared by every entry, if there is one.
fn common_root<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<Option<PathBuf>, zip::result::ZipError> {
    let mut root: Option<PathBuf> = None;
    for index in 0..archive.len() {
        let entry = archive.by_index(index)?;
        let Some(path) = entry.enclosed_name() else {
            continue;
        };
        let Some(Component::Normal(first)) = path.components().next() else {
            return Ok(None);
        };
        let first = PathBuf::from(first);
        match &root {
            None => root = Some(first),
            Some(existing) if *existing == first => {}
            Some(_) => return Ok(None),
        }
    }
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn make_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, contents) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn valid_archive_passes_validation() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("pkg.zip");
        make_zip(&zip_path, &[("pkg-1.0.0/dub.json", r#"{"name": "pkg"}"#)]);
        validate_archive(&zip_path, "pkg").unwrap();
    }

    #[test]
    fn truncated_archive_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("pkg.zip");
        fs::write(&zip_path, b"PK\x03\x04 definitely not a zip").unwrap();
        let err = validate_archive(&zip_path, "pkg").unwrap_err();
        assert!(matches!(err, SupplierError::CorruptArchive { .. }));
    }

    #[test]
    fn install_strips_the_common_root() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("pkg.zip");
        make_zip(
            &zip_path,
            &[
                ("pkg-1.0.0/dub.json", r#"{"name": "pkg"}"#),
                ("pkg-1.0.0/source/app.d", "void main() {}"),
            ],
        );
        let dest = dir.path().join("cache/pkg/1.0.0/pkg");
        install_archive(&zip_path, &dest, "pkg").unwrap();
        assert!(dest.join("dub.json").is_file());
        assert_eq!(
            fs::read_to_string(dest.join("source/app.d")).unwrap(),
            "void main() {}"
        );
    }

    #[test]
    fn install_without_common_root_keeps_layout() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("pkg.zip");
        make_zip(
            &zip_path,
            &[("dub.json", r#"{"name": "pkg"}"#), ("source/app.d", "x")],
        );
        let dest = dir.path().join("pkg");
        install_archive(&zip_path, &dest, "pkg").unwrap();
        assert!(dest.join("dub.json").is_file());
    }

    #[test]
    fn install_replaces_an_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("pkg.zip");
        make_zip(&zip_path, &[("dub.json", r#"{"name": "pkg"}"#)]);
        let dest = dir.path().join("pkg");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("stale.txt"), "old").unwrap();

        install_archive(&zip_path, &dest, "pkg").unwrap();
        assert!(dest.join("dub.json").is_file());
        assert!(!dest.join("stale.txt").exists());
    }
}
