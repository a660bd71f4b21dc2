//! The selections file: the resolver's pinned versions on disk.
//!
//! `dub.selections.json` lives next to the root recipe. Loading from a
//! directory walks upward to the nearest file; a file marked `inheritable`
//! serves child directories with its `path` locators rewritten into the
//! child's view, while a non-inheritable file only serves its own directory
//! and breaks the chain for anything below it.

use std::path::{Path, PathBuf};

use fs_err as fs;
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::version::Version;

pub const SELECTIONS_FILE_NAME: &str = "dub.selections.json";
pub const SELECTIONS_FILE_VERSION: u64 = 1;

#[derive(Debug, Error)]
pub enum SelectionsError {
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not a valid selections file: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },

    #[error("unsupported selections fileVersion {found} in {}", path.display())]
    UnsupportedVersion { path: PathBuf, found: u64 },
}

/// The concrete locator selected for one dependency.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectedVersion {
    Version(Version),
    Path(PathBuf),
    Repository { url: String, reference: String },
}

impl SelectedVersion {
    fn to_json(&self) -> Value {
        match self {
            SelectedVersion::Version(version) => json!(version.to_string()),
            SelectedVersion::Path(path) => json!({ "path": path_text(path) }),
            SelectedVersion::Repository { url, reference } => {
                json!({ "repository": url, "version": reference })
            }
        }
    }

    fn from_json(path: &Path, name: &str, value: &Value) -> Result<Self, SelectionsError> {
        let invalid = |reason: String| SelectionsError::Invalid {
            path: path.to_path_buf(),
            reason,
        };
        match value {
            Value::String(text) => text
                .parse()
                .map(SelectedVersion::Version)
                .map_err(|err| invalid(format!("entry `{name}`: {err}"))),
            Value::Object(fields) => {
                if let Some(dir) = fields.get("path") {
                    let dir = dir
                        .as_str()
                        .ok_or_else(|| invalid(format!("entry `{name}`: `path` must be a string")))?;
                    return Ok(SelectedVersion::Path(PathBuf::from(dir)));
                }
                if let Some(url) = fields.get("repository") {
                    let url = url.as_str().ok_or_else(|| {
                        invalid(format!("entry `{name}`: `repository` must be a string"))
                    })?;
                    let reference = fields
                        .get("version")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            invalid(format!(
                                "entry `{name}`: a repository selection needs a `version`"
                            ))
                        })?;
                    return Ok(SelectedVersion::Repository {
                        url: url.to_string(),
                        reference: reference.to_string(),
                    });
                }
                Err(invalid(format!(
                    "entry `{name}`: expected `path` or `repository`"
                )))
            }
            _ => Err(invalid(format!(
                "entry `{name}`: expected a version string or an object"
            ))),
        }
    }
}

/// Forward slashes on every platform; the file is shared through VCS.
fn path_text(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// The parsed file contents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionsFile {
    pub inheritable: bool,
    pub versions: IndexMap<String, SelectedVersion>,
}

impl SelectionsFile {
    pub fn get(&self, name: &str) -> Option<&SelectedVersion> {
        self.versions.get(name)
    }

    pub fn select(&mut self, name: impl Into<String>, selected: SelectedVersion) {
        self.versions.insert(name.into(), selected);
    }

    /// Read a selections file from disk.
    pub fn load(path: &Path) -> Result<SelectionsFile, SelectionsError> {
        let text = fs::read_to_string(path).map_err(|source| SelectionsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value =
            serde_json::from_str(&text).map_err(|err| SelectionsError::Invalid {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;
        let object = value.as_object().ok_or_else(|| SelectionsError::Invalid {
            path: path.to_path_buf(),
            reason: "expected a JSON object".to_string(),
        })?;

        let file_version = object
            .get("fileVersion")
            .and_then(Value::as_u64)
            .ok_or_else(|| SelectionsError::Invalid {
                path: path.to_path_buf(),
                reason: "missing `fileVersion`".to_string(),
            })?;
        if file_version != SELECTIONS_FILE_VERSION {
            return Err(SelectionsError::UnsupportedVersion {
                path: path.to_path_buf(),
                found: file_version,
            });
        }

        let inheritable = object
            .get("inheritable")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut versions = IndexMap::new();
        if let Some(Value::Object(entries)) = object.get("versions") {
            for (name, value) in entries {
                versions.insert(
                    name.clone(),
                    SelectedVersion::from_json(path, name, value)?,
                );
            }
        }

        Ok(SelectionsFile {
            inheritable,
            versions,
        })
    }

    /// Write the file with entries sorted by name, so identical selections
    /// produce identical bytes.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, SelectionsError> {
        let path = dir.join(SELECTIONS_FILE_NAME);
        let mut object = Map::new();
        object.insert("fileVersion".into(), json!(SELECTIONS_FILE_VERSION));
        if self.inheritable {
            object.insert("inheritable".into(), json!(true));
        }

        let mut names: Vec<&String> = self.versions.keys().collect();
        names.sort();
        let mut versions = Map::new();
        for name in names {
            versions.insert(name.clone(), self.versions[name].to_json());
        }
        object.insert("versions".into(), Value::Object(versions));

        let mut text = serde_json::to_string_pretty(&Value::Object(object)).map_err(|err| {
            SelectionsError::Invalid {
                path: path.clone(),
                reason: err.to_string(),
            }
        })?;
        text.push('\n');
        fs::write(&path, text).map_err(|source| SelectionsError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// A selections file located for a directory, possibly inherited from an
/// ancestor.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundSelections {
    pub file: SelectionsFile,
    /// The directory owning the file on disk
    pub owner_dir: PathBuf,
    /// True when the file was inherited from an ancestor of the queried
    /// directory
    pub inherited: bool,
}

/// Locate the selections applying to `dir`.
///
/// The walk stops at the first file found. A file in `dir` itself always
/// applies; a file in an ancestor applies only when marked `inheritable`,
/// in which case its `path` locators are rewritten relative to `dir`. The
/// on-disk file is never modified.
pub fn find_selections(dir: &Path) -> Result<Option<FoundSelections>, SelectionsError> {
    let mut current = Some(dir);
    while let Some(candidate_dir) = current {
        let candidate = candidate_dir.join(SELECTIONS_FILE_NAME);
        if candidate.is_file() {
            let mut file = SelectionsFile::load(&candidate)?;
            let inherited = candidate_dir != dir;
            if inherited {
                if !file.inheritable {
                    debug!(
                        "selections at {} are not inheritable; ignoring",
                        candidate.display()
                    );
                    return Ok(None);
                }
                rewrite_paths(&mut file, candidate_dir, dir);
            }
            return Ok(Some(FoundSelections {
                file,
                owner_dir: candidate_dir.to_path_buf(),
                inherited,
            }));
        }
        current = candidate_dir.parent();
    }
    Ok(None)
}

/// Rewrite relative `path` locators from the owner directory's view into
/// the querying directory's view.
fn rewrite_paths(file: &mut SelectionsFile, owner_dir: &Path, view_dir: &Path) {
    for selected in file.versions.values_mut() {
        if let SelectedVersion::Path(path) = selected {
            if path.is_absolute() {
                continue;
            }
            let absolute = owner_dir.join(&*path);
            if let Some(relative) = pathdiff::diff_paths(&absolute, view_dir) {
                *path = relative;
            } else {
                *path = absolute;
            }
        }
    }
}
