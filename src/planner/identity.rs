//! Build identities: the fingerprint that decides artifact reuse.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::platform::BuildPlatform;
use crate::recipe::TargetType;

/// How source freshness enters the identity.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    clap::ValueEnum,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HashPolicy {
    /// Content digests: touching a file without changing it is free
    #[default]
    Hash,
    /// Modification times: cheaper, but timestamp-sensitive
    Time,
}

crate::document::impl_from_document_scalar!(HashPolicy);

/// Everything that goes into an identity, in canonical form. The digest is
/// the Sha256 of this structure's canonical JSON.
#[derive(Debug, Serialize)]
struct IdentityDocument<'a> {
    compiler_binary: &'a str,
    compiler_version: &'a str,
    frontend_version: u32,
    platform: &'a [String],
    architecture: &'a [String],
    target_type: TargetType,
    target_name: &'a str,
    /// `(relative path, stamp)` pairs sorted by path
    sources: &'a [(String, String)],
    /// Merged flags in canonical order
    flags: &'a [String],
    /// Identities of upstream targets whose artifacts feed this one
    upstream: &'a [String],
    policy: HashPolicy,
}

/// The stamp of one source file under the chosen policy: a content digest,
/// or the mtime in nanoseconds since the epoch.
pub fn source_stamp(path: &Path, policy: HashPolicy) -> std::io::Result<String> {
    match policy {
        HashPolicy::Hash => {
            let contents = fs_err::read(path)?;
            let mut hasher = Sha256::new();
            hasher.update(&contents);
            Ok(hex::encode(hasher.finalize()))
        }
        HashPolicy::Time => {
            let mtime = fs_err::metadata(path)?.modified()?;
            let nanos = mtime
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            Ok(format!("mtime:{nanos}"))
        }
    }
}

/// Inputs assembled by the planner for one target.
pub struct IdentityInputs<'a> {
    pub platform: &'a BuildPlatform,
    pub target_type: TargetType,
    pub target_name: &'a str,
    /// Absolute source paths plus the directory they are shown relative to
    pub sources: &'a [PathBuf],
    pub source_root: &'a Path,
    pub flags: Vec<String>,
    pub upstream_identities: Vec<String>,
    pub policy: HashPolicy,
}

/// Compute a target's identity. Source stamps are read here; flag and
/// upstream orders are canonicalized so semantically identical inputs
/// digest identically.
pub fn compute_identity(inputs: &IdentityInputs<'_>) -> std::io::Result<String> {
    let mut sources = Vec::with_capacity(inputs.sources.len());
    for path in inputs.sources {
        let shown = path
            .strip_prefix(inputs.source_root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        sources.push((shown, source_stamp(path, inputs.policy)?));
    }
    sources.sort();

    let mut flags = inputs.flags.clone();
    flags.sort();
    let mut upstream = inputs.upstream_identities.clone();
    upstream.sort();

    let document = IdentityDocument {
        compiler_binary: &inputs.platform.compiler_binary,
        compiler_version: &inputs.platform.compiler_version,
        frontend_version: inputs.platform.frontend_version,
        platform: &inputs.platform.platform,
        architecture: &inputs.platform.architecture,
        target_type: inputs.target_type,
        target_name: inputs.target_name,
        sources: &sources,
        flags: &flags,
        upstream: &upstream,
        policy: inputs.policy,
    };

    let serialized = serde_json::to_vec(&document).expect("identity document serializes");
    let mut hasher = Sha256::new();
    hasher.update(&serialized);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fs_err as fs;
    use pretty_assertions::assert_eq;

    fn platform() -> BuildPlatform {
        BuildPlatform {
            platform: vec!["linux".into(), "posix".into()],
            architecture: vec!["x86_64".into()],
            compiler: "dmd".into(),
            compiler_binary: "dmd".into(),
            frontend_version: 2105,
            compiler_version: "2.105.0".into(),
        }
    }

    fn identity_of(dir: &Path, sources: &[PathBuf], policy: HashPolicy) -> String {
        compute_identity(&IdentityInputs {
            platform: &platform(),
            target_type: TargetType::Executable,
            target_name: "app",
            sources,
            source_root: dir,
            flags: vec!["-w".into(), "-g".into()],
            upstream_identities: vec![],
            policy,
        })
        .unwrap()
    }

    #[test]
    fn hash_policy_ignores_mtime_changes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("app.d");
        fs::write(&file, "void main() {}").unwrap();
        let sources = vec![file.clone()];

        let before = identity_of(dir.path(), &sources, HashPolicy::Hash);
        // push the mtime into the future without touching contents
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(3600);
        let dest = fs::File::options().append(true).open(&file).unwrap();
        dest.into_file().set_modified(later).unwrap();
        let after = identity_of(dir.path(), &sources, HashPolicy::Hash);
        assert_eq!(before, after);

        // content changes do land in the identity
        fs::write(&file, "void main() { }").unwrap();
        let changed = identity_of(dir.path(), &sources, HashPolicy::Hash);
        assert_ne!(before, changed);
    }

    #[test]
    fn time_policy_tracks_mtime_not_content() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("app.d");
        fs::write(&file, "void main() {}").unwrap();
        let sources = vec![file.clone()];

        let before = identity_of(dir.path(), &sources, HashPolicy::Time);
        let unchanged = identity_of(dir.path(), &sources, HashPolicy::Time);
        assert_eq!(before, unchanged);

        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(3600);
        let dest = fs::File::options().append(true).open(&file).unwrap();
        dest.into_file().set_modified(later).unwrap();
        let touched = identity_of(dir.path(), &sources, HashPolicy::Time);
        assert_ne!(before, touched);
    }

    #[test]
    fn flag_order_is_canonicalized() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("app.d");
        fs::write(&file, "void main() {}").unwrap();
        let sources = vec![file];

        let a = compute_identity(&IdentityInputs {
            platform: &platform(),
            target_type: TargetType::Executable,
            target_name: "app",
            sources: &sources,
            source_root: dir.path(),
            flags: vec!["-g".into(), "-w".into()],
            upstream_identities: vec![],
            policy: HashPolicy::Hash,
        })
        .unwrap();
        let b = identity_of(dir.path(), &sources, HashPolicy::Hash);
        assert_eq!(a, b);
    }

    #[test]
    fn upstream_identities_feed_the_digest() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("app.d");
        fs::write(&file, "void main() {}").unwrap();
        let sources = vec![file];

        let solo = identity_of(dir.path(), &sources, HashPolicy::Hash);
        let linked = compute_identity(&IdentityInputs {
            platform: &platform(),
            target_type: TargetType::Executable,
            target_name: "app",
            sources: &sources,
            source_root: dir.path(),
            flags: vec!["-w".into(), "-g".into()],
            upstream_identities: vec!["abc123".into()],
            policy: HashPolicy::Hash,
        })
        .unwrap();
        assert_ne!(solo, linked);
    }

    #[test]
    fn policies_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("app.d");
        fs::write(&file, "void main() {}").unwrap();
        let sources = vec![file];
        assert_ne!(
            identity_of(dir.path(), &sources, HashPolicy::Hash),
            identity_of(dir.path(), &sources, HashPolicy::Time)
        );
    }
}
