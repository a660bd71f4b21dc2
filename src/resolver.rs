//! The dependency resolver: from a root package to a self-consistent set
//! of selections.
//!
//! Resolution walks the dependency tree breadth-first, keeping every
//! constraint it has seen per package name. An existing selection is kept
//! unless the policy re-selects; a new selection takes the highest version
//! the supplier chain and the local cache offer that satisfies every
//! constraint recorded so far. Iteration is sorted by name throughout, so
//! identical inputs produce identical selections.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info};

use crate::dependency::{Dependency, Locator};
use crate::package::{
    Package, PackageError, PackageManager, SelectedVersion, SelectionsFile,
};
use crate::recipe::{split_identity, RecipeError};
use crate::supplier::{install_archive, PackageSupplier, SupplierError};
use crate::version::Version;

/// What the caller allows resolution to change.
#[derive(Debug, Clone, Copy)]
pub struct UpgradePolicy {
    /// Select dependencies that have no existing selection
    pub select_missing: bool,
    /// Drop existing selections and re-select everything
    pub upgrade_all: bool,
    /// Consider pre-release versions
    pub pre_releases: bool,
}

impl Default for UpgradePolicy {
    fn default() -> Self {
        UpgradePolicy {
            select_missing: true,
            upgrade_all: false,
            pre_releases: false,
        }
    }
}

/// One recorded requirement on a package name.
#[derive(Debug, Clone)]
struct Constraint {
    /// Qualified name of the depending package
    from: String,
    dep: Dependency,
}

impl Constraint {
    fn describe(&self, name: &str) -> String {
        format!("{} depends on {} {}", self.from, name, self.dep)
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(
        "unresolvable dependency `{name}`:\n  {}",
        contributors.join(";\n  ")
    )]
    Conflict {
        name: String,
        contributors: Vec<String>,
    },

    #[error("dependency cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("`{name}` has no selection and the policy does not allow selecting it")]
    MissingSelection { name: String },

    #[error("repository-pinned dependency `{name}` is not available locally")]
    RepositoryUnavailable { name: String },

    #[error(transparent)]
    Supplier(#[from] SupplierError),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Recipe(#[from] RecipeError),
}

/// Everything resolution needs besides the root.
pub struct ResolveContext<'a> {
    pub manager: &'a mut PackageManager,
    pub suppliers: &'a [Box<dyn PackageSupplier>],
    /// Directory path dependencies resolve against
    pub root_dir: PathBuf,
}

/// Resolve the root package's transitive dependencies into selections.
pub async fn resolve(
    root: &Package,
    policy: &UpgradePolicy,
    existing: Option<&SelectionsFile>,
    ctx: &mut ResolveContext<'_>,
) -> Result<SelectionsFile, ResolveError> {
    let mut resolution = Resolution {
        policy: *policy,
        existing,
        constraints: BTreeMap::new(),
        selected: SelectionsFile::default(),
        selected_versions: BTreeMap::new(),
        visited: BTreeSet::new(),
        root_name: root.base_name().to_string(),
    };

    let mut queue: VecDeque<(Package, Vec<String>)> = VecDeque::new();
    queue.push_back((root.clone(), vec![root.base_name().to_string()]));

    while let Some((package, chain)) = queue.pop_front() {
        let deps = collect_dependencies(&package);
        for (dep_name, dep) in deps {
            if !dep.is_effective() {
                continue;
            }
            let (base, _sub) = split_identity(&dep_name)?;

            // a subpackage depending on its enclosing package (or the other
            // way around) stays within the root; nothing to select
            if base == resolution.root_name {
                enqueue_root_relative(root, &dep_name, &chain, &mut queue, &mut resolution)?;
                continue;
            }

            if chain.iter().any(|ancestor| ancestor == base) {
                let mut path = chain.clone();
                path.push(base.to_string());
                return Err(ResolveError::Cycle { path });
            }

            resolution
                .constraints
                .entry(base.to_string())
                .or_default()
                .push(Constraint {
                    from: package.name().to_string(),
                    dep: dep.clone(),
                });

            let version = ensure_selected(base, &dep, &mut resolution, ctx).await?;

            // traverse the exact package the dependency names, so a
            // subpackage's own dependencies are honored
            let target = if dep_name == base {
                base.to_string()
            } else {
                dep_name.clone()
            };
            let Some(next) = ctx.manager.get_package(&target, &version) else {
                return Err(ResolveError::Package(PackageError::NotCached {
                    name: target,
                    version,
                }));
            };
            let key = format!("{}@{}", next.name(), next.version());
            if resolution.visited.insert(key) {
                let mut next_chain = chain.clone();
                next_chain.push(base.to_string());
                queue.push_back((next.clone(), next_chain));
            }
        }
    }

    info!(
        selections = resolution.selected.versions.len(),
        "resolution complete"
    );
    Ok(resolution.selected)
}

struct Resolution<'a> {
    policy: UpgradePolicy,
    existing: Option<&'a SelectionsFile>,
    constraints: BTreeMap<String, Vec<Constraint>>,
    selected: SelectionsFile,
    selected_versions: BTreeMap<String, Version>,
    visited: BTreeSet<String>,
    root_name: String,
}

/// Global dependencies plus every configuration's, sorted by name. The
/// union over configurations keeps resolution platform-independent.
fn collect_dependencies(package: &Package) -> Vec<(String, Dependency)> {
    let mut out: Vec<(String, Dependency)> = Vec::new();
    let recipe = package.recipe();
    for (name, dep) in &recipe.dependencies {
        out.push((name.clone(), dep.clone()));
    }
    for config in &recipe.configurations {
        for (name, dep) in &config.dependencies {
            out.push((name.clone(), dep.clone()));
        }
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

/// Dependencies that stay inside the root package (subpackages of the
/// root) are traversed without creating a selection.
fn enqueue_root_relative(
    root: &Package,
    dep_name: &str,
    chain: &[String],
    queue: &mut VecDeque<(Package, Vec<String>)>,
    resolution: &mut Resolution<'_>,
) -> Result<(), ResolveError> {
    let (_, sub) = split_identity(dep_name)?;
    let target = match sub {
        Some(sub) => {
            let recipe = root.recipe().subpackage(sub, root.path())?;
            Package::from_parts(
                format!("{}:{}", root.base_name(), sub),
                root.version().clone(),
                recipe,
                root.path().to_path_buf(),
            )
        }
        None => root.clone(),
    };
    let key = format!("{}@{}", target.name(), target.version());
    if resolution.visited.insert(key) {
        let mut next_chain = chain.to_vec();
        next_chain.push(target.name().to_string());
        queue.push_back((target, next_chain));
    }
    Ok(())
}

/// Make sure `base` has a selection compatible with every constraint, and
/// that the selected package is materialized locally. Returns the concrete
/// version of the materialized package.
async fn ensure_selected(
    base: &str,
    dep: &Dependency,
    resolution: &mut Resolution<'_>,
    ctx: &mut ResolveContext<'_>,
) -> Result<Version, ResolveError> {
    // already selected in this run: just check the new constraint
    if let Some(version) = resolution.selected_versions.get(base) {
        if !dep.matches(version) {
            return Err(conflict(base, resolution));
        }
        return Ok(version.clone());
    }

    // an existing on-disk selection is kept unless the policy re-selects
    let kept = if resolution.policy.upgrade_all {
        None
    } else {
        resolution.existing.and_then(|file| file.get(base)).cloned()
    };

    let selection = match kept {
        Some(selection) => {
            // reject an incompatible pinned version before fetching it
            if let SelectedVersion::Version(version) = &selection {
                let all_ok = resolution.constraints[base]
                    .iter()
                    .all(|c| c.dep.matches(version));
                if !all_ok {
                    return Err(conflict(base, resolution));
                }
            }
            selection
        }
        None => {
            if !resolution.policy.select_missing && !resolution.policy.upgrade_all {
                return Err(ResolveError::MissingSelection {
                    name: base.to_string(),
                });
            }
            new_selection(base, dep, resolution, ctx).await?
        }
    };

    let version = materialize(base, &selection, resolution, ctx).await?;

    // every constraint recorded so far must accept the materialized version
    let all_ok = resolution.constraints[base]
        .iter()
        .all(|c| c.dep.matches(&version));
    if !all_ok {
        return Err(conflict(base, resolution));
    }

    resolution.selected.select(base, selection);
    resolution
        .selected_versions
        .insert(base.to_string(), version.clone());
    Ok(version)
}

fn conflict(base: &str, resolution: &Resolution<'_>) -> ResolveError {
    let contributors = resolution.constraints[base]
        .iter()
        .map(|c| c.describe(base))
        .collect();
    ResolveError::Conflict {
        name: base.to_string(),
        contributors,
    }
}

/// Pick a fresh selection for `base`.
async fn new_selection(
    base: &str,
    dep: &Dependency,
    resolution: &Resolution<'_>,
    ctx: &mut ResolveContext<'_>,
) -> Result<SelectedVersion, ResolveError> {
    match &dep.locator {
        // explicit locators supersede any discovered version
        Locator::Path { path, .. } => Ok(SelectedVersion::Path(path.clone())),
        Locator::Repository { url, reference } => Ok(SelectedVersion::Repository {
            url: url.clone(),
            reference: reference.clone(),
        }),
        Locator::Range(_) => {
            let version = choose_version(base, resolution, ctx).await?;
            Ok(SelectedVersion::Version(version))
        }
    }
}

/// The highest version offered by the local cache or any supplier that
/// satisfies every recorded constraint on `base`.
async fn choose_version(
    base: &str,
    resolution: &Resolution<'_>,
    ctx: &ResolveContext<'_>,
) -> Result<Version, ResolveError> {
    let mut pool = ctx.manager.known_versions(base);
    let mut known_anywhere = !pool.is_empty();
    for supplier in ctx.suppliers {
        match supplier.versions(base).await {
            Ok(versions) => {
                known_anywhere = true;
                pool.extend(versions);
            }
            Err(SupplierError::UnknownPackage(_)) | Err(SupplierError::NotFound { .. }) => {}
            Err(err) => return Err(err.into()),
        }
    }
    if !known_anywhere {
        return Err(ResolveError::Supplier(SupplierError::UnknownPackage(
            base.to_string(),
        )));
    }
    pool.sort();
    pool.dedup();

    let constraints = &resolution.constraints[base];
    let matching: Vec<Version> = pool
        .into_iter()
        .filter(|v| constraints.iter().all(|c| c.dep.matches(v)))
        .collect();
    if matching.is_empty() {
        return Err(conflict(base, resolution));
    }

    let releases: Vec<&Version> = matching.iter().filter(|v| !v.is_prerelease()).collect();
    let chosen = if resolution.policy.pre_releases || releases.is_empty() {
        matching.iter().max().cloned()
    } else {
        releases.into_iter().max().cloned()
    };
    Ok(chosen.expect("matching is non-empty"))
}

/// Make the selected package available in the package manager, fetching
/// from the supplier chain when the cache misses. Returns the package's
/// concrete version.
async fn materialize(
    base: &str,
    selection: &SelectedVersion,
    resolution: &Resolution<'_>,
    ctx: &mut ResolveContext<'_>,
) -> Result<Version, ResolveError> {
    match selection {
        SelectedVersion::Version(version) => {
            if ctx.manager.get_package(base, version).is_some() {
                return Ok(version.clone());
            }
            fetch_into_cache(base, version, resolution.policy.pre_releases, ctx).await?;
            Ok(version.clone())
        }
        SelectedVersion::Path(path) => {
            let dir = if path.is_absolute() {
                path.clone()
            } else {
                ctx.root_dir.join(path)
            };
            let package = ctx.manager.register_dir(&dir, None)?;
            Ok(package.version().clone())
        }
        SelectedVersion::Repository { .. } => {
            // a repository checkout must already be present locally
            if let Some(package) = ctx
                .manager
                .packages()
                .iter()
                .find(|p| p.name() == base)
            {
                return Ok(package.version().clone());
            }
            Err(ResolveError::RepositoryUnavailable {
                name: base.to_string(),
            })
        }
    }
}

/// Download `base` at exactly `version` through the supplier chain and
/// install it into the cache.
pub async fn fetch_into_cache(
    base: &str,
    version: &Version,
    pre_releases: bool,
    ctx: &mut ResolveContext<'_>,
) -> Result<(), ResolveError> {
    let exact = Dependency::from_range(crate::version::VersionRange::Exact(version.clone()));
    let staging = tempfile::Builder::new()
        .prefix("drover-fetch")
        .suffix(".zip")
        .tempfile()
        .map_err(|source| {
            ResolveError::Package(PackageError::Io {
                path: ctx.manager.cache_root().to_path_buf(),
                source,
            })
        })?;

    let mut last_error: Option<SupplierError> = None;
    for supplier in ctx.suppliers {
        match supplier
            .fetch(base, &exact, pre_releases, staging.path())
            .await
        {
            Ok(fetched) => {
                debug!(
                    "fetched {base} {fetched} from {}",
                    supplier.description()
                );
                let dest = ctx.manager.cache_path(base, version);
                install_archive(staging.path(), &dest, base)?;
                ctx.manager.register_dir(&dest, Some(version.clone()))?;
                return Ok(());
            }
            Err(SupplierError::UnknownPackage(_))
            | Err(SupplierError::NotFound { .. })
            | Err(SupplierError::NoMatchingVersion { .. }) => continue,
            Err(err) => last_error = Some(err),
        }
    }
    Err(ResolveError::Supplier(last_error.unwrap_or_else(|| {
        SupplierError::UnknownPackage(base.to_string())
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supplier::FileSystemSupplier;
    use fs_err as fs;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use std::path::Path;
    use zip::write::SimpleFileOptions;

    fn make_archive(dir: &Path, name: &str, version: &str, recipe: &str) {
        let file = fs::File::create(dir.join(format!("{name}_{version}.zip"))).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("dub.json", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(recipe.as_bytes()).unwrap();
        writer.finish().unwrap();
    }

    fn write_package(dir: &Path, text: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("dub.json"), text).unwrap();
    }

    struct Fixture {
        _cache: tempfile::TempDir,
        _repo: tempfile::TempDir,
        root_dir: tempfile::TempDir,
        manager: PackageManager,
        suppliers: Vec<Box<dyn PackageSupplier>>,
    }

    fn fixture(archives: &[(&str, &str, &str)], root_recipe: &str) -> (Fixture, Package) {
        let cache = tempfile::tempdir().unwrap();
        let repo = tempfile::tempdir().unwrap();
        for (name, version, recipe) in archives {
            make_archive(repo.path(), name, version, recipe);
        }
        let root_dir = tempfile::tempdir().unwrap();
        write_package(root_dir.path(), root_recipe);

        let manager = PackageManager::new(cache.path(), vec![]).unwrap();
        let suppliers: Vec<Box<dyn PackageSupplier>> =
            vec![Box::new(FileSystemSupplier::new(repo.path()))];
        let root = Package::load(root_dir.path(), None).unwrap();
        (
            Fixture {
                _cache: cache,
                _repo: repo,
                root_dir,
                manager,
                suppliers,
            },
            root,
        )
    }

    async fn run(
        fixture: &mut Fixture,
        root: &Package,
        policy: &UpgradePolicy,
        existing: Option<&SelectionsFile>,
    ) -> Result<SelectionsFile, ResolveError> {
        let mut ctx = ResolveContext {
            manager: &mut fixture.manager,
            suppliers: &fixture.suppliers,
            root_dir: fixture.root_dir.path().to_path_buf(),
        };
        resolve(root, policy, existing, &mut ctx).await
    }

    #[tokio::test]
    async fn selects_highest_matching_versions_transitively() {
        let (mut fx, root) = fixture(
            &[
                ("liba", "1.0.0", r#"{"name": "liba", "version": "1.0.0", "dependencies": {"libb": "~>2.0"}}"#),
                ("liba", "1.2.0", r#"{"name": "liba", "version": "1.2.0", "dependencies": {"libb": "~>2.0"}}"#),
                ("libb", "2.0.0", r#"{"name": "libb", "version": "2.0.0"}"#),
                ("libb", "2.3.0", r#"{"name": "libb", "version": "2.3.0"}"#),
            ],
            r#"{"name": "root", "version": "0.1.0", "dependencies": {"liba": "~>1.0"}}"#,
        );

        let selections = run(&mut fx, &root, &UpgradePolicy::default(), None)
            .await
            .unwrap();
        assert_eq!(
            selections.get("liba"),
            Some(&SelectedVersion::Version("1.2.0".parse().unwrap()))
        );
        assert_eq!(
            selections.get("libb"),
            Some(&SelectedVersion::Version("2.3.0".parse().unwrap()))
        );
    }

    #[tokio::test]
    async fn resolution_is_deterministic() {
        let archives = [
            ("liba", "1.0.0", r#"{"name": "liba", "version": "1.0.0"}"#),
            ("libb", "2.0.0", r#"{"name": "libb", "version": "2.0.0"}"#),
        ];
        let root_recipe =
            r#"{"name": "root", "dependencies": {"libb": "*", "liba": "~>1.0"}}"#;

        let (mut fx1, root1) = fixture(&archives, root_recipe);
        let (mut fx2, root2) = fixture(&archives, root_recipe);
        let a = run(&mut fx1, &root1, &UpgradePolicy::default(), None)
            .await
            .unwrap();
        let b = run(&mut fx2, &root2, &UpgradePolicy::default(), None)
            .await
            .unwrap();

        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let path_a = a.save(dir_a.path()).unwrap();
        let path_b = b.save(dir_b.path()).unwrap();
        assert_eq!(fs::read(path_a).unwrap(), fs::read(path_b).unwrap());
    }

    #[tokio::test]
    async fn conflicting_constraints_report_both_contributors() {
        let (mut fx, root) = fixture(
            &[
                ("liba", "1.0.0", r#"{"name": "liba", "version": "1.0.0", "dependencies": {"libx": "~>1.0"}}"#),
                ("libb", "1.0.0", r#"{"name": "libb", "version": "1.0.0", "dependencies": {"libx": "~>2.0"}}"#),
                ("libx", "1.0.0", r#"{"name": "libx", "version": "1.0.0"}"#),
                ("libx", "2.0.0", r#"{"name": "libx", "version": "2.0.0"}"#),
            ],
            r#"{"name": "root", "dependencies": {"liba": "*", "libb": "*"}}"#,
        );

        let err = run(&mut fx, &root, &UpgradePolicy::default(), None)
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("liba depends on libx"), "{message}");
        assert!(message.contains("libb depends on libx"), "{message}");
    }

    #[tokio::test]
    async fn existing_selections_are_kept_unless_upgrading() {
        let (mut fx, root) = fixture(
            &[
                ("liba", "1.0.0", r#"{"name": "liba", "version": "1.0.0"}"#),
                ("liba", "1.5.0", r#"{"name": "liba", "version": "1.5.0"}"#),
            ],
            r#"{"name": "root", "dependencies": {"liba": "~>1.0"}}"#,
        );

        let mut existing = SelectionsFile::default();
        existing.select("liba", SelectedVersion::Version("1.0.0".parse().unwrap()));

        let kept = run(&mut fx, &root, &UpgradePolicy::default(), Some(&existing))
            .await
            .unwrap();
        assert_eq!(
            kept.get("liba"),
            Some(&SelectedVersion::Version("1.0.0".parse().unwrap()))
        );

        let upgraded = run(
            &mut fx,
            &root,
            &UpgradePolicy {
                upgrade_all: true,
                ..UpgradePolicy::default()
            },
            Some(&existing),
        )
        .await
        .unwrap();
        assert_eq!(
            upgraded.get("liba"),
            Some(&SelectedVersion::Version("1.5.0".parse().unwrap()))
        );
    }

    #[tokio::test]
    async fn incompatible_existing_selection_is_a_conflict() {
        let (mut fx, root) = fixture(
            &[
                ("liba", "1.0.0", r#"{"name": "liba", "version": "1.0.0"}"#),
                ("liba", "2.0.0", r#"{"name": "liba", "version": "2.0.0"}"#),
            ],
            r#"{"name": "root", "dependencies": {"liba": "~>2.0"}}"#,
        );

        let mut existing = SelectionsFile::default();
        existing.select("liba", SelectedVersion::Version("1.0.0".parse().unwrap()));

        let err = run(&mut fx, &root, &UpgradePolicy::default(), Some(&existing))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Conflict { .. }));
    }

    #[tokio::test]
    async fn prereleases_are_skipped_unless_opted_in() {
        let (mut fx, root) = fixture(
            &[
                ("liba", "1.0.0", r#"{"name": "liba", "version": "1.0.0"}"#),
                ("liba", "1.1.0-rc.1", r#"{"name": "liba", "version": "1.1.0-rc.1"}"#),
            ],
            r#"{"name": "root", "dependencies": {"liba": "~>1.0"}}"#,
        );

        let normal = run(&mut fx, &root, &UpgradePolicy::default(), None)
            .await
            .unwrap();
        assert_eq!(
            normal.get("liba"),
            Some(&SelectedVersion::Version("1.0.0".parse().unwrap()))
        );

        let pre = run(
            &mut fx,
            &root,
            &UpgradePolicy {
                pre_releases: true,
                upgrade_all: true,
                ..UpgradePolicy::default()
            },
            None,
        )
        .await
        .unwrap();
        assert_eq!(
            pre.get("liba"),
            Some(&SelectedVersion::Version("1.1.0-rc.1".parse().unwrap()))
        );
    }

    #[tokio::test]
    async fn path_dependencies_select_the_path() {
        let (mut fx, _) = fixture(&[], r#"{"name": "root", "version": "0.1.0"}"#);
        let sibling = fx.root_dir.path().join("sibling");
        write_package(&sibling, r#"{"name": "sibling", "version": "0.3.0"}"#);
        write_package(
            fx.root_dir.path(),
            r#"{"name": "root", "dependencies": {"sibling": {"path": "sibling"}}}"#,
        );
        let root = Package::load(fx.root_dir.path(), None).unwrap();

        let selections = run(&mut fx, &root, &UpgradePolicy::default(), None)
            .await
            .unwrap();
        assert_eq!(
            selections.get("sibling"),
            Some(&SelectedVersion::Path(PathBuf::from("sibling")))
        );
    }

    #[tokio::test]
    async fn path_cycles_are_fatal() {
        let (mut fx, _) = fixture(&[], r#"{"name": "root"}"#);
        let a = fx.root_dir.path().join("a");
        let b = fx.root_dir.path().join("b");
        write_package(
            &a,
            r#"{"name": "a", "version": "0.1.0", "dependencies": {"b": {"path": "../b"}}}"#,
        );
        write_package(
            &b,
            r#"{"name": "b", "version": "0.1.0", "dependencies": {"a": {"path": "../a"}}}"#,
        );
        write_package(
            fx.root_dir.path(),
            r#"{"name": "root", "dependencies": {"a": {"path": "a"}}}"#,
        );
        let root = Package::load(fx.root_dir.path(), None).unwrap();

        let err = run(&mut fx, &root, &UpgradePolicy::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Cycle { .. }), "{err}");
    }

    #[tokio::test]
    async fn subpackage_dependencies_select_the_base_package() {
        let (mut fx, _) = fixture(&[], r#"{"name": "root"}"#);
        let b = fx.root_dir.path().join("b");
        write_package(
            &b,
            r#"{
                "name": "b",
                "version": "1.0.0",
                "subPackages": [{"name": "a"}, {"name": "b"}]
            }"#,
        );
        write_package(
            fx.root_dir.path(),
            r#"{"name": "root", "dependencies": {"b:a": {"path": "b"}, "b:b": {"path": "b"}}}"#,
        );
        let root = Package::load(fx.root_dir.path(), None).unwrap();

        let selections = run(&mut fx, &root, &UpgradePolicy::default(), None)
            .await
            .unwrap();
        // one selection for the base package covers both subpackages
        assert_eq!(selections.versions.len(), 1);
        assert!(selections.get("b").is_some());

        let v = "1.0.0".parse().unwrap();
        assert_eq!(fx.manager.get_package("b:a", &v).unwrap().name(), "b:a");
        assert_eq!(fx.manager.get_package("b:b", &v).unwrap().name(), "b:b");
        assert_eq!(fx.manager.get_package("b", &v).unwrap().name(), "b");
        assert!(fx.manager.get_package("b:b", &"1.1.0".parse().unwrap()).is_none());
    }

    #[tokio::test]
    async fn missing_selection_with_restrictive_policy_errors() {
        let (mut fx, root) = fixture(
            &[("liba", "1.0.0", r#"{"name": "liba", "version": "1.0.0"}"#)],
            r#"{"name": "root", "dependencies": {"liba": "~>1.0"}}"#,
        );
        let err = run(
            &mut fx,
            &root,
            &UpgradePolicy {
                select_missing: false,
                ..UpgradePolicy::default()
            },
            Some(&SelectionsFile::default()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ResolveError::MissingSelection { .. }));
    }
}
