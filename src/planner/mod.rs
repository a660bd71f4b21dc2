//! The build planner: from a resolved graph to an ordered list of targets.

pub mod identity;
pub mod sources;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use petgraph::algo::toposort;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use thiserror::Error;
use tracing::debug;

use crate::package::{Package, PackageError, PackageManager, SelectedVersion, SelectionsFile};
use crate::platform::{BuildPlatform, PlatformError};
use crate::recipe::{split_identity, BuildSettings, RecipeError, TargetType};
use crate::version::Version;

pub use identity::{compute_identity, source_stamp, HashPolicy, IdentityInputs};

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("package `{0}` is not selected and not available locally")]
    UnresolvedDependency(String),

    #[error("`{dep}` declares no configuration compatible with the current platform")]
    NoMatchingConfiguration { dep: String },

    #[error(
        "main source file {} of `{package}` is not among its sources",
        file.display()
    )]
    MissingMainSource { package: String, file: PathBuf },

    #[error("dependency cycle involving `{0}`")]
    GraphCycle(String),

    #[error(transparent)]
    Recipe(#[from] RecipeError),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("failed to stat or read sources of `{package}`")]
    SourceIo {
        package: String,
        #[source]
        source: std::io::Error,
    },
}

/// One compiler invocation's worth of work.
#[derive(Debug, Clone)]
pub struct BuildTarget {
    /// Qualified package name
    pub name: String,
    pub version: Version,
    /// Package root; sources and paths are resolved against it
    pub root_dir: PathBuf,
    pub configuration: Option<String>,
    /// Fully merged settings, platform-filtered
    pub settings: BuildSettings,
    /// Absolute source files, dependency contributions included
    pub sources: Vec<PathBuf>,
    /// The artifact this target produces, under the build cache;
    /// `None` for target types that produce nothing
    pub artifact: Option<PathBuf>,
    /// Indices of upstream targets in the plan's target list
    pub dependencies: Vec<usize>,
    /// Identities of the upstream targets, in the same order
    pub upstream_identities: Vec<String>,
    /// The build identity fingerprint
    pub identity: String,
}

impl BuildTarget {
    pub fn is_buildable(&self) -> bool {
        self.artifact.is_some()
    }
}

/// A topologically ordered build plan; dependencies precede dependents.
#[derive(Debug)]
pub struct BuildPlan {
    pub targets: Vec<BuildTarget>,
    /// Index of the root package's target
    pub root: usize,
}

/// Inputs the planner needs beyond the graph itself.
pub struct PlanRequest<'a> {
    pub platform: &'a BuildPlatform,
    /// Root configuration; `None` picks the default
    pub configuration: Option<&'a str>,
    /// Per-dependency configuration overrides from the command surface
    pub config_overrides: &'a HashMap<String, String>,
    pub policy: HashPolicy,
    /// The build cache root (`<cache>/cache`)
    pub cache_dir: &'a Path,
}

/// Compute the plan for `root` over the given selections.
pub fn plan(
    root: &Package,
    selections: &SelectionsFile,
    manager: &PackageManager,
    request: &PlanRequest<'_>,
) -> Result<BuildPlan, PlanError> {
    let mut builder = PlanBuilder {
        manager,
        selections,
        request,
        root_dir: root.path().to_path_buf(),
        graph: StableDiGraph::new(),
        nodes: IndexMap::new(),
    };

    let root_config = match request.configuration {
        Some(config) => Some(config.to_string()),
        None => root
            .recipe()
            .default_configuration(request.platform)?
            .map(str::to_string),
    };
    let root_index = builder.add_package(root.clone(), root_config)?;

    // topological order with dependencies first
    let order = toposort(&builder.graph, None).map_err(|cycle| {
        let name = builder.graph[cycle.node_id()].package.name().to_string();
        PlanError::GraphCycle(name)
    })?;
    let order: Vec<NodeIndex> = order.into_iter().rev().collect();

    let mut targets: Vec<BuildTarget> = Vec::with_capacity(order.len());
    let mut target_index: HashMap<NodeIndex, usize> = HashMap::new();

    for node_index in order {
        let node = &builder.graph[node_index];
        let upstream: Vec<usize> = builder
            .graph
            .neighbors(node_index)
            .map(|n| target_index[&n])
            .collect();
        let target = assemble_target(node, &upstream, &targets, request)?;
        target_index.insert(node_index, targets.len());
        targets.push(target);
    }

    let root = target_index[&root_index];
    debug!(targets = targets.len(), "build plan assembled");
    Ok(BuildPlan { targets, root })
}

struct PlanNode {
    package: Package,
    configuration: Option<String>,
}

struct PlanBuilder<'a> {
    manager: &'a PackageManager,
    selections: &'a SelectionsFile,
    request: &'a PlanRequest<'a>,
    root_dir: PathBuf,
    graph: StableDiGraph<PlanNode, ()>,
    nodes: IndexMap<String, NodeIndex>,
}

impl PlanBuilder<'_> {
    /// Add a package and, recursively, its dependencies. Returns the node.
    fn add_package(
        &mut self,
        package: Package,
        configuration: Option<String>,
    ) -> Result<NodeIndex, PlanError> {
        if let Some(existing) = self.nodes.get(package.name()) {
            return Ok(*existing);
        }

        let node_name = package.name().to_string();
        let index = self.graph.add_node(PlanNode {
            package,
            configuration,
        });
        self.nodes.insert(node_name, index);

        let package = self.graph[index].package.clone();
        let configuration = self.graph[index].configuration.clone();
        let deps = package.recipe().dependencies(configuration.as_deref())?;
        let mut names: Vec<&String> = deps.keys().collect();
        names.sort();

        for dep_name in names {
            let dep = &deps[dep_name];
            if !dep.is_effective() {
                continue;
            }
            let dep_package = self.lookup(dep_name)?;
            let dep_config = self.configuration_for(&dep_package)?;
            let child = self.add_package(dep_package, dep_config)?;
            self.graph.update_edge(index, child, ());
        }
        Ok(index)
    }

    /// Find the package a dependency name refers to, via the selections.
    fn lookup(&self, dep_name: &str) -> Result<Package, PlanError> {
        let (base, _) = split_identity(dep_name)?;
        let selected = self.selections.get(base);

        let package = match selected {
            Some(SelectedVersion::Version(version)) => self.manager.get_package(dep_name, version),
            Some(SelectedVersion::Path(path)) => {
                let dir = if path.is_absolute() {
                    path.clone()
                } else {
                    self.root_dir.join(path)
                };
                self.manager
                    .packages()
                    .iter()
                    .find(|p| p.name() == dep_name && p.path() == dir.as_path())
                    .or_else(|| {
                        self.manager
                            .packages()
                            .iter()
                            .find(|p| p.name() == dep_name)
                    })
            }
            Some(SelectedVersion::Repository { .. }) | None => self
                .manager
                .packages()
                .iter()
                .find(|p| p.name() == dep_name),
        };
        package
            .cloned()
            .ok_or_else(|| PlanError::UnresolvedDependency(dep_name.to_string()))
    }

    /// The configuration a dependency builds with: the user's override, or
    /// the recipe's platform default.
    fn configuration_for(&self, package: &Package) -> Result<Option<String>, PlanError> {
        if let Some(over) = self.request.config_overrides.get(package.name()) {
            return Ok(Some(over.clone()));
        }
        let recipe = package.recipe();
        if recipe.configurations.is_empty() {
            return Ok(None);
        }
        match recipe.default_configuration(self.request.platform)? {
            Some(config) => Ok(Some(config.to_string())),
            None => Err(PlanError::NoMatchingConfiguration {
                dep: package.name().to_string(),
            }),
        }
    }
}

/// Merge one node into a finished target: settings, sources, upstream
/// contributions, artifact path and identity.
fn assemble_target(
    node: &PlanNode,
    upstream: &[usize],
    targets: &[BuildTarget],
    request: &PlanRequest<'_>,
) -> Result<BuildTarget, PlanError> {
    let package = &node.package;
    let mut settings = package
        .recipe()
        .effective_settings(request.platform, node.configuration.as_deref())?;

    let mut source_list = sources::collect_sources(package.path(), &settings)
        .map_err(|source| PlanError::SourceIo {
            package: package.name().to_string(),
            source,
        })?;

    // absolutize import paths before merging across packages
    absolutize(&mut settings.import_paths, package.path());
    absolutize(&mut settings.string_import_paths, package.path());

    // a recipe without an explicit target type builds an executable when
    // an application entry point is present, a static library otherwise
    if settings.target_type == TargetType::Autodetect {
        let has_main = settings.main_source_file.is_some()
            || source_list
                .iter()
                .any(|s| s.ends_with("app.d") || s.ends_with("main.d"));
        settings.target_type = if has_main {
            TargetType::Executable
        } else {
            TargetType::StaticLibrary
        };
    }

    let mut upstream_identities = Vec::new();
    for &dep in upstream {
        let dep_target = &targets[dep];
        settings.absorb_upstream(&dep_target.settings);
        upstream_identities.push(dep_target.identity.clone());

        match dep_target.settings.target_type {
            // a source library's sources compile into the dependent
            TargetType::SourceLibrary => {
                source_list.extend(dep_target.sources.iter().cloned());
            }
            // an artifact-producing library is a link input instead
            TargetType::Library | TargetType::StaticLibrary | TargetType::DynamicLibrary => {
                if let Some(artifact) = &dep_target.artifact {
                    settings
                        .link_files
                        .push(artifact.to_string_lossy().into_owned());
                }
            }
            _ => {}
        }
    }
    settings.deduplicate();

    // scalar settings come exclusively from the package's own recipe
    let target_name = settings
        .target_name
        .clone()
        .unwrap_or_else(|| package.name().replace(':', "_"));

    if settings.target_type == TargetType::Executable {
        if let Some(main) = &settings.main_source_file {
            let absolute = package.path().join(main);
            if !source_list.iter().any(|s| s == &absolute) {
                return Err(PlanError::MissingMainSource {
                    package: package.name().to_string(),
                    file: main.clone(),
                });
            }
        }
    }

    let flags = canonical_flags(&settings);
    let identity = compute_identity(&IdentityInputs {
        platform: request.platform,
        target_type: settings.target_type,
        target_name: &target_name,
        sources: &source_list,
        source_root: package.path(),
        flags,
        upstream_identities: upstream_identities.clone(),
        policy: request.policy,
    })
    .map_err(|source| PlanError::SourceIo {
        package: package.name().to_string(),
        source,
    })?;

    let artifact = artifact_path(package, node, &target_name, &settings, request);

    Ok(BuildTarget {
        name: package.name().to_string(),
        version: package.version().clone(),
        root_dir: package.path().to_path_buf(),
        configuration: node.configuration.clone(),
        settings,
        sources: source_list,
        artifact,
        dependencies: upstream.to_vec(),
        upstream_identities,
        identity,
    })
}

fn absolutize(paths: &mut [String], root: &Path) {
    for entry in paths.iter_mut() {
        let as_path = Path::new(entry.as_str());
        if as_path.is_relative() {
            *entry = root.join(as_path).to_string_lossy().into_owned();
        }
    }
}

/// Everything flag-like that feeds the identity, in one list.
fn canonical_flags(settings: &BuildSettings) -> Vec<String> {
    let mut flags = Vec::new();
    flags.extend(settings.dflags.iter().cloned());
    flags.extend(settings.lflags.iter().map(|f| format!("-L{f}")));
    flags.extend(settings.versions.iter().map(|v| format!("-version={v}")));
    flags.extend(
        settings
            .debug_versions
            .iter()
            .map(|v| format!("-debug={v}")),
    );
    flags.extend(settings.libs.iter().map(|l| format!("lib:{l}")));
    flags.extend(
        settings
            .build_options
            .iter()
            .map(|o| format!("option:{o}")),
    );
    flags
}

/// `cache/<name>/<version>/+<config>/<artifact>`; `None` for target types
/// without an artifact.
fn artifact_path(
    package: &Package,
    node: &PlanNode,
    target_name: &str,
    settings: &BuildSettings,
    request: &PlanRequest<'_>,
) -> Option<PathBuf> {
    let file_name = match settings.target_type {
        TargetType::None | TargetType::SourceLibrary => return None,
        TargetType::Executable | TargetType::Autodetect => {
            if cfg!(windows) {
                format!("{target_name}.exe")
            } else {
                target_name.to_string()
            }
        }
        TargetType::Library | TargetType::StaticLibrary => {
            if cfg!(windows) {
                format!("{target_name}.lib")
            } else {
                format!("lib{target_name}.a")
            }
        }
        TargetType::DynamicLibrary => {
            if cfg!(windows) {
                format!("{target_name}.dll")
            } else if cfg!(target_os = "macos") {
                format!("lib{target_name}.dylib")
            } else {
                format!("lib{target_name}.so")
            }
        }
    };
    let config_dir = format!(
        "+{}",
        node.configuration.as_deref().unwrap_or("default")
    );
    Some(
        request
            .cache_dir
            .join(package.base_name())
            .join(package.version().to_string())
            .join(config_dir)
            .join(file_name),
    )
}
