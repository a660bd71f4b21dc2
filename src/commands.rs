//! Command implementations behind the CLI surface.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs_err as fs;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::builder::{self, BuildError, Builder};
use crate::document::DocumentError;
use crate::init::InitError;
use crate::opt::{
    AddOverrideOpts, BuildOpts, CleanOpts, CommonOpts, DescribeOpts, FetchOpts, GenerateOpts,
    InitOpts, Opts, PathOpts, PathVersionOpts, RemoveOpts, RemoveOverrideOpts, RunOpts,
    SearchOpts, SubCommands, UpgradeOpts,
};
use crate::package::{
    OverrideTarget, PackageError, PackageManager, PackageOverride, SelectionsError,
};
use crate::planner::{plan, HashPolicy, PlanError, PlanRequest};
use crate::platform::BuildPlatform;
use crate::project::{Project, ProjectError};
use crate::recipe::RecipeError;
use crate::resolver::{fetch_into_cache, ResolveContext, ResolveError, UpgradePolicy};
use crate::settings::{dub_home, system_settings_dir, Settings, SkipRegistry};
use crate::supplier::{
    FileSystemSupplier, HttpClient, MavenSupplier, PackageSupplier, RegistrySupplier,
    SupplierError, DEFAULT_REGISTRY_URL,
};
use crate::version::{Version, VersionRange};

/// Environment variable overriding the cache freshness policy.
const CACHE_POLICY_ENV: &str = "DROVER_CACHE_POLICY";

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    Package(#[from] PackageError),
    #[error(transparent)]
    Recipe(#[from] RecipeError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Supplier(#[from] SupplierError),
    #[error(transparent)]
    Init(#[from] InitError),
    #[error(transparent)]
    Selections(#[from] SelectionsError),
    #[error(transparent)]
    Settings(#[from] DocumentError),

    #[error("{0}")]
    Usage(String),

    #[error("failed to access {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("program exited with code {0}")]
    ProgramFailed(i32),
}

impl CommandError {
    /// The process exit code this failure maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            CommandError::Usage(_) => 2,
            CommandError::ProgramFailed(code) => *code,
            _ => 1,
        }
    }
}

/// Shared command environment: settings, cache root and platform flags.
pub struct App {
    pub common: CommonOpts,
    pub settings: Settings,
    pub cache_root: PathBuf,
    pub cancel: CancellationToken,
}

impl App {
    pub fn new(common: CommonOpts, cancel: CancellationToken) -> Result<App, CommandError> {
        let settings = Settings::load_layered(
            &system_settings_dir(),
            &dub_home(),
            Some(&common.root),
        )?;
        Ok(App {
            common,
            settings,
            cache_root: dub_home(),
            cancel,
        })
    }

    fn manager(&self) -> Result<PackageManager, CommandError> {
        let extra = self.settings.custom_cache_paths.clone();
        Ok(PackageManager::new(&self.cache_root, extra)?)
    }

    /// The supplier chain: explicit registries first, then configured
    /// ones, then the default, honoring `--skip-registry`.
    fn suppliers(&self) -> Result<Vec<Box<dyn PackageSupplier>>, CommandError> {
        let skip = self
            .common
            .skip_registry
            .unwrap_or(self.settings.skip_registry.value);

        let mut suppliers: Vec<Box<dyn PackageSupplier>> = Vec::new();
        if skip == SkipRegistry::All {
            return Ok(suppliers);
        }

        let client = HttpClient::with_timeouts(
            self.settings
                .fetch_idle_timeout
                .unwrap_or(crate::supplier::client::DEFAULT_IDLE_TIMEOUT),
            self.settings
                .fetch_total_timeout
                .unwrap_or(crate::supplier::client::DEFAULT_TOTAL_TIMEOUT),
        )?;
        for definition in &self.common.registry {
            suppliers.push(registry_supplier(definition, client.clone())?);
        }
        // a configured registry's fallbacks are part of its definition, so
        // `configured` drops them together with the registry
        if skip != SkipRegistry::Configured {
            for definition in &self.settings.registry_urls {
                suppliers.push(registry_supplier(definition, client.clone())?);
            }
        }
        if skip == SkipRegistry::None {
            suppliers.push(registry_supplier(DEFAULT_REGISTRY_URL, client)?);
        }
        Ok(suppliers)
    }

    async fn platform(&self) -> Result<BuildPlatform, CommandError> {
        let requested = self
            .common
            .compiler
            .clone()
            .or_else(|| {
                self.settings
                    .default_compiler
                    .is_set()
                    .then(|| self.settings.default_compiler.value.clone())
            });
        let binary = builder::find_compiler(requested.as_deref())?;
        let mut platform = builder::probe_platform(&binary).await;
        if let Some(arch) = &self.common.arch {
            platform.architecture = vec![arch.clone()];
        } else if self.settings.default_architecture.is_set() {
            platform.architecture = vec![self.settings.default_architecture.value.clone()];
        }
        Ok(platform)
    }

    /// CLI beats the environment beats the settings file.
    fn cache_policy(&self, from_cli: Option<HashPolicy>) -> HashPolicy {
        if let Some(policy) = from_cli {
            return policy;
        }
        if let Ok(text) = std::env::var(CACHE_POLICY_ENV) {
            match text.parse() {
                Ok(policy) => return policy,
                Err(_) => warn!("ignoring invalid {CACHE_POLICY_ENV}=`{text}`"),
            }
        }
        self.settings.default_cache_policy.or(HashPolicy::default())
    }

    /// Ask the user, honoring `--yes` and `--non-interactive`.
    fn confirm(&self, question: &str) -> bool {
        if self.common.yes {
            return true;
        }
        if self.common.non_interactive {
            // prompts default to safe denial
            return false;
        }
        eprint!("{question} [y/N] ");
        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim(), "y" | "Y" | "yes")
    }
}

fn registry_supplier(
    definition: &str,
    client: HttpClient,
) -> Result<Box<dyn PackageSupplier>, CommandError> {
    // maven-layout mirrors are marked with a `mvn+` scheme prefix
    if let Some(rest) = definition.strip_prefix("mvn+") {
        let url = url::Url::parse(rest)
            .map_err(|err| CommandError::Usage(format!("invalid registry `{definition}`: {err}")))?;
        return Ok(Box::new(MavenSupplier::new(url, client)));
    }
    if let Some(rest) = definition.strip_prefix("file://") {
        return Ok(Box::new(FileSystemSupplier::new(PathBuf::from(rest))));
    }
    Ok(Box::new(RegistrySupplier::from_definition(
        definition, client,
    )?))
}

/// Dispatch one parsed command line.
pub async fn run_command(
    opts: Opts,
    cancel: CancellationToken,
) -> Result<(), CommandError> {
    let app = App::new(opts.common.clone(), cancel)?;
    match opts.command {
        None => {
            // bare invocation builds and runs, like `run`
            command_run(
                &app,
                RunOpts {
                    build: default_build_opts(),
                    args: vec![],
                },
            )
            .await
        }
        Some(SubCommands::Init(init)) => command_init(&app, init).await,
        Some(SubCommands::Build(build)) => command_build(&app, build).await.map(drop),
        Some(SubCommands::Run(run)) => command_run(&app, run).await,
        Some(SubCommands::Test(build)) => command_test(&app, build).await,
        Some(SubCommands::Fetch(fetch)) => command_fetch(&app, fetch).await,
        Some(SubCommands::Remove(remove)) => command_remove(&app, remove).await,
        Some(SubCommands::Upgrade(upgrade)) => command_upgrade(&app, upgrade).await,
        Some(SubCommands::Describe(describe)) => command_describe(&app, describe).await,
        Some(SubCommands::Clean(clean)) => command_clean(&app, clean).await,
        Some(SubCommands::Search(search)) => command_search(&app, search).await,
        Some(SubCommands::AddLocal(args)) => command_add_local(&app, args).await,
        Some(SubCommands::RemoveLocal(args)) => command_remove_local(&app, args).await,
        Some(SubCommands::AddPath(args)) => command_add_path(&app, args).await,
        Some(SubCommands::RemovePath(args)) => command_remove_path(&app, args).await,
        Some(SubCommands::AddOverride(args)) => command_add_override(&app, args).await,
        Some(SubCommands::RemoveOverride(args)) => command_remove_override(&app, args).await,
        Some(SubCommands::List) => command_list(&app).await,
        Some(SubCommands::ListOverrides) => command_list_overrides(&app).await,
        Some(SubCommands::Generate(generate)) => command_generate(generate),
        Some(SubCommands::Dustmite(_)) => Err(CommandError::Usage(
            "`dustmite` is not supported by this build".to_string(),
        )),
    }
}

fn default_build_opts() -> BuildOpts {
    use clap::Parser;
    // parse an empty argument list to pick up every declared default
    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        build: BuildOpts,
    }
    Wrapper::parse_from(["drover"]).build
}

async fn command_init(app: &App, opts: InitOpts) -> Result<(), CommandError> {
    let name = match &opts.name {
        Some(name) => name.clone(),
        None => opts
            .directory
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                CommandError::Usage("cannot derive a package name from the directory".into())
            })?,
    };
    let suppliers = app.suppliers()?;
    crate::init::init_project(&opts.directory, &name, &opts.dependencies, opts.template, &suppliers)
        .await?;
    Ok(())
}

struct BuiltProject {
    plan: Arc<crate::planner::BuildPlan>,
    outcomes: Vec<builder::BuildOutcome>,
}

async fn command_build(app: &App, opts: BuildOpts) -> Result<BuiltProject, CommandError> {
    let project = Project::load(&app.common.root)?;
    let mut manager = app.manager()?;
    let suppliers = app.suppliers()?;

    let selections = if opts.nodeps {
        project
            .selections()
            .cloned()
            .ok_or_else(|| CommandError::Usage("--nodeps requires existing selections".into()))?
    } else {
        let mut ctx = ResolveContext {
            manager: &mut manager,
            suppliers: &suppliers,
            root_dir: project.root_dir().to_path_buf(),
        };
        let resolved = project.resolve(&UpgradePolicy::default(), &mut ctx).await?;
        resolved
    };

    // a fresh project gets its selections written; existing files (own or
    // inherited) stay untouched on a plain build
    let mut project = project;
    if project.selections().is_none() {
        project.write_selections(selections.clone())?;
    }

    let platform = app.platform().await?;
    let policy = app.cache_policy(opts.cache_policy);
    let mut config_overrides = HashMap::new();
    for entry in &opts.override_config {
        let Some((package, config)) = entry.split_once('/') else {
            return Err(CommandError::Usage(format!(
                "--override-config takes `package/configuration`, got `{entry}`"
            )));
        };
        config_overrides.insert(package.to_string(), config.to_string());
    }
    let cache_dir = app.cache_root.join("cache");
    let built_plan = plan(
        project.root(),
        &selections,
        &manager,
        &PlanRequest {
            platform: &platform,
            configuration: opts.config.as_deref(),
            config_overrides: &config_overrides,
            policy,
            cache_dir: &cache_dir,
        },
    )?;

    let mut builder = Builder::new(platform, policy);
    builder.force = opts.force;
    builder.low_memory = opts.low_memory
        || (app.settings.default_low_memory.is_set() && app.settings.default_low_memory.value);
    builder.cancel = app.cancel.clone();
    let builder = Arc::new(builder);
    let built_plan = Arc::new(built_plan);
    let outcomes = builder.build_plan(&built_plan).await?;

    let root_outcome = &outcomes[built_plan.root];
    if root_outcome.cached {
        info!("target up to date");
    }
    Ok(BuiltProject {
        plan: built_plan,
        outcomes,
    })
}

async fn command_run(app: &App, opts: RunOpts) -> Result<(), CommandError> {
    let built = command_build(app, opts.build).await?;
    let target = &built.plan.targets[built.plan.root];
    let Some(artifact) = &built.outcomes[built.plan.root].artifact else {
        return Err(CommandError::Usage(format!(
            "`{}` does not produce a runnable artifact",
            target.name
        )));
    };

    let mut environment: indexmap::IndexMap<String, String> = std::env::vars().collect();
    for (key, value) in target
        .settings
        .environments
        .iter()
        .chain(target.settings.run_environments.iter())
    {
        environment.insert(key.clone(), value.clone());
    }
    builder::run_commands(
        &target.settings.pre_run_commands,
        &target.root_dir,
        &environment,
    )
    .await?;

    let working_dir = target
        .settings
        .working_directory
        .as_ref()
        .map(|dir| target.root_dir.join(dir))
        .unwrap_or_else(|| target.root_dir.clone());
    let status = tokio::process::Command::new(artifact)
        .args(&opts.args)
        .current_dir(&working_dir)
        .envs(environment.iter().map(|(k, v)| (k.clone(), v.clone())))
        .status()
        .await
        .map_err(|source| CommandError::Io {
            path: artifact.clone(),
            source,
        })?;

    builder::run_commands(
        &target.settings.post_run_commands,
        &target.root_dir,
        &environment,
    )
    .await?;

    if !status.success() {
        return Err(CommandError::ProgramFailed(status.code().unwrap_or(1)));
    }
    Ok(())
}

async fn command_test(app: &App, opts: BuildOpts) -> Result<(), CommandError> {
    // unit tests build the package with the test harness enabled and run
    // the resulting binary once
    let mut opts = opts;
    opts.force = true;
    std::env::set_var(
        "DFLAGS",
        format!(
            "{} -unittest -main",
            std::env::var("DFLAGS").unwrap_or_default()
        )
        .trim()
        .to_string(),
    );
    command_run(
        app,
        RunOpts {
            build: opts,
            args: vec![],
        },
    )
    .await
}

/// `name` or `name@version`.
fn parse_package_spec(spec: &str) -> (String, Option<Version>) {
    match spec.split_once('@') {
        Some((name, version)) => (name.to_string(), version.parse().ok()),
        None => (spec.to_string(), None),
    }
}

async fn command_fetch(app: &App, opts: FetchOpts) -> Result<(), CommandError> {
    let (name, version) = parse_package_spec(&opts.package);
    let mut manager = app.manager()?;
    let suppliers = app.suppliers()?;
    let mut ctx = ResolveContext {
        manager: &mut manager,
        suppliers: &suppliers,
        root_dir: app.common.root.clone(),
    };

    let mut pending = vec![(name, version)];
    let mut fetched = std::collections::BTreeSet::new();
    while let Some((name, version)) = pending.pop() {
        if !fetched.insert(name.clone()) {
            continue;
        }
        let version = match version {
            Some(version) => version,
            None => {
                let (_, best) = crate::supplier::find_best_supplier(
                    ctx.suppliers,
                    &name,
                    &VersionRange::Any,
                    false,
                )
                .await?;
                best
            }
        };
        if ctx.manager.get_package(&name, &version).is_none() {
            fetch_into_cache(&name, &version, false, &mut ctx).await?;
            info!("fetched {name} {version}");
        } else {
            info!("{name} {version} is already present");
        }

        if opts.recursive {
            if let Some(package) = ctx.manager.get_package(&name, &version) {
                for (dep_name, dep) in &package.recipe().dependencies {
                    if dep.is_effective() {
                        let (base, _) = crate::recipe::split_identity(dep_name)?;
                        pending.push((base.to_string(), None));
                    }
                }
            }
        }
    }
    Ok(())
}

async fn command_remove(app: &App, opts: RemoveOpts) -> Result<(), CommandError> {
    let (name, version) = parse_package_spec(&opts.package);
    let mut manager = app.manager()?;
    let version = match version {
        Some(version) => version,
        None => {
            let known = manager.known_versions(&name);
            match known.as_slice() {
                [] => {
                    return Err(CommandError::Package(PackageError::NotCached {
                        name,
                        version: Version::min_release(),
                    }))
                }
                [only] => only.clone(),
                _ => {
                    let question = format!(
                        "remove all {} cached versions of `{name}`?",
                        known.len()
                    );
                    if !app.confirm(&question) {
                        return Err(CommandError::Usage(format!(
                            "`{name}` has multiple cached versions; pass `{name}@<version>`"
                        )));
                    }
                    for version in known {
                        manager.remove_cached(&name, &version)?;
                        info!("removed {name} {version}");
                    }
                    return Ok(());
                }
            }
        }
    };
    manager.remove_cached(&name, &version)?;
    info!("removed {name} {version}");
    Ok(())
}

async fn command_upgrade(app: &App, opts: UpgradeOpts) -> Result<(), CommandError> {
    let mut project = Project::load(&app.common.root)?;
    let mut manager = app.manager()?;
    let suppliers = app.suppliers()?;
    let policy = UpgradePolicy {
        select_missing: true,
        upgrade_all: !opts.missing_only && !opts.verify,
        pre_releases: opts.prerelease,
    };
    let mut ctx = ResolveContext {
        manager: &mut manager,
        suppliers: &suppliers,
        root_dir: project.root_dir().to_path_buf(),
    };
    let resolved = project.resolve(&policy, &mut ctx).await?;

    if opts.verify {
        // resolution succeeding against the existing selections is the
        // verification; nothing is written
        info!("selections are up to date");
        return Ok(());
    }
    let path = project.write_selections(resolved)?;
    info!("wrote {}", path.display());
    Ok(())
}

async fn command_describe(app: &App, opts: DescribeOpts) -> Result<(), CommandError> {
    let project = match &opts.package {
        None => Project::load(&app.common.root)?,
        Some(spec) => {
            let (name, version) = parse_package_spec(spec);
            let manager = app.manager()?;
            let package = match &version {
                Some(version) => manager.get_package(&name, version).cloned(),
                None => manager
                    .get_best_package(&name, &VersionRange::Any)
                    .cloned(),
            }
            .ok_or_else(|| CommandError::Package(PackageError::NotCached {
                name: name.clone(),
                version: version.unwrap_or_else(Version::min_release),
            }))?;
            Project::load(package.path())?
        }
    };

    let mut manager = app.manager()?;
    let suppliers = app.suppliers()?;
    let mut ctx = ResolveContext {
        manager: &mut manager,
        suppliers: &suppliers,
        root_dir: project.root_dir().to_path_buf(),
    };
    let selections = project.resolve(&UpgradePolicy::default(), &mut ctx).await?;

    let platform = app.platform().await?;
    let config_overrides = HashMap::new();
    let cache_dir = app.cache_root.join("cache");
    let built_plan = plan(
        project.root(),
        &selections,
        &manager,
        &PlanRequest {
            platform: &platform,
            configuration: opts.config.as_deref(),
            config_overrides: &config_overrides,
            policy: app.cache_policy(None),
            cache_dir: &cache_dir,
        },
    )?;

    let output = crate::describe::render(
        &built_plan,
        &platform,
        &opts.data,
        opts.data_list,
        opts.data_null,
        opts.filter_versions,
    )?;
    println!("{output}");
    Ok(())
}

async fn command_clean(app: &App, opts: CleanOpts) -> Result<(), CommandError> {
    let cache_dir = app.cache_root.join("cache");
    if opts.all_packages {
        if cache_dir.is_dir() {
            fs::remove_dir_all(&cache_dir).map_err(|source| CommandError::Io {
                path: cache_dir.clone(),
                source,
            })?;
        }
        info!("removed all cached build artifacts");
        return Ok(());
    }
    let project = Project::load(&app.common.root)?;
    let package_cache = cache_dir.join(project.root().base_name());
    if package_cache.is_dir() {
        fs::remove_dir_all(&package_cache).map_err(|source| CommandError::Io {
            path: package_cache.clone(),
            source,
        })?;
    }
    info!("cleaned `{}`", project.root().name());
    Ok(())
}

async fn command_search(app: &App, opts: SearchOpts) -> Result<(), CommandError> {
    let suppliers = app.suppliers()?;
    let mut found_any = false;
    for supplier in &suppliers {
        let results = supplier.search(&opts.query).await?;
        for result in results {
            found_any = true;
            let version = result
                .version
                .map(|v| format!(" {v}"))
                .unwrap_or_default();
            let description = result.description.unwrap_or_default();
            println!("{}{version}: {description}", result.name);
        }
    }
    if !found_any {
        info!("no packages matching `{}` found", opts.query);
    }
    Ok(())
}

async fn command_add_local(app: &App, opts: PathVersionOpts) -> Result<(), CommandError> {
    let mut manager = app.manager()?;
    let dir = dunce::canonicalize(&opts.path).map_err(|source| CommandError::Io {
        path: opts.path.clone(),
        source,
    })?;
    let version = opts
        .version
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(|err| CommandError::Usage(format!("{err}")))?;
    let version = match version {
        Some(version) => version,
        None => crate::recipe::Recipe::load(&dir)?.version_or_default(),
    };
    manager.add_local_package(dir.clone(), Some(version.clone()))?;
    info!("registered {} as version {version}", dir.display());
    Ok(())
}

async fn command_remove_local(app: &App, opts: PathOpts) -> Result<(), CommandError> {
    let mut manager = app.manager()?;
    let dir = dunce::canonicalize(&opts.path).unwrap_or(opts.path.clone());
    if manager.remove_local_package(&dir)? {
        info!("deregistered {}", dir.display());
        Ok(())
    } else {
        Err(CommandError::Usage(format!(
            "{} is not a registered local package",
            dir.display()
        )))
    }
}

async fn command_add_path(app: &App, opts: PathOpts) -> Result<(), CommandError> {
    let mut manager = app.manager()?;
    let dir = dunce::canonicalize(&opts.path).map_err(|source| CommandError::Io {
        path: opts.path.clone(),
        source,
    })?;
    manager.add_search_path(dir.clone())?;
    info!("added search path {}", dir.display());
    Ok(())
}

async fn command_remove_path(app: &App, opts: PathOpts) -> Result<(), CommandError> {
    let mut manager = app.manager()?;
    let dir = dunce::canonicalize(&opts.path).unwrap_or(opts.path.clone());
    if manager.remove_search_path(&dir)? {
        info!("removed search path {}", dir.display());
        Ok(())
    } else {
        Err(CommandError::Usage(format!(
            "{} is not a registered search path",
            dir.display()
        )))
    }
}

async fn command_add_override(app: &App, opts: AddOverrideOpts) -> Result<(), CommandError> {
    let mut manager = app.manager()?;
    let source: VersionRange = opts
        .source
        .parse()
        .map_err(|err| CommandError::Usage(format!("{err}")))?;
    let target = if Path::new(&opts.target).exists() {
        OverrideTarget::Path(dunce::canonicalize(&opts.target).map_err(|source| {
            CommandError::Io {
                path: PathBuf::from(&opts.target),
                source,
            }
        })?)
    } else {
        OverrideTarget::Version(
            opts.target
                .parse()
                .map_err(|err| CommandError::Usage(format!("{err}")))?,
        )
    };
    manager.add_override(PackageOverride {
        package: opts.package.clone(),
        source,
        target,
    })?;
    info!("added override for `{}`", opts.package);
    Ok(())
}

async fn command_remove_override(
    app: &App,
    opts: RemoveOverrideOpts,
) -> Result<(), CommandError> {
    let mut manager = app.manager()?;
    let source: VersionRange = opts
        .source
        .parse()
        .map_err(|err| CommandError::Usage(format!("{err}")))?;
    if manager.remove_override(&opts.package, &source)? {
        info!("removed override for `{}`", opts.package);
        Ok(())
    } else {
        Err(CommandError::Usage(format!(
            "no override for `{}` {} exists",
            opts.package, opts.source
        )))
    }
}

async fn command_list(app: &App) -> Result<(), CommandError> {
    let manager = app.manager()?;
    let mut lines: Vec<String> = manager
        .packages()
        .iter()
        .map(|p| format!("{} {}: {}", p.name(), p.version(), p.path().display()))
        .collect();
    lines.sort();
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

async fn command_list_overrides(app: &App) -> Result<(), CommandError> {
    let manager = app.manager()?;
    for override_ in manager.overrides() {
        let target = match &override_.target {
            OverrideTarget::Path(path) => path.display().to_string(),
            OverrideTarget::Version(version) => version.to_string(),
        };
        println!("{} {} -> {target}", override_.package, override_.source);
    }
    Ok(())
}

fn command_generate(opts: GenerateOpts) -> Result<(), CommandError> {
    // IDE project generators are outside this build's surface
    Err(CommandError::Usage(format!(
        "unknown generator `{}`",
        opts.generator
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn package_specs_split_on_at() {
        let (name, version) = parse_package_spec("logger@1.2.0");
        assert_eq!(name, "logger");
        assert_eq!(version.unwrap().to_string(), "1.2.0");

        let (name, version) = parse_package_spec("logger");
        assert_eq!(name, "logger");
        assert!(version.is_none());
    }

    #[test]
    fn usage_errors_exit_with_two() {
        assert_eq!(CommandError::Usage("x".into()).exit_code(), 2);
        assert_eq!(
            CommandError::ProgramFailed(7).exit_code(),
            7
        );
        let err: CommandError = SupplierError::UnknownPackage("x".into()).into();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn registry_definitions_select_supplier_kinds() {
        let client = HttpClient::new().unwrap();
        assert!(registry_supplier("https://reg.example/", client.clone()).is_ok());
        assert!(registry_supplier("mvn+https://mirror.example/dub", client.clone()).is_ok());
        assert!(registry_supplier("file:///tmp/repo", client.clone()).is_ok());
        assert!(registry_supplier("mvn+:not a url", client).is_err());
    }
}
