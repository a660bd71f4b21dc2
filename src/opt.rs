//! Command-line options.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};

use crate::console_utils::Color;
use crate::init::ProjectTemplate;
use crate::planner::HashPolicy;
use crate::settings::SkipRegistry;

/// A fast package manager and meta build tool for the D programming
/// language.
#[derive(Parser)]
#[command(name = "drover", version, about, max_term_width = 100)]
pub struct Opts {
    #[command(subcommand)]
    pub command: Option<SubCommands>,

    #[command(flatten)]
    pub common: CommonOpts,
}

/// Application subcommands. Running without one builds and runs the
/// package in the current directory.
#[derive(Parser)]
pub enum SubCommands {
    /// Create a new package skeleton
    Init(InitOpts),

    /// Build the package in the current directory
    Build(BuildOpts),

    /// Build and run the package
    Run(RunOpts),

    /// Build and run the package's unit tests
    Test(BuildOpts),

    /// Fetch a package into the local cache
    Fetch(FetchOpts),

    /// Remove a fetched package from the local cache
    Remove(RemoveOpts),

    /// Update the selected dependency versions
    Upgrade(UpgradeOpts),

    /// Print a build description of the package graph
    Describe(DescribeOpts),

    /// Remove build artifacts of the current package
    Clean(CleanOpts),

    /// Generate project files for another build system
    Generate(GenerateOpts),

    /// Search the registry for packages
    Search(SearchOpts),

    /// Register a local directory as a package with a fixed version
    AddLocal(PathVersionOpts),

    /// Deregister a local package directory
    RemoveLocal(PathOpts),

    /// Add a directory searched for packages
    AddPath(PathOpts),

    /// Remove a package search directory
    RemovePath(PathOpts),

    /// Redirect a dependency to another version or path
    AddOverride(AddOverrideOpts),

    /// Remove a dependency override
    RemoveOverride(RemoveOverrideOpts),

    /// List every known package
    List,

    /// List the dependency overrides
    ListOverrides,

    /// Reduce a failing build to a minimal test case
    Dustmite(DustmiteOpts),
}

/// Options shared by every command.
#[derive(Parser, Debug, Clone)]
pub struct CommonOpts {
    /// Operate on the package in this directory
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Additional package registry (may carry space-separated fallbacks)
    #[arg(long, global = true)]
    pub registry: Vec<String>,

    /// Which registries to skip
    #[arg(long, global = true, value_enum)]
    pub skip_registry: Option<SkipRegistry>,

    /// The compiler binary to build with
    #[arg(long, global = true)]
    pub compiler: Option<String>,

    /// Target architecture triple or name
    #[arg(long, global = true)]
    pub arch: Option<String>,

    /// Never prompt; assume the safe answer
    #[arg(long, global = true)]
    pub non_interactive: bool,

    /// Answer prompts affirmatively
    #[arg(long, global = true)]
    pub yes: bool,

    /// When to color the output
    #[arg(long, global = true, value_enum, default_value_t = Color::Auto)]
    pub color: Color,

    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,

    /// Lowest verbosity: print nothing but requested data
    #[arg(long = "vquiet", global = true)]
    pub very_quiet: bool,

    /// Highest verbosity
    #[arg(long = "vverbose", global = true)]
    pub very_verbose: bool,
}

/// Which cache scope a command operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CacheScope {
    /// The package's own `.dub` directory
    Local,
    /// The per-user cache
    #[default]
    User,
    /// The system-wide cache
    System,
}

/// How sources are grouped into compiler invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BuildMode {
    /// One invocation per package
    #[default]
    Separate,
    /// Everything in a single invocation
    AllAtOnce,
    /// One invocation per source file
    SingleFile,
}

#[derive(Parser, Debug, Clone)]
pub struct BuildOpts {
    /// The build configuration to use
    #[arg(long)]
    pub config: Option<String>,

    /// Override a dependency's configuration (`package/configuration`)
    #[arg(long = "override-config", value_name = "PKG/CONFIG")]
    pub override_config: Vec<String>,

    /// The build type (debug, release, unittest, ...)
    #[arg(long = "build", default_value = "debug")]
    pub build_type: String,

    /// How sources are grouped into compiler invocations
    #[arg(long, value_enum, default_value_t)]
    pub build_mode: BuildMode,

    /// Rebuild even when the cache is up to date
    #[arg(long, short = 'f')]
    pub force: bool,

    /// Freshness policy for the build cache
    #[arg(long, value_enum)]
    pub cache_policy: Option<HashPolicy>,

    /// Which cache the artifacts land in
    #[arg(long, value_enum, default_value_t)]
    pub cache: CacheScope,

    /// Do not resolve missing dependencies
    #[arg(long)]
    pub nodeps: bool,

    /// Build into a temporary directory, leaving the cache untouched
    #[arg(long)]
    pub temp_build: bool,

    /// Reduce compiler memory usage
    #[arg(long)]
    pub low_memory: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct RunOpts {
    #[command(flatten)]
    pub build: BuildOpts,

    /// Arguments passed to the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct InitOpts {
    /// Directory (and default name) of the new package
    pub directory: PathBuf,

    /// Dependencies added to the new package
    pub dependencies: Vec<String>,

    /// The skeleton flavor
    #[arg(long = "type", value_enum, default_value_t)]
    pub template: ProjectTemplate,

    /// Package name when it differs from the directory
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct FetchOpts {
    /// Package to fetch, optionally `name@version`
    pub package: String,

    /// Fetch the package's transitive dependencies as well
    #[arg(long)]
    pub recursive: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct RemoveOpts {
    /// Package to remove, optionally `name@version`
    pub package: String,
}

#[derive(Parser, Debug, Clone)]
pub struct UpgradeOpts {
    /// Re-resolve and write the selections without fetching
    #[arg(long)]
    pub select: bool,

    /// Only select dependencies that have no selection yet
    #[arg(long)]
    pub missing_only: bool,

    /// Check that the selections still satisfy every requirement
    #[arg(long)]
    pub verify: bool,

    /// Consider pre-release versions
    #[arg(long)]
    pub prerelease: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct DescribeOpts {
    /// Package to describe instead of the current one (`name@version`)
    pub package: Option<String>,

    /// Print one data field instead of the full description
    #[arg(long = "data")]
    pub data: Vec<String>,

    /// Print data fields as newline-separated lists
    #[arg(long)]
    pub data_list: bool,

    /// Separate list values with NUL bytes
    #[arg(long = "data-0")]
    pub data_null: bool,

    /// Exclude dependency versions from the output
    #[arg(long)]
    pub filter_versions: bool,

    /// The build configuration to describe
    #[arg(long)]
    pub config: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct CleanOpts {
    /// Clean every cached package's artifacts, not just this package's
    #[arg(long)]
    pub all_packages: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct GenerateOpts {
    /// The project format to generate (e.g. `cmake`, `sublimetext`)
    pub generator: String,
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOpts {
    /// The search terms
    pub query: String,
}

#[derive(Parser, Debug, Clone)]
pub struct PathOpts {
    pub path: PathBuf,
}

#[derive(Parser, Debug, Clone)]
pub struct PathVersionOpts {
    pub path: PathBuf,

    /// Version to register the package under
    pub version: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct AddOverrideOpts {
    /// The package to override
    pub package: String,

    /// The version range the override applies to
    pub source: String,

    /// The replacement: a version or a directory
    pub target: String,
}

#[derive(Parser, Debug, Clone)]
pub struct RemoveOverrideOpts {
    pub package: String,
    pub source: String,
}

#[derive(Parser, Debug, Clone)]
pub struct DustmiteOpts {
    /// Directory the reduced test case is written to
    pub target_dir: PathBuf,
}
