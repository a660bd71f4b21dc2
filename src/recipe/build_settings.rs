//! Build-setting records.
//!
//! Recipes declare settings in two layers: the [`BuildSettingsTemplate`]
//! keeps every additive setting keyed by its platform suffix exactly as
//! declared, and [`BuildSettings`] is the flat view after filtering for one
//! concrete platform. Scalar settings (target type and name, main source
//! file) never merge across packages; additive settings do.

use std::path::PathBuf;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::Serialize;
use strum::{Display, EnumString};

use crate::document::{BindRecord, BindResult, Binder, impl_from_document_scalar};
use crate::platform::{BuildPlatform, PlatformError};

/// What a package compiles into.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display, Serialize,
)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum TargetType {
    /// Decide from the package layout: `source/app.d` means executable
    #[default]
    Autodetect,
    /// No artifact at all; the package only contributes its dependencies
    None,
    Executable,
    /// A library in the flavor the platform prefers (static unless overridden)
    Library,
    /// Source files are handed to dependent packages instead of an artifact
    SourceLibrary,
    StaticLibrary,
    DynamicLibrary,
}

impl TargetType {
    /// Whether an artifact is produced that dependents link against.
    pub fn is_linkable(&self) -> bool {
        matches!(
            self,
            TargetType::Library | TargetType::StaticLibrary | TargetType::DynamicLibrary
        )
    }
}

/// Constraints a package places on how it may be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, Serialize)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum BuildRequirement {
    AllowWarnings,
    SilenceWarnings,
    DisallowDeprecations,
    SilenceDeprecations,
    DisallowInlining,
    DisallowOptimization,
    RequireBoundsCheck,
    RequireContracts,
    RelaxProperties,
    NoDefaultFlags,
}

/// Abstract compiler switches a recipe may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, Serialize)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum BuildOption {
    DebugMode,
    ReleaseMode,
    Coverage,
    #[strum(serialize = "coverageCT")]
    #[serde(rename = "coverageCT")]
    CoverageCT,
    DebugInfo,
    DebugInfoC,
    AlwaysStackFrame,
    StackStomping,
    Inline,
    NoBoundsCheck,
    Optimize,
    Profile,
    #[strum(serialize = "profileGC")]
    #[serde(rename = "profileGC")]
    ProfileGC,
    Unittests,
    Verbose,
    IgnoreUnknownPragmas,
    SyntaxOnly,
    Warnings,
    WarningsAsErrors,
    IgnoreDeprecations,
    DeprecationWarnings,
    DeprecationErrors,
    Property,
    BetterC,
}

impl_from_document_scalar!(TargetType, BuildRequirement, BuildOption);

/// Additive values keyed by the platform suffix they were declared under;
/// the empty suffix is the unconditional entry.
pub type Suffixed<T> = IndexMap<String, T>;

/// Build settings as declared, with platform suffixes intact.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildSettingsTemplate {
    // scalar settings, never inherited from dependencies
    pub target_type: TargetType,
    pub target_name: Option<String>,
    pub target_path: Option<PathBuf>,
    pub main_source_file: Option<PathBuf>,
    pub working_directory: Option<PathBuf>,

    // additive settings
    pub source_paths: Suffixed<Vec<String>>,
    pub source_files: Suffixed<Vec<String>>,
    pub excluded_source_files: Suffixed<Vec<String>>,
    pub import_paths: Suffixed<Vec<String>>,
    pub string_import_paths: Suffixed<Vec<String>>,
    pub versions: Suffixed<Vec<String>>,
    pub debug_versions: Suffixed<Vec<String>>,
    pub dflags: Suffixed<Vec<String>>,
    pub lflags: Suffixed<Vec<String>>,
    pub libs: Suffixed<Vec<String>>,
    pub copy_files: Suffixed<Vec<String>>,

    pub pre_generate_commands: Suffixed<Vec<String>>,
    pub post_generate_commands: Suffixed<Vec<String>>,
    pub pre_build_commands: Suffixed<Vec<String>>,
    pub post_build_commands: Suffixed<Vec<String>>,
    pub pre_run_commands: Suffixed<Vec<String>>,
    pub post_run_commands: Suffixed<Vec<String>>,

    pub environments: Suffixed<IndexMap<String, String>>,
    pub build_environments: Suffixed<IndexMap<String, String>>,
    pub run_environments: Suffixed<IndexMap<String, String>>,

    pub build_requirements: Suffixed<Vec<BuildRequirement>>,
    pub build_options: Suffixed<Vec<BuildOption>>,
}

impl BindRecord for BuildSettingsTemplate {
    fn bind(b: &mut Binder<'_>) -> BindResult<Self> {
        Ok(BuildSettingsTemplate {
            target_type: b.optional_or_default("targetType")?,
            target_name: b.optional("targetName")?,
            target_path: b.optional("targetPath")?,
            main_source_file: b.optional("mainSourceFile")?,
            working_directory: b.optional("workingDirectory")?,

            source_paths: b.pattern("sourcePaths")?,
            source_files: b.pattern("sourceFiles")?,
            excluded_source_files: b.pattern("excludedSourceFiles")?,
            import_paths: b.pattern("importPaths")?,
            string_import_paths: b.pattern("stringImportPaths")?,
            versions: b.pattern("versions")?,
            debug_versions: b.pattern("debugVersions")?,
            dflags: b.pattern("dflags")?,
            lflags: b.pattern("lflags")?,
            libs: b.pattern("libs")?,
            copy_files: b.pattern("copyFiles")?,

            pre_generate_commands: b.pattern("preGenerateCommands")?,
            post_generate_commands: b.pattern("postGenerateCommands")?,
            pre_build_commands: b.pattern("preBuildCommands")?,
            post_build_commands: b.pattern("postBuildCommands")?,
            pre_run_commands: b.pattern("preRunCommands")?,
            post_run_commands: b.pattern("postRunCommands")?,

            environments: b.pattern("environments")?,
            build_environments: b.pattern("buildEnvironments")?,
            run_environments: b.pattern("runEnvironments")?,

            build_requirements: b.pattern("buildRequirements")?,
            build_options: b.pattern("buildOptions")?,
        })
    }
}

impl BuildSettingsTemplate {
    /// Flatten this template for one platform: entries whose suffix does
    /// not match are dropped, the rest are appended in declaration order.
    pub fn filtered(&self, platform: &BuildPlatform) -> Result<BuildSettings, PlatformError> {
        fn lists(
            platform: &BuildPlatform,
            suffixed: &Suffixed<Vec<String>>,
        ) -> Result<Vec<String>, PlatformError> {
            let mut out = Vec::new();
            for (suffix, values) in suffixed {
                if platform.matches_specification(suffix)? {
                    out.extend(values.iter().cloned());
                }
            }
            Ok(out)
        }

        fn enums<T: Copy>(
            platform: &BuildPlatform,
            suffixed: &Suffixed<Vec<T>>,
        ) -> Result<Vec<T>, PlatformError> {
            let mut out = Vec::new();
            for (suffix, values) in suffixed {
                if platform.matches_specification(suffix)? {
                    out.extend(values.iter().copied());
                }
            }
            Ok(out)
        }

        fn envs(
            platform: &BuildPlatform,
            suffixed: &Suffixed<IndexMap<String, String>>,
        ) -> Result<IndexMap<String, String>, PlatformError> {
            let mut out = IndexMap::new();
            for (suffix, map) in suffixed {
                if platform.matches_specification(suffix)? {
                    for (key, value) in map {
                        out.insert(key.clone(), value.clone());
                    }
                }
            }
            Ok(out)
        }

        Ok(BuildSettings {
            target_type: self.target_type,
            target_name: self.target_name.clone(),
            target_path: self.target_path.clone(),
            main_source_file: self.main_source_file.clone(),
            working_directory: self.working_directory.clone(),
            source_paths: lists(platform, &self.source_paths)?,
            source_files: lists(platform, &self.source_files)?,
            excluded_source_files: lists(platform, &self.excluded_source_files)?,
            import_paths: lists(platform, &self.import_paths)?,
            string_import_paths: lists(platform, &self.string_import_paths)?,
            versions: lists(platform, &self.versions)?,
            debug_versions: lists(platform, &self.debug_versions)?,
            dflags: lists(platform, &self.dflags)?,
            lflags: lists(platform, &self.lflags)?,
            libs: lists(platform, &self.libs)?,
            copy_files: lists(platform, &self.copy_files)?,
            link_files: Vec::new(),
            pre_generate_commands: lists(platform, &self.pre_generate_commands)?,
            post_generate_commands: lists(platform, &self.post_generate_commands)?,
            pre_build_commands: lists(platform, &self.pre_build_commands)?,
            post_build_commands: lists(platform, &self.post_build_commands)?,
            pre_run_commands: lists(platform, &self.pre_run_commands)?,
            post_run_commands: lists(platform, &self.post_run_commands)?,
            environments: envs(platform, &self.environments)?,
            build_environments: envs(platform, &self.build_environments)?,
            run_environments: envs(platform, &self.run_environments)?,
            build_requirements: enums(platform, &self.build_requirements)?,
            build_options: enums(platform, &self.build_options)?,
        })
    }
}

/// Build settings for one concrete platform, after suffix filtering.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSettings {
    pub target_type: TargetType,
    pub target_name: Option<String>,
    pub target_path: Option<PathBuf>,
    pub main_source_file: Option<PathBuf>,
    pub working_directory: Option<PathBuf>,

    pub source_paths: Vec<String>,
    pub source_files: Vec<String>,
    pub excluded_source_files: Vec<String>,
    pub import_paths: Vec<String>,
    pub string_import_paths: Vec<String>,
    pub versions: Vec<String>,
    pub debug_versions: Vec<String>,
    pub dflags: Vec<String>,
    pub lflags: Vec<String>,
    pub libs: Vec<String>,
    pub copy_files: Vec<String>,
    /// Upstream artifacts passed to the linker; filled by the planner
    pub link_files: Vec<String>,

    pub pre_generate_commands: Vec<String>,
    pub post_generate_commands: Vec<String>,
    pub pre_build_commands: Vec<String>,
    pub post_build_commands: Vec<String>,
    pub pre_run_commands: Vec<String>,
    pub post_run_commands: Vec<String>,

    pub environments: IndexMap<String, String>,
    pub build_environments: IndexMap<String, String>,
    pub run_environments: IndexMap<String, String>,

    pub build_requirements: Vec<BuildRequirement>,
    pub build_options: Vec<BuildOption>,
}

impl BuildSettings {
    /// Apply a configuration block on top of the base settings: additive
    /// fields append, scalar fields override when the block sets them.
    pub fn apply_overrides(&mut self, overrides: BuildSettings) {
        if overrides.target_type != TargetType::Autodetect {
            self.target_type = overrides.target_type;
        }
        if overrides.target_name.is_some() {
            self.target_name = overrides.target_name;
        }
        if overrides.target_path.is_some() {
            self.target_path = overrides.target_path;
        }
        if overrides.main_source_file.is_some() {
            self.main_source_file = overrides.main_source_file;
        }
        if overrides.working_directory.is_some() {
            self.working_directory = overrides.working_directory;
        }

        self.source_paths.extend(overrides.source_paths);
        self.source_files.extend(overrides.source_files);
        self.excluded_source_files
            .extend(overrides.excluded_source_files);
        self.import_paths.extend(overrides.import_paths);
        self.string_import_paths.extend(overrides.string_import_paths);
        self.versions.extend(overrides.versions);
        self.debug_versions.extend(overrides.debug_versions);
        self.dflags.extend(overrides.dflags);
        self.lflags.extend(overrides.lflags);
        self.libs.extend(overrides.libs);
        self.copy_files.extend(overrides.copy_files);
        self.link_files.extend(overrides.link_files);

        self.pre_generate_commands
            .extend(overrides.pre_generate_commands);
        self.post_generate_commands
            .extend(overrides.post_generate_commands);
        self.pre_build_commands.extend(overrides.pre_build_commands);
        self.post_build_commands.extend(overrides.post_build_commands);
        self.pre_run_commands.extend(overrides.pre_run_commands);
        self.post_run_commands.extend(overrides.post_run_commands);

        self.environments.extend(overrides.environments);
        self.build_environments.extend(overrides.build_environments);
        self.run_environments.extend(overrides.run_environments);

        self.build_requirements.extend(overrides.build_requirements);
        self.build_options.extend(overrides.build_options);
    }

    /// Merge the additive contribution of an upstream dependency. Path-like
    /// settings from dependencies come first to establish search priority;
    /// libraries come last to keep link order; scalars never propagate.
    pub fn absorb_upstream(&mut self, upstream: &BuildSettings) {
        fn prepend(own: &mut Vec<String>, upstream: &[String]) {
            let mut merged = upstream.to_vec();
            merged.extend(own.drain(..));
            *own = merged;
        }

        prepend(&mut self.import_paths, &upstream.import_paths);
        prepend(&mut self.string_import_paths, &upstream.string_import_paths);

        self.versions.extend(upstream.versions.iter().cloned());
        self.debug_versions
            .extend(upstream.debug_versions.iter().cloned());
        self.dflags.extend(upstream.dflags.iter().cloned());
        self.lflags.extend(upstream.lflags.iter().cloned());
        self.libs.extend(upstream.libs.iter().cloned());
        self.link_files.extend(upstream.link_files.iter().cloned());
        self.copy_files.extend(upstream.copy_files.iter().cloned());
        self.build_requirements
            .extend(upstream.build_requirements.iter().copied());
    }

    /// Drop duplicate entries while keeping first occurrences, for settings
    /// where repetition is meaningless.
    pub fn deduplicate(&mut self) {
        fn dedup(list: &mut Vec<String>) {
            let mut seen = std::collections::HashSet::new();
            list.retain(|item| seen.insert(item.clone()));
        }
        dedup(&mut self.import_paths);
        dedup(&mut self.string_import_paths);
        dedup(&mut self.versions);
        dedup(&mut self.debug_versions);
        dedup(&mut self.libs);
        dedup(&mut self.link_files);
    }
}

/// Parse a whitespace-separated requirement list, used by the command
/// surface for `--build-requirements` style overrides.
pub fn parse_requirements(text: &str) -> Result<Vec<BuildRequirement>, strum::ParseError> {
    text.split_whitespace().map(BuildRequirement::from_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{bind_record, parse_json, BindContext, StrictMode};
    use pretty_assertions::assert_eq;

    fn linux() -> BuildPlatform {
        BuildPlatform {
            platform: vec!["linux".into(), "posix".into()],
            architecture: vec!["x86_64".into()],
            compiler: "dmd".into(),
            compiler_binary: "dmd".into(),
            frontend_version: 2105,
            compiler_version: "2.105.0".into(),
        }
    }

    fn template(text: &str) -> BuildSettingsTemplate {
        let node = parse_json(text).unwrap();
        bind_record(&node, &BindContext::new(StrictMode::Error, "t", text)).unwrap()
    }

    #[test]
    fn platform_suffixes_filter_on_flatten() {
        let t = template(
            r#"{
                "libs": ["common"],
                "libs-posix": ["m"],
                "libs-windows": ["ws2_32"],
                "versions-linux-x86_64": ["FastPath"]
            }"#,
        );
        let settings = t.filtered(&linux()).unwrap();
        assert_eq!(settings.libs, vec!["common", "m"]);
        assert_eq!(settings.versions, vec!["FastPath"]);
    }

    #[test]
    fn scalar_settings_bind_once() {
        let t = template(r#"{"targetType": "executable", "targetName": "app"}"#);
        assert_eq!(t.target_type, TargetType::Executable);
        assert_eq!(t.target_name.as_deref(), Some("app"));
    }

    #[test]
    fn unknown_target_type_is_rejected() {
        let text = r#"{"targetType": "plugin"}"#;
        let node = parse_json(text).unwrap();
        let err = bind_record::<BuildSettingsTemplate>(
            &node,
            &BindContext::new(StrictMode::Error, "t", text),
        )
        .unwrap_err();
        assert!(err.to_string().contains("TargetType"));
    }

    #[test]
    fn requirements_and_options_parse_by_name() {
        let t = template(
            r#"{"buildRequirements": ["allowWarnings"], "buildOptions-posix": ["debugInfo"]}"#,
        );
        let settings = t.filtered(&linux()).unwrap();
        assert_eq!(settings.build_requirements, vec![BuildRequirement::AllowWarnings]);
        assert_eq!(settings.build_options, vec![BuildOption::DebugInfo]);
    }

    #[test]
    fn overrides_append_additive_and_replace_scalar() {
        let mut base = template(r#"{"targetType": "library", "versions": ["A"]}"#)
            .filtered(&linux())
            .unwrap();
        let config = template(r#"{"targetType": "executable", "versions": ["B"]}"#)
            .filtered(&linux())
            .unwrap();
        base.apply_overrides(config);
        assert_eq!(base.target_type, TargetType::Executable);
        assert_eq!(base.versions, vec!["A", "B"]);
    }

    #[test]
    fn upstream_merge_orders_paths_first_and_libs_last() {
        let mut own = BuildSettings {
            import_paths: vec!["own/src".into()],
            libs: vec!["ownlib".into()],
            ..BuildSettings::default()
        };
        let upstream = BuildSettings {
            import_paths: vec!["dep/src".into()],
            libs: vec!["deplib".into()],
            target_name: Some("dep".into()),
            ..BuildSettings::default()
        };
        own.absorb_upstream(&upstream);
        assert_eq!(own.import_paths, vec!["dep/src", "own/src"]);
        assert_eq!(own.libs, vec!["ownlib", "deplib"]);
        // scalars never propagate
        assert_eq!(own.target_name, None);
    }

    #[test]
    fn deduplicate_keeps_first_occurrence() {
        let mut settings = BuildSettings {
            versions: vec!["A".into(), "B".into(), "A".into()],
            ..BuildSettings::default()
        };
        settings.deduplicate();
        assert_eq!(settings.versions, vec!["A", "B"]);
    }
}
