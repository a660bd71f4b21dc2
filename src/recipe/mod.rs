//! The recipe model: what a package declares about itself.

pub mod build_settings;
pub mod sdl_recipe;
pub mod single_file;

use std::path::{Path, PathBuf};

use fs_err as fs;
use indexmap::IndexMap;
use miette::Diagnostic;
use thiserror::Error;

use crate::dependency::Dependency;
use crate::document::{
    bind_record, impl_from_document_record, BindContext, BindError, BindErrorWithSource,
    BindRecord, BindResult, Binder, FromDocument, Node, StrictMode,
};
use crate::platform::{BuildPlatform, PlatformError};
use crate::version::Version;

pub use build_settings::{
    BuildOption, BuildRequirement, BuildSettings, BuildSettingsTemplate, TargetType,
};

/// Recipe file names probed in order when loading from a directory.
pub const RECIPE_FILE_NAMES: &[&str] = &["dub.json", "dub.sdl"];

#[derive(Debug, Error, Diagnostic)]
pub enum RecipeError {
    #[error("no recipe file found in {}", dir.display())]
    NotFound { dir: PathBuf },

    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] Box<BindErrorWithSource>),

    #[error("package `{parent}` has no subpackage `{name}`")]
    UnknownSubPackage { parent: String, name: String },

    #[error("`{0}` refers to a subpackage of a subpackage, which is not allowed")]
    NestedSubPackage(String),

    #[error("subpackage at {} declares name `{actual}`, expected `{expected}`", path.display())]
    SubPackageNameMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("unknown configuration `{config}` for package `{package}`")]
    UnknownConfiguration { package: String, config: String },

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("{} does not contain an embedded recipe comment", path.display())]
    NoEmbeddedRecipe { path: PathBuf },
}

/// Is `name` a valid package (or subpackage) basename?
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Split a `name[:subname]` identity, rejecting nested subpackages.
pub fn split_identity(identity: &str) -> Result<(&str, Option<&str>), RecipeError> {
    match identity.split_once(':') {
        None => Ok((identity, None)),
        Some((base, sub)) => {
            if sub.contains(':') {
                return Err(RecipeError::NestedSubPackage(identity.to_string()));
            }
            Ok((base, Some(sub)))
        }
    }
}

/// A parsed recipe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recipe {
    pub name: String,
    pub version: Option<Version>,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub license: Option<String>,
    pub copyright: Option<String>,
    pub authors: Vec<String>,

    /// The base build settings, spliced from the same mapping as the
    /// package metadata
    pub build: BuildSettingsTemplate,

    pub dependencies: IndexMap<String, Dependency>,
    pub configurations: Vec<ConfigurationSpec>,
    pub sub_packages: Vec<SubPackageSpec>,
    pub default_configuration: Option<String>,
}

/// A named alternative settings block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigurationSpec {
    pub name: String,
    /// Platform specifications this configuration is restricted to;
    /// empty means unrestricted
    pub platforms: Vec<String>,
    pub build: BuildSettingsTemplate,
    pub dependencies: IndexMap<String, Dependency>,
}

/// A subpackage: either inline or a directory holding its own recipe.
#[derive(Debug, Clone, PartialEq)]
pub enum SubPackageSpec {
    Inline(Box<Recipe>),
    Path(PathBuf),
}

impl BindRecord for Recipe {
    fn bind(b: &mut Binder<'_>) -> BindResult<Self> {
        Ok(Recipe {
            name: b.required("name")?,
            version: b.optional("version")?,
            description: b.optional("description")?,
            homepage: b.optional("homepage")?,
            license: b.optional("license")?,
            copyright: b.optional("copyright")?,
            authors: b.optional_or_default("authors")?,
            build: b.flatten()?,
            dependencies: b.optional_or_default("dependencies")?,
            configurations: b.optional_or_default("configurations")?,
            sub_packages: b.optional_or_default("subPackages")?,
            default_configuration: b.optional("defaultConfiguration")?,
        })
    }

    fn validate(&self) -> Result<(), String> {
        if !is_valid_name(&self.name) {
            return Err(format!(
                "invalid package name `{}`: names use lowercase letters, digits, `-` and `_`",
                self.name
            ));
        }
        for sub in &self.sub_packages {
            if let SubPackageSpec::Inline(recipe) = sub {
                if !recipe.sub_packages.is_empty() {
                    return Err(format!(
                        "subpackage `{}` declares its own subpackages; nesting is not allowed",
                        recipe.name
                    ));
                }
            }
        }
        Ok(())
    }
}

impl BindRecord for ConfigurationSpec {
    fn bind(b: &mut Binder<'_>) -> BindResult<Self> {
        Ok(ConfigurationSpec {
            name: b.required("name")?,
            platforms: b.optional_or_default("platforms")?,
            build: b.flatten()?,
            dependencies: b.optional_or_default("dependencies")?,
        })
    }

    fn validate(&self) -> Result<(), String> {
        if !is_valid_name(&self.name) {
            return Err(format!("invalid configuration name `{}`", self.name));
        }
        Ok(())
    }
}

impl_from_document_record!(Recipe, ConfigurationSpec);

impl FromDocument for SubPackageSpec {
    fn from_document(node: &Node, ctx: &BindContext) -> BindResult<Self> {
        if let Some(scalar) = node.as_scalar() {
            return Ok(SubPackageSpec::Path(PathBuf::from(scalar.as_str())));
        }
        let recipe: Recipe = bind_record(node, ctx)?;
        Ok(SubPackageSpec::Inline(Box::new(recipe)))
    }
}

/// The two accepted on-disk formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeFormat {
    Json,
    Sdl,
}

impl RecipeFormat {
    fn from_file_name(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Some(RecipeFormat::Json),
            Some("sdl") => Some(RecipeFormat::Sdl),
            _ => None,
        }
    }
}

impl Recipe {
    /// Parse a recipe from text in the given format.
    pub fn parse(
        text: &str,
        format: RecipeFormat,
        source_name: &str,
        strict: StrictMode,
    ) -> Result<Recipe, BindError> {
        let node = match format {
            RecipeFormat::Json => crate::document::parse_json(text)?,
            RecipeFormat::Sdl => sdl_recipe::sdl_to_node(text)?,
        };
        let ctx = BindContext::new(strict, source_name, text);
        bind_record(&node, &ctx)
    }

    /// Load a recipe from a file, or from a directory by probing the known
    /// recipe file names in priority order.
    pub fn load(path: &Path) -> Result<Recipe, RecipeError> {
        Self::load_with_mode(path, StrictMode::Warn)
    }

    pub fn load_with_mode(path: &Path, strict: StrictMode) -> Result<Recipe, RecipeError> {
        let file = if path.is_dir() {
            RECIPE_FILE_NAMES
                .iter()
                .map(|name| path.join(name))
                .find(|candidate| candidate.is_file())
                .ok_or_else(|| RecipeError::NotFound {
                    dir: path.to_path_buf(),
                })?
        } else {
            path.to_path_buf()
        };

        let format = RecipeFormat::from_file_name(&file).unwrap_or(RecipeFormat::Json);
        let text = fs::read_to_string(&file).map_err(|source| RecipeError::Io {
            path: file.clone(),
            source,
        })?;
        Self::parse(&text, format, &file.to_string_lossy(), strict)
            .map_err(|err| RecipeError::Parse(Box::new(err.with_source(file.to_string_lossy(), text))))
    }

    /// The version this recipe publishes, defaulting to the `~master`
    /// branch for recipes that do not declare one.
    pub fn version_or_default(&self) -> Version {
        self.version
            .clone()
            .unwrap_or_else(|| Version::Branch("master".to_string()))
    }

    /// Look up an immediate subpackage. External subpackages are loaded
    /// from `base_dir` and checked to declare the expected name. Nested
    /// lookups (`a:b` as the subpackage name) are rejected.
    pub fn subpackage(&self, name: &str, base_dir: &Path) -> Result<Recipe, RecipeError> {
        if name.contains(':') {
            return Err(RecipeError::NestedSubPackage(format!(
                "{}:{name}",
                self.name
            )));
        }
        for sub in &self.sub_packages {
            match sub {
                SubPackageSpec::Inline(recipe) if recipe.name == name => {
                    let mut recipe = (**recipe).clone();
                    // subpackages share the enclosing package's version
                    recipe.version = Some(self.version_or_default());
                    return Ok(recipe);
                }
                SubPackageSpec::Inline(_) => {}
                SubPackageSpec::Path(rel) => {
                    let dir = base_dir.join(rel);
                    // the directory name is the cheap first filter
                    if dir.file_name().and_then(|n| n.to_str()) != Some(name) {
                        continue;
                    }
                    let mut recipe = Recipe::load(&dir)?;
                    if recipe.name != name {
                        return Err(RecipeError::SubPackageNameMismatch {
                            path: dir,
                            expected: name.to_string(),
                            actual: recipe.name,
                        });
                    }
                    recipe.version = Some(self.version_or_default());
                    return Ok(recipe);
                }
            }
        }
        Err(RecipeError::UnknownSubPackage {
            parent: self.name.clone(),
            name: name.to_string(),
        })
    }

    /// Names of every subpackage, loading external ones lazily is not
    /// needed for listing: the path's final component is the name.
    pub fn subpackage_names(&self) -> Vec<String> {
        self.sub_packages
            .iter()
            .filter_map(|sub| match sub {
                SubPackageSpec::Inline(recipe) => Some(recipe.name.clone()),
                SubPackageSpec::Path(path) => path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string),
            })
            .collect()
    }

    /// Configurations applicable on `platform`, in declaration order.
    pub fn configurations(
        &self,
        platform: &BuildPlatform,
    ) -> Result<Vec<&ConfigurationSpec>, PlatformError> {
        let mut out = Vec::new();
        for config in &self.configurations {
            if platform.matches_any(&config.platforms)? {
                out.push(config);
            }
        }
        Ok(out)
    }

    /// The configuration used when none is requested: the explicitly named
    /// default when it applies, else the first declared match.
    pub fn default_configuration(
        &self,
        platform: &BuildPlatform,
    ) -> Result<Option<&str>, PlatformError> {
        let matching = self.configurations(platform)?;
        if let Some(name) = &self.default_configuration {
            if matching.iter().any(|c| &c.name == name) {
                return Ok(Some(name.as_str()));
            }
        }
        Ok(matching.first().map(|c| c.name.as_str()))
    }

    fn find_configuration(&self, config: &str) -> Result<&ConfigurationSpec, RecipeError> {
        self.configurations
            .iter()
            .find(|c| c.name == config)
            .ok_or_else(|| RecipeError::UnknownConfiguration {
                package: self.name.clone(),
                config: config.to_string(),
            })
    }

    /// The settings in effect for one platform and configuration: the base
    /// template flattened, with the configuration's overrides applied.
    pub fn effective_settings(
        &self,
        platform: &BuildPlatform,
        config: Option<&str>,
    ) -> Result<BuildSettings, RecipeError> {
        let mut settings = self.build.filtered(platform)?;
        if let Some(config) = config {
            let spec = self.find_configuration(config)?;
            settings.apply_overrides(spec.build.filtered(platform)?);
        }
        Ok(settings)
    }

    /// Global dependencies plus the chosen configuration's, the latter
    /// overriding same-named global entries.
    pub fn dependencies(
        &self,
        config: Option<&str>,
    ) -> Result<IndexMap<String, Dependency>, RecipeError> {
        let mut deps = self.dependencies.clone();
        if let Some(config) = config {
            let spec = self.find_configuration(config)?;
            for (name, dep) in &spec.dependencies {
                deps.insert(name.clone(), dep.clone());
            }
        }
        Ok(deps)
    }

    /// Serialize the recipe back to JSON, used by `init` scaffolding and
    /// the selections-adjacent tooling. Only declared fields are written.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::{json, Map, Value};
        let mut out = Map::new();
        out.insert("name".into(), json!(self.name));
        if let Some(version) = &self.version {
            out.insert("version".into(), json!(version.to_string()));
        }
        if let Some(description) = &self.description {
            out.insert("description".into(), json!(description));
        }
        if let Some(homepage) = &self.homepage {
            out.insert("homepage".into(), json!(homepage));
        }
        if let Some(license) = &self.license {
            out.insert("license".into(), json!(license));
        }
        if let Some(copyright) = &self.copyright {
            out.insert("copyright".into(), json!(copyright));
        }
        if !self.authors.is_empty() {
            out.insert("authors".into(), json!(self.authors));
        }
        if self.build.target_type != TargetType::Autodetect {
            out.insert(
                "targetType".into(),
                json!(self.build.target_type.to_string()),
            );
        }
        if !self.dependencies.is_empty() {
            let mut deps = Map::new();
            for (name, dep) in &self.dependencies {
                deps.insert(name.clone(), json!(dep.to_string()));
            }
            out.insert("dependencies".into(), Value::Object(deps));
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(text: &str) -> Recipe {
        Recipe::parse(text, RecipeFormat::Json, "dub.json", StrictMode::Error).unwrap()
    }

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

    #[test]
    fn minimal_recipe() {
        let recipe = parse(r#"{"name": "demo"}"#);
        assert_eq!(recipe.name, "demo");
        assert_eq!(recipe.version_or_default().to_string(), "~master");
    }

    #[test]
    fn invalid_names_rejected() {
        for bad in ["Demo", "a b", "", "a:b"] {
            let text = format!(r#"{{"name": "{bad}"}}"#);
            assert!(
                Recipe::parse(&text, RecipeFormat::Json, "t", StrictMode::Error).is_err(),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn build_settings_flatten_from_recipe_mapping() {
        let recipe = parse(
            r#"{"name": "demo", "targetType": "executable", "libs-windows": ["ws2_32"]}"#,
        );
        assert_eq!(recipe.build.target_type, TargetType::Executable);
        assert!(recipe.build.libs.contains_key("windows"));
    }

    #[test]
    fn configurations_filter_by_platform() {
        let recipe = parse(
            r#"{
                "name": "demo",
                "configurations": [
                    {"name": "winonly", "platforms": ["windows"]},
                    {"name": "anywhere"},
                    {"name": "posixonly", "platforms": ["posix"]}
                ]
            }"#,
        );
        let names: Vec<_> = recipe
            .configurations(&linux())
            .unwrap()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["anywhere", "posixonly"]);
        assert_eq!(
            recipe.default_configuration(&linux()).unwrap(),
            Some("anywhere")
        );
    }

    #[test]
    fn explicit_default_configuration_wins_when_applicable() {
        let recipe = parse(
            r#"{
                "name": "demo",
                "defaultConfiguration": "special",
                "configurations": [{"name": "plain"}, {"name": "special"}]
            }"#,
        );
        assert_eq!(
            recipe.default_configuration(&linux()).unwrap(),
            Some("special")
        );
    }

    #[test]
    fn effective_settings_apply_configuration_overrides() {
        let recipe = parse(
            r#"{
                "name": "demo",
                "versions": ["Base"],
                "configurations": [
                    {"name": "server", "versions": ["Server"], "targetType": "executable"}
                ]
            }"#,
        );
        let settings = recipe
            .effective_settings(&linux(), Some("server"))
            .unwrap();
        assert_eq!(settings.versions, vec!["Base", "Server"]);
        assert_eq!(settings.target_type, TargetType::Executable);

        let err = recipe.effective_settings(&linux(), Some("missing")).unwrap_err();
        assert!(matches!(err, RecipeError::UnknownConfiguration { .. }));
    }

    #[test]
    fn configuration_dependencies_override_global() {
        let recipe = parse(
            r#"{
                "name": "demo",
                "dependencies": {"logger": "~>1.0", "common": "*"},
                "configurations": [
                    {"name": "new", "dependencies": {"logger": "~>2.0"}}
                ]
            }"#,
        );
        let deps = recipe.dependencies(Some("new")).unwrap();
        assert!(deps["logger"].matches(&"2.1.0".parse().unwrap()));
        assert!(deps.contains_key("common"));
    }

    #[test]
    fn inline_subpackages_share_the_parent_version() {
        let recipe = parse(
            r#"{
                "name": "b",
                "version": "1.0.0",
                "subPackages": [{"name": "a"}, {"name": "b"}]
            }"#,
        );
        let sub = recipe.subpackage("a", Path::new(".")).unwrap();
        assert_eq!(sub.name, "a");
        assert_eq!(sub.version.unwrap().to_string(), "1.0.0");

        let err = recipe.subpackage("zzz", Path::new(".")).unwrap_err();
        assert!(matches!(err, RecipeError::UnknownSubPackage { .. }));
    }

    #[test]
    fn nested_subpackage_lookup_is_rejected() {
        let recipe = parse(r#"{"name": "b", "subPackages": [{"name": "a"}]}"#);
        let err = recipe.subpackage("a:x", Path::new(".")).unwrap_err();
        assert!(matches!(err, RecipeError::NestedSubPackage(_)));
    }

    #[test]
    fn nested_inline_subpackages_rejected_at_parse() {
        let text = r#"{
            "name": "b",
            "subPackages": [{"name": "a", "subPackages": [{"name": "x"}]}]
        }"#;
        assert!(Recipe::parse(text, RecipeFormat::Json, "t", StrictMode::Error).is_err());
    }

    #[test]
    fn split_identity_rules() {
        assert_eq!(split_identity("a").unwrap(), ("a", None));
        assert_eq!(split_identity("a:b").unwrap(), ("a", Some("b")));
        assert!(matches!(
            split_identity("a:b:c"),
            Err(RecipeError::NestedSubPackage(_))
        ));
    }

    #[test]
    fn json_round_trip_preserves_fields() {
        let recipe = parse(
            r#"{
                "name": "demo",
                "version": "1.2.0",
                "description": "sample",
                "dependencies": {"logger": "~>1.0"}
            }"#,
        );
        let text = serde_json::to_string(&recipe.to_json()).unwrap();
        let reparsed = parse(&text);
        assert_eq!(reparsed.name, recipe.name);
        assert_eq!(reparsed.version, recipe.version);
        assert_eq!(reparsed.description, recipe.description);
        assert!(reparsed.dependencies["logger"].matches(&"1.5.0".parse().unwrap()));
    }
}
