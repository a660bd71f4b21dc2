//! Layered user settings.
//!
//! Settings come from four layers, lowest priority first: the system-wide
//! file, the user-wide file, the project-local file and a transient layer
//! assembled from command-line flags. Additive fields union across layers
//! with higher-priority entries first; scalar fields carry a set-flag so an
//! explicitly configured default survives an unset higher layer.

use std::path::{Path, PathBuf};

use fs_err as fs;
use indexmap::IndexMap;
use serde::Serialize;
use strum::{Display, EnumString};
use tracing::debug;

use crate::document::{
    bind_record, impl_from_document_scalar, BindContext, BindRecord, BindResult, Binder,
    DocumentError, Merge, SetInfo, StrictMode,
};

/// File name used by every settings layer.
pub const SETTINGS_FILE_NAME: &str = "settings.json";
/// Project-local settings live next to the recipe under this name.
pub const PROJECT_SETTINGS_FILE_NAME: &str = "dub.settings.json";

/// Which registries `fetch` and `upgrade` may consult.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display, Serialize, clap::ValueEnum,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SkipRegistry {
    /// Consult every configured registry
    #[default]
    None,
    /// Skip the built-in default registry
    Standard,
    /// Skip the default registry and any configured ones
    Configured,
    /// Skip all registries, including those given on the command line
    All,
}

impl_from_document_scalar!(SkipRegistry);

/// One layer (or the merged view) of user settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    /// Additional registry URLs; a single entry may carry space-separated
    /// fallback URLs
    pub registry_urls: Vec<String>,
    /// Extra directories scanned for packages
    pub custom_cache_paths: Vec<PathBuf>,

    /// Abort a metadata request making no progress for this long
    pub fetch_idle_timeout: Option<std::time::Duration>,
    /// Abort a metadata request outlasting this in total
    pub fetch_total_timeout: Option<std::time::Duration>,

    pub skip_registry: SetInfo<SkipRegistry>,
    pub default_cache_policy: SetInfo<crate::planner::HashPolicy>,
    pub default_compiler: SetInfo<String>,
    pub default_architecture: SetInfo<String>,
    pub default_low_memory: SetInfo<bool>,
    pub default_environments: SetInfo<IndexMap<String, String>>,
}

impl BindRecord for Settings {
    fn bind(b: &mut Binder<'_>) -> BindResult<Self> {
        Ok(Settings {
            registry_urls: b.optional_or_default("registryUrls")?,
            custom_cache_paths: b.optional_or_default("customCachePaths")?,
            fetch_idle_timeout: b.duration("fetchIdleTimeout")?,
            fetch_total_timeout: b.duration("fetchTotalTimeout")?,
            skip_registry: b.set_info("skipRegistry")?,
            default_cache_policy: b.set_info("defaultCachePolicy")?,
            default_compiler: b.set_info("defaultCompiler")?,
            default_architecture: b.set_info("defaultArchitecture")?,
            default_low_memory: b.set_info("defaultLowMemory")?,
            default_environments: b.set_info("defaultEnvironments")?,
        })
    }
}

impl Merge for Settings {
    fn merge(self, higher: Self) -> Self {
        Settings {
            registry_urls: crate::document::merge_unique(self.registry_urls, higher.registry_urls),
            custom_cache_paths: crate::document::merge_unique(
                self.custom_cache_paths,
                higher.custom_cache_paths,
            ),
            fetch_idle_timeout: self.fetch_idle_timeout.merge(higher.fetch_idle_timeout),
            fetch_total_timeout: self
                .fetch_total_timeout
                .merge(higher.fetch_total_timeout),
            skip_registry: self.skip_registry.merge(higher.skip_registry),
            default_cache_policy: self
                .default_cache_policy
                .merge(higher.default_cache_policy),
            default_compiler: self.default_compiler.merge(higher.default_compiler),
            default_architecture: self
                .default_architecture
                .merge(higher.default_architecture),
            default_low_memory: self.default_low_memory.merge(higher.default_low_memory),
            default_environments: self
                .default_environments
                .merge(higher.default_environments),
        }
    }
}

impl Settings {
    /// Load one settings file; a missing file is an empty layer.
    pub fn load_file(path: &Path) -> Result<Settings, DocumentError> {
        if !path.is_file() {
            return Ok(Settings::default());
        }
        let text = fs::read_to_string(path).map_err(|err| DocumentError::io(path, err))?;
        let node = crate::document::parse_json(&text)
            .map_err(|err| DocumentError::bind(path, text.clone(), err))?;
        let ctx = BindContext::new(StrictMode::Warn, path.to_string_lossy(), text.clone());
        bind_record(&node, &ctx).map_err(|err| DocumentError::bind(path, text, err))
    }

    /// Load and merge the system, user and project layers.
    pub fn load_layered(
        system_dir: &Path,
        user_dir: &Path,
        project_dir: Option<&Path>,
    ) -> Result<Settings, DocumentError> {
        let mut merged = Settings::load_file(&system_dir.join(SETTINGS_FILE_NAME))?;
        merged = merged.merge(Settings::load_file(&user_dir.join(SETTINGS_FILE_NAME))?);
        if let Some(project) = project_dir {
            merged = merged.merge(Settings::load_file(
                &project.join(PROJECT_SETTINGS_FILE_NAME),
            )?);
        }
        debug!(
            registries = merged.registry_urls.len(),
            "loaded layered settings"
        );
        Ok(merged)
    }

    /// Serialize for writing a user-layer file.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::{json, Map, Value};
        let mut out = Map::new();
        if !self.registry_urls.is_empty() {
            out.insert("registryUrls".into(), json!(self.registry_urls));
        }
        if !self.custom_cache_paths.is_empty() {
            let paths: Vec<String> = self
                .custom_cache_paths
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
            out.insert("customCachePaths".into(), json!(paths));
        }
        if let Some(timeout) = self.fetch_idle_timeout {
            out.insert(
                "fetchIdleTimeout".into(),
                json!({ "msecs": timeout.as_millis() as u64 }),
            );
        }
        if let Some(timeout) = self.fetch_total_timeout {
            out.insert(
                "fetchTotalTimeout".into(),
                json!({ "msecs": timeout.as_millis() as u64 }),
            );
        }
        if self.skip_registry.is_set() {
            out.insert(
                "skipRegistry".into(),
                json!(self.skip_registry.value.to_string()),
            );
        }
        if self.default_cache_policy.is_set() {
            out.insert(
                "defaultCachePolicy".into(),
                json!(self.default_cache_policy.value.to_string()),
            );
        }
        if self.default_compiler.is_set() {
            out.insert("defaultCompiler".into(), json!(self.default_compiler.value));
        }
        if self.default_architecture.is_set() {
            out.insert(
                "defaultArchitecture".into(),
                json!(self.default_architecture.value),
            );
        }
        if self.default_low_memory.is_set() {
            out.insert(
                "defaultLowMemory".into(),
                json!(self.default_low_memory.value),
            );
        }
        if self.default_environments.is_set() {
            let env: serde_json::Map<String, Value> = self
                .default_environments
                .value
                .iter()
                .map(|(k, v)| (k.clone(), json!(v)))
                .collect();
            out.insert("defaultEnvironments".into(), Value::Object(env));
        }
        Value::Object(out)
    }
}

/// The directory settings and caches live under: `DUB_HOME` when set, else
/// `~/.dub`.
pub fn dub_home() -> PathBuf {
    if let Some(home) = std::env::var_os("DUB_HOME") {
        return PathBuf::from(home);
    }
    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home).join(".dub");
    }
    // last resort on platforms without HOME
    if let Some(profile) = std::env::var_os("USERPROFILE") {
        return PathBuf::from(profile).join(".dub");
    }
    PathBuf::from(".dub")
}

/// The system-wide settings directory.
pub fn system_settings_dir() -> PathBuf {
    if cfg!(windows) {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
    } else {
        PathBuf::from("/etc/dub")
    }
}
