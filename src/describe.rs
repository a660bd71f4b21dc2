//! `describe` output: the build plan rendered for machine consumption.

use serde_json::{json, Value};

use crate::commands::CommandError;
use crate::planner::{BuildPlan, BuildTarget};
use crate::platform::BuildPlatform;

/// Render the description: the full JSON document, or the requested
/// `--data` fields.
pub fn render(
    plan: &BuildPlan,
    platform: &BuildPlatform,
    data: &[String],
    data_list: bool,
    data_null: bool,
    filter_versions: bool,
) -> Result<String, CommandError> {
    if data.is_empty() {
        return Ok(serde_json::to_string_pretty(&full_description(
            plan,
            platform,
            filter_versions,
        ))
        .expect("descriptions serialize"));
    }

    let root = &plan.targets[plan.root];
    let mut chunks = Vec::new();
    for field in data {
        chunks.extend(data_field(root, field)?);
    }
    let separator = if data_null {
        "\0"
    } else if data_list {
        "\n"
    } else {
        " "
    };
    Ok(chunks.join(separator))
}

fn full_description(plan: &BuildPlan, platform: &BuildPlatform, filter_versions: bool) -> Value {
    let root = &plan.targets[plan.root];
    let packages: Vec<Value> = plan
        .targets
        .iter()
        .map(|target| {
            let mut package = json!({
                "name": target.name,
                "path": target.root_dir.to_string_lossy(),
                "configuration": target.configuration,
                "targetType": target.settings.target_type,
                "cacheArtifactPath": target
                    .artifact
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned()),
            });
            if !filter_versions {
                package["version"] = json!(target.version.to_string());
            }
            package
        })
        .collect();

    json!({
        "rootPackage": root.name,
        "configuration": root.configuration,
        "platform": platform.platform,
        "architecture": platform.architecture,
        "compiler": platform.compiler,
        "packages": packages,
        "targets": plan
            .targets
            .iter()
            .map(|target| json!({
                "rootPackage": target.name,
                "buildIdentity": target.identity,
                "dependencies": target
                    .dependencies
                    .iter()
                    .map(|&dep| plan.targets[dep].name.clone())
                    .collect::<Vec<_>>(),
            }))
            .collect::<Vec<_>>(),
    })
}

/// One `--data=` field of the root target.
fn data_field(target: &BuildTarget, field: &str) -> Result<Vec<String>, CommandError> {
    let settings = &target.settings;
    let strings = |values: &[String]| values.to_vec();
    Ok(match field {
        "main-source-file" => settings
            .main_source_file
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect(),
        "target-name" => vec![settings
            .target_name
            .clone()
            .unwrap_or_else(|| target.name.clone())],
        "target-type" => vec![settings.target_type.to_string()],
        "cache-artifact-path" => target
            .artifact
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect(),
        "source-files" => target
            .sources
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect(),
        "import-paths" => strings(&settings.import_paths),
        "string-import-paths" => strings(&settings.string_import_paths),
        "versions" => strings(&settings.versions),
        "debug-versions" => strings(&settings.debug_versions),
        "dflags" => strings(&settings.dflags),
        "lflags" => strings(&settings.lflags),
        "libs" => strings(&settings.libs),
        "linker-files" => strings(&settings.link_files),
        "options" => settings
            .build_options
            .iter()
            .map(|o| o.to_string())
            .collect(),
        other => {
            return Err(CommandError::Usage(format!(
                "unknown --data field `{other}`"
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::{BuildSettings, TargetType};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn sample_plan() -> BuildPlan {
        let target = BuildTarget {
            name: "app".into(),
            version: "1.0.0".parse().unwrap(),
            root_dir: PathBuf::from("/work/app"),
            configuration: Some("default".into()),
            settings: BuildSettings {
                target_type: TargetType::Executable,
                versions: vec!["Demo".into()],
                dflags: vec!["-w".into()],
                ..BuildSettings::default()
            },
            sources: vec![PathBuf::from("/work/app/source/app.d")],
            artifact: Some(PathBuf::from("/cache/app/1.0.0/+default/app")),
            dependencies: vec![],
            upstream_identities: vec![],
            identity: "abc".into(),
        };
        BuildPlan {
            targets: vec![target],
            root: 0,
        }
    }

    fn platform() -> BuildPlatform {
        BuildPlatform {
            platform: vec!["linux".into()],
            architecture: vec!["x86_64".into()],
            compiler: "dmd".into(),
            compiler_binary: "dmd".into(),
            frontend_version: 2105,
            compiler_version: "2.105.0".into(),
        }
    }

    #[test]
    fn full_description_reports_the_cache_artifact() {
        let rendered = render(&sample_plan(), &platform(), &[], false, false, false).unwrap();
        let value: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["rootPackage"], "app");
        assert_eq!(
            value["packages"][0]["cacheArtifactPath"],
            "/cache/app/1.0.0/+default/app"
        );
        assert_eq!(value["packages"][0]["version"], "1.0.0");
    }

    #[test]
    fn filter_versions_drops_versions() {
        let rendered = render(&sample_plan(), &platform(), &[], false, false, true).unwrap();
        let value: Value = serde_json::from_str(&rendered).unwrap();
        assert!(value["packages"][0].get("version").is_none());
    }

    #[test]
    fn data_fields_render_with_separators() {
        let plan = sample_plan();
        let spaced = render(
            &plan,
            &platform(),
            &["versions".into(), "dflags".into()],
            false,
            false,
            false,
        )
        .unwrap();
        assert_eq!(spaced, "Demo -w");

        let listed = render(&plan, &platform(), &["versions".into()], true, false, false).unwrap();
        assert_eq!(listed, "Demo");

        let nulled = render(
            &plan,
            &platform(),
            &["versions".into(), "dflags".into()],
            false,
            true,
            false,
        )
        .unwrap();
        assert_eq!(nulled, "Demo\0-w");
    }

    #[test]
    fn unknown_data_field_is_a_usage_error() {
        let err = render(&sample_plan(), &platform(), &["bogus".into()], false, false, false)
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
