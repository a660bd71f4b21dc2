//! End-to-end rebuild behavior: plan a small project, build it with a
//! stand-in compiler, and check when the cache is reused under each
//! freshness policy.

#![cfg(unix)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fs_err as fs;

use drover::builder::Builder;
use drover::package::{Package, PackageManager, SelectionsFile};
use drover::planner::{plan, BuildPlan, HashPolicy, PlanRequest};
use drover::platform::BuildPlatform;

fn fake_compiler(dir: &Path) -> PathBuf {
    let script = dir.join("fake-dmd");
    let log = dir.join("invocations");
    fs::write(
        &script,
        format!(
            "#!/bin/sh\n\
             rsp=\"${{1#@}}\"\n\
             out=$(grep -- '-of' \"$rsp\" | head -n1)\n\
             out=\"${{out#-of}}\"\n\
             out=\"${{out%\\\"}}\"; out=\"${{out#\\\"}}\"\n\
             echo run >> {}\n\
             mkdir -p \"$(dirname \"$out\")\"\n\
             echo binary > \"$out\"\n",
            log.display()
        ),
    )
    .unwrap();
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script
}

fn invocations(dir: &Path) -> usize {
    fs::read_to_string(dir.join("invocations"))
        .map(|text| text.lines().count())
        .unwrap_or(0)
}

struct Scenario {
    tree: tempfile::TempDir,
    project_dir: PathBuf,
    source: PathBuf,
    cache_dir: PathBuf,
    platform: BuildPlatform,
    policy: HashPolicy,
}

impl Scenario {
    fn new(policy: HashPolicy) -> Scenario {
        let tree = tempfile::tempdir().unwrap();
        let project_dir = tree.path().join("app");
        let source = project_dir.join("source/app.d");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::write(
            project_dir.join("dub.json"),
            r#"{"name": "app", "version": "0.1.0", "targetType": "executable",
                "mainSourceFile": "source/app.d"}"#,
        )
        .unwrap();
        fs::write(&source, "void main() {}\n").unwrap();

        let compiler = fake_compiler(tree.path());
        let mut platform = BuildPlatform::host();
        platform.compiler = "dmd".into();
        platform.compiler_binary = compiler.to_string_lossy().into_owned();
        platform.compiler_version = "2.105.0".into();
        platform.frontend_version = 2105;

        Scenario {
            cache_dir: tree.path().join("cache"),
            tree,
            project_dir,
            source,
            platform,
            policy,
        }
    }

    async fn build(&self) -> Arc<BuildPlan> {
        let root = Package::load(&self.project_dir, None).unwrap();
        let manager = PackageManager::new(self.tree.path().join("dub-home"), vec![]).unwrap();
        let overrides = HashMap::new();
        let built_plan = plan(
            &root,
            &SelectionsFile::default(),
            &manager,
            &PlanRequest {
                platform: &self.platform,
                configuration: None,
                config_overrides: &overrides,
                policy: self.policy,
                cache_dir: &self.cache_dir,
            },
        )
        .unwrap();
        let built_plan = Arc::new(built_plan);
        let builder = Arc::new(Builder::new(self.platform.clone(), self.policy));
        builder.build_plan(&built_plan).await.unwrap();
        built_plan
    }

    fn runs(&self) -> usize {
        invocations(self.tree.path())
    }
}

#[tokio::test]
async fn hash_policy_rebuilds_on_content_not_mtime() {
    let scenario = Scenario::new(HashPolicy::Hash);

    scenario.build().await;
    assert_eq!(scenario.runs(), 1);

    // identical inputs: no rebuild
    scenario.build().await;
    assert_eq!(scenario.runs(), 1);

    // touching the mtime without changing content: still no rebuild
    let future = SystemTime::now() + Duration::from_secs(3600);
    fs::File::options()
        .append(true)
        .open(&scenario.source)
        .unwrap()
        .into_file()
        .set_modified(future)
        .unwrap();
    scenario.build().await;
    assert_eq!(scenario.runs(), 1);

    // appending a space, even with the mtime pinned back: rebuild
    let original_mtime = fs::metadata(&scenario.source).unwrap().modified().unwrap();
    fs::write(&scenario.source, "void main() {} \n").unwrap();
    fs::File::options()
        .append(true)
        .open(&scenario.source)
        .unwrap()
        .into_file()
        .set_modified(original_mtime)
        .unwrap();
    scenario.build().await;
    assert_eq!(scenario.runs(), 2);
}

#[tokio::test]
async fn time_policy_rebuilds_on_mtime_not_content() {
    let scenario = Scenario::new(HashPolicy::Time);

    scenario.build().await;
    scenario.build().await;
    assert_eq!(scenario.runs(), 1);

    // a later mtime triggers a rebuild even with identical content
    let future = SystemTime::now() + Duration::from_secs(3600);
    fs::File::options()
        .append(true)
        .open(&scenario.source)
        .unwrap()
        .into_file()
        .set_modified(future)
        .unwrap();
    scenario.build().await;
    assert_eq!(scenario.runs(), 2);

    // content changes with the mtime preserved go unnoticed
    let mtime = fs::metadata(&scenario.source).unwrap().modified().unwrap();
    fs::write(&scenario.source, "void main() { }\n").unwrap();
    fs::File::options()
        .append(true)
        .open(&scenario.source)
        .unwrap()
        .into_file()
        .set_modified(mtime)
        .unwrap();
    scenario.build().await;
    assert_eq!(scenario.runs(), 2);
}

#[tokio::test]
async fn artifact_path_exists_only_after_build() {
    let scenario = Scenario::new(HashPolicy::Hash);

    // plan without building to learn the artifact path
    let root = Package::load(&scenario.project_dir, None).unwrap();
    let manager =
        PackageManager::new(scenario.tree.path().join("dub-home"), vec![]).unwrap();
    let overrides = HashMap::new();
    let planned = plan(
        &root,
        &SelectionsFile::default(),
        &manager,
        &PlanRequest {
            platform: &scenario.platform,
            configuration: None,
            config_overrides: &overrides,
            policy: scenario.policy,
            cache_dir: &scenario.cache_dir,
        },
    )
    .unwrap();
    let artifact = planned.targets[planned.root].artifact.clone().unwrap();
    assert!(!artifact.exists());

    scenario.build().await;
    assert!(artifact.is_file());
}
