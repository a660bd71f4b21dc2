//! Building: the artifact cache and the compiler driver.

pub mod db;
pub mod invoke;
pub mod lock;

use std::path::PathBuf;
use std::sync::Arc;

use fs_err as fs;
use indexmap::IndexMap;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::planner::{BuildPlan, BuildTarget, HashPolicy};
use crate::platform::BuildPlatform;

pub use db::{BuildDescription, CacheDb, CacheDbError, CacheEntry};
pub use invoke::{
    canonical_compiler_name, compiler_args, find_compiler, probe_platform, run_commands,
};
pub use lock::{Acquired, LockError};

#[derive(Debug, Error)]
pub enum BuildError {
    /// The compiler exited non-zero; stderr has already been passed
    /// through to the user
    #[error("compiler failed with exit code {exit}")]
    Compiler { exit: i32, stderr: String },

    #[error("command `{command}` failed with exit code {exit}")]
    CommandFailed { command: String, exit: i32 },

    #[error("no D compiler found (tried: {tried}); set `DC` or use --compiler")]
    CompilerNotFound { tried: String },

    #[error("failed to access {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("build cancelled")]
    Cancelled,

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    CacheDb(#[from] CacheDbError),

    #[error("a build task panicked")]
    TaskPanic,
}

/// The result of building (or reusing) one target.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// The artifact, absent for target types that produce none
    pub artifact: Option<PathBuf>,
    /// True when a prior build was reused
    pub cached: bool,
}

/// Executes build plans against the cache.
pub struct Builder {
    pub platform: BuildPlatform,
    pub policy: HashPolicy,
    pub low_memory: bool,
    /// Rebuild even on a cache hit
    pub force: bool,
    /// Concurrent compile jobs
    pub jobs: usize,
    pub cancel: CancellationToken,
}

impl Builder {
    pub fn new(platform: BuildPlatform, policy: HashPolicy) -> Self {
        Builder {
            platform,
            policy,
            low_memory: false,
            force: false,
            jobs: num_cpus::get(),
            cancel: CancellationToken::new(),
        }
    }

    /// Build one target, reusing the cached artifact when the identity
    /// matches. At most one build per identity runs on the host; waiters
    /// that observe the artifact appear return without compiling.
    pub async fn build_target(&self, target: &BuildTarget) -> Result<BuildOutcome, BuildError> {
        let Some(artifact) = target.artifact.clone() else {
            return Ok(BuildOutcome {
                artifact: None,
                cached: true,
            });
        };
        let cache_dir = artifact
            .parent()
            .expect("artifacts live in a cache directory")
            .to_path_buf();
        let cache = CacheDb::new(&cache_dir);

        if !self.force {
            match self.cached_artifact(&cache, target)? {
                CacheProbe::Hit(found) => {
                    debug!("`{}` is up to date", target.name);
                    return Ok(BuildOutcome {
                        artifact: Some(found),
                        cached: true,
                    });
                }
                CacheProbe::Corrupted(found) => {
                    // clean and fall through into a single rebuild
                    warn!(
                        "cached artifact {} is corrupted; rebuilding",
                        found.display()
                    );
                    let _ = fs::remove_file(&found);
                    cache.forget(&target.identity)?;
                }
                CacheProbe::Miss => {}
            }
        }

        let acquired = lock::acquire(&cache_dir, || {
            matches!(
                self.cached_artifact(&cache, target),
                Ok(CacheProbe::Hit(_))
            )
        })
        .await?;
        let _guard = match acquired {
            Acquired::Lock(guard) => guard,
            Acquired::ArtifactAppeared => {
                return Ok(BuildOutcome {
                    artifact: Some(artifact),
                    cached: true,
                });
            }
        };

        // somebody may have finished between our probe and the lock
        if !self.force {
            if let CacheProbe::Hit(found) = self.cached_artifact(&cache, target)? {
                return Ok(BuildOutcome {
                    artifact: Some(found),
                    cached: true,
                });
            }
        }

        self.compile(target, &cache, &artifact).await?;
        Ok(BuildOutcome {
            artifact: Some(artifact),
            cached: false,
        })
    }

    fn cached_artifact(
        &self,
        cache: &CacheDb,
        target: &BuildTarget,
    ) -> Result<CacheProbe, BuildError> {
        let Some(found) = cache.lookup(&target.identity)? else {
            return Ok(CacheProbe::Miss);
        };
        let usable = fs::metadata(&found)
            .map(|meta| meta.len() > 0)
            .unwrap_or(false);
        if usable {
            Ok(CacheProbe::Hit(found))
        } else {
            Ok(CacheProbe::Corrupted(found))
        }
    }

    async fn compile(
        &self,
        target: &BuildTarget,
        cache: &CacheDb,
        artifact: &std::path::Path,
    ) -> Result<(), BuildError> {
        let environment = self.environment(target);

        invoke::run_commands(
            &target.settings.pre_build_commands,
            &target.root_dir,
            &environment,
        )
        .await?;

        let binary = PathBuf::from(&self.platform.compiler_binary);
        let file_name = artifact
            .file_name()
            .expect("artifact paths end in a file name")
            .to_string_lossy();
        // two-phase installation: compile next to the final path, rename
        // only on success
        let staging = artifact.with_file_name(format!(".{file_name}.partial"));

        let args = invoke::compiler_args(
            &target.settings,
            &target.sources,
            &staging,
            self.low_memory,
        );
        let response_dir = cache.description_dir(&target.identity);
        let response_file = invoke::write_response_file(&response_dir, &args)?;

        info!("building `{}`", target.name);
        let result = invoke::invoke_compiler(
            &binary,
            &response_file,
            &target.root_dir,
            &environment,
            &self.cancel,
        )
        .await;
        if let Err(err) = result {
            // partial outputs never survive a failed build
            let _ = fs::remove_file(&staging);
            return Err(err);
        }

        // a stale artifact from another identity may occupy the final path
        let _ = fs::remove_file(artifact);
        fs::rename(&staging, artifact).map_err(|source| BuildError::Io {
            path: artifact.to_path_buf(),
            source,
        })?;

        // the database is updated only after the artifact is in place
        cache.record(
            &target.identity,
            artifact,
            &BuildDescription {
                identity: target.identity.clone(),
                compiler_binary: self.platform.compiler_binary.clone(),
                compiler_version: self.platform.compiler_version.clone(),
                flags: args,
                upstream_identities: target.upstream_identities.clone(),
                built_at: db::unix_now(),
            },
        )?;

        invoke::run_commands(
            &target.settings.post_build_commands,
            &target.root_dir,
            &environment,
        )
        .await?;
        Ok(())
    }

    fn environment(&self, target: &BuildTarget) -> IndexMap<String, String> {
        let mut environment: IndexMap<String, String> = std::env::vars().collect();
        for (key, value) in &target.settings.environments {
            environment.insert(key.clone(), value.clone());
        }
        for (key, value) in &target.settings.build_environments {
            environment.insert(key.clone(), value.clone());
        }
        environment
    }

    /// Build every target of the plan, dependencies strictly before
    /// dependents, bounded by the job limit. The first failure cancels
    /// everything in flight.
    pub async fn build_plan(
        self: &Arc<Self>,
        plan: &Arc<BuildPlan>,
    ) -> Result<Vec<BuildOutcome>, BuildError> {
        let total = plan.targets.len();
        let mut outcomes: Vec<Option<BuildOutcome>> = vec![None; total];
        let mut spawned = vec![false; total];
        let mut completed = vec![false; total];
        let semaphore = Arc::new(Semaphore::new(self.jobs.max(1)));
        let mut tasks: JoinSet<(usize, Result<BuildOutcome, BuildError>)> = JoinSet::new();

        loop {
            for index in 0..total {
                let ready = !spawned[index]
                    && plan.targets[index]
                        .dependencies
                        .iter()
                        .all(|&dep| completed[dep]);
                if !ready {
                    continue;
                }
                spawned[index] = true;
                let builder = Arc::clone(self);
                let plan = Arc::clone(plan);
                let semaphore = Arc::clone(&semaphore);
                tasks.spawn(async move {
                    let _permit = semaphore.acquire().await.expect("semaphore never closes");
                    let result = builder.build_target(&plan.targets[index]).await;
                    (index, result)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (index, result) = joined.map_err(|_| BuildError::TaskPanic)?;
            match result {
                Ok(outcome) => {
                    outcomes[index] = Some(outcome);
                    completed[index] = true;
                }
                Err(err) => {
                    self.cancel.cancel();
                    while tasks.join_next().await.is_some() {}
                    return Err(err);
                }
            }
        }

        Ok(outcomes
            .into_iter()
            .map(|o| o.expect("all targets completed"))
            .collect())
    }
}

enum CacheProbe {
    Hit(PathBuf),
    Corrupted(PathBuf),
    Miss,
}
