//! Compiler discovery and invocation.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use fs_err as fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::BuildError;
use crate::platform::BuildPlatform;
use crate::recipe::{BuildSettings, TargetType};

/// Compiler binaries probed when nothing is configured.
const KNOWN_COMPILERS: &[&str] = &["dmd", "ldc2", "ldmd2", "gdc"];

/// Locate the compiler binary: the explicit request, then `DC`, then the
/// first known binary on `PATH`.
pub fn find_compiler(requested: Option<&str>) -> Result<PathBuf, BuildError> {
    let from_env = || {
        for variable in ["DC", "DMD", "HOST_DC"] {
            if let Ok(value) = std::env::var(variable) {
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
        None
    };
    let candidates: Vec<String> = match requested {
        Some(name) => vec![name.to_string()],
        None => match from_env() {
            Some(compiler) => vec![compiler],
            None => KNOWN_COMPILERS.iter().map(|c| c.to_string()).collect(),
        },
    };
    for candidate in &candidates {
        let path = Path::new(candidate);
        if path.components().count() > 1 && path.is_file() {
            return Ok(path.to_path_buf());
        }
        if let Ok(found) = which::which(candidate) {
            return Ok(found);
        }
    }
    Err(BuildError::CompilerNotFound {
        tried: candidates.join(", "),
    })
}

/// The canonical compiler name for a binary (`ldc2` and `ldmd2` are both
/// `ldc`).
pub fn canonical_compiler_name(binary: &Path) -> String {
    let stem = binary
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    if stem.starts_with("ldc") || stem.starts_with("ldmd") {
        "ldc".to_string()
    } else if stem.starts_with("gdc") || stem.starts_with("gdmd") {
        "gdc".to_string()
    } else {
        "dmd".to_string()
    }
}

/// Run `<compiler> --version` and fill a platform descriptor from it,
/// falling back to the host platform when probing fails.
pub async fn probe_platform(binary: &Path) -> BuildPlatform {
    let mut platform = BuildPlatform::host();
    platform.compiler = canonical_compiler_name(binary);
    platform.compiler_binary = binary.to_string_lossy().into_owned();

    let output = tokio::process::Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .await;
    match output {
        Ok(output) if output.status.success() => {
            let text = String::from_utf8_lossy(&output.stdout);
            if let Some(version) = parse_compiler_version(&text) {
                platform.frontend_version = frontend_number(&version).unwrap_or(0);
                platform.compiler_version = version;
            }
        }
        Ok(output) => warn!(
            "compiler version probe exited with {}",
            output.status.code().unwrap_or(-1)
        ),
        Err(err) => warn!("compiler version probe failed: {err}"),
    }
    platform
}

/// The `2.105.0`-style version out of a `--version` banner.
fn parse_compiler_version(banner: &str) -> Option<String> {
    let first_line = banner.lines().next()?;
    for token in first_line.split_whitespace() {
        let token = token.trim_start_matches('v');
        let mut parts = token.split('.');
        if let (Some(major), Some(_)) = (parts.next(), parts.next()) {
            if major.chars().all(|c| c.is_ascii_digit()) && !major.is_empty() {
                return Some(token.trim_end_matches(':').to_string());
            }
        }
    }
    None
}

/// `2.105.0` becomes frontend number 2105.
fn frontend_number(version: &str) -> Option<u32> {
    let mut parts = version.split('.');
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts.next()?.parse().ok()?;
    Some(major * 1000 + minor)
}

/// Assemble the dmd-style argument list for one target.
pub fn compiler_args(
    settings: &BuildSettings,
    sources: &[PathBuf],
    output: &Path,
    low_memory: bool,
) -> Vec<String> {
    let mut args = Vec::new();

    match settings.target_type {
        TargetType::StaticLibrary | TargetType::Library => args.push("-lib".to_string()),
        TargetType::DynamicLibrary => {
            args.push("-shared".to_string());
            args.push("-fPIC".to_string());
        }
        _ => {}
    }
    args.push(format!("-of{}", output.display()));

    for path in &settings.import_paths {
        args.push(format!("-I{path}"));
    }
    for path in &settings.string_import_paths {
        args.push(format!("-J{path}"));
    }
    for version in &settings.versions {
        args.push(format!("-version={version}"));
    }
    for version in &settings.debug_versions {
        args.push(format!("-debug={version}"));
    }
    args.extend(settings.dflags.iter().cloned());
    if low_memory {
        args.push("-lowmem".to_string());
    }

    for source in sources {
        args.push(source.display().to_string());
    }
    for link_file in &settings.link_files {
        args.push(link_file.clone());
    }
    for flag in &settings.lflags {
        args.push(format!("-L{flag}"));
    }
    if !matches!(
        settings.target_type,
        TargetType::StaticLibrary | TargetType::Library
    ) {
        for lib in &settings.libs {
            if cfg!(windows) {
                args.push(format!("{lib}.lib"));
            } else {
                args.push(format!("-L-l{lib}"));
            }
        }
    }

    // DFLAGS appends to the command line, it never replaces it
    if let Ok(extra) = std::env::var("DFLAGS") {
        args.extend(extra.split_whitespace().map(str::to_string));
    }
    args
}

/// Write the argument list into a response file next to the output, to
/// stay clear of command-line length limits.
pub fn write_response_file(dir: &Path, args: &[String]) -> Result<PathBuf, BuildError> {
    fs::create_dir_all(dir).map_err(|source| BuildError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join("drover.rsp");
    let mut contents = String::new();
    for arg in args {
        if arg.contains(char::is_whitespace) {
            contents.push('"');
            contents.push_str(&arg.replace('"', "\\\""));
            contents.push('"');
        } else {
            contents.push_str(arg);
        }
        contents.push('\n');
    }
    fs::write(&path, contents).map_err(|source| BuildError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Run the compiler with a response file, streaming its output through to
/// the user. On cancellation the child (and, on unix, its process group)
/// is terminated.
pub async fn invoke_compiler(
    binary: &Path,
    response_file: &Path,
    working_dir: &Path,
    environment: &indexmap::IndexMap<String, String>,
    cancel: &CancellationToken,
) -> Result<(), BuildError> {
    let mut command = tokio::process::Command::new(binary);
    command
        .arg(format!("@{}", response_file.display()))
        .current_dir(working_dir)
        .envs(environment.iter().map(|(k, v)| (k.clone(), v.clone())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    debug!("running {} @{}", binary.display(), response_file.display());
    let mut child = command.spawn().map_err(|source| BuildError::Io {
        path: binary.to_path_buf(),
        source,
    })?;

    let stdout = child.stdout.take().expect("stdout is piped");
    let stderr = child.stderr.take().expect("stderr is piped");

    let stdout_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!("{line}");
        }
    });
    // compiler stderr passes through unchanged
    let stderr_task = tokio::spawn(async move {
        use tokio::io::AsyncWriteExt;
        let mut lines = BufReader::new(stderr).lines();
        let mut collected = String::new();
        let mut out = tokio::io::stderr();
        while let Ok(Some(line)) = lines.next_line().await {
            let _ = out.write_all(line.as_bytes()).await;
            let _ = out.write_all(b"\n").await;
            collected.push_str(&line);
            collected.push('\n');
        }
        collected
    });

    let status = tokio::select! {
        status = child.wait() => status.map_err(|source| BuildError::Io {
            path: binary.to_path_buf(),
            source,
        })?,
        _ = cancel.cancelled() => {
            terminate(&mut child).await;
            let _ = stdout_task.await;
            let _ = stderr_task.await;
            return Err(BuildError::Cancelled);
        }
    };

    let _ = stdout_task.await;
    let stderr_text = stderr_task.await.unwrap_or_default();

    if !status.success() {
        return Err(BuildError::Compiler {
            exit: status.code().unwrap_or(-1),
            stderr: stderr_text,
        });
    }
    Ok(())
}

/// Send the platform's terminate signal to the child's process group, then
/// make sure it is gone.
async fn terminate(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // negative pid addresses the whole process group
        unsafe {
            libc::kill(-(pid as i32), libc::SIGTERM);
        }
    }
    let _ = child.kill().await;
}

/// Run pre/post build shell commands in order, stopping at the first
/// failure.
pub async fn run_commands(
    commands: &[String],
    working_dir: &Path,
    environment: &indexmap::IndexMap<String, String>,
) -> Result<(), BuildError> {
    for command_line in commands {
        info!("running command: {command_line}");
        let mut command = if cfg!(windows) {
            let mut c = tokio::process::Command::new("cmd");
            c.arg("/C").arg(command_line);
            c
        } else {
            let mut c = tokio::process::Command::new("sh");
            c.arg("-c").arg(command_line);
            c
        };
        let status = command
            .current_dir(working_dir)
            .envs(environment.iter().map(|(k, v)| (k.clone(), v.clone())))
            .status()
            .await
            .map_err(|source| BuildError::Io {
                path: working_dir.to_path_buf(),
                source,
            })?;
        if !status.success() {
            return Err(BuildError::CommandFailed {
                command: command_line.clone(),
                exit: status.code().unwrap_or(-1),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn version_banner_parsing() {
        assert_eq!(
            parse_compiler_version("DMD64 D Compiler v2.105.0\nCopyright ..."),
            Some("2.105.0".to_string())
        );
        assert_eq!(
            parse_compiler_version("LDC - the LLVM D compiler (1.35.0):"),
            None
        );
        assert_eq!(frontend_number("2.105.0"), Some(2105));
    }

    #[test]
    fn canonical_names() {
        assert_eq!(canonical_compiler_name(Path::new("/usr/bin/ldc2")), "ldc");
        assert_eq!(canonical_compiler_name(Path::new("ldmd2")), "ldc");
        assert_eq!(canonical_compiler_name(Path::new("dmd")), "dmd");
        assert_eq!(canonical_compiler_name(Path::new("gdc-12")), "gdc");
    }

    #[test]
    fn args_cover_every_setting_class() {
        let settings = BuildSettings {
            target_type: TargetType::Executable,
            import_paths: vec!["/pkg/source".into()],
            string_import_paths: vec!["/pkg/views".into()],
            versions: vec!["Demo".into()],
            debug_versions: vec!["Tracing".into()],
            dflags: vec!["-w".into()],
            lflags: vec!["-L/opt/lib".into()],
            libs: vec!["z".into()],
            link_files: vec!["/cache/libdep.a".into()],
            ..BuildSettings::default()
        };
        let args = compiler_args(
            &settings,
            &[PathBuf::from("/pkg/source/app.d")],
            Path::new("/cache/app"),
            true,
        );
        assert!(args.contains(&"-of/cache/app".to_string()));
        assert!(args.contains(&"-I/pkg/source".to_string()));
        assert!(args.contains(&"-J/pkg/views".to_string()));
        assert!(args.contains(&"-version=Demo".to_string()));
        assert!(args.contains(&"-debug=Tracing".to_string()));
        assert!(args.contains(&"-w".to_string()));
        assert!(args.contains(&"-lowmem".to_string()));
        assert!(args.contains(&"/pkg/source/app.d".to_string()));
        assert!(args.contains(&"/cache/libdep.a".to_string()));
        assert!(args.contains(&"-L-L/opt/lib".to_string()));
        // sources precede linker inputs
        let src = args.iter().position(|a| a.ends_with("app.d")).unwrap();
        let lib = args.iter().position(|a| a.ends_with("libdep.a")).unwrap();
        assert!(src < lib);
    }

    #[test]
    fn static_libraries_use_lib_mode_and_skip_system_libs() {
        let settings = BuildSettings {
            target_type: TargetType::StaticLibrary,
            libs: vec!["z".into()],
            ..BuildSettings::default()
        };
        let args = compiler_args(&settings, &[], Path::new("/cache/libx.a"), false);
        assert!(args.contains(&"-lib".to_string()));
        assert!(!args.iter().any(|a| a.contains("-lz") || a.ends_with(".lib")));
    }

    #[test]
    fn response_file_quotes_spaced_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let args = vec!["-ofmy app".to_string(), "-w".to_string()];
        let path = write_response_file(dir.path(), &args).unwrap();
        let contents = fs::read_to_string(path).unwrap();
        assert_eq!(contents, "\"-ofmy app\"\n-w\n");
    }

    #[tokio::test]
    async fn run_commands_stops_on_failure() {
        if cfg!(windows) {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let env = indexmap::IndexMap::new();
        run_commands(
            &["true".to_string(), "touch ran".to_string()],
            dir.path(),
            &env,
        )
        .await
        .unwrap();
        assert!(dir.path().join("ran").is_file());

        let err = run_commands(
            &["false".to_string(), "touch not-run".to_string()],
            dir.path(),
            &env,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BuildError::CommandFailed { .. }));
        assert!(!dir.path().join("not-run").exists());
    }
}
