//! The build platform descriptor and platform-specification matching.
//!
//! Setting names and configuration filters may carry a dash-separated
//! specification like `windows-x86_64-ldc`. Matching consumes at most one
//! platform chunk, then one architecture chunk, then the compiler, in that
//! order; a chunk that fits none of the remaining positions fails the
//! match.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("invalid platform specification `{0}`: the compiler must be the last element")]
    CompilerNotLast(String),
}

/// Everything known about the platform a build targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildPlatform {
    /// Platform tags in decreasing specificity, e.g. `["linux", "posix"]`
    pub platform: Vec<String>,
    /// Architecture tags, e.g. `["x86_64"]`
    pub architecture: Vec<String>,
    /// Canonical compiler name: `dmd`, `ldc` or `gdc`
    pub compiler: String,
    /// The binary the compiler was invoked as, e.g. `ldc2`
    pub compiler_binary: String,
    /// Language frontend version, e.g. `2105` for 2.105
    pub frontend_version: u32,
    /// The compiler's own version string
    pub compiler_version: String,
}

impl BuildPlatform {
    /// The wildcard platform that matches every specification.
    pub fn any() -> Self {
        BuildPlatform {
            platform: vec!["any".to_string()],
            architecture: vec!["any".to_string()],
            compiler: "any".to_string(),
            compiler_binary: String::new(),
            frontend_version: 0,
            compiler_version: String::new(),
        }
    }

    fn is_any(&self) -> bool {
        self.platform.iter().any(|p| p == "any")
    }

    /// The host platform as the process sees it, before a compiler probe
    /// refines it.
    pub fn host() -> Self {
        let platform = if cfg!(target_os = "windows") {
            vec!["windows".to_string()]
        } else if cfg!(target_os = "macos") {
            vec!["osx".to_string(), "darwin".to_string(), "posix".to_string()]
        } else if cfg!(target_os = "freebsd") {
            vec!["freebsd".to_string(), "posix".to_string()]
        } else {
            vec!["linux".to_string(), "posix".to_string()]
        };
        let architecture = if cfg!(target_arch = "x86_64") {
            vec!["x86_64".to_string()]
        } else if cfg!(target_arch = "aarch64") {
            vec!["aarch64".to_string(), "arm64".to_string()]
        } else if cfg!(target_arch = "x86") {
            vec!["x86".to_string()]
        } else {
            vec![std::env::consts::ARCH.to_string()]
        };
        BuildPlatform {
            platform,
            architecture,
            compiler: String::new(),
            compiler_binary: String::new(),
            frontend_version: 0,
            compiler_version: String::new(),
        }
    }

    /// Match a `[-platform][-arch][-compiler]` specification against this
    /// platform. The empty specification matches everything; so does the
    /// [`BuildPlatform::any`] platform.
    pub fn matches_specification(&self, specification: &str) -> Result<bool, PlatformError> {
        if specification.is_empty() {
            return Ok(true);
        }
        if self.is_any() {
            return Ok(true);
        }

        let mut chunks = specification.split('-').peekable();
        // a leading dash produces one empty chunk
        if chunks.peek().map(|c| c.is_empty()).unwrap_or(false) {
            chunks.next();
        }
        let Some(mut current) = chunks.next() else {
            return Ok(true);
        };

        if self.platform.iter().any(|p| p == current) {
            match chunks.next() {
                Some(next) => current = next,
                None => return Ok(true),
            }
        }
        if self.architecture.iter().any(|a| a == current) {
            match chunks.next() {
                Some(next) => current = next,
                None => return Ok(true),
            }
        }
        if self.compiler == current {
            if chunks.next().is_some() {
                return Err(PlatformError::CompilerNotLast(specification.to_string()));
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Match every specification in a configuration's `platforms` filter;
    /// an empty filter matches everything.
    pub fn matches_any(&self, specifications: &[String]) -> Result<bool, PlatformError> {
        if specifications.is_empty() {
            return Ok(true);
        }
        for spec in specifications {
            if self.matches_specification(spec)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn linux_x86_64_dmd() -> BuildPlatform {
        BuildPlatform {
            platform: vec!["linux".into(), "posix".into()],
            architecture: vec!["x86_64".into()],
            compiler: "dmd".into(),
            compiler_binary: "dmd".into(),
            frontend_version: 2105,
            compiler_version: "2.105.0".into(),
        }
    }

    #[rstest]
    #[case("", true)]
    #[case("linux", true)]
    #[case("posix", true)]
    #[case("windows", false)]
    #[case("x86_64", true)]
    #[case("x86", false)]
    #[case("dmd", true)]
    #[case("ldc", false)]
    #[case("linux-x86_64", true)]
    #[case("linux-x86_64-dmd", true)]
    #[case("posix-dmd", true)]
    #[case("x86_64-dmd", true)]
    #[case("linux-dmd", true)]
    #[case("windows-x86_64", false)]
    #[case("linux-aarch64", false)]
    #[case("-linux", true)]
    #[case("-windows-x86_64-ldc", false)]
    fn specification_matching(#[case] spec: &str, #[case] expected: bool) {
        let platform = linux_x86_64_dmd();
        assert_eq!(
            platform.matches_specification(spec).unwrap(),
            expected,
            "spec `{spec}`"
        );
    }

    #[test]
    fn compiler_must_be_last() {
        let platform = linux_x86_64_dmd();
        let err = platform.matches_specification("dmd-x86_64").unwrap_err();
        assert!(matches!(err, PlatformError::CompilerNotLast(_)));
    }

    #[test]
    fn any_platform_matches_everything() {
        let any = BuildPlatform::any();
        for spec in ["", "windows", "osx-aarch64-ldc", "nonsense"] {
            assert!(any.matches_specification(spec).unwrap(), "spec `{spec}`");
        }
    }

    #[test]
    fn matching_is_stable() {
        let platform = linux_x86_64_dmd();
        for _ in 0..3 {
            assert!(platform.matches_specification("linux-x86_64-dmd").unwrap());
        }
    }

    #[test]
    fn empty_filter_list_matches() {
        let platform = linux_x86_64_dmd();
        assert!(platform.matches_any(&[]).unwrap());
        assert!(platform
            .matches_any(&["windows".to_string(), "posix".to_string()])
            .unwrap());
        assert!(!platform.matches_any(&["windows".to_string()]).unwrap());
    }
}
