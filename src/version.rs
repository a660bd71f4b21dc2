//! Package versions and version ranges.
//!
//! A version is either semantic (`1.2.3-rc.1+meta`), a branch (`~master`)
//! or a commit identifier. Branches and commits never match a numeric
//! range; they compare only for equality and are ordered below semantic
//! versions so sorted containers behave deterministically.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::impl_from_document_scalar;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("invalid version `{0}`")]
    InvalidVersion(String),
    #[error("invalid version range `{0}`")]
    InvalidRange(String),
}

/// A concrete package version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    Semver(Semver),
    /// A moving branch reference, written `~name`
    Branch(String),
    /// A git commit identifier (7 to 40 hex digits)
    Commit(String),
}

/// A semantic version with prerelease and build metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Semver {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Vec<Identifier>,
    pub build: Vec<String>,
}

/// A dot-separated prerelease identifier; numeric identifiers order below
/// alphanumeric ones per semver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Numeric(u64),
    Alpha(String),
}

impl Version {
    /// The lowest semantic version, `0.0.0`.
    pub fn min_release() -> Self {
        Version::Semver(Semver::default())
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, Version::Branch(_))
    }

    pub fn is_prerelease(&self) -> bool {
        matches!(self, Version::Semver(s) if !s.prerelease.is_empty())
    }

    pub fn as_semver(&self) -> Option<&Semver> {
        match self {
            Version::Semver(s) => Some(s),
            _ => None,
        }
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if let Some(branch) = text.strip_prefix('~') {
            if branch.is_empty() {
                return Err(VersionError::InvalidVersion(text.to_string()));
            }
            return Ok(Version::Branch(branch.to_string()));
        }
        if let Ok(semver) = text.parse::<Semver>() {
            return Ok(Version::Semver(semver));
        }
        if (7..=40).contains(&text.len()) && text.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(Version::Commit(text.to_ascii_lowercase()));
        }
        Err(VersionError::InvalidVersion(text.to_string()))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Semver(s) => s.fmt(f),
            Version::Branch(name) => write!(f, "~{name}"),
            Version::Commit(hash) => f.write_str(hash),
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        use Version::*;
        match (self, other) {
            (Semver(a), Semver(b)) => a.cmp(b),
            (Branch(a), Branch(b)) => a.cmp(b),
            (Commit(a), Commit(b)) => a.cmp(b),
            // commits < branches < semantic versions
            (Commit(_), _) => Ordering::Less,
            (_, Commit(_)) => Ordering::Greater,
            (Branch(_), Semver(_)) => Ordering::Less,
            (Semver(_), Branch(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Version {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

impl FromStr for Semver {
    type Err = VersionError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionError::InvalidVersion(text.to_string());

        let (core, build) = match text.split_once('+') {
            Some((core, build)) => (core, Some(build)),
            None => (text, None),
        };
        let (numbers, prerelease) = match core.split_once('-') {
            Some((numbers, pre)) => (numbers, Some(pre)),
            None => (core, None),
        };

        let mut parts = numbers.split('.');
        let major = parse_number(parts.next().ok_or_else(invalid)?).ok_or_else(invalid)?;
        let minor = parse_number(parts.next().ok_or_else(invalid)?).ok_or_else(invalid)?;
        let patch = parse_number(parts.next().ok_or_else(invalid)?).ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        let prerelease = match prerelease {
            Some(pre) if pre.is_empty() => return Err(invalid()),
            Some(pre) => pre
                .split('.')
                .map(|part| {
                    if part.is_empty() {
                        return Err(invalid());
                    }
                    if part.chars().all(|c| c.is_ascii_digit()) {
                        parse_number(part).map(Identifier::Numeric).ok_or_else(invalid)
                    } else if part
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-')
                    {
                        Ok(Identifier::Alpha(part.to_string()))
                    } else {
                        Err(invalid())
                    }
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        let build = match build {
            Some(meta) if meta.is_empty() => return Err(invalid()),
            Some(meta) => meta
                .split('.')
                .map(|part| {
                    if !part.is_empty()
                        && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                    {
                        Ok(part.to_string())
                    } else {
                        Err(invalid())
                    }
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(Semver {
            major,
            minor,
            patch,
            prerelease,
            build,
        })
    }
}

/// Numeric components must not carry leading zeros.
fn parse_number(text: &str) -> Option<u64> {
    if text.is_empty() || (text.len() > 1 && text.starts_with('0')) {
        return None;
    }
    text.parse().ok()
}

impl fmt::Display for Semver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.prerelease.is_empty() {
            write!(f, "-")?;
            for (i, id) in self.prerelease.iter().enumerate() {
                if i > 0 {
                    write!(f, ".")?;
                }
                match id {
                    Identifier::Numeric(n) => write!(f, "{n}")?,
                    Identifier::Alpha(s) => write!(f, "{s}")?,
                }
            }
        }
        if !self.build.is_empty() {
            write!(f, "+{}", self.build.join("."))?;
        }
        Ok(())
    }
}

impl Ord for Semver {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (self.prerelease.is_empty(), other.prerelease.is_empty()) {
                (true, true) => Ordering::Equal,
                // a prerelease sorts below its release
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.prerelease.cmp(&other.prerelease),
            })
        // build metadata never participates in ordering
    }
}

impl PartialOrd for Semver {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        use Identifier::*;
        match (self, other) {
            (Numeric(a), Numeric(b)) => a.cmp(b),
            (Alpha(a), Alpha(b)) => a.cmp(b),
            (Numeric(_), Alpha(_)) => Ordering::Less,
            (Alpha(_), Numeric(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A constraint over versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionRange {
    /// `*`: matches every version, branches and commits included
    Any,
    /// Exactly the given version; the only way to require a branch
    Exact(Version),
    /// A numeric interval; branches and commits never match
    Interval {
        min: Option<Bound>,
        max: Option<Bound>,
    },
}

/// One endpoint of a version interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub version: Semver,
    pub inclusive: bool,
}

impl VersionRange {
    /// Does `version` satisfy this range?
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            VersionRange::Any => true,
            VersionRange::Exact(exact) => exact == version,
            VersionRange::Interval { min, max } => {
                let Some(semver) = version.as_semver() else {
                    return false;
                };
                if let Some(bound) = min {
                    let ord = semver.cmp(&bound.version);
                    if ord == Ordering::Less || (ord == Ordering::Equal && !bound.inclusive) {
                        return false;
                    }
                }
                if let Some(bound) = max {
                    let ord = semver.cmp(&bound.version);
                    if ord == Ordering::Greater || (ord == Ordering::Equal && !bound.inclusive) {
                        return false;
                    }
                }
                true
            }
        }
    }

    /// `~>x.y.z` style range: at least the given version, below the bump of
    /// the second-to-last specified component.
    fn approximate(text: &str) -> Result<Self, VersionError> {
        let invalid = || VersionError::InvalidRange(format!("~>{text}"));
        let components: Vec<&str> = text.split('.').collect();
        let (min, max) = match components.as_slice() {
            [major, minor] => {
                let major = parse_number(major).ok_or_else(invalid)?;
                let minor = parse_number(minor).ok_or_else(invalid)?;
                (
                    Semver {
                        major,
                        minor,
                        ..Semver::default()
                    },
                    Semver {
                        major: major + 1,
                        ..Semver::default()
                    },
                )
            }
            [_, _, _] | [_, _, _, _] => {
                // allow a prerelease suffix on the last component
                let min: Semver = text.parse()?;
                (
                    min.clone(),
                    Semver {
                        major: min.major,
                        minor: min.minor + 1,
                        ..Semver::default()
                    },
                )
            }
            _ => return Err(invalid()),
        };
        Ok(VersionRange::Interval {
            min: Some(Bound {
                version: min,
                inclusive: true,
            }),
            max: Some(Bound {
                version: max,
                inclusive: false,
            }),
        })
    }

    /// `^x.y.z` style range: compatible within the leftmost non-zero
    /// component.
    fn caret(text: &str) -> Result<Self, VersionError> {
        let min: Semver = text.parse()?;
        let max = if min.major > 0 {
            Semver {
                major: min.major + 1,
                ..Semver::default()
            }
        } else if min.minor > 0 {
            Semver {
                minor: min.minor + 1,
                ..Semver::default()
            }
        } else {
            Semver {
                patch: min.patch + 1,
                ..Semver::default()
            }
        };
        Ok(VersionRange::Interval {
            min: Some(Bound {
                version: min,
                inclusive: true,
            }),
            max: Some(Bound {
                version: max,
                inclusive: false,
            }),
        })
    }
}

impl FromStr for VersionRange {
    type Err = VersionError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        if text.is_empty() {
            return Err(VersionError::InvalidRange(text.to_string()));
        }
        if text == "*" {
            return Ok(VersionRange::Any);
        }
        if let Some(rest) = text.strip_prefix("~>") {
            return Self::approximate(rest);
        }
        if let Some(rest) = text.strip_prefix('^') {
            return Self::caret(rest);
        }
        if let Some(rest) = text.strip_prefix("==") {
            return Ok(VersionRange::Exact(rest.trim().parse()?));
        }
        if text.starts_with('~') {
            // a branch requirement is an exact match on the branch
            return Ok(VersionRange::Exact(text.parse()?));
        }

        // one or two relational bounds: ">=1.0.0 <2.0.0"
        if text.starts_with('>') || text.starts_with('<') {
            let mut min = None;
            let mut max = None;
            for part in text.split_whitespace() {
                let (op, rest) = if let Some(rest) = part.strip_prefix(">=") {
                    (">=", rest)
                } else if let Some(rest) = part.strip_prefix("<=") {
                    ("<=", rest)
                } else if let Some(rest) = part.strip_prefix('>') {
                    (">", rest)
                } else if let Some(rest) = part.strip_prefix('<') {
                    ("<", rest)
                } else {
                    return Err(VersionError::InvalidRange(text.to_string()));
                };
                let version: Semver = rest.parse()?;
                let bound = Bound {
                    version,
                    inclusive: op.len() == 2,
                };
                match op {
                    ">=" | ">" if min.is_none() => min = Some(bound),
                    "<=" | "<" if max.is_none() => max = Some(bound),
                    _ => return Err(VersionError::InvalidRange(text.to_string())),
                }
            }
            return Ok(VersionRange::Interval { min, max });
        }

        // a bare version is an exact requirement
        Ok(VersionRange::Exact(text.parse()?))
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionRange::Any => f.write_str("*"),
            VersionRange::Exact(version) => version.fmt(f),
            VersionRange::Interval { min, max } => {
                let mut wrote = false;
                if let Some(bound) = min {
                    write!(f, "{}{}", if bound.inclusive { ">=" } else { ">" }, bound.version)?;
                    wrote = true;
                }
                if let Some(bound) = max {
                    if wrote {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}{}", if bound.inclusive { "<=" } else { "<" }, bound.version)?;
                }
                if !wrote && max.is_none() {
                    f.write_str("*")?;
                }
                Ok(())
            }
        }
    }
}

impl_from_document_scalar!(Version, VersionRange);

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("1.2.3")]
    #[case("0.0.0")]
    #[case("1.0.0-rc.1")]
    #[case("1.0.0-alpha.2+build.5")]
    #[case("~master")]
    #[case("deadbeefcafe")]
    fn version_display_round_trips(#[case] text: &str) {
        let version: Version = text.parse().unwrap();
        assert_eq!(version.to_string(), text);
    }

    #[rstest]
    #[case("")]
    #[case("1.2")]
    #[case("1.2.3.4")]
    #[case("01.0.0")]
    #[case("1.0.0-")]
    #[case("~")]
    #[case("not a version")]
    fn invalid_versions_rejected(#[case] text: &str) {
        assert!(text.parse::<Version>().is_err());
    }

    #[test]
    fn semver_ordering() {
        let order = [
            "1.0.0-alpha",
            "1.0.0-alpha.1",
            "1.0.0-alpha.beta",
            "1.0.0-beta",
            "1.0.0-beta.2",
            "1.0.0-beta.11",
            "1.0.0-rc.1",
            "1.0.0",
            "1.0.1",
            "1.1.0",
            "2.0.0",
        ];
        for pair in order.windows(2) {
            let a: Version = pair[0].parse().unwrap();
            let b: Version = pair[1].parse().unwrap();
            assert!(a < b, "{a} should be < {b}");
        }
    }

    #[test]
    fn build_metadata_ignored_in_ordering() {
        let a: Version = "1.0.0+one".parse().unwrap();
        let b: Version = "1.0.0+two".parse().unwrap();
        assert_eq!(a.cmp(&b), Ordering::Equal);
    }

    #[test]
    fn branches_sort_below_releases() {
        let branch: Version = "~master".parse().unwrap();
        let release: Version = "0.0.1".parse().unwrap();
        assert!(branch < release);
    }

    #[rstest]
    #[case("~>1.0", "1.0.0", true)]
    #[case("~>1.0", "1.9.9", true)]
    #[case("~>1.0", "2.0.0", false)]
    #[case("~>1.2.3", "1.2.3", true)]
    #[case("~>1.2.3", "1.2.9", true)]
    #[case("~>1.2.3", "1.3.0", false)]
    #[case("^1.2.3", "1.9.0", true)]
    #[case("^1.2.3", "2.0.0", false)]
    #[case("^0.2.3", "0.2.9", true)]
    #[case("^0.2.3", "0.3.0", false)]
    #[case(">=1.0.0 <2.0.0", "1.5.0", true)]
    #[case(">=1.0.0 <2.0.0", "2.0.0", false)]
    #[case(">1.0.0", "1.0.0", false)]
    #[case("<=1.0.0", "1.0.0", true)]
    #[case("==1.2.3", "1.2.3", true)]
    #[case("==1.2.3", "1.2.4", false)]
    #[case("1.2.3", "1.2.3", true)]
    #[case("*", "1.2.3", true)]
    #[case("*", "~master", true)]
    fn range_matching(#[case] range: &str, #[case] version: &str, #[case] expected: bool) {
        let range: VersionRange = range.parse().unwrap();
        let version: Version = version.parse().unwrap();
        assert_eq!(range.matches(&version), expected, "{range} vs {version}");
    }

    #[test]
    fn branches_only_match_exactly_or_any() {
        let range: VersionRange = "~master".parse().unwrap();
        assert!(range.matches(&"~master".parse().unwrap()));
        assert!(!range.matches(&"~develop".parse().unwrap()));

        let numeric: VersionRange = ">=1.0.0".parse().unwrap();
        assert!(!numeric.matches(&"~master".parse().unwrap()));
    }

    #[test]
    fn prerelease_within_interval_matches_by_ordering() {
        let range: VersionRange = "~>1.0".parse().unwrap();
        // 1.0.2-pre lies inside [1.0.0, 2.0.0); policy filtering happens in
        // the resolver, not here
        assert!(range.matches(&"1.0.2-pre".parse().unwrap()));
    }
}
