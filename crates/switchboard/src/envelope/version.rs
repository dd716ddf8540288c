//! Semantic versions and `module@major.minor.patch` handler keys.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// A `major.minor.patch` version compared numerically per component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    major: u64,
    minor: u64,
    patch: u64,
}

impl Version {
    /// Creates a version from its components.
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Major component.
    #[must_use]
    pub const fn major(&self) -> u64 {
        self.major
    }

    /// Minor component.
    #[must_use]
    pub const fn minor(&self) -> u64 {
        self.minor
    }

    /// Patch component.
    #[must_use]
    pub const fn patch(&self) -> u64 {
        self.patch
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionParseError::InvalidVersion {
            input: input.to_owned(),
        };
        let mut parts = input.split('.').map(parse_component);
        let (Some(major), Some(minor), Some(patch), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        match (major, minor, patch) {
            (Some(major_value), Some(minor_value), Some(patch_value)) => {
                Ok(Self::new(major_value, minor_value, patch_value))
            }
            _ => Err(invalid()),
        }
    }
}

/// Digits only, and no leading zero unless the component is `0`.
fn parse_component(component: &str) -> Option<u64> {
    if component.is_empty() || !component.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    if component.len() > 1 && component.starts_with('0') {
        return None;
    }
    component.parse().ok()
}

/// A module name pinned to an exact [`Version`], written `module@x.y.z`.
///
/// The textual form doubles as the registry key and the circuit-breaker key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleVersion {
    module: String,
    version: Version,
}

impl ModuleVersion {
    /// Pairs a module name with a version.
    #[must_use]
    pub fn new(module: impl Into<String>, version: Version) -> Self {
        Self {
            module: module.into(),
            version,
        }
    }

    /// Module name.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Pinned version.
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Canonical `module@x.y.z` key.
    #[must_use]
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.module, self.version)
    }
}

impl FromStr for ModuleVersion {
    type Err = VersionParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.trim().is_empty() {
            return Err(VersionParseError::Empty);
        }
        let Some((module, version)) = input.split_once('@') else {
            return Err(VersionParseError::MissingSeparator {
                input: input.to_owned(),
            });
        };
        if !is_module_name(module) {
            return Err(VersionParseError::InvalidModule {
                input: input.to_owned(),
            });
        }
        let parsed = version
            .parse::<Version>()
            .map_err(|_| VersionParseError::InvalidVersion {
                input: input.to_owned(),
            })?;
        Ok(Self::new(module, parsed))
    }
}

impl Serialize for ModuleVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn is_module_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
}

/// Errors raised when parsing versions or `module@version` strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionParseError {
    /// The input was empty or whitespace.
    #[error("module version must not be empty")]
    Empty,

    /// The input lacked the `@` separator.
    #[error("'{input}' is not of the form module@major.minor.patch")]
    MissingSeparator {
        /// Rejected input.
        input: String,
    },

    /// The module name was empty or contained unsupported characters.
    #[error("'{input}' has an invalid module name")]
    InvalidModule {
        /// Rejected input.
        input: String,
    },

    /// The version was not three dot-separated unsigned integers.
    #[error("'{input}' does not contain a major.minor.patch version")]
    InvalidVersion {
        /// Rejected input.
        input: String,
    },
}
