use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::version::Architecture;

/// How much integrity checking the Verify phase performs.
///
/// Ordered: `Disabled < Medium < High`. `Medium` trusts the HTTPS origin for
/// the checksum file; `High` additionally requires a PGP signature from the
/// pinned upstream signing key.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum VerificationLevel {
    Disabled,
    Medium,
    #[default]
    High,
}

impl VerificationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationLevel::Disabled => "disabled",
            VerificationLevel::Medium => "medium",
            VerificationLevel::High => "high",
        }
    }
}

impl fmt::Display for VerificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid verification level: {0} (expected disabled, medium, or high)")]
pub struct VerificationLevelParseError(String);

impl FromStr for VerificationLevel {
    type Err = VerificationLevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(VerificationLevel::Disabled),
            "medium" => Ok(VerificationLevel::Medium),
            "high" => Ok(VerificationLevel::High),
            other => Err(VerificationLevelParseError(other.to_string())),
        }
    }
}

/// A single-architecture build request as consumed by the engine.
///
/// `version: None` means "resolve the upstream latest stable first".
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub version: Option<String>,
    pub arch: Architecture,
    pub verification: VerificationLevel,
    /// Explicit kernel config; falls back to the workspace config entry.
    pub config_file: Option<PathBuf>,
    pub force_rebuild: bool,
    /// Hint for interactive front-ends; the engine itself ignores it.
    pub interactive: bool,
}

impl BuildRequest {
    pub fn new(arch: Architecture) -> Self {
        Self {
            version: None,
            arch,
            verification: VerificationLevel::default(),
            config_file: None,
            force_rebuild: false,
            interactive: false,
        }
    }
}
