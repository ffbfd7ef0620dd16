use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Target CPU family for a kernel build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "aarch64")]
    Aarch64,
}

impl Architecture {
    pub const ALL: [Architecture; 2] = [Architecture::X86_64, Architecture::Aarch64];

    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Aarch64 => "aarch64",
        }
    }

    /// Base name of the bootable image this arch produces (`vmlinux` / `Image`).
    pub fn image_base(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "vmlinux",
            Architecture::Aarch64 => "Image",
        }
    }

    /// The `make` target that produces the bootable image.
    pub fn make_target(&self) -> &'static str {
        self.image_base()
    }

    /// Extra variable assignments appended to every kernel `make` invocation.
    pub fn make_arch_args(&self) -> &'static [&'static str] {
        match self {
            Architecture::X86_64 => &[],
            Architecture::Aarch64 => &["ARCH=arm64"],
        }
    }

    /// Cross-compiler prefix when this target cannot be built natively.
    pub fn cross_compile_prefix(&self) -> Option<&'static str> {
        match self {
            Architecture::Aarch64 if !cfg!(target_arch = "aarch64") => {
                Some("aarch64-linux-gnu-")
            }
            _ => None,
        }
    }

    /// Compiler binary that must be on PATH for this target.
    pub fn required_compiler(&self) -> &'static str {
        match self.cross_compile_prefix() {
            Some(_) => "aarch64-linux-gnu-gcc",
            None => "gcc",
        }
    }

    /// Relative path of the built image inside the kernel source tree.
    pub fn image_path_in_source(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "vmlinux",
            Architecture::Aarch64 => "arch/arm64/boot/Image",
        }
    }

    /// Packaged image filename: `vmlinux-6.9.1-x86_64` / `Image-6.9.1-aarch64`.
    pub fn kernel_filename(&self, version: &str) -> String {
        format!("{}-{version}-{}", self.image_base(), self.as_str())
    }

    /// Packaged kernel config filename: `config-6.9.1-x86_64`.
    pub fn config_filename(&self, version: &str) -> String {
        format!("config-{version}-{}", self.as_str())
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unsupported architecture: {0} (expected x86_64, aarch64, or all)")]
pub struct ArchParseError(String);

impl FromStr for Architecture {
    type Err = ArchParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x86_64" | "amd64" => Ok(Architecture::X86_64),
            "aarch64" | "arm64" => Ok(Architecture::Aarch64),
            other => Err(ArchParseError(other.to_string())),
        }
    }
}

/// Architecture as requested at the CLI boundary: one target or `all`,
/// which fans out into one build per supported family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchSelection {
    One(Architecture),
    All,
}

impl ArchSelection {
    pub fn expand(&self) -> Vec<Architecture> {
        match self {
            ArchSelection::One(arch) => vec![*arch],
            ArchSelection::All => Architecture::ALL.to_vec(),
        }
    }
}

impl FromStr for ArchSelection {
    type Err = ArchParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            Ok(ArchSelection::All)
        } else {
            Architecture::from_str(s).map(ArchSelection::One)
        }
    }
}

impl fmt::Display for ArchSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchSelection::One(arch) => arch.fmt(f),
            ArchSelection::All => f.write_str("all"),
        }
    }
}

/// First dotted component of an upstream version string (`"6.9.1"` → `"6"`).
///
/// Returns `None` when the leading component is empty or non-numeric.
pub fn major(version: &str) -> Option<&str> {
    version
        .split('.')
        .next()
        .filter(|c| !c.is_empty() && c.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arch_round_trips_through_str() {
        for arch in Architecture::ALL {
            assert_eq!(arch.as_str().parse::<Architecture>().unwrap(), arch);
        }
    }

    #[test]
    fn arch_aliases_parse() {
        assert_eq!("amd64".parse::<Architecture>().unwrap(), Architecture::X86_64);
        assert_eq!("arm64".parse::<Architecture>().unwrap(), Architecture::Aarch64);
        assert!("riscv64".parse::<Architecture>().is_err());
    }

    #[test]
    fn all_selection_expands_to_both_families() {
        assert_eq!(
            "all".parse::<ArchSelection>().unwrap().expand(),
            vec![Architecture::X86_64, Architecture::Aarch64]
        );
        assert_eq!(
            "x86_64".parse::<ArchSelection>().unwrap().expand(),
            vec![Architecture::X86_64]
        );
    }

    #[test]
    fn kernel_filenames_follow_arch_convention() {
        assert_eq!(
            Architecture::X86_64.kernel_filename("6.9.1"),
            "vmlinux-6.9.1-x86_64"
        );
        assert_eq!(
            Architecture::Aarch64.kernel_filename("6.9.1"),
            "Image-6.9.1-aarch64"
        );
        assert_eq!(
            Architecture::Aarch64.config_filename("6.9.1"),
            "config-6.9.1-aarch64"
        );
    }

    #[test]
    fn major_extracts_leading_component() {
        assert_eq!(major("6.9.1"), Some("6"));
        assert_eq!(major("5.10"), Some("5"));
        assert_eq!(major(""), None);
        assert_eq!(major("latest"), None);
    }
}
