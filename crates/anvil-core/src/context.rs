use std::path::{Path, PathBuf};

use crate::config::{self, WorkspaceConfig};
use crate::version::Architecture;

/// Default directory name under `$HOME`.
const DEFAULT_BASE_DIR: &str = ".anvil";

/// Default name of the default-pointer symlink.
const DEFAULT_KERNEL_NAME: &str = "vmlinux";

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("cannot determine home directory (HOME not set)")]
    NoHome,
    #[error("read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse {}: {detail}", path.display())]
    Parse { path: PathBuf, detail: String },
}

/// Canonical on-disk locations for the pipeline, derived from one base
/// directory. A plain value threaded through the engine, installer, and
/// archiver — never a process-wide singleton.
///
/// Layout under the base dir:
///
/// ```text
/// cache/                     transient download scratch
/// build/build/               source tarball + extracted tree
/// build/artifacts/           packaged outputs + build-stats.json
/// kernels/{version}[-ts]/    installed kernels
/// {kernel_name}              default-pointer symlink
/// ```
#[derive(Debug, Clone)]
pub struct CoreContext {
    base_dir: PathBuf,
    kernel_name: String,
    config: WorkspaceConfig,
}

impl CoreContext {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            kernel_name: DEFAULT_KERNEL_NAME.to_string(),
            config: WorkspaceConfig::default(),
        }
    }

    /// Resolve the context from the environment: `$ANVIL_HOME`, else
    /// `$HOME/.anvil`, then merge `anvil.yaml` from the base dir (or an
    /// explicit path) when present.
    pub async fn resolve(config_path: Option<&Path>) -> Result<Self, ContextError> {
        let base_dir = match std::env::var_os("ANVIL_HOME") {
            Some(dir) => PathBuf::from(dir),
            None => std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(DEFAULT_BASE_DIR))
                .ok_or(ContextError::NoHome)?,
        };

        let config_file = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| base_dir.join("anvil.yaml"));
        let config = if tokio::fs::try_exists(&config_file).await.unwrap_or(false) {
            config::load(&config_file).await?
        } else {
            WorkspaceConfig::default()
        };

        Ok(Self::from_config(base_dir, config))
    }

    pub fn from_config(base_dir: PathBuf, config: WorkspaceConfig) -> Self {
        let base_dir = config.base_dir.clone().unwrap_or(base_dir);
        let kernel_name = config
            .kernel_name
            .clone()
            .unwrap_or_else(|| DEFAULT_KERNEL_NAME.to_string());
        Self {
            base_dir,
            kernel_name,
            config,
        }
    }

    /// Name of the default-pointer symlink.
    pub fn kernel_name(&self) -> &str {
        &self.kernel_name
    }

    /// Transient download scratch.
    pub fn cache_root(&self) -> PathBuf {
        self.base_dir.join("cache")
    }

    /// Root of the build tree (`build/` and `artifacts/` live below it).
    pub fn build_root(&self) -> PathBuf {
        self.base_dir.join("build")
    }

    /// Source tarball and extracted source tree.
    pub fn build_dir(&self) -> PathBuf {
        self.build_root().join("build")
    }

    /// Packaged outputs and `build-stats.json`.
    pub fn artifacts_dir(&self) -> PathBuf {
        self.build_root().join("artifacts")
    }

    pub fn tarball_path(&self, version: &str) -> PathBuf {
        self.build_dir().join(format!("linux-{version}.tar.xz"))
    }

    pub fn source_dir(&self, version: &str) -> PathBuf {
        self.build_dir().join(format!("linux-{version}"))
    }

    /// Scratch location of the upstream signed checksum file.
    pub fn checksums_scratch_path(&self) -> PathBuf {
        self.build_dir().join("sha256sums.asc")
    }

    pub fn build_stats_path(&self) -> PathBuf {
        self.artifacts_dir().join("build-stats.json")
    }

    /// Installed-kernels root; each install gets its own subdirectory.
    pub fn installed_root(&self) -> PathBuf {
        self.base_dir.join("kernels")
    }

    /// Directory holding the default-pointer symlink.
    pub fn data_root(&self) -> &Path {
        &self.base_dir
    }

    /// The default-pointer symlink path.
    pub fn default_pointer(&self) -> PathBuf {
        self.base_dir.join(&self.kernel_name)
    }

    /// Workspace-configured kernel config for an architecture.
    pub fn kernel_config(&self, arch: Architecture) -> Option<&Path> {
        self.config.kernel_config.get(arch)
    }
}
