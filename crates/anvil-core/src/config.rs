use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::context::ContextError;
use crate::version::Architecture;

/// Optional workspace configuration, loaded from `anvil.yaml`.
///
/// Relative paths are resolved against the config file's parent directory.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Overrides the base directory (`~/.anvil` by default).
    pub base_dir: Option<PathBuf>,
    /// Name of the default-pointer symlink (default `vmlinux`).
    pub kernel_name: Option<String>,
    /// Per-architecture kernel build configs used when a build request does
    /// not carry an explicit one.
    pub kernel_config: KernelConfigs,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfigs {
    pub x86_64: Option<PathBuf>,
    pub aarch64: Option<PathBuf>,
}

impl KernelConfigs {
    pub fn get(&self, arch: Architecture) -> Option<&Path> {
        match arch {
            Architecture::X86_64 => self.x86_64.as_deref(),
            Architecture::Aarch64 => self.aarch64.as_deref(),
        }
    }
}

impl WorkspaceConfig {
    fn resolve_relative_paths(&mut self, config_dir: &Path) {
        for path in [
            &mut self.base_dir,
            &mut self.kernel_config.x86_64,
            &mut self.kernel_config.aarch64,
        ]
        .into_iter()
        .flatten()
        {
            if path.is_relative() {
                *path = config_dir.join(&path);
            }
        }
    }
}

/// Load a workspace config from a YAML file.
pub async fn load(path: &Path) -> Result<WorkspaceConfig, ContextError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ContextError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
    let mut config: WorkspaceConfig =
        serde_yaml_ng::from_str(&content).map_err(|e| ContextError::Parse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
    if let Some(config_dir) = path.parent() {
        config.resolve_relative_paths(config_dir);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anvil.yaml");
        tokio::fs::write(&path, "{}").await.unwrap();

        let config = load(&path).await.unwrap();
        assert_eq!(config, WorkspaceConfig::default());
    }

    #[tokio::test]
    async fn relative_config_paths_resolve_against_file_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anvil.yaml");
        tokio::fs::write(
            &path,
            "kernel_config:\n  x86_64: configs/microvm-x86_64.config\n",
        )
        .await
        .unwrap();

        let config = load(&path).await.unwrap();
        assert_eq!(
            config.kernel_config.get(Architecture::X86_64),
            Some(dir.path().join("configs/microvm-x86_64.config").as_path())
        );
        assert!(config.kernel_config.get(Architecture::Aarch64).is_none());
    }

    #[tokio::test]
    async fn malformed_yaml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anvil.yaml");
        tokio::fs::write(&path, "kernel_config: [oops").await.unwrap();

        let err = load(&path).await.unwrap_err();
        assert!(matches!(err, ContextError::Parse { .. }));
    }
}
