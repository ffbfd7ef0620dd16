use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Persisted record of a completed build, stored as
/// `{build_root}/artifacts/build-stats.json`.
///
/// This record is the sole cache key: a parseable record whose referenced
/// artifacts still exist means "a completed build exists". Durations are
/// integer nanoseconds, sizes are bytes, hashes lowercase hex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStats {
    pub kernel_version: String,
    pub output_path: PathBuf,
    pub compressed_path: PathBuf,
    pub total_duration: i64,
    pub download_duration: i64,
    pub extract_duration: i64,
    pub configure_duration: i64,
    pub compile_duration: i64,
    pub package_duration: i64,
    pub uncompressed_size: i64,
    pub compressed_size: i64,
    pub uncompressed_hash: String,
    pub compressed_hash: String,
    pub build_timestamp: DateTime<Utc>,
}

impl BuildStats {
    /// Read a record, tolerating a missing or malformed file (→ `None`, i.e.
    /// "no cache").
    pub async fn load(path: &Path) -> Option<BuildStats> {
        let content = tokio::fs::read(path).await.ok()?;
        match serde_json::from_slice(&content) {
            Ok(stats) => Some(stats),
            Err(e) => {
                debug!("ignoring malformed {}: {e}", path.display());
                None
            }
        }
    }

    /// Atomically replace the record: write a sibling temp file, then rename.
    pub async fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(std::io::Error::other)?;
        let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
        tokio::fs::write(&tmp, &json).await?;
        match tokio::fs::rename(&tmp, path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                Err(e)
            }
        }
    }

    /// Whether both referenced artifacts are still on disk.
    pub async fn artifacts_exist(&self) -> bool {
        let output = tokio::fs::try_exists(&self.output_path).await.unwrap_or(false);
        let compressed = tokio::fs::try_exists(&self.compressed_path)
            .await
            .unwrap_or(false);
        output && compressed
    }

    /// Cache-key comparison against a requested version; `None` matches any.
    pub fn matches_version(&self, requested: Option<&str>) -> bool {
        requested.is_none_or(|v| v == self.kernel_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(dir: &Path) -> BuildStats {
        BuildStats {
            kernel_version: "6.9.1".to_string(),
            output_path: dir.join("vmlinux-6.9.1-x86_64"),
            compressed_path: dir.join("vmlinux-6.9.1-x86_64.xz"),
            total_duration: 90_000_000_000,
            download_duration: 10_000_000_000,
            extract_duration: 5_000_000_000,
            configure_duration: 1_000_000_000,
            compile_duration: 70_000_000_000,
            package_duration: 4_000_000_000,
            uncompressed_size: 54_525_952,
            compressed_size: 11_534_336,
            uncompressed_hash: "ab".repeat(32),
            compressed_hash: "cd".repeat(32),
            build_timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build-stats.json");
        let stats = sample(dir.path());

        stats.save(&path).await.unwrap();
        let loaded = BuildStats::load(&path).await.unwrap();
        assert_eq!(loaded, stats);
    }

    #[tokio::test]
    async fn load_tolerates_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build-stats.json");
        assert!(BuildStats::load(&path).await.is_none());

        tokio::fs::write(&path, b"{not json").await.unwrap();
        assert!(BuildStats::load(&path).await.is_none());
    }

    #[tokio::test]
    async fn artifacts_exist_requires_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let stats = sample(dir.path());
        assert!(!stats.artifacts_exist().await);

        tokio::fs::write(&stats.output_path, b"elf").await.unwrap();
        assert!(!stats.artifacts_exist().await);

        tokio::fs::write(&stats.compressed_path, b"xz").await.unwrap();
        assert!(stats.artifacts_exist().await);
    }

    #[tokio::test]
    async fn version_match_is_exact_or_unconstrained() {
        let dir = tempfile::tempdir().unwrap();
        let stats = sample(dir.path());
        assert!(stats.matches_version(None));
        assert!(stats.matches_version(Some("6.9.1")));
        assert!(!stats.matches_version(Some("6.9.2")));
    }

    #[tokio::test]
    async fn save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build-stats.json");
        sample(dir.path()).save(&path).await.unwrap();

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["build-stats.json".to_string()]);
    }
}
