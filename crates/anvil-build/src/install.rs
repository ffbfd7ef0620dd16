use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anvil_core::{Architecture, BuildStats, CoreContext};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{BuildError, BuildResult};

/// Timestamp suffix of installed version directories: `YYYYMMDDTHHMMSS`.
const INSTALL_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

/// `{version}-{timestamp}`, derived from the build-time timestamp recorded in
/// the stats — not the install-time clock — so the record stays authoritative.
pub fn versioned_name(stats: &BuildStats) -> String {
    format!(
        "{}-{}",
        stats.kernel_version,
        stats.build_timestamp.format(INSTALL_TIMESTAMP_FORMAT)
    )
}

/// Derive the architecture from the trailing segment of an artifact's stem
/// (`vmlinux-6.9.1-x86_64.xz` → `x86_64`).
fn arch_of_artifact(path: &Path) -> BuildResult<Architecture> {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let stem = name.strip_suffix(".xz").unwrap_or(name);
    stem.rsplit('-')
        .next()
        .and_then(|segment| segment.parse().ok())
        .ok_or_else(|| {
            BuildError::Io(std::io::Error::other(format!(
                "cannot derive architecture from artifact name {name}"
            )))
        })
}

/// Copy a completed build into the installed-kernels tree under a timestamped
/// version directory, optionally swapping the default-pointer to it. Returns
/// the versioned directory name.
pub async fn install(
    ctx: &CoreContext,
    stats: &BuildStats,
    set_as_default: bool,
) -> BuildResult<String> {
    let versioned = versioned_name(stats);
    let arch = arch_of_artifact(&stats.output_path)?;
    let dir = ctx.installed_root().join(&versioned);
    tokio::fs::create_dir_all(&dir).await?;

    let installed_name = format!("{}-{versioned}-{arch}", ctx.kernel_name());
    let installed_image = dir.join(&installed_name);
    tokio::fs::copy(&stats.output_path, &installed_image).await?;
    let installed_xz = dir.join(format!("{installed_name}.xz"));
    tokio::fs::copy(&stats.compressed_path, &installed_xz).await?;

    copy_sha256_sibling(&stats.output_path, &installed_image).await?;
    copy_sha256_sibling(&stats.compressed_path, &installed_xz).await?;

    if set_as_default {
        swap_default_pointer(ctx, &installed_image).await?;
    }

    Ok(versioned)
}

/// Cheap existence probe: has this exact build already been installed?
pub async fn check_installed(ctx: &CoreContext, stats: &BuildStats) -> (bool, String) {
    let versioned = versioned_name(stats);
    let installed = tokio::fs::try_exists(ctx.installed_root().join(&versioned))
        .await
        .unwrap_or(false);
    (installed, versioned)
}

async fn copy_sha256_sibling(src: &Path, dst: &Path) -> BuildResult<()> {
    let sibling = PathBuf::from(format!("{}.sha256", src.display()));
    if tokio::fs::try_exists(&sibling).await.unwrap_or(false) {
        tokio::fs::copy(&sibling, PathBuf::from(format!("{}.sha256", dst.display()))).await?;
    }
    Ok(())
}

/// Remove-then-symlink swap. Concurrent installers race freely and the last
/// writer wins; callers that need exclusivity coordinate above this layer.
async fn swap_default_pointer(ctx: &CoreContext, target: &Path) -> BuildResult<()> {
    let pointer = ctx.default_pointer();
    let _ = tokio::fs::remove_file(&pointer).await;
    tokio::fs::symlink(target, &pointer).await?;
    Ok(())
}

/// `index.json` layout: `arch → (version → relative compressed path)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchiveIndex(pub BTreeMap<String, BTreeMap<String, String>>);

impl Default for ArchiveIndex {
    fn default() -> Self {
        let mut index = BTreeMap::new();
        for arch in Architecture::ALL {
            index.insert(arch.as_str().to_string(), BTreeMap::new());
        }
        Self(index)
    }
}

/// Copy a completed build into a repo-local archive tree
/// (`{archive_root}/{arch}/{version}/`), synthesise its `SHA256SUMS`, and
/// record the compressed artifact in `index.json`. Returns the entry dir.
pub async fn archive(stats: &BuildStats, archive_root: &Path) -> BuildResult<PathBuf> {
    let arch = arch_of_artifact(&stats.compressed_path)?;
    let version = &stats.kernel_version;
    let dir = archive_root.join(arch.as_str()).join(version);
    tokio::fs::create_dir_all(&dir).await?;

    for artifact in [&stats.output_path, &stats.compressed_path] {
        let name = artifact
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let dst = dir.join(name);
        tokio::fs::copy(artifact, &dst).await?;
        copy_sha256_sibling(artifact, &dst).await?;
    }

    write_sha256sums(&dir).await?;

    let compressed_name = stats
        .compressed_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let relative = format!("{arch}/{version}/{compressed_name}");
    update_index(archive_root, arch, version, relative).await?;

    Ok(dir)
}

/// `SHA256SUMS` is the concatenation of every `*.sha256` in the entry dir,
/// one line per file, in name order.
async fn write_sha256sums(dir: &Path) -> BuildResult<()> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".sha256") {
            names.push(name);
        }
    }
    names.sort();

    let mut combined = String::new();
    for name in names {
        let content = tokio::fs::read_to_string(dir.join(&name)).await?;
        combined.push_str(&content);
        if !content.ends_with('\n') {
            combined.push('\n');
        }
    }

    tokio::fs::write(dir.join("SHA256SUMS"), combined).await?;
    Ok(())
}

/// Read-or-initialise `index.json`, set `index[arch][version]`, and replace
/// the file atomically. A malformed pre-existing index is not authoritative
/// over a successful build and is replaced.
async fn update_index(
    archive_root: &Path,
    arch: Architecture,
    version: &str,
    relative: String,
) -> BuildResult<()> {
    let path = archive_root.join("index.json");
    let mut index = match tokio::fs::read(&path).await {
        Ok(bytes) => match serde_json::from_slice::<ArchiveIndex>(&bytes) {
            Ok(index) => index,
            Err(e) => {
                warn!("replacing malformed {}: {e}", path.display());
                ArchiveIndex::default()
            }
        },
        Err(_) => ArchiveIndex::default(),
    };

    index
        .0
        .entry(arch.as_str().to_string())
        .or_default()
        .insert(version.to_string(), relative);

    let json = serde_json::to_vec_pretty(&index).map_err(std::io::Error::other)?;
    let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    async fn fake_build(dir: &Path) -> BuildStats {
        let artifacts = dir.join("artifacts");
        tokio::fs::create_dir_all(&artifacts).await.unwrap();

        let output_path = artifacts.join("vmlinux-6.9.1-x86_64");
        tokio::fs::write(&output_path, b"uncompressed image").await.unwrap();
        let (_, uncompressed_hash) = anvil_artifact::write_sha256_sibling(&output_path)
            .await
            .unwrap();

        let compressed_path = artifacts.join("vmlinux-6.9.1-x86_64.xz");
        tokio::fs::write(&compressed_path, b"compressed image").await.unwrap();
        let (_, compressed_hash) = anvil_artifact::write_sha256_sibling(&compressed_path)
            .await
            .unwrap();

        BuildStats {
            kernel_version: "6.9.1".to_string(),
            output_path,
            compressed_path,
            total_duration: 1,
            download_duration: 1,
            extract_duration: 1,
            configure_duration: 1,
            compile_duration: 1,
            package_duration: 1,
            uncompressed_size: 18,
            compressed_size: 16,
            uncompressed_hash,
            compressed_hash,
            build_timestamp: Utc.with_ymd_and_hms(2026, 7, 4, 12, 30, 45).unwrap(),
        }
    }

    #[test]
    fn arch_derivation_reads_trailing_segment() {
        assert_eq!(
            arch_of_artifact(Path::new("/a/vmlinux-6.9.1-x86_64.xz")).unwrap(),
            Architecture::X86_64
        );
        assert_eq!(
            arch_of_artifact(Path::new("Image-6.9.1-aarch64")).unwrap(),
            Architecture::Aarch64
        );
        assert!(arch_of_artifact(Path::new("vmlinux")).is_err());
    }

    #[tokio::test]
    async fn versioned_name_uses_build_time_not_install_time() {
        let dir = tempfile::tempdir().unwrap();
        let stats = fake_build(dir.path()).await;
        assert_eq!(versioned_name(&stats), "6.9.1-20260704T123045");
    }

    #[tokio::test]
    async fn install_lays_out_timestamped_dir_and_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CoreContext::new(dir.path().to_path_buf());
        let stats = fake_build(dir.path()).await;

        let versioned = install(&ctx, &stats, true).await.unwrap();
        assert_eq!(versioned, "6.9.1-20260704T123045");

        let installed = ctx.installed_root().join(&versioned);
        let image = installed.join("vmlinux-6.9.1-20260704T123045-x86_64");
        assert_eq!(
            tokio::fs::read(&image).await.unwrap(),
            b"uncompressed image"
        );
        assert!(
            installed
                .join("vmlinux-6.9.1-20260704T123045-x86_64.xz")
                .exists()
        );
        assert!(
            installed
                .join("vmlinux-6.9.1-20260704T123045-x86_64.sha256")
                .exists()
        );

        let pointer = ctx.default_pointer();
        let target = tokio::fs::read_link(&pointer).await.unwrap();
        assert_eq!(target, image);
        assert_eq!(
            tokio::fs::read(&pointer).await.unwrap(),
            b"uncompressed image"
        );
    }

    #[tokio::test]
    async fn second_install_repoints_the_default() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CoreContext::new(dir.path().to_path_buf());
        let stats = fake_build(dir.path()).await;
        install(&ctx, &stats, true).await.unwrap();

        let mut later = stats.clone();
        later.build_timestamp = Utc.with_ymd_and_hms(2026, 7, 5, 8, 0, 0).unwrap();
        let versioned = install(&ctx, &later, true).await.unwrap();
        assert_eq!(versioned, "6.9.1-20260705T080000");

        let target = tokio::fs::read_link(ctx.default_pointer()).await.unwrap();
        assert!(
            target
                .to_string_lossy()
                .contains("6.9.1-20260705T080000")
        );
    }

    #[tokio::test]
    async fn check_installed_flips_after_install() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CoreContext::new(dir.path().to_path_buf());
        let stats = fake_build(dir.path()).await;

        let (installed, versioned) = check_installed(&ctx, &stats).await;
        assert!(!installed);
        assert_eq!(versioned, "6.9.1-20260704T123045");

        install(&ctx, &stats, false).await.unwrap();
        let (installed, _) = check_installed(&ctx, &stats).await;
        assert!(installed);
    }

    #[tokio::test]
    async fn archive_builds_entry_sums_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let stats = fake_build(dir.path()).await;
        let archive_root = dir.path().join("repo");

        let entry = archive(&stats, &archive_root).await.unwrap();
        assert_eq!(entry, archive_root.join("x86_64/6.9.1"));

        // SHA256SUMS is the concatenation of the .sha256 files in name order.
        let sums = tokio::fs::read_to_string(entry.join("SHA256SUMS"))
            .await
            .unwrap();
        let expected = format!(
            "{}{}",
            tokio::fs::read_to_string(entry.join("vmlinux-6.9.1-x86_64.sha256"))
                .await
                .unwrap(),
            tokio::fs::read_to_string(entry.join("vmlinux-6.9.1-x86_64.xz.sha256"))
                .await
                .unwrap(),
        );
        assert_eq!(sums, expected);

        // Index law: the recorded relative path exists and hashes to the
        // stats' compressed hash.
        let index: ArchiveIndex = serde_json::from_slice(
            &tokio::fs::read(archive_root.join("index.json")).await.unwrap(),
        )
        .unwrap();
        let relative = &index.0["x86_64"]["6.9.1"];
        assert_eq!(relative, "x86_64/6.9.1/vmlinux-6.9.1-x86_64.xz");
        let absolute = archive_root.join(relative);
        assert!(absolute.exists());
        assert_eq!(
            anvil_artifact::sha256_file(&absolute).await.unwrap(),
            stats.compressed_hash
        );
        // Untouched arches keep their empty maps.
        assert!(index.0["aarch64"].is_empty());
    }

    #[tokio::test]
    async fn malformed_index_is_replaced_silently() {
        let dir = tempfile::tempdir().unwrap();
        let stats = fake_build(dir.path()).await;
        let archive_root = dir.path().join("repo");
        tokio::fs::create_dir_all(&archive_root).await.unwrap();
        tokio::fs::write(archive_root.join("index.json"), b"{broken")
            .await
            .unwrap();

        archive(&stats, &archive_root).await.unwrap();

        let index: ArchiveIndex = serde_json::from_slice(
            &tokio::fs::read(archive_root.join("index.json")).await.unwrap(),
        )
        .unwrap();
        assert_eq!(
            index.0["x86_64"]["6.9.1"],
            "x86_64/6.9.1/vmlinux-6.9.1-x86_64.xz"
        );
    }
}
