use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{VmTestError, VmTestResult};

/// Alpine minirootfs release used for the default test rootfs.
const ALPINE_VERSION: &str = "3.20.3";

/// Guest path the echo server binary is injected at.
pub const DEFAULT_ECHO_SERVER_PATH: &str = "/usr/bin/vsock-echo";

/// Size of the ext4 image; the minirootfs plus one static binary fits easily.
const ROOTFS_SIZE_MIB: u64 = 256;

fn alpine_url(arch: &str) -> String {
    format!(
        "https://dl-cdn.alpinelinux.org/alpine/v3.20/releases/{arch}/alpine-minirootfs-{ALPINE_VERSION}-{arch}.tar.gz"
    )
}

/// Init script: bring up the loopback, start the echo server on vsock, and
/// keep pid 1 alive.
const INIT_SCRIPT: &str = "#!/bin/sh\n\
    mount -t proc proc /proc\n\
    mount -t sysfs sys /sys\n\
    ip link set lo up 2>/dev/null\n\
    /usr/bin/vsock-echo --port 8000 &\n\
    exec sleep infinity\n";

/// Materialise a default Alpine-based rootfs with the vsock echo server
/// injected, and pack it into an ext4 image. Returns the image path.
///
/// `echo_server_bin` must be a static binary built for the guest
/// architecture; it lands at [`DEFAULT_ECHO_SERVER_PATH`].
pub async fn materialize_default_rootfs(
    workdir: &Path,
    arch: &str,
    echo_server_bin: &Path,
) -> VmTestResult<PathBuf> {
    which::which("mkfs.ext4").map_err(|_| VmTestError::ToolMissing("mkfs.ext4".to_string()))?;

    let tree = workdir.join("rootfs-tree");
    tokio::fs::create_dir_all(&tree).await?;

    let tarball = workdir.join("alpine-minirootfs.tar.gz");
    let url = alpine_url(arch);
    info!("fetching {url}");
    let client = reqwest::Client::new();
    anvil_upstream::fetch(&client, &url, &tarball, &[], |_| {}).await?;
    anvil_artifact::extract_tar_gz(&tarball, &tree, |_| {}).await?;

    inject_guest_files(&tree, echo_server_bin).await?;

    let image = workdir.join("rootfs.ext4");
    let status = tokio::process::Command::new("mkfs.ext4")
        .arg("-F")
        .arg("-q")
        .arg("-d")
        .arg(&tree)
        .arg(&image)
        .arg(format!("{ROOTFS_SIZE_MIB}m"))
        .status()
        .await?;
    if !status.success() {
        return Err(VmTestError::VmExited(format!("mkfs.ext4 failed: {status}")));
    }

    Ok(image)
}

/// Drop the echo server and a minimal init into an unpacked rootfs tree.
pub(crate) async fn inject_guest_files(tree: &Path, echo_server_bin: &Path) -> VmTestResult<()> {
    let echo_dest = tree.join(DEFAULT_ECHO_SERVER_PATH.trim_start_matches('/'));
    if let Some(parent) = echo_dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(echo_server_bin, &echo_dest).await?;
    tokio::fs::set_permissions(&echo_dest, std::fs::Permissions::from_mode(0o755)).await?;

    let init = tree.join("init");
    tokio::fs::write(&init, INIT_SCRIPT).await?;
    tokio::fs::set_permissions(&init, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(())
}
