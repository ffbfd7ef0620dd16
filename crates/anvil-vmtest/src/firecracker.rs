use std::path::{Path, PathBuf};
use std::process::Stdio;

use anvil_core::Architecture;

use crate::error::{VmTestError, VmTestResult};

/// Guest CID the echo server listens behind.
pub(crate) const GUEST_CID: u32 = 3;

/// Smoke-test VM sizing: the guest only runs an init and the echo server.
const VCPUS: u32 = 1;
const MEM_MIB: u32 = 512;

/// Everything needed to boot one throwaway Firecracker VM.
#[derive(Debug, Clone)]
pub struct VmSpec {
    pub kernel: PathBuf,
    pub rootfs: PathBuf,
    pub arch: Architecture,
    /// Working directory for the config, sockets, and log.
    pub workdir: PathBuf,
}

impl VmSpec {
    pub fn api_sock(&self) -> PathBuf {
        self.workdir.join("api.sock")
    }

    /// UDS that Firecracker bridges to the guest's vsock.
    pub fn vsock_uds(&self) -> PathBuf {
        self.workdir.join("vsock.sock")
    }

    pub fn config_path(&self) -> PathBuf {
        self.workdir.join("vm-config.json")
    }

    pub fn log_path(&self) -> PathBuf {
        self.workdir.join("firecracker.log")
    }

    /// Serial console boot args, tuned per architecture.
    pub(crate) fn boot_args(&self) -> &'static str {
        match self.arch {
            Architecture::X86_64 => "console=ttyS0 reboot=k panic=1 pci=off",
            Architecture::Aarch64 => "keep_bootcon console=ttyS0 reboot=k panic=1",
        }
    }

    /// Firecracker JSON config: one drive, one vCPU, 512 MiB, virtio-vsock
    /// with the guest CID routed to a UNIX socket.
    pub(crate) fn to_config_json(&self) -> serde_json::Value {
        serde_json::json!({
            "boot-source": {
                "kernel_image_path": self.kernel.display().to_string(),
                "boot_args": self.boot_args(),
            },
            "drives": [{
                "drive_id": "rootfs",
                "path_on_host": self.rootfs.display().to_string(),
                "is_root_device": true,
                "is_read_only": false,
            }],
            "machine-config": {
                "vcpu_count": VCPUS,
                "mem_size_mib": MEM_MIB,
            },
            "vsock": {
                "guest_cid": GUEST_CID,
                "uds_path": self.vsock_uds().display().to_string(),
            },
        })
    }
}

/// A running Firecracker process and the [`VmSpec`] it was booted from.
pub struct VmHandle {
    pub spec: VmSpec,
    child: tokio::process::Child,
}

impl VmHandle {
    /// Write the VM config and spawn Firecracker in its own process group.
    pub async fn spawn(spec: VmSpec) -> VmTestResult<Self> {
        which::which("firecracker")
            .map_err(|_| VmTestError::ToolMissing("firecracker".to_string()))?;

        tokio::fs::create_dir_all(&spec.workdir).await?;
        let config = serde_json::to_vec_pretty(&spec.to_config_json())
            .map_err(std::io::Error::other)?;
        tokio::fs::write(spec.config_path(), config).await?;
        tokio::fs::write(spec.log_path(), b"").await?;

        let child = tokio::process::Command::new("firecracker")
            .arg("--no-api")
            .arg("--config-file")
            .arg(spec.config_path())
            .arg("--log-path")
            .arg(spec.log_path())
            .arg("--level")
            .arg("Info")
            .current_dir(&spec.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|e| VmTestError::VmExited(format!("spawn firecracker: {e}")))?;

        Ok(Self { spec, child })
    }

    /// Whether the VM process has exited; returns its status text if so.
    pub fn exited(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(e) => Some(format!("wait failed: {e}")),
        }
    }

    /// SIGKILL the whole process group and reap the child.
    pub async fn kill(&mut self) {
        anvil_core::kill_child_group(&self.child);
        let _ = self.child.wait().await;
    }
}

/// Pick the uncompressed kernel image inside an installed version directory:
/// the entry that is neither a `.xz` artifact nor a checksum sibling.
pub(crate) async fn uncompressed_image_in(dir: &Path) -> VmTestResult<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".xz") && !name.ends_with(".sha256") {
            return Ok(entry.path());
        }
    }
    Err(VmTestError::KernelMissing(format!(
        "no kernel image under {}",
        dir.display()
    )))
}
