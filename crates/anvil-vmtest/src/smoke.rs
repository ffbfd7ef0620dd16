use std::path::PathBuf;
use std::time::Duration;

use anvil_core::{Architecture, CoreContext};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{VmTestError, VmTestResult};
use crate::firecracker::{VmHandle, VmSpec, uncompressed_image_in};
use crate::probe::{ECHO_PORT, PingClient, PingStats, probe_once};
use crate::rootfs;

/// Cadence of the boot probe loop.
const PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Steady-state pings measured after the warm-up ping.
const STEADY_PINGS: usize = 10;

#[derive(Debug, Clone)]
pub struct SmokeTestArgs {
    /// Kernel to test; `None` resolves through the default-pointer.
    pub kernel_version: Option<String>,
    /// Pre-made rootfs; `None` materialises the default Alpine one.
    pub rootfs_path: Option<PathBuf>,
    /// Echo server binary for the default rootfs.
    pub echo_server_bin: Option<PathBuf>,
    pub arch: Architecture,
    pub boot_timeout: Duration,
    pub ping_timeout: Duration,
}

/// Outcome of a successful smoke test.
#[derive(Debug, Clone)]
pub struct TestResult {
    pub kernel: PathBuf,
    /// Time from spawn until the guest first answered a probe.
    pub boot_wait: Duration,
    pub probe_attempts: u32,
    /// First-byte latency on the persistent connection.
    pub first_ping: Duration,
    pub steady: PingStats,
}

/// Resolve the kernel image to boot: the newest installed directory for a
/// version, or the default-pointer when no version is given.
pub async fn resolve_kernel(ctx: &CoreContext, version: Option<&str>) -> VmTestResult<PathBuf> {
    match version {
        Some(version) => {
            let installed_root = ctx.installed_root();
            let mut best: Option<String> = None;
            let mut entries = tokio::fs::read_dir(&installed_root).await.map_err(|_| {
                VmTestError::KernelMissing(format!(
                    "nothing installed under {}",
                    installed_root.display()
                ))
            })?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                // Timestamp suffixes sort lexicographically by recency.
                if (name == version || name.starts_with(&format!("{version}-")))
                    && best.as_deref().is_none_or(|b| name.as_str() > b)
                {
                    best = Some(name);
                }
            }
            let dir = best.ok_or_else(|| {
                VmTestError::KernelMissing(format!("version {version} is not installed"))
            })?;
            uncompressed_image_in(&installed_root.join(dir)).await
        }
        None => {
            let pointer = ctx.default_pointer();
            if tokio::fs::try_exists(&pointer).await.unwrap_or(false) {
                Ok(pointer)
            } else {
                Err(VmTestError::KernelMissing(
                    "no default kernel installed; pass a version or install one".to_string(),
                ))
            }
        }
    }
}

/// Boot the selected kernel under Firecracker and validate vsock round trips.
///
/// The VM's working directory is a temp dir, removed on success and preserved
/// (with its Firecracker log) when the test fails.
pub async fn smoke_test(ctx: &CoreContext, args: &SmokeTestArgs) -> VmTestResult<TestResult> {
    let kernel = resolve_kernel(ctx, args.kernel_version.as_deref()).await?;
    info!("smoke-testing kernel {}", kernel.display());

    let workdir = tempfile::Builder::new().prefix("anvil-smoke-").tempdir()?;

    let rootfs_path = match &args.rootfs_path {
        Some(path) => path.clone(),
        None => {
            let echo_bin = args.echo_server_bin.as_ref().ok_or_else(|| {
                VmTestError::RootfsUnavailable(
                    "default rootfs needs --echo-server <binary>".to_string(),
                )
            })?;
            rootfs::materialize_default_rootfs(workdir.path(), args.arch.as_str(), echo_bin)
                .await?
        }
    };

    let spec = VmSpec {
        kernel: kernel.clone(),
        rootfs: rootfs_path,
        arch: args.arch,
        workdir: workdir.path().to_path_buf(),
    };
    let mut vm = VmHandle::spawn(spec).await?;

    let boot_started = Instant::now();
    let mut probe_attempts = 0u32;
    let boot_result = loop {
        if let Some(status) = vm.exited() {
            break Err(VmTestError::VmExited(status));
        }
        if boot_started.elapsed() > args.boot_timeout {
            break Err(VmTestError::BootTimeout(args.boot_timeout));
        }
        probe_attempts += 1;
        match probe_once(
            &vm.spec.vsock_uds(),
            ECHO_PORT,
            "anvil-smoke-probe",
            PROBE_INTERVAL,
        )
        .await
        {
            Ok(_) => break Ok(boot_started.elapsed()),
            Err(_) => tokio::time::sleep(PROBE_INTERVAL).await,
        }
    };

    let measured = match boot_result {
        Ok(boot_wait) => measure(&vm.spec, args.ping_timeout)
            .await
            .map(|(first_ping, steady)| (boot_wait, first_ping, steady)),
        Err(e) => Err(e),
    };

    vm.kill().await;

    match measured {
        Ok((boot_wait, first_ping, steady)) => Ok(TestResult {
            kernel,
            boot_wait,
            probe_attempts,
            first_ping,
            steady,
        }),
        Err(e) => {
            let kept = workdir.keep();
            warn!("smoke test failed; vm workdir preserved at {}", kept.display());
            Err(e)
        }
    }
}

/// Persistent-connection latency: one warm-up ping, then the steady set.
async fn measure(spec: &VmSpec, ping_timeout: Duration) -> VmTestResult<(Duration, PingStats)> {
    let mut client = PingClient::connect(&spec.vsock_uds(), ECHO_PORT, ping_timeout).await?;
    let first_ping = client.ping("anvil-smoke-initial", ping_timeout).await?;

    let mut samples = Vec::with_capacity(STEADY_PINGS);
    for i in 0..STEADY_PINGS {
        samples.push(
            client
                .ping(&format!("anvil-smoke-{i}"), ping_timeout)
                .await?,
        );
    }
    let steady = PingStats::from_samples(&samples)
        .ok_or_else(|| VmTestError::Probe("no latency samples collected".to_string()))?;
    Ok((first_ping, steady))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn version_resolution_prefers_newest_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CoreContext::new(dir.path().to_path_buf());
        for (sub, name) in [
            ("6.9.1-20260101T000000", "vmlinux-old"),
            ("6.9.1-20260301T000000", "vmlinux-new"),
            ("6.8.0-20260401T000000", "vmlinux-other"),
        ] {
            let d = ctx.installed_root().join(sub);
            tokio::fs::create_dir_all(&d).await.unwrap();
            tokio::fs::write(d.join(name), b"elf").await.unwrap();
        }

        let kernel = resolve_kernel(&ctx, Some("6.9.1")).await.unwrap();
        assert_eq!(kernel.file_name().and_then(|n| n.to_str()), Some("vmlinux-new"));
    }

    #[tokio::test]
    async fn untimestamped_prebuilt_dir_resolves_too() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CoreContext::new(dir.path().to_path_buf());
        let d = ctx.installed_root().join("6.9.1");
        tokio::fs::create_dir_all(&d).await.unwrap();
        tokio::fs::write(d.join("vmlinux-6.9.1-x86_64"), b"elf")
            .await
            .unwrap();

        let kernel = resolve_kernel(&ctx, Some("6.9.1")).await.unwrap();
        assert!(kernel.ends_with("6.9.1/vmlinux-6.9.1-x86_64"));
    }

    #[tokio::test]
    async fn no_version_falls_back_to_default_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CoreContext::new(dir.path().to_path_buf());

        assert!(matches!(
            resolve_kernel(&ctx, None).await,
            Err(VmTestError::KernelMissing(_))
        ));

        let target = dir.path().join("some-kernel");
        tokio::fs::write(&target, b"elf").await.unwrap();
        tokio::fs::symlink(&target, ctx.default_pointer())
            .await
            .unwrap();
        assert_eq!(resolve_kernel(&ctx, None).await.unwrap(), ctx.default_pointer());
    }

    #[tokio::test]
    async fn unknown_version_is_kernel_missing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CoreContext::new(dir.path().to_path_buf());
        tokio::fs::create_dir_all(ctx.installed_root()).await.unwrap();

        assert!(matches!(
            resolve_kernel(&ctx, Some("9.9.9")).await,
            Err(VmTestError::KernelMissing(_))
        ));
    }
}
