use std::path::PathBuf;
use std::time::Duration;

use anvil_core::{Architecture, CoreContext};
use anvil_vmtest::{SmokeTestArgs, smoke_test};
use clap::Args;
use tracing::info;

use crate::error::CliResult;

#[derive(Args)]
pub struct SmokeArgs {
    /// Installed kernel version to boot (defaults to the default-pointer)
    #[arg(long)]
    pub kernel_version: Option<String>,
    /// Rootfs image to boot; omitted → build the default Alpine rootfs
    #[arg(long)]
    pub rootfs: Option<PathBuf>,
    /// Vsock echo server binary injected into the default rootfs
    #[arg(long)]
    pub echo_server: Option<PathBuf>,
    /// Guest architecture
    #[arg(long, default_value = "x86_64")]
    pub arch: Architecture,
    /// Seconds to wait for the guest to answer its first probe
    #[arg(long, default_value_t = 60)]
    pub boot_timeout_secs: u64,
    /// Per-ping timeout in seconds
    #[arg(long, default_value_t = 5)]
    pub ping_timeout_secs: u64,
}

pub async fn run_smoke(ctx: &CoreContext, args: SmokeArgs) -> CliResult<()> {
    let result = smoke_test(
        ctx,
        &SmokeTestArgs {
            kernel_version: args.kernel_version,
            rootfs_path: args.rootfs,
            echo_server_bin: args.echo_server,
            arch: args.arch,
            boot_timeout: Duration::from_secs(args.boot_timeout_secs),
            ping_timeout: Duration::from_secs(args.ping_timeout_secs),
        },
    )
    .await?;

    info!("kernel {} answered vsock pings", result.kernel.display());
    info!(
        "boot wait {:?} ({} probe attempts), first ping {:?}",
        result.boot_wait, result.probe_attempts, result.first_ping
    );
    info!(
        "steady-state rtt min/avg/max: {:?}/{:?}/{:?}",
        result.steady.min, result.steady.avg, result.steady.max
    );
    Ok(())
}
