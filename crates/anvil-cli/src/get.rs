use anvil_core::{Architecture, BuildRequest, CancelToken, CoreContext, VerificationLevel};
use clap::Args;
use tracing::{info, warn};

use crate::build::{drive_engine, spawn_ctrl_c_handler};
use crate::error::CliResult;
use crate::prebuilt::{PrebuiltArgs, fetch_prebuilt};

#[derive(Args)]
pub struct GetArgs {
    /// Kernel version to obtain
    #[arg(long)]
    pub version: String,
    /// Target architecture
    #[arg(long, default_value = "x86_64")]
    pub arch: Architecture,
    /// Source integrity checking for the build fall-back
    #[arg(long, default_value = "high")]
    pub verification_level: VerificationLevel,
    /// Release root to try for a pre-built image first
    #[arg(long, env = "ANVIL_PREBUILT_ROOT",
          default_value = anvil_upstream::DEFAULT_PREBUILT_ROOT)]
    pub release_root: String,
    /// Swap the default-pointer to the obtained kernel
    #[arg(long)]
    pub set_default: bool,
}

/// Pre-built first, source build second. The fall-back fires on any
/// pre-built error — "release absent" and "network down" are deliberately
/// not distinguished.
pub async fn run_get(ctx: &CoreContext, args: GetArgs) -> CliResult<()> {
    let prebuilt = PrebuiltArgs {
        version: args.version.clone(),
        arch: args.arch,
        release_root: args.release_root.clone(),
    };
    match fetch_prebuilt(ctx, &prebuilt).await {
        Ok(dest) => {
            info!("pre-built kernel ready at {}", dest.display());
            return Ok(());
        }
        Err(e) => {
            warn!("pre-built download failed ({e}); building from source");
        }
    }

    let cancel = CancelToken::new();
    spawn_ctrl_c_handler(cancel.clone());
    let request = BuildRequest {
        version: Some(args.version.clone()),
        arch: args.arch,
        verification: args.verification_level,
        config_file: None,
        force_rebuild: false,
        interactive: false,
    };
    let stats = drive_engine(ctx, &request, &cancel).await?;
    let versioned = anvil_build::install(ctx, &stats, args.set_default).await?;
    info!("built and installed {versioned}");
    Ok(())
}
