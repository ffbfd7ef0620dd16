use anvil_core::{BuildStats, CoreContext};
use clap::Args;
use tracing::info;

use crate::error::{CliError, CliResult};

#[derive(Args)]
pub struct InstallArgs {
    /// Swap the default-pointer to the newly installed kernel
    #[arg(long)]
    pub set_default: bool,
}

/// Install the build recorded in `build-stats.json`.
pub async fn run_install(ctx: &CoreContext, args: InstallArgs) -> CliResult<()> {
    let stats = load_completed_build(ctx).await?;

    let (already, versioned) = anvil_build::check_installed(ctx, &stats).await;
    if already {
        info!("{versioned} is already installed");
    }
    let versioned = anvil_build::install(ctx, &stats, args.set_default).await?;
    info!("installed {versioned}");
    if args.set_default {
        info!("default kernel now {}", ctx.default_pointer().display());
    }
    Ok(())
}

pub(crate) async fn load_completed_build(ctx: &CoreContext) -> CliResult<BuildStats> {
    let stats = BuildStats::load(&ctx.build_stats_path())
        .await
        .ok_or_else(|| {
            CliError::Usage("no completed build found — run `anvil build` first".to_string())
        })?;
    if !stats.artifacts_exist().await {
        return Err(CliError::Usage(format!(
            "build record {} references missing artifacts — rebuild first",
            ctx.build_stats_path().display()
        )));
    }
    Ok(stats)
}
