use std::path::PathBuf;

use anvil_core::CoreContext;
use clap::Args;
use tracing::info;

use crate::error::CliResult;
use crate::install::load_completed_build;

#[derive(Args)]
pub struct ArchiveArgs {
    /// Repo directory receiving the `arch/version` tree and index.json
    #[arg(long)]
    pub repo: PathBuf,
}

/// Archive the build recorded in `build-stats.json` into a repo tree.
pub async fn run_archive(ctx: &CoreContext, args: ArchiveArgs) -> CliResult<()> {
    let stats = load_completed_build(ctx).await?;
    let entry = anvil_build::archive(&stats, &args.repo).await?;
    info!("archived {} to {}", stats.kernel_version, entry.display());
    Ok(())
}
