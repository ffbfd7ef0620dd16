use anvil_build::{Gpg, PrebuiltRequest};
use anvil_core::{Architecture, BuildEvent, CoreContext, EventSender};
use clap::Args;
use tracing::info;

use crate::build::EventPrinter;
use crate::error::{CliError, CliResult};

#[derive(Args)]
pub struct PrebuiltArgs {
    /// Version of the pre-built release to fetch
    #[arg(long)]
    pub version: String,
    /// Target architecture
    #[arg(long, default_value = "x86_64")]
    pub arch: Architecture,
    /// Release root publishing the image and its companion files
    #[arg(long, env = "ANVIL_PREBUILT_ROOT",
          default_value = anvil_upstream::DEFAULT_PREBUILT_ROOT)]
    pub release_root: String,
}

/// Fetch, verify, and place a pre-built kernel into the installed layout.
pub async fn run_prebuilt(ctx: &CoreContext, args: PrebuiltArgs) -> CliResult<()> {
    let dest = fetch_prebuilt(ctx, &args).await?;
    info!("pre-built kernel ready at {}", dest.display());
    Ok(())
}

pub(crate) async fn fetch_prebuilt(
    ctx: &CoreContext,
    args: &PrebuiltArgs,
) -> CliResult<std::path::PathBuf> {
    let request = PrebuiltRequest {
        version: args.version.clone(),
        arch: args.arch,
        release_root: args.release_root.clone(),
    };

    let (events, mut rx) = EventSender::channel(256);
    let ctx = ctx.clone();
    let task = tokio::spawn(async move {
        let gpg = Gpg::new();
        let client = reqwest::Client::new();
        anvil_build::download_prebuilt(&ctx, &gpg, &client, &request, &events).await
    });

    let mut printer = EventPrinter::default();
    while let Some(event) = rx.recv().await {
        if !matches!(event, BuildEvent::Progress(_)) {
            printer.print(&event);
        }
    }

    let dest = task
        .await
        .map_err(|e| CliError::Internal(format!("prebuilt task failed: {e}")))??;
    Ok(dest)
}
