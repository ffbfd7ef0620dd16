use std::path::PathBuf;

use anvil_build::BuildEngine;
use anvil_core::{
    ArchSelection, BuildEvent, BuildPhase, BuildRequest, BuildStats, CancelToken, CoreContext,
    EventSender, VerificationLevel,
};
use clap::Args;
use tracing::{info, warn};

use crate::error::{CliError, CliResult};

/// Bound on in-flight events between the engine and the printer.
const EVENT_CAPACITY: usize = 256;

#[derive(Args)]
pub struct BuildArgs {
    /// Kernel version to build (defaults to the upstream latest stable)
    #[arg(long)]
    pub version: Option<String>,
    /// Target architecture: x86_64, aarch64, or all
    #[arg(long, default_value = "x86_64")]
    pub arch: ArchSelection,
    /// Source integrity checking: disabled, medium, or high
    #[arg(long, default_value = "high")]
    pub verification_level: VerificationLevel,
    /// Kernel config file overriding the workspace entry
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Rebuild even when a completed build is cached
    #[arg(long)]
    pub force_rebuild: bool,
    /// Install the finished build under the kernels root
    #[arg(long)]
    pub install: bool,
    /// Swap the default-pointer to the freshly installed kernel
    #[arg(long, requires = "install")]
    pub set_default: bool,
    /// Also archive the artifacts into this repo directory
    #[arg(long)]
    pub archive_to: Option<PathBuf>,
}

pub async fn run_build(ctx: &CoreContext, args: BuildArgs) -> CliResult<()> {
    let cancel = CancelToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    // `all` fans out into sequential, independent runs; each is installed or
    // archived before the next overwrites the stats record.
    for arch in args.arch.expand() {
        let request = BuildRequest {
            version: args.version.clone(),
            arch,
            verification: args.verification_level,
            config_file: args.config.clone(),
            force_rebuild: args.force_rebuild,
            interactive: false,
        };

        let stats = drive_engine(ctx, &request, &cancel).await?;

        if args.install {
            let versioned = anvil_build::install(ctx, &stats, args.set_default).await?;
            info!("installed {versioned}");
        }
        if let Some(repo) = &args.archive_to {
            let entry = anvil_build::archive(&stats, repo).await?;
            info!("archived to {}", entry.display());
        }
    }

    Ok(())
}

pub(crate) fn spawn_ctrl_c_handler(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling");
            cancel.cancel();
        }
    });
}

/// Run the engine on its own task and consume its event stream here.
pub(crate) async fn drive_engine(
    ctx: &CoreContext,
    request: &BuildRequest,
    cancel: &CancelToken,
) -> CliResult<BuildStats> {
    let (events, mut rx) = EventSender::channel(EVENT_CAPACITY);
    let engine_ctx = ctx.clone();
    let engine_request = request.clone();
    let engine_cancel = cancel.clone();
    let engine = tokio::spawn(async move {
        BuildEngine::new(engine_ctx, events, engine_cancel)
            .run(&engine_request)
            .await
    });

    let mut printer = EventPrinter::default();
    while let Some(event) = rx.recv().await {
        printer.print(&event);
    }

    let stats = engine
        .await
        .map_err(|e| CliError::Internal(format!("engine task failed: {e}")))??;
    Ok(stats)
}

/// Prints the event stream: phase banners, child output verbatim, progress
/// at decile steps.
#[derive(Default)]
pub(crate) struct EventPrinter {
    phase: Option<BuildPhase>,
    next_decile: u32,
}

impl EventPrinter {
    pub(crate) fn print(&mut self, event: &BuildEvent) {
        match event {
            BuildEvent::PhaseEntered(phase) => {
                self.phase = Some(*phase);
                self.next_decile = 1;
                info!("=== {phase} ===");
            }
            BuildEvent::Progress(fraction) => {
                let decile = (fraction * 10.0) as u32;
                if decile >= self.next_decile {
                    self.next_decile = decile + 1;
                    let label = self.phase.map(|p| p.as_str()).unwrap_or("progress");
                    info!("{label}: {}%", decile * 10);
                }
            }
            BuildEvent::Output(line) => println!("{line}"),
            BuildEvent::Completed(stats) => {
                info!(
                    "completed {}: {}",
                    stats.kernel_version,
                    stats.output_path.display()
                );
            }
            // Terminal failures surface through the engine's return value.
            BuildEvent::Failed(_) | BuildEvent::Cancelled => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decile_printer_advances_monotonically() {
        let mut printer = EventPrinter::default();
        printer.print(&BuildEvent::PhaseEntered(BuildPhase::Download));
        assert_eq!(printer.next_decile, 1);

        printer.print(&BuildEvent::Progress(0.35));
        assert_eq!(printer.next_decile, 4);

        // Lower progress never rewinds the marker.
        printer.print(&BuildEvent::Progress(0.2));
        assert_eq!(printer.next_decile, 4);

        printer.print(&BuildEvent::PhaseEntered(BuildPhase::Extract));
        assert_eq!(printer.next_decile, 1);
    }
}
