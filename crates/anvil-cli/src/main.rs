mod archive;
mod build;
mod check;
mod error;
mod get;
mod install;
mod prebuilt;
mod smoke;

use std::path::PathBuf;
use std::process::ExitCode;

use anvil_core::CoreContext;
use clap::{Parser, Subcommand};
use tracing_subscriber::fmt::time::uptime;

#[derive(Parser)]
#[command(name = "anvil", version, about = "Firecracker kernel build and install pipeline")]
struct Cli {
    /// Workspace config file (defaults to {base_dir}/anvil.yaml)
    #[arg(long, global = true, env = "ANVIL_CONFIG")]
    workspace_config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a kernel from verified upstream sources
    Build(build::BuildArgs),
    /// Fetch a pre-built kernel, falling back to a source build
    Get(get::GetArgs),
    /// Probe whether an upstream version is buildable (JSON, CI-friendly)
    CheckVersion(check::CheckArgs),
    /// Install the last completed build under the kernels root
    Install(install::InstallArgs),
    /// Archive the last completed build into a repo tree
    Archive(archive::ArchiveArgs),
    /// Download and verify a pre-built kernel image
    Prebuilt(prebuilt::PrebuiltArgs),
    /// Boot a kernel under Firecracker and probe its vsock echo endpoint
    SmokeTest(smoke::SmokeArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().with_timer(uptime()).init();

    let cli = Cli::parse();

    let ctx = match CoreContext::resolve(cli.workspace_config.as_deref()).await {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Build(args) => build::run_build(&ctx, args).await.map(|()| ExitCode::SUCCESS),
        Command::Get(args) => get::run_get(&ctx, args).await.map(|()| ExitCode::SUCCESS),
        Command::CheckVersion(args) => check::run_check(args).await,
        Command::Install(args) => install::run_install(&ctx, args)
            .await
            .map(|()| ExitCode::SUCCESS),
        Command::Archive(args) => archive::run_archive(&ctx, args)
            .await
            .map(|()| ExitCode::SUCCESS),
        Command::Prebuilt(args) => prebuilt::run_prebuilt(&ctx, args)
            .await
            .map(|()| ExitCode::SUCCESS),
        Command::SmokeTest(args) => smoke::run_smoke(&ctx, args)
            .await
            .map(|()| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
