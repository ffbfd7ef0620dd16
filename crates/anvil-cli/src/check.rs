use std::process::ExitCode;

use anvil_upstream::Catalog;
use clap::Args;

use crate::error::CliResult;

#[derive(Args)]
pub struct CheckArgs {
    /// Version to probe; empty or "latest" resolves the upstream latest stable
    #[arg(default_value = "latest")]
    pub version: String,
}

/// CI contract: print the structured probe result as JSON and exit zero iff
/// the version is buildable (listed upstream and its signed checksums
/// reference the tarball).
pub async fn run_check(args: CheckArgs) -> CliResult<ExitCode> {
    let catalog = Catalog::new()?;
    let check = catalog.check(&args.version).await?;

    let json = serde_json::to_string_pretty(&check).map_err(std::io::Error::other)?;
    println!("{json}");

    Ok(if check.buildable {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
