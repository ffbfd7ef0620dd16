use std::path::PathBuf;

use anvil_core::{Architecture, CoreContext, EventSender};
use anvil_upstream::{fetch, prebuilt_file_url, prebuilt_image_name};

use crate::error::BuildResult;
use crate::pgp::Gpg;

/// Companion files published next to every pre-built image.
const SUMS_FILE: &str = "SHA256SUMS";
const SUMS_SIG_FILE: &str = "SHA256SUMS.asc";
const SIGNING_KEY_FILE: &str = "signing-key.asc";

/// Request for the pre-built ingress, which skips the build engine entirely.
#[derive(Debug, Clone)]
pub struct PrebuiltRequest {
    pub version: String,
    pub arch: Architecture,
    pub release_root: String,
}

/// Fetch, PGP-verify, hash-check, and install a pre-built kernel image.
///
/// The image lands directly at
/// `{installed_root}/{version}/{kernel_name}-{version}-{arch}` — pre-built
/// kernels do not go through the installer's timestamping path. Scratch
/// downloads are removed on every exit path.
pub async fn download_prebuilt(
    ctx: &CoreContext,
    gpg: &Gpg,
    client: &reqwest::Client,
    request: &PrebuiltRequest,
    events: &EventSender,
) -> BuildResult<PathBuf> {
    gpg.require()?;
    tokio::fs::create_dir_all(ctx.cache_root()).await?;
    let scratch = tempfile::tempdir_in(ctx.cache_root())?;

    let image_xz_name = prebuilt_image_name(
        ctx.kernel_name(),
        &request.version,
        request.arch.as_str(),
    );
    for file in [
        image_xz_name.as_str(),
        SUMS_FILE,
        SUMS_SIG_FILE,
        SIGNING_KEY_FILE,
    ] {
        let url = prebuilt_file_url(&request.release_root, &request.version, file);
        events.info(&format!("downloading {url}")).await;
        let progress_events = events.clone();
        fetch(
            client,
            &url,
            &scratch.path().join(file),
            &[],
            move |f| progress_events.progress_now(f),
        )
        .await?;
    }

    // Re-importing an already-known key is benign, so failures are ignored.
    gpg.import_key_file(&scratch.path().join(SIGNING_KEY_FILE)).await;

    let sums = scratch.path().join(SUMS_FILE);
    gpg.verify_detached(&scratch.path().join(SUMS_SIG_FILE), &sums)
        .await?;
    events.info("release manifest signature is good").await;

    let image_xz = scratch.path().join(&image_xz_name);
    anvil_artifact::verify_sha256_file(&image_xz, &sums).await?;

    let image_name = image_xz_name.strip_suffix(".xz").unwrap_or(&image_xz_name);
    let image = scratch.path().join(image_name);
    let decompress_events = events.clone();
    anvil_artifact::decompress_xz(&image_xz, &image, move |f| {
        decompress_events.progress_blocking(f);
    })
    .await?;
    anvil_artifact::verify_sha256_file(&image, &sums).await?;

    let dest_dir = ctx.installed_root().join(&request.version);
    tokio::fs::create_dir_all(&dest_dir).await?;
    let dest = dest_dir.join(image_name);
    tokio::fs::copy(&image, &dest).await?;
    events
        .info(&format!("installed pre-built kernel at {}", dest.display()))
        .await;

    Ok(dest)
}
