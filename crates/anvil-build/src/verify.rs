use std::path::Path;

use anvil_core::{CoreContext, EventSender, VerificationLevel, major};
use anvil_upstream::{checksums_url, fetch, tarball_filename};

use crate::error::{BuildError, BuildResult};
use crate::pgp::{self, Gpg};

/// Freshness rule: whenever verification is enabled, cached downloads and
/// extracted sources from earlier runs are removed before the Download phase
/// so the verified bytes are the bytes actually built.
pub(crate) async fn scrub_cached_sources(
    ctx: &CoreContext,
    version: &str,
    level: VerificationLevel,
    events: &EventSender,
) -> BuildResult<()> {
    if level == VerificationLevel::Disabled {
        return Ok(());
    }

    let tarball = ctx.tarball_path(version);
    if tokio::fs::try_exists(&tarball).await.unwrap_or(false) {
        events
            .info(&format!(
                "removing cached {} (verification {level} forces a fresh download)",
                tarball.display()
            ))
            .await;
        tokio::fs::remove_file(&tarball).await?;
    }

    let source_dir = ctx.source_dir(version);
    if tokio::fs::try_exists(&source_dir).await.unwrap_or(false) {
        events
            .info(&format!(
                "removing cached source tree {}",
                source_dir.display()
            ))
            .await;
        tokio::fs::remove_dir_all(&source_dir).await?;
    }

    Ok(())
}

/// Verify the downloaded tarball per the requested level.
///
/// `Medium` fetches the upstream signed checksum file over HTTPS and checks
/// the tarball's SHA-256 against it; `High` additionally requires a valid PGP
/// signature from the pinned upstream key. The checksum file is scratch-only
/// and removed before returning, whatever the outcome. On a checksum mismatch
/// the tarball is deleted as untrusted; on a signature failure it is left
/// alone so a later `disabled` run can still consume it.
pub(crate) async fn verify_source(
    ctx: &CoreContext,
    client: &reqwest::Client,
    gpg: &Gpg,
    level: VerificationLevel,
    version: &str,
    events: &EventSender,
) -> BuildResult<()> {
    if level == VerificationLevel::Disabled {
        events
            .warn("source verification disabled; building unverified bytes")
            .await;
        return Ok(());
    }

    let scratch = ctx.checksums_scratch_path();
    let result = verify_with_manifest(ctx, client, gpg, level, version, &scratch, events).await;
    let _ = tokio::fs::remove_file(&scratch).await;
    result
}

async fn verify_with_manifest(
    ctx: &CoreContext,
    client: &reqwest::Client,
    gpg: &Gpg,
    level: VerificationLevel,
    version: &str,
    scratch: &Path,
    events: &EventSender,
) -> BuildResult<()> {
    let tarball_name = tarball_filename(version);
    let major = major(version).ok_or_else(|| BuildError::ChecksumUnavailable {
        file: tarball_name.clone(),
    })?;

    let url = checksums_url(major);
    events
        .info(&format!("fetching signed checksums from {url}"))
        .await;
    fetch(client, &url, scratch, &[], |_| {}).await?;

    if level == VerificationLevel::High {
        gpg.require()?;
        events
            .info("verifying checksum file signature against the pinned upstream key")
            .await;
        pgp::ensure_pinned_key(gpg).await?;
        gpg.verify_clearsigned(scratch).await?;
        events.info("checksum file signature is good").await;
    } else {
        events
            .warn("verification level medium: trusting HTTPS origin for the checksum file")
            .await;
    }

    check_tarball_against_manifest(&ctx.tarball_path(version), scratch, &tarball_name, events)
        .await
}

/// Hash the tarball and compare it against its manifest entry. A mismatching
/// tarball is untrusted and removed from the build tree.
async fn check_tarball_against_manifest(
    tarball: &Path,
    manifest: &Path,
    tarball_name: &str,
    events: &EventSender,
) -> BuildResult<()> {
    let entries = anvil_artifact::parse_sha256sums_file(manifest).await?;
    let Some(expected) = entries.get(tarball_name) else {
        return Err(BuildError::ChecksumUnavailable {
            file: tarball_name.to_string(),
        });
    };

    events.info(&format!("hashing {}", tarball.display())).await;
    let hasher_events = events.clone();
    let actual = anvil_artifact::sha256_file_with_progress(tarball, move |f| {
        hasher_events.progress_blocking(f);
    })
    .await?;

    if !actual.eq_ignore_ascii_case(expected) {
        events
            .warn(&format!(
                "discarding {} — its hash does not match the upstream manifest",
                tarball.display()
            ))
            .await;
        let _ = tokio::fs::remove_file(tarball).await;
        return Err(anvil_artifact::ArtifactError::ChecksumMismatch {
            file: tarball_name.to_string(),
            expected: expected.clone(),
            actual,
        }
        .into());
    }

    events.info("tarball checksum verified").await;
    Ok(())
}
