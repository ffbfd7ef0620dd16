use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use xz2::read::XzDecoder;

use crate::error::{ArtifactError, ArtifactResult};
use crate::progress::CountingReader;

/// Unpack every entry below `dest`, rejecting entries whose normalized path
/// would land outside it.
fn extract_entries<R: Read>(reader: R, dest: &Path) -> ArtifactResult<()> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let shown = entry
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        if !entry.unpack_in(dest)? {
            return Err(ArtifactError::UnsafePath { entry: shown });
        }
    }
    Ok(())
}

/// Extract a `.tar.xz` into `dest`, reporting compressed bytes consumed.
pub async fn extract_tar_xz(
    tarball: &Path,
    dest: &Path,
    progress: impl Fn(f64) + Send + 'static,
) -> ArtifactResult<()> {
    let tarball = tarball.to_owned();
    let dest = dest.to_owned();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&tarball)?;
        let compressed_size = file.metadata()?.len();
        std::fs::create_dir_all(&dest)?;
        let counting = CountingReader::new(file, compressed_size, progress);
        extract_entries(XzDecoder::new(counting), &dest)
    })
    .await
    .map_err(|e| ArtifactError::Task(e.to_string()))?
}

/// Extract a `.tar.gz` into `dest`, reporting compressed bytes consumed.
pub async fn extract_tar_gz(
    tarball: &Path,
    dest: &Path,
    progress: impl Fn(f64) + Send + 'static,
) -> ArtifactResult<()> {
    let tarball = tarball.to_owned();
    let dest = dest.to_owned();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&tarball)?;
        let compressed_size = file.metadata()?.len();
        std::fs::create_dir_all(&dest)?;
        let counting = CountingReader::new(file, compressed_size, progress);
        extract_entries(GzDecoder::new(counting), &dest)
    })
    .await
    .map_err(|e| ArtifactError::Task(e.to_string()))?
}
