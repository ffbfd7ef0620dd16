use std::path::Path;

use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

use crate::error::{ArtifactError, ArtifactResult};
use crate::progress::CountingReader;

/// Compression preset for packaged kernel images.
const XZ_LEVEL: u32 = 6;

/// XZ-compress `src` into `dst`, reporting input bytes consumed.
pub async fn compress_xz(
    src: &Path,
    dst: &Path,
    progress: impl Fn(f64) + Send + 'static,
) -> ArtifactResult<()> {
    let src = src.to_owned();
    let dst = dst.to_owned();
    tokio::task::spawn_blocking(move || {
        let input = std::fs::File::open(&src)?;
        let total = input.metadata()?.len();
        let mut counting = CountingReader::new(input, total, progress);

        let output = std::fs::File::create(&dst)?;
        let mut encoder = XzEncoder::new(output, XZ_LEVEL);
        std::io::copy(&mut counting, &mut encoder)?;
        encoder.finish()?.sync_all()?;
        Ok(())
    })
    .await
    .map_err(|e| ArtifactError::Task(e.to_string()))?
}

/// Decompress an XZ stream from `src` into `dst`, reporting compressed bytes
/// consumed.
pub async fn decompress_xz(
    src: &Path,
    dst: &Path,
    progress: impl Fn(f64) + Send + 'static,
) -> ArtifactResult<()> {
    let src = src.to_owned();
    let dst = dst.to_owned();
    tokio::task::spawn_blocking(move || {
        let input = std::fs::File::open(&src)?;
        let total = input.metadata()?.len();
        let counting = CountingReader::new(input, total, progress);
        let mut decoder = XzDecoder::new(counting);

        let mut output = std::fs::File::create(&dst)?;
        std::io::copy(&mut decoder, &mut output)?;
        output.sync_all()?;
        Ok(())
    })
    .await
    .map_err(|e| ArtifactError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn compress_then_decompress_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let original: Vec<u8> = (0..512 * 1024).map(|i| (i % 251) as u8).collect();

        let src = dir.path().join("vmlinux");
        std::fs::write(&src, &original).unwrap();

        let compressed = dir.path().join("vmlinux.xz");
        compress_xz(&src, &compressed, |_| {}).await.unwrap();
        assert!(compressed.metadata().unwrap().len() > 0);

        let restored = dir.path().join("vmlinux.out");
        decompress_xz(&compressed, &restored, |_| {}).await.unwrap();
        assert_eq!(std::fs::read(&restored).unwrap(), original);
    }

    #[tokio::test]
    async fn progress_counts_input_side_monotonically() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("blob");
        std::fs::write(&src, vec![42u8; 300 * 1024]).unwrap();

        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let dst = dir.path().join("blob.xz");
        compress_xz(&src, &dst, move |f| sink.lock().unwrap().push(f))
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!((seen.last().unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn decompress_of_garbage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("junk.xz");
        std::fs::write(&src, b"definitely not xz").unwrap();

        let dst = dir.path().join("out");
        assert!(decompress_xz(&src, &dst, |_| {}).await.is_err());
    }
}
