use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{ArtifactError, ArtifactResult};

const READ_BUF_SIZE: usize = 64 * 1024;

/// Hash a reader, reporting consumed bytes to `on_bytes`.
fn sha256_reader<R: Read>(mut reader: R, mut on_bytes: impl FnMut(u64)) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let chunk = buf
            .get(..n)
            .ok_or_else(|| std::io::Error::other("read returned invalid length"))?;
        hasher.update(chunk);
        on_bytes(n as u64);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn sha256_file_sync(path: &Path, progress: Option<&(dyn Fn(f64) + Send)>) -> ArtifactResult<String> {
    let file = std::fs::File::open(path)?;
    let total = file.metadata()?.len();
    let mut read = 0u64;
    let hex = sha256_reader(file, |n| {
        read += n;
        if let Some(progress) = progress
            && total > 0
        {
            progress((read as f64 / total as f64).min(1.0));
        }
    })?;
    Ok(hex)
}

/// Streaming SHA-256 of a file, as lowercase hex.
pub async fn sha256_file(path: &Path) -> ArtifactResult<String> {
    let path = path.to_owned();
    tokio::task::spawn_blocking(move || sha256_file_sync(&path, None))
        .await
        .map_err(|e| ArtifactError::Task(e.to_string()))?
}

/// Streaming SHA-256 with a progress callback (fraction of the file hashed).
pub async fn sha256_file_with_progress(
    path: &Path,
    progress: impl Fn(f64) + Send + 'static,
) -> ArtifactResult<String> {
    let path = path.to_owned();
    tokio::task::spawn_blocking(move || sha256_file_sync(&path, Some(&progress)))
        .await
        .map_err(|e| ArtifactError::Task(e.to_string()))?
}

/// Parse `SHA256SUMS`-format text into `filename → lowercase hex`.
///
/// Entry lines are `HEX<whitespace>[*]FILENAME`. Blank lines, `#` comments,
/// and anything that does not start with a 64-char hex field (e.g. PGP armor
/// around a clearsigned manifest) are skipped. A leading `*` (binary-mode
/// marker) is stripped from the filename.
pub fn parse_sha256sums(content: &str) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((hash, rest)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            continue;
        }
        let name = rest.trim_start().trim_start_matches('*');
        if name.is_empty() {
            continue;
        }
        entries.insert(name.to_string(), hash.to_ascii_lowercase());
    }
    entries
}

/// Parse a `SHA256SUMS`-format file.
pub async fn parse_sha256sums_file(path: &Path) -> ArtifactResult<BTreeMap<String, String>> {
    let content = tokio::fs::read_to_string(path).await.map_err(ArtifactError::Io)?;
    Ok(parse_sha256sums(&content))
}

/// Serialise a checksum map back into `SHA256SUMS` text (`HEX  NAME\n`).
pub fn serialize_sha256sums(entries: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (name, hash) in entries {
        out.push_str(&sha256_sibling_line(hash, name));
    }
    out
}

/// One manifest line: `HEX`, two spaces, `FILENAME`, newline.
pub fn sha256_sibling_line(hex: &str, filename: &str) -> String {
    format!("{hex}  {filename}\n")
}

/// Hash `target` and compare it (case-insensitively) against the entry for
/// its basename in `sums_path`. Returns the actual hash on success.
pub async fn verify_sha256_file(target: &Path, sums_path: &Path) -> ArtifactResult<String> {
    let entries = parse_sha256sums_file(sums_path).await?;
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let expected = entries
        .get(&name)
        .ok_or_else(|| ArtifactError::ChecksumMissing {
            file: name.clone(),
            sums: sums_path.display().to_string(),
        })?;

    let actual = sha256_file(target).await?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(ArtifactError::ChecksumMismatch {
            file: name,
            expected: expected.clone(),
            actual,
        });
    }
    Ok(actual)
}

/// Hash a file and write a `.sha256` sibling next to it. Returns the sibling
/// path and the hash.
pub async fn write_sha256_sibling(path: &Path) -> ArtifactResult<(PathBuf, String)> {
    let hex = sha256_file(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sibling = PathBuf::from(format!("{}.sha256", path.display()));
    tokio::fs::write(&sibling, sha256_sibling_line(&hex, &name))
        .await
        .map_err(ArtifactError::Io)?;
    Ok((sibling, hex))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[tokio::test]
    async fn sha256_matches_known_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.txt");
        tokio::fs::write(&path, b"abc").await.unwrap();
        assert_eq!(sha256_file(&path).await.unwrap(), ABC_SHA256);
    }

    #[tokio::test]
    async fn hashing_progress_ends_at_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        tokio::fs::write(&path, vec![0u8; 256 * 1024]).await.unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        sha256_file_with_progress(&path, move |f| {
            let _ = tx.send(f);
        })
        .await
        .unwrap();

        let seen: Vec<f64> = rx.try_iter().collect();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!((seen.last().unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_skips_comments_blanks_and_armor() {
        let text = format!(
            "-----BEGIN PGP SIGNED MESSAGE-----\n\
             Hash: SHA256\n\
             \n\
             # upstream manifest\n\
             {ABC_SHA256}  linux-6.9.1.tar.xz\n\
             {}  *linux-6.9.2.tar.xz\n\
             -----BEGIN PGP SIGNATURE-----\n\
             iQIzBAABCAAdFiEE\n\
             -----END PGP SIGNATURE-----\n",
            ABC_SHA256.to_uppercase()
        );
        let entries = parse_sha256sums(&text);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["linux-6.9.1.tar.xz"], ABC_SHA256);
        // binary marker stripped, hex lowercased
        assert_eq!(entries["linux-6.9.2.tar.xz"], ABC_SHA256);
    }

    #[test]
    fn serialize_round_trips_parsed_entries() {
        let text = format!("{ABC_SHA256}  a.xz\n{ABC_SHA256}  b.xz\n");
        let entries = parse_sha256sums(&text);
        assert_eq!(serialize_sha256sums(&entries), text);
    }

    #[tokio::test]
    async fn verify_accepts_case_insensitive_match() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("linux-6.9.1.tar.xz");
        tokio::fs::write(&target, b"abc").await.unwrap();

        let sums = dir.path().join("SHA256SUMS");
        tokio::fs::write(
            &sums,
            format!("{}  linux-6.9.1.tar.xz\n", ABC_SHA256.to_uppercase()),
        )
        .await
        .unwrap();

        assert_eq!(
            verify_sha256_file(&target, &sums).await.unwrap(),
            ABC_SHA256
        );
    }

    #[tokio::test]
    async fn verify_reports_missing_and_mismatched_entries() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("linux-6.9.1.tar.xz");
        tokio::fs::write(&target, b"abc").await.unwrap();

        let sums = dir.path().join("SHA256SUMS");
        tokio::fs::write(&sums, "").await.unwrap();
        assert!(matches!(
            verify_sha256_file(&target, &sums).await.unwrap_err(),
            ArtifactError::ChecksumMissing { .. }
        ));

        tokio::fs::write(&sums, format!("{}  linux-6.9.1.tar.xz\n", "0".repeat(64)))
            .await
            .unwrap();
        match verify_sha256_file(&target, &sums).await.unwrap_err() {
            ArtifactError::ChecksumMismatch { expected, actual, .. } => {
                assert_eq!(expected, "0".repeat(64));
                assert_eq!(actual, ABC_SHA256);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn sibling_file_carries_two_space_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vmlinux-6.9.1-x86_64");
        tokio::fs::write(&path, b"abc").await.unwrap();

        let (sibling, hex) = write_sha256_sibling(&path).await.unwrap();
        assert_eq!(hex, ABC_SHA256);
        let content = tokio::fs::read_to_string(&sibling).await.unwrap();
        assert_eq!(content, format!("{ABC_SHA256}  vmlinux-6.9.1-x86_64\n"));
    }
}
