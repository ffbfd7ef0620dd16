//! Hashing and archive utilities for kernel artifacts: streaming SHA-256,
//! `SHA256SUMS` manifests, tar extraction, and XZ (de)compression.
//!
//! All heavy work runs synchronously inside `tokio::task::spawn_blocking`;
//! progress callbacks receive a fraction in `[0, 1]` computed from bytes
//! consumed on the input side.

mod digest;
mod error;
mod progress;
mod tarball;
mod xz;

pub use digest::{
    parse_sha256sums, parse_sha256sums_file, serialize_sha256sums, sha256_file,
    sha256_file_with_progress, sha256_sibling_line, verify_sha256_file, write_sha256_sibling,
};
pub use error::{ArtifactError, ArtifactResult};
pub use tarball::{extract_tar_gz, extract_tar_xz};
pub use xz::{compress_xz, decompress_xz};
