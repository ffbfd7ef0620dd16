use anvil_artifact::ArtifactError;
use anvil_core::{Architecture, BuildPhase};
use anvil_upstream::{CatalogError, FetchError};

/// Everything a pipeline phase can fail with. The engine never retries; the
/// kind travels verbatim to the caller and only the UI pretty-prints it.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(
        "checksums file does not reference {file}; very fresh releases can lag — \
         retry later or rerun with --verification-level disabled"
    )]
    ChecksumUnavailable { file: String },

    #[error("PGP signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("imported key fingerprint {actual} does not match pinned {expected}")]
    KeySubstitution { expected: String, actual: String },

    #[error("required tool not found on PATH: {0}")]
    ToolMissing(String),

    #[error(
        "no kernel config for {arch}: pass --config <file> or set \
         kernel_config.{arch} in anvil.yaml"
    )]
    ConfigMissing { arch: Architecture },

    #[error("{phase} child process failed: {detail}")]
    ChildProcessFailed { phase: BuildPhase, detail: String },

    #[error("build cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BuildResult<T> = Result<T, BuildError>;
