#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{file} has no entry in {sums}")]
    ChecksumMissing { file: String, sums: String },

    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("archive entry escapes extraction root: {entry}")]
    UnsafePath { entry: String },

    #[error("blocking task failed: {0}")]
    Task(String),
}

pub type ArtifactResult<T> = Result<T, ArtifactError>;
