#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected HTTP status for {url}: {status}")]
    HttpStatus { url: String, status: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type FetchResult<T> = Result<T, FetchError>;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("upstream catalog unreachable: {0}")]
    Unreachable(String),

    #[error(
        "version {requested} not in the upstream catalog; recent releases: {}",
        candidates.join(", ")
    )]
    VersionUnknown {
        requested: String,
        candidates: Vec<String>,
    },
}
