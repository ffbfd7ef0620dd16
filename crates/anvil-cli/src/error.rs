#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Context(#[from] anvil_core::ContextError),

    #[error(transparent)]
    Build(#[from] anvil_build::BuildError),

    #[error(transparent)]
    VmTest(#[from] anvil_vmtest::VmTestError),

    #[error(transparent)]
    Catalog(#[from] anvil_upstream::CatalogError),

    #[error(transparent)]
    Fetch(#[from] anvil_upstream::FetchError),

    #[error("{0}")]
    Usage(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CliResult<T> = Result<T, CliError>;
