#[derive(Debug, thiserror::Error)]
pub enum VmTestError {
    #[error("required tool not found on PATH: {0}")]
    ToolMissing(String),

    #[error("no kernel to test: {0}")]
    KernelMissing(String),

    #[error("no rootfs: {0}")]
    RootfsUnavailable(String),

    #[error("guest did not answer within {0:?}")]
    BootTimeout(std::time::Duration),

    #[error("firecracker exited prematurely: {0}")]
    VmExited(String),

    #[error("vsock probe failed: {0}")]
    Probe(String),

    #[error(transparent)]
    Artifact(#[from] anvil_artifact::ArtifactError),

    #[error(transparent)]
    Fetch(#[from] anvil_upstream::FetchError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type VmTestResult<T> = Result<T, VmTestError>;
