//! The kernel build pipeline: source verification, the six-phase build
//! engine, installation with default-pointer swap, repository archiving, and
//! the pre-built download ingress.

mod child;
mod engine;
mod error;
mod install;
mod pgp;
mod prebuilt;
mod verify;

pub use engine::BuildEngine;
pub use error::{BuildError, BuildResult};
pub use install::{ArchiveIndex, archive, check_installed, install, versioned_name};
pub use pgp::Gpg;
pub use prebuilt::{PrebuiltRequest, download_prebuilt};
