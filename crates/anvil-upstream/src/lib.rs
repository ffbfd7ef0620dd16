//! Upstream kernel.org access: endpoint catalog, release metadata, and a
//! streaming HTTP fetcher with progress reporting.

mod catalog;
mod error;
mod http;
mod urls;

pub use catalog::{Catalog, VersionCheck};
pub use error::{CatalogError, FetchError, FetchResult};
pub use http::fetch;
pub use urls::{
    DEFAULT_PREBUILT_ROOT, RELEASES_URL, checksums_url, prebuilt_file_url, prebuilt_image_name,
    tarball_filename, tarball_url,
};
