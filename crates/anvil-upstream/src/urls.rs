//! Upstream endpoint metadata: release catalog, source tarballs, signed
//! checksum manifests, and the pre-built kernel release host.

/// kernel.org release catalog.
pub const RELEASES_URL: &str = "https://www.kernel.org/releases.json";

const CDN_ROOT: &str = "https://cdn.kernel.org/pub/linux/kernel";

/// Default release root for pre-built kernel images; each version publishes
/// `{image}.xz`, `SHA256SUMS`, `SHA256SUMS.asc`, and `signing-key.asc`.
pub const DEFAULT_PREBUILT_ROOT: &str = "https://kernels.anvil-project.dev/releases";

/// First dotted component of a version string, for CDN series paths.
pub(crate) fn major_of(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

/// `linux-{version}.tar.xz`
pub fn tarball_filename(version: &str) -> String {
    format!("linux-{version}.tar.xz")
}

pub fn tarball_url(major: &str, version: &str) -> String {
    format!("{CDN_ROOT}/v{major}.x/{}", tarball_filename(version))
}

/// Signed `SHA256SUMS`-format manifest for one major series.
pub fn checksums_url(major: &str) -> String {
    format!("{CDN_ROOT}/v{major}.x/sha256sums.asc")
}

/// Compressed pre-built image name: `{kernel_name}-{version}-{arch}.xz`.
pub fn prebuilt_image_name(kernel_name: &str, version: &str, arch: &str) -> String {
    format!("{kernel_name}-{version}-{arch}.xz")
}

/// URL of one companion file under a pre-built release root.
pub fn prebuilt_file_url(root: &str, version: &str, file: &str) -> String {
    format!("{}/v{version}/{file}", root.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_urls_follow_cdn_layout() {
        assert_eq!(
            tarball_url("6", "6.9.1"),
            "https://cdn.kernel.org/pub/linux/kernel/v6.x/linux-6.9.1.tar.xz"
        );
        assert_eq!(
            checksums_url("6"),
            "https://cdn.kernel.org/pub/linux/kernel/v6.x/sha256sums.asc"
        );
    }

    #[test]
    fn prebuilt_urls_nest_under_version_tag() {
        assert_eq!(
            prebuilt_file_url("https://example.com/rel/", "6.9.1", "SHA256SUMS"),
            "https://example.com/rel/v6.9.1/SHA256SUMS"
        );
        assert_eq!(
            prebuilt_image_name("vmlinux", "6.9.1", "x86_64"),
            "vmlinux-6.9.1-x86_64.xz"
        );
    }
}
