use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CatalogError, FetchError, FetchResult};
use crate::urls;

/// Cap on catalog and checksum-probe requests.
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Most-recent versions quoted in a `VersionUnknown` error.
const MAX_CANDIDATES: usize = 10;

#[derive(Debug, Deserialize)]
struct ReleasesDoc {
    #[serde(default)]
    releases: Vec<ReleaseEntry>,
    latest_stable: Option<LatestStable>,
}

#[derive(Debug, Deserialize)]
struct ReleaseEntry {
    version: String,
    #[serde(default)]
    moniker: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LatestStable {
    version: String,
}

impl ReleasesDoc {
    fn contains(&self, version: &str) -> bool {
        self.releases.iter().any(|r| r.version == version)
    }

    fn candidates(&self) -> Vec<String> {
        self.releases
            .iter()
            .take(MAX_CANDIDATES)
            .map(|r| r.version.clone())
            .collect()
    }

    fn latest_stable(&self) -> Option<&str> {
        if let Some(latest) = &self.latest_stable {
            return Some(&latest.version);
        }
        self.releases
            .iter()
            .find(|r| r.moniker.as_deref() == Some("stable"))
            .map(|r| r.version.as_str())
    }
}

/// Outcome of the buildability probe consumed by CI.
#[derive(Debug, Clone, Serialize)]
pub struct VersionCheck {
    pub version: String,
    pub available: bool,
    pub checksums_ready: bool,
    pub buildable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checksums_url: String,
    pub source_url: String,
}

/// Advisory view of the upstream release catalog.
///
/// The catalog never gates correctness — the Verify phase is the authority —
/// so an unreachable or unparseable upstream degrades to "assume listed".
pub struct Catalog {
    client: reqwest::Client,
}

impl Catalog {
    pub fn new() -> FetchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    async fn fetch_doc(&self) -> Option<ReleasesDoc> {
        let response = match self.client.get(urls::RELEASES_URL).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("release catalog unreachable: {e}");
                return None;
            }
        };
        if response.status() != reqwest::StatusCode::OK {
            debug!("release catalog returned {}", response.status());
            return None;
        }
        match response.json::<ReleasesDoc>().await {
            Ok(doc) => Some(doc),
            Err(e) => {
                debug!("release catalog unparseable: {e}");
                None
            }
        }
    }

    /// Current upstream latest stable version.
    pub async fn latest_stable(&self) -> Result<String, CatalogError> {
        let doc = self
            .fetch_doc()
            .await
            .ok_or_else(|| CatalogError::Unreachable(urls::RELEASES_URL.to_string()))?;
        doc.latest_stable()
            .map(str::to_string)
            .ok_or_else(|| CatalogError::Unreachable("catalog lists no stable release".to_string()))
    }

    /// Advisory membership check. Succeeds silently when the upstream is
    /// unreachable or unparseable; fails only when a structured catalog is
    /// present and does not list the version.
    pub async fn validate(&self, version: &str) -> Result<(), CatalogError> {
        let Some(doc) = self.fetch_doc().await else {
            debug!("catalog unavailable; skipping advisory validation of {version}");
            return Ok(());
        };
        if doc.contains(version) {
            return Ok(());
        }
        Err(CatalogError::VersionUnknown {
            requested: version.to_string(),
            candidates: doc.candidates(),
        })
    }

    /// Buildability probe: catalog membership plus a live check that the
    /// signed checksum manifest for the version's major series references the
    /// source tarball. Empty or `"latest"` input resolves through
    /// [`Catalog::latest_stable`] first.
    pub async fn check(&self, version: &str) -> Result<VersionCheck, CatalogError> {
        let version = match version {
            "" | "latest" => self.latest_stable().await?,
            explicit => explicit.to_string(),
        };

        let major = urls::major_of(&version);
        let checksums_url = urls::checksums_url(major);
        let source_url = urls::tarball_url(major, &version);

        let (available, mut message) = match self.validate(&version).await {
            Ok(()) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        };

        let checksums_ready = match self.probe_checksums(&checksums_url, &version).await {
            Ok(ready) => {
                if !ready && message.is_none() {
                    message = Some(format!(
                        "checksums file does not reference {} yet",
                        urls::tarball_filename(&version)
                    ));
                }
                ready
            }
            Err(e) => {
                if message.is_none() {
                    message = Some(e.to_string());
                }
                false
            }
        };

        Ok(VersionCheck {
            buildable: available && checksums_ready,
            version,
            available,
            checksums_ready,
            message,
            checksums_url,
            source_url,
        })
    }

    async fn probe_checksums(&self, url: &str, version: &str) -> FetchResult<bool> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        if response.status() != reqwest::StatusCode::OK {
            return Ok(false);
        }
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(body.contains(&urls::tarball_filename(version)))
    }
}
