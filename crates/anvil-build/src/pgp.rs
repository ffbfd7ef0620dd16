use std::path::Path;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::child::require_tool;
use crate::error::{BuildError, BuildResult};

/// Long key id of the kernel.org checksum autosigner.
pub const UPSTREAM_KEY_ID: &str = "632D3A06589DA6B1";

/// Full fingerprint the imported key must match, byte for byte.
pub const UPSTREAM_KEY_FINGERPRINT: &str = "B8868C80BA62A1FFFAF5FDA9632D3A06589DA6B1";

/// Keyservers tried in order when the local keyring lacks the pinned key.
const KEYSERVERS: [&str; 3] = [
    "hkps://keyserver.ubuntu.com",
    "hkps://keys.openpgp.org",
    "hkps://pgp.mit.edu",
];

/// The marker gpg prints for a valid signature; anything else is a failure.
const GOOD_SIGNATURE: &str = "Good signature";

/// Thin wrapper around the external `gpg` binary.
///
/// Anvil never implements OpenPGP itself; it shells out and inspects output,
/// pinning the upstream identity by key id and full fingerprint.
#[derive(Debug, Clone)]
pub struct Gpg {
    program: String,
}

impl Default for Gpg {
    fn default() -> Self {
        Self::new()
    }
}

impl Gpg {
    pub fn new() -> Self {
        Self {
            program: "gpg".to_string(),
        }
    }

    /// Use an alternative gpg binary (tests point this at a stub).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn require(&self) -> BuildResult<()> {
        require_tool(&self.program)
    }

    async fn run(&self, args: &[&str]) -> BuildResult<std::process::Output> {
        debug!("gpg {}", args.join(" "));
        Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(BuildError::Io)
    }

    /// Combined stdout + stderr; gpg writes status text to either.
    fn combined(output: &std::process::Output) -> String {
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        text
    }

    pub async fn has_key(&self, key_id: &str) -> bool {
        matches!(
            self.run(&["--batch", "--list-keys", key_id]).await,
            Ok(output) if output.status.success()
        )
    }

    /// Import a key from the first keyserver that answers.
    pub async fn import_from_keyservers(&self, key_id: &str) -> BuildResult<()> {
        for keyserver in KEYSERVERS {
            let output = self
                .run(&["--batch", "--keyserver", keyserver, "--recv-keys", key_id])
                .await?;
            if output.status.success() {
                debug!("imported {key_id} from {keyserver}");
                return Ok(());
            }
            warn!(
                "keyserver {keyserver} did not deliver {key_id}: {}",
                Self::combined(&output).trim()
            );
        }
        Err(BuildError::SignatureInvalid(format!(
            "could not import signing key {key_id} from any keyserver"
        )))
    }

    /// Primary-key fingerprint as stored in the local keyring.
    pub async fn fingerprint(&self, key_id: &str) -> BuildResult<String> {
        let output = self
            .run(&["--batch", "--with-colons", "--fingerprint", key_id])
            .await?;
        if !output.status.success() {
            return Err(BuildError::SignatureInvalid(format!(
                "key {key_id} not present in the local keyring"
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        stdout
            .lines()
            .find(|l| l.starts_with("fpr:"))
            .and_then(|l| l.split(':').nth(9))
            .filter(|fpr| !fpr.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                BuildError::SignatureInvalid(format!(
                    "gpg printed no fingerprint for {key_id}"
                ))
            })
    }

    /// Import a key file into the keyring, ignoring failures (re-importing an
    /// already-known key is benign).
    pub async fn import_key_file(&self, path: &Path) {
        let path = path.display().to_string();
        match self.run(&["--batch", "--import", &path]).await {
            Ok(output) if output.status.success() => {}
            Ok(output) => debug!(
                "gpg --import {path} failed (ignored): {}",
                Self::combined(&output).trim()
            ),
            Err(e) => debug!("gpg --import {path} failed (ignored): {e}"),
        }
    }

    /// Verify a clearsigned file; `Good signature` must appear in the output.
    pub async fn verify_clearsigned(&self, file: &Path) -> BuildResult<()> {
        let file = file.display().to_string();
        let output = self.run(&["--batch", "--verify", &file]).await?;
        Self::check_good_signature(&output)
    }

    /// Verify a detached signature over `data`.
    pub async fn verify_detached(&self, signature: &Path, data: &Path) -> BuildResult<()> {
        let signature = signature.display().to_string();
        let data = data.display().to_string();
        let output = self
            .run(&["--batch", "--verify", &signature, &data])
            .await?;
        Self::check_good_signature(&output)
    }

    fn check_good_signature(output: &std::process::Output) -> BuildResult<()> {
        let text = Self::combined(output);
        if output.status.success() && text.contains(GOOD_SIGNATURE) {
            Ok(())
        } else {
            Err(BuildError::SignatureInvalid(
                text.trim().lines().next_back().unwrap_or("no gpg output").to_string(),
            ))
        }
    }
}

/// Make sure the pinned upstream key is usable: present (importing it if
/// necessary) and carrying exactly the pinned fingerprint.
pub(crate) async fn ensure_pinned_key(gpg: &Gpg) -> BuildResult<()> {
    if !gpg.has_key(UPSTREAM_KEY_ID).await {
        gpg.import_from_keyservers(UPSTREAM_KEY_ID).await?;
    }
    let actual = gpg.fingerprint(UPSTREAM_KEY_ID).await?;
    if actual != UPSTREAM_KEY_FINGERPRINT {
        return Err(BuildError::KeySubstitution {
            expected: UPSTREAM_KEY_FINGERPRINT.to_string(),
            actual,
        });
    }
    Ok(())
}
