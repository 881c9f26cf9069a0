//! Persisted client-side state: the credential that survives restarts.
//!
//! Tokens are stored as plaintext JSON (0600 on Unix), the same way other
//! CLI tools keep their credentials. `restore()` re-validates against the
//! service before trusting anything read from here.

use crate::model::User;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const AUTH_FILE: &str = "auth.json";

/// Credential and user descriptor persisted across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredential {
    pub token: String,
    pub user: User,
    pub issued_at: String,
}

/// On-disk credential store rooted at a directory, injected so tests can
/// point it at a temp dir.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Platform config dir, e.g. `~/.config/promptx` on Linux.
    pub fn default_location() -> Result<Self> {
        let dir = dirs::config_dir()
            .context("could not determine config directory")?
            .join("promptx");
        Ok(Self::at(dir))
    }

    fn auth_path(&self) -> PathBuf {
        self.dir.join(AUTH_FILE)
    }

    pub fn save(&self, cred: &StoredCredential) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create {}", self.dir.display()))?;
        let path = self.auth_path();
        let json = serde_json::to_string_pretty(cred)?;
        fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&path, fs::Permissions::from_mode(0o600));
        }
        Ok(path)
    }

    /// Read the persisted credential. Any failure (missing file, bad JSON)
    /// reads as "nothing persisted" — startup never surfaces an error here.
    pub fn load(&self) -> Option<StoredCredential> {
        let raw = fs::read_to_string(self.auth_path()).ok()?;
        match serde_json::from_str(&raw) {
            Ok(cred) => Some(cred),
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable credential file");
                None
            }
        }
    }

    /// Remove the persisted credential. Best-effort: a missing file is fine.
    pub fn clear(&self) {
        let _ = fs::remove_file(self.auth_path());
    }
}
