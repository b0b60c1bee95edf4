use crate::config::BackendKind;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Credential storage, keyed by [`BackendKind::secret_key`].
pub trait SecretStore: Send + Sync {
    fn get_secret(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set_secret(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn delete_secret(&self, key: &str) -> anyhow::Result<()>;
}

/// Interactive source of credentials, asked on first use of a hosted
/// backend. Returns `None` when the user declines.
pub trait SecretPrompt: Send + Sync {
    fn prompt_for_secret(&self, kind: BackendKind) -> Option<String>;
}

/// Never prompts. Used for non-interactive runs.
pub struct NoPrompt;

impl SecretPrompt for NoPrompt {
    fn prompt_for_secret(&self, _kind: BackendKind) -> Option<String> {
        None
    }
}

/// JSON file of key/value secrets, readable only by the owner on unix.
pub struct FileSecretStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> anyhow::Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write_all(&self, secrets: &BTreeMap<String, String>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(secrets)?)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

impl SecretStore for FileSecretStore {
    fn get_secret(&self, key: &str) -> anyhow::Result<Option<String>> {
        let _guard = self.lock.lock().map_err(|_| anyhow::anyhow!("secret store lock poisoned"))?;
        Ok(self.read_all()?.get(key).cloned())
    }

    fn set_secret(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let _guard = self.lock.lock().map_err(|_| anyhow::anyhow!("secret store lock poisoned"))?;
        let mut secrets = self.read_all()?;
        secrets.insert(key.to_string(), value.to_string());
        self.write_all(&secrets)
    }

    fn delete_secret(&self, key: &str) -> anyhow::Result<()> {
        let _guard = self.lock.lock().map_err(|_| anyhow::anyhow!("secret store lock poisoned"))?;
        let mut secrets = self.read_all()?;
        if secrets.remove(key).is_some() {
            self.write_all(&secrets)?;
        }
        Ok(())
    }
}
