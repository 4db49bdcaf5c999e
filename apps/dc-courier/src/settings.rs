use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use dc_store::{CredentialStore, FileCredentials, KeyringCredentials};
use dc_sync::SyncConfig;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "darklock";
pub const APP_NAME: &str = "courier";

const CONFIG_FILE: &str = "config.toml";
const IDENTITY_FILE: &str = "identity.json";
const KEYRING_ACCOUNT: &str = "identity";

pub fn default_data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    #[default]
    Keyring,
    File,
}

impl FromStr for CredentialBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyring" => Ok(Self::Keyring),
            "file" => Ok(Self::File),
            other => Err(anyhow!("unknown credential backend {other:?} (expected keyring or file)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub relay_url: String,
    /// Defaults to the platform data directory.
    pub data_dir: Option<PathBuf>,
    pub credential_backend: CredentialBackend,
    pub sync: SyncConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            relay_url: "http://127.0.0.1:8080".into(),
            data_dir: None,
            credential_backend: CredentialBackend::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Settings {
    /// Reads `config.toml` from `dir` (the platform data directory when
    /// `None`), then applies `DC_*` environment overrides. A missing file
    /// means defaults.
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let dir = match dir {
            Some(d) => d.to_path_buf(),
            None => match std::env::var_os("DC_DATA_DIR") {
                Some(d) => PathBuf::from(d),
                None => default_data_dir()?,
            },
        };
        let mut settings = Self::from_file(&dir.join(CONFIG_FILE))?;
        settings.data_dir.get_or_insert(dir);
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    fn from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw).with_context(|| format!("parse {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
        }
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = var("DC_RELAY_URL").filter(|v| !v.is_empty()) {
            self.relay_url = url;
        }
        if let Some(dir) = var("DC_DATA_DIR").filter(|v| !v.is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(backend) = var("DC_CREDENTIAL_BACKEND").filter(|v| !v.is_empty()) {
            self.credential_backend = backend.parse()?;
        }
        Ok(())
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(d) => Ok(d.clone()),
            None => default_data_dir(),
        }
    }

    pub fn credentials(&self) -> Result<Arc<dyn CredentialStore>> {
        Ok(match self.credential_backend {
            CredentialBackend::Keyring => Arc::new(KeyringCredentials::new(KEYRING_ACCOUNT)),
            CredentialBackend::File => Arc::new(FileCredentials::new(self.data_dir()?.join(IDENTITY_FILE))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dc_sync::InitialCursor;
    use std::collections::HashMap;
    use std::time::Duration;

    #[test]
    fn missing_file_gives_defaults_rooted_in_dir() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::from_file(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn file_values_and_sync_table_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r#"
relay_url = "https://relay.example"
credential_backend = "file"

[sync]
poll_interval_ms = 750
initial_cursor = { mode = "lookback", secs = 60 }
"#,
        )
        .unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.relay_url, "https://relay.example");
        assert_eq!(settings.credential_backend, CredentialBackend::File);
        assert_eq!(settings.sync.poll_interval, Duration::from_millis(750));
        assert_eq!(settings.sync.initial_cursor, InitialCursor::Lookback { secs: 60 });
        assert_eq!(settings.sync.request_timeout, SyncConfig::default().request_timeout);
    }

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("DC_RELAY_URL", "http://override:9000"),
            ("DC_DATA_DIR", "/tmp/dc"),
            ("DC_CREDENTIAL_BACKEND", "FILE"),
        ]
        .into_iter()
        .collect();
        let mut settings = Settings::default();
        settings.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(settings.relay_url, "http://override:9000");
        assert_eq!(settings.data_dir, Some(PathBuf::from("/tmp/dc")));
        assert_eq!(settings.credential_backend, CredentialBackend::File);
    }

    #[test]
    fn bad_backend_is_rejected() {
        let mut settings = Settings::default();
        assert!(settings
            .apply_env(|k| (k == "DC_CREDENTIAL_BACKEND").then(|| "vault".to_string()))
            .is_err());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "relay_url = [").unwrap();
        assert!(Settings::from_file(&path).is_err());
    }
}
