use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("relock"))
}

/// Tool configuration, read from `~/.config/relock/config.toml`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub user: UserConfig,
    /// Gpg home directory; defaults to `keyring` inside the config dir.
    #[serde(default)]
    pub keyring_dir: Option<String>,
    /// Extra connector tags, mapped onto built-in connectors.
    #[serde(default)]
    pub connectors: HashMap<String, String>,
    #[serde(default)]
    pub mail: Option<MailConfig>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URI of the directory server.
    pub uri: String,
    /// Expected fingerprint of the server's signing key.
    pub fingerprint: String,
    #[serde(default = "default_true")]
    pub verify_cert: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UserConfig {
    /// Fingerprint of the acting user's key pair in the keyring.
    pub fingerprint: String,
}

/// SMTP relay used to mail the run report.
#[derive(Debug, Serialize, Deserialize)]
pub struct MailConfig {
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub sender: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_smtp_port() -> u16 {
    587
}

impl Config {
    /// Load config.toml
    pub fn load() -> Result<Self> {
        let path = config_dir()?.join("config.toml");
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        toml::from_str(&content).context("Invalid config.toml format")
    }

    /// The gpg home directory the tool works against.
    pub fn keyring_dir(&self) -> Result<PathBuf> {
        match &self.keyring_dir {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => Ok(config_dir()?.join("keyring")),
        }
    }

    /// Create the gpg home on first use: gpg refuses directories that are
    /// not 0700, and imported recipient keys are only usable for
    /// encryption with `trust-model always` in place.
    pub fn ensure_keyring_layout(&self) -> Result<PathBuf> {
        let dir = self.keyring_dir()?;
        let private_keys = dir.join("private-keys-v1.d");
        fs::create_dir_all(&private_keys)?;
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
        fs::set_permissions(&private_keys, fs::Permissions::from_mode(0o700))?;

        let gpg_conf = dir.join("gpg.conf");
        if !gpg_conf.exists() {
            fs::write(&gpg_conf, "trust-model always\n")?;
        }
        Ok(dir)
    }
}
