//! Keyring backed by the `gpg` binary.
//!
//! All operations run against a dedicated `--homedir` so the tool never
//! touches the operator's personal keyring. The home directory is expected
//! to carry `trust-model always` in its `gpg.conf` (the CLI bootstraps
//! this), since imported recipient keys are otherwise untrusted and
//! encryption to them would fail.

use crate::error::{Error, Result};
use crate::keyring::Keyring;
use log::debug;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Keyring implementation shelling out to `gpg`.
#[derive(Debug, Clone)]
pub struct GpgKeyring {
    homedir: PathBuf,
}

impl GpgKeyring {
    /// Create a keyring rooted at the given gpg home directory.
    #[must_use]
    pub fn new(homedir: impl Into<PathBuf>) -> Self {
        Self {
            homedir: homedir.into(),
        }
    }

    /// Run gpg with the given arguments, feeding `stdin_data` if provided,
    /// and capture stdout. Non-zero exit is returned as the stderr text.
    fn run(&self, args: &[&str], stdin_data: Option<&str>) -> std::result::Result<String, String> {
        let mut cmd = Command::new("gpg");
        cmd.arg("--homedir")
            .arg(&self.homedir)
            .args(["--batch", "--quiet", "--trust-model", "always"])
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("Running gpg {}", args.join(" "));

        let mut child = cmd.spawn().map_err(|e| format!("failed to spawn gpg: {}", e))?;
        if let Some(data) = stdin_data {
            let mut stdin = child.stdin.take().ok_or("gpg stdin unavailable")?;
            stdin
                .write_all(data.as_bytes())
                .map_err(|e| format!("failed to write to gpg: {}", e))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| format!("gpg did not exit cleanly: {}", e))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }
}

impl Keyring for GpgKeyring {
    fn list_key_ids(&self) -> Result<Vec<String>> {
        let listing = self
            .run(&["--list-keys", "--with-colons"], None)
            .map_err(Error::KeyImport)?;
        Ok(parse_key_ids(&listing))
    }

    fn import_key(&mut self, armored_key: &str) -> Result<()> {
        self.run(&["--import"], Some(armored_key))
            .map(|_| ())
            .map_err(Error::KeyImport)
    }

    fn encrypt(&self, plaintext: &str, key_id: &str) -> Result<String> {
        self.run(
            &["--armor", "--encrypt", "--recipient", key_id],
            Some(plaintext),
        )
        .map_err(|message| Error::Encrypt {
            key_id: key_id.to_string(),
            message,
        })
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        self.run(&["--decrypt"], Some(ciphertext))
            .map_err(Error::Decrypt)
    }
}

/// Extract key ids from `--with-colons` output: field 5 of `pub` records.
fn parse_key_ids(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter(|line| line.starts_with("pub:"))
        .filter_map(|line| line.split(':').nth(4))
        .map(ToString::to_string)
        .collect()
}
