//! Local keyring abstraction and the per-run import cache.
//!
//! [`Keyring`] is the narrow surface the orchestrator needs from the PGP
//! keyring; [`gpg::GpgKeyring`] backs it with the `gpg` binary, and
//! [`MockKeyring`] keeps keys in memory for tests.

pub mod gpg;

use crate::error::Result;
use log::{error, info};
use std::collections::HashSet;

/// Primitive operations over the local PGP keyring.
pub trait Keyring {
    /// Ids of the keys currently present in the keyring.
    fn list_key_ids(&self) -> Result<Vec<String>>;

    /// Import armored public key material.
    fn import_key(&mut self, armored_key: &str) -> Result<()>;

    /// Encrypt `plaintext` to the given recipient key, returning armored
    /// ciphertext.
    fn encrypt(&self, plaintext: &str, key_id: &str) -> Result<String>;

    /// Decrypt armored ciphertext with the acting user's private key.
    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// Outcome of an [`KeyringCache::ensure_imported`] call.
///
/// "Already present" and "failed" are deliberately distinct: the first is
/// the common no-op, the second must block the fan-out of the resource
/// being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The key was imported during this call.
    Imported,
    /// The key was already in the keyring or imported earlier this run.
    AlreadyPresent,
    /// The import was attempted and failed.
    Failed,
}

/// Deduplicates public-key imports against the local keyring.
///
/// Keys are tracked by the short (8 character) id suffix, which is what
/// the keyring listing exposes.
#[derive(Debug)]
pub struct KeyringCache {
    /// Short ids present in the keyring when the run started.
    known: HashSet<String>,
    /// Short ids imported during this run.
    added: HashSet<String>,
}

impl KeyringCache {
    /// Snapshot the keys currently in the keyring.
    pub fn new(keyring: &dyn Keyring) -> Result<Self> {
        let known = keyring
            .list_key_ids()?
            .iter()
            .map(|id| short_id(id).to_string())
            .collect();
        Ok(Self {
            known,
            added: HashSet::new(),
        })
    }

    /// Import the key unless it is already present, either from before the
    /// run or from an earlier import during it.
    pub fn ensure_imported(
        &mut self,
        keyring: &mut dyn Keyring,
        key_id: &str,
        armored_key: &str,
        owner: &str,
    ) -> ImportOutcome {
        let short = short_id(key_id);
        if self.known.contains(short) || self.added.contains(short) {
            return ImportOutcome::AlreadyPresent;
        }

        info!("Importing missing public key for {} ({})", owner, key_id);
        match keyring.import_key(armored_key) {
            Ok(()) => {
                self.added.insert(short.to_string());
                ImportOutcome::Imported
            }
            Err(e) => {
                error!("Failed to import key [{}] in the keyring: {}", key_id, e);
                ImportOutcome::Failed
            }
        }
    }
}

/// The trailing 8 characters of a key id, the form key listings use.
fn short_id(key_id: &str) -> &str {
    let start = key_id.len().saturating_sub(8);
    &key_id[start..]
}

/// In-memory keyring for testing without gpg.
///
/// Armored key material doubles as the key id, so tests can drive imports
/// and encryption with plain strings. Ciphertexts use the reversible form
/// `pgp:<plaintext>` so `decrypt` needs no key state.
#[derive(Debug, Default)]
pub struct MockKeyring {
    /// Key ids present in the ring.
    pub present: HashSet<String>,
    /// Armored payloads whose import fails.
    pub fail_imports: HashSet<String>,
    /// Every armored payload passed to `import_key`, in order.
    pub import_calls: Vec<String>,
}

impl MockKeyring {
    /// Create an empty mock keyring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock keyring seeded with the given key ids.
    #[must_use]
    pub fn with_keys(ids: &[&str]) -> Self {
        Self {
            present: ids.iter().map(|s| (*s).to_string()).collect(),
            ..Self::default()
        }
    }
}

impl Keyring for MockKeyring {
    fn list_key_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.present.iter().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn import_key(&mut self, armored_key: &str) -> Result<()> {
        self.import_calls.push(armored_key.to_string());
        if self.fail_imports.contains(armored_key) {
            return Err(crate::error::Error::KeyImport(format!(
                "mock refused [{}]",
                armored_key
            )));
        }
        self.present.insert(armored_key.to_string());
        Ok(())
    }

    fn encrypt(&self, plaintext: &str, key_id: &str) -> Result<String> {
        if !self.present.contains(short_id(key_id)) && !self.present.contains(key_id) {
            return Err(crate::error::Error::Encrypt {
                key_id: key_id.to_string(),
                message: "no such key in the ring".to_string(),
            });
        }
        Ok(format!("pgp[{}]:{}", key_id, plaintext))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        ciphertext
            .strip_prefix("pgp:")
            .map(ToString::to_string)
            .ok_or_else(|| crate::error::Error::Decrypt("not a mock ciphertext".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_imported_is_idempotent() {
        let mut keyring = MockKeyring::new();
        let mut cache = KeyringCache::new(&keyring).unwrap();

        let first = cache.ensure_imported(&mut keyring, "AABBCCDD", "AABBCCDD", "Ada Lovelace");
        let second = cache.ensure_imported(&mut keyring, "AABBCCDD", "AABBCCDD", "Ada Lovelace");

        assert_eq!(first, ImportOutcome::Imported);
        assert_eq!(second, ImportOutcome::AlreadyPresent);
        assert_eq!(keyring.import_calls.len(), 1);
    }

    #[test]
    fn test_keys_already_in_ring_are_not_reimported() {
        let mut keyring = MockKeyring::with_keys(&["AABBCCDD"]);
        let mut cache = KeyringCache::new(&keyring).unwrap();

        let outcome = cache.ensure_imported(&mut keyring, "AABBCCDD", "AABBCCDD", "Ada Lovelace");

        assert_eq!(outcome, ImportOutcome::AlreadyPresent);
        assert!(keyring.import_calls.is_empty());
    }

    #[test]
    fn test_long_ids_match_on_short_suffix() {
        // The directory hands out 16-char ids, key listings only show 8.
        let mut keyring = MockKeyring::with_keys(&["AABBCCDD"]);
        let mut cache = KeyringCache::new(&keyring).unwrap();

        let outcome =
            cache.ensure_imported(&mut keyring, "0123AABBAABBCCDD", "key material", "Ada");

        assert_eq!(outcome, ImportOutcome::AlreadyPresent);
    }

    #[test]
    fn test_failed_import_reported_and_not_cached() {
        let mut keyring = MockKeyring::new();
        keyring.fail_imports.insert("broken".to_string());
        let mut cache = KeyringCache::new(&keyring).unwrap();

        let first = cache.ensure_imported(&mut keyring, "EEFF0011", "broken", "Bob");
        let second = cache.ensure_imported(&mut keyring, "EEFF0011", "broken", "Bob");

        // A failed import is retried on the next call, not remembered as done.
        assert_eq!(first, ImportOutcome::Failed);
        assert_eq!(second, ImportOutcome::Failed);
        assert_eq!(keyring.import_calls.len(), 2);
    }

    #[test]
    fn test_mock_encrypt_requires_key_presence() {
        let keyring = MockKeyring::with_keys(&["AABBCCDD"]);
        assert!(keyring.encrypt("s3cret", "AABBCCDD").is_ok());
        assert!(keyring.encrypt("s3cret", "UNKNOWN1").is_err());
    }

    #[test]
    fn test_mock_decrypt_round_trip() {
        let keyring = MockKeyring::new();
        assert_eq!(keyring.decrypt("pgp:hunter2").unwrap(), "hunter2");
        assert!(keyring.decrypt("garbage").is_err());
    }
}
