//! Directory server abstraction.
//!
//! The [`Directory`] trait covers the handful of operations the renewal
//! orchestrator needs from the central secrets directory: the login
//! ceremony, resource/group/user lookups, and the atomic resource update.
//! The primary implementation is [`http::HttpDirectory`]; [`MockDirectory`]
//! keeps everything in memory for tests.

pub mod http;
pub mod types;

use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};
use types::{RawGroup, RawResource, RawUser, SecretEntry};

/// Operations the orchestrator consumes from the directory server.
pub trait Directory {
    /// Run the login ceremony. Returns `false` when the server identity or
    /// the challenge exchange does not check out.
    fn authenticate(&mut self) -> Result<bool>;

    /// The acting (authenticated) user.
    fn me(&mut self) -> Result<RawUser>;

    /// Resources owned by the acting user, with permissions and secrets.
    fn owned_resources(&mut self) -> Result<Vec<RawResource>>;

    /// Resources shared with any of the given groups.
    fn resources_for_groups(&mut self, group_ids: &[String]) -> Result<Vec<RawResource>>;

    /// All groups known to the server, with membership entries.
    fn groups(&mut self) -> Result<Vec<RawGroup>>;

    /// A single group, with full member records (key material included).
    fn group(&mut self, id: &str) -> Result<RawGroup>;

    /// A single user, with key material.
    fn user(&mut self, id: &str) -> Result<RawUser>;

    /// Replace a resource's description and its per-recipient secrets in
    /// one write.
    fn update_resource(
        &mut self,
        id: &str,
        description: &str,
        secrets: &[SecretEntry],
    ) -> Result<()>;
}

/// In-memory directory for testing without network access.
///
/// Commits are recorded in [`MockDirectory::puts`]; ids listed in
/// [`MockDirectory::fail_puts`] reject the write, which is how the
/// rollback paths are exercised.
#[derive(Debug, Default)]
pub struct MockDirectory {
    /// Whether `authenticate` succeeds.
    pub auth_ok: bool,
    /// The acting user returned by `me`.
    pub acting_user: Option<RawUser>,
    /// Resources returned by `owned_resources`.
    pub owned: Vec<RawResource>,
    /// Resources returned by `resources_for_groups`.
    pub shared: Vec<RawResource>,
    /// Groups returned by `groups` and `group`.
    pub groups: Vec<RawGroup>,
    /// Users returned by `user`, by id.
    pub users: HashMap<String, RawUser>,
    /// Resource ids whose `update_resource` call is rejected.
    pub fail_puts: HashSet<String>,
    /// Every successful commit: (resource id, description, payload).
    pub puts: Vec<(String, String, Vec<SecretEntry>)>,
}

impl MockDirectory {
    /// Create a mock that authenticates successfully.
    #[must_use]
    pub fn new() -> Self {
        Self {
            auth_ok: true,
            ..Self::default()
        }
    }

    /// Register a user record.
    pub fn add_user(&mut self, user: RawUser) {
        self.users.insert(user.user.id.clone(), user);
    }
}

impl Directory for MockDirectory {
    fn authenticate(&mut self) -> Result<bool> {
        Ok(self.auth_ok)
    }

    fn me(&mut self) -> Result<RawUser> {
        self.acting_user
            .clone()
            .ok_or_else(|| Error::InvalidResponse("no acting user configured".to_string()))
    }

    fn owned_resources(&mut self) -> Result<Vec<RawResource>> {
        Ok(self.owned.clone())
    }

    fn resources_for_groups(&mut self, _group_ids: &[String]) -> Result<Vec<RawResource>> {
        Ok(self.shared.clone())
    }

    fn groups(&mut self) -> Result<Vec<RawGroup>> {
        Ok(self.groups.clone())
    }

    fn group(&mut self, id: &str) -> Result<RawGroup> {
        self.groups
            .iter()
            .find(|g| g.group.id == id)
            .cloned()
            .ok_or_else(|| Error::InvalidResponse(format!("unknown group [{}]", id)))
    }

    fn user(&mut self, id: &str) -> Result<RawUser> {
        self.users
            .get(id)
            .cloned()
            .ok_or_else(|| Error::InvalidResponse(format!("unknown user [{}]", id)))
    }

    fn update_resource(
        &mut self,
        id: &str,
        description: &str,
        secrets: &[SecretEntry],
    ) -> Result<()> {
        if self.fail_puts.contains(id) {
            return Err(Error::http(format!("resource [{}] rejected", id), Some(400)));
        }
        self.puts
            .push((id.to_string(), description.to_string(), secrets.to_vec()));
        Ok(())
    }
}
