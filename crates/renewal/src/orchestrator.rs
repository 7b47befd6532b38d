//! The renewal orchestrator: selection, the per-resource state machine,
//! and outcome classification.
//!
//! Resources are processed strictly sequentially. Per resource the steps
//! are: generate a new secret, push it to the external service through the
//! connector, resolve the authorized recipients, encrypt the secret for
//! each of them, and commit description + payload to the directory in one
//! write. A commit failure after the service already accepted the new
//! secret triggers the connector's compensating rollback; if that fails
//! too, the undelivered payload is kept for manual recovery.
//!
//! Cancellation is cooperative and only honored between resources, so a
//! resource is never abandoned between the service update and the commit.

use crate::connector::{Connector, ConnectorContext, Registry};
use crate::directory::Directory;
use crate::directory::types::SecretEntry;
use crate::error::{Error, Result};
use crate::keyring::{ImportOutcome, Keyring, KeyringCache};
use crate::report::{FailedRenewal, RenewalStats, ResourceSummary};
use crate::resource::{Actor, Resource};
use crate::token;
use chrono::{Local, NaiveDate};
use log::{debug, error, info};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Which resources a run targets.
#[derive(Debug, Clone)]
pub enum Scope {
    /// Resources owned by the acting user and shared with nobody else.
    Personal,
    /// Resources shared with the named groups (case-insensitive match).
    Groups(Vec<String>),
}

/// Run parameters, handed in from the CLI layer.
#[derive(Debug, Clone)]
pub struct RenewOptions {
    pub scope: Scope,
    /// Only renew resources last updated on or before this date.
    pub before: Option<NaiveDate>,
    /// Only renew resources last updated on or after this date.
    pub after: Option<NaiveDate>,
    /// When non-zero, trims the selection (see `apply_limit`).
    pub limit: usize,
    /// Compute everything but touch neither the service nor the directory.
    pub dry_run: bool,
    /// Forwarded to connectors talking TLS to their service.
    pub verify_cert: bool,
}

/// Acting-user identity, resolved lazily once per run.
#[derive(Debug, Clone)]
struct ActingUser {
    id: String,
    group_ids: HashSet<String>,
}

/// Drives a renewal run against a directory, a keyring and a connector
/// registry.
pub struct Orchestrator<'a> {
    directory: &'a mut dyn Directory,
    keyring: &'a mut dyn Keyring,
    registry: &'a Registry,
    cancel: Arc<AtomicBool>,
    acting_user: Option<ActingUser>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        directory: &'a mut dyn Directory,
        keyring: &'a mut dyn Keyring,
        registry: &'a Registry,
    ) -> Self {
        Self {
            directory,
            keyring,
            registry,
            cancel: Arc::new(AtomicBool::new(false)),
            acting_user: None,
        }
    }

    /// Flag that interrupts the run between two resources when set.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Run a full renewal pass. Partial statistics are returned even when
    /// the run is cancelled mid-loop.
    pub fn run(&mut self, options: &RenewOptions) -> Result<RenewalStats> {
        if !self.directory.authenticate()? {
            return Err(Error::AuthenticationFailed);
        }

        let mut stats = RenewalStats::default();
        let mut cache = KeyringCache::new(self.keyring)?;
        let resources = self.select(options, &mut stats)?;

        for mut resource in resources {
            if self.cancel.load(Ordering::SeqCst) {
                info!("Interrupted, reporting the partial run and exiting ...");
                break;
            }
            self.renew_resource(&mut resource, options, &mut cache, &mut stats);
        }
        Ok(stats)
    }

    /// Fetch and filter the candidate resources for this run.
    fn select(&mut self, options: &RenewOptions, stats: &mut RenewalStats) -> Result<Vec<Resource>> {
        let (raw, personal) = match &options.scope {
            Scope::Personal => (self.directory.owned_resources()?, true),
            Scope::Groups(names) => {
                let group_ids = self.resolve_group_ids(names)?;
                debug!("Group IDs: [{:?}]", group_ids);
                (self.directory.resources_for_groups(&group_ids)?, false)
            }
        };

        let mut resources: Vec<Resource> = raw
            .into_iter()
            .map(Resource::new)
            .filter(|r| r.is_eligible(personal, options.before, options.after))
            .collect();

        stats.found = resources.len();
        info!("Found [{}] resources available", resources.len());

        if !personal {
            // Only resources the acting user can write to may be renewed.
            let me = self.acting_user()?;
            resources.retain(|r| has_write_access(r, &me));
        }

        apply_limit(&mut resources, options.limit);

        stats.renewable = resources.len();
        info!("Found [{}] resources that can be renewed", resources.len());
        Ok(resources)
    }

    /// Case-insensitive group-name resolution. Matching no group at all is
    /// a configuration error, not an empty run.
    fn resolve_group_ids(&mut self, names: &[String]) -> Result<Vec<String>> {
        let wanted: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();
        let ids: Vec<String> = self
            .directory
            .groups()?
            .into_iter()
            .filter(|g| wanted.contains(&g.group.name.to_lowercase()))
            .map(|g| g.group.id)
            .collect();

        if ids.is_empty() {
            return Err(Error::configuration(format!(
                "no group found with name [{}]",
                names.join(", ")
            )));
        }
        Ok(ids)
    }

    /// The acting user's id and group memberships, memoized for the run.
    fn acting_user(&mut self) -> Result<ActingUser> {
        if self.acting_user.is_none() {
            let me = self.directory.me()?;
            let group_ids = self
                .directory
                .groups()?
                .into_iter()
                .filter(|g| g.users.iter().any(|m| m.user_id == me.user.id))
                .map(|g| g.group.id)
                .collect();
            debug!("Acting user [{}] with groups [{:?}]", me.user.id, group_ids);
            self.acting_user = Some(ActingUser {
                id: me.user.id,
                group_ids,
            });
        }
        self.acting_user
            .clone()
            .ok_or_else(|| Error::InvalidResponse("acting user unresolved".to_string()))
    }

    /// Drive one resource through the state machine, recording its terminal
    /// state in exactly one stats bucket.
    fn renew_resource(
        &mut self,
        resource: &mut Resource,
        options: &RenewOptions,
        cache: &mut KeyringCache,
        stats: &mut RenewalStats,
    ) {
        debug!("Renewing resource \"{}\" [{}]", resource.name(), resource.id());
        let new_secret = token::url_safe();

        let old_secret = match resource.current_secret() {
            Some(ciphertext) => match self.keyring.decrypt(ciphertext) {
                Ok(secret) => secret,
                Err(e) => {
                    error!(
                        "Failed to read the current secret of [{}]: {}",
                        resource.name(),
                        e
                    );
                    stats.failures.push(summarize(resource));
                    return;
                }
            },
            None => String::new(),
        };

        let context = ConnectorContext {
            uri: resource.uri().to_string(),
            username: resource.username().to_string(),
            old_secret,
            new_secret: new_secret.clone(),
            verify_cert: options.verify_cert,
        };
        let Some(mut connector) = self.registry.create(&resource.connector_tag, context) else {
            info!(
                "Skipping resource [{}] as no connector is available for [{}]",
                resource.name(),
                resource.connector_tag
            );
            return;
        };

        if !options.dry_run {
            if let Err(e) = connector.update() {
                error!("Failed to renew resource [{}] : [{}]", resource.name(), e);
                stats.failures.push(summarize(resource));
                return;
            }
        }
        debug!("Renew success! Updating the directory record ...");

        // From here on the external service holds the new secret; every
        // failure has to go through the compensating rollback.
        let payload = match self.build_payload(resource, &new_secret, cache) {
            Ok(payload) => payload,
            Err(e) => {
                error!(
                    "Failed to build the encrypted payload for [{}]: {}",
                    resource.name(),
                    e
                );
                self.fail_after_update(connector.as_mut(), resource, Vec::new(), options, stats);
                return;
            }
        };

        resource.mark_as_updated(Local::now().date_naive());
        let description = resource.render_description();

        if options.dry_run {
            info!(
                "Skipping the directory update of [{}] as dry-run is activated",
                resource.name()
            );
            stats.success.push(summarize(resource));
            return;
        }

        match self
            .directory
            .update_resource(resource.id(), &description, &payload)
        {
            Ok(()) => {
                info!(
                    "Resource [{}] successfully renewed and updated",
                    resource.name()
                );
                stats.success.push(summarize(resource));
            }
            Err(e) => {
                error!(
                    "Failed to commit resource \"{}\" [{}], rolling back ... ({})",
                    resource.name(),
                    resource.id(),
                    e
                );
                self.fail_after_update(connector.as_mut(), resource, payload, options, stats);
            }
        }
    }

    /// Classify a failure that happened after the external service already
    /// accepted the new secret.
    fn fail_after_update(
        &self,
        connector: &mut dyn Connector,
        resource: &Resource,
        payload: Vec<SecretEntry>,
        options: &RenewOptions,
        stats: &mut RenewalStats,
    ) {
        if options.dry_run {
            // Nothing was changed externally, there is nothing to revert.
            stats.failures.push(summarize(resource));
            return;
        }
        match connector.rollback() {
            Ok(()) => {
                info!("Password successfully rolled back");
                stats.rollback.push(summarize(resource));
            }
            Err(e) => {
                error!(
                    "*** Heads up! *** The password of [{}] has been updated on the service, \
                     but could not be saved in the directory, and the rollback failed too: {}",
                    resource.name(),
                    e
                );
                stats.errors.push(FailedRenewal {
                    resource: summarize(resource),
                    payload,
                });
            }
        }
    }

    /// Resolve the recipient set and encrypt the new secret for each of
    /// them: users of every group-type permission first, then directly
    /// permissioned users, deduplicated by user id.
    ///
    /// A recipient whose key cannot be imported aborts the whole fan-out;
    /// silently narrowing the recipient set would lock people out.
    fn build_payload(
        &mut self,
        resource: &Resource,
        new_secret: &str,
        cache: &mut KeyringCache,
    ) -> Result<Vec<SecretEntry>> {
        let mut group_ids = Vec::new();
        let mut user_ids = Vec::new();
        for permission in resource.permissions() {
            match permission.actor {
                Actor::Group => group_ids.push(permission.actor_id),
                Actor::User => user_ids.push(permission.actor_id),
            }
        }

        let mut seen = HashSet::new();
        let mut recipients: Vec<(String, String)> = Vec::new();

        for group_id in group_ids {
            let group = self.directory.group(&group_id)?;
            for member in &group.users {
                let user = member.user.as_ref().ok_or_else(|| {
                    Error::InvalidResponse(format!(
                        "group [{}] member [{}] came without a user record",
                        group.group.name, member.user_id
                    ))
                })?;
                let owner = display_name(user.profile.as_ref(), &user.id);
                let outcome = cache.ensure_imported(
                    self.keyring,
                    &user.gpgkey.key_id,
                    &user.gpgkey.armored_key,
                    &owner,
                );
                if outcome == ImportOutcome::Failed {
                    return Err(Error::KeyImport(format!(
                        "key [{}] of user [{}]",
                        user.gpgkey.key_id, user.id
                    )));
                }
                if seen.insert(user.id.clone()) {
                    recipients.push((user.id.clone(), user.gpgkey.key_id.clone()));
                }
            }
        }

        for user_id in user_ids {
            // The user might also be in one of the groups above.
            if seen.contains(&user_id) {
                continue;
            }
            let user = self.directory.user(&user_id)?;
            let owner = display_name(user.profile.as_ref(), &user.user.id);
            let outcome = cache.ensure_imported(
                self.keyring,
                &user.gpgkey.key_id,
                &user.gpgkey.armored_key,
                &owner,
            );
            if outcome == ImportOutcome::Failed {
                return Err(Error::KeyImport(format!(
                    "key [{}] of user [{}]",
                    user.gpgkey.key_id, user.user.id
                )));
            }
            seen.insert(user.user.id.clone());
            recipients.push((user.user.id.clone(), user.gpgkey.key_id.clone()));
        }

        let mut payload = Vec::with_capacity(recipients.len());
        for (user_id, key_id) in recipients {
            debug!("Encrypting password for user [{}] ({})", user_id, key_id);
            let data = self.keyring.encrypt(new_secret, &key_id)?;
            payload.push(SecretEntry { user_id, data });
        }
        Ok(payload)
    }
}

/// Whether the acting user holds write access on the resource, directly or
/// through one of their groups.
fn has_write_access(resource: &Resource, me: &ActingUser) -> bool {
    resource.permissions().iter().any(|p| {
        p.level.can_write()
            && match p.actor {
                Actor::User => p.actor_id == me.id,
                Actor::Group => me.group_ids.contains(&p.actor_id),
            }
    })
}

/// Historical limit behavior: when the selection is at least `limit` long,
/// the *last* `limit` resources are dropped rather than the first N kept.
/// Other tooling schedules runs around this, so it stays as-is.
fn apply_limit(resources: &mut Vec<Resource>, limit: usize) {
    if limit != 0 && resources.len() >= limit {
        let keep = resources.len() - limit;
        info!("Limiting renewal to the first [{}] resources", keep);
        resources.truncate(keep);
    }
}

fn summarize(resource: &Resource) -> ResourceSummary {
    ResourceSummary {
        id: resource.id().to_string(),
        name: resource.name().to_string(),
    }
}

fn display_name(profile: Option<&crate::directory::types::RawProfile>, fallback: &str) -> String {
    profile.map_or_else(
        || fallback.to_string(),
        |p| format!("{} {}", p.first_name, p.last_name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::UpdateError;
    use crate::directory::MockDirectory;
    use crate::directory::types::{
        EmbeddedUser, GroupBody, RawGpgKey, RawGroup, RawGroupUser, RawPermission, RawResource,
        RawSecret, RawUser, ResourceBody, UserBody,
    };
    use crate::keyring::MockKeyring;
    use std::sync::Mutex;

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    fn raw_resource(id: &str, permissions: Vec<RawPermission>) -> RawResource {
        RawResource {
            resource: ResourceBody {
                id: id.to_string(),
                name: format!("resource {}", id),
                username: Some("bot".to_string()),
                uri: Some("https://wiki.example.org".to_string()),
                description: Some("shared account".to_string()),
            },
            permissions,
            secrets: vec![RawSecret {
                data: "pgp:old-secret".to_string(),
            }],
        }
    }

    fn user_perm(user_id: &str, access_type: u8) -> RawPermission {
        RawPermission {
            aro: "User".to_string(),
            aro_foreign_key: user_id.to_string(),
            access_type,
        }
    }

    fn group_perm(group_id: &str, access_type: u8) -> RawPermission {
        RawPermission {
            aro: "Group".to_string(),
            aro_foreign_key: group_id.to_string(),
            access_type,
        }
    }

    fn raw_user(id: &str, key_id: &str) -> RawUser {
        RawUser {
            user: UserBody { id: id.to_string() },
            gpgkey: RawGpgKey {
                key_id: key_id.to_string(),
                armored_key: key_id.to_string(),
                fingerprint: None,
            },
            profile: None,
        }
    }

    fn member(id: &str, key_id: &str) -> RawGroupUser {
        RawGroupUser {
            user_id: id.to_string(),
            is_admin: false,
            user: Some(EmbeddedUser {
                id: id.to_string(),
                gpgkey: RawGpgKey {
                    key_id: key_id.to_string(),
                    armored_key: key_id.to_string(),
                    fingerprint: None,
                },
                profile: None,
            }),
        }
    }

    fn group(id: &str, name: &str, members: Vec<RawGroupUser>) -> RawGroup {
        RawGroup {
            group: GroupBody {
                id: id.to_string(),
                name: name.to_string(),
            },
            users: members,
        }
    }

    /// Connector whose behavior is scripted per test and whose calls are
    /// observable afterwards.
    #[derive(Clone)]
    struct Script {
        fail_update: bool,
        fail_rollback: bool,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Script {
        fn ok() -> Self {
            Self {
                fail_update: false,
                fail_rollback: false,
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    struct ScriptedConnector {
        script: Script,
    }

    impl Connector for ScriptedConnector {
        fn update(&mut self) -> std::result::Result<(), UpdateError> {
            self.script.calls.lock().unwrap().push("update");
            if self.script.fail_update {
                Err(UpdateError::Rejected("scripted".to_string()))
            } else {
                Ok(())
            }
        }

        fn rollback(&mut self) -> std::result::Result<(), UpdateError> {
            self.script.calls.lock().unwrap().push("rollback");
            if self.script.fail_rollback {
                Err(UpdateError::Transport("scripted".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn registry_with(script: &Script) -> Registry {
        let mut registry = Registry::new();
        let script = script.clone();
        registry.register(
            "XWiki",
            Box::new(move |_ctx| {
                Box::new(ScriptedConnector {
                    script: script.clone(),
                })
            }),
        );
        registry
    }

    fn personal_options() -> RenewOptions {
        RenewOptions {
            scope: Scope::Personal,
            before: None,
            after: None,
            limit: 0,
            dry_run: false,
            verify_cert: true,
        }
    }

    fn group_options(name: &str) -> RenewOptions {
        RenewOptions {
            scope: Scope::Groups(vec![name.to_string()]),
            ..personal_options()
        }
    }

    // ------------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------------

    #[test]
    fn test_personal_renewal_commits_and_increments_count() {
        // Scenario A: single-permission resource, everything succeeds.
        let mut directory = MockDirectory::new();
        directory.owned = vec![raw_resource("res-1", vec![user_perm("owner", 15)])];
        directory.add_user(raw_user("owner", "OWNERKEY"));
        let mut keyring = MockKeyring::new();
        let script = Script::ok();
        let registry = registry_with(&script);

        let mut orchestrator = Orchestrator::new(&mut directory, &mut keyring, &registry);
        let stats = orchestrator.run(&personal_options()).unwrap();

        assert_eq!(stats.success.len(), 1);
        assert_eq!(stats.processed(), 1);
        assert_eq!(script.calls(), vec!["update"]);

        let (id, description, payload) = &directory.puts[0];
        assert_eq!(id, "res-1");
        assert!(description.contains(">>> Update count : 1"));
        assert!(description.contains(">>> Connector : XWiki"));
        assert_eq!(payload.len(), 1);
        assert_eq!(payload[0].user_id, "owner");
    }

    #[test]
    fn test_personal_scope_skips_shared_resources() {
        let mut directory = MockDirectory::new();
        directory.owned = vec![raw_resource(
            "res-1",
            vec![user_perm("owner", 15), user_perm("colleague", 7)],
        )];
        let mut keyring = MockKeyring::new();
        let script = Script::ok();
        let registry = registry_with(&script);

        let mut orchestrator = Orchestrator::new(&mut directory, &mut keyring, &registry);
        let stats = orchestrator.run(&personal_options()).unwrap();

        assert_eq!(stats.renewable, 0);
        assert_eq!(stats.processed(), 0);
        assert!(script.calls().is_empty());
    }

    #[test]
    fn test_group_scope_requires_write_access() {
        // Scenario B: the acting user only reads through the group.
        let mut directory = MockDirectory::new();
        directory.acting_user = Some(raw_user("me", "MYKEY123"));
        directory.groups = vec![group("g-1", "Infra", vec![member("me", "MYKEY123")])];
        directory.shared = vec![raw_resource("res-1", vec![group_perm("g-1", 1)])];
        let mut keyring = MockKeyring::new();
        let script = Script::ok();
        let registry = registry_with(&script);

        let mut orchestrator = Orchestrator::new(&mut directory, &mut keyring, &registry);
        let stats = orchestrator.run(&group_options("infra")).unwrap();

        assert_eq!(stats.found, 1);
        assert_eq!(stats.renewable, 0);
        assert!(script.calls().is_empty());
    }

    #[test]
    fn test_group_scope_renews_writable_resources() {
        let mut directory = MockDirectory::new();
        directory.acting_user = Some(raw_user("me", "MYKEY123"));
        directory.groups = vec![group("g-1", "Infra", vec![member("me", "MYKEY123")])];
        directory.shared = vec![raw_resource("res-1", vec![group_perm("g-1", 7)])];
        let mut keyring = MockKeyring::new();
        let script = Script::ok();
        let registry = registry_with(&script);

        let mut orchestrator = Orchestrator::new(&mut directory, &mut keyring, &registry);
        let stats = orchestrator.run(&group_options("Infra")).unwrap();

        assert_eq!(stats.success.len(), 1);
        assert_eq!(directory.puts.len(), 1);
    }

    #[test]
    fn test_unknown_group_is_a_configuration_error() {
        let mut directory = MockDirectory::new();
        directory.acting_user = Some(raw_user("me", "MYKEY123"));
        directory.groups = vec![group("g-1", "Infra", vec![])];
        let mut keyring = MockKeyring::new();
        let script = Script::ok();
        let registry = registry_with(&script);

        let mut orchestrator = Orchestrator::new(&mut directory, &mut keyring, &registry);
        let err = orchestrator.run(&group_options("nonexistent")).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_commit_failure_triggers_rollback() {
        // Scenario C: the directory rejects the write, the service rolls back.
        let mut directory = MockDirectory::new();
        directory.owned = vec![raw_resource("res-1", vec![user_perm("owner", 15)])];
        directory.add_user(raw_user("owner", "OWNERKEY"));
        directory.fail_puts.insert("res-1".to_string());
        let mut keyring = MockKeyring::new();
        let script = Script::ok();
        let registry = registry_with(&script);

        let mut orchestrator = Orchestrator::new(&mut directory, &mut keyring, &registry);
        let stats = orchestrator.run(&personal_options()).unwrap();

        assert_eq!(stats.rollback.len(), 1);
        assert_eq!(stats.success.len(), 0);
        assert_eq!(script.calls(), vec!["update", "rollback"]);
    }

    #[test]
    fn test_failed_rollback_retains_payload_and_continues() {
        // Scenario D: commit and rollback both fail; the run moves on.
        let mut directory = MockDirectory::new();
        directory.owned = vec![
            raw_resource("res-1", vec![user_perm("owner", 15)]),
            raw_resource("res-2", vec![user_perm("owner", 15)]),
        ];
        directory.add_user(raw_user("owner", "OWNERKEY"));
        directory.fail_puts.insert("res-1".to_string());
        let mut keyring = MockKeyring::new();
        let script = Script {
            fail_rollback: true,
            ..Script::ok()
        };
        let registry = registry_with(&script);

        let mut orchestrator = Orchestrator::new(&mut directory, &mut keyring, &registry);
        let stats = orchestrator.run(&personal_options()).unwrap();

        assert_eq!(stats.errors.len(), 1);
        assert_eq!(stats.errors[0].resource.id, "res-1");
        assert_eq!(stats.errors[0].payload.len(), 1);
        // res-2 was still processed after the error.
        assert_eq!(stats.success.len(), 1);
        assert_eq!(stats.success[0].id, "res-2");
    }

    #[test]
    fn test_connector_failure_lands_in_failures() {
        let mut directory = MockDirectory::new();
        directory.owned = vec![raw_resource("res-1", vec![user_perm("owner", 15)])];
        directory.add_user(raw_user("owner", "OWNERKEY"));
        let mut keyring = MockKeyring::new();
        let script = Script {
            fail_update: true,
            ..Script::ok()
        };
        let registry = registry_with(&script);

        let mut orchestrator = Orchestrator::new(&mut directory, &mut keyring, &registry);
        let stats = orchestrator.run(&personal_options()).unwrap();

        assert_eq!(stats.failures.len(), 1);
        assert!(directory.puts.is_empty());
        assert_eq!(script.calls(), vec!["update"]);
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        // Scenario E: neither the connector nor the directory is contacted.
        let mut directory = MockDirectory::new();
        directory.owned = vec![raw_resource("res-1", vec![user_perm("owner", 15)])];
        directory.add_user(raw_user("owner", "OWNERKEY"));
        let mut keyring = MockKeyring::new();
        let script = Script::ok();
        let registry = registry_with(&script);

        let options = RenewOptions {
            dry_run: true,
            ..personal_options()
        };
        let mut orchestrator = Orchestrator::new(&mut directory, &mut keyring, &registry);
        let stats = orchestrator.run(&options).unwrap();

        assert_eq!(stats.success.len(), 1);
        assert!(script.calls().is_empty());
        assert!(directory.puts.is_empty());
    }

    #[test]
    fn test_fan_out_covers_groups_and_users_without_duplicates() {
        let mut directory = MockDirectory::new();
        directory.owned = vec![raw_resource(
            "res-1",
            vec![
                group_perm("g-1", 7),
                user_perm("u-2", 7), // also a member of g-1
                user_perm("u-3", 1),
            ],
        )];
        directory.groups = vec![group(
            "g-1",
            "Infra",
            vec![member("u-1", "KEY11111"), member("u-2", "KEY22222")],
        )];
        directory.add_user(raw_user("u-2", "KEY22222"));
        directory.add_user(raw_user("u-3", "KEY33333"));
        let mut keyring = MockKeyring::new();
        let script = Script::ok();
        let registry = registry_with(&script);

        let mut orchestrator = Orchestrator::new(&mut directory, &mut keyring, &registry);
        let stats = orchestrator.run(&personal_options()).unwrap();
        assert_eq!(stats.renewable, 0); // three permissions: not personal-eligible

        // Re-run without the personal restriction via group scope.
        directory.acting_user = Some(raw_user("u-2", "KEY22222"));
        directory.shared = directory.owned.clone();
        let mut orchestrator = Orchestrator::new(&mut directory, &mut keyring, &registry);
        let stats = orchestrator.run(&group_options("Infra")).unwrap();

        assert_eq!(stats.success.len(), 1);
        let (_, _, payload) = &directory.puts[0];
        let mut recipients: Vec<&str> = payload.iter().map(|e| e.user_id.as_str()).collect();
        recipients.sort_unstable();
        assert_eq!(recipients, vec!["u-1", "u-2", "u-3"]);
    }

    #[test]
    fn test_key_import_failure_blocks_fan_out_and_rolls_back() {
        let mut directory = MockDirectory::new();
        directory.acting_user = Some(raw_user("me", "MYKEY123"));
        directory.groups = vec![group(
            "g-1",
            "Infra",
            vec![member("me", "MYKEY123"), member("u-2", "KEY22222")],
        )];
        directory.shared = vec![raw_resource("res-1", vec![group_perm("g-1", 7)])];
        let mut keyring = MockKeyring::new();
        keyring.fail_imports.insert("KEY22222".to_string());
        let script = Script::ok();
        let registry = registry_with(&script);

        let mut orchestrator = Orchestrator::new(&mut directory, &mut keyring, &registry);
        let stats = orchestrator.run(&group_options("Infra")).unwrap();

        // The service was updated before the import failed, so the failure
        // compensates instead of skipping the recipient.
        assert_eq!(stats.rollback.len(), 1);
        assert!(directory.puts.is_empty());
        assert_eq!(script.calls(), vec!["update", "rollback"]);
    }

    #[test]
    fn test_unknown_connector_tag_is_skipped() {
        let mut directory = MockDirectory::new();
        let mut resource = raw_resource("res-1", vec![user_perm("owner", 15)]);
        resource.resource.description = Some(">>> Connector : Gitlab".to_string());
        directory.owned = vec![resource];
        let mut keyring = MockKeyring::new();
        let script = Script::ok();
        let registry = registry_with(&script);

        let mut orchestrator = Orchestrator::new(&mut directory, &mut keyring, &registry);
        let stats = orchestrator.run(&personal_options()).unwrap();

        // Skipped, not processed: no bucket, no connector call.
        assert_eq!(stats.renewable, 1);
        assert_eq!(stats.processed(), 0);
        assert!(script.calls().is_empty());
    }

    #[test]
    fn test_limit_drops_the_tail_of_the_selection() {
        let mut directory = MockDirectory::new();
        directory.owned = (1..=5)
            .map(|i| raw_resource(&format!("res-{}", i), vec![user_perm("owner", 15)]))
            .collect();
        directory.add_user(raw_user("owner", "OWNERKEY"));
        let mut keyring = MockKeyring::new();
        let script = Script::ok();
        let registry = registry_with(&script);

        let options = RenewOptions {
            limit: 2,
            ..personal_options()
        };
        let mut orchestrator = Orchestrator::new(&mut directory, &mut keyring, &registry);
        let stats = orchestrator.run(&options).unwrap();

        // limit=2 over 5 resources keeps the first 3, dropping the tail.
        assert_eq!(stats.renewable, 3);
        let renewed: Vec<&str> = stats.success.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(renewed, vec!["res-1", "res-2", "res-3"]);
    }

    #[test]
    fn test_cancellation_still_reports_partial_stats() {
        let mut directory = MockDirectory::new();
        directory.owned = vec![raw_resource("res-1", vec![user_perm("owner", 15)])];
        directory.add_user(raw_user("owner", "OWNERKEY"));
        let mut keyring = MockKeyring::new();
        let script = Script::ok();
        let registry = registry_with(&script);

        let mut orchestrator = Orchestrator::new(&mut directory, &mut keyring, &registry);
        orchestrator.cancel_flag().store(true, Ordering::SeqCst);
        let stats = orchestrator.run(&personal_options()).unwrap();

        assert_eq!(stats.renewable, 1);
        assert_eq!(stats.processed(), 0);
        assert!(script.calls().is_empty());
    }

    #[test]
    fn test_failed_authentication_aborts_the_run() {
        let mut directory = MockDirectory::new();
        directory.auth_ok = false;
        let mut keyring = MockKeyring::new();
        let script = Script::ok();
        let registry = registry_with(&script);

        let mut orchestrator = Orchestrator::new(&mut directory, &mut keyring, &registry);
        let err = orchestrator.run(&personal_options()).unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed));
    }

    #[test]
    fn test_every_processed_resource_lands_in_one_bucket() {
        let mut directory = MockDirectory::new();
        directory.owned = vec![
            raw_resource("res-ok", vec![user_perm("owner", 15)]),
            raw_resource("res-fail", vec![user_perm("owner", 15)]),
            raw_resource("res-rollback", vec![user_perm("owner", 15)]),
        ];
        directory.add_user(raw_user("owner", "OWNERKEY"));
        directory.fail_puts.insert("res-rollback".to_string());
        let mut keyring = MockKeyring::new();
        // Poison the stored secret of res-fail so its decryption fails.
        directory.owned[1].secrets[0].data = "garbage".to_string();
        let script = Script::ok();
        let registry = registry_with(&script);

        let mut orchestrator = Orchestrator::new(&mut directory, &mut keyring, &registry);
        let stats = orchestrator.run(&personal_options()).unwrap();

        assert_eq!(stats.processed(), 3);
        let mut all: Vec<&str> = stats
            .success
            .iter()
            .chain(&stats.failures)
            .chain(&stats.rollback)
            .map(|s| s.id.as_str())
            .chain(stats.errors.iter().map(|e| e.resource.id.as_str()))
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 3);
    }
}
