//! Connector contract: per-service secret update and rollback.
//!
//! A connector changes the secret on the external service that actually
//! enforces it. `rollback` is only ever called after a successful `update`
//! on the same instance, so implementations may reuse state resolved
//! during the update (e.g. a discovered API endpoint).
//!
//! Connectors are selected by the resource's connector-type tag through a
//! [`Registry`] built at startup; an alias configured against a tag the
//! registry does not know is a configuration error before any resource is
//! touched, while a *resource* carrying an unknown tag is merely skipped.

pub mod xwiki;

use crate::error::{Error, Result};
use std::collections::HashMap;

/// Error raised when the external service rejects or cannot complete a
/// secret change. Non-retryable from the orchestrator's point of view.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// The service could not be reached.
    #[error("communication with the service failed: {0}")]
    Transport(String),

    /// The service answered but refused the change.
    #[error("the service rejected the update: {0}")]
    Rejected(String),
}

/// Everything a connector captures at construction time.
#[derive(Debug, Clone)]
pub struct ConnectorContext {
    /// URI of the external service, from the resource record.
    pub uri: String,
    /// Account name on the external service.
    pub username: String,
    /// Secret currently set on the service.
    pub old_secret: String,
    /// Secret to install.
    pub new_secret: String,
    /// Whether to verify the service's TLS certificate.
    pub verify_cert: bool,
}

/// A plugin able to apply and revert a secret change on one service.
pub trait Connector {
    /// Change the secret on the service from the old to the new value.
    fn update(&mut self) -> std::result::Result<(), UpdateError>;

    /// Restore the old secret. Only called after a successful `update` on
    /// the same instance.
    fn rollback(&mut self) -> std::result::Result<(), UpdateError>;
}

/// Factory producing a connector for one resource renewal.
pub type ConnectorFactory = Box<dyn Fn(ConnectorContext) -> Box<dyn Connector> + Send + Sync>;

/// Startup-time mapping from connector-type tag to factory.
#[derive(Default)]
pub struct Registry {
    factories: HashMap<String, ConnectorFactory>,
    aliases: HashMap<String, String>,
}

impl Registry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with all built-in connectors.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("XWiki", Box::new(|ctx| Box::new(xwiki::XWikiConnector::new(ctx))));
        registry
    }

    /// Register a factory under a tag, replacing any previous entry.
    pub fn register(&mut self, tag: impl Into<String>, factory: ConnectorFactory) {
        self.factories.insert(tag.into(), factory);
    }

    /// Map an additional tag onto an already-registered connector. An
    /// alias pointing at an unknown tag aborts the run before any resource
    /// is touched.
    pub fn alias(&mut self, alias: impl Into<String>, target: &str) -> Result<()> {
        if !self.factories.contains_key(target) {
            return Err(Error::configuration(format!(
                "connector alias points at unknown connector [{}]",
                target
            )));
        }
        self.aliases.insert(alias.into(), target.to_string());
        Ok(())
    }

    fn resolve<'a>(&'a self, tag: &'a str) -> &'a str {
        self.aliases.get(tag).map_or(tag, String::as_str)
    }

    /// Whether a connector is available for the tag.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(self.resolve(tag))
    }

    /// Instantiate the connector for a tag, or `None` when no connector is
    /// available for it.
    pub fn create(&self, tag: &str, ctx: ConnectorContext) -> Option<Box<dyn Connector>> {
        self.factories.get(self.resolve(tag)).map(|factory| factory(ctx))
    }

    /// Check that every configured alias resolves to a known connector.
    pub fn validate<'a>(&self, aliases: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for alias in aliases {
            if !self.contains(alias) {
                return Err(Error::configuration(format!(
                    "no connector registered for alias [{}]",
                    alias
                )));
            }
        }
        Ok(())
    }
}
