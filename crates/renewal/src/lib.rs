//! Credential renewal for a central secrets directory.
//!
//! The crate automates rotating the passwords stored in a shared secrets
//! directory: it selects the resources due for renewal, changes the
//! password on the external service through a pluggable [`connector`],
//! re-encrypts the new secret for every authorized recipient, and commits
//! the result back to the directory, with a compensating rollback when the
//! commit fails.
//!
//! The [`orchestrator::Orchestrator`] drives the whole run; everything it
//! touches sits behind a trait ([`directory::Directory`],
//! [`keyring::Keyring`], [`connector::Connector`]) so runs can be tested
//! without a server, a gpg installation, or a reachable service.

pub mod connector;
pub mod directory;
pub mod error;
pub mod keyring;
pub mod orchestrator;
pub mod report;
pub mod resource;
pub mod token;

pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, RenewOptions, Scope};
pub use report::RenewalStats;
