//! Resource wrapper: renewal metadata embedded in the description field.
//!
//! The directory has no schema slot for renewal bookkeeping, so three
//! trailer lines are appended to the free-text description:
//!
//! ```text
//! >>> Last password update : 24/12/2025
//! >>> Update count : 3
//! >>> Connector : XWiki
//! ```
//!
//! The exact prefixes and their order are an external contract; other
//! tooling reads them. Every non-trailer line is preserved verbatim.

use crate::directory::types::RawResource;
use chrono::NaiveDate;
use log::debug;
use regex::Regex;
use std::sync::LazyLock;

/// Connector tag assumed when a resource carries no connector trailer.
pub const DEFAULT_CONNECTOR_TAG: &str = "XWiki";

/// Date format used by the last-update trailer.
pub const DATE_FORMAT: &str = "%d/%m/%Y";

static LAST_UPDATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^>>> Last password update : (\d{2}/\d{2}/\d{4})$").unwrap());
static UPDATE_COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^>>> Update count : (\d+)$").unwrap());
static CONNECTOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^>>> Connector : (.*)$").unwrap());

/// Actor kind of a permission entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    User,
    Group,
}

/// Access level of a permission entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    Read,
    ReadWrite,
    Manage,
}

impl AccessLevel {
    /// Map the directory's numeric level; unknown values degrade to read.
    #[must_use]
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            7 => Self::ReadWrite,
            15 => Self::Manage,
            _ => Self::Read,
        }
    }

    /// Whether this level allows changing the resource.
    #[must_use]
    pub fn can_write(self) -> bool {
        matches!(self, Self::ReadWrite | Self::Manage)
    }
}

/// A permission entry attached to a resource.
#[derive(Debug, Clone)]
pub struct Permission {
    pub actor: Actor,
    pub actor_id: String,
    pub level: AccessLevel,
}

/// A directory resource with its renewal metadata decoded.
#[derive(Debug, Clone)]
pub struct Resource {
    raw: RawResource,
    /// Date of the last successful renewal, `None` if never renewed (or if
    /// the trailer was malformed).
    pub last_update: Option<NaiveDate>,
    /// Number of renewals recorded so far.
    pub update_count: u32,
    /// Tag selecting the connector responsible for the external service.
    pub connector_tag: String,
    /// Description lines that are not renewal trailers, kept verbatim.
    clean_description: Vec<String>,
}

impl Resource {
    /// Decode the trailer properties out of a raw directory record.
    #[must_use]
    pub fn new(raw: RawResource) -> Self {
        let mut last_update = None;
        let mut update_count = 0;
        let mut connector_tag = DEFAULT_CONNECTOR_TAG.to_string();
        let mut clean_description = Vec::new();

        let description = raw.resource.description.clone().unwrap_or_default();
        for line in description.lines() {
            if let Some(caps) = LAST_UPDATE_RE.captures(line) {
                // A malformed date leaves the field unset instead of aborting.
                last_update = NaiveDate::parse_from_str(&caps[1], DATE_FORMAT).ok();
            } else if let Some(caps) = UPDATE_COUNT_RE.captures(line) {
                update_count = caps[1].parse().unwrap_or(0);
            } else if let Some(caps) = CONNECTOR_RE.captures(line) {
                connector_tag = caps[1].to_string();
            } else {
                clean_description.push(line.to_string());
            }
        }

        debug!(
            "Resource [{}]: last update [{:?}], count [{}], connector [{}]",
            raw.resource.name, last_update, update_count, connector_tag
        );

        Self {
            raw,
            last_update,
            update_count,
            connector_tag,
            clean_description,
        }
    }

    pub fn id(&self) -> &str {
        &self.raw.resource.id
    }

    pub fn name(&self) -> &str {
        &self.raw.resource.name
    }

    pub fn username(&self) -> &str {
        self.raw.resource.username.as_deref().unwrap_or_default()
    }

    pub fn uri(&self) -> &str {
        self.raw.resource.uri.as_deref().unwrap_or_default()
    }

    /// The acting user's ciphertext of the current secret, if present.
    pub fn current_secret(&self) -> Option<&str> {
        self.raw.secrets.first().map(|s| s.data.as_str())
    }

    /// Decoded permission entries.
    pub fn permissions(&self) -> Vec<Permission> {
        self.raw
            .permissions
            .iter()
            .filter_map(|p| {
                let actor = match p.aro.as_str() {
                    "User" => Actor::User,
                    "Group" => Actor::Group,
                    _ => return None,
                };
                Some(Permission {
                    actor,
                    actor_id: p.aro_foreign_key.clone(),
                    level: AccessLevel::from_raw(p.access_type),
                })
            })
            .collect()
    }

    /// Whether the resource qualifies for renewal.
    ///
    /// Personal scope requires exactly one permission entry (not shared).
    /// A date window only excludes resources whose last update falls
    /// outside `[after, before]`; a resource never renewed is always
    /// eligible.
    #[must_use]
    pub fn is_eligible(
        &self,
        personal: bool,
        before: Option<NaiveDate>,
        after: Option<NaiveDate>,
    ) -> bool {
        if personal && self.raw.permissions.len() != 1 {
            return false;
        }
        match self.last_update {
            Some(date) => {
                before.is_none_or(|b| date <= b) && after.is_none_or(|a| date >= a)
            }
            None => true,
        }
    }

    /// Record a successful renewal.
    pub fn mark_as_updated(&mut self, now: NaiveDate) {
        self.update_count += 1;
        self.last_update = Some(now);
    }

    /// Re-encode the description: clean lines first, then the trailers in
    /// their fixed order (date, count, connector).
    #[must_use]
    pub fn render_description(&self) -> String {
        let mut lines = self.clean_description.clone();
        if let Some(date) = self.last_update {
            lines.push(format!(
                ">>> Last password update : {}",
                date.format(DATE_FORMAT)
            ));
        }
        lines.push(format!(">>> Update count : {}", self.update_count));
        lines.push(format!(">>> Connector : {}", self.connector_tag));
        lines.join("\n")
    }
}
