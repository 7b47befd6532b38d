//! Wire types for the directory server's JSON bodies.
//!
//! The directory nests each record under a model-name key (`Resource`,
//! `Permission`, `Group`, ...), so the types here mirror that envelope
//! layout rather than flattening it.

use serde::{Deserialize, Serialize};

/// A resource record as returned by the directory, with its permissions
/// and encrypted secrets attached.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawResource {
    #[serde(rename = "Resource")]
    pub resource: ResourceBody,
    #[serde(rename = "Permission", default)]
    pub permissions: Vec<RawPermission>,
    #[serde(rename = "Secret", default)]
    pub secrets: Vec<RawSecret>,
}

/// The resource record itself.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResourceBody {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A permission entry: who (user or group) can do what on a resource.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawPermission {
    /// Actor kind: `"User"` or `"Group"`.
    pub aro: String,
    /// Identifier of the user or group.
    pub aro_foreign_key: String,
    /// Access level: 1 = read, 7 = read/write, 15 = manage.
    #[serde(rename = "type")]
    pub access_type: u8,
}

/// An encrypted secret attached to a resource.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawSecret {
    /// Armored ciphertext, encrypted for the acting user.
    pub data: String,
}

/// A group record with (optionally) its members.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawGroup {
    #[serde(rename = "Group")]
    pub group: GroupBody,
    #[serde(rename = "GroupUser", default)]
    pub users: Vec<RawGroupUser>,
}

/// The group record itself.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GroupBody {
    pub id: String,
    pub name: String,
}

/// A group membership entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawGroupUser {
    pub user_id: String,
    #[serde(default)]
    pub is_admin: bool,
    /// Full member record; present when the membership was fetched with
    /// user containment.
    #[serde(rename = "User", default)]
    pub user: Option<EmbeddedUser>,
}

/// A user record nested inside a group membership.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddedUser {
    pub id: String,
    #[serde(rename = "Gpgkey")]
    pub gpgkey: RawGpgKey,
    #[serde(rename = "Profile", default)]
    pub profile: Option<RawProfile>,
}

/// A user record as returned by the directory.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawUser {
    #[serde(rename = "User")]
    pub user: UserBody,
    #[serde(rename = "Gpgkey")]
    pub gpgkey: RawGpgKey,
    #[serde(rename = "Profile", default)]
    pub profile: Option<RawProfile>,
}

/// The user record itself.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UserBody {
    pub id: String,
}

/// A user's public key material.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawGpgKey {
    pub key_id: String,
    pub armored_key: String,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

/// A user's display profile, used only for log lines.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawProfile {
    pub first_name: String,
    pub last_name: String,
}

/// One entry of the re-encryption fan-out: the new secret, encrypted for
/// one authorized recipient.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SecretEntry {
    /// Recipient user id.
    pub user_id: String,
    /// Armored ciphertext encrypted to the recipient's public key.
    pub data: String,
}
