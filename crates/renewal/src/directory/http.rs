//! HTTP client for the directory server.
//!
//! The server wraps every JSON answer in a `{header, body}` envelope, and
//! drives authentication through a GPGAuth ceremony: the server proves its
//! identity with a published fingerprint, then challenges the client with
//! a token encrypted to the user's public key. Sessions ride on cookies;
//! the `csrfToken` cookie must be echoed back as a header on writes.

use crate::directory::types::{RawGroup, RawResource, RawUser, SecretEntry};
use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::keyring::Keyring;
use log::{debug, error, warn};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;
use ureq::Agent;
use ureq::http::HeaderMap;

/// Header carrying the encrypted GPGAuth challenge.
const AUTH_TOKEN_HEADER: &str = "x-gpgauth-user-auth-token";

/// Envelope wrapping every directory response body.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    body: T,
}

/// Body of the server identity endpoint.
#[derive(Debug, Deserialize)]
struct ServerIdentity {
    fingerprint: String,
    keydata: String,
}

/// Directory server client over HTTP.
pub struct HttpDirectory {
    agent: Agent,
    base_uri: String,
    server_fingerprint: String,
    user_fingerprint: String,
    keyring: Box<dyn Keyring>,
    cookies: HashMap<String, String>,
    csrf_token: Option<String>,
}

impl HttpDirectory {
    /// Create a client for the server at `base_uri`.
    ///
    /// The keyring is used during the login ceremony to verify the
    /// server's challenge; it may point at the same gpg home as the
    /// orchestrator's keyring.
    pub fn new(
        base_uri: impl Into<String>,
        server_fingerprint: impl Into<String>,
        user_fingerprint: impl Into<String>,
        verify_cert: bool,
        keyring: Box<dyn Keyring>,
    ) -> Self {
        let mut config = Agent::config_builder().http_status_as_error(false);
        if !verify_cert {
            config = config.tls_config(
                ureq::tls::TlsConfig::builder()
                    .disable_verification(true)
                    .build(),
            );
        }
        Self {
            agent: config.build().new_agent(),
            base_uri: base_uri.into().trim_end_matches('/').to_string(),
            server_fingerprint: server_fingerprint.into(),
            user_fingerprint: user_fingerprint.into(),
            keyring,
            cookies: HashMap::new(),
            csrf_token: None,
        }
    }

    fn uri(&self, path: &str) -> String {
        format!("{}{}", self.base_uri, path)
    }

    /// Record session cookies from a response; the CSRF token rides in the
    /// `csrfToken` cookie.
    fn absorb_cookies(&mut self, headers: &HeaderMap) {
        for value in headers.get_all("set-cookie") {
            let Ok(raw) = value.to_str() else { continue };
            if let Some((name, cookie_value)) = parse_set_cookie(raw) {
                self.cookies.insert(name.to_string(), cookie_value.to_string());
            }
        }
        if let Some(token) = self.cookies.get("csrfToken") {
            self.csrf_token = Some(token.clone());
        }
    }

    fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let header = self
            .cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ");
        Some(header)
    }

    fn check_status(path: &str, status: u16) -> Result<()> {
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(Error::http(format!("{} returned HTTP {}", path, status), Some(status)))
        }
    }

    /// GET a path and unwrap the response envelope.
    fn get_json<T: DeserializeOwned>(&mut self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let mut request = self.agent.get(self.uri(path)).header("Accept", "application/json");
        for (key, value) in query {
            request = request.query(*key, *value);
        }
        if let Some(cookie) = self.cookie_header() {
            request = request.header("Cookie", cookie);
        }

        let mut response = request.call()?;
        self.absorb_cookies(response.headers());
        Self::check_status(path, response.status().as_u16())?;

        let envelope: Envelope<T> = response.body_mut().read_json()?;
        Ok(envelope.body)
    }

    fn fetch_resources(&mut self, query: &[(&str, &str)]) -> Result<Vec<RawResource>> {
        let mut full_query = vec![
            ("contain[permissions.group]", "1"),
            ("contain[permission.user.profile]", "1"),
            ("contain[secret]", "1"),
        ];
        full_query.extend_from_slice(query);
        self.get_json("/resources.json", &full_query)
    }

    /// First GPGAuth stage: ask the server for the encrypted challenge.
    fn request_challenge(&mut self) -> Result<String> {
        let payload = json!({"data": {"gpg_auth": {"keyid": self.user_fingerprint}}});
        let response = self
            .agent
            .post(self.uri("/auth/login.json"))
            .header("Accept", "application/json")
            .send_json(&payload)?;
        self.absorb_cookies(response.headers());

        let token = response
            .headers()
            .get(AUTH_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                Error::InvalidResponse("server sent no authentication challenge".to_string())
            })?;
        Ok(percent_decode(token))
    }

    /// Second GPGAuth stage: return the decrypted token for a session.
    fn submit_token(&mut self, token: &str) -> Result<bool> {
        let payload = json!({
            "data": {"gpg_auth": {
                "keyid": self.user_fingerprint,
                "user_token_result": token,
            }}
        });
        let response = self
            .agent
            .post(self.uri("/auth/login.json"))
            .header("Accept", "application/json")
            .send_json(&payload)?;
        self.absorb_cookies(response.headers());
        Ok(response.status().is_success())
    }
}

impl Directory for HttpDirectory {
    fn authenticate(&mut self) -> Result<bool> {
        let identity: ServerIdentity = self.get_json("/auth/verify.json", &[])?;
        if identity.fingerprint != self.server_fingerprint {
            error!(
                "Server fingerprint mismatch: expected [{}], got [{}]",
                self.server_fingerprint, identity.fingerprint
            );
            return Ok(false);
        }
        if let Err(e) = self.keyring.import_key(&identity.keydata) {
            // Usually means the key is already in the ring.
            warn!("Server key import: {}", e);
        }

        let challenge = self.request_challenge()?;
        let token = self.keyring.decrypt(&challenge)?;
        debug!("Decrypted GPGAuth challenge, submitting token");
        self.submit_token(&token)
    }

    fn me(&mut self) -> Result<RawUser> {
        self.get_json("/users/me.json", &[])
    }

    fn owned_resources(&mut self) -> Result<Vec<RawResource>> {
        self.fetch_resources(&[("filter[is-owned-by-me]", "1")])
    }

    fn resources_for_groups(&mut self, group_ids: &[String]) -> Result<Vec<RawResource>> {
        let mut query: Vec<(&str, &str)> = vec![("contain[tag]", "1")];
        for id in group_ids {
            query.push(("filter[is-shared-with-group][]", id.as_str()));
        }
        self.fetch_resources(&query)
    }

    fn groups(&mut self) -> Result<Vec<RawGroup>> {
        self.get_json("/groups.json", &[("contain[group_user]", "1")])
    }

    fn group(&mut self, id: &str) -> Result<RawGroup> {
        self.get_json(&format!("/groups/{}.json", id), &[])
    }

    fn user(&mut self, id: &str) -> Result<RawUser> {
        self.get_json(&format!("/users/{}.json", id), &[])
    }

    fn update_resource(
        &mut self,
        id: &str,
        description: &str,
        secrets: &[SecretEntry],
    ) -> Result<()> {
        let path = format!("/resources/{}.json", id);
        let payload = json!({"description": description, "secrets": secrets});
        debug!("Updating resource [{}]", id);

        let mut request = self
            .agent
            .put(self.uri(&path))
            .header("Accept", "application/json");
        if let Some(token) = &self.csrf_token {
            request = request.header("X-CSRF-Token", token);
        }
        if let Some(cookie) = self.cookie_header() {
            request = request.header("Cookie", cookie);
        }

        let response = request.send_json(&payload)?;
        self.absorb_cookies(response.headers());
        Self::check_status(&path, response.status().as_u16())
    }
}

/// Name and value of a `Set-Cookie` header, attributes stripped.
fn parse_set_cookie(raw: &str) -> Option<(&str, &str)> {
    let pair = raw.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    if name.is_empty() {
        return None;
    }
    Some((name, value))
}

/// Decode a quote-plus encoded header value: `%XX` escapes and `+` for
/// space. The armored challenge arrives in this form.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 3 <= bytes.len() => {
                let hex = &input[i + 1..i + 3];
                match u8::from_str_radix(hex, 16) {
                    Ok(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    Err(_) => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).to_string()
}
