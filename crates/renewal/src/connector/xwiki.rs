//! Reference connector: XWiki user-password updates over REST.
//!
//! The wiki page referenced by the resource URI advertises its REST
//! endpoint in a `data-xwiki-rest-url` attribute on the `<html>` element.
//! The connector resolves it once during `update` and caches it, so
//! `rollback` can swap the secrets back without re-fetching the page.

use crate::connector::{Connector, ConnectorContext, UpdateError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::debug;
use regex::Regex;
use std::sync::LazyLock;
use ureq::Agent;

static REST_URL_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"data-xwiki-rest-url="([^"]+)""#).unwrap());

/// Connector updating the password property of an XWiki user.
pub struct XWikiConnector {
    agent: Agent,
    ctx: ConnectorContext,
    /// REST root resolved during `update`, e.g. `https://wiki.example.org/xwiki/rest`.
    rest_root: Option<String>,
}

impl XWikiConnector {
    /// Create a connector for one resource renewal.
    #[must_use]
    pub fn new(ctx: ConnectorContext) -> Self {
        let agent = if ctx.verify_cert {
            Agent::new_with_defaults()
        } else {
            Agent::config_builder()
                .tls_config(
                    ureq::tls::TlsConfig::builder()
                        .disable_verification(true)
                        .build(),
                )
                .build()
                .new_agent()
        };
        Self {
            agent,
            ctx,
            rest_root: None,
        }
    }

    /// Fetch the wiki page behind the resource URI and extract the REST
    /// root from its `data-xwiki-rest-url` attribute.
    fn resolve_rest_root(&mut self) -> Result<String, UpdateError> {
        let mut response = self
            .agent
            .get(&self.ctx.uri)
            .call()
            .map_err(|e| UpdateError::Transport(e.to_string()))?;
        let page = response
            .body_mut()
            .read_to_string()
            .map_err(|e| UpdateError::Transport(e.to_string()))?;

        let raw_path = REST_URL_ATTR
            .captures(&page)
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| {
                UpdateError::Rejected("failed to get the REST API path for the XWiki server".to_string())
            })?;

        // The REST endpoint always ends with "rest": /rest, /xwiki/rest, ...
        // which covers most deployments.
        let rest_path = match raw_path.split_once("rest") {
            Some((prefix, _)) => format!("{}rest", prefix),
            None => {
                return Err(UpdateError::Rejected(format!(
                    "unexpected REST URL [{}]",
                    raw_path
                )));
            }
        };

        let root = format!("{}{}", base_url(&self.ctx.uri), rest_path);
        debug!("Resolved XWiki REST root: [{}]", root);
        Ok(root)
    }

    /// PUT the password property, authenticating as the wiki user with
    /// `auth_secret` and installing `new_secret`. The wiki answers 202 on
    /// success.
    fn send_password_update(
        &self,
        auth_secret: &str,
        new_secret: &str,
    ) -> Result<(), UpdateError> {
        let rest_root = self
            .rest_root
            .as_deref()
            .ok_or_else(|| UpdateError::Rejected("REST root not resolved".to_string()))?;
        let url = format!(
            "{}/wikis/xwiki/spaces/XWiki/pages/{}/objects/XWiki.XWikiUsers/0/properties/password",
            rest_root, self.ctx.username
        );
        let credentials = STANDARD.encode(format!("{}:{}", self.ctx.username, auth_secret));

        let result = self
            .agent
            .put(&url)
            .header("Content-Type", "text/plain")
            .header("Accept", "application/json")
            .header("Authorization", format!("Basic {}", credentials))
            .send(new_secret);

        match result {
            Ok(response) if response.status() == 202 => Ok(()),
            Ok(response) => Err(UpdateError::Rejected(format!(
                "server returned an invalid status code: [{}]",
                response.status()
            ))),
            Err(ureq::Error::StatusCode(code)) => Err(UpdateError::Rejected(format!(
                "server returned an invalid status code: [{}]",
                code
            ))),
            Err(e) => Err(UpdateError::Transport(e.to_string())),
        }
    }
}

impl Connector for XWikiConnector {
    fn update(&mut self) -> Result<(), UpdateError> {
        let root = self.resolve_rest_root()?;
        self.rest_root = Some(root);
        let ctx = self.ctx.clone();
        self.send_password_update(&ctx.old_secret, &ctx.new_secret)
    }

    fn rollback(&mut self) -> Result<(), UpdateError> {
        // The new secret is live on the wiki at this point; authenticate
        // with it and restore the old one.
        let ctx = self.ctx.clone();
        self.send_password_update(&ctx.new_secret, &ctx.old_secret)
    }
}

/// Scheme and authority of a URI, without the path.
fn base_url(uri: &str) -> &str {
    let Some(scheme_end) = uri.find("://") else {
        return uri;
    };
    match uri[scheme_end + 3..].find('/') {
        Some(path_start) => &uri[..scheme_end + 3 + path_start],
        None => uri,
    }
}
