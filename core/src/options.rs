//! Request and server configuration.
//!
//! # Design
//! `RequestOptions` is an immutable value handed to every `Client::send`
//! call. A `Server` keeps one as its base (credentials, debug flag) and each
//! operation derives its own copy with the extra pieces it needs (a JSON
//! body, a `Destination` header) through the `with_*` builders, so no call
//! ever observes options left behind by another.
//!
//! `ServerConfig` names the CouchDB endpoint. It has sensible local defaults
//! and can be read from `COUCHDB_HOST` / `COUCHDB_PORT` / `COUCHDB_HTTPS`.

use serde_json::Value;

use crate::error::{CouchError, Result};

pub const DEFAULT_PORT: u16 = 5984;
pub const AUTH_COOKIE_NAME: &str = "AuthSession";

/// Session cookie attached to a request as `Cookie: name=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
}

/// Username/password sent as HTTP basic auth.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Per-call request configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    /// Extra headers sent verbatim.
    pub headers: Vec<(String, String)>,
    /// Body serialized as JSON. A document passed to `Client::send` wins.
    pub json: Option<Value>,
    pub auth_token: Option<AuthCookie>,
    pub user: Option<BasicAuth>,
    /// Log requests and responses, bodies included, at `info` level.
    pub debug: bool,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.json = Some(body);
        self
    }

    pub fn with_auth_token(mut self, value: impl Into<String>, domain: impl Into<String>) -> Self {
        self.auth_token = Some(AuthCookie {
            name: AUTH_COOKIE_NAME.to_string(),
            value: value.into(),
            domain: domain.into(),
        });
        self
    }

    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(BasicAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Where the CouchDB server lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub https: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            https: false,
        }
    }
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            https: false,
        }
    }

    pub fn with_https(mut self, https: bool) -> Self {
        self.https = https;
        self
    }

    /// Read `COUCHDB_HOST`, `COUCHDB_PORT` and `COUCHDB_HTTPS`, falling back
    /// to the defaults for unset variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(host) = lookup("COUCHDB_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("COUCHDB_PORT") {
            config.port = port
                .parse()
                .map_err(|_| CouchError::InvalidArgument(format!("COUCHDB_PORT is not a port: {port}")))?;
        }
        if let Some(https) = lookup("COUCHDB_HTTPS") {
            config.https = matches!(https.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(config)
    }

    /// `{scheme}://{host}:{port}` without a trailing slash.
    pub fn base_url(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn builders_leave_the_receiver_copy_alone() {
        let base = RequestOptions::new().with_user("admin", "secret");
        let derived = base.clone().with_header("Destination", "copy");
        assert!(base.headers.is_empty());
        assert_eq!(derived.headers, vec![("Destination".to_string(), "copy".to_string())]);
        assert_eq!(derived.user, base.user);
    }

    #[test]
    fn auth_token_uses_session_cookie_name() {
        let options = RequestOptions::new().with_auth_token("tok", "db.local");
        let cookie = options.auth_token.unwrap();
        assert_eq!(cookie.name, "AuthSession");
        assert_eq!(cookie.value, "tok");
        assert_eq!(cookie.domain, "db.local");
    }

    #[test]
    fn basic_auth_debug_hides_password() {
        let options = RequestOptions::new().with_user("admin", "hunter2");
        assert!(!format!("{options:?}").contains("hunter2"));
    }

    #[test]
    fn base_url_reflects_scheme_and_port() {
        assert_eq!(ServerConfig::default().base_url(), "http://127.0.0.1:5984");
        let config = ServerConfig::new("couch.example", 6984).with_https(true);
        assert_eq!(config.base_url(), "https://couch.example:6984");
    }

    #[test]
    fn lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> =
            [("COUCHDB_HOST", "db"), ("COUCHDB_PORT", "7000"), ("COUCHDB_HTTPS", "true")].into();
        let config = ServerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config, ServerConfig::new("db", 7000).with_https(true));
    }

    #[test]
    fn bad_port_is_rejected() {
        let err = ServerConfig::from_lookup(|k| (k == "COUCHDB_PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, CouchError::InvalidArgument(_)));
    }
}
