//! Server-level operations and URL building.
//!
//! # Design
//! `Server` owns the `Client` and a base `RequestOptions` value carrying the
//! credentials every call should send. Credentials are attached by
//! consuming builders (`with_auth_token`, `with_admin`), so a server value
//! never changes under a caller's feet; switching identity means building a
//! new server around the same client.
//!
//! Database names and document ids are always percent-encoded as a single
//! path segment. Administrative operations live in `admin.rs`.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;
use tracing::debug;

use crate::client::{from_value, Client};
use crate::database::Database;
use crate::admin::USERS_DATABASE;
use crate::error::{CouchError, Result};
use crate::http::HttpResponse;
use crate::options::{RequestOptions, ServerConfig, AUTH_COOKIE_NAME};
use crate::transport::Transport;
use crate::types::SessionRequest;

/// Everything except RFC 3986 unreserved characters.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode `value` for use as one path segment or query value.
pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, SEGMENT).to_string()
}

pub struct Server<T> {
    client: Client<T>,
    config: ServerConfig,
    options: RequestOptions,
    users_db: String,
}

impl<T> std::fmt::Debug for Server<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("client", &self.client)
            .field("config", &self.config)
            .field("options", &self.options)
            .field("users_db", &self.users_db)
            .finish()
    }
}

impl<T: Transport> Server<T> {
    pub fn new(client: Client<T>, config: ServerConfig) -> Self {
        Self {
            client,
            config,
            options: RequestOptions::default(),
            users_db: USERS_DATABASE.to_string(),
        }
    }

    /// Keep user documents in `name` instead of `_users`.
    pub fn with_users_database(mut self, name: impl Into<String>) -> Self {
        self.users_db = name.into();
        self
    }

    /// Name of the database holding user documents.
    pub fn users_database_name(&self) -> &str {
        &self.users_db
    }

    /// Send `AuthSession={token}` with every request.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        let domain = self.config.host.clone();
        self.options = self.options.with_auth_token(token, domain);
        self
    }

    /// Send HTTP basic credentials with every request.
    pub fn with_admin(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.options = self.options.with_user(username, password);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.options = self.options.with_debug(debug);
        self
    }

    pub fn client(&self) -> &Client<T> {
        &self.client
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Base options for a call made through this server.
    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    pub fn url(&self) -> String {
        self.config.base_url()
    }

    /// Check that the server answers. Returns the welcome object.
    pub fn ping(&self) -> Result<Value> {
        self.client.get(&format!("{}/", self.url()), &[200], &self.options)
    }

    pub fn list_databases(&self) -> Result<Vec<String>> {
        let body = self
            .client
            .get(&format!("{}/_all_dbs", self.url()), &[200], &self.options)?;
        from_value(body)
    }

    /// Handle on a database. No request is made.
    pub fn database(&self, name: &str) -> Database<'_, T> {
        Database::new(self, name)
    }

    pub fn create_database(&self, name: &str) -> Result<Database<'_, T>> {
        let db = self.database(name);
        self.client.put(&db.url(), &[201, 202], &self.options, None)?;
        debug!(database = name, "created database");
        Ok(db)
    }

    pub fn delete_database(&self, name: &str) -> Result<()> {
        self.database(name).delete()
    }

    /// Log in through `POST /_session` and return the `AuthSession` cookie
    /// value the server hands out.
    pub fn get_auth_token(&self, name: &str, password: &str) -> Result<String> {
        let url = format!("{}/_session", self.url());
        let body = serde_json::to_value(SessionRequest { name, password })
            .map_err(|e| CouchError::Serialization(e.to_string()))?;
        let options = self.options.clone().with_json(body);
        self.client.post(&url, &[200], &options, None)?;

        self.client
            .last_response()
            .as_ref()
            .and_then(session_cookie)
            .ok_or_else(|| CouchError::MissingSessionCookie(format!("POST {url}")))
    }
}

/// Value of the `AuthSession` cookie, up to the first `;`.
/// Value of the `AuthSession` cookie. Each `Set-Cookie` header carries one
/// `name=value` pair ahead of its attributes.
fn session_cookie(response: &HttpResponse) -> Option<String> {
    response.header_values("set-cookie").find_map(|cookie| {
        let pair = cookie.split(';').next()?;
        let (name, value) = pair.split_once('=')?;
        (name.trim() == AUTH_COOKIE_NAME).then(|| value.trim().to_string())
    })
}
