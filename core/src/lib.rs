//! Synchronous CouchDB client core.
//!
//! # Overview
//! Turns method calls into CouchDB REST requests: documents, databases,
//! users, security objects and server admins. Every operation is one
//! blocking round trip through a `Transport`; the response status decides
//! between a decoded body and a typed `CouchError`.
//!
//! # Design
//! - `Client` validates the verb, resolves `RequestOptions` into a plain
//!   `HttpRequest`, calls the transport exactly once and checks the status
//!   against the set of codes the operation accepts.
//! - `Server` and `Database` only build URLs and pick expected statuses.
//!   `Database::get_document_by_id` is the one place that recovers from an
//!   error (`NotFound` becomes a fresh document).
//! - The transport is a trait so tests run against scripted responses; the
//!   default `ureq` feature provides a blocking implementation.
//!
//! ```no_run
//! use couch_core::{Client, Document, Server, ServerConfig, UreqTransport};
//!
//! # fn main() -> couch_core::Result<()> {
//! let server = Server::new(Client::new(UreqTransport::new()), ServerConfig::default())
//!     .with_admin("admin", "secret");
//! let db = server.database("test");
//!
//! let mut doc = db.get_document_by_id("123456")?;
//! doc.set("how awesome is this", "very")?;
//! db.save_document(&mut doc)?;
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod client;
pub mod database;
pub mod document;
pub mod error;
pub mod http;
pub mod options;
pub mod security;
pub mod server;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::Client;
pub use database::Database;
pub use document::Document;
pub use error::{CouchError, Result};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use options::{AuthCookie, BasicAuth, RequestOptions, ServerConfig};
pub use security::{SecurityDocument, SecurityGroup};
pub use server::Server;
pub use transport::{Transport, TransportError};
#[cfg(feature = "ureq")]
pub use transport::UreqTransport;
pub use types::{AllDocsQuery, DocumentUpdate};
