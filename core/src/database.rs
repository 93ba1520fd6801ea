//! Document operations scoped to one database.
//!
//! A `Database` borrows its `Server` for the client, the base URL and the
//! credentials; it holds no state of its own besides the database name.

use serde_json::Value;
use tracing::debug;

use crate::client::from_value;
use crate::document::Document;
use crate::error::{CouchError, Result};
use crate::server::{encode_component, Server};
use crate::transport::Transport;
use crate::types::{AllDocsQuery, AllDocsResponse, DocumentUpdate};

pub struct Database<'a, T> {
    server: &'a Server<T>,
    name: String,
}

impl<T> std::fmt::Debug for Database<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<'a, T: Transport> Database<'a, T> {
    pub(crate) fn new(server: &'a Server<T>, name: &str) -> Self {
        Self {
            server,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `{server}/{db}` without a trailing slash.
    pub fn url(&self) -> String {
        format!("{}/{}", self.server.url(), encode_component(&self.name))
    }

    /// `{server}/{db}/{id}`, with `?rev=` when a revision is given.
    pub fn document_url(&self, id: &str, rev: Option<&str>) -> String {
        let mut url = format!("{}/{}", self.url(), encode_component(id));
        if let Some(rev) = rev {
            url.push_str("?rev=");
            url.push_str(&encode_component(rev));
        }
        url
    }

    /// Fetch a document. A missing document is not an error here: the result
    /// is a new, empty document carrying `id`, ready to be filled and saved.
    pub fn get_document_by_id(&self, id: &str) -> Result<Document> {
        match self.fetch_document(id) {
            Err(CouchError::NotFound { .. }) => {
                debug!(database = %self.name, id, "document not found, starting a new one");
                Ok(Document::with_id(id))
            }
            other => other,
        }
    }

    /// Fetch a document, propagating `NotFound`.
    pub fn fetch_document(&self, id: &str) -> Result<Document> {
        let body = self
            .server
            .client()
            .get(&self.document_url(id, None), &[200], self.server.options())?;
        Document::from_value(body)
    }

    /// Create or update `document`. A document without an id is POSTed and
    /// takes the id the server assigns; either way the new revision is
    /// stored on it.
    pub fn save_document(&self, document: &mut Document) -> Result<()> {
        let client = self.server.client();
        let options = self.server.options();

        let body = match document.id() {
            Some(id) => client.put(&self.document_url(id, None), &[201, 202], options, Some(&*document))?,
            None => client.post(&self.url(), &[201, 202], options, Some(&*document))?,
        };
        let update: DocumentUpdate = from_value(body)?;

        if document.id().is_none() {
            document.set_id(update.id)?;
        }
        document.set_revision(update.rev);
        Ok(())
    }

    /// Delete `document` on the server and clear its in-memory revision. The
    /// document needs both an id and a revision.
    pub fn delete_document(&self, document: &mut Document) -> Result<()> {
        let url = {
            let id = document.id().ok_or_else(|| {
                CouchError::PreconditionFailed("Cannot delete document without an ID".to_string())
            })?;
            let rev = document.revision().ok_or_else(|| {
                CouchError::PreconditionFailed(
                    "Cannot delete document without a revision number".to_string(),
                )
            })?;
            self.document_url(id, Some(rev))
        };

        self.server
            .client()
            .delete(&url, &[200, 202], self.server.options())?;
        document.clear_revision();
        Ok(())
    }

    /// Server-side copy of `id` to `new_id`, then fetch the copy. Pass `rev`
    /// to overwrite an existing `new_id` at that revision.
    pub fn copy_document(&self, id: &str, new_id: &str, rev: Option<&str>) -> Result<Document> {
        // The target is a path segment; the server percent-decodes it.
        let destination = match rev {
            Some(rev) => format!("{}?rev={}", encode_component(new_id), encode_component(rev)),
            None => encode_component(new_id),
        };
        let options = self
            .server
            .options()
            .clone()
            .with_header("Destination", destination);
        self.server
            .client()
            .copy(&self.document_url(id, None), &[201, 202], &options)?;
        self.get_document_by_id(new_id)
    }

    /// Every document in the database, in key order. Without `include_docs`
    /// each entry only carries `_id` and `_rev`.
    pub fn get_all_documents(&self, include_docs: bool) -> Result<Vec<Document>> {
        self.all_documents(&AllDocsQuery::include_docs(include_docs))
    }

    pub fn all_documents(&self, query: &AllDocsQuery) -> Result<Vec<Document>> {
        let url = format!("{}/_all_docs{}", self.url(), query_string(query)?);
        let body = self
            .server
            .client()
            .get(&url, &[200], self.server.options())?;
        let response: AllDocsResponse = from_value(body)?;

        Ok(response
            .rows
            .into_iter()
            .map(|row| match row.doc {
                Some(fields) => Document::from(fields),
                None => {
                    let mut document = Document::with_id(row.id);
                    document.set_revision(row.value.rev);
                    document
                }
            })
            .collect())
    }

    /// Drop the whole database.
    pub fn delete(&self) -> Result<()> {
        self.server
            .client()
            .delete(&self.url(), &[200, 202], self.server.options())?;
        Ok(())
    }
}

fn query_string(query: &AllDocsQuery) -> Result<String> {
    let mut params = Vec::new();
    if query.include_docs {
        params.push("include_docs=true".to_string());
    }
    // Keys are JSON values on the wire.
    for (name, key) in [("startkey", &query.start_key), ("endkey", &query.end_key)] {
        if let Some(key) = key {
            let json = serde_json::to_string(&Value::String(key.clone()))
                .map_err(|e| CouchError::Serialization(e.to_string()))?;
            params.push(format!("{name}={}", encode_component(&json)));
        }
    }
    if params.is_empty() {
        Ok(String::new())
    } else {
        Ok(format!("?{}", params.join("&")))
    }
}
