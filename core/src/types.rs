//! Wire DTOs for CouchDB response and request bodies.
//!
//! # Design
//! These types mirror the JSON CouchDB sends back but are defined
//! independently from the mock server's own types; integration tests catch
//! any drift between the two. Unknown fields are ignored on the way in.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body returned by document writes (`PUT`, `POST`, `DELETE`, `COPY`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentUpdate {
    #[serde(default)]
    pub ok: bool,
    pub id: String,
    pub rev: String,
}

/// Body of `GET /{db}/_all_docs`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AllDocsResponse {
    #[serde(default)]
    pub total_rows: u64,
    #[serde(default)]
    pub offset: u64,
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AllDocsRow {
    pub id: String,
    #[serde(default)]
    pub key: Value,
    pub value: RowValue,
    /// Present only with `include_docs=true`; `null` for deleted documents.
    #[serde(default)]
    pub doc: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RowValue {
    pub rev: String,
}

/// Query string parameters for `_all_docs`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllDocsQuery {
    pub include_docs: bool,
    pub start_key: Option<String>,
    pub end_key: Option<String>,
}

impl AllDocsQuery {
    pub fn include_docs(include_docs: bool) -> Self {
        Self {
            include_docs,
            ..Self::default()
        }
    }

    pub fn with_range(mut self, start_key: impl Into<String>, end_key: impl Into<String>) -> Self {
        self.start_key = Some(start_key.into());
        self.end_key = Some(end_key.into());
        self
    }
}

/// Body of `POST /_session`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRequest<'a> {
    pub name: &'a str,
    pub password: &'a str,
}

/// Body of a user document in `_users`.
#[derive(Debug, Clone, Serialize)]
pub struct NewUser<'a> {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: &'a str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub roles: &'a [String],
    pub password: &'a str,
}
