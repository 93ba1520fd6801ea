//! In-memory stand-in for the parts of CouchDB's REST API the client uses.
//!
//! Databases, documents with revisions, `_all_docs`, `_security`, `COPY`,
//! cookie sessions and server admins. Revisions are checked the way CouchDB
//! checks them (a stale `_rev` is a 409), but nothing is persisted and
//! credentials are only checked by `POST /_session`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get, post, put},
    Json, Router,
};
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::debug;
use uuid::Uuid;

pub const USERS_DB: &str = "_users";
const USER_PREFIX: &str = "org.couchdb.user:";

#[derive(Debug, Default)]
pub struct Database {
    pub docs: BTreeMap<String, Map<String, Value>>,
    pub security: Value,
}

#[derive(Debug, Default)]
pub struct Couch {
    pub databases: BTreeMap<String, Database>,
    /// Server admins and their plain-text passwords.
    pub admins: BTreeMap<String, String>,
}

impl Couch {
    /// A server with the `_users` database already created, as after
    /// CouchDB's single-node setup.
    pub fn new() -> Self {
        let mut couch = Self::default();
        couch.databases.insert(USERS_DB.to_string(), Database::with_empty_security());
        couch
    }

    /// Roles of `name` if `password` matches a server admin or a user
    /// document.
    fn authenticate(&self, name: &str, password: &str) -> Option<Vec<Value>> {
        if self.admins.get(name).is_some_and(|p| p == password) {
            return Some(vec![json!("_admin")]);
        }
        let user = self
            .databases
            .get(USERS_DB)?
            .docs
            .get(&format!("{USER_PREFIX}{name}"))?;
        if user.get("password").and_then(Value::as_str) != Some(password) {
            return None;
        }
        Some(
            user.get("roles")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        )
    }
}

impl Database {
    fn with_empty_security() -> Self {
        Self {
            docs: BTreeMap::new(),
            security: json!({}),
        }
    }
}

pub type Db = Arc<RwLock<Couch>>;

pub fn app() -> Router {
    app_with_state(Arc::new(RwLock::new(Couch::new())))
}

/// Router over caller-provided state, so tests can seed or inspect it.
pub fn app_with_state(db: Db) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/_all_dbs", get(all_dbs))
        .route("/_session", post(create_session))
        .route(
            "/_node/_local/_config/admins/{name}",
            put(put_admin).delete(delete_admin),
        )
        .route(
            "/{db}",
            get(database_info)
                .put(create_database)
                .delete(delete_database)
                .post(post_document),
        )
        .route("/{db}/_all_docs", get(all_docs))
        .route("/{db}/_security", get(get_security).put(put_security))
        .route("/{db}/{docid}", any(document))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn reply(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

fn error(status: StatusCode, error: &str, reason: &str) -> Response {
    reply(status, json!({ "error": error, "reason": reason }))
}

fn no_db() -> Response {
    error(StatusCode::NOT_FOUND, "not_found", "Database does not exist.")
}

fn conflict() -> Response {
    error(StatusCode::CONFLICT, "conflict", "Document update conflict.")
}

fn bad_json() -> Response {
    error(StatusCode::BAD_REQUEST, "bad_request", "invalid UTF-8 JSON")
}

/// `N-<hex>` where N is one past the generation of `current`.
pub fn next_rev(current: Option<&str>) -> String {
    let generation = current
        .and_then(|rev| rev.split('-').next())
        .and_then(|n| n.parse::<u64>().ok())
        .unwrap_or(0);
    format!("{}-{}", generation + 1, Uuid::new_v4().simple())
}

/// Percent-decode one `Destination` component.
fn decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

fn parse_object(body: &Bytes) -> Option<Map<String, Value>> {
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Write `fields` as document `id`, enforcing that `rev` names the current
/// revision. Returns the new revision, or `None` on a conflict.
fn write_document(
    database: &mut Database,
    id: &str,
    rev: Option<&str>,
    mut fields: Map<String, Value>,
) -> Option<String> {
    let current = database
        .docs
        .get(id)
        .and_then(|doc| doc.get("_rev"))
        .and_then(Value::as_str);
    if current != rev {
        return None;
    }
    let new_rev = next_rev(current);
    fields.insert("_id".to_string(), json!(id));
    fields.insert("_rev".to_string(), json!(new_rev));
    database.docs.insert(id.to_string(), fields);
    Some(new_rev)
}

async fn welcome() -> Json<Value> {
    Json(json!({ "couchdb": "Welcome", "version": "mock" }))
}

async fn all_dbs(State(db): State<Db>) -> Json<Vec<String>> {
    let couch = db.read().await;
    Json(couch.databases.keys().cloned().collect())
}

#[derive(Deserialize)]
struct Credentials {
    name: String,
    password: String,
}

async fn create_session(State(db): State<Db>, body: Bytes) -> Response {
    let Ok(credentials) = serde_json::from_slice::<Credentials>(&body) else {
        return bad_json();
    };
    let couch = db.read().await;
    let Some(roles) = couch.authenticate(&credentials.name, &credentials.password) else {
        return error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Name or password is incorrect.",
        );
    };
    let token = Uuid::new_v4().simple().to_string();
    debug!(name = %credentials.name, "session created");
    let cookie = format!("AuthSession={token}; Version=1; Path=/; HttpOnly");
    (
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "ok": true, "name": credentials.name, "roles": roles })),
    )
        .into_response()
}

async fn put_admin(State(db): State<Db>, Path(name): Path<String>, body: Bytes) -> Response {
    let Ok(Value::String(password)) = serde_json::from_slice::<Value>(&body) else {
        return bad_json();
    };
    let mut couch = db.write().await;
    let previous = couch.admins.insert(name, password).unwrap_or_default();
    reply(StatusCode::OK, json!(previous))
}

async fn delete_admin(State(db): State<Db>, Path(name): Path<String>) -> Response {
    let mut couch = db.write().await;
    match couch.admins.remove(&name) {
        Some(previous) => reply(StatusCode::OK, json!(previous)),
        None => error(StatusCode::NOT_FOUND, "not_found", "unknown_config_value"),
    }
}

async fn database_info(State(db): State<Db>, Path(name): Path<String>) -> Response {
    let couch = db.read().await;
    match couch.databases.get(&name) {
        Some(database) => reply(
            StatusCode::OK,
            json!({ "db_name": name, "doc_count": database.docs.len() }),
        ),
        None => no_db(),
    }
}

async fn create_database(State(db): State<Db>, Path(name): Path<String>) -> Response {
    let mut couch = db.write().await;
    if couch.databases.contains_key(&name) {
        return error(
            StatusCode::PRECONDITION_FAILED,
            "file_exists",
            "The database could not be created, the file already exists.",
        );
    }
    debug!(database = %name, "database created");
    couch.databases.insert(name, Database::with_empty_security());
    reply(StatusCode::CREATED, json!({ "ok": true }))
}

async fn delete_database(State(db): State<Db>, Path(name): Path<String>) -> Response {
    let mut couch = db.write().await;
    match couch.databases.remove(&name) {
        Some(_) => reply(StatusCode::OK, json!({ "ok": true })),
        None => no_db(),
    }
}

async fn post_document(State(db): State<Db>, Path(name): Path<String>, body: Bytes) -> Response {
    let Some(fields) = parse_object(&body) else {
        return bad_json();
    };
    let mut couch = db.write().await;
    let Some(database) = couch.databases.get_mut(&name) else {
        return no_db();
    };
    let id = fields
        .get("_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
    let rev = fields.get("_rev").and_then(Value::as_str).map(str::to_string);
    match write_document(database, &id, rev.as_deref(), fields) {
        Some(rev) => reply(StatusCode::CREATED, json!({ "ok": true, "id": id, "rev": rev })),
        None => conflict(),
    }
}

#[derive(Deserialize)]
struct AllDocsParams {
    #[serde(default)]
    include_docs: bool,
    startkey: Option<String>,
    endkey: Option<String>,
}

/// Keys arrive JSON-encoded (`"abc"` with quotes).
fn parse_key(raw: Option<&str>) -> Result<Option<String>, Response> {
    match raw {
        None => Ok(None),
        Some(raw) => serde_json::from_str::<String>(raw)
            .map(Some)
            .map_err(|_| error(StatusCode::BAD_REQUEST, "bad_request", "invalid key")),
    }
}

async fn all_docs(
    State(db): State<Db>,
    Path(name): Path<String>,
    Query(params): Query<AllDocsParams>,
) -> Response {
    let (start, end) = match (
        parse_key(params.startkey.as_deref()),
        parse_key(params.endkey.as_deref()),
    ) {
        (Ok(start), Ok(end)) => (start, end),
        (Err(response), _) | (_, Err(response)) => return response,
    };
    let couch = db.read().await;
    let Some(database) = couch.databases.get(&name) else {
        return no_db();
    };
    let rows: Vec<Value> = database
        .docs
        .iter()
        .filter(|(id, _)| start.as_deref().is_none_or(|s| id.as_str() >= s))
        .filter(|(id, _)| end.as_deref().is_none_or(|e| id.as_str() <= e))
        .map(|(id, doc)| {
            let mut row = json!({ "id": id, "key": id, "value": { "rev": doc["_rev"] } });
            if params.include_docs {
                row["doc"] = Value::Object(doc.clone());
            }
            row
        })
        .collect();
    reply(
        StatusCode::OK,
        json!({ "total_rows": database.docs.len(), "offset": 0, "rows": rows }),
    )
}

async fn get_security(State(db): State<Db>, Path(name): Path<String>) -> Response {
    let couch = db.read().await;
    match couch.databases.get(&name) {
        Some(database) => reply(StatusCode::OK, database.security.clone()),
        None => no_db(),
    }
}

async fn put_security(State(db): State<Db>, Path(name): Path<String>, body: Bytes) -> Response {
    let Some(security) = parse_object(&body) else {
        return bad_json();
    };
    let mut couch = db.write().await;
    match couch.databases.get_mut(&name) {
        Some(database) => {
            database.security = Value::Object(security);
            reply(StatusCode::OK, json!({ "ok": true }))
        }
        None => no_db(),
    }
}

/// GET, PUT, DELETE and COPY on a single document.
async fn document(
    State(db): State<Db>,
    Path((name, id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut couch = db.write().await;
    let Some(database) = couch.databases.get_mut(&name) else {
        return no_db();
    };
    debug!(%method, database = %name, id = %id, "document request");

    match method.as_str() {
        "GET" => match database.docs.get(&id) {
            Some(doc) => reply(StatusCode::OK, Value::Object(doc.clone())),
            None => error(StatusCode::NOT_FOUND, "not_found", "missing"),
        },
        "PUT" => {
            let Some(fields) = parse_object(&body) else {
                return bad_json();
            };
            let rev = params
                .get("rev")
                .cloned()
                .or_else(|| fields.get("_rev").and_then(Value::as_str).map(str::to_string));
            match write_document(database, &id, rev.as_deref(), fields) {
                Some(rev) => reply(StatusCode::CREATED, json!({ "ok": true, "id": id, "rev": rev })),
                None => conflict(),
            }
        }
        "DELETE" => {
            let current = database
                .docs
                .get(&id)
                .and_then(|doc| doc.get("_rev"))
                .and_then(Value::as_str)
                .map(str::to_string);
            match current {
                None => error(StatusCode::NOT_FOUND, "not_found", "missing"),
                Some(current) if params.get("rev") != Some(&current) => conflict(),
                Some(current) => {
                    database.docs.remove(&id);
                    let rev = next_rev(Some(&current));
                    reply(StatusCode::OK, json!({ "ok": true, "id": id, "rev": rev }))
                }
            }
        }
        "COPY" => {
            let Some(destination) = headers.get("destination").and_then(|v| v.to_str().ok()) else {
                return error(StatusCode::BAD_REQUEST, "bad_request", "Destination header is mandatory for COPY.");
            };
            let (target, target_rev) = match destination.split_once("?rev=") {
                Some((target, rev)) => (decode(target), Some(decode(rev))),
                None => (decode(destination), None),
            };
            let Some(source) = database.docs.get(&id) else {
                return error(StatusCode::NOT_FOUND, "not_found", "missing");
            };
            let fields: Map<String, Value> = source
                .iter()
                .filter(|(k, _)| k.as_str() != "_id" && k.as_str() != "_rev")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            match write_document(database, &target, target_rev.as_deref(), fields) {
                Some(rev) => reply(StatusCode::CREATED, json!({ "ok": true, "id": target, "rev": rev })),
                None => conflict(),
            }
        }
        _ => error(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", "Only GET,PUT,DELETE,COPY allowed"),
    }
}
