//! Request pipeline: validate, build, send once, check status, decode.
//!
//! # Design
//! `Client` owns a `Transport` and nothing else except the last response it
//! saw. Each call is split the same way: `build_request` turns a URL, a
//! `RequestOptions` value and an optional document into a plain
//! `HttpRequest`; the transport performs the round trip; `check_status`
//! and `decode_body` consume the `HttpResponse`. Building and parsing never
//! touch the network, so both halves are tested without a server.
//!
//! The recorded last response exists for the session-cookie flow. It is
//! overwritten by every call, so it only means something to a caller that
//! does not share the client across threads.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::document::Document;
use crate::error::{CouchError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::options::RequestOptions;
use crate::transport::Transport;

/// Synchronous CouchDB client over a pluggable transport.
pub struct Client<T> {
    transport: T,
    last_response: Mutex<Option<HttpResponse>>,
}

impl<T> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("last_response", &*self.last_response.lock())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            last_response: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `method url` and return the decoded body if the response status
    /// is one of `expected`.
    ///
    /// `method` must be one of GET, HEAD, POST, PUT, DELETE or COPY; anything
    /// else fails with `InvalidArgument` before the transport is called.
    pub fn send(
        &self,
        method: &str,
        url: &str,
        expected: &[u16],
        options: &RequestOptions,
        document: Option<&Document>,
    ) -> Result<Value> {
        let method: HttpMethod = method.parse()?;
        self.execute(method, url, expected, options, document)
    }

    pub fn get(&self, url: &str, expected: &[u16], options: &RequestOptions) -> Result<Value> {
        self.execute(HttpMethod::Get, url, expected, options, None)
    }

    pub fn head(&self, url: &str, expected: &[u16], options: &RequestOptions) -> Result<Value> {
        self.execute(HttpMethod::Head, url, expected, options, None)
    }

    pub fn post(
        &self,
        url: &str,
        expected: &[u16],
        options: &RequestOptions,
        document: Option<&Document>,
    ) -> Result<Value> {
        self.execute(HttpMethod::Post, url, expected, options, document)
    }

    pub fn put(
        &self,
        url: &str,
        expected: &[u16],
        options: &RequestOptions,
        document: Option<&Document>,
    ) -> Result<Value> {
        self.execute(HttpMethod::Put, url, expected, options, document)
    }

    pub fn delete(&self, url: &str, expected: &[u16], options: &RequestOptions) -> Result<Value> {
        self.execute(HttpMethod::Delete, url, expected, options, None)
    }

    pub fn copy(&self, url: &str, expected: &[u16], options: &RequestOptions) -> Result<Value> {
        self.execute(HttpMethod::Copy, url, expected, options, None)
    }

    /// Typed core of `send`.
    pub fn execute(
        &self,
        method: HttpMethod,
        url: &str,
        expected: &[u16],
        options: &RequestOptions,
        document: Option<&Document>,
    ) -> Result<Value> {
        let request = build_request(method, url, options, document)?;

        if options.debug {
            info!(%method, url, body = request.body.as_deref().unwrap_or(""), "sending request");
        } else {
            debug!(%method, url, "sending request");
        }

        let response = match self.transport.request(&request) {
            Ok(response) => response,
            Err(e) => {
                warn!(%method, url, error = %e, "no response from server");
                *self.last_response.lock() = None;
                return Err(CouchError::from_response(None, method, url));
            }
        };

        if options.debug {
            info!(%method, url, status = response.status, body = %response.body, "received response");
        } else {
            debug!(%method, url, status = response.status, "received response");
        }

        *self.last_response.lock() = Some(response.clone());

        check_status(&response, method, url, expected)?;
        decode_body(&response)
    }

    /// The response to the most recent call, if it produced one.
    pub fn last_response(&self) -> Option<HttpResponse> {
        self.last_response.lock().clone()
    }
}

/// Resolve options and document into a concrete request.
pub fn build_request(
    method: HttpMethod,
    url: &str,
    options: &RequestOptions,
    document: Option<&Document>,
) -> Result<HttpRequest> {
    let body = match (document, &options.json) {
        (Some(document), _) => Some(serde_json::to_string(document)),
        (None, Some(json)) => Some(serde_json::to_string(json)),
        (None, None) => None,
    }
    .transpose()
    .map_err(|e| CouchError::Serialization(e.to_string()))?;

    let mut headers = vec![("accept".to_string(), "application/json".to_string())];
    headers.extend(options.headers.iter().cloned());

    let has_content_type = options
        .headers
        .iter()
        .any(|(k, _)| k.eq_ignore_ascii_case("content-type"));
    if body.is_some() && !has_content_type {
        headers.push(("content-type".to_string(), "application/json".to_string()));
    }

    if let Some(cookie) = &options.auth_token {
        headers.push(("cookie".to_string(), format!("{}={}", cookie.name, cookie.value)));
        headers.push(("x-couchdb-www-authenticate".to_string(), "Cookie".to_string()));
    }

    if let Some(user) = &options.user {
        let credentials = BASE64.encode(format!("{}:{}", user.username, user.password));
        headers.push(("authorization".to_string(), format!("Basic {credentials}")));
    }

    Ok(HttpRequest {
        method,
        url: url.to_string(),
        headers,
        body,
    })
}

/// Map a status outside `expected` to the matching `CouchError`.
fn check_status(response: &HttpResponse, method: HttpMethod, url: &str, expected: &[u16]) -> Result<()> {
    if expected.contains(&response.status) {
        return Ok(());
    }
    Err(CouchError::from_response(Some(response), method, url))
}

/// Empty bodies decode to `null`. A body declared as JSON must parse; an
/// undeclared body is parsed when it can be; any other content type comes
/// back verbatim as a string.
pub fn decode_body(response: &HttpResponse) -> Result<Value> {
    if response.body.trim().is_empty() {
        return Ok(Value::Null);
    }
    if response.is_json() {
        return serde_json::from_str(&response.body)
            .map_err(|e| CouchError::Deserialization(e.to_string()));
    }
    if response.header("content-type").is_none() {
        if let Ok(value) = serde_json::from_str(&response.body) {
            return Ok(value);
        }
    }
    Ok(Value::String(response.body.clone()))
}

/// Convert a decoded body into a wire DTO.
pub(crate) fn from_value<D: DeserializeOwned>(value: Value) -> Result<D> {
    serde_json::from_value(value).map_err(|e| CouchError::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{response, StubTransport};
    use serde_json::json;

    const URL: &str = "http://127.0.0.1:5984/test";

    #[test]
    fn unsupported_verb_never_reaches_the_transport() {
        let client = Client::new(StubTransport::new());
        let err = client
            .send("SEND", URL, &[200], &RequestOptions::new(), None)
            .unwrap_err();
        assert!(matches!(err, CouchError::InvalidArgument(_)));
        assert!(client.transport().requests().is_empty());
    }

    #[test]
    fn expected_status_returns_body() {
        let transport = StubTransport::new()
            .with_response(response(200, "First Test Ok"))
            .with_response(response(202, "Second Test Ok"));
        let client = Client::new(transport);

        let first = client.send("POST", URL, &[200], &RequestOptions::new(), None).unwrap();
        assert_eq!(first, json!("First Test Ok"));
        let second = client.send("post", URL, &[202], &RequestOptions::new(), None).unwrap();
        assert_eq!(second, json!("Second Test Ok"));
        assert_eq!(client.transport().requests().len(), 2);
    }

    #[test]
    fn json_body_is_decoded() {
        let client = Client::new(StubTransport::new().with_json(201, json!({"ok": true, "id": "a"})));
        let body = client.send("PUT", URL, &[200, 201], &RequestOptions::new(), None).unwrap();
        assert_eq!(body, json!({"ok": true, "id": "a"}));
    }

    #[test]
    fn unexpected_status_maps_through_the_error_table() {
        let client = Client::new(StubTransport::new().with_json(
            404,
            json!({"error": "not_found", "reason": "missing"}),
        ));
        let err = client.get(URL, &[200], &RequestOptions::new()).unwrap_err();
        match err {
            CouchError::NotFound { status, message } => {
                assert_eq!(status, 404);
                assert!(message.contains("not_found"));
                assert!(message.contains(&format!("GET {URL}")));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn transport_failure_is_no_response() {
        let client = Client::new(StubTransport::new().with_failure("connection refused"));
        let err = client.get(URL, &[200], &RequestOptions::new()).unwrap_err();
        assert!(matches!(err, CouchError::NoResponse { .. }));
        assert!(client.last_response().is_none());
    }

    #[test]
    fn declared_json_that_does_not_parse_is_an_error() {
        let mut bad = response(200, "{not json");
        bad.headers.push(("Content-Type".to_string(), "application/json".to_string()));
        let client = Client::new(StubTransport::new().with_response(bad));
        let err = client.get(URL, &[200], &RequestOptions::new()).unwrap_err();
        assert!(matches!(err, CouchError::Deserialization(_)));
    }

    #[test]
    fn last_response_keeps_headers_and_raw_body() {
        let mut ok = response(200, r#"{"ok":true}"#);
        ok.headers.push(("Set-Cookie".to_string(), "AuthSession=abc; Path=/".to_string()));
        let client = Client::new(StubTransport::new().with_response(ok.clone()));
        client.post(URL, &[200], &RequestOptions::new(), None).unwrap();
        assert_eq!(client.last_response(), Some(ok));
    }

    #[test]
    fn document_wins_over_json_option() {
        let mut doc = Document::with_id("a");
        doc.set("n", 1).unwrap();
        let options = RequestOptions::new().with_json(json!({"ignored": true}));
        let req = build_request(HttpMethod::Put, URL, &options, Some(&doc)).unwrap();
        let body: Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"_id": "a", "n": 1}));
        assert_eq!(req.header("content-type"), Some("application/json"));
    }

    #[test]
    fn credentials_become_headers() {
        let options = RequestOptions::new()
            .with_auth_token("tok123", "127.0.0.1")
            .with_user("admin", "secret")
            .with_header("Destination", "copy");
        let req = build_request(HttpMethod::Copy, URL, &options, None).unwrap();
        assert_eq!(req.header("cookie"), Some("AuthSession=tok123"));
        assert_eq!(req.header("x-couchdb-www-authenticate"), Some("Cookie"));
        assert_eq!(req.header("authorization"), Some("Basic YWRtaW46c2VjcmV0"));
        assert_eq!(req.header("destination"), Some("copy"));
        assert_eq!(req.header("content-type"), None);
        assert!(req.body.is_none());
    }

    #[test]
    fn empty_body_decodes_to_null() {
        assert_eq!(decode_body(&response(200, "")).unwrap(), Value::Null);
    }

    #[test]
    fn text_bodies_are_not_parsed_as_json() {
        let mut plain = response(200, "123");
        plain.headers.push(("Content-Type".to_string(), "text/plain".to_string()));
        assert_eq!(decode_body(&plain).unwrap(), json!("123"));

        plain.body = "true".to_string();
        assert_eq!(decode_body(&plain).unwrap(), json!("true"));

        // No content type at all: parse if it is JSON.
        assert_eq!(decode_body(&response(200, "123")).unwrap(), json!(123));
    }
}
