//! The I/O boundary: something that turns an `HttpRequest` into an
//! `HttpResponse`.
//!
//! # Design
//! `Client` never touches the network itself. It hands a fully resolved
//! `HttpRequest` to a `Transport` exactly once per call and interprets
//! whatever comes back. Any HTTP library can sit behind the trait; the
//! bundled `UreqTransport` (behind the default `ureq` feature) is a blocking
//! implementation that returns 4xx/5xx responses as data so the client
//! can map status codes itself.
//!
//! An `Err` from a transport means no response was produced at all
//! (connection refused, DNS failure, timeout) and becomes
//! `CouchError::NoResponse`.

use std::sync::Arc;

use thiserror::Error;

use crate::http::{HttpRequest, HttpResponse};

#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be expressed in the underlying library.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request was sent (or attempted) but no response came back.
    #[error("request failed: {0}")]
    Failed(String),
}

/// Performs one HTTP round trip.
pub trait Transport {
    fn request(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn request(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).request(request)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn request(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).request(request)
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn request(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).request(request)
    }
}

#[cfg(feature = "ureq")]
pub use self::ureq_transport::UreqTransport;

#[cfg(feature = "ureq")]
mod ureq_transport {
    use std::time::Duration;

    use ureq::http::Request;
    use ureq::Agent;

    use super::{Transport, TransportError};
    use crate::http::{HttpMethod, HttpRequest, HttpResponse};

    /// Blocking transport backed by a `ureq::Agent`.
    ///
    /// Status codes are never turned into errors here, and `COPY` is allowed
    /// even though it is not a standard HTTP/1.1 verb.
    #[derive(Clone)]
    pub struct UreqTransport {
        agent: Agent,
    }

    impl Default for UreqTransport {
        fn default() -> Self {
            Self::build(None)
        }
    }

    impl UreqTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Transport whose every call gives up after `timeout`.
        pub fn with_timeout(timeout: Duration) -> Self {
            Self::build(Some(timeout))
        }

        fn build(timeout: Option<Duration>) -> Self {
            let agent = Agent::config_builder()
                .http_status_as_error(false)
                .allow_non_standard_methods(true)
                .timeout_global(timeout)
                .build()
                .new_agent();
            Self { agent }
        }
    }

    impl Transport for UreqTransport {
        fn request(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            let mut builder = Request::builder()
                .method(request.method.as_str())
                .uri(request.url.as_str());
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            let result = match (&request.body, request.method) {
                (Some(body), _) => builder
                    .body(body.clone())
                    .map_err(|e| TransportError::InvalidRequest(e.to_string()))
                    .map(|req| self.agent.run(req)),
                // Keep an explicit zero-length body on verbs that expect one.
                (None, HttpMethod::Post | HttpMethod::Put) => builder
                    .body(String::new())
                    .map_err(|e| TransportError::InvalidRequest(e.to_string()))
                    .map(|req| self.agent.run(req)),
                (None, _) => builder
                    .body(())
                    .map_err(|e| TransportError::InvalidRequest(e.to_string()))
                    .map(|req| self.agent.run(req)),
            }?;

            let mut response = result.map_err(|e| TransportError::Failed(e.to_string()))?;

            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect();
            let body = if request.method == HttpMethod::Head {
                String::new()
            } else {
                response
                    .body_mut()
                    .read_to_string()
                    .map_err(|e| TransportError::Failed(e.to_string()))?
            };

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        }
    }
}
