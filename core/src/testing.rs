//! Scripted transport for unit tests.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde_json::Value;

use crate::http::{HttpRequest, HttpResponse};
use crate::transport::{Transport, TransportError};

pub fn response(status: u16, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        headers: Vec::new(),
        body: body.to_string(),
    }
}

/// Replays queued responses in order and records every request it sees.
/// Running out of responses is reported as a transport failure.
#[derive(Default)]
pub struct StubTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, String>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, response: HttpResponse) -> Self {
        self.responses.lock().push_back(Ok(response));
        self
    }

    pub fn with_json(self, status: u16, body: Value) -> Self {
        let mut response = response(status, &body.to_string());
        response
            .headers
            .push(("Content-Type".to_string(), "application/json".to_string()));
        self.with_response(response)
    }

    pub fn with_failure(self, reason: &str) -> Self {
        self.responses.lock().push_back(Err(reason.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }
}

impl Transport for StubTransport {
    fn request(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request.clone());
        match self.responses.lock().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(reason)) => Err(TransportError::Failed(reason)),
            None => Err(TransportError::Failed("no scripted response left".to_string())),
        }
    }
}
