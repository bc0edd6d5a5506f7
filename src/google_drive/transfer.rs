use std::fmt::{Debug, Display, Formatter};
use std::fs::File;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::prelude::*;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default)]
pub enum TransferBody {
    #[default]
    Empty,
    /// serialized with `Content-Type: application/json`
    Json(Value),
    Bytes(Bytes),
    /// `application/x-www-form-urlencoded` pairs
    Form(Vec<(String, String)>),
}

/// Where a successful response body ends up.
#[derive(Debug, Default)]
pub enum TransferDestination {
    #[default]
    Buffer,
    /// body is streamed into the file from its current position,
    /// the executor rewinds and empties it before every attempt
    File(File),
}

/// One remote request, reusable across retry attempts.
#[derive(Debug)]
pub struct TransferRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: TransferBody,
    pub destination: TransferDestination,
    /// when false a 401 fails immediately instead of refreshing credentials,
    /// which the credential endpoints need to avoid recursing into themselves
    pub retry_on_auth_error: bool,
}

impl TransferRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: TransferBody::Empty,
            destination: TransferDestination::Buffer,
            retry_on_auth_error: true,
        }
    }
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
    pub fn json(mut self, value: Value) -> Self {
        self.body = TransferBody::Json(value);
        self
    }
    pub fn bytes(mut self, content: Bytes) -> Self {
        self.body = TransferBody::Bytes(content);
        self
    }
    pub fn form(mut self, pairs: Vec<(String, String)>) -> Self {
        self.body = TransferBody::Form(pairs);
        self
    }
    pub fn into_file(mut self, file: File) -> Self {
        self.destination = TransferDestination::File(file);
        self
    }
    pub fn without_auth_retry(mut self) -> Self {
        self.retry_on_auth_error = false;
        self
    }
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
    pub fn header_value(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

impl Display for TransferRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransferResponse {
    pub status: u16,
    /// empty when a successful body went to a file destination
    pub body: Bytes,
    /// number of body bytes written to the file destination
    pub received: u64,
}

impl TransferResponse {
    pub fn is_success(&self) -> bool {
        self.status < 400
    }
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Executes a single request without any retry logic.
///
/// A returned `Err` means no response was received at all.
#[async_trait]
pub trait HttpTransport: Send + Sync + Debug {
    async fn execute(&self, request: &TransferRequest) -> Result<TransferResponse>;
}
