use std::io::Write;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{instrument, trace};

use crate::google_drive::transfer::{
    HttpTransport, Method, TransferBody, TransferDestination, TransferRequest, TransferResponse,
};
use crate::prelude::*;

/// [`HttpTransport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[instrument(skip(self, request), fields(request = %request))]
    async fn execute(&self, request: &TransferRequest) -> Result<TransferResponse> {
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), &request.url)
            .query(&request.query);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        builder = match &request.body {
            TransferBody::Empty => builder,
            TransferBody::Json(value) => builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(serde_json::to_vec(value)?),
            TransferBody::Bytes(content) => builder.body(content.clone()),
            TransferBody::Form(pairs) => builder.form(pairs),
        };

        let mut response = builder.send().await.context("request was not sent")?;
        let status = response.status().as_u16();
        trace!("response status: {}", status);

        match &request.destination {
            TransferDestination::File(file) if status < 400 => {
                let mut file = file;
                let mut received = 0u64;
                while let Some(chunk) = response.chunk().await? {
                    file.write_all(&chunk)?;
                    received += chunk.len() as u64;
                }
                file.flush()?;
                Ok(TransferResponse {
                    status,
                    body: Bytes::new(),
                    received,
                })
            }
            _ => {
                let body = response.bytes().await?;
                Ok(TransferResponse {
                    status,
                    received: body.len() as u64,
                    body,
                })
            }
        }
    }
}
