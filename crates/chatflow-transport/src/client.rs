//! reqwest-backed HTTP caller.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Method};
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{TransportError, TransportResult};
use crate::request::{HttpCaller, HttpMethod, HttpRequest, HttpResponse};

/// HTTP caller backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestCaller {
    client: Client,
}

impl ReqwestCaller {
    /// Creates a caller with the given request timeout.
    pub fn new(timeout: Duration) -> TransportResult<Self> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn method(m: HttpMethod) -> Method {
    match m {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

#[async_trait]
impl HttpCaller for ReqwestCaller {
    async fn call(&self, req: HttpRequest) -> TransportResult<HttpResponse> {
        debug!(method = ?req.method, url = %req.url, "Sending platform request");

        let mut builder = self.client.request(method(req.method), &req.url);
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        trace!(status = status.as_u16(), body = %text, "Platform response");

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))?
        };
        Ok(HttpResponse::new(status.as_u16(), body))
    }
}
