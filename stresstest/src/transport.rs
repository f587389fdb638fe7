//! Contains the transport seam and its HTTP implementation.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Url;

use crate::error::{PollError, Result};
use crate::protocol::HttpResponse;
use crate::session::QueryRequest;

/// The path of the statement submission endpoint.
pub const STATEMENT_PATH: &str = "/v1/statement";

/// Issues the requests of the statement protocol.
///
/// Implementations only report connection-level failures as errors. Every response that was
/// received, regardless of its status code, is returned as an [`HttpResponse`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Submits a query to the statement endpoint.
    async fn submit(&self, request: &QueryRequest) -> Result<HttpResponse>;

    /// Fetches a continuation URI.
    async fn fetch(&self, next_uri: &str) -> Result<HttpResponse>;
}

/// A [`Transport`] using HTTP to talk to a query engine or gateway.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    remote: Url,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a new `HttpTransport` for the given remote and a default client.
    pub fn new(remote: &str) -> anyhow::Result<Self> {
        Self::with_timeout(remote, None)
    }

    /// Creates a new `HttpTransport` whose requests time out after `timeout`.
    pub fn with_timeout(remote: &str, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let remote = Url::parse(remote).with_context(|| format!("invalid remote `{remote}`"))?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            remote,
            client: builder.build()?,
        })
    }

    /// Resolves absolute or server-relative URIs against the remote.
    fn resolve(&self, uri: &str) -> Result<Url> {
        self.remote
            .join(uri)
            .map_err(|err| PollError::MalformedResponse(format!("invalid uri `{uri}`: {err}")))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn submit(&self, request: &QueryRequest) -> Result<HttpResponse> {
        let url = self.resolve(STATEMENT_PATH)?;
        let response = self
            .client
            .post(url)
            .headers(request.headers().clone())
            .body(request.query_text().to_owned())
            .send()
            .await?;

        into_http_response(response).await
    }

    async fn fetch(&self, next_uri: &str) -> Result<HttpResponse> {
        let url = self.resolve(next_uri)?;
        let response = self.client.get(url).send().await?;

        into_http_response(response).await
    }
}

async fn into_http_response(response: reqwest::Response) -> Result<HttpResponse> {
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response.text().await?;

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}
