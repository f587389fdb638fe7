//! The response side of the statement protocol.
//!
//! Every response of the statement endpoint is a JSON document. The only field that drives the
//! protocol is `nextUri`: while it is present, the query has more work to do and the client has to
//! follow it. Its absence marks the terminal state. Everything else (columns, data, stats) is
//! left to a result decoder and ignored here, apart from a few fields used in diagnostics.

use reqwest::header::HeaderMap;
use serde::Deserialize;

use crate::error::{PollError, Result};

/// A response as received from the transport, before any interpretation.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub status: u16,
    /// The response headers.
    pub headers: HeaderMap,
    /// The decoded response body.
    pub body: String,
}

impl HttpResponse {
    /// Whether the status signals a transient server error worth retrying.
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// The size of the body in bytes.
    pub fn body_size(&self) -> u64 {
        self.body.len() as u64
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResults {
    id: Option<String>,
    next_uri: Option<String>,
    error: Option<QueryError>,
}

/// The `error` object the engine attaches to failed queries.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueryError {
    pub message: Option<String>,
    pub error_name: Option<String>,
    pub error_type: Option<String>,
}

/// The parsed envelope of a statement response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    /// The continuation pointer. `None` marks a terminal response.
    pub next_uri: Option<String>,
    /// The HTTP status code of the response this envelope was parsed from.
    pub status: u16,
    /// The engine's query identifier, if the body contained one.
    pub query_id: Option<String>,
    /// The engine-reported query failure, if any.
    pub error: Option<QueryError>,
}

impl ResponseEnvelope {
    /// Parses the body of the given response.
    ///
    /// Fails with [`PollError::MalformedResponse`] if the body is not a JSON object.
    pub fn parse(response: &HttpResponse) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(&response.body)?;
        if !value.is_object() {
            return Err(PollError::MalformedResponse(format!(
                "expected a JSON object, got `{}`",
                truncate(&response.body, 64)
            )));
        }
        let results: QueryResults = serde_json::from_value(value)?;

        Ok(Self {
            next_uri: results.next_uri,
            status: response.status,
            query_id: results.id,
            error: results.error,
        })
    }

    /// Whether the query has more work to do.
    pub fn has_next(&self) -> bool {
        self.next_uri.is_some()
    }
}

/// Extracts the sequence token of a continuation URI.
///
/// The token is the trailing path segment, a monotonically increasing integer starting at `1`
/// for the first continuation, e.g. `/v1/statement/queued/<query-id>/<slug>/1`.
pub fn sequence_number(next_uri: &str) -> Result<u64> {
    let token = next_uri.rsplit('/').next().unwrap_or_default();
    token.parse().map_err(|_| {
        PollError::MalformedResponse(format!(
            "continuation uri `{next_uri}` does not end in a sequence number"
        ))
    })
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
