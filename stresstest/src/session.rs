//! Per-request header sets for statement submissions.

use reqwest::header::{
    self, HeaderMap, HeaderName, HeaderValue, InvalidHeaderName, InvalidHeaderValue,
};

use crate::config::Session;

/// Errors building the static session headers from configuration.
#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error(transparent)]
    Name(#[from] InvalidHeaderName),
    #[error("invalid value for header `{name}`: {source}")]
    Value {
        name: String,
        source: InvalidHeaderValue,
    },
}

/// The validated, immutable header set of a simulated client.
///
/// Everything except `Content-Length` is fixed at construction. Each submission receives its own
/// copy through [`SessionHeaders::request`].
#[derive(Debug, Clone)]
pub struct SessionHeaders {
    headers: HeaderMap,
}

impl SessionHeaders {
    /// Builds the header set of the given session.
    pub fn new(session: &Session) -> Result<Self, HeaderError> {
        let prefix = session.dialect.header_prefix();
        let mut builder = Builder::default();

        builder.insert("Content-Type", "text/plain; charset=UTF-8")?;
        builder.insert("User-Agent", session.user_agent())?;
        builder.insert("Connection", "keep-alive")?;
        builder.insert(&format!("{prefix}-Source"), session.source())?;
        builder.insert(&format!("{prefix}-User"), &session.user)?;
        builder.insert(&format!("{prefix}-Language"), &session.language)?;
        builder.insert(&format!("{prefix}-Transaction-Id"), "NONE")?;
        builder.insert(&format!("{prefix}-Time-Zone"), &session.time_zone)?;
        if !session.client_tags.is_empty() {
            builder.insert(
                &format!("{prefix}-Client-Tags"),
                &session.client_tags.join(","),
            )?;
        }
        if let Some(catalog) = &session.catalog {
            builder.insert(&format!("{prefix}-Catalog"), catalog)?;
        }
        if let Some(schema) = &session.schema {
            builder.insert(&format!("{prefix}-Schema"), schema)?;
        }
        if let Some(capabilities) = &session.client_capabilities {
            builder.insert(&format!("{prefix}-Client-Capabilities"), capabilities)?;
        }
        for (name, value) in &session.extra_headers {
            builder.insert(name, value)?;
        }

        Ok(Self {
            headers: builder.0,
        })
    }

    /// Creates the request for one poll cycle, with `Content-Length` set to the byte length of
    /// `query_text`.
    pub fn request(&self, query_text: impl Into<String>) -> QueryRequest {
        let query_text = query_text.into();
        let mut headers = self.headers.clone();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(query_text.len()));

        QueryRequest {
            query_text,
            headers,
        }
    }

    /// The static headers, without `Content-Length`.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

#[derive(Default)]
struct Builder(HeaderMap);

impl Builder {
    fn insert(&mut self, name: &str, value: &str) -> Result<(), HeaderError> {
        let name = HeaderName::try_from(name)?;
        let value = HeaderValue::try_from(value).map_err(|source| HeaderError::Value {
            name: name.to_string(),
            source,
        })?;
        self.0.insert(name, value);
        Ok(())
    }
}

/// A statement submission: the query text and the complete header set sent with it.
///
/// Constructed once per poll cycle and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    query_text: String,
    headers: HeaderMap,
}

impl QueryRequest {
    pub fn query_text(&self) -> &str {
        &self.query_text
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}
