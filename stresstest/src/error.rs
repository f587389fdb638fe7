//! Errors that end a poll cycle.

/// Errors that can abort a single poll cycle.
///
/// None of these escape [`QueryPoller::execute_query`](crate::poller::QueryPoller::execute_query).
/// They are converted into failure telemetry at the boundary of the cycle.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// The engine answered with a status code other than `200` where one was required.
    #[error("non 200 response: {status} received")]
    Transport {
        /// The HTTP status code of the offending response.
        status: u16,
    },
    /// The response body did not have the expected structure.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// Connection-level failure reported by the HTTP client.
    #[error(transparent)]
    Network(#[from] reqwest::Error),
}

impl From<serde_json::Error> for PollError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedResponse(err.to_string())
    }
}

/// A convenience alias that defaults our [`PollError`] type.
pub type Result<T, E = PollError> = std::result::Result<T, E>;
