//! Drives one query from submission to completion.
//!
//! A poll cycle submits the query text to the statement endpoint and then follows the `nextUri`
//! continuation of every response until a response without one arrives:
//!
//! ```text
//! Submitting -> (Polling <-> Retrying) -> Completed | Failed
//! ```
//!
//! Telemetry is emitted at three checkpoints. The first continuation marks the acceptance of the
//! submission (`Post`), every continuation fetch beyond the first one is timed individually
//! (`Get`), and the end of the cycle is timed from the very beginning (`Complete`). A failed cycle
//! emits a failed `Complete` event, preceded by a failed `Post` event if the submission was never
//! accepted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{PollError, Result};
use crate::protocol::{HttpResponse, ResponseEnvelope, sequence_number};
use crate::session::{QueryRequest, SessionHeaders};
use crate::telemetry::{RequestType, TelemetrySink};
use crate::transport::Transport;

/// Default for the total number of GET attempts of a single continuation URI.
pub const DEFAULT_MAX_FETCH_ATTEMPTS: usize = 3;

/// The phases of a poll cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollPhase {
    /// Waiting for the response to the submission.
    Submitting,
    /// Following continuations.
    Polling,
    /// Re-issuing a continuation fetch after a `5xx` response.
    Retrying,
    /// The engine returned a response without continuation.
    Completed,
    /// The cycle was aborted.
    Failed,
}

/// The mutable cursor of one poll cycle.
#[derive(Debug)]
struct PollState {
    start: Instant,
    phase: PollPhase,
    is_first_response: bool,
    envelope: Option<ResponseEnvelope>,
    last_response: Option<HttpResponse>,
}

impl PollState {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            phase: PollPhase::Submitting,
            is_first_response: true,
            envelope: None,
            last_response: None,
        }
    }

    fn elapsed_millis(&self) -> u64 {
        millis(self.start.elapsed())
    }

    /// Keeps the response for diagnostics and returns it.
    fn receive(&mut self, response: HttpResponse) -> &HttpResponse {
        self.last_response.insert(response)
    }
}

/// Executes poll cycles against a [`Transport`], reporting to a [`TelemetrySink`].
///
/// A poller holds no per-query state and can be shared by any number of concurrently running
/// cycles.
pub struct QueryPoller<T> {
    transport: T,
    headers: SessionHeaders,
    sink: Arc<dyn TelemetrySink>,
    max_fetch_attempts: usize,
}

impl<T: std::fmt::Debug> std::fmt::Debug for QueryPoller<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPoller")
            .field("transport", &self.transport)
            .field("headers", &self.headers)
            .field("max_fetch_attempts", &self.max_fetch_attempts)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> QueryPoller<T> {
    /// Creates a poller submitting with the given session headers.
    pub fn new(transport: T, headers: SessionHeaders, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            transport,
            headers,
            sink,
            max_fetch_attempts: DEFAULT_MAX_FETCH_ATTEMPTS,
        }
    }

    /// Sets the total number of GET attempts of a continuation URI answered with `5xx`.
    ///
    /// Values below `1` are treated as `1`, i.e. no retries.
    pub fn max_fetch_attempts(mut self, attempts: usize) -> Self {
        self.max_fetch_attempts = attempts.max(1);
        self
    }

    /// Executes one poll cycle of `query_text`, labelling its telemetry with `label`.
    ///
    /// This never fails. The outcome of the cycle is reported exclusively to the telemetry sink.
    pub async fn execute_query(&self, label: &str, query_text: &str) {
        let request = self.headers.request(query_text);
        let mut state = PollState::new();

        match self.poll(label, &request, &mut state).await {
            Ok(()) => {
                state.phase = PollPhase::Completed;
                if let Some(error) = state.envelope.as_ref().and_then(|e| e.error.as_ref()) {
                    tracing::warn!(
                        label,
                        query_id = ?state.envelope.as_ref().and_then(|e| e.query_id.as_deref()),
                        error_name = ?error.error_name,
                        message = ?error.message,
                        "query completed with an engine error"
                    );
                }
                self.sink
                    .on_success(RequestType::Complete, label, state.elapsed_millis(), 0);
            }
            Err(error) => {
                let elapsed = state.elapsed_millis();
                log_failure(label, &request, &state, &error);
                state.phase = PollPhase::Failed;

                if state.is_first_response {
                    self.sink
                        .on_failure(RequestType::Post, label, elapsed, 0, &error);
                }
                self.sink
                    .on_failure(RequestType::Complete, label, elapsed, 0, &error);
            }
        }

        tracing::debug!(
            label,
            phase = ?state.phase,
            elapsed_millis = state.elapsed_millis(),
            "poll cycle finished"
        );
    }

    async fn poll(
        &self,
        label: &str,
        request: &QueryRequest,
        state: &mut PollState,
    ) -> Result<()> {
        let response = self.transport.submit(request).await?;
        let response = state.receive(response);
        if response.status != 200 {
            return Err(PollError::Transport {
                status: response.status,
            });
        }
        let envelope = ResponseEnvelope::parse(response)?;
        tracing::debug!(label, query_id = ?envelope.query_id, "query submitted");
        state.envelope = Some(envelope);
        state.phase = PollPhase::Polling;

        while let Some(envelope) = &state.envelope {
            let Some(next_uri) = envelope.next_uri.clone() else {
                break;
            };
            if envelope.status != 200 {
                return Err(PollError::Transport {
                    status: envelope.status,
                });
            }

            if state.is_first_response {
                self.sink
                    .on_success(RequestType::Post, label, state.elapsed_millis(), 0);
                state.is_first_response = false;
            }

            let before_get = Instant::now();
            let response = self.fetch(&next_uri, state).await?;
            let get_elapsed = millis(before_get.elapsed());

            // the first continuation is already covered by the `Post` event
            if sequence_number(&next_uri)? > 1 {
                self.sink.on_success(
                    RequestType::Get,
                    label,
                    get_elapsed,
                    response.body_size(),
                );
            }

            let envelope = ResponseEnvelope::parse(state.receive(response))?;
            state.envelope = Some(envelope);
        }

        Ok(())
    }

    /// Fetches a continuation, re-issuing the request while the engine answers with `5xx`.
    ///
    /// When all attempts fail the last response is returned as-is.
    async fn fetch(&self, next_uri: &str, state: &mut PollState) -> Result<HttpResponse> {
        let mut response = self.transport.fetch(next_uri).await?;
        let mut attempts = 1;

        while response.is_server_error() && attempts < self.max_fetch_attempts {
            state.phase = PollPhase::Retrying;
            tracing::warn!(
                next_uri,
                status = response.status,
                attempt = attempts,
                "retrying continuation fetch"
            );
            response = self.transport.fetch(next_uri).await?;
            attempts += 1;
        }

        if response.is_server_error() {
            tracing::warn!(
                next_uri,
                status = response.status,
                attempts,
                "continuation fetch still failing, proceeding with last response"
            );
        }

        state.phase = PollPhase::Polling;
        Ok(response)
    }
}

fn log_failure(label: &str, request: &QueryRequest, state: &PollState, error: &PollError) {
    let error: &(dyn std::error::Error + 'static) = error;
    match &state.last_response {
        Some(response) => tracing::error!(
            label,
            phase = ?state.phase,
            query = request.query_text(),
            status = response.status,
            headers = ?response.headers,
            body = %response.body,
            envelope = ?state.envelope,
            error,
            "query failed"
        ),
        None => tracing::error!(
            label,
            phase = ?state.phase,
            query = request.query_text(),
            error,
            "query failed before any response"
        ),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
