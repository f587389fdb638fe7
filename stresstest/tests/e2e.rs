use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use gateway_stresstest::config::{Queries, QueryWeights, Session};
use gateway_stresstest::queries::QueryMix;
use gateway_stresstest::session::SessionHeaders;
use gateway_stresstest::telemetry::{MetricsSink, RecordingSink, RequestType, TelemetryEvent};
use gateway_stresstest::transport::HttpTransport;
use gateway_stresstest::{QueryPoller, Scenario};
use serde_json::json;

/// Initialize the logger for testing.
fn init_tracing() {
    tracing_subscriber::fmt::fmt()
        .with_env_filter("ERROR,gateway_stresstest=TRACE")
        .with_target(true)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}

/// An in-process engine speaking the statement protocol.
///
/// Every query is answered with `pages` continuations before it completes.
#[derive(Clone, Debug)]
struct EngineState {
    pages: u64,
    submit_status: StatusCode,
    /// The number of continuation fetches to answer with `503` before answering normally.
    unavailable: Arc<AtomicUsize>,
    submissions: Arc<Mutex<Vec<(HeaderMap, String)>>>,
    fetches: Arc<Mutex<Vec<String>>>,
}

impl EngineState {
    fn new(pages: u64) -> Self {
        Self {
            pages,
            submit_status: StatusCode::OK,
            unavailable: Default::default(),
            submissions: Default::default(),
            fetches: Default::default(),
        }
    }

    fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }
}

async fn submit(State(state): State<EngineState>, headers: HeaderMap, body: String) -> Response {
    state.submissions.lock().unwrap().push((headers, body));

    if state.submit_status != StatusCode::OK {
        let body = json!({"error": {"message": "engine is shutting down"}});
        return (state.submit_status, Json(body)).into_response();
    }

    let next_uri = if state.pages > 0 {
        Some("/v1/statement/queued/q1/y0/1")
    } else {
        None
    };
    Json(json!({"id": "q1", "nextUri": next_uri, "stats": {"state": "QUEUED"}})).into_response()
}

async fn fetch(
    State(state): State<EngineState>,
    Path((_stage, id, slug, token)): Path<(String, String, String, u64)>,
    uri: Uri,
) -> Response {
    state.fetches.lock().unwrap().push(uri.path().to_owned());

    let unavailable = state
        .unavailable
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    if unavailable.is_ok() {
        return (StatusCode::SERVICE_UNAVAILABLE, "503 Service Unavailable").into_response();
    }

    if token < state.pages {
        let next_uri = format!("/v1/statement/executing/{id}/{slug}/{}", token + 1);
        Json(json!({"id": id, "nextUri": next_uri, "stats": {"state": "RUNNING"}})).into_response()
    } else {
        Json(json!({
            "id": id,
            "columns": [{"name": "Table", "type": "varchar"}],
            "data": [["orders"], ["lineitem"]],
            "stats": {"state": "FINISHED"}
        }))
        .into_response()
    }
}

#[derive(Debug)]
struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
}

impl TestServer {
    fn new(state: EngineState) -> Self {
        let router = Router::new()
            .route("/v1/statement", routing::post(submit))
            .route("/v1/statement/{stage}/{id}/{slug}/{token}", routing::get(fetch))
            .with_state(state);

        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the base URL of the server.
    fn url(&self) -> String {
        format!("http://localhost:{}/", self.socket.port())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn poller(remote: &str, sink: Arc<RecordingSink>) -> QueryPoller<HttpTransport> {
    let transport = HttpTransport::new(remote).unwrap();
    let headers = SessionHeaders::new(&Session::default()).unwrap();
    QueryPoller::new(transport, headers, sink)
}

fn summary(events: &[TelemetryEvent]) -> Vec<(RequestType, bool)> {
    events
        .iter()
        .map(|event| (event.request_type, event.is_success()))
        .collect()
}

#[tokio::test]
async fn polls_until_completion() {
    init_tracing();
    let state = EngineState::new(3);
    let server = TestServer::new(state.clone());
    let sink = Arc::new(RecordingSink::new());

    poller(&server.url(), sink.clone())
        .execute_query("Short", "show tables")
        .await;

    assert_eq!(
        state.fetches(),
        [
            "/v1/statement/queued/q1/y0/1",
            "/v1/statement/executing/q1/y0/2",
            "/v1/statement/executing/q1/y0/3",
        ]
    );

    let events = sink.take();
    assert_eq!(
        summary(&events),
        [
            (RequestType::Post, true),
            (RequestType::Get, true),
            (RequestType::Get, true),
            (RequestType::Complete, true),
        ]
    );
    assert!(events[2].response_size_bytes > 0);

    let submissions = state.submissions.lock().unwrap();
    let (headers, body) = &submissions[0];
    assert_eq!(body, "show tables");
    assert_eq!(headers["content-length"], "11");
    assert_eq!(headers["x-trino-user"], "stresstest");
    assert_eq!(headers["x-trino-catalog"], "hive");
    assert_eq!(headers["content-type"], "text/plain; charset=UTF-8");
}

#[tokio::test]
async fn immediately_finished_query() {
    init_tracing();
    let state = EngineState::new(0);
    let server = TestServer::new(state.clone());
    let sink = Arc::new(RecordingSink::new());

    poller(&server.url(), sink.clone())
        .execute_query("Short", "select 1")
        .await;

    assert!(state.fetches().is_empty());
    assert_eq!(summary(&sink.take()), [(RequestType::Complete, true)]);
}

#[tokio::test]
async fn retries_unavailable_engine() {
    init_tracing();
    let state = EngineState::new(2);
    state.unavailable.store(2, Ordering::SeqCst);
    let server = TestServer::new(state.clone());
    let sink = Arc::new(RecordingSink::new());

    poller(&server.url(), sink.clone())
        .execute_query("Long", "select * from orders")
        .await;

    assert_eq!(
        state.fetches(),
        [
            "/v1/statement/queued/q1/y0/1",
            "/v1/statement/queued/q1/y0/1",
            "/v1/statement/queued/q1/y0/1",
            "/v1/statement/executing/q1/y0/2",
        ]
    );
    assert_eq!(
        summary(&sink.take()),
        [
            (RequestType::Post, true),
            (RequestType::Get, true),
            (RequestType::Complete, true),
        ]
    );
}

#[tokio::test]
async fn rejected_submission() {
    init_tracing();
    let mut state = EngineState::new(2);
    state.submit_status = StatusCode::INTERNAL_SERVER_ERROR;
    let server = TestServer::new(state.clone());
    let sink = Arc::new(RecordingSink::new());

    poller(&server.url(), sink.clone())
        .execute_query("Short", "show tables")
        .await;

    assert!(state.fetches().is_empty());
    let events = sink.take();
    assert_eq!(
        summary(&events),
        [(RequestType::Post, false), (RequestType::Complete, false)]
    );
    assert_eq!(
        events[1].error.as_deref(),
        Some("non 200 response: 500 received")
    );
}

#[tokio::test]
async fn unreachable_engine() {
    init_tracing();
    // bind and release a port, so nothing is listening on it
    let port = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let sink = Arc::new(RecordingSink::new());

    poller(&format!("http://127.0.0.1:{port}"), sink.clone())
        .execute_query("Short", "show tables")
        .await;

    let events = sink.take();
    assert_eq!(
        summary(&events),
        [(RequestType::Post, false), (RequestType::Complete, false)]
    );
}

#[tokio::test]
async fn stresstest_against_engine() {
    init_tracing();
    let state = EngineState::new(2);
    let server = TestServer::new(state.clone());
    let sink = Arc::new(MetricsSink::new());

    let transport = HttpTransport::new(&server.url()).unwrap();
    let headers = SessionHeaders::new(&Session::default()).unwrap();
    let poller = Arc::new(QueryPoller::new(transport, headers, sink.clone()));

    let mix = QueryMix::new(Queries {
        weights: QueryWeights { long: 1, short: 1 },
        ..Default::default()
    })
    .unwrap();
    let scenario = Scenario::builder("e2e", mix)
        .users(4)
        .wait_time(Duration::from_millis(20))
        .seed(1234)
        .build();

    let summary = gateway_stresstest::run(poller, &scenario, Duration::from_millis(300))
        .await
        .unwrap();
    assert!(summary.cycles >= 4);

    let metrics = sink.take();
    let completions: usize = metrics
        .iter()
        .filter(|((request_type, _), _)| *request_type == RequestType::Complete)
        .map(|(_, metrics)| metrics.successes())
        .sum();
    let failures: u64 = metrics.values().map(|metrics| metrics.failures).sum();

    assert_eq!(completions as u64, summary.cycles);
    assert_eq!(failures, 0);
    assert_eq!(state.submissions.lock().unwrap().len() as u64, summary.cycles);
}
