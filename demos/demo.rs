use axum::{
    body::Body,
    error_handling::HandleErrorLayer,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    BoxError, Router,
};
use bytes::Bytes;
use logbook::*;
use parking_lot::Mutex;
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, time::sleep};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

/// Custom sink that keeps a summary of every logged exchange in memory
#[derive(Debug, Clone, Default)]
struct StatsSink {
    exchanges: Arc<Mutex<Vec<Exchange>>>,
}

#[derive(Debug, Clone, Serialize)]
struct Exchange {
    correlation_id: CorrelationId,
    remote: Option<String>,
    method: String,
    uri: String,
    request_body: String,
    response_status: Option<u16>,
    response_body: Option<String>,
    duration_ms: Option<u128>,
    completed: bool,
}

impl StatsSink {
    fn snapshot(&self) -> Vec<Exchange> {
        self.exchanges.lock().clone()
    }
}

impl Sink for StatsSink {
    fn write_request(
        &self,
        precorrelation: &Precorrelation,
        request: &CapturedRequest,
    ) -> Result<(), SinkError> {
        self.exchanges.lock().push(Exchange {
            correlation_id: precorrelation.id().clone(),
            remote: request.remote().map(|remote| remote.to_string()),
            method: request.method().to_string(),
            uri: request.uri().to_string(),
            request_body: request.body().as_string().into_owned(),
            response_status: None,
            response_body: None,
            duration_ms: None,
            completed: false,
        });
        Ok(())
    }

    fn write_response(
        &self,
        correlation: &Correlation,
        _request: &CapturedRequest,
        response: &CapturedResponse,
    ) -> Result<(), SinkError> {
        let mut exchanges = self.exchanges.lock();
        if let Some(exchange) = exchanges
            .iter_mut()
            .find(|exchange| &exchange.correlation_id == correlation.id())
        {
            exchange.response_status = Some(response.status().as_u16());
            exchange.response_body = Some(response.body().as_string().into_owned());
            exchange.duration_ms = Some(correlation.duration().as_millis());
            exchange.completed = true;
        }
        Ok(())
    }
}

// Handlers for our demo server
async fn hello_handler() -> impl IntoResponse {
    sleep(Duration::from_millis(100)).await; // Simulate some work
    "Hello, World!"
}

async fn echo_handler(body: Bytes) -> impl IntoResponse {
    sleep(Duration::from_millis(50)).await; // Simulate some work
    format!("Echo: {}", String::from_utf8_lossy(&body))
}

async fn streaming_handler() -> impl IntoResponse {
    use futures::stream;
    use tokio::time::interval;

    let stream = stream::unfold(0u32, |count| async move {
        if count >= 5 {
            None
        } else {
            let mut interval = interval(Duration::from_millis(200));
            interval.tick().await;
            Some((
                Ok::<_, std::convert::Infallible>(Bytes::from(format!("chunk-{count}\n"))),
                count + 1,
            ))
        }
    });

    Response::builder()
        .header("content-type", "text/plain")
        .body(Body::from_stream(stream))
        .unwrap()
}

async fn large_response_handler() -> impl IntoResponse {
    // Larger than the capture limit below, so the log shows a truncated body
    "x".repeat(2048)
}

async fn stats_handler(stats: StatsSink) -> impl IntoResponse {
    let data = stats.snapshot();
    axum::Json(serde_json::json!({
        "total_requests": data.len(),
        "completed_requests": data.iter().filter(|exchange| exchange.completed).count(),
        "requests": data
    }))
}

async fn logging_failure(error: BoxError) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .init();

    info!("Starting logbook demo server");

    let stats = StatsSink::default();
    let stats_for_route = stats.clone();

    // JSON records on the `logbook` tracing target, plus the in-memory summary
    let sink = MultiSink::new()
        .with(DefaultSink::new(
            JsonHttpLogFormatter,
            TracingHttpLogWriter::new(Level::INFO),
        ))
        .with(stats);

    let logbook = Logbook::builder()
        .sink(sink)
        .config(LogbookConfig {
            max_body_size: Some(1024),
            exclude_paths: vec!["/stats".to_string()],
            ..LogbookConfig::default()
        })
        .request_filter(|request| {
            let mut headers = request.headers().clone();
            if headers.remove("authorization").is_empty() {
                return request;
            }
            headers.append("authorization", "XXX");
            request.with_headers(headers)
        })
        .build();

    let app = Router::new()
        .route("/hello", get(hello_handler))
        .route("/echo", post(echo_handler))
        .route("/streaming", get(streaming_handler))
        .route("/large", get(large_response_handler))
        .route("/stats", get(move || stats_handler(stats_for_route.clone())))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(HandleErrorLayer::new(logging_failure))
                .layer(LogbookLayer::new(logbook)),
        );

    info!("Demo server endpoints:");
    info!("  GET  /hello      - Simple greeting");
    info!("  POST /echo       - Echo request body");
    info!("  GET  /streaming  - Streaming response");
    info!("  GET  /large      - Large response (truncated in the log)");
    info!("  GET  /stats      - View logged request/response pairs");
    info!("");
    info!("Try these commands:");
    info!("  curl http://localhost:3000/hello");
    info!("  curl -X POST -H 'Authorization: secret' -d 'Hello from client' http://localhost:3000/echo");
    info!("  curl http://localhost:3000/streaming");
    info!("  curl http://localhost:3000/large");
    info!("  curl http://localhost:3000/stats");

    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    info!("Demo server listening on http://localhost:3000");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
