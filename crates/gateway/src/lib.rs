//! HTTP gateway for toolstream.
//!
//! `POST /chat` takes a question and answers with a streamed body of
//! tagged steps while the orchestrator works. `GET /health` reports
//! liveness.
//!
//! Built on Axum.

use axum::{
    Router,
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{Instrument, error, info, info_span, warn};

use toolstream_agent::{Orchestrator, frame_channel};
use toolstream_config::{AgentConfig, AppConfig};
use toolstream_core::error::Error;
use toolstream_core::provider::Provider;
use toolstream_core::tool::ToolRegistry;

/// Shared application state. Read-only after startup.
pub struct GatewayState {
    pub provider: Arc<dyn Provider>,
    pub tools: Arc<ToolRegistry>,
    pub agent: AgentConfig,
}

type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/chat", post(chat_handler))
        .layer(cors_layer(allowed_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600))
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let provider = toolstream_providers::build_from_config(&config)?;
    let tools = Arc::new(toolstream_tools::default_registry(&config.search)?);

    let state = Arc::new(GatewayState {
        provider,
        tools,
        agent: config.agent.clone(),
    });
    let app = build_router(state, &config.gateway.allowed_origins);

    info!(addr = %addr, model = %config.default_model, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn bad_request(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

/// `POST /chat`: stream the steps of one orchestrator run.
///
/// The run is spawned as its own task and cancelled as soon as the client
/// goes away.
async fn chat_handler(
    State(state): State<SharedState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let Json(request) = payload.map_err(|e| bad_request(e.status(), e.body_text()))?;

    let question = request.content.trim().to_string();
    if question.is_empty() {
        return Err(bad_request(
            StatusCode::BAD_REQUEST,
            "content must not be empty",
        ));
    }

    let (sink, frames) = frame_channel(state.agent.stream_buffer);
    let orchestrator =
        Orchestrator::from_config(state.provider.clone(), state.tools.clone(), &state.agent);

    let span = info_span!("chat", request_id = %uuid::Uuid::new_v4());
    tokio::spawn(
        async move {
            info!(question_len = question.len(), "Chat run started");
            // The stream side closes itself after end-of-stream, so a
            // finished run must win over `closed()`.
            tokio::select! {
                biased;
                result = orchestrator.run(&question, &sink) => match result {
                    Ok(outcome) => info!(
                        steps = outcome.steps,
                        decision_rounds = outcome.decision_rounds,
                        "Chat run complete"
                    ),
                    Err(Error::Stream(_)) => warn!("Client disconnected during run"),
                    Err(e) => error!(error = %e, "Chat run failed, truncating stream"),
                },
                _ = sink.closed() => warn!("Client disconnected, run cancelled"),
            }
        }
        .instrument(span),
    );

    let body = Body::from_stream(toolstream_wire::encode_stream(frames).map(Ok::<_, Infallible>));

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use toolstream_config::SearchConfig;
    use toolstream_providers::{ScriptedDecision, ScriptedProvider};
    use tower::ServiceExt;

    fn test_state(script: Vec<ScriptedDecision>) -> SharedState {
        Arc::new(GatewayState {
            provider: Arc::new(ScriptedProvider::new(script)),
            tools: Arc::new(toolstream_tools::default_registry(&SearchConfig::default()).unwrap()),
            agent: AgentConfig::default(),
        })
    }

    fn app(script: Vec<ScriptedDecision>) -> Router {
        build_router(test_state(script), &["http://localhost:5173".to_string()])
    }

    fn chat_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app(vec![]).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn empty_question_is_rejected() {
        for content in ["", "   \n"] {
            let body = serde_json::json!({ "content": content }).to_string();
            let response = app(vec![]).oneshot(chat_request(&body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);

            let body = response.into_body().collect().await.unwrap().to_bytes();
            let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
            assert!(error.error.contains("empty"));
        }
    }

    #[tokio::test]
    async fn malformed_body_is_client_error() {
        let response = app(vec![]).oneshot(chat_request("{\"content\":")).await.unwrap();
        assert!(response.status().is_client_error());

        let response = app(vec![]).oneshot(chat_request("{\"question\":\"hi\"}")).await.unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn chat_streams_steps() {
        let app = app(vec![
            ScriptedDecision::new("multiply", serde_json::json!({"x": 6, "y": 7})),
            ScriptedDecision::final_answer("6 times 7 is 42.", &["multiply"]),
        ]);

        let response = app
            .oneshot(chat_request(r#"{"content":"What is 6 times 7?"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("<step><step_name>multiply</step_name>"));

        let output = toolstream_wire::reconstruct("What is 6 times 7?", [body.as_ref()]);
        assert!(output.is_complete());
        assert_eq!(output.final_answer.as_deref(), Some("6 times 7 is 42."));
        assert_eq!(output.steps.len(), 2);
    }

    #[tokio::test]
    async fn provider_failure_truncates_body() {
        // One decision, then the script runs dry: the run fails mid-stream.
        let app = app(vec![ScriptedDecision::new(
            "add",
            serde_json::json!({"x": 1, "y": 2}),
        )]);

        let response = app
            .oneshot(chat_request(r#"{"content":"1 + 2?"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let output = toolstream_wire::reconstruct("1 + 2?", [body.as_ref()]);
        assert_eq!(output.status, toolstream_wire::ChatStatus::Interrupted);
        assert_eq!(output.steps.len(), 1);
    }

    #[tokio::test]
    async fn cors_allows_configured_origin() {
        let req = Request::builder()
            .method("OPTIONS")
            .uri("/chat")
            .header("origin", "http://localhost:5173")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();

        let response = app(vec![]).oneshot(req).await.unwrap();
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:5173"
        );
    }

    #[tokio::test]
    async fn cors_ignores_other_origins() {
        let req = Request::builder()
            .method("OPTIONS")
            .uri("/chat")
            .header("origin", "http://evil.example")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();

        let response = app(vec![]).oneshot(req).await.unwrap();
        assert!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .is_none()
        );
    }

    #[tokio::test]
    async fn client_disconnect_cancels_run() {
        let mut script: Vec<ScriptedDecision> = (0..20)
            .map(|i| ScriptedDecision::new("add", serde_json::json!({"x": i, "y": 1})))
            .collect();
        script.push(ScriptedDecision::final_answer("done", &["add"]));
        let provider = Arc::new(
            ScriptedProvider::new(script).with_token_delay(std::time::Duration::from_millis(20)),
        );

        let state = Arc::new(GatewayState {
            provider: provider.clone(),
            tools: Arc::new(toolstream_tools::default_registry(&SearchConfig::default()).unwrap()),
            agent: AgentConfig::default(),
        });
        let response = build_router(state, &[])
            .oneshot(chat_request(r#"{"content":"count to twenty"}"#))
            .await
            .unwrap();

        let mut body = response.into_body();
        let first = body.frame().await.unwrap().unwrap();
        assert!(first.is_data());
        drop(body);

        // The run task holds the only other handle to the provider.
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        while Arc::strong_count(&provider) > 1 {
            assert!(tokio::time::Instant::now() < deadline, "run still alive");
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let calls = provider.call_count();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert_eq!(provider.call_count(), calls);
        assert!(calls < 21);
    }
}
