use std::{sync::Arc, time::Duration};

use axum::{
	Router,
	body::{self, Body},
	http::{Request, StatusCode, header},
	response::Response,
};
use serde_json::Value;
use tower::util::ServiceExt;

use scout_api::{routes, state::AppState};
use scout_service::{IndexProvider, RetrievalBackend};
use scout_config::SecurityAuthKey;
use scout_testkit::{FailingRetrieval, StaticIndex, StaticRetrieval, pack};

fn app(retrieval: Arc<dyn RetrievalBackend>, index: Arc<dyn IndexProvider>) -> Router {
	let (service, _) = scout_testkit::service(retrieval, index);

	routes::router(AppState::from_service(service))
}

fn ready_app() -> Router {
	app(
		Arc::new(StaticRetrieval::new(vec![pack("a", 0.96), pack("b", 0.62)])),
		Arc::new(StaticIndex::ready()),
	)
}

fn post_json(uri: &str, payload: Value) -> Request<Body> {
	Request::builder()
		.method("POST")
		.uri(uri)
		.header("content-type", "application/json")
		.body(Body::from(payload.to_string()))
		.expect("Failed to build request.")
}

fn get(uri: &str) -> Request<Body> {
	Request::builder().uri(uri).body(Body::empty()).expect("Failed to build request.")
}

async fn json_body(response: Response) -> Value {
	let body = body::to_bytes(response.into_body(), usize::MAX)
		.await
		.expect("Failed to read response body.");

	serde_json::from_slice(&body).expect("Failed to parse response.")
}

#[tokio::test]
async fn health_ok() {
	let response = ready_app().oneshot(get("/health")).await.expect("Failed to call /health.");

	assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn query_returns_the_envelope() {
	let response = ready_app()
		.oneshot(post_json(
			"/v1/query",
			serde_json::json!({ "intent": "where is the login handler", "session_id": "s-1" }),
		))
		.await
		.expect("Failed to call query.");

	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(
		response.headers().get(routes::HEADER_OUTCOME).and_then(|value| value.to_str().ok()),
		Some("complete")
	);

	let json = json_body(response).await;

	assert_eq!(json["session_id"], "s-1");
	assert_eq!(json["packs"].as_array().map(Vec::len), Some(2));
	assert_eq!(json["packs"][0]["confidence_tier"], "definitive");
	assert_eq!(json["packs"][0]["rank"], 1);
	assert!(json["error"].is_null());
	assert_eq!(json["timed_out"], false);
}

#[tokio::test]
async fn undecodable_query_body_still_gets_an_envelope() {
	let response = ready_app()
		.oneshot(
			Request::builder()
				.method("POST")
				.uri("/v1/query")
				.header("content-type", "application/json")
				.body(Body::from("{ not json"))
				.expect("Failed to build request."),
		)
		.await
		.expect("Failed to call query.");

	assert_eq!(response.status(), StatusCode::BAD_REQUEST);

	let json = json_body(response).await;

	assert_eq!(json["error"]["kind"], "invalid_input");
	assert!(json["packs"].as_array().is_some_and(Vec::is_empty));
}

#[tokio::test]
async fn caller_header_names_the_session() {
	let app = ready_app();
	let request = Request::builder()
		.method("POST")
		.uri("/v1/query")
		.header("content-type", "application/json")
		.header("X-Scout-Agent-Id", "agent-7")
		.body(Body::from(serde_json::json!({ "intent": "find the router" }).to_string()))
		.expect("Failed to build request.");
	let response = app.clone().oneshot(request).await.expect("Failed to call query.");

	assert_eq!(json_body(response).await["session_id"], "agent:agent-7");

	let response =
		app.oneshot(get("/v1/sessions/agent:agent-7")).await.expect("Failed to get session.");

	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(json_body(response).await["request_count"], 1);
}

#[tokio::test]
async fn caller_id_in_the_body_is_ignored() {
	let response = ready_app()
		.oneshot(post_json(
			"/v1/query",
			serde_json::json!({ "intent": "find the router", "caller_id": "spoofed" }),
		))
		.await
		.expect("Failed to call query.");
	let json = json_body(response).await;
	let session_id = json["session_id"].as_str().unwrap_or_default();

	assert!(session_id.starts_with("anon:"), "unexpected session id {session_id}");
}

#[tokio::test]
async fn unregistered_workspace_is_a_conflict() {
	let response = app(
		Arc::new(StaticRetrieval::new(vec![pack("a", 0.9)])),
		Arc::new(StaticIndex::with_status(None)),
	)
	.oneshot(post_json("/v1/query", serde_json::json!({ "intent": "find the router" })))
	.await
	.expect("Failed to call query.");

	assert_eq!(response.status(), StatusCode::CONFLICT);
	assert_eq!(
		response.headers().get(routes::HEADER_OUTCOME).and_then(|value| value.to_str().ok()),
		Some("failed")
	);
	assert_eq!(json_body(response).await["error"]["kind"], "workspace_not_registered");
}

#[tokio::test]
async fn retrieval_failure_is_a_bad_gateway() {
	let response = app(
		Arc::new(FailingRetrieval { message: "backend exploded".to_string() }),
		Arc::new(StaticIndex::ready()),
	)
	.oneshot(post_json("/v1/query", serde_json::json!({ "intent": "find the router" })))
	.await
	.expect("Failed to call query.");

	assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

	let json = json_body(response).await;

	assert_eq!(json["error"]["kind"], "retrieval_failed");
	assert_eq!(json["error"]["message"], "backend exploded");
}

#[tokio::test]
async fn busy_queries_carry_retry_after() {
	let mut cfg = scout_testkit::test_config();

	cfg.admission.max_in_flight = 1;
	cfg.admission.retry_after_ms = 1_500;

	let retrieval = Arc::new(
		StaticRetrieval::new(vec![pack("a", 0.9)]).delayed(Duration::from_millis(300)),
	);
	let (service, _) = scout_testkit::service_with_config(
		cfg,
		retrieval.clone(),
		Arc::new(StaticIndex::ready()),
	);
	let app = routes::router(AppState::from_service(service));
	let (first, second) = tokio::join!(
		app.clone().oneshot(post_json("/v1/query", serde_json::json!({ "intent": "first" }))),
		async {
			while retrieval.calls() == 0 {
				tokio::task::yield_now().await;
			}

			app.clone()
				.oneshot(post_json("/v1/query", serde_json::json!({ "intent": "second" })))
				.await
		}
	);
	let first = first.expect("Failed to call query.");
	let second = second.expect("Failed to call query.");

	assert_eq!(first.status(), StatusCode::OK);
	assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
	assert_eq!(
		second.headers().get(header::RETRY_AFTER).and_then(|value| value.to_str().ok()),
		Some("2")
	);

	let json = json_body(second).await;

	assert_eq!(json["error"]["kind"], "busy");
	assert_eq!(json["error"]["retry_after_ms"], 1_500);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
	let response =
		ready_app().oneshot(get("/v1/sessions/missing")).await.expect("Failed to get session.");

	assert_eq!(response.status(), StatusCode::NOT_FOUND);
	assert_eq!(json_body(response).await["error_code"], "not_found");
}

#[tokio::test]
async fn plans_and_reset_round_trip() {
	let app = ready_app();
	let response = app
		.clone()
		.oneshot(post_json(
			"/v1/sessions/s-9/plans",
			serde_json::json!({ "intent": "Refactor the cache", "steps": ["read", " ", "edit"] }),
		))
		.await
		.expect("Failed to record plan.");

	assert_eq!(response.status(), StatusCode::OK);

	let json = json_body(response).await;

	assert_eq!(json["plan_count"], 1);
	assert_eq!(json["plan"]["steps"], serde_json::json!(["read", "edit"]));

	let response = app
		.clone()
		.oneshot(post_json("/v1/sessions/s-9/reset", serde_json::json!({})))
		.await
		.expect("Failed to reset session.");

	assert_eq!(response.status(), StatusCode::OK);
	assert!(json_body(response).await["plans"].as_array().is_some_and(Vec::is_empty));

	let response = app
		.oneshot(post_json("/v1/sessions/s-9/plans", serde_json::json!({ "intent": "  " })))
		.await
		.expect("Failed to record plan.");

	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	assert_eq!(json_body(response).await["error_code"], "invalid_request");
}

#[tokio::test]
async fn workspace_routes_report_status_and_reindex() {
	let app = ready_app();
	let response =
		app.clone().oneshot(get("/v1/workspaces/status")).await.expect("Failed to get status.");

	assert_eq!(response.status(), StatusCode::OK);

	let json = json_body(response).await;

	assert_eq!(json["workspace"], scout_testkit::WORKSPACE);
	assert_eq!(json["registered"], true);
	assert_eq!(json["queryable"], true);
	assert_eq!(json["stale"], false);

	let response = app
		.oneshot(post_json("/v1/workspaces/reindex", serde_json::json!({})))
		.await
		.expect("Failed to reindex.");

	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(json_body(response).await["files_indexed"], 42);
}

fn static_keys_app() -> Router {
	let mut cfg = scout_testkit::test_config();

	cfg.security.auth_mode = "static_keys".to_string();
	cfg.security.auth_keys = vec![SecurityAuthKey {
		token_id: "key-1".to_string(),
		token: "token-1".to_string(),
		agent_id: "builder".to_string(),
	}];

	let (service, _) = scout_testkit::service_with_config(
		cfg,
		Arc::new(StaticRetrieval::new(vec![pack("a", 0.9)])),
		Arc::new(StaticIndex::ready()),
	);

	routes::router(AppState::from_service(service))
}

#[tokio::test]
async fn static_keys_require_a_bearer_token() {
	let app = static_keys_app();
	let response = app.clone().oneshot(get("/health")).await.expect("Failed to call /health.");

	assert_eq!(response.status(), StatusCode::OK);

	let response = app
		.oneshot(post_json("/v1/query", serde_json::json!({ "intent": "find the router" })))
		.await
		.expect("Failed to call query.");

	assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
	assert_eq!(json_body(response).await["error_code"], "unauthorized");
}

#[tokio::test]
async fn static_key_decides_the_caller() {
	let request = Request::builder()
		.method("POST")
		.uri("/v1/query")
		.header("content-type", "application/json")
		.header(header::AUTHORIZATION, "Bearer token-1")
		.header("X-Scout-Agent-Id", "someone-else")
		.body(Body::from(serde_json::json!({ "intent": "find the router" }).to_string()))
		.expect("Failed to build request.");
	let response = static_keys_app().oneshot(request).await.expect("Failed to call query.");

	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(json_body(response).await["session_id"], "agent:builder");
}
