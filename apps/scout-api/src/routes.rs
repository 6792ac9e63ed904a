use axum::{
	Json, Router,
	body::{Body, Bytes},
	extract::{Path, Query, State},
	http::{HeaderMap, HeaderValue, Request, StatusCode, header},
	middleware::{self, Next},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use scout_service::{
	Error as ServiceError, OutcomeKind, PlanRecordRequest, PlanRecordResponse, QueryErrorKind,
	QueryOutcome, QueryRequest, ReindexRequest, SessionGetRequest, SessionResetRequest,
	SessionSnapshot, WorkspaceStatusRequest, WorkspaceStatusResponse,
};
use scout_domain::index::ReindexReport;

pub const HEADER_AGENT_ID: &str = "x-scout-agent-id";
pub const HEADER_OUTCOME: &str = "x-scout-outcome";

#[derive(Debug, Deserialize)]
struct PlanBody {
	intent: String,
	#[serde(default)]
	steps: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
	fields: Option<Vec<String>>,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
	fields: Option<Vec<String>>,
	retry_after_ms: Option<u64>,
}
impl ApiError {
	fn new(
		status: StatusCode,
		error_code: impl Into<String>,
		message: impl Into<String>,
		fields: Option<Vec<String>>,
	) -> Self {
		Self {
			status,
			error_code: error_code.into(),
			message: message.into(),
			fields,
			retry_after_ms: None,
		}
	}
}
impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		let message = err.message();

		match err {
			ServiceError::InvalidRequest { .. } =>
				json_error(StatusCode::BAD_REQUEST, "invalid_request", message, None),
			ServiceError::NotFound { .. } =>
				json_error(StatusCode::NOT_FOUND, "not_found", message, None),
			ServiceError::WorkspaceNotRegistered { .. } =>
				json_error(StatusCode::CONFLICT, "workspace_not_registered", message, None),
			ServiceError::WorkspaceNotIndexed { .. } =>
				json_error(StatusCode::CONFLICT, "workspace_not_indexed", message, None),
			ServiceError::Busy { retry_after_ms } => {
				let mut error = json_error(StatusCode::TOO_MANY_REQUESTS, "busy", message, None);

				error.retry_after_ms = Some(retry_after_ms);

				error
			},
			ServiceError::Retrieval { .. } =>
				json_error(StatusCode::BAD_GATEWAY, "retrieval_failed", message, None),
			ServiceError::Index { .. } =>
				json_error(StatusCode::BAD_GATEWAY, "index_unavailable", message, None),
			ServiceError::OutputWrite { .. } =>
				json_error(StatusCode::BAD_GATEWAY, "output_write_failed", message, None),
		}
	}
}
impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body =
			ErrorBody { error_code: self.error_code, message: self.message, fields: self.fields };
		let mut response = (self.status, Json(body)).into_response();

		if let Some(retry_after_ms) = self.retry_after_ms {
			response.headers_mut().insert(header::RETRY_AFTER, retry_after_value(retry_after_ms));
		}

		response
	}
}

/// `/health` stays open; every `/v1` route goes through the auth layer.
pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/v1/query", post(query))
		.route("/v1/sessions/{session_id}", get(session_get))
		.route("/v1/sessions/{session_id}/reset", post(session_reset))
		.route("/v1/sessions/{session_id}/plans", post(plan_record))
		.route("/v1/workspaces/status", get(workspace_status))
		.route("/v1/workspaces/reindex", post(workspace_reindex))
		.route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
		.route("/health", get(health))
		.with_state(state)
}

pub fn json_error(
	status: StatusCode,
	code: &str,
	message: impl Into<String>,
	fields: Option<Vec<String>>,
) -> ApiError {
	ApiError::new(status, code, message, fields)
}

/// HTTP status for a query outcome. Successful and degraded calls both answer 200.
pub fn outcome_status(outcome: &QueryOutcome) -> StatusCode {
	let Some(error) = outcome.error() else {
		return StatusCode::OK;
	};

	match error.kind {
		QueryErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
		QueryErrorKind::WorkspaceNotRegistered | QueryErrorKind::WorkspaceNotIndexed =>
			StatusCode::CONFLICT,
		QueryErrorKind::Busy => StatusCode::TOO_MANY_REQUESTS,
		QueryErrorKind::RetrievalFailed
		| QueryErrorKind::IndexUnavailable
		| QueryErrorKind::OutputWriteFailed => StatusCode::BAD_GATEWAY,
	}
}

async fn health() -> StatusCode {
	StatusCode::OK
}

/// Always answers with the query envelope, including for bodies that fail to decode.
async fn query(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
	let outcome = match serde_json::from_slice::<QueryRequest>(&body) {
		Ok(mut req) => {
			req.caller_id = caller_id(&headers);

			state.service.query(req).await
		},
		Err(err) => {
			tracing::debug!(error = %err, "Rejected undecodable query body.");

			QueryOutcome::malformed(format!("Request body is not a valid query: {err}"))
		},
	};
	let status = outcome_status(&outcome);
	let kind = outcome.kind();
	let retry_after_ms = outcome.error().and_then(|error| error.retry_after_ms);
	let mut response = (status, Json(outcome.into_envelope())).into_response();

	response.headers_mut().insert(HEADER_OUTCOME, outcome_value(kind));

	if let Some(retry_after_ms) = retry_after_ms {
		response.headers_mut().insert(header::RETRY_AFTER, retry_after_value(retry_after_ms));
	}

	response
}

async fn session_get(
	State(state): State<AppState>,
	Path(session_id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
	let response = state.service.session_get(SessionGetRequest { session_id })?;

	Ok(Json(response))
}

async fn session_reset(
	State(state): State<AppState>,
	Path(session_id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
	let response = state.service.session_reset(SessionResetRequest { session_id })?;

	Ok(Json(response))
}

async fn plan_record(
	State(state): State<AppState>,
	Path(session_id): Path<String>,
	Json(payload): Json<PlanBody>,
) -> Result<Json<PlanRecordResponse>, ApiError> {
	let response = state.service.plan_record(PlanRecordRequest {
		session_id,
		intent: payload.intent,
		steps: payload.steps,
	})?;

	Ok(Json(response))
}

async fn workspace_status(
	State(state): State<AppState>,
	Query(req): Query<WorkspaceStatusRequest>,
) -> Result<Json<WorkspaceStatusResponse>, ApiError> {
	let response = state.service.workspace_status(req).await?;

	Ok(Json(response))
}

async fn workspace_reindex(
	State(state): State<AppState>,
	Json(payload): Json<ReindexRequest>,
) -> Result<Json<ReindexReport>, ApiError> {
	let response = state.service.reindex(payload).await?;

	Ok(Json(response))
}

/// Under `static_keys` the matched key decides the caller, overriding any client-sent agent id.
async fn auth_middleware(
	State(state): State<AppState>,
	mut req: Request<Body>,
	next: Next,
) -> Response {
	let security = &state.service.cfg.security;

	if security.auth_mode != "static_keys" {
		return next.run(req).await;
	}

	let Some(key) = read_bearer_token(req.headers())
		.and_then(|token| security.auth_keys.iter().find(|key| key.token == token))
	else {
		return json_error(
			StatusCode::UNAUTHORIZED,
			"unauthorized",
			"A valid Bearer token is required when security.auth_mode=static_keys.",
			None,
		)
		.into_response();
	};
	let agent_id = match HeaderValue::from_str(&key.agent_id) {
		Ok(value) => value,
		Err(_) => {
			tracing::error!(
				token_id = %key.token_id,
				"Auth key agent_id is not a valid header value."
			);

			return json_error(
				StatusCode::INTERNAL_SERVER_ERROR,
				"auth_misconfigured",
				"The matched auth key has an unusable agent_id.",
				None,
			)
			.into_response();
		},
	};

	req.headers_mut().insert(HEADER_AGENT_ID, agent_id);

	next.run(req).await
}

fn read_bearer_token(headers: &HeaderMap) -> Option<&str> {
	let raw = headers.get(header::AUTHORIZATION)?;
	let token = raw.to_str().ok()?.trim().strip_prefix("Bearer ")?.trim();

	if token.is_empty() { None } else { Some(token) }
}

fn caller_id(headers: &HeaderMap) -> Option<String> {
	headers
		.get(HEADER_AGENT_ID)
		.and_then(|value| value.to_str().ok())
		.map(str::trim)
		.filter(|value| !value.is_empty())
		.map(str::to_string)
}

fn outcome_value(kind: OutcomeKind) -> HeaderValue {
	HeaderValue::from_static(kind.as_str())
}

/// Whole seconds, rounded up, never zero.
fn retry_after_value(retry_after_ms: u64) -> HeaderValue {
	HeaderValue::from(retry_after_ms.div_ceil(1_000).max(1))
}
