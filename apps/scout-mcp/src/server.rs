use std::{net::SocketAddr, sync::Arc};

use axum::{
	Router,
	body::Body,
	extract::State,
	http::{HeaderMap, Request},
	middleware::{self, Next},
	response::IntoResponse,
};
use color_eyre::Result;
use reqwest::{Client, RequestBuilder, Url};
use rmcp::{
	ErrorData, ServerHandler,
	handler::server::router::tool::ToolRouter,
	model::{CallToolResult, JsonObject, ServerCapabilities, ServerInfo},
	transport::streamable_http_server::{
		StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
	},
};
use serde_json::Value;
use tokio::net::TcpListener;

use crate::McpAuthState;
use scout_config::McpContext;

pub const TOOL_QUERY: &str = "scout_query";
pub const TOOL_SESSION_GET: &str = "scout_session_get";
pub const TOOL_SESSION_RESET: &str = "scout_session_reset";
pub const TOOL_PLAN_RECORD: &str = "scout_plan_record";
pub const TOOL_WORKSPACE_STATUS: &str = "scout_workspace_status";
pub const TOOL_WORKSPACE_REINDEX: &str = "scout_workspace_reindex";

const HEADER_AGENT_ID: &str = "X-Scout-Agent-Id";
const HEADER_AUTHORIZATION: &str = "Authorization";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HttpMethod {
	Get,
	Post,
}

#[derive(Clone)]
struct ScoutContext {
	agent_id: String,
	default_workspace: Option<String>,
}
impl ScoutContext {
	fn new(cfg: &McpContext) -> Self {
		Self { agent_id: cfg.agent_id.clone(), default_workspace: cfg.default_workspace.clone() }
	}

	/// Fills `workspace` from the adapter config when the caller left it out.
	fn apply_default_workspace(&self, params: &mut JsonObject) {
		let missing = params.get("workspace").is_none_or(|value| match value {
			Value::Null => true,
			Value::String(text) => text.trim().is_empty(),
			_ => false,
		});

		if missing && let Some(workspace) = self.default_workspace.as_ref() {
			params.insert("workspace".to_string(), Value::String(workspace.clone()));
		}
	}
}

#[derive(Clone)]
struct ScoutMcp {
	api_base: String,
	client: Client,
	context: ScoutContext,
	auth_state: McpAuthState,
	tool_router: ToolRouter<Self>,
}
impl ScoutMcp {
	fn new(api_base: String, context: ScoutContext, auth_state: McpAuthState) -> Self {
		Self {
			api_base,
			client: Client::new(),
			context,
			auth_state,
			tool_router: Self::tool_router(),
		}
	}

	fn apply_context_headers(&self, builder: RequestBuilder) -> RequestBuilder {
		let builder = builder.header(HEADER_AGENT_ID, self.context.agent_id.as_str());

		match &self.auth_state {
			McpAuthState::Off => builder,
			McpAuthState::StaticKeys { bearer_token } =>
				builder.header(HEADER_AUTHORIZATION, format!("Bearer {bearer_token}")),
		}
	}

	async fn forward(
		&self,
		method: HttpMethod,
		segments: &[&str],
		params: JsonObject,
	) -> Result<CallToolResult, ErrorData> {
		let url = api_url(&self.api_base, segments)?;
		let builder = match method {
			HttpMethod::Post => self.client.post(url).json(&Value::Object(params)),
			HttpMethod::Get => self.client.get(url).query(&params_to_query(params)),
		};
		let response = self.apply_context_headers(builder).send().await.map_err(|err| {
			ErrorData::internal_error(format!("Scout API request failed: {err}"), None)
		})?;

		handle_response(response).await
	}
}

#[rmcp::tool_router]
impl ScoutMcp {
	#[rmcp::tool(
		name = "scout_query",
		description = "Retrieve confidence-scored context packs for an intent, with loop detection, review advice and pagination.",
		input_schema = query_schema()
	)]
	async fn scout_query(&self, mut params: JsonObject) -> Result<CallToolResult, ErrorData> {
		self.context.apply_default_workspace(&mut params);

		self.forward(HttpMethod::Post, &["v1", "query"], params).await
	}

	#[rmcp::tool(
		name = "scout_session_get",
		description = "Fetch a session snapshot: counters, recent queries and recorded plans.",
		input_schema = session_id_schema()
	)]
	async fn scout_session_get(&self, mut params: JsonObject) -> Result<CallToolResult, ErrorData> {
		let session_id = take_required_string(&mut params, "session_id")?;

		self.forward(HttpMethod::Get, &["v1", "sessions", &session_id], JsonObject::new()).await
	}

	#[rmcp::tool(
		name = "scout_session_reset",
		description = "Clear a session's query and plan history. Counters are kept.",
		input_schema = session_id_schema()
	)]
	async fn scout_session_reset(
		&self,
		mut params: JsonObject,
	) -> Result<CallToolResult, ErrorData> {
		let session_id = take_required_string(&mut params, "session_id")?;

		self.forward(HttpMethod::Post, &["v1", "sessions", &session_id, "reset"], JsonObject::new())
			.await
	}

	#[rmcp::tool(
		name = "scout_plan_record",
		description = "Record a plan (intent and ordered steps) against a session.",
		input_schema = plan_record_schema()
	)]
	async fn scout_plan_record(&self, mut params: JsonObject) -> Result<CallToolResult, ErrorData> {
		let session_id = take_required_string(&mut params, "session_id")?;

		self.forward(HttpMethod::Post, &["v1", "sessions", &session_id, "plans"], params).await
	}

	#[rmcp::tool(
		name = "scout_workspace_status",
		description = "Report whether a workspace is registered, indexed and stale.",
		input_schema = workspace_schema()
	)]
	async fn scout_workspace_status(
		&self,
		mut params: JsonObject,
	) -> Result<CallToolResult, ErrorData> {
		self.context.apply_default_workspace(&mut params);

		self.forward(HttpMethod::Get, &["v1", "workspaces", "status"], params).await
	}

	#[rmcp::tool(
		name = "scout_workspace_reindex",
		description = "Request a workspace reindex. Concurrent requests for one workspace share a run.",
		input_schema = workspace_schema()
	)]
	async fn scout_workspace_reindex(
		&self,
		mut params: JsonObject,
	) -> Result<CallToolResult, ErrorData> {
		self.context.apply_default_workspace(&mut params);

		self.forward(HttpMethod::Post, &["v1", "workspaces", "reindex"], params).await
	}
}

#[rmcp::tool_handler]
impl ServerHandler for ScoutMcp {
	fn get_info(&self) -> ServerInfo {
		ServerInfo {
			instructions: Some(
				"Scout MCP adapter that forwards tool calls to the Scout HTTP API.".to_string(),
			),
			capabilities: ServerCapabilities::builder().enable_tools().build(),
			..Default::default()
		}
	}
}

/// Names of every registered tool, sorted.
pub fn tool_names() -> Vec<String> {
	let mut names = ScoutMcp::tool_router()
		.list_all()
		.into_iter()
		.map(|tool| tool.name.to_string())
		.collect::<Vec<_>>();

	names.sort();

	names
}

pub async fn serve_mcp(
	bind_addr: &str,
	api_base: &str,
	auth_state: McpAuthState,
	mcp_context: &McpContext,
) -> Result<()> {
	let bind_addr: SocketAddr = bind_addr.parse()?;
	let api_base = normalize_api_base(api_base);
	let context = ScoutContext::new(mcp_context);
	let middleware_auth_state = auth_state.clone();
	let client_auth_state = auth_state.clone();
	let session_manager: Arc<LocalSessionManager> = Default::default();
	let listener = TcpListener::bind(bind_addr).await?;

	tracing::info!(%bind_addr, api_base = %api_base, "MCP server listening.");

	let service = StreamableHttpService::new(
		move || Ok(ScoutMcp::new(api_base.clone(), context.clone(), client_auth_state.clone())),
		session_manager,
		StreamableHttpServerConfig::default(),
	);
	let router = Router::new()
		.fallback_service(service)
		.layer(middleware::from_fn_with_state(middleware_auth_state, mcp_auth_middleware));

	axum::serve(listener, router).await?;

	Ok(())
}

fn is_authorized(headers: &HeaderMap, auth_state: &McpAuthState) -> bool {
	match auth_state {
		McpAuthState::Off => true,
		McpAuthState::StaticKeys { bearer_token } =>
			read_bearer_token(headers).is_some_and(|token| token == bearer_token),
	}
}

fn read_bearer_token(headers: &HeaderMap) -> Option<&str> {
	let raw = headers.get(HEADER_AUTHORIZATION)?;
	let value = raw.to_str().ok()?.trim();
	let token = value.strip_prefix("Bearer ")?.trim();

	if token.is_empty() { None } else { Some(token) }
}

fn normalize_api_base(raw: &str) -> String {
	let trimmed = raw.trim().trim_end_matches('/');
	let (scheme, rest) = if let Some(value) = trimmed.strip_prefix("http://") {
		("http://", value)
	} else if let Some(value) = trimmed.strip_prefix("https://") {
		("https://", value)
	} else {
		("http://", trimmed)
	};
	// scout-mcp runs next to scout-api; a wildcard bind is reached through loopback.
	let rest = if let Some(value) = rest.strip_prefix("0.0.0.0:") {
		format!("127.0.0.1:{value}")
	} else if let Some(value) = rest.strip_prefix("[::]:") {
		format!("127.0.0.1:{value}")
	} else {
		rest.to_string()
	};

	format!("{scheme}{rest}")
}

/// Segments are percent-encoded, so session ids may carry any character.
fn api_url(api_base: &str, segments: &[&str]) -> Result<Url, ErrorData> {
	let mut url = Url::parse(api_base).map_err(|err| {
		ErrorData::internal_error(format!("Invalid Scout API base {api_base}: {err}"), None)
	})?;

	url.path_segments_mut()
		.map_err(|_| {
			ErrorData::internal_error(format!("Scout API base {api_base} cannot carry a path."), None)
		})?
		.pop_if_empty()
		.extend(segments);

	Ok(url)
}

fn params_to_query(params: JsonObject) -> Vec<(String, String)> {
	params
		.into_iter()
		.filter_map(|(key, value)| match value {
			Value::Null => None,
			Value::String(text) => Some((key, text)),
			other => Some((key, other.to_string())),
		})
		.collect()
}

fn take_required_string(params: &mut JsonObject, key: &str) -> Result<String, ErrorData> {
	let value = params
		.remove(key)
		.ok_or_else(|| ErrorData::invalid_params(format!("{key} is required."), None))?;
	let text = value
		.as_str()
		.ok_or_else(|| ErrorData::invalid_params(format!("{key} must be a string."), None))?
		.trim();

	if text.is_empty() {
		return Err(ErrorData::invalid_params(format!("{key} must be non-empty."), None));
	}

	Ok(text.to_string())
}

fn query_schema() -> Arc<JsonObject> {
	Arc::new(rmcp::object!({
		"type": "object",
		"additionalProperties": false,
		"required": ["intent"],
		"properties": {
			"intent": { "type": "string" },
			"workspace": { "type": ["string", "null"] },
			"session_id": { "type": ["string", "null"] },
			"intent_type": {
				"type": ["string", "null"],
				"enum": ["understand", "debug", "add_feature", "refactor", "impact", "security", null]
			},
			"min_confidence": { "type": ["number", "null"], "minimum": 0, "maximum": 1 },
			"depth": { "type": ["string", "null"], "enum": ["shallow", "standard", "deep", null] },
			"page_size": { "type": ["integer", "null"], "minimum": 1, "maximum": 200 },
			"page_index": { "type": ["integer", "null"], "minimum": 0 },
			"output_file": { "type": ["string", "null"] },
			"stream": { "type": ["boolean", "null"] },
			"stream_chunk_size": { "type": ["integer", "null"], "minimum": 1, "maximum": 200 }
		}
	}))
}

fn session_id_schema() -> Arc<JsonObject> {
	Arc::new(rmcp::object!({
		"type": "object",
		"additionalProperties": false,
		"required": ["session_id"],
		"properties": {
			"session_id": { "type": "string" }
		}
	}))
}

fn plan_record_schema() -> Arc<JsonObject> {
	Arc::new(rmcp::object!({
		"type": "object",
		"additionalProperties": false,
		"required": ["session_id", "intent"],
		"properties": {
			"session_id": { "type": "string" },
			"intent": { "type": "string" },
			"steps": { "type": "array", "items": { "type": "string" }, "maxItems": 64 }
		}
	}))
}

fn workspace_schema() -> Arc<JsonObject> {
	Arc::new(rmcp::object!({
		"type": "object",
		"additionalProperties": false,
		"properties": {
			"workspace": { "type": ["string", "null"] }
		}
	}))
}

async fn handle_response(response: reqwest::Response) -> Result<CallToolResult, ErrorData> {
	let status = response.status();
	let bytes = response.bytes().await.map_err(|err| {
		ErrorData::internal_error(format!("Scout API response error: {err}"), None)
	})?;
	let parsed = serde_json::from_slice::<Value>(&bytes).unwrap_or_else(|_| {
		let raw = String::from_utf8_lossy(&bytes).to_string();

		serde_json::json!({ "raw": raw })
	});

	if status.is_success() {
		Ok(CallToolResult::structured(parsed))
	} else {
		Ok(CallToolResult::structured_error(parsed))
	}
}

async fn mcp_auth_middleware(
	State(auth_state): State<McpAuthState>,
	req: Request<Body>,
	next: Next,
) -> axum::response::Response {
	if !is_authorized(req.headers(), &auth_state) {
		return (
			axum::http::StatusCode::UNAUTHORIZED,
			"Authentication required for security.auth_mode=static_keys with a Bearer token.",
		)
			.into_response();
	}

	next.run(req).await
}
