use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub providers: Providers,
	#[serde(default)]
	pub session: Session,
	#[serde(default)]
	pub loop_detection: LoopDetection,
	#[serde(default)]
	pub confidence: Confidence,
	#[serde(default)]
	pub review: Review,
	#[serde(default)]
	pub executor: Executor,
	#[serde(default)]
	pub admission: Admission,
	pub security: Security,
	pub mcp: Option<McpContext>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub mcp_bind: String,
	pub log_level: String,
	/// Workspace used when a query does not name one.
	pub default_workspace: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Providers {
	pub retrieval: RetrievalProviderConfig,
	pub index: IndexProviderConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RetrievalProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: Option<String>,
	pub path: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct IndexProviderConfig {
	pub api_base: String,
	pub api_key: Option<String>,
	pub status_path: String,
	pub reindex_path: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Session {
	pub max_history: usize,
	pub max_plans: usize,
}
impl Default for Session {
	fn default() -> Self {
		Self { max_history: 50, max_plans: 20 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LoopDetection {
	pub window_secs: u64,
	pub exact_threshold: u32,
	pub semantic_threshold: u32,
	pub futile_threshold: u32,
	/// Token-set Jaccard similarity at or above which two intents count as a paraphrase.
	pub similarity_threshold: f32,
}
impl Default for LoopDetection {
	fn default() -> Self {
		Self {
			window_secs: 300,
			exact_threshold: 3,
			semantic_threshold: 4,
			futile_threshold: 3,
			similarity_threshold: 0.93,
		}
	}
}

/// Cut points are lower bounds. Out-of-order values are clamped by the calibrator, not rejected.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Confidence {
	pub definitive: f32,
	pub high: f32,
	pub medium: f32,
	pub low: f32,
	/// Coarse scale: scores at or below this are "low".
	pub coarse_low_max: f32,
	/// Coarse scale: scores above this are "strong".
	pub coarse_strong_min: f32,
}
impl Default for Confidence {
	fn default() -> Self {
		Self {
			definitive: 0.9,
			high: 0.75,
			medium: 0.5,
			low: 0.25,
			coarse_low_max: 0.3,
			coarse_strong_min: 0.6,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Review {
	pub stale_after_secs: u64,
	pub loop_occurrence_threshold: u32,
}
impl Default for Review {
	fn default() -> Self {
		Self { stale_after_secs: 86_400, loop_occurrence_threshold: 3 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Executor {
	/// Caller-visible timeout.
	pub query_timeout_ms: u64,
	/// Subtracted from the caller-visible timeout to form the internal deadline.
	pub safety_margin_ms: u64,
}
impl Default for Executor {
	fn default() -> Self {
		Self { query_timeout_ms: 30_000, safety_margin_ms: 2_000 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Admission {
	pub max_in_flight: usize,
	pub retry_after_ms: u64,
}
impl Default for Admission {
	fn default() -> Self {
		Self { max_in_flight: 8, retry_after_ms: 250 }
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct Security {
	pub bind_localhost_only: bool,
	#[serde(default = "default_auth_mode")]
	pub auth_mode: String,
	#[serde(default)]
	pub auth_keys: Vec<SecurityAuthKey>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SecurityAuthKey {
	pub token_id: String,
	pub token: String,
	pub agent_id: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct McpContext {
	pub agent_id: String,
	pub default_workspace: Option<String>,
}

fn default_auth_mode() -> String {
	"off".to_string()
}
