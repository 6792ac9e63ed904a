//! Scripted collaborators and a baseline config for exercising `ScoutService` without a network.

use std::{
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};

use serde_json::Map;
use time::OffsetDateTime;

use scout_config::{
	Admission, Confidence, Config, Executor, IndexProviderConfig, LoopDetection, Providers,
	RetrievalProviderConfig, Review, Security, Service, Session,
};
use scout_domain::{
	index::{IndexState, IndexStatus, ReindexReport},
	retrieval::{RetrievalPack, RetrievalQuery, RetrievalResponse},
};
use scout_service::{
	AuditRecord, AuditSink, BoxFuture, Error, IndexProvider, Result, RetrievalBackend, ScoutService,
};

pub const WORKSPACE: &str = "/srv/repos/scout";

pub fn test_config() -> Config {
	Config {
		service: Service {
			http_bind: "127.0.0.1:0".to_string(),
			mcp_bind: "127.0.0.1:0".to_string(),
			log_level: "info".to_string(),
			default_workspace: Some(WORKSPACE.to_string()),
		},
		providers: Providers {
			retrieval: RetrievalProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: None,
				path: "/v1/retrieve".to_string(),
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
			index: IndexProviderConfig {
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: None,
				status_path: "/v1/workspaces/status".to_string(),
				reindex_path: "/v1/workspaces/reindex".to_string(),
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
		},
		session: Session::default(),
		loop_detection: LoopDetection::default(),
		confidence: Confidence::default(),
		review: Review::default(),
		executor: Executor::default(),
		admission: Admission::default(),
		security: Security {
			bind_localhost_only: true,
			auth_mode: "off".to_string(),
			auth_keys: Vec::new(),
		},
		mcp: None,
	}
}

pub fn pack(id: &str, confidence: f32) -> RetrievalPack {
	RetrievalPack {
		id: id.to_string(),
		r#type: "function".to_string(),
		target: format!("src/{id}.rs::run"),
		summary: format!("Summary of {id}."),
		key_facts: vec![format!("{id} is reachable from main.")],
		related_files: vec![format!("src/{id}.rs")],
		confidence,
	}
}

pub fn response(packs: Vec<RetrievalPack>) -> RetrievalResponse {
	RetrievalResponse {
		total_confidence: packs.iter().map(|pack| pack.confidence).fold(0.0, f32::max),
		packs,
		..RetrievalResponse::default()
	}
}

/// Indexed a minute ago.
pub fn ready_status(workspace: &str) -> IndexStatus {
	IndexStatus {
		workspace: workspace.to_string(),
		state: IndexState::Ready,
		last_indexed_at: Some(now_secs() - 60),
	}
}

pub fn service(
	retrieval: Arc<dyn RetrievalBackend>,
	index: Arc<dyn IndexProvider>,
) -> (ScoutService, Arc<RecordingAudit>) {
	service_with_config(test_config(), retrieval, index)
}

pub fn service_with_config(
	cfg: Config,
	retrieval: Arc<dyn RetrievalBackend>,
	index: Arc<dyn IndexProvider>,
) -> (ScoutService, Arc<RecordingAudit>) {
	let audit = Arc::new(RecordingAudit::default());
	let providers = scout_service::Providers::new(retrieval, index, audit.clone());

	(ScoutService::with_providers(cfg, providers), audit)
}

/// Answers every call with the same response, optionally after a delay.
pub struct StaticRetrieval {
	response: RetrievalResponse,
	delay: Option<Duration>,
	calls: AtomicUsize,
	last_query: Mutex<Option<RetrievalQuery>>,
}
impl StaticRetrieval {
	pub fn new(packs: Vec<RetrievalPack>) -> Self {
		Self::with_response(response(packs))
	}

	pub fn with_response(response: RetrievalResponse) -> Self {
		Self { response, delay: None, calls: AtomicUsize::new(0), last_query: Mutex::new(None) }
	}

	pub fn delayed(mut self, delay: Duration) -> Self {
		self.delay = Some(delay);

		self
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	pub fn last_query(&self) -> Option<RetrievalQuery> {
		self.last_query.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}
}
impl RetrievalBackend for StaticRetrieval {
	fn retrieve<'a>(
		&'a self,
		_cfg: &'a RetrievalProviderConfig,
		query: &'a RetrievalQuery,
	) -> BoxFuture<'a, Result<RetrievalResponse>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		*self.last_query.lock().unwrap_or_else(|err| err.into_inner()) = Some(query.clone());

		let response = self.response.clone();
		let delay = self.delay;

		Box::pin(async move {
			if let Some(delay) = delay {
				tokio::time::sleep(delay).await;
			}

			Ok(response)
		})
	}
}

/// Never resolves.
pub struct PendingRetrieval;
impl RetrievalBackend for PendingRetrieval {
	fn retrieve<'a>(
		&'a self,
		_cfg: &'a RetrievalProviderConfig,
		_query: &'a RetrievalQuery,
	) -> BoxFuture<'a, Result<RetrievalResponse>> {
		Box::pin(std::future::pending::<Result<RetrievalResponse>>())
	}
}

pub struct FailingRetrieval {
	pub message: String,
}
impl RetrievalBackend for FailingRetrieval {
	fn retrieve<'a>(
		&'a self,
		_cfg: &'a RetrievalProviderConfig,
		_query: &'a RetrievalQuery,
	) -> BoxFuture<'a, Result<RetrievalResponse>> {
		let message = self.message.clone();

		Box::pin(async move { Err(Error::Retrieval { message }) })
	}
}

/// Reports a fixed status and counts reindex calls.
pub struct StaticIndex {
	status: Option<IndexStatus>,
	reindex_delay: Duration,
	reindex_calls: AtomicUsize,
}
impl StaticIndex {
	pub fn ready() -> Self {
		Self::with_status(Some(ready_status(WORKSPACE)))
	}

	pub fn with_status(status: Option<IndexStatus>) -> Self {
		Self { status, reindex_delay: Duration::ZERO, reindex_calls: AtomicUsize::new(0) }
	}

	pub fn reindex_delay(mut self, delay: Duration) -> Self {
		self.reindex_delay = delay;

		self
	}

	pub fn reindex_calls(&self) -> usize {
		self.reindex_calls.load(Ordering::SeqCst)
	}
}
impl IndexProvider for StaticIndex {
	fn status<'a>(
		&'a self,
		_cfg: &'a IndexProviderConfig,
		workspace: &'a str,
	) -> BoxFuture<'a, Result<Option<IndexStatus>>> {
		let status = self
			.status
			.clone()
			.map(|status| IndexStatus { workspace: workspace.to_string(), ..status });

		Box::pin(async move { Ok(status) })
	}

	fn reindex<'a>(
		&'a self,
		_cfg: &'a IndexProviderConfig,
		workspace: &'a str,
	) -> BoxFuture<'a, Result<ReindexReport>> {
		self.reindex_calls.fetch_add(1, Ordering::SeqCst);

		let delay = self.reindex_delay;

		Box::pin(async move {
			if !delay.is_zero() {
				tokio::time::sleep(delay).await;
			}

			Ok(ReindexReport {
				workspace: workspace.to_string(),
				state: IndexState::Ready,
				files_indexed: 42,
				duration_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
			})
		})
	}
}

#[derive(Default)]
pub struct RecordingAudit {
	records: Mutex<Vec<AuditRecord>>,
}
impl RecordingAudit {
	pub fn records(&self) -> Vec<AuditRecord> {
		self.records.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}
}
impl AuditSink for RecordingAudit {
	fn record(&self, record: AuditRecord) {
		self.records.lock().unwrap_or_else(|err| err.into_inner()).push(record);
	}
}

fn now_secs() -> i64 {
	OffsetDateTime::now_utc().unix_timestamp()
}
