pub mod admission;
pub mod audit;
pub mod executor;
pub mod output;
pub mod query;
pub mod session;
pub mod workspace;

mod error;

pub use admission::{AdmissionControl, AdmissionPermit, InflightMap};
pub use audit::{AuditRecord, TracingAuditSink};
pub use error::{Error, Result};
pub use executor::{Bounded, ProgressEvent, ProgressStage, ProgressTrace};
pub use output::OutputReference;
pub use query::{
	EnrichedPack, OutcomeKind, QueryError, QueryErrorKind, QueryOutcome, QueryRequest,
	QueryResponse,
};
pub use session::{
	PlanRecord, PlanRecordRequest, PlanRecordResponse, SessionGetRequest, SessionResetRequest,
	SessionSnapshot, SessionStore,
};
pub use workspace::{ReindexRequest, WorkspaceStatusRequest, WorkspaceStatusResponse};

use std::{future::Future, pin::Pin, sync::Arc};

use scout_config::{Config, IndexProviderConfig, RetrievalProviderConfig};
use scout_domain::{
	index::{IndexStatus, ReindexReport},
	retrieval::{RetrievalQuery, RetrievalResponse},
};
use scout_providers::{index, retrieval};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait RetrievalBackend
where
	Self: Send + Sync,
{
	fn retrieve<'a>(
		&'a self,
		cfg: &'a RetrievalProviderConfig,
		query: &'a RetrievalQuery,
	) -> BoxFuture<'a, Result<RetrievalResponse>>;
}

pub trait IndexProvider
where
	Self: Send + Sync,
{
	/// `Ok(None)` means the workspace is not registered.
	fn status<'a>(
		&'a self,
		cfg: &'a IndexProviderConfig,
		workspace: &'a str,
	) -> BoxFuture<'a, Result<Option<IndexStatus>>>;

	fn reindex<'a>(
		&'a self,
		cfg: &'a IndexProviderConfig,
		workspace: &'a str,
	) -> BoxFuture<'a, Result<ReindexReport>>;
}

/// Fire-and-forget. Implementations must not block the caller.
pub trait AuditSink
where
	Self: Send + Sync,
{
	fn record(&self, record: AuditRecord);
}

#[derive(Clone)]
pub struct Providers {
	pub retrieval: Arc<dyn RetrievalBackend>,
	pub index: Arc<dyn IndexProvider>,
	pub audit: Arc<dyn AuditSink>,
}
impl Providers {
	pub fn new(
		retrieval: Arc<dyn RetrievalBackend>,
		index: Arc<dyn IndexProvider>,
		audit: Arc<dyn AuditSink>,
	) -> Self {
		Self { retrieval, index, audit }
	}
}
impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { retrieval: provider.clone(), index: provider, audit: Arc::new(TracingAuditSink) }
	}
}

pub struct ScoutService {
	pub cfg: Config,
	pub providers: Providers,
	pub sessions: SessionStore,
	pub admission: AdmissionControl,
	pub(crate) reindexes: InflightMap<String, Result<ReindexReport>>,
}
impl ScoutService {
	pub fn new(cfg: Config) -> Self {
		Self::with_providers(cfg, Providers::default())
	}

	pub fn with_providers(cfg: Config, providers: Providers) -> Self {
		let sessions = SessionStore::new(&cfg.session);
		let admission = AdmissionControl::new(&cfg.admission);

		Self { cfg, providers, sessions, admission, reindexes: InflightMap::new() }
	}
}

struct DefaultProviders;
impl RetrievalBackend for DefaultProviders {
	fn retrieve<'a>(
		&'a self,
		cfg: &'a RetrievalProviderConfig,
		query: &'a RetrievalQuery,
	) -> BoxFuture<'a, Result<RetrievalResponse>> {
		Box::pin(async move { Ok(retrieval::retrieve(cfg, query).await?) })
	}
}
impl IndexProvider for DefaultProviders {
	fn status<'a>(
		&'a self,
		cfg: &'a IndexProviderConfig,
		workspace: &'a str,
	) -> BoxFuture<'a, Result<Option<IndexStatus>>> {
		Box::pin(async move {
			index::status(cfg, workspace)
				.await
				.map_err(|err| Error::Index { message: err.to_string() })
		})
	}

	fn reindex<'a>(
		&'a self,
		cfg: &'a IndexProviderConfig,
		workspace: &'a str,
	) -> BoxFuture<'a, Result<ReindexReport>> {
		Box::pin(async move {
			index::reindex(cfg, workspace)
				.await
				.map_err(|err| Error::Index { message: err.to_string() })
		})
	}
}
