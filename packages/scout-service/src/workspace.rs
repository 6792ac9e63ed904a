use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::{BoxFuture, Error, Result, ScoutService};
use scout_domain::index::{IndexState, IndexStatus, ReindexReport};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorkspaceStatusRequest {
	pub workspace: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceStatusResponse {
	pub workspace: String,
	pub registered: bool,
	pub state: Option<IndexState>,
	pub last_indexed_at: Option<i64>,
	pub age_secs: Option<i64>,
	pub queryable: bool,
	pub stale: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReindexRequest {
	pub workspace: Option<String>,
}

impl ScoutService {
	pub async fn workspace_status(
		&self,
		req: WorkspaceStatusRequest,
	) -> Result<WorkspaceStatusResponse> {
		let workspace = self.resolve_workspace(req.workspace.as_deref())?;
		let status =
			self.providers.index.status(&self.cfg.providers.index, &workspace).await?;
		let now = OffsetDateTime::now_utc();
		let Some(status) = status else {
			return Ok(WorkspaceStatusResponse {
				workspace,
				registered: false,
				state: None,
				last_indexed_at: None,
				age_secs: None,
				queryable: false,
				stale: false,
			});
		};

		Ok(WorkspaceStatusResponse {
			registered: true,
			state: Some(status.state),
			last_indexed_at: status.last_indexed_at,
			age_secs: status.age(now).map(|age| age.whole_seconds()),
			queryable: status.is_queryable(),
			stale: status.is_stale(now, self.stale_after()),
			workspace,
		})
	}

	/// Concurrent requests for the same workspace share one provider call.
	pub async fn reindex(&self, req: ReindexRequest) -> Result<ReindexReport> {
		let workspace = self.resolve_workspace(req.workspace.as_deref())?;
		let index = self.providers.index.clone();
		let cfg = self.cfg.providers.index.clone();
		let key = workspace.clone();

		self.reindexes
			.run_or_join(key, move || -> BoxFuture<'static, Result<ReindexReport>> {
				Box::pin(async move {
					tracing::info!(workspace = %workspace, "Workspace reindex started.");

					let report = index.reindex(&cfg, &workspace).await;

					match &report {
						Ok(report) => tracing::info!(
							workspace = %workspace,
							files_indexed = report.files_indexed,
							duration_ms = report.duration_ms,
							"Workspace reindex finished."
						),
						Err(err) => tracing::warn!(
							workspace = %workspace,
							error = %err,
							"Workspace reindex failed."
						),
					}

					report
				})
			})
			.await
	}

	pub(crate) fn resolve_workspace(&self, requested: Option<&str>) -> Result<String> {
		requested
			.map(str::trim)
			.filter(|workspace| !workspace.is_empty())
			.or(self.cfg.service.default_workspace.as_deref())
			.map(str::to_string)
			.ok_or_else(|| Error::InvalidRequest {
				message: "workspace is required when no default workspace is configured."
					.to_string(),
			})
	}

	/// Fails unless the workspace is registered and has completed at least one index run.
	pub(crate) async fn check_preconditions(&self, workspace: &str) -> Result<IndexStatus> {
		let status = self
			.providers
			.index
			.status(&self.cfg.providers.index, workspace)
			.await?
			.ok_or_else(|| Error::WorkspaceNotRegistered { workspace: workspace.to_string() })?;

		if !status.is_queryable() {
			return Err(Error::WorkspaceNotIndexed { workspace: workspace.to_string() });
		}

		Ok(status)
	}

	pub(crate) fn stale_after(&self) -> Duration {
		Duration::seconds(i64::try_from(self.cfg.review.stale_after_secs).unwrap_or(i64::MAX))
	}
}
