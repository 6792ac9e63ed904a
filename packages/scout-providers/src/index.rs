use reqwest::StatusCode;
use serde_json::Value;

use scout_config::IndexProviderConfig;
use scout_domain::index::{IndexStatus, ReindexReport};

use crate::{Error, Result};

/// Returns `None` when the index service does not know the workspace.
pub async fn status(cfg: &IndexProviderConfig, workspace: &str) -> Result<Option<IndexStatus>> {
	let client = crate::client(cfg.timeout_ms)?;
	let url = crate::join_url(&cfg.api_base, &cfg.status_path);
	let res = client
		.get(url)
		.headers(crate::auth_headers(cfg.api_key.as_deref(), &cfg.default_headers)?)
		.query(&[("workspace", workspace)])
		.send()
		.await?;

	if res.status() == StatusCode::NOT_FOUND {
		return Ok(None);
	}

	let json: Value = res.error_for_status()?.json().await?;

	parse_status_response(json, workspace)
}

pub async fn reindex(cfg: &IndexProviderConfig, workspace: &str) -> Result<ReindexReport> {
	let client = crate::client(cfg.timeout_ms)?;
	let url = crate::join_url(&cfg.api_base, &cfg.reindex_path);
	let res = client
		.post(url)
		.headers(crate::auth_headers(cfg.api_key.as_deref(), &cfg.default_headers)?)
		.json(&serde_json::json!({ "workspace": workspace }))
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_reindex_response(json, workspace)
}

/// A null body or `"registered": false` means the workspace is unknown.
pub fn parse_status_response(json: Value, workspace: &str) -> Result<Option<IndexStatus>> {
	let mut map = match json {
		Value::Object(map) => map,
		Value::Null => return Ok(None),
		_ =>
			return Err(Error::InvalidResponse {
				message: "Index status response must be a JSON object.".to_string(),
			}),
	};

	if map.get("registered").and_then(Value::as_bool) == Some(false) {
		return Ok(None);
	}

	map.entry("workspace").or_insert_with(|| Value::String(workspace.to_string()));

	Ok(Some(serde_json::from_value(Value::Object(map))?))
}

pub fn parse_reindex_response(json: Value, workspace: &str) -> Result<ReindexReport> {
	let Value::Object(mut map) = json else {
		return Err(Error::InvalidResponse {
			message: "Reindex response must be a JSON object.".to_string(),
		});
	};

	map.entry("workspace").or_insert_with(|| Value::String(workspace.to_string()));

	Ok(serde_json::from_value(Value::Object(map))?)
}

#[cfg(test)]
mod tests {
	use scout_domain::index::IndexState;

	use super::*;

	#[test]
	fn unregistered_workspace_is_none() {
		let parsed = parse_status_response(serde_json::json!({ "registered": false }), "/repo")
			.expect("parse failed");

		assert!(parsed.is_none());
		assert!(parse_status_response(Value::Null, "/repo").expect("parse failed").is_none());
	}

	#[test]
	fn fills_in_missing_workspace() {
		let parsed = parse_status_response(
			serde_json::json!({ "state": "indexing", "last_indexed_at": null }),
			"/repo",
		)
		.expect("parse failed")
		.expect("expected a status");

		assert_eq!(parsed.workspace, "/repo");
		assert_eq!(parsed.state, IndexState::Indexing);
		assert!(!parsed.is_queryable());
	}

	#[test]
	fn reindex_defaults_counters() {
		let report = parse_reindex_response(serde_json::json!({ "state": "ready" }), "/repo")
			.expect("parse failed");

		assert_eq!(report.files_indexed, 0);
		assert_eq!(report.state, IndexState::Ready);
	}
}
