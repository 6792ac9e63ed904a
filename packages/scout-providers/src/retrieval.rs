use serde_json::Value;

use scout_config::RetrievalProviderConfig;
use scout_domain::retrieval::{RetrievalQuery, RetrievalResponse};

use crate::{Error, Result};

pub async fn retrieve(
	cfg: &RetrievalProviderConfig,
	query: &RetrievalQuery,
) -> Result<RetrievalResponse> {
	let client = crate::client(cfg.timeout_ms)?;
	let url = crate::join_url(&cfg.api_base, &cfg.path);
	let body = serde_json::json!({
		"provider_id": cfg.provider_id,
		"intent": query.intent,
		"normalized_intent": query.normalized_intent,
		"workspace": query.workspace,
		"session_id": query.session_id,
		"intent_type": query.intent_type,
		"min_confidence": query.min_confidence,
		"depth": query.depth,
	});
	let res = client
		.post(url)
		.headers(crate::auth_headers(cfg.api_key.as_deref(), &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_retrieval_response(json)
}

/// Accepts either a bare response object or one wrapped in `data`.
pub fn parse_retrieval_response(json: Value) -> Result<RetrievalResponse> {
	let body = match json {
		Value::Object(mut map) if map.contains_key("data") && !map.contains_key("packs") =>
			map.remove("data").unwrap_or(Value::Null),
		other => other,
	};

	if !body.is_object() {
		return Err(Error::InvalidResponse {
			message: "Retrieval response must be a JSON object.".to_string(),
		});
	}

	let mut response: RetrievalResponse = serde_json::from_value(body)?;

	response.packs.retain(|pack| !pack.id.trim().is_empty());

	Ok(response)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unwraps_data_envelope() {
		let json = serde_json::json!({
			"data": {
				"packs": [{
					"id": "p1",
					"type": "function",
					"target": "src/auth.rs::login",
					"summary": "Validates credentials.",
					"key_facts": ["Hashes with argon2."],
					"confidence": 0.82
				}],
				"retrieval_status": "partial"
			}
		});
		let parsed = parse_retrieval_response(json).expect("parse failed");

		assert_eq!(parsed.packs.len(), 1);
		assert_eq!(parsed.packs[0].key_facts.len(), 1);
		assert_eq!(
			parsed.retrieval_status,
			Some(scout_domain::retrieval::RetrievalStatus::Partial)
		);
	}

	#[test]
	fn drops_packs_without_ids() {
		let json = serde_json::json!({
			"packs": [
				{ "id": " ", "type": "file", "target": "a", "summary": "", "confidence": 0.9 },
				{ "id": "b", "type": "file", "target": "b", "summary": "", "confidence": 0.4 }
			]
		});
		let parsed = parse_retrieval_response(json).expect("parse failed");

		assert_eq!(parsed.packs.len(), 1);
		assert_eq!(parsed.packs[0].id, "b");
	}

	#[test]
	fn rejects_non_object_bodies() {
		assert!(parse_retrieval_response(serde_json::json!([1, 2])).is_err());
	}
}
