//! Wire shapes exchanged with the retrieval backend.

use serde::{Deserialize, Serialize};

use crate::intent::{IntentType, QueryDepth};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalQuery {
	pub intent: String,
	pub normalized_intent: String,
	pub workspace: String,
	pub session_id: String,
	pub intent_type: Option<IntentType>,
	pub min_confidence: f32,
	pub depth: QueryDepth,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalPack {
	pub id: String,
	#[serde(rename = "type")]
	pub r#type: String,
	pub target: String,
	pub summary: String,
	#[serde(default)]
	pub key_facts: Vec<String>,
	#[serde(default)]
	pub related_files: Vec<String>,
	pub confidence: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStatus {
	Sufficient,
	Partial,
	#[default]
	Insufficient,
}
impl RetrievalStatus {
	/// Used when the backend does not report a status.
	pub fn infer(pack_count: usize) -> Self {
		if pack_count == 0 { Self::Insufficient } else { Self::Sufficient }
	}
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResponse {
	#[serde(default)]
	pub packs: Vec<RetrievalPack>,
	#[serde(default)]
	pub total_confidence: f32,
	pub retrieval_status: Option<RetrievalStatus>,
	pub retrieval_entropy: Option<f32>,
	#[serde(default)]
	pub disclosures: Vec<String>,
	pub trace_id: Option<String>,
}
