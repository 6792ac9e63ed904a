use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use scout_config::LoopDetection as LoopDetectionConfig;

use crate::{
	fingerprint::{self, QueryFingerprint},
	intent::QueryDepth,
};

/// Floor applied on the first escalation step.
pub const WIDENED_MIN_CONFIDENCE: f32 = 0.2;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRecord {
	pub exact_fingerprint: String,
	pub semantic_fingerprint: String,
	pub normalized_intent: String,
	pub timestamp_ms: i64,
	pub result_count: usize,
	pub workspace: String,
}
impl QueryRecord {
	pub fn new(
		fingerprint: &QueryFingerprint,
		workspace: &str,
		timestamp_ms: i64,
		result_count: usize,
	) -> Self {
		Self {
			exact_fingerprint: fingerprint.exact.clone(),
			semantic_fingerprint: fingerprint.semantic.clone(),
			normalized_intent: fingerprint.normalized.clone(),
			timestamp_ms,
			result_count,
			workspace: workspace.to_string(),
		}
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopCounts {
	pub exact: u32,
	pub semantic: u32,
	/// Exact matches whose recorded result count was zero.
	pub futile: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPattern {
	IdenticalQuery,
	SemanticRepeat,
	FutileRepeat,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternativeStrategy {
	pub operation: String,
	pub rationale: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopDetection {
	pub pattern: LoopPattern,
	pub occurrences: u32,
	pub window_secs: u64,
	pub message: String,
	pub alternatives: Vec<AlternativeStrategy>,
	pub human_review_suggested: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
	#[default]
	None,
	Widened,
	Maximal,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
	pub level: EscalationLevel,
	pub min_confidence: f32,
	pub depth: QueryDepth,
}

#[derive(Clone, Debug)]
pub struct LoopDetector {
	window_ms: i64,
	window_secs: u64,
	exact_threshold: u32,
	semantic_threshold: u32,
	futile_threshold: u32,
	similarity_threshold: f32,
}
impl LoopDetector {
	pub fn new(cfg: &LoopDetectionConfig) -> Self {
		Self {
			window_ms: i64::try_from(cfg.window_secs.saturating_mul(1_000)).unwrap_or(i64::MAX),
			window_secs: cfg.window_secs,
			exact_threshold: cfg.exact_threshold,
			semantic_threshold: cfg.semantic_threshold,
			futile_threshold: cfg.futile_threshold,
			similarity_threshold: cfg.similarity_threshold,
		}
	}

	pub fn futile_threshold(&self) -> u32 {
		self.futile_threshold
	}

	/// Counts prior records for the same workspace inside the window ending at `now_ms`.
	pub fn count<'a, I>(
		&self,
		history: I,
		fingerprint: &QueryFingerprint,
		workspace: &str,
		now_ms: i64,
	) -> LoopCounts
	where
		I: IntoIterator<Item = &'a QueryRecord>,
	{
		let window_start = now_ms.saturating_sub(self.window_ms);
		let mut counts = LoopCounts::default();

		for record in history {
			if record.workspace != workspace || record.timestamp_ms < window_start {
				continue;
			}

			let exact = record.exact_fingerprint == fingerprint.exact;

			if exact {
				counts.exact += 1;

				if record.result_count == 0 {
					counts.futile += 1;
				}
			}
			if record.semantic_fingerprint == fingerprint.semantic
				|| fingerprint::similarity(&record.normalized_intent, &fingerprint.normalized)
					>= self.similarity_threshold
			{
				counts.semantic += 1;
			}
		}

		counts
	}

	/// Futile repeats win only when the current call also came back empty.
	pub fn classify(&self, counts: LoopCounts, current_result_count: usize) -> Option<LoopDetection> {
		if current_result_count == 0 && counts.futile >= self.futile_threshold {
			return Some(self.futile_repeat(counts.futile));
		}
		if counts.exact >= self.exact_threshold {
			return Some(self.identical_query(counts.exact));
		}
		if counts.semantic >= self.semantic_threshold {
			return Some(self.semantic_repeat(counts.semantic));
		}

		None
	}

	/// Widens the outgoing query based on the futile count observed before execution.
	pub fn escalate(&self, futile: u32, min_confidence: f32, depth: QueryDepth) -> Escalation {
		if futile > self.futile_threshold {
			return Escalation {
				level: EscalationLevel::Maximal,
				min_confidence: 0.0,
				depth: QueryDepth::BROADEST,
			};
		}
		if futile == self.futile_threshold {
			return Escalation {
				level: EscalationLevel::Widened,
				min_confidence: min_confidence.min(WIDENED_MIN_CONFIDENCE),
				depth: depth.widen(),
			};
		}

		Escalation { level: EscalationLevel::None, min_confidence, depth }
	}

	fn futile_repeat(&self, occurrences: u32) -> LoopDetection {
		LoopDetection {
			pattern: LoopPattern::FutileRepeat,
			occurrences,
			window_secs: self.window_secs,
			message: format!(
				"This exact query returned no results {occurrences} times in the last {}s. Repeating it will not help.",
				self.window_secs
			),
			alternatives: vec![
				alternative(
					"graph_traverse",
					"Start from a known symbol and walk callers or callees instead of searching by text.",
				),
				alternative(
					"workspace_reindex",
					"The index may not cover the code you expect; rebuild it before querying again.",
				),
				alternative(
					"ask_human",
					"The answer may not exist in this workspace; ask the user where to look.",
				),
			],
			human_review_suggested: true,
		}
	}

	fn identical_query(&self, occurrences: u32) -> LoopDetection {
		LoopDetection {
			pattern: LoopPattern::IdenticalQuery,
			occurrences,
			window_secs: self.window_secs,
			message: format!(
				"This exact query ran {occurrences} times in the last {}s. Reuse the earlier result or change the question.",
				self.window_secs
			),
			alternatives: vec![
				alternative(
					"session_get",
					"Earlier results are still valid; read them back instead of re-running the query.",
				),
				alternative(
					"file_outline",
					"Inspect the related files directly to get detail the summary omits.",
				),
			],
			human_review_suggested: false,
		}
	}

	fn semantic_repeat(&self, occurrences: u32) -> LoopDetection {
		LoopDetection {
			pattern: LoopPattern::SemanticRepeat,
			occurrences,
			window_secs: self.window_secs,
			message: format!(
				"{occurrences} near-identical phrasings of this query ran in the last {}s. Rewording alone is unlikely to change the result.",
				self.window_secs
			),
			alternatives: vec![
				alternative(
					"symbol_search",
					"Query by a concrete identifier, path, or error string rather than prose.",
				),
				alternative(
					"graph_traverse",
					"Follow references from a related pack's target to reach adjacent code.",
				),
			],
			human_review_suggested: false,
		}
	}
}

/// Appends and evicts from the front until `history.len() <= max`.
pub fn append_record(history: &mut VecDeque<QueryRecord>, record: QueryRecord, max: usize) {
	history.push_back(record);

	while history.len() > max {
		history.pop_front();
	}
}

fn alternative(operation: &str, rationale: &str) -> AlternativeStrategy {
	AlternativeStrategy { operation: operation.to_string(), rationale: rationale.to_string() }
}
