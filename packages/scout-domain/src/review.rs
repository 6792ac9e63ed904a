use serde::{Deserialize, Serialize};

use scout_config::Config;

use crate::{
	confidence::{CoarseConfidence, CoarseScale, ConfidenceTier},
	intent::{self, IntentType},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
	Low,
	Medium,
	High,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanReviewRecommendation {
	pub recommended: bool,
	pub reason: String,
	/// Always `low` or `uncertain`.
	pub confidence_tier: ConfidenceTier,
	pub risk_level: RiskLevel,
	pub blocking: bool,
}

/// Everything the advisor looks at for one call.
#[derive(Clone, Debug)]
pub struct ReviewSignals<'a> {
	pub aggregate_tier: ConfidenceTier,
	pub overall_score: f32,
	pub pack_scores: &'a [f32],
	pub loop_occurrences: Option<u32>,
	pub intent: &'a str,
	pub intent_type: Option<IntentType>,
	pub index_stale: bool,
}

#[derive(Clone, Debug)]
pub struct ReviewAdvisor {
	coarse: CoarseScale,
	loop_occurrence_threshold: u32,
}
impl ReviewAdvisor {
	pub fn new(coarse: CoarseScale, loop_occurrence_threshold: u32) -> Self {
		Self { coarse, loop_occurrence_threshold }
	}

	pub fn from_config(cfg: &Config) -> Self {
		Self::new(CoarseScale::from_config(&cfg.confidence), cfg.review.loop_occurrence_threshold)
	}

	/// Returns `None` when no signal fires.
	pub fn advise(&self, signals: &ReviewSignals<'_>) -> Option<HumanReviewRecommendation> {
		let mut decision = Decision::default();

		if signals.aggregate_tier <= ConfidenceTier::Low {
			decision.fire(
				format!("Aggregate confidence is {}.", signals.aggregate_tier),
				RiskLevel::Medium,
				true,
			);
		}
		if !signals.pack_scores.is_empty()
			&& signals
				.pack_scores
				.iter()
				.all(|score| self.coarse.classify(*score) == CoarseConfidence::Uncertain)
		{
			decision.fire(
				"Every pack falls in the uncertain band; none is clearly right or clearly wrong."
					.to_string(),
				RiskLevel::Medium,
				false,
			);
		}
		if let Some(occurrences) = signals.loop_occurrences
			&& occurrences >= self.loop_occurrence_threshold
		{
			decision.fire(
				format!("The session repeated this query {occurrences} times without progress."),
				RiskLevel::High,
				true,
			);
		}
		if intent::is_security_sensitive(signals.intent)
			&& self.coarse.classify(signals.overall_score) != CoarseConfidence::Strong
		{
			decision.fire(
				"The question touches security-sensitive code and confidence is not strong."
					.to_string(),
				RiskLevel::High,
				true,
			);
		}
		if signals.index_stale && intent::is_write_intent(signals.intent, signals.intent_type) {
			decision.fire(
				"The workspace index is stale and the intent is to change code.".to_string(),
				RiskLevel::High,
				true,
			);
		}

		decision.finish(signals.aggregate_tier)
	}
}

#[derive(Default)]
struct Decision {
	reasons: Vec<String>,
	risk: Option<RiskLevel>,
	blocking: bool,
}
impl Decision {
	fn fire(&mut self, reason: String, risk: RiskLevel, blocking: bool) {
		self.reasons.push(reason);

		self.risk = Some(self.risk.map_or(risk, |current| current.max(risk)));
		self.blocking |= blocking;
	}

	fn finish(self, aggregate_tier: ConfidenceTier) -> Option<HumanReviewRecommendation> {
		let risk_level = self.risk?;

		Some(HumanReviewRecommendation {
			recommended: true,
			reason: self.reasons.join(" "),
			confidence_tier: aggregate_tier.min(ConfidenceTier::Low),
			risk_level,
			blocking: self.blocking,
		})
	}
}
