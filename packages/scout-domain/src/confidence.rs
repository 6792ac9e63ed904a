use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use scout_config::Confidence;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
	Uncertain,
	Low,
	Medium,
	High,
	Definitive,
}
impl ConfidenceTier {
	/// Ordered from lowest to highest.
	pub const ALL: [Self; 5] =
		[Self::Uncertain, Self::Low, Self::Medium, Self::High, Self::Definitive];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Uncertain => "uncertain",
			Self::Low => "low",
			Self::Medium => "medium",
			Self::High => "high",
			Self::Definitive => "definitive",
		}
	}

	pub fn index(self) -> usize {
		self as usize
	}

	/// Steps down `steps` tiers, floored at `Uncertain`.
	pub fn downgrade(self, steps: usize) -> Self {
		Self::ALL[self.index().saturating_sub(steps)]
	}
}
impl fmt::Display for ConfidenceTier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Lower bounds for each tier above `Uncertain`. Always satisfies
/// `definitive >= high >= medium >= low`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConfidenceThresholds {
	definitive: f32,
	high: f32,
	medium: f32,
	low: f32,
}
impl ConfidenceThresholds {
	/// Each cut point is clamped against the next-higher one.
	pub fn new(definitive: f32, high: f32, medium: f32, low: f32) -> Self {
		let definitive = sanitize_score(definitive);
		let high = sanitize_score(high).min(definitive);
		let medium = sanitize_score(medium).min(high);
		let low = sanitize_score(low).min(medium);

		Self { definitive, high, medium, low }
	}

	pub fn from_config(cfg: &Confidence) -> Self {
		Self::new(cfg.definitive, cfg.high, cfg.medium, cfg.low)
	}

	pub fn definitive(&self) -> f32 {
		self.definitive
	}

	pub fn high(&self) -> f32 {
		self.high
	}

	pub fn medium(&self) -> f32 {
		self.medium
	}

	pub fn low(&self) -> f32 {
		self.low
	}

	pub fn classify(&self, score: f32) -> ConfidenceTier {
		let score = sanitize_score(score);

		for (cut, tier) in [
			(self.definitive, ConfidenceTier::Definitive),
			(self.high, ConfidenceTier::High),
			(self.medium, ConfidenceTier::Medium),
			(self.low, ConfidenceTier::Low),
		] {
			if score >= cut {
				return tier;
			}
		}

		ConfidenceTier::Uncertain
	}
}
impl Default for ConfidenceThresholds {
	fn default() -> Self {
		Self::from_config(&Confidence::default())
	}
}

/// Three-band scale used by review heuristics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoarseConfidence {
	Low,
	Uncertain,
	Strong,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoarseScale {
	low_max: f32,
	strong_min: f32,
}
impl CoarseScale {
	pub fn new(low_max: f32, strong_min: f32) -> Self {
		let low_max = sanitize_score(low_max);

		Self { low_max, strong_min: sanitize_score(strong_min).max(low_max) }
	}

	pub fn from_config(cfg: &Confidence) -> Self {
		Self::new(cfg.coarse_low_max, cfg.coarse_strong_min)
	}

	pub fn classify(&self, score: f32) -> CoarseConfidence {
		let score = sanitize_score(score);

		if score <= self.low_max {
			CoarseConfidence::Low
		} else if score <= self.strong_min {
			CoarseConfidence::Uncertain
		} else {
			CoarseConfidence::Strong
		}
	}
}
impl Default for CoarseScale {
	fn default() -> Self {
		Self::from_config(&Confidence::default())
	}
}

/// Per-part calibration of one pack.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
	pub retrieval: ConfidenceTier,
	pub summary: ConfidenceTier,
	pub key_facts: ConfidenceTier,
	pub related_files: ConfidenceTier,
}
impl ConfidenceBreakdown {
	pub fn derive(tier: ConfidenceTier, key_fact_count: usize, related_file_count: usize) -> Self {
		Self {
			retrieval: tier,
			summary: tier.downgrade(1),
			key_facts: if key_fact_count == 0 { ConfidenceTier::Uncertain } else { tier },
			related_files: if related_file_count == 0 { tier.downgrade(2) } else { tier.downgrade(1) },
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskiestPack {
	pub position: usize,
	pub pack_id: String,
	pub tier: ConfidenceTier,
	pub score: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregateConfidence {
	/// Classification of the mean raw score.
	pub tier: ConfidenceTier,
	pub mean_score: f32,
	/// Counts of individually classified packs. May disagree with `tier`.
	pub distribution: BTreeMap<ConfidenceTier, usize>,
	pub statement: String,
	pub riskiest: Option<RiskiestPack>,
}
impl AggregateConfidence {
	pub fn empty() -> Self {
		aggregate(&[], &ConfidenceThresholds::default())
	}
}

/// One scored entry in ranking order.
#[derive(Clone, Copy, Debug)]
pub struct ScoredPack<'a> {
	pub id: &'a str,
	pub score: f32,
}

pub fn aggregate(packs: &[ScoredPack<'_>], thresholds: &ConfidenceThresholds) -> AggregateConfidence {
	let mean_score = if packs.is_empty() {
		0.0
	} else {
		packs.iter().map(|pack| sanitize_score(pack.score)).sum::<f32>() / packs.len() as f32
	};
	let tier = thresholds.classify(mean_score);
	let mut distribution = BTreeMap::new();
	let mut riskiest: Option<RiskiestPack> = None;

	for (position, pack) in packs.iter().enumerate() {
		let pack_tier = thresholds.classify(pack.score);

		*distribution.entry(pack_tier).or_insert(0) += 1;

		if riskiest.as_ref().map(|current| pack_tier < current.tier).unwrap_or(true) {
			riskiest = Some(RiskiestPack {
				position,
				pack_id: pack.id.to_string(),
				tier: pack_tier,
				score: sanitize_score(pack.score),
			});
		}
	}

	let statement = distribution_statement(tier, mean_score, &distribution, packs.len());

	AggregateConfidence { tier, mean_score, distribution, statement, riskiest }
}

pub fn confidence_statement(tier: ConfidenceTier, score: f32) -> String {
	let score = sanitize_score(score);

	match tier {
		ConfidenceTier::Definitive =>
			format!("Definitive match (score {score:.2}); safe to act on directly."),
		ConfidenceTier::High =>
			format!("High confidence (score {score:.2}); spot-check before large edits."),
		ConfidenceTier::Medium =>
			format!("Medium confidence (score {score:.2}); treat as a lead, not a fact."),
		ConfidenceTier::Low =>
			format!("Low confidence (score {score:.2}); verify against source before use."),
		ConfidenceTier::Uncertain =>
			format!("Uncertain (score {score:.2}); likely unrelated to the question."),
	}
}

pub fn verification_guidance(tier: ConfidenceTier) -> &'static str {
	match tier {
		ConfidenceTier::Definitive => "No verification required.",
		ConfidenceTier::High => "Open one related file to confirm the summary.",
		ConfidenceTier::Medium =>
			"Read the related files and confirm each key fact before relying on it.",
		ConfidenceTier::Low =>
			"Re-derive the answer from source; use this pack only to locate files.",
		ConfidenceTier::Uncertain =>
			"Do not rely on this pack. Broaden the query or ask a human.",
	}
}

pub fn sanitize_score(score: f32) -> f32 {
	if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 }
}

fn distribution_statement(
	tier: ConfidenceTier,
	mean_score: f32,
	distribution: &BTreeMap<ConfidenceTier, usize>,
	total: usize,
) -> String {
	if total == 0 {
		return "No packs retrieved; overall confidence is uncertain.".to_string();
	}

	let parts: Vec<String> = distribution
		.iter()
		.rev()
		.map(|(pack_tier, count)| format!("{count} {pack_tier}"))
		.collect();
	let noun = if total == 1 { "pack" } else { "packs" };

	format!(
		"Mean confidence {mean_score:.2} ({tier}). Distribution: {} across {total} {noun}.",
		parts.join(", ")
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn downgrade_floors_at_uncertain() {
		assert_eq!(ConfidenceTier::High.downgrade(1), ConfidenceTier::Medium);
		assert_eq!(ConfidenceTier::Low.downgrade(3), ConfidenceTier::Uncertain);
		assert_eq!(ConfidenceTier::Uncertain.downgrade(1), ConfidenceTier::Uncertain);
	}

	#[test]
	fn non_finite_scores_are_uncertain() {
		let thresholds = ConfidenceThresholds::default();

		assert_eq!(thresholds.classify(f32::NAN), ConfidenceTier::Uncertain);
	}
}
