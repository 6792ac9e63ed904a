use std::collections::BTreeSet;

use unicode_normalization::UnicodeNormalization;

/// Digests of one intent, computed once and compared against session history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryFingerprint {
	pub exact: String,
	pub semantic: String,
	pub normalized: String,
}
impl QueryFingerprint {
	pub fn new(intent: &str) -> Self {
		let normalized = normalize(intent);

		Self {
			exact: exact_fingerprint(&normalized),
			semantic: semantic_fingerprint(&normalized),
			normalized,
		}
	}
}

/// Lowercases and collapses every run of non-alphanumeric characters into one space.
pub fn normalize(text: &str) -> String {
	let mut out = String::with_capacity(text.len());
	let mut pending_gap = false;

	for ch in text.nfkc().flat_map(char::to_lowercase) {
		if ch.is_alphanumeric() {
			if pending_gap && !out.is_empty() {
				out.push(' ');
			}

			out.push(ch);

			pending_gap = false;
		} else {
			pending_gap = true;
		}
	}

	out
}

/// Digest of an already-normalized string.
pub fn exact_fingerprint(normalized: &str) -> String {
	digest(normalized)
}

/// Digest of the sorted, de-duplicated token set. Insensitive to order and repetition.
pub fn semantic_fingerprint(normalized: &str) -> String {
	let tokens: BTreeSet<&str> = normalized.split_whitespace().collect();
	let joined = tokens.into_iter().collect::<Vec<_>>().join(" ");

	digest(&joined)
}

/// Jaccard similarity of the token sets of two normalized strings.
///
/// Empty input on either side yields 0.0, even when both sides are empty.
pub fn similarity(a: &str, b: &str) -> f32 {
	let left: BTreeSet<&str> = a.split_whitespace().collect();
	let right: BTreeSet<&str> = b.split_whitespace().collect();

	if left.is_empty() || right.is_empty() {
		return 0.0;
	}
	if a == b {
		return 1.0;
	}

	let intersection = left.intersection(&right).count();
	let union = left.union(&right).count();

	intersection as f32 / union as f32
}

fn digest(text: &str) -> String {
	blake3::hash(text.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn normalize_collapses_punctuation_runs() {
		assert_eq!(normalize("  Where is `AuthService::login()` defined?? "), "where is authservice login defined");
	}

	#[test]
	fn normalize_folds_compatibility_forms() {
		assert_eq!(normalize("ＦＩＮＤ the Bug"), "find the bug");
	}

	#[test]
	fn semantic_fingerprint_ignores_repetition() {
		assert_eq!(
			semantic_fingerprint("auth bug auth bug"),
			semantic_fingerprint("bug auth")
		);
	}

	#[test]
	fn similarity_counts_shared_tokens() {
		let score = similarity("find auth bug", "find auth token bug");

		assert!((score - 0.75).abs() < 1e-6, "Unexpected similarity {score}.");
	}
}
