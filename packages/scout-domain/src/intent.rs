use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

const SECURITY_PATTERN: &str = r"(?i)\b(auth\w*|tokens?|crypto\w*|secrets?|passwords?|permissions?|access|delete|drop|rm)\b";
const WRITE_PATTERN: &str = r"(?i)\b(refactor\w*|renam\w*|modify\w*|modifi\w*|chang\w*|updat\w*|edit\w*|rewrit\w*|delet\w*|remov\w*|add|adding|implement\w*|fix\w*|migrat\w*|replac\w*|mov\w*|extract\w*|split\w*|merg\w*)\b";

static SECURITY_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(SECURITY_PATTERN).ok());
static WRITE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(WRITE_PATTERN).ok());

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
	Understand,
	Debug,
	AddFeature,
	Refactor,
	Impact,
	Security,
}
impl IntentType {
	/// Tags that declare an intent to change code.
	pub fn is_write(self) -> bool {
		matches!(self, Self::Refactor | Self::Impact)
	}
}

/// Retrieval breadth, ordered from narrowest to broadest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryDepth {
	Shallow,
	#[default]
	Standard,
	Deep,
}
impl QueryDepth {
	pub const BROADEST: Self = Self::Deep;

	/// One tier broader, saturating at `BROADEST`.
	pub fn widen(self) -> Self {
		match self {
			Self::Shallow => Self::Standard,
			Self::Standard | Self::Deep => Self::Deep,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Shallow => "shallow",
			Self::Standard => "standard",
			Self::Deep => "deep",
		}
	}
}

pub fn is_security_sensitive(intent: &str) -> bool {
	matches_pattern(&SECURITY_RE, intent)
}

pub fn is_write_intent(intent: &str, intent_type: Option<IntentType>) -> bool {
	if intent_type.map(IntentType::is_write).unwrap_or(false) {
		return true;
	}

	matches_pattern(&WRITE_RE, intent)
}

fn matches_pattern(re: &LazyLock<Option<Regex>>, text: &str) -> bool {
	re.as_ref().map(|re| re.is_match(text)).unwrap_or(false)
}
