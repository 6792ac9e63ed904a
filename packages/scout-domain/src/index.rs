use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
	Ready,
	Stale,
	Indexing,
	Pending,
}
impl IndexState {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Ready => "ready",
			Self::Stale => "stale",
			Self::Indexing => "indexing",
			Self::Pending => "pending",
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexStatus {
	pub workspace: String,
	pub state: IndexState,
	/// Unix seconds of the last completed index run.
	pub last_indexed_at: Option<i64>,
}
impl IndexStatus {
	/// A workspace that has never finished an index run cannot serve queries.
	pub fn is_queryable(&self) -> bool {
		match self.state {
			IndexState::Ready | IndexState::Stale => true,
			IndexState::Indexing => self.last_indexed_at.is_some(),
			IndexState::Pending => false,
		}
	}

	pub fn age(&self, now: OffsetDateTime) -> Option<Duration> {
		let last = OffsetDateTime::from_unix_timestamp(self.last_indexed_at?).ok()?;

		Some(now - last)
	}

	/// Stale when flagged explicitly or when the last run is older than `stale_after`.
	pub fn is_stale(&self, now: OffsetDateTime, stale_after: Duration) -> bool {
		if self.state == IndexState::Stale {
			return true;
		}

		self.age(now).map(|age| age > stale_after).unwrap_or(false)
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReindexReport {
	pub workspace: String,
	pub state: IndexState,
	#[serde(default)]
	pub files_indexed: u64,
	#[serde(default)]
	pub duration_ms: u64,
}
