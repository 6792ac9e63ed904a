use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::AuditSink;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
	pub session_id: String,
	pub workspace: Option<String>,
	/// Exact fingerprint of the intent. The raw text is never audited.
	pub intent_fingerprint: String,
	pub outcome: String,
	pub error_kind: Option<String>,
	pub pack_count: usize,
	pub elapsed_ms: u64,
	pub timed_out: bool,
	#[serde(with = "time::serde::rfc3339")]
	pub recorded_at: OffsetDateTime,
}

/// Emits one `info` event per call on the `scout::audit` target.
pub struct TracingAuditSink;
impl AuditSink for TracingAuditSink {
	fn record(&self, record: AuditRecord) {
		tracing::info!(
			target: "scout::audit",
			session_id = %record.session_id,
			workspace = record.workspace.as_deref().unwrap_or(""),
			intent_fingerprint = %record.intent_fingerprint,
			outcome = %record.outcome,
			error_kind = record.error_kind.as_deref().unwrap_or(""),
			pack_count = record.pack_count,
			elapsed_ms = record.elapsed_ms,
			timed_out = record.timed_out,
			"Query audited."
		);
	}
}
