use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;

use crate::{
	Error, Result, ScoutService,
	audit::AuditRecord,
	executor::{self, Bounded, ProgressEvent, ProgressStage, ProgressTrace},
	output::{self, OutputReference},
	session,
};
use scout_domain::{
	confidence::{
		self, AggregateConfidence, ConfidenceBreakdown, ConfidenceThresholds, ConfidenceTier,
		ScoredPack,
	},
	fingerprint::QueryFingerprint,
	intent::{IntentType, QueryDepth},
	loop_detect::{Escalation, EscalationLevel, LoopDetection, LoopDetector, QueryRecord},
	pagination::{self, PageRequest, PaginationMetadata, StreamChunk},
	retrieval::{RetrievalPack, RetrievalQuery, RetrievalResponse, RetrievalStatus},
	review::{HumanReviewRecommendation, ReviewAdvisor, ReviewSignals},
};

pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.0;
pub const MAX_INTENT_CHARS: usize = 4_000;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueryRequest {
	pub intent: String,
	pub workspace: Option<String>,
	pub session_id: Option<String>,
	pub intent_type: Option<IntentType>,
	pub min_confidence: Option<f32>,
	pub depth: Option<QueryDepth>,
	pub page_size: Option<usize>,
	pub page_index: Option<usize>,
	pub output_file: Option<String>,
	#[serde(default)]
	pub stream: bool,
	pub stream_chunk_size: Option<usize>,
	/// Authenticated caller. Set by the transport, never read from the body.
	#[serde(skip)]
	pub caller_id: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryErrorKind {
	InvalidInput,
	WorkspaceNotRegistered,
	WorkspaceNotIndexed,
	Busy,
	RetrievalFailed,
	IndexUnavailable,
	OutputWriteFailed,
}
impl QueryErrorKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::InvalidInput => "invalid_input",
			Self::WorkspaceNotRegistered => "workspace_not_registered",
			Self::WorkspaceNotIndexed => "workspace_not_indexed",
			Self::Busy => "busy",
			Self::RetrievalFailed => "retrieval_failed",
			Self::IndexUnavailable => "index_unavailable",
			Self::OutputWriteFailed => "output_write_failed",
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryError {
	pub kind: QueryErrorKind,
	pub message: String,
	pub remediation: Option<String>,
	pub retry_after_ms: Option<u64>,
}
impl QueryError {
	pub fn from_error(err: &Error) -> Self {
		let (kind, remediation, retry_after_ms) = match err {
			Error::InvalidRequest { .. } | Error::NotFound { .. } =>
				(QueryErrorKind::InvalidInput, None, None),
			Error::WorkspaceNotRegistered { .. } => (
				QueryErrorKind::WorkspaceNotRegistered,
				Some("Register the workspace with the index service, then retry.".to_string()),
				None,
			),
			Error::WorkspaceNotIndexed { .. } => (
				QueryErrorKind::WorkspaceNotIndexed,
				Some(
					"Wait for the first index run to finish, or request a workspace reindex."
						.to_string(),
				),
				None,
			),
			Error::Busy { retry_after_ms } => (
				QueryErrorKind::Busy,
				Some(format!("Retry after {retry_after_ms} ms.")),
				Some(*retry_after_ms),
			),
			Error::Retrieval { .. } => (
				QueryErrorKind::RetrievalFailed,
				Some("Retry the query; if it keeps failing, check the retrieval backend.".to_string()),
				None,
			),
			Error::Index { .. } => (
				QueryErrorKind::IndexUnavailable,
				Some("Check that the index service is reachable.".to_string()),
				None,
			),
			Error::OutputWrite { .. } => (
				QueryErrorKind::OutputWriteFailed,
				Some("Choose a writable output_file or omit it to receive packs inline.".to_string()),
				None,
			),
		};

		Self { kind, message: err.message(), remediation, retry_after_ms }
	}
}

/// A retrieved pack plus its calibration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnrichedPack {
	#[serde(flatten)]
	pub pack: RetrievalPack,
	/// One-based position in the filtered result set.
	pub rank: usize,
	pub confidence_tier: ConfidenceTier,
	pub confidence_statement: String,
	pub verification_guidance: String,
	pub confidence_breakdown: ConfidenceBreakdown,
	pub retrieval_rationale: String,
}

/// One schema for every outcome. Optional parts serialize as `null` rather than disappearing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
	pub session_id: String,
	pub workspace: Option<String>,
	pub packs: Vec<EnrichedPack>,
	pub total_confidence: f32,
	pub retrieval_status: RetrievalStatus,
	pub retrieval_entropy: Option<f32>,
	pub aggregate_confidence: AggregateConfidence,
	pub loop_detection: Option<LoopDetection>,
	pub human_review_recommendation: Option<HumanReviewRecommendation>,
	pub escalation: Escalation,
	pub pagination: PaginationMetadata,
	pub progress: Vec<ProgressEvent>,
	pub stream: Option<Vec<StreamChunk<EnrichedPack>>>,
	pub output: Option<OutputReference>,
	pub timed_out: bool,
	pub partial: bool,
	pub disclosures: Vec<String>,
	pub trace_id: Option<String>,
	pub error: Option<QueryError>,
}
impl QueryResponse {
	fn failed(ctx: &CallContext, error: QueryError) -> Self {
		Self {
			session_id: ctx.session_id.clone(),
			workspace: ctx.workspace.clone(),
			packs: Vec::new(),
			total_confidence: 0.0,
			retrieval_status: RetrievalStatus::Insufficient,
			retrieval_entropy: None,
			aggregate_confidence: AggregateConfidence::empty(),
			loop_detection: ctx.loop_detection.clone(),
			human_review_recommendation: None,
			escalation: ctx.escalation,
			pagination: PaginationMetadata::new(0, PageRequest::default()),
			progress: Vec::new(),
			stream: None,
			output: None,
			timed_out: false,
			partial: false,
			disclosures: Vec::new(),
			trace_id: None,
			error: Some(error),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
	Complete,
	Degraded,
	Failed,
}
impl OutcomeKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Complete => "complete",
			Self::Degraded => "degraded",
			Self::Failed => "failed",
		}
	}
}

#[derive(Clone, Debug)]
pub enum QueryOutcome {
	Complete(Box<QueryResponse>),
	/// Timed out; the envelope is partial.
	Degraded(Box<QueryResponse>),
	/// `error` is always populated.
	Failed(Box<QueryResponse>),
}
impl QueryOutcome {
	pub fn kind(&self) -> OutcomeKind {
		match self {
			Self::Complete(_) => OutcomeKind::Complete,
			Self::Degraded(_) => OutcomeKind::Degraded,
			Self::Failed(_) => OutcomeKind::Failed,
		}
	}

	pub fn response(&self) -> &QueryResponse {
		match self {
			Self::Complete(response) | Self::Degraded(response) | Self::Failed(response) =>
				response,
		}
	}

	pub fn error(&self) -> Option<&QueryError> {
		self.response().error.as_ref()
	}

	/// Failure envelope for a request body that could not be decoded.
	pub fn malformed(message: impl Into<String>) -> Self {
		let ctx = CallContext {
			session_id: String::new(),
			workspace: None,
			escalation: Escalation {
				level: EscalationLevel::None,
				min_confidence: DEFAULT_MIN_CONFIDENCE,
				depth: QueryDepth::default(),
			},
			loop_detection: None,
		};

		ctx.fail(&Error::InvalidRequest { message: message.into() })
	}

	pub fn into_envelope(self) -> QueryResponse {
		match self {
			Self::Complete(response) | Self::Degraded(response) | Self::Failed(response) =>
				*response,
		}
	}

	fn response_mut(&mut self) -> &mut QueryResponse {
		match self {
			Self::Complete(response) | Self::Degraded(response) | Self::Failed(response) =>
				response,
		}
	}
}

/// What is known about the call so far, for building a failure envelope.
#[derive(Debug)]
struct CallContext {
	session_id: String,
	workspace: Option<String>,
	escalation: Escalation,
	loop_detection: Option<LoopDetection>,
}
impl CallContext {
	fn fail(&self, err: &Error) -> QueryOutcome {
		QueryOutcome::Failed(Box::new(QueryResponse::failed(self, QueryError::from_error(err))))
	}
}

struct ValidatedQuery {
	intent: String,
	min_confidence: f32,
	depth: QueryDepth,
	page: PageRequest,
	output_path: Option<PathBuf>,
}

enum Retrieved {
	Answered(RetrievalResponse),
	TimedOut { deadline_ms: u64 },
	Failed(Error),
}

#[derive(Serialize)]
struct OutputPayload<'a> {
	session_id: &'a str,
	packs: &'a [EnrichedPack],
	pagination: &'a PaginationMetadata,
	aggregate_confidence: &'a AggregateConfidence,
}

impl ScoutService {
	/// Never fails at the type level; every error is folded into the envelope.
	pub async fn query(&self, req: QueryRequest) -> QueryOutcome {
		let fingerprint = QueryFingerprint::new(&req.intent);
		let mut trace = ProgressTrace::start(json!({
			"intent_type": req.intent_type,
			"stream": req.stream,
			"output_file": req.output_file.is_some(),
		}));
		let mut outcome = self.execute(&req, &fingerprint, &mut trace).await;

		if let Some(error) = outcome.error() {
			trace.record(ProgressStage::Failed, json!({ "kind": error.kind }));
		}

		let elapsed_ms = trace.elapsed_ms();

		outcome.response_mut().progress = trace.into_events();

		self.audit_query(&outcome, &fingerprint, elapsed_ms);

		outcome
	}

	async fn execute(
		&self,
		req: &QueryRequest,
		fingerprint: &QueryFingerprint,
		trace: &mut ProgressTrace,
	) -> QueryOutcome {
		let mut ctx = CallContext {
			session_id: String::new(),
			workspace: None,
			escalation: Escalation {
				level: EscalationLevel::None,
				min_confidence: req.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
				depth: req.depth.unwrap_or_default(),
			},
			loop_detection: None,
		};
		let workspace = match self.resolve_workspace(req.workspace.as_deref()) {
			Ok(workspace) => workspace,
			Err(err) => return ctx.fail(&err),
		};

		ctx.workspace = Some(workspace.clone());

		let validated = match validate(req, &workspace) {
			Ok(validated) => validated,
			Err(err) => return ctx.fail(&err),
		};

		ctx.session_id =
			session::resolve_session_id(req.session_id.as_deref(), req.caller_id.as_deref(), &workspace);

		let _permit = match self.admission.try_acquire() {
			Ok(permit) => permit,
			Err(err) => {
				tracing::warn!(
					session_id = %ctx.session_id,
					in_flight = self.admission.in_flight(),
					"Query rejected by admission control."
				);

				return ctx.fail(&err);
			},
		};
		let status = match self.check_preconditions(&workspace).await {
			Ok(status) => status,
			Err(err) => return ctx.fail(&err),
		};
		let now = OffsetDateTime::now_utc();
		let now_ms = unix_ms(now);
		let index_stale = status.is_stale(now, self.stale_after());
		let detector = LoopDetector::new(&self.cfg.loop_detection);
		let counts = self.sessions.touch(&ctx.session_id, now, |session| {
			detector.count(&session.queries, fingerprint, &workspace, now_ms)
		});
		let escalation =
			detector.escalate(counts.futile, validated.min_confidence, validated.depth);

		ctx.escalation = escalation;

		if escalation.level != EscalationLevel::None {
			tracing::info!(
				session_id = %ctx.session_id,
				futile = counts.futile,
				min_confidence = escalation.min_confidence,
				depth = escalation.depth.as_str(),
				"Escalating repeated empty query."
			);
		}

		let query = RetrievalQuery {
			intent: validated.intent.clone(),
			normalized_intent: fingerprint.normalized.clone(),
			workspace: workspace.clone(),
			session_id: ctx.session_id.clone(),
			intent_type: req.intent_type,
			min_confidence: escalation.min_confidence,
			depth: escalation.depth,
		};
		let (mut response, timed_out) = match self.retrieve_bounded(query).await {
			Retrieved::Failed(err) => {
				tracing::warn!(
					session_id = %ctx.session_id,
					workspace = %workspace,
					error = %err,
					"Retrieval failed."
				);

				self.record_query(&ctx.session_id, fingerprint, &workspace, now_ms, 0, now);

				ctx.loop_detection = detector.classify(counts, 0);

				return ctx.fail(&err);
			},
			Retrieved::TimedOut { deadline_ms } => {
				tracing::warn!(
					session_id = %ctx.session_id,
					workspace = %workspace,
					deadline_ms,
					"Retrieval timed out."
				);
				trace.record(ProgressStage::TimedOut, json!({ "deadline_ms": deadline_ms }));

				(self.timeout_response(deadline_ms), true)
			},
			Retrieved::Answered(response) => (response, false),
		};
		let returned = response.packs.len();
		let floor = escalation.min_confidence;
		let packs: Vec<RetrievalPack> = std::mem::take(&mut response.packs)
			.into_iter()
			.filter(|pack| confidence::sanitize_score(pack.confidence) >= floor)
			.collect();

		if !timed_out {
			trace.record(
				ProgressStage::RetrievalComplete,
				json!({ "returned": returned, "kept": packs.len(), "min_confidence": floor }),
			);
		}

		self.record_query(&ctx.session_id, fingerprint, &workspace, now_ms, packs.len(), now);

		let loop_detection = detector.classify(counts, packs.len());

		if let Some(detection) = loop_detection.as_ref() {
			tracing::info!(
				session_id = %ctx.session_id,
				pattern = ?detection.pattern,
				occurrences = detection.occurrences,
				"Query loop detected."
			);
		}

		let thresholds = ConfidenceThresholds::from_config(&self.cfg.confidence);
		let scored: Vec<ScoredPack<'_>> =
			packs.iter().map(|pack| ScoredPack { id: &pack.id, score: pack.confidence }).collect();
		let aggregate = confidence::aggregate(&scored, &thresholds);
		let pack_scores: Vec<f32> = packs.iter().map(|pack| pack.confidence).collect();
		let review = ReviewAdvisor::from_config(&self.cfg).advise(&ReviewSignals {
			aggregate_tier: aggregate.tier,
			overall_score: aggregate.mean_score,
			pack_scores: &pack_scores,
			loop_occurrences: loop_detection.as_ref().map(|detection| detection.occurrences),
			intent: &validated.intent,
			intent_type: req.intent_type,
			index_stale,
		});
		let retrieval_status =
			response.retrieval_status.unwrap_or_else(|| RetrievalStatus::infer(packs.len()));
		let enriched = enrich(packs, &thresholds);

		if !timed_out {
			trace.record(
				ProgressStage::EnrichmentComplete,
				json!({ "tier": aggregate.tier, "review": review.is_some() }),
			);
		}

		let page = pagination::paginate_items(&enriched, validated.page);

		if !timed_out {
			trace.record(
				ProgressStage::PaginationApplied,
				json!({
					"page_index": page.metadata.page_index,
					"items": page.items.len(),
					"total_items": page.metadata.total_items,
				}),
			);
		}

		let stream = req.stream.then(|| pagination::chunk_items(&page.items, req.stream_chunk_size));
		let mut disclosures = std::mem::take(&mut response.disclosures);

		if escalation.level != EscalationLevel::None {
			disclosures.push(format!(
				"Search widened after {} empty repeats: min_confidence {:.2}, depth {}.",
				counts.futile,
				escalation.min_confidence,
				escalation.depth.as_str()
			));
		}

		let mut envelope = QueryResponse {
			session_id: ctx.session_id.clone(),
			workspace: Some(workspace.clone()),
			packs: page.items,
			total_confidence: confidence::sanitize_score(response.total_confidence),
			retrieval_status,
			retrieval_entropy: response.retrieval_entropy,
			aggregate_confidence: aggregate,
			loop_detection,
			human_review_recommendation: review,
			escalation,
			pagination: page.metadata,
			progress: Vec::new(),
			stream,
			output: None,
			timed_out,
			partial: timed_out,
			disclosures,
			trace_id: response.trace_id.take(),
			error: None,
		};

		if let Some(output_path) = validated.output_path.as_deref()
			&& let Err(err) = redirect_output(output_path, &mut envelope).await
		{
			tracing::warn!(
				session_id = %ctx.session_id,
				output_file = %output_path.display(),
				error = %err,
				"Failed to write query output file."
			);

			envelope.error = Some(QueryError::from_error(&err));

			return QueryOutcome::Failed(Box::new(envelope));
		}
		if timed_out {
			return QueryOutcome::Degraded(Box::new(envelope));
		}

		trace.record(ProgressStage::Ready, json!({ "packs": envelope.packs.len() }));

		QueryOutcome::Complete(Box::new(envelope))
	}

	async fn retrieve_bounded(&self, query: RetrievalQuery) -> Retrieved {
		let deadline = executor::internal_deadline(&self.cfg.executor);
		let backend = self.providers.retrieval.clone();
		let cfg = self.cfg.providers.retrieval.clone();
		let work = async move { backend.retrieve(&cfg, &query).await };

		match executor::run_bounded(work, deadline).await {
			Bounded::Completed(Ok(response)) => Retrieved::Answered(response),
			Bounded::Completed(Err(err)) => Retrieved::Failed(err),
			Bounded::Aborted(message) => Retrieved::Failed(Error::Retrieval { message }),
			Bounded::TimedOut => Retrieved::TimedOut {
				deadline_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
			},
		}
	}

	fn timeout_response(&self, deadline_ms: u64) -> RetrievalResponse {
		RetrievalResponse {
			retrieval_status: Some(RetrievalStatus::Insufficient),
			disclosures: vec![format!(
				"Retrieval timed out after {deadline_ms} ms (query timeout {} ms); no packs were returned.",
				self.cfg.executor.query_timeout_ms
			)],
			..RetrievalResponse::default()
		}
	}

	fn record_query(
		&self,
		session_id: &str,
		fingerprint: &QueryFingerprint,
		workspace: &str,
		timestamp_ms: i64,
		result_count: usize,
		now: OffsetDateTime,
	) {
		let record = QueryRecord::new(fingerprint, workspace, timestamp_ms, result_count);

		self.sessions.append_query(session_id, record, now);
	}

	fn audit_query(&self, outcome: &QueryOutcome, fingerprint: &QueryFingerprint, elapsed_ms: u64) {
		let response = outcome.response();
		let kind = outcome.kind();

		tracing::info!(
			session_id = %response.session_id,
			outcome = kind.as_str(),
			pack_count = response.pagination.total_items,
			elapsed_ms,
			"Query finished."
		);

		self.providers.audit.record(AuditRecord {
			session_id: response.session_id.clone(),
			workspace: response.workspace.clone(),
			intent_fingerprint: fingerprint.exact.clone(),
			outcome: kind.as_str().to_string(),
			error_kind: response.error.as_ref().map(|error| error.kind.as_str().to_string()),
			pack_count: response.pagination.total_items,
			elapsed_ms,
			timed_out: response.timed_out,
			recorded_at: OffsetDateTime::now_utc(),
		});
	}
}

fn validate(req: &QueryRequest, workspace: &str) -> Result<ValidatedQuery> {
	let intent = req.intent.trim();

	if intent.is_empty() {
		return Err(Error::InvalidRequest { message: "intent must be non-empty.".to_string() });
	}
	if intent.chars().count() > MAX_INTENT_CHARS {
		return Err(Error::InvalidRequest {
			message: format!("intent must be at most {MAX_INTENT_CHARS} characters."),
		});
	}

	let min_confidence = req.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE);

	if !min_confidence.is_finite() || !(0.0..=1.0).contains(&min_confidence) {
		return Err(Error::InvalidRequest {
			message: "min_confidence must be in the range 0.0-1.0.".to_string(),
		});
	}

	let output_path = match req.output_file.as_deref().map(str::trim) {
		Some("") =>
			return Err(Error::InvalidRequest {
				message: "output_file must be non-empty when provided.".to_string(),
			}),
		Some(output_file) => Some(output::resolve_output_path(workspace, output_file)?),
		None => None,
	};

	Ok(ValidatedQuery {
		intent: intent.to_string(),
		min_confidence,
		depth: req.depth.unwrap_or_default(),
		page: PageRequest { page_size: req.page_size, page_index: req.page_index },
		output_path,
	})
}

fn enrich(packs: Vec<RetrievalPack>, thresholds: &ConfidenceThresholds) -> Vec<EnrichedPack> {
	let total = packs.len();

	packs
		.into_iter()
		.enumerate()
		.map(|(position, pack)| {
			let rank = position + 1;
			let score = confidence::sanitize_score(pack.confidence);
			let tier = thresholds.classify(score);

			EnrichedPack {
				rank,
				confidence_tier: tier,
				confidence_statement: confidence::confidence_statement(tier, score),
				verification_guidance: confidence::verification_guidance(tier).to_string(),
				confidence_breakdown: ConfidenceBreakdown::derive(
					tier,
					pack.key_facts.len(),
					pack.related_files.len(),
				),
				retrieval_rationale: rationale(&pack, rank, total, score),
				pack,
			}
		})
		.collect()
}

fn rationale(pack: &RetrievalPack, rank: usize, total: usize, score: f32) -> String {
	let support = match (pack.key_facts.len(), pack.related_files.len()) {
		(0, 0) => "with no supporting facts or files".to_string(),
		(facts, files) => format!("with {facts} key facts across {files} related files"),
	};

	format!("Ranked {rank} of {total}: {} {} scored {score:.2} {support}.", pack.r#type, pack.target)
}

/// Writes the page to disk and swaps the inline packs for a reference.
async fn redirect_output(path: &Path, envelope: &mut QueryResponse) -> Result<()> {
	let payload = OutputPayload {
		session_id: &envelope.session_id,
		packs: &envelope.packs,
		pagination: &envelope.pagination,
		aggregate_confidence: &envelope.aggregate_confidence,
	};

	output::write_payload(path, &payload).await?;

	envelope.output = Some(OutputReference {
		path: path.display().to_string(),
		item_count: envelope.packs.len(),
		page_count: envelope.pagination.total_pages,
		pagination: envelope.pagination.clone(),
	});

	envelope.packs.clear();

	envelope.stream = None;

	Ok(())
}

fn unix_ms(now: OffsetDateTime) -> i64 {
	i64::try_from(now.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}
