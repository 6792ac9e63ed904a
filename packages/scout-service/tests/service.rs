use std::{sync::Arc, time::Duration};

use scout_domain::{
	confidence::ConfidenceTier,
	index::{IndexState, IndexStatus},
	intent::{IntentType, QueryDepth},
	loop_detect::{EscalationLevel, LoopPattern},
	retrieval::RetrievalStatus,
	review::RiskLevel,
};
use scout_service::{
	Error, OutcomeKind, PlanRecordRequest, ProgressStage, QueryErrorKind, QueryRequest,
	ReindexRequest, SessionGetRequest, SessionResetRequest, WorkspaceStatusRequest,
};
use scout_testkit::{
	FailingRetrieval, PendingRetrieval, StaticIndex, StaticRetrieval, WORKSPACE, pack,
};

fn request(intent: &str) -> QueryRequest {
	QueryRequest {
		intent: intent.to_string(),
		session_id: Some("session-1".to_string()),
		..QueryRequest::default()
	}
}

fn stages(events: &[scout_service::ProgressEvent]) -> Vec<ProgressStage> {
	events.iter().map(|event| event.stage).collect()
}

#[tokio::test]
async fn complete_query_calibrates_and_paginates() {
	let retrieval = Arc::new(StaticRetrieval::new(vec![
		pack("login", 0.95),
		pack("session", 0.8),
		pack("cookie", 0.4),
		pack("noise", 0.1),
	]));
	let (service, audit) = scout_testkit::service(retrieval.clone(), Arc::new(StaticIndex::ready()));
	let mut req = request("how is the login flow wired");

	req.min_confidence = Some(0.3);
	req.page_size = Some(2);

	let outcome = service.query(req).await;

	assert_eq!(outcome.kind(), OutcomeKind::Complete);

	let envelope = outcome.into_envelope();

	assert!(envelope.error.is_none());
	assert_eq!(envelope.session_id, "session-1");
	assert_eq!(envelope.packs.len(), 2);
	assert_eq!(envelope.packs[0].rank, 1);
	assert_eq!(envelope.packs[0].confidence_tier, ConfidenceTier::Definitive);
	assert_eq!(envelope.packs[1].confidence_tier, ConfidenceTier::High);
	assert_eq!(envelope.pagination.total_items, 3);
	assert_eq!(envelope.pagination.showing, "Showing 1-2 of 3. Next: pageIdx=1. Total pages: 2.");
	assert_eq!(envelope.retrieval_status, RetrievalStatus::Sufficient);
	assert_eq!(envelope.aggregate_confidence.tier, ConfidenceTier::Medium);
	assert!(!envelope.timed_out);
	assert!(!envelope.partial);
	assert_eq!(
		stages(&envelope.progress),
		vec![
			ProgressStage::Started,
			ProgressStage::RetrievalComplete,
			ProgressStage::EnrichmentComplete,
			ProgressStage::PaginationApplied,
			ProgressStage::Ready,
		]
	);

	let sent = retrieval.last_query().expect("Expected a retrieval call.");

	assert_eq!(sent.workspace, WORKSPACE);
	assert_eq!(sent.normalized_intent, "how is the login flow wired");
	assert_eq!(sent.min_confidence, 0.3);
	assert_eq!(sent.depth, QueryDepth::Standard);

	let records = audit.records();

	assert_eq!(records.len(), 1);
	assert_eq!(records[0].outcome, "complete");
	assert_eq!(records[0].pack_count, 3);
}

#[tokio::test(start_paused = true)]
async fn never_resolving_retrieval_degrades() {
	let (service, audit) =
		scout_testkit::service(Arc::new(PendingRetrieval), Arc::new(StaticIndex::ready()));
	let outcome = service.query(request("where is the scheduler")).await;

	assert_eq!(outcome.kind(), OutcomeKind::Degraded);

	let envelope = outcome.into_envelope();

	assert!(envelope.timed_out);
	assert!(envelope.partial);
	assert!(envelope.packs.is_empty());
	assert!(envelope.error.is_none());
	assert_eq!(envelope.retrieval_status, RetrievalStatus::Insufficient);
	assert!(
		envelope.disclosures.iter().any(|text| text.contains("28000 ms")),
		"Missing timeout disclosure: {:?}",
		envelope.disclosures
	);
	assert_eq!(stages(&envelope.progress), vec![ProgressStage::Started, ProgressStage::TimedOut]);
	assert!(envelope.progress[1].elapsed_ms >= 28_000);
	assert!(audit.records()[0].timed_out);

	let snapshot = service
		.session_get(SessionGetRequest { session_id: "session-1".to_string() })
		.expect("Session should exist.");

	assert_eq!(snapshot.queries.len(), 1);
	assert_eq!(snapshot.queries[0].result_count, 0);
}

#[tokio::test]
async fn repeated_empty_queries_escalate() {
	let retrieval = Arc::new(StaticRetrieval::new(Vec::new()));
	let (service, _) = scout_testkit::service(retrieval.clone(), Arc::new(StaticIndex::ready()));
	let query = || {
		let mut req = request("find auth bug");

		req.min_confidence = Some(0.6);
		req.depth = Some(QueryDepth::Standard);

		req
	};

	for _ in 0..3 {
		let envelope = service.query(query()).await.into_envelope();

		assert_eq!(envelope.escalation.level, EscalationLevel::None);
	}

	let fourth = service.query(query()).await.into_envelope();
	let sent = retrieval.last_query().expect("Expected a retrieval call.");

	assert_eq!(fourth.escalation.level, EscalationLevel::Widened);
	assert!(sent.min_confidence <= 0.2);
	assert_eq!(sent.depth, QueryDepth::Deep);

	let detection = fourth.loop_detection.expect("Expected loop detection.");

	assert_eq!(detection.pattern, LoopPattern::FutileRepeat);
	assert!(detection.occurrences >= 3);
	assert!(detection.human_review_suggested);

	let review = fourth.human_review_recommendation.expect("Expected a review recommendation.");

	assert_eq!(review.risk_level, RiskLevel::High);
	assert!(review.blocking);

	let fifth = service.query(query()).await.into_envelope();
	let sent = retrieval.last_query().expect("Expected a retrieval call.");

	assert_eq!(fifth.escalation.level, EscalationLevel::Maximal);
	assert_eq!(sent.min_confidence, 0.0);
	assert_eq!(sent.depth, QueryDepth::BROADEST);
}

#[tokio::test]
async fn confident_benign_query_has_no_recommendation() {
	let (service, _) = scout_testkit::service(
		Arc::new(StaticRetrieval::new(vec![pack("pager", 0.95)])),
		Arc::new(StaticIndex::ready()),
	);
	let mut req = request("how does the pager split results");

	req.intent_type = Some(IntentType::Understand);

	let envelope = service.query(req).await.into_envelope();

	assert!(envelope.loop_detection.is_none());
	assert!(envelope.human_review_recommendation.is_none());
}

#[tokio::test]
async fn stale_index_with_refactor_intent_blocks() {
	let stale = IndexStatus {
		workspace: WORKSPACE.to_string(),
		state: IndexState::Stale,
		last_indexed_at: Some(1),
	};
	let (service, _) = scout_testkit::service(
		Arc::new(StaticRetrieval::new(vec![pack("pager", 0.95)])),
		Arc::new(StaticIndex::with_status(Some(stale))),
	);
	let mut req = request("where is the pager");

	req.intent_type = Some(IntentType::Refactor);

	let review = service
		.query(req)
		.await
		.into_envelope()
		.human_review_recommendation
		.expect("Expected a review recommendation.");

	assert_eq!(review.risk_level, RiskLevel::High);
	assert!(review.blocking);
}

#[tokio::test(start_paused = true)]
async fn admission_rejects_past_the_ceiling() {
	let mut cfg = scout_testkit::test_config();

	cfg.admission.max_in_flight = 1;
	cfg.admission.retry_after_ms = 75;

	let retrieval = Arc::new(
		StaticRetrieval::new(vec![pack("a", 0.9)]).delayed(Duration::from_millis(500)),
	);
	let (service, _) =
		scout_testkit::service_with_config(cfg, retrieval, Arc::new(StaticIndex::ready()));
	let (first, second) = tokio::join!(service.query(request("first query")), async {
		tokio::task::yield_now().await;

		service.query(request("second query")).await
	});

	assert_eq!(first.kind(), OutcomeKind::Complete);
	assert_eq!(second.kind(), OutcomeKind::Failed);

	let error = second.error().expect("Expected an error.");

	assert_eq!(error.kind, QueryErrorKind::Busy);
	assert_eq!(error.retry_after_ms, Some(75));
	assert_eq!(service.admission.in_flight(), 0);
}

#[tokio::test]
async fn collaborator_failure_keeps_the_envelope() {
	let (service, _) = scout_testkit::service(
		Arc::new(FailingRetrieval { message: "backend exploded".to_string() }),
		Arc::new(StaticIndex::ready()),
	);
	let outcome = service.query(request("find the cache")).await;

	assert_eq!(outcome.kind(), OutcomeKind::Failed);

	let envelope = outcome.into_envelope();
	let error = envelope.error.expect("Expected an error.");

	assert_eq!(error.kind, QueryErrorKind::RetrievalFailed);
	assert_eq!(error.message, "backend exploded");
	assert!(envelope.packs.is_empty());
	assert_eq!(envelope.session_id, "session-1");
	assert_eq!(envelope.progress.last().map(|event| event.stage), Some(ProgressStage::Failed));

	let snapshot = service
		.session_get(SessionGetRequest { session_id: "session-1".to_string() })
		.expect("Session should exist.");

	assert_eq!(snapshot.queries[0].result_count, 0);
}

#[tokio::test]
async fn preconditions_are_checked_before_the_session() {
	let (unregistered, _) = scout_testkit::service(
		Arc::new(StaticRetrieval::new(Vec::new())),
		Arc::new(StaticIndex::with_status(None)),
	);
	let error = unregistered
		.query(request("anything"))
		.await
		.error()
		.map(|error| error.kind);

	assert_eq!(error, Some(QueryErrorKind::WorkspaceNotRegistered));
	assert!(unregistered.sessions.is_empty());

	let pending = IndexStatus {
		workspace: WORKSPACE.to_string(),
		state: IndexState::Pending,
		last_indexed_at: None,
	};
	let (not_indexed, _) = scout_testkit::service(
		Arc::new(StaticRetrieval::new(Vec::new())),
		Arc::new(StaticIndex::with_status(Some(pending))),
	);
	let outcome = not_indexed.query(request("anything")).await;
	let error = outcome.error().expect("Expected an error.");

	assert_eq!(error.kind, QueryErrorKind::WorkspaceNotIndexed);
	assert!(error.remediation.is_some());
	assert!(not_indexed.sessions.is_empty());
}

#[tokio::test]
async fn input_errors_do_not_touch_sessions() {
	let retrieval = Arc::new(StaticRetrieval::new(Vec::new()));
	let (service, _) = scout_testkit::service(retrieval.clone(), Arc::new(StaticIndex::ready()));
	let outcome = service.query(request("   ")).await;

	assert_eq!(outcome.error().map(|error| error.kind), Some(QueryErrorKind::InvalidInput));

	let mut cfg = scout_testkit::test_config();

	cfg.service.default_workspace = None;

	let (no_default, _) = scout_testkit::service_with_config(
		cfg,
		retrieval.clone(),
		Arc::new(StaticIndex::ready()),
	);
	let outcome = no_default.query(request("find it")).await;

	assert_eq!(outcome.error().map(|error| error.kind), Some(QueryErrorKind::InvalidInput));
	assert!(service.sessions.is_empty());
	assert!(no_default.sessions.is_empty());
	assert_eq!(retrieval.calls(), 0);
}

#[tokio::test]
async fn caller_identity_names_the_session() {
	let (service, _) = scout_testkit::service(
		Arc::new(StaticRetrieval::new(Vec::new())),
		Arc::new(StaticIndex::ready()),
	);
	let mut req = request("find it");

	req.session_id = None;
	req.caller_id = Some("planner".to_string());

	let envelope = service.query(req).await.into_envelope();

	assert_eq!(envelope.session_id, "agent:planner");

	let anonymous = service
		.query(QueryRequest { intent: "find it".to_string(), ..QueryRequest::default() })
		.await
		.into_envelope();

	assert!(anonymous.session_id.starts_with("anon:"));
}

#[tokio::test]
async fn streaming_regroups_the_page() {
	let packs = (0..12).map(|i| pack(&format!("p{i}"), 0.8)).collect();
	let (service, _) =
		scout_testkit::service(Arc::new(StaticRetrieval::new(packs)), Arc::new(StaticIndex::ready()));
	let mut req = request("list handlers");

	req.page_size = Some(10);
	req.stream = true;
	req.stream_chunk_size = Some(4);

	let envelope = service.query(req).await.into_envelope();
	let chunks = envelope.stream.expect("Expected stream chunks.");
	let streamed: Vec<String> =
		chunks.iter().flat_map(|chunk| chunk.items.iter().map(|item| item.pack.id.clone())).collect();
	let paged: Vec<String> = envelope.packs.iter().map(|item| item.pack.id.clone()).collect();

	assert_eq!(chunks.len(), 3);
	assert!(chunks[2].is_last);
	assert_eq!(chunks[2].items.len(), 2);
	assert_eq!(streamed, paged);
}

#[tokio::test]
async fn output_file_replaces_inline_packs() {
	let workspace = std::env::temp_dir().join(format!("scout-output-{}", std::process::id()));
	let (service, _) = scout_testkit::service(
		Arc::new(StaticRetrieval::new(vec![pack("a", 0.9), pack("b", 0.7)])),
		Arc::new(StaticIndex::ready()),
	);
	let mut req = request("list handlers");

	req.workspace = Some(workspace.display().to_string());
	req.output_file = Some("nested/page.json".to_string());

	let outcome = service.query(req).await;

	assert_eq!(outcome.kind(), OutcomeKind::Complete);

	let envelope = outcome.into_envelope();
	let reference = envelope.output.expect("Expected an output reference.");
	let written = workspace.join("nested/page.json");

	assert!(envelope.packs.is_empty());
	assert_eq!(reference.item_count, 2);
	assert_eq!(reference.page_count, 1);
	assert_eq!(reference.path, written.display().to_string());

	let raw = tokio::fs::read(&written).await.expect("Output file should exist.");
	let payload: serde_json::Value = serde_json::from_slice(&raw).expect("Output is JSON.");

	assert_eq!(payload["packs"].as_array().map(Vec::len), Some(2));
	assert_eq!(payload["packs"][0]["id"], "a");

	let _ = tokio::fs::remove_dir_all(&workspace).await;
}

#[tokio::test]
async fn output_file_outside_the_workspace_is_rejected() {
	let retrieval = Arc::new(StaticRetrieval::new(vec![pack("a", 0.9)]));
	let (service, _) = scout_testkit::service(retrieval.clone(), Arc::new(StaticIndex::ready()));

	for output_file in ["../escape.json", "/etc/passwd", "nested/../../escape.json"] {
		let mut req = request("list handlers");

		req.output_file = Some(output_file.to_string());

		let outcome = service.query(req).await;

		assert_eq!(outcome.kind(), OutcomeKind::Failed);
		assert_eq!(outcome.error().map(|error| error.kind), Some(QueryErrorKind::InvalidInput));
	}

	assert!(service.sessions.is_empty());
	assert_eq!(retrieval.calls(), 0);
}

#[tokio::test]
async fn session_operations_round_out_the_history() {
	let (service, _) = scout_testkit::service(
		Arc::new(StaticRetrieval::new(vec![pack("a", 0.9)])),
		Arc::new(StaticIndex::ready()),
	);

	service.query(request("first")).await;
	service.query(request("second")).await;

	let plan = service
		.plan_record(PlanRecordRequest {
			session_id: "session-1".to_string(),
			intent: "fix login".to_string(),
			steps: vec!["read auth.rs".to_string(), " ".to_string(), "patch".to_string()],
		})
		.expect("Plan should be recorded.");

	assert_eq!(plan.plan_count, 1);
	assert_eq!(plan.plan.steps.len(), 2);

	let snapshot = service
		.session_get(SessionGetRequest { session_id: "session-1".to_string() })
		.expect("Session should exist.");

	assert_eq!(snapshot.request_count, 2);
	assert_eq!(snapshot.queries.len(), 2);
	assert_eq!(snapshot.plans.len(), 1);

	let reset = service
		.session_reset(SessionResetRequest { session_id: "session-1".to_string() })
		.expect("Session should reset.");

	assert!(reset.queries.is_empty());
	assert!(reset.plans.is_empty());
	assert_eq!(reset.request_count, 2);
	assert!(matches!(
		service.session_get(SessionGetRequest { session_id: "missing".to_string() }),
		Err(Error::NotFound { .. })
	));
}

#[tokio::test(start_paused = true)]
async fn concurrent_reindexes_share_one_call() {
	let index = Arc::new(StaticIndex::ready().reindex_delay(Duration::from_millis(200)));
	let (service, _) =
		scout_testkit::service(Arc::new(StaticRetrieval::new(Vec::new())), index.clone());
	let (a, b) = tokio::join!(
		service.reindex(ReindexRequest { workspace: None }),
		service.reindex(ReindexRequest { workspace: Some(WORKSPACE.to_string()) }),
	);

	assert_eq!(a.expect("reindex a").files_indexed, 42);
	assert_eq!(b.expect("reindex b").workspace, WORKSPACE);
	assert_eq!(index.reindex_calls(), 1);

	service
		.reindex(ReindexRequest { workspace: None })
		.await
		.expect("Follow-up reindex should run.");

	assert_eq!(index.reindex_calls(), 2);
}

#[tokio::test]
async fn workspace_status_reports_staleness() {
	let old = IndexStatus {
		workspace: WORKSPACE.to_string(),
		state: IndexState::Ready,
		last_indexed_at: Some(1_000),
	};
	let (service, _) = scout_testkit::service(
		Arc::new(StaticRetrieval::new(Vec::new())),
		Arc::new(StaticIndex::with_status(Some(old))),
	);
	let status = service
		.workspace_status(WorkspaceStatusRequest::default())
		.await
		.expect("Status should load.");

	assert!(status.registered);
	assert!(status.queryable);
	assert!(status.stale);

	let (unknown, _) = scout_testkit::service(
		Arc::new(StaticRetrieval::new(Vec::new())),
		Arc::new(StaticIndex::with_status(None)),
	);
	let status = unknown
		.workspace_status(WorkspaceStatusRequest { workspace: Some("/elsewhere".to_string()) })
		.await
		.expect("Status should load.");

	assert!(!status.registered);
	assert_eq!(status.workspace, "/elsewhere");
}
