use std::{
	collections::{HashMap, VecDeque},
	sync::Mutex,
};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result, ScoutService};
use scout_domain::loop_detect::{self, QueryRecord};

const ANON_DIGEST_HEX_LEN: usize = 16;
const MAX_PLAN_STEPS: usize = 64;

#[derive(Clone, Debug)]
pub struct Session {
	pub id: String,
	pub created_at: OffsetDateTime,
	pub last_activity: OffsetDateTime,
	pub request_count: u64,
	pub queries: VecDeque<QueryRecord>,
	pub plans: VecDeque<PlanRecord>,
}
impl Session {
	fn new(id: &str, now: OffsetDateTime) -> Self {
		Self {
			id: id.to_string(),
			created_at: now,
			last_activity: now,
			request_count: 0,
			queries: VecDeque::new(),
			plans: VecDeque::new(),
		}
	}

	fn snapshot(&self) -> SessionSnapshot {
		SessionSnapshot {
			session_id: self.id.clone(),
			created_at: self.created_at,
			last_activity: self.last_activity,
			request_count: self.request_count,
			queries: self.queries.iter().cloned().collect(),
			plans: self.plans.iter().cloned().collect(),
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanRecord {
	pub plan_id: Uuid,
	pub intent: String,
	pub steps: Vec<String>,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
	pub session_id: String,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
	#[serde(with = "time::serde::rfc3339")]
	pub last_activity: OffsetDateTime,
	pub request_count: u64,
	/// Oldest first.
	pub queries: Vec<QueryRecord>,
	pub plans: Vec<PlanRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionGetRequest {
	pub session_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionResetRequest {
	pub session_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanRecordRequest {
	pub session_id: String,
	pub intent: String,
	#[serde(default)]
	pub steps: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanRecordResponse {
	pub session_id: String,
	pub plan: PlanRecord,
	pub plan_count: usize,
}

/// Owns every session. Histories are trimmed on each write.
pub struct SessionStore {
	sessions: Mutex<HashMap<String, Session>>,
	max_history: usize,
	max_plans: usize,
}
impl SessionStore {
	pub fn new(cfg: &scout_config::Session) -> Self {
		Self {
			sessions: Mutex::new(HashMap::new()),
			max_history: cfg.max_history.max(1),
			max_plans: cfg.max_plans.max(1),
		}
	}

	/// Creates the session if needed, counts the request, then hands the session to `f`.
	pub fn touch<T>(&self, id: &str, now: OffsetDateTime, f: impl FnOnce(&Session) -> T) -> T {
		let mut sessions = self.sessions.lock().unwrap_or_else(|err| err.into_inner());
		let session = sessions.entry(id.to_string()).or_insert_with(|| Session::new(id, now));

		session.last_activity = now;
		session.request_count = session.request_count.saturating_add(1);

		f(session)
	}

	pub fn append_query(&self, id: &str, record: QueryRecord, now: OffsetDateTime) {
		let mut sessions = self.sessions.lock().unwrap_or_else(|err| err.into_inner());
		let session = sessions.entry(id.to_string()).or_insert_with(|| Session::new(id, now));

		loop_detect::append_record(&mut session.queries, record, self.max_history);
	}

	pub fn append_plan(&self, id: &str, plan: PlanRecord, now: OffsetDateTime) -> usize {
		let mut sessions = self.sessions.lock().unwrap_or_else(|err| err.into_inner());
		let session = sessions.entry(id.to_string()).or_insert_with(|| Session::new(id, now));

		session.last_activity = now;

		session.plans.push_back(plan);

		while session.plans.len() > self.max_plans {
			session.plans.pop_front();
		}

		session.plans.len()
	}

	pub fn snapshot(&self, id: &str) -> Option<SessionSnapshot> {
		let sessions = self.sessions.lock().unwrap_or_else(|err| err.into_inner());

		sessions.get(id).map(Session::snapshot)
	}

	/// Empties both histories. Counters and timestamps survive.
	pub fn reset(&self, id: &str, now: OffsetDateTime) -> Option<SessionSnapshot> {
		let mut sessions = self.sessions.lock().unwrap_or_else(|err| err.into_inner());
		let session = sessions.get_mut(id)?;

		session.queries.clear();
		session.plans.clear();

		session.last_activity = now;

		Some(session.snapshot())
	}

	pub fn len(&self) -> usize {
		self.sessions.lock().unwrap_or_else(|err| err.into_inner()).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Explicit id, then the authenticated caller, then an anonymous id scoped to the workspace.
pub fn resolve_session_id(explicit: Option<&str>, caller_id: Option<&str>, workspace: &str) -> String {
	if let Some(id) = explicit.map(str::trim).filter(|id| !id.is_empty()) {
		return id.to_string();
	}
	if let Some(caller) = caller_id.map(str::trim).filter(|id| !id.is_empty()) {
		return format!("agent:{caller}");
	}

	let digest = workspace_digest(workspace);

	format!("anon:{digest}")
}

fn workspace_digest(workspace: &str) -> String {
	let hex = scout_domain::fingerprint::exact_fingerprint(workspace);

	hex.chars().take(ANON_DIGEST_HEX_LEN).collect()
}

impl ScoutService {
	pub fn session_get(&self, req: SessionGetRequest) -> Result<SessionSnapshot> {
		let session_id = required_session_id(&req.session_id)?;

		self.sessions
			.snapshot(session_id)
			.ok_or_else(|| Error::NotFound { message: format!("Session {session_id} does not exist.") })
	}

	pub fn session_reset(&self, req: SessionResetRequest) -> Result<SessionSnapshot> {
		let session_id = required_session_id(&req.session_id)?;
		let snapshot = self
			.sessions
			.reset(session_id, OffsetDateTime::now_utc())
			.ok_or_else(|| Error::NotFound { message: format!("Session {session_id} does not exist.") })?;

		tracing::info!(session_id = %session_id, "Session reset.");

		Ok(snapshot)
	}

	pub fn plan_record(&self, req: PlanRecordRequest) -> Result<PlanRecordResponse> {
		let session_id = required_session_id(&req.session_id)?;
		let intent = req.intent.trim();

		if intent.is_empty() {
			return Err(Error::InvalidRequest { message: "intent must be non-empty.".to_string() });
		}
		if req.steps.len() > MAX_PLAN_STEPS {
			return Err(Error::InvalidRequest {
				message: format!("steps must contain at most {MAX_PLAN_STEPS} entries."),
			});
		}

		let now = OffsetDateTime::now_utc();
		let plan = PlanRecord {
			plan_id: Uuid::new_v4(),
			intent: intent.to_string(),
			steps: req
				.steps
				.iter()
				.map(|step| step.trim().to_string())
				.filter(|step| !step.is_empty())
				.collect(),
			created_at: now,
		};
		let plan_count = self.sessions.append_plan(session_id, plan.clone(), now);

		tracing::debug!(session_id = %session_id, plan_id = %plan.plan_id, "Plan recorded.");

		Ok(PlanRecordResponse { session_id: session_id.to_string(), plan, plan_count })
	}
}

fn required_session_id(raw: &str) -> Result<&str> {
	let trimmed = raw.trim();

	if trimmed.is_empty() {
		return Err(Error::InvalidRequest { message: "session_id must be non-empty.".to_string() });
	}

	Ok(trimmed)
}
