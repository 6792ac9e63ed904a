use std::{
	collections::HashMap,
	hash::Hash,
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
};

use futures::{FutureExt, future::Shared};

use scout_config::Admission;

use crate::{BoxFuture, Error, Result};

/// Process-wide ceiling on concurrent query calls. Rejects instead of queueing.
#[derive(Debug)]
pub struct AdmissionControl {
	in_flight: Arc<AtomicUsize>,
	max_in_flight: usize,
	retry_after_ms: u64,
}
impl AdmissionControl {
	pub fn new(cfg: &Admission) -> Self {
		Self {
			in_flight: Arc::new(AtomicUsize::new(0)),
			max_in_flight: cfg.max_in_flight.max(1),
			retry_after_ms: cfg.retry_after_ms,
		}
	}

	pub fn try_acquire(&self) -> Result<AdmissionPermit> {
		let max = self.max_in_flight;

		self.in_flight
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
				(current < max).then_some(current + 1)
			})
			.map_err(|_| Error::Busy { retry_after_ms: self.retry_after_ms })?;

		Ok(AdmissionPermit { in_flight: self.in_flight.clone() })
	}

	pub fn in_flight(&self) -> usize {
		self.in_flight.load(Ordering::Acquire)
	}
}

/// Releases its slot on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
	in_flight: Arc<AtomicUsize>,
}
impl Drop for AdmissionPermit {
	fn drop(&mut self) {
		self.in_flight.fetch_sub(1, Ordering::AcqRel);
	}
}

type SharedTask<V> = Shared<BoxFuture<'static, V>>;

/// Joins concurrent calls for the same key onto one in-flight future.
pub struct InflightMap<K, V>
where
	V: Clone,
{
	entries: Mutex<HashMap<K, SharedTask<V>>>,
}
impl<K, V> InflightMap<K, V>
where
	K: Clone + Eq + Hash,
	V: Clone + Send + Sync + 'static,
{
	pub fn new() -> Self {
		Self { entries: Mutex::new(HashMap::new()) }
	}

	/// Runs `start` only when no call for `key` is in flight; otherwise awaits the existing one.
	pub async fn run_or_join<F>(&self, key: K, start: F) -> V
	where
		F: FnOnce() -> BoxFuture<'static, V>,
	{
		let task = {
			let mut entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());

			entries.entry(key.clone()).or_insert_with(|| start().shared()).clone()
		};
		let value = task.clone().await;
		let mut entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());

		if entries.get(&key).map(|current| current.ptr_eq(&task)).unwrap_or(false) {
			entries.remove(&key);
		}

		value
	}

	pub fn len(&self) -> usize {
		self.entries.lock().unwrap_or_else(|err| err.into_inner()).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
impl<K, V> Default for InflightMap<K, V>
where
	K: Clone + Eq + Hash,
	V: Clone + Send + Sync + 'static,
{
	fn default() -> Self {
		Self::new()
	}
}
