//! Metrics helpers and in-process relay telemetry.

// std
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
// crates.io
use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smallvec::SmallVec;
// self
use crate::_prelude::*;

type LabelSet = SmallVec<[Label; 4]>;

const METRIC_REQUESTS_TOTAL: &str = "relay_requests_total";
const METRIC_CACHE_HITS_TOTAL: &str = "relay_cache_hits_total";
const METRIC_CACHE_MISSES_TOTAL: &str = "relay_cache_misses_total";
const METRIC_UPSTREAM_DURATION: &str = "relay_upstream_duration_seconds";
const METRIC_CREDENTIAL_FAILURES_TOTAL: &str = "relay_credential_failures_total";
const METRIC_POOL_EXHAUSTED_TOTAL: &str = "relay_pool_exhausted_total";
const METRIC_CACHE_INVALIDATIONS_TOTAL: &str = "relay_cache_invalidations_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Thread-safe counters for one dispatcher.
#[derive(Debug, Default)]
pub struct RelayMetrics {
	total_requests: AtomicU64,
	cache_hits: AtomicU64,
	cache_misses: AtomicU64,
	upstream_errors: AtomicU64,
	transport_errors: AtomicU64,
	last_upstream_micros: AtomicU64,
}
impl RelayMetrics {
	/// Create a new accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record an incoming request.
	pub fn record_request(&self) {
		self.total_requests.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a request served from the cache.
	pub fn record_hit(&self) {
		self.cache_hits.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a cache-eligible request that had to go upstream.
	pub fn record_miss(&self) {
		self.cache_misses.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a completed upstream exchange and its latency.
	pub fn record_upstream(&self, success: bool, duration: Duration) {
		if !success {
			self.upstream_errors.fetch_add(1, Ordering::Relaxed);
		}

		let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);

		self.last_upstream_micros.store(micros, Ordering::Relaxed);
	}

	/// Record an exchange that never completed.
	pub fn record_transport_error(&self) {
		self.transport_errors.fetch_add(1, Ordering::Relaxed);
	}

	/// Take a point-in-time snapshot.
	pub fn snapshot(&self) -> RelayMetricsSnapshot {
		RelayMetricsSnapshot {
			total_requests: self.total_requests.load(Ordering::Relaxed),
			cache_hits: self.cache_hits.load(Ordering::Relaxed),
			cache_misses: self.cache_misses.load(Ordering::Relaxed),
			upstream_errors: self.upstream_errors.load(Ordering::Relaxed),
			transport_errors: self.transport_errors.load(Ordering::Relaxed),
			last_upstream_micros: match self.last_upstream_micros.load(Ordering::Relaxed) {
				0 => None,
				value => Some(value),
			},
		}
	}
}

/// Read-only snapshot of [`RelayMetrics`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayMetricsSnapshot {
	/// Requests seen by the dispatcher.
	pub total_requests: u64,
	/// Requests answered from the cache.
	pub cache_hits: u64,
	/// Cache-eligible requests that went upstream.
	pub cache_misses: u64,
	/// Upstream exchanges that completed with a non-OK status.
	pub upstream_errors: u64,
	/// Exchanges that failed, were cancelled, or timed out.
	pub transport_errors: u64,
	/// Microsecond latency of the most recent upstream exchange.
	pub last_upstream_micros: Option<u64>,
}
impl RelayMetricsSnapshot {
	/// Share of cache-eligible lookups served from the cache.
	pub fn hit_rate(&self) -> f64 {
		let lookups = self.cache_hits + self.cache_misses;

		if lookups == 0 { 0.0 } else { self.cache_hits as f64 / lookups as f64 }
	}
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new().install_recorder()?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record an incoming request.
pub fn record_request(method: &str, scope: &'static str) {
	metrics::counter!(METRIC_REQUESTS_TOTAL, base_labels(method, scope).iter()).increment(1);
}

/// Record a cache hit.
pub fn record_cache_hit(method: &str, scope: &'static str) {
	metrics::counter!(METRIC_CACHE_HITS_TOTAL, base_labels(method, scope).iter()).increment(1);
}

/// Record a cache-eligible request that missed.
pub fn record_cache_miss(method: &str, scope: &'static str) {
	metrics::counter!(METRIC_CACHE_MISSES_TOTAL, base_labels(method, scope).iter()).increment(1);
}

/// Record the latency of a completed upstream exchange.
pub fn record_upstream(method: &str, scope: &'static str, status: u16, duration: Duration) {
	let mut labels = base_labels(method, scope);

	labels.push(Label::new("status", status.to_string()));

	metrics::histogram!(METRIC_UPSTREAM_DURATION, labels.iter()).record(duration.as_secs_f64());
}

/// Record a pooled credential being marked failed.
pub fn record_credential_failure(status: u16) {
	metrics::counter!(METRIC_CREDENTIAL_FAILURES_TOTAL, "status" => status.to_string())
		.increment(1);
}

/// Record a request rejected because every pooled credential was timed out.
pub fn record_pool_exhausted() {
	metrics::counter!(METRIC_POOL_EXHAUSTED_TOTAL).increment(1);
}

/// Record entries removed by a prefix invalidation.
pub fn record_cache_invalidations(count: usize) {
	let count = u64::try_from(count).unwrap_or(u64::MAX);

	metrics::counter!(METRIC_CACHE_INVALIDATIONS_TOTAL).increment(count);
}

fn base_labels(method: &str, scope: &'static str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(3);

	labels.push(Label::new("method", method.to_owned()));
	labels.push(Label::new("scope", scope));

	labels
}
