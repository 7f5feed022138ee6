//! Credential pool with health tracking, exponential backoff, and pluggable selection.
//!
//! All selection and mutation happen under one lock that is held only for the in-memory decision;
//! callers lease a credential, release the lock, perform their network call, then report the
//! outcome.

pub mod credential;
pub mod strategy;

// crates.io
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
// self
use crate::{
	_prelude::*,
	config::PoolConfig,
	pool::{
		credential::{AuxiliaryTokens, Credential, CredentialHealth, Outcome, mask_secret},
		strategy::SelectionStrategy,
	},
};

/// Credential handed out for a single request.
#[derive(Clone)]
pub struct Lease {
	slot: Option<usize>,
	secret: Arc<str>,
	tokens: Option<AuxiliaryTokens>,
}
impl Lease {
	/// Lease for the caller's own session secret; not tracked by any pool.
	pub fn session(secret: impl Into<Arc<str>>) -> Self {
		Self { slot: None, secret: secret.into(), tokens: None }
	}

	/// Lease for a freshly synthesized anonymous credential; not tracked by any pool.
	pub fn anonymous() -> Self {
		let credential = Credential::anonymous();

		Self {
			slot: None,
			secret: credential.secret().clone(),
			tokens: Some(credential.tokens().clone()),
		}
	}

	/// Primary secret to send upstream.
	pub fn secret(&self) -> &str {
		&self.secret
	}

	/// Auxiliary tokens to send alongside the secret, when the credential carries them.
	pub fn tokens(&self) -> Option<&AuxiliaryTokens> {
		self.tokens.as_ref()
	}

	/// Whether outcomes for this lease feed back into pool health.
	pub fn is_pooled(&self) -> bool {
		self.slot.is_some()
	}
}
impl std::fmt::Debug for Lease {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Lease")
			.field("slot", &self.slot)
			.field("secret", &mask_secret(&self.secret))
			.finish()
	}
}

// NUL never appears in a cookie value, so these markers cannot collide with a caller's secret.
const POOLED_CACHE_SCOPE: &str = "\0pooled";
const ANONYMOUS_CACHE_SCOPE: &str = "\0anonymous";

/// Which credential a request is sent with.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum CredentialScope {
	/// Lease from the shared pool.
	#[default]
	Pooled,
	/// Fresh anonymous credential synthesized for this request.
	Anonymous,
	/// The caller's own session secret. A blank secret behaves like [`CredentialScope::Anonymous`].
	Session(Arc<str>),
}
impl CredentialScope {
	/// Scope for the caller's own session secret.
	pub fn session(secret: impl Into<Arc<str>>) -> Self {
		Self::Session(secret.into())
	}

	/// Non-blank session secret carried by the scope.
	pub fn session_secret(&self) -> Option<&str> {
		match self {
			Self::Session(secret) if !secret.trim().is_empty() => Some(secret),
			_ => None,
		}
	}

	/// Secret material mixed into cache keys for this scope.
	pub fn cache_scope(&self) -> &str {
		match self {
			Self::Pooled => POOLED_CACHE_SCOPE,
			Self::Session(_) => self.session_secret().unwrap_or(ANONYMOUS_CACHE_SCOPE),
			Self::Anonymous => ANONYMOUS_CACHE_SCOPE,
		}
	}

	/// Short label for logs and metrics.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Pooled => "pooled",
			Self::Anonymous => "anonymous",
			Self::Session(_) => "session",
		}
	}
}
impl std::fmt::Debug for CredentialScope {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Pooled => f.write_str("Pooled"),
			Self::Anonymous => f.write_str("Anonymous"),
			Self::Session(secret) => f.debug_tuple("Session").field(&mask_secret(secret)).finish(),
		}
	}
}

/// Point-in-time view of one pooled credential.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CredentialStatus {
	/// Secret with all but a short prefix hidden.
	pub secret: String,
	/// Current health state.
	pub health: CredentialHealth,
	/// Consecutive failures.
	pub failure_count: u32,
	/// Wall-clock end of the current quarantine.
	pub backoff_until: Option<DateTime<Utc>>,
}

/// Fixed-size set of credentials shared by every request in the process.
#[derive(Debug)]
pub struct CredentialPool {
	state: Mutex<PoolState>,
	strategy: SelectionStrategy,
	base_backoff: Duration,
	max_backoff: Duration,
	max_retries: u32,
}
impl CredentialPool {
	/// Build a pool from validated configuration.
	pub fn new(config: &PoolConfig) -> Result<Self> {
		config.validate()?;

		let credentials =
			config.credentials.iter().map(|secret| Credential::new(secret.as_str())).collect();

		tracing::info!(
			size = config.credentials.len(),
			strategy = %config.strategy,
			base_backoff = ?config.base_backoff,
			max_backoff = ?config.max_backoff,
			"initialized credential pool"
		);

		Ok(Self::from_credentials(credentials, config))
	}

	/// Build a pool around pre-made credentials.
	pub fn from_credentials(credentials: Vec<Credential>, config: &PoolConfig) -> Self {
		Self {
			state: Mutex::new(PoolState { credentials, cursor: 0 }),
			strategy: config.strategy,
			base_backoff: config.base_backoff,
			max_backoff: config.max_backoff,
			max_retries: config.max_retries,
		}
	}

	/// Number of credentials in the pool.
	pub fn len(&self) -> usize {
		self.state.lock().credentials.len()
	}

	/// Whether the pool holds no credentials.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Active selection strategy.
	pub fn strategy(&self) -> SelectionStrategy {
		self.strategy
	}

	/// Retry budget advertised to callers; the pool itself never retries.
	pub fn max_retries(&self) -> u32 {
		self.max_retries
	}

	/// Lease a credential for the next request.
	pub fn lease(&self) -> Option<Lease> {
		self.lease_at(Instant::now())
	}

	/// Lease a credential as of `now`.
	///
	/// Falls back to reclaiming the timed-out credential with the earliest elapsed backoff when no
	/// credential is healthy. Returns `None` when nothing is usable.
	pub fn lease_at(&self, now: Instant) -> Option<Lease> {
		let mut state = self.state.lock();
		let PoolState { credentials, cursor } = &mut *state;
		let index = match self.strategy.select(credentials, cursor) {
			Some(index) => {
				credentials[index].touch(now);

				index
			},
			None => {
				let index = reclaimable(credentials, now)?;

				credentials[index].reclaim(now);

				tracing::debug!(
					credential = %credentials[index].masked_secret(),
					failures = credentials[index].failure_count(),
					"reclaimed timed-out credential"
				);

				index
			},
		};
		let credential = &credentials[index];

		Some(Lease {
			slot: Some(index),
			secret: credential.secret().clone(),
			tokens: Some(credential.tokens().clone()),
		})
	}

	/// Report the outcome of a completed exchange made with `lease`.
	///
	/// Leases that did not come from this pool are ignored.
	pub fn mark_outcome(&self, lease: &Lease, outcome: Outcome) {
		self.mark_outcome_at(lease, outcome, Instant::now());
	}

	/// Report an outcome as of `now`.
	pub fn mark_outcome_at(&self, lease: &Lease, outcome: Outcome, now: Instant) {
		let Some(slot) = lease.slot else {
			return;
		};
		let mut state = self.state.lock();
		let Some(credential) = state.credentials.get_mut(slot) else {
			return;
		};

		if credential.secret() != &lease.secret {
			return;
		}

		match outcome {
			Outcome::Success => credential.record_success(),
			Outcome::Failure => {
				let backoff = credential.record_failure(now, self.base_backoff, self.max_backoff);

				tracing::warn!(
					credential = %credential.masked_secret(),
					failures = credential.failure_count(),
					?backoff,
					"credential timed out"
				);
			},
		}
	}

	/// Force every credential back to a healthy state.
	pub fn reset_all(&self) {
		let mut state = self.state.lock();

		for credential in &mut state.credentials {
			credential.reset();
		}

		tracing::warn!(size = state.credentials.len(), "reset all credentials to good state");
	}

	/// Snapshot every credential for status reporting.
	pub fn status(&self) -> Vec<CredentialStatus> {
		let captured_at = Instant::now();
		let captured_at_wallclock = Utc::now();
		let state = self.state.lock();

		state
			.credentials
			.iter()
			.map(|credential| CredentialStatus {
				secret: credential.masked_secret(),
				health: credential.health(),
				failure_count: credential.failure_count(),
				backoff_until: credential
					.backoff_until()
					.filter(|_| !credential.is_good())
					.and_then(|deadline| to_datetime(captured_at, captured_at_wallclock, deadline)),
			})
			.collect()
	}

	/// Clone of the credential in `slot`, mainly for diagnostics.
	pub fn credential(&self, slot: usize) -> Option<Credential> {
		self.state.lock().credentials.get(slot).cloned()
	}
}

#[derive(Debug)]
struct PoolState {
	credentials: Vec<Credential>,
	cursor: usize,
}

fn reclaimable(credentials: &[Credential], now: Instant) -> Option<usize> {
	credentials
		.iter()
		.enumerate()
		.filter(|(_, credential)| credential.health() == CredentialHealth::TimedOut)
		.min_by_key(|(_, credential)| credential.backoff_until())
		.filter(|(_, credential)| credential.backoff_elapsed(now))
		.map(|(index, _)| index)
}

fn to_datetime(
	captured_at: Instant,
	captured_at_wallclock: DateTime<Utc>,
	instant: Instant,
) -> Option<DateTime<Utc>> {
	if let Some(delta) = instant.checked_duration_since(captured_at) {
		captured_at_wallclock.checked_add_signed(TimeDelta::from_std(delta).ok()?)
	} else {
		let delta = captured_at.checked_duration_since(instant)?;

		captured_at_wallclock.checked_sub_signed(TimeDelta::from_std(delta).ok()?)
	}
}
