//! Credential identities and their health bookkeeping.

// std
use std::{
	cell::RefCell,
	fmt::{Debug, Formatter, Result as FmtResult},
};
// crates.io
use rand::{Rng, SeedableRng, distr::Alphanumeric, rngs::SmallRng};
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Length of the generated browser identifier.
pub const BROWSER_ID_LEN: usize = 7;
/// Length of the secret generated for anonymous credentials.
pub const ANONYMOUS_SECRET_LEN: usize = 33;
/// Exclusive upper bound of the A/B bucket identifiers.
pub const AB_BUCKET_BOUND: u8 = 10;

/// Health state of a pooled credential.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CredentialHealth {
	/// Usable for new requests.
	#[default]
	Good,
	/// Quarantined until its backoff deadline passes.
	TimedOut,
}

/// Outcome reported back to the pool after an upstream exchange completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
	/// The upstream answered with an OK status.
	Success,
	/// The upstream answered, but not with an OK status.
	Failure,
}

/// Correlated cookie values sent alongside a secret so requests look like one browser session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxiliaryTokens {
	/// Seven alphanumeric characters.
	pub browser_id: String,
	/// Non-negative 31-bit integer.
	pub device_id: String,
	/// Single digit A/B bucket.
	pub ab_id: String,
	/// Second single digit A/B bucket.
	pub ab_id_secondary: String,
}
impl AuxiliaryTokens {
	/// Generate a fresh token set from the thread-local generator.
	pub fn generate() -> Self {
		SMALL_RNG.with(|cell| Self::generate_with(&mut *cell.borrow_mut()))
	}

	/// Generate a fresh token set from the supplied generator.
	pub fn generate_with<R>(rng: &mut R) -> Self
	where
		R: Rng,
	{
		let browser_id =
			(0..BROWSER_ID_LEN).map(|_| char::from(rng.sample(Alphanumeric))).collect();

		Self {
			browser_id,
			device_id: rng.random_range(0..=i32::MAX).to_string(),
			ab_id: rng.random_range(0..AB_BUCKET_BOUND).to_string(),
			ab_id_secondary: rng.random_range(0..AB_BUCKET_BOUND).to_string(),
		}
	}
}

/// One upstream session identity owned by a pool.
#[derive(Clone)]
pub struct Credential {
	secret: Arc<str>,
	tokens: AuxiliaryTokens,
	health: CredentialHealth,
	failure_count: u32,
	backoff_until: Option<Instant>,
	last_used: Option<Instant>,
}
impl Credential {
	/// Create a healthy credential with freshly generated auxiliary tokens.
	pub fn new(secret: impl Into<Arc<str>>) -> Self {
		Self::with_tokens(secret, AuxiliaryTokens::generate())
	}

	/// Create a healthy credential with the supplied auxiliary tokens.
	pub fn with_tokens(secret: impl Into<Arc<str>>, tokens: AuxiliaryTokens) -> Self {
		Self {
			secret: secret.into(),
			tokens,
			health: CredentialHealth::Good,
			failure_count: 0,
			backoff_until: None,
			last_used: None,
		}
	}

	/// Synthesize a throwaway credential for unauthenticated traffic.
	pub fn anonymous() -> Self {
		let secret: String = SMALL_RNG.with(|cell| {
			let mut rng = cell.borrow_mut();

			(0..ANONYMOUS_SECRET_LEN).map(|_| char::from(rng.random_range(b'a'..=b'z'))).collect()
		});

		Self::new(secret)
	}

	/// Primary secret value.
	pub fn secret(&self) -> &Arc<str> {
		&self.secret
	}

	/// Correlated auxiliary tokens.
	pub fn tokens(&self) -> &AuxiliaryTokens {
		&self.tokens
	}

	/// Current health state.
	pub fn health(&self) -> CredentialHealth {
		self.health
	}

	/// Consecutive failures since the last success or reset.
	pub fn failure_count(&self) -> u32 {
		self.failure_count
	}

	/// Instant the current quarantine ends, if one was ever applied.
	pub fn backoff_until(&self) -> Option<Instant> {
		self.backoff_until
	}

	/// Instant the credential was last handed out.
	pub fn last_used(&self) -> Option<Instant> {
		self.last_used
	}

	/// Whether the credential can be selected without reclaiming it.
	pub fn is_good(&self) -> bool {
		self.health == CredentialHealth::Good
	}

	/// Whether a timed-out credential's backoff has elapsed at `now`.
	pub fn backoff_elapsed(&self, now: Instant) -> bool {
		self.backoff_until.map(|deadline| now >= deadline).unwrap_or(true)
	}

	pub(crate) fn touch(&mut self, now: Instant) {
		self.last_used = Some(now);
	}

	/// Promote a timed-out credential back into rotation.
	///
	/// The failure count survives so the next failure keeps escalating.
	pub(crate) fn reclaim(&mut self, now: Instant) {
		self.health = CredentialHealth::Good;
		self.last_used = Some(now);
	}

	pub(crate) fn record_success(&mut self) {
		self.health = CredentialHealth::Good;
		self.failure_count = 0;
	}

	/// Record a failure and return the applied backoff.
	pub(crate) fn record_failure(
		&mut self,
		now: Instant,
		base: Duration,
		max: Duration,
	) -> Duration {
		self.failure_count = self.failure_count.saturating_add(1);

		let backoff = backoff_for(self.failure_count, base, max);

		self.health = CredentialHealth::TimedOut;
		self.backoff_until = Some(now + backoff);

		backoff
	}

	pub(crate) fn reset(&mut self) {
		self.health = CredentialHealth::Good;
		self.failure_count = 0;
		self.backoff_until = None;
	}

	/// Secret with everything but a short prefix hidden.
	pub fn masked_secret(&self) -> String {
		mask_secret(&self.secret)
	}
}
impl Debug for Credential {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("Credential")
			.field("secret", &self.masked_secret())
			.field("health", &self.health)
			.field("failure_count", &self.failure_count)
			.field("backoff_until", &self.backoff_until)
			.field("last_used", &self.last_used)
			.finish()
	}
}

/// Exponential backoff for the given consecutive failure count, capped at `max`.
///
/// `failures` of 0 or 1 both map to `base`.
pub fn backoff_for(failures: u32, base: Duration, max: Duration) -> Duration {
	let exponent = failures.saturating_sub(1).min(31);
	let factor = 1_u32 << exponent;

	base.saturating_mul(factor).min(max)
}

pub(crate) fn mask_secret(secret: &str) -> String {
	const VISIBLE: usize = 4;

	match secret.char_indices().nth(VISIBLE) {
		Some((idx, _)) => format!("{}***", &secret[..idx]),
		None if secret.is_empty() => String::new(),
		None => "***".into(),
	}
}
