//! Selection strategies applied to the healthy subset of a pool.

// std
use std::{fmt::Display, str::FromStr};
// crates.io
use rand::Rng;
use serde::{Deserialize, Serialize};
// self
use crate::{_prelude::*, pool::credential::Credential};

/// Supported credential selection strategies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
	/// Walk the pool in a fixed order, resuming after the last pick.
	#[default]
	RoundRobin,
	/// Uniform pick among healthy credentials.
	Random,
	/// Healthy credential with the oldest last-used stamp; pool order breaks ties.
	LeastRecentlyUsed,
}
impl SelectionStrategy {
	/// Configuration name of the strategy.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::RoundRobin => "round-robin",
			Self::Random => "random",
			Self::LeastRecentlyUsed => "least-recently-used",
		}
	}

	/// Pick the index of a healthy credential, advancing `cursor` for round-robin.
	///
	/// Returns `None` when no credential is healthy.
	pub fn select(&self, credentials: &[Credential], cursor: &mut usize) -> Option<usize> {
		match self {
			Self::RoundRobin => round_robin(credentials, cursor),
			Self::Random => random(credentials),
			Self::LeastRecentlyUsed => least_recently_used(credentials),
		}
	}
}
impl Display for SelectionStrategy {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}
impl FromStr for SelectionStrategy {
	type Err = Error;

	fn from_str(value: &str) -> Result<Self> {
		match value.trim().to_ascii_lowercase().as_str() {
			"round-robin" => Ok(Self::RoundRobin),
			"random" => Ok(Self::Random),
			"least-recently-used" => Ok(Self::LeastRecentlyUsed),
			other => Err(Error::Validation {
				field: "pool.strategy",
				reason: format!(
					"Unknown strategy '{other}'; expected round-robin, random, or least-recently-used."
				),
			}),
		}
	}
}

fn round_robin(credentials: &[Credential], cursor: &mut usize) -> Option<usize> {
	let len = credentials.len();

	if len == 0 {
		return None;
	}

	let start = *cursor % len;
	let index = (0..len).map(|offset| (start + offset) % len).find(|&i| credentials[i].is_good())?;

	*cursor = (index + 1) % len;

	Some(index)
}

fn random(credentials: &[Credential]) -> Option<usize> {
	let healthy = credentials.iter().filter(|credential| credential.is_good()).count();

	if healthy == 0 {
		return None;
	}

	let pick = rand::rng().random_range(0..healthy);

	credentials
		.iter()
		.enumerate()
		.filter(|(_, credential)| credential.is_good())
		.nth(pick)
		.map(|(index, _)| index)
}

fn least_recently_used(credentials: &[Credential]) -> Option<usize> {
	credentials
		.iter()
		.enumerate()
		.filter(|(_, credential)| credential.is_good())
		.min_by_key(|(_, credential)| credential.last_used())
		.map(|(index, _)| index)
}
