//! Cache manager tying key derivation, entry encoding, and policy together.

// crates.io
use http::{HeaderMap, StatusCode};
use url::Url;
// self
use crate::{
	_prelude::*,
	cache::{
		entry::CachedResponse,
		key::cache_key,
		policy::{CacheDirectives, CachePolicy},
		store::{CacheStore, CacheValue},
	},
	config::CacheConfig,
	metrics,
	pool::CredentialScope,
};

/// Result of a prefix invalidation sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Invalidation {
	/// Number of entries removed.
	pub count: usize,
	/// Originating URLs of the removed entries.
	pub urls: Vec<String>,
}

/// Response cache front end used by the dispatcher.
///
/// A disabled manager holds no store and answers every policy query with a bypass.
#[derive(Debug)]
pub struct CacheManager {
	store: Option<CacheStore>,
	ttl: Duration,
	excluded_paths: Vec<String>,
}
impl CacheManager {
	/// Build a manager from validated configuration.
	pub fn new(config: &CacheConfig) -> Result<Self> {
		config.validate()?;

		let store = if config.enabled {
			let store = if config.compress {
				CacheStore::with_compression(config.capacity, config.compression_level)?
			} else {
				CacheStore::new(config.capacity)?
			};

			tracing::info!(
				capacity = config.capacity,
				ttl = ?config.ttl,
				compress = config.compress,
				excluded = config.excluded_paths.len(),
				"initialized response cache"
			);

			Some(store)
		} else {
			None
		};

		Ok(Self { store, ttl: config.ttl, excluded_paths: config.excluded_paths.clone() })
	}

	/// Manager that never caches.
	pub fn disabled() -> Self {
		Self { store: None, ttl: Duration::ZERO, excluded_paths: Vec::new() }
	}

	/// Whether a store is active.
	pub fn is_enabled(&self) -> bool {
		self.store.is_some()
	}

	/// Underlying store, when caching is enabled.
	pub fn store(&self) -> Option<&CacheStore> {
		self.store.as_ref()
	}

	/// Lifetime given to stored responses.
	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	/// Decide whether a GET for `url` may be served from or written to the cache.
	pub fn determine_policy(
		&self,
		url: &str,
		scope: &CredentialScope,
		headers: &HeaderMap,
	) -> CachePolicy {
		self.determine_policy_at(url, scope, headers, Utc::now())
	}

	/// Policy evaluation as of `now`.
	///
	/// Expired or undecodable entries found on the way are removed.
	pub fn determine_policy_at(
		&self,
		url: &str,
		scope: &CredentialScope,
		headers: &HeaderMap,
		now: DateTime<Utc>,
	) -> CachePolicy {
		let Some(store) = &self.store else {
			return CachePolicy::bypass();
		};
		let Ok(parsed) = Url::parse(url) else {
			return CachePolicy::bypass();
		};

		if self.is_excluded(parsed.path()) {
			tracing::debug!(url, "path excluded from caching");

			return CachePolicy::bypass();
		}

		let directives = CacheDirectives::from_headers(headers);
		let key = cache_key(url, scope.cache_scope());

		if directives.allows_read()
			&& let Some(entry) = self.lookup(store, &key, now)
		{
			return CachePolicy { read: true, write: false, key: Some(key), entry: Some(entry) };
		}

		CachePolicy { read: false, write: directives.allows_write(), key: Some(key), entry: None }
	}

	/// Store a successful response under `key`.
	///
	/// Returns `Ok(false)` when caching is disabled.
	pub fn store_response(
		&self,
		key: &str,
		status: StatusCode,
		headers: &HeaderMap,
		body: &[u8],
		url: &str,
	) -> Result<bool> {
		self.store_response_at(key, status, headers, body, url, Utc::now())
	}

	/// Store a response as of `now`; it expires `ttl` later.
	pub fn store_response_at(
		&self,
		key: &str,
		status: StatusCode,
		headers: &HeaderMap,
		body: &[u8],
		url: &str,
		now: DateTime<Utc>,
	) -> Result<bool> {
		let Some(store) = &self.store else {
			return Ok(false);
		};
		let expires_at = TimeDelta::from_std(self.ttl)
			.ok()
			.and_then(|ttl| now.checked_add_signed(ttl))
			.ok_or_else(|| {
				Error::Cache(format!("ttl of {:?} overflows the expiry timestamp", self.ttl))
			})?;
		let bytes = CachedResponse::new(status, headers, body, url, expires_at).encode()?;

		if store.add(key, bytes) {
			tracing::debug!(key, "cache full; evicted least recently used entry");
		}

		Ok(true)
	}

	/// Remove every entry whose originating URL starts with one of `prefixes`.
	///
	/// Entries are inspected without promotion; undecodable ones are skipped.
	pub fn invalidate_by_prefix<S>(&self, prefixes: &[S]) -> Invalidation
	where
		S: AsRef<str>,
	{
		let Some(store) = &self.store else {
			return Invalidation::default();
		};

		if prefixes.is_empty() {
			return Invalidation::default();
		}

		let mut invalidation = Invalidation::default();

		for key in store.keys() {
			let Some(entry) = store.peek(&key).and_then(|value| decode(&value)) else {
				continue;
			};

			if prefixes.iter().any(|prefix| entry.url().starts_with(prefix.as_ref()))
				&& store.remove(&key)
			{
				invalidation.count += 1;
				invalidation.urls.push(entry.url().to_owned());
			}
		}

		if invalidation.count > 0 {
			metrics::record_cache_invalidations(invalidation.count);
		}

		tracing::info!(
			removed = invalidation.count,
			prefixes = prefixes.len(),
			"invalidated cache entries"
		);

		invalidation
	}

	fn is_excluded(&self, path: &str) -> bool {
		let path = collapse_slashes(path);

		self.excluded_paths.iter().any(|prefix| path.starts_with(prefix.as_str()))
	}

	fn lookup(&self, store: &CacheStore, key: &str, now: DateTime<Utc>) -> Option<CachedResponse> {
		let (value, tag) = store.get_tagged(key)?;
		let Some(entry) = decode(&value) else {
			tracing::warn!(key, "dropping undecodable cache entry");
			store.remove_if_same(key, &tag);

			return None;
		};

		if entry.is_expired(now) {
			tracing::debug!(key, url = entry.url(), "dropping expired cache entry");
			store.remove_if_same(key, &tag);

			return None;
		}

		Some(entry)
	}
}

/// `/ajax//discovery` and `/ajax/discovery` name the same upstream route.
fn collapse_slashes(path: &str) -> String {
	let mut collapsed = String::with_capacity(path.len());

	for ch in path.chars() {
		if ch == '/' && collapsed.ends_with('/') {
			continue;
		}

		collapsed.push(ch);
	}

	collapsed
}

fn decode(value: &CacheValue) -> Option<CachedResponse> {
	match value {
		CacheValue::Bytes(bytes) => CachedResponse::decode(bytes).ok(),
		CacheValue::Text(_) => None,
	}
}
