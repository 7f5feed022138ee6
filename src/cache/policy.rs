//! Per-request cache decisions.

// crates.io
use http::{HeaderMap, header::CACHE_CONTROL};
// self
use crate::cache::entry::CachedResponse;

/// Request-side `Cache-Control` directives the relay honors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheDirectives {
	/// Skip the cache read.
	pub no_cache: bool,
	/// Skip the write; a cached entry may still be served.
	pub no_store: bool,
}
impl CacheDirectives {
	/// Parse every `Cache-Control` value in `headers`, case-insensitively.
	pub fn from_headers(headers: &HeaderMap) -> Self {
		let mut directives = Self::default();
		let tokens = headers
			.get_all(CACHE_CONTROL)
			.iter()
			.filter_map(|value| value.to_str().ok())
			.flat_map(|value| value.split(','))
			.map(|token| token.split('=').next().unwrap_or_default().trim());

		for token in tokens {
			if token.eq_ignore_ascii_case("no-cache") {
				directives.no_cache = true;
			} else if token.eq_ignore_ascii_case("no-store") {
				directives.no_store = true;
			}
		}

		directives
	}

	/// Whether a cached entry may be served.
	pub fn allows_read(&self) -> bool {
		!self.no_cache
	}

	/// Whether a fresh response may be stored.
	pub fn allows_write(&self) -> bool {
		!self.no_store
	}
}

/// Outcome of a cache policy evaluation for one request.
#[derive(Clone, Debug, Default)]
pub struct CachePolicy {
	/// A valid entry was found and attached.
	pub read: bool,
	/// A successful response may be stored under [`CachePolicy::key`].
	pub write: bool,
	/// Derived key, present whenever the request is cache eligible.
	pub key: Option<String>,
	/// Valid cached entry when `read` is set.
	pub entry: Option<CachedResponse>,
}
impl CachePolicy {
	/// Policy that neither reads nor writes.
	pub fn bypass() -> Self {
		Self::default()
	}

	/// Take the attached entry when the read succeeded.
	pub fn take_hit(&mut self) -> Option<CachedResponse> {
		if self.read { self.entry.take() } else { None }
	}

	/// Key to store under when writing is allowed.
	pub fn write_key(&self) -> Option<&str> {
		self.key.as_deref().filter(|_| self.write)
	}
}
