//! Configuration surface consumed by the request layer, with fail-fast validation.

// crates.io
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{_prelude::*, pool::strategy::SelectionStrategy};

/// Default number of cached responses.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;
/// Default lifetime of a cached response.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
/// Default zstd level used when compression is enabled.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;
/// Default base backoff applied after a credential's first failure.
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(1);
/// Default backoff ceiling.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(32);
/// Default retry budget advertised to callers.
pub const DEFAULT_MAX_RETRIES: u32 = 5;
/// Default `Accept-Language` sent upstream.
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.5";
/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default response size guard (16 MiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: u64 = 16 * 1_048_576;
/// Endpoints whose responses are personalized per visit and never cached.
pub const DEFAULT_EXCLUDED_PATHS: [&str; 4] = [
	"/ajax/discovery/artworks",
	"/ajax/discovery/novels",
	"/ajax/discovery/users",
	"/ajax/illust/new",
];

/// Complete configuration for a [`Dispatcher`](crate::Dispatcher).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RelayConfig {
	/// Response cache settings.
	#[serde(default)]
	pub cache: CacheConfig,
	/// Credential pool settings.
	#[serde(default)]
	pub pool: PoolConfig,
	/// Outbound request decoration and limits.
	#[serde(default)]
	pub request: RequestConfig,
}
impl RelayConfig {
	/// Build a configuration around the given credential secrets with every other field defaulted.
	pub fn with_credentials<I, S>(credentials: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			pool: PoolConfig {
				credentials: credentials.into_iter().map(Into::into).collect(),
				..PoolConfig::default()
			},
			..Self::default()
		}
	}

	/// Validate every section.
	pub fn validate(&self) -> Result<()> {
		self.cache.validate()?;
		self.pool.validate()?;
		self.request.validate()?;

		Ok(())
	}
}

/// Response cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
	/// Whether responses are cached at all.
	#[serde(default)]
	pub enabled: bool,
	/// Maximum number of cached responses.
	#[serde(default = "default_cache_capacity")]
	pub capacity: usize,
	/// Lifetime of a cached response.
	#[serde(default = "default_cache_ttl")]
	pub ttl: Duration,
	/// Whether stored values are opportunistically zstd-compressed.
	#[serde(default)]
	pub compress: bool,
	/// zstd level used when `compress` is set.
	#[serde(default = "default_compression_level")]
	pub compression_level: i32,
	/// URL path prefixes that are never cached.
	#[serde(default = "default_excluded_paths")]
	pub excluded_paths: Vec<String>,
}
impl CacheConfig {
	/// Validate invariants for cache configuration.
	pub fn validate(&self) -> Result<()> {
		if self.capacity == 0 {
			return Err(Error::Validation {
				field: "cache.capacity",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.ttl.is_zero() {
			return Err(Error::Validation {
				field: "cache.ttl",
				reason: "Must be greater than zero.".into(),
			});
		}
		if !zstd::compression_level_range().contains(&self.compression_level) {
			return Err(Error::Validation {
				field: "cache.compression_level",
				reason: format!("Must be within {:?}.", zstd::compression_level_range()),
			});
		}
		if let Some(path) = self.excluded_paths.iter().find(|path| !path.starts_with('/')) {
			return Err(Error::Validation {
				field: "cache.excluded_paths",
				reason: format!("Entry '{path}' must be an absolute path starting with '/'."),
			});
		}

		Ok(())
	}
}
impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			enabled: false,
			capacity: DEFAULT_CACHE_CAPACITY,
			ttl: DEFAULT_CACHE_TTL,
			compress: false,
			compression_level: DEFAULT_COMPRESSION_LEVEL,
			excluded_paths: default_excluded_paths(),
		}
	}
}

/// Credential pool configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
	/// Primary secrets of the pooled credentials.
	#[serde(default)]
	pub credentials: Vec<String>,
	/// Strategy used to pick among healthy credentials.
	#[serde(default)]
	pub strategy: SelectionStrategy,
	/// Backoff applied after the first consecutive failure.
	#[serde(default = "default_base_backoff")]
	pub base_backoff: Duration,
	/// Ceiling for the exponential backoff.
	#[serde(default = "default_max_backoff")]
	pub max_backoff: Duration,
	/// Retry budget advertised to callers.
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,
}
impl PoolConfig {
	/// Validate invariants for pool configuration.
	pub fn validate(&self) -> Result<()> {
		if self.credentials.is_empty() {
			return Err(Error::Validation {
				field: "pool.credentials",
				reason: "At least one credential secret is required.".into(),
			});
		}
		if self.credentials.iter().any(|secret| secret.trim().is_empty()) {
			return Err(Error::Validation {
				field: "pool.credentials",
				reason: "Credential secrets must not be blank.".into(),
			});
		}
		if self.base_backoff.is_zero() {
			return Err(Error::Validation {
				field: "pool.base_backoff",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max_backoff < self.base_backoff {
			return Err(Error::Validation {
				field: "pool.max_backoff",
				reason: "Must be greater than or equal to base_backoff.".into(),
			});
		}

		Ok(())
	}
}
impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			credentials: Vec::new(),
			strategy: SelectionStrategy::default(),
			base_backoff: DEFAULT_BASE_BACKOFF,
			max_backoff: DEFAULT_MAX_BACKOFF,
			max_retries: DEFAULT_MAX_RETRIES,
		}
	}
}

/// Outbound request configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestConfig {
	/// `Accept-Language` header value.
	#[serde(default = "default_accept_language")]
	pub accept_language: String,
	/// Optional `Referer` header value.
	#[serde(default)]
	pub referer: Option<Url>,
	/// Pool of `User-Agent` values; one is picked per request. Empty keeps the client default.
	#[serde(default)]
	pub user_agents: Vec<String>,
	/// Default deadline for a single upstream exchange.
	#[serde(default = "default_request_timeout")]
	pub timeout: Duration,
	/// Upper bound on accepted response bodies.
	#[serde(default = "default_max_response_bytes")]
	pub max_response_bytes: u64,
}
impl RequestConfig {
	/// Validate invariants for request configuration.
	pub fn validate(&self) -> Result<()> {
		if self.timeout < Duration::from_millis(100) {
			return Err(Error::Validation {
				field: "request.timeout",
				reason: "Must be at least 100 ms.".into(),
			});
		}
		if self.max_response_bytes == 0 {
			return Err(Error::Validation {
				field: "request.max_response_bytes",
				reason: "Must be greater than zero.".into(),
			});
		}
		if let Some(referer) = &self.referer
			&& !matches!(referer.scheme(), "http" | "https")
		{
			return Err(Error::Validation {
				field: "request.referer",
				reason: "Must be an http or https URL.".into(),
			});
		}

		Ok(())
	}
}
impl Default for RequestConfig {
	fn default() -> Self {
		Self {
			accept_language: DEFAULT_ACCEPT_LANGUAGE.into(),
			referer: None,
			user_agents: Vec::new(),
			timeout: DEFAULT_REQUEST_TIMEOUT,
			max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
		}
	}
}

fn default_cache_capacity() -> usize {
	DEFAULT_CACHE_CAPACITY
}

fn default_cache_ttl() -> Duration {
	DEFAULT_CACHE_TTL
}

fn default_compression_level() -> i32 {
	DEFAULT_COMPRESSION_LEVEL
}

fn default_excluded_paths() -> Vec<String> {
	DEFAULT_EXCLUDED_PATHS.iter().map(|path| (*path).to_owned()).collect()
}

fn default_base_backoff() -> Duration {
	DEFAULT_BASE_BACKOFF
}

fn default_max_backoff() -> Duration {
	DEFAULT_MAX_BACKOFF
}

fn default_max_retries() -> u32 {
	DEFAULT_MAX_RETRIES
}

fn default_accept_language() -> String {
	DEFAULT_ACCEPT_LANGUAGE.into()
}

fn default_request_timeout() -> Duration {
	DEFAULT_REQUEST_TIMEOUT
}

fn default_max_response_bytes() -> u64 {
	DEFAULT_MAX_RESPONSE_BYTES
}
