//! Request dispatcher: cache lookup, credential lease, upstream exchange, outcome reporting, and
//! cache population.

// crates.io
use http::{Method, StatusCode};
use reqwest::{Client, redirect::Policy};
// self
use crate::{
	_prelude::*,
	cache::{
		manager::{CacheManager, Invalidation},
		policy::CachePolicy,
	},
	config::{RelayConfig, RequestConfig},
	http::{
		client::{self, UpstreamRequest, UpstreamResponse},
		envelope::unwrap_envelope,
	},
	metrics::{self, RelayMetrics, RelayMetricsSnapshot},
	pool::{CredentialPool, CredentialScope, Lease, credential::Outcome},
};

/// Builder for [`Dispatcher`].
#[derive(Debug, Default)]
pub struct DispatcherBuilder {
	config: RelayConfig,
	client: Option<Client>,
}
impl DispatcherBuilder {
	/// Create a builder around `config`.
	pub fn new(config: RelayConfig) -> Self {
		Self { config, client: None }
	}

	/// Use a pre-configured HTTP client instead of the default one.
	pub fn client(mut self, client: Client) -> Self {
		self.client = Some(client);

		self
	}

	/// Validate the configuration and construct a [`Dispatcher`].
	pub fn build(self) -> Result<Dispatcher> {
		let Self { config, client } = self;

		config.validate()?;

		let client = match client {
			Some(client) => client,
			None => Client::builder()
				.redirect(Policy::limited(10))
				.user_agent(format!("upstream-relay/{}", env!("CARGO_PKG_VERSION")))
				.connect_timeout(Duration::from_secs(5))
				.build()?,
		};
		let inner = Inner {
			client,
			pool: CredentialPool::new(&config.pool)?,
			cache: CacheManager::new(&config.cache)?,
			request: config.request,
			metrics: RelayMetrics::new(),
		};

		Ok(Dispatcher { inner: Arc::new(inner) })
	}
}

/// Entry point for every upstream call. Cheap to clone; clones share the pool and cache.
#[derive(Clone, Debug)]
pub struct Dispatcher {
	inner: Arc<Inner>,
}
impl Dispatcher {
	/// Build a dispatcher with the default HTTP client.
	pub fn new(config: RelayConfig) -> Result<Self> {
		DispatcherBuilder::new(config).build()
	}

	/// Start a builder around `config`.
	pub fn builder(config: RelayConfig) -> DispatcherBuilder {
		DispatcherBuilder::new(config)
	}

	/// Shared credential pool.
	pub fn pool(&self) -> &CredentialPool {
		&self.inner.pool
	}

	/// Shared response cache.
	pub fn cache(&self) -> &CacheManager {
		&self.inner.cache
	}

	/// Snapshot of the dispatcher's counters.
	pub fn metrics(&self) -> RelayMetricsSnapshot {
		self.inner.metrics.snapshot()
	}

	/// Perform `request`, serving GETs from the cache when possible.
	///
	/// Any non-2xx status becomes [`Error::Upstream`]. Transport failures propagate without touching
	/// credential health or the cache; so do cancellation and deadline expiry.
	#[tracing::instrument(
		skip_all,
		fields(
			method = %request.method(),
			url = %request.url(),
			scope = request.credential_scope().as_str()
		)
	)]
	pub async fn dispatch(&self, request: &UpstreamRequest) -> Result<UpstreamResponse> {
		let inner = &self.inner;
		let method = request.method().as_str();
		let scope = request.credential_scope();
		let is_get = *request.method() == Method::GET;

		inner.metrics.record_request();
		metrics::record_request(method, scope.as_str());

		if *request.method() == Method::POST && scope.session_secret().is_none() {
			return Err(Error::SessionRequired);
		}

		let mut policy = if is_get {
			inner.cache.determine_policy(request.url().as_str(), scope, request.headers())
		} else {
			CachePolicy::bypass()
		};

		if let Some(entry) = policy.take_hit() {
			tracing::debug!("serving cached response");
			inner.metrics.record_hit();
			metrics::record_cache_hit(method, scope.as_str());

			return Ok(UpstreamResponse {
				status: entry.status(),
				headers: entry.header_map(),
				body: entry.into_body(),
				from_cache: true,
			});
		}
		if policy.key.is_some() {
			inner.metrics.record_miss();
			metrics::record_cache_miss(method, scope.as_str());
		}

		let lease = self.lease(scope)?;
		let raw = match client::send(&inner.client, &inner.request, request, &lease).await {
			Ok(raw) => raw,
			Err(err) => {
				tracing::debug!(error = %err, "upstream exchange did not complete");
				inner.metrics.record_transport_error();

				return Err(err);
			},
		};
		let ok = raw.status == StatusCode::OK;

		inner.metrics.record_upstream(ok, raw.elapsed);
		metrics::record_upstream(method, scope.as_str(), raw.status.as_u16(), raw.elapsed);

		if ok {
			inner.pool.mark_outcome(&lease, Outcome::Success);

			if let Some(key) = policy.write_key()
				&& let Err(err) = inner.cache.store_response(
					key,
					raw.status,
					&raw.headers,
					&raw.body,
					request.url().as_str(),
				) {
				tracing::warn!(error = %err, url = %request.url(), "failed to cache response");
			}
		} else {
			if lease.is_pooled() {
				metrics::record_credential_failure(raw.status.as_u16());
			}

			inner.pool.mark_outcome(&lease, Outcome::Failure);
		}

		if !raw.status.is_success() {
			return Err(client::upstream_error(raw.status, &raw.body));
		}

		Ok(UpstreamResponse {
			status: raw.status,
			headers: raw.headers,
			body: raw.body,
			from_cache: false,
		})
	}

	/// GET `request` and return the JSON inside the response envelope.
	pub async fn fetch_json(&self, request: &UpstreamRequest) -> Result<Vec<u8>> {
		ensure_method(request, Method::GET)?;

		let response = self.dispatch(request).await?;

		unwrap_envelope(response.status, &response.body)
	}

	/// GET `request` and return the response as received.
	pub async fn fetch_raw(&self, request: &UpstreamRequest) -> Result<UpstreamResponse> {
		ensure_method(request, Method::GET)?;

		self.dispatch(request).await
	}

	/// POST `request` with the caller's session and return the JSON inside the envelope.
	///
	/// Never cached. Fails with [`Error::SessionRequired`] unless the request carries a non-empty
	/// session secret.
	pub async fn submit_json(&self, request: &UpstreamRequest) -> Result<Vec<u8>> {
		ensure_method(request, Method::POST)?;

		let response = self.dispatch(request).await?;

		unwrap_envelope(response.status, &response.body)
	}

	/// Drop cached responses whose URL starts with any of `prefixes`.
	pub fn invalidate_by_prefix<S>(&self, prefixes: &[S]) -> Invalidation
	where
		S: AsRef<str>,
	{
		self.inner.cache.invalidate_by_prefix(prefixes)
	}

	fn lease(&self, scope: &CredentialScope) -> Result<Lease> {
		if let Some(secret) = scope.session_secret() {
			return Ok(Lease::session(secret));
		}
		if *scope != CredentialScope::Pooled {
			return Ok(Lease::anonymous());
		}

		let pool = &self.inner.pool;

		match pool.lease() {
			Some(lease) => Ok(lease),
			None => {
				let total = pool.len();

				tracing::warn!(total, "credential pool exhausted; resetting every credential");
				metrics::record_pool_exhausted();
				pool.reset_all();

				Err(Error::PoolExhausted { total })
			},
		}
	}
}

#[derive(Debug)]
struct Inner {
	client: Client,
	pool: CredentialPool,
	cache: CacheManager,
	request: RequestConfig,
	metrics: Arc<RelayMetrics>,
}

fn ensure_method(request: &UpstreamRequest, expected: Method) -> Result<()> {
	if *request.method() == expected {
		Ok(())
	} else {
		Err(Error::Validation {
			field: "request.method",
			reason: format!("Expected {expected}, got {}.", request.method()),
		})
	}
}
