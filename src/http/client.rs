//! Outbound request model and the cancellable upstream exchange.

// crates.io
use http::{
	HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
	header::{ACCEPT_LANGUAGE, CONTENT_TYPE, COOKIE, REFERER, USER_AGENT},
};
use rand::seq::IndexedRandom;
use reqwest::{Client, RequestBuilder, Response, multipart::Form};
use tokio_util::sync::CancellationToken;
use url::Url;
// self
use crate::{
	_prelude::*,
	config::RequestConfig,
	pool::{CredentialScope, Lease},
};

/// Cookie carrying the primary credential secret.
pub const SESSION_COOKIE: &str = "PHPSESSID";
/// Cookie carrying the browser identifier.
pub const BROWSER_ID_COOKIE: &str = "yuid_b";
/// Cookie carrying the device identifier.
pub const DEVICE_ID_COOKIE: &str = "p_ab_d_id";
/// Cookie carrying the first A/B bucket.
pub const AB_ID_COOKIE: &str = "p_ab_id";
/// Cookie carrying the second A/B bucket.
pub const AB_ID_SECONDARY_COOKIE: &str = "p_ab_id_2";
/// Anti-forgery header attached to mutating requests.
pub const CSRF_HEADER: &str = "x-csrf-token";

const UNKNOWN_ERROR_MESSAGE: &str = "An unknown API error occurred";

/// Body of a POST request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
	/// Raw bytes sent with the given content type.
	Raw {
		/// Value of the `Content-Type` header.
		content_type: String,
		/// Request body.
		body: Vec<u8>,
	},
	/// Multipart form built from text fields.
	Multipart(Vec<(String, String)>),
}
impl Payload {
	/// JSON body.
	pub fn json(body: impl Into<Vec<u8>>) -> Self {
		Self::Raw { content_type: "application/json".into(), body: body.into() }
	}

	/// URL-encoded form body.
	pub fn form(body: impl Into<Vec<u8>>) -> Self {
		Self::Raw { content_type: "application/x-www-form-urlencoded".into(), body: body.into() }
	}
}

/// Request issued through the dispatcher.
#[derive(Clone, Debug)]
pub struct UpstreamRequest {
	method: Method,
	url: Url,
	scope: CredentialScope,
	cookies: Vec<(String, String)>,
	headers: HeaderMap,
	csrf_token: Option<String>,
	payload: Option<Payload>,
	cancel: Option<CancellationToken>,
	deadline: Option<Duration>,
}
impl UpstreamRequest {
	/// GET request sent with a pooled credential.
	pub fn get(url: Url) -> Self {
		Self::new(Method::GET, url, None)
	}

	/// POST request carrying `payload`. A session scope must be set before dispatching.
	pub fn post(url: Url, payload: Payload) -> Self {
		Self::new(Method::POST, url, Some(payload))
	}

	fn new(method: Method, url: Url, payload: Option<Payload>) -> Self {
		Self {
			method,
			url,
			scope: CredentialScope::default(),
			cookies: Vec::new(),
			headers: HeaderMap::new(),
			csrf_token: None,
			payload,
			cancel: None,
			deadline: None,
		}
	}

	/// Credential scope used to authenticate the request.
	pub fn scope(mut self, scope: CredentialScope) -> Self {
		self.scope = scope;

		self
	}

	/// Add a caller cookie. Credential cookies override caller cookies of the same name.
	pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.cookies.push((name.into(), value.into()));

		self
	}

	/// Add a caller header consulted by the cache policy.
	pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
		self.headers.append(name, value);

		self
	}

	/// Anti-forgery token sent with POST requests.
	pub fn csrf_token(mut self, token: impl Into<String>) -> Self {
		self.csrf_token = Some(token.into());

		self
	}

	/// Abort the exchange when `token` is cancelled.
	pub fn cancel_on(mut self, token: CancellationToken) -> Self {
		self.cancel = Some(token);

		self
	}

	/// Deadline for this exchange, overriding the configured default.
	pub fn deadline(mut self, deadline: Duration) -> Self {
		self.deadline = Some(deadline);

		self
	}

	/// HTTP method.
	pub fn method(&self) -> &Method {
		&self.method
	}

	/// Target URL.
	pub fn url(&self) -> &Url {
		&self.url
	}

	/// Credential scope.
	pub fn credential_scope(&self) -> &CredentialScope {
		&self.scope
	}

	/// Caller cookies in insertion order.
	pub fn cookies(&self) -> &[(String, String)] {
		&self.cookies
	}

	/// Caller headers.
	pub fn headers(&self) -> &HeaderMap {
		&self.headers
	}

	/// POST payload.
	pub fn payload(&self) -> Option<&Payload> {
		self.payload.as_ref()
	}
}

/// Response returned by the dispatcher.
#[derive(Clone, Debug)]
pub struct UpstreamResponse {
	/// Status code.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
	/// Response body.
	pub body: Vec<u8>,
	/// Whether the response was served from the cache.
	pub from_cache: bool,
}

/// Merge caller cookies with the credential's cookies.
///
/// Later sources override earlier ones by name: caller cookies, then auxiliary tokens, then the
/// secret under [`SESSION_COOKIE`]. The first position of each name is kept.
pub fn merge_cookies(caller: &[(String, String)], lease: &Lease) -> Vec<(String, String)> {
	let mut merged: Vec<(String, String)> = Vec::with_capacity(caller.len() + 5);
	let mut set = |name: &str, value: &str| match merged.iter_mut().find(|(n, _)| n == name) {
		Some(existing) => existing.1 = value.to_owned(),
		None => merged.push((name.to_owned(), value.to_owned())),
	};

	for (name, value) in caller {
		set(name, value);
	}

	if let Some(tokens) = lease.tokens() {
		set(BROWSER_ID_COOKIE, &tokens.browser_id);
		set(DEVICE_ID_COOKIE, &tokens.device_id);
		set(AB_ID_COOKIE, &tokens.ab_id);
		set(AB_ID_SECONDARY_COOKIE, &tokens.ab_id_secondary);
	}

	set(SESSION_COOKIE, lease.secret());

	merged
}

/// Render cookies as a `Cookie` header value.
pub fn cookie_header(cookies: &[(String, String)]) -> String {
	cookies.iter().map(|(name, value)| format!("{name}={value}")).collect::<Vec<_>>().join("; ")
}

/// Build the outbound request for `request` authenticated with `lease`.
pub fn build_request(
	client: &Client,
	config: &RequestConfig,
	request: &UpstreamRequest,
	lease: &Lease,
) -> Result<RequestBuilder> {
	let cookies = merge_cookies(request.cookies(), lease);
	let mut builder = client
		.request(request.method().clone(), request.url().clone())
		.header(ACCEPT_LANGUAGE, config.accept_language.as_str())
		.header(COOKIE, cookie_header(&cookies));

	if let Some(referer) = &config.referer {
		builder = builder.header(REFERER, referer.as_str());
	}
	if let Some(agent) = config.user_agents.choose(&mut rand::rng()) {
		builder = builder.header(USER_AGENT, agent.as_str());
	}
	if *request.method() == Method::POST {
		if let Some(token) = &request.csrf_token {
			let value = HeaderValue::from_str(token).map_err(|err| Error::Validation {
				field: "csrf_token",
				reason: format!("Not a valid header value: {err}."),
			})?;

			builder = builder.header(CSRF_HEADER, value);
		}

		builder = match request.payload() {
			Some(Payload::Raw { content_type, body }) =>
				builder.header(CONTENT_TYPE, content_type.as_str()).body(body.clone()),
			Some(Payload::Multipart(fields)) => builder.multipart(
				fields
					.iter()
					.fold(Form::new(), |form, (name, value)| form.text(name.clone(), value.clone())),
			),
			None => builder,
		};
	}

	Ok(builder)
}

/// Completed upstream exchange with its body read in full.
#[derive(Clone, Debug)]
pub struct RawResponse {
	/// Status code.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
	/// Response body.
	pub body: Vec<u8>,
	/// Round-trip duration including the body.
	pub elapsed: Duration,
}

/// Send `request` with `lease`, honoring its cancellation token and deadline.
///
/// Cancellation and deadline expiry surface as [`Error::Cancelled`] and
/// [`Error::DeadlineElapsed`]. Bodies larger than the configured guard fail with
/// [`Error::ResponseTooLarge`].
pub async fn send(
	client: &Client,
	config: &RequestConfig,
	request: &UpstreamRequest,
	lease: &Lease,
) -> Result<RawResponse> {
	let builder = build_request(client, config, request, lease)?;
	let deadline = request.deadline.unwrap_or(config.timeout);
	let limit = config.max_response_bytes;
	let start = Instant::now();
	let exchange = async {
		let response = builder.send().await?;
		let status = response.status();
		let headers = response.headers().clone();
		let body = read_body(response, limit).await?;

		Ok::<_, Error>((status, headers, body))
	};
	let cancel = request.cancel.clone().unwrap_or_default();
	let (status, headers, body) = tokio::select! {
		biased;
		_ = cancel.cancelled() => return Err(Error::Cancelled),
		result = tokio::time::timeout(deadline, exchange) =>
			result.map_err(|_| Error::DeadlineElapsed(deadline))??,
	};
	let elapsed = start.elapsed();

	tracing::debug!(
		method = %request.method(),
		url = %request.url(),
		status = %status,
		elapsed = ?elapsed,
		size = body.len(),
		"upstream exchange complete"
	);

	Ok(RawResponse { status, headers, body, elapsed })
}

async fn read_body(mut response: Response, limit: u64) -> Result<Vec<u8>> {
	if let Some(size) = response.content_length()
		&& size > limit
	{
		return Err(Error::ResponseTooLarge { size, limit });
	}

	let mut body = Vec::new();

	while let Some(chunk) = response.chunk().await? {
		let size = u64::try_from(body.len() + chunk.len()).unwrap_or(u64::MAX);

		if size > limit {
			return Err(Error::ResponseTooLarge { size, limit });
		}

		body.extend_from_slice(&chunk);
	}

	Ok(body)
}

/// Build the error for a non-success upstream response.
///
/// The message is taken from the JSON body's `message` field, else the status reason phrase.
pub fn upstream_error(status: StatusCode, body: &[u8]) -> Error {
	let message = serde_json::from_slice::<serde_json::Value>(body)
		.ok()
		.and_then(|value| value.get("message").and_then(|m| m.as_str()).map(str::to_owned))
		.filter(|message| !message.is_empty())
		.or_else(|| status.canonical_reason().map(str::to_owned))
		.unwrap_or_else(|| UNKNOWN_ERROR_MESSAGE.into());

	Error::Upstream { status, message }
}
