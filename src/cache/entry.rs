//! Cached upstream responses and their in-memory byte encoding.

// crates.io
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

/// Upstream response captured for reuse.
///
/// The originating URL is kept for prefix invalidation only; lookups go through the derived key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
	status: u16,
	headers: Vec<(String, Vec<u8>)>,
	body: Vec<u8>,
	#[serde(with = "chrono::serde::ts_milliseconds")]
	expires_at: DateTime<Utc>,
	url: String,
}
impl CachedResponse {
	/// Capture a response that stays valid until `expires_at`.
	pub fn new(
		status: StatusCode,
		headers: &HeaderMap,
		body: impl Into<Vec<u8>>,
		url: impl Into<String>,
		expires_at: DateTime<Utc>,
	) -> Self {
		let headers = headers
			.iter()
			.map(|(name, value)| (name.as_str().to_owned(), value.as_bytes().to_vec()))
			.collect();

		Self { status: status.as_u16(), headers, body: body.into(), expires_at, url: url.into() }
	}

	/// Encode into the byte form kept by the cache store.
	pub fn encode(&self) -> Result<Vec<u8>> {
		Ok(bincode::serde::encode_to_vec(self, bincode::config::standard())?)
	}

	/// Decode bytes produced by [`CachedResponse::encode`].
	pub fn decode(bytes: &[u8]) -> Result<Self> {
		let (entry, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;

		Ok(entry)
	}

	/// Whether the entry is no longer valid at `now`.
	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		now >= self.expires_at
	}

	/// Wall-clock expiry.
	pub fn expires_at(&self) -> DateTime<Utc> {
		self.expires_at
	}

	/// Captured status code; unknown codes fall back to 200.
	pub fn status(&self) -> StatusCode {
		StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK)
	}

	/// Rebuild the captured headers, dropping any pair that no longer parses.
	pub fn header_map(&self) -> HeaderMap {
		let mut map = HeaderMap::with_capacity(self.headers.len());

		for (name, value) in &self.headers {
			if let (Ok(name), Ok(value)) =
				(HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_bytes(value))
			{
				map.append(name, value);
			}
		}

		map
	}

	/// Captured body.
	pub fn body(&self) -> &[u8] {
		&self.body
	}

	/// Consume the entry, returning the body.
	pub fn into_body(self) -> Vec<u8> {
		self.body
	}

	/// URL the response was fetched from.
	pub fn url(&self) -> &str {
		&self.url
	}
}
