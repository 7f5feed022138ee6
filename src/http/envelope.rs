//! Unwrapping of the upstream `{ "error", "message", "body" }` response envelope.

// std
use std::collections::HashMap;
// crates.io
use http::StatusCode;
use serde_json::value::RawValue;
// self
use crate::_prelude::*;

const MISSING_MESSAGE: &str = "API response contained an error with no message";
const MAX_ERROR_EXCERPT: usize = 256;

/// Top-level members of a JSON object, each left undecoded.
///
/// Fields are decoded one at a time so a malformed `message` cannot hide the `error` flag.
type Fields<'a> = HashMap<String, &'a RawValue>;

/// Return the JSON inside the envelope's `body` field.
///
/// A payload that is not an envelope passes through unchanged. An envelope whose `error` field is
/// `true` becomes [`Error::Upstream`] with the given `status`; a missing, empty, or non-string
/// `message` is replaced by a generic one. Malformed JSON is [`Error::InvalidJson`].
pub fn unwrap_envelope(status: StatusCode, payload: &[u8]) -> Result<Vec<u8>> {
	let raw: &RawValue =
		serde_json::from_slice(payload).map_err(|_| Error::InvalidJson { body: excerpt(payload) })?;
	let Ok(fields) = serde_json::from_str::<Fields>(raw.get()) else {
		return Ok(payload.to_vec());
	};

	if fields.get("error").is_some_and(|flag| serde_json::from_str(flag.get()).unwrap_or(false)) {
		let message = fields
			.get("message")
			.and_then(|message| serde_json::from_str::<String>(message.get()).ok())
			.filter(|message| !message.is_empty())
			.unwrap_or_else(|| MISSING_MESSAGE.into());

		return Err(Error::Upstream { status, message });
	}

	match fields.get("body") {
		Some(body) if body.get() != "null" => Ok(body.get().as_bytes().to_vec()),
		_ => Ok(payload.to_vec()),
	}
}

fn excerpt(payload: &[u8]) -> String {
	let text = String::from_utf8_lossy(payload);

	match text.char_indices().nth(MAX_ERROR_EXCERPT) {
		Some((idx, _)) => format!("{}...", &text[..idx]),
		None => text.into_owned(),
	}
}
