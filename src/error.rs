//! Crate-wide error types and `Result` alias.

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the upstream relay crate.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Decode(#[from] bincode::error::DecodeError),
	#[error(transparent)]
	Encode(#[from] bincode::error::EncodeError),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),

	#[error("Cache error: {0}")]
	Cache(String),
	#[error("Request was cancelled before the upstream responded.")]
	Cancelled,
	#[error("Request deadline of {0:?} elapsed before the upstream responded.")]
	DeadlineElapsed(std::time::Duration),
	#[error("Upstream response contained invalid JSON: {body}")]
	InvalidJson { body: String },
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error(
		"All credentials ({total}) are timed out; every credential has been reset to a good state. \
		 Consider configuring additional credentials or reviewing the pool backoff settings."
	)]
	PoolExhausted { total: usize },
	#[error("Response size {size} bytes exceeds the configured guard of {limit} bytes.")]
	ResponseTooLarge { size: u64, limit: u64 },
	#[error("A non-empty session credential is required for mutating requests.")]
	SessionRequired,
	#[error("Upstream API error: {message} (status code: {status})")]
	Upstream { status: http::StatusCode, message: String },
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
impl Error {
	/// Whether the error means the upstream exchange never completed.
	///
	/// Such failures say nothing about credential health.
	pub fn is_transport(&self) -> bool {
		matches!(self, Self::Reqwest(_) | Self::Cancelled | Self::DeadlineElapsed(_))
	}

	/// Upstream status code carried by the error, if any.
	pub fn status(&self) -> Option<http::StatusCode> {
		match self {
			Self::Upstream { status, .. } => Some(*status),
			Self::Reqwest(err) => err.status(),
			_ => None,
		}
	}
}
#[cfg(feature = "prometheus")]
impl From<metrics_exporter_prometheus::BuildError> for Error {
	fn from(value: metrics_exporter_prometheus::BuildError) -> Self {
		Self::Metrics(value.to_string())
	}
}
