//! Resilient upstream request layer: a health-tracked credential pool, a compressed LRU response
//! cache, and a dispatcher that ties them together for concurrent callers.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod http;
pub mod metrics;
pub mod pool;

mod error;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	cache::manager::{CacheManager, Invalidation},
	config::{CacheConfig, PoolConfig, RelayConfig, RequestConfig},
	dispatcher::{Dispatcher, DispatcherBuilder},
	error::{Error, Result},
	http::client::{Payload, UpstreamRequest, UpstreamResponse},
	metrics::RelayMetricsSnapshot,
	pool::{CredentialPool, CredentialScope, strategy::SelectionStrategy},
};
pub use tokio_util::sync::CancellationToken;
