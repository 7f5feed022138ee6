//! Integration tests against mock upstreams.

mod credential_rotation;
mod dispatch_caching;
mod session_requests;

// crates.io
use upstream_relay::RelayConfig;
use url::Url;
use wiremock::MockServer;

const OK_ENVELOPE: &str = r#"{"error":false,"message":"","body":{"id":"1","title":"sunset"}}"#;
const OK_BODY: &str = r#"{"id":"1","title":"sunset"}"#;

fn relay_config<I, S>(credentials: I, cache: bool) -> RelayConfig
where
	I: IntoIterator<Item = S>,
	S: Into<String>,
{
	let mut config = RelayConfig::with_credentials(credentials);

	config.cache.enabled = cache;
	config.cache.compress = cache;

	config
}

fn endpoint(server: &MockServer, path: &str) -> Url {
	Url::parse(&format!("{}{path}", server.uri())).expect("mock url")
}
