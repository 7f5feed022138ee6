//! Cache-aware dispatch: hits, scoping, exclusions, directives, and invalidation.

// crates.io
use http::{HeaderValue, StatusCode, header::CACHE_CONTROL};
use upstream_relay::{CredentialScope, Dispatcher, Error, Result, UpstreamRequest};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};
// self
use crate::{OK_BODY, OK_ENVELOPE, endpoint, relay_config};

async fn mount_ok(server: &MockServer, route: &str, expected_calls: u64) {
	Mock::given(method("GET"))
		.and(path(route))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_string(OK_ENVELOPE)
				.insert_header("content-type", "application/json"),
		)
		.expect(expected_calls)
		.mount(server)
		.await;
}

#[tokio::test]
async fn cache_hit_skips_the_network() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	mount_ok(&server, "/ajax/illust/1", 1).await;

	let dispatcher = Dispatcher::new(relay_config(["a", "b"], true))?;
	let request = UpstreamRequest::get(endpoint(&server, "/ajax/illust/1"));
	let first = dispatcher.fetch_json(&request).await?;
	let second = dispatcher.fetch_json(&request).await?;
	let raw = dispatcher.fetch_raw(&request).await?;

	assert_eq!(first, OK_BODY.as_bytes());
	assert_eq!(second, first);
	assert!(raw.from_cache);
	assert_eq!(raw.status, StatusCode::OK);
	assert_eq!(raw.headers.get("content-type").expect("content type"), "application/json");

	let metrics = dispatcher.metrics();

	assert_eq!(metrics.total_requests, 3);
	assert_eq!(metrics.cache_hits, 2);
	assert_eq!(metrics.cache_misses, 1);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn cached_responses_are_scoped_by_session() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	mount_ok(&server, "/ajax/user/123456/following", 3).await;

	let dispatcher = Dispatcher::new(relay_config(["a"], true))?;
	let url = endpoint(&server, "/ajax/user/123456/following");

	for scope in [
		CredentialScope::session("123456_victimsecret"),
		CredentialScope::session("123456_attackerguess"),
		CredentialScope::Pooled,
		CredentialScope::session("123456_victimsecret"),
	] {
		dispatcher.fetch_json(&UpstreamRequest::get(url.clone()).scope(scope)).await?;
	}

	assert_eq!(dispatcher.metrics().cache_hits, 1);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn excluded_paths_always_go_upstream() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	mount_ok(&server, "/ajax/discovery/artworks", 2).await;

	let dispatcher = Dispatcher::new(relay_config(["a"], true))?;
	let request = UpstreamRequest::get(endpoint(&server, "/ajax/discovery/artworks"));

	dispatcher.fetch_json(&request).await?;
	dispatcher.fetch_json(&request).await?;

	assert_eq!(dispatcher.cache().store().map(|store| store.len()), Some(0));

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn no_cache_directive_refreshes_the_entry() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	mount_ok(&server, "/ajax/illust/2", 2).await;

	let dispatcher = Dispatcher::new(relay_config(["a"], true))?;
	let url = endpoint(&server, "/ajax/illust/2");
	let plain = UpstreamRequest::get(url.clone());
	let refresh = UpstreamRequest::get(url.clone())
		.header(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
	let no_store = UpstreamRequest::get(url)
		.header(CACHE_CONTROL, HeaderValue::from_static("no-store"));

	dispatcher.fetch_json(&plain).await?;
	dispatcher.fetch_json(&refresh).await?;

	assert!(dispatcher.fetch_raw(&plain).await?.from_cache);

	server.verify().await;
	dispatcher.cache().store().expect("store").clear();
	server.reset().await;
	mount_ok(&server, "/ajax/illust/2", 2).await;

	dispatcher.fetch_json(&no_store).await?;

	assert_eq!(dispatcher.cache().store().map(|store| store.len()), Some(0));

	dispatcher.fetch_json(&plain).await?;

	assert_eq!(dispatcher.cache().store().map(|store| store.len()), Some(1));
	assert!(dispatcher.fetch_raw(&no_store).await?.from_cache, "no-store reads a warm entry");

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn invalidation_forces_a_refetch() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	mount_ok(&server, "/ajax/user/1/profile", 2).await;
	mount_ok(&server, "/ajax/illust/3", 1).await;

	let dispatcher = Dispatcher::new(relay_config(["a"], true))?;
	let profile = UpstreamRequest::get(endpoint(&server, "/ajax/user/1/profile"));
	let illust = UpstreamRequest::get(endpoint(&server, "/ajax/illust/3"));

	dispatcher.fetch_json(&profile).await?;
	dispatcher.fetch_json(&illust).await?;

	let invalidation = dispatcher.invalidate_by_prefix(&[endpoint(&server, "/ajax/user/1/")]);

	assert_eq!(invalidation.count, 1);
	assert_eq!(invalidation.urls, [profile.url().to_string()]);

	dispatcher.fetch_json(&profile).await?;
	dispatcher.fetch_json(&illust).await?;

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn failed_responses_are_not_cached() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/ajax/illust/404"))
		.respond_with(
			ResponseTemplate::new(404)
				.set_body_string(r#"{"error":true,"message":"Work has been deleted","body":[]}"#),
		)
		.expect(2)
		.mount(&server)
		.await;

	let dispatcher = Dispatcher::new(relay_config(["a", "b"], true))?;
	let request = UpstreamRequest::get(endpoint(&server, "/ajax/illust/404"));

	for _ in 0..2 {
		match dispatcher.fetch_json(&request).await {
			Err(Error::Upstream { status, message }) => {
				assert_eq!(status, StatusCode::NOT_FOUND);
				assert_eq!(message, "Work has been deleted");
			},
			other => panic!("expected upstream error, got {other:?}"),
		}
	}

	assert_eq!(dispatcher.cache().store().map(|store| store.len()), Some(0));

	server.verify().await;

	Ok(())
}
