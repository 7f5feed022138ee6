//! Credential health: quarantine, rotation, exhaustion, and failures that never reach upstream.

// std
use std::time::Duration;
// crates.io
use upstream_relay::{
	CancellationToken, CredentialScope, Dispatcher, Error, Result, UpstreamRequest,
	pool::credential::CredentialHealth,
};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{header_regex, method, path},
};
// self
use crate::{OK_ENVELOPE, endpoint, relay_config};

#[tokio::test]
async fn failing_credential_is_quarantined_and_skipped() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/ajax/illust/1"))
		.and(header_regex("cookie", "PHPSESSID=bad-secret(;|$)"))
		.respond_with(
			ResponseTemplate::new(429)
				.set_body_string(r#"{"error":true,"message":"Rate limited","body":[]}"#),
		)
		.with_priority(1)
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/ajax/illust/1"))
		.and(header_regex("cookie", "PHPSESSID=good-secret(;|$)"))
		.respond_with(ResponseTemplate::new(200).set_body_string(OK_ENVELOPE))
		.expect(3)
		.mount(&server)
		.await;

	let mut config = relay_config(["bad-secret", "good-secret"], false);

	config.pool.base_backoff = Duration::from_secs(60);
	config.pool.max_backoff = Duration::from_secs(120);

	let dispatcher = Dispatcher::new(config)?;
	let request = UpstreamRequest::get(endpoint(&server, "/ajax/illust/1"));

	match dispatcher.fetch_json(&request).await {
		Err(Error::Upstream { status, message }) => {
			assert_eq!(status.as_u16(), 429);
			assert_eq!(message, "Rate limited");
		},
		other => panic!("expected upstream error, got {other:?}"),
	}

	for _ in 0..3 {
		dispatcher.fetch_json(&request).await?;
	}

	let status = dispatcher.pool().status();

	assert_eq!(status[0].health, CredentialHealth::TimedOut);
	assert_eq!(status[0].failure_count, 1);
	assert!(status[0].backoff_until.is_some());
	assert_eq!(status[0].secret, "bad-***");
	assert_eq!(status[1].health, CredentialHealth::Good);
	assert_eq!(status[1].failure_count, 0);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn exhausted_pool_fails_fast_then_recovers() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/ajax/illust/1"))
		.respond_with(ResponseTemplate::new(500))
		.expect(2)
		.mount(&server)
		.await;

	let mut config = relay_config(["only-secret"], false);

	config.pool.base_backoff = Duration::from_secs(60);
	config.pool.max_backoff = Duration::from_secs(60);

	let dispatcher = Dispatcher::new(config)?;
	let request = UpstreamRequest::get(endpoint(&server, "/ajax/illust/1"));

	assert!(matches!(
		dispatcher.fetch_json(&request).await,
		Err(Error::Upstream { message, .. }) if message == "Internal Server Error"
	));

	let exhausted = dispatcher.fetch_json(&request).await;

	assert!(matches!(exhausted, Err(Error::PoolExhausted { total: 1 })));
	assert!(
		exhausted.err().map(|err| err.to_string()).is_some_and(|msg| msg.contains("reset")),
		"exhaustion message should be actionable"
	);
	assert_eq!(dispatcher.pool().status()[0].health, CredentialHealth::Good);
	assert!(matches!(dispatcher.fetch_json(&request).await, Err(Error::Upstream { .. })));

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn deadline_and_cancellation_leave_credentials_untouched() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/ajax/slow"))
		.respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
		.mount(&server)
		.await;

	let dispatcher = Dispatcher::new(relay_config(["a"], true))?;
	let url = endpoint(&server, "/ajax/slow");
	let timed = UpstreamRequest::get(url.clone()).deadline(Duration::from_millis(150));

	assert!(matches!(
		dispatcher.fetch_json(&timed).await,
		Err(Error::DeadlineElapsed(deadline)) if deadline == Duration::from_millis(150)
	));

	let token = CancellationToken::new();
	let cancelled = UpstreamRequest::get(url.clone()).cancel_on(token.clone());
	let canceller = tokio::spawn(async move {
		tokio::time::sleep(Duration::from_millis(100)).await;
		token.cancel();
	});

	assert!(matches!(dispatcher.fetch_json(&cancelled).await, Err(Error::Cancelled)));

	canceller.await.expect("canceller");

	let pre_cancelled = CancellationToken::new();

	pre_cancelled.cancel();

	assert!(matches!(
		dispatcher.fetch_json(&UpstreamRequest::get(url).cancel_on(pre_cancelled)).await,
		Err(Error::Cancelled)
	));

	let status = dispatcher.pool().status();

	assert_eq!(status[0].health, CredentialHealth::Good);
	assert_eq!(status[0].failure_count, 0);
	assert_eq!(dispatcher.cache().store().map(|store| store.len()), Some(0));
	assert_eq!(dispatcher.metrics().transport_errors, 3);

	Ok(())
}

#[tokio::test]
async fn oversized_responses_are_rejected() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/ajax/huge"))
		.respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 4096]))
		.expect(1)
		.mount(&server)
		.await;

	let mut config = relay_config(["a"], true);

	config.request.max_response_bytes = 1024;

	let dispatcher = Dispatcher::new(config)?;

	assert!(matches!(
		dispatcher.fetch_raw(&UpstreamRequest::get(endpoint(&server, "/ajax/huge"))).await,
		Err(Error::ResponseTooLarge { limit: 1024, .. })
	));
	assert_eq!(dispatcher.pool().status()[0].failure_count, 0);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn anonymous_scope_synthesizes_a_fresh_identity() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/ajax/illust/1"))
		.and(header_regex("cookie", "PHPSESSID=[a-z]{33}(;|$)"))
		.and(header_regex("cookie", "yuid_b=[A-Za-z0-9]{7}(;|$)"))
		.and(header_regex("cookie", "p_ab_id=[0-9](;|$)"))
		.and(header_regex("cookie", "p_ab_id_2=[0-9](;|$)"))
		.and(header_regex("cookie", "p_ab_d_id=[0-9]+(;|$)"))
		.respond_with(ResponseTemplate::new(503))
		.expect(2)
		.mount(&server)
		.await;

	let dispatcher = Dispatcher::new(relay_config(["pooled-secret"], false))?;
	let request = UpstreamRequest::get(endpoint(&server, "/ajax/illust/1"))
		.scope(CredentialScope::Anonymous);

	for _ in 0..2 {
		assert!(matches!(dispatcher.fetch_json(&request).await, Err(Error::Upstream { .. })));
	}

	assert_eq!(dispatcher.pool().status()[0].failure_count, 0);

	server.verify().await;

	Ok(())
}
