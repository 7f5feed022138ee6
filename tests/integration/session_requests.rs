//! Session-scoped POSTs: anti-forgery header, payload encoding, and cache bypass.

// crates.io
use upstream_relay::{
	CredentialScope, Dispatcher, Error, Payload, Result, UpstreamRequest, http::client::CSRF_HEADER,
};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{body_string, body_string_contains, header, header_regex, method, path},
};
// self
use crate::{endpoint, relay_config};

#[tokio::test]
async fn submit_sends_session_and_csrf_and_is_never_cached() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path("/ajax/illusts/bookmarks/add"))
		.and(header(CSRF_HEADER, "csrf-token-1"))
		.and(header("content-type", "application/json"))
		.and(header_regex("cookie", "^theme=dark; PHPSESSID=123456_sessionsecret$"))
		.and(body_string(r#"{"illust_id":"1","restrict":0}"#))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_string(r#"{"error":false,"message":"","body":{"last_bookmark_id":"9"}}"#),
		)
		.expect(2)
		.mount(&server)
		.await;

	let dispatcher = Dispatcher::new(relay_config(["pooled-secret"], true))?;
	let request = UpstreamRequest::post(
		endpoint(&server, "/ajax/illusts/bookmarks/add"),
		Payload::json(r#"{"illust_id":"1","restrict":0}"#),
	)
	.scope(CredentialScope::session("123456_sessionsecret"))
	.cookie("theme", "dark")
	.cookie("PHPSESSID", "stale-value")
	.csrf_token("csrf-token-1");

	for _ in 0..2 {
		assert_eq!(dispatcher.submit_json(&request).await?, br#"{"last_bookmark_id":"9"}"#);
	}

	assert_eq!(dispatcher.cache().store().map(|store| store.len()), Some(0));
	assert_eq!(dispatcher.metrics().cache_hits, 0);
	assert_eq!(dispatcher.pool().status()[0].failure_count, 0);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn multipart_payload_is_encoded_as_form_fields() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path("/rpc/post_comment.php"))
		.and(header_regex("content-type", "^multipart/form-data; boundary="))
		.and(body_string_contains("name=\"comment\""))
		.and(body_string_contains("lovely colours"))
		.respond_with(ResponseTemplate::new(200).set_body_string(r#"{"body":{"comment_id":7}}"#))
		.expect(1)
		.mount(&server)
		.await;

	let dispatcher = Dispatcher::new(relay_config(["pooled-secret"], false))?;
	let request = UpstreamRequest::post(
		endpoint(&server, "/rpc/post_comment.php"),
		Payload::Multipart(vec![
			("type".into(), "comment".into()),
			("comment".into(), "lovely colours".into()),
		]),
	)
	.scope(CredentialScope::session("123456_sessionsecret"));

	assert_eq!(dispatcher.submit_json(&request).await?, br#"{"comment_id":7}"#);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn in_band_error_envelope_is_an_upstream_error() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path("/ajax/follow"))
		.respond_with(ResponseTemplate::new(200).set_body_string(r#"{"error":true,"body":[]}"#))
		.expect(1)
		.mount(&server)
		.await;

	let dispatcher = Dispatcher::new(relay_config(["pooled-secret"], false))?;
	let request =
		UpstreamRequest::post(endpoint(&server, "/ajax/follow"), Payload::form("mode=add&id=1"))
			.scope(CredentialScope::session("123456_sessionsecret"));

	match dispatcher.submit_json(&request).await {
		Err(Error::Upstream { status, message }) => {
			assert_eq!(status.as_u16(), 200);
			assert_eq!(message, "API response contained an error with no message");
		},
		other => panic!("expected in-band upstream error, got {other:?}"),
	}

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn post_without_session_never_reaches_upstream() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(200))
		.expect(0)
		.mount(&server)
		.await;

	let dispatcher = Dispatcher::new(relay_config(["pooled-secret"], false))?;
	let request = UpstreamRequest::post(endpoint(&server, "/ajax/follow"), Payload::json("{}"));

	assert!(matches!(dispatcher.submit_json(&request).await, Err(Error::SessionRequired)));
	assert!(matches!(
		dispatcher
			.submit_json(&request.clone().scope(CredentialScope::session("")))
			.await,
		Err(Error::SessionRequired)
	));

	server.verify().await;

	Ok(())
}
