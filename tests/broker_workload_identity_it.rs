mod common;

// crates.io
use httpmock::prelude::*;
// self
use storage_token_broker::{
	Error, SourceKind, TokenBroker, TokenHealth,
	error::{AcquisitionCause, AcquisitionError},
};
use time::Duration;

#[tokio::test]
async fn managed_identity_request_carries_resource_and_metadata_header() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET)
				.path(common::IDENTITY_PATH)
				.query_param("api-version", "2018-02-01")
				.query_param("resource", "https://storage.azure.com/")
				.header("Metadata", "true");
			then.status(200)
				.header("content-type", "application/json")
				.body(common::identity_body("identity-token", 3600));
		})
		.await;
	let broker = TokenBroker::new(&common::managed_identity_config(&server, Duration::seconds(10)))
		.expect("Broker should build.");
	let token = broker.ensure_fresh().await.expect("Managed identity call should succeed.");

	assert_eq!(token.value.expose(), "identity-token");
	assert_eq!(token.source, SourceKind::WorkloadIdentity);
	assert_eq!(broker.status().health, TokenHealth::Valid);

	mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn concurrent_refreshes_call_identity_endpoint_once() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path(common::IDENTITY_PATH);
			then.status(200)
				.header("content-type", "application/json")
				.delay(std::time::Duration::from_millis(200))
				.body(common::identity_body("shared-token", 3600));
		})
		.await;
	let broker = TokenBroker::new(&common::managed_identity_config(&server, Duration::seconds(10)))
		.expect("Broker should build.");
	let (a, b, c, d) = tokio::join!(
		broker.ensure_fresh(),
		broker.ensure_fresh(),
		broker.ensure_fresh(),
		broker.ensure_fresh(),
	);

	for result in [a, b, c, d] {
		assert_eq!(
			result.expect("Every waiter should receive the token.").value.expose(),
			"shared-token"
		);
	}

	mock.assert_calls_async(1).await;

	assert_eq!(broker.metrics().attempts(), 1);
}

#[tokio::test]
async fn failed_refresh_falls_back_to_unexpired_token() {
	let server = MockServer::start_async().await;
	// 120 seconds is inside the default five minute margin, so the next call refreshes.
	let first = server
		.mock_async(|when, then| {
			when.method(GET).path(common::IDENTITY_PATH);
			then.status(200)
				.header("content-type", "application/json")
				.body(common::identity_body("short-lived", 120));
		})
		.await;
	let broker = TokenBroker::new(&common::managed_identity_config(&server, Duration::seconds(10)))
		.expect("Broker should build.");
	let cached = broker.ensure_fresh().await.expect("Initial call should succeed.");

	first.delete_async().await;

	let failing = server
		.mock_async(|when, then| {
			when.method(GET).path(common::IDENTITY_PATH);
			then.status(503).header("retry-after", "30").body("maintenance");
		})
		.await;
	let served = broker.ensure_fresh().await.expect("Fallback should return the cached token.");
	let status = broker.status();
	let metrics = broker.metrics();

	assert_eq!(served, cached);
	assert_eq!(status.health, TokenHealth::Expiring);
	assert!(status.last_error.as_deref().is_some_and(|err| err.starts_with("upstream")));
	assert_eq!(metrics.failures(), 1);
	assert_eq!(metrics.fallbacks(), 1);
	assert_eq!(metrics.short_lived(), 1);

	failing.assert_calls_async(1).await;
}

#[tokio::test]
async fn token_inside_margin_is_flagged_and_refetched() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path(common::IDENTITY_PATH);
			then.status(200)
				.header("content-type", "application/json")
				.body(common::identity_body("barely-valid", 60));
		})
		.await;
	let broker = TokenBroker::new(&common::managed_identity_config(&server, Duration::seconds(10)))
		.expect("Broker should build.");
	let token = broker.ensure_fresh().await.expect("Acquisition should succeed.");
	let status = broker.status();

	assert_eq!(token.value.expose(), "barely-valid");
	assert_eq!(status.health, TokenHealth::Expiring);
	assert!(status.last_error.as_deref().is_some_and(|err| err.starts_with("short_lived")));
	assert_eq!(broker.metrics().short_lived(), 1);
	assert_eq!(broker.metrics().fallbacks(), 0);

	broker.ensure_fresh().await.expect("Second acquisition should succeed.");

	mock.assert_calls_async(2).await;
	assert_eq!(broker.metrics().short_lived(), 2);
}

#[tokio::test]
async fn failure_without_cached_token_propagates() {
	let server = MockServer::start_async().await;
	let _mock = server
		.mock_async(|when, then| {
			when.method(GET).path(common::IDENTITY_PATH);
			then.status(403)
				.header("content-type", "application/json")
				.body("{\"error\":\"invalid_request\",\"error_description\":\"Identity not found\"}");
		})
		.await;
	let broker = TokenBroker::new(&common::managed_identity_config(&server, Duration::seconds(10)))
		.expect("Broker should build.");
	let err = broker.ensure_fresh().await.expect_err("Denied request should fail.");

	match err {
		Error::Acquisition(inner) => {
			assert_eq!(inner.cause(), AcquisitionCause::PermissionDenied);
			assert_eq!(inner.status(), Some(403));
			assert!(inner.to_string().contains("Identity not found"));
		},
		other => panic!("Unexpected error: {other:?}"),
	}

	let status = broker.status();

	assert!(!status.has_token);
	assert_eq!(status.health, TokenHealth::Missing);
	assert!(status.last_error.is_some());
}

#[tokio::test]
async fn slow_identity_endpoint_times_out() {
	let server = MockServer::start_async().await;
	let _mock = server
		.mock_async(|when, then| {
			when.method(GET).path(common::IDENTITY_PATH);
			then.status(200)
				.delay(std::time::Duration::from_secs(3))
				.body(common::identity_body("too-late", 3600));
		})
		.await;
	let broker = TokenBroker::new(&common::managed_identity_config(&server, Duration::seconds(1)))
		.expect("Broker should build.");
	let err = broker.ensure_fresh().await.expect_err("Slow endpoint should time out.");

	assert!(matches!(err, Error::Acquisition(AcquisitionError::Timeout { .. })));
}

#[tokio::test]
async fn malformed_identity_response_is_reported() {
	let server = MockServer::start_async().await;
	let _mock = server
		.mock_async(|when, then| {
			when.method(GET).path(common::IDENTITY_PATH);
			then.status(200).header("content-type", "application/json").body("{\"token\":1}");
		})
		.await;
	let broker = TokenBroker::new(&common::managed_identity_config(&server, Duration::seconds(10)))
		.expect("Broker should build.");
	let err = broker.ensure_fresh().await.expect_err("Malformed body should fail.");

	match err {
		Error::Acquisition(inner) => assert_eq!(inner.cause(), AcquisitionCause::MalformedResponse),
		other => panic!("Unexpected error: {other:?}"),
	}
}

#[tokio::test]
async fn federated_exchange_reads_projected_token() {
	let server = MockServer::start_async().await;
	let token_file = std::env::temp_dir()
		.join(format!("storage-token-broker-federated-{}", std::process::id()));

	std::fs::write(&token_file, "projected-jwt\n").expect("Token file should be writable.");

	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/contoso/oauth2/v2.0/token")
				.form_urlencoded_tuple("grant_type", "client_credentials")
				.form_urlencoded_tuple("scope", "https://storage.azure.com/.default")
				.form_urlencoded_tuple("client_assertion", "projected-jwt");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"federated-token\",\"token_type\":\"bearer\",\"expires_in\":3600}",
			);
		})
		.await;
	let broker = TokenBroker::new(&common::federated_config(&server, token_file.clone()))
		.expect("Broker should build.");
	let token = broker.ensure_fresh().await.expect("Federated exchange should succeed.");

	assert_eq!(token.value.expose(), "federated-token");
	assert_eq!(token.expires_at - token.issued_at, Duration::hours(1));

	mock.assert_calls_async(1).await;

	let _ = std::fs::remove_file(token_file);
}

#[tokio::test]
async fn federated_invalid_client_is_permission_denied() {
	let server = MockServer::start_async().await;
	let token_file = std::env::temp_dir()
		.join(format!("storage-token-broker-denied-{}", std::process::id()));

	std::fs::write(&token_file, "stale-jwt").expect("Token file should be writable.");

	let _mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/contoso/oauth2/v2.0/token");
			then.status(401).header("content-type", "application/json").body(
				"{\"error\":\"invalid_client\",\"error_description\":\"assertion expired\"}",
			);
		})
		.await;
	let broker = TokenBroker::new(&common::federated_config(&server, token_file.clone()))
		.expect("Broker should build.");
	let err = broker.ensure_fresh().await.expect_err("Invalid client should fail.");

	match err {
		Error::Acquisition(inner) => assert_eq!(inner.cause(), AcquisitionCause::PermissionDenied),
		other => panic!("Unexpected error: {other:?}"),
	}

	let _ = std::fs::remove_file(token_file);
}
