mod common;

// std
use std::sync::Arc;
// crates.io
use httpmock::prelude::*;
// self
use storage_token_broker::{
	MemoryConfig, NativeConfig, NativeKeys, RequestInterceptor, TokenBroker,
};
use time::Duration;

#[tokio::test]
async fn published_entry_round_trips_for_shared_key() {
	let target = Arc::new(MemoryConfig::default());
	let broker = Arc::new(TokenBroker::new(&common::shared_key_config()).expect("Broker should build."));
	let interceptor = RequestInterceptor::new(broker, common::account(), target.clone());
	let token = interceptor.before_work().await.expect("Publishing should succeed.");

	assert_eq!(target.get(NativeKeys::ACCOUNT).as_deref(), Some(common::ACCOUNT));
	assert_eq!(target.get(NativeKeys::SAS_TOKEN).as_deref(), Some(token.value.expose()));
	assert_eq!(interceptor.published_token().as_deref(), Some(token.value.expose()));
	assert!(target.get(NativeKeys::ACCESS_TOKEN).is_none());
}

#[tokio::test]
async fn workload_identity_publishes_under_access_token_key() {
	let server = MockServer::start_async().await;
	let _mock = server
		.mock_async(|when, then| {
			when.method(GET).path(common::IDENTITY_PATH);
			then.status(200)
				.header("content-type", "application/json")
				.body(common::identity_body("bearer-for-gdal", 3600));
		})
		.await;
	let target = Arc::new(MemoryConfig::default());
	let broker = Arc::new(
		TokenBroker::new(&common::managed_identity_config(&server, Duration::seconds(10)))
			.expect("Broker should build."),
	);
	let interceptor = RequestInterceptor::new(broker, common::account(), target.clone())
		.with_keys(NativeKeys { account: "STORAGE_ACCOUNT".into(), token: "STORAGE_TOKEN".into() });
	let len = interceptor
		.run(|token| async move { token.value.expose().len() })
		.await
		.expect("Work should run after publishing.");

	assert_eq!(len, "bearer-for-gdal".len());
	assert_eq!(target.get("STORAGE_TOKEN").as_deref(), Some("bearer-for-gdal"));
	assert_eq!(interceptor.published_token().as_deref(), Some("bearer-for-gdal"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_work_sees_the_published_token() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path(common::IDENTITY_PATH);
			then.status(200)
				.header("content-type", "application/json")
				.delay(std::time::Duration::from_millis(100))
				.body(common::identity_body("published-once", 3600));
		})
		.await;
	let target = Arc::new(MemoryConfig::default());
	let broker = Arc::new(
		TokenBroker::new(&common::managed_identity_config(&server, Duration::seconds(10)))
			.expect("Broker should build."),
	);
	let interceptor = Arc::new(RequestInterceptor::new(broker, common::account(), target.clone()));
	let mut handles = Vec::new();

	for _ in 0..16 {
		let interceptor = interceptor.clone();

		handles.push(tokio::spawn(async move {
			interceptor
				.run(|token| {
					let interceptor = interceptor.clone();

					async move { (token.value.expose().to_owned(), interceptor.published_token()) }
				})
				.await
		}));
	}

	for handle in handles {
		let (passed, published) = handle
			.await
			.expect("Task should not panic.")
			.expect("Work should run after publishing.");

		assert_eq!(passed, "published-once");
		assert_eq!(published.as_deref(), Some("published-once"));
	}

	mock.assert_calls_async(1).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_never_leaves_an_uncached_token_published() {
	for _ in 0..64 {
		let target = Arc::new(MemoryConfig::default());
		let broker =
			Arc::new(TokenBroker::new(&common::shared_key_config()).expect("Broker should build."));
		let interceptor =
			Arc::new(RequestInterceptor::new(broker, common::account(), target.clone()));

		interceptor.before_work().await.expect("Initial publish should succeed.");

		let worker = {
			let interceptor = interceptor.clone();

			tokio::spawn(async move { interceptor.before_work().await })
		};
		let closer = {
			let interceptor = interceptor.clone();

			tokio::spawn(async move { interceptor.shutdown().await })
		};

		worker.await.expect("Worker should not panic.").expect("Publishing should succeed.");
		closer.await.expect("Shutdown should not panic.");

		if target.get(NativeKeys::SAS_TOKEN).is_some() {
			assert!(interceptor.broker().status().has_token);
		}
	}
}
