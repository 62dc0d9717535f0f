//! Transport primitives for identity endpoint calls.
//!
//! Every outbound request (managed identity lookups and federated token exchanges) goes through
//! [`ReqwestHttpClient::instrumented`], which yields an [`AsyncHttpClient`] handle that records
//! the response status and `Retry-After` hint in a [`ResponseMetadataSlot`]. The slot lets
//! [`map_transport_error`] and the status classifiers attach consistent metadata to
//! [`AcquisitionError`] values.

// std
use std::ops::Deref;
// crates.io
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
use reqwest::{
	header::{HeaderMap, RETRY_AFTER},
	redirect::Policy,
};
use time::format_description::well_known::Rfc2822;
// self
use crate::{
	_prelude::*,
	error::{AcquisitionError, ConfigError},
};

/// Captures metadata from the most recent HTTP response for downstream error mapping.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadata {
	/// HTTP status code returned by the identity endpoint, if available.
	pub status: Option<u16>,
	/// Retry-After hint expressed as a relative duration.
	pub retry_after: Option<Duration>,
}

/// Thread-safe slot for sharing [`ResponseMetadata`] between transport and error layers.
///
/// A fresh slot is created for each token request and read immediately after the request
/// resolves.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Stores new metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Returns the captured metadata, if any, consuming it from the slot.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
///
/// Identity endpoints answer directly, so redirects are never followed; configure any custom
/// client passed to [`ReqwestHttpClient::with_client`] the same way.
#[derive(Clone, Debug)]
pub struct ReqwestHttpClient(pub ReqwestClient);
impl ReqwestHttpClient {
	/// Builds a client that does not follow redirects.
	pub fn new() -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder().redirect(Policy::none()).build()?;

		Ok(Self(client))
	}

	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Builds an instrumented handle that captures response metadata into `slot`.
	pub fn instrumented(&self, slot: ResponseMetadataSlot) -> InstrumentedHandle {
		InstrumentedHandle::new(self.0.clone(), slot)
	}
}
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

struct InstrumentedHttpClient {
	client: ReqwestClient,
	slot: ResponseMetadataSlot,
}

/// [`AsyncHttpClient`] adapter over reqwest that records response metadata.
#[derive(Clone)]
pub struct InstrumentedHandle(Arc<InstrumentedHttpClient>);
impl InstrumentedHandle {
	fn new(client: ReqwestClient, slot: ResponseMetadataSlot) -> Self {
		Self(Arc::new(InstrumentedHttpClient { client, slot }))
	}
}
impl Debug for InstrumentedHandle {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("InstrumentedHandle(..)")
	}
}
impl<'c> AsyncHttpClient<'c> for InstrumentedHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let client = Arc::clone(&self.0);

		Box::pin(async move {
			client.slot.take();

			let response = client
				.client
				.execute(request.try_into().map_err(Box::new)?)
				.await
				.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let retry_after = parse_retry_after(&headers);

			client.slot.store(ResponseMetadata { status: Some(status.as_u16()), retry_after });

			let mut response_new =
				HttpResponse::new(response.bytes().await.map_err(Box::new)?.to_vec());

			*response_new.status_mut() = status;
			*response_new.headers_mut() = headers;

			Ok(response_new)
		})
	}
}

/// Maps transport failures surfaced by [`InstrumentedHandle`] into [`AcquisitionError`].
pub fn map_transport_error(
	meta: Option<&ResponseMetadata>,
	err: HttpClientError<ReqwestError>,
) -> AcquisitionError {
	match err {
		HttpClientError::Reqwest(inner) if inner.is_builder() =>
			AcquisitionError::MalformedConfig { reason: inner.to_string() },
		HttpClientError::Reqwest(inner) if inner.is_timeout() => AcquisitionError::Upstream {
			message: "Request timed out while calling the identity endpoint".into(),
			status: meta_status(meta).or_else(|| inner.status().map(|code| code.as_u16())),
			retry_after: meta_retry_after(meta),
		},
		HttpClientError::Reqwest(inner) => AcquisitionError::from(*inner),
		HttpClientError::Http(inner) => AcquisitionError::MalformedConfig { reason: inner.to_string() },
		HttpClientError::Io(inner) => AcquisitionError::from(inner),
		HttpClientError::Other(message) => AcquisitionError::Upstream {
			message: format!("HTTP client error occurred while calling the identity endpoint: {message}"),
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		},
		_ => AcquisitionError::Upstream {
			message: "HTTP client error occurred while calling the identity endpoint".into(),
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		},
	}
}

/// Classifies a non-success HTTP status returned by an identity endpoint.
pub fn map_error_status(
	status: u16,
	reason: Option<String>,
	meta: Option<&ResponseMetadata>,
) -> AcquisitionError {
	let reason = reason.unwrap_or_else(|| format!("HTTP {status}"));

	match status {
		400 | 401 | 403 | 404 => AcquisitionError::PermissionDenied { reason, status: Some(status) },
		_ => AcquisitionError::Upstream {
			message: reason,
			status: Some(status),
			retry_after: meta_retry_after(meta),
		},
	}
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|value| value.retry_after)
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u32>() {
		return Some(Duration::seconds(i64::from(secs)));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}

#[cfg(test)]
mod tests {
	// crates.io
	use reqwest::header::HeaderValue;
	// self
	use super::*;

	#[test]
	fn retry_after_accepts_seconds() {
		let mut headers = HeaderMap::new();

		headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));

		assert_eq!(parse_retry_after(&headers), Some(Duration::seconds(30)));
		assert_eq!(parse_retry_after(&HeaderMap::new()), None);
	}

	#[test]
	fn error_statuses_split_into_denied_and_upstream() {
		let meta = ResponseMetadata { status: Some(503), retry_after: Some(Duration::seconds(5)) };

		assert!(matches!(
			map_error_status(403, Some("identity not assigned".into()), None),
			AcquisitionError::PermissionDenied { status: Some(403), .. }
		));
		assert!(matches!(
			map_error_status(503, None, Some(&meta)),
			AcquisitionError::Upstream { status: Some(503), retry_after: Some(_), .. }
		));
	}

	#[test]
	fn metadata_slot_take_consumes_value() {
		let slot = ResponseMetadataSlot::default();

		slot.store(ResponseMetadata { status: Some(200), retry_after: None });

		assert_eq!(slot.take().and_then(|meta| meta.status), Some(200));
		assert!(slot.take().is_none());
	}
}
