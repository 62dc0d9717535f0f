//! Ambient workload identity: bearer tokens from a managed identity endpoint or a federated
//! token exchange.
//!
//! No key material is stored. Managed identity calls are plain `GET` requests against the
//! instance metadata service (or an app-hosting equivalent); the federated variant reads the
//! projected service-account token on every acquisition so rotated files are picked up.

// std
use std::path::{Path, PathBuf};
// crates.io
use oauth2::{
	AsyncHttpClient,
	http::{Method, Request},
};
// self
use crate::{
	_prelude::*,
	auth::{IdentityClientId, ResourceScope, Token, TokenSecret},
	config::{AmbientIdentity, CredentialConfig},
	error::{AcquisitionError, ConfigError},
	http::{self, ReqwestHttpClient, ResponseMetadataSlot},
	oauth::FederatedFacade,
	source::SourceKind,
};

const MANAGED_IDENTITY_API_VERSION: &str = "2018-02-01";
const IDENTITY_HEADER: &str = "X-IDENTITY-HEADER";

/// Requests bearer tokens for the ambient workload identity.
#[derive(Debug)]
pub struct WorkloadIdentityOAuth {
	provider: Provider,
}
impl WorkloadIdentityOAuth {
	/// Builds the source from validated credential settings.
	pub fn from_config(
		config: &CredentialConfig,
		http_client: Arc<ReqwestHttpClient>,
	) -> Result<Self, ConfigError> {
		let provider = match &config.identity {
			AmbientIdentity::ManagedIdentity { endpoint, identity_header } => Provider::Managed {
				endpoint: endpoint.clone(),
				identity_header: identity_header.clone(),
				client_id: config.client_id.clone(),
				http_client,
			},
			AmbientIdentity::Federated { authority, tenant, token_file } => {
				let client_id = config
					.client_id
					.as_ref()
					.ok_or(ConfigError::MissingSetting { name: "client_id" })?;
				let token_url = AmbientIdentity::federated_token_url(authority, tenant)?;

				Provider::Federated {
					facade: FederatedFacade::new(&token_url, client_id, http_client)?,
					token_file: token_file.clone(),
				}
			},
		};

		Ok(Self { provider })
	}

	/// Requests a new bearer token for `scope`.
	pub async fn acquire_token(&self, scope: &ResourceScope) -> Result<Token, AcquisitionError> {
		match &self.provider {
			Provider::Managed { endpoint, identity_header, client_id, http_client } =>
				request_managed_identity(
					http_client,
					endpoint,
					identity_header.as_ref(),
					client_id.as_ref(),
					scope,
				)
				.await,
			Provider::Federated { facade, token_file } => {
				let assertion = read_assertion(token_file).await?;

				facade.exchange(scope, &assertion).await
			},
		}
	}
}

enum Provider {
	Managed {
		endpoint: Url,
		identity_header: Option<TokenSecret>,
		client_id: Option<IdentityClientId>,
		http_client: Arc<ReqwestHttpClient>,
	},
	Federated {
		facade: FederatedFacade,
		token_file: PathBuf,
	},
}
impl Debug for Provider {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Managed { endpoint, identity_header, client_id, .. } => f
				.debug_struct("Managed")
				.field("endpoint", &endpoint.as_str())
				.field("identity_header_set", &identity_header.is_some())
				.field("client_id", client_id)
				.finish(),
			Self::Federated { facade, token_file } => f
				.debug_struct("Federated")
				.field("facade", facade)
				.field("token_file", token_file)
				.finish(),
		}
	}
}

#[derive(Deserialize)]
struct ManagedIdentityResponse {
	access_token: String,
	#[serde(default)]
	expires_on: Option<NumberOrString>,
	#[serde(default)]
	expires_in: Option<NumberOrString>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
	Number(i64),
	Text(String),
}
impl NumberOrString {
	fn as_i64(&self, field: &str) -> Result<i64, AcquisitionError> {
		match self {
			Self::Number(value) => Ok(*value),
			Self::Text(raw) => raw.trim().parse().map_err(|_| AcquisitionError::InvalidToken {
				reason: format!("{field} is not an integer: {raw}"),
			}),
		}
	}
}

#[derive(Deserialize)]
struct ErrorBody {
	#[serde(default)]
	error: Option<String>,
	#[serde(default)]
	error_description: Option<String>,
}

async fn request_managed_identity(
	http_client: &ReqwestHttpClient,
	endpoint: &Url,
	identity_header: Option<&TokenSecret>,
	client_id: Option<&IdentityClientId>,
	scope: &ResourceScope,
) -> Result<Token, AcquisitionError> {
	let mut url = endpoint.clone();

	{
		let mut query = url.query_pairs_mut();

		query
			.append_pair("api-version", MANAGED_IDENTITY_API_VERSION)
			.append_pair("resource", scope.resource());

		if let Some(client_id) = client_id {
			query.append_pair("client_id", client_id.as_str());
		}
	}

	let mut builder =
		Request::builder().method(Method::GET).uri(url.as_str()).header("Metadata", "true");

	if let Some(secret) = identity_header {
		builder = builder.header(IDENTITY_HEADER, secret.expose());
	}

	let request = builder
		.body(Vec::new())
		.map_err(|err| AcquisitionError::MalformedConfig { reason: err.to_string() })?;
	let meta = ResponseMetadataSlot::default();
	let handle = http_client.instrumented(meta.clone());
	let response = handle
		.call(request)
		.await
		.map_err(|err| http::map_transport_error(meta.take().as_ref(), err))?;
	let status = response.status();

	if !status.is_success() {
		return Err(http::map_error_status(
			status.as_u16(),
			error_reason(response.body()),
			meta.take().as_ref(),
		));
	}

	let mut deserializer = serde_json::Deserializer::from_slice(response.body());
	let body: ManagedIdentityResponse = serde_path_to_error::deserialize(&mut deserializer)
		.map_err(|source| AcquisitionError::ResponseParse { source, status: Some(status.as_u16()) })?;

	managed_identity_token(scope, body, OffsetDateTime::now_utc())
}

fn managed_identity_token(
	scope: &ResourceScope,
	body: ManagedIdentityResponse,
	now: OffsetDateTime,
) -> Result<Token, AcquisitionError> {
	let expires_at = match (&body.expires_on, &body.expires_in) {
		(Some(expires_on), _) =>
			OffsetDateTime::from_unix_timestamp(expires_on.as_i64("expires_on")?).map_err(|err| {
				AcquisitionError::InvalidToken { reason: format!("expires_on: {err}") }
			})?,
		(None, Some(expires_in)) => now
			.checked_add(Duration::seconds(expires_in.as_i64("expires_in")?))
			.ok_or_else(|| AcquisitionError::InvalidToken {
				reason: "expires_in out of range".into(),
			})?,
		(None, None) =>
			return Err(AcquisitionError::InvalidToken {
				reason: "missing expires_on and expires_in".into(),
			}),
	};

	Token::builder(scope.clone(), SourceKind::WorkloadIdentity)
		.value(body.access_token)
		.issued_at(now)
		.expires_at(expires_at)
		.build()
		.map_err(|err| AcquisitionError::InvalidToken { reason: err.to_string() })
}

fn error_reason(body: &[u8]) -> Option<String> {
	let parsed: ErrorBody = serde_json::from_slice(body).ok()?;

	match (parsed.error, parsed.error_description) {
		(Some(error), Some(description)) => Some(format!("{error}: {description}")),
		(Some(error), None) => Some(error),
		(None, description) => description,
	}
}

async fn read_assertion(path: &Path) -> Result<String, AcquisitionError> {
	let raw = tokio::fs::read_to_string(path).await.map_err(|err| {
		AcquisitionError::MalformedConfig {
			reason: format!("federated token file `{}` is unreadable: {err}", path.display()),
		}
	})?;
	let assertion = raw.trim();

	if assertion.is_empty() {
		return Err(AcquisitionError::MalformedConfig {
			reason: format!("federated token file `{}` is empty", path.display()),
		});
	}

	Ok(assertion.to_owned())
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn parse(json: &str) -> ManagedIdentityResponse {
		serde_json::from_str(json).expect("Managed identity fixture should parse.")
	}

	#[test]
	fn expiry_accepts_numbers_and_strings() {
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let scope = ResourceScope::storage();
		let from_string = managed_identity_token(
			&scope,
			parse(r#"{"access_token":"a","expires_on":"1735693200"}"#),
			now,
		)
		.expect("String expires_on should be accepted.");
		let from_number =
			managed_identity_token(&scope, parse(r#"{"access_token":"a","expires_in":3600}"#), now)
				.expect("Numeric expires_in should be accepted.");

		assert_eq!(from_string.expires_at, macros::datetime!(2025-01-01 01:00 UTC));
		assert_eq!(from_number.expires_at, macros::datetime!(2025-01-01 01:00 UTC));
		assert_eq!(from_number.source, SourceKind::WorkloadIdentity);
	}

	#[test]
	fn expiry_is_required_and_must_be_in_the_future() {
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let scope = ResourceScope::storage();

		assert!(matches!(
			managed_identity_token(&scope, parse(r#"{"access_token":"a"}"#), now),
			Err(AcquisitionError::InvalidToken { .. })
		));
		assert!(matches!(
			managed_identity_token(&scope, parse(r#"{"access_token":"a","expires_in":"soon"}"#), now),
			Err(AcquisitionError::InvalidToken { .. })
		));
		assert!(matches!(
			managed_identity_token(&scope, parse(r#"{"access_token":"a","expires_in":0}"#), now),
			Err(AcquisitionError::InvalidToken { .. })
		));
	}

	#[test]
	fn out_of_range_expiry_is_invalid_token() {
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let scope = ResourceScope::storage();

		assert!(matches!(
			managed_identity_token(
				&scope,
				parse(r#"{"access_token":"a","expires_in":"9223372036854775807"}"#),
				now,
			),
			Err(AcquisitionError::InvalidToken { .. })
		));
		assert!(matches!(
			managed_identity_token(
				&scope,
				parse(r#"{"access_token":"a","expires_on":"9223372036854775807"}"#),
				now,
			),
			Err(AcquisitionError::InvalidToken { .. })
		));
	}

	#[test]
	fn error_reason_prefers_described_errors() {
		assert_eq!(
			error_reason(br#"{"error":"invalid_request","error_description":"Identity not found"}"#),
			Some("invalid_request: Identity not found".into())
		);
		assert_eq!(error_reason(b"<html>"), None);
	}

	#[tokio::test]
	async fn missing_assertion_file_is_malformed_config() {
		let err = read_assertion(Path::new("/nonexistent/federated-token"))
			.await
			.expect_err("Missing file should fail.");

		assert!(matches!(err, AcquisitionError::MalformedConfig { .. }));
	}
}
