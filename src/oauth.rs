//! OAuth 2.0 facade for the federated workload-identity token exchange.
//!
//! The projected service-account token is presented as a JWT client assertion in a
//! `client_credentials` grant; the identity provider answers with a bearer token for the
//! requested resource.

// crates.io
use oauth2::{
	ClientId, EndpointNotSet, EndpointSet, HttpClientError, RequestTokenError, Scope,
	TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicErrorResponseType, BasicRequestTokenError},
};
// self
use crate::{
	_prelude::*,
	auth::{IdentityClientId, ResourceScope, Token},
	error::{AcquisitionError, ConfigError},
	http::{self, ReqwestHttpClient, ResponseMetadata, ResponseMetadataSlot},
	source::SourceKind,
};

type TokenEndpointClient =
	BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;
type FacadeTokenResponse = oauth2::basic::BasicTokenResponse;

const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Client-credentials exchange against a token endpoint using a JWT client assertion.
pub(crate) struct FederatedFacade {
	token_url: Url,
	oauth_client: TokenEndpointClient,
	http_client: Arc<ReqwestHttpClient>,
}
impl FederatedFacade {
	pub(crate) fn new(
		token_url: &Url,
		client_id: &IdentityClientId,
		http_client: Arc<ReqwestHttpClient>,
	) -> Result<Self, ConfigError> {
		let oauth_client = BasicClient::new(ClientId::new(client_id.to_string())).set_token_uri(
			TokenUrl::new(token_url.to_string())
				.map_err(|source| ConfigError::InvalidEndpoint { name: "token_url", source })?,
		);

		Ok(Self { token_url: token_url.clone(), oauth_client, http_client })
	}

	/// Exchanges `assertion` for a bearer token scoped to `scope`.
	pub(crate) async fn exchange(
		&self,
		scope: &ResourceScope,
		assertion: &str,
	) -> Result<Token, AcquisitionError> {
		let meta = ResponseMetadataSlot::default();
		let instrumented = self.http_client.instrumented(meta.clone());
		let response = self
			.oauth_client
			.exchange_client_credentials()
			.add_scope(Scope::new(scope.default_scope()))
			.add_extra_param("client_assertion_type", CLIENT_ASSERTION_TYPE)
			.add_extra_param("client_assertion", assertion.to_owned())
			.request_async(&instrumented)
			.await
			.map_err(|err| map_request_error(meta.take(), err))?;

		map_token_response(scope, response)
	}
}
impl Debug for FederatedFacade {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("FederatedFacade")
			.field("token_url", &self.token_url.as_str())
			.finish()
	}
}

fn map_token_response(
	scope: &ResourceScope,
	response: FacadeTokenResponse,
) -> Result<Token, AcquisitionError> {
	let expires_in = response
		.expires_in()
		.ok_or_else(|| AcquisitionError::InvalidToken { reason: "missing expires_in".into() })?
		.as_secs();
	let expires_in = i64::try_from(expires_in)
		.map_err(|_| AcquisitionError::InvalidToken { reason: "expires_in out of range".into() })?;

	Token::builder(scope.clone(), SourceKind::WorkloadIdentity)
		.value(response.access_token().secret().to_owned())
		.issued_at(OffsetDateTime::now_utc())
		.expires_in(Duration::seconds(expires_in))
		.build()
		.map_err(|err| AcquisitionError::InvalidToken { reason: err.to_string() })
}

fn map_request_error(
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<ReqwestError>>,
) -> AcquisitionError {
	let meta_ref = meta.as_ref();

	match err {
		RequestTokenError::ServerResponse(response) => map_server_response(response, meta_ref),
		RequestTokenError::Request(error) => http::map_transport_error(meta_ref, error),
		RequestTokenError::Parse(error, _body) => AcquisitionError::ResponseParse {
			source: error,
			status: meta_ref.and_then(|value| value.status),
		},
		RequestTokenError::Other(message) => AcquisitionError::Upstream {
			message: format!("Token endpoint returned an unexpected response: {message}"),
			status: meta_ref.and_then(|value| value.status),
			retry_after: meta_ref.and_then(|value| value.retry_after),
		},
	}
}

fn map_server_response(
	response: BasicErrorResponse,
	meta: Option<&ResponseMetadata>,
) -> AcquisitionError {
	let reason = match response.error_description() {
		Some(description) => format!("{}: {description}", response.error().as_ref()),
		None => response.error().as_ref().to_owned(),
	};
	let status = meta.and_then(|value| value.status);

	match response.error() {
		BasicErrorResponseType::InvalidClient
		| BasicErrorResponseType::InvalidGrant
		| BasicErrorResponseType::UnauthorizedClient
		| BasicErrorResponseType::InvalidScope => AcquisitionError::PermissionDenied { reason, status },
		BasicErrorResponseType::InvalidRequest | BasicErrorResponseType::UnsupportedGrantType =>
			AcquisitionError::MalformedConfig { reason },
		_ => AcquisitionError::Upstream {
			message: reason,
			status,
			retry_after: meta.and_then(|value| value.retry_after),
		},
	}
}
