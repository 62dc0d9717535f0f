//! Credential sources: the closed set of strategies that turn startup settings into tokens.
//!
//! A source is chosen once from [`CredentialConfig::mode`] and never changes for the lifetime
//! of the broker. Each call to [`CredentialSource::acquire_token`] produces a brand-new
//! [`Token`]; caching and refresh policy live in [`crate::broker`].

pub mod shared_key;
pub mod workload_identity;

pub use shared_key::*;
pub use workload_identity::*;

// self
use crate::{
	_prelude::*,
	auth::{ResourceScope, Token},
	config::{CredentialConfig, CredentialMode},
	error::{AcquisitionError, ConfigError},
	http::ReqwestHttpClient,
	obs::{self, OpOutcome, OpSpan, Operation},
};

/// Tag identifying which credential source produced a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
	/// Delegation token derived from the account key.
	SharedKey,
	/// Bearer token issued to the ambient workload identity.
	WorkloadIdentity,
}
impl SourceKind {
	/// Returns a stable label suitable for span fields and health diagnostics.
	pub const fn as_str(self) -> &'static str {
		match self {
			SourceKind::SharedKey => "shared_key",
			SourceKind::WorkloadIdentity => "workload_identity",
		}
	}
}
impl Display for SourceKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Credential source selected at startup.
#[derive(Debug)]
pub enum CredentialSource {
	/// Account-key delegation; no network I/O.
	SharedKey(SharedKeyDelegation),
	/// Ambient workload identity; calls the identity endpoint on every acquisition.
	WorkloadIdentity(WorkloadIdentityOAuth),
}
impl CredentialSource {
	/// Builds the source described by `config`, provisioning its own HTTP client when needed.
	pub fn from_config(config: &CredentialConfig) -> Result<Self, ConfigError> {
		match config.mode {
			CredentialMode::SharedKey =>
				Ok(Self::SharedKey(SharedKeyDelegation::from_config(config)?)),
			CredentialMode::WorkloadIdentity =>
				Self::with_http_client(config, Arc::new(ReqwestHttpClient::new()?)),
		}
	}

	/// Builds the source described by `config`, reusing the caller's HTTP client.
	pub fn with_http_client(
		config: &CredentialConfig,
		http_client: Arc<ReqwestHttpClient>,
	) -> Result<Self, ConfigError> {
		match config.mode {
			CredentialMode::SharedKey =>
				Ok(Self::SharedKey(SharedKeyDelegation::from_config(config)?)),
			CredentialMode::WorkloadIdentity =>
				Ok(Self::WorkloadIdentity(WorkloadIdentityOAuth::from_config(config, http_client)?)),
		}
	}

	/// Returns the kind of tokens this source produces.
	pub const fn kind(&self) -> SourceKind {
		match self {
			Self::SharedKey(_) => SourceKind::SharedKey,
			Self::WorkloadIdentity(_) => SourceKind::WorkloadIdentity,
		}
	}

	/// Produces a new token for `scope`.
	pub async fn acquire_token(&self, scope: &ResourceScope) -> Result<Token, AcquisitionError> {
		const OP: Operation = Operation::Acquire;

		let span = OpSpan::new(OP, self.kind());

		obs::record_op_outcome(OP, OpOutcome::Attempt);

		let result = span
			.instrument(async move {
				match self {
					Self::SharedKey(source) => source.acquire_token(scope),
					Self::WorkloadIdentity(source) => source.acquire_token(scope).await,
				}
			})
			.await;

		match &result {
			Ok(_) => obs::record_op_outcome(OP, OpOutcome::Success),
			Err(_) => obs::record_op_outcome(OP, OpOutcome::Failure),
		}

		result
	}
}
impl From<SharedKeyDelegation> for CredentialSource {
	fn from(source: SharedKeyDelegation) -> Self {
		Self::SharedKey(source)
	}
}
impl From<WorkloadIdentityOAuth> for CredentialSource {
	fn from(source: WorkloadIdentityOAuth) -> Self {
		Self::WorkloadIdentity(source)
	}
}
