//! Broker-level error types shared across sources, the broker, and the interceptor.

// self
use crate::_prelude::*;

/// Broker-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical broker error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Invalid or missing startup settings.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Token could not be acquired and no usable cached token exists.
	#[error(transparent)]
	Acquisition(#[from] AcquisitionError),
	/// Token could not be written into the native-library configuration.
	#[error(transparent)]
	Publish(#[from] PublishError),
}

/// Configuration and validation failures raised at startup.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// A required setting is absent.
	#[error("Setting `{name}` is required.")]
	MissingSetting {
		/// Setting name (environment key or builder field).
		name: &'static str,
	},
	/// A setting is present but cannot be used.
	#[error("Setting `{name}` is invalid: {reason}.")]
	InvalidSetting {
		/// Setting name (environment key or builder field).
		name: &'static str,
		/// Human-readable reason.
		reason: String,
	},
	/// Shared-key mode was selected without key material.
	#[error("Shared-key mode requires account key material.")]
	MissingKeyMaterial,
	/// Account key material is not valid base64.
	#[error("Account key material is not valid base64.")]
	InvalidKeyMaterial {
		/// Underlying decoding failure.
		#[source]
		source: base64::DecodeError,
	},
	/// Refresh margin does not fit inside the validity window.
	#[error("Refresh margin ({margin}) must be shorter than the validity window ({validity}).")]
	MarginExceedsValidity {
		/// Configured refresh margin.
		margin: Duration,
		/// Configured validity window.
		validity: Duration,
	},
	/// Identifier validation failed.
	#[error("Identifier is invalid.")]
	InvalidIdentifier(#[from] crate::auth::IdentifierError),
	/// Resource scope validation failed.
	#[error("Resource scope is invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// An endpoint URL cannot be parsed.
	#[error("Endpoint `{name}` is not a valid URL.")]
	InvalidEndpoint {
		/// Endpoint name.
		name: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}

	pub(crate) fn invalid(name: &'static str, reason: impl Display) -> Self {
		Self::InvalidSetting { name, reason: reason.to_string() }
	}
}
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Coarse classification of an [`AcquisitionError`], used in logs and health diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionCause {
	/// DNS, TCP, TLS, or I/O failure.
	Network,
	/// The identity provider refused the request (401/403, invalid client).
	PermissionDenied,
	/// Local settings cannot produce a request (bad key, unreadable token file).
	MalformedConfig,
	/// The identity provider answered with an unusable payload.
	MalformedResponse,
	/// The acquisition did not finish within the refresh timeout.
	Timeout,
	/// The identity provider failed temporarily (5xx, 429).
	Upstream,
}
impl AcquisitionCause {
	/// Returns a stable label suitable for log fields and diagnostics.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Network => "network",
			Self::PermissionDenied => "permission_denied",
			Self::MalformedConfig => "malformed_config",
			Self::MalformedResponse => "malformed_response",
			Self::Timeout => "timeout",
			Self::Upstream => "upstream",
		}
	}
}
impl Display for AcquisitionCause {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Failure to obtain a token from a credential source. Recoverable: the broker retries on the
/// next freshness check and serves a still-valid cached token meanwhile.
#[derive(Debug, ThisError)]
pub enum AcquisitionError {
	/// Transport failure while calling the identity endpoint.
	#[error("Network error occurred while calling the identity endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// The identity provider refused to issue a token.
	#[error("Identity provider denied the token request: {reason}.")]
	PermissionDenied {
		/// Provider- or broker-supplied reason string.
		reason: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Local settings could not produce a token request.
	#[error("Credential settings cannot produce a token: {reason}.")]
	MalformedConfig {
		/// Human-readable reason.
		reason: String,
	},
	/// The identity endpoint returned JSON that could not be parsed.
	#[error("Identity endpoint returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// The identity endpoint returned a well-formed but unusable token.
	#[error("Identity endpoint returned an unusable token: {reason}.")]
	InvalidToken {
		/// Human-readable reason.
		reason: String,
	},
	/// Temporary upstream failure; retry later.
	#[error("Identity endpoint returned an unexpected response: {message}.")]
	Upstream {
		/// Provider- or broker-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// The acquisition (or the wait for an in-flight one) exceeded the refresh timeout.
	#[error("Token acquisition timed out after {after}.")]
	Timeout {
		/// Timeout that elapsed.
		after: Duration,
	},
}
impl AcquisitionError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}

	/// Classifies the error.
	pub fn cause(&self) -> AcquisitionCause {
		match self {
			Self::Network { .. } => AcquisitionCause::Network,
			Self::PermissionDenied { .. } => AcquisitionCause::PermissionDenied,
			Self::MalformedConfig { .. } => AcquisitionCause::MalformedConfig,
			Self::ResponseParse { .. } | Self::InvalidToken { .. } =>
				AcquisitionCause::MalformedResponse,
			Self::Upstream { .. } => AcquisitionCause::Upstream,
			Self::Timeout { .. } => AcquisitionCause::Timeout,
		}
	}

	/// HTTP status reported by the identity endpoint, when one was received.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::PermissionDenied { status, .. }
			| Self::ResponseParse { status, .. }
			| Self::Upstream { status, .. } => *status,
			_ => None,
		}
	}
}
impl From<ReqwestError> for AcquisitionError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
impl From<std::io::Error> for AcquisitionError {
	fn from(e: std::io::Error) -> Self {
		Self::network(e)
	}
}

/// Failure to write the token into the native-library configuration entry.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum PublishError {
	/// The key or value cannot be stored by the target.
	#[error("Configuration entry `{key}` cannot be written: {reason}.")]
	Rejected {
		/// Configuration key being written.
		key: String,
		/// Human-readable reason.
		reason: String,
	},
}

/// A probed runtime dependency could not be reached. Surfaces as health data only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
#[error("Dependency `{name}` is unavailable: {reason}.")]
pub struct DependencyUnavailable {
	/// Dependency name as registered with the aggregator.
	pub name: String,
	/// Human-readable reason.
	pub reason: String,
}
impl DependencyUnavailable {
	/// Creates a new error for the named dependency.
	pub fn new(name: impl Into<String>, reason: impl Display) -> Self {
		Self { name: name.into(), reason: reason.to_string() }
	}
}
