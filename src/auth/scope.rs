//! Resource scope modeling for storage token requests.

// self
use crate::_prelude::*;

/// Errors emitted when validating resource scopes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ScopeValidationError {
	/// Empty scopes are not allowed.
	#[error("Resource scope cannot be empty.")]
	Empty,
	/// Scopes cannot contain embedded whitespace characters.
	#[error("Resource scope contains whitespace: {scope}.")]
	ContainsWhitespace {
		/// The offending scope string.
		scope: String,
	},
	/// Scopes must be absolute URIs.
	#[error("Resource scope is not an absolute URI: {scope}.")]
	NotAbsolute {
		/// The offending scope string.
		scope: String,
	},
}

/// Target resource a token grants access to, e.g. `https://storage.azure.com/`.
///
/// Managed identity endpoints take the bare resource URI while token endpoints expect the
/// `/.default` scope form; [`ResourceScope::default_scope`] derives the latter.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceScope(String);
impl ResourceScope {
	/// Resource URI for cloud blob storage.
	pub const STORAGE: &'static str = "https://storage.azure.com/";

	const DEFAULT_SUFFIX: &'static str = "/.default";

	/// Creates a validated resource scope.
	pub fn new(value: impl Into<String>) -> Result<Self, ScopeValidationError> {
		let value = value.into();

		if value.is_empty() {
			return Err(ScopeValidationError::Empty);
		}
		if value.chars().any(char::is_whitespace) {
			return Err(ScopeValidationError::ContainsWhitespace { scope: value });
		}
		if Url::parse(&value).is_err() {
			return Err(ScopeValidationError::NotAbsolute { scope: value });
		}

		Ok(Self(value))
	}

	/// Scope for the storage resource.
	pub fn storage() -> Self {
		Self(Self::STORAGE.to_owned())
	}

	/// Returns the resource URI.
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Returns the resource URI without the `/.default` suffix.
	pub fn resource(&self) -> &str {
		self.0.strip_suffix(Self::DEFAULT_SUFFIX).unwrap_or(&self.0)
	}

	/// Returns the `{resource}/.default` form expected by token endpoints.
	pub fn default_scope(&self) -> String {
		if self.0.ends_with(Self::DEFAULT_SUFFIX) {
			return self.0.clone();
		}

		format!("{}{}", self.0.trim_end_matches('/'), Self::DEFAULT_SUFFIX)
	}
}
impl Default for ResourceScope {
	fn default() -> Self {
		Self::storage()
	}
}
impl From<ResourceScope> for String {
	fn from(value: ResourceScope) -> Self {
		value.0
	}
}
impl TryFrom<String> for ResourceScope {
	type Error = ScopeValidationError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}
impl FromStr for ResourceScope {
	type Err = ScopeValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s)
	}
}
impl Debug for ResourceScope {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "ResourceScope({})", self.0)
	}
}
impl Display for ResourceScope {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}
