//! Strongly typed identifiers for storage accounts and ambient identities.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal, $validate:path) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				$validate($kind, view)?;

				Ok(Self(view.to_owned()))
			}

			/// Returns the identifier as a string slice.
			pub fn as_str(&self) -> &str {
				&self.0
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				$validate($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

const IDENTIFIER_MAX_LEN: usize = 128;
const ACCOUNT_MIN_LEN: usize = 3;
const ACCOUNT_MAX_LEN: usize = 24;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (storage account, client, tenant).
		kind: &'static str,
	},
	/// The identifier contains whitespace characters.
	#[error("{kind} identifier contains whitespace.")]
	ContainsWhitespace {
		/// Kind of identifier (storage account, client, tenant).
		kind: &'static str,
	},
	/// The identifier length falls outside the permitted range.
	#[error("{kind} identifier must be {min}..={max} characters long.")]
	Length {
		/// Kind of identifier (storage account, client, tenant).
		kind: &'static str,
		/// Minimum permitted character count.
		min: usize,
		/// Maximum permitted character count.
		max: usize,
	},
	/// The identifier contains characters the service does not accept.
	#[error("{kind} identifier may only contain lowercase letters and digits.")]
	InvalidCharacters {
		/// Kind of identifier (storage account, client, tenant).
		kind: &'static str,
	},
}

def_id! { StorageAccount, "Name of the storage account the native library reads from.", "StorageAccount", validate_account }
def_id! { IdentityClientId, "Client identifier selecting a user-assigned workload identity.", "IdentityClient", validate_view }
def_id! { TenantId, "Directory tenant used by federated workload identity.", "Tenant", validate_view }

fn validate_view(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentifierError::ContainsWhitespace { kind });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::Length { kind, min: 1, max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}

fn validate_account(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	validate_view(kind, view)?;

	if !(ACCOUNT_MIN_LEN..=ACCOUNT_MAX_LEN).contains(&view.len()) {
		return Err(IdentifierError::Length { kind, min: ACCOUNT_MIN_LEN, max: ACCOUNT_MAX_LEN });
	}
	if !view.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) {
		return Err(IdentifierError::InvalidCharacters { kind });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn storage_account_follows_naming_rules() {
		let account =
			StorageAccount::new("rasterdata01").expect("Account fixture should be valid.");

		assert_eq!(account.as_str(), "rasterdata01");
		assert!(matches!(StorageAccount::new("ab"), Err(IdentifierError::Length { .. })));
		assert!(matches!(
			StorageAccount::new("Raster-Data"),
			Err(IdentifierError::InvalidCharacters { .. })
		));
		assert!(matches!(
			StorageAccount::new("raster data"),
			Err(IdentifierError::ContainsWhitespace { .. })
		));
		assert!(StorageAccount::new("a".repeat(ACCOUNT_MAX_LEN + 1)).is_err());
	}

	#[test]
	fn client_ids_accept_guids_and_reject_blanks() {
		let client = IdentityClientId::new("8f0b2a3c-7d1e-4f55-9a6b-0c2d3e4f5a6b")
			.expect("GUID client id should be valid.");

		assert_eq!(client.len(), 36);
		assert!(matches!(IdentityClientId::new(""), Err(IdentifierError::Empty { .. })));
		assert!(TenantId::new(" tenant").is_err());
	}

	#[test]
	fn serde_round_trip_enforces_validation() {
		let account: StorageAccount =
			serde_json::from_str("\"rasters\"").expect("Account should deserialize.");

		assert_eq!(account.as_ref(), "rasters");
		assert!(serde_json::from_str::<StorageAccount>("\"UPPER\"").is_err());
		assert_eq!(
			serde_json::to_string(&account).expect("Account should serialize."),
			"\"rasters\""
		);
	}
}
