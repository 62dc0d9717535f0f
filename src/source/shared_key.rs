//! Account-key delegation: derives short-lived account SAS tokens locally.

// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use time::{UtcOffset, format_description::BorrowedFormatItem, macros::format_description};
use url::form_urlencoded;
// self
use crate::{
	_prelude::*,
	auth::{ResourceScope, StorageAccount, Token},
	config::CredentialConfig,
	error::{AcquisitionError, ConfigError},
	source::SourceKind,
};

const SIGNED_VERSION: &str = "2022-11-02";
const SIGNED_SERVICES: &str = "b";
const SIGNED_RESOURCE_TYPES: &str = "co";
const SIGNED_PERMISSIONS: &str = "rl";
const SIGNED_PROTOCOL: &str = "https";
const CLOCK_SKEW: Duration = Duration::minutes(5);
const SAS_TIME: &[BorrowedFormatItem<'static>] =
	format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");

/// Derives read/list account SAS tokens for the blob service from the account key.
///
/// Signing is a pure function of the key, the account, the validity window and the signing
/// instant; see [`SharedKeyDelegation::sign_at`].
#[derive(Clone)]
pub struct SharedKeyDelegation {
	account: StorageAccount,
	key: Vec<u8>,
	validity: Duration,
}
impl SharedKeyDelegation {
	/// Creates a delegation for `account` using the decoded account key.
	pub fn new(account: StorageAccount, key: Vec<u8>, validity: Duration) -> Self {
		Self { account, key, validity }
	}

	/// Builds a delegation from validated credential settings.
	pub fn from_config(config: &CredentialConfig) -> Result<Self, ConfigError> {
		Ok(Self::new(config.account.clone(), config.decoded_key()?, config.validity))
	}

	/// Returns the storage account the tokens are signed for.
	pub fn account(&self) -> &StorageAccount {
		&self.account
	}

	/// Signs a token valid from now for the configured validity window.
	pub fn acquire_token(&self, scope: &ResourceScope) -> Result<Token, AcquisitionError> {
		self.sign_at(scope, OffsetDateTime::now_utc())
	}

	/// Signs a token as if the current time were `instant`.
	pub fn sign_at(
		&self,
		scope: &ResourceScope,
		instant: OffsetDateTime,
	) -> Result<Token, AcquisitionError> {
		let instant = instant.to_offset(UtcOffset::UTC).replace_nanosecond(0).map_err(|err| {
			AcquisitionError::MalformedConfig { reason: format!("signing instant: {err}") }
		})?;
		let expires_at = instant.checked_add(self.validity).ok_or_else(|| {
			AcquisitionError::MalformedConfig { reason: "validity window out of range".into() }
		})?;
		let start = instant.checked_sub(CLOCK_SKEW).ok_or_else(|| {
			AcquisitionError::MalformedConfig { reason: "signing instant out of range".into() }
		})?;
		let start = format_sas_time(start)?;
		let expiry = format_sas_time(expires_at)?;
		let signature = self.sign(&self.string_to_sign(&start, &expiry))?;
		let value = form_urlencoded::Serializer::new(String::new())
			.append_pair("sv", SIGNED_VERSION)
			.append_pair("ss", SIGNED_SERVICES)
			.append_pair("srt", SIGNED_RESOURCE_TYPES)
			.append_pair("sp", SIGNED_PERMISSIONS)
			.append_pair("st", &start)
			.append_pair("se", &expiry)
			.append_pair("spr", SIGNED_PROTOCOL)
			.append_pair("sig", &signature)
			.finish();

		Token::builder(scope.clone(), SourceKind::SharedKey)
			.value(value)
			.issued_at(instant)
			.expires_at(expires_at)
			.build()
			.map_err(|err| AcquisitionError::MalformedConfig { reason: err.to_string() })
	}

	fn string_to_sign(&self, start: &str, expiry: &str) -> String {
		// Empty lines are the unused signed IP and encryption scope fields.
		format!(
			"{}\n{SIGNED_PERMISSIONS}\n{SIGNED_SERVICES}\n{SIGNED_RESOURCE_TYPES}\n{start}\n{expiry}\n\n{SIGNED_PROTOCOL}\n{SIGNED_VERSION}\n\n",
			self.account
		)
	}

	fn sign(&self, payload: &str) -> Result<String, AcquisitionError> {
		let mut mac = Hmac::<Sha256>::new_from_slice(&self.key).map_err(|err| {
			AcquisitionError::MalformedConfig { reason: format!("account key: {err}") }
		})?;

		mac.update(payload.as_bytes());

		Ok(STANDARD.encode(mac.finalize().into_bytes()))
	}
}
impl Debug for SharedKeyDelegation {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SharedKeyDelegation")
			.field("account", &self.account)
			.field("key", &"<redacted>")
			.field("validity", &self.validity)
			.finish()
	}
}

fn format_sas_time(instant: OffsetDateTime) -> Result<String, AcquisitionError> {
	instant
		.format(SAS_TIME)
		.map_err(|err| AcquisitionError::MalformedConfig { reason: format!("signing time: {err}") })
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn delegation() -> SharedKeyDelegation {
		SharedKeyDelegation::new(
			StorageAccount::new("rasters").expect("Account fixture should be valid."),
			b"secret-key-material".to_vec(),
			Duration::hours(1),
		)
	}

	#[test]
	fn signs_known_answer() {
		let token = delegation()
			.sign_at(&ResourceScope::storage(), macros::datetime!(2025-01-01 00:00 UTC))
			.expect("Signing should succeed.");

		assert_eq!(
			token.value.expose(),
			"sv=2022-11-02&ss=b&srt=co&sp=rl&st=2024-12-31T23%3A55%3A00Z\
			 &se=2025-01-01T01%3A00%3A00Z&spr=https&sig=1yfndcGIuQL9Zv1QmFwRdylm%2FHPlUdrZ4fHJWr8fhqg%3D"
		);
		assert_eq!(token.issued_at, macros::datetime!(2025-01-01 00:00 UTC));
		assert_eq!(token.expires_at, macros::datetime!(2025-01-01 01:00 UTC));
		assert_eq!(token.source, SourceKind::SharedKey);
	}

	#[test]
	fn signing_is_deterministic_per_instant() {
		let delegation = delegation();
		let scope = ResourceScope::storage();
		let instant = macros::datetime!(2025-06-01 12:30:15.75 UTC);
		let first = delegation.sign_at(&scope, instant).expect("First signing should succeed.");
		let second = delegation.sign_at(&scope, instant).expect("Second signing should succeed.");
		let later = delegation
			.sign_at(&scope, instant + Duration::minutes(1))
			.expect("Later signing should succeed.");

		assert_eq!(first, second);
		assert_ne!(first.value, later.value);
	}

	#[test]
	fn oversized_validity_is_an_error() {
		let delegation = SharedKeyDelegation::new(
			StorageAccount::new("rasters").expect("Account fixture should be valid."),
			b"secret-key-material".to_vec(),
			Duration::seconds(99_999_999_999_999),
		);

		assert!(matches!(
			delegation.sign_at(&ResourceScope::storage(), macros::datetime!(2025-01-01 00:00 UTC)),
			Err(AcquisitionError::MalformedConfig { .. })
		));
	}

	#[test]
	fn debug_redacts_key() {
		assert!(!format!("{:?}", delegation()).contains("secret"));
	}
}
