//! Immutable storage token records and their builder.

// self
use crate::{
	_prelude::*,
	auth::{ResourceScope, token::secret::TokenSecret},
	source::SourceKind,
};

/// Lifecycle status of a token at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
	/// Token is not yet valid because the issued-at instant is in the future.
	Pending,
	/// Token is currently valid.
	Active,
	/// Token reached its expiry instant.
	Expired,
}

/// Errors produced by [`TokenBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum TokenBuilderError {
	/// Issued when no token value was provided.
	#[error("Token value is required.")]
	MissingValue,
	/// Issued when the token value is empty.
	#[error("Token value cannot be empty.")]
	EmptyValue,
	/// Issued when no expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
	/// Issued when the relative expiry overflows the representable time range.
	#[error("Expiry is out of range.")]
	ExpiryOutOfRange,
	/// Issued when the expiry does not come after the issue instant.
	#[error("Token must expire after it is issued.")]
	ExpiryNotAfterIssue,
}

/// Short-lived storage credential handed to the native library.
///
/// Tokens are never mutated after construction; a refresh produces a new value that replaces
/// the cached one wholesale.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
	/// Credential value (SAS query string or bearer token); callers must avoid logging it.
	pub value: TokenSecret,
	/// Resource the credential grants access to.
	pub scope: ResourceScope,
	/// Credential source variant that produced the token.
	pub source: SourceKind,
	/// Instant the token was obtained.
	pub issued_at: OffsetDateTime,
	/// Instant the token stops being accepted.
	pub expires_at: OffsetDateTime,
}
impl Token {
	/// Returns a builder for the provided scope and source variant.
	pub fn builder(scope: ResourceScope, source: SourceKind) -> TokenBuilder {
		TokenBuilder::new(scope, source)
	}

	/// Computes the lifecycle status at a given instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> TokenStatus {
		if instant < self.issued_at {
			return TokenStatus::Pending;
		}
		if instant >= self.expires_at {
			return TokenStatus::Expired;
		}

		TokenStatus::Active
	}

	/// Remaining lifetime at the provided instant; negative once expired.
	pub fn remaining_at(&self, instant: OffsetDateTime) -> Duration {
		self.expires_at - instant
	}

	/// Returns `true` if the token has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		instant >= self.expires_at
	}

	/// Returns `true` if the token stays valid for at least `margin` after `instant`.
	pub fn is_fresh_at(&self, instant: OffsetDateTime, margin: Duration) -> bool {
		self.remaining_at(instant) >= margin
	}
}
impl Debug for Token {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Token")
			.field("value", &"<redacted>")
			.field("scope", &self.scope)
			.field("source", &self.source)
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Builder for [`Token`].
#[derive(Clone, Debug)]
pub struct TokenBuilder {
	scope: ResourceScope,
	source: SourceKind,
	value: Option<TokenSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl TokenBuilder {
	fn new(scope: ResourceScope, source: SourceKind) -> Self {
		Self { scope, source, value: None, issued_at: None, expires_at: None, expires_in: None }
	}

	/// Sets the issued-at instant.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Provides the credential value.
	pub fn value(mut self, value: impl Into<String>) -> Self {
		self.value = Some(TokenSecret::new(value));

		self
	}

	/// Consumes the builder and produces a [`Token`].
	pub fn build(self) -> Result<Token, TokenBuilderError> {
		let value = self.value.ok_or(TokenBuilderError::MissingValue)?;

		if value.is_empty() {
			return Err(TokenBuilderError::EmptyValue);
		}

		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) =>
				issued_at.checked_add(delta).ok_or(TokenBuilderError::ExpiryOutOfRange)?,
			(None, None) => return Err(TokenBuilderError::MissingExpiry),
		};

		if expires_at <= issued_at {
			return Err(TokenBuilderError::ExpiryNotAfterIssue);
		}

		Ok(Token { value, scope: self.scope, source: self.source, issued_at, expires_at })
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn token(issued: OffsetDateTime, expires: OffsetDateTime) -> Token {
		Token::builder(ResourceScope::storage(), SourceKind::WorkloadIdentity)
			.value("bearer")
			.issued_at(issued)
			.expires_at(expires)
			.build()
			.expect("Token fixture should build.")
	}

	#[test]
	fn status_transitions_cover_all_states() {
		let token = token(
			macros::datetime!(2025-01-01 00:00 UTC),
			macros::datetime!(2025-01-01 01:00 UTC),
		);

		assert_eq!(token.status_at(macros::datetime!(2024-12-31 23:59 UTC)), TokenStatus::Pending);
		assert_eq!(token.status_at(macros::datetime!(2025-01-01 00:30 UTC)), TokenStatus::Active);
		assert_eq!(token.status_at(macros::datetime!(2025-01-01 01:00 UTC)), TokenStatus::Expired);
	}

	#[test]
	fn freshness_respects_margin() {
		let token = token(
			macros::datetime!(2025-01-01 00:00 UTC),
			macros::datetime!(2025-01-01 01:00 UTC),
		);
		let margin = Duration::minutes(5);

		assert!(token.is_fresh_at(macros::datetime!(2025-01-01 00:55 UTC), margin));
		assert!(!token.is_fresh_at(macros::datetime!(2025-01-01 00:58 UTC), margin));
		assert!(!token.is_expired_at(macros::datetime!(2025-01-01 00:58 UTC)));
		assert_eq!(
			token.remaining_at(macros::datetime!(2025-01-01 00:58 UTC)),
			Duration::minutes(2)
		);
	}

	#[test]
	fn builder_rejects_invalid_tokens() {
		let scope = ResourceScope::storage();
		let issued = macros::datetime!(2025-01-01 00:00 UTC);

		assert_eq!(
			Token::builder(scope.clone(), SourceKind::SharedKey)
				.issued_at(issued)
				.expires_in(Duration::hours(1))
				.build(),
			Err(TokenBuilderError::MissingValue)
		);
		assert_eq!(
			Token::builder(scope.clone(), SourceKind::SharedKey)
				.value("")
				.expires_in(Duration::hours(1))
				.build(),
			Err(TokenBuilderError::EmptyValue)
		);
		assert_eq!(
			Token::builder(scope.clone(), SourceKind::SharedKey)
				.value("sig")
				.issued_at(issued)
				.expires_at(issued)
				.build(),
			Err(TokenBuilderError::ExpiryNotAfterIssue)
		);
		assert_eq!(
			Token::builder(scope.clone(), SourceKind::SharedKey).value("sig").build(),
			Err(TokenBuilderError::MissingExpiry)
		);
		assert_eq!(
			Token::builder(scope, SourceKind::SharedKey)
				.value("sig")
				.issued_at(issued)
				.expires_in(Duration::seconds(i64::MAX))
				.build(),
			Err(TokenBuilderError::ExpiryOutOfRange)
		);
	}

	#[test]
	fn debug_redacts_value() {
		let token = token(
			macros::datetime!(2025-01-01 00:00 UTC),
			macros::datetime!(2025-01-01 01:00 UTC),
		);

		assert!(!format!("{token:?}").contains("bearer"));
	}
}
