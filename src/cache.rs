//! Thread-safe holder of the current token and the bookkeeping needed for status reports.

// self
use crate::{_prelude::*, auth::Token};

/// Point-in-time copy of the cache contents.
#[derive(Clone, Debug, Default)]
pub struct CacheSnapshot {
	/// Current token, if one has been acquired.
	pub token: Option<Token>,
	/// Message of the most recent acquisition failure, cleared on success.
	pub last_error: Option<String>,
	/// Instant the current token was stored.
	pub last_refreshed_at: Option<OffsetDateTime>,
}

/// Holds at most one token; replacements are atomic and readers never see a partial value.
///
/// The lock guards only in-memory copies, so it is never held across I/O.
#[derive(Debug, Default)]
pub struct TokenCache(RwLock<CacheSnapshot>);
impl TokenCache {
	/// Returns a copy of the current contents.
	pub fn snapshot(&self) -> CacheSnapshot {
		self.0.read().clone()
	}

	/// Returns the current token, if any.
	pub fn get(&self) -> Option<Token> {
		self.0.read().token.clone()
	}

	/// Returns the current token only if it stays valid for at least `margin` after `now`.
	pub fn fresh_for(&self, now: OffsetDateTime, margin: Duration) -> Option<Token> {
		self.0.read().token.as_ref().filter(|token| token.is_fresh_at(now, margin)).cloned()
	}

	/// Returns the current token if it has not expired at `now`.
	pub fn unexpired_at(&self, now: OffsetDateTime) -> Option<Token> {
		self.0.read().token.as_ref().filter(|token| !token.is_expired_at(now)).cloned()
	}

	/// Replaces the held token and clears the last recorded error.
	pub fn set(&self, token: Token) {
		let mut guard = self.0.write();

		guard.last_refreshed_at = Some(OffsetDateTime::now_utc());
		guard.last_error = None;
		guard.token = Some(token);
	}

	/// Replaces the held token and records why it falls short of the refresh margin.
	pub fn set_short_lived(&self, token: Token, reason: impl Into<String>) {
		let mut guard = self.0.write();

		guard.last_refreshed_at = Some(OffsetDateTime::now_utc());
		guard.last_error = Some(reason.into());
		guard.token = Some(token);
	}

	/// Records an acquisition failure without touching the held token.
	pub fn record_error(&self, message: impl Into<String>) {
		self.0.write().last_error = Some(message.into());
	}

	/// Drops the held token and all bookkeeping.
	pub fn clear(&self) {
		*self.0.write() = CacheSnapshot::default();
	}
}
