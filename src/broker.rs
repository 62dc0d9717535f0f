//! Token acquisition policy: proactive refresh, singleflight, timeouts, and fallback to the
//! cached token when the source fails.
//!
//! [`TokenBroker`] owns the only refresh lock in the crate. The cache and the published
//! native-library entry are written exclusively while that lock is held, so a caller that
//! observes a fresh, already-published token can skip the lock entirely.

mod metrics;

pub use metrics::*;

// self
use crate::{
	_prelude::*,
	auth::{ResourceScope, Token},
	cache::TokenCache,
	config::CredentialConfig,
	error::{AcquisitionError, ConfigError, PublishError},
	obs::{self, OpOutcome, OpSpan, Operation},
	source::{CredentialSource, SourceKind},
};

/// Coarse health of the cached token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenHealth {
	/// Token stays valid for at least the refresh margin.
	Valid,
	/// Token is still valid but inside the refresh margin.
	Expiring,
	/// Token has expired.
	Expired,
	/// No token has been acquired yet.
	Missing,
}
impl TokenHealth {
	/// Returns a stable label suitable for diagnostics.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Valid => "valid",
			Self::Expiring => "expiring",
			Self::Expired => "expired",
			Self::Missing => "missing",
		}
	}
}
impl Display for TokenHealth {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Broker state as seen by health checks. Computed without network I/O.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerStatus {
	/// Whether a token is cached.
	pub has_token: bool,
	/// Seconds until the cached token expires, clamped at zero.
	pub ttl_seconds: Option<i64>,
	/// Source variant configured for the broker.
	pub source_kind: SourceKind,
	/// Coarse token health.
	pub health: TokenHealth,
	/// Most recent acquisition failure, cleared by the next success.
	pub last_error: Option<String>,
	/// Instant the cached token was stored.
	#[serde(with = "time::serde::rfc3339::option")]
	pub last_refreshed_at: Option<OffsetDateTime>,
}

/// Destination the broker writes tokens into while holding the refresh lock.
pub(crate) trait Publisher: Send + Sync {
	/// Returns `true` when `token` is already the published value.
	fn is_current(&self, token: &Token) -> bool;

	/// Writes `token` into the destination.
	fn publish(&self, token: &Token) -> Result<(), PublishError>;
}

/// Supplies tokens that stay valid for at least the refresh margin.
///
/// Share one broker per process behind an [`Arc`]. Callers holding a fresh cached token never
/// block; the first caller to find the token stale refreshes it while the others wait on the
/// same lock (bounded by the refresh timeout) and then reuse the result.
pub struct TokenBroker {
	source: CredentialSource,
	scope: ResourceScope,
	refresh_margin: Duration,
	refresh_timeout: Duration,
	cache: TokenCache,
	refresh_lock: AsyncMutex<()>,
	metrics: Arc<RefreshMetrics>,
}
impl TokenBroker {
	/// Builds a broker and its credential source from validated settings.
	pub fn new(config: &CredentialConfig) -> Result<Self, ConfigError> {
		Ok(Self::with_source(CredentialSource::from_config(config)?, config))
	}

	/// Builds a broker around an existing source, taking scope and timing from `config`.
	pub fn with_source(source: impl Into<CredentialSource>, config: &CredentialConfig) -> Self {
		Self {
			source: source.into(),
			scope: config.scope.clone(),
			refresh_margin: config.refresh_margin,
			refresh_timeout: config.refresh_timeout,
			cache: TokenCache::default(),
			refresh_lock: AsyncMutex::new(()),
			metrics: Default::default(),
		}
	}

	/// Returns the configured source variant.
	pub fn source_kind(&self) -> SourceKind {
		self.source.kind()
	}

	/// Returns the resource the broker requests tokens for.
	pub fn scope(&self) -> &ResourceScope {
		&self.scope
	}

	/// Returns the configured refresh margin.
	pub fn refresh_margin(&self) -> Duration {
		self.refresh_margin
	}

	/// Returns the in-process refresh counters.
	pub fn metrics(&self) -> Arc<RefreshMetrics> {
		self.metrics.clone()
	}

	/// Returns a token valid for at least the refresh margin, refreshing when needed.
	///
	/// When the source fails but the cached token has not expired yet, the cached token is
	/// returned and the failure is only recorded. Without a usable cached token the failure is
	/// returned as [`Error::Acquisition`].
	pub async fn ensure_fresh(&self) -> Result<Token> {
		self.ensure(None, false).await
	}

	/// Acquires a new token even if the cached one is still fresh.
	pub async fn force_refresh(&self) -> Result<Token> {
		self.ensure(None, true).await
	}

	/// Computes the broker status at the current instant.
	pub fn status(&self) -> BrokerStatus {
		self.status_at(OffsetDateTime::now_utc())
	}

	/// Computes the broker status as if the current time were `now`.
	pub fn status_at(&self, now: OffsetDateTime) -> BrokerStatus {
		let snapshot = self.cache.snapshot();
		let (health, ttl_seconds) = match &snapshot.token {
			None => (TokenHealth::Missing, None),
			Some(token) if token.is_expired_at(now) => (TokenHealth::Expired, Some(0)),
			Some(token) => {
				let health = if token.is_fresh_at(now, self.refresh_margin) {
					TokenHealth::Valid
				} else {
					TokenHealth::Expiring
				};

				(health, Some(token.remaining_at(now).whole_seconds()))
			},
		};

		BrokerStatus {
			has_token: snapshot.token.is_some(),
			ttl_seconds,
			source_kind: self.source.kind(),
			health,
			last_error: snapshot.last_error,
			last_refreshed_at: snapshot.last_refreshed_at,
		}
	}

	/// Drops the cached token. Waits for an in-flight refresh to finish first.
	pub async fn shutdown(&self) {
		self.shutdown_with(|| ()).await;
	}

	/// Runs `teardown` and drops the cached token within one hold of the refresh lock.
	pub(crate) async fn shutdown_with<F>(&self, teardown: F)
	where
		F: FnOnce(),
	{
		let _guard = self.refresh_lock.lock().await;

		teardown();
		self.cache.clear();
		obs::info_shutdown(self.source.kind());
	}

	/// Like [`TokenBroker::ensure_fresh`], but also writes the token into `publisher` while the
	/// refresh lock is held, unless it is already published.
	pub(crate) async fn ensure_published(&self, publisher: &dyn Publisher) -> Result<Token> {
		self.ensure(Some(publisher), false).await
	}

	async fn ensure(&self, publisher: Option<&dyn Publisher>, force: bool) -> Result<Token> {
		const OP: Operation = Operation::EnsureFresh;

		if !force {
			let fresh = self.cache.fresh_for(OffsetDateTime::now_utc(), self.refresh_margin);

			if let Some(token) = fresh.filter(|token| is_published(publisher, token)) {
				self.metrics.record_cache_hit();
				obs::record_op_outcome(OP, OpOutcome::CacheHit);

				return Ok(token);
			}
		}

		let span = OpSpan::new(OP, self.source.kind());

		obs::record_op_outcome(OP, OpOutcome::Attempt);

		let result = span.instrument(self.refresh_locked(publisher, force)).await;

		if result.is_err() {
			obs::record_op_outcome(OP, OpOutcome::Failure);
		}

		result
	}

	async fn refresh_locked(&self, publisher: Option<&dyn Publisher>, force: bool) -> Result<Token> {
		let timeout = self.refresh_timeout.unsigned_abs();
		let Ok(_guard) = tokio::time::timeout(timeout, self.refresh_lock.lock()).await else {
			// Another refresh is still running; an unexpired published token is still usable.
			if let Some(token) = self
				.cache
				.unexpired_at(OffsetDateTime::now_utc())
				.filter(|token| is_published(publisher, token))
			{
				self.fallback(&token, &AcquisitionError::Timeout { after: self.refresh_timeout });

				return Ok(token);
			}

			return Err(AcquisitionError::Timeout { after: self.refresh_timeout }.into());
		};

		if !force {
			if let Some(token) = self.cache.fresh_for(OffsetDateTime::now_utc(), self.refresh_margin)
			{
				self.metrics.record_cache_hit();
				publish_if_stale(publisher, &token)?;
				obs::record_op_outcome(Operation::EnsureFresh, OpOutcome::Success);

				return Ok(token);
			}
		}

		self.metrics.record_attempt();

		let acquired = match tokio::time::timeout(timeout, self.source.acquire_token(&self.scope))
			.await
		{
			Ok(result) => result,
			Err(_) => Err(AcquisitionError::Timeout { after: self.refresh_timeout }),
		};
		let token = match acquired {
			Ok(token) => {
				let remaining = token.remaining_at(OffsetDateTime::now_utc());

				self.metrics.record_success();

				if remaining < self.refresh_margin {
					self.metrics.record_short_lived();
					obs::record_op_outcome(Operation::EnsureFresh, OpOutcome::ShortLived);
					obs::warn_short_lived(token.source, remaining, self.refresh_margin);
					self.cache.set_short_lived(
						token.clone(),
						format!(
							"short_lived: acquired token expires in {}s, inside the {}s refresh margin",
							remaining.whole_seconds(),
							self.refresh_margin.whole_seconds()
						),
					);
				} else {
					self.cache.set(token.clone());
				}

				obs::debug_refreshed(token.source, token.expires_at);
				obs::record_op_outcome(Operation::EnsureFresh, OpOutcome::Success);

				token
			},
			Err(err) => {
				self.metrics.record_failure();
				self.cache.record_error(format!("{}: {err}", err.cause()));

				match self.cache.unexpired_at(OffsetDateTime::now_utc()) {
					Some(token) => {
						self.fallback(&token, &err);

						token
					},
					None => return Err(err.into()),
				}
			},
		};

		publish_if_stale(publisher, &token)?;

		Ok(token)
	}

	fn fallback(&self, token: &Token, err: &AcquisitionError) {
		self.metrics.record_fallback();
		obs::record_op_outcome(Operation::EnsureFresh, OpOutcome::Fallback);
		obs::warn_fallback(
			self.source.kind(),
			err.cause().as_str(),
			token.remaining_at(OffsetDateTime::now_utc()),
		);
	}
}
impl Debug for TokenBroker {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenBroker")
			.field("source", &self.source)
			.field("scope", &self.scope)
			.field("refresh_margin", &self.refresh_margin)
			.field("refresh_timeout", &self.refresh_timeout)
			.finish()
	}
}

fn is_published(publisher: Option<&dyn Publisher>, token: &Token) -> bool {
	publisher.is_none_or(|publisher| publisher.is_current(token))
}

fn publish_if_stale(publisher: Option<&dyn Publisher>, token: &Token) -> Result<()> {
	const OP: Operation = Operation::Publish;

	let Some(publisher) = publisher else {
		return Ok(());
	};

	if publisher.is_current(token) {
		return Ok(());
	}

	obs::record_op_outcome(OP, OpOutcome::Attempt);

	match publisher.publish(token) {
		Ok(()) => {
			obs::record_op_outcome(OP, OpOutcome::Success);

			Ok(())
		},
		Err(err) => {
			obs::record_op_outcome(OP, OpOutcome::Failure);

			Err(err.into())
		},
	}
}
