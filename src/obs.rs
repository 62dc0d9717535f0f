//! Optional observability helpers for token acquisition and publication.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `storage_token_broker.op` with the `op` and
//!   `source` fields, plus `warn` events on fallback to a cached token or when a new token
//!   already expires inside the refresh margin.
//! - Enable `metrics` to increment the `storage_token_broker_op_total` counter for every
//!   attempt/success/failure/fallback, labeled by `op` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Broker operations observed by spans and counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
	/// Credential source call producing a new token.
	Acquire,
	/// Freshness check (and refresh when needed) performed by the broker.
	EnsureFresh,
	/// Write of the token into the native-library configuration.
	Publish,
	/// Dependency probe run by the health aggregator.
	Probe,
}
impl Operation {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Operation::Acquire => "acquire",
			Operation::EnsureFresh => "ensure_fresh",
			Operation::Publish => "publish",
			Operation::Probe => "probe",
		}
	}
}
impl Display for Operation {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Entry to an operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
	/// Failure masked by serving a still-valid cached token.
	Fallback,
	/// Served from the cache without taking the refresh lock.
	CacheHit,
	/// Acquired token already expires inside the refresh margin.
	ShortLived,
}
impl OpOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
			OpOutcome::Fallback => "fallback",
			OpOutcome::CacheHit => "cache_hit",
			OpOutcome::ShortLived => "short_lived",
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
