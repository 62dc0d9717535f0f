//! Dependency probe contract consumed by [`crate::health::HealthAggregator`].

// crates.io
use serde_json::Value;
// self
use crate::{_prelude::*, error::DependencyUnavailable, health::DependencyStatus};

/// Boxed future returned by [`DependencyProbe::probe`].
pub type ProbeFuture<'a> =
	Pin<Box<dyn Future<Output = Result<ProbeOutcome, DependencyUnavailable>> + 'a + Send>>;

/// Checks whether one runtime dependency is reachable.
///
/// Implementations should not apply their own timeout; the aggregator bounds every probe and
/// reports a probe that produced no result as `missing`.
pub trait DependencyProbe: Send + Sync {
	/// Dependency name used as the report key and in service requirements.
	fn name(&self) -> &str;

	/// Runs one reachability check.
	fn probe(&self) -> ProbeFuture<'_>;
}

/// Successful probe result.
#[derive(Clone, Debug, PartialEq)]
pub struct ProbeOutcome {
	/// Either [`DependencyStatus::Ok`] or [`DependencyStatus::Warning`].
	pub status: DependencyStatus,
	/// Free-form diagnostics such as `round_trip_ms`.
	pub diagnostics: BTreeMap<String, Value>,
}
impl ProbeOutcome {
	/// Dependency is fully usable.
	pub fn ok() -> Self {
		Self { status: DependencyStatus::Ok, diagnostics: BTreeMap::new() }
	}

	/// Dependency responds but is impaired.
	pub fn warning() -> Self {
		Self { status: DependencyStatus::Warning, diagnostics: BTreeMap::new() }
	}

	/// Attaches a diagnostic value.
	pub fn with_diagnostic(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.diagnostics.insert(key.into(), value.into());

		self
	}
}
