// self
use crate::{_prelude::*, obs::Operation, source::SourceKind};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedOp<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedOp<F> = F;

/// A span wrapper used around broker operations.
#[derive(Clone, Debug)]
pub struct OpSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl OpSpan {
	/// Creates a new span tagged with the provided operation and source kind.
	pub fn new(op: Operation, source: SourceKind) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span =
				tracing::info_span!("storage_token_broker.op", op = op.as_str(), source = source.as_str());

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (op, source);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedOp<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Emits a `warn` event when a refresh failure is masked by a cached token.
pub(crate) fn warn_fallback(source: SourceKind, cause: &str, remaining: Duration) {
	#[cfg(feature = "tracing")]
	tracing::warn!(
		source = source.as_str(),
		cause,
		remaining_secs = remaining.whole_seconds(),
		"Token refresh failed; serving cached token until it expires."
	);
	#[cfg(not(feature = "tracing"))]
	let _ = (source, cause, remaining);
}

/// Emits a `warn` event when a newly acquired token already expires inside the refresh margin.
pub(crate) fn warn_short_lived(source: SourceKind, remaining: Duration, margin: Duration) {
	#[cfg(feature = "tracing")]
	tracing::warn!(
		source = source.as_str(),
		remaining_secs = remaining.whole_seconds(),
		margin_secs = margin.whole_seconds(),
		"Acquired token expires inside the refresh margin; it will be refreshed on every call."
	);
	#[cfg(not(feature = "tracing"))]
	let _ = (source, remaining, margin);
}

/// Emits a `debug` event after a successful refresh.
pub(crate) fn debug_refreshed(source: SourceKind, expires_at: OffsetDateTime) {
	#[cfg(feature = "tracing")]
	tracing::debug!(source = source.as_str(), %expires_at, "Token refreshed.");
	#[cfg(not(feature = "tracing"))]
	let _ = (source, expires_at);
}

/// Emits an `info` event on broker teardown.
pub(crate) fn info_shutdown(source: SourceKind) {
	#[cfg(feature = "tracing")]
	tracing::info!(source = source.as_str(), "Token broker shut down; cached token cleared.");
	#[cfg(not(feature = "tracing"))]
	let _ = source;
}
