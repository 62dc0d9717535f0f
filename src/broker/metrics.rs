// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for broker refresh activity.
#[derive(Debug, Default)]
pub struct RefreshMetrics {
	attempts: AtomicU64,
	success: AtomicU64,
	failure: AtomicU64,
	fallback: AtomicU64,
	cache_hit: AtomicU64,
	short_lived: AtomicU64,
}
impl RefreshMetrics {
	/// Returns the number of calls made to the credential source.
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Returns the number of acquisitions that produced a token.
	pub fn successes(&self) -> u64 {
		self.success.load(Ordering::Relaxed)
	}

	/// Returns the number of failed acquisitions (with or without fallback).
	pub fn failures(&self) -> u64 {
		self.failure.load(Ordering::Relaxed)
	}

	/// Returns the number of failures masked by serving a still-valid cached token.
	pub fn fallbacks(&self) -> u64 {
		self.fallback.load(Ordering::Relaxed)
	}

	/// Returns the number of calls served from the cache without calling the source.
	pub fn cache_hits(&self) -> u64 {
		self.cache_hit.load(Ordering::Relaxed)
	}

	/// Returns the number of acquired tokens whose lifetime was already inside the margin.
	pub fn short_lived(&self) -> u64 {
		self.short_lived.load(Ordering::Relaxed)
	}

	pub(crate) fn record_attempt(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_success(&self) {
		self.success.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failure.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_fallback(&self) {
		self.fallback.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_cache_hit(&self) {
		self.cache_hit.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_short_lived(&self) {
		self.short_lived.fetch_add(1, Ordering::Relaxed);
	}
}
