//! Health aggregation over the token broker, dependency probes, and sub-services.
//!
//! [`HealthAggregator::collect`] is stateless: every call reads [`TokenBroker::status`] (no
//! network I/O), runs each [`DependencyProbe`] under a timeout, derives per-service
//! availability, and rolls everything up into a [`HealthReport`]. Collection never fails;
//! problems become report entries and issues.

#[cfg(feature = "postgres")] pub mod database;
pub mod probe;

#[cfg(feature = "postgres")] pub use database::*;
pub use probe::*;

// crates.io
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
// self
use crate::{
	_prelude::*,
	broker::{TokenBroker, TokenHealth},
	config::AppConfig,
	error::ConfigError,
	obs::{self, OpOutcome, Operation},
};

/// Status of one dependency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyStatus {
	/// Fully usable.
	Ok,
	/// Usable but impaired (e.g. token inside the refresh margin).
	Warning,
	/// Not usable.
	Failing,
	/// Disabled, never produced, or did not answer in time.
	Missing,
}
impl DependencyStatus {
	/// Returns `true` when services may rely on the dependency.
	pub const fn is_usable(self) -> bool {
		matches!(self, Self::Ok | Self::Warning)
	}
}

/// Overall rollup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
	/// Every required dependency is usable.
	Healthy,
	/// At least one required dependency is failing or missing.
	Degraded,
}

/// Health of one dependency.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DependencyReport {
	/// Dependency status.
	pub status: DependencyStatus,
	/// Whether the dependency participates in the overall rollup.
	pub required: bool,
	/// Free-form diagnostics.
	pub diagnostics: BTreeMap<String, Value>,
	/// Error text, when the dependency is not usable or recently failed.
	pub error: Option<String>,
}

/// Availability of one sub-service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceReport {
	/// `enabled` and every required dependency is ok or warning.
	pub available: bool,
	/// Human-readable description.
	pub description: String,
	/// Endpoints served by the sub-service.
	pub endpoints: Vec<String>,
	/// Enablement flag and per-dependency statuses.
	pub details: BTreeMap<String, Value>,
}

/// Aggregated health, recomputed on every poll.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
	/// Overall rollup.
	pub status: OverallStatus,
	/// Sub-service availability keyed by service name.
	pub services: BTreeMap<String, ServiceReport>,
	/// Dependency health keyed by dependency name.
	pub dependencies: BTreeMap<String, DependencyReport>,
	/// Human-readable problems, in discovery order.
	pub issues: Vec<String>,
}
impl HealthReport {
	/// HTTP status code for a health endpoint: 200 when healthy, 503 when degraded.
	pub const fn http_status(&self) -> u16 {
		match self.status {
			OverallStatus::Healthy => 200,
			OverallStatus::Degraded => 503,
		}
	}

	/// Returns `true` when the rollup is healthy.
	pub fn is_healthy(&self) -> bool {
		self.status == OverallStatus::Healthy
	}
}

/// Sub-service description and its dependency requirements.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
	/// Service name used as the report key.
	pub name: String,
	/// Human-readable description.
	pub description: String,
	/// Endpoints served by the service.
	pub endpoints: Vec<String>,
	/// Whether the service is switched on.
	pub enabled: bool,
	/// Dependency names that must be ok or warning for the service to be available.
	pub requires: Vec<String>,
}
impl ServiceSpec {
	/// Creates an enabled service without endpoints or requirements.
	pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			description: description.into(),
			endpoints: Vec::new(),
			enabled: true,
			requires: Vec::new(),
		}
	}

	/// Adds an endpoint.
	pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
		self.endpoints.push(endpoint.into());

		self
	}

	/// Adds a required dependency.
	pub fn requires(mut self, dependency: impl Into<String>) -> Self {
		self.requires.push(dependency.into());

		self
	}

	/// Sets the enable flag.
	pub fn enabled(mut self, enabled: bool) -> Self {
		self.enabled = enabled;

		self
	}

	/// Applies the enable flag from startup configuration, keeping the current value as the
	/// default.
	pub fn enabled_by(mut self, config: &AppConfig) -> Self {
		self.enabled = config.service_enabled(&self.name, self.enabled);

		self
	}
}

struct CredentialEntry {
	name: String,
	broker: Option<Arc<TokenBroker>>,
}

struct ProbeEntry {
	probe: Arc<dyn DependencyProbe>,
	required: bool,
}

/// Builds [`HealthReport`]s on demand.
pub struct HealthAggregator {
	credentials: Vec<CredentialEntry>,
	probes: Vec<ProbeEntry>,
	services: Vec<ServiceSpec>,
	probe_timeout: Duration,
}
impl HealthAggregator {
	/// Default dependency name of the storage token broker.
	pub const STORAGE_TOKEN: &'static str = "storage_token";
	/// Default bound on a single probe.
	pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::seconds(5);

	/// Creates an empty aggregator.
	pub fn new() -> Self {
		Self {
			credentials: Vec::new(),
			probes: Vec::new(),
			services: Vec::new(),
			probe_timeout: Self::DEFAULT_PROBE_TIMEOUT,
		}
	}

	/// Registers the storage token broker and, when a database is configured, a PostgreSQL
	/// probe. Must be called inside a Tokio runtime when a database is configured.
	pub fn from_config(
		config: &AppConfig,
		broker: Option<Arc<TokenBroker>>,
	) -> Result<Self, ConfigError> {
		#[cfg_attr(not(feature = "postgres"), allow(unused_mut))]
		let mut aggregator = Self::new().with_credential(Self::STORAGE_TOKEN, broker);

		#[cfg(feature = "postgres")]
		{
			if let Some(database) = &config.database {
				aggregator = aggregator
					.with_probe_timeout(database.probe_timeout)
					.with_probe(Arc::new(PostgresProbe::connect_lazy(database)?), true);
			}
		}
		#[cfg(not(feature = "postgres"))]
		let _ = config;

		Ok(aggregator)
	}

	/// Registers a credential broker under `name`. `None` marks the source as disabled: it is
	/// reported as `missing` but not required.
	pub fn with_credential(
		mut self,
		name: impl Into<String>,
		broker: Option<Arc<TokenBroker>>,
	) -> Self {
		self.credentials.push(CredentialEntry { name: name.into(), broker });

		self
	}

	/// Registers a dependency probe.
	pub fn with_probe(mut self, probe: Arc<dyn DependencyProbe>, required: bool) -> Self {
		self.probes.push(ProbeEntry { probe, required });

		self
	}

	/// Registers a sub-service.
	pub fn with_service(mut self, service: ServiceSpec) -> Self {
		self.services.push(service);

		self
	}

	/// Overrides the per-probe timeout.
	pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
		self.probe_timeout = timeout;

		self
	}

	/// Polls every registered item and assembles the report.
	pub async fn collect(&self) -> HealthReport {
		let now = OffsetDateTime::now_utc();
		let mut dependencies = BTreeMap::new();
		let mut issues = Vec::new();

		for entry in &self.credentials {
			let report = credential_report(entry, now, &mut issues);

			dependencies.insert(entry.name.clone(), report);
		}
		for entry in &self.probes {
			let name = entry.probe.name().to_owned();
			let report = self.run_probe(entry, &mut issues).await;

			dependencies.insert(name, report);
		}

		let services = self
			.services
			.iter()
			.map(|spec| (spec.name.clone(), service_report(spec, &dependencies, &mut issues)))
			.collect();
		let degraded = dependencies.values().any(|report| {
			report.required
				&& matches!(report.status, DependencyStatus::Failing | DependencyStatus::Missing)
		});

		HealthReport {
			status: if degraded { OverallStatus::Degraded } else { OverallStatus::Healthy },
			services,
			dependencies,
			issues,
		}
	}

	async fn run_probe(&self, entry: &ProbeEntry, issues: &mut Vec<String>) -> DependencyReport {
		const OP: Operation = Operation::Probe;

		let name = entry.probe.name();

		obs::record_op_outcome(OP, OpOutcome::Attempt);

		match tokio::time::timeout(self.probe_timeout.unsigned_abs(), entry.probe.probe()).await {
			Ok(Ok(outcome)) => {
				obs::record_op_outcome(OP, OpOutcome::Success);

				if entry.required && outcome.status == DependencyStatus::Warning {
					issues.push(format!("{name}: dependency reports a warning."));
				}

				DependencyReport {
					status: outcome.status,
					required: entry.required,
					diagnostics: outcome.diagnostics,
					error: None,
				}
			},
			Ok(Err(err)) => {
				obs::record_op_outcome(OP, OpOutcome::Failure);

				if entry.required {
					issues.push(format!("{name}: {}.", err.reason));
				}

				DependencyReport {
					status: DependencyStatus::Failing,
					required: entry.required,
					diagnostics: BTreeMap::new(),
					error: Some(err.to_string()),
				}
			},
			Err(_) => {
				obs::record_op_outcome(OP, OpOutcome::Failure);

				let message = format!("{name}: probe produced no result within {}.", self.probe_timeout);

				issues.push(message.clone());

				DependencyReport {
					status: DependencyStatus::Missing,
					required: entry.required,
					diagnostics: BTreeMap::new(),
					error: Some(message),
				}
			},
		}
	}
}
impl Default for HealthAggregator {
	fn default() -> Self {
		Self::new()
	}
}
impl Debug for HealthAggregator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("HealthAggregator")
			.field(
				"credentials",
				&self.credentials.iter().map(|entry| entry.name.as_str()).collect::<Vec<_>>(),
			)
			.field(
				"probes",
				&self.probes.iter().map(|entry| entry.probe.name()).collect::<Vec<_>>(),
			)
			.field("services", &self.services)
			.field("probe_timeout", &self.probe_timeout)
			.finish()
	}
}

fn credential_report(
	entry: &CredentialEntry,
	now: OffsetDateTime,
	issues: &mut Vec<String>,
) -> DependencyReport {
	let name = &entry.name;
	let Some(broker) = &entry.broker else {
		return DependencyReport {
			status: DependencyStatus::Missing,
			required: false,
			diagnostics: BTreeMap::from([("enabled".into(), Value::Bool(false))]),
			error: None,
		};
	};
	let status = broker.status_at(now);
	let mut diagnostics = BTreeMap::from([
		("enabled".to_owned(), Value::Bool(true)),
		("source_kind".to_owned(), Value::from(status.source_kind.as_str())),
		("health".to_owned(), Value::from(status.health.as_str())),
		("has_token".to_owned(), Value::Bool(status.has_token)),
	]);

	if let Some(ttl) = status.ttl_seconds {
		diagnostics.insert("ttl_seconds".into(), Value::from(ttl));
	}
	if let Some(refreshed) = status.last_refreshed_at.and_then(|at| at.format(&Rfc3339).ok()) {
		diagnostics.insert("last_refreshed_at".into(), Value::from(refreshed));
	}

	let dependency_status = match status.health {
		TokenHealth::Valid => DependencyStatus::Ok,
		TokenHealth::Expiring => {
			issues.push(format!(
				"{name}: token expires in {}s, inside the {}s refresh margin.",
				status.ttl_seconds.unwrap_or_default(),
				broker.refresh_margin().whole_seconds()
			));

			DependencyStatus::Warning
		},
		TokenHealth::Missing => match &status.last_error {
			Some(error) => {
				issues.push(format!("{name}: no token available; acquisition failed ({error})."));

				DependencyStatus::Failing
			},
			None => {
				issues.push(format!("{name}: no token has been acquired yet."));

				DependencyStatus::Warning
			},
		},
		TokenHealth::Expired => {
			issues.push(format!("{name}: token has expired."));

			DependencyStatus::Failing
		},
	};

	DependencyReport {
		status: dependency_status,
		required: true,
		diagnostics,
		error: status.last_error,
	}
}

fn service_report(
	spec: &ServiceSpec,
	dependencies: &BTreeMap<String, DependencyReport>,
	issues: &mut Vec<String>,
) -> ServiceReport {
	let mut available = spec.enabled;
	let mut required = serde_json::Map::new();

	for dependency in &spec.requires {
		match dependencies.get(dependency) {
			Some(report) => {
				available &= report.status.is_usable();
				required.insert(
					dependency.clone(),
					serde_json::to_value(report.status).unwrap_or(Value::Null),
				);
			},
			None => {
				available = false;
				required.insert(dependency.clone(), Value::Null);
				issues.push(format!("{}: unknown dependency `{dependency}`.", spec.name));
			},
		}
	}

	ServiceReport {
		available,
		description: spec.description.clone(),
		endpoints: spec.endpoints.clone(),
		details: BTreeMap::from([
			("enabled".to_owned(), Value::Bool(spec.enabled)),
			("requires".to_owned(), Value::Object(required)),
		]),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	struct StaticProbe(&'static str, Result<ProbeOutcome, &'static str>);
	impl DependencyProbe for StaticProbe {
		fn name(&self) -> &str {
			self.0
		}

		fn probe(&self) -> ProbeFuture<'_> {
			let result = self
				.1
				.clone()
				.map_err(|reason| crate::error::DependencyUnavailable::new(self.0, reason));

			Box::pin(async move { result })
		}
	}

	#[tokio::test]
	async fn empty_aggregator_is_healthy() {
		let report = HealthAggregator::default().collect().await;

		assert!(report.is_healthy());
		assert_eq!(report.http_status(), 200);
		assert!(report.issues.is_empty());
	}

	#[tokio::test]
	async fn disabled_credential_is_missing_but_not_required() {
		let report = HealthAggregator::new()
			.with_credential(HealthAggregator::STORAGE_TOKEN, None)
			.collect()
			.await;
		let dependency = &report.dependencies[HealthAggregator::STORAGE_TOKEN];

		assert_eq!(dependency.status, DependencyStatus::Missing);
		assert!(!dependency.required);
		assert!(report.is_healthy());
	}

	#[tokio::test]
	async fn optional_failures_do_not_degrade() {
		let report = HealthAggregator::new()
			.with_probe(Arc::new(StaticProbe("cache", Err("connection refused"))), false)
			.with_probe(
				Arc::new(StaticProbe(
					"database",
					Ok(ProbeOutcome::ok().with_diagnostic("round_trip_ms", 3)),
				)),
				true,
			)
			.collect()
			.await;

		assert!(report.is_healthy());
		assert_eq!(report.dependencies["cache"].status, DependencyStatus::Failing);
		assert_eq!(report.dependencies["database"].diagnostics["round_trip_ms"], Value::from(3));
		assert!(report.issues.is_empty());
	}

	#[tokio::test]
	async fn services_require_usable_dependencies() {
		let report = HealthAggregator::new()
			.with_probe(Arc::new(StaticProbe("database", Ok(ProbeOutcome::warning()))), false)
			.with_service(ServiceSpec::new("stac", "Catalog search").requires("database"))
			.with_service(ServiceSpec::new("mosaic", "Mosaic tiles").requires("tiles_cache"))
			.with_service(ServiceSpec::new("legacy", "Legacy tiles").enabled(false))
			.collect()
			.await;

		assert!(report.services["stac"].available);
		assert!(!report.services["mosaic"].available);
		assert!(!report.services["legacy"].available);
		assert_eq!(report.issues, vec!["mosaic: unknown dependency `tiles_cache`.".to_owned()]);
	}
}
