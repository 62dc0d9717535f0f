//! Startup configuration: credential mode, storage account, refresh policy, database, and
//! sub-service flags.
//!
//! Values are validated once when built and are immutable afterwards. [`CredentialConfig`] is
//! assembled through [`CredentialConfigBuilder`]; [`AppConfig::from_env`] reads the whole
//! startup configuration from process environment variables.

// std
use std::path::PathBuf;
// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
// self
use crate::{
	_prelude::*,
	auth::{IdentityClientId, ResourceScope, StorageAccount, TenantId, TokenSecret},
	error::ConfigError,
	source::SourceKind,
};

/// Credential acquisition strategy selected at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialMode {
	/// Derive delegation tokens from the long-lived account key.
	SharedKey,
	/// Request bearer tokens from the ambient workload identity.
	WorkloadIdentity,
}
impl CredentialMode {
	/// Returns the source variant this mode produces.
	pub const fn source_kind(self) -> SourceKind {
		match self {
			Self::SharedKey => SourceKind::SharedKey,
			Self::WorkloadIdentity => SourceKind::WorkloadIdentity,
		}
	}
}
impl FromStr for CredentialMode {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"shared_key" | "shared-key" | "key" => Ok(Self::SharedKey),
			"workload_identity" | "workload-identity" | "identity" => Ok(Self::WorkloadIdentity),
			other => Err(ConfigError::invalid(
				AppConfig::ENV_MODE,
				format!("unknown credential mode `{other}`"),
			)),
		}
	}
}

/// Ambient identity provider used by workload-identity mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AmbientIdentity {
	/// Managed identity endpoint (instance metadata service or an app-hosting equivalent).
	ManagedIdentity {
		/// Token endpoint URL.
		endpoint: Url,
		/// Secret header some hosting environments require on every request.
		identity_header: Option<TokenSecret>,
	},
	/// Federated token exchange using a projected service-account token file.
	Federated {
		/// Authority host, e.g. `https://login.microsoftonline.com/`.
		authority: Url,
		/// Directory tenant that owns the identity.
		tenant: TenantId,
		/// Path to the projected token used as the client assertion.
		token_file: PathBuf,
	},
}
impl AmbientIdentity {
	/// Instance metadata service token endpoint.
	pub const IMDS_ENDPOINT: &'static str = "http://169.254.169.254/metadata/identity/oauth2/token";
	/// Public-cloud authority host.
	pub const DEFAULT_AUTHORITY: &'static str = "https://login.microsoftonline.com/";

	/// Token endpoint URL for the federated exchange.
	pub fn federated_token_url(authority: &Url, tenant: &TenantId) -> Result<Url, ConfigError> {
		authority
			.join(&format!("{tenant}/oauth2/v2.0/token"))
			.map_err(|source| ConfigError::InvalidEndpoint { name: "authority_host", source })
	}

	/// Stable label for logs and diagnostics.
	pub const fn as_str(&self) -> &'static str {
		match self {
			Self::ManagedIdentity { .. } => "managed_identity",
			Self::Federated { .. } => "federated",
		}
	}
}

/// Immutable credential settings for one storage account.
#[derive(Clone, Debug)]
pub struct CredentialConfig {
	/// Acquisition strategy.
	pub mode: CredentialMode,
	/// Storage account the native library reads from.
	pub account: StorageAccount,
	/// Resource the tokens grant access to.
	pub scope: ResourceScope,
	/// Base64 account key; required in shared-key mode.
	pub account_key: Option<TokenSecret>,
	/// User-assigned identity selector for workload-identity mode.
	pub client_id: Option<IdentityClientId>,
	/// Ambient identity provider for workload-identity mode.
	pub identity: AmbientIdentity,
	/// Lifetime of derived delegation tokens.
	pub validity: Duration,
	/// Lead time before expiry at which the cached token is refreshed.
	pub refresh_margin: Duration,
	/// Upper bound on a refresh (and on waiting for someone else's refresh).
	pub refresh_timeout: Duration,
}
impl CredentialConfig {
	/// Default delegation token lifetime.
	pub const DEFAULT_VALIDITY: Duration = Duration::hours(1);
	/// Longest accepted delegation token lifetime.
	pub const MAX_VALIDITY: Duration = Duration::days(7);
	/// Default refresh safety margin.
	pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::minutes(5);
	/// Default refresh timeout.
	pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::seconds(10);

	/// Creates a builder for the given account and mode.
	pub fn builder(account: StorageAccount, mode: CredentialMode) -> CredentialConfigBuilder {
		CredentialConfigBuilder::new(account, mode)
	}

	/// Decodes the account key. Fails when the key is absent or not base64.
	pub fn decoded_key(&self) -> Result<Vec<u8>, ConfigError> {
		let key = self.account_key.as_ref().ok_or(ConfigError::MissingKeyMaterial)?;

		decode_key(key)
	}
}

/// Builder for [`CredentialConfig`].
#[derive(Clone, Debug)]
pub struct CredentialConfigBuilder {
	mode: CredentialMode,
	account: StorageAccount,
	scope: ResourceScope,
	account_key: Option<TokenSecret>,
	client_id: Option<IdentityClientId>,
	identity_endpoint: Option<Url>,
	identity_header: Option<TokenSecret>,
	federated: Option<(Url, TenantId, PathBuf)>,
	validity: Duration,
	refresh_margin: Duration,
	refresh_timeout: Duration,
}
impl CredentialConfigBuilder {
	fn new(account: StorageAccount, mode: CredentialMode) -> Self {
		Self {
			mode,
			account,
			scope: ResourceScope::storage(),
			account_key: None,
			client_id: None,
			identity_endpoint: None,
			identity_header: None,
			federated: None,
			validity: CredentialConfig::DEFAULT_VALIDITY,
			refresh_margin: CredentialConfig::DEFAULT_REFRESH_MARGIN,
			refresh_timeout: CredentialConfig::DEFAULT_REFRESH_TIMEOUT,
		}
	}

	/// Overrides the resource scope (defaults to blob storage).
	pub fn scope(mut self, scope: ResourceScope) -> Self {
		self.scope = scope;

		self
	}

	/// Provides the base64 account key.
	pub fn account_key(mut self, key: impl Into<String>) -> Self {
		self.account_key = Some(TokenSecret::new(key));

		self
	}

	/// Selects a user-assigned identity.
	pub fn client_id(mut self, client_id: IdentityClientId) -> Self {
		self.client_id = Some(client_id);

		self
	}

	/// Uses a managed identity endpoint other than the instance metadata service.
	pub fn managed_identity_endpoint(mut self, endpoint: Url) -> Self {
		self.identity_endpoint = Some(endpoint);

		self
	}

	/// Attaches the secret header required by some managed identity endpoints.
	pub fn identity_header(mut self, header: impl Into<String>) -> Self {
		self.identity_header = Some(TokenSecret::new(header));

		self
	}

	/// Switches workload identity to the federated token exchange.
	pub fn federated(mut self, authority: Url, tenant: TenantId, token_file: PathBuf) -> Self {
		self.federated = Some((authority, tenant, token_file));

		self
	}

	/// Overrides the delegation token lifetime (defaults to one hour).
	pub fn validity(mut self, validity: Duration) -> Self {
		self.validity = validity;

		self
	}

	/// Overrides the refresh safety margin (defaults to five minutes).
	pub fn refresh_margin(mut self, margin: Duration) -> Self {
		self.refresh_margin = margin;

		self
	}

	/// Overrides the refresh timeout (defaults to ten seconds).
	pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
		self.refresh_timeout = timeout;

		self
	}

	/// Validates the settings and produces a [`CredentialConfig`].
	pub fn build(self) -> Result<CredentialConfig, ConfigError> {
		if !self.validity.is_positive() {
			return Err(ConfigError::invalid("validity", "must be positive"));
		}
		if self.validity > CredentialConfig::MAX_VALIDITY {
			return Err(ConfigError::invalid(
				"validity",
				format!("must not exceed {}s", CredentialConfig::MAX_VALIDITY.whole_seconds()),
			));
		}
		if !self.refresh_timeout.is_positive() {
			return Err(ConfigError::invalid("refresh_timeout", "must be positive"));
		}
		if self.refresh_margin.is_negative() {
			return Err(ConfigError::invalid("refresh_margin", "must not be negative"));
		}

		match self.mode {
			CredentialMode::SharedKey => {
				let key = self.account_key.as_ref().ok_or(ConfigError::MissingKeyMaterial)?;

				decode_key(key)?;

				if self.refresh_margin >= self.validity {
					return Err(ConfigError::MarginExceedsValidity {
						margin: self.refresh_margin,
						validity: self.validity,
					});
				}
			},
			CredentialMode::WorkloadIdentity =>
				if self.federated.is_some() && self.client_id.is_none() {
					return Err(ConfigError::MissingSetting { name: AppConfig::ENV_CLIENT_ID });
				},
		}

		let identity = match self.federated {
			Some((authority, tenant, token_file)) =>
				AmbientIdentity::Federated { authority, tenant, token_file },
			None => AmbientIdentity::ManagedIdentity {
				endpoint: match self.identity_endpoint {
					Some(endpoint) => endpoint,
					None => parse_url("identity_endpoint", AmbientIdentity::IMDS_ENDPOINT)?,
				},
				identity_header: self.identity_header,
			},
		};

		Ok(CredentialConfig {
			mode: self.mode,
			account: self.account,
			scope: self.scope,
			account_key: self.account_key,
			client_id: self.client_id,
			identity,
			validity: self.validity,
			refresh_margin: self.refresh_margin,
			refresh_timeout: self.refresh_timeout,
		})
	}
}

/// Database connection settings used by the health probe.
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
	/// Connection URL; may embed a password, hence redacted.
	pub url: TokenSecret,
	/// Upper bound on a single reachability probe.
	pub probe_timeout: Duration,
}
impl DatabaseConfig {
	/// Default probe timeout.
	pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::seconds(5);

	/// Creates settings for the given connection URL.
	pub fn new(url: impl Into<String>) -> Self {
		Self { url: TokenSecret::new(url), probe_timeout: Self::DEFAULT_PROBE_TIMEOUT }
	}

	/// Overrides the probe timeout.
	pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
		self.probe_timeout = timeout;

		self
	}
}

/// Complete startup configuration.
#[derive(Clone, Debug, Default)]
pub struct AppConfig {
	/// Storage credential settings; `None` disables the token source.
	pub credential: Option<CredentialConfig>,
	/// Database settings; `None` when no database is configured.
	pub database: Option<DatabaseConfig>,
	/// Explicit sub-service enable flags keyed by service name.
	pub services: BTreeMap<String, bool>,
}
impl AppConfig {
	/// Credential mode key (`shared_key`, `workload_identity`, or `disabled`).
	pub const ENV_MODE: &'static str = "STORAGE_CREDENTIAL_MODE";
	/// Storage account key.
	pub const ENV_ACCOUNT: &'static str = "STORAGE_ACCOUNT";
	/// Resource scope key.
	pub const ENV_SCOPE: &'static str = "STORAGE_RESOURCE_SCOPE";
	/// Account key material key.
	pub const ENV_ACCOUNT_KEY: &'static str = "STORAGE_ACCOUNT_KEY";
	/// User-assigned identity key.
	pub const ENV_CLIENT_ID: &'static str = "STORAGE_IDENTITY_CLIENT_ID";
	/// Delegation lifetime key, in seconds.
	pub const ENV_VALIDITY: &'static str = "STORAGE_TOKEN_VALIDITY_SECS";
	/// Refresh margin key, in seconds.
	pub const ENV_MARGIN: &'static str = "STORAGE_REFRESH_MARGIN_SECS";
	/// Refresh timeout key, in seconds.
	pub const ENV_TIMEOUT: &'static str = "STORAGE_REFRESH_TIMEOUT_SECS";
	/// Managed identity endpoint override key.
	pub const ENV_IDENTITY_ENDPOINT: &'static str = "STORAGE_IDENTITY_ENDPOINT";
	/// Managed identity secret header key.
	pub const ENV_IDENTITY_HEADER: &'static str = "IDENTITY_HEADER";
	/// Projected federated token file key.
	pub const ENV_FEDERATED_TOKEN_FILE: &'static str = "AZURE_FEDERATED_TOKEN_FILE";
	/// Federated tenant key.
	pub const ENV_TENANT: &'static str = "AZURE_TENANT_ID";
	/// Federated client key, used when no storage-specific client id is set.
	pub const ENV_AZURE_CLIENT_ID: &'static str = "AZURE_CLIENT_ID";
	/// Authority host key.
	pub const ENV_AUTHORITY: &'static str = "AZURE_AUTHORITY_HOST";
	/// Database URL key.
	pub const ENV_DATABASE_URL: &'static str = "DATABASE_URL";
	/// Database probe timeout key, in seconds.
	pub const ENV_DATABASE_TIMEOUT: &'static str = "DATABASE_PROBE_TIMEOUT_SECS";
	/// Comma-separated list of enabled sub-services.
	pub const ENV_ENABLED_SERVICES: &'static str = "ENABLED_SERVICES";
	/// Comma-separated list of disabled sub-services.
	pub const ENV_DISABLED_SERVICES: &'static str = "DISABLED_SERVICES";

	/// Reads the configuration from the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Reads the configuration through an arbitrary key lookup.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
		let mode = get(Self::ENV_MODE).map(|mode| mode.to_ascii_lowercase());
		let credential = match mode.as_deref() {
			None | Some("disabled") | Some("none") => None,
			Some(raw) => Some(credential_from_lookup(raw.parse()?, &get)?),
		};
		let database = match get(Self::ENV_DATABASE_URL) {
			Some(url) => Some(DatabaseConfig::new(url).with_probe_timeout(seconds(
				&get,
				Self::ENV_DATABASE_TIMEOUT,
				DatabaseConfig::DEFAULT_PROBE_TIMEOUT,
			)?)),
			None => None,
		};
		let mut services = BTreeMap::new();

		for (key, enabled) in [(Self::ENV_ENABLED_SERVICES, true), (Self::ENV_DISABLED_SERVICES, false)]
		{
			if let Some(list) = get(key) {
				for name in list.split(',').map(str::trim).filter(|name| !name.is_empty()) {
					services.insert(name.to_ascii_lowercase(), enabled);
				}
			}
		}

		Ok(Self { credential, database, services })
	}

	/// Returns whether the named sub-service is enabled, falling back to `default`.
	pub fn service_enabled(&self, name: &str, default: bool) -> bool {
		self.services.get(&name.to_ascii_lowercase()).copied().unwrap_or(default)
	}
}

fn credential_from_lookup<G>(mode: CredentialMode, get: &G) -> Result<CredentialConfig, ConfigError>
where
	G: Fn(&str) -> Option<String>,
{
	let account = get(AppConfig::ENV_ACCOUNT)
		.ok_or(ConfigError::MissingSetting { name: AppConfig::ENV_ACCOUNT })?;
	let mut builder = CredentialConfig::builder(StorageAccount::new(account)?, mode)
		.validity(seconds(get, AppConfig::ENV_VALIDITY, CredentialConfig::DEFAULT_VALIDITY)?)
		.refresh_margin(seconds(
			get,
			AppConfig::ENV_MARGIN,
			CredentialConfig::DEFAULT_REFRESH_MARGIN,
		)?)
		.refresh_timeout(seconds(
			get,
			AppConfig::ENV_TIMEOUT,
			CredentialConfig::DEFAULT_REFRESH_TIMEOUT,
		)?);

	if let Some(scope) = get(AppConfig::ENV_SCOPE) {
		builder = builder.scope(ResourceScope::new(scope)?);
	}
	if let Some(key) = get(AppConfig::ENV_ACCOUNT_KEY) {
		builder = builder.account_key(key);
	}
	if let Some(client_id) =
		get(AppConfig::ENV_CLIENT_ID).or_else(|| get(AppConfig::ENV_AZURE_CLIENT_ID))
	{
		builder = builder.client_id(IdentityClientId::new(client_id)?);
	}
	if mode == CredentialMode::WorkloadIdentity {
		if let Some(token_file) = get(AppConfig::ENV_FEDERATED_TOKEN_FILE) {
			let tenant = get(AppConfig::ENV_TENANT)
				.ok_or(ConfigError::MissingSetting { name: AppConfig::ENV_TENANT })?;
			let authority = parse_url(
				AppConfig::ENV_AUTHORITY,
				&get(AppConfig::ENV_AUTHORITY)
					.unwrap_or_else(|| AmbientIdentity::DEFAULT_AUTHORITY.to_owned()),
			)?;

			builder = builder.federated(authority, TenantId::new(tenant)?, token_file.into());
		} else {
			if let Some(endpoint) = get(AppConfig::ENV_IDENTITY_ENDPOINT) {
				builder = builder
					.managed_identity_endpoint(parse_url(AppConfig::ENV_IDENTITY_ENDPOINT, &endpoint)?);
			}
			if let Some(header) = get(AppConfig::ENV_IDENTITY_HEADER) {
				builder = builder.identity_header(header);
			}
		}
	}

	builder.build()
}

fn seconds<G>(get: &G, name: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
	G: Fn(&str) -> Option<String>,
{
	match get(name) {
		Some(raw) => raw
			.parse::<i64>()
			.map(Duration::seconds)
			.map_err(|err| ConfigError::invalid(name, err)),
		None => Ok(default),
	}
}

fn parse_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
	let mut url = Url::parse(raw).map_err(|source| ConfigError::InvalidEndpoint { name, source })?;

	// Authority hosts are joined against, so they need a trailing slash.
	if name == AppConfig::ENV_AUTHORITY && !url.path().ends_with('/') {
		url.set_path(&format!("{}/", url.path()));
	}

	Ok(url)
}

fn decode_key(key: &TokenSecret) -> Result<Vec<u8>, ConfigError> {
	let bytes =
		STANDARD.decode(key.expose()).map_err(|source| ConfigError::InvalidKeyMaterial { source })?;

	if bytes.is_empty() {
		return Err(ConfigError::MissingKeyMaterial);
	}

	Ok(bytes)
}
