//! Publishes fresh tokens into the native raster library's process-wide configuration before
//! each unit of work.
//!
//! The native library reads its storage credentials from a pair of configuration entries (the
//! account name and a token). Those entries are process-wide, so every in-flight unit of work
//! shares whichever token was published last. [`RequestInterceptor::run`] additionally hands
//! the token to the work explicitly for callers that can pass it per request.

// self
use crate::{
	_prelude::*,
	auth::{StorageAccount, Token},
	broker::{Publisher, TokenBroker},
	error::PublishError,
	source::SourceKind,
};

/// Key/value configuration consumed by the native library.
pub trait NativeConfig: Send + Sync {
	/// Writes `value` under `key`.
	fn set(&self, key: &str, value: &str) -> Result<(), PublishError>;

	/// Reads the value stored under `key`.
	fn get(&self, key: &str) -> Option<String>;

	/// Removes `key`.
	fn remove(&self, key: &str);
}

/// Process environment variables, read by native libraries at request time.
///
/// Writing the environment while another thread calls `getenv` is undefined behavior in the C
/// runtime, and the broker lock does not cover the native library's reads. Publish before
/// native work starts (for example from [`RequestInterceptor::before_work`] ahead of spawning
/// it), or use [`MemoryConfig`] when the library accepts its configuration through an API.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnvironment;
impl NativeConfig for ProcessEnvironment {
	fn set(&self, key: &str, value: &str) -> Result<(), PublishError> {
		if key.is_empty() || key.contains(['=', '\0']) {
			return Err(PublishError::Rejected {
				key: key.to_owned(),
				reason: "environment keys must be non-empty without `=` or NUL".into(),
			});
		}
		if value.contains('\0') {
			return Err(PublishError::Rejected {
				key: key.to_owned(),
				reason: "environment values cannot contain NUL".into(),
			});
		}

		// SAFETY: the broker's refresh lock serializes writers only. The caller must ensure no
		// native code reads the environment while a publish is in progress.
		unsafe { std::env::set_var(key, value) };

		Ok(())
	}

	fn get(&self, key: &str) -> Option<String> {
		std::env::var(key).ok()
	}

	fn remove(&self, key: &str) {
		// SAFETY: see `set`.
		unsafe { std::env::remove_var(key) };
	}
}

/// In-process configuration map for libraries configured through an API.
#[derive(Debug, Default)]
pub struct MemoryConfig(RwLock<HashMap<String, String>>);
impl MemoryConfig {
	/// Returns a copy of all entries.
	pub fn entries(&self) -> BTreeMap<String, String> {
		self.0.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
	}
}
impl NativeConfig for MemoryConfig {
	fn set(&self, key: &str, value: &str) -> Result<(), PublishError> {
		self.0.write().insert(key.to_owned(), value.to_owned());

		Ok(())
	}

	fn get(&self, key: &str) -> Option<String> {
		self.0.read().get(key).cloned()
	}

	fn remove(&self, key: &str) {
		self.0.write().remove(key);
	}
}

/// Names of the configuration entry pair the native library reads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeKeys {
	/// Entry holding the storage account name.
	pub account: String,
	/// Entry holding the token.
	pub token: String,
}
impl NativeKeys {
	/// Storage account entry.
	pub const ACCOUNT: &'static str = "AZURE_STORAGE_ACCOUNT";
	/// Delegation token entry used with shared-key sources.
	pub const SAS_TOKEN: &'static str = "AZURE_STORAGE_SAS_TOKEN";
	/// Bearer token entry used with workload-identity sources.
	pub const ACCESS_TOKEN: &'static str = "AZURE_STORAGE_ACCESS_TOKEN";

	/// Default entry names for tokens produced by `kind`.
	pub fn for_source(kind: SourceKind) -> Self {
		let token = match kind {
			SourceKind::SharedKey => Self::SAS_TOKEN,
			SourceKind::WorkloadIdentity => Self::ACCESS_TOKEN,
		};

		Self { account: Self::ACCOUNT.into(), token: token.into() }
	}
}

/// Runs "check, maybe refresh, publish" before work that reads storage through the native
/// library.
pub struct RequestInterceptor {
	broker: Arc<TokenBroker>,
	account: StorageAccount,
	target: Arc<dyn NativeConfig>,
	keys: NativeKeys,
}
impl RequestInterceptor {
	/// Creates an interceptor publishing into `target` under the default entry names.
	pub fn new(
		broker: Arc<TokenBroker>,
		account: StorageAccount,
		target: Arc<dyn NativeConfig>,
	) -> Self {
		let keys = NativeKeys::for_source(broker.source_kind());

		Self { broker, account, target, keys }
	}

	/// Overrides the entry names.
	pub fn with_keys(mut self, keys: NativeKeys) -> Self {
		self.keys = keys;

		self
	}

	/// Returns the broker backing this interceptor.
	pub fn broker(&self) -> &Arc<TokenBroker> {
		&self.broker
	}

	/// Returns the entry names in use.
	pub fn keys(&self) -> &NativeKeys {
		&self.keys
	}

	/// Ensures a fresh token is cached and published, returning it.
	///
	/// Refresh and publication happen under the broker's refresh lock, so concurrent callers
	/// never observe a published token older than the cached one.
	pub async fn before_work(&self) -> Result<Token> {
		self.broker.ensure_published(&self.entries()).await
	}

	/// Reads the currently published token back from the target.
	pub fn published_token(&self) -> Option<String> {
		self.target.get(&self.keys.token)
	}

	/// Runs `work` after [`RequestInterceptor::before_work`], handing it the published token.
	pub async fn run<F, Fut, T>(&self, work: F) -> Result<T>
	where
		F: FnOnce(Token) -> Fut,
		Fut: Future<Output = T>,
	{
		let token = self.before_work().await?;

		Ok(work(token).await)
	}

	/// Removes the published entries and clears the broker cache.
	pub async fn shutdown(&self) {
		let entries = self.entries();

		self.broker.shutdown_with(|| entries.clear()).await;
	}

	fn entries(&self) -> Entries<'_> {
		Entries { target: self.target.as_ref(), keys: &self.keys, account: &self.account }
	}
}
impl Debug for RequestInterceptor {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestInterceptor")
			.field("broker", &self.broker)
			.field("account", &self.account)
			.field("keys", &self.keys)
			.finish()
	}
}

struct Entries<'a> {
	target: &'a dyn NativeConfig,
	keys: &'a NativeKeys,
	account: &'a StorageAccount,
}
impl Entries<'_> {
	fn clear(&self) {
		self.target.remove(&self.keys.token);
		self.target.remove(&self.keys.account);
	}
}
impl Publisher for Entries<'_> {
	fn is_current(&self, token: &Token) -> bool {
		self.target.get(&self.keys.token).as_deref() == Some(token.value.expose())
			&& self.target.get(&self.keys.account).as_deref() == Some(self.account.as_str())
	}

	fn publish(&self, token: &Token) -> Result<(), PublishError> {
		self.target.set(&self.keys.account, self.account.as_str())?;
		self.target.set(&self.keys.token, token.value.expose())
	}
}
