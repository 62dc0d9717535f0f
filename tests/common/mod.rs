//! Fixtures shared by the integration tests.

#![allow(dead_code)]

// std
use std::path::PathBuf;
// crates.io
use httpmock::prelude::*;
use storage_token_broker::{
	auth::{IdentityClientId, StorageAccount, TenantId},
	config::{AmbientIdentity, CredentialConfig, CredentialMode},
	url::Url,
};
use time::Duration;

pub const ACCOUNT: &str = "rasters";
pub const ACCOUNT_KEY: &str = "c2VjcmV0LWtleS1tYXRlcmlhbA==";
pub const IDENTITY_PATH: &str = "/metadata/identity/oauth2/token";

pub fn account() -> StorageAccount {
	StorageAccount::new(ACCOUNT).expect("Account fixture should be valid.")
}

pub fn shared_key_config() -> CredentialConfig {
	CredentialConfig::builder(account(), CredentialMode::SharedKey)
		.account_key(ACCOUNT_KEY)
		.build()
		.expect("Shared key config should build.")
}

pub fn managed_identity_config(server: &MockServer, refresh_timeout: Duration) -> CredentialConfig {
	CredentialConfig::builder(account(), CredentialMode::WorkloadIdentity)
		.managed_identity_endpoint(
			Url::parse(&server.url(IDENTITY_PATH)).expect("Mock identity endpoint should parse."),
		)
		.refresh_timeout(refresh_timeout)
		.build()
		.expect("Managed identity config should build.")
}

pub fn federated_config(server: &MockServer, token_file: PathBuf) -> CredentialConfig {
	let authority = Url::parse(&server.url("/")).expect("Mock authority should parse.");
	let tenant = TenantId::new("contoso").expect("Tenant fixture should be valid.");

	assert!(AmbientIdentity::federated_token_url(&authority, &tenant).is_ok());

	CredentialConfig::builder(account(), CredentialMode::WorkloadIdentity)
		.client_id(IdentityClientId::new("client-abc").expect("Client id should be valid."))
		.federated(authority, tenant, token_file)
		.build()
		.expect("Federated config should build.")
}

pub fn identity_body(access_token: &str, expires_in: i64) -> String {
	format!(
		"{{\"access_token\":\"{access_token}\",\"expires_in\":\"{expires_in}\",\"token_type\":\"Bearer\",\"resource\":\"https://storage.azure.com/\"}}"
	)
}
