//! Short-lived cloud storage tokens for native raster I/O: acquired from an account key or the
//! ambient workload identity, cached and refreshed before expiry, published into the native
//! library's process-wide configuration, and rolled up into health reports.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod broker;
pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod interceptor;
pub mod obs;
pub mod source;

mod oauth;

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use broker::{BrokerStatus, TokenBroker, TokenHealth};
pub use config::{AppConfig, CredentialConfig, CredentialMode};
pub use error::{Error, Result};
pub use health::{HealthAggregator, HealthReport, ServiceSpec};
pub use interceptor::{
	MemoryConfig, NativeConfig, NativeKeys, ProcessEnvironment, RequestInterceptor,
};
pub use source::{CredentialSource, SourceKind};
pub use url;

#[cfg(test)] use {color_eyre as _, httpmock as _};
