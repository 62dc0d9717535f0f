//! Token records and redacted secret storage.

pub mod record;
pub mod secret;
