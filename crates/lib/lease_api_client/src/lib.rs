//! # lease_api_client
//!
//! Typed HTTP client for the Lease auth API.
//!
//! Credentials live in a [`store::CredentialStore`]; every authenticated call
//! goes through [`interceptor::AuthInterceptor`], which attaches the bearer,
//! refreshes once per burst of auth failures and retries the failed calls.

pub mod client;
pub mod error;
pub mod interceptor;
pub mod models;
pub mod store;

pub use client::{ApiClient, ClientConfig};
pub use error::{ClientError, is_auth_error};
pub use store::CredentialStore;
