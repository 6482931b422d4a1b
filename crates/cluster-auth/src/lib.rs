//! OpenShift cluster authentication library
//!
//! Obtains and caches bearer tokens for OpenShift clusters via the OAuth
//! implicit-grant redirect flow. Standalone library with no dependency on
//! the proxy binary, usable and testable on its own.
//!
//! Token flow:
//! 1. Caller asks `CredentialStore::get_or_refresh()` for a cluster's token
//! 2. On a cache miss the store runs `login::request_token()` exactly once,
//!    no matter how many callers are waiting
//! 3. `request_token()` hits the authorization endpoint with basic auth and
//!    redirects disabled; the 302 Location carries the token
//! 4. `fragment::parse_location()` extracts `access_token` / `expires_in`
//! 5. The store caches the resulting `Credential` until it goes stale
//! 6. The proxy invalidates the entry when the cluster rejects the token

pub mod error;
pub mod fragment;
pub mod login;
pub mod store;

pub use error::{Error, ParseError, Result};
pub use login::{EXPIRY_SAFETY_MARGIN, request_token};
pub use store::{Credential, CredentialStore};
