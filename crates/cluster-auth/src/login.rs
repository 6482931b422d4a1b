//! Redirect-based login against a cluster's authorization endpoint
//!
//! OpenShift's challenging OAuth client answers a successful basic-auth GET
//! with a 302 whose Location embeds the token (implicit grant). The client
//! used here must therefore keep redirect following OFF: the redirect is the
//! success signal, and following it would throw the token away. A plain 200,
//! or any other non-302 answer, means the login did not happen.

use std::time::Duration;

use reqwest::{StatusCode, header};
use tokio::time::Instant;
use tracing::info;

use crate::error::{Error, Result};
use crate::fragment;
use crate::store::Credential;

/// Subtracted from the reported token validity so a token is never presented
/// right at its expiry limit.
pub const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(5);

/// Upper bound on a reported validity (ten years). Keeps the expiry instant
/// representable when an issuer reports something absurd like i64::MAX.
const MAX_VALIDITY_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Build the HTTP client for authorization exchanges: redirects disabled,
/// bounded by the deployment timeout.
pub fn build_auth_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()
}

/// Perform one login exchange and return the resulting credential.
///
/// The caller decides where the credential is cached; runs of this function
/// are de-duplicated by `CredentialStore::get_or_refresh`.
pub async fn request_token(
    client: &reqwest::Client,
    auth_url: &str,
    username: &str,
    password: &str,
) -> Result<Credential> {
    info!(upstream = auth_url, "fetching new token");

    let response = client
        .get(auth_url)
        .basic_auth(username, Some(password))
        .send()
        .await
        .map_err(|e| Error::Transport(format!("authorization endpoint unreachable: {e}")))?;

    let status = response.status();
    if status != StatusCode::FOUND {
        return Err(Error::NoLocation {
            status: status.as_u16(),
        });
    }

    let location = response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(Error::NoLocation {
            status: status.as_u16(),
        })?;

    let (token, validity_secs) = fragment::parse_location(location)?;
    Ok(Credential::new(token, expires_at_from(validity_secs)))
}

/// Absolute expiry for a reported validity, margin applied. Validities at or
/// below the margin (or negative) collapse to "already stale" rather than
/// being rejected; validities past [`MAX_VALIDITY_SECS`] clamp to it so the
/// instant addition stays in range.
fn expires_at_from(validity_secs: i64) -> Instant {
    let usable = validity_secs
        .saturating_sub(EXPIRY_SAFETY_MARGIN.as_secs() as i64)
        .clamp(0, MAX_VALIDITY_SECS) as u64;
    Instant::now() + Duration::from_secs(usable)
}
