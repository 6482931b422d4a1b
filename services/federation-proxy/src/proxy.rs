//! Federation request handling
//!
//! Parses the caller's credential parameters, obtains a bearer token for the
//! named cluster (cached, or via a fresh login round trip), and forwards the
//! remaining query to that cluster's federation endpoint. A login page coming
//! back in place of metrics means the token died upstream; the cached entry
//! is dropped and the caller is told to retry.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cluster_auth::{Credential, CredentialStore, login};
use common::Secret;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};
use url::Url;
use url::form_urlencoded;

use crate::config::UpstreamConfig;
use crate::error::{ProxyError, Result};
use crate::metrics;

/// Marker the OpenShift OAuth server embeds in its login page. Seeing it in a
/// federation response body means the bearer token was rejected in-band, no
/// matter what the status code claims.
const LOGIN_PAGE_MARKER: &str = "<title>Log In</title>";

/// Validity assumed for tokens the caller supplies directly. There is no
/// login redirect to learn the real expiry from, so trust them for a day;
/// the caller refreshes out-of-band.
const SUPPLIED_TOKEN_TTL: Duration = Duration::from_secs(86_400);

/// Shared state passed to the federate handler via axum State extractor
#[derive(Clone)]
pub struct ProxyState {
    /// Client for the authorization endpoint: redirects are the payload
    /// here, so this one must never follow them.
    pub auth_client: reqwest::Client,
    /// Client for the federation endpoint itself.
    pub metrics_client: reqwest::Client,
    pub store: Arc<CredentialStore>,
    pub upstream: UpstreamConfig,
    pub requests_total: Arc<std::sync::atomic::AtomicU64>,
    pub errors_total: Arc<std::sync::atomic::AtomicU64>,
}

/// How the caller authenticates against the target cluster.
#[derive(Debug)]
enum ClientCredentials {
    /// Ready-made bearer token; no login round trip needed.
    Token(Secret<String>),
    /// Username and password for the redirect login flow.
    Login {
        username: String,
        password: Secret<String>,
    },
}

/// Everything extracted from one inbound query string.
#[derive(Debug)]
struct FederateParams {
    cluster: String,
    credentials: ClientCredentials,
    /// Pairs to pass through downstream, in caller order, repeats intact
    /// (Prometheus `match[]` appears once per selector).
    forwarded: Vec<(String, String)>,
}

/// Both upstream URLs for one cluster, validated before any network call.
#[derive(Debug)]
struct UpstreamEndpoints {
    auth_url: String,
    metrics_url: Url,
}

/// JSON error envelope: {"error":{"type":...,"message":...,"request_id":"req_..."}}
pub(crate) fn error_response(
    status: StatusCode,
    error_type: &str,
    message: &str,
    request_id: &str,
) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": error_type,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Serve one `/federate` request end to end.
///
/// Always resolves to a response: failures are mapped onto the error
/// envelope with the status from [`ProxyError::status`].
#[instrument(skip_all, fields(request_id = %request_id))]
pub async fn handle_federate(
    state: &ProxyState,
    raw_query: Option<String>,
    request_id: String,
) -> Response {
    state
        .requests_total
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let started = std::time::Instant::now();

    match federate(state, raw_query).await {
        Ok(response) => {
            metrics::record_request(response.status().as_u16(), started.elapsed().as_secs_f64());
            response
        }
        Err(err) => {
            state
                .errors_total
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let status = err.status();
            metrics::record_request(status.as_u16(), started.elapsed().as_secs_f64());
            match &err {
                ProxyError::BadRequest(_) | ProxyError::RetryRequested { .. } => {
                    warn!(error = %err, "federation request refused")
                }
                ProxyError::Unauthorized { .. } | ProxyError::UpstreamUnavailable(_) => {
                    error!(error = %err, "federation request failed")
                }
            }
            error_response(status, err.error_type(), &err.to_string(), &request_id)
        }
    }
}

async fn federate(state: &ProxyState, raw_query: Option<String>) -> Result<Response> {
    let params = parse_query(raw_query.as_deref().unwrap_or_default())?;
    let endpoints = resolve_endpoints(&state.upstream, &params.cluster)?;
    let credential = obtain_credential(state, &params, &endpoints.auth_url).await?;
    forward(state, &params, endpoints.metrics_url, &credential).await
}

/// Split the inbound query into credential material and pass-through pairs.
///
/// The first non-empty occurrence of each credential parameter wins; an
/// empty value counts as absent. An explicit token beats a username and
/// password pair when both are present.
fn parse_query(raw_query: &str) -> Result<FederateParams> {
    let mut cluster = None;
    let mut username = None;
    let mut password = None;
    let mut token = None;
    let mut forwarded = Vec::new();

    for (key, value) in form_urlencoded::parse(raw_query.as_bytes()) {
        match key.as_ref() {
            "endpoint" if cluster.is_none() => cluster = non_empty(value),
            "username" if username.is_none() => username = non_empty(value),
            "password" if password.is_none() => password = non_empty(value),
            "token" if token.is_none() => token = non_empty(value),
            "endpoint" | "username" | "password" | "token" => {}
            _ => forwarded.push((key.into_owned(), value.into_owned())),
        }
    }

    let cluster = cluster.ok_or_else(|| {
        ProxyError::BadRequest("missing required parameter: endpoint".to_string())
    })?;

    let credentials = if let Some(token) = token {
        ClientCredentials::Token(Secret::new(token))
    } else if let (Some(username), Some(password)) = (username, password) {
        ClientCredentials::Login {
            username,
            password: Secret::new(password),
        }
    } else {
        return Err(ProxyError::BadRequest(
            "credentials required: supply token, or username and password".to_string(),
        ));
    };

    Ok(FederateParams {
        cluster,
        credentials,
        forwarded,
    })
}

fn non_empty(value: Cow<'_, str>) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.into_owned())
    }
}

/// Render and validate both upstream URLs before touching the network, so a
/// cluster name that breaks the templates fails as caller error.
fn resolve_endpoints(upstream: &UpstreamConfig, cluster: &str) -> Result<UpstreamEndpoints> {
    let auth_url = upstream.auth_url_for(cluster);
    Url::parse(&auth_url).map_err(|e| {
        ProxyError::BadRequest(format!(
            "cluster {cluster:?} renders an invalid authorization URL: {e}"
        ))
    })?;
    let metrics_url = Url::parse(&upstream.metrics_url_for(cluster)).map_err(|e| {
        ProxyError::BadRequest(format!(
            "cluster {cluster:?} renders an invalid federation URL: {e}"
        ))
    })?;
    Ok(UpstreamEndpoints {
        auth_url,
        metrics_url,
    })
}

/// Produce a usable credential for the cluster.
///
/// Explicit tokens are upserted unconditionally so follow-up requests can
/// omit the `token` parameter. The login path goes through the store's
/// single-flight refresh: concurrent callers for the same cluster share one
/// authorization exchange.
async fn obtain_credential(
    state: &ProxyState,
    params: &FederateParams,
    auth_url: &str,
) -> Result<Credential> {
    match &params.credentials {
        ClientCredentials::Token(token) => {
            let credential =
                Credential::new(token.expose().clone(), Instant::now() + SUPPLIED_TOKEN_TTL);
            state.store.insert(&params.cluster, credential.clone()).await;
            Ok(credential)
        }
        ClientCredentials::Login { username, password } => {
            let client = state.auth_client.clone();
            let url = auth_url.to_string();
            let username = username.clone();
            let password = password.clone();
            state
                .store
                .get_or_refresh(&params.cluster, move || async move {
                    let outcome =
                        login::request_token(&client, &url, &username, password.expose()).await;
                    metrics::record_token_refresh(if outcome.is_ok() {
                        "success"
                    } else {
                        "failure"
                    });
                    outcome
                })
                .await
                .map_err(|source| ProxyError::Unauthorized {
                    upstream: auth_url.to_string(),
                    source,
                })
        }
    }
}

/// Forward the surviving query to the federation endpoint and relay the body.
async fn forward(
    state: &ProxyState,
    params: &FederateParams,
    mut metrics_url: Url,
    credential: &Credential,
) -> Result<Response> {
    if !params.forwarded.is_empty() {
        metrics_url.query_pairs_mut().extend_pairs(
            params
                .forwarded
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str())),
        );
    }

    let upstream_response = state
        .metrics_client
        .get(metrics_url.clone())
        .bearer_auth(credential.token())
        .send()
        .await
        .map_err(|e| {
            ProxyError::UpstreamUnavailable(format!("request to {metrics_url} failed: {e}"))
        })?;

    let downstream_status = upstream_response.status();
    let content_type = upstream_response
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .cloned();
    let body = upstream_response.bytes().await.map_err(|e| {
        ProxyError::UpstreamUnavailable(format!("reading federation response failed: {e}"))
    })?;

    // The invalidation signal is in-band: the OAuth server serves its login
    // page with a success status when the token has been rejected. The scan
    // runs on a lossy view; the body itself is relayed byte for byte.
    if String::from_utf8_lossy(&body).contains(LOGIN_PAGE_MARKER) {
        warn!(
            cluster = %params.cluster,
            "federation endpoint answered with its login page; dropping cached token"
        );
        state.store.invalidate(&params.cluster).await;
        metrics::record_invalidation();
        return Err(ProxyError::RetryRequested {
            cluster: params.cluster.clone(),
        });
    }

    if !downstream_status.is_success() {
        warn!(
            cluster = %params.cluster,
            status = %downstream_status,
            "federation endpoint answered non-success; relaying body"
        );
    }
    info!(
        cluster = %params.cluster,
        bytes = body.len(),
        "forwarded federation response"
    );

    let mut builder = Response::builder().status(StatusCode::OK);
    if let Some(content_type) = content_type {
        builder = builder.header(axum::http::header::CONTENT_TYPE, content_type);
    }
    builder.body(axum::body::Body::from(body)).map_err(|e| {
        ProxyError::UpstreamUnavailable(format!("assembling relay response failed: {e}"))
    })
}
