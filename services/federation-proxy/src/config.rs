//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Cluster credentials never appear in the config: callers supply them per
//! request. The upstream URL templates carry a `{cluster}` placeholder that
//! is substituted with the cluster identifier from each request.

use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Remote cluster endpoint settings
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Authorization endpoint template, rendered per request by substituting
    /// the caller-supplied cluster name for `{cluster}`.
    #[serde(default = "default_auth_url_template")]
    pub auth_url_template: String,
    /// Prometheus federation endpoint template.
    #[serde(default = "default_metrics_url_template")]
    pub metrics_url_template: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            auth_url_template: default_auth_url_template(),
            metrics_url_template: default_metrics_url_template(),
            timeout_secs: default_timeout(),
        }
    }
}

impl UpstreamConfig {
    /// Render the authorization endpoint URL for a cluster.
    pub fn auth_url_for(&self, cluster: &str) -> String {
        self.auth_url_template.replace("{cluster}", cluster)
    }

    /// Render the federation endpoint URL for a cluster.
    pub fn metrics_url_for(&self, cluster: &str) -> String {
        self.metrics_url_template.replace("{cluster}", cluster)
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

fn default_max_connections() -> usize {
    1024
}

fn default_auth_url_template() -> String {
    "https://oauth-openshift.apps.{cluster}/oauth/authorize?client_id=openshift-challenging-client&response_type=token".to_owned()
}

fn default_metrics_url_template() -> String {
    "https://prometheus-k8s-openshift-monitoring.apps.{cluster}/federate".to_owned()
}

fn default_timeout() -> u64 {
    60
}

impl Config {
    /// Load configuration from a TOML file and validate it. An absent file is
    /// an error; an empty file yields the defaults.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;

        for (name, template) in [
            ("auth_url_template", &config.upstream.auth_url_template),
            ("metrics_url_template", &config.upstream.metrics_url_template),
        ] {
            if !template.starts_with("http://") && !template.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{name} must start with http:// or https://, got: {template}"
                )));
            }
            if !template.contains("{cluster}") {
                return Err(common::Error::Config(format!(
                    "{name} must contain a {{cluster}} placeholder, got: {template}"
                )));
            }
        }

        if config.upstream.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("federation-proxy.toml")
    }
}
