use anyhow::{Context, Result};
use serde::Deserialize;
use std::{fs, path::PathBuf};
use tracing::debug;

pub const CONFIG_PATH_ENV: &str = "LAUNCHPAD_CONFIG";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "compact" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("unknown log format {other:?} (expected text or json)"),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileConfig {
    builder_name: Option<String>,
    registry_prefix: Option<String>,
    base_domain: Option<String>,
    tls_issuer: Option<String>,
    metrics_addr: Option<String>,
    log_level: Option<String>,
    log_format: Option<LogFormat>,
}

/// Read-only inputs handed to the builders plus process-level knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    /// kpack ClusterBuilder used for source builds.
    pub builder_name: String,
    /// Registry prefix for built image tags, e.g. `registry.example.com/apps`.
    pub registry_prefix: String,
    /// Default hostnames are `<app>.<base_domain>`.
    pub base_domain: String,
    /// cert-manager ClusterIssuer. `None` disables TLS for every Application.
    pub tls_issuer: Option<String>,
    pub metrics_addr: String,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            builder_name: "default".into(),
            registry_prefix: "registry.local".into(),
            base_domain: "localhost".into(),
            tls_issuer: None,
            metrics_addr: "0.0.0.0:8080".into(),
            log_level: "info".into(),
            log_format: LogFormat::Text,
        }
    }
}

impl OperatorConfig {
    /// Defaults, then the TOML file named by `LAUNCHPAD_CONFIG`, then `LAUNCHPAD_*` env vars.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok().filter(|p| !p.is_empty()).map(PathBuf::from);
        let content = match &path {
            Some(p) => {
                debug!(path=?p, "config.load.attempt");
                Some(fs::read_to_string(p).with_context(|| format!("read config {p:?}"))?)
            }
            None => None,
        };
        Self::from_sources(content.as_deref(), |k| std::env::var(k).ok())
    }

    pub fn from_sources(file: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file_cfg: FileConfig = match file {
            Some(content) => toml::from_str(content).context("failed to parse config")?,
            None => FileConfig::default(),
        };
        let mut cfg = Self::default();
        if let Some(v) = file_cfg.builder_name { cfg.builder_name = v; }
        if let Some(v) = file_cfg.registry_prefix { cfg.registry_prefix = v; }
        if let Some(v) = file_cfg.base_domain { cfg.base_domain = v; }
        if let Some(v) = file_cfg.tls_issuer { cfg.tls_issuer = Some(v); }
        if let Some(v) = file_cfg.metrics_addr { cfg.metrics_addr = v; }
        if let Some(v) = file_cfg.log_level { cfg.log_level = v; }
        if let Some(v) = file_cfg.log_format { cfg.log_format = v; }

        let var = |k: &str| env(k).filter(|v| !v.is_empty());
        if let Some(v) = var("LAUNCHPAD_BUILDER") { cfg.builder_name = v; }
        if let Some(v) = var("LAUNCHPAD_REGISTRY") { cfg.registry_prefix = v; }
        if let Some(v) = var("LAUNCHPAD_BASE_DOMAIN") { cfg.base_domain = v; }
        // An explicitly empty issuer switches TLS off even if the file set one.
        if let Some(v) = env("LAUNCHPAD_TLS_ISSUER") { cfg.tls_issuer = Some(v); }
        if let Some(v) = var("LAUNCHPAD_METRICS_ADDR") { cfg.metrics_addr = v; }
        if let Some(v) = var("LAUNCHPAD_LOG_LEVEL") { cfg.log_level = v; }
        if let Some(v) = var("LAUNCHPAD_LOG_FORMAT") { cfg.log_format = v.parse()?; }

        cfg.tls_issuer = cfg.tls_issuer.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        cfg.registry_prefix = cfg.registry_prefix.trim_end_matches('/').to_string();
        debug!(builder=%cfg.builder_name, registry=%cfg.registry_prefix, base_domain=%cfg.base_domain, tls_issuer=?cfg.tls_issuer, "config.resolved");
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_without_sources() {
        let cfg = OperatorConfig::from_sources(None, env_of(&[])).unwrap();
        assert_eq!(cfg, OperatorConfig::default());
        assert!(cfg.tls_issuer.is_none());
    }

    #[test]
    fn file_then_env_precedence() {
        let file = r#"
builder_name = "paketo"
registry_prefix = "registry.example.com/apps/"
base_domain = "apps.example.com"
tls_issuer = "letsencrypt"
log_format = "json"
"#;
        let cfg = OperatorConfig::from_sources(Some(file), env_of(&[("LAUNCHPAD_BASE_DOMAIN", "override.dev")])).unwrap();
        assert_eq!(cfg.builder_name, "paketo");
        assert_eq!(cfg.registry_prefix, "registry.example.com/apps");
        assert_eq!(cfg.base_domain, "override.dev");
        assert_eq!(cfg.tls_issuer.as_deref(), Some("letsencrypt"));
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn empty_issuer_env_disables_tls() {
        let cfg = OperatorConfig::from_sources(Some("tls_issuer = \"letsencrypt\""), env_of(&[("LAUNCHPAD_TLS_ISSUER", "")])).unwrap();
        assert!(cfg.tls_issuer.is_none());
    }

    #[test]
    fn parse_error_is_reported() {
        let err = OperatorConfig::from_sources(Some("base_domain = [unclosed"), env_of(&[])).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse config"));
    }

    #[test]
    fn bad_log_format_rejected() {
        assert!(OperatorConfig::from_sources(None, env_of(&[("LAUNCHPAD_LOG_FORMAT", "xml")])).is_err());
    }
}
