//! Host configuration: one TOML file describing every tenant.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use quarry_core::models::tenant::{ConnectionConfig, LogSettings, TenantConfig};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    pub tenants: Vec<TenantSettings>,
}

#[derive(Debug, Deserialize)]
pub struct TenantSettings {
    pub name: String,
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub log: Option<LogSettings>,
    /// Also forward this process's `tracing` events into the tenant's log.
    #[serde(default)]
    pub forward_tracing: bool,
}

fn default_log_filter() -> String {
    "info".into()
}

impl TenantSettings {
    pub fn tenant_config(&self) -> Result<TenantConfig> {
        let mut config = TenantConfig::new(&self.name, self.connection.clone());
        if let Some(log) = &self.log {
            let sink = log
                .clone()
                .into_sink_config()
                .with_context(|| format!("Invalid log settings for tenant '{}'", self.name))?;
            config = config.with_log(sink);
        }
        Ok(config)
    }
}

pub fn load_config(path: &Path) -> Result<ServerConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<ServerConfig> {
    let config: ServerConfig = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.tenants.is_empty() {
        anyhow::bail!("at least one [[tenants]] entry is required");
    }

    let mut names = HashSet::new();
    for tenant in &config.tenants {
        if !names.insert(tenant.name.as_str()) {
            anyhow::bail!("duplicate tenant name '{}'", tenant.name);
        }
        tenant
            .connection
            .validate()
            .with_context(|| format!("Invalid connection for tenant '{}'", tenant.name))?;
        tenant.tenant_config()?;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use quarry_core::error::QuarryError;
    use quarry_core::models::tenant::Retention;

    use super::*;

    const SAMPLE: &str = r#"
[[tenants]]
name = "acme"
forward_tracing = true

[tenants.connection]
uri = "mem://"
namespace = "acme"
database = "main"

[tenants.log]
log_collection = "acme_log"
log_capped = true
log_max_size = 5
log_max_docs = 1000

[[tenants]]
name = "globex"

[tenants.connection]
uri = "mem://"
namespace = "globex"
database = "main"
connect_timeout_secs = 3

[tenants.log]
log_collection = "globex_log"
log_expiration_days = 30
log_console = false
"#;

    #[test]
    fn parses_tenants_and_log_settings() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.tenants.len(), 2);

        let acme = config.tenants[0].tenant_config().unwrap();
        assert!(config.tenants[0].forward_tracing);
        let log = acme.log.unwrap();
        assert!(log.console_mirror);
        assert!(matches!(
            log.retention().unwrap(),
            Retention::Capped(c) if c.max_size_bytes == 5 * 1024 * 1024 && c.max_docs == Some(1000)
        ));

        let globex = config.tenants[1].tenant_config().unwrap();
        assert_eq!(globex.connection.connect_timeout_secs, 3);
        assert_eq!(globex.connection.health_check_interval_secs, 30);
        let log = globex.log.unwrap();
        assert!(!log.console_mirror);
        assert_eq!(log.retention().unwrap(), Retention::Expiring { days: 30 });
    }

    #[test]
    fn conflicting_retention_is_rejected() {
        let content = SAMPLE.replace("log_max_docs = 1000", "log_max_docs = 1000\nlog_expiration_days = 7");
        let err = parse_config(&content).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<QuarryError>(),
            Some(QuarryError::ConflictingRetention)
        ));
    }

    #[test]
    fn duplicate_tenant_names_are_rejected() {
        let content = SAMPLE.replace("name = \"globex\"", "name = \"acme\"");
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn empty_tenant_list_is_rejected() {
        assert!(parse_config("tenants = []").is_err());
    }
}
