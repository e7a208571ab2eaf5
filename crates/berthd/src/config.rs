//! Daemon configuration: TOML file with defaults and validation.

use std::path::Path;

use berth_certs::CertProvider;
use berth_orchestrator::SidecarDeletePolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything the daemon needs to run, loadable from a TOML file.
/// Missing keys take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BerthConfig {
    /// Where uploaded application bundles live.
    pub application_directory: String,
    /// Daemon state (the redb database) lives here.
    pub data_directory: String,

    /// nginx sites directory the generated files are written into.
    pub nginx_sites_destination: String,
    /// Argv invoked to make nginx pick up changes. Empty disables the
    /// reload, for setups where nginx is reloaded out of band.
    pub nginx_reload_command: Vec<String>,

    /// Certificate and key files are written here.
    pub cert_destination: String,
    pub cert_provider: String,
    pub cert_validity_days: u32,
    pub cert_organization: String,
    pub cert_organizational_unit: String,
    pub cert_locality: String,
    pub cert_province: String,
    pub cert_country: String,

    /// Run a MongoDB sidecar per deployment instead of pointing
    /// applications at an external database.
    pub auto_manage_mongodb: bool,
    /// External database URL; required when sidecars are not managed.
    pub mongodb_url: String,
    pub mongodb_oplog_url: String,

    /// Suffix appended to generated domain names, e.g. `.apps.example.com`.
    pub url_base: String,
    pub port_range_min: u16,
    /// Exclusive.
    pub port_range_max: u16,

    pub app_image: String,
    pub mongo_image: String,
    pub docker_socket: String,

    pub reconcile_interval_secs: u64,
    /// `retain` or `remove`.
    pub sidecar_delete_policy: String,
    /// Bound on individual engine and reload operations.
    pub operation_timeout_secs: u64,
}

impl Default for BerthConfig {
    fn default() -> Self {
        Self {
            application_directory: "/var/lib/berth/bundles".to_string(),
            data_directory: "/var/lib/berth".to_string(),
            nginx_sites_destination: "/etc/nginx/sites-enabled".to_string(),
            nginx_reload_command: vec![
                "systemctl".to_string(),
                "reload".to_string(),
                "nginx".to_string(),
            ],
            cert_destination: "/var/lib/berth/certs".to_string(),
            cert_provider: "selfsigned".to_string(),
            cert_validity_days: 90,
            cert_organization: "Berth".to_string(),
            cert_organizational_unit: "Deployments".to_string(),
            cert_locality: "Anywhere".to_string(),
            cert_province: "None".to_string(),
            cert_country: "US".to_string(),
            auto_manage_mongodb: true,
            mongodb_url: String::new(),
            mongodb_oplog_url: String::new(),
            url_base: ".berth.local".to_string(),
            port_range_min: 30000,
            port_range_max: 40000,
            app_image: "kadirahq/meteord:base".to_string(),
            mongo_image: "mongo:3.4".to_string(),
            docker_socket: "/var/run/docker.sock".to_string(),
            reconcile_interval_secs: 5,
            sidecar_delete_policy: "retain".to_string(),
            operation_timeout_secs: 60,
        }
    }
}

impl BerthConfig {
    /// Load from a TOML file and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config: BerthConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port_range_min >= self.port_range_max {
            return Err(ConfigError::Invalid(format!(
                "port_range_min ({}) must be below port_range_max ({})",
                self.port_range_min, self.port_range_max
            )));
        }
        if self.url_base.is_empty() {
            return Err(ConfigError::Invalid("url_base must not be empty".to_string()));
        }
        if self.cert_validity_days == 0 {
            return Err(ConfigError::Invalid(
                "cert_validity_days must be at least 1".to_string(),
            ));
        }
        CertProvider::parse(&self.cert_provider)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.sidecar_policy().is_none() {
            return Err(ConfigError::Invalid(format!(
                "sidecar_delete_policy must be 'retain' or 'remove', got {:?}",
                self.sidecar_delete_policy
            )));
        }
        if !self.auto_manage_mongodb && self.mongodb_url.is_empty() {
            return Err(ConfigError::Invalid(
                "mongodb_url is required when auto_manage_mongodb is false".to_string(),
            ));
        }
        if self.app_image.is_empty() {
            return Err(ConfigError::Invalid("app_image must not be empty".to_string()));
        }
        if self.reconcile_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "reconcile_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sidecar_policy(&self) -> Option<SidecarDeletePolicy> {
        SidecarDeletePolicy::parse(&self.sidecar_delete_policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        BerthConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("berth.toml");
        std::fs::write(
            &path,
            "url_base = \".apps.example.com\"\nport_range_min = 31000\n",
        )
        .unwrap();

        let config = BerthConfig::load(&path).unwrap();
        assert_eq!(config.url_base, ".apps.example.com");
        assert_eq!(config.port_range_min, 31000);
        assert_eq!(config.port_range_max, 40000);
        assert_eq!(config.app_image, "kadirahq/meteord:base");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = toml::from_str::<BerthConfig>("nginx_reload = \"true\"").unwrap_err();
        assert!(err.to_string().contains("nginx_reload"));
    }

    #[test]
    fn inverted_port_range_is_invalid() {
        let config = BerthConfig {
            port_range_min: 40000,
            port_range_max: 30000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unsupported_cert_provider_is_invalid() {
        let config = BerthConfig {
            cert_provider: "letsencrypt".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn external_mongo_requires_url() {
        let config = BerthConfig {
            auto_manage_mongodb: false,
            mongodb_url: String::new(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn bad_sidecar_policy_is_invalid() {
        let config = BerthConfig {
            sidecar_delete_policy: "archive".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = BerthConfig::load(Path::new("/nonexistent/berth.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
