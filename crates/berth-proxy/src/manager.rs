//! NginxManager — writes site files and reloads nginx.

use std::path::{Path, PathBuf};
use std::time::Duration;

use berth_state::{ProxyConfig, StateStore};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{ProxyError, ProxyResult};
use crate::render::render_site;

/// Prefix for generated site files so they can be told apart from
/// hand-written nginx configuration in the same directory.
const SITE_FILE_PREFIX: &str = "MDS-";

/// Manages nginx site files and the proxy rows that describe them.
///
/// Creation order is deliberate: the site file is written and the row
/// persisted before the reload runs, so a failed reload leaves state
/// that the next successful reload picks up.
#[derive(Clone)]
pub struct NginxManager {
    store: StateStore,
    sites_dir: PathBuf,
    cert_dir: PathBuf,
    reload_command: Vec<String>,
    reload_timeout: Duration,
}

impl NginxManager {
    pub fn new(
        store: StateStore,
        sites_dir: impl Into<PathBuf>,
        cert_dir: impl Into<PathBuf>,
        reload_command: Vec<String>,
        reload_timeout: Duration,
    ) -> Self {
        Self {
            store,
            sites_dir: sites_dir.into(),
            cert_dir: cert_dir.into(),
            reload_command,
            reload_timeout,
        }
    }

    /// Path of the generated site file for a domain.
    pub fn site_file_path(&self, domain: &str) -> PathBuf {
        self.sites_dir.join(format!("{SITE_FILE_PREFIX}{domain}.conf"))
    }

    /// Fill in HTTPS settings for a configuration: certificate and key
    /// paths under the certificate directory, derived from the domain.
    pub fn https_settings(&self, mut config: ProxyConfig) -> ProxyConfig {
        config.certificate_path = self
            .cert_dir
            .join(format!("{}.cer", config.domain_name))
            .display()
            .to_string();
        config.private_key_path = self
            .cert_dir
            .join(format!("{}.key", config.domain_name))
            .display()
            .to_string();
        config.is_https = true;
        config
    }

    /// Render and publish a proxy route.
    ///
    /// Validates the configuration, writes the site file (replacing
    /// any previous file for the domain), persists the row with its
    /// `config_file_path` filled in, then reloads nginx. Returns the
    /// domain name.
    pub async fn create_proxy(&self, config: &mut ProxyConfig) -> ProxyResult<String> {
        let rendered = render_site(config)?;

        let path = self.site_file_path(&config.domain_name);
        if path.exists() {
            remove_file_logged(&path, "previous site file");
        }
        std::fs::write(&path, rendered).map_err(|e| ProxyError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.config_file_path = path.display().to_string();

        self.store.put_proxy(config)?;
        self.apply_changes().await?;

        info!(domain = %config.domain_name, file = %path.display(), "proxy published");
        Ok(config.domain_name.clone())
    }

    /// Remove a proxy route: its site file, any certificate material,
    /// and the stored row. Errors with [`ProxyError::NotFound`] if no
    /// row exists for the domain, without touching the filesystem.
    pub async fn delete_proxy(&self, domain: &str) -> ProxyResult<()> {
        let config = self
            .store
            .get_proxy(domain)?
            .ok_or_else(|| ProxyError::NotFound(domain.to_string()))?;

        if !config.config_file_path.is_empty() {
            remove_file_logged(Path::new(&config.config_file_path), "site file");
        }
        if config.is_https {
            if !config.certificate_path.is_empty() {
                remove_file_logged(Path::new(&config.certificate_path), "certificate");
            }
            if !config.private_key_path.is_empty() {
                remove_file_logged(Path::new(&config.private_key_path), "private key");
            }
        }

        self.store.delete_proxy(domain)?;
        self.apply_changes().await?;

        info!(domain, "proxy removed");
        Ok(())
    }

    /// Run the configured reload command and wait for it to succeed.
    ///
    /// An empty command is a no-op; useful when nginx is managed out
    /// of band. A non-zero exit or a timeout is a [`ProxyError::Reload`].
    pub async fn apply_changes(&self) -> ProxyResult<()> {
        let Some((program, args)) = self.reload_command.split_first() else {
            debug!("no reload command configured, skipping");
            return Ok(());
        };

        let output = tokio::time::timeout(
            self.reload_timeout,
            Command::new(program).args(args).output(),
        )
        .await
        .map_err(|_| {
            ProxyError::Reload(format!(
                "reload command timed out after {:?}",
                self.reload_timeout
            ))
        })?
        .map_err(|e| ProxyError::Reload(format!("failed to run {program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProxyError::Reload(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        debug!(command = %program, "proxy configuration reloaded");
        Ok(())
    }
}

fn remove_file_logged(path: &Path, what: &str) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove {what}");
        }
    }
}

// ─────────────────────────── Tests ───────────────────────────
