//! Site rendering — nginx server blocks from compile-time templates.

use askama::Template;
use berth_state::ProxyConfig;

use crate::error::{ProxyError, ProxyResult};

#[derive(Template)]
#[template(path = "http-site.conf", escape = "none")]
struct HttpSite<'a> {
    domain_name: &'a str,
    destination: &'a str,
}

#[derive(Template)]
#[template(path = "https-site.conf", escape = "none")]
struct HttpsSite<'a> {
    domain_name: &'a str,
    destination: &'a str,
    certificate_path: &'a str,
    private_key_path: &'a str,
}

/// Render the nginx server block for a proxy configuration.
///
/// Every substituted value is validated first; a value that could
/// close an nginx block or start a new directive is rejected.
pub fn render_site(config: &ProxyConfig) -> ProxyResult<String> {
    validate_domain(&config.domain_name)?;
    validate_destination(&config.destination)?;

    let rendered = if config.is_https {
        validate_path("certificate_path", &config.certificate_path)?;
        validate_path("private_key_path", &config.private_key_path)?;
        HttpsSite {
            domain_name: &config.domain_name,
            destination: &config.destination,
            certificate_path: &config.certificate_path,
            private_key_path: &config.private_key_path,
        }
        .render()
    } else {
        HttpSite {
            domain_name: &config.domain_name,
            destination: &config.destination,
        }
        .render()
    };

    rendered.map_err(|e| ProxyError::Render(e.to_string()))
}

/// Hostnames: ascii letters, digits, hyphens and dots only.
pub fn validate_domain(domain: &str) -> ProxyResult<()> {
    if domain.is_empty() || domain.len() > 253 {
        return Err(ProxyError::Validation(format!(
            "domain name must be 1-253 characters: {domain:?}"
        )));
    }
    if !domain
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return Err(ProxyError::Validation(format!(
            "domain name contains invalid characters: {domain:?}"
        )));
    }
    Ok(())
}

/// Upstream destinations: an http(s) URL with a safe character set.
pub fn validate_destination(destination: &str) -> ProxyResult<()> {
    let rest = destination
        .strip_prefix("http://")
        .or_else(|| destination.strip_prefix("https://"))
        .ok_or_else(|| {
            ProxyError::Validation(format!(
                "destination must start with http:// or https://: {destination:?}"
            ))
        })?;
    if rest.is_empty()
        || !rest
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | ':' | '/'))
    {
        return Err(ProxyError::Validation(format!(
            "destination contains invalid characters: {destination:?}"
        )));
    }
    Ok(())
}

/// Filesystem paths substituted into ssl_certificate directives.
pub fn validate_path(field: &str, path: &str) -> ProxyResult<()> {
    if path.is_empty()
        || !path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '/' | '_'))
    {
        return Err(ProxyError::Validation(format!(
            "{field} contains invalid characters: {path:?}"
        )));
    }
    Ok(())
}

// ─────────────────────────── Tests ───────────────────────────
