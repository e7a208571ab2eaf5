//! Self-signed certificate issuance.
//!
//! Builds rcgen certificate parameters from configured subject fields,
//! a bounded validity window, and a random serial, with a single DNS
//! name per certificate. Key usage is restricted to digital signature
//! and key encipherment; extended usage to server authentication.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
    KeyUsagePurpose, SerialNumber,
};
use tracing::info;

use crate::error::{CertError, CertResult};

/// A generated certificate and private key pair, PEM-encoded.
#[derive(Debug, Clone)]
pub struct CertKeyPair {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Which certificate backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertProvider {
    SelfSigned,
}

impl CertProvider {
    /// Parse the configured provider name. Only `selfsigned` is
    /// supported; anything else is a configuration error.
    pub fn parse(s: &str) -> CertResult<Self> {
        match s {
            "selfsigned" => Ok(CertProvider::SelfSigned),
            other => Err(CertError::UnsupportedProvider(other.to_string())),
        }
    }
}

/// Subject fields and validity window for issued certificates.
#[derive(Debug, Clone)]
pub struct CertSettings {
    pub validity_days: u32,
    pub organization: String,
    pub organizational_unit: String,
    pub locality: String,
    pub province: String,
    pub country: String,
}

impl Default for CertSettings {
    fn default() -> Self {
        Self {
            validity_days: 365,
            organization: "Berth".to_string(),
            organizational_unit: "Deployments".to_string(),
            locality: "Local".to_string(),
            province: "Local".to_string(),
            country: "US".to_string(),
        }
    }
}

/// Issues self-signed key/certificate pairs for proxied hostnames.
#[derive(Debug, Clone)]
pub struct SelfSignedIssuer {
    settings: CertSettings,
}

impl SelfSignedIssuer {
    pub fn new(settings: CertSettings) -> Self {
        Self { settings }
    }

    /// Build certificate parameters for a host.
    ///
    /// Split out from signing so the subject, SAN list, and validity
    /// window can be inspected without parsing DER.
    pub fn certificate_params(&self, host: &str) -> CertResult<CertificateParams> {
        if host.is_empty()
            || !host
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        {
            return Err(CertError::InvalidHost(host.to_string()));
        }

        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, self.settings.organization.as_str());
        dn.push(
            DnType::OrganizationalUnitName,
            self.settings.organizational_unit.as_str(),
        );
        dn.push(DnType::LocalityName, self.settings.locality.as_str());
        dn.push(DnType::StateOrProvinceName, self.settings.province.as_str());
        dn.push(DnType::CountryName, self.settings.country.as_str());
        dn.push(DnType::CommonName, host);
        params.distinguished_name = dn;

        // The certificate covers exactly the proxied hostname.
        params.subject_alt_names = vec![rcgen::SanType::DnsName(
            host.to_string()
                .try_into()
                .map_err(|_| CertError::InvalidHost(host.to_string()))?,
        )];

        let not_before = time::OffsetDateTime::now_utc();
        params.not_before = not_before;
        params.not_after = not_before + time::Duration::days(i64::from(self.settings.validity_days));

        params.serial_number = Some(random_serial()?);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        Ok(params)
    }

    /// Generate a self-signed key/certificate pair for a host.
    pub fn create_self_signed(&self, host: &str) -> CertResult<CertKeyPair> {
        let params = self.certificate_params(host)?;
        let key_pair = KeyPair::generate().map_err(|e| CertError::Generate(e.to_string()))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| CertError::Generate(e.to_string()))?;

        info!(%host, validity_days = self.settings.validity_days, "issued self-signed certificate");

        Ok(CertKeyPair {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }
}

/// Write a PEM certificate to a file, overwriting any existing file.
pub fn write_certificate(cert_pem: &str, path: &Path) -> CertResult<()> {
    std::fs::write(path, cert_pem).map_err(|e| CertError::Write {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Write a PEM private key to a file, overwriting any existing file.
///
/// File permissions restrict access to the owner.
pub fn write_private_key(key_pem: &str, path: &Path) -> CertResult<()> {
    let map_err = |e: std::io::Error| CertError::Write {
        path: path.display().to_string(),
        message: e.to_string(),
    };

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(map_err)?;
    file.write_all(key_pem.as_bytes()).map_err(map_err)?;

    // The mode above only applies on creation; enforce it when
    // overwriting a pre-existing key file too.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(map_err)?;
    }

    Ok(())
}

/// 128-bit random certificate serial.
fn random_serial() -> CertResult<SerialNumber> {
    let mut bytes = [0u8; 16];
    getrandom::getrandom(&mut bytes).map_err(|e| CertError::Generate(e.to_string()))?;
    // Clear the top bit so the serial is a positive DER integer.
    bytes[0] &= 0x7f;
    Ok(SerialNumber::from(bytes.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{DnValue, SanType};

    fn issuer() -> SelfSignedIssuer {
        SelfSignedIssuer::new(CertSettings {
            validity_days: 90,
            organization: "Acme".to_string(),
            organizational_unit: "Ops".to_string(),
            locality: "Springfield".to_string(),
            province: "Oregon".to_string(),
            country: "US".to_string(),
        })
    }

    #[test]
    fn params_carry_exactly_one_dns_name() {
        let params = issuer().certificate_params("shop.apps.example.com").unwrap();
        assert_eq!(
            params.subject_alt_names,
            vec![SanType::DnsName(
                "shop.apps.example.com".to_string().try_into().unwrap()
            )]
        );
    }

    #[test]
    fn params_validity_matches_configured_days() {
        let params = issuer().certificate_params("a.example.com").unwrap();
        assert_eq!(params.not_after - params.not_before, time::Duration::days(90));
    }

    #[test]
    fn params_subject_from_settings() {
        let params = issuer().certificate_params("a.example.com").unwrap();
        let dn = &params.distinguished_name;
        assert_eq!(
            dn.get(&DnType::OrganizationName),
            Some(&DnValue::Utf8String("Acme".to_string()))
        );
        assert_eq!(
            dn.get(&DnType::CountryName),
            Some(&DnValue::Utf8String("US".to_string()))
        );
        assert_eq!(
            dn.get(&DnType::CommonName),
            Some(&DnValue::Utf8String("a.example.com".to_string()))
        );
    }

    #[test]
    fn params_restrict_key_usage() {
        let params = issuer().certificate_params("a.example.com").unwrap();
        assert_eq!(
            params.key_usages,
            vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyEncipherment
            ]
        );
        assert_eq!(
            params.extended_key_usages,
            vec![ExtendedKeyUsagePurpose::ServerAuth]
        );
        assert!(params.serial_number.is_some());
    }

    #[test]
    fn create_self_signed_produces_pem_pair() {
        let pair = issuer().create_self_signed("a.example.com").unwrap();
        assert!(pair.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(pair.key_pem.contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn invalid_host_is_rejected() {
        let err = issuer().certificate_params("bad host name").unwrap_err();
        assert!(matches!(err, CertError::InvalidHost(_)));
    }

    #[test]
    fn provider_parsing() {
        assert_eq!(CertProvider::parse("selfsigned").unwrap(), CertProvider::SelfSigned);
        assert!(matches!(
            CertProvider::parse("letsencrypt"),
            Err(CertError::UnsupportedProvider(_))
        ));
    }

    #[test]
    fn write_key_restricts_permissions_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("a.example.com.key");

        write_private_key("FIRST", &key_path).unwrap();
        write_private_key("SECOND", &key_path).unwrap();
        assert_eq!(std::fs::read_to_string(&key_path).unwrap(), "SECOND");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&key_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn write_certificate_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("a.example.com.cer");

        write_certificate("FIRST", &cert_path).unwrap();
        write_certificate("SECOND", &cert_path).unwrap();
        assert_eq!(std::fs::read_to_string(&cert_path).unwrap(), "SECOND");
    }
}
