use crate::config::CertificateConfig;
use crate::error::MitmError;
use crate::Result;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    PKCS_ECDSA_P256_SHA256,
};
use std::fs;
use std::path::Path;
use time::{Duration, OffsetDateTime};
use tracing::info;

const CA_CERT_FILE: &str = "ca.pem";
const CA_KEY_FILE: &str = "ca.key";

/// Root certificate authority the relay signs per-host certificates with.
///
/// The CA lives in a certificates directory as `ca.pem` / `ca.key` (plus a
/// `ca.crt` copy for browsers that want that extension). A missing CA is
/// generated on first use and reused afterwards, so clients only have to
/// trust it once.
pub struct CertificateAuthority {
    ca_cert: Certificate,
}

impl CertificateAuthority {
    /// Open the CA in `config.cert_store_path`, generating it if absent.
    pub fn open(config: &CertificateConfig) -> Result<Self> {
        let ca_dir = Path::new(&config.cert_store_path);
        let ca_cert_path = ca_dir.join(CA_CERT_FILE);
        let ca_key_path = ca_dir.join(CA_KEY_FILE);

        if ca_cert_path.exists() && ca_key_path.exists() {
            info!("Loading CA from {}", ca_dir.display());
            let cert_pem = fs::read_to_string(&ca_cert_path)?;
            let key_pem = fs::read_to_string(&ca_key_path)?;
            Self::from_pem(&cert_pem, &key_pem)
        } else {
            fs::create_dir_all(ca_dir)?;
            info!("Generating new CA in {}", ca_dir.display());
            Self::generate_and_save(ca_dir, config.validity_days)
        }
    }

    /// Shorthand for [`open`](Self::open) with default validity.
    pub fn new(ca_dir: &Path) -> Result<Self> {
        Self::open(&CertificateConfig {
            cert_store_path: ca_dir.to_string_lossy().into_owned(),
            ..Default::default()
        })
    }

    /// Rebuild a CA from its PEM certificate and private key.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let key_pair = KeyPair::from_pem(key_pem)
            .map_err(|e| MitmError::Certificate(format!("Failed to parse CA key: {}", e)))?;
        let params = CertificateParams::from_ca_cert_pem(cert_pem, key_pair)
            .map_err(|e| MitmError::Certificate(format!("Failed to parse CA cert: {}", e)))?;
        let cert = Certificate::from_params(params)
            .map_err(|e| MitmError::Certificate(format!("Failed to rebuild CA cert: {}", e)))?;

        Ok(Self { ca_cert: cert })
    }

    fn generate_and_save(ca_dir: &Path, validity_days: u32) -> Result<Self> {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "MITM Policy Proxy CA");
        dn.push(DnType::OrganizationName, "MITM Policy Proxy");
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        params.key_usages = vec![
            rcgen::KeyUsagePurpose::KeyCertSign,
            rcgen::KeyUsagePurpose::CrlSign,
        ];

        let not_before = OffsetDateTime::now_utc() - Duration::days(1);
        params.not_before = not_before;
        params.not_after = not_before + Duration::days(i64::from(validity_days));

        params.key_pair = Some(
            KeyPair::generate(&PKCS_ECDSA_P256_SHA256)
                .map_err(|e| MitmError::Certificate(format!("Failed to generate CA key: {}", e)))?,
        );

        let cert = Certificate::from_params(params)
            .map_err(|e| MitmError::Certificate(format!("Failed to generate CA cert: {}", e)))?;
        let ca = Self { ca_cert: cert };

        let cert_pem = ca.ca_cert_pem()?;
        let key_pem = ca.ca_key_pem();
        fs::write(ca_dir.join(CA_CERT_FILE), &cert_pem)?;
        fs::write(ca_dir.join(CA_KEY_FILE), &key_pem)?;
        fs::write(ca_dir.join("ca.crt"), &cert_pem)?;

        Ok(ca)
    }

    /// Root CA certificate in PEM format, for client trust stores.
    pub fn ca_cert_pem(&self) -> Result<String> {
        self.ca_cert
            .serialize_pem()
            .map_err(|e| MitmError::Certificate(format!("Failed to serialize CA cert: {}", e)))
    }

    pub fn ca_key_pem(&self) -> String {
        let mut key_pem = self.ca_cert.serialize_private_key_pem();
        if !key_pem.ends_with('\n') {
            key_pem.push('\n');
        }
        key_pem
    }

    /// Root CA certificate in DER format (for use with rustls/hudsucker).
    pub fn ca_cert_der(&self) -> Result<Vec<u8>> {
        self.ca_cert
            .serialize_der()
            .map_err(|e| MitmError::Certificate(format!("Failed to serialize CA cert DER: {}", e)))
    }

    /// Root CA private key in DER format (for use with rustls/hudsucker).
    pub fn ca_key_der(&self) -> Vec<u8> {
        self.ca_cert.serialize_private_key_der()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_ca_generation_and_loading() {
        let dir = tempdir().unwrap();
        let ca_dir = dir.path().join("certs");

        let ca = CertificateAuthority::new(&ca_dir).expect("Failed to create CA");
        assert!(ca_dir.join("ca.pem").exists());
        assert!(ca_dir.join("ca.key").exists());
        assert!(ca_dir.join("ca.crt").exists());

        let reloaded = CertificateAuthority::new(&ca_dir).expect("Failed to load CA");
        assert_eq!(ca.ca_key_der(), reloaded.ca_key_der());
        assert!(reloaded.ca_cert_pem().unwrap().contains("BEGIN CERTIFICATE"));
        assert!(!reloaded.ca_cert_der().unwrap().is_empty());
    }

    #[test]
    fn test_garbage_pem_is_a_certificate_error() {
        let err = CertificateAuthority::from_pem("not a cert", "not a key").err().unwrap();
        assert!(matches!(err, MitmError::Certificate(_)));
    }
}
