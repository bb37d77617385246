//! Configuration types and utilities

use crate::error::MitmError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Static Proxy Startup Configuration
/// These settings are set at startup and do not change during runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyStartupConfig {
    /// Address the relay listens on
    pub listen_address: String,
    /// Port the relay listens on
    pub listen_port: u16,
    /// Address of the admin API
    pub admin_address: String,
    /// Port of the admin API
    pub admin_port: u16,
    /// Certificate configuration
    pub certificate_config: CertificateConfig,
}

impl Default for ProxyStartupConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            listen_port: 8080,
            admin_address: "127.0.0.1".to_string(),
            admin_port: 9091,
            certificate_config: CertificateConfig::default(),
        }
    }
}

impl ProxyStartupConfig {
    pub fn proxy_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.listen_address, self.listen_port)
    }

    pub fn admin_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.admin_address, self.admin_port)
    }
}

fn socket_addr(address: &str, port: u16) -> Result<SocketAddr> {
    let ip = address
        .parse::<std::net::IpAddr>()
        .map_err(|e| MitmError::Configuration(format!("Invalid address '{}': {}", address, e)))?;
    Ok(SocketAddr::new(ip, port))
}

/// Certificate configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateConfig {
    /// Directory holding the root CA (created when missing)
    pub cert_store_path: String,
    /// Validity of a newly generated root CA in days
    pub validity_days: u32,
    /// Number of per-host certificates the relay keeps cached
    pub cache_size: u64,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            cert_store_path: "./certs".to_string(),
            validity_days: 3650,
            cache_size: 1000,
        }
    }
}
