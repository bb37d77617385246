//! MITM Policy Agent
//!
//! Standalone executable that runs the intercepting relay with an in-memory
//! rule store, administered over the local admin API.

use clap::Parser;
use mitm_core::{
    CertificateAuthority, InMemoryRuleStore, MitmError, ProxyServer, ProxyStartupConfig, RuleSet,
    RuleStore, RunningProxy,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod logging;


pub use logging::{init_logging, LoggingConfig};

#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address to listen on for HTTP/HTTPS traffic
    #[arg(long)]
    pub listen_addr: Option<String>,

    /// Port to listen on for HTTP/HTTPS traffic
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Address to expose the Admin API on
    #[arg(long)]
    pub admin_addr: Option<String>,

    /// Port to expose the Admin API (health/metrics/rules)
    #[arg(long)]
    pub admin_port: Option<u16>,

    /// Directory holding the root CA (generated when missing)
    #[arg(long)]
    pub cert_dir: Option<PathBuf>,

    /// JSON file with startup configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// JSON file with rules to load at startup
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,
}

impl Args {
    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level.clone(),
            json_format: self.json_logs,
            enable_colors: !self.json_logs,
            ..Default::default()
        }
    }
}

/// Resolve the startup configuration from the process environment.
pub fn load_config(args: &Args) -> Result<ProxyStartupConfig, MitmError> {
    load_config_with_env(args, |key| std::env::var(key).ok())
}

/// Defaults, then the `--config` file, then `MITM_*` variables, then CLI flags.
pub fn load_config_with_env<F>(args: &Args, env: F) -> Result<ProxyStartupConfig, MitmError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|e| {
                MitmError::Configuration(format!("Failed to read {}: {}", path.display(), e))
            })?;
            serde_json::from_str(&text)?
        }
        None => ProxyStartupConfig::default(),
    };

    if let Some(address) = env("MITM_LISTEN_ADDRESS") {
        config.listen_address = address;
    }
    if let Some(port) = env("MITM_LISTEN_PORT") {
        config.listen_port = parse_port("MITM_LISTEN_PORT", &port)?;
    }
    if let Some(address) = env("MITM_ADMIN_ADDRESS") {
        config.admin_address = address;
    }
    if let Some(port) = env("MITM_ADMIN_PORT") {
        config.admin_port = parse_port("MITM_ADMIN_PORT", &port)?;
    }
    if let Some(dir) = env("MITM_CERT_DIR") {
        config.certificate_config.cert_store_path = dir;
    }

    if let Some(address) = &args.listen_addr {
        config.listen_address = address.clone();
    }
    if let Some(port) = args.listen_port {
        config.listen_port = port;
    }
    if let Some(address) = &args.admin_addr {
        config.admin_address = address.clone();
    }
    if let Some(port) = args.admin_port {
        config.admin_port = port;
    }
    if let Some(dir) = &args.cert_dir {
        config.certificate_config.cert_store_path = dir.to_string_lossy().into_owned();
    }

    Ok(config)
}

fn parse_port(name: &str, value: &str) -> Result<u16, MitmError> {
    value
        .trim()
        .parse()
        .map_err(|e| MitmError::Configuration(format!("Invalid {} '{}': {}", name, value, e)))
}

/// Read a JSON rule file; missing collections are empty.
pub fn load_rules(path: &Path) -> Result<RuleSet, MitmError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Start the relay and admin API as configured by `args`.
pub async fn start_agent(args: &Args) -> Result<RunningProxy, MitmError> {
    let config = load_config(args)?;

    tracing::info!("Starting MITM Policy Agent...");
    tracing::info!("  Listen: {}:{}", config.listen_address, config.listen_port);
    tracing::info!("  Admin:  {}:{}", config.admin_address, config.admin_port);
    tracing::info!("  Certs:  {}", config.certificate_config.cert_store_path);

    let store = Arc::new(InMemoryRuleStore::new());
    if let Some(path) = &args.rules {
        store.replace_all(load_rules(path)?);
        tracing::info!("Loaded rules from {}", path.display());
    }
    for line in store.snapshot().summary() {
        tracing::info!("{}", line);
    }

    let ca = CertificateAuthority::open(&config.certificate_config)?;

    ProxyServer::new(config, ca)
        .with_rule_store(store)
        .start()
        .await
}

/// Run until Ctrl-C, then shut the relay down.
pub async fn run_agent(args: Args) -> Result<(), MitmError> {
    let running = start_agent(&args).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping proxy server...");

    running.stop().await
}
