use crate::{
    admin::{bind_admin, serve_admin, AdminState, Metrics},
    ca::CertificateAuthority,
    config::ProxyStartupConfig,
    error::MitmError,
    evaluator::FlowEvaluator,
    events::EventSender,
    handlers::InterceptHandler,
    store::{InMemoryRuleStore, RuleStore},
    Result,
};
use hudsucker::{certificate_authority::RcgenAuthority, rustls, ProxyBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub struct ProxyServer {
    config: ProxyStartupConfig,
    ca: CertificateAuthority,
    store: Arc<dyn RuleStore>,
    metrics: Arc<Metrics>,
    event_sender: Option<EventSender>,
}

impl ProxyServer {
    pub fn new(config: ProxyStartupConfig, ca: CertificateAuthority) -> Self {
        Self {
            config,
            ca,
            store: Arc::new(InMemoryRuleStore::new()),
            metrics: Arc::new(Metrics::default()),
            event_sender: None,
        }
    }

    /// Share a rule store with the caller, e.g. to pre-seed or inspect it.
    pub fn with_rule_store(mut self, store: Arc<dyn RuleStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_event_sender(mut self, sender: EventSender) -> Self {
        self.event_sender = Some(sender);
        self
    }

    /// Bind the relay and the admin API and serve until [`RunningProxy::stop`].
    pub async fn start(self) -> Result<RunningProxy> {
        let proxy_listener = bind_proxy(self.config.proxy_addr()?)?;
        let proxy_addr = proxy_listener.local_addr()?;
        let admin_listener = bind_admin(self.config.admin_addr()?).await?;
        let admin_addr = admin_listener.local_addr()?;

        // Hudsucker/Rustls expects DER, not PEM.
        let ca_cert_der = self.ca.ca_cert_der()?;
        let ca_key_der = self.ca.ca_key_der();
        let ca_cert_pem = self.ca.ca_cert_pem()?;

        let private_key = rustls::PrivateKey(ca_key_der);
        let ca_cert = rustls::Certificate(ca_cert_der);

        let authority = RcgenAuthority::new(
            private_key,
            ca_cert,
            self.config.certificate_config.cache_size,
        )
        .map_err(|e| MitmError::Configuration(format!("Failed to create CA authority: {}", e)))?;

        let mut evaluator = FlowEvaluator::new(self.store.clone(), self.metrics.clone());
        if let Some(sender) = self.event_sender {
            evaluator = evaluator.with_event_sender(sender);
        }
        let handler = InterceptHandler::new(Arc::new(evaluator));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let admin_state = AdminState {
            store: self.store.clone(),
            metrics: self.metrics.clone(),
            ca_cert_pem: Some(Arc::from(ca_cert_pem)),
        };
        let admin_task = tokio::spawn(serve_admin(
            admin_listener,
            admin_state,
            wait_for_shutdown(shutdown_rx.clone()),
        ));

        info!("Starting proxy server on {}", proxy_addr);
        let proxy = ProxyBuilder::new()
            .with_listener(proxy_listener)
            .with_rustls_client()
            .with_ca(authority)
            .with_http_handler(handler)
            .build();

        let proxy_task = tokio::spawn(async move {
            proxy
                .start(wait_for_shutdown(shutdown_rx))
                .await
                .map_err(|e| MitmError::Network(format!("Proxy failed: {}", e)))
        });

        Ok(RunningProxy {
            proxy_addr,
            admin_addr,
            shutdown_tx,
            proxy_task,
            admin_task,
        })
    }
}

fn bind_proxy(addr: SocketAddr) -> Result<std::net::TcpListener> {
    let listener = std::net::TcpListener::bind(addr)
        .map_err(|e| MitmError::Network(format!("Failed to bind proxy address {}: {}", addr, e)))?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopped| *stopped).await;
}

/// Handle to a started proxy; dropping it without `stop` leaves the tasks running.
///
/// The addresses are the bound ones, so a configured port 0 shows up here as
/// the port the OS picked.
pub struct RunningProxy {
    pub proxy_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    proxy_task: JoinHandle<Result<()>>,
    admin_task: JoinHandle<Result<()>>,
}

impl RunningProxy {
    /// Signal both servers to shut down and wait for them to finish.
    pub async fn stop(self) -> Result<()> {
        info!("Stopping proxy server");
        let _ = self.shutdown_tx.send(true);

        match self.admin_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Admin server failed: {}", e),
            Err(e) => error!("Admin server task panicked: {}", e),
        }

        self.proxy_task
            .await
            .map_err(|e| MitmError::Network(format!("Proxy task failed: {}", e)))?
    }
}
