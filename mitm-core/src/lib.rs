//! MITM Policy Core Library
//!
//! Rule storage and per-flow evaluation for an intercepting HTTP/HTTPS proxy:
//! block lists, response overrides, status rewrites and response delays,
//! plus the relay wiring, root CA handling and the admin API around them.

pub mod admin;
pub mod ca;
pub mod evaluator;
pub mod events;
pub mod handlers;
/// Core proxy functionality modules
pub mod proxy;
pub mod rules;
pub mod store;
pub mod timestr;

/// Configuration types and utilities
pub mod config;

/// Error types for proxy operations
pub mod error;

pub use admin::{admin_router, AdminState, Metrics, MetricsSnapshot};
pub use ca::CertificateAuthority;
pub use config::{CertificateConfig, ProxyStartupConfig};
pub use error::{MitmError, RuleKind};
pub use evaluator::{FlowEvaluator, FlowRequest, RequestVerdict, ResponseReport};
pub use events::{EventSender, InterceptEvent};
pub use handlers::InterceptHandler;
/// Re-export commonly used types
pub use proxy::{ProxyServer, RunningProxy};
pub use rules::{DelayEntry, DelaySpec, HeaderList, OverrideEntry, RuleSet, StatusEntry};
pub use store::{InMemoryRuleStore, RuleStore};

/// Result type alias for proxy operations
pub type Result<T> = std::result::Result<T, MitmError>;
