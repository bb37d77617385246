//! Audit records emitted for every rule that fires on a flow

use serde::Serialize;
use uuid::Uuid;

/// One decision taken by the evaluator.
///
/// Events are delivered best-effort over an optional channel; a slow or absent
/// consumer never affects the exchange itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InterceptEvent {
    /// Request terminated before reaching upstream
    Blocked {
        flow_id: Uuid,
        url: String,
        fragment: String,
    },
    ResponseOverridden {
        flow_id: Uuid,
        url: String,
        alias: String,
        status_code: u16,
    },
    StatusOverridden {
        flow_id: Uuid,
        url: String,
        alias: String,
        status_code: u16,
    },
    ResponseDelayed {
        flow_id: Uuid,
        url: String,
        alias: String,
        delay_ms: u64,
    },
    MutationFailed {
        flow_id: Uuid,
        url: String,
        alias: String,
        reason: String,
    },
}

impl InterceptEvent {
    pub fn flow_id(&self) -> Uuid {
        match self {
            InterceptEvent::Blocked { flow_id, .. }
            | InterceptEvent::ResponseOverridden { flow_id, .. }
            | InterceptEvent::StatusOverridden { flow_id, .. }
            | InterceptEvent::ResponseDelayed { flow_id, .. }
            | InterceptEvent::MutationFailed { flow_id, .. } => *flow_id,
        }
    }
}

pub type EventSender = tokio::sync::mpsc::Sender<InterceptEvent>;
