//! Flow evaluation
//!
//! Applies the current rules to one exchange in two passes: the request pass
//! decides whether the request may leave the proxy at all, the response pass
//! rewrites and/or holds back the upstream response. Both passes work on an
//! `Arc<RuleSet>` snapshot, so administration calls never block evaluation and
//! evaluation never sees a half-applied administration call.

use crate::admin::Metrics;
use crate::error::MitmError;
use crate::events::{EventSender, InterceptEvent};
use crate::rules::{OverrideEntry, RuleSet};
use crate::store::RuleStore;
use crate::Result;
use hudsucker::hyper::{
    header::{self, HeaderName, HeaderValue},
    Body, HeaderMap, Request, Response, StatusCode,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

/// The request side of an exchange, as the rules see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRequest {
    pub id: Uuid,
    pub method: String,
    /// Full URL including scheme, host, port and query
    pub url: String,
    /// Host component of `url`, without port
    pub host: String,
}

impl FlowRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        let host = url::Url::parse(&url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_string))
            .unwrap_or_default();
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            url,
            host,
        }
    }

    /// Builds the flow for a request received by the relay.
    ///
    /// Origin-form requests (path only) get their authority from the `Host`
    /// header.
    pub fn from_request(req: &Request<Body>) -> Self {
        let uri = req.uri();
        if uri.scheme().is_some() && uri.authority().is_some() {
            return Self::new(req.method().as_str(), uri.to_string());
        }

        let authority = uri
            .authority()
            .map(|a| a.as_str().to_string())
            .or_else(|| {
                req.headers()
                    .get(header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            })
            .unwrap_or_default();
        let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        Self::new(req.method().as_str(), format!("http://{}{}", authority, path))
    }
}

/// Outcome of the request pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestVerdict {
    /// Forward the request upstream unchanged
    Pass,
    /// Terminate the exchange; `fragment` is the block entry that fired
    Blocked { fragment: String },
}

impl RequestVerdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, RequestVerdict::Blocked { .. })
    }
}

/// What the response pass did to one response.
#[derive(Debug, Default)]
pub struct ResponseReport {
    /// Alias of the custom response that was applied
    pub custom_response: Option<String>,
    /// Alias of the custom status code that was applied
    pub custom_status: Option<String>,
    /// Delay honoured before delivery
    pub delay: Option<Duration>,
    /// Mutations that could not be applied
    pub failures: Vec<MitmError>,
}

impl ResponseReport {
    pub fn is_untouched(&self) -> bool {
        self.custom_response.is_none()
            && self.custom_status.is_none()
            && self.delay.is_none()
            && self.failures.is_empty()
    }
}

/// Applies a rule store to individual flows.
#[derive(Debug, Clone)]
pub struct FlowEvaluator {
    store: Arc<dyn RuleStore>,
    metrics: Arc<Metrics>,
    events: Option<EventSender>,
}

impl FlowEvaluator {
    pub fn new(store: Arc<dyn RuleStore>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            metrics,
            events: None,
        }
    }

    pub fn with_event_sender(mut self, sender: EventSender) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Request pass. Stops at the first block entry that fires.
    pub fn on_request(&self, flow: &FlowRequest) -> RequestVerdict {
        let rules = self.store.snapshot();
        let Some(fragment) = rules.blocking_fragment(&flow.url, &flow.host) else {
            return RequestVerdict::Pass;
        };

        info!("Blocked request [{}] for {}", flow.id, flow.url);
        self.metrics.blocked_requests.fetch_add(1, Ordering::Relaxed);
        self.emit(InterceptEvent::Blocked {
            flow_id: flow.id,
            url: flow.url.clone(),
            fragment: fragment.to_string(),
        });
        RequestVerdict::Blocked {
            fragment: fragment.to_string(),
        }
    }

    /// Response pass: custom response, then custom status, then delay.
    ///
    /// The delay is awaited on the caller's task after the rule snapshot has
    /// been released.
    pub async fn on_response(
        &self,
        flow: &FlowRequest,
        response: &mut Response<Body>,
    ) -> ResponseReport {
        let report = {
            let rules = self.store.snapshot();
            self.evaluate_response(&rules, flow, response)
        };

        if let Some(delay) = report.delay {
            tokio::time::sleep(delay).await;
            debug!("Released delayed response [{}] after {:?}", flow.id, delay);
        }
        report
    }

    /// Applies the mutating part of the response pass against `rules` and
    /// reports the delay to honour without waiting for it.
    pub fn evaluate_response(
        &self,
        rules: &RuleSet,
        flow: &FlowRequest,
        response: &mut Response<Body>,
    ) -> ResponseReport {
        let mut report = ResponseReport::default();

        if let Some(entry) = rules.custom_response_for(&flow.url) {
            info!("Trying to update response for {} ({})", entry.url, entry.alias);
            match apply_custom_response(entry, response) {
                Ok(()) => {
                    info!("Successfully updated response for {}", entry.url);
                    self.metrics
                        .overridden_responses
                        .fetch_add(1, Ordering::Relaxed);
                    self.emit(InterceptEvent::ResponseOverridden {
                        flow_id: flow.id,
                        url: flow.url.clone(),
                        alias: entry.alias.clone(),
                        status_code: entry.status_code,
                    });
                    report.custom_response = Some(entry.alias.clone());
                }
                Err(e) => self.record_failure(flow, &entry.alias, e, &mut report),
            }
        }

        if let Some(entry) = rules.custom_status_for(&flow.url) {
            match StatusCode::from_u16(entry.status_code) {
                Ok(status) => {
                    info!(
                        "Updating status code for {} to {}",
                        entry.url, entry.status_code
                    );
                    *response.status_mut() = status;
                    self.metrics.status_overrides.fetch_add(1, Ordering::Relaxed);
                    self.emit(InterceptEvent::StatusOverridden {
                        flow_id: flow.id,
                        url: flow.url.clone(),
                        alias: entry.alias.clone(),
                        status_code: entry.status_code,
                    });
                    report.custom_status = Some(entry.alias.clone());
                }
                Err(e) => self.record_failure(
                    flow,
                    &entry.alias,
                    MitmError::mutation(&entry.alias, e),
                    &mut report,
                ),
            }
        }

        if let Some(entry) = rules.delay_for(&flow.url) {
            let delay = entry.delay.duration();
            info!(
                "Delaying response for {} by {} ({})",
                entry.url, entry.delay, entry.alias
            );
            self.metrics.delayed_responses.fetch_add(1, Ordering::Relaxed);
            self.emit(InterceptEvent::ResponseDelayed {
                flow_id: flow.id,
                url: flow.url.clone(),
                alias: entry.alias.clone(),
                delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            });
            report.delay = Some(delay);
        }

        report
    }

    fn record_failure(
        &self,
        flow: &FlowRequest,
        alias: &str,
        err: MitmError,
        report: &mut ResponseReport,
    ) {
        error!("Updating response for {} failed: {}", flow.url, err);
        self.metrics.mutation_failures.fetch_add(1, Ordering::Relaxed);
        self.emit(InterceptEvent::MutationFailed {
            flow_id: flow.id,
            url: flow.url.clone(),
            alias: alias.to_string(),
            reason: err.to_string(),
        });
        report.failures.push(err);
    }

    fn emit(&self, event: InterceptEvent) {
        if let Some(sender) = &self.events {
            if let Err(e) = sender.try_send(event) {
                debug!("Dropped intercept event: {}", e);
            }
        }
    }
}

/// Response handed to the client in place of a blocked request.
pub fn blocked_response() -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::FORBIDDEN;
    response
}

/// Replaces status, headers and body of `response` with `entry`.
///
/// Everything is validated before the response is touched, so a failing entry
/// leaves the response as it was.
fn apply_custom_response(entry: &OverrideEntry, response: &mut Response<Body>) -> Result<()> {
    let status =
        StatusCode::from_u16(entry.status_code).map_err(|e| MitmError::mutation(&entry.alias, e))?;
    let headers = custom_headers(entry, response.headers())?;
    let body = entry.body.clone().unwrap_or_default();

    *response.status_mut() = status;
    *response.headers_mut() = headers;
    *response.body_mut() = Body::from(body);
    Ok(())
}

fn custom_headers(entry: &OverrideEntry, upstream: &HeaderMap) -> Result<HeaderMap> {
    let replacement = match &entry.headers {
        Some(headers) if !headers.is_empty() => headers,
        _ => {
            // upstream framing headers describe the body being discarded
            let mut kept = upstream.clone();
            kept.remove(header::CONTENT_LENGTH);
            kept.remove(header::TRANSFER_ENCODING);
            kept.remove(header::CONTENT_ENCODING);
            return Ok(kept);
        }
    };

    let mut map = HeaderMap::with_capacity(replacement.len());
    for (name, value) in replacement.iter() {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            MitmError::mutation(&entry.alias, format!("invalid header name '{}': {}", name, e))
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| {
            MitmError::mutation(
                &entry.alias,
                format!("invalid value for header '{}': {}", name, e),
            )
        })?;
        map.append(header_name, header_value);
    }
    Ok(map)
}
