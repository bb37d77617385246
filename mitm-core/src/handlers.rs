use crate::admin::Metrics;
use crate::evaluator::{blocked_response, FlowEvaluator, FlowRequest, RequestVerdict};
use hudsucker::{
    hyper::{Body, Method, Request, Response},
    HttpContext, HttpHandler, RequestOrResponse,
};
use std::sync::{atomic::Ordering, Arc};
use tracing::{debug, info};

/// Relay hook that runs every intercepted exchange through the evaluator.
///
/// The relay clones the handler for each request and calls `handle_request`
/// and `handle_response` on the same clone, so the flow recorded at request
/// time is a plain field rather than shared state.
#[derive(Clone)]
pub struct InterceptHandler {
    evaluator: Arc<FlowEvaluator>,
    metrics: Arc<Metrics>,
    /// Flow of the request this clone is serving, set once it passed the block list
    current_flow: Option<FlowRequest>,
}

impl InterceptHandler {
    pub fn new(evaluator: Arc<FlowEvaluator>) -> Self {
        let metrics = evaluator.metrics().clone();
        Self {
            evaluator,
            metrics,
            current_flow: None,
        }
    }

    /// Request half of the exchange; blocked requests never reach upstream.
    pub async fn intercept_request(&mut self, req: Request<Body>) -> RequestOrResponse {
        // CONNECT only opens the tunnel; the requests inside it are the flows
        if req.method() == Method::CONNECT {
            return RequestOrResponse::Request(req);
        }

        self.metrics.total_requests.fetch_add(1, Ordering::Relaxed);

        let flow = FlowRequest::from_request(&req);
        info!("Request [{}] {} {}", flow.id, flow.method, flow.url);

        match self.evaluator.on_request(&flow) {
            RequestVerdict::Blocked { .. } => {
                self.current_flow = None;
                RequestOrResponse::Response(blocked_response())
            }
            RequestVerdict::Pass => {
                self.current_flow = Some(flow);
                RequestOrResponse::Request(req)
            }
        }
    }

    /// Response half of the exchange, including any configured delay.
    pub async fn intercept_response(&mut self, res: Response<Body>) -> Response<Body> {
        let Some(flow) = self.current_flow.take() else {
            debug!("Response status: {} (no correlated flow)", res.status());
            return res;
        };

        let mut res = res;
        let report = self.evaluator.on_response(&flow, &mut res).await;
        if report.is_untouched() {
            debug!("Response [{}] status: {}", flow.id, res.status());
        } else {
            info!("Response [{}] status: {} (rewritten)", flow.id, res.status());
        }
        res
    }
}

#[async_trait::async_trait]
impl HttpHandler for InterceptHandler {
    async fn handle_request(
        &mut self,
        _ctx: &HttpContext,
        req: Request<Body>,
    ) -> RequestOrResponse {
        self.intercept_request(req).await
    }

    async fn handle_response(&mut self, _ctx: &HttpContext, res: Response<Body>) -> Response<Body> {
        self.intercept_response(res).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{OverrideEntry, StatusEntry};
    use crate::store::{InMemoryRuleStore, RuleStore};
    use hudsucker::hyper::{body::to_bytes, StatusCode};

    fn handler(store: Arc<InMemoryRuleStore>) -> InterceptHandler {
        let evaluator = FlowEvaluator::new(store, Arc::new(Metrics::default()));
        InterceptHandler::new(Arc::new(evaluator))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_blocked_request_is_answered_by_the_proxy() {
        let store = Arc::new(InMemoryRuleStore::new());
        store.add_block("blocked.example");
        let mut handler = handler(store);

        match handler
            .intercept_request(get("http://blocked.example/x"))
            .await
        {
            RequestOrResponse::Response(res) => assert_eq!(res.status(), StatusCode::FORBIDDEN),
            RequestOrResponse::Request(_) => panic!("blocked request was forwarded"),
        }
        assert!(handler.current_flow.is_none());
        assert_eq!(handler.metrics.blocked_requests.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_connect_is_not_evaluated() {
        let store = Arc::new(InMemoryRuleStore::new());
        store.add_block("blocked.example");
        let mut handler = handler(store);

        let connect = Request::builder()
            .method(Method::CONNECT)
            .uri("blocked.example:443")
            .body(Body::empty())
            .unwrap();
        assert!(matches!(
            handler.intercept_request(connect).await,
            RequestOrResponse::Request(_)
        ));
        assert_eq!(handler.metrics.total_requests.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_response_is_rewritten_for_the_recorded_flow() {
        let store = Arc::new(InMemoryRuleStore::new());
        store.add_override(
            OverrideEntry::new("A1", "api.example/v1")
                .with_body("OK")
                .with_status(201),
        );
        store.add_status_override(StatusEntry::new("S1", "api.example", 503));
        let mut handler = handler(store);

        assert!(matches!(
            handler
                .intercept_request(get("http://api.example/v1/users"))
                .await,
            RequestOrResponse::Request(_)
        ));
        let res = handler
            .intercept_response(Response::new(Body::from("upstream")))
            .await;

        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(&to_bytes(res.into_body()).await.unwrap()[..], b"OK");
        assert!(handler.current_flow.is_none());
    }

    #[tokio::test]
    async fn test_uncorrelated_response_passes_through() {
        let store = Arc::new(InMemoryRuleStore::new());
        store.add_status_override(StatusEntry::new("S1", "", 500));
        let mut handler = handler(store);

        let res = handler
            .intercept_response(Response::new(Body::empty()))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
    }
}
