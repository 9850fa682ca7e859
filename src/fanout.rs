use crate::codec::FanoutRequest;
use crate::endpoint::{EndpointClient, FanoutResult};
use crate::metrics_defs::FANOUT_DURATION;
use crate::span::{Span, Spanner};
use hyper::StatusCode;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio::time::sleep;

/// Inclusive range of status codes adopted as a successful downstream
/// response. Defaults to 200-299.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SuccessSet {
    low: u16,
    high: u16,
}

impl Default for SuccessSet {
    fn default() -> Self {
        SuccessSet { low: 200, high: 299 }
    }
}

impl SuccessSet {
    pub fn new(low: u16, high: u16) -> Self {
        SuccessSet { low, high }
    }

    pub fn contains(&self, status: StatusCode) -> bool {
        (self.low..=self.high).contains(&status.as_u16())
    }
}

/// What the race produced.
#[derive(Debug)]
pub enum FanoutVerdict {
    /// The earliest successful result; losers were cancelled.
    Winner(FanoutResult),
    /// Every replica finished without a success. `response` is the loser
    /// whose status was adopted, when any replica produced a response.
    AllFailed {
        status: StatusCode,
        response: Option<FanoutResult>,
    },
    /// The fanout deadline expired before any success.
    TimedOut,
}

#[derive(Debug)]
pub struct FanoutOutcome {
    pub verdict: FanoutVerdict,
    /// One span per endpoint, regardless of outcome. Replicas aborted by
    /// winner selection or the deadline carry a synthesized error marker.
    pub spans: Vec<Span>,
}

/// Races one replica per endpoint and selects the first success.
pub struct FanoutEngine {
    spanner: Spanner,
    clients: Vec<Arc<EndpointClient>>,
    success: SuccessSet,
    fanout_timeout: Duration,
}

impl FanoutEngine {
    pub fn new(
        spanner: Spanner,
        clients: Vec<Arc<EndpointClient>>,
        success: SuccessSet,
        fanout_timeout: Duration,
    ) -> Self {
        FanoutEngine {
            spanner,
            clients,
            success,
            fanout_timeout,
        }
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.clients.iter().map(|c| c.endpoint())
    }

    pub async fn execute(&self, request: FanoutRequest) -> FanoutOutcome {
        let started = Instant::now();
        let outcome = self.race(request).await;

        let label = match &outcome.verdict {
            FanoutVerdict::Winner(_) => "success",
            FanoutVerdict::AllFailed { .. } => "all-failed",
            FanoutVerdict::TimedOut => "timeout",
        };
        metrics::histogram!(FANOUT_DURATION.name, "outcome" => label)
            .record(started.elapsed().as_secs_f64());

        outcome
    }

    async fn race(&self, request: FanoutRequest) -> FanoutOutcome {
        if self.clients.is_empty() {
            return FanoutOutcome {
                verdict: FanoutVerdict::AllFailed {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    response: None,
                },
                spans: Vec::new(),
            };
        }

        let started = Instant::now();
        let request = Arc::new(request);
        let mut join_set = JoinSet::new();
        let mut pending: HashSet<String> = HashSet::new();

        for client in &self.clients {
            let client = client.clone();
            let request = request.clone();
            let spanner = self.spanner.clone();

            pending.insert(client.endpoint().to_string());
            join_set.spawn(async move { client.send(&spanner, &request).await });
        }

        let deadline = sleep(self.fanout_timeout);
        tokio::pin!(deadline);

        let mut spans = Vec::with_capacity(self.clients.len());
        let mut failures: Vec<FanoutResult> = Vec::new();

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    join_set.abort_all();
                    abandon(&mut spans, pending, started, "fanout deadline exceeded");
                    return FanoutOutcome { verdict: FanoutVerdict::TimedOut, spans };
                }
                joined = join_set.join_next() => {
                    match joined {
                        Some(Ok(result)) => {
                            pending.remove(&result.endpoint);
                            spans.push(result.span.clone());

                            if self.is_success(&result) {
                                join_set.abort_all();
                                abandon(&mut spans, pending, started, "cancelled: sibling won");
                                return FanoutOutcome {
                                    verdict: FanoutVerdict::Winner(result),
                                    spans,
                                };
                            }

                            tracing::debug!(
                                endpoint = %result.endpoint,
                                status = ?result.status,
                                error = ?result.error,
                                "replica failed"
                            );
                            failures.push(result);
                        }
                        Some(Err(e)) => {
                            tracing::error!("Replica task panicked: {}", e);
                        }
                        None => break,
                    }
                }
            }
        }

        // keep span accounting honest even if a replica task panicked
        abandon(&mut spans, pending, started, "replica task panicked");

        let (status, response) = composite_failure(failures);
        FanoutOutcome {
            verdict: FanoutVerdict::AllFailed { status, response },
            spans,
        }
    }

    fn is_success(&self, result: &FanoutResult) -> bool {
        result.error.is_none()
            && result
                .status
                .map(|status| self.success.contains(status))
                .unwrap_or(false)
    }
}

fn abandon(spans: &mut Vec<Span>, pending: HashSet<String>, started: Instant, reason: &str) {
    for endpoint in pending {
        spans.push(Span {
            endpoint,
            duration: started.elapsed(),
            error: Some(reason.to_string()),
        });
    }
}

/// Selects the composite status for a total failure: the lowest 4xx bearing
/// a readable body, else the lowest non-success status observed, else a
/// synthesized 503 when no replica produced a response at all.
fn composite_failure(mut failures: Vec<FanoutResult>) -> (StatusCode, Option<FanoutResult>) {
    let mut best: Option<(usize, (u8, u16))> = None;

    for (i, result) in failures.iter().enumerate() {
        let key = match result.status {
            Some(status) if status.is_client_error() && !result.body.is_empty() => {
                (0u8, status.as_u16())
            }
            Some(status) => (1, status.as_u16()),
            None => continue,
        };

        if best.map(|(_, k)| key < k).unwrap_or(true) {
            best = Some((i, key));
        }
    }

    match best {
        Some((i, _)) => {
            let result = failures.swap_remove(i);
            match result.status {
                Some(status) => (status, Some(result)),
                None => (StatusCode::SERVICE_UNAVAILABLE, None),
            }
        }
        None => (StatusCode::SERVICE_UNAVAILABLE, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Decoder;
    use crate::errors::FanoutError;
    use crate::request::RequestFunction;
    use crate::testutils::{start_test_server, unused_port};
    use http::header::HeaderMap;
    use http_body_util::Full;
    use hyper::body::{Bytes, Incoming};
    use hyper::{Method, Request, Response};
    use hyper_util::client::legacy::Client;
    use hyper_util::client::legacy::connect::HttpConnector;
    use hyper_util::rt::TokioExecutor;
    use url::Url;

    fn engine_for(ports: &[u16], fanout_timeout: Duration) -> FanoutEngine {
        let client: crate::endpoint::SharedClient =
            Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        let clients = ports
            .iter()
            .map(|port| {
                Arc::new(EndpointClient::new(
                    Url::parse(&format!("http://127.0.0.1:{port}/send")).unwrap(),
                    Method::POST,
                    client.clone(),
                    Duration::from_secs(5),
                    HeaderMap::new(),
                    Arc::from(Vec::<Box<dyn RequestFunction>>::new().into_boxed_slice()),
                ))
            })
            .collect();

        FanoutEngine::new(Spanner, clients, SuccessSet::default(), fanout_timeout)
    }

    async fn request() -> FanoutRequest {
        let inbound = Request::builder()
            .uri("/inbound")
            .body(Full::new(Bytes::from_static(b"payload")))
            .unwrap();
        Decoder::new().decode(inbound).await.unwrap()
    }

    async fn fixed_server(status: StatusCode, body: &'static str, delay: Duration) -> u16 {
        start_test_server(move |_req: Request<Incoming>| async move {
            tokio::time::sleep(delay).await;
            Response::builder()
                .status(status)
                .body(Full::new(Bytes::from_static(body.as_bytes())))
                .unwrap()
        })
        .await
    }

    #[tokio::test]
    async fn test_zero_endpoints() {
        let engine = engine_for(&[], Duration::from_secs(1));
        let outcome = engine.execute(request().await).await;

        let FanoutVerdict::AllFailed { status, response } = outcome.verdict else {
            panic!("expected all-failed, got {:?}", outcome.verdict);
        };
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.is_none());
        assert!(outcome.spans.is_empty());
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let fast = fixed_server(StatusCode::OK, "ok", Duration::ZERO).await;
        let slow = fixed_server(StatusCode::OK, "also-ok", Duration::from_secs(5)).await;

        let engine = engine_for(&[fast, slow], Duration::from_secs(10));
        let outcome = engine.execute(request().await).await;

        let FanoutVerdict::Winner(winner) = outcome.verdict else {
            panic!("expected a winner, got {:?}", outcome.verdict);
        };
        assert_eq!(winner.status, Some(StatusCode::OK));
        assert_eq!(winner.body.as_ref(), b"ok");

        // one span per endpoint, the loser marked as cancelled
        assert_eq!(outcome.spans.len(), 2);
        assert_eq!(outcome.spans.iter().filter(|s| s.is_error()).count(), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_mask_later_success() {
        let failing = fixed_server(StatusCode::INTERNAL_SERVER_ERROR, "boom", Duration::ZERO).await;
        let healthy = fixed_server(StatusCode::OK, "fine", Duration::from_millis(20)).await;
        let hanging = fixed_server(StatusCode::OK, "late", Duration::from_secs(30)).await;

        let engine = engine_for(&[failing, healthy, hanging], Duration::from_secs(10));
        let outcome = engine.execute(request().await).await;

        let FanoutVerdict::Winner(winner) = outcome.verdict else {
            panic!("expected a winner, got {:?}", outcome.verdict);
        };
        assert_eq!(winner.body.as_ref(), b"fine");
        assert_eq!(outcome.spans.len(), 3);
    }

    #[tokio::test]
    async fn test_all_failed_prefers_lowest_4xx_with_body() {
        let not_found = fixed_server(StatusCode::NOT_FOUND, "no such device", Duration::ZERO).await;
        let server_error =
            fixed_server(StatusCode::INTERNAL_SERVER_ERROR, "boom", Duration::ZERO).await;
        let refused = unused_port().await;

        let engine = engine_for(&[not_found, server_error, refused], Duration::from_secs(10));
        let outcome = engine.execute(request().await).await;

        let FanoutVerdict::AllFailed { status, response } = outcome.verdict else {
            panic!("expected all-failed, got {:?}", outcome.verdict);
        };
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(response.unwrap().body.as_ref(), b"no such device");
        assert_eq!(outcome.spans.len(), 3);
    }

    #[tokio::test]
    async fn test_all_transport_errors_synthesize_503() {
        let refused_a = unused_port().await;
        let refused_b = unused_port().await;

        let engine = engine_for(&[refused_a, refused_b], Duration::from_secs(10));
        let outcome = engine.execute(request().await).await;

        let FanoutVerdict::AllFailed { status, response } = outcome.verdict else {
            panic!("expected all-failed, got {:?}", outcome.verdict);
        };
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.is_none());
        assert_eq!(outcome.spans.len(), 2);
        assert!(outcome.spans.iter().all(|s| s.is_error()));
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let slow_a = fixed_server(StatusCode::OK, "late", Duration::from_secs(30)).await;
        let slow_b = fixed_server(StatusCode::OK, "late", Duration::from_secs(30)).await;

        let engine = engine_for(&[slow_a, slow_b], Duration::from_millis(50));
        let outcome = engine.execute(request().await).await;

        assert!(matches!(outcome.verdict, FanoutVerdict::TimedOut));
        assert_eq!(outcome.spans.len(), 2);
        assert!(outcome.spans.iter().all(|s| s.is_error()));
    }

    #[tokio::test]
    async fn test_deadline_keeps_completed_spans() {
        let failing = fixed_server(StatusCode::INTERNAL_SERVER_ERROR, "boom", Duration::ZERO).await;
        let hanging = fixed_server(StatusCode::OK, "late", Duration::from_secs(30)).await;

        let engine = engine_for(&[failing, hanging], Duration::from_millis(100));
        let outcome = engine.execute(request().await).await;

        assert!(matches!(outcome.verdict, FanoutVerdict::TimedOut));
        assert_eq!(outcome.spans.len(), 2);
        // the 500 completed before the deadline; its span reports no error
        assert_eq!(outcome.spans.iter().filter(|s| !s.is_error()).count(), 1);
    }

    fn failure(status: Option<StatusCode>, body: &'static str) -> FanoutResult {
        FanoutResult {
            endpoint: "http://downstream.example.com/send".to_string(),
            status,
            headers: HeaderMap::new(),
            body: Bytes::from_static(body.as_bytes()),
            span: Spanner.start("http://downstream.example.com/send").finish(None),
            error: status.is_none().then(|| {
                FanoutError::Transport(
                    "http://downstream.example.com/send".to_string(),
                    "connection refused".to_string(),
                )
            }),
        }
    }

    #[test]
    fn test_composite_failure_ranking() {
        // 4xx with body beats lower 5xx
        let (status, response) = composite_failure(vec![
            failure(Some(StatusCode::INTERNAL_SERVER_ERROR), "boom"),
            failure(Some(StatusCode::NOT_FOUND), "missing"),
        ]);
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(response.unwrap().body.as_ref(), b"missing");

        // among 4xx with bodies, the lowest code wins
        let (status, _) = composite_failure(vec![
            failure(Some(StatusCode::NOT_FOUND), "missing"),
            failure(Some(StatusCode::BAD_REQUEST), "bad"),
        ]);
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // a bodyless 4xx ranks with the 5xx family: lowest code wins
        let (status, _) = composite_failure(vec![
            failure(Some(StatusCode::NOT_FOUND), ""),
            failure(Some(StatusCode::INTERNAL_SERVER_ERROR), "boom"),
        ]);
        assert_eq!(status, StatusCode::NOT_FOUND);

        // transport errors only: synthesize 503
        let (status, response) = composite_failure(vec![failure(None, ""), failure(None, "")]);
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.is_none());

        // nothing at all: synthesize 503
        let (status, _) = composite_failure(Vec::new());
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    // the engine must not bias selection by configuration order
    #[tokio::test]
    async fn test_selection_is_completion_ordered() {
        let slow = fixed_server(StatusCode::OK, "slow", Duration::from_millis(200)).await;
        let fast = fixed_server(StatusCode::OK, "fast", Duration::ZERO).await;

        // slow endpoint listed first
        let engine = engine_for(&[slow, fast], Duration::from_secs(10));
        let outcome = engine.execute(request().await).await;

        let FanoutVerdict::Winner(winner) = outcome.verdict else {
            panic!("expected a winner");
        };
        assert_eq!(winner.body.as_ref(), b"fast");
    }
}
