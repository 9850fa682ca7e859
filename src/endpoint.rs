use crate::codec::FanoutRequest;
use crate::errors::FanoutError;
use crate::metrics_defs::REPLICA_DURATION;
use crate::request::{ReplicaParts, RequestFunction};
use crate::span::{Span, SpanTimer, Spanner};
use http::header::HeaderMap;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use url::Url;

/// The HTTP client shared by every replica of every fanout.
pub type SharedClient = Client<HttpConnector, Full<Bytes>>;

/// Outcome record for one replica attempt.
///
/// `status` is `None` when the replica never produced a downstream response
/// (request-build failures, transport errors, timeouts).
#[derive(Debug)]
pub struct FanoutResult {
    pub endpoint: String,
    pub status: Option<StatusCode>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub span: Span,
    pub error: Option<FanoutError>,
}

/// One long-lived client per downstream URL. Encodes the replica, sends it
/// via the shared HTTP client, and decodes the body on success.
pub struct EndpointClient {
    url: Url,
    method: Method,
    client: SharedClient,
    client_timeout: Duration,
    base_headers: HeaderMap,
    request_functions: Arc<[Box<dyn RequestFunction>]>,
}

impl EndpointClient {
    pub fn new(
        url: Url,
        method: Method,
        client: SharedClient,
        client_timeout: Duration,
        base_headers: HeaderMap,
        request_functions: Arc<[Box<dyn RequestFunction>]>,
    ) -> Self {
        EndpointClient {
            url,
            method,
            client,
            client_timeout,
            base_headers,
            request_functions,
        }
    }

    pub fn endpoint(&self) -> &str {
        self.url.as_str()
    }

    /// Dispatches one replica of the fanout request against this endpoint.
    ///
    /// The timeout covers the complete cycle: connection, send, response
    /// headers, and collecting the full response body.
    pub async fn send(&self, spanner: &Spanner, request: &FanoutRequest) -> FanoutResult {
        let timer = spanner.start(self.url.as_str());
        let start = Instant::now();

        let mut replica = ReplicaParts {
            url: self.url.clone(),
            headers: request.headers.clone(),
        };
        for (name, value) in self.base_headers.iter() {
            replica.headers.insert(name.clone(), value.clone());
        }

        for function in self.request_functions.iter() {
            if let Err(e) = function.apply(&request.context, &request.inbound, &mut replica) {
                let error = FanoutError::RequestBuild(self.url.to_string(), e.to_string());
                return self.record(timer, start, None, HeaderMap::new(), Bytes::new(), Some(error));
            }
        }

        let outcome = timeout(self.client_timeout, self.dispatch(replica, &request.body)).await;

        match outcome {
            Ok(Ok((status, headers, body))) => {
                self.record(timer, start, Some(status), headers, body, None)
            }
            Ok(Err(error)) => self.record(timer, start, None, HeaderMap::new(), Bytes::new(), Some(error)),
            Err(_) => {
                let error = FanoutError::Timeout(self.url.to_string());
                self.record(timer, start, None, HeaderMap::new(), Bytes::new(), Some(error))
            }
        }
    }

    async fn dispatch(
        &self,
        replica: ReplicaParts,
        body: &Bytes,
    ) -> Result<(StatusCode, HeaderMap, Bytes), FanoutError> {
        let mut builder = Request::builder()
            .method(self.method.clone())
            .uri(replica.url.as_str());
        for (name, value) in replica.headers.iter() {
            builder = builder.header(name, value);
        }

        let outbound = builder
            .body(Full::new(body.clone()))
            .map_err(|e| FanoutError::RequestBuild(self.url.to_string(), e.to_string()))?;

        let response = self
            .client
            .request(outbound)
            .await
            .map_err(|e| FanoutError::Transport(self.url.to_string(), e.to_string()))?;

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|e| FanoutError::ReadBody(self.url.to_string(), e.to_string()))?;

        Ok((parts.status, parts.headers, body))
    }

    fn record(
        &self,
        timer: SpanTimer,
        start: Instant,
        status: Option<StatusCode>,
        headers: HeaderMap,
        body: Bytes,
        error: Option<FanoutError>,
    ) -> FanoutResult {
        let status_label = match (&status, &error) {
            (Some(status), _) => status.as_u16().to_string(),
            (None, Some(FanoutError::Timeout(_))) => "timeout".to_string(),
            (None, _) => "error".to_string(),
        };
        metrics::histogram!(
            REPLICA_DURATION.name,
            "endpoint" => self.url.to_string(),
            "status" => status_label,
        )
        .record(start.elapsed().as_secs_f64());

        let span = timer.finish(error.as_ref().map(|e| e.to_string()));

        FanoutResult {
            endpoint: self.url.to_string(),
            status,
            headers,
            body,
            span,
            error,
        }
    }
}
