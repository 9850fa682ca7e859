pub mod codec;
pub mod config;
pub mod context;
pub mod endpoint;
pub mod errors;
pub mod fanout;
pub mod http;
pub mod metrics_defs;
pub mod middleware;
pub mod request;
pub mod response;
pub mod span;
pub mod webhook;

#[cfg(test)]
mod testutils;

use crate::codec::{Decoder, Encoder};
use crate::config::FanoutOptions;
use crate::endpoint::EndpointClient;
use crate::errors::FanoutError;
use crate::fanout::{FanoutEngine, FanoutVerdict, SuccessSet};
use crate::http::make_error_response;
use crate::metrics_defs::{BUSY_REJECTED, CONCURRENCY_REJECTED};
use crate::middleware::{BusyGate, ConcurrencyGate, Handler, Middleware};
use crate::request::RequestFunction;
use crate::response::ResponseFunction;
use crate::span::Spanner;
use ::http::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::pin::Pin;
use std::sync::Arc;
use tracing::Instrument;

/// Assembles a [`FanoutService`] from options and the optional pipelines.
///
/// Construction validates the endpoint URLs and the replica method; bad
/// configuration never produces a running fanout.
pub struct FanoutBuilder {
    options: FanoutOptions,
    success: SuccessSet,
    decoder: Decoder,
    encoder: Encoder,
    request_functions: Vec<Box<dyn RequestFunction>>,
    response_functions: Vec<Arc<dyn ResponseFunction>>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl FanoutBuilder {
    pub fn new(options: FanoutOptions) -> Self {
        FanoutBuilder {
            options,
            success: SuccessSet::default(),
            decoder: Decoder::new(),
            encoder: Encoder::new(),
            request_functions: Vec::new(),
            response_functions: Vec::new(),
            middleware: Vec::new(),
        }
    }

    pub fn decoder(mut self, decoder: Decoder) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn encoder(mut self, encoder: Encoder) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn success_set(mut self, success: SuccessSet) -> Self {
        self.success = success;
        self
    }

    /// Appends a request function; functions run per replica in the order
    /// they were added.
    pub fn request_function(mut self, function: Box<dyn RequestFunction>) -> Self {
        self.request_functions.push(function);
        self
    }

    pub fn response_function(mut self, function: Arc<dyn ResponseFunction>) -> Self {
        self.response_functions.push(function);
        self
    }

    /// Appends custom middleware, which runs after the built-in admission
    /// gates, closest to the engine.
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn build(self) -> Result<FanoutService, FanoutError> {
        let urls = self.options.urls()?;
        let method = self.options.parsed_method()?;

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(self.options.max_idle_conns_per_host)
            .build(HttpConnector::new());

        let mut base_headers = HeaderMap::new();
        base_headers.insert(ACCEPT, HeaderValue::from_static("application/msgpack"));
        if let Some(token) = &self.options.authorization {
            let value = HeaderValue::from_str(&format!("Basic {token}"))
                .map_err(|e| FanoutError::Internal(format!("bad authorization token: {e}")))?;
            base_headers.insert(AUTHORIZATION, value);
        }

        let request_functions: Arc<[Box<dyn RequestFunction>]> =
            Arc::from(self.request_functions.into_boxed_slice());

        let clients = urls
            .into_iter()
            .map(|url| {
                Arc::new(EndpointClient::new(
                    url,
                    method.clone(),
                    client.clone(),
                    self.options.client_timeout(),
                    base_headers.clone(),
                    request_functions.clone(),
                ))
            })
            .collect();

        let engine = Arc::new(FanoutEngine::new(
            Spanner,
            clients,
            self.success,
            self.options.fanout_timeout(),
        ));

        let base: Handler = Arc::new(move |request| {
            let engine = engine.clone();
            Box::pin(async move { engine.execute(request).await })
        });
        let handler = middleware::chain(base, &self.middleware);

        Ok(FanoutService {
            inner: Arc::new(ServiceInner {
                decoder: self.decoder,
                encoder: self.encoder,
                handler,
                response_functions: self.response_functions,
                busy: BusyGate::new(self.options.max_clients),
                concurrency: ConcurrencyGate::new(self.options.concurrency),
            }),
        })
    }
}

/// The fanout handler: accepts one inbound request, replicates it to every
/// configured endpoint concurrently, and returns the first successful
/// downstream response.
#[derive(Clone)]
pub struct FanoutService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    decoder: Decoder,
    encoder: Encoder,
    handler: Handler,
    response_functions: Vec<Arc<dyn ResponseFunction>>,
    busy: Arc<BusyGate>,
    concurrency: ConcurrencyGate,
}

impl ServiceInner {
    async fn handle<B>(&self, request: Request<B>) -> Result<Response<Full<Bytes>>, FanoutError>
    where
        B: hyper::body::Body + Send + 'static,
        B::Data: Send,
        B::Error: std::error::Error,
    {
        let Some(_busy) = self.busy.try_acquire() else {
            metrics::counter!(BUSY_REJECTED.name).increment(1);
            tracing::warn!("rejecting request: server busy");
            return Ok(
                make_error_response(StatusCode::SERVICE_UNAVAILABLE, "Server Busy").map(Full::new)
            );
        };

        let Some(_concurrent) = self.concurrency.try_acquire() else {
            metrics::counter!(CONCURRENCY_REJECTED.name).increment(1);
            tracing::warn!("rejecting request: too many concurrent fanouts");
            return Ok(
                make_error_response(StatusCode::TOO_MANY_REQUESTS, "Too Many Requests")
                    .map(Full::new),
            );
        };

        let decoded = match self.decoder.decode(request).await {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(error = %e, "failed to decode inbound request");
                return Ok(make_error_response(StatusCode::BAD_REQUEST, &e.to_string())
                    .map(Full::new));
            }
        };
        let context = decoded.context.clone();

        let outcome = (self.handler)(decoded).await;

        for span in &outcome.spans {
            tracing::debug!(
                endpoint = %span.endpoint,
                duration_ms = span.duration.as_millis() as u64,
                error = ?span.error,
                "replica finished"
            );
        }

        match outcome.verdict {
            FanoutVerdict::Winner(result) => {
                let status = result.status.unwrap_or(StatusCode::OK);

                let mut headers = HeaderMap::new();
                for function in &self.response_functions {
                    function.apply(&context, &result, &mut headers);
                }
                let body = self.encoder.encode(&result, &mut headers);

                let mut response = Response::new(Full::new(body));
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                Ok(response)
            }
            FanoutVerdict::AllFailed {
                status,
                response: Some(loser),
            } => {
                tracing::warn!(status = %status, endpoint = %loser.endpoint, "all endpoints failed");

                let mut headers = HeaderMap::new();
                let body = self.encoder.encode(&loser, &mut headers);

                let mut response = Response::new(Full::new(body));
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                Ok(response)
            }
            FanoutVerdict::AllFailed {
                status,
                response: None,
            } => {
                tracing::warn!(status = %status, "all endpoints failed without a response");
                let message = status.canonical_reason().unwrap_or("Service Unavailable");
                Ok(make_error_response(status, message).map(Full::new))
            }
            FanoutVerdict::TimedOut => {
                tracing::warn!("fanout deadline exceeded");
                Ok(
                    make_error_response(StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout")
                        .map(Full::new),
                )
            }
        }
    }
}

impl<B> Service<Request<B>> for FanoutService
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: std::error::Error,
{
    type Response = Response<Full<Bytes>>;
    type Error = FanoutError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let inner = self.inner.clone();
        let span = tracing::info_span!(
            "fanout",
            method = %req.method(),
            path = %req.uri().path(),
        );

        Box::pin(async move { inner.handle(req).await }.instrument(span))
    }
}
