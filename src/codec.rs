use crate::context::RequestContext;
use crate::endpoint::FanoutResult;
use crate::errors::FanoutError;
use crate::http::{copy_headers, parse_header_names};
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName};
use http::request::Parts;
use http_body_util::BodyExt;
use hyper::Request;
use hyper::body::Bytes;

/// The decoded form of one inbound request: the opaque body, the header set
/// attached verbatim to every replica, the request context, and the original
/// request parts for the request-function pipeline.
///
/// Immutable once dispatched.
#[derive(Debug)]
pub struct FanoutRequest {
    pub context: RequestContext,
    pub body: Bytes,
    pub headers: HeaderMap,
    pub inbound: Parts,
}

/// Translates an inbound request into a [`FanoutRequest`].
///
/// The inbound body is fully drained. Selected inbound headers (Content-Type
/// by default) are copied into the fanout header set.
pub struct Decoder {
    forward: Vec<HeaderName>,
}

impl Default for Decoder {
    fn default() -> Self {
        Decoder {
            forward: vec![CONTENT_TYPE],
        }
    }
}

impl Decoder {
    pub fn new() -> Self {
        Decoder::default()
    }

    /// Extends the forwarded header set beyond the default Content-Type.
    pub fn forward_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.forward.extend(parse_header_names(names));
        self
    }

    pub async fn decode<B>(&self, request: Request<B>) -> Result<FanoutRequest, FanoutError>
    where
        B: hyper::body::Body,
        B::Error: std::error::Error,
    {
        let (parts, body) = request.into_parts();

        let body = body
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|e| FanoutError::RequestBodyError(e.to_string()))?;

        let mut headers = HeaderMap::new();
        copy_headers(&self.forward, &parts.headers, &mut headers);

        Ok(FanoutRequest {
            context: RequestContext::from_parts(&parts),
            body,
            headers,
            inbound: parts,
        })
    }
}

/// Translates the winning [`FanoutResult`] into the outbound body, copying a
/// configured subset of the winner's headers (Content-Type by default) into
/// the caller-visible header set.
pub struct Encoder {
    return_headers: Vec<HeaderName>,
}

impl Default for Encoder {
    fn default() -> Self {
        Encoder {
            return_headers: vec![CONTENT_TYPE],
        }
    }
}

impl Encoder {
    pub fn new() -> Self {
        Encoder::default()
    }

    pub fn return_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.return_headers.extend(parse_header_names(names));
        self
    }

    /// A result with no downstream response yields an empty body and leaves
    /// the outbound headers untouched.
    pub fn encode(&self, result: &FanoutResult, outbound: &mut HeaderMap) -> Bytes {
        if result.status.is_none() {
            return Bytes::new();
        }

        copy_headers(&self.return_headers, &result.headers, outbound);
        result.body.clone()
    }
}
