use crate::context::RequestContext;
use crate::endpoint::FanoutResult;
use crate::http::{copy_headers, parse_header_names};
use http::header::{HeaderMap, HeaderName};

/// One step of the outbound-response pipeline, applied after a winner is
/// chosen.
pub trait ResponseFunction: Send + Sync {
    fn apply(&self, ctx: &RequestContext, result: &FanoutResult, outbound: &mut HeaderMap);
}

/// Copies the named headers from the winning downstream response into the
/// caller-visible header set.
pub struct ReturnHeaders {
    names: Vec<HeaderName>,
}

impl ReturnHeaders {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ReturnHeaders {
            names: parse_header_names(names),
        }
    }
}

impl ResponseFunction for ReturnHeaders {
    fn apply(&self, _ctx: &RequestContext, result: &FanoutResult, outbound: &mut HeaderMap) {
        if result.status.is_none() {
            return;
        }

        copy_headers(&self.names, &result.headers, outbound);
    }
}
