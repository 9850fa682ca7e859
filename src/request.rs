use crate::context::RequestContext;
use crate::errors::FanoutError;
use crate::http::{copy_headers, parse_header_names};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::request::Parts;
use url::Url;

/// Mutable pieces of an outbound replica before dispatch. The endpoint
/// client builds the final HTTP request from these after the pipeline runs.
#[derive(Clone, Debug)]
pub struct ReplicaParts {
    pub url: Url,
    pub headers: HeaderMap,
}

/// One step of the replica-mutation pipeline.
///
/// Functions run per replica, in declared order, before dispatch. An error
/// fails only that replica; its siblings proceed.
pub trait RequestFunction: Send + Sync {
    fn apply(
        &self,
        ctx: &RequestContext,
        original: &Parts,
        replica: &mut ReplicaParts,
    ) -> Result<(), FanoutError>;
}

/// Copies the named headers from the original request onto each replica.
/// Names not present on the original are silently skipped.
pub struct ForwardHeaders {
    names: Vec<HeaderName>,
}

impl ForwardHeaders {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ForwardHeaders {
            names: parse_header_names(names),
        }
    }
}

impl RequestFunction for ForwardHeaders {
    fn apply(
        &self,
        _ctx: &RequestContext,
        original: &Parts,
        replica: &mut ReplicaParts,
    ) -> Result<(), FanoutError> {
        copy_headers(&self.names, &original.headers, &mut replica.headers);
        Ok(())
    }
}

/// Promotes a router-extracted path variable to a replica header. A missing
/// or empty variable is not an error; the header is simply not set.
pub struct ForwardVariableAsHeader {
    variable: String,
    header: HeaderName,
}

impl ForwardVariableAsHeader {
    pub fn new(variable: impl Into<String>, header: &str) -> Result<Self, FanoutError> {
        let header = HeaderName::from_bytes(header.as_bytes())
            .map_err(|_| FanoutError::InvalidHeaderName(header.to_string()))?;

        Ok(ForwardVariableAsHeader {
            variable: variable.into(),
            header,
        })
    }
}

impl RequestFunction for ForwardVariableAsHeader {
    fn apply(
        &self,
        ctx: &RequestContext,
        _original: &Parts,
        replica: &mut ReplicaParts,
    ) -> Result<(), FanoutError> {
        if let Some(value) = ctx.variable(&self.variable)
            && !value.is_empty()
        {
            let value = HeaderValue::from_str(value).map_err(|e| {
                FanoutError::RequestBuild(replica.url.to_string(), e.to_string())
            })?;
            replica.headers.insert(self.header.clone(), value);
        }

        Ok(())
    }
}

/// Overwrites the replica URL's path with a literal, discarding whatever
/// path the inbound request carried.
pub struct UsePath {
    path: String,
}

impl UsePath {
    /// The path must begin with `/`; anything else is a configuration error.
    pub fn new(path: impl Into<String>) -> Result<Self, FanoutError> {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(FanoutError::InvalidPath(path));
        }

        Ok(UsePath { path })
    }
}

impl RequestFunction for UsePath {
    fn apply(
        &self,
        _ctx: &RequestContext,
        _original: &Parts,
        replica: &mut ReplicaParts,
    ) -> Result<(), FanoutError> {
        replica.url.set_path(&self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PathVariables;
    use http::Request;
    use std::collections::HashMap;

    fn original_with_headers(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/original/path");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (parts, _) = builder.body(()).unwrap().into_parts();
        parts
    }

    fn replica() -> ReplicaParts {
        ReplicaParts {
            url: Url::parse("http://downstream.example.com:8080/api/v2/device/send").unwrap(),
            headers: HeaderMap::new(),
        }
    }

    #[test]
    fn test_forward_headers() {
        struct Case {
            names: &'static [&'static str],
            expected: &'static [(&'static str, &'static str)],
        }

        let original = original_with_headers(&[
            ("X-Test-1", "foo"),
            ("X-Test-2", "foo"),
            ("X-Test-2", "bar"),
        ]);

        let cases = [
            Case {
                names: &[],
                expected: &[],
            },
            Case {
                names: &["X-Does-Not-Exist"],
                expected: &[],
            },
            Case {
                names: &["X-Does-Not-Exist", "X-Test-1"],
                expected: &[("x-test-1", "foo")],
            },
            Case {
                names: &["x-TeST-1"],
                expected: &[("x-test-1", "foo")],
            },
            Case {
                names: &["X-Test-1", "x-TesT-2"],
                expected: &[("x-test-1", "foo"), ("x-test-2", "foo"), ("x-test-2", "bar")],
            },
        ];

        for (i, case) in cases.iter().enumerate() {
            let rf = ForwardHeaders::new(case.names.iter().copied());
            let mut replica = replica();

            rf.apply(&RequestContext::default(), &original, &mut replica)
                .unwrap_or_else(|e| panic!("case {i}: {e}"));

            let actual: Vec<(String, String)> = replica
                .headers
                .iter()
                .map(|(name, value)| {
                    (name.as_str().to_string(), value.to_str().unwrap().to_string())
                })
                .collect();
            let expected: Vec<(String, String)> = case
                .expected
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect();
            assert_eq!(actual, expected, "case {i}");
        }
    }

    #[test]
    fn test_forward_variable_as_header_missing() {
        let rf = ForwardVariableAsHeader::new("test", "X-Test").unwrap();
        let original = original_with_headers(&[]);
        let mut replica = replica();

        rf.apply(&RequestContext::default(), &original, &mut replica)
            .unwrap();
        assert!(replica.headers.get("X-Test").is_none());
    }

    #[test]
    fn test_forward_variable_as_header_value() {
        let rf = ForwardVariableAsHeader::new("test", "X-Test").unwrap();

        let mut request = Request::builder().uri("/").body(()).unwrap();
        request.extensions_mut().insert(PathVariables(HashMap::from([(
            "test".to_string(),
            "foobar".to_string(),
        )])));
        let (original, _) = request.into_parts();

        let ctx = RequestContext::from_parts(&original);
        let mut replica = replica();

        rf.apply(&ctx, &original, &mut replica).unwrap();
        assert_eq!(replica.headers.get("X-Test").unwrap(), "foobar");
    }

    #[test]
    fn test_forward_variable_rejects_bad_header_name() {
        assert!(matches!(
            ForwardVariableAsHeader::new("test", "not a header"),
            Err(FanoutError::InvalidHeaderName(_))
        ));
    }

    #[test]
    fn test_use_path_rejects_relative() {
        assert!(matches!(
            UsePath::new("api/v1/device"),
            Err(FanoutError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_use_path_overwrites() {
        let rf = UsePath::new("/api/v1/device/foo/bar").unwrap();
        let original = original_with_headers(&[]);

        let starting_urls = [
            "http://foobar.com:8080/",
            "http://foobar.com:8080/original",
            "http://foobar.com:8080/something?query=1",
        ];

        for start in starting_urls {
            let mut replica = ReplicaParts {
                url: Url::parse(start).unwrap(),
                headers: HeaderMap::new(),
            };

            rf.apply(&RequestContext::default(), &original, &mut replica)
                .unwrap();
            assert_eq!(replica.url.path(), "/api/v1/device/foo/bar", "from {start}");
        }
    }
}
