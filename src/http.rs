use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use hyper::StatusCode;
use hyper::body::Bytes;
use hyper::Response;

const NOSNIFF: HeaderName = HeaderName::from_static("x-content-type-options");

/// Creates an error response with a JSON `{"message": ...}` body.
pub fn make_error_response(status_code: StatusCode, message: &str) -> Response<Bytes> {
    let body = serde_json::json!({ "message": message }).to_string();

    let mut response = Response::new(Bytes::from(body));
    *response.status_mut() = status_code;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=UTF-8"),
    );
    response
        .headers_mut()
        .insert(NOSNIFF, HeaderValue::from_static("nosniff"));
    response
}

/// Copies the named headers from `from` into `to`, replacing any values
/// already present under the same name. Names absent from `from` are
/// skipped. Matching is case-insensitive; `HeaderName` normalizes the
/// canonical form on output.
pub fn copy_headers(names: &[HeaderName], from: &HeaderMap, to: &mut HeaderMap) {
    for name in names {
        let mut values = from.get_all(name).iter().peekable();
        if values.peek().is_none() {
            continue;
        }

        to.remove(name);
        for value in values {
            to.append(name.clone(), value.clone());
        }
    }
}

/// Parses header names, dropping any that are not valid HTTP header names.
pub fn parse_header_names<I, S>(names: I) -> Vec<HeaderName>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .filter_map(|name| HeaderName::from_bytes(name.as_ref().as_bytes()).ok())
        .collect()
}
