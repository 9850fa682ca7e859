use http::request::Parts;
use std::collections::HashMap;

/// Path variables extracted by the embedding router, carried as a request
/// extension. The decoder copies them into the [`RequestContext`] so request
/// functions can read them without touching the original request again.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PathVariables(pub HashMap<String, String>);

/// Request-scoped values that travel alongside a fanout.
///
/// Immutable once the fanout is dispatched; every replica observes the same
/// context.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    variables: HashMap<String, String>,
}

impl RequestContext {
    /// Builds a context from the inbound request parts, picking up any
    /// [`PathVariables`] extension the router installed.
    pub fn from_parts(parts: &Parts) -> Self {
        let variables = parts
            .extensions
            .get::<PathVariables>()
            .map(|v| v.0.clone())
            .unwrap_or_default();

        RequestContext { variables }
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    /// Adds a variable, mostly useful in tests and custom middleware.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }
}
