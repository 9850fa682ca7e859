use std::time::{Duration, Instant};

/// Observability record for one replica attempt. Losing replicas still
/// produce spans; a fanout over N endpoints yields exactly N of them.
#[derive(Clone, Debug)]
pub struct Span {
    pub endpoint: String,
    pub duration: Duration,
    pub error: Option<String>,
}

impl Span {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Factory for span records scoped to a fanout.
#[derive(Clone, Debug, Default)]
pub struct Spanner;

impl Spanner {
    /// Starts timing an attempt against the named endpoint.
    pub fn start(&self, endpoint: &str) -> SpanTimer {
        SpanTimer {
            endpoint: endpoint.to_string(),
            start: Instant::now(),
        }
    }
}

/// An in-flight span; finish it to obtain the record.
pub struct SpanTimer {
    endpoint: String,
    start: Instant,
}

impl SpanTimer {
    pub fn finish(self, error: Option<String>) -> Span {
        Span {
            endpoint: self.endpoint,
            duration: self.start.elapsed(),
            error,
        }
    }
}
