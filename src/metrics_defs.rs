//! Metric definitions. Exporter wiring happens in the embedding service.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

pub const FANOUT_DURATION: MetricDef = MetricDef {
    name: "fanout.duration",
    metric_type: MetricType::Histogram,
    description: "Total fanout duration in seconds. Tagged with outcome.",
};

pub const REPLICA_DURATION: MetricDef = MetricDef {
    name: "fanout.replica.duration",
    metric_type: MetricType::Histogram,
    description: "Per-replica request duration in seconds. Tagged with endpoint, status.",
};

pub const BUSY_REJECTED: MetricDef = MetricDef {
    name: "fanout.busy.rejected",
    metric_type: MetricType::Counter,
    description: "Requests rejected by the process-wide busy gate",
};

pub const CONCURRENCY_REJECTED: MetricDef = MetricDef {
    name: "fanout.concurrency.rejected",
    metric_type: MetricType::Counter,
    description: "Requests rejected by the per-fanout concurrency gate",
};

pub const WEBHOOKS_LIVE: MetricDef = MetricDef {
    name: "webhooks.live",
    metric_type: MetricType::Gauge,
    description: "Number of unexpired webhook subscriptions in the store",
};

pub const ALL_METRICS: &[MetricDef] = &[
    FANOUT_DURATION,
    REPLICA_DURATION,
    BUSY_REJECTED,
    CONCURRENCY_REJECTED,
    WEBHOOKS_LIVE,
];
