//! Prometheus registry behind `/metrics`
use flotilla_engine::EngineGroup;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct HostMetrics {
    registry: Registry,
    live_engines: IntGauge,
    init_failures: IntGauge,
    http_requests: IntCounterVec,
}

impl HostMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let live_engines = IntGauge::new("flotilla_live_engines", "Engine contexts not yet destroyed")?;
        let init_failures = IntGauge::new(
            "flotilla_module_init_failures",
            "Module init failures recorded across live engines",
        )?;
        let http_requests = IntCounterVec::new(
            Opts::new("flotilla_http_requests_total", "Status API requests"),
            &["method", "status"],
        )?;

        registry.register(Box::new(live_engines.clone()))?;
        registry.register(Box::new(init_failures.clone()))?;
        registry.register(Box::new(http_requests.clone()))?;

        Ok(Self {
            registry,
            live_engines,
            init_failures,
            http_requests,
        })
    }

    /// Refresh the gauges from the group's current state
    pub fn observe(&self, group: &EngineGroup) {
        let live = group.live_labels();
        let failures: usize = live
            .iter()
            .filter_map(|label| group.get(label))
            .map(|ctx| ctx.init_report().failures.len())
            .sum();
        self.live_engines.set(live.len() as i64);
        self.init_failures.set(failures as i64);
    }

    pub fn count_request(&self, method: &str, status: u16) {
        self.http_requests
            .with_label_values(&[method, &status.to_string()])
            .inc();
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }
}
