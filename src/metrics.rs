//! Prometheus metrics for the package registry (spec §4.10).
//!
//! Metrics are point-in-time gauges re-read from the metadata store at
//! scrape time rather than incremented inline, since the quantities the
//! spec names (`repub_packages_total`, `repub_users_total`, ...) are store
//! aggregates, not per-request counters. Dynamic path segments (package
//! names) are never used as label values, to keep cardinality bounded.

use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct RegistryMetrics {
    registry: Registry,
    up: Gauge,
    packages_total: GaugeVec,
    versions_total: Gauge,
    users_total: Gauge,
    tokens_active: Gauge,
    downloads_total: Gauge,
    db_latency_ms: Gauge,
    db_size_bytes: Gauge,
}

impl RegistryMetrics {
    pub fn new() -> crate::error::Result<Self> {
        let registry = Registry::new();

        let up = Gauge::new("repub_up", "1 if the process is serving requests").map_err(metric_err)?;
        let packages_total = GaugeVec::new(
            Opts::new("repub_packages_total", "Number of packages by origin: hosted or upstream_cache"),
            &["type"],
        )
        .map_err(metric_err)?;
        let versions_total = Gauge::new("repub_versions_total", "Number of published package versions").map_err(metric_err)?;
        let users_total = Gauge::new("repub_users_total", "Number of registered users").map_err(metric_err)?;
        let tokens_active = Gauge::new("repub_tokens_active", "Number of non-expired access tokens").map_err(metric_err)?;
        let downloads_total = Gauge::new("repub_downloads_total", "Total recorded archive downloads").map_err(metric_err)?;
        let db_latency_ms = Gauge::new("repub_db_latency_ms", "Metadata store health-check latency").map_err(metric_err)?;
        let db_size_bytes = Gauge::new("repub_db_size_bytes", "Metadata store size on disk, if known").map_err(metric_err)?;

        for collector in [
            Box::new(up.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(packages_total.clone()),
            Box::new(versions_total.clone()),
            Box::new(users_total.clone()),
            Box::new(tokens_active.clone()),
            Box::new(downloads_total.clone()),
            Box::new(db_latency_ms.clone()),
            Box::new(db_size_bytes.clone()),
        ] {
            registry.register(collector).map_err(metric_err)?;
        }

        Ok(Self {
            registry,
            up,
            packages_total,
            versions_total,
            users_total,
            tokens_active,
            downloads_total,
            db_latency_ms,
            db_size_bytes,
        })
    }

    /// Refresh every gauge from the current store state, then render the
    /// Prometheus text exposition format.
    pub async fn render(&self, metadata: &dyn crate::metadata::MetadataStore) -> crate::error::Result<String> {
        self.up.set(1.0);

        let stats = metadata.get_admin_stats().await?;
        self.versions_total.set(stats.total_versions as f64);
        self.users_total.set(stats.total_users as f64);
        self.tokens_active.set(stats.active_tokens as f64);
        self.downloads_total.set(stats.total_downloads as f64);

        self.packages_total.with_label_values(&["hosted"]).set(stats.total_packages as f64);
        self.packages_total
            .with_label_values(&["upstream_cache"])
            .set(stats.upstream_cache_packages as f64);

        if let Ok(report) = metadata.health_check().await {
            self.db_latency_ms.set(report.latency_ms as f64);
            if let Some(bytes) = report.db_size_bytes {
                self.db_size_bytes.set(bytes as f64);
            }
        }

        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&self.registry.gather(), &mut buffer).map_err(metric_err)?;
        String::from_utf8(buffer).map_err(|e| crate::error::RegistryError::Internal(e.to_string()))
    }
}

fn metric_err(err: prometheus::Error) -> crate::error::RegistryError {
    crate::error::RegistryError::Internal(format!("metrics error: {err}"))
}

</content>
