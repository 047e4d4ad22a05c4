use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

#[derive(Debug, Default)]
pub struct RelayMetrics {
    checks_total: AtomicU64,
    checks_failed_total: AtomicU64,
    credential_rejections_total: AtomicU64,
    fragments_total: AtomicU64,
    total_open_latency_millis: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub checks_total: u64,
    pub checks_failed_total: u64,
    pub credential_rejections_total: u64,
    pub fragments_total: u64,
    pub avg_open_latency_millis: f64,
}

impl RelayMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_check(&self) {
        self.checks_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failure(&self) {
        self.checks_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_credential_rejection(&self) {
        self.credential_rejections_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fragment(&self) {
        self.fragments_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Time from check start until the response stream was open.
    pub fn observe_open_latency(&self, duration: Duration) {
        self.total_open_latency_millis
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let checks = self.checks_total.load(Ordering::Relaxed);
        let failed = self.checks_failed_total.load(Ordering::Relaxed);
        let latency = self.total_open_latency_millis.load(Ordering::Relaxed);
        let opened = checks.saturating_sub(failed);

        MetricsSnapshot {
            checks_total: checks,
            checks_failed_total: failed,
            credential_rejections_total: self.credential_rejections_total.load(Ordering::Relaxed),
            fragments_total: self.fragments_total.load(Ordering::Relaxed),
            avg_open_latency_millis: if opened == 0 {
                0.0
            } else {
                latency as f64 / opened as f64
            },
        }
    }
}

pub fn init_tracing(service_name: &str) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}=info,plancheck_api=info,plancheck_relay=info",
                service_name
            ))
        });

        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(true)
            .init();
    });
}
