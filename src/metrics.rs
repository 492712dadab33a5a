use prometheus::{Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use std::sync::Arc;

pub struct Metrics {
    pub holdings_queries: Counter,
    pub activity_queries: Counter,
    pub withdrawals_submitted: Counter,
    pub withdrawals_confirmed: Counter,
    pub withdrawals_failed: CounterVec,
    /// Failures categorised by matching error text instead of a structured code.
    pub classifier_text_fallbacks: Counter,
    pub withdrawal_duration: Histogram,
    pub registry: Registry,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<Counter, prometheus::Error> {
    let c = Counter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let holdings_queries = counter(&registry, "holdings_queries_total", "Total number of holdings queries")?;
        let activity_queries = counter(&registry, "activity_queries_total", "Total number of activity queries")?;
        let withdrawals_submitted =
            counter(&registry, "withdrawals_submitted_total", "Withdrawals broadcast to the ledger")?;
        let withdrawals_confirmed =
            counter(&registry, "withdrawals_confirmed_total", "Withdrawals observed as confirmed")?;
        let classifier_text_fallbacks = counter(
            &registry,
            "classifier_text_fallbacks_total",
            "Failures classified from error text",
        )?;

        let withdrawals_failed = CounterVec::new(
            Opts::new("withdrawals_failed_total", "Failed withdrawals by category"),
            &["category"],
        )?;
        registry.register(Box::new(withdrawals_failed.clone()))?;

        let withdrawal_duration_opts = HistogramOpts::new(
            "withdrawal_duration_seconds",
            "Time from build to terminal state in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]);
        let withdrawal_duration = Histogram::with_opts(withdrawal_duration_opts)?;
        registry.register(Box::new(withdrawal_duration.clone()))?;

        Ok(Arc::new(Self {
            holdings_queries,
            activity_queries,
            withdrawals_submitted,
            withdrawals_confirmed,
            withdrawals_failed,
            classifier_text_fallbacks,
            withdrawal_duration,
            registry,
        }))
    }

    /// Prometheus text exposition of everything in this registry.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
