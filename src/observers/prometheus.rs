//! Prometheus text exposition built with the official `prometheus` crate.
//!
//! Each render builds a fresh [`Registry`], registers one metric per stats
//! counter (or one labelled family per site metric), and encodes it with
//! [`TextEncoder`]. Nothing is kept between renders, so the observer can be
//! shared and called from a `/metrics` handler directly.
//!
//! ```rust
//! use hitcount::observers::prometheus::PrometheusObserver;
//! use hitcount::stats::Stats;
//!
//! let stats = Stats::new();
//! stats.flushes.add(3);
//!
//! let text = PrometheusObserver::new()
//!     .with_namespace("hitcount")
//!     .render(stats.observables().into_iter())
//!     .unwrap();
//! assert!(text.contains("hitcount_flushes_total 3"));
//! ```
//!
//! Site counts become two counter families labelled by `site`:
//!
//! ```text
//! site_visits_total{site="abc123"} 7
//! site_unique_visitors_total{site="abc123"} 4
//! ```

use std::collections::HashMap;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use super::{PrometheusError, Result};
use crate::counters::Observable;
use crate::snapshot::SiteSnapshot;

const SITE_VISITS: &str = "site_visits_total";
const SITE_UNIQUES: &str = "site_unique_visitors_total";

/// How a stats counter is exposed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MetricType {
    #[default]
    Counter,
    Gauge,
}

/// Per-metric overrides.
#[derive(Debug, Clone, Default)]
pub struct MetricConfig {
    pub metric_type: MetricType,
    pub help: Option<String>,
}

/// Renders stats and site counts in Prometheus text format.
#[derive(Debug, Clone, Default)]
pub struct PrometheusObserver {
    namespace: Option<String>,
    subsystem: Option<String>,
    const_labels: HashMap<String, String>,
    metric_configs: HashMap<String, MetricConfig>,
}

impl PrometheusObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix for every metric name, joined with `_`.
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    /// Goes between the namespace and the metric name.
    pub fn with_subsystem(mut self, subsystem: &str) -> Self {
        self.subsystem = Some(subsystem.to_string());
        self
    }

    /// Label attached to every metric, e.g. the instance name.
    pub fn with_const_label(mut self, name: &str, value: &str) -> Self {
        self.const_labels.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_metric_config(mut self, name: &str, config: MetricConfig) -> Self {
        self.metric_configs.insert(name.to_string(), config);
        self
    }

    pub fn with_type(mut self, name: &str, metric_type: MetricType) -> Self {
        self.metric_configs
            .entry(name.to_string())
            .or_default()
            .metric_type = metric_type;
        self
    }

    pub fn with_help(mut self, name: &str, help: &str) -> Self {
        self.metric_configs.entry(name.to_string()).or_default().help = Some(help.to_string());
        self
    }

    /// Maps a name onto `[a-zA-Z_:][a-zA-Z0-9_:]*`.
    fn sanitize_name(name: &str) -> String {
        let mut result: String = name
            .chars()
            .filter_map(|c| match c {
                c if c.is_ascii_alphanumeric() || c == '_' || c == ':' => Some(c),
                '-' | '.' | ' ' => Some('_'),
                _ => None,
            })
            .collect();
        if result.is_empty() {
            result.push_str("unnamed");
        }
        if result.starts_with(|c: char| c.is_ascii_digit()) {
            result.insert(0, '_');
        }
        result
    }

    fn full_name(&self, name: &str) -> String {
        let sanitized = Self::sanitize_name(name);
        match (&self.namespace, &self.subsystem) {
            (Some(ns), Some(ss)) => format!("{ns}_{ss}_{sanitized}"),
            (Some(ns), None) => format!("{ns}_{sanitized}"),
            (None, Some(ss)) => format!("{ss}_{sanitized}"),
            (None, None) => sanitized,
        }
    }

    fn opts(&self, raw_name: &str, default_help: &str) -> Opts {
        let help = self
            .metric_configs
            .get(raw_name)
            .and_then(|c| c.help.clone())
            .unwrap_or_else(|| default_help.to_string());
        Opts::new(self.full_name(raw_name), help).const_labels(self.const_labels.clone())
    }

    /// Renders stats counters.
    pub fn render<'a>(&self, counters: impl Iterator<Item = &'a dyn Observable>) -> Result<String> {
        let registry = Registry::new();

        for counter in counters {
            let raw_name = if counter.name().is_empty() {
                "unnamed"
            } else {
                counter.name()
            };
            let opts = self.opts(raw_name, &format!("{raw_name} metric"));
            let metric_type = self
                .metric_configs
                .get(raw_name)
                .map(|c| c.metric_type)
                .unwrap_or_default();

            match metric_type {
                MetricType::Counter => {
                    let metric = IntCounter::with_opts(opts)?;
                    metric.inc_by(counter.value());
                    registry.register(Box::new(metric))?;
                }
                MetricType::Gauge => {
                    let metric = IntGauge::with_opts(opts)?;
                    metric.set(i64::try_from(counter.value()).unwrap_or(i64::MAX));
                    registry.register(Box::new(metric))?;
                }
            }
        }

        encode(&registry)
    }

    /// Renders live per-site counts as two `site`-labelled counter families.
    pub fn render_sites(&self, sites: &[SiteSnapshot]) -> Result<String> {
        let registry = Registry::new();
        if sites.is_empty() {
            return encode(&registry);
        }

        let visits = IntCounterVec::new(self.opts(SITE_VISITS, "Visits per site"), &["site"])?;
        let uniques = IntCounterVec::new(
            self.opts(SITE_UNIQUES, "Unique visitors per site"),
            &["site"],
        )?;
        for site in sites {
            visits
                .with_label_values(&[site.site.as_str()])
                .inc_by(site.total);
            uniques
                .with_label_values(&[site.site.as_str()])
                .inc_by(site.unique);
        }
        registry.register(Box::new(visits))?;
        registry.register(Box::new(uniques))?;

        encode(&registry)
    }
}

fn encode(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| PrometheusError::EncodeError(e.to_string()))?;
    Ok(String::from_utf8(buffer)?)
}
