//! Single-marker KPI collection over a fixed window
//!
//! Every marker is matched against one shared subscription while the window
//! is open. Only the first occurrence of a marker counts; its value is either
//! the record timestamp or a numeric capture group of the payload.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dltkpi_core::{CorrelationError, CorrelationResult, KpiReport, LogRecord};
use tracing::{debug, info, warn};

use crate::config::SubscriptionConfig;
use crate::error::terminal_error;
use crate::matcher::{PatternMatcher, PayloadPredicate};
use crate::subscription::{StreamSubscription, WaitOptions};
use crate::transport::DltTransport;

/// Value extracted from a marker record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectValue {
    /// Record timestamp in seconds
    Timestamp,
    /// Named capture group parsed as a number
    Capture(String),
}

/// A single-marker KPI
#[derive(Debug, Clone)]
pub struct CollectSpec {
    pub name: String,
    pub matcher: PatternMatcher,
    pub value: CollectValue,
    pub threshold: Option<f64>,
}

impl CollectSpec {
    pub fn timestamp(name: impl Into<String>, matcher: PatternMatcher) -> Self {
        Self {
            name: name.into(),
            matcher,
            value: CollectValue::Timestamp,
            threshold: None,
        }
    }

    pub fn capture(name: impl Into<String>, matcher: PatternMatcher, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            matcher,
            value: CollectValue::Capture(group.into()),
            threshold: None,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    fn extract(&self, record: &LogRecord) -> Option<f64> {
        let matched = self.matcher.matches(record)?;
        match &self.value {
            CollectValue::Timestamp => Some(record.timestamp),
            CollectValue::Capture(group) => {
                let raw = matched.captures.get(group)?;
                match raw.trim().parse::<f64>() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!(kpi = %self.name, %group, value = %raw, "Captured value is not numeric");
                        None
                    }
                }
            }
        }
    }
}

/// Values collected during one window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionOutcome {
    pub values: BTreeMap<String, f64>,
    /// Markers not observed in the window
    pub missing: Vec<String>,
}

impl CollectionOutcome {
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Report of a collected value, `None` if it was not observed
    pub fn report(&self, name: &str, threshold: Option<f64>) -> Option<KpiReport> {
        self.value(name)
            .map(|value| KpiReport::from_duration(name, value, threshold))
    }

    /// Difference `to - from` of two collected values
    ///
    /// Returns `Ok(None)` when either value is missing and `ClockAnomaly`
    /// when `to` precedes `from`.
    pub fn derive(
        &self,
        name: &str,
        from: &str,
        to: &str,
        threshold: Option<f64>,
    ) -> CorrelationResult<Option<KpiReport>> {
        match (self.value(from), self.value(to)) {
            (Some(begin), Some(end)) => KpiReport::from_window(name, begin, end, threshold).map(Some),
            _ => Ok(None),
        }
    }
}

/// Collects a set of single-marker KPIs from one subscription
#[derive(Debug, Clone)]
pub struct MarkerCollector {
    specs: Vec<CollectSpec>,
    subscription: SubscriptionConfig,
}

impl MarkerCollector {
    pub fn new(specs: Vec<CollectSpec>) -> CorrelationResult<Self> {
        for spec in &specs {
            if !spec.matcher.is_bound() {
                return Err(CorrelationError::configuration(format!(
                    "Marker of '{}' is an unbound template",
                    spec.name
                )));
            }
            if let CollectValue::Capture(group) = &spec.value {
                // custom predicates declare no groups up front
                let declared = !matches!(spec.matcher.predicate(), PayloadPredicate::Custom(_));
                if declared && !spec.matcher.capture_names().contains(group) {
                    return Err(CorrelationError::configuration(format!(
                        "Marker of '{}' has no capture group '{}'",
                        spec.name, group
                    )));
                }
            }
        }
        Ok(Self {
            specs,
            subscription: SubscriptionConfig::default(),
        })
    }

    pub fn subscription(mut self, config: SubscriptionConfig) -> Self {
        self.subscription = config;
        self
    }

    pub fn specs(&self) -> &[CollectSpec] {
        &self.specs
    }

    /// Observe the stream for `window` and extract every marker's value
    pub async fn collect(
        &self,
        transport: Arc<dyn DltTransport>,
        window: Duration,
    ) -> CorrelationResult<CollectionOutcome> {
        let filters = self.specs.iter().map(|s| s.matcher.filter_pair()).collect();
        let subscription = StreamSubscription::open(transport, filters, self.subscription.clone())
            .await
            .map_err(|e| terminal_error(e).unwrap_or(CorrelationError::Cancelled))?;

        info!(markers = self.specs.len(), ?window, "Collecting markers");

        let records = subscription
            .wait_for(
                |record| self.specs.iter().any(|s| s.matcher.matches(record).is_some()),
                &WaitOptions::collect(window),
            )
            .await
            .map_err(|e| terminal_error(e).unwrap_or(CorrelationError::Cancelled))?;
        subscription.close();

        Ok(self.evaluate(&records))
    }

    /// Extract values from already received records
    pub fn evaluate(&self, records: &[Arc<LogRecord>]) -> CollectionOutcome {
        let mut outcome = CollectionOutcome::default();
        for spec in &self.specs {
            match records.iter().find_map(|record| spec.extract(record)) {
                Some(value) => {
                    debug!(kpi = %spec.name, value, "Marker collected");
                    outcome.values.insert(spec.name.clone(), value);
                }
                None => {
                    warn!(kpi = %spec.name, marker = %spec.matcher, "Marker not observed");
                    outcome.missing.push(spec.name.clone());
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Captures;
    use crate::transport::mock::MockTransport;
    use pretty_assertions::assert_eq;

    fn specs() -> Vec<CollectSpec> {
        vec![
            CollectSpec::timestamp(
                "boot_nsm",
                PatternMatcher::regex("NSM", "NSMC", "Full operation").unwrap(),
            ),
            CollectSpec::capture(
                "hmi_ready_ms",
                PatternMatcher::regex("HMI", "STRT", r"ready after (?P<ms>\d+) ms").unwrap(),
                "ms",
            ),
            CollectSpec::timestamp(
                "apps_started",
                PatternMatcher::regex("ALD", "LCAT", "Apps started").unwrap(),
            ),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_takes_first_occurrence() {
        let transport = Arc::new(MockTransport::default());
        let collector = MarkerCollector::new(specs()).unwrap();

        let t = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            t.inject_all([
                LogRecord::new(12.5, "NSM", "NSMC", "Full operation"),
                LogRecord::new(13.0, "HMI", "STRT", "ready after 830 ms"),
                LogRecord::new(14.0, "NSM", "NSMC", "Full operation"),
            ]);
        });

        let outcome = collector
            .collect(transport.clone(), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(outcome.value("boot_nsm"), Some(12.5));
        assert_eq!(outcome.value("hmi_ready_ms"), Some(830.0));
        assert_eq!(outcome.missing, vec!["apps_started".to_string()]);
        assert!(transport.active_registrations().is_empty());
    }

    #[test]
    fn test_derive_difference() {
        let mut outcome = CollectionOutcome::default();
        outcome.values.insert("a".into(), 10.0);
        outcome.values.insert("b".into(), 12.5);

        let report = outcome.derive("a_to_b", "a", "b", Some(3.0)).unwrap().unwrap();
        assert_eq!(report.measured_duration, 2.5);
        assert!(report.passed);

        assert!(outcome.derive("x", "a", "missing", None).unwrap().is_none());
        assert!(matches!(
            outcome.derive("back", "b", "a", None),
            Err(CorrelationError::ClockAnomaly { .. })
        ));
    }

    #[test]
    fn test_unknown_capture_group_is_rejected() {
        let spec = CollectSpec::capture(
            "bad",
            PatternMatcher::regex("A", "B", r"value (?P<v>\d+)").unwrap(),
            "w",
        );
        assert!(matches!(
            MarkerCollector::new(vec![spec]),
            Err(CorrelationError::Configuration(_))
        ));
    }

    #[test]
    fn test_capture_from_regex_without_groups_is_rejected() {
        let spec = CollectSpec::capture(
            "x",
            PatternMatcher::regex("A", "B", r"value \d+").unwrap(),
            "v",
        );
        assert!(matches!(
            MarkerCollector::new(vec![spec]),
            Err(CorrelationError::Configuration(_))
        ));
    }

    #[test]
    fn test_custom_predicate_capture_is_accepted() {
        let matcher = PatternMatcher::custom("A", "B", |payload| {
            let value = payload.strip_prefix("value ")?;
            Some(Captures::from([("v".to_string(), value.to_string())]))
        });
        let collector = MarkerCollector::new(vec![CollectSpec::capture("x", matcher, "v")]).unwrap();

        let outcome = collector.evaluate(&[Arc::new(LogRecord::new(1.0, "A", "B", "value 42"))]);
        assert_eq!(outcome.value("x"), Some(42.0));
    }

    #[test]
    fn test_non_numeric_capture_is_missing() {
        let collector = MarkerCollector::new(vec![CollectSpec::capture(
            "version",
            PatternMatcher::regex("SYS", "VER", r"version (?P<v>\S+)").unwrap(),
            "v",
        )])
        .unwrap();

        let outcome = collector.evaluate(&[Arc::new(LogRecord::new(1.0, "SYS", "VER", "version abc"))]);
        assert_eq!(outcome.missing, vec!["version".to_string()]);
    }
}
