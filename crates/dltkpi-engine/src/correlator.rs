//! Correlation of a start and an end event into a latency window
//!
//! The correlator owns one [`StreamSubscription`] filtered on both matchers.
//! `begin_timestamp` and `end_timestamp` each run a bounded retry loop of
//! `wait_for` calls and resolve to the earliest matching record returned by
//! the successful attempt.
//!
//! ```text
//! Idle ──begin──▶ AwaitingStart ──▶ Started ──end──▶ AwaitingEnd ──▶ Completed
//!                      │                                  │
//!                      └──────────────▶ Failed ◀──────────┘
//! ```

use std::fmt;
use std::sync::Arc;

use dltkpi_core::{
    CorrelationError, CorrelationResult, CorrelationWindow, EventKind, FilterPair, KpiReport,
    LogRecord,
};
use tracing::{debug, info, warn};

use crate::config::{RetryPolicy, SubscriptionConfig};
use crate::error::terminal_error;
use crate::matcher::{Captures, PatternMatcher};
use crate::subscription::{CloseHandle, StreamSubscription, WaitOptions};
use crate::transport::DltTransport;

/// Lifecycle of a correlator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelatorState {
    Idle,
    AwaitingStart,
    Started,
    AwaitingEnd,
    Completed,
    Failed,
}

impl fmt::Display for CorrelatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CorrelatorState::Idle => "IDLE",
            CorrelatorState::AwaitingStart => "AWAITING_START",
            CorrelatorState::Started => "STARTED",
            CorrelatorState::AwaitingEnd => "AWAITING_END",
            CorrelatorState::Completed => "COMPLETED",
            CorrelatorState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Builder for [`EventCorrelator`]
#[derive(Debug, Clone)]
pub struct CorrelatorBuilder {
    start: PatternMatcher,
    end: PatternMatcher,
    predict_fields: Vec<String>,
    retry: RetryPolicy,
    subscription: SubscriptionConfig,
}

impl CorrelatorBuilder {
    /// Fields copied from the start captures into the end matcher
    ///
    /// Defaults to the placeholders of the end template.
    pub fn predict_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.predict_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn subscription(mut self, config: SubscriptionConfig) -> Self {
        self.subscription = config;
        self
    }

    /// Open the subscription on both matchers' filters
    pub async fn open(self, transport: Arc<dyn DltTransport>) -> CorrelationResult<EventCorrelator> {
        if self.retry.attempts == 0 {
            return Err(CorrelationError::configuration(
                "Retry policy needs at least one attempt",
            ));
        }

        let predict_fields = if self.predict_fields.is_empty() {
            self.end.required_fields().to_vec()
        } else {
            self.predict_fields
        };
        if let Some(field) = self
            .end
            .required_fields()
            .iter()
            .find(|f| !predict_fields.contains(f))
        {
            return Err(CorrelationError::configuration(format!(
                "End template placeholder '{}' is not a predicted field",
                field
            )));
        }

        let filters: Vec<FilterPair> = vec![self.start.filter_pair(), self.end.filter_pair()];
        let subscription = StreamSubscription::open(transport, filters, self.subscription)
            .await
            .map_err(|e| terminal_error(e).unwrap_or(CorrelationError::Cancelled))?;

        debug!(
            start = %self.start,
            end = %self.end,
            ?predict_fields,
            attempts = self.retry.attempts,
            "Event correlator opened"
        );

        Ok(EventCorrelator {
            start: self.start,
            end: self.end,
            predict_fields,
            retry: self.retry,
            subscription,
            state: CorrelatorState::Idle,
            start_record: None,
            start_captures: Captures::new(),
            end_record: None,
        })
    }
}

/// Measures the time between a start and an end event of a live log stream
pub struct EventCorrelator {
    start: PatternMatcher,
    end: PatternMatcher,
    predict_fields: Vec<String>,
    retry: RetryPolicy,
    subscription: StreamSubscription,
    state: CorrelatorState,
    start_record: Option<Arc<LogRecord>>,
    start_captures: Captures,
    end_record: Option<Arc<LogRecord>>,
}

impl EventCorrelator {
    pub fn builder(start: PatternMatcher, end: PatternMatcher) -> CorrelatorBuilder {
        CorrelatorBuilder {
            start,
            end,
            predict_fields: Vec::new(),
            retry: RetryPolicy::default(),
            subscription: SubscriptionConfig::default(),
        }
    }

    /// Resolve the start event and return its timestamp
    pub async fn begin_timestamp(&mut self) -> CorrelationResult<f64> {
        if self.state != CorrelatorState::Idle {
            return Err(CorrelationError::sequence(format!(
                "begin_timestamp() requires state IDLE, correlator is {}",
                self.state
            )));
        }

        self.state = CorrelatorState::AwaitingStart;
        let result = self.await_event(EventKind::Start, &self.start).await;
        match result {
            Ok(record) => {
                let captures = self
                    .start
                    .matches(&record)
                    .map(|m| m.captures)
                    .unwrap_or_default();
                info!(timestamp = record.timestamp, pattern = %self.start, "Start event observed");
                let timestamp = record.timestamp;
                self.start_captures = captures;
                self.start_record = Some(record);
                self.state = CorrelatorState::Started;
                Ok(timestamp)
            }
            Err(err) => {
                self.state = CorrelatorState::Failed;
                Err(err)
            }
        }
    }

    /// Resolve the end event and return its timestamp
    ///
    /// When fields are propagated, the end matcher is bound to the values
    /// captured by the start event first.
    pub async fn end_timestamp(&mut self) -> CorrelationResult<f64> {
        if self.state != CorrelatorState::Started {
            return Err(CorrelationError::sequence(format!(
                "end_timestamp() requires state STARTED, correlator is {}",
                self.state
            )));
        }

        let end = match self.bound_end_matcher() {
            Ok(end) => end,
            Err(err) => {
                self.state = CorrelatorState::Failed;
                return Err(err);
            }
        };

        self.state = CorrelatorState::AwaitingEnd;
        let result = self.await_event(EventKind::End, &end).await;
        match result {
            Ok(record) => {
                info!(timestamp = record.timestamp, pattern = %end, "End event observed");
                let timestamp = record.timestamp;
                self.end_record = Some(record);
                self.state = CorrelatorState::Completed;
                Ok(timestamp)
            }
            Err(err) => {
                self.state = CorrelatorState::Failed;
                Err(err)
            }
        }
    }

    /// Resolve both events and report their distance against `threshold`
    pub async fn measure(
        &mut self,
        kpi_name: &str,
        threshold: Option<f64>,
    ) -> CorrelationResult<KpiReport> {
        self.begin_timestamp().await?;
        self.end_timestamp().await?;
        let report = KpiReport::from_correlator(self, kpi_name, threshold)?;
        info!(
            kpi = %report.kpi_name,
            duration = report.measured_duration,
            threshold = ?report.threshold,
            passed = report.passed,
            "KPI measured"
        );
        Ok(report)
    }

    fn bound_end_matcher(&self) -> CorrelationResult<PatternMatcher> {
        if self.predict_fields.is_empty() {
            return Ok(self.end.clone());
        }

        let mut selected = Captures::new();
        for field in &self.predict_fields {
            let value = self.start_captures.get(field).ok_or_else(|| {
                CorrelationError::configuration(format!(
                    "Field '{}' was not captured by the start event ({})",
                    field, self.start
                ))
            })?;
            selected.insert(field.clone(), value.clone());
        }

        let bound = self.end.bind(&selected)?;
        debug!(end = %bound, "End matcher bound to start captures");
        Ok(bound)
    }

    async fn await_event(
        &self,
        event: EventKind,
        matcher: &PatternMatcher,
    ) -> CorrelationResult<Arc<LogRecord>> {
        let options = WaitOptions::new(self.retry.attempt_timeout());
        let attempts = self.retry.attempts;

        for attempt in 1..=attempts {
            let result = self
                .subscription
                .wait_for(|record| matcher.matches(record).is_some(), &options)
                .await;

            match result {
                Ok(records) => {
                    if let Some(record) = earliest(records) {
                        return Ok(record);
                    }
                }
                Err(err) => {
                    if let Some(terminal) = terminal_error(err) {
                        warn!(%event, error = %terminal, "Waiting for event aborted");
                        return Err(terminal);
                    }
                    debug!(%event, attempt, attempts, pattern = %matcher, "Attempt timed out");
                }
            }

            if attempt < attempts {
                let delay = self.retry.delay_after(attempt);
                if !delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.subscription.closed() => {
                            warn!(%event, "Waiting for event aborted during backoff");
                            return Err(CorrelationError::Cancelled);
                        }
                    }
                }
            }
        }

        let observed = self.dump_diagnostics(event, matcher, attempts);
        Err(CorrelationError::EventNotObserved {
            event,
            pattern: matcher.describe(),
            attempts,
            observed,
        })
    }

    fn dump_diagnostics(
        &self,
        event: EventKind,
        matcher: &PatternMatcher,
        attempts: u32,
    ) -> Vec<Arc<LogRecord>> {
        let observed = self.subscription.observed();
        warn!(
            %event,
            pattern = %matcher,
            attempts,
            observed = observed.len(),
            "Event not observed, received records follow"
        );
        for record in &observed {
            debug!("{}", record);
        }
        observed
    }

    pub fn state(&self) -> CorrelatorState {
        self.state
    }

    pub fn start_record(&self) -> Option<&Arc<LogRecord>> {
        self.start_record.as_ref()
    }

    pub fn end_record(&self) -> Option<&Arc<LogRecord>> {
        self.end_record.as_ref()
    }

    /// Captures of the start event, empty before it was observed
    pub fn start_captures(&self) -> &Captures {
        &self.start_captures
    }

    /// Handle that cancels in-flight waits from another task
    pub fn cancel_handle(&self) -> CloseHandle {
        self.subscription.close_handle()
    }

    /// Release the subscription. Idempotent; also happens on drop.
    pub fn close(&self) {
        self.subscription.close();
    }
}

impl CorrelationWindow for EventCorrelator {
    fn window(&self) -> CorrelationResult<(f64, f64)> {
        match (self.state, &self.start_record, &self.end_record) {
            (CorrelatorState::Completed, Some(start), Some(end)) => {
                Ok((start.timestamp, end.timestamp))
            }
            _ => Err(CorrelationError::sequence(format!(
                "KPI report requires a COMPLETED correlator, state is {}",
                self.state
            ))),
        }
    }
}

/// Record with the smallest timestamp; the first arrival wins ties
fn earliest(records: Vec<Arc<LogRecord>>) -> Option<Arc<LogRecord>> {
    records.into_iter().reduce(|best, record| {
        if record.timestamp.total_cmp(&best.timestamp).is_lt() {
            record
        } else {
            best
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::Backoff;
    use crate::transport::mock::MockTransport;

    fn quick_retry() -> RetryPolicy {
        RetryPolicy::new(2, Duration::from_millis(50), Backoff::None)
    }

    async fn correlator(transport: &Arc<MockTransport>) -> EventCorrelator {
        EventCorrelator::builder(
            PatternMatcher::regex("ALD", "LCAT", "Click command").unwrap(),
            PatternMatcher::regex("NAV", "RGC", "ready").unwrap(),
        )
        .retry(quick_retry())
        .open(transport.clone())
        .await
        .unwrap()
    }

    #[test]
    fn test_earliest_prefers_first_arrival_on_ties() {
        let a = Arc::new(LogRecord::new(5.0, "A", "B", "first"));
        let b = Arc::new(LogRecord::new(5.0, "A", "B", "second"));
        let c = Arc::new(LogRecord::new(7.0, "A", "B", "late"));

        let best = earliest(vec![c, a, b]).unwrap();
        assert_eq!(best.payload, "first");
        assert!(earliest(Vec::new()).is_none());
    }

    #[tokio::test]
    async fn test_filters_are_deduplicated_union() {
        let transport = Arc::new(MockTransport::default());
        let _correlator = EventCorrelator::builder(
            PatternMatcher::regex("NAV", "RGC", "start").unwrap(),
            PatternMatcher::regex("NAV", "RGC", "end").unwrap(),
        )
        .open(transport.clone())
        .await
        .unwrap();

        assert_eq!(
            transport.active_registrations(),
            vec![vec![FilterPair::new("NAV", "RGC")]]
        );
    }

    #[tokio::test]
    async fn test_end_before_begin_is_sequence_error() {
        let transport = Arc::new(MockTransport::default());
        let mut correlator = correlator(&transport).await;
        transport.inject(LogRecord::new(1.0, "NAV", "RGC", "ready"));

        let err = correlator.end_timestamp().await.unwrap_err();
        assert!(matches!(err, CorrelationError::Sequence(_)));
        assert_eq!(correlator.state(), CorrelatorState::Idle);
    }

    #[tokio::test]
    async fn test_report_from_unfinished_correlator_is_sequence_error() {
        let transport = Arc::new(MockTransport::default());
        let correlator = correlator(&transport).await;

        let err = KpiReport::from_correlator(&correlator, "kpi", Some(1.0)).unwrap_err();
        assert!(matches!(err, CorrelationError::Sequence(_)));
    }

    #[tokio::test]
    async fn test_begin_twice_is_sequence_error() {
        let transport = Arc::new(MockTransport::default());
        let mut correlator = correlator(&transport).await;
        transport.inject(LogRecord::new(1.0, "ALD", "LCAT", "Click command"));

        correlator.begin_timestamp().await.unwrap();
        let err = correlator.begin_timestamp().await.unwrap_err();
        assert!(matches!(err, CorrelationError::Sequence(_)));
        assert_eq!(correlator.state(), CorrelatorState::Started);
    }

    #[tokio::test]
    async fn test_missing_predicted_field_fails_without_waiting() {
        let transport = Arc::new(MockTransport::default());
        let mut correlator = EventCorrelator::builder(
            PatternMatcher::regex("NAV", "RGC", r"request(?: id=(?P<id>\d+))?").unwrap(),
            PatternMatcher::template("NAV", "RGC", r"response id=${id}").unwrap(),
        )
        .retry(quick_retry())
        .open(transport.clone())
        .await
        .unwrap();

        transport.inject(LogRecord::new(1.0, "NAV", "RGC", "request"));
        correlator.begin_timestamp().await.unwrap();

        let err = correlator.end_timestamp().await.unwrap_err();
        assert!(matches!(err, CorrelationError::Configuration(ref msg) if msg.contains("'id'")));
        assert_eq!(correlator.state(), CorrelatorState::Failed);
    }

    #[tokio::test]
    async fn test_unpredicted_template_placeholder_is_rejected() {
        let transport = Arc::new(MockTransport::default());
        let result = EventCorrelator::builder(
            PatternMatcher::regex("NAV", "RGC", r"request (?P<id>\d+)").unwrap(),
            PatternMatcher::template("NAV", "RGC", r"response ${id} ${session}").unwrap(),
        )
        .predict_fields(["id"])
        .open(transport.clone())
        .await;

        assert!(matches!(result, Err(CorrelationError::Configuration(_))));
        assert!(transport.active_registrations().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_handle_interrupts_wait() {
        let transport = Arc::new(MockTransport::default());
        let mut correlator = EventCorrelator::builder(
            PatternMatcher::regex("ALD", "LCAT", "Click").unwrap(),
            PatternMatcher::regex("ALD", "LCAT", "Done").unwrap(),
        )
        .retry(RetryPolicy::new(10, Duration::from_secs(30), Backoff::None))
        .open(transport.clone())
        .await
        .unwrap();

        let handle = correlator.cancel_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.close();
        });

        let err = correlator.begin_timestamp().await.unwrap_err();
        assert!(matches!(err, CorrelationError::Cancelled));
        assert_eq!(correlator.state(), CorrelatorState::Failed);
        assert!(transport.active_registrations().is_empty());
    }

    #[tokio::test]
    async fn test_zero_attempts_is_rejected() {
        let transport = Arc::new(MockTransport::default());
        let result = EventCorrelator::builder(
            PatternMatcher::regex("A", "B", "x").unwrap(),
            PatternMatcher::regex("A", "B", "y").unwrap(),
        )
        .retry(RetryPolicy::new(0, Duration::from_secs(1), Backoff::None))
        .open(transport)
        .await;
        assert!(matches!(result, Err(CorrelationError::Configuration(_))));
    }
}
