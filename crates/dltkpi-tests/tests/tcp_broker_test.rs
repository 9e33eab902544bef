//! Correlation over a TCP line broker
//!
//! A local `LineBroker` stands in for the target's DLT broker; records are
//! streamed as ASCII or JSON lines and decoded by `TcpTransport`.

use std::sync::Arc;
use std::time::Duration;

use dltkpi_core::{CorrelationError, LogRecord};
use dltkpi_engine::config::{Backoff, LineFormat, RetryPolicy, TcpConfig};
use dltkpi_engine::correlator::{CorrelatorState, EventCorrelator};
use dltkpi_engine::matcher::PatternMatcher;
use dltkpi_engine::transport::tcp::TcpTransport;
use dltkpi_engine::transport::DltTransport;
use dltkpi_tests::{ascii_line, LineBroker};
use pretty_assertions::assert_eq;

async fn connect(broker: &LineBroker, format: LineFormat) -> Arc<dyn DltTransport> {
    let config = TcpConfig {
        address: broker.address(),
        format,
        connect_timeout_ms: 2000,
    };
    Arc::new(TcpTransport::connect(&config).await.unwrap())
}

fn click_to_route() -> (PatternMatcher, PatternMatcher) {
    (
        PatternMatcher::regex("ALD", "LCAT", r"Click command handle=(?P<handle>\d+)").unwrap(),
        PatternMatcher::template("NAV", "RGC", r"route calculated handle=${handle}").unwrap(),
    )
}

fn quick_retry() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(500), Backoff::None)
}

#[tokio::test]
async fn test_measure_over_ascii_lines() {
    let mut broker = LineBroker::start().await.unwrap();
    let transport = connect(&broker, LineFormat::Ascii).await;
    broker.wait_for_clients(1).await;

    let (start, end) = click_to_route();
    let mut correlator = EventCorrelator::builder(start, end)
        .retry(quick_retry())
        .open(transport)
        .await
        .unwrap();

    let records = [
        LogRecord::new(100.0, "ALD", "LCAT", "Click command handle=4"),
        LogRecord::new(100.5, "NAV", "RGC", "route calculated handle=9"),
        LogRecord::new(101.25, "NAV", "RGC", "route calculated handle=4"),
    ];
    for (i, record) in records.iter().enumerate() {
        broker.send_line(&ascii_line(i as u32, record));
    }

    let report = correlator.measure("click_to_route", Some(2.0)).await.unwrap();
    assert!((report.measured_duration - 1.25).abs() < 1e-6);
    assert!(report.passed);
    assert_eq!(correlator.state(), CorrelatorState::Completed);
}

#[tokio::test]
async fn test_measure_over_json_lines() {
    let mut broker = LineBroker::start().await.unwrap();
    let transport = connect(&broker, LineFormat::Json).await;
    broker.wait_for_clients(1).await;

    let mut correlator = EventCorrelator::builder(
        PatternMatcher::regex("ALD", "LCAT", "Click command").unwrap(),
        PatternMatcher::regex("NAV", "RGC", "view ready").unwrap(),
    )
    .retry(quick_retry())
    .open(transport)
    .await
    .unwrap();

    broker.send_json(&LogRecord::new(5.0, "ALD", "LCAT", "Click command"));
    broker.send_line("not a json record");
    broker.send_line(r#"{"tmsp": 9.5, "apid": "NAV", "ctid": "RGC", "payload_decoded": "view ready"}"#);

    let report = correlator.measure("click_to_view", Some(3.0)).await.unwrap();
    assert_eq!(report.measured_duration, 4.5);
    assert!(!report.passed);
}

#[tokio::test]
async fn test_broker_shutdown_is_connection_error() {
    let mut broker = LineBroker::start().await.unwrap();
    let transport = connect(&broker, LineFormat::Ascii).await;
    broker.wait_for_clients(1).await;

    let mut correlator = EventCorrelator::builder(
        PatternMatcher::regex("ALD", "LCAT", "Click command").unwrap(),
        PatternMatcher::regex("NAV", "RGC", "view ready").unwrap(),
    )
    .retry(RetryPolicy::new(5, Duration::from_secs(2), Backoff::None))
    .open(transport.clone())
    .await
    .unwrap();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        broker.shutdown();
    });

    let started = std::time::Instant::now();
    let err = correlator.begin_timestamp().await.unwrap_err();
    assert!(matches!(err, CorrelationError::Connection(_)), "got {:?}", err);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(correlator.state(), CorrelatorState::Failed);
    assert!(!transport.is_connected().await);
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    let broker = LineBroker::start().await.unwrap();
    let address = broker.address();
    broker.shutdown();
    // Give the runtime a moment to drop the listener
    tokio::time::sleep(Duration::from_millis(50)).await;

    let config = TcpConfig {
        address,
        format: LineFormat::Ascii,
        connect_timeout_ms: 500,
    };
    assert!(TcpTransport::connect(&config).await.is_err());
}
