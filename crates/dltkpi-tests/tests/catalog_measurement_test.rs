//! Catalog-driven measurements
//!
//! Loads a catalog from disk the way the CLI does and runs its KPIs against
//! the mock transport and recorded traces.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dltkpi_core::{CorrelationError, KpiReport, LogRecord};
use dltkpi_engine::catalog::KpiCatalog;
use dltkpi_engine::config::{LineFormat, ReplayConfig, TransportConfig};
use dltkpi_engine::export::CsvSink;
use dltkpi_engine::transport::create_transport;
use dltkpi_engine::transport::mock::MockTransport;
use dltkpi_tests::write_recording;
use pretty_assertions::assert_eq;
use rstest::rstest;

const CATALOG: &str = r#"
default_threshold = 60.0

[markers.click]
apid = "ALD"
ctid = "LCAT"
pattern = 'Click command on (?P<button>\w+) handle=(?P<handle>\d+)'

[markers.route_done]
apid = "NAV"
ctid = "RGC"
template = 'route calculated handle=${handle}'

[markers.systemd]
apid = "SYS"
ctid = "JOUR"
pattern = 'Startup finished'

[markers.hmi]
apid = "HMI"
ctid = "STRT"
pattern = 'HMI ready after (?P<ms>\d+) ms'

[markers.launcher]
apid = "HMI"
ctid = "LNCH"
pattern = 'Launcher visible'

[[kpi]]
name = "click_to_route"
start = "click"
end = "route_done"
predict_fields = ["handle"]
threshold = 3.0
branch_thresholds = { release = 2.0 }
retry = { attempts = 2, attempt_timeout_ms = 1000, backoff = { kind = "none" } }

[[collect]]
name = "systemd_done"
marker = "systemd"

[[collect]]
name = "launcher_visible"
marker = "launcher"

[[collect]]
name = "hmi_ready_ms"
marker = "hmi"
value = "capture"
capture = "ms"
threshold = 1500.0

[[derived]]
name = "systemd_to_launcher"
from = "systemd_done"
to = "launcher_visible"
threshold = 10.0
"#;

struct Fixture {
    _dir: tempfile::TempDir,
    catalog: KpiCatalog,
    root: PathBuf,
}

fn load_catalog() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kpis.toml");
    std::fs::write(&path, CATALOG).unwrap();
    let catalog = KpiCatalog::load(&path).unwrap();
    Fixture {
        root: dir.path().to_path_buf(),
        _dir: dir,
        catalog,
    }
}

#[rstest]
#[case(None, 3.0, true)]
#[case(Some("release"), 2.0, false)]
#[case(Some("nightly"), 3.0, true)]
#[tokio::test(start_paused = true)]
async fn test_catalog_kpi_with_branch_threshold(
    #[case] branch: Option<&str>,
    #[case] threshold: f64,
    #[case] passed: bool,
) {
    let fixture = load_catalog();
    let kpi = fixture.catalog.kpi("click_to_route").unwrap();
    let limit = fixture.catalog.threshold(&kpi.thresholds, branch);
    assert_eq!(limit, Some(threshold));

    let transport = Arc::new(MockTransport::default());
    let mut correlator = fixture
        .catalog
        .correlator("click_to_route")
        .unwrap()
        .open(transport.clone())
        .await
        .unwrap();

    transport.inject_all([
        LogRecord::new(20.0, "ALD", "LCAT", "Click command on NAVIGATION handle=11"),
        LogRecord::new(21.0, "NAV", "RGC", "route calculated handle=12"),
        LogRecord::new(22.5, "NAV", "RGC", "route calculated handle=11"),
    ]);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let report = correlator.measure(&kpi.name, limit).await.unwrap();
    assert_eq!(report.measured_duration, 2.5);
    assert_eq!(report.passed, passed);
}

#[tokio::test(start_paused = true)]
async fn test_catalog_retry_policy_applies() {
    let fixture = load_catalog();
    let transport = Arc::new(MockTransport::default());
    let mut correlator = fixture
        .catalog
        .correlator("click_to_route")
        .unwrap()
        .open(transport.clone())
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    let err = correlator.begin_timestamp().await.unwrap_err();
    assert!(matches!(
        err,
        CorrelationError::EventNotObserved { attempts: 2, .. }
    ));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_collect_and_derive_from_mock() {
    let fixture = load_catalog();
    let collector = fixture.catalog.collector(None).unwrap();
    assert_eq!(collector.specs().len(), 3);

    let transport = Arc::new(MockTransport::default());
    transport.inject_after(
        Duration::from_millis(100),
        LogRecord::new(4.2, "SYS", "JOUR", "Startup finished in 4.1s"),
    );
    transport.inject_after(
        Duration::from_millis(200),
        LogRecord::new(9.7, "HMI", "STRT", "HMI ready after 1234 ms"),
    );
    transport.inject_after(
        Duration::from_millis(300),
        LogRecord::new(11.0, "HMI", "LNCH", "Launcher visible"),
    );
    // only the first occurrence counts
    transport.inject_after(
        Duration::from_millis(400),
        LogRecord::new(30.0, "HMI", "LNCH", "Launcher visible"),
    );

    let outcome = collector
        .collect(transport.clone(), Duration::from_secs(5))
        .await
        .unwrap();
    assert!(outcome.missing.is_empty());
    assert_eq!(outcome.value("systemd_done"), Some(4.2));
    assert_eq!(outcome.value("hmi_ready_ms"), Some(1234.0));
    assert_eq!(outcome.value("launcher_visible"), Some(11.0));

    let hmi = outcome.report("hmi_ready_ms", Some(1500.0)).unwrap();
    assert!(hmi.passed);

    let derived = &fixture.catalog.derived[0];
    let report = outcome
        .derive(
            &derived.name,
            &derived.from,
            &derived.to,
            fixture.catalog.threshold(&derived.thresholds, None),
        )
        .unwrap()
        .unwrap();
    assert!((report.measured_duration - 6.8).abs() < 1e-9);
    assert!(report.passed);
    assert!(transport.active_registrations().is_empty());
}

#[tokio::test]
async fn test_collect_from_recording_exports_csv() {
    let fixture = load_catalog();
    let recording = write_recording(
        &fixture.root,
        "boot.txt",
        &[
            LogRecord::new(3.5, "SYS", "JOUR", "Startup finished in 3.4s"),
            LogRecord::new(15.0, "HMI", "LNCH", "Launcher visible"),
        ],
    );
    let transport = create_transport(&TransportConfig::Replay(ReplayConfig {
        path: recording,
        format: LineFormat::Ascii,
        pace: false,
        speed: 1.0,
    }))
    .await
    .unwrap();

    let outcome = fixture
        .catalog
        .collector(None)
        .unwrap()
        .collect(transport, Duration::from_millis(300))
        .await
        .unwrap();
    assert_eq!(outcome.missing, vec!["hmi_ready_ms".to_string()]);

    let derived = outcome
        .derive("systemd_to_launcher", "systemd_done", "launcher_visible", Some(10.0))
        .unwrap()
        .unwrap();
    assert!(!derived.passed);

    let csv_path = fixture.root.join("kpi.csv");
    let mut sink = CsvSink::append(&csv_path).unwrap();
    derived.export(&mut sink).unwrap();
    KpiReport::from_duration("systemd_done", 3.5, None)
        .export(&mut sink)
        .unwrap();
    drop(sink);

    let content = std::fs::read_to_string(&csv_path).unwrap();
    let lines: Vec<_> = content.lines().collect();
    assert_eq!(
        lines,
        [
            "metric,metric_value,kpi_threshold,diff,passed",
            "systemd_to_launcher,11.5,10,1.5,false",
            "systemd_done,3.5,,,true",
        ]
    );
}

#[test]
fn test_catalog_rejects_unknown_derived_source() {
    let broken = format!(
        "{}\n[[derived]]\nname = \"bad\"\nfrom = \"systemd_done\"\nto = \"nope\"\n",
        CATALOG
    );
    assert!(KpiCatalog::from_toml_str(&broken).is_err());
}
