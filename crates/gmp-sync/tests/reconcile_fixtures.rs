use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use gmp_core::{LifecycleStatus, OfferingClass, Source};
use gmp_storage::MemoryGateway;
use gmp_sync::{report_recent_runs, SourceRegistry, SyncConfig, SyncPipeline};
use tempfile::tempdir;

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .expect("workspace root")
}

const FIXTURE_REGISTRY: &str = r#"
sources:
  - source: ipowatch
    display_name: IPO Watch
    enabled: true
    mode: fixture
  - source: investorgain
    display_name: InvestorGain
    enabled: true
    mode: fixture
  - source: chittorgarh
    display_name: Chittorgarh
    enabled: true
    mode: fixture
"#;

fn pipeline_into(out: &Path, registry: &str) -> SyncPipeline {
    let mut config = SyncConfig::for_workspace(workspace_root());
    config.reports_dir = out.join("reports");
    config.pages_dir = out.join("pages");
    config.match_threshold = None;
    let registry = SourceRegistry::from_yaml_str(registry).expect("registry");
    SyncPipeline::with_registry(config, registry).expect("pipeline")
}

fn feb(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, day).expect("date")
}

#[tokio::test]
async fn fixture_run_reconciles_three_sources() {
    let out = tempdir().expect("tempdir");
    let pipeline = pipeline_into(out.path(), FIXTURE_REGISTRY);
    let mut gateway = MemoryGateway::new();

    let summary = pipeline.run_once_on(&mut gateway, feb(10)).await.expect("run");

    assert_eq!(summary.enabled_sources, 3);
    assert_eq!(summary.collected_candidates, 11);
    assert_eq!(summary.groups, 5);
    assert_eq!(summary.persisted, 5);
    assert!(summary.failed_groups.is_empty());
    assert!(summary.sources.iter().all(|s| s.error.is_none()));
    assert_eq!(gateway.len(), 5);

    let expected = [
        ("fractal analytics", LifecycleStatus::Open, 42.0),
        ("aequs", LifecycleStatus::Closed, 6.0),
        ("shree ram twistex sme", LifecycleStatus::Upcoming, 12.0),
        ("brandman retail sme", LifecycleStatus::Open, 0.0),
        ("kanishk aluminium sme", LifecycleStatus::Upcoming, -2.0),
    ];
    for (key, status, quote) in expected {
        let record = gateway.record(key).unwrap_or_else(|| panic!("missing {key}"));
        assert_eq!(record.status, status, "{key}");
        let history = gateway.quote_history(key);
        assert_eq!(history.len(), 1, "{key}");
        assert_eq!(history[0].value, quote, "{key}");
    }

    let fractal = gateway.record("fractal analytics").expect("fractal");
    assert_eq!(fractal.name, "Fractal Analytics Ltd.");
    assert_eq!(fractal.price_band.as_deref(), Some("857.00 to 900.00"));
    assert_eq!(fractal.lot_size, 16);
    assert_eq!(fractal.listing_date, Some(feb(16)));

    let shree = gateway.record("shree ram twistex sme").expect("shree");
    assert_eq!(shree.offering_class, OfferingClass::Sme);
    assert_eq!(shree.lot_size, 1200);

    let reports_dir = PathBuf::from(&summary.reports_dir);
    assert!(reports_dir.join("run_summary.md").exists());
    assert!(reports_dir.join("reconciliation.json").exists());
    assert!(Path::new(&summary.quotes_snapshot).exists());
    assert!(out.path().join("reports/runs.jsonl").exists());

    let report: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(reports_dir.join("reconciliation.json")).expect("read report"),
    )
    .expect("parse report");
    let offerings = report["offerings"].as_array().expect("offerings");
    assert_eq!(offerings.len(), 5);
    assert_eq!(offerings[0]["identity_key"], "fractal analytics");
    assert_eq!(offerings[0]["quote_source"], "ipowatch");
    assert_eq!(offerings[0]["listing_gain_percent"], 4.67);
    assert!(offerings[0]["previous_quote"].is_null());

    let digest = report_recent_runs(5, &out.path().join("reports")).expect("digest");
    assert!(digest.contains(&summary.run_id.to_string()));
    assert!(digest.contains("- offerings: 5"));
    assert!(digest.contains("- new offerings: 5"));
}

/// A workspace holding real fixtures for `sources` only; the others have no
/// bundle and fail like an unreachable site.
fn partial_workspace(root: &Path, sources: &[Source]) {
    for source in sources {
        let from = workspace_root().join("fixtures").join(source.as_str()).join("sample");
        let to = root.join("fixtures").join(source.as_str()).join("sample");
        std::fs::create_dir_all(to.join("raw")).expect("fixture dir");
        for file in ["bundle.json", "raw/listing.html"] {
            std::fs::copy(from.join(file), to.join(file)).expect("copy fixture");
        }
    }
}

fn pipeline_over(root: &Path, registry: &str) -> SyncPipeline {
    let mut config = SyncConfig::for_workspace(root);
    config.match_threshold = None;
    let registry = SourceRegistry::from_yaml_str(registry).expect("registry");
    SyncPipeline::with_registry(config, registry).expect("pipeline")
}

#[tokio::test]
async fn one_failed_source_leaves_the_others_reconciling() {
    let out = tempdir().expect("tempdir");
    partial_workspace(out.path(), &[Source::InvestorGain, Source::Chittorgarh]);
    let pipeline = pipeline_over(out.path(), FIXTURE_REGISTRY);
    let mut gateway = MemoryGateway::new();

    let summary = pipeline.run_once_on(&mut gateway, feb(10)).await.expect("run");

    let ipowatch = &summary.sources[0];
    assert_eq!(ipowatch.source, Source::IpoWatch);
    assert!(ipowatch.error.is_some());
    assert_eq!(ipowatch.candidates, 0);
    assert!(summary.sources[1..].iter().all(|s| s.error.is_none()));
    assert_eq!(summary.collected_candidates, 8);
    assert_eq!(summary.groups, 5);
    assert_eq!(summary.persisted, 5);

    // The preferred quote source is down, so quotes fall through to investorgain.
    let expected = [
        ("fractal analytics", 38.0),
        ("aequs", 6.0),
        ("shree ram twistex sme", 10.0),
        ("brandman retail sme", 0.0),
        ("kanishk aluminium sme", -2.0),
    ];
    for (key, quote) in expected {
        assert_eq!(gateway.quote_history(key)[0].value, quote, "{key}");
    }

    let fractal = gateway.record("fractal analytics").expect("fractal");
    assert_eq!(fractal.name, "Fractal Analytics Ltd.");
    assert_eq!(fractal.price_band.as_deref(), Some("857.00 to 900.00"));
    assert_eq!(fractal.lot_size, 16);
}

#[tokio::test]
async fn source_outage_keeps_stored_fields() {
    let out = tempdir().expect("tempdir");
    partial_workspace(out.path(), &[Source::IpoWatch, Source::InvestorGain, Source::Chittorgarh]);
    let mut gateway = MemoryGateway::new();

    pipeline_over(out.path(), FIXTURE_REGISTRY)
        .run_once_on(&mut gateway, feb(10))
        .await
        .expect("full run");
    let before = gateway.record("fractal analytics").expect("fractal").clone();
    assert_eq!(before.lot_size, 16);
    assert!(before.issue_size.is_some());

    // Chittorgarh is the only source with lot and issue sizes.
    std::fs::remove_dir_all(out.path().join("fixtures/chittorgarh")).expect("drop chittorgarh");
    let summary = pipeline_over(out.path(), FIXTURE_REGISTRY)
        .run_once_on(&mut gateway, feb(10))
        .await
        .expect("degraded run");
    assert!(summary.sources[2].error.is_some());

    let after = gateway.record("fractal analytics").expect("fractal");
    assert_eq!(after.lot_size, 16);
    assert_eq!(after.issue_size, before.issue_size);
    assert_eq!(before.listing_date, Some(feb(16)));
    // A value the remaining sources do carry still replaces the stored one.
    assert_eq!(after.listing_date, Some(feb(17)));
    assert_eq!(after.price_band.as_deref(), Some("₹900"));
    assert_eq!(gateway.quote_history("fractal analytics").len(), 2);

    let report: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(PathBuf::from(&summary.reports_dir).join("reconciliation.json"))
            .expect("read report"),
    )
    .expect("parse report");
    let fractal = &report["offerings"][0];
    assert_eq!(fractal["previous_quote"], 42.0);
    assert_eq!(fractal["change"], 0.0);
}

#[tokio::test]
async fn broken_source_is_isolated() {
    let out = tempdir().expect("tempdir");
    let registry = format!(
        "{FIXTURE_REGISTRY}  - source: nonexistent\n"
    );
    // Unknown source ids are rejected by the registry itself.
    assert!(SourceRegistry::from_yaml_str(&registry).is_err());

    // A fixture bundle that does not exist stands in for an unreachable site.
    let mut config = SyncConfig::for_workspace(out.path());
    config.reports_dir = out.path().join("reports");
    let registry = SourceRegistry::from_yaml_str(FIXTURE_REGISTRY).expect("registry");
    let pipeline = SyncPipeline::with_registry(config, registry).expect("pipeline");
    let mut gateway = MemoryGateway::new();

    let summary = pipeline.run_once_on(&mut gateway, feb(10)).await.expect("run");
    assert_eq!(summary.collected_candidates, 0);
    assert_eq!(summary.groups, 0);
    assert_eq!(summary.sources.len(), 3);
    assert!(summary.sources.iter().all(|s| s.error.is_some()));
    assert!(gateway.is_empty());
}

#[tokio::test]
async fn disabled_sources_do_not_contribute() {
    let out = tempdir().expect("tempdir");
    let registry = FIXTURE_REGISTRY.replacen("enabled: true", "enabled: false", 2);
    let pipeline = pipeline_into(out.path(), &registry);
    let mut gateway = MemoryGateway::new();

    let summary = pipeline.run_once_on(&mut gateway, feb(10)).await.expect("run");
    assert_eq!(summary.enabled_sources, 1);
    assert_eq!(summary.sources[0].source, Source::Chittorgarh);
    assert_eq!(summary.groups, 3);

    // Chittorgarh carries no quotes, so every offering records "no premium".
    for record in gateway.records() {
        assert_eq!(gateway.quote_history(&record.identity_key)[0].value, 0.0);
    }
}
