use std::sync::Arc;

use tempfile::{tempdir, TempDir};
use tix_core::{SyncStatus, SYNC_LOG_HEADER};
use tix_storage::{CsvTableStore, MemoryArtifactSource, MemoryTableStore, TableSink};
use tix_sync::{PipelineConfig, SyncConfig, SyncError, SyncPipeline};

const SNAPSHOT_HEADER: &str = "show_date,show_time,ticket_type_no,ticket_type_name,tickets_sold";
const AD_HEADER: &str = "Day,Amount spent (JPY),Impressions,Link clicks,Purchases";

struct Harness {
    _dir: TempDir,
    source: Arc<MemoryArtifactSource>,
    store: Arc<MemoryTableStore>,
    pipeline: SyncPipeline,
}

fn harness() -> Harness {
    let dir = tempdir().expect("tempdir");
    let source = Arc::new(MemoryArtifactSource::new());
    let store = Arc::new(MemoryTableStore::new());
    let pipeline = SyncPipeline::new(SyncConfig::rooted_at(dir.path()), PipelineConfig::default())
        .with_backends(source.clone(), store.clone());
    Harness {
        _dir: dir,
        source,
        store,
        pipeline,
    }
}

fn snapshot(lines: &[&str]) -> String {
    let mut text = SNAPSHOT_HEADER.to_string();
    for line in lines {
        text.push('\n');
        text.push_str(line);
    }
    text.push('\n');
    text
}

#[tokio::test]
async fn rerun_without_new_files_changes_nothing_but_the_log() {
    let h = harness();
    h.source.insert(
        "tickets/20250110090000_sales.csv",
        snapshot(&["20250113,10:00,1,adult,40", "20250113,10:00,2,child,5"]),
    );

    let first = h.pipeline.run_once().await.expect("first run");
    assert_eq!(first.ingested_artifacts, vec!["20250110090000_sales.csv"]);
    assert_eq!(first.appended_rows, 2);
    assert_eq!(first.daily_days, Some(1));

    let ledger_before = h.store.snapshot("raw_tickets");
    let daily_before = h.store.snapshot("daily_totals");

    let second = h.pipeline.run_once().await.expect("second run");
    assert!(second.ingested_artifacts.is_empty());
    assert_eq!(second.appended_rows, 0);
    assert_eq!(second.daily_days, None);

    assert_eq!(h.store.snapshot("raw_tickets"), ledger_before);
    assert_eq!(h.store.snapshot("daily_totals"), daily_before);
    let history = h.pipeline.outcome_history().await.expect("history");
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|o| o.status == SyncStatus::Success));
}

#[tokio::test]
async fn ledger_only_grows_and_keeps_provenance() {
    let h = harness();
    h.source.insert(
        "tickets/20250110090000_sales.csv",
        snapshot(&["20250113,10:00,1,adult,40"]),
    );
    h.pipeline.run_once().await.expect("first run");

    h.source.insert(
        "tickets/20250111090000_sales.csv",
        snapshot(&["20250113,10:00,1,adult,46", "20250114,10:00,1,adult,3"]),
    );
    let summary = h.pipeline.run_once().await.expect("second run");
    assert_eq!(summary.ingested_artifacts, vec!["20250111090000_sales.csv"]);

    let ledger = h.store.snapshot("raw_tickets");
    assert_eq!(ledger.rows.len(), 3);
    let provenance = ledger.column_index("source_file").expect("provenance column");
    let stamp = ledger.column_index("snapshot_timestamp").expect("timestamp column");
    assert_eq!(ledger.rows[0][provenance], "20250110090000_sales.csv");
    assert_eq!(ledger.rows[0][stamp], "2025-01-10T09:00:00");
    assert_eq!(ledger.rows[2][provenance], "20250111090000_sales.csv");

    // Daily totals are cumulative over every snapshot in the ledger.
    let daily = h.store.snapshot("daily_totals");
    assert_eq!(
        daily.header,
        vec!["date", "adult_tickets", "child_tickets", "total_tickets"]
    );
    assert_eq!(daily.rows[0], vec!["2025-01-13", "86", "0", "86"]);
    assert_eq!(daily.rows[1], vec!["2025-01-14", "3", "0", "3"]);

    let deltas = h.store.snapshot("sales_deltas");
    assert_eq!(deltas.rows.len(), 2);
}

#[tokio::test]
async fn impact_joins_tickets_and_ad_spend_per_day() {
    let h = harness();
    h.source.insert(
        "tickets/20250113120000_sales.csv",
        snapshot(&["20250113,10:00,1,adult,50", "20250113,10:00,2,child,5"]),
    );
    h.source.insert(
        "ads/daily/2025-01-13.csv",
        format!("{AD_HEADER}\n2025-01-13,6000,3000,30,1\n"),
    );
    h.source.insert(
        "ads/weekly/2025-w03.csv",
        format!("{AD_HEADER}\n2025-01-13,4000,2000,20,0\n2025-01-14,500,0,0,0\n"),
    );

    let summary = h.pipeline.run_once().await.expect("run");
    assert_eq!(summary.ad_rows, 3);
    assert_eq!(summary.impact_days, Some(2));

    let ads = h.store.snapshot("ad_metrics");
    assert_eq!(ads.header.last().map(String::as_str), Some("source_file"));

    let impact = h.store.snapshot("impact");
    assert_eq!(
        impact.rows[0],
        vec!["2025-01-13", "55", "10000", "5000", "50", "1", "181.82", "19.25", "1.00%"]
    );
    // Ad spend with no tickets sold leaves the ratios blank.
    assert_eq!(
        impact.rows[1],
        vec!["2025-01-14", "0", "500", "0", "0", "0", "", "", ""]
    );
}

#[tokio::test]
async fn mismatched_ad_headers_fail_the_run_and_are_logged() {
    let h = harness();
    h.source.insert(
        "ads/daily/a.csv",
        format!("{AD_HEADER}\n2025-01-13,6000,3000,30,1\n"),
    );
    h.source.insert("ads/daily/b.csv", "Day,Spend\n2025-01-14,10\n");

    let err = h.pipeline.run_once().await.expect_err("header mismatch");
    assert!(format!("{err:#}").contains("b.csv"));

    let history = h.pipeline.outcome_history().await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, SyncStatus::Error);
}

#[tokio::test]
async fn write_failure_is_recorded_as_error_outcome() {
    let h = harness();
    h.source.insert(
        "tickets/20250110090000_sales.csv",
        snapshot(&["20250113,10:00,1,adult,40"]),
    );
    h.store.fail_writes_to("daily_totals");

    let err = h.pipeline.run_once().await.expect_err("write should fail");
    assert!(matches!(err, SyncError::Other(_)));

    let log = h.store.snapshot("sync_log");
    assert_eq!(log.header, SYNC_LOG_HEADER.map(String::from).to_vec());
    assert_eq!(log.rows.len(), 1);
    assert_eq!(log.rows[0][1], "error");
    assert!(log.rows[0][2].contains("daily_totals"));
}

#[tokio::test]
async fn held_lease_blocks_a_second_run_without_logging() {
    let dir = tempdir().expect("tempdir");
    let config = SyncConfig::rooted_at(dir.path());
    let _held = tix_sync::RunLease::acquire(
        &config.lock_path(),
        std::time::Duration::from_secs(3600),
    )
    .expect("lease");

    let store = Arc::new(MemoryTableStore::new());
    let pipeline = SyncPipeline::new(config, PipelineConfig::default())
        .with_backends(Arc::new(MemoryArtifactSource::new()), store.clone());

    let err = pipeline.run_once().await.expect_err("lease held");
    assert!(matches!(err, SyncError::RunInProgress { .. }));
    assert!(store.snapshot("sync_log").rows.is_empty());
}

#[tokio::test]
async fn outcome_log_keeps_only_the_newest_runs() {
    let dir = tempdir().expect("tempdir");
    let store = Arc::new(MemoryTableStore::new());
    let pipeline_config = PipelineConfig {
        outcome_history_cap: 3,
        ..PipelineConfig::default()
    };
    let pipeline = SyncPipeline::new(SyncConfig::rooted_at(dir.path()), pipeline_config)
        .with_backends(Arc::new(MemoryArtifactSource::new()), store.clone());

    for _ in 0..5 {
        pipeline.run_once().await.expect("run");
    }
    assert_eq!(store.snapshot("sync_log").rows.len(), 3);
}

#[tokio::test]
async fn parquet_export_lands_under_the_run_directory() {
    let dir = tempdir().expect("tempdir");
    let mut config = SyncConfig::rooted_at(dir.path());
    config.export_parquet = true;
    let source = Arc::new(MemoryArtifactSource::new());
    source.insert(
        "tickets/20250110090000_sales.csv",
        snapshot(&["20250113,10:00,1,adult,40"]),
    );
    let pipeline = SyncPipeline::new(config, PipelineConfig::default())
        .with_backends(source, Arc::new(MemoryTableStore::new()));

    let summary = pipeline.run_once().await.expect("run");
    let manifest = summary.parquet_manifest.expect("manifest path");
    assert!(manifest.contains(&summary.run_id.to_string()));
    assert!(std::path::Path::new(&manifest).exists());
}

#[tokio::test]
async fn missing_columns_leave_previous_views_in_place() {
    let h = harness();
    h.source.insert(
        "tickets/20250113120000_sales.csv",
        snapshot(&["20250113,10:00,1,adult,50", "20250113,10:00,2,child,5"]),
    );
    h.source.insert(
        "ads/daily/2025-01-13.csv",
        format!("{AD_HEADER}\n2025-01-13,10000,5000,50,1\n"),
    );
    h.pipeline.run_once().await.expect("first run");
    let daily_before = h.store.snapshot("daily_totals");
    let deltas_before = h.store.snapshot("sales_deltas");
    let impact_before = h.store.snapshot("impact");
    assert_eq!(daily_before.rows.len(), 1);
    assert_eq!(impact_before.rows.len(), 1);

    let mut renamed = PipelineConfig::default();
    renamed.sales.quantity_column = "sold".to_string();
    renamed.ads.spend_column = "Spend".to_string();
    let dir = tempdir().expect("tempdir");
    let pipeline = SyncPipeline::new(SyncConfig::rooted_at(dir.path()), renamed)
        .with_backends(h.source.clone(), h.store.clone());

    h.source.insert(
        "tickets/20250114120000_sales.csv",
        snapshot(&["20250114,10:00,1,adult,7"]),
    );
    let summary = pipeline.run_once().await.expect("second run succeeds");
    assert_eq!(summary.appended_rows, 1);
    assert_eq!(summary.daily_days, None);
    assert_eq!(summary.impact_days, None);

    assert_eq!(h.store.snapshot("daily_totals"), daily_before);
    assert_eq!(h.store.snapshot("sales_deltas"), deltas_before);
    assert_eq!(h.store.snapshot("impact"), impact_before);
    let history = pipeline.outcome_history().await.expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].status, SyncStatus::Success);
}

#[tokio::test]
async fn daily_totals_do_not_depend_on_how_many_runs_built_the_ledger() {
    let first = snapshot(&["20250113,10:00,1,adult,40", "20250113,10:00,2,child,5"]);
    let second = snapshot(&["20250113,10:00,1,adult,46", "20250114,10:00,2,child,2"]);

    let together = harness();
    together.source.insert("tickets/20250110090000_sales.csv", first.clone());
    together.source.insert("tickets/20250111090000_sales.csv", second.clone());
    together.pipeline.run_once().await.expect("single run");

    let stepwise = harness();
    stepwise.source.insert("tickets/20250110090000_sales.csv", first);
    stepwise.pipeline.run_once().await.expect("first of two runs");
    stepwise.source.insert("tickets/20250111090000_sales.csv", second);
    stepwise.pipeline.run_once().await.expect("second of two runs");

    assert_eq!(
        together.store.snapshot("raw_tickets"),
        stepwise.store.snapshot("raw_tickets")
    );
    let daily = together.store.snapshot("daily_totals");
    assert_eq!(daily, stepwise.store.snapshot("daily_totals"));
    assert_eq!(daily.rows[0], vec!["2025-01-13", "86", "5", "91"]);
    assert_eq!(daily.rows[1], vec!["2025-01-14", "0", "2", "2"]);
}

#[tokio::test]
async fn rerun_over_csv_files_leaves_the_ledger_file_unchanged() {
    let dir = tempdir().expect("tempdir");
    let config = SyncConfig::rooted_at(dir.path());
    let tickets_dir = config.artifacts_dir.join("tickets");
    std::fs::create_dir_all(&tickets_dir).expect("create tickets dir");
    std::fs::write(
        tickets_dir.join("20250110090000_sales.csv"),
        snapshot(&["20250113,10:00,1,adult,40", "\"20250113\",\"14:00\",2,child,5"]),
    )
    .expect("write snapshot");

    let tables_dir = config.tables_dir.clone();
    let pipeline = SyncPipeline::new(config, PipelineConfig::default());

    let first = pipeline.run_once().await.expect("first run");
    assert_eq!(first.appended_rows, 2);
    let ledger_path = tables_dir.join("raw_tickets.csv");
    let ledger_bytes = std::fs::read(&ledger_path).expect("ledger written");

    let second = pipeline.run_once().await.expect("second run");
    assert_eq!(second.appended_rows, 0);
    assert_eq!(std::fs::read(&ledger_path).expect("ledger kept"), ledger_bytes);

    let store = CsvTableStore::new(tables_dir);
    let ledger = store.read("raw_tickets").await.expect("read ledger");
    assert_eq!(ledger.rows.len(), 2);
    assert_eq!(ledger.header.last().map(String::as_str), Some("source_file"));
    assert_eq!(ledger.rows[1][3], "child");

    let daily = store.read("daily_totals").await.expect("read daily");
    assert_eq!(daily.rows, vec![vec!["2025-01-13", "40", "5", "45"]]);
    let log = store.read("sync_log").await.expect("read log");
    assert_eq!(log.rows.len(), 2);
}
