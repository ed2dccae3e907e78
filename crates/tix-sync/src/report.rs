//! Per-run parquet snapshots of the derived views.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use tix_core::{DailyTotal, ImpactRow};
use tix_storage::sha256_hex;

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub run_id: String,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Write `daily_totals.parquet`, `impact.parquet` and `manifest.json` under
/// `<run_dir>/snapshots`, returning the manifest path.
pub fn export_parquet_snapshots(
    run_dir: &Path,
    run_id: &str,
    daily: &[DailyTotal],
    impact: &[ImpactRow],
) -> Result<std::path::PathBuf> {
    let snapshot_dir = run_dir.join("snapshots");
    std::fs::create_dir_all(&snapshot_dir)
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let daily_path = snapshot_dir.join("daily_totals.parquet");
    let impact_path = snapshot_dir.join("impact.parquet");
    write_daily_totals_parquet(&daily_path, daily)?;
    write_impact_parquet(&impact_path, impact)?;

    let manifest = ParquetManifest {
        schema_version: 1,
        run_id: run_id.to_string(),
        files: vec![
            manifest_entry("daily_totals", run_dir, &daily_path)?,
            manifest_entry("impact", run_dir, &impact_path)?,
        ],
    };
    let manifest_path = snapshot_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
    std::fs::write(&manifest_path, bytes)
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn write_daily_totals_parquet(path: &Path, daily: &[DailyTotal]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("date", DataType::Utf8, false),
        ArrowField::new("primary_tickets", DataType::Int64, false),
        ArrowField::new("secondary_tickets", DataType::Int64, false),
        ArrowField::new("total_tickets", DataType::Int64, false),
    ]));

    let dates = StringArray::from(daily.iter().map(|d| Some(d.date.as_str())).collect::<Vec<_>>());
    let primary = Int64Array::from(daily.iter().map(|d| d.primary).collect::<Vec<_>>());
    let secondary = Int64Array::from(daily.iter().map(|d| d.secondary).collect::<Vec<_>>());
    let total = Int64Array::from(daily.iter().map(|d| d.total).collect::<Vec<_>>());

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(dates),
            Arc::new(primary),
            Arc::new(secondary),
            Arc::new(total),
        ],
    )
    .context("building daily_totals record batch")?;
    write_parquet(path, batch)
}

fn write_impact_parquet(path: &Path, impact: &[ImpactRow]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("date", DataType::Utf8, false),
        ArrowField::new("tickets_sold", DataType::Int64, false),
        ArrowField::new("spend", DataType::Float64, false),
        ArrowField::new("impressions", DataType::Float64, false),
        ArrowField::new("clicks", DataType::Float64, false),
        ArrowField::new("purchases", DataType::Float64, false),
        ArrowField::new("cost_per_ticket", DataType::Float64, true),
        ArrowField::new("roas", DataType::Float64, true),
        ArrowField::new("ctr_pct", DataType::Float64, true),
    ]));

    let dates = StringArray::from(impact.iter().map(|r| Some(r.date.as_str())).collect::<Vec<_>>());
    let tickets = Int64Array::from(impact.iter().map(|r| r.tickets_sold).collect::<Vec<_>>());
    let spend = Float64Array::from(impact.iter().map(|r| r.spend).collect::<Vec<_>>());
    let impressions = Float64Array::from(impact.iter().map(|r| r.impressions).collect::<Vec<_>>());
    let clicks = Float64Array::from(impact.iter().map(|r| r.clicks).collect::<Vec<_>>());
    let purchases = Float64Array::from(impact.iter().map(|r| r.purchases).collect::<Vec<_>>());
    let cpt = Float64Array::from(impact.iter().map(|r| r.cost_per_ticket).collect::<Vec<_>>());
    let roas = Float64Array::from(impact.iter().map(|r| r.return_ratio).collect::<Vec<_>>());
    let ctr = Float64Array::from(impact.iter().map(|r| r.click_through_pct).collect::<Vec<_>>());

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(dates),
            Arc::new(tickets),
            Arc::new(spend),
            Arc::new(impressions),
            Arc::new(clicks),
            Arc::new(purchases),
            Arc::new(cpt),
            Arc::new(roas),
            Arc::new(ctr),
        ],
    )
    .context("building impact record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, run_dir: &Path, path: &Path) -> Result<ParquetManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let rel = path
        .strip_prefix(run_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        sha256: sha256_hex(&bytes),
        bytes: bytes.len() as u64,
    })
}
