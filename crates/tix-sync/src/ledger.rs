//! File registry and raw ledger construction.

use std::collections::HashSet;

use anyhow::{Context, Result};
use tix_adapters::{ArtifactAdapter, ParsedArtifact, TicketSnapshotAdapter};
use tix_core::{Record, Table};
use tix_storage::ArtifactSource;
use tracing::{debug, info, warn};

pub const SNAPSHOT_TIMESTAMP_COLUMN: &str = "snapshot_timestamp";
pub const PROVENANCE_COLUMN: &str = "source_file";

/// Names of artifacts already present in the ledger. Derived from the
/// ledger's provenance column on every run, so it has no state of its own.
#[derive(Debug, Clone, Default)]
pub struct FileRegistry {
    names: HashSet<String>,
}

impl FileRegistry {
    pub fn from_ledger(ledger: &Table) -> Self {
        let Some(idx) = ledger.column_index(PROVENANCE_COLUMN) else {
            return Self::default();
        };
        let names = ledger
            .rows
            .iter()
            .map(|row| Table::cell(row, idx).trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        Self { names }
    }

    pub fn has_been_ingested(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn mark(&mut self, name: &str) {
        self.names.insert(name.to_string());
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

pub fn ledger_header(artifact_header: &[String]) -> Vec<String> {
    let mut header = artifact_header.to_vec();
    header.push(SNAPSHOT_TIMESTAMP_COLUMN.to_string());
    header.push(PROVENANCE_COLUMN.to_string());
    header
}

/// Ledger rows for one parsed snapshot, shaped to `header`. A snapshot whose
/// own header differs is projected onto the ledger columns by name.
pub fn ledger_rows(header: &[String], parsed: &ParsedArtifact) -> Vec<Record> {
    let snapshot_ts = parsed.snapshot_timestamp.clone().unwrap_or_default();
    let own_header = ledger_header(&parsed.header);

    if own_header == header {
        return parsed
            .rows
            .iter()
            .map(|row| {
                let mut out = row.clone();
                out.push(snapshot_ts.clone());
                out.push(parsed.name.clone());
                out
            })
            .collect();
    }

    warn!(
        artifact = %parsed.name,
        "snapshot header differs from ledger header; aligning columns by name"
    );
    let source = Table::new(parsed.header.clone(), Vec::new());
    let mapping = header
        .iter()
        .map(|column| match column.as_str() {
            SNAPSHOT_TIMESTAMP_COLUMN | PROVENANCE_COLUMN => None,
            _ => source.column_index(column),
        })
        .collect::<Vec<_>>();

    parsed
        .rows
        .iter()
        .map(|row| {
            header
                .iter()
                .zip(&mapping)
                .map(|(column, idx)| match (column.as_str(), idx) {
                    (SNAPSHOT_TIMESTAMP_COLUMN, _) => snapshot_ts.clone(),
                    (PROVENANCE_COLUMN, _) => parsed.name.clone(),
                    (_, Some(i)) => Table::cell(row, *i).to_string(),
                    (_, None) => String::new(),
                })
                .collect()
        })
        .collect()
}

/// Rows to append to the ledger for this run.
#[derive(Debug, Clone, Default)]
pub struct LedgerAppend {
    pub header: Vec<String>,
    pub rows: Vec<Record>,
    pub ingested: Vec<String>,
    pub skipped_empty: Vec<String>,
}

/// Fetch and parse every snapshot under `prefix` not yet in `ledger`, in
/// listing order. Nothing is written here.
pub async fn collect_new_snapshots(
    source: &dyn ArtifactSource,
    prefix: &str,
    ledger: &Table,
) -> Result<LedgerAppend> {
    let adapter = TicketSnapshotAdapter;
    let mut registry = FileRegistry::from_ledger(ledger);
    let mut out = LedgerAppend {
        header: ledger.header.clone(),
        ..Default::default()
    };

    let listed = source
        .list(prefix)
        .await
        .with_context(|| format!("listing ticket snapshots under {prefix}"))?;
    debug!(prefix, listed = listed.len(), known = registry.len(), "ticket snapshots listed");

    for reference in listed {
        if registry.has_been_ingested(&reference.name) {
            continue;
        }
        let artifact = adapter
            .fetch(source, &reference)
            .await
            .with_context(|| format!("fetching ticket snapshot {}", reference.path))?;
        let parsed = adapter
            .parse(&artifact)
            .with_context(|| format!("parsing ticket snapshot {}", reference.path))?;
        registry.mark(&reference.name);

        let Some(parsed) = parsed else {
            out.skipped_empty.push(reference.name);
            continue;
        };
        if out.header.is_empty() {
            out.header = ledger_header(&parsed.header);
        }
        let rows = ledger_rows(&out.header, &parsed);
        info!(artifact = %parsed.name, rows = rows.len(), "new ticket snapshot");
        out.rows.extend(rows);
        out.ingested.push(parsed.name);
    }

    Ok(out)
}
