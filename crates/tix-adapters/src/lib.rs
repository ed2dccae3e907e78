//! Artifact adapters: turn fetched CSV exports into header-shaped tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tix_core::csv::parse_document;
use tix_core::{Artifact, ArtifactRef, Record, SourceKind, Table};
use tix_storage::ArtifactSource;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "tix-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("header of {artifact} does not match the first export: expected {expected:?}, found {found:?}")]
    HeaderMismatch {
        artifact: String,
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// A non-empty artifact after parsing: header plus width-normalized rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedArtifact {
    pub kind: SourceKind,
    pub name: String,
    pub header: Vec<String>,
    pub rows: Vec<Record>,
    /// Set for ticket snapshots only.
    pub snapshot_timestamp: Option<String>,
}

#[async_trait]
pub trait ArtifactAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn fetch(
        &self,
        source: &dyn ArtifactSource,
        reference: &ArtifactRef,
    ) -> Result<Artifact, AdapterError> {
        let content = source.fetch(&reference.path).await?;
        Ok(Artifact::new(self.kind(), reference.clone(), content))
    }

    /// `Ok(None)` for artifacts without at least a header and one data row.
    fn parse(&self, artifact: &Artifact) -> Result<Option<ParsedArtifact>, AdapterError>;
}

fn ensure_kind(expected: SourceKind, artifact: &Artifact) -> Result<(), AdapterError> {
    if artifact.kind != expected {
        return Err(AdapterError::Message(format!(
            "artifact {} is {} but adapter expects {}",
            artifact.name,
            artifact.kind.as_str(),
            expected.as_str()
        )));
    }
    Ok(())
}

fn parse_table(artifact: &Artifact) -> Option<Table> {
    let doc = parse_document(&artifact.content);
    if doc.unterminated_quote {
        warn!(
            artifact = %artifact.name,
            "unterminated quote; remainder of file read into the last cell"
        );
    }
    if doc.records.len() < 2 {
        debug!(artifact = %artifact.name, records = doc.records.len(), "skipping empty artifact");
        return None;
    }
    Some(Table::from_records(doc.records))
}

/// Adapter for cumulative point-of-sale snapshot exports.
#[derive(Debug, Clone, Copy, Default)]
pub struct TicketSnapshotAdapter;

#[async_trait]
impl ArtifactAdapter for TicketSnapshotAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::TicketSnapshot
    }

    fn parse(&self, artifact: &Artifact) -> Result<Option<ParsedArtifact>, AdapterError> {
        ensure_kind(self.kind(), artifact)?;
        let Some(table) = parse_table(artifact) else {
            return Ok(None);
        };
        Ok(Some(ParsedArtifact {
            kind: self.kind(),
            name: artifact.name.clone(),
            header: table.header,
            rows: table.rows,
            snapshot_timestamp: Some(snapshot_timestamp_from_name(&artifact.name, Utc::now())),
        }))
    }
}

/// Adapter for ad-platform performance exports (any periodicity).
#[derive(Debug, Clone, Copy, Default)]
pub struct AdExportAdapter;

impl AdExportAdapter {
    /// Exports merged into one table must share the first export's header.
    pub fn check_header(expected: &[String], parsed: &ParsedArtifact) -> Result<(), AdapterError> {
        let same = expected.len() == parsed.header.len()
            && expected
                .iter()
                .zip(&parsed.header)
                .all(|(a, b)| a.trim() == b.trim());
        if same {
            Ok(())
        } else {
            Err(AdapterError::HeaderMismatch {
                artifact: parsed.name.clone(),
                expected: expected.to_vec(),
                found: parsed.header.clone(),
            })
        }
    }
}

#[async_trait]
impl ArtifactAdapter for AdExportAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::AdExport
    }

    fn parse(&self, artifact: &Artifact) -> Result<Option<ParsedArtifact>, AdapterError> {
        ensure_kind(self.kind(), artifact)?;
        let Some(table) = parse_table(artifact) else {
            return Ok(None);
        };
        Ok(Some(ParsedArtifact {
            kind: self.kind(),
            name: artifact.name.clone(),
            header: table.header,
            rows: table.rows,
            snapshot_timestamp: None,
        }))
    }
}

fn digit_runs(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = None;
    for (idx, ch) in text.char_indices() {
        if ch.is_ascii_digit() {
            start.get_or_insert(idx);
        } else if let Some(s) = start.take() {
            out.push(&text[s..idx]);
        }
    }
    if let Some(s) = start {
        out.push(&text[s..]);
    }
    out
}

/// Snapshot time encoded in an export's file name.
///
/// `20251130172053_report.csv` gives `2025-11-30T17:20:53`; an 8-digit
/// date without a directly attached time gives midnight of that day; names
/// without either fall back to `fallback`.
pub fn snapshot_timestamp_from_name(name: &str, fallback: DateTime<Utc>) -> String {
    let runs = digit_runs(name);
    if let Some(run) = runs.iter().find(|r| r.len() >= 14) {
        let ts = &run[..14];
        return format!(
            "{}-{}-{}T{}:{}:{}",
            &ts[..4],
            &ts[4..6],
            &ts[6..8],
            &ts[8..10],
            &ts[10..12],
            &ts[12..14]
        );
    }
    if let Some(run) = runs.iter().find(|r| r.len() >= 8) {
        let d = &run[..8];
        return format!("{}-{}-{}T00:00:00", &d[..4], &d[4..6], &d[6..8]);
    }
    fallback.format("%Y-%m-%dT%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tix_storage::MemoryArtifactSource;

    fn artifact(kind: SourceKind, name: &str, content: &str) -> Artifact {
        Artifact {
            kind,
            name: name.to_string(),
            path: format!("x/{name}"),
            content: content.to_string(),
        }
    }

    fn fallback() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 24, 12, 0, 0).single().unwrap()
    }

    #[test]
    fn timestamp_prefers_fourteen_digit_runs() {
        assert_eq!(
            snapshot_timestamp_from_name("20251130172053_jd_report.csv", fallback()),
            "2025-11-30T17:20:53"
        );
        assert_eq!(
            snapshot_timestamp_from_name("export-v2-20251130.csv", fallback()),
            "2025-11-30T00:00:00"
        );
        assert_eq!(
            snapshot_timestamp_from_name("sales_20251130_172053.csv", fallback()),
            "2025-11-30T00:00:00"
        );
        assert_eq!(
            snapshot_timestamp_from_name("20251130_report_123456.csv", fallback()),
            "2025-11-30T00:00:00"
        );
        assert_eq!(
            snapshot_timestamp_from_name("latest.csv", fallback()),
            "2026-02-24T12:00:00"
        );
    }

    #[test]
    fn header_only_and_blank_artifacts_are_skipped() {
        let adapter = TicketSnapshotAdapter;
        let header_only = artifact(SourceKind::TicketSnapshot, "a.csv", "show_date,tickets_sold\n");
        let blank = artifact(SourceKind::TicketSnapshot, "b.csv", "\n,\n");
        assert!(adapter.parse(&header_only).unwrap().is_none());
        assert!(adapter.parse(&blank).unwrap().is_none());
    }

    #[test]
    fn ticket_snapshot_rows_are_fitted_to_header_width() {
        let adapter = TicketSnapshotAdapter;
        let parsed = adapter
            .parse(&artifact(
                SourceKind::TicketSnapshot,
                "20250113090000.csv",
                "show_date,ticket_type_name,tickets_sold\r\n20250113,adult\r\n",
            ))
            .unwrap()
            .unwrap();
        assert_eq!(parsed.rows, vec![vec!["20250113".to_string(), "adult".into(), String::new()]]);
        assert_eq!(parsed.snapshot_timestamp.as_deref(), Some("2025-01-13T09:00:00"));
    }

    #[test]
    fn adapter_rejects_artifacts_of_the_other_kind() {
        let err = AdExportAdapter
            .parse(&artifact(SourceKind::TicketSnapshot, "t.csv", "a\n1\n"))
            .unwrap_err();
        assert!(matches!(err, AdapterError::Message(_)));
    }

    #[test]
    fn ad_header_check_ignores_padding_but_not_order() {
        let parsed = AdExportAdapter
            .parse(&artifact(SourceKind::AdExport, "w.csv", "Day, Impressions\n2025-01-13,5\n"))
            .unwrap()
            .unwrap();
        let same = vec!["Day".to_string(), "Impressions".to_string()];
        let swapped = vec!["Impressions".to_string(), "Day".to_string()];
        assert!(AdExportAdapter::check_header(&same, &parsed).is_ok());
        assert!(matches!(
            AdExportAdapter::check_header(&swapped, &parsed),
            Err(AdapterError::HeaderMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn fetch_tags_artifact_with_adapter_kind() {
        let source = MemoryArtifactSource::new();
        source.insert("ads/daily/d.csv", "Day\n2025-01-13\n");
        let reference = ArtifactRef {
            name: "d.csv".into(),
            path: "ads/daily/d.csv".into(),
        };
        let adapter = AdExportAdapter;
        let fetched = adapter.fetch(&source, &reference).await.unwrap();
        assert_eq!(fetched.kind, SourceKind::AdExport);
        assert_eq!(fetched.content, "Day\n2025-01-13\n");
    }
}
