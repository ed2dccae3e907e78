//! Core domain model for the ticket sales / ad impact pipeline.

pub mod csv;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "tix-core";

/// One row of cells. Width is defined by the owning table's header.
pub type Record = Vec<String>;

/// Header plus data rows, as exchanged with a tabular sink.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Record>,
}

impl Table {
    pub fn new(header: Vec<String>, rows: Vec<Record>) -> Self {
        Self { header, rows }
    }

    pub fn with_header<S: AsRef<str>>(header: &[S]) -> Self {
        Self {
            header: header.iter().map(|h| h.as_ref().to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// First record becomes the header; every data row is padded or
    /// truncated to the header width.
    pub fn from_records(records: Vec<Record>) -> Self {
        let mut iter = records.into_iter();
        let Some(header) = iter.next() else {
            return Self::default();
        };
        let width = header.len();
        let rows = iter
            .map(|mut row| {
                fit_width(&mut row, width);
                row
            })
            .collect();
        Self { header, rows }
    }

    pub fn to_records(&self) -> Vec<Record> {
        if self.header.is_empty() && self.rows.is_empty() {
            return Vec::new();
        }
        std::iter::once(self.header.clone())
            .chain(self.rows.iter().cloned())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty() && self.rows.is_empty()
    }

    /// Column lookup by name, ignoring surrounding whitespace.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let wanted = name.trim();
        self.header.iter().position(|h| h.trim() == wanted)
    }

    /// Cell accessor that treats short rows as blank-padded.
    pub fn cell(row: &Record, index: usize) -> &str {
        row.get(index).map(String::as_str).unwrap_or("")
    }
}

pub fn fit_width(record: &mut Record, width: usize) {
    record.resize(width, String::new());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    TicketSnapshot,
    AdExport,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TicketSnapshot => "ticket_snapshot",
            Self::AdExport => "ad_export",
        }
    }
}

/// Listing entry returned by an artifact source. Identity is `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    pub path: String,
}

/// A fetched input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: SourceKind,
    pub name: String,
    pub path: String,
    pub content: String,
}

impl Artifact {
    pub fn new(kind: SourceKind, reference: ArtifactRef, content: String) -> Self {
        Self {
            kind,
            name: reference.name,
            path: reference.path,
            content,
        }
    }
}

/// Reformat an 8-digit compact date (`20250113`) as `2025-01-13`. Anything
/// else is returned trimmed but otherwise untouched, so date keys are opaque
/// sort keys rather than a guaranteed shape.
pub fn normalize_date_key(raw: &str) -> String {
    let value = raw.trim();
    if value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()) {
        format!("{}-{}-{}", &value[..4], &value[4..6], &value[6..8])
    } else {
        value.to_string()
    }
}

/// Per-date ticket totals split into the primary category and everything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyTotal {
    pub date: String,
    pub primary: i64,
    pub secondary: i64,
    pub total: i64,
}

impl DailyTotal {
    pub fn new(date: impl Into<String>, primary: i64, secondary: i64) -> Self {
        Self {
            date: date.into(),
            primary,
            secondary,
            total: primary.saturating_add(secondary),
        }
    }

    pub fn header(primary_label: &str, secondary_label: &str) -> Vec<String> {
        vec![
            "date".to_string(),
            format!("{primary_label}_tickets"),
            format!("{secondary_label}_tickets"),
            "total_tickets".to_string(),
        ]
    }

    pub fn to_record(&self) -> Record {
        vec![
            self.date.clone(),
            self.primary.to_string(),
            self.secondary.to_string(),
            self.total.to_string(),
        ]
    }

    /// Positional decode of a row previously written with [`Self::to_record`].
    pub fn from_record(row: &Record) -> Option<Self> {
        let date = row.first()?.trim();
        if date.is_empty() {
            return None;
        }
        let primary = Table::cell(row, 1).trim().parse().ok()?;
        let secondary = Table::cell(row, 2).trim().parse().ok()?;
        Some(Self::new(date, primary, secondary))
    }
}

pub const IMPACT_HEADER: [&str; 9] = [
    "date",
    "tickets_sold",
    "spend",
    "impressions",
    "clicks",
    "purchases",
    "cost_per_ticket",
    "roas",
    "ctr",
];

/// Per-date join of ticket sales and ad spend. Derived ratios are `None`
/// when their denominator is not strictly positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactRow {
    pub date: String,
    pub tickets_sold: i64,
    pub spend: f64,
    pub impressions: f64,
    pub clicks: f64,
    pub purchases: f64,
    pub cost_per_ticket: Option<f64>,
    pub return_ratio: Option<f64>,
    pub click_through_pct: Option<f64>,
}

impl ImpactRow {
    pub fn to_record(&self) -> Record {
        vec![
            self.date.clone(),
            self.tickets_sold.to_string(),
            format_number(self.spend),
            format_number(self.impressions),
            format_number(self.clicks),
            format_number(self.purchases),
            self.cost_per_ticket
                .map(|v| format!("{v:.2}"))
                .unwrap_or_default(),
            self.return_ratio
                .map(|v| format!("{v:.2}"))
                .unwrap_or_default(),
            self.click_through_pct
                .map(|v| format!("{v:.2}%"))
                .unwrap_or_default(),
        ]
    }
}

/// Integral values print without a fraction, others with up to two decimals.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        let text = format!("{value:.2}");
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

pub const SYNC_LOG_HEADER: [&str; 3] = ["timestamp", "status", "message"];

/// One entry of the bounded run history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub timestamp: DateTime<Utc>,
    pub status: SyncStatus,
    pub message: String,
}

impl SyncOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            status: SyncStatus::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            status: SyncStatus::Error,
            message: message.into(),
        }
    }

    pub fn to_record(&self) -> Record {
        vec![
            self.timestamp.to_rfc3339(),
            self.status.as_str().to_string(),
            self.message.clone(),
        ]
    }

    pub fn from_record(row: &Record) -> Option<Self> {
        let timestamp = DateTime::parse_from_rfc3339(Table::cell(row, 0).trim())
            .ok()?
            .with_timezone(&Utc);
        let status = SyncStatus::parse(Table::cell(row, 1))?;
        Some(Self {
            timestamp,
            status,
            message: Table::cell(row, 2).to_string(),
        })
    }
}
