use anyhow::{Context, Result};
use tix_core::{SyncOutcome, Table, SYNC_LOG_HEADER};
use tix_storage::TableSink;

/// Bounded run history kept in a sink table, oldest entry first.
pub struct OutcomeLog<'a> {
    sink: &'a dyn TableSink,
    table: &'a str,
    cap: usize,
}

impl<'a> OutcomeLog<'a> {
    pub fn new(sink: &'a dyn TableSink, table: &'a str, cap: usize) -> Self {
        Self {
            sink,
            table,
            cap: cap.max(1),
        }
    }

    /// Append `outcome`, evicting the oldest entries beyond the cap.
    pub async fn record(&self, outcome: &SyncOutcome) -> Result<()> {
        let existing = self
            .sink
            .read(self.table)
            .await
            .with_context(|| format!("reading {}", self.table))?;
        let mut rows = existing.rows;
        rows.push(outcome.to_record());
        if rows.len() > self.cap {
            let excess = rows.len() - self.cap;
            rows.drain(..excess);
        }
        let table = Table::new(SYNC_LOG_HEADER.map(String::from).to_vec(), rows);
        self.sink
            .replace(self.table, &table)
            .await
            .with_context(|| format!("writing {}", self.table))
    }

    pub async fn history(&self) -> Result<Vec<SyncOutcome>> {
        let table = self
            .sink
            .read(self.table)
            .await
            .with_context(|| format!("reading {}", self.table))?;
        Ok(table.rows.iter().filter_map(SyncOutcome::from_record).collect())
    }
}

/// Markdown summary of the newest `runs` outcomes, newest first.
pub fn report_outcomes_markdown(history: &[SyncOutcome], runs: usize) -> String {
    let mut lines = vec!["# Sync Outcomes".to_string(), String::new()];
    if history.is_empty() {
        lines.push("No runs recorded yet.".to_string());
    }
    for outcome in history.iter().rev().take(runs.max(1)) {
        lines.push(format!(
            "- `{}` **{}**: {}",
            outcome.timestamp.to_rfc3339(),
            outcome.status.as_str(),
            outcome.message.replace('\n', " ")
        ));
    }
    lines.push(String::new());
    lines.join("\n")
}
