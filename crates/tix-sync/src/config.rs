use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Process-level settings: where things live and when to run.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub artifacts_dir: PathBuf,
    pub tables_dir: PathBuf,
    pub state_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub pipeline_config_path: PathBuf,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
    pub export_parquet: bool,
    pub stale_lease_secs: u64,
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false)
}

fn env_path(name: &str, default: &str) -> PathBuf {
    std::env::var(name)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            artifacts_dir: env_path("TIX_ARTIFACTS_DIR", "./artifacts"),
            tables_dir: env_path("TIX_TABLES_DIR", "./tables"),
            state_dir: env_path("TIX_STATE_DIR", "./state"),
            reports_dir: env_path("TIX_REPORTS_DIR", "./reports"),
            pipeline_config_path: env_path("TIX_PIPELINE_CONFIG", "./pipeline.yaml"),
            scheduler_enabled: env_flag("TIX_SCHEDULER_ENABLED"),
            sync_cron: std::env::var("TIX_SYNC_CRON").unwrap_or_else(|_| "0 0 * * * *".to_string()),
            export_parquet: env_flag("TIX_EXPORT_PARQUET"),
            stale_lease_secs: std::env::var("TIX_STALE_LEASE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600),
        }
    }

    /// All directories rooted under one workspace directory.
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            artifacts_dir: root.join("artifacts"),
            tables_dir: root.join("tables"),
            state_dir: root.join("state"),
            reports_dir: root.join("reports"),
            pipeline_config_path: root.join("pipeline.yaml"),
            scheduler_enabled: false,
            sync_cron: "0 0 * * * *".to_string(),
            export_parquet: false,
            stale_lease_secs: 3600,
        }
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("sync.lock")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub raw_ledger: String,
    pub daily_totals: String,
    pub sales_deltas: String,
    pub ad_metrics: String,
    pub impact: String,
    pub sync_log: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            raw_ledger: "raw_tickets".to_string(),
            daily_totals: "daily_totals".to_string(),
            sales_deltas: "sales_deltas".to_string(),
            ad_metrics: "ad_metrics".to_string(),
            impact: "impact".to_string(),
            sync_log: "sync_log".to_string(),
        }
    }
}

/// Column-name contract for ticket snapshot exports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SalesColumns {
    pub date_column: String,
    pub category_column: String,
    pub quantity_column: String,
    /// Category value counted as primary; every other value is secondary.
    pub primary_category: String,
    pub primary_label: String,
    pub secondary_label: String,
    /// Identity of a line item across snapshots, for the delta view.
    pub delta_key_columns: Vec<String>,
}

impl Default for SalesColumns {
    fn default() -> Self {
        Self {
            date_column: "show_date".to_string(),
            category_column: "ticket_type_name".to_string(),
            quantity_column: "tickets_sold".to_string(),
            primary_category: "adult".to_string(),
            primary_label: "adult".to_string(),
            secondary_label: "child".to_string(),
            delta_key_columns: vec![
                "show_date".to_string(),
                "show_time".to_string(),
                "ticket_type_no".to_string(),
            ],
        }
    }
}

/// Column-name contract for ad performance exports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdColumns {
    pub day_column: String,
    pub spend_column: String,
    pub impressions_column: String,
    pub clicks_column: String,
    pub purchases_column: String,
}

impl Default for AdColumns {
    fn default() -> Self {
        Self {
            day_column: "Day".to_string(),
            spend_column: "Amount spent (JPY)".to_string(),
            impressions_column: "Impressions".to_string(),
            clicks_column: "Link clicks".to_string(),
            purchases_column: "Purchases".to_string(),
        }
    }
}

/// Dataset-level settings passed to the pipeline at construction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub ticket_prefix: String,
    pub ad_prefixes: Vec<String>,
    pub tables: TableNames,
    pub sales: SalesColumns,
    pub ads: AdColumns,
    pub average_ticket_price: f64,
    pub outcome_history_cap: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ticket_prefix: "tickets".to_string(),
            ad_prefixes: vec!["ads/daily".to_string(), "ads/weekly".to_string()],
            tables: TableNames::default(),
            sales: SalesColumns::default(),
            ads: AdColumns::default(),
            average_ticket_price: 3500.0,
            outcome_history_cap: 100,
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).context("parsing pipeline config")
    }

    /// Load from YAML; a missing file means defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}
