//! Artifact sources and tabular sinks consumed by the sync pipeline.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tix_core::csv::{parse_records, write_records};
use tix_core::{ArtifactRef, Record, Table};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "tix-storage";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Remote file repository holding the raw CSV exports.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Artifacts under `prefix`, sorted by name. A prefix that does not
    /// exist yet lists as empty.
    async fn list(&self, prefix: &str) -> Result<Vec<ArtifactRef>>;

    /// Raw text of the artifact at `path`, encoding already normalized.
    async fn fetch(&self, path: &str) -> Result<String>;
}

/// Named tables in the tabular data store.
#[async_trait]
pub trait TableSink: Send + Sync {
    /// Current contents; a table that was never written reads as empty.
    async fn read(&self, table: &str) -> Result<Table>;

    async fn replace(&self, table: &str, contents: &Table) -> Result<()>;

    /// Append rows. An empty table adopts `header` first; an existing
    /// header is left as is.
    async fn append(&self, table: &str, header: &[String], rows: &[Record]) -> Result<()>;
}

fn join_prefix(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

/// Artifact source over a local directory tree; prefixes are relative
/// directories under `root`.
#[derive(Debug, Clone)]
pub struct LocalArtifactSource {
    root: PathBuf,
}

impl LocalArtifactSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactSource for LocalArtifactSource {
    async fn list(&self, prefix: &str) -> Result<Vec<ArtifactRef>> {
        let dir = self.root.join(prefix.trim_matches('/'));
        if !fs::try_exists(&dir)
            .await
            .with_context(|| format!("checking artifact prefix {}", dir.display()))?
        {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&dir)
            .await
            .with_context(|| format!("listing {}", dir.display()))?;
        let mut out = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("listing {}", dir.display()))?
        {
            let file_type = entry
                .file_type()
                .await
                .with_context(|| format!("inspecting {}", entry.path().display()))?;
            if !file_type.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            out.push(ArtifactRef {
                path: join_prefix(prefix, &name),
                name,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn fetch(&self, path: &str) -> Result<String> {
        let full = self.root.join(path);
        fs::read_to_string(&full)
            .await
            .with_context(|| format!("reading artifact {}", full.display()))
    }
}

/// Table sink storing each table as `<root>/<table>.csv`.
#[derive(Debug, Clone)]
pub struct CsvTableStore {
    root: PathBuf,
}

impl CsvTableStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.root.join(format!("{table}.csv"))
    }

    /// Write via temp file + rename so readers never see a half-written table.
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating table directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp table file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp table file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp table file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp table {} -> {}",
                    temp_path.display(),
                    path.display()
                )
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TableSink for CsvTableStore {
    async fn read(&self, table: &str) -> Result<Table> {
        let path = self.table_path(table);
        if !fs::try_exists(&path)
            .await
            .with_context(|| format!("checking table {}", path.display()))?
        {
            return Ok(Table::default());
        }
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading table {}", path.display()))?;
        Ok(Table::from_records(parse_records(&text)))
    }

    async fn replace(&self, table: &str, contents: &Table) -> Result<()> {
        let path = self.table_path(table);
        let text = write_records(&contents.to_records());
        self.write_atomic(&path, text.as_bytes()).await?;
        debug!(table, rows = contents.rows.len(), "replaced table");
        Ok(())
    }

    async fn append(&self, table: &str, header: &[String], rows: &[Record]) -> Result<()> {
        let path = self.table_path(table);
        let existing = self.read(table).await?;
        if existing.header.is_empty() {
            let fresh = Table::new(header.to_vec(), rows.to_vec());
            return self.replace(table, &fresh).await;
        }
        if rows.is_empty() {
            return Ok(());
        }

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("opening table {} for append", path.display()))?;
        file.write_all(write_records(rows).as_bytes())
            .await
            .with_context(|| format!("appending to table {}", path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing table {}", path.display()))?;
        debug!(table, rows = rows.len(), "appended rows");
        Ok(())
    }
}

/// Artifact source held in memory, keyed by path.
#[derive(Debug, Default)]
pub struct MemoryArtifactSource {
    files: Mutex<BTreeMap<String, String>>,
}

impl MemoryArtifactSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, content: impl Into<String>) {
        if let Ok(mut files) = self.files.lock() {
            files.insert(path.into(), content.into());
        }
    }
}

#[async_trait]
impl ArtifactSource for MemoryArtifactSource {
    async fn list(&self, prefix: &str) -> Result<Vec<ArtifactRef>> {
        let files = self
            .files
            .lock()
            .map_err(|_| anyhow::anyhow!("artifact map lock poisoned"))?;
        let dir = format!("{}/", prefix.trim_matches('/'));
        let mut out = files
            .keys()
            .filter_map(|path| {
                let name = path.strip_prefix(&dir)?;
                (!name.is_empty() && !name.contains('/')).then(|| ArtifactRef {
                    name: name.to_string(),
                    path: path.clone(),
                })
            })
            .collect::<Vec<_>>();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn fetch(&self, path: &str) -> Result<String> {
        let files = self
            .files
            .lock()
            .map_err(|_| anyhow::anyhow!("artifact map lock poisoned"))?;
        files
            .get(path)
            .cloned()
            .with_context(|| format!("artifact {path} not found"))
    }
}

/// Table sink held in memory. Writes to tables marked with
/// [`MemoryTableStore::fail_writes_to`] return an error.
#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tables: Mutex<BTreeMap<String, Table>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes_to(&self, table: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(table.to_string());
        }
    }

    pub fn snapshot(&self, table: &str) -> Table {
        self.tables
            .lock()
            .ok()
            .and_then(|tables| tables.get(table).cloned())
            .unwrap_or_default()
    }

    fn check_writable(&self, table: &str) -> Result<()> {
        let failing = self
            .failing
            .lock()
            .map_err(|_| anyhow::anyhow!("failure set lock poisoned"))?;
        if failing.contains(table) {
            bail!("table store unavailable for {table}");
        }
        Ok(())
    }
}

#[async_trait]
impl TableSink for MemoryTableStore {
    async fn read(&self, table: &str) -> Result<Table> {
        Ok(self.snapshot(table))
    }

    async fn replace(&self, table: &str, contents: &Table) -> Result<()> {
        self.check_writable(table)?;
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| anyhow::anyhow!("table map lock poisoned"))?;
        tables.insert(table.to_string(), contents.clone());
        Ok(())
    }

    async fn append(&self, table: &str, header: &[String], rows: &[Record]) -> Result<()> {
        self.check_writable(table)?;
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| anyhow::anyhow!("table map lock poisoned"))?;
        let entry = tables.entry(table.to_string()).or_default();
        if entry.header.is_empty() {
            entry.header = header.to_vec();
        }
        entry.rows.extend(rows.iter().cloned());
        Ok(())
    }
}
