use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::Context;
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::SyncError;

/// Exclusive claim on the dataset for one sync run, held as a lock file
/// containing the run token. Released on drop.
#[derive(Debug)]
pub struct RunLease {
    path: PathBuf,
    token: Uuid,
    released: bool,
}

impl RunLease {
    /// Take the lease at `path`. A lock file older than `stale_after` is
    /// treated as left behind by a crashed run and replaced.
    pub fn acquire(path: &Path, stale_after: Duration) -> Result<Self, SyncError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating lease directory {}", parent.display()))?;
        }

        let token = Uuid::new_v4();
        for _ in 0..2 {
            match fs::OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    writeln!(file, "{token}\n{}", Utc::now().to_rfc3339())
                        .with_context(|| format!("writing lease {}", path.display()))?;
                    return Ok(Self {
                        path: path.to_path_buf(),
                        token,
                        released: false,
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if !is_stale(path, stale_after) {
                        let holder = fs::read_to_string(path)
                            .unwrap_or_default()
                            .lines()
                            .collect::<Vec<_>>()
                            .join(" acquired ");
                        return Err(SyncError::RunInProgress {
                            lock_path: path.display().to_string(),
                            holder,
                        });
                    }
                    warn!(lock = %path.display(), "replacing stale sync lease");
                    let _ = fs::remove_file(path);
                }
                Err(err) => {
                    return Err(anyhow::Error::new(err)
                        .context(format!("creating lease {}", path.display()))
                        .into());
                }
            }
        }

        Err(SyncError::RunInProgress {
            lock_path: path.display().to_string(),
            holder: "lease contended while replacing a stale lock".to_string(),
        })
    }

    pub fn token(&self) -> Uuid {
        self.token
    }

    pub fn release(mut self) -> anyhow::Result<()> {
        self.released = true;
        self.remove_if_owned()
    }

    fn remove_if_owned(&self) -> anyhow::Result<()> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(err).with_context(|| format!("reading lease {}", self.path.display()))
            }
        };
        // A lease judged stale may have been taken over by another run.
        if content.lines().next() == Some(self.token.to_string().as_str()) {
            fs::remove_file(&self.path)
                .with_context(|| format!("removing lease {}", self.path.display()))?;
        }
        Ok(())
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.remove_if_owned();
        }
    }
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map(|age| age > stale_after)
        .unwrap_or(false)
}
