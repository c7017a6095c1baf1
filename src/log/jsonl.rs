//! File-backed repository: one JSON record per line.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use crate::error::RepositoryError;
use crate::log::record::LogRecord;
use crate::log::repository::{LogFilter, LogRepository};

/// Records persisted as JSON lines, mirrored in memory for queries.
///
/// Existing records are loaded when the file is opened, so task status
/// survives a restart of the scheduler process.
pub struct JsonLinesRepository {
    path: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    file: File,
    records: Vec<LogRecord>,
}

impl JsonLinesRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let mut records = Vec::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LogRecord>(&line) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        warn!(
                            path = %path.display(),
                            line = lineno + 1,
                            error = %e,
                            "Skipping unreadable log record"
                        );
                    }
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            inner: Mutex::new(Inner { file, records }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogRepository for JsonLinesRepository {
    fn append(&self, record: LogRecord) -> Result<(), RepositoryError> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.file.write_all(line.as_bytes())?;
        inner.file.flush()?;
        inner.records.push(record);
        Ok(())
    }

    fn query(&self, filter: &LogFilter) -> Result<Vec<LogRecord>, RepositoryError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::record::Action;
    use chrono::NaiveDate;

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("tasks.jsonl");
        let created = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        {
            let repo = JsonLinesRepository::open(&path).unwrap();
            repo.append(LogRecord::new("a", Action::Run, created).with_run_id("1"))
                .unwrap();
            repo.append(LogRecord::new("a", Action::Success, created).with_run_id("1"))
                .unwrap();
        }

        let repo = JsonLinesRepository::open(&path).unwrap();
        let all = repo.query(&LogFilter::new().task("a")).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].action, Action::Success);
    }

    #[test]
    fn unreadable_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.jsonl");
        std::fs::write(&path, "not json\n\n").unwrap();
        let repo = JsonLinesRepository::open(&path).unwrap();
        assert_eq!(repo.count(&LogFilter::new()).unwrap(), 0);
    }
}
