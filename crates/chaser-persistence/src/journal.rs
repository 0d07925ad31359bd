//! JSON Lines journal with daily file rotation.
//!
//! Each record is one line in `{dir}/{prefix}_{YYYY-MM-DD}.jsonl`, opened in
//! append mode so an interrupted write only damages its own line.

use crate::error::PersistenceResult;
use chrono::Utc;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::PathBuf;
use tracing::{debug, info, warn};

struct ActiveFile {
    writer: BufWriter<File>,
    date: String,
    records_written: usize,
}

/// Buffered JSON Lines writer for records of type `R`.
pub struct JsonLinesWriter<R: Serialize> {
    base_dir: PathBuf,
    prefix: String,
    buffer: Vec<R>,
    max_buffer_size: usize,
    active: Option<ActiveFile>,
    _record: PhantomData<R>,
}

impl<R: Serialize> JsonLinesWriter<R> {
    /// `max_buffer_size` of 1 writes through on every record.
    pub fn new(
        base_dir: impl Into<PathBuf>,
        prefix: &str,
        max_buffer_size: usize,
    ) -> PersistenceResult<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;

        Ok(Self {
            base_dir,
            prefix: prefix.to_string(),
            buffer: Vec::with_capacity(max_buffer_size.max(1)),
            max_buffer_size: max_buffer_size.max(1),
            active: None,
            _record: PhantomData,
        })
    }

    pub fn append(&mut self, record: R) -> PersistenceResult<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.max_buffer_size {
            self.flush()?;
        }
        Ok(())
    }

    fn close_active(&mut self) {
        if let Some(mut active) = self.active.take() {
            if let Err(e) = active.writer.flush() {
                warn!(?e, "Failed to flush journal on close");
            }
            info!(
                date = %active.date,
                records = active.records_written,
                prefix = %self.prefix,
                "Closed journal file"
            );
        }
    }

    fn open_for(&mut self, date: &str) -> PersistenceResult<&mut ActiveFile> {
        let rotate = self.active.as_ref().map(|a| a.date != date).unwrap_or(false);
        if rotate {
            self.close_active();
        }
        if self.active.is_none() {
            let path = self
                .base_dir
                .join(format!("{}_{}.jsonl", self.prefix, date));
            info!(path = %path.display(), "Opening journal file (append mode)");
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            self.active = Some(ActiveFile {
                writer: BufWriter::new(file),
                date: date.to_string(),
                records_written: 0,
            });
        }
        self.active
            .as_mut()
            .ok_or_else(|| std::io::Error::other("journal file not open").into())
    }

    /// Write buffered records to today's file.
    pub fn flush(&mut self) -> PersistenceResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let records = std::mem::take(&mut self.buffer);
        let count = records.len();

        let active = self.open_for(&today)?;
        for record in &records {
            let line = serde_json::to_string(record)?;
            writeln!(active.writer, "{line}")?;
        }
        active.writer.flush()?;
        active.records_written += count;

        debug!(date = %today, records = count, "Flushed journal records");
        Ok(())
    }

    pub fn close(&mut self) -> PersistenceResult<()> {
        self.flush()?;
        self.close_active();
        Ok(())
    }
}

impl<R: Serialize> Drop for JsonLinesWriter<R> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(?e, "Failed to flush journal on drop");
        }
        self.close_active();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::{BufRead, BufReader};
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Entry {
        signal_id: u64,
        symbol: String,
    }

    fn lines_in(dir: &TempDir) -> Vec<String> {
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 1);
        let file = File::open(entries[0].path()).unwrap();
        BufReader::new(file).lines().map_while(Result::ok).collect()
    }

    #[test]
    fn test_write_through_and_read_back() {
        let dir = TempDir::new().unwrap();
        let mut journal = JsonLinesWriter::new(dir.path(), "executions", 1).unwrap();
        for i in 0..3 {
            journal
                .append(Entry {
                    signal_id: i,
                    symbol: "BTCUSDT".to_string(),
                })
                .unwrap();
        }

        let lines = lines_in(&dir);
        assert_eq!(lines.len(), 3);
        let first: Entry = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first.signal_id, 0);
    }

    #[test]
    fn test_reopen_appends() {
        let dir = TempDir::new().unwrap();
        for round in 0..2 {
            let mut journal = JsonLinesWriter::new(dir.path(), "executions", 10).unwrap();
            journal
                .append(Entry {
                    signal_id: round,
                    symbol: "ETHUSDT".to_string(),
                })
                .unwrap();
            journal.close().unwrap();
        }
        assert_eq!(lines_in(&dir).len(), 2);
    }

    #[test]
    fn test_empty_flush_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let mut journal: JsonLinesWriter<Entry> =
            JsonLinesWriter::new(dir.path(), "executions", 10).unwrap();
        journal.flush().unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
