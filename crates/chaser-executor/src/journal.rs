//! One JSON line per finished chase.

use chaser_core::{AccountId, Price, Side, SignalId, Size};
use chaser_persistence::{JsonLinesWriter, PersistenceResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct ChaseRecord {
    pub finished_at: DateTime<Utc>,
    pub signal_id: SignalId,
    pub account_id: AccountId,
    pub symbol: String,
    pub side: Side,
    pub target: Size,
    pub filled: Size,
    pub average_price: Option<Price>,
    pub stop_reason: Option<String>,
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub market_fallback: bool,
    pub partial_execution_warning: bool,
    pub error: Option<String>,
}

/// Daily-rotated `chase_YYYY-MM-DD.jsonl` files.
pub struct ExecutionJournal {
    writer: Mutex<JsonLinesWriter<ChaseRecord>>,
}

impl ExecutionJournal {
    pub fn open(dir: impl Into<PathBuf>) -> PersistenceResult<Self> {
        Ok(Self {
            writer: Mutex::new(JsonLinesWriter::new(dir, "chase", 1)?),
        })
    }

    /// Append and flush. Failures are logged, never propagated.
    pub fn record(&self, record: ChaseRecord) {
        let signal_id = record.signal_id;
        if let Err(e) = self.writer.lock().append(record) {
            warn!(%signal_id, error = %e, "Failed to write chase journal");
        }
    }

    pub fn close(&self) {
        if let Err(e) = self.writer.lock().close() {
            warn!(error = %e, "Failed to close chase journal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_record_is_one_json_line() {
        let dir = tempfile::tempdir().unwrap();
        let journal = ExecutionJournal::open(dir.path()).unwrap();
        journal.record(ChaseRecord {
            finished_at: Utc::now(),
            signal_id: SignalId(42),
            account_id: AccountId(1),
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            target: Size::new(dec!(0.008)),
            filled: Size::new(dec!(0.008)),
            average_price: Some(Price::new(dec!(59990.1))),
            stop_reason: Some("filled".to_string()),
            attempts: 2,
            elapsed_ms: 3100,
            market_fallback: false,
            partial_execution_warning: false,
            error: None,
        });
        journal.close();

        let file = std::fs::read_dir(dir.path())
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        assert!(file.file_name().unwrap().to_string_lossy().starts_with("chase_"));
        let content = std::fs::read_to_string(file).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["symbol"], "BTCUSDT");
        assert_eq!(value["stop_reason"], "filled");
    }
}
