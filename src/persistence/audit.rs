//! CSV audit trail of chase transitions

use anyhow::{Context, Result};
use csv::WriterBuilder;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use crate::execution::TransitionRecord;

/// Flat CSV row with display-formatted side and timestamp
#[derive(Debug, Serialize)]
struct AuditRow<'a> {
    at: String,
    instrument: &'a str,
    event: &'a str,
    side: String,
    quantity: i64,
    price: Option<Decimal>,
    order_id: &'a str,
    from: &'a str,
    to: &'a str,
    reason: &'a str,
}

impl<'a> From<&'a TransitionRecord> for AuditRow<'a> {
    fn from(r: &'a TransitionRecord) -> Self {
        Self {
            at: r.at.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            instrument: &r.instrument,
            event: &r.event,
            side: r.side.map(|s| s.to_string()).unwrap_or_default(),
            quantity: r.quantity,
            price: r.price,
            order_id: r.order_id.as_ref().map(|id| id.as_str()).unwrap_or(""),
            from: &r.from,
            to: &r.to,
            reason: &r.reason,
        }
    }
}

pub struct AuditTrail {
    writer: csv::Writer<fs::File>,
    path: PathBuf,
}

impl AuditTrail {
    /// Open for append, writing the header only into an empty file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).context("Failed to create audit directory")?;
            }
        }
        let file_has_data =
            path.exists() && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context("Failed to open audit CSV")?;

        let writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);

        Ok(Self { writer, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, records: &[TransitionRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        for record in records {
            self.writer
                .serialize(AuditRow::from(record))
                .context("Failed to write audit row")?;
        }
        self.writer.flush().context("Failed to flush audit CSV")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::test_support::temp_data_dir;
    use crate::types::{OrderId, Side};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn record(event: &str) -> TransitionRecord {
        TransitionRecord {
            at: NaiveDate::from_ymd_opt(2024, 3, 4)
                .unwrap()
                .and_hms_opt(10, 30, 0)
                .unwrap(),
            instrument: "rb".into(),
            event: event.into(),
            side: Some(Side::Long),
            quantity: 5,
            price: Some(dec!(100.0)),
            order_id: Some(OrderId::new("paper-1")),
            from: "IDLE".into(),
            to: "PLACING".into(),
            reason: "FLATTEN".into(),
        }
    }

    #[test]
    fn header_written_once_across_reopen() {
        let dir = temp_data_dir("audit");
        let path = dir.join("audit.csv");

        AuditTrail::open(&path)
            .unwrap()
            .append(&[record("submit")])
            .unwrap();
        AuditTrail::open(&path)
            .unwrap()
            .append(&[record("ack")])
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3, "unexpected content: {}", content);
        assert!(lines[0].starts_with("at,instrument,event,side,quantity,price,order_id,from,to,reason"));
        assert!(lines[1].contains(",submit,LONG,5,100.0,paper-1,IDLE,PLACING,FLATTEN"));
        assert!(lines[2].contains(",ack,"));

        let _ = fs::remove_dir_all(&dir);
    }
}
