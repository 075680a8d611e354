//! Market data inputs
//!
//! `BarHistory` is the warm-up capability the controller calls on init. `CsvReplay`
//! implements it from flat files and also yields the time-ordered bar/quote stream
//! the binary replays.
//!
//! File formats (headers required, instants as `2024-03-04T10:00:00`):
//! - `bars.csv`: `instant,open,high,low,close,volume` with `instant` the bar open
//! - `quotes.csv`: `instant,bid_price,ask_price,last_price` (`last_price` may be empty)

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};
use csv::ReaderBuilder;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::path::Path;
use tracing::{info, warn};

use crate::types::{Bar, Quote};

/// Historical closed-bar source used for warm-up
#[async_trait]
pub trait BarHistory: Send + Sync {
    /// Closed bars for the last `lookback_days` calendar days, oldest first
    async fn get_closed_bars(&self, instrument: &str, lookback_days: u32) -> Result<Vec<Bar>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplayItem {
    /// Delivered at its close instant
    Bar(Bar),
    Quote(Quote),
}

pub struct CsvReplay {
    bars: Vec<Bar>,
    quotes: Vec<Quote>,
    bar_period: Duration,
}

fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
    let mut rows = Vec::new();
    for (i, row) in reader.deserialize().enumerate() {
        match row {
            Ok(r) => rows.push(r),
            Err(e) => warn!(path = %path.display(), line = i + 2, error = %e, "Skipping malformed row"),
        }
    }
    Ok(rows)
}

impl CsvReplay {
    pub fn new(mut bars: Vec<Bar>, mut quotes: Vec<Quote>, bar_period: Duration) -> Self {
        bars.sort_by_key(|b| b.instant);
        quotes.sort_by_key(|q| q.instant);
        Self {
            bars,
            quotes,
            bar_period,
        }
    }

    /// Read `bars.csv` and `quotes.csv` from `dir`
    pub fn load(dir: impl AsRef<Path>, bar_period: Duration) -> Result<Self> {
        let dir = dir.as_ref();
        let bars: Vec<Bar> = read_rows(&dir.join("bars.csv"))?;
        let quotes: Vec<Quote> = read_rows(&dir.join("quotes.csv"))?;
        info!(
            dir = %dir.display(),
            bars = bars.len(),
            quotes = quotes.len(),
            "Replay data loaded"
        );
        Ok(Self::new(bars, quotes, bar_period))
    }

    /// First quote instant; bars closed before it count as history
    pub fn replay_start(&self) -> Option<NaiveDateTime> {
        self.quotes.first().map(|q| q.instant)
    }

    fn is_history(&self, bar: &Bar) -> bool {
        match self.replay_start() {
            Some(start) => bar.close_instant(self.bar_period) <= start,
            None => true,
        }
    }

    /// Live part of the data, bars keyed by close instant, bars before quotes on ties
    pub fn events(&self) -> Vec<(NaiveDateTime, ReplayItem)> {
        let mut items: Vec<(NaiveDateTime, ReplayItem)> = self
            .bars
            .iter()
            .filter(|b| !self.is_history(b))
            .map(|b| (b.close_instant(self.bar_period), ReplayItem::Bar(b.clone())))
            .chain(
                self.quotes
                    .iter()
                    .map(|q| (q.instant, ReplayItem::Quote(q.clone()))),
            )
            .collect();
        items.sort_by_key(|(at, item)| (*at, matches!(item, ReplayItem::Quote(_))));
        items
    }
}

#[async_trait]
impl BarHistory for CsvReplay {
    async fn get_closed_bars(&self, instrument: &str, lookback_days: u32) -> Result<Vec<Bar>> {
        let Some(start) = self.replay_start() else {
            return Ok(Vec::new());
        };
        let earliest = start - Duration::days(i64::from(lookback_days));
        let bars: Vec<Bar> = self
            .bars
            .iter()
            .filter(|b| self.is_history(b) && b.instant >= earliest)
            .cloned()
            .collect();
        info!(instrument, lookback_days, count = bars.len(), "Serving warm-up bars");
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn bar(instant: NaiveDateTime) -> Bar {
        Bar {
            instant,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
        }
    }

    fn quote(instant: NaiveDateTime) -> Quote {
        Quote {
            instant,
            bid_price: dec!(1.0),
            ask_price: dec!(1.1),
            last_price: None,
        }
    }

    fn replay() -> CsvReplay {
        CsvReplay::new(
            vec![bar(at(1, 10, 0)), bar(at(4, 9, 30)), bar(at(4, 10, 0))],
            vec![quote(at(4, 10, 0)), quote(at(4, 10, 30))],
            Duration::minutes(30),
        )
    }

    #[tokio::test]
    async fn history_is_bars_closed_before_first_quote() {
        let r = replay();
        let bars = r.get_closed_bars("rb", 6).await.unwrap();
        assert_eq!(
            bars.iter().map(|b| b.instant).collect::<Vec<_>>(),
            vec![at(1, 10, 0), at(4, 9, 30)]
        );
        let bars = r.get_closed_bars("rb", 1).await.unwrap();
        assert_eq!(bars.len(), 1);
    }

    #[test]
    fn events_order_bars_before_quotes_at_same_instant() {
        let events = replay().events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].0, at(4, 10, 0));
        assert_eq!(events[1].0, at(4, 10, 30));
        assert!(matches!(events[1].1, ReplayItem::Bar(_)));
        assert!(matches!(events[2].1, ReplayItem::Quote(_)));
    }

    #[test]
    fn quotes_parse_with_empty_last_price() {
        let csv_text = "instant,bid_price,ask_price,last_price\n2024-03-04T10:00:00,99.5,100.0,\n";
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_reader(csv_text.as_bytes());
        let q: Quote = reader.deserialize().next().unwrap().unwrap();
        assert_eq!(q.last_price, None);
        assert_eq!(q.bid_price, dec!(99.5));
        assert_eq!(q.ask_price, dec!(100));
    }
}
