//! Restart snapshot persistence
//!
//! One JSON document per instrument holding everything needed to resume mid-session
//! without recomputing history: signal state, chase state, last target and the
//! instant of the last processed bar.
//!
//! Writes are atomic (write to temp, fsync, rename).

mod audit;

pub use audit::AuditTrail;

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::execution::ChaseState;
use crate::signal::SignalState;
use crate::types::TargetSignal;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySnapshot {
    pub version: u32,
    pub instrument: String,
    pub signal: SignalState,
    #[serde(default)]
    pub chase_state: ChaseState,
    #[serde(default)]
    pub last_target: Option<TargetSignal>,
    #[serde(default)]
    pub last_bar_at: Option<NaiveDateTime>,
    pub saved_at: NaiveDateTime,
}

impl StrategySnapshot {
    /// Same content, ignoring when it was taken
    pub fn same_state(&self, other: &StrategySnapshot) -> bool {
        self.instrument == other.instrument
            && self.signal == other.signal
            && self.chase_state == other.chase_state
            && self.last_target == other.last_target
            && self.last_bar_at == other.last_bar_at
    }
}

pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, snapshot: &StrategySnapshot) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).context("Failed to create snapshot directory")?;
            }
        }
        let json =
            serde_json::to_string_pretty(snapshot).context("Failed to serialize snapshot")?;
        let temp_path = self.path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path).context("Failed to create temp snapshot")?;
        file.write_all(json.as_bytes())
            .context("Failed to write temp snapshot")?;
        file.sync_all().context("Failed to sync temp snapshot")?;
        fs::rename(&temp_path, &self.path).context("Failed to move snapshot into place")?;

        debug!(
            path = %self.path.display(),
            chase_state = %snapshot.chase_state,
            "💾 Snapshot saved"
        );
        Ok(())
    }

    /// `Ok(None)` when no snapshot exists yet
    pub fn load(&self) -> Result<Option<StrategySnapshot>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "💾 No snapshot found, starting fresh");
            return Ok(None);
        }
        let json = fs::read_to_string(&self.path).context("Failed to read snapshot")?;
        let snapshot: StrategySnapshot =
            serde_json::from_str(&json).context("Failed to parse snapshot")?;
        if snapshot.version != SNAPSHOT_VERSION {
            warn!(
                found = snapshot.version,
                expected = SNAPSHOT_VERSION,
                "Snapshot version mismatch, loading anyway"
            );
        }
        info!(
            path = %self.path.display(),
            instrument = %snapshot.instrument,
            saved_at = %snapshot.saved_at,
            chase_state = %snapshot.chase_state,
            "💾 Snapshot loaded"
        );
        Ok(Some(snapshot))
    }
}

/// Wall-clock stamp for `saved_at`
pub fn saved_now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;
    use uuid::Uuid;

    pub fn temp_data_dir(test_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("chasebot_{}_{}", test_name, Uuid::new_v4()))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::temp_data_dir;
    use super::*;
    use crate::signal::PriceWindow;
    use crate::types::TargetReason;

    fn sample() -> StrategySnapshot {
        let mut window = PriceWindow::new(3);
        window.push(100.0);
        window.push(101.0);
        StrategySnapshot {
            version: SNAPSHOT_VERSION,
            instrument: "rb".into(),
            signal: SignalState {
                price_window: Some(window),
                anchor_price: Some(101.0),
                session_target: 5,
                ..SignalState::default()
            },
            chase_state: ChaseState::Idle,
            last_target: Some(TargetSignal::new(5, TargetReason::MomentumEntry { z_score: -1.0 })),
            last_bar_at: None,
            saved_at: saved_now(),
        }
    }

    #[test]
    fn save_then_load_restores_snapshot() {
        let dir = temp_data_dir("snapshot");
        let store = SnapshotStore::new(dir.join("snapshot.json"));
        assert!(store.load().unwrap().is_none());

        let snap = sample();
        store.save(&snap).unwrap();
        assert!(!dir.join("snapshot.json.tmp").exists());

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, snap);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn same_state_ignores_timestamp() {
        let a = sample();
        let mut b = a.clone();
        b.saved_at = a.saved_at + chrono::Duration::seconds(5);
        assert!(a.same_state(&b));
        b.signal.session_target = -5;
        assert!(!a.same_state(&b));
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        let dir = temp_data_dir("corrupt");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("snapshot.json");
        fs::write(&path, "{not json").unwrap();
        assert!(SnapshotStore::new(&path).load().is_err());
        let _ = fs::remove_dir_all(&dir);
    }
}
