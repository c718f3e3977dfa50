//! Durable snapshots of standings and match transcripts.
//!
//! Everything goes through a write-temp-then-rename pattern so a crash
//! mid-write never corrupts the previous valid snapshot. Persistence lives
//! off the hot path: callers log failures and keep going.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::match_runner::MatchRecord;
use crate::standings::StandingsTable;

const STANDINGS_FILE: &str = "standings.json";
const MATCH_DIR: &str = "matches";

/// Filesystem store for standings snapshots and finished-match transcripts.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Opens (and creates if needed) a snapshot directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<SnapshotStore> {
        let dir = dir.into();
        fs::create_dir_all(dir.join(MATCH_DIR))
            .with_context(|| format!("creating snapshot directory {}", dir.display()))?;
        Ok(SnapshotStore { dir })
    }

    /// Persists the standings table, atomically replacing the previous snapshot.
    pub fn write_standings(&self, table: &StandingsTable) -> Result<()> {
        self.write_atomic(&self.dir.join(STANDINGS_FILE), table)
    }

    /// Loads the last standings snapshot, if one survived a previous run.
    pub fn load_standings(&self) -> Result<Option<StandingsTable>> {
        self.load(&self.dir.join(STANDINGS_FILE))
    }

    /// Archives a finished match, including its full envelope transcript.
    pub fn archive_match(&self, record: &MatchRecord) -> Result<()> {
        let path = self.dir.join(MATCH_DIR).join(format!("{}.json", record.fixture.id));
        self.write_atomic(&path, record)
    }

    /// Loads an archived match by id.
    pub fn load_match(&self, match_id: &str) -> Result<Option<MatchRecord>> {
        self.load(&self.dir.join(MATCH_DIR).join(format!("{match_id}.json")))
    }

    fn write_atomic<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(value).context("serializing snapshot")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &json).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
        Ok(())
    }

    fn load<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        let value = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MatchReport;
    use crate::outcome::Outcome;
    use crate::standings::ScoreWeights;

    #[test]
    fn standings_survive_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();

        let mut table = StandingsTable::with_players(["P01".to_owned(), "P02".to_owned()]);
        table
            .apply(
                &MatchReport {
                    match_id: "R1M1".into(),
                    player_a: "P01".into(),
                    player_b: "P02".into(),
                    outcome: Outcome::WinA,
                    drawn: Some(3),
                    cause: None,
                },
                &ScoreWeights::default(),
            )
            .unwrap();

        store.write_standings(&table).unwrap();
        let loaded = store.load_standings().unwrap().unwrap();
        assert_eq!(loaded.entry("P01").unwrap().points, 3);
        assert_eq!(loaded.entry("P02").unwrap().played, 1);
    }

    #[test]
    fn missing_snapshot_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        assert!(store.load_standings().unwrap().is_none());
        assert!(store.load_match("R9M9").unwrap().is_none());
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path()).unwrap();
        let table = StandingsTable::with_players(["P01".to_owned(), "P02".to_owned()]);
        store.write_standings(&table).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "tmp").unwrap_or(false))
            .collect();
        assert!(leftovers.is_empty());
    }
}
