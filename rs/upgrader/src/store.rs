use crate::error::{UpgraderError, UpgraderResult};
use crate::record::UpgradeRecord;
use crate::types::DevnetRef;
use slog::{warn, Logger};
use std::{
    fs, io,
    io::Write,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use tempfile::NamedTempFile;

/// Result of scanning the state directory for active upgrades. Corrupt
/// record files are surfaced alongside the readable records so one bad file
/// cannot block recovery of the other devnets.
#[derive(Debug, Default)]
pub struct ActiveScan {
    pub records: Vec<UpgradeRecord>,
    pub corrupt: Vec<UpgraderError>,
}

/// Durable, file-backed store of upgrade records, one JSON file per devnet
/// under the state directory. Owns the on-disk representation exclusively;
/// every other component holds at most a transient in-memory copy and
/// writes back through `save`.
///
/// Writes go through a temp file in the same directory followed by a
/// rename, so a crash mid-write never leaves a partially-written record.
pub struct StateStore {
    dir: PathBuf,
    logger: Logger,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>, logger: Logger) -> UpgraderResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            UpgraderError::IoError(format!("Failed to create state directory {dir:?}"), e)
        })?;
        Ok(Self { dir, logger })
    }

    fn record_path(&self, devnet: &DevnetRef) -> PathBuf {
        self.dir
            .join(format!("{}__{}.json", devnet.namespace, devnet.name))
    }

    /// Atomically persist the record, replacing any previous version.
    pub fn save(&self, record: &UpgradeRecord) -> UpgraderResult<()> {
        let path = self.record_path(&record.devnet);
        let contents = serde_json::to_vec_pretty(record).map_err(|e| {
            UpgraderError::IoError(
                format!("Failed to serialize record for {}", record.devnet),
                io::Error::other(e),
            )
        })?;

        let mut tmp = NamedTempFile::new_in(&self.dir)
            .map_err(|e| UpgraderError::file_write_error(&path, e))?;
        tmp.write_all(&contents)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| UpgraderError::file_write_error(&path, e))?;
        tmp.persist(&path)
            .map_err(|e| UpgraderError::file_write_error(&path, e.error))?;
        Ok(())
    }

    /// Load the record for a devnet. `Ok(None)` when no record exists;
    /// unparseable content is a `CorruptState` error, never discarded.
    pub fn load(&self, devnet: &DevnetRef) -> UpgraderResult<Option<UpgradeRecord>> {
        let path = self.record_path(devnet);
        Self::load_path(&path)
    }

    fn load_path(path: &Path) -> UpgraderResult<Option<UpgradeRecord>> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(UpgraderError::file_read_error(path, e)),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| UpgraderError::corrupt_state(path, e))
    }

    pub fn delete(&self, devnet: &DevnetRef) -> UpgraderResult<()> {
        let path = self.record_path(devnet);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(UpgraderError::IoError(
                format!("Failed to delete record {path:?}"),
                e,
            )),
        }
    }

    /// Move a record aside under a timestamped name, preserving it for
    /// audit. Used before a retry creates a fresh record for the devnet.
    pub fn archive(&self, devnet: &DevnetRef) -> UpgraderResult<PathBuf> {
        let path = self.record_path(devnet);
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let archived = path.with_extension(format!("{stamp}.archive"));
        fs::rename(&path, &archived).map_err(|e| {
            UpgraderError::IoError(format!("Failed to archive record {path:?}"), e)
        })?;
        Ok(archived)
    }

    /// Every record not in a terminal phase, plus the errors for record
    /// files that could not be parsed.
    pub fn list_active(&self) -> UpgraderResult<ActiveScan> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            UpgraderError::IoError(format!("Failed to read state directory {:?}", self.dir), e)
        })?;

        let mut scan = ActiveScan::default();
        for entry in entries {
            let entry = entry.map_err(|e| {
                UpgraderError::IoError(
                    format!("Failed to read state directory {:?}", self.dir),
                    e,
                )
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::load_path(&path) {
                Ok(Some(record)) if !record.phase.is_terminal() => scan.records.push(record),
                Ok(_) => {}
                Err(e) => {
                    warn!(self.logger, "Skipping unreadable record: {}", e);
                    scan.corrupt.push(e);
                }
            }
        }
        Ok(scan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::PhaseOutcome;
    use crate::types::{BinaryRef, UpgradeHeight, UpgradeSpec};
    use tempfile::TempDir;

    fn test_record(name: &str) -> UpgradeRecord {
        UpgradeRecord::new(UpgradeSpec {
            devnet: DevnetRef::new("default", name),
            title: "upgrade".to_string(),
            description: "test".to_string(),
            target_binary: BinaryRef::Image("chaind:v2".to_string()),
            height: UpgradeHeight::BlocksFromNow(10),
            voting_period: None,
            export_before: false,
            export_after: false,
            export_dir: None,
        })
    }

    fn test_store(dir: &TempDir) -> StateStore {
        StateStore::new(dir.path(), slog::Logger::root(slog::Discard, slog::o!())).unwrap()
    }

    #[test]
    fn save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let mut record = test_record("alpha");
        record.set_proposal_id(42).unwrap();
        record.target_height = Some(1100);

        store.save(&record).unwrap();
        let loaded = store.load(&record.devnet).unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn load_of_missing_record_is_none() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        assert!(store.load(&DevnetRef::new("default", "ghost")).unwrap().is_none());
    }

    #[test]
    fn save_replaces_the_previous_version() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let mut record = test_record("alpha");
        store.save(&record).unwrap();

        record.advance(PhaseOutcome::Succeeded).unwrap();
        store.save(&record).unwrap();

        let loaded = store.load(&record.devnet).unwrap().unwrap();
        assert_eq!(loaded.phase, record.phase);
    }

    #[test]
    fn corrupt_record_is_surfaced_and_left_in_place() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let devnet = DevnetRef::new("default", "alpha");
        let path = store.record_path(&devnet);
        fs::write(&path, b"{ truncated").unwrap();

        assert!(matches!(
            store.load(&devnet),
            Err(UpgraderError::CorruptState(_, _))
        ));
        // the file must survive for forensics
        assert!(path.exists());

        let scan = store.list_active().unwrap();
        assert!(scan.records.is_empty());
        assert_eq!(scan.corrupt.len(), 1);
    }

    #[test]
    fn list_active_skips_terminal_records() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let active = test_record("active");
        store.save(&active).unwrap();

        let mut done = test_record("done");
        done.advance(PhaseOutcome::Cancelled).unwrap();
        store.save(&done).unwrap();

        let scan = store.list_active().unwrap();
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.records[0].devnet, active.devnet);
        assert!(scan.corrupt.is_empty());
    }

    #[test]
    fn delete_removes_the_record() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let record = test_record("alpha");
        store.save(&record).unwrap();

        store.delete(&record.devnet).unwrap();
        assert!(store.load(&record.devnet).unwrap().is_none());
        // deleting an already-missing record is not an error
        store.delete(&record.devnet).unwrap();
    }

    #[test]
    fn archive_moves_the_record_aside() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let record = test_record("alpha");
        store.save(&record).unwrap();

        let archived = store.archive(&record.devnet).unwrap();
        assert!(archived.exists());
        assert!(store.load(&record.devnet).unwrap().is_none());
        // archived files do not show up as active
        assert!(store.list_active().unwrap().records.is_empty());
    }
}
