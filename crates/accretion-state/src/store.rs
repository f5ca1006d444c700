//! Ledger persistence.
//!
//! [`LedgerStore`] is a byte-level seam; [`DeploymentLedger::load`] and
//! [`DeploymentLedger::save`] are the only places the ledger crosses it.
//! `save` is the durability boundary: in-memory mutation before a save is
//! not durable.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StateError;
use crate::ledger::DeploymentLedger;
use crate::StateResult;

/// How [`DeploymentLedger::load`] treats a missing ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// A missing ledger is [`StateError::NotFound`].
    Existing,
    /// A missing ledger loads as an empty one.
    CreateIfMissing,
}

/// Byte-level ledger persistence.
pub trait LedgerStore: Send + Sync {
    /// Read the persisted bytes, or `None` if nothing has been persisted.
    fn read(&self) -> StateResult<Option<Vec<u8>>>;

    /// Replace the persisted bytes. Must be all-or-nothing.
    fn write(&self, bytes: &[u8]) -> StateResult<()>;

    /// Human-readable location used in error messages.
    fn location(&self) -> String;
}

impl DeploymentLedger {
    /// Load the ledger from `store`.
    pub fn load(store: &dyn LedgerStore, mode: LoadMode) -> StateResult<Self> {
        match store.read()? {
            Some(bytes) => DeploymentLedger::from_json_bytes(&bytes, &store.location()),
            None if mode == LoadMode::CreateIfMissing => Ok(DeploymentLedger::new()),
            None => Err(StateError::NotFound {
                location: store.location(),
            }),
        }
    }

    /// Serialize the whole ledger and write it to `store` in one step.
    pub fn save(&self, store: &dyn LedgerStore) -> StateResult<()> {
        let bytes = self.to_json_bytes()?;
        store.write(&bytes)?;
        debug!(location = %store.location(), regions = self.len(), "ledger saved");
        Ok(())
    }
}

/// Ledger stored as a JSON file.
///
/// Writes go to a temp file in the target directory that is then renamed
/// over the ledger, so readers see either the old or the new file.
#[derive(Debug, Clone)]
pub struct FsLedgerStore {
    path: PathBuf,
}

impl FsLedgerStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerStore for FsLedgerStore {
    fn read(&self) -> StateResult<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::Io(e)),
        }
    }

    fn write(&self, bytes: &[u8]) -> StateResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StateError::Io(e.error))?;
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{StackId, StackSlot};

    #[test]
    fn missing_file_is_not_found_unless_creating() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsLedgerStore::new(dir.path().join("deployment.json"));

        let err = DeploymentLedger::load(&store, LoadMode::Existing).unwrap_err();
        assert!(matches!(err, StateError::NotFound { .. }));

        let ledger = DeploymentLedger::load(&store, LoadMode::CreateIfMissing).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deployment.json");
        fs::write(&path, b"{ not json").unwrap();

        let err = DeploymentLedger::load(&FsLedgerStore::new(&path), LoadMode::Existing)
            .unwrap_err();
        match err {
            StateError::Corrupt { location, .. } => assert!(location.ends_with("deployment.json")),
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsLedgerStore::new(dir.path().join("nested").join("deployment.json"));

        let mut ledger = DeploymentLedger::with_regions(["us-east-1", "eu-central-1"]).unwrap();
        ledger
            .region_mut("us-east-1")
            .unwrap()
            .assign("us-east-1", StackSlot::Core, StackId::new("Accretion-abc"))
            .unwrap();
        ledger.save(&store).unwrap();

        let loaded = DeploymentLedger::load(&store, LoadMode::Existing).unwrap();
        assert_eq!(loaded, ledger);
    }

    #[test]
    fn save_leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsLedgerStore::new(dir.path().join("deployment.json"));
        DeploymentLedger::with_regions(["us-east-1"])
            .unwrap()
            .save(&store)
            .unwrap();
        DeploymentLedger::with_regions(["us-east-2"])
            .unwrap()
            .save(&store)
            .unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let loaded = DeploymentLedger::load(&store, LoadMode::Existing).unwrap();
        assert!(loaded.region("us-east-2").is_some());
        assert!(loaded.region("us-east-1").is_none());
    }
}
