/// Incremental import: what was imported from each file last time.
///
/// For every file (keyed by its base name, so a file keeps its checkpoint when it is moved) the
/// store keeps the literal stamp of the latest row imported and the checksum of the file content
/// at the time.  Before a file is imported, the gate compares checksums: an unchanged file is
/// skipped outright.  A changed file is imported from the stored stamp onward, since nmon files
/// grow by appending.
use crate::error::{ImportError, Result};
use crate::timestamps::MIN_STAMP;

use nmonutils::Timestamp;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Checkpoint {
    /// A raw stamp as declared in the file, eg "18:30:17,06-NOV-2022".  May be empty.
    pub timestamp: String,

    /// Content checksum.  May be empty.
    pub checksum: String,
}

pub trait CheckpointStore {
    /// The latest checkpoint for the file, if any.
    fn read(&mut self, file: &str) -> anyhow::Result<Option<Checkpoint>>;

    /// Record a checkpoint for the file.  `recorded` is the time of recording.
    fn write(&mut self, file: &str, recorded: Timestamp, checkpoint: &Checkpoint)
        -> anyhow::Result<()>;
}

/// Decide whether a file needs importing.  Returns the stamp to resume from, or
/// `ChecksumUnchanged` if the file is known and unchanged.  With `force`, the file is always
/// imported, from the beginning.

pub fn gate(
    file: &str,
    prior: Option<&Checkpoint>,
    checksum: &str,
    force: bool,
) -> Result<String> {
    if force {
        return Ok(MIN_STAMP.to_string());
    }
    match prior {
        Some(cp) => {
            if !cp.checksum.is_empty() && cp.checksum == checksum {
                return Err(ImportError::ChecksumUnchanged {
                    file: file.to_string(),
                });
            }
            if cp.timestamp.is_empty() {
                Ok(MIN_STAMP.to_string())
            } else {
                Ok(cp.timestamp.clone())
            }
        }
        None => Ok(MIN_STAMP.to_string()),
    }
}

/// A store that keeps checkpoints in memory.  Every write is also kept in `log`.

#[derive(Debug, Default)]
pub struct MemoryCheckpoints {
    pub current: HashMap<String, Checkpoint>,
    pub log: Vec<(String, Timestamp, Checkpoint)>,
}

impl MemoryCheckpoints {
    pub fn new() -> MemoryCheckpoints {
        Default::default()
    }
}

impl CheckpointStore for MemoryCheckpoints {
    fn read(&mut self, file: &str) -> anyhow::Result<Option<Checkpoint>> {
        Ok(self.current.get(file).cloned())
    }

    fn write(
        &mut self,
        file: &str,
        recorded: Timestamp,
        checkpoint: &Checkpoint,
    ) -> anyhow::Result<()> {
        self.current.insert(file.to_string(), checkpoint.clone());
        self.log
            .push((file.to_string(), recorded, checkpoint.clone()));
        Ok(())
    }
}

#[test]
fn test_gate() {
    let cp = Checkpoint {
        timestamp: "18:30:17,06-NOV-2022".to_string(),
        checksum: "abc".to_string(),
    };
    assert!(gate("f.nmon", None, "abc", false).unwrap() == MIN_STAMP);
    assert!(matches!(
        gate("f.nmon", Some(&cp), "abc", false),
        Err(ImportError::ChecksumUnchanged { .. })
    ));
    assert!(gate("f.nmon", Some(&cp), "abc", true).unwrap() == MIN_STAMP);
    assert!(gate("f.nmon", Some(&cp), "def", false).unwrap() == "18:30:17,06-NOV-2022");

    let partial = Checkpoint {
        timestamp: "".to_string(),
        checksum: "".to_string(),
    };
    assert!(gate("f.nmon", Some(&partial), "", false).unwrap() == MIN_STAMP);
}

#[test]
fn test_memory_checkpoints() {
    let mut store = MemoryCheckpoints::new();
    assert!(store.read("a.nmon").unwrap().is_none());
    let cp = Checkpoint {
        timestamp: "t".to_string(),
        checksum: "c".to_string(),
    };
    store.write("a.nmon", nmonutils::epoch(), &cp).unwrap();
    assert!(store.read("a.nmon").unwrap() == Some(cp));
    assert!(store.log.len() == 1);
}
