/// The checkpoint log: an append-only file of JSON records, one per line,
///
///   {"file":"web01_221106_1830.nmon","time":"2022-11-06T00:00:00+00:00",
///    "timestamp":"18:35:17,06-NOV-2022","checksum":"9f86d0..."}
///
/// where `file` is the base name of the capture, `time` is when the record was written, and
/// `timestamp` and `checksum` are the checkpoint proper.  The last record for a file wins.  The
/// whole log is read when it is opened; lines that cannot be decoded are logged and ignored.
use anyhow::{bail, Result};
use nmonlog::{Checkpoint, CheckpointStore};
use nmonutils::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Debug)]
struct Record {
    file: String,
    time: String,
    timestamp: String,
    checksum: String,
}

pub struct JsonLinesCheckpoints {
    path: PathBuf,
    current: HashMap<String, Checkpoint>,
}

/// $HOME/.nmonimport/checkpoints.jsonl

pub fn default_log_path() -> Result<String> {
    match env::var("HOME") {
        Ok(home) => Ok(Path::new(&home)
            .join(".nmonimport")
            .join("checkpoints.jsonl")
            .to_string_lossy()
            .to_string()),
        Err(_) => bail!("No --checkpoint-log and no $HOME"),
    }
}

impl JsonLinesCheckpoints {
    /// Open the log, creating its directory if necessary.  The log itself is created on the first
    /// write.

    pub fn open(path: &str) -> Result<JsonLinesCheckpoints> {
        let path = PathBuf::from(path);
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let mut current = HashMap::new();
        if path.exists() {
            let text = fs::read_to_string(&path)?;
            for (lineno, line) in text.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Record>(line) {
                    Ok(r) => {
                        current.insert(
                            r.file,
                            Checkpoint {
                                timestamp: r.timestamp,
                                checksum: r.checksum,
                            },
                        );
                    }
                    Err(e) => tracing::warn!(
                        "{}:{}: bad checkpoint record: {e}",
                        path.display(),
                        lineno + 1
                    ),
                }
            }
        }
        tracing::debug!("{} checkpoints in {}", current.len(), path.display());
        Ok(JsonLinesCheckpoints { path, current })
    }
}

impl CheckpointStore for JsonLinesCheckpoints {
    fn read(&mut self, file: &str) -> anyhow::Result<Option<Checkpoint>> {
        Ok(self.current.get(file).cloned())
    }

    fn write(
        &mut self,
        file: &str,
        recorded: Timestamp,
        checkpoint: &Checkpoint,
    ) -> anyhow::Result<()> {
        let record = Record {
            file: file.to_string(),
            time: recorded.to_rfc3339(),
            timestamp: checkpoint.timestamp.clone(),
            checksum: checkpoint.checksum.clone(),
        };
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(out, "{}", serde_json::to_string(&record)?)?;
        self.current.insert(file.to_string(), checkpoint.clone());
        Ok(())
    }
}

#[cfg(test)]
use crate::lineproto::LineProtocolSink;
#[cfg(test)]
use nmonlog::{import_file, ImportOptions, ImportOutcome, SourceFile};

#[cfg(test)]
fn scratch_log(name: &str) -> PathBuf {
    let dir = env::temp_dir().join(format!("nmonimport-{}-{name}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    dir.join("state").join("checkpoints.jsonl")
}

#[test]
fn test_last_record_wins() {
    let log = scratch_log("records");
    let name = log.to_string_lossy().to_string();
    let first = Checkpoint {
        timestamp: "18:30:17,06-NOV-2022".to_string(),
        checksum: "aaa".to_string(),
    };
    let second = Checkpoint {
        timestamp: "18:35:17,06-NOV-2022".to_string(),
        checksum: "bbb".to_string(),
    };
    {
        let mut store = JsonLinesCheckpoints::open(&name).unwrap();
        assert!(store.read("x.nmon").unwrap().is_none());
        store.write("x.nmon", nmonutils::now(), &first).unwrap();
        store.write("y.nmon", nmonutils::now(), &first).unwrap();
        store.write("x.nmon", nmonutils::now(), &second).unwrap();
        assert!(store.read("x.nmon").unwrap() == Some(second.clone()));
    }

    // Garbage in the log is skipped
    let mut f = OpenOptions::new().append(true).open(&log).unwrap();
    writeln!(f, "{{not json").unwrap();
    drop(f);

    let mut store = JsonLinesCheckpoints::open(&name).unwrap();
    assert!(store.read("x.nmon").unwrap() == Some(second));
    assert!(store.read("y.nmon").unwrap() == Some(first));
    assert!(fs::read_to_string(&log).unwrap().lines().count() == 4);
    fs::remove_dir_all(log.parent().unwrap().parent().unwrap()).unwrap();
}

#[test]
fn test_import_twice() {
    let log = scratch_log("import");
    let name = log.to_string_lossy().to_string();
    let text = fs::read_to_string("../tests/nmonlog/sample-aix.nmon").unwrap();
    let file = SourceFile::new("/data/web01.nmon", &text, "c1");
    let cfg = nmonutils::ImportConfig {
        timezone: "+00:00".to_string(),
        ..Default::default()
    };
    let opts = ImportOptions::from_config(&cfg).unwrap();

    let mut sink = LineProtocolSink::new(vec![]);
    {
        let mut store = JsonLinesCheckpoints::open(&name).unwrap();
        let outcome = import_file(&file, &opts, &mut sink, &mut store).unwrap();
        assert!(matches!(outcome, ImportOutcome::Imported { points, .. } if points > 0));
    }
    let lines = String::from_utf8(sink.into_inner()).unwrap();
    assert!(lines.lines().all(|l| l.split(' ').count() >= 3));

    // A new process sees the checkpoint and skips the file
    let mut store = JsonLinesCheckpoints::open(&name).unwrap();
    let cp = store.read("web01.nmon").unwrap().unwrap();
    assert!(cp.checksum == "c1");
    assert!(cp.timestamp == "18:35:17,06-NOV-2022");
    let mut sink = LineProtocolSink::new(vec![]);
    let outcome = import_file(&file, &opts, &mut sink, &mut store).unwrap();
    assert!(outcome == ImportOutcome::Unchanged);
    assert!(sink.into_inner().is_empty());
    fs::remove_dir_all(log.parent().unwrap().parent().unwrap()).unwrap();
}
