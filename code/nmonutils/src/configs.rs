/// Read importer configuration data from a json file.
///
/// File format:
///
/// An object { ... } with the following named fields and value types, all optional:
///
///   timezone - string, an IANA zone name ("Europe/Oslo") or a fixed offset ("+02:00") used to
///      interpret the wall-clock stamps in the capture files.  Default: the local zone.
///   import-all-cpus - bool, import the per-CPU series (CPU01, SCPU01, PCPU01, ...)
///   skip-disks - bool, skip the DISK* series entirely
///   force - bool, reimport files even when their checkpoint says they are unchanged
///   skip-metrics - string, comma-separated regular expressions; series whose name matches any
///      of them are not imported
///   batch-size - integer, number of points buffered before a flush for bulk series
///   process-batch-size - integer, ditto for the per-process (TOP) series
///   checkpoint-log - string, path of the checkpoint log
///   inputs - array of objects, tag derivation rules, see below
///
/// Each element of `inputs` is an object with these fields, all strings and all required:
///
///   measurement - the measurement the rule applies to, or "_ALL" for every measurement
///   name - the tag whose value is tested
///   match - regular expression tested against the tag value
///   tag - the tag to add when the expression matches
///   value - the value of that tag
///
/// Any field name starting with '#' is reserved for arbitrary comments.
///
/// The regular expressions are not compiled here, that is up to the consumer.
use anyhow::{bail, Result};
use serde_json::Value;
use std::fs::File;
use std::io::BufReader;
use std::path;

pub const DEFAULT_BATCH_SIZE: usize = 5000;
pub const DEFAULT_PROCESS_BATCH_SIZE: usize = 10000;

// See above comment block for field documentation.

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub timezone: String,
    pub import_all_cpus: bool,
    pub skip_disks: bool,
    pub force: bool,
    pub skip_metrics: String,
    pub batch_size: usize,
    pub process_batch_size: usize,
    pub checkpoint_log: Option<String>,
    pub inputs: Vec<TagInput>,
}

impl Default for ImportConfig {
    fn default() -> ImportConfig {
        ImportConfig {
            timezone: "".to_string(),
            import_all_cpus: false,
            skip_disks: false,
            force: false,
            skip_metrics: "".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            process_batch_size: DEFAULT_PROCESS_BATCH_SIZE,
            checkpoint_log: None,
            inputs: vec![],
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TagInput {
    pub measurement: String,
    pub name: String,
    pub pattern: String,
    pub tag: String,
    pub value: String,
}

/// Since the input is human-generated and has many optional fields, I've opted to use the generic
/// JSON parser followed by explicit decoding of the fields, rather than a (derived) strongly-typed
/// parser.  This also makes it easy to reject misspelled field names.

pub fn read_import_config(filename: &str) -> Result<ImportConfig> {
    let file = File::open(path::Path::new(filename))?;
    let reader = BufReader::new(file);
    let v = serde_json::from_reader(reader)?;
    decode_import_config(&v)
}

pub fn decode_import_config(v: &Value) -> Result<ImportConfig> {
    let mut cfg: ImportConfig = Default::default();
    let Value::Object(fields) = v else {
        bail!("Expected an object value")
    };
    for name in fields.keys() {
        match name.as_str() {
            "timezone" | "import-all-cpus" | "skip-disks" | "force" | "skip-metrics"
            | "batch-size" | "process-batch-size" | "checkpoint-log" | "inputs" => {}
            _ if name.starts_with('#') => {}
            _ => bail!("Unknown configuration field '{name}'"),
        }
    }
    cfg.timezone = grab_string_opt(fields, "timezone")?;
    cfg.import_all_cpus = grab_bool_opt(fields, "import-all-cpus")?.unwrap_or(false);
    cfg.skip_disks = grab_bool_opt(fields, "skip-disks")?.unwrap_or(false);
    cfg.force = grab_bool_opt(fields, "force")?.unwrap_or(false);
    cfg.skip_metrics = grab_string_opt(fields, "skip-metrics")?;
    if let Some(n) = grab_usize_opt(fields, "batch-size")? {
        if n == 0 {
            bail!("Field 'batch-size' must be positive");
        }
        cfg.batch_size = n;
    }
    if let Some(n) = grab_usize_opt(fields, "process-batch-size")? {
        if n == 0 {
            bail!("Field 'process-batch-size' must be positive");
        }
        cfg.process_batch_size = n;
    }
    let log = grab_string_opt(fields, "checkpoint-log")?;
    if log != "" {
        cfg.checkpoint_log = Some(log);
    }
    match fields.get("inputs") {
        None => {}
        Some(Value::Array(objs)) => {
            for obj in objs {
                cfg.inputs.push(process_input(obj)?);
            }
        }
        Some(_) => bail!("Field 'inputs' must have an array value"),
    }
    Ok(cfg)
}

fn process_input(obj: &Value) -> Result<TagInput> {
    if let Value::Object(fields) = obj {
        Ok(TagInput {
            measurement: grab_string(fields, "measurement")?,
            name: grab_string(fields, "name")?,
            pattern: grab_string(fields, "match")?,
            tag: grab_string(fields, "tag")?,
            value: grab_string(fields, "value")?,
        })
    } else {
        bail!("Expected an object value in 'inputs'")
    }
}

fn grab_string(fields: &serde_json::Map<String, Value>, name: &str) -> Result<String> {
    if let Some(Value::String(s)) = fields.get(name) {
        Ok(s.to_string())
    } else {
        bail!("Field '{name}' must be present and have a string value");
    }
}

fn grab_string_opt(fields: &serde_json::Map<String, Value>, name: &str) -> Result<String> {
    if let Some(val) = fields.get(name) {
        if let Value::String(s) = val {
            Ok(s.to_string())
        } else {
            bail!("Field '{name}' must have a string value");
        }
    } else {
        Ok("".to_string())
    }
}

fn grab_usize_opt(fields: &serde_json::Map<String, Value>, name: &str) -> Result<Option<usize>> {
    if let Some(v) = fields.get(name) {
        if let Some(n) = v.as_u64() {
            match usize::try_from(n) {
                Ok(n) => Ok(Some(n)),
                Err(_e) => {
                    bail!("Field '{name}' must have unsigned integer value")
                }
            }
        } else {
            bail!("Field '{name}' must have unsigned integer value")
        }
    } else {
        Ok(None)
    }
}

fn grab_bool_opt(fields: &serde_json::Map<String, Value>, name: &str) -> Result<Option<bool>> {
    if let Some(d) = fields.get(name) {
        if let Value::Bool(b) = d {
            Ok(Some(*b))
        } else {
            bail!("Field '{name}' must have a boolean value");
        }
    } else {
        Ok(None)
    }
}

// Basic whitebox test that the reading works.

#[test]
fn test_config() {
    let conf = read_import_config("../tests/nmonutils/whitebox-config.json").unwrap();
    assert!(conf.timezone == "Europe/Paris");
    assert!(conf.import_all_cpus == false);
    assert!(conf.skip_disks == true);
    assert!(conf.force == false);
    assert!(conf.skip_metrics == "^JFS,^NET");
    assert!(conf.batch_size == 2000);
    assert!(conf.process_batch_size == DEFAULT_PROCESS_BATCH_SIZE);
    assert!(conf.checkpoint_log.as_deref() == Some("/var/lib/nmonimport/checkpoints.jsonl"));
    assert!(conf.inputs.len() == 2);
    assert!(
        conf.inputs[0]
            == TagInput {
                measurement: "CPU_ALL".to_string(),
                name: "host".to_string(),
                pattern: "^web".to_string(),
                tag: "role".to_string(),
                value: "frontend".to_string(),
            }
    );
    assert!(conf.inputs[1].measurement == "_ALL");
}

#[test]
fn test_config_defaults() {
    let conf = decode_import_config(&serde_json::json!({"# note": "nothing here"})).unwrap();
    assert!(conf.timezone == "");
    assert!(conf.batch_size == DEFAULT_BATCH_SIZE);
    assert!(conf.checkpoint_log.is_none());
    assert!(conf.inputs.is_empty());
}

#[test]
fn test_config_errors() {
    assert!(decode_import_config(&serde_json::json!([])).is_err());
    assert!(decode_import_config(&serde_json::json!({"forse": true})).is_err());
    assert!(decode_import_config(&serde_json::json!({"force": "yes"})).is_err());
    assert!(decode_import_config(&serde_json::json!({"batch-size": 0})).is_err());
    assert!(decode_import_config(&serde_json::json!({"batch-size": -5})).is_err());
    assert!(decode_import_config(&serde_json::json!({"inputs": {}})).is_err());
    assert!(decode_import_config(&serde_json::json!({
        "inputs": [{"measurement": "MEM", "name": "host", "match": "x", "tag": "t"}]
    }))
    .is_err());
}
