/// The per-file import pipeline.
///
/// Importing a file is:
///
/// - look up the file's checkpoint and decide whether it needs importing at all,
/// - run the header pass to get the host metadata, the schema and the time codes,
/// - stream over the lines again, turning every data row into a point (plus the derived SYSINFO
///   and FCSTAT points), and every TOP row into a TOP point and a sample for the THREADS ranking,
/// - flush, and record a new checkpoint.
///
/// Problems with individual lines, rows and fields are logged at trace level and skipped.  Only a
/// sink failure or a checkpoint store failure aborts the import of a file.
use crate::checkpoint::{gate, Checkpoint, CheckpointStore};
use crate::error::{parse_skip, ImportError, Result};
use crate::header::{scan_header, HeaderInfo, HeaderOptions};
use crate::point::MetricPoint;
use crate::rules::rules;
use crate::sink::{BatchWriter, PointSink};
use crate::tagrules::TagRules;
use crate::timestamps::{parse_stamp, Timezone, MIN_STAMP, NOW_STAMP};
use crate::topk::{Ranking, ThreadSample, TopK, TOP_THREADS};

use nmonutils::{ImportConfig, Timestamp};
use regex::Regex;
use std::collections::HashSet;

/// Everything that controls an import, compiled from the configuration once per run.

#[derive(Debug)]
pub struct ImportOptions {
    pub timezone: Timezone,
    pub header: HeaderOptions,
    pub force: bool,
    pub skip_metrics: Option<Regex>,
    pub batch_size: usize,
    pub process_batch_size: usize,
    pub tag_rules: TagRules,
}

impl ImportOptions {
    pub fn from_config(cfg: &ImportConfig) -> Result<ImportOptions> {
        Ok(ImportOptions {
            timezone: Timezone::from_config(&cfg.timezone)?,
            header: HeaderOptions {
                import_all_cpus: cfg.import_all_cpus,
                skip_disks: cfg.skip_disks,
            },
            force: cfg.force,
            skip_metrics: compile_skip_metrics(&cfg.skip_metrics)?,
            batch_size: cfg.batch_size,
            process_batch_size: cfg.process_batch_size,
            tag_rules: TagRules::new(&cfg.inputs)?,
        })
    }
}

/// "^JFS,^NET" -> /^JFS|^NET/.  The empty string means nothing is skipped.

pub fn compile_skip_metrics(patterns: &str) -> Result<Option<Regex>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    match Regex::new(&patterns.replace(',', "|")) {
        Ok(re) => Ok(Some(re)),
        Err(e) => Err(ImportError::ConfigInvalid(format!(
            "Bad skip-metrics pattern '{patterns}': {e}"
        ))),
    }
}

/// One decoded capture file.

#[derive(Debug, Clone)]
pub struct SourceFile {
    /// The name the file was read from.
    pub name: String,
    pub lines: Vec<String>,
    pub delimiter: char,
    pub checksum: String,
}

impl SourceFile {
    /// Split decoded text into lines and detect the delimiter: the character following the first
    /// "AAA", if that is ',' or ';', otherwise ','.

    pub fn new(name: &str, text: &str, checksum: &str) -> SourceFile {
        let lines = text.lines().map(|l| l.to_string()).collect::<Vec<String>>();
        let delimiter = lines
            .iter()
            .find_map(|l| l.strip_prefix("AAA").and_then(|rest| rest.chars().next()))
            .filter(|c| *c == ',' || *c == ';')
            .unwrap_or(',');
        SourceFile {
            name: name.to_string(),
            lines,
            delimiter,
            checksum: checksum.to_string(),
        }
    }

    /// The checkpoint key: the file name without its directory.

    pub fn basename(&self) -> &str {
        std::path::Path::new(&self.name)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(self.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportOutcome {
    /// The checkpoint says the file has not changed; nothing was done.
    Unchanged,

    /// `points` points were written; `last_timestamp` is the raw stamp of the latest row written.
    Imported {
        points: usize,
        last_timestamp: Option<String>,
    },
}

/// Run the header pass only.

pub fn read_header(file: &SourceFile, opts: &ImportOptions) -> HeaderInfo {
    scan_header(&file.lines, file.delimiter, &opts.header, opts.timezone)
}

/// Import one file into `sink`, consulting and updating `checkpoints`.

pub fn import_file(
    file: &SourceFile,
    opts: &ImportOptions,
    sink: &mut dyn PointSink,
    checkpoints: &mut dyn CheckpointStore,
) -> Result<ImportOutcome> {
    let key = file.basename();
    tracing::info!("Importing {} (delimiter '{}')", file.name, file.delimiter);

    let prior = checkpoints
        .read(key)
        .map_err(ImportError::CheckpointFailure)?;
    tracing::debug!("Stored checkpoint for {key}: {:?}", prior);

    let resume_stamp = match gate(key, prior.as_ref(), &file.checksum, opts.force) {
        Ok(stamp) => stamp,
        Err(ImportError::ChecksumUnchanged { file: name }) => {
            tracing::info!("File not changed since last import: {name}");
            return Ok(ImportOutcome::Unchanged);
        }
        Err(e) => return Err(e),
    };

    let header = read_header(file, opts);
    let baseline = match parse_stamp(&resume_stamp, &opts.timezone) {
        Ok(t) => t,
        Err(_) => {
            tracing::warn!(
                "Unreadable stored timestamp '{resume_stamp}' for {key}, importing everything"
            );
            parse_stamp(MIN_STAMP, &opts.timezone)?
        }
    };

    let mut pass = DataPass {
        header: &header,
        opts,
        delimiter: file.delimiter,
        baseline,
        writer: BatchWriter::new(sink),
        threads: TopK::new(TOP_THREADS),
        logged_skips: HashSet::new(),
        last: None,
    };
    for line in &file.lines {
        pass.line(line)?;
    }
    if let Some(ranking) = pass.threads.finish() {
        pass.emit_threads(ranking)?;
    }
    pass.writer.flush()?;

    let points = pass.writer.written();
    let last_timestamp = pass.last.map(|(_, stamp)| stamp);

    // Also record a new checksum when nothing new was written, so that the file is not read
    // again until it changes.
    let stamp = match (&last_timestamp, &prior) {
        (Some(s), _) => Some(s.clone()),
        (None, Some(cp)) if !cp.timestamp.is_empty() => Some(cp.timestamp.clone()),
        _ => None,
    };
    if let Some(timestamp) = stamp {
        let recorded = parse_stamp(NOW_STAMP, &opts.timezone)?;
        checkpoints
            .write(
                key,
                recorded,
                &Checkpoint {
                    timestamp,
                    checksum: file.checksum.clone(),
                },
            )
            .map_err(ImportError::CheckpointFailure)?;
    }

    tracing::info!("File {} imported: {points} points", file.name);
    Ok(ImportOutcome::Imported {
        points,
        last_timestamp,
    })
}

struct DataPass<'a> {
    header: &'a HeaderInfo,
    opts: &'a ImportOptions,
    delimiter: char,
    baseline: Timestamp,
    writer: BatchWriter<'a>,
    threads: TopK,
    logged_skips: HashSet<String>,

    // Latest instant written, and its raw stamp.
    last: Option<(Timestamp, String)>,
}

impl<'a> DataPass<'a> {
    fn line(&mut self, line: &str) -> Result<()> {
        let r = rules();
        if r.is_per_cpu(line) && !self.opts.header.import_all_cpus {
            return Ok(());
        }
        if r.is_disk(line) && self.opts.header.skip_disks {
            return Ok(());
        }
        if r.is_skipped_row(line) {
            return Ok(());
        }
        if let Some(code) = r.process_row_code(line) {
            return self.process_row(line, code);
        }
        if let Some(code) = r.data_row_code(line) {
            return self.data_row(line, code);
        }
        Ok(())
    }

    fn is_skipped_metric(&mut self, name: &str) -> bool {
        let Some(re) = &self.opts.skip_metrics else {
            return false;
        };
        if !re.is_match(name) {
            return false;
        }
        if self.logged_skips.insert(name.to_string()) {
            tracing::debug!("Metric skipped: {name}");
        }
        true
    }

    // Resolve the row's time code and apply the resume filter.  None means drop the row.
    fn row_time(&self, code: &str) -> Option<(Timestamp, &'a str)> {
        let header = self.header;
        let stamp = match header.timestamps.raw(code) {
            Ok(s) => s,
            Err(e) => {
                tracing::trace!("{e}");
                return None;
            }
        };
        let time = match header.timestamps.resolve(code) {
            Ok(t) => t,
            Err(e) => {
                tracing::trace!("{e}");
                return None;
            }
        };
        if time < self.baseline && !self.opts.force {
            return None;
        }
        Some((time, stamp))
    }

    fn note_written(&mut self, time: Timestamp, stamp: &str) {
        match &self.last {
            Some((t, _)) if *t >= time => {}
            _ => self.last = Some((time, stamp.to_string())),
        }
    }

    fn emit(&mut self, mut point: MetricPoint, limit: usize) -> Result<()> {
        if point.fields.is_empty() {
            return Ok(());
        }
        self.opts.tag_rules.apply(&point.measurement, &mut point.tags);
        self.writer.push(point);
        self.writer.flush_at(limit)
    }

    fn data_row(&mut self, line: &str, code: &str) -> Result<()> {
        let elems = line.split(self.delimiter).collect::<Vec<&str>>();
        let name = elems[0];
        if self.is_skipped_metric(name) {
            return Ok(());
        }
        let Some((time, stamp)) = self.row_time(code) else {
            return Ok(());
        };
        let measurement = rules().measurement_name(name);
        let header = self.header;
        let meta = &header.metadata;

        let mut point = MetricPoint::new(&measurement, time);
        let columns = header.schema.columns(name).unwrap_or(&[]);
        for (i, value) in elems.iter().skip(2).enumerate() {
            let Some(column) = columns.get(i) else {
                tracing::trace!(
                    "{}",
                    ImportError::SchemaMismatch {
                        series: name.to_string(),
                        position: i + 1,
                    }
                );
                continue;
            };
            match parse_value(value) {
                Ok(v) => point.field(column, v),
                Err(e) => tracing::trace!("{e}"),
            }
        }
        point.tag("host", &meta.hostname);
        point.tag("name", name);
        match &*measurement {
            "CPU_ALL" => {
                point.tag("mtype", &meta.machine_type);
                point.tag("serial", &meta.serial);
                point.tag("smt", &meta.smt);
                point.tag("cpus_in_sys", &meta.cpus);
            }
            "MEM" => {
                point.tag("mtype", &meta.machine_type);
                point.tag("serial", &meta.serial);
            }
            _ => {}
        }
        let wrote = !point.fields.is_empty();
        self.emit(point, self.opts.batch_size)?;
        if wrote {
            self.note_written(time, stamp);
        }

        match &*measurement {
            "CPU_ALL" => self.emit_sysinfo(time, stamp)?,
            "FCREAD" => self.emit_fcstat(time, stamp)?,
            _ => {}
        }
        Ok(())
    }

    fn emit_sysinfo(&mut self, time: Timestamp, stamp: &str) -> Result<()> {
        let header = self.header;
        let meta = &header.metadata;
        let mut p = MetricPoint::with_value("SYSINFO", time, meta.smt_level());
        p.tag("host", &meta.hostname);
        p.tag("name", "smt");
        p.tag("mtype", &meta.machine_type);
        p.tag("serial", &meta.serial);
        p.tag("SysCPU", &meta.cpus);
        p.tag("CPUtype", &meta.cpu_type);
        p.tag("CPUmode", &meta.cpu_mode);
        p.tag("FWlevel", &meta.firmware);
        p.tag("os", &meta.os);
        p.tag("osver", &meta.os_version);
        p.tag("osrelease", &meta.os_release);
        p.tag("uptime", &meta.uptime);
        p.tag("lparnr", &meta.lpar_number);
        p.tag("lparname", &meta.lpar_name);
        self.emit(p, self.opts.batch_size)?;
        self.note_written(time, stamp);
        Ok(())
    }

    fn emit_fcstat(&mut self, time: Timestamp, stamp: &str) -> Result<()> {
        let header = self.header;
        let meta = &header.metadata;
        for (dev, stats) in &header.adapters {
            for (counter, raw) in stats.counters() {
                // A counter that is missing or not numeric is reported as 1.
                let value = raw.and_then(|s| parse_value(s).ok()).unwrap_or(1.0);
                let mut p = MetricPoint::with_value("FCSTAT", time, value);
                p.tag("name", counter);
                p.tag("dev", dev);
                p.tag("wwpn", stats.wwpn.as_deref().unwrap_or(""));
                p.tag("atttype", stats.attention.as_deref().unwrap_or(""));
                p.tag("host", &meta.hostname);
                p.tag("mtype", &meta.machine_type);
                p.tag("serial", &meta.serial);
                p.tag("lparnr", &meta.lpar_number);
                p.tag("lparname", &meta.lpar_name);
                self.emit(p, self.opts.batch_size)?;
                self.note_written(time, stamp);
            }
        }
        Ok(())
    }

    // A TOP row is both a sample for the THREADS ranking of its time code and a TOP point of its
    // own.  The row layout is fixed:
    //
    //   TOP,pid,Tnnnn,%CPU,%Usr,%Sys,Threads,Size,ResText,ResData,CharIO,%RAM,Paging,Command[,WLMclass]
    fn process_row(&mut self, line: &str, code: &str) -> Result<()> {
        if let Some(ranking) = self.threads.advance(code) {
            self.emit_threads(ranking)?;
        }

        let elems = line.split(self.delimiter).collect::<Vec<&str>>();
        if elems.len() < 14 {
            tracing::debug!("{}: {line}", parse_skip("too few fields in TOP row"));
            return Ok(());
        }
        let pid = elems[1];
        let command = elems[13];
        if let Ok(threads) = parse_value(elems[6]) {
            self.threads.insert(ThreadSample {
                pid: pid.to_string(),
                command: command.to_string(),
                value: threads,
            });
        }

        if self.is_skipped_metric(elems[0]) {
            return Ok(());
        }
        let Some((time, stamp)) = self.row_time(code) else {
            return Ok(());
        };

        // The first schema column is the time, which has no value column of its own.
        let header = self.header;
        let columns = header.schema.columns("TOP").unwrap_or(&[]);
        let mut p = MetricPoint::new("TOP", time);
        for i in 3..12 {
            let Some(column) = columns.get(i - 2) else {
                continue;
            };
            match parse_value(elems[i]) {
                Ok(v) => p.field(column, v),
                Err(e) => tracing::trace!("{e}"),
            }
        }
        let meta = &header.metadata;
        p.tag("host", &meta.hostname);
        p.tag("pid", pid);
        p.tag("command", command);
        p.tag("wlm", elems.get(14).copied().unwrap_or("none"));
        p.tag("serial", &meta.serial);
        let wrote = !p.fields.is_empty();
        self.emit(p, self.opts.process_batch_size)?;
        if wrote {
            self.note_written(time, stamp);
        }
        Ok(())
    }

    fn emit_threads(&mut self, ranking: Ranking) -> Result<()> {
        let Some((time, stamp)) = self.row_time(&ranking.code) else {
            return Ok(());
        };
        let header = self.header;
        let meta = &header.metadata;
        for s in ranking.samples {
            let mut p = MetricPoint::with_value("THREADS", time, s.value);
            p.tag("host", &meta.hostname);
            p.tag("name", "maxThreads");
            p.tag("pid", &s.pid);
            p.tag("command", &s.command);
            p.tag("serial", &meta.serial);
            self.emit(p, self.opts.process_batch_size)?;
            self.note_written(time, stamp);
        }
        Ok(())
    }
}

/// A field value is a float; anything else, including NaN, is not a value.

pub fn parse_value(s: &str) -> Result<f64> {
    match s.parse::<f64>() {
        Ok(v) if !v.is_nan() => Ok(v),
        _ => Err(parse_skip(format!("not a number: '{s}'"))),
    }
}

#[cfg(test)]
use crate::checkpoint::MemoryCheckpoints;
#[cfg(test)]
use crate::sink::MemorySink;
#[cfg(test)]
use nmonutils::timestamp_from_ymdhms;

#[cfg(test)]
fn test_options(adjust: impl FnOnce(&mut ImportConfig)) -> ImportOptions {
    let mut cfg = ImportConfig::default();
    cfg.timezone = "+00:00".to_string();
    adjust(&mut cfg);
    ImportOptions::from_config(&cfg).unwrap()
}

#[cfg(test)]
fn load_fixture(name: &str, checksum: &str) -> SourceFile {
    let path = format!("../tests/nmonlog/{name}");
    let text = std::fs::read_to_string(&path).unwrap();
    SourceFile::new(&path, &text, checksum)
}

#[cfg(test)]
const MINIMAL: &str = "CPU_ALL,CPU Total h1,User%,Sys%,Wait%,Idle%
ZZZZ,T0001,18:30:17,06-NOV-2022
CPU_ALL,T0001,10.0,5.0,0.0,85.0
";

#[test]
fn test_minimal_file() {
    let file = SourceFile::new("h1.nmon", MINIMAL, "x");
    let opts = test_options(|_| {});
    let mut sink = MemorySink::new();
    let mut store = MemoryCheckpoints::new();
    let outcome = import_file(&file, &opts, &mut sink, &mut store).unwrap();
    assert!(
        outcome
            == ImportOutcome::Imported {
                points: 2,
                last_timestamp: Some("18:30:17,06-NOV-2022".to_string())
            }
    );

    let cpu = sink.measurement("CPU_ALL");
    assert!(cpu.len() == 1);
    let p = cpu[0];
    assert!(p.time == timestamp_from_ymdhms(2022, 11, 6, 18, 30, 17));
    assert!(p.get_field("User%") == Some(10.0));
    assert!(p.get_field("Sys%") == Some(5.0));
    assert!(p.get_field("Wait%") == Some(0.0));
    assert!(p.get_field("Idle%") == Some(85.0));
    assert!(p.fields.len() == 4);
    assert!(p.get_tag("host") == Some("h1"));

    let sys = sink.measurement("SYSINFO");
    assert!(sys.len() == 1);
    assert!(sys[0].get_field("value") == Some(1.0));
    assert!(sys[0].time == p.time);

    let cp = &store.current["h1.nmon"];
    assert!(cp.timestamp == "18:30:17,06-NOV-2022" && cp.checksum == "x");
}

#[test]
fn test_import_aix() {
    let file = load_fixture("sample-aix.nmon", "sum1");
    assert!(file.delimiter == ',');
    let opts = test_options(|_| {});
    let mut sink = MemorySink::new();
    let mut store = MemoryCheckpoints::new();
    let outcome = import_file(&file, &opts, &mut sink, &mut store).unwrap();
    assert!(
        outcome
            == ImportOutcome::Imported {
                points: 38,
                last_timestamp: Some("18:35:17,06-NOV-2022".to_string())
            }
    );
    assert!(sink.points.len() == 38);
    assert!(sink.measurement("CPU_ALL").len() == 2);
    assert!(sink.measurement("CPU01").is_empty());
    assert!(sink.measurement("SYSINFO").len() == 2);
    assert!(sink.measurement("MEM").len() == 2);
    assert!(sink.measurement("DISKBUSY").len() == 2);
    assert!(sink.measurement("FCREAD").len() == 2);
    assert!(sink.measurement("FCSTAT").len() == 20);
    assert!(sink.measurement("TOP").len() == 4);
    assert!(sink.measurement("THREADS").len() == 4);

    let cpu = sink.measurement("CPU_ALL")[0];
    assert!(cpu.fields.len() == 5);
    assert!(cpu.get_field("Busy").is_none());
    assert!(cpu.get_field("PhysicalCPUs") == Some(16.0));
    assert!(cpu.get_tag("host") == Some("web01"));
    assert!(cpu.get_tag("mtype") == Some("9009-42A"));
    assert!(cpu.get_tag("serial") == Some("78ABC12"));
    assert!(cpu.get_tag("smt") == Some("4"));
    assert!(cpu.get_tag("cpus_in_sys") == Some("16"));

    let mem = sink.measurement("MEM")[0];
    assert!(mem.get_field("Real Free %") == Some(12.5));
    assert!(mem.get_tag("serial") == Some("78ABC12"));
    assert!(mem.get_tag("smt").is_none());

    let disk = sink.measurement("DISKBUSY")[0];
    assert!(disk.get_field("hdisk0") == Some(1.5));
    assert!(disk.get_field("hdisk1").is_none());

    let sys = sink.measurement("SYSINFO")[0];
    assert!(sys.get_field("value") == Some(4.0));
    assert!(sys.get_tag("name") == Some("smt"));
    assert!(sys.get_tag("SysCPU") == Some("16"));
    assert!(sys.get_tag("CPUtype") == Some("POWER9"));
    assert!(sys.get_tag("CPUmode") == Some("POWER9"));
    assert!(sys.get_tag("FWlevel") == Some("FW950.30"));
    assert!(sys.get_tag("os") == Some("aix"));
    assert!(sys.get_tag("osver") == Some("7.2.5.3"));
    assert!(sys.get_tag("osrelease") == Some("05"));
    assert!(sys.get_tag("uptime") == Some("12 days"));
    assert!(sys.get_tag("lparnr") == Some("7"));
    assert!(sys.get_tag("lparname") == Some("web01"));

    let fc = sink.measurement("FCSTAT");
    let counter = |name: &str| {
        fc.iter()
            .find(|p| p.get_tag("name") == Some(name))
            .and_then(|p| p.get_field("value"))
    };
    assert!(counter("speed") == Some(16.0));
    assert!(counter("errframe") == Some(3.0));
    assert!(counter("lipcnt") == Some(0.0));
    assert!(counter("linkfail") == Some(1.0));
    assert!(fc[0].get_tag("dev") == Some("fcs0"));
    assert!(fc[0].get_tag("wwpn") == Some("10000090FA8E1F2A"));
    assert!(fc[0].get_tag("atttype") == Some("Link Up"));

    let top = sink.measurement("TOP");
    let java = top[0];
    assert!(java.get_tag("pid") == Some("0001234"));
    assert!(java.get_tag("command") == Some("java"));
    assert!(java.get_tag("wlm") == Some("Unclassified"));
    assert!(java.get_field("%CPU") == Some(50.1));
    assert!(java.get_field("Threads") == Some(12.0));
    assert!(java.get_field("%RAM") == Some(1.5));
    assert!(java.fields.len() == 9);
    assert!(top[3].get_tag("command") == Some("sshd"));
    assert!(top[3].get_tag("wlm") == Some("none"));

    let mut threads = sink
        .measurement("THREADS")
        .iter()
        .map(|p| (p.time, p.get_tag("pid").unwrap().to_string(), p.get_field("value").unwrap()))
        .collect::<Vec<_>>();
    threads.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
    let t1 = timestamp_from_ymdhms(2022, 11, 6, 18, 30, 17);
    let t2 = timestamp_from_ymdhms(2022, 11, 6, 18, 35, 17);
    assert!(
        threads
            == vec![
                (t1, "0001234".to_string(), 12.0),
                (t1, "0005678".to_string(), 40.0),
                (t2, "0001234".to_string(), 14.0),
                (t2, "0009999".to_string(), 3.0),
            ]
    );
}

#[test]
fn test_import_aix_suppression() {
    let file = load_fixture("sample-aix.nmon", "sum1");

    // Per-CPU series keep their own name as the measurement
    let opts = test_options(|c| c.import_all_cpus = true);
    let mut sink = MemorySink::new();
    let mut store = MemoryCheckpoints::new();
    import_file(&file, &opts, &mut sink, &mut store).unwrap();
    assert!(sink.points.len() == 40);
    let cpu01 = sink.measurement("CPU01");
    assert!(cpu01.len() == 2);
    assert!(cpu01[0].get_tag("name") == Some("CPU01"));
    assert!(cpu01[0].get_field("User%") == Some(20.0));
    assert!(sink.measurement("SYSINFO").len() == 2);

    let opts = test_options(|c| c.skip_disks = true);
    let mut sink = MemorySink::new();
    let mut store = MemoryCheckpoints::new();
    import_file(&file, &opts, &mut sink, &mut store).unwrap();
    assert!(sink.points.len() == 36);
    assert!(sink.measurement("DISKBUSY").is_empty());
    assert!(sink.measurement("CPU01").is_empty());
}

#[test]
fn test_out_of_range_stamp() {
    // A stamp that parses but lies outside what a point can carry drops its rows
    let text = "CPU_ALL,CPU Total h1,User%,Sys%,Wait%,Idle%
ZZZZ,T0001,18:30:17,06-NOV-2300
CPU_ALL,T0001,10.0,5.0,0.0,85.0
ZZZZ,T0002,18:35:17,06-NOV-2022
CPU_ALL,T0002,20.0,5.0,0.0,75.0
";
    let file = SourceFile::new("far.nmon", text, "x");
    let opts = test_options(|_| {});
    let mut sink = MemorySink::new();
    let mut store = MemoryCheckpoints::new();
    let outcome = import_file(&file, &opts, &mut sink, &mut store).unwrap();
    assert!(
        outcome
            == ImportOutcome::Imported {
                points: 2,
                last_timestamp: Some("18:35:17,06-NOV-2022".to_string())
            }
    );
    let cpu = sink.measurement("CPU_ALL");
    assert!(cpu.len() == 1 && cpu[0].get_field("User%") == Some(20.0));
    assert!(sink.points.iter().all(|p| p.to_line_protocol().is_ok()));
}

#[test]
fn test_checkpoint_cycle() {
    let opts = test_options(|_| {});
    let mut store = MemoryCheckpoints::new();

    let mut sink = MemorySink::new();
    let file = load_fixture("sample-aix.nmon", "sum1");
    import_file(&file, &opts, &mut sink, &mut store).unwrap();
    assert!(sink.points.len() == 38);
    assert!(store.log.len() == 1);

    // Same content: nothing is done, and the checkpoint is not touched
    let mut sink = MemorySink::new();
    let outcome = import_file(&file, &opts, &mut sink, &mut store).unwrap();
    assert!(outcome == ImportOutcome::Unchanged);
    assert!(sink.points.is_empty());
    assert!(store.log.len() == 1);

    // Changed content: resume from the last stamp, rows before it are dropped
    let mut sink = MemorySink::new();
    let file = load_fixture("sample-aix.nmon", "sum2");
    let outcome = import_file(&file, &opts, &mut sink, &mut store).unwrap();
    assert!(
        outcome
            == ImportOutcome::Imported {
                points: 19,
                last_timestamp: Some("18:35:17,06-NOV-2022".to_string())
            }
    );
    let t2 = timestamp_from_ymdhms(2022, 11, 6, 18, 35, 17);
    assert!(sink.points.iter().all(|p| p.time == t2));
    assert!(store.log.len() == 2);
    assert!(store.current["sample-aix.nmon"].checksum == "sum2");

    // Forced: everything again, even though the checksum is unchanged
    let forced = test_options(|c| c.force = true);
    let mut sink = MemorySink::new();
    import_file(&file, &forced, &mut sink, &mut store).unwrap();
    assert!(sink.points.len() == 38);
}

#[test]
fn test_unreadable_checkpoint() {
    let opts = test_options(|_| {});
    let mut store = MemoryCheckpoints::new();
    store.current.insert(
        "sample-aix.nmon".to_string(),
        Checkpoint {
            timestamp: "garbage".to_string(),
            checksum: "old".to_string(),
        },
    );
    let mut sink = MemorySink::new();
    let file = load_fixture("sample-aix.nmon", "new");
    import_file(&file, &opts, &mut sink, &mut store).unwrap();
    assert!(sink.points.len() == 38);
}

#[test]
fn test_import_linux() {
    let file = load_fixture("sample-linux.nmon", "lsum");
    assert!(file.delimiter == ';');
    let opts = test_options(|c| {
        c.timezone = "+02:00".to_string();
        c.skip_metrics = "^NET,^JFS".to_string();
    });
    let mut sink = MemorySink::new();
    let mut store = MemoryCheckpoints::new();
    let outcome = import_file(&file, &opts, &mut sink, &mut store).unwrap();
    assert!(matches!(outcome, ImportOutcome::Imported { points: 10, .. }));
    assert!(sink.measurement("NET").is_empty());
    assert!(sink.measurement("CPU001").is_empty());

    let cpu = sink.measurement("CPU_ALL")[0];
    assert!(cpu.time == timestamp_from_ymdhms(2023, 7, 1, 8, 0, 0));
    assert!(cpu.fields.len() == 6);
    assert!(cpu.get_tag("host") == Some("lnx01"));
    assert!(cpu.get_tag("cpus_in_sys") == Some("8"));
    assert!(cpu.get_tag("mtype").is_none());

    let sys = sink.measurement("SYSINFO")[0];
    assert!(sys.get_field("value") == Some(2.0));
    assert!(sys.get_tag("os") == Some("linux"));
    assert!(sys.get_tag("osver") == Some("Red Hat Enterprise Linux 9.2 (Plow)"));
    assert!(sys.get_tag("osrelease") == Some("5.14.0-284.el9.x86_64"));
    assert!(sys.get_tag("CPUtype") == Some("Intel"));
    assert!(sys.get_tag("CPUmode") == Some("E5-2680"));

    // DISKBUSY1 lands in DISKBUSY, and keeps its name as a tag
    let disks = sink.measurement("DISKBUSY");
    assert!(disks.len() == 4);
    assert!(disks
        .iter()
        .filter(|p| p.get_tag("name") == Some("DISKBUSY1"))
        .all(|p| p.get_field("sdc").is_some()));
    let last = disks
        .iter()
        .find(|p| p.get_tag("name") == Some("DISKBUSY") && p.time > cpu.time)
        .unwrap();
    assert!(last.get_field("sda") == Some(0.7));
    assert!(last.get_field("sdb").is_none());

    let header = read_header(&file, &opts);
    assert!(header.filesystems.len() == 2);
    assert!(header.info.starts_with("progname: nmon\n"));
}

#[test]
fn test_tag_rules_in_pipeline() {
    let opts = test_options(|c| {
        c.inputs = vec![nmonutils::TagInput {
            measurement: "CPU_ALL".to_string(),
            name: "host".to_string(),
            pattern: "^web".to_string(),
            tag: "role".to_string(),
            value: "frontend".to_string(),
        }]
    });

    let mut sink = MemorySink::new();
    let mut store = MemoryCheckpoints::new();
    let file = load_fixture("sample-aix.nmon", "a");
    import_file(&file, &opts, &mut sink, &mut store).unwrap();
    assert!(sink
        .measurement("CPU_ALL")
        .iter()
        .all(|p| p.get_tag("role") == Some("frontend")));
    assert!(sink.measurement("MEM").iter().all(|p| p.get_tag("role").is_none()));

    let mut sink = MemorySink::new();
    let text = format!("AAA,host,db01\n{MINIMAL}");
    let file = SourceFile::new("db01.nmon", &text, "b");
    import_file(&file, &opts, &mut sink, &mut store).unwrap();
    let cpu = sink.measurement("CPU_ALL");
    assert!(cpu.len() == 1);
    assert!(cpu[0].get_tag("host") == Some("db01"));
    assert!(cpu[0].get_tag("role").is_none());
}

#[test]
fn test_row_skips() {
    let text = "AAA,host,h1
CPU_ALL,CPU Total h1,User%,Sys%
MEM,Memory h1,Free
ZZZZ,T0001,18:30:17,06-NOV-2022
CPU_ALL,T0001,1.0,2.0,3.0,4.0
CPU_ALL,T0009,1.0,2.0
MEM,T0001,N/A
CPU_ALL,T0000,9.0,9.0
";
    let file = SourceFile::new("skips.nmon", text, "c");
    let opts = test_options(|_| {});
    let mut sink = MemorySink::new();
    let mut store = MemoryCheckpoints::new();
    import_file(&file, &opts, &mut sink, &mut store).unwrap();

    // Values beyond the schema are dropped, an undeclared code drops the row, a row without any
    // numeric value produces no point, and T0000 rows are never data
    let cpu = sink.measurement("CPU_ALL");
    assert!(cpu.len() == 1);
    assert!(cpu[0].fields.len() == 2);
    assert!(cpu[0].get_field("Sys%") == Some(2.0));
    assert!(sink.measurement("MEM").is_empty());
    assert!(sink.measurement("SYSINFO").len() == 1);
}

#[test]
fn test_sink_failure() {
    let file = load_fixture("sample-aix.nmon", "sum1");
    let opts = test_options(|c| c.batch_size = 1);
    let mut sink = MemorySink::new();
    sink.fail_after = Some(2);
    let mut store = MemoryCheckpoints::new();
    let result = import_file(&file, &opts, &mut sink, &mut store);
    assert!(matches!(result, Err(ImportError::SinkWriteFailure(_))));
    assert!(sink.points.len() == 2);
    assert!(store.log.is_empty());
}

#[test]
fn test_options_errors() {
    assert!(matches!(
        compile_skip_metrics("^JFS,(NET"),
        Err(ImportError::ConfigInvalid(_))
    ));
    let re = compile_skip_metrics("^JFS,^NET").unwrap().unwrap();
    assert!(re.is_match("NETPACKET") && re.is_match("JFSFILE") && !re.is_match("MEM"));
    assert!(compile_skip_metrics("").unwrap().is_none());

    let mut cfg = ImportConfig::default();
    cfg.timezone = "+30:00".to_string();
    assert!(matches!(
        ImportOptions::from_config(&cfg),
        Err(ImportError::ConfigInvalid(_))
    ));
}

#[test]
fn test_parse_value() {
    assert!(parse_value("12.5").unwrap() == 12.5);
    assert!(parse_value("").is_err());
    assert!(parse_value("N/A").is_err());
    assert!(parse_value("NaN").is_err());
}

#[test]
fn test_source_file() {
    let f = SourceFile::new("/var/perf/a.nmon", "AAA;host;x\r\nZZZZ;T0001;x\r\n", "");
    assert!(f.delimiter == ';');
    assert!(f.lines.len() == 2 && f.lines[0] == "AAA;host;x");
    assert!(f.basename() == "a.nmon");
    assert!(SourceFile::new("b.nmon", "", "").delimiter == ',');
}
