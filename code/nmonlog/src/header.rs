/// The header pass: one scan over the lines of a capture that collects everything the data pass
/// needs to turn rows into points.
///
/// The pass produces:
///
/// - the host metadata (identity, OS, CPU and firmware information),
/// - the schema, ie the column names of every declared series,
/// - the time code table,
/// - per-adapter fibre-channel statistics and per-filesystem snapshots from the BBB section,
/// - the descriptive text of the AAA section.
///
/// Malformed lines are skipped with a diagnostic; the pass itself never fails.
use crate::error::{parse_skip, Result};
use crate::rules::{rules, AdapterField, HeaderKind};
use crate::timestamps::{Timezone, TimestampTable};

use regex::Captures;
use serde::Serialize;
use std::collections::BTreeMap;

/// Identity and configuration of the host the capture was taken on.  Fields that the header does
/// not provide are empty strings.

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HostMetadata {
    pub hostname: String,
    pub serial: String,

    /// "aix", "vios" or "linux"
    pub os: String,
    pub os_version: String,
    pub os_release: String,
    pub machine_type: String,

    /// Physical CPUs in the system; "0" when unknown.
    pub cpus: String,
    pub smt: String,
    pub cpu_type: String,
    pub cpu_mode: String,
    pub firmware: String,
    pub uptime: String,
    pub lpar_number: String,
    pub lpar_name: String,
}

impl HostMetadata {
    /// The SMT level as a number, 1 when absent or not numeric.

    pub fn smt_level(&self) -> f64 {
        match self.smt.parse::<f64>() {
            Ok(v) if !v.is_nan() => v,
            _ => 1.0,
        }
    }
}

/// Series name -> ordered column names.  The columns are the fields of the series declaration
/// after the name and the description.

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Schema {
    series: BTreeMap<String, Vec<String>>,
}

impl Schema {
    pub fn new() -> Schema {
        Default::default()
    }

    /// A later declaration of the same series replaces the earlier one.

    pub fn declare(&mut self, series: &str, columns: Vec<String>) {
        self.series.insert(series.to_string(), columns);
    }

    pub fn columns(&self, series: &str) -> Option<&[String]> {
        self.series.get(series).map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.series.iter()
    }
}

/// Statistics for one fibre-channel adapter.  Every field is set independently by its own header
/// line, and any of them may be missing.

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AdapterStats {
    pub wwpn: Option<String>,
    pub speed: Option<String>,
    pub attention: Option<String>,
    pub lip_count: Option<String>,
    pub nos_count: Option<String>,
    pub error_frames: Option<String>,
    pub dumped_frames: Option<String>,
    pub link_failures: Option<String>,
    pub loss_of_sync: Option<String>,
    pub loss_of_signal: Option<String>,
    pub invalid_tx: Option<String>,
    pub invalid_crc: Option<String>,
}

impl AdapterStats {
    pub fn set(&mut self, field: AdapterField, value: &str) {
        let slot = match field {
            AdapterField::Wwpn => &mut self.wwpn,
            AdapterField::Speed => &mut self.speed,
            AdapterField::Attention => &mut self.attention,
            AdapterField::LipCount => &mut self.lip_count,
            AdapterField::NosCount => &mut self.nos_count,
            AdapterField::ErrorFrames => &mut self.error_frames,
            AdapterField::DumpedFrames => &mut self.dumped_frames,
            AdapterField::LinkFailures => &mut self.link_failures,
            AdapterField::LossOfSync => &mut self.loss_of_sync,
            AdapterField::LossOfSignal => &mut self.loss_of_signal,
            AdapterField::InvalidTx => &mut self.invalid_tx,
            AdapterField::InvalidCrc => &mut self.invalid_crc,
        };
        *slot = Some(value.to_string());
    }

    /// The counters reported as FCSTAT points, by their point name.

    pub fn counters(&self) -> [(&'static str, Option<&str>); 10] {
        [
            ("speed", self.speed.as_deref()),
            ("lipcnt", self.lip_count.as_deref()),
            ("noscnt", self.nos_count.as_deref()),
            ("errframe", self.error_frames.as_deref()),
            ("dumpframe", self.dumped_frames.as_deref()),
            ("linkfail", self.link_failures.as_deref()),
            ("losssync", self.loss_of_sync.as_deref()),
            ("losssig", self.loss_of_signal.as_deref()),
            ("invtx", self.invalid_tx.as_deref()),
            ("invcrc", self.invalid_crc.as_deref()),
        ]
    }
}

/// Usage of one filesystem at capture start, from the `df -m` output.  Sizes are in MB.  Linux
/// does not report inode usage, so those fields are zero there.

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilesystemSnapshot {
    pub mount: String,
    pub blocks_mb: f64,
    pub used_mb: f64,
    pub used_pct: f64,
    pub iused: f64,
    pub iused_pct: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderOptions {
    /// Keep the per-CPU series (CPU01, ...).
    pub import_all_cpus: bool,

    /// Drop the DISK* series.
    pub skip_disks: bool,
}

/// Everything the header pass learned about one file.

#[derive(Debug, Clone)]
pub struct HeaderInfo {
    pub metadata: HostMetadata,
    pub schema: Schema,
    pub timestamps: TimestampTable,

    /// The AAA section as "key: value" lines.
    pub info: String,
    pub adapters: BTreeMap<String, AdapterStats>,
    pub filesystems: BTreeMap<String, FilesystemSnapshot>,
}

/// Run the header pass over the lines of one file.

pub fn scan_header<S: AsRef<str>>(
    lines: &[S],
    delimiter: char,
    opts: &HeaderOptions,
    tz: Timezone,
) -> HeaderInfo {
    let r = rules();
    let mut meta = HostMetadata::default();
    let mut schema = Schema::new();
    let mut timestamps = TimestampTable::new(tz);
    let mut info = String::new();
    let mut adapters = BTreeMap::<String, AdapterStats>::new();
    let mut filesystems = BTreeMap::<String, FilesystemSnapshot>::new();
    let mut aix_cpus = "0".to_string();
    let mut linux_cpus = "0".to_string();
    let mut first_description: Option<String> = None;

    for line in lines {
        let line = line.as_ref();

        if r.is_per_cpu(line) && !opts.import_all_cpus {
            continue;
        }
        if r.is_disk(line) && opts.skip_disks {
            continue;
        }

        if let Some((kind, caps)) = r.classify_header(line) {
            let v = cap(&caps, 1);
            match kind {
                HeaderKind::TimeCode => timestamps.declare(v, cap(&caps, 2)),
                HeaderKind::Host => meta.hostname = v.to_lowercase(),
                HeaderKind::Serial | HeaderKind::LinuxSerial => meta.serial = v.to_uppercase(),
                HeaderKind::ViosVersion => {
                    // The AIX level seen so far is the level the VIOS runs on.
                    meta.os = "vios".to_string();
                    meta.os_release = std::mem::take(&mut meta.os_version);
                    meta.os_version = v.to_lowercase();
                }
                HeaderKind::AixVersion => {
                    if meta.os == "vios" {
                        meta.os_release = v.to_lowercase();
                    } else {
                        meta.os = "aix".to_string();
                        meta.os_version = v.to_lowercase();
                    }
                }
                HeaderKind::AixTechLevel => {
                    if meta.os != "vios" {
                        meta.os_release = v.to_string();
                    }
                }
                HeaderKind::Lpar => {
                    meta.lpar_number = v.to_string();
                    meta.lpar_name = cap(&caps, 2).to_string();
                }
                HeaderKind::AixMachineType | HeaderKind::LinuxMachineType => {
                    meta.machine_type = v.to_uppercase()
                }
                HeaderKind::AixCpus => aix_cpus = v.to_string(),
                HeaderKind::LinuxCpus | HeaderKind::X86Cpus => linux_cpus = v.to_string(),
                HeaderKind::AixSmt | HeaderKind::LinuxSmt => meta.smt = v.to_string(),
                HeaderKind::AixCpuType => meta.cpu_type = r.normalize_cpu_type(v),
                HeaderKind::LinuxCpuType => meta.cpu_type = v.to_string(),
                HeaderKind::AixCpuMode => meta.cpu_mode = r.normalize_cpu_mode(v),
                HeaderKind::X86CpuMode => meta.cpu_mode = v.to_string(),
                HeaderKind::AixFirmware => meta.firmware = cap(&caps, 2).to_string(),
                HeaderKind::LinuxFirmware => meta.firmware = v.to_string(),
                HeaderKind::LinuxBmcFirmware => meta.firmware = format!("bmcFW{v}"),
                HeaderKind::LinuxVersion => meta.os_version = v.to_string(),
                HeaderKind::LinuxKernel => {
                    meta.os = "linux".to_string();
                    meta.os_release = v.to_string();
                }
                HeaderKind::Uptime => meta.uptime = v.to_string(),
                HeaderKind::Adapter(field) => {
                    adapters
                        .entry(v.to_string())
                        .or_default()
                        .set(field, cap(&caps, 2));
                }
                HeaderKind::Filesystem => {
                    let linux = meta.os == "linux";
                    match parse_df_line(v, linux) {
                        Ok((device, snapshot)) => {
                            // On Linux the first line for a device wins, except that /run is
                            // always taken.  On AIX the last line wins.
                            if !linux
                                || snapshot.mount == "/run"
                                || !filesystems.contains_key(&device)
                            {
                                filesystems.insert(device, snapshot);
                            }
                        }
                        Err(e) => {
                            tracing::trace!("{e}");
                        }
                    }
                }
                HeaderKind::Info => {
                    info += &v.replace(delimiter, ": ");
                    info.push('\n');
                }
            }
            continue;
        }

        if r.is_header_marker(line) || line.is_empty() {
            continue;
        }

        match parse_declaration(line, delimiter) {
            Ok((name, description, columns)) => {
                tracing::debug!("Adding series {name}");
                if first_description.is_none() {
                    first_description = Some(description.to_string());
                }
                schema.declare(name, columns);
            }
            Err(e) => {
                tracing::debug!("{e}: {line}");
            }
        }
    }

    meta.cpus = if aix_cpus == "0" { linux_cpus } else { aix_cpus };

    if meta.hostname.is_empty() {
        if let Some(desc) = first_description {
            if let Some(word) = desc.split_whitespace().last() {
                meta.hostname = word.to_lowercase();
            }
        }
    }

    tracing::debug!("Host metadata: {:?}", meta);
    for (dev, stats) in &adapters {
        tracing::debug!("Adapter {dev}: {:?}", stats);
    }

    HeaderInfo {
        metadata: meta,
        schema,
        timestamps,
        info,
        adapters,
        filesystems,
    }
}

fn cap<'a>(caps: &Captures<'a>, n: usize) -> &'a str {
    caps.get(n).map_or("", |m| m.as_str())
}

/// Split a series declaration into name, description and columns.

fn parse_declaration(line: &str, delimiter: char) -> Result<(&str, &str, Vec<String>)> {
    let doubled: String = [delimiter, delimiter].iter().collect();
    if line.contains(&doubled) {
        return Err(parse_skip("doubled delimiter"));
    }
    let elems = line.split(delimiter).collect::<Vec<&str>>();
    if elems.len() < 3 {
        return Err(parse_skip("too few fields in series declaration"));
    }
    let columns = elems[2..].iter().map(|s| s.to_string()).collect();
    Ok((elems[0], elems[1], columns))
}

/// Parse one line of `df -m` output into the device name and its snapshot.  The column layout
/// differs between the OS families:
///
///   Linux:  Filesystem 1M-blocks Used Available Use% Mounted-on
///   AIX:    Filesystem MB-blocks Free %Used Iused %Iused Mounted-on

fn parse_df_line(text: &str, linux: bool) -> Result<(String, FilesystemSnapshot)> {
    let elems = text.split_whitespace().collect::<Vec<&str>>();
    let (min_fields, nvalues, excluded): (usize, usize, &[&str]) = if linux {
        (6, 4, &["Filesystem", "shm", "overlay"][..])
    } else {
        (7, 5, &["Filesystem", "dproc"][..])
    };
    if elems.len() < min_fields {
        return Err(parse_skip("too few fields in df line"));
    }
    if excluded.contains(&elems[0]) {
        return Err(parse_skip(format!("excluded filesystem {}", elems[0])));
    }
    let values = elems[1..=nvalues]
        .iter()
        .filter_map(|s| s.replacen('%', "", 1).parse::<f64>().ok())
        .filter(|v| !v.is_nan())
        .collect::<Vec<f64>>();
    if values.len() < nvalues {
        return Err(parse_skip("non-numeric value in df line"));
    }
    let device = match elems[0].strip_prefix("ddev") {
        Some(rest) => format!("/dev{rest}"),
        None => elems[0].to_string(),
    };
    let snapshot = if linux {
        FilesystemSnapshot {
            mount: elems[5].to_string(),
            blocks_mb: values[0],
            used_mb: values[1],
            used_pct: values[1] / values[0] * 100.0,
            iused: 0.0,
            iused_pct: 0.0,
        }
    } else {
        FilesystemSnapshot {
            mount: elems[6].to_string(),
            blocks_mb: values[0],
            used_mb: values[0] - values[1],
            used_pct: values[2],
            iused: values[3],
            iused_pct: values[4],
        }
    };
    Ok((device, snapshot))
}

#[cfg(test)]
fn scan_text(text: &str, opts: &HeaderOptions) -> HeaderInfo {
    use chrono::FixedOffset;
    let lines = text.lines().collect::<Vec<&str>>();
    scan_header(
        &lines,
        ',',
        opts,
        Timezone::Fixed(FixedOffset::east_opt(0).unwrap()),
    )
}

#[test]
fn test_aix_header() {
    let text = "AAA,progname,topas_nmon
AAA,host,WSCLN2
AAA,SerialNumber,78abc12
AAA,AIX,7.2.5.3
AAA,TL,05
AAA,LPARNumberName,7,wscln2
AAA,MachineType,IBM,9009-42a
BBBP,001,lsconf,\"Processor Type: PowerPC_POWER9\"
BBBP,002,lsconf,\"Processor Implementation Mode: POWER 9\"
BBBP,003,lsconf,\"Firmware Version: IBM,FW950.30 (VL950_092)\"
BBBP,004,lparstat -i,\"Active Physical CPUs in system   : 16\"
BBBP,005,smt threads,4
BBBB,0017,fcstat,FC1,fcs0,World Wide Port Name: 0x10000090FA8E1F2A
BBBB,0018,fcstat,FC1,fcs0,Port Speed (running): 16 GBIT
BBBB,0019,fcstat,FC1,fcs0,Error Frames: 3
BBBB,0020,fcstat,FC2,fcs1,LIP Count: 0
ZZZZ,T0001,18:30:17,06-NOV-2022
CPU_ALL,CPU Total wscln2,User%,Sys%,Wait%,Idle%,Busy,PhysicalCPUs
CPU01,CPU 1 wscln2,User%,Sys%,Wait%,Idle%
MEM,Memory wscln2,Real Free %,Virtual free %
DISKBUSY,Disk %Busy wscln2,hdisk0,hdisk1
BROKEN,,x,y
SHORT,only
CPU_ALL,T0001,10.0,5.0,0.0,85.0,,16
";
    let h = scan_text(text, &HeaderOptions::default());
    let m = &h.metadata;
    assert!(m.hostname == "wscln2");
    assert!(m.serial == "78ABC12");
    assert!(m.os == "aix" && m.os_version == "7.2.5.3" && m.os_release == "05");
    assert!(m.lpar_number == "7" && m.lpar_name == "wscln2");
    assert!(m.machine_type == "9009-42A");
    assert!(m.cpu_type == "POWER9");
    assert!(m.cpu_mode == "POWER9");
    assert!(m.firmware == "FW950.30");
    assert!(m.cpus == "16");
    assert!(m.smt == "4" && m.smt_level() == 4.0);

    assert!(h.timestamps.len() == 1);
    assert!(h.schema.columns("CPU_ALL").unwrap().len() == 6);
    assert!(h.schema.columns("MEM").unwrap()[0] == "Real Free %");
    assert!(h.schema.columns("DISKBUSY").is_some());
    assert!(h.schema.columns("CPU01").is_none());
    assert!(h.schema.columns("BROKEN").is_none());
    assert!(h.schema.columns("SHORT").is_none());
    assert!(h.schema.len() == 3);

    assert!(h.adapters.len() == 2);
    let fcs0 = &h.adapters["fcs0"];
    assert!(fcs0.wwpn.as_deref() == Some("10000090FA8E1F2A"));
    assert!(fcs0.speed.as_deref() == Some("16"));
    assert!(fcs0.error_frames.as_deref() == Some("3"));
    assert!(fcs0.lip_count.is_none());
    assert!(h.adapters["fcs1"].lip_count.as_deref() == Some("0"));

    assert!(h.info == "progname: topas_nmon\n");
}

#[test]
fn test_header_options() {
    let text = "CPU01,CPU 1 h1,User%,Sys%
DISKBUSY,Disk %Busy h1,hdisk0
";
    let h = scan_text(
        text,
        &HeaderOptions {
            import_all_cpus: true,
            skip_disks: true,
        },
    );
    assert!(h.schema.columns("CPU01").is_some());
    assert!(h.schema.columns("DISKBUSY").is_none());
}

#[test]
fn test_vios_precedence() {
    // The AIX level before the VIOS marker becomes the release, and so does a later one
    let h = scan_text(
        "AAA,AIX,7.2.5.3\nAAA,VIOS,3.1.4.10\nAAA,TL,05\n",
        &HeaderOptions::default(),
    );
    assert!(h.metadata.os == "vios");
    assert!(h.metadata.os_version == "3.1.4.10");
    assert!(h.metadata.os_release == "7.2.5.3");

    let h = scan_text(
        "AAA,VIOS,3.1.4.10\nAAA,AIX,7.2.5.4\n",
        &HeaderOptions::default(),
    );
    assert!(h.metadata.os == "vios" && h.metadata.os_release == "7.2.5.4");
}

#[test]
fn test_linux_header() {
    let text = "AAA,host,lnx01
AAA,OS,Linux,5.14.0-284.el9.ppc64le,#1 SMP,ppc64le
AAA,x86,Cores,8
BBBP,001,/etc/release,\"PRETTY_NAME=\"Red Hat Enterprise Linux 9.2\"\"
BBBP,002,lscpu,\"Thread(s) per core:  8\"
BBBP,003,lscpu,\"Model name:          POWER9 (architected), altivec supported\"
BBBP,010,df -m,\"Filesystem     1M-blocks  Used Available Use% Mounted on\"
BBBP,011,df -m,\"/dev/sda1          1000   250       750  25% /\"
BBBP,012,df -m,\"/dev/sda1          2000   500      1500  25% /again\"
BBBP,013,df -m,\"tmpfs               100    10        90  10% /run\"
BBBP,014,df -m,\"shm                 100     0       100   0% /dev/shm\"
BBBP,015,df -m,\"ddev/sdb1          400   100       300  25% /data\"
";
    let h = scan_text(text, &HeaderOptions::default());
    let m = &h.metadata;
    assert!(m.os == "linux");
    assert!(m.os_release == "5.14.0-284.el9.ppc64le");
    assert!(m.os_version == "Red Hat Enterprise Linux 9.2");
    assert!(m.cpus == "8");
    assert!(m.smt == "8");
    assert!(m.cpu_type == "POWER9");

    assert!(h.filesystems.len() == 3);
    let root = &h.filesystems["/dev/sda1"];
    assert!(root.mount == "/" && root.blocks_mb == 1000.0 && root.used_pct == 25.0);
    assert!(h.filesystems["tmpfs"].mount == "/run");
    assert!(h.filesystems["/dev/sdb1"].mount == "/data");
    assert!(!h.filesystems.contains_key("shm"));
}

#[test]
fn test_linux_quoted_release() {
    // nmon writes the quotes inside a quoted field as Q
    let text = "AAA,note,runs Linux happily
AAA,OS,Linux,6.1.0-18-amd64,#1 SMP,x86_64
BBBP,001,/etc/release,\"PRETTY_NAME=QDebian GNU/Linux 12 (bookworm)Q\"
";
    let h = scan_text(text, &HeaderOptions::default());
    assert!(h.metadata.os_version == "Debian GNU/Linux 12 (bookworm)");
    assert!(h.metadata.os == "linux");
    assert!(h.metadata.os_release == "6.1.0-18-amd64");

    // Free text mentioning Linux is not the kernel line
    let h = scan_text("AAA,note,runs Linux happily\n", &HeaderOptions::default());
    assert!(h.metadata.os == "");
    assert!(h.metadata.os_release == "");
}

#[test]
fn test_aix_df() {
    let (dev, fs) = parse_df_line(
        "/dev/hd4   1024.00   512.00   50%   9000   7% /",
        false,
    )
    .unwrap();
    assert!(dev == "/dev/hd4");
    assert!(fs.mount == "/" && fs.used_mb == 512.0 && fs.used_pct == 50.0);
    assert!(fs.iused == 9000.0 && fs.iused_pct == 7.0);
    assert!(parse_df_line("/proc - - - - - /proc", false).is_err());
    assert!(parse_df_line("dproc 1 1 1 1 1 /x", false).is_err());
}

#[test]
fn test_hostname_fallback() {
    let h = scan_text(
        "CPU_ALL,CPU Total h1,User%,Sys%,Wait%,Idle%\n",
        &HeaderOptions::default(),
    );
    assert!(h.metadata.hostname == "h1");
    assert!(h.metadata.cpus == "0");
    assert!(h.metadata.smt_level() == 1.0);
}
