/// The pattern rule table: every line shape the importer recognizes, compiled once per process.
///
/// An nmon capture is a sequence of lines whose first field says what the line is:
///
///   AAA,...            host identity and capture parameters
///   BBBP,nnn,cmd,...   output of configuration commands run at capture start (lsconf, lscpu, df)
///   ZZZZ,Tnnnn,...     declaration of a time code
///   NAME,description,col,col,...    declaration of a series and its columns
///   NAME,Tnnnn,val,val,...          a data row for a series at a time code
///   TOP,pid,Tnnnn,...               a per-process sample
///
/// The header pass classifies lines by running the header rules in order; the first rule that
/// matches decides the category.  The order is significant, several of the BBB rules overlap.
/// Lines that do not start with AAA, BBB or ZZZZ never match a header rule, so the scan is
/// skipped for them.
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::borrow::Cow;

/// Counters and attributes of a fibre-channel adapter, as found in the `fcstat` output in the
/// BBB section.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterField {
    Wwpn,
    Speed,
    Attention,
    LipCount,
    NosCount,
    ErrorFrames,
    DumpedFrames,
    LinkFailures,
    LossOfSync,
    LossOfSignal,
    InvalidTx,
    InvalidCrc,
}

/// Line categories of the header pass.  Capture group 1 (and for some kinds group 2) of the
/// matching rule holds the extracted value.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    TimeCode,
    Host,
    Serial,
    ViosVersion,
    AixVersion,
    AixTechLevel,
    Lpar,
    AixMachineType,
    AixCpus,
    AixSmt,
    AixCpuType,
    AixCpuMode,
    AixFirmware,
    LinuxSerial,
    LinuxVersion,
    LinuxKernel,
    LinuxMachineType,
    LinuxCpus,
    X86Cpus,
    X86CpuMode,
    LinuxSmt,
    LinuxCpuType,
    LinuxFirmware,
    LinuxBmcFirmware,
    Uptime,
    Adapter(AdapterField),
    Filesystem,
    Info,
}

pub struct RuleTable {
    all_cpus: Regex,
    disks: Regex,
    header_rules: Vec<(Regex, HeaderKind)>,
    header_marker: Regex,
    row_skip: Regex,
    data_row: Regex,
    process_row: Regex,
    nfs: Regex,
    trailing_digits: Regex,
    powerpc_prefix: Regex,
    whitespace: Regex,
}

static RULES: Lazy<RuleTable> = Lazy::new(RuleTable::build);

/// The process-wide rule table.

pub fn rules() -> &'static RuleTable {
    &RULES
}

// The patterns are all literals known to be valid, so unwrap() is fine here.
fn re(s: &str) -> Regex {
    Regex::new(s).unwrap()
}

impl RuleTable {
    fn build() -> RuleTable {
        use AdapterField::*;
        use HeaderKind::*;

        let fc = |label: &str, value: &str, field: AdapterField| {
            (
                re(&format!(r"^BBB.*FC\d+.(fcs\d+).{label}\S*\s*{value}")),
                Adapter(field),
            )
        };

        let header_rules = vec![
            (re(r"^ZZZZ.(T\d+).(.*)$"), TimeCode),
            (re(r"^AAA.host.(\S+)"), Host),
            (re(r"^AAA.SerialNumber.(\S+)"), Serial),
            (re(r"^AAA.VIOS.(\S+)"), ViosVersion),
            (re(r"^AAA.AIX.(\S+)"), AixVersion),
            (re(r"^AAA.TL.(\d+)"), AixTechLevel),
            (re(r"^AAA.LPARNumberName.(\d+).(\S+)"), Lpar),
            (re(r"^AAA.MachineType.IBM.(\S+)"), AixMachineType),
            (
                re(r"^BBB.*lparstat.*Active.Physical.CPUs.in.system\s*:\s*(\d+)"),
                AixCpus,
            ),
            (re(r"^BBB.*smt threads.(\d+)"), AixSmt),
            (re(r"^BBB.*lsconf.*Processor.Type:\s*(\w+)"), AixCpuType),
            (
                re(r#"^BBB.*lsconf.*Processor.Implementation.Mode:\s*([^"]+)"#),
                AixCpuMode,
            ),
            (
                re(r"^BBB.*lsconf.*Firmware.Version:\s*(IBM,)*([\w.]+)"),
                AixFirmware,
            ),
            (re(r"^BBB.*ppc64_utils.*lscfg.*\shost0.*(\w{7})"), LinuxSerial),
            (re(r#"^BBB.*/etc/\S*PRETTY_NAME=["Q]*([^"Q*]+)"#), LinuxVersion),
            (re(r"^AAA.*Linux[,;]([^,;]+)[,;]"), LinuxKernel),
            (
                re(r"^BBB.*ppc64_utils.*lscfg.*Model Name: (\S{8})"),
                LinuxMachineType,
            ),
            (
                re(r"^BBB.*ppc64_cpu.*cores.*Number.of.cores.present\W+(\d+)"),
                LinuxCpus,
            ),
            (re(r"^AAA.x86.Cores.(\d+)"), X86Cpus),
            (re(r"^AAA.x86.ModelName.*(\w{2}-\d{4})"), X86CpuMode),
            (re(r"^BBB.*lscpu.*Thread.*per.core.*(\d+)"), LinuxSmt),
            (re(r"^BBB.*lscpu.*Model.name:\s*(\w+)"), LinuxCpuType),
            (
                re(r"^BBB.*ppc64_utils.*lsmcode.*Firmware\sis\s*([\w.]+)"),
                LinuxFirmware,
            ),
            (
                re(r"^BBB.*ppc64_utils.*lsmcode.*bmc-firmware-version-\s*([\w.]+)"),
                LinuxBmcFirmware,
            ),
            (re(r"^BBB.*uptime.*up\s+([\w\s:]+)"), Uptime),
            fc("World Wide Port Name", r"0x(\w{16})", Wwpn),
            fc(r"Port Speed \(running\)", r"(\d+)", Speed),
            fc("Attention Type", r"(.*)", Attention),
            fc("LIP Count", r"(\d+)", LipCount),
            fc("NOS Count", r"(\d+)", NosCount),
            fc("Error Frames", r"(\d+)", ErrorFrames),
            fc("Dumped Frames", r"(\d+)", DumpedFrames),
            fc("Link Failure Count", r"(\d+)", LinkFailures),
            fc("Loss of Sync Count", r"(\d+)", LossOfSync),
            fc("Loss of Signal", r"(\d+)", LossOfSignal),
            fc("Invalid Tx Word Count", r"(\d+)", InvalidTx),
            fc("Invalid CRC Count", r"(\d+)", InvalidCrc),
            (re(r#"^BBBP.\d+.\S*df\s?-m.\s*"?([^"]*)"?"#), Filesystem),
            (re(r"^AAA.(.*)"), Info),
        ];

        RuleTable {
            all_cpus: re(r"^CPU\d+|^SCPU\d+|^PCPU\d+"),
            disks: re(r"^DISK"),
            header_rules,
            header_marker: re(r"^AAA|^BBB|^UARG|\WT\d{4,16}"),
            row_skip: re(r"T0+\W|^Z|^TOP.%CPU"),
            data_row: re(r"\W(T\d{4,16})"),
            process_row: re(r"^TOP.\d+.(T\d+)"),
            nfs: re(r"^NFS"),
            trailing_digits: re(r"\d+$"),
            powerpc_prefix: re(r"(?i)PowerPC_"),
            whitespace: re(r"\s+"),
        }
    }

    /// True for the per-CPU series (CPU01, SCPU01, PCPU01), which are suppressed unless the
    /// configuration asks for them.

    pub fn is_per_cpu(&self, line: &str) -> bool {
        self.all_cpus.is_match(line)
    }

    /// True for the DISK* series.

    pub fn is_disk(&self, line: &str) -> bool {
        self.disks.is_match(line)
    }

    /// Run the header rules in order and return the category and captures of the first match.

    pub fn classify_header<'a>(&self, line: &'a str) -> Option<(HeaderKind, Captures<'a>)> {
        if !(line.starts_with("AAA") || line.starts_with("BBB") || line.starts_with("ZZZZ")) {
            return None;
        }
        for (rule, kind) in &self.header_rules {
            if let Some(caps) = rule.captures(line) {
                return Some((*kind, caps));
            }
        }
        None
    }

    /// True for lines that belong to the header or carry a time code, ie, that can't be series
    /// declarations.

    pub fn is_header_marker(&self, line: &str) -> bool {
        self.header_marker.is_match(line)
    }

    /// True for lines the data pass never treats as data rows: rows for the zero time code, time
    /// declarations, and the TOP banner.

    pub fn is_skipped_row(&self, line: &str) -> bool {
        self.row_skip.is_match(line)
    }

    /// If the line is a data row, return its time code.

    pub fn data_row_code<'a>(&self, line: &'a str) -> Option<&'a str> {
        self.data_row
            .captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }

    /// If the line is a per-process sample, return its time code.

    pub fn process_row_code<'a>(&self, line: &'a str) -> Option<&'a str> {
        self.process_row
            .captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }

    /// The measurement a series is stored under: the series name without trailing digits, so that
    /// DISKBUSY1, DISKBUSY2, ... all land in DISKBUSY.  NFS series and per-CPU series keep their
    /// names.

    pub fn measurement_name<'a>(&self, series: &'a str) -> Cow<'a, str> {
        if self.nfs.is_match(series) || self.all_cpus.is_match(series) {
            Cow::Borrowed(series)
        } else {
            self.trailing_digits.replace(series, "")
        }
    }

    /// "PowerPC_POWER9" -> "POWER9"

    pub fn normalize_cpu_type(&self, s: &str) -> String {
        self.powerpc_prefix.replace_all(s, "").into_owned()
    }

    /// "POWER9 Compatible" -> "POWER9Compatible"

    pub fn normalize_cpu_mode(&self, s: &str) -> String {
        self.whitespace.replace_all(s, "").into_owned()
    }
}

#[test]
fn test_classify_order() {
    let r = rules();
    let (k, c) = r.classify_header("ZZZZ,T0001,18:30:17,06-NOV-2022").unwrap();
    assert!(k == HeaderKind::TimeCode);
    assert!(&c[1] == "T0001" && &c[2] == "18:30:17,06-NOV-2022");

    let (k, c) = r.classify_header("AAA,host,WSCLN2").unwrap();
    assert!(k == HeaderKind::Host && &c[1] == "WSCLN2");

    // Not a more specific rule, so it falls through to Info
    let (k, c) = r.classify_header("AAA,progname,topas_nmon").unwrap();
    assert!(k == HeaderKind::Info && &c[1] == "progname,topas_nmon");

    let (k, c) = r
        .classify_header("BBBB,0017,fcstat,FC1,fcs0,World Wide Port Name: 0x10000090FA8E1F2A")
        .unwrap();
    assert!(k == HeaderKind::Adapter(AdapterField::Wwpn));
    assert!(&c[1] == "fcs0" && &c[2] == "10000090FA8E1F2A");

    let (k, c) = r
        .classify_header("BBBP,010,lsconf,\"Firmware Version: IBM,FW950.30 (VL950_092)\"")
        .unwrap();
    assert!(k == HeaderKind::AixFirmware && &c[2] == "FW950.30");

    assert!(r.classify_header("CPU_ALL,T0001,10.0,5.0,0.0,85.0").is_none());
    assert!(r.classify_header("BBBX,unknown").is_none());
}

#[test]
fn test_row_shapes() {
    let r = rules();
    assert!(r.data_row_code("CPU_ALL,T0001,10.0,5.0") == Some("T0001"));
    assert!(r.data_row_code("CPU_ALL,CPU Total h1,User%,Sys%").is_none());
    assert!(r.process_row_code("TOP,0012345,T0002,12.5") == Some("T0002"));
    assert!(r.process_row_code("TOP,+PID,Time,%CPU").is_none());
    assert!(r.is_skipped_row("ZZZZ,T0001,18:30:17,06-NOV-2022"));
    assert!(r.is_skipped_row("TOP,%CPU Utilisation"));
    assert!(r.is_skipped_row("CPU_ALL,T0000,1,2"));
    assert!(!r.is_skipped_row("CPU_ALL,T0001,1,2"));
    assert!(r.is_per_cpu("CPU12,T0001,1,2") && r.is_per_cpu("PCPU01,T0001"));
    assert!(!r.is_per_cpu("CPU_ALL,T0001,1,2"));
}

#[test]
fn test_measurement_name() {
    let r = rules();
    assert!(r.measurement_name("DISKBUSY1") == "DISKBUSY");
    assert!(r.measurement_name("CPU_ALL") == "CPU_ALL");
    assert!(r.measurement_name("CPU01") == "CPU01");
    assert!(r.measurement_name("NFSCLIV4") == "NFSCLIV4");
    assert!(r.normalize_cpu_type("PowerPC_POWER9") == "POWER9");
    assert!(r.normalize_cpu_mode("POWER9 Compatible ") == "POWER9Compatible");
}
