/// Print what the header pass learned about a file, without importing it.
///
/// The text form is one block per file: the file name, then indented `key: value` lines for the
/// host metadata (empty values omitted), the time frame covered by the file's time codes, the AAA
/// section, one line per series with its columns, one per adapter and one per filesystem.  Times
/// are UTC.  The JSON form is one object per file, on one line.
use anyhow::Result;
use itertools::Itertools;
use nmonlog::HeaderInfo;
use nmonutils::Timestamp;
use serde_json::{json, Value};
use std::io;

pub fn print_text(output: &mut dyn io::Write, name: &str, header: &HeaderInfo) -> Result<()> {
    writeln!(output, "{name}")?;
    if let Value::Object(fields) = serde_json::to_value(&header.metadata)? {
        for (k, v) in fields {
            if let Value::String(s) = v {
                if !s.is_empty() {
                    writeln!(output, "  {k}: {s}")?;
                }
            }
        }
    }
    writeln!(output, "  timecodes: {}", header.timestamps.len())?;
    if let Some((start, stop)) = header.timestamps.time_frame() {
        writeln!(output, "  start: {}", format_time(start))?;
        writeln!(output, "  stop: {}", format_time(stop))?;
    }
    for line in header.info.lines() {
        writeln!(output, "  info {line}")?;
    }
    for (series, columns) in header.schema.iter() {
        writeln!(output, "  series {series}: {}", columns.iter().join(","))?;
    }
    for (adapter, stats) in &header.adapters {
        writeln!(output, "  adapter {adapter}: {}", present_fields(serde_json::to_value(stats)?))?;
    }
    for (device, fs) in &header.filesystems {
        writeln!(output, "  filesystem {device}: {}", present_fields(serde_json::to_value(fs)?))?;
    }
    Ok(())
}

pub fn print_json(output: &mut dyn io::Write, name: &str, header: &HeaderInfo) -> Result<()> {
    let frame = header.timestamps.time_frame();
    let v = json!({
        "file": name,
        "metadata": header.metadata,
        "timecodes": header.timestamps.len(),
        "start": frame.map(|(start, _)| format_time(start)),
        "stop": frame.map(|(_, stop)| format_time(stop)),
        "info": header.info,
        "schema": header.schema,
        "adapters": header.adapters,
        "filesystems": header.filesystems,
    });
    writeln!(output, "{}", v)?;
    Ok(())
}

fn format_time(t: Timestamp) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

// "k=v,k=v" for the non-null members of an object.

fn present_fields(v: Value) -> String {
    match v {
        Value::Object(fields) => fields
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k}={s}"),
                other => format!("{k}={other}"),
            })
            .join(","),
        _ => "".to_string(),
    }
}

#[cfg(test)]
use nmonlog::{read_header, ImportOptions, SourceFile};

#[cfg(test)]
fn sample_header() -> HeaderInfo {
    let text = std::fs::read_to_string("../tests/nmonlog/sample-aix.nmon").unwrap();
    let file = SourceFile::new("web01.nmon", &text, "");
    let cfg = nmonutils::ImportConfig {
        timezone: "+00:00".to_string(),
        ..Default::default()
    };
    read_header(&file, &ImportOptions::from_config(&cfg).unwrap())
}

#[test]
fn test_print_text() {
    let mut out = vec![];
    print_text(&mut out, "web01.nmon", &sample_header()).unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines = text.lines().collect::<Vec<&str>>();
    assert!(lines[0] == "web01.nmon");
    assert!(lines.contains(&"  hostname: web01"));
    assert!(lines.contains(&"  serial: 78ABC12"));
    assert!(lines.contains(&"  timecodes: 2"));
    assert!(lines.contains(&"  start: 2022-11-06 18:30:17"));
    assert!(lines.contains(&"  stop: 2022-11-06 18:35:17"));
    assert!(lines.contains(&"  info progname: topas_nmon"));
    assert!(lines.contains(&"  info interval: 300"));
    assert!(lines.contains(&"  series DISKBUSY: hdisk0,hdisk1"));
    assert!(lines.iter().any(|l| l.starts_with("  adapter fcs0: ") && l.contains("speed=16")));
    assert!(lines.contains(&"  filesystem /dev/hd4: blocks_mb=1024.0,iused=9000.0,iused_pct=7.0,mount=/,used_mb=512.0,used_pct=50.0"));
    // Absent values are not printed
    assert!(!lines.iter().any(|l| l.ends_with(": ")));
}

#[test]
fn test_print_json() {
    let mut out = vec![];
    print_json(&mut out, "web01.nmon", &sample_header()).unwrap();
    let v: Value = serde_json::from_slice(&out).unwrap();
    assert!(v["file"] == "web01.nmon");
    assert!(v["metadata"]["hostname"] == "web01");
    assert!(v["metadata"]["os"] == "aix");
    assert!(v["timecodes"] == 2);
    assert!(v["start"] == "2022-11-06 18:30:17");
    assert!(v["stop"] == "2022-11-06 18:35:17");
    assert!(v["info"].as_str().unwrap().starts_with("progname: topas_nmon\n"));
    assert!(v["schema"]["CPU_ALL"][0] == "User%");
    assert!(v["adapters"]["fcs0"]["error_frames"] == "3");
    assert!(v["filesystems"]["/dev/hd2"]["mount"] == "/usr");
}
