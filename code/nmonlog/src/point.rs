/// The unit of output: one measurement at one instant, with numeric fields and string tags.
///
/// The store identifies a point by (measurement, instant, tag set), so re-delivering a point
/// overwrites rather than duplicates it.  Tags with empty values carry no information and are
/// never stored; fields are always finite.
use crate::error::{parse_skip, Result};

use nmonutils::Timestamp;
use std::collections::BTreeMap;
use std::fmt::Write;
use ustr::Ustr;

#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub measurement: Ustr,
    pub time: Timestamp,
    pub fields: BTreeMap<String, f64>,
    pub tags: BTreeMap<String, String>,
}

impl MetricPoint {
    pub fn new(measurement: &str, time: Timestamp) -> MetricPoint {
        MetricPoint {
            measurement: Ustr::from(measurement),
            time,
            fields: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    /// Set a tag, unless the value is empty.

    pub fn tag(&mut self, key: &str, value: &str) {
        if !value.is_empty() {
            self.tags.insert(key.to_string(), value.to_string());
        }
    }

    /// Set a field, unless the value is not finite.

    pub fn field(&mut self, key: &str, value: f64) {
        if value.is_finite() {
            self.fields.insert(key.to_string(), value);
        }
    }

    /// Shorthand for a point whose only field is "value".

    pub fn with_value(measurement: &str, time: Timestamp, value: f64) -> MetricPoint {
        let mut p = MetricPoint::new(measurement, time);
        p.field("value", value);
        p
    }

    pub fn get_tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(|s| s.as_str())
    }

    pub fn get_field(&self, key: &str) -> Option<f64> {
        self.fields.get(key).copied()
    }

    /// Encode as one line of line protocol, without the trailing newline:
    ///
    ///   measurement,tag=v,tag=v field=1.5,field=2 1667759417000000000
    ///
    /// Tags and fields are in key order.  The time is in nanoseconds since the epoch; a time that
    /// cannot be expressed that way is an error.

    pub fn to_line_protocol(&self) -> Result<String> {
        let Some(nanos) = self.time.timestamp_nanos_opt() else {
            return Err(parse_skip(format!(
                "time {} of {} point out of range",
                self.time, self.measurement
            )));
        };
        let mut s = String::new();
        escape_into(&mut s, &self.measurement, &[',', ' ']);
        for (k, v) in &self.tags {
            s.push(',');
            escape_into(&mut s, k, &[',', '=', ' ']);
            s.push('=');
            escape_into(&mut s, v, &[',', '=', ' ']);
        }
        let mut sep = ' ';
        for (k, v) in &self.fields {
            s.push(sep);
            sep = ',';
            escape_into(&mut s, k, &[',', '=', ' ']);
            let _ = write!(s, "={v}");
        }
        let _ = write!(s, " {nanos}");
        Ok(s)
    }
}

fn escape_into(out: &mut String, s: &str, special: &[char]) {
    for c in s.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}

#[cfg(test)]
use crate::error::ImportError;
#[cfg(test)]
use nmonutils::timestamp_from_ymdhms;

#[test]
fn test_point_building() {
    let t = timestamp_from_ymdhms(2022, 11, 6, 18, 30, 17);
    let mut p = MetricPoint::new("CPU_ALL", t);
    p.tag("host", "h1");
    p.tag("serial", "");
    p.field("User%", 12.5);
    p.field("Bad", f64::NAN);
    p.field("Worse", f64::INFINITY);
    assert!(p.get_tag("host") == Some("h1"));
    assert!(p.get_tag("serial").is_none());
    assert!(p.get_field("User%") == Some(12.5));
    assert!(p.fields.len() == 1);
}

#[test]
fn test_line_protocol() {
    let t = timestamp_from_ymdhms(2022, 11, 6, 18, 30, 17);
    let mut p = MetricPoint::new("CPU_ALL", t);
    p.tag("host", "h1");
    p.tag("name", "CPU_ALL");
    p.field("User%", 10.0);
    p.field("Sys%", 5.5);
    assert!(
        p.to_line_protocol().unwrap()
            == "CPU_ALL,host=h1,name=CPU_ALL Sys%=5.5,User%=10 1667759417000000000"
    );

    let mut q = MetricPoint::with_value("TOP", t, 1.0);
    q.tag("command", "java -jar x=y,z");
    assert!(
        q.to_line_protocol().unwrap()
            == "TOP,command=java\\ -jar\\ x\\=y\\,z value=1 1667759417000000000"
    );

    // Beyond what nanoseconds since the epoch can express
    let far = MetricPoint::with_value("MEM", timestamp_from_ymdhms(2300, 11, 6, 18, 30, 17), 1.0);
    assert!(matches!(far.to_line_protocol(), Err(ImportError::ParseSkip { .. })));
}
