/// The default point sink: line protocol, one point per line, appended to a file or written to
/// stdout.  Every batch is flushed through to the file before `write_points` returns, so a batch
/// that was reported as written is on disk.
use anyhow::Result;
use nmonlog::{MetricPoint, PointSink};
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};

pub struct LineProtocolSink<W: Write> {
    out: W,
}

impl LineProtocolSink<Box<dyn Write>> {
    /// Append to `path`, creating it if necessary, or write to stdout if there is no path.

    pub fn open(path: Option<&str>) -> Result<LineProtocolSink<Box<dyn Write>>> {
        let out: Box<dyn Write> = match path {
            Some(p) => {
                let file = OpenOptions::new().create(true).append(true).open(p)?;
                Box::new(BufWriter::new(file))
            }
            None => Box::new(io::stdout()),
        };
        Ok(LineProtocolSink::new(out))
    }
}

impl<W: Write> LineProtocolSink<W> {
    pub fn new(out: W) -> LineProtocolSink<W> {
        LineProtocolSink { out }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> PointSink for LineProtocolSink<W> {
    fn write_points(&mut self, points: &[MetricPoint]) -> anyhow::Result<()> {
        for p in points {
            writeln!(self.out, "{}", p.to_line_protocol()?)?;
        }
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
use nmonutils::timestamp_from_ymdhms;

#[test]
fn test_write_points() {
    let t = timestamp_from_ymdhms(2022, 11, 6, 18, 30, 17);
    let mut a = MetricPoint::new("MEM", t);
    a.tag("host", "h1");
    a.field("free", 100.0);
    let mut b = MetricPoint::new("DISKBUSY", t);
    b.tag("host", "h1");
    b.tag("name", "DISKBUSY1");
    b.field("sd a", 1.5);

    let mut sink = LineProtocolSink::new(vec![]);
    sink.write_points(&[a]).unwrap();
    sink.write_points(&[b]).unwrap();
    let text = String::from_utf8(sink.into_inner()).unwrap();
    assert!(
        text == "MEM,host=h1 free=100 1667759417000000000\n\
                 DISKBUSY,host=h1,name=DISKBUSY1 sd\\ a=1.5 1667759417000000000\n"
    );
}

#[test]
fn test_append_to_file() {
    let path = std::env::temp_dir().join(format!("nmonimport-{}-sink.lp", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let name = path.to_string_lossy().to_string();
    let t = timestamp_from_ymdhms(2022, 11, 6, 18, 30, 17);
    for v in [1.0, 2.0] {
        let mut sink = LineProtocolSink::open(Some(&name)).unwrap();
        sink.write_points(&[MetricPoint::with_value("MEM", t, v)]).unwrap();
    }
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.lines().count() == 2);
    std::fs::remove_file(&path).unwrap();
}
