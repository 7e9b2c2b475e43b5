/// Delivery of points to the store, in batches.
///
/// The store is behind the `PointSink` trait.  The import pipeline never talks to the sink
/// directly, it pushes points into a `BatchWriter` which flushes when its buffer reaches a
/// threshold and once more at end of file.  A flush is synchronous.  If it fails, the file's
/// import fails, but batches flushed earlier have been committed and stay committed.
use crate::error::{ImportError, Result};
use crate::point::MetricPoint;

pub trait PointSink {
    fn write_points(&mut self, points: &[MetricPoint]) -> anyhow::Result<()>;
}

pub struct BatchWriter<'a> {
    sink: &'a mut dyn PointSink,
    pending: Vec<MetricPoint>,
    written: usize,
}

impl<'a> BatchWriter<'a> {
    pub fn new(sink: &'a mut dyn PointSink) -> BatchWriter<'a> {
        BatchWriter {
            sink,
            pending: vec![],
            written: 0,
        }
    }

    pub fn push(&mut self, point: MetricPoint) {
        self.pending.push(point);
    }

    /// Number of buffered points.

    pub fn count(&self) -> usize {
        self.pending.len()
    }

    /// Number of points flushed to the sink so far.

    pub fn written(&self) -> usize {
        self.written
    }

    /// Flush if at least `limit` points are buffered.

    pub fn flush_at(&mut self, limit: usize) -> Result<()> {
        if self.pending.len() >= limit {
            self.flush()
        } else {
            Ok(())
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.sink
            .write_points(&self.pending)
            .map_err(ImportError::SinkWriteFailure)?;
        self.written += self.pending.len();
        tracing::info!("Flushed {} points", self.pending.len());
        self.pending.clear();
        Ok(())
    }
}

/// A sink that keeps everything in memory, for tests and dry runs.  It can be told to fail after a
/// number of successful batches.

#[derive(Debug, Default)]
pub struct MemorySink {
    pub points: Vec<MetricPoint>,
    pub batches: usize,
    pub fail_after: Option<usize>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        Default::default()
    }

    /// All points with the given measurement.

    pub fn measurement(&self, name: &str) -> Vec<&MetricPoint> {
        self.points
            .iter()
            .filter(|p| p.measurement.as_str() == name)
            .collect()
    }
}

impl PointSink for MemorySink {
    fn write_points(&mut self, points: &[MetricPoint]) -> anyhow::Result<()> {
        if let Some(n) = self.fail_after {
            if self.batches >= n {
                anyhow::bail!("Sink refused batch {}", self.batches + 1);
            }
        }
        self.batches += 1;
        self.points.extend_from_slice(points);
        Ok(())
    }
}

#[cfg(test)]
use nmonutils::epoch;

#[test]
fn test_batching() {
    let mut sink = MemorySink::new();
    {
        let mut w = BatchWriter::new(&mut sink);
        for i in 0..7 {
            w.push(MetricPoint::with_value("MEM", epoch(), i as f64));
            w.flush_at(3).unwrap();
        }
        assert!(w.count() == 1);
        assert!(w.written() == 6);
        w.flush().unwrap();
        assert!(w.count() == 0 && w.written() == 7);
        // Nothing buffered, nothing sent
        w.flush().unwrap();
    }
    assert!(sink.batches == 3);
    assert!(sink.points.len() == 7);
    assert!(sink.measurement("MEM").len() == 7);
}

#[test]
fn test_sink_failure() {
    let mut sink = MemorySink::new();
    sink.fail_after = Some(1);
    {
        let mut w = BatchWriter::new(&mut sink);
        w.push(MetricPoint::with_value("MEM", epoch(), 1.0));
        w.flush().unwrap();
        w.push(MetricPoint::with_value("MEM", epoch(), 2.0));
        assert!(matches!(w.flush(), Err(ImportError::SinkWriteFailure(_))));
    }
    // The first batch stays committed
    assert!(sink.points.len() == 1);
}
