/// Bounded ranking of per-process samples.
///
/// TOP rows arrive grouped by time code.  For each code we keep the K processes with the most
/// threads, and when the code changes the retained set for the previous code is handed back to
/// the caller to be written out.  The caller must call `finish` at end of input to get the set for
/// the last code.
///
/// K is small, so the minimum is found by a linear scan rather than with a heap.

/// Number of processes retained per time code.
pub const TOP_THREADS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct ThreadSample {
    pub pid: String,
    pub command: String,
    pub value: f64,
}

/// The retained samples for one time code, in no particular order.

#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    pub code: String,
    pub samples: Vec<ThreadSample>,
}

#[derive(Debug)]
pub struct TopK {
    k: usize,
    code: Option<String>,
    retained: Vec<ThreadSample>,
}

impl TopK {
    pub fn new(k: usize) -> TopK {
        TopK {
            k,
            code: None,
            retained: Vec::with_capacity(k),
        }
    }

    /// Move to time code `code`.  If that is a change of code, return the ranking for the code we
    /// were on, if any.

    pub fn advance(&mut self, code: &str) -> Option<Ranking> {
        if self.code.as_deref() == Some(code) {
            return None;
        }
        let previous = self.code.replace(code.to_string());
        let samples = std::mem::take(&mut self.retained);
        previous.map(|code| Ranking { code, samples })
    }

    /// Offer a sample for the current code.  A process seen twice keeps its larger value.  When
    /// the set is full the smallest retained sample is replaced, but only by a strictly larger one.

    pub fn insert(&mut self, sample: ThreadSample) {
        if let Some(existing) = self.retained.iter_mut().find(|s| s.pid == sample.pid) {
            if sample.value > existing.value {
                *existing = sample;
            }
            return;
        }
        if self.retained.len() < self.k {
            self.retained.push(sample);
            return;
        }
        let mut min_ix = 0;
        for (i, s) in self.retained.iter().enumerate() {
            if s.value < self.retained[min_ix].value {
                min_ix = i;
            }
        }
        if !self.retained.is_empty() && sample.value > self.retained[min_ix].value {
            self.retained[min_ix] = sample;
        }
    }

    /// End of input: the ranking for the last code, if there was one.

    pub fn finish(&mut self) -> Option<Ranking> {
        let samples = std::mem::take(&mut self.retained);
        self.code.take().map(|code| Ranking { code, samples })
    }
}

#[cfg(test)]
fn sample(pid: &str, value: f64) -> ThreadSample {
    ThreadSample {
        pid: pid.to_string(),
        command: format!("cmd{pid}"),
        value,
    }
}

#[test]
fn test_retains_largest() {
    let mut top = TopK::new(TOP_THREADS);
    assert!(top.advance("T0001").is_none());
    let values = [3.0, 9.0, 1.0, 7.0, 4.0, 8.0, 2.0, 6.0, 5.0, 4.0];
    for (i, v) in values.iter().enumerate() {
        top.insert(sample(&i.to_string(), *v));
    }
    let ranking = top.finish().unwrap();
    assert!(ranking.code == "T0001");
    assert!(ranking.samples.len() == TOP_THREADS);

    // Every retained value is at least as large as every discarded one
    let min_kept = ranking
        .samples
        .iter()
        .map(|s| s.value)
        .fold(f64::INFINITY, f64::min);
    let kept_pids = ranking.samples.iter().map(|s| s.pid.clone()).collect::<Vec<_>>();
    for (i, v) in values.iter().enumerate() {
        if !kept_pids.contains(&i.to_string()) {
            assert!(*v <= min_kept);
        }
    }
    let mut kept = ranking.samples.iter().map(|s| s.value).collect::<Vec<_>>();
    kept.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert!(kept == vec![5.0, 6.0, 7.0, 8.0, 9.0]);

    assert!(top.finish().is_none());
}

#[test]
fn test_ties_and_duplicates() {
    let mut top = TopK::new(2);
    top.advance("T0001");
    top.insert(sample("1", 5.0));
    top.insert(sample("2", 5.0));
    // Equal to the minimum: not strictly greater, so not taken
    top.insert(sample("3", 5.0));
    // Same pid again keeps the larger value
    top.insert(sample("1", 2.0));
    top.insert(sample("2", 6.0));
    let r = top.advance("T0002").unwrap();
    assert!(r.code == "T0001");
    let mut pids = r.samples.iter().map(|s| (s.pid.as_str(), s.value)).collect::<Vec<_>>();
    pids.sort_by(|a, b| a.0.cmp(b.0));
    assert!(pids == vec![("1", 5.0), ("2", 6.0)]);

    // Same code twice is not a change
    assert!(top.advance("T0002").is_none());
    top.insert(sample("9", 1.0));
    let r = top.finish().unwrap();
    assert!(r.code == "T0002" && r.samples.len() == 1);
}
