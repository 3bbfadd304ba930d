use std::sync::{Arc, Mutex};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SampleRecord {
    /// Wall-clock microseconds, taken right before the probe was issued.
    pub timestamp_us: i64,
    pub virtual_kb: u64,
    pub resident_kb: u64,
}

impl SampleRecord {
    pub fn new(timestamp_us: i64, virtual_kb: u64, resident_kb: u64) -> Self {
        Self {
            timestamp_us,
            virtual_kb,
            resident_kb,
        }
    }

    pub fn zero(timestamp_us: i64) -> Self {
        Self::new(timestamp_us, 0, 0)
    }

    pub fn is_zero(&self) -> bool {
        self.virtual_kb == 0 && self.resident_kb == 0
    }
}

/// Frozen, read-only samples of one monitoring run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleSeries {
    records: Arc<[SampleRecord]>,
}

impl Default for SampleSeries {
    fn default() -> Self {
        Self::from_records(Vec::new())
    }
}

impl SampleSeries {
    pub fn from_records(records: Vec<SampleRecord>) -> Self {
        Self {
            records: records.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &SampleRecord> {
        self.records.iter()
    }

    pub fn zero_count(&self) -> usize {
        self.records.iter().filter(|record| record.is_zero()).count()
    }

    /// Mean gap between consecutive request timestamps.
    pub fn mean_interval_us(&self) -> Option<f64> {
        let first = self.records.first()?;
        let last = self.records.last()?;
        if self.records.len() < 2 {
            return None;
        }
        let span = last.timestamp_us.saturating_sub(first.timestamp_us) as f64;
        Some(span / (self.records.len() - 1) as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted { count: usize },
    Discarded,
}

#[derive(Debug, Default)]
struct RecorderInner {
    records: Vec<SampleRecord>,
    frozen: bool,
    discarded: usize,
}

/// Append-only sink written by the sampling thread and frozen once by the controller.
#[derive(Debug, Default)]
pub struct SeriesRecorder {
    inner: Mutex<RecorderInner>,
}

impl SeriesRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, mut record: SampleRecord) -> PushOutcome {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if inner.frozen {
            inner.discarded += 1;
            return PushOutcome::Discarded;
        }
        // Wall clock can step backwards; keep request order visible in the timestamps.
        if let Some(last) = inner.records.last() {
            if record.timestamp_us <= last.timestamp_us {
                record.timestamp_us = last.timestamp_us + 1;
            }
        }
        inner.records.push(record);
        PushOutcome::Accepted {
            count: inner.records.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .records
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn discarded(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .discarded
    }

    /// Rejects all later pushes and hands out the collected records.
    pub fn freeze(&self) -> SampleSeries {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.frozen = true;
        SampleSeries::from_records(std::mem::take(&mut inner.records))
    }
}
