use parking_lot::Mutex;

use crate::LogRecord;

/// In-memory holding area for records that have not been written yet.
///
/// The byte counter always equals the sum of [`LogRecord::byte_len`] over the
/// held records and drops to zero together with the records on [`drain`].
///
/// [`drain`]: Accumulator::drain
#[derive(Debug, Default)]
pub struct Accumulator {
    records: Vec<LogRecord>,
    bytes: u64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record and return the updated byte count.
    pub fn push(&mut self, record: LogRecord) -> u64 {
        self.bytes += record.byte_len();
        self.records.push(record);
        self.bytes
    }

    /// Remove every held record, ordered by timestamp.
    ///
    /// The sort is stable, so records sharing a timestamp keep their arrival order.
    pub fn drain(&mut self) -> Vec<LogRecord> {
        let mut records = std::mem::take(&mut self.records);
        self.bytes = 0;
        records.sort_by_key(LogRecord::timestamp);
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Bytes the held records occupy on disk.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

/// An [`Accumulator`] shared between the ingestion loop and the write queue.
#[derive(Debug)]
pub(crate) struct SharedBuffer {
    inner: Mutex<Accumulator>,
    threshold: Option<u64>,
}

impl SharedBuffer {
    pub(crate) fn new(threshold: Option<u64>) -> Self {
        Self {
            inner: Mutex::new(Accumulator::new()),
            threshold,
        }
    }

    /// Append a record. Returns true when the size threshold has been reached.
    pub(crate) fn push(&self, record: LogRecord) -> bool {
        let bytes = self.inner.lock().push(record);
        self.threshold.is_some_and(|threshold| bytes >= threshold)
    }

    pub(crate) fn drain(&self) -> Vec<LogRecord> {
        self.inner.lock().drain()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn bytes(&self) -> u64 {
        self.inner.lock().bytes()
    }
}
