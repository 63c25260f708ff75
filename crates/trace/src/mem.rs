use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::TraceSink;

/// One appended record, as handed to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    pub cell: usize,
    pub frame: u32,
    pub slot: u32,
    pub antenna: usize,
    pub iq: Vec<i16>,
}

/// In-memory sink for tests and dry runs. The record store is shared, so
/// callers can keep a handle and inspect what the recorders wrote after
/// the pipeline shuts down. An optional per-append delay simulates a slow
/// storage backend.
pub struct MemTraceSink {
    records: Arc<Mutex<Vec<TraceRecord>>>,
    append_delay: Option<Duration>,
    closed: bool,
}

impl MemTraceSink {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            append_delay: None,
            closed: false,
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        let mut sink = Self::new();
        sink.append_delay = Some(delay);
        sink
    }

    /// Shared handle to the record store.
    pub fn records(&self) -> Arc<Mutex<Vec<TraceRecord>>> {
        self.records.clone()
    }
}

impl Default for MemTraceSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceSink for MemTraceSink {
    fn append(
        &mut self,
        cell: usize,
        frame: u32,
        slot: u32,
        antenna: usize,
        iq: &[i16],
    ) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "sink closed"));
        }
        if let Some(delay) = self.append_delay {
            std::thread::sleep(delay);
        }
        self.records.lock().expect("record store lock").push(TraceRecord {
            cell,
            frame,
            slot,
            antenna,
            iq: iq.to_vec(),
        });
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_close() {
        let mut sink = MemTraceSink::new();
        let store = sink.records();
        sink.append(0, 1, 2, 3, &[1, 2]).unwrap();
        sink.close().unwrap();
        assert!(sink.append(0, 1, 2, 3, &[1, 2]).is_err());

        let records = store.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].antenna, 3);
        assert_eq!(records[0].iq, vec![1, 2]);
    }
}
