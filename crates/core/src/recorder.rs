//! Recorder worker pool.
//!
//! Each worker owns an antenna shard and a bounded input queue fed by the
//! dispatcher. `Record` events are decoded out of the ring, appended to
//! the trace sink under the packet's coordinates, and the ring slot is
//! released; `Stop` flushes and closes the sink and ends the thread. The
//! sink is opened lazily on the first record.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Sender, TrySendError};

use snd_trace::TraceSink;

use crate::affinity;
use crate::buffer::SampleBufferRing;
use crate::queue::RecordEvent;

/// Lazily invoked constructor for one recorder's trace sink.
pub type SinkOpener = Box<dyn FnOnce() -> io::Result<Box<dyn TraceSink>> + Send>;

pub struct RecorderThread {
    tx: Sender<RecordEvent>,
    handle: Option<JoinHandle<()>>,
}

impl RecorderThread {
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        id: usize,
        core: Option<usize>,
        queue_cap: usize,
        ant_base: usize,
        ant_count: usize,
        rings: Arc<Vec<Arc<SampleBufferRing>>>,
        ring_slots: usize,
        open_sink: SinkOpener,
        max_frame_number: Arc<AtomicU32>,
    ) -> Self {
        log::info!(
            "creating recorder {} for antennas {}..{}",
            id,
            ant_base,
            ant_base + ant_count
        );
        let (tx, rx) = bounded::<RecordEvent>(queue_cap);
        let handle = thread::Builder::new()
            .name(format!("recorder-{}", id))
            .spawn(move || {
                if let Some(core) = core {
                    if let Err(e) = affinity::pin_to_core(core) {
                        log::error!("pinning recorder {} to core {} failed: {}", id, core, e);
                        return;
                    }
                }

                let mut open_sink = Some(open_sink);
                let mut sink: Option<Box<dyn TraceSink>> = None;
                loop {
                    let event = match rx.recv() {
                        Ok(ev) => ev,
                        // all senders gone counts as a stop
                        Err(_) => break,
                    };
                    match event {
                        RecordEvent::Record { offset } => {
                            let ring = &rings[offset / ring_slots];
                            let slot = offset % ring_slots;
                            // the dispatcher routed this antenna to us alone
                            let (header, iq) = unsafe { ring.read_packet(slot) };

                            if sink.is_none() {
                                match open_sink.take().expect("sink opened once")() {
                                    Ok(s) => sink = Some(s),
                                    Err(e) => {
                                        log::error!("recorder {}: opening trace sink failed: {}", id, e);
                                        ring.release(slot);
                                        break;
                                    }
                                }
                            }
                            let s = sink.as_mut().expect("sink is open");
                            if let Err(e) = s.append(
                                header.cell_id as usize,
                                header.frame_id,
                                header.slot_id,
                                header.ant_id as usize,
                                &iq,
                            ) {
                                log::warn!("recorder {}: trace append failed: {}", id, e);
                            }
                            ring.release(slot);
                            max_frame_number.fetch_max(header.frame_id, Ordering::AcqRel);
                        }
                        RecordEvent::Stop => break,
                    }
                }

                if let Some(mut s) = sink {
                    if let Err(e) = s.flush().and_then(|_| s.close()) {
                        log::warn!("recorder {}: closing trace sink failed: {}", id, e);
                    }
                }
                log::debug!("recorder {} exiting", id);
            })
            .expect("spawn recorder thread");

        Self {
            tx,
            handle: Some(handle),
        }
    }

    /// Hand one event to this worker. Returns false when its queue is
    /// full, which the dispatcher treats as fatal.
    pub fn dispatch(&self, event: RecordEvent) -> bool {
        self.try_dispatch(event).is_ok()
    }

    /// `dispatch` with the full/disconnected distinction preserved, for
    /// the shutdown drain.
    pub fn try_dispatch(&self, event: RecordEvent) -> Result<(), TrySendError<RecordEvent>> {
        self.tx.try_send(event)
    }

    /// Send `Stop` and wait for the worker to drain and exit.
    pub fn stop(mut self) {
        let _ = self.tx.send(RecordEvent::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("recorder worker panicked");
            }
        }
    }
}
