//! Lifecycle controller.
//!
//! Owns every pipeline resource: the per-worker rings, the dispatch
//! queue, the receiver, and the recorder pool. Boot order is recorders
//! first, then receive workers; the calling thread becomes the
//! dispatcher. Shutdown is the mirror image: clear the running flag,
//! join the receive workers, drain what is left of the dispatch queue,
//! then `Stop` and join every recorder.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use snd_radio::{RadioDriver, RadioError};
use snd_trace::TraceSink;

use crate::affinity;
use crate::buffer::SampleBufferRing;
use crate::config::SounderConfig;
use crate::queue::{DispatchQueue, RecordEvent, RxEvent};
use crate::receiver::Receiver;
use crate::recorder::RecorderThread;
use crate::{DEQUEUE_BULK_SIZE, QUEUE_SIZE, SAMPLE_BUFFER_FRAME_NUM};

/// Builds the trace sink for one recorder shard, on its first record.
pub type SinkFactory = Arc<dyn Fn(usize) -> io::Result<Box<dyn TraceSink>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum SounderError {
    #[error("error setting up the receiver: {0}")]
    Receiver(#[from] RadioError),
    #[error("pinning the dispatcher to core {0} failed")]
    Affinity(usize),
    #[error("record task enqueue failed")]
    RecorderSaturated,
}

struct Active {
    recv_handles: Vec<JoinHandle<()>>,
    recorders: Vec<RecorderThread>,
    client_handles: Vec<JoinHandle<()>>,
    thread_antennas: usize,
}

pub struct Sounder {
    cfg: Arc<SounderConfig>,
    rings: Arc<Vec<Arc<SampleBufferRing>>>,
    ring_slots: usize,
    queue: Arc<DispatchQueue>,
    receiver: Option<Receiver>,
    sink_factory: SinkFactory,
    max_frame_number: Arc<AtomicU32>,
    dispatch_core: usize,
    active: Option<Active>,
    finished: bool,
}

impl Sounder {
    pub fn new(
        cfg: Arc<SounderConfig>,
        driver: Arc<dyn RadioDriver>,
        sink_factory: SinkFactory,
        core_start: usize,
    ) -> Result<Self, SounderError> {
        let ant_per_rx = if cfg.bs_present && cfg.rx_thread_num > 0 {
            (cfg.total_antennas() / cfg.rx_thread_num).max(1)
        } else {
            1
        };
        let ring_slots = SAMPLE_BUFFER_FRAME_NUM * cfg.symbols_per_frame.max(1) * ant_per_rx;
        let queue = Arc::new(DispatchQueue::new(ring_slots * QUEUE_SIZE));
        let rings: Arc<Vec<Arc<SampleBufferRing>>> = Arc::new(
            (0..cfg.rx_thread_num)
                .map(|_| Arc::new(SampleBufferRing::new(ring_slots, cfg.phy.samps_per_symbol())))
                .collect(),
        );
        log::debug!(
            "sounder: {} rx worker(s), {} recorder(s), {} ring slots",
            cfg.rx_thread_num,
            cfg.task_thread_num,
            ring_slots
        );

        // a failed receiver takes the rings and queue down with it
        let receiver = Receiver::new(cfg.clone(), driver, queue.clone())?;

        Ok(Self {
            cfg,
            rings,
            ring_slots,
            queue,
            receiver: Some(receiver),
            sink_factory,
            max_frame_number: Arc::new(AtomicU32::new(0)),
            dispatch_core: core_start,
            active: None,
            finished: false,
        })
    }

    /// Run the pipelines until the running flag clears, then tear down.
    pub fn run(&mut self) -> Result<(), SounderError> {
        if self.finished {
            return Ok(());
        }
        if self.cfg.core_alloc {
            affinity::pin_to_core(self.dispatch_core)
                .map_err(|_| SounderError::Affinity(self.dispatch_core))?;
        }
        let receiver = self.receiver.as_ref().expect("receiver is constructed");

        let client_handles = if self.cfg.client_present {
            receiver.start_client_threads()
        } else {
            Vec::new()
        };

        if self.cfg.rx_thread_num == 0 {
            // transmit-only: no ingest, just the sweep loop
            let result = receiver.go();
            self.active = Some(Active {
                recv_handles: Vec::new(),
                recorders: Vec::new(),
                client_handles,
                thread_antennas: 1,
            });
            self.shutdown();
            return result.map_err(SounderError::Receiver);
        }

        let recorder_core = self.dispatch_core + 1;
        let recv_core = recorder_core + self.cfg.task_thread_num;
        let thread_antennas = self
            .cfg
            .total_antennas()
            .div_ceil(self.cfg.task_thread_num.max(1))
            .max(1);

        let mut recorders = Vec::with_capacity(self.cfg.task_thread_num);
        for i in 0..self.cfg.task_thread_num {
            let core = self.cfg.core_alloc.then_some(recorder_core + i);
            let factory = self.sink_factory.clone();
            recorders.push(RecorderThread::start(
                i,
                core,
                self.ring_slots * QUEUE_SIZE,
                i * thread_antennas,
                thread_antennas,
                self.rings.clone(),
                self.ring_slots,
                Box::new(move || factory(i)),
                self.max_frame_number.clone(),
            ));
        }
        let recv_handles = receiver.start_recv_threads(&self.rings, recv_core);
        self.active = Some(Active {
            recv_handles,
            recorders,
            client_handles,
            thread_antennas,
        });

        // dispatch loop: route captures to the shard owner
        let saturated = {
            let active = self.active.as_ref().expect("pipelines started");
            let mut events = [RxEvent::default(); DEQUEUE_BULK_SIZE];
            let mut saturated = false;
            'dispatch: while self.cfg.running() {
                let n = self.queue.pop_bulk(&mut events);
                if n == 0 {
                    thread::yield_now();
                    continue;
                }
                for ev in &events[..n] {
                    let idx = ev.ant_id / active.thread_antennas;
                    let record = RecordEvent::Record { offset: ev.offset };
                    if !active.recorders[idx].dispatch(record) {
                        log::error!("record task enqueue failed");
                        saturated = true;
                        break 'dispatch;
                    }
                }
            }
            saturated
        };

        self.shutdown();
        if saturated {
            return Err(SounderError::RecorderSaturated);
        }
        Ok(())
    }

    /// Tear everything down in dependency order. Safe to call more than
    /// once; later calls are no-ops.
    pub fn shutdown(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        self.cfg.set_running(false);

        if let Some(receiver) = &self.receiver {
            receiver.complete_recv_threads(std::mem::take(&mut active.recv_handles));
        }
        self.receiver = None;

        // with the producers gone, hand every still-queued capture to its
        // recorder so no ring slot stays claimed
        if !active.recorders.is_empty() {
            let mut events = [RxEvent::default(); DEQUEUE_BULK_SIZE];
            loop {
                let n = self.queue.pop_bulk(&mut events);
                if n == 0 {
                    break;
                }
                for ev in &events[..n] {
                    let idx = ev.ant_id / active.thread_antennas;
                    loop {
                        match active.recorders[idx].try_dispatch(RecordEvent::Record {
                            offset: ev.offset,
                        }) {
                            Ok(()) => break,
                            Err(crossbeam::channel::TrySendError::Full(_)) => {
                                thread::sleep(Duration::from_micros(50));
                            }
                            Err(crossbeam::channel::TrySendError::Disconnected(_)) => {
                                // recorder died early; free the slot ourselves
                                log::warn!("recorder {} gone, dropping queued capture", idx);
                                let ring = &self.rings[ev.offset / self.ring_slots];
                                ring.release(ev.offset % self.ring_slots);
                                break;
                            }
                        }
                    }
                }
            }
        }

        for recorder in active.recorders.drain(..) {
            recorder.stop();
        }
        for handle in active.client_handles.drain(..) {
            let _ = handle.join();
        }
        self.finished = true;
        log::info!(
            "sounder stopped at frame {}",
            self.max_frame_number.load(Ordering::Acquire)
        );
    }

    /// Highest frame id that reached the trace.
    pub fn max_frame_number(&self) -> u32 {
        self.max_frame_number.load(Ordering::Acquire)
    }

    pub fn rings(&self) -> &[Arc<SampleBufferRing>] {
        &self.rings
    }
}

impl Drop for Sounder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::testutil::bs_config;
    use snd_radio::sim::{SimConfig, SimRadio};
    use snd_trace::mem::MemTraceSink;
    use std::sync::Mutex;

    fn sim_for(cfg: &SounderConfig) -> Arc<SimRadio> {
        Arc::new(SimRadio::new(SimConfig {
            samps_per_symbol: cfg.phy.samps_per_symbol(),
            num_channels: cfg.bs_channel.num_channels(),
            recv_slots: cfg.receive_slots(),
            frame_limit: None,
            pace: None,
        }))
    }

    /// Pre-built sinks handed out one per recorder shard.
    fn sink_pool(n: usize) -> (SinkFactory, Vec<Arc<Mutex<Vec<snd_trace::mem::TraceRecord>>>>) {
        let sinks: Vec<MemTraceSink> = (0..n).map(|_| MemTraceSink::new()).collect();
        let stores = sinks.iter().map(|s| s.records()).collect();
        let pool = Mutex::new(sinks.into_iter().map(Some).collect::<Vec<_>>());
        let factory: SinkFactory = Arc::new(move |i| {
            let sink = pool.lock().expect("sink pool")[i].take().expect("sink unused");
            Ok(Box::new(sink) as Box<dyn TraceSink>)
        });
        (factory, stores)
    }

    #[test]
    fn test_dispatch_routing_and_per_antenna_order() {
        // 8 SDRs x AB = 16 antennas over 4 recorder shards of 4
        let mut cfg = bs_config("PGUG", 8, "AB", 4, 3);
        cfg.rx_thread_num = 1;
        let cfg = Arc::new(cfg);
        let driver = sim_for(&cfg);
        let (factory, stores) = sink_pool(4);

        let mut sounder = Sounder::new(cfg.clone(), driver, factory, 0).unwrap();
        sounder.run().unwrap();

        // frames 0..=2 were fully captured before the limit tripped
        assert_eq!(sounder.max_frame_number(), 2);
        for ring in sounder.rings() {
            assert_eq!(ring.in_use_count(), 0);
        }

        for (shard, store) in stores.iter().enumerate() {
            let records = store.lock().unwrap();
            // exactly this shard's antennas
            for r in records.iter() {
                assert!(
                    (shard * 4..(shard + 1) * 4).contains(&r.antenna),
                    "antenna {} routed to shard {}",
                    r.antenna,
                    shard
                );
            }
            assert_eq!(records.len(), 4 * 6, "shard {} record count", shard);
            // per antenna, the (frame, slot) sequence is exactly as captured
            for ant in shard * 4..(shard + 1) * 4 {
                let seq: Vec<(u32, u32)> = records
                    .iter()
                    .filter(|r| r.antenna == ant)
                    .map(|r| (r.frame, r.slot))
                    .collect();
                assert_eq!(seq, vec![(0, 0), (0, 2), (1, 0), (1, 2), (2, 0), (2, 2)]);
            }
        }
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut cfg = bs_config("PG", 2, "A", 1, 2);
        cfg.rx_thread_num = 1;
        let cfg = Arc::new(cfg);
        let driver = sim_for(&cfg);
        let (factory, stores) = sink_pool(1);

        let mut sounder = Sounder::new(cfg.clone(), driver, factory, 0).unwrap();
        sounder.run().unwrap();
        let count = stores[0].lock().unwrap().len();
        assert_eq!(count, 2 * 2); // 2 SDRs x 2 frames x 1 pilot slot

        // repeated shutdown and run are no-ops
        sounder.shutdown();
        sounder.shutdown();
        sounder.run().unwrap();
        assert_eq!(stores[0].lock().unwrap().len(), count);
        assert!(!cfg.running());
    }

    #[test]
    fn test_transmit_only_mode() {
        let mut cfg = bs_config("PG", 1, "A", 1, 0);
        // no receive workers: the run degenerates to the sweep loop
        cfg.rx_thread_num = 0;
        cfg.task_thread_num = 0;
        let cfg = Arc::new(cfg);
        let driver = sim_for(&cfg);
        let (factory, _stores) = sink_pool(1);

        let flag = cfg.running_flag();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            flag.store(false, Ordering::Release);
        });

        let mut sounder = Sounder::new(cfg.clone(), driver, factory, 0).unwrap();
        sounder.run().unwrap();
        stopper.join().unwrap();
        assert_eq!(sounder.max_frame_number(), 0);
    }

    #[test]
    fn test_receiver_setup_failure_is_wrapped() {
        let cfg = Arc::new(bs_config("PG", 1, "AB", 1, 1));
        // driver with too few channels for the AB mask
        let driver = Arc::new(SimRadio::new(SimConfig {
            samps_per_symbol: cfg.phy.samps_per_symbol(),
            num_channels: 1,
            recv_slots: cfg.receive_slots(),
            frame_limit: None,
            pace: None,
        }));
        let (factory, _stores) = sink_pool(1);
        assert!(matches!(
            Sounder::new(cfg, driver, factory, 0),
            Err(SounderError::Receiver(_))
        ));
    }
}
