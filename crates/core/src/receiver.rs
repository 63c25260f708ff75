//! Receive worker pool.
//!
//! Each worker owns a contiguous range of SDRs and the ring passed to it;
//! it blocks on the radio driver for one captured symbol at a time,
//! claims the next ring slot (spinning briefly when the recorder side is
//! behind), writes the packet, and publishes an `RxEvent`. A full
//! dispatch queue drops the capture with a warning rather than blocking
//! the radio.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use snd_radio::{RadioDriver, RadioError};

use crate::affinity;
use crate::buffer::{PacketHeader, SampleBufferRing};
use crate::config::SounderConfig;
use crate::queue::{DispatchQueue, RxEvent};

pub struct Receiver {
    cfg: Arc<SounderConfig>,
    driver: Arc<dyn RadioDriver>,
    queue: Arc<DispatchQueue>,
}

impl Receiver {
    pub fn new(
        cfg: Arc<SounderConfig>,
        driver: Arc<dyn RadioDriver>,
        queue: Arc<DispatchQueue>,
    ) -> Result<Self, RadioError> {
        let want = cfg.bs_channel.num_channels();
        let got = driver.num_channels();
        if want != got {
            return Err(RadioError::Driver(format!(
                "driver exposes {} channel(s), channel mask {} needs {}",
                got,
                cfg.bs_channel.as_str(),
                want
            )));
        }
        Ok(Self { cfg, driver, queue })
    }

    /// One transmit thread per client SDR, delegating to the driver.
    pub fn start_client_threads(&self) -> Vec<JoinHandle<()>> {
        (0..self.cfg.num_cl_sdrs)
            .map(|i| {
                let driver = self.driver.clone();
                let running = self.cfg.running_flag();
                thread::Builder::new()
                    .name(format!("client-{}", i))
                    .spawn(move || {
                        if let Err(e) = driver.client_tx_loop(i, &running) {
                            log::error!("client {} transmit loop failed: {}", i, e);
                        }
                    })
                    .expect("spawn client thread")
            })
            .collect()
    }

    /// Start the receive workers, one per ring, at `base_core` upward.
    pub fn start_recv_threads(
        &self,
        rings: &[Arc<SampleBufferRing>],
        base_core: usize,
    ) -> Vec<JoinHandle<()>> {
        assert_eq!(rings.len(), self.cfg.rx_thread_num, "one ring per worker");
        rings
            .iter()
            .enumerate()
            .map(|(w, ring)| {
                let cfg = self.cfg.clone();
                let driver = self.driver.clone();
                let queue = self.queue.clone();
                let ring = ring.clone();
                let core = cfg.core_alloc.then_some(base_core + w);
                thread::Builder::new()
                    .name(format!("rx-{}", w))
                    .spawn(move || recv_loop(w, cfg, driver, queue, ring, core))
                    .expect("spawn receive worker")
            })
            .collect()
    }

    pub fn complete_recv_threads(&self, handles: Vec<JoinHandle<()>>) {
        for h in handles {
            if h.join().is_err() {
                log::error!("receive worker panicked");
            }
        }
    }

    /// Transmit-only beam-sweep loop: fire the trigger and idle until the
    /// running flag clears. No workers or queues exist in this mode.
    pub fn go(&self) -> Result<(), RadioError> {
        self.driver.trigger()?;
        log::info!("beam sweep running");
        while self.cfg.running() {
            thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    }
}

fn recv_loop(
    w: usize,
    cfg: Arc<SounderConfig>,
    driver: Arc<dyn RadioDriver>,
    queue: Arc<DispatchQueue>,
    ring: Arc<SampleBufferRing>,
    core: Option<usize>,
) {
    if let Some(core) = core {
        if let Err(e) = affinity::pin_to_core(core) {
            log::error!("pinning rx worker {} to core {} failed: {}", w, core, e);
            cfg.set_running(false);
            return;
        }
    }

    let n_sdrs = cfg.num_bs_sdrs_total();
    let per_worker = n_sdrs.div_ceil(cfg.rx_thread_num.max(1));
    let lo = w * per_worker;
    let hi = ((w + 1) * per_worker).min(n_sdrs);
    if lo >= hi {
        // range past the last SDR: nothing to capture, stay parked
        while cfg.running() {
            thread::sleep(Duration::from_millis(1));
        }
        return;
    }
    log::info!("rx worker {} owns SDRs {}..{}", w, lo, hi);

    let nch = cfg.bs_channel.num_channels();
    let samps = cfg.phy.samps_per_symbol();
    let mut bufs: Vec<Vec<i16>> = vec![vec![0i16; 2 * samps]; nch];
    let ring_slots = ring.num_slots();
    let mut cursor = 0usize;

    'run: while cfg.running() {
        for sdr in lo..hi {
            let (cell, local_sdr) = cfg.cell_of_sdr(sdr);
            let meta = match driver.recv_symbol(cell, local_sdr, &mut bufs) {
                Ok(meta) => meta,
                Err(RadioError::Shutdown) => break 'run,
                Err(e) => {
                    log::warn!("rx worker {}: radio read failed: {}", w, e);
                    continue;
                }
            };
            if cfg.max_frame > 0 && meta.frame_id >= cfg.max_frame {
                log::info!("rx worker {} reached frame limit {}", w, cfg.max_frame);
                cfg.set_running(false);
                break 'run;
            }

            for (ch, buf) in bufs.iter().enumerate() {
                let ant = cfg.global_antenna(cell, local_sdr, ch);
                let slot = cursor;
                cursor = (cursor + 1) % ring_slots;

                // backpressure: wait for the recorder to hand the slot back
                while !ring.claim(slot) {
                    if !cfg.running() {
                        break 'run;
                    }
                    thread::yield_now();
                }

                let header = PacketHeader {
                    frame_id: meta.frame_id,
                    slot_id: meta.slot_id,
                    cell_id: cell as u32,
                    ant_id: ant as u32,
                };
                // the claim above makes this worker the slot's sole owner
                unsafe { ring.write_packet(slot, &header, buf) };

                let ev = RxEvent {
                    ant_id: ant,
                    offset: w * ring_slots + slot,
                };
                if queue.push(ev).is_err() {
                    log::warn!("rx worker {}: dispatch queue full, dropping capture", w);
                    ring.release(slot);
                }
            }
        }
    }
    log::debug!("rx worker {} exiting", w);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::testutil::bs_config;
    use snd_radio::sim::{SimConfig, SimRadio};

    fn sim_for(cfg: &SounderConfig, frame_limit: Option<u32>) -> Arc<SimRadio> {
        Arc::new(SimRadio::new(SimConfig {
            samps_per_symbol: cfg.phy.samps_per_symbol(),
            num_channels: cfg.bs_channel.num_channels(),
            recv_slots: cfg.receive_slots(),
            frame_limit,
            pace: None,
        }))
    }

    #[test]
    fn test_channel_mismatch_rejected() {
        let cfg = Arc::new(bs_config("PG", 1, "AB", 1, 1));
        let driver = Arc::new(SimRadio::new(SimConfig {
            samps_per_symbol: cfg.phy.samps_per_symbol(),
            num_channels: 1, // mask AB needs 2
            recv_slots: cfg.receive_slots(),
            frame_limit: None,
            pace: None,
        }));
        let queue = Arc::new(DispatchQueue::new(16));
        assert!(Receiver::new(cfg, driver, queue).is_err());
    }

    #[test]
    fn test_workers_capture_and_publish() {
        let mut cfg = bs_config("PGPG", 2, "A", 1, 0);
        cfg.rx_thread_num = 2;
        let cfg = Arc::new(cfg);
        // each SDR's stream ends after two frames
        let driver = sim_for(&cfg, Some(2));
        let ring_slots = 64;
        let rings: Vec<_> = (0..2)
            .map(|_| Arc::new(SampleBufferRing::new(ring_slots, cfg.phy.samps_per_symbol())))
            .collect();
        let queue = Arc::new(DispatchQueue::new(1024));

        let rx = Receiver::new(cfg.clone(), driver, queue.clone()).unwrap();
        let handles = rx.start_recv_threads(&rings, 0);
        rx.complete_recv_threads(handles);

        // 2 SDRs x 1 channel x 2 pilot slots x 2 frames
        assert_eq!(queue.len(), 8);
        let mut events = vec![RxEvent::default(); 16];
        let n = queue.pop_bulk(&mut events);
        assert_eq!(n, 8);
        for ev in &events[..n] {
            let ring = ev.offset / ring_slots;
            let slot = ev.offset % ring_slots;
            assert!(rings[ring].in_use(slot));
            let (header, _) = unsafe { rings[ring].read_packet(slot) };
            assert_eq!(header.ant_id as usize, ev.ant_id);
            assert!(header.frame_id < 2);
            rings[ring].release(slot);
        }
    }

    #[test]
    fn test_full_queue_drops_and_releases() {
        let mut cfg = bs_config("PG", 1, "A", 1, 0);
        cfg.rx_thread_num = 1;
        let cfg = Arc::new(cfg);
        let driver = sim_for(&cfg, Some(4));
        let ring = Arc::new(SampleBufferRing::new(64, cfg.phy.samps_per_symbol()));
        // room for only two events; the rest must be dropped + released
        let queue = Arc::new(DispatchQueue::new(2));

        let rx = Receiver::new(cfg.clone(), driver, queue.clone()).unwrap();
        let handles = rx.start_recv_threads(std::slice::from_ref(&ring), 0);
        rx.complete_recv_threads(handles);

        assert_eq!(queue.len(), 2);
        // 4 captures, 2 queued: dropped slots were released
        assert_eq!(ring.in_use_count(), 2);
    }
}
