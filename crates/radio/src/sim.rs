//! Simulated radio backend.
//!
//! Walks each cell's receivable slots frame by frame and synthesizes
//! deterministic IQ tagged with the (frame, slot) it claims to be, so the
//! whole ingest path can run and be tested without hardware.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::{RadioDriver, RadioError, RxMeta};

/// Static description of what the simulated framer delivers.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub samps_per_symbol: usize,
    pub num_channels: usize,
    /// Receivable slot ids within one frame period, per cell.
    pub recv_slots: Vec<Vec<u32>>,
    /// Stop delivering once this frame id is reached.
    pub frame_limit: Option<u32>,
    /// Optional delay per delivered symbol, to mimic radio pacing.
    pub pace: Option<Duration>,
}

pub struct SimRadio {
    cfg: SimConfig,
    // per-(cell, sdr) capture cursor: (frame, index into recv_slots)
    cursors: Mutex<HashMap<(usize, usize), (u32, usize)>>,
}

impl SimRadio {
    pub fn new(cfg: SimConfig) -> Self {
        Self {
            cfg,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// The payload fill value for a given capture, for test assertions.
    pub fn sample_value(frame_id: u32, slot_id: u32) -> i16 {
        (frame_id.wrapping_mul(131).wrapping_add(slot_id)) as i16
    }
}

impl RadioDriver for SimRadio {
    fn num_channels(&self) -> usize {
        self.cfg.num_channels
    }

    fn recv_symbol(
        &self,
        cell: usize,
        sdr: usize,
        bufs: &mut [Vec<i16>],
    ) -> Result<RxMeta, RadioError> {
        let slots = self
            .cfg
            .recv_slots
            .get(cell)
            .ok_or_else(|| RadioError::Driver(format!("unknown cell {}", cell)))?;
        if slots.is_empty() {
            return Err(RadioError::Shutdown);
        }

        let (frame_id, slot_id) = {
            let mut cursors = self.cursors.lock().expect("sim cursor lock");
            let cursor = cursors.entry((cell, sdr)).or_insert((0, 0));
            let (frame, idx) = *cursor;
            if let Some(limit) = self.cfg.frame_limit {
                if frame >= limit {
                    return Err(RadioError::Shutdown);
                }
            }
            let slot = slots[idx];
            *cursor = if idx + 1 == slots.len() {
                (frame + 1, 0)
            } else {
                (frame, idx + 1)
            };
            (frame, slot)
        };

        let fill = Self::sample_value(frame_id, slot_id);
        for buf in bufs.iter_mut() {
            buf.resize(2 * self.cfg.samps_per_symbol, 0);
            buf.fill(fill);
        }

        if let Some(pace) = self.cfg.pace {
            std::thread::sleep(pace);
        }

        Ok(RxMeta { frame_id, slot_id })
    }

    fn client_tx_loop(&self, client: usize, running: &AtomicBool) -> Result<(), RadioError> {
        log::info!("sim client {} transmit loop up", client);
        while running.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    fn trigger(&self) -> Result<(), RadioError> {
        Ok(())
    }
}
