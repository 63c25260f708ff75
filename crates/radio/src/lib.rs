// Copyright 2025-2026 CEMAXECUTER LLC

pub mod sim;

use std::sync::atomic::AtomicBool;

use thiserror::Error;

/// Frame coordinates attached to one captured symbol.
#[derive(Debug, Clone, Copy)]
pub struct RxMeta {
    pub frame_id: u32,
    pub slot_id: u32,
}

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("radio driver error: {0}")]
    Driver(String),
    /// The driver has no more symbols to deliver (stream ended or was stopped).
    #[error("radio driver shut down")]
    Shutdown,
}

/// Common trait for all radio backends.
///
/// One `recv_symbol` call blocks until the hardware framer delivers one
/// captured symbol for the given SDR, filling one interleaved int16 IQ
/// buffer per enabled channel and reporting which (frame, slot) it was.
pub trait RadioDriver: Send + Sync {
    /// Channels enabled per SDR (the length `recv_symbol` expects in `bufs`).
    fn num_channels(&self) -> usize;

    /// Block for one captured symbol from `sdr` in `cell`.
    /// Each buffer receives `2 * samps_per_symbol` interleaved I,Q values.
    fn recv_symbol(
        &self,
        cell: usize,
        sdr: usize,
        bufs: &mut [Vec<i16>],
    ) -> Result<RxMeta, RadioError>;

    /// Body of one client transmit thread; returns when `running` clears.
    fn client_tx_loop(&self, client: usize, running: &AtomicBool) -> Result<(), RadioError>;

    /// Fire the hardware frame trigger (beam-sweep / transmit-only mode).
    fn trigger(&self) -> Result<(), RadioError>;
}
