// Copyright 2025-2026 CEMAXECUTER LLC

pub mod schedule;
pub mod sequences;
pub mod waveform;

use thiserror::Error;

/// Supported FFT size range; values outside are clamped with a warning.
pub const MIN_FFT_SIZE: usize = 64;
pub const MAX_FFT_SIZE: usize = 2048;
/// Cyclic prefix sizes above this reset to zero.
pub const MAX_CP_SIZE: usize = 128;

/// Beacon length before padding: 15 STS periods + 2 Gold-IFFT periods.
pub const BEACON_LEN: usize = 15 * 16 + 2 * 128;

#[derive(Debug, Error)]
pub enum PhyError {
    #[error("minimum supported subframe size is {need} samples, got {got}")]
    SubframeTooSmall { need: usize, got: usize },
    #[error("unsupported pilot sequence '{0}' (use 'lts' with a 64-point FFT, or 'zadoff-chu')")]
    UnknownPilotSeq(String),
}

/// OFDM timing parameters, fixed after construction.
///
/// `new()` clamps the FFT and CP sizes into their supported ranges before
/// any derived size is computed, so `samps_per_symbol` always reflects the
/// values the radios will actually run with.
#[derive(Debug, Clone)]
pub struct PhyParams {
    pub freq: f64,
    pub rate: f64,
    pub nco: f64,
    pub fft_size: usize,
    pub cp_size: usize,
    pub symbols_per_subframe: usize,
    pub prefix: usize,
    pub postfix: usize,
    pub symbol_data_sc_num: usize,
    pub tx_scale: f32,
}

impl PhyParams {
    pub fn new(
        freq: f64,
        rate: f64,
        nco: Option<f64>,
        fft_size: usize,
        cp_size: usize,
        symbols_per_subframe: usize,
        prefix: usize,
        postfix: usize,
        symbol_data_sc_num: Option<usize>,
        tx_scale: f32,
    ) -> Self {
        let fft_size = if fft_size > MAX_FFT_SIZE {
            log::warn!("unsupported fft size, clamping to {}", MAX_FFT_SIZE);
            MAX_FFT_SIZE
        } else if fft_size < MIN_FFT_SIZE {
            log::warn!("unsupported fft size, clamping to {}", MIN_FFT_SIZE);
            MIN_FFT_SIZE
        } else {
            fft_size
        };
        let cp_size = if cp_size > MAX_CP_SIZE {
            log::warn!("invalid cp size, resetting to 0");
            0
        } else {
            cp_size
        };

        Self {
            freq,
            rate,
            nco: nco.unwrap_or(0.75 * rate),
            fft_size,
            cp_size,
            symbols_per_subframe,
            prefix,
            postfix,
            symbol_data_sc_num: symbol_data_sc_num.unwrap_or(fft_size),
            tx_scale,
        }
    }

    /// RF front-end filter bandwidth.
    pub fn bw_filter(&self) -> f64 {
        self.rate + 2.0 * self.nco
    }

    /// LO frequency after the NCO offset is applied.
    pub fn radio_rf_freq(&self) -> f64 {
        self.freq - self.nco
    }

    pub fn ofdm_symbol_size(&self) -> usize {
        self.fft_size + self.cp_size
    }

    pub fn subframe_size(&self) -> usize {
        self.symbols_per_subframe * self.ofdm_symbol_size()
    }

    /// Samples captured per slot, including the zero-pad guards.
    pub fn samps_per_symbol(&self) -> usize {
        self.subframe_size() + self.prefix + self.postfix
    }

    /// The beacon (plus its guards) must fit in one slot.
    pub fn validate(&self) -> Result<(), PhyError> {
        let need = BEACON_LEN + self.prefix + self.postfix;
        let got = self.samps_per_symbol();
        if got < need {
            return Err(PhyError::SubframeTooSmall { need, got });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(fft: usize, cp: usize) -> PhyParams {
        PhyParams::new(2.5e9, 5e6, None, fft, cp, 5, 82, 68, None, 0.5)
    }

    #[test]
    fn test_fft_cp_clamping() {
        let p = params(0, 0);
        assert_eq!(p.fft_size, MIN_FFT_SIZE);
        let p = params(4096, 0);
        assert_eq!(p.fft_size, MAX_FFT_SIZE);
        let p = params(64, 500);
        assert_eq!(p.cp_size, 0);
        let p = params(64, 16);
        assert_eq!(p.cp_size, 16);
    }

    #[test]
    fn test_derived_sizes() {
        let p = params(64, 16);
        assert_eq!(p.ofdm_symbol_size(), 80);
        assert_eq!(p.subframe_size(), 400);
        assert_eq!(p.samps_per_symbol(), 400 + 82 + 68);
        assert!((p.nco - 0.75 * 5e6).abs() < 1e-9);
        assert!((p.bw_filter() - (5e6 + 1.5 * 5e6)).abs() < 1e-9);
    }

    #[test]
    fn test_beacon_must_fit() {
        // 5 symbols of 80 samples leave room for the 464-sample beacon
        assert!(params(64, 16).validate().is_ok());
        // a single 80-sample symbol does not
        let p = PhyParams::new(2.5e9, 5e6, None, 64, 16, 1, 0, 0, None, 0.5);
        assert!(matches!(
            p.validate(),
            Err(PhyError::SubframeTooSmall { .. })
        ));
    }
}
