//! Transmit waveform composition.
//!
//! Builds the beacon and pilot sample buffers the radios transmit each
//! frame, in the three layouts the hardware wants: complex int16 for the
//! framer, packed `u32` ("QI" interleave, Q in the high half-word) for
//! the FPGA TX RAM, and cf32 for host-side use.

use num_complex::{Complex, Complex32};

use crate::sequences;
use crate::{PhyError, PhyParams, BEACON_LEN};

/// FPGA transmit RAM depth; the packed pilot is zero-extended to this.
pub const FPGA_TX_RAM_SIZE: usize = 4096;

const STS_REPS: usize = 15;
const GOLD_REPS: usize = 2;

pub type Ci16 = Complex<i16>;

/// Quantize to int16 with the configured transmit scale.
pub fn float_to_ci16(samples: &[Complex32], scale: f32) -> Vec<Ci16> {
    samples
        .iter()
        .map(|s| {
            Complex::new(
                (s.re * scale * 32767.0).clamp(-32768.0, 32767.0) as i16,
                (s.im * scale * 32767.0).clamp(-32768.0, 32767.0) as i16,
            )
        })
        .collect()
}

/// Pack complex int16 as u32 words, Q in bits 31..16 and I in bits 15..0.
/// `conjugate` negates Q for correlator coefficient RAMs.
pub fn ci16_to_u32(samples: &[Ci16], conjugate: bool) -> Vec<u32> {
    samples
        .iter()
        .map(|s| {
            let q = if conjugate { s.im.saturating_neg() } else { s.im };
            ((q as u16 as u32) << 16) | (s.re as u16 as u32)
        })
        .collect()
}

/// Unpack "QI" u32 words to cf32 with full-scale at 1.0.
pub fn u32_to_cf32(words: &[u32]) -> Vec<Complex32> {
    words
        .iter()
        .map(|&w| {
            let i = (w & 0xffff) as u16 as i16;
            let q = (w >> 16) as u16 as i16;
            Complex32::new(i as f32 / 32768.0, q as f32 / 32768.0)
        })
        .collect()
}

/// Composed transmit waveforms, fixed after startup.
#[derive(Debug, Clone)]
pub struct Waveforms {
    /// Beacon samples before padding: 15 STS periods + 2 Gold-IFFT periods.
    pub beacon_ci16: Vec<Ci16>,
    /// Beacon padded out to prefix + subframe + postfix.
    pub beacon_padded_ci16: Vec<Ci16>,
    /// Packed beacon for the TX RAM.
    pub beacon_u32: Vec<u32>,
    /// Conjugated Gold-IFFT coefficients for the sync correlator.
    pub gold_coeffs_u32: Vec<u32>,
    /// The raw 128-sample Gold-IFFT sequence.
    pub gold_cf32: Vec<Complex32>,
    /// Pilot subframe with per-symbol cyclic prefix and zero-pad guards.
    pub pilot_ci16: Vec<Ci16>,
    /// Packed pilot, zero-extended to `FPGA_TX_RAM_SIZE`.
    pub pilot_u32: Vec<u32>,
    /// cf32 view of the packed pilot (before zero extension).
    pub pilot_cf32: Vec<Complex32>,
}

impl Waveforms {
    pub fn compose(params: &PhyParams, beacon_seq: &str, pilot_seq: &str) -> Result<Self, PhyError> {
        params.validate()?;
        if beacon_seq != "gold_ifft" {
            log::warn!("beacon sequence '{}' not supported, using gold_ifft", beacon_seq);
        }

        let scale = params.tx_scale;
        let sts_ci16 = float_to_ci16(&sequences::sts(), scale);
        let gold_cf32 = sequences::gold_ifft();
        let gold_ci16 = float_to_ci16(&gold_cf32, scale);

        let mut beacon_ci16 = Vec::with_capacity(BEACON_LEN);
        for _ in 0..STS_REPS {
            beacon_ci16.extend_from_slice(&sts_ci16);
        }
        for _ in 0..GOLD_REPS {
            beacon_ci16.extend_from_slice(&gold_ci16);
        }
        debug_assert_eq!(beacon_ci16.len(), BEACON_LEN);

        let beacon_u32 = ci16_to_u32(&beacon_ci16, false);
        let gold_coeffs_u32 = ci16_to_u32(&gold_ci16, true);

        let zero = Complex::new(0i16, 0i16);
        let mut beacon_padded_ci16 =
            Vec::with_capacity(params.prefix + params.subframe_size() + params.postfix);
        beacon_padded_ci16.resize(params.prefix, zero);
        beacon_padded_ci16.extend_from_slice(&beacon_ci16);
        beacon_padded_ci16.resize(params.prefix + params.subframe_size(), zero);
        beacon_padded_ci16.resize(params.prefix + params.subframe_size() + params.postfix, zero);

        // pilot symbol: LTS for 64-point FFTs, Zadoff-Chu otherwise
        let pilot_sym = if params.fft_size == 64 {
            sequences::lts()
        } else if pilot_seq == "zadoff-chu" {
            sequences::zadoff_chu_pilot(params.fft_size, params.symbol_data_sc_num)
        } else {
            return Err(PhyError::UnknownPilotSeq(pilot_seq.to_string()));
        };

        let sym_ci16 = float_to_ci16(&pilot_sym, scale);
        let cp_start = sym_ci16.len().saturating_sub(params.cp_size);
        let mut pilot_ci16 = Vec::with_capacity(params.samps_per_symbol());
        pilot_ci16.resize(params.prefix, zero);
        for _ in 0..params.symbols_per_subframe {
            pilot_ci16.extend_from_slice(&sym_ci16[cp_start..]);
            pilot_ci16.extend_from_slice(&sym_ci16);
        }
        pilot_ci16.resize(pilot_ci16.len() + params.postfix, zero);

        let mut pilot_u32 = ci16_to_u32(&pilot_ci16, false);
        let pilot_cf32 = u32_to_cf32(&pilot_u32);
        if pilot_u32.len() > FPGA_TX_RAM_SIZE {
            log::warn!(
                "pilot of {} samples does not fit the {}-word TX RAM",
                pilot_u32.len(),
                FPGA_TX_RAM_SIZE
            );
        } else {
            pilot_u32.resize(FPGA_TX_RAM_SIZE, 0);
        }

        Ok(Self {
            beacon_ci16,
            beacon_padded_ci16,
            beacon_u32,
            gold_coeffs_u32,
            gold_cf32,
            pilot_ci16,
            pilot_u32,
            pilot_cf32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> PhyParams {
        PhyParams::new(2.5e9, 5e6, None, 64, 16, 7, 82, 68, None, 0.5)
    }

    #[test]
    fn test_beacon_layout() {
        let p = params();
        let w = Waveforms::compose(&p, "gold_ifft", "lts").unwrap();
        assert_eq!(w.beacon_ci16.len(), 464);
        assert_eq!(w.beacon_u32.len(), 464);

        // first STS period and first gold period appear verbatim
        let sts_ci16 = float_to_ci16(&sequences::sts(), p.tx_scale);
        let gold_ci16 = float_to_ci16(&sequences::gold_ifft(), p.tx_scale);
        assert_eq!(&w.beacon_ci16[0..16], &sts_ci16[..]);
        assert_eq!(&w.beacon_ci16[240..368], &gold_ci16[..]);

        let expect = p.prefix + p.subframe_size() + p.postfix;
        assert_eq!(w.beacon_padded_ci16.len(), expect);
        // guards are zero
        assert_eq!(w.beacon_padded_ci16[0], Complex::new(0, 0));
        assert_eq!(w.beacon_padded_ci16[expect - 1], Complex::new(0, 0));
    }

    #[test]
    fn test_pilot_sizes() {
        let p = params();
        let w = Waveforms::compose(&p, "gold_ifft", "lts").unwrap();
        let expect = p.prefix + p.symbols_per_subframe * (p.fft_size + p.cp_size) + p.postfix;
        assert_eq!(w.pilot_ci16.len(), expect);
        assert_eq!(w.pilot_cf32.len(), expect);
        assert_eq!(w.pilot_u32.len(), FPGA_TX_RAM_SIZE);
        // extension region is zero
        assert!(w.pilot_u32[expect..].iter().all(|&v| v == 0));
    }

    #[test]
    fn test_pilot_cyclic_prefix() {
        let p = params();
        let w = Waveforms::compose(&p, "gold_ifft", "lts").unwrap();
        // within the first pilot symbol, the cyclic prefix equals the tail
        let sym = &w.pilot_ci16[p.prefix..p.prefix + p.cp_size + p.fft_size];
        assert_eq!(&sym[..p.cp_size], &sym[p.fft_size..]);
    }

    #[test]
    fn test_unknown_pilot_seq_is_fatal() {
        let p = PhyParams::new(2.5e9, 5e6, None, 128, 16, 7, 82, 68, Some(100), 0.5);
        assert!(matches!(
            Waveforms::compose(&p, "gold_ifft", "lts"),
            Err(PhyError::UnknownPilotSeq(_))
        ));
        assert!(Waveforms::compose(&p, "gold_ifft", "zadoff-chu").is_ok());
    }

    #[test]
    fn test_qi_packing_roundtrip() {
        let samples = vec![Complex::new(1000i16, -2000i16), Complex::new(-1i16, 1i16)];
        let packed = ci16_to_u32(&samples, false);
        assert_eq!(packed[0], ((-2000i16 as u16 as u32) << 16) | 1000);
        let unpacked = u32_to_cf32(&packed);
        assert!((unpacked[0].re - 1000.0 / 32768.0).abs() < 1e-6);
        assert!((unpacked[0].im + 2000.0 / 32768.0).abs() < 1e-6);

        let conj = ci16_to_u32(&samples, true);
        assert_eq!((conj[0] >> 16) as u16 as i16, 2000);
    }
}
