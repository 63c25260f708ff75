//! Training sequence generation.
//!
//! All sequences are generated deterministically at startup: the 802.11
//! short/long training sequences from their frequency-domain definitions,
//! the 128-sample synchronization sequence from a Gold code, and
//! constant-amplitude Zadoff-Chu pilots. Time-domain outputs are
//! peak-normalized to unit magnitude; the waveform composer applies the
//! configured transmit scale when quantizing to int16.

use num_complex::Complex32;
use rustfft::FftPlanner;

/// One period of the 802.11 short training sequence, 16 samples.
///
/// Nonzero at every 4th subcarrier, so the 64-point IFFT is periodic with
/// period 16; only the first period is returned.
pub fn sts() -> Vec<Complex32> {
    let p = Complex32::new(1.0, 1.0);
    let m = Complex32::new(-1.0, -1.0);
    let entries: [(i32, Complex32); 12] = [
        (-24, p),
        (-20, m),
        (-16, p),
        (-12, m),
        (-8, m),
        (-4, p),
        (4, m),
        (8, m),
        (12, p),
        (16, p),
        (20, p),
        (24, p),
    ];
    let mut spectrum = vec![Complex32::new(0.0, 0.0); 64];
    for &(sc, v) in &entries {
        spectrum[sc.rem_euclid(64) as usize] = v;
    }
    let mut td = ifft(&spectrum);
    td.truncate(16);
    normalize(&mut td);
    td
}

/// The 802.11 long training sequence subcarrier table, subcarriers -26..26.
const LTS_SC: [i8; 53] = [
    1, 1, -1, -1, 1, 1, -1, 1, -1, 1, 1, 1, 1, 1, 1, -1, -1, 1, 1, -1, 1, -1, 1, 1, 1, 1, //
    0, // DC
    1, -1, -1, 1, 1, -1, 1, -1, 1, -1, -1, -1, -1, -1, 1, 1, -1, -1, 1, -1, 1, -1, 1, 1, 1, 1,
];

/// Frequency-domain long training sequence mapped onto 64 bins.
pub fn lts_freq() -> Vec<Complex32> {
    let mut spectrum = vec![Complex32::new(0.0, 0.0); 64];
    for (i, &v) in LTS_SC.iter().enumerate() {
        let sc = i as i32 - 26;
        spectrum[sc.rem_euclid(64) as usize] = Complex32::new(v as f32, 0.0);
    }
    spectrum
}

/// Time-domain long training sequence, 64 samples, unit peak.
pub fn lts() -> Vec<Complex32> {
    let mut td = ifft(&lts_freq());
    normalize(&mut td);
    td
}

/// Length-127 Gold code from the degree-7 preferred pair
/// x^7 + x^3 + 1 and x^7 + x^3 + x^2 + x + 1, both seeded all-ones.
pub fn gold_code() -> Vec<u8> {
    let m1 = m_sequence(&[7, 3]);
    let m2 = m_sequence(&[7, 3, 2, 1]);
    m1.iter().zip(&m2).map(|(a, b)| a ^ b).collect()
}

/// 128-sample synchronization sequence: the Gold code BPSK-mapped onto
/// bins 1..=127 (DC left empty) and inverse-transformed.
pub fn gold_ifft() -> Vec<Complex32> {
    let code = gold_code();
    let mut spectrum = vec![Complex32::new(0.0, 0.0); 128];
    for (i, &bit) in code.iter().enumerate() {
        let v = 1.0 - 2.0 * bit as f32;
        spectrum[i + 1] = Complex32::new(v, 0.0);
    }
    let mut td = ifft(&spectrum);
    normalize(&mut td);
    td
}

/// Zadoff-Chu sequence: x[n] = exp(-j*pi*root*n*(n+1)/len).
/// `root` must be coprime with `len` for the CAZAC properties to hold.
pub fn zadoff_chu(root: usize, len: usize) -> Vec<Complex32> {
    assert!(len > 0, "zadoff-chu length must be positive");
    let n = len as f64;
    (0..len)
        .map(|k| {
            let kf = k as f64;
            let phase = -std::f64::consts::PI * (root as f64) * kf * (kf + 1.0) / n;
            Complex32::new(phase.cos() as f32, phase.sin() as f32)
        })
        .collect()
}

/// Time-domain Zadoff-Chu pilot: a ZC sequence spanning `data_sc_num`
/// subcarriers centered around DC (DC itself left empty), IFFT'd to
/// `fft_size` samples. Root 25 per LTE convention, bumped to the next
/// coprime value when 25 divides the length.
pub fn zadoff_chu_pilot(fft_size: usize, data_sc_num: usize) -> Vec<Complex32> {
    assert!(data_sc_num < fft_size, "pilot subcarriers must fit in the FFT");
    let mut root = 25;
    while gcd(root, data_sc_num) != 1 {
        root += 1;
    }
    let zc = zadoff_chu(root, data_sc_num);
    let mut spectrum = vec![Complex32::new(0.0, 0.0); fft_size];
    let half = data_sc_num / 2;
    for (i, &v) in zc.iter().enumerate() {
        // subcarriers -half..-1 then 1..=(data_sc_num - half)
        let sc = i as i32 - half as i32;
        let sc = if sc >= 0 { sc + 1 } else { sc };
        spectrum[sc.rem_euclid(fft_size as i32) as usize] = v;
    }
    let mut td = ifft(&spectrum);
    normalize(&mut td);
    td
}

/// Maximal-length sequence from a Fibonacci LFSR with the given taps.
/// The register width is the largest tap; output length is 2^deg - 1.
fn m_sequence(taps: &[usize]) -> Vec<u8> {
    let deg = *taps.iter().max().expect("lfsr needs at least one tap");
    let mut state = vec![1u8; deg];
    let len = (1usize << deg) - 1;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(state[deg - 1]);
        let fb = taps.iter().fold(0u8, |acc, &t| acc ^ state[t - 1]);
        state.rotate_right(1);
        state[0] = fb;
    }
    out
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn ifft(spectrum: &[Complex32]) -> Vec<Complex32> {
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_inverse(spectrum.len());
    let mut buf = spectrum.to_vec();
    fft.process(&mut buf);
    buf
}

fn normalize(samples: &mut [Complex32]) {
    let peak = samples
        .iter()
        .map(|s| s.norm())
        .fold(0.0f32, f32::max);
    if peak > 0.0 {
        for s in samples.iter_mut() {
            *s /= peak;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sts_period() {
        let seq = sts();
        assert_eq!(seq.len(), 16);
        // nonzero and unit peak
        let peak = seq.iter().map(|s| s.norm()).fold(0.0f32, f32::max);
        assert!((peak - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_lts_length_and_dc() {
        assert_eq!(lts().len(), 64);
        let f = lts_freq();
        assert_eq!(f[0], Complex32::new(0.0, 0.0));
        // 52 used subcarriers
        let used = f.iter().filter(|v| v.norm() > 0.0).count();
        assert_eq!(used, 52);
    }

    #[test]
    fn test_gold_code_balance() {
        let code = gold_code();
        assert_eq!(code.len(), 127);
        // Gold codes of length 2^n - 1 are nearly balanced
        let ones: usize = code.iter().map(|&b| b as usize).sum();
        assert!((56..=72).contains(&ones), "unbalanced code: {} ones", ones);
        assert_eq!(gold_ifft().len(), 128);
    }

    #[test]
    fn test_m_sequence_period() {
        let m = m_sequence(&[7, 3]);
        assert_eq!(m.len(), 127);
        // every nonzero 7-bit state appears exactly once -> balanced output
        let ones: usize = m.iter().map(|&b| b as usize).sum();
        assert_eq!(ones, 64);
    }

    #[test]
    fn test_zadoff_chu_constant_amplitude() {
        let seq = zadoff_chu(25, 139);
        assert_eq!(seq.len(), 139);
        for s in &seq {
            assert!((s.norm() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_zadoff_chu_pilot_shape() {
        let td = zadoff_chu_pilot(128, 100);
        assert_eq!(td.len(), 128);
        let peak = td.iter().map(|s| s.norm()).fold(0.0f32, f32::max);
        assert!((peak - 1.0).abs() < 1e-6);
    }
}
