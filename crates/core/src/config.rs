//! Sounder configuration.
//!
//! The front-end parses the configuration document into `RawConfig`; this
//! module validates it, loads the SDR serial lists, derives every
//! precomputed quantity the pipelines need (schedules, antenna maps,
//! thread counts, the trace path), and freezes the result as
//! `SounderConfig`. Everything here is fatal at startup or not at all,
//! with the exception of short uplink-data reads, which only warn.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};
use num_complex::Complex32;
use serde::Deserialize;
use thiserror::Error;

use snd_phy::schedule::{reciprocal_frames, Schedule, ScheduleError, SlotRole};
use snd_phy::{PhyError, PhyParams};

use crate::{affinity, MAX_TX_GAIN_BS, RX_THREAD_NUM, TASK_THREAD_NUM};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error channel config: '{0}' is not any of A/B/AB")]
    InvalidChannel(String),
    #[error("{side} chan{channel}: tx gain {gain} exceeds the maximum of {cap}")]
    GainOverCap {
        side: &'static str,
        channel: char,
        gain: f64,
        cap: f64,
    },
    #[error("expected one frame schedule per {what} ({expected}), got {got}")]
    FrameCountMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("clients cannot be combined with reciprocal calibration")]
    ClientWithReciprocal,
    #[error("configuration has neither a BaseStations nor a Clients section")]
    MissingSection,
    #[error("uplink data file {0} not found")]
    UlDataFile(PathBuf),
    #[error(transparent)]
    Phy(#[from] PhyError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Antenna channel selection per SDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMask {
    A,
    B,
    Ab,
}

impl ChannelMask {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "A" => Ok(ChannelMask::A),
            "B" => Ok(ChannelMask::B),
            "AB" => Ok(ChannelMask::Ab),
            other => Err(ConfigError::InvalidChannel(other.to_string())),
        }
    }

    pub fn num_channels(self) -> usize {
        match self {
            ChannelMask::A | ChannelMask::B => 1,
            ChannelMask::Ab => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelMask::A => "A",
            ChannelMask::B => "B",
            ChannelMask::Ab => "AB",
        }
    }
}

/// Base-station section of the configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RawBaseStations {
    pub frequency: f64,
    pub rate: f64,
    pub nco_frequency: Option<f64>,
    pub ofdm_symbol_per_subframe: usize,
    pub fft_size: usize,
    pub cp_size: usize,
    pub prefix: usize,
    pub postfix: usize,
    pub ofdm_data_subcarrier_num: Option<usize>,
    pub tx_scale: f32,
    pub beacon_seq: String,
    pub pilot_seq: String,
    pub modulation: String,
    pub hub_id: Option<String>,
    /// One SDR serial-list file per cell.
    pub sdr_id: Vec<String>,
    pub channel: String,
    pub single_gain: bool,
    #[serde(rename = "txgainA")]
    pub tx_gain_a: f64,
    #[serde(rename = "txgainB")]
    pub tx_gain_b: f64,
    #[serde(rename = "rxgainA")]
    pub rx_gain_a: f64,
    #[serde(rename = "rxgainB")]
    pub rx_gain_b: f64,
    #[serde(rename = "calTxGainA")]
    pub cal_tx_gain_a: f64,
    #[serde(rename = "calTxGainB")]
    pub cal_tx_gain_b: f64,
    pub sample_calibrate: bool,
    pub imbalance_calibrate: bool,
    pub beamsweep: bool,
    pub beacon_antenna: usize,
    pub max_frame: u32,
    pub reciprocal_calibration: bool,
    pub ref_sdr_index: Option<usize>,
    pub frame_schedule: Vec<String>,
    pub trace_file: Option<String>,
    pub task_thread: Option<usize>,
}

impl Default for RawBaseStations {
    fn default() -> Self {
        Self {
            frequency: 2.5e9,
            rate: 5e6,
            nco_frequency: None,
            ofdm_symbol_per_subframe: 1,
            fft_size: 0,
            cp_size: 0,
            prefix: 0,
            postfix: 0,
            ofdm_data_subcarrier_num: None,
            tx_scale: 0.5,
            beacon_seq: "gold_ifft".into(),
            pilot_seq: "lts".into(),
            modulation: "QPSK".into(),
            hub_id: None,
            sdr_id: Vec::new(),
            channel: "A".into(),
            single_gain: true,
            tx_gain_a: 20.0,
            tx_gain_b: 20.0,
            rx_gain_a: 20.0,
            rx_gain_b: 20.0,
            cal_tx_gain_a: 10.0,
            cal_tx_gain_b: 10.0,
            sample_calibrate: false,
            imbalance_calibrate: false,
            beamsweep: false,
            beacon_antenna: 0,
            max_frame: 0,
            reciprocal_calibration: false,
            ref_sdr_index: None,
            frame_schedule: Vec::new(),
            trace_file: None,
            task_thread: None,
        }
    }
}

/// Clients section of the configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RawClients {
    /// Client SDR serials, listed inline.
    pub sdr_id: Vec<String>,
    pub channel: String,
    pub agc_en: bool,
    pub agc_gain_init: i32,
    pub frame_mode: String,
    pub hw_framer: bool,
    pub tx_advance: usize,
    pub ul_data_frame_num: usize,
    #[serde(rename = "txgainA")]
    pub tx_gain_a: Vec<f64>,
    #[serde(rename = "txgainB")]
    pub tx_gain_b: Vec<f64>,
    #[serde(rename = "rxgainA")]
    pub rx_gain_a: Vec<f64>,
    #[serde(rename = "rxgainB")]
    pub rx_gain_b: Vec<f64>,
    #[serde(rename = "maxTxGainUE")]
    pub max_tx_gain_ue: f64,
    pub frame_schedule: Vec<String>,

    // fallbacks used when no BaseStations section is present
    pub frequency: f64,
    pub rate: f64,
    pub nco_frequency: Option<f64>,
    pub ofdm_symbol_per_subframe: usize,
    pub fft_size: usize,
    pub cp_size: usize,
    pub prefix: usize,
    pub postfix: usize,
    pub tx_scale: f32,
    pub beacon_seq: String,
    pub pilot_seq: String,
    pub modulation: String,
}

impl Default for RawClients {
    fn default() -> Self {
        Self {
            sdr_id: Vec::new(),
            channel: "A".into(),
            agc_en: false,
            agc_gain_init: 70,
            frame_mode: "continuous_resync".into(),
            hw_framer: true,
            tx_advance: 250,
            ul_data_frame_num: 1,
            tx_gain_a: Vec::new(),
            tx_gain_b: Vec::new(),
            rx_gain_a: Vec::new(),
            rx_gain_b: Vec::new(),
            max_tx_gain_ue: 81.0,
            frame_schedule: Vec::new(),
            frequency: 2.5e9,
            rate: 5e6,
            nco_frequency: None,
            ofdm_symbol_per_subframe: 1,
            fft_size: 0,
            cp_size: 0,
            prefix: 0,
            postfix: 0,
            tx_scale: 0.5,
            beacon_seq: "gold_ifft".into(),
            pilot_seq: "lts".into(),
            modulation: "QPSK".into(),
        }
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    #[serde(rename = "BaseStations")]
    pub base_stations: Option<RawBaseStations>,
    #[serde(rename = "Clients")]
    pub clients: Option<RawClients>,
}

/// One base-station cell: its SDR serials and derived counts.
#[derive(Debug, Clone)]
pub struct CellTopology {
    pub sdr_serials: Vec<String>,
    pub n_sdrs: usize,
    pub n_antennas: usize,
}

/// Validated, immutable sounder configuration.
#[derive(Debug)]
pub struct SounderConfig {
    pub phy: PhyParams,
    pub beacon_seq: String,
    pub pilot_seq: String,
    pub data_mod: String,

    pub bs_present: bool,
    pub client_present: bool,

    pub cells: Vec<CellTopology>,
    pub bs_channel: ChannelMask,
    pub hub_serials: Vec<String>,
    /// Cumulative SDR counts per cell, length `cells + 1`.
    pub sdr_prefix: Vec<usize>,
    /// Cumulative antenna counts per cell, length `cells + 1`.
    pub ant_prefix: Vec<usize>,

    /// Per-cell frame schedules (per-SDR frames in reciprocal mode).
    pub bs_schedule: Option<Schedule>,
    /// Per-client-SDR frame schedules.
    pub cl_schedule: Option<Schedule>,
    pub symbols_per_frame: usize,

    pub reciprocal_calib: bool,
    pub ref_sdr_index: usize,

    pub tx_gain: [f64; 2],
    pub rx_gain: [f64; 2],
    pub cal_tx_gain: [f64; 2],
    pub single_gain: bool,
    pub sample_cal_en: bool,
    pub imbalance_cal_en: bool,
    pub beam_sweep: bool,
    pub beacon_ant: usize,
    pub max_frame: u32,

    pub cl_sdr_ids: Vec<String>,
    pub cl_channel: ChannelMask,
    pub cl_agc_en: bool,
    pub cl_agc_gain_init: i32,
    pub frame_mode: String,
    pub hw_framer: bool,
    pub tx_advance: usize,
    pub ul_data_frame_num: usize,
    pub cl_tx_gains: [Vec<f64>; 2],
    pub cl_rx_gains: [Vec<f64>; 2],
    pub max_tx_gain_ue: f64,
    pub num_cl_sdrs: usize,
    pub num_cl_antennas: usize,

    pub pilot_syms_per_frame: usize,
    pub noise_syms_per_frame: usize,
    pub ul_syms_per_frame: usize,
    pub dl_syms_per_frame: usize,
    pub ul_data_sym_present: bool,

    pub trace_path: PathBuf,
    pub rx_thread_num: usize,
    pub task_thread_num: usize,
    pub core_alloc: bool,

    /// Uplink transmit data per client antenna, one stream per domain.
    pub tx_data_time: Vec<Vec<Complex32>>,
    pub tx_data_freq: Vec<Vec<Complex32>>,
    pub tx_fd_data_files: Vec<String>,
    pub tx_td_data_files: Vec<String>,

    running: Arc<AtomicBool>,
}

impl SounderConfig {
    pub fn from_raw(raw: RawConfig, store_dir: &Path) -> Result<Self, ConfigError> {
        let bs_present = raw.base_stations.is_some();
        let client_present = raw.clients.is_some();
        if !bs_present && !client_present {
            return Err(ConfigError::MissingSection);
        }
        let bs = raw.base_stations.unwrap_or_default();
        let cl = raw.clients.unwrap_or_default();

        if bs_present {
            log::info!("base stations present: {} cell(s)", bs.sdr_id.len());
        }
        if client_present {
            log::info!("clients present: {} SDR(s)", cl.sdr_id.len());
        }

        // common PHY parameters come from the BS section when present
        let phy = if bs_present {
            PhyParams::new(
                bs.frequency,
                bs.rate,
                bs.nco_frequency,
                bs.fft_size,
                bs.cp_size,
                bs.ofdm_symbol_per_subframe,
                bs.prefix,
                bs.postfix,
                bs.ofdm_data_subcarrier_num,
                bs.tx_scale,
            )
        } else {
            PhyParams::new(
                cl.frequency,
                cl.rate,
                cl.nco_frequency,
                cl.fft_size,
                cl.cp_size,
                cl.ofdm_symbol_per_subframe,
                cl.prefix,
                cl.postfix,
                None,
                cl.tx_scale,
            )
        };
        phy.validate()?;
        let (beacon_seq, pilot_seq, data_mod) = if bs_present {
            (bs.beacon_seq.clone(), bs.pilot_seq.clone(), bs.modulation.clone())
        } else {
            (cl.beacon_seq.clone(), cl.pilot_seq.clone(), cl.modulation.clone())
        };

        // base-station topology and gain guards
        let bs_channel = ChannelMask::parse(&bs.channel)?;
        for (gain, channel) in [(bs.tx_gain_a, 'A'), (bs.tx_gain_b, 'B')] {
            if gain > MAX_TX_GAIN_BS {
                return Err(ConfigError::GainOverCap {
                    side: "BaseStation",
                    channel,
                    gain,
                    cap: MAX_TX_GAIN_BS,
                });
            }
        }

        let mut cells = Vec::with_capacity(bs.sdr_id.len());
        if bs_present {
            for file in &bs.sdr_id {
                let sdr_serials = load_device_file(Path::new(file))?;
                let n_sdrs = sdr_serials.len();
                cells.push(CellTopology {
                    sdr_serials,
                    n_sdrs,
                    n_antennas: n_sdrs * bs_channel.num_channels(),
                });
            }
        }
        let mut sdr_prefix = vec![0usize];
        let mut ant_prefix = vec![0usize];
        for c in &cells {
            sdr_prefix.push(sdr_prefix.last().unwrap() + c.n_sdrs);
            ant_prefix.push(ant_prefix.last().unwrap() + c.n_antennas);
        }
        let num_bs_sdrs_all = *sdr_prefix.last().unwrap();
        let hub_serials = match &bs.hub_id {
            Some(file) => load_device_file(Path::new(file))?,
            None => Vec::new(),
        };

        let reciprocal_calib = bs_present && bs.reciprocal_calibration;
        if reciprocal_calib && client_present {
            return Err(ConfigError::ClientWithReciprocal);
        }
        let ref_sdr_index = bs.ref_sdr_index.unwrap_or(num_bs_sdrs_all.saturating_sub(1));

        // schedules
        let mut num_cl_sdrs = cl.sdr_id.len();
        let bs_schedule = if !bs_present {
            None
        } else if reciprocal_calib {
            let mut cell_frames = Vec::with_capacity(cells.len());
            for c in &cells {
                if c.n_sdrs == 0 {
                    cell_frames.push(Vec::new());
                    continue;
                }
                let cell_ref = ref_sdr_index.min(c.n_sdrs - 1);
                cell_frames.push(reciprocal_frames(
                    c.n_sdrs,
                    cell_ref,
                    bs_channel.num_channels(),
                ));
            }
            Some(Schedule::new(cell_frames)?)
        } else {
            if bs.frame_schedule.len() != cells.len() {
                return Err(ConfigError::FrameCountMismatch {
                    what: "cell",
                    expected: cells.len(),
                    got: bs.frame_schedule.len(),
                });
            }
            let schedule = Schedule::from_cell_strings(bs.frame_schedule.clone())?;
            if !client_present {
                num_cl_sdrs = schedule.count(0, 0, SlotRole::Pilot);
            }
            Some(schedule)
        };

        let (pilot_syms, noise_syms, ul_syms, dl_syms) = if reciprocal_calib {
            // one up and one down reciprocity pilot per frame
            (2, 0, 0, 0)
        } else if let Some(s) = &bs_schedule {
            (
                s.count(0, 0, SlotRole::Pilot),
                s.count(0, 0, SlotRole::Noise),
                s.count(0, 0, SlotRole::Uplink),
                s.count(0, 0, SlotRole::Downlink),
            )
        } else {
            (0, 0, 0, 0)
        };

        // clients
        let cl_channel = ChannelMask::parse(&cl.channel)?;
        let cl_schedule = if client_present {
            for (gains, channel) in [(&cl.tx_gain_a, 'A'), (&cl.tx_gain_b, 'B')] {
                if let Some(&gain) = gains.iter().find(|&&g| g > cl.max_tx_gain_ue) {
                    return Err(ConfigError::GainOverCap {
                        side: "UE",
                        channel,
                        gain,
                        cap: cl.max_tx_gain_ue,
                    });
                }
            }
            if cl.frame_schedule.len() != cl.sdr_id.len() {
                return Err(ConfigError::FrameCountMismatch {
                    what: "client SDR",
                    expected: cl.sdr_id.len(),
                    got: cl.frame_schedule.len(),
                });
            }
            Some(Schedule::from_cell_strings(cl.frame_schedule.clone())?)
        } else {
            None
        };
        if reciprocal_calib {
            num_cl_sdrs = 0;
        }
        let num_cl_antennas = num_cl_sdrs * cl_channel.num_channels();

        let symbols_per_frame = bs_schedule
            .as_ref()
            .or(cl_schedule.as_ref())
            .map_or(0, |s| s.frame_len());

        let cl_ul_present = cl_schedule
            .as_ref()
            .map_or(false, |s| (0..num_cl_sdrs).any(|i| s.count(i, 0, SlotRole::Uplink) > 0));
        let ul_data_sym_present =
            !reciprocal_calib && ((bs_present && ul_syms > 0) || (client_present && cl_ul_present));

        // trace path
        let recorded = {
            let per_cell_excl = if reciprocal_calib { 1 } else { 0 };
            if !bs_present {
                1
            } else {
                cells
                    .iter()
                    .map(|c| c.n_sdrs.saturating_sub(per_cell_excl) * bs_channel.num_channels())
                    .sum()
            }
        };
        let trace_path = match &bs.trace_file {
            Some(path) if bs_present => PathBuf::from(path),
            _ => {
                let tag = if reciprocal_calib {
                    "reciprocal-calib-"
                } else if ul_data_sym_present {
                    "uplink-"
                } else {
                    ""
                };
                let cl_dim = if reciprocal_calib { None } else { Some(num_cl_antennas) };
                snd_trace::trace_path(store_dir, tag, cells.len(), recorded, cl_dim)
            }
        };

        // worker counts and core allocation
        let num_cores = affinity::num_cores();
        log::info!("{} cores found", num_cores);
        let mut core_alloc = num_cores > RX_THREAD_NUM;
        let (rx_thread_num, task_thread_num);
        if bs_present && (pilot_syms + ul_syms > 0 || reciprocal_calib) {
            task_thread_num = bs.task_thread.unwrap_or(TASK_THREAD_NUM);
            let mut rx = if num_cores >= 2 * RX_THREAD_NUM {
                RX_THREAD_NUM.min(num_bs_sdrs_all.max(1))
            } else {
                1
            };
            if reciprocal_calib {
                rx = 2;
            }
            rx_thread_num = rx;
            // not enough cores for every pinned thread: trust the scheduler
            if num_cores < 1 + task_thread_num + rx_thread_num + num_cl_sdrs {
                core_alloc = false;
            }
        } else {
            rx_thread_num = 0;
            task_thread_num = 0;
            if num_cores <= 1 + num_cl_sdrs {
                core_alloc = false;
            }
        }
        if core_alloc {
            log::info!(
                "allocating {} receive and {} recorder cores",
                rx_thread_num,
                task_thread_num
            );
        }

        let cfg = Self {
            phy,
            beacon_seq,
            pilot_seq,
            data_mod,
            bs_present,
            client_present,
            cells,
            bs_channel,
            hub_serials,
            sdr_prefix,
            ant_prefix,
            bs_schedule,
            cl_schedule,
            symbols_per_frame,
            reciprocal_calib,
            ref_sdr_index,
            tx_gain: [bs.tx_gain_a, bs.tx_gain_b],
            rx_gain: [bs.rx_gain_a, bs.rx_gain_b],
            cal_tx_gain: [bs.cal_tx_gain_a, bs.cal_tx_gain_b],
            single_gain: bs.single_gain,
            sample_cal_en: bs.sample_calibrate,
            imbalance_cal_en: bs.imbalance_calibrate,
            beam_sweep: bs.beamsweep,
            beacon_ant: bs.beacon_antenna,
            max_frame: bs.max_frame,
            cl_sdr_ids: cl.sdr_id,
            cl_channel,
            cl_agc_en: cl.agc_en,
            cl_agc_gain_init: cl.agc_gain_init,
            frame_mode: cl.frame_mode,
            hw_framer: cl.hw_framer,
            tx_advance: cl.tx_advance,
            ul_data_frame_num: cl.ul_data_frame_num,
            cl_tx_gains: [cl.tx_gain_a, cl.tx_gain_b],
            cl_rx_gains: [cl.rx_gain_a, cl.rx_gain_b],
            max_tx_gain_ue: cl.max_tx_gain_ue,
            num_cl_sdrs,
            num_cl_antennas,
            pilot_syms_per_frame: pilot_syms,
            noise_syms_per_frame: noise_syms,
            ul_syms_per_frame: ul_syms,
            dl_syms_per_frame: dl_syms,
            ul_data_sym_present,
            trace_path,
            rx_thread_num,
            task_thread_num,
            core_alloc,
            tx_data_time: Vec::new(),
            tx_data_freq: Vec::new(),
            tx_fd_data_files: Vec::new(),
            tx_td_data_files: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
        };
        log::info!("configuration parsed: {}", cfg.summary());
        Ok(cfg)
    }

    fn summary(&self) -> String {
        format!(
            "{} cell(s), {} BS SDR(s), {} antenna(s), {} client(s), frame length {}",
            self.cells.len(),
            self.num_bs_sdrs_total(),
            self.total_antennas(),
            self.num_cl_sdrs,
            self.symbols_per_frame
        )
    }

    /// Load per-client uplink transmit data from the store directory.
    /// Missing files are fatal; short files warn and leave the remainder
    /// zero-filled.
    pub fn load_ul_data(&mut self, dir: &Path) -> Result<(), ConfigError> {
        if !self.ul_data_sym_present {
            return Ok(());
        }
        let ch = self.cl_channel.num_channels();
        self.tx_data_freq = vec![Vec::new(); self.num_cl_antennas];
        self.tx_data_time = vec![Vec::new(); self.num_cl_antennas];

        for i in 0..self.num_cl_sdrs {
            let ul_slots = self
                .cl_schedule
                .as_ref()
                .map_or(self.ul_syms_per_frame, |s| s.count(i, 0, SlotRole::Uplink));
            let tag = format!(
                "{}_{}_{}_{}_{}_{}_{}_{}.bin",
                self.data_mod,
                self.phy.symbol_data_sc_num,
                self.phy.fft_size,
                self.phy.symbols_per_subframe,
                ul_slots,
                self.ul_data_frame_num,
                self.cl_channel.as_str(),
                i
            );
            let fd_name = format!("ul_data_f_{}", tag);
            let td_name = format!("ul_data_t_{}", tag);
            let fd_path = dir.join(&fd_name);
            let td_path = dir.join(&td_name);

            log::info!("loading uplink freq-domain data for radio {}: {}", i, fd_path.display());
            let mut fd = BufReader::new(
                File::open(&fd_path).map_err(|_| ConfigError::UlDataFile(fd_path.clone()))?,
            );
            log::info!("loading uplink time-domain data for radio {}: {}", i, td_path.display());
            let mut td = BufReader::new(
                File::open(&td_path).map_err(|_| ConfigError::UlDataFile(td_path.clone()))?,
            );
            self.tx_fd_data_files.push(fd_name);
            self.tx_td_data_files.push(td_name);

            let fd_len = self.phy.fft_size * self.phy.symbols_per_subframe;
            let td_len = self.phy.samps_per_symbol();
            for _slot in 0..ul_slots {
                for h in 0..ch {
                    let ant = i * ch + h;
                    let (block, read) = read_cf32_block(&mut fd, fd_len)?;
                    if read != fd_len {
                        log::warn!("short read of uplink freq-domain data: {}/{}", read, fd_len);
                    }
                    self.tx_data_freq[ant].extend(block);
                    let (block, read) = read_cf32_block(&mut td, td_len)?;
                    if read != td_len {
                        log::warn!("short read of uplink time-domain data: {}/{}", read, td_len);
                    }
                    self.tx_data_time[ant].extend(block);
                }
            }
        }
        Ok(())
    }

    pub fn num_bs_sdrs_total(&self) -> usize {
        *self.sdr_prefix.last().unwrap_or(&0)
    }

    /// Total antenna count across cells, used for dispatch and sharding.
    pub fn total_antennas(&self) -> usize {
        *self.ant_prefix.last().unwrap_or(&0)
    }

    /// Antennas that actually land in the trace. Reciprocal mode measures
    /// everything against the reference SDR, which is excluded per cell.
    pub fn recorded_antennas(&self) -> usize {
        if !self.bs_present {
            return 1;
        }
        let excl = if self.reciprocal_calib { 1 } else { 0 };
        self.cells
            .iter()
            .map(|c| c.n_sdrs.saturating_sub(excl) * self.bs_channel.num_channels())
            .sum()
    }

    /// Map a global SDR index to (cell, cell-local SDR index).
    pub fn cell_of_sdr(&self, global_sdr: usize) -> (usize, usize) {
        for cell in 0..self.cells.len() {
            if global_sdr < self.sdr_prefix[cell + 1] {
                return (cell, global_sdr - self.sdr_prefix[cell]);
            }
        }
        panic!("SDR index {} out of range", global_sdr);
    }

    /// Global antenna index of one channel of one SDR.
    pub fn global_antenna(&self, cell: usize, local_sdr: usize, ch: usize) -> usize {
        self.ant_prefix[cell] + local_sdr * self.bs_channel.num_channels() + ch
    }

    /// Ordinal of the client transmitting the pilot in `slot`, or `None`
    /// when that slot carries no pilot. In reciprocal mode the slot index
    /// itself names the measurement and is returned unchanged.
    pub fn client_id(&self, frame_id: usize, slot: usize) -> Option<usize> {
        if self.reciprocal_calib {
            return Some(slot);
        }
        self.bs_schedule
            .as_ref()?
            .index_of(0, frame_id, SlotRole::Pilot, slot)
    }

    /// Slot ids the base station captures each frame, per cell: pilots,
    /// uplink data, noise, and reference receives.
    pub fn receive_slots(&self) -> Vec<Vec<u32>> {
        let schedule = match &self.bs_schedule {
            Some(s) => s,
            None => return Vec::new(),
        };
        (0..self.cells.len())
            .map(|cell| {
                let mut slots: Vec<u32> = [
                    SlotRole::Pilot,
                    SlotRole::Uplink,
                    SlotRole::Noise,
                    SlotRole::RefRx,
                ]
                .iter()
                .flat_map(|&r| schedule.positions(cell, 0, r).iter().map(|&s| s as u32))
                .collect();
                slots.sort_unstable();
                slots.dedup();
                slots
            })
            .collect()
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self, value: bool) {
        self.running.store(value, Ordering::Release);
    }

    /// Shared handle for the signal handler and worker threads.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }
}

/// Load a device serial list: one serial per line, `#` comments allowed.
pub fn load_device_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    let file = File::open(path)
        .map_err(|e| io::Error::new(e.kind(), format!("{}: {}", path.display(), e)))?;
    let mut serials = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        serials.push(line.to_string());
    }
    Ok(serials)
}

/// Read up to `count` little-endian complex floats; returns the samples
/// (zero-padded to `count`) and how many were actually read.
fn read_cf32_block<R: io::Read>(
    reader: &mut R,
    count: usize,
) -> Result<(Vec<Complex32>, usize), ConfigError> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let re = match reader.read_f32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        let im = match reader.read_f32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        out.push(Complex32::new(re, im));
    }
    let read = out.len();
    out.resize(count, Complex32::new(0.0, 0.0));
    Ok((out, read))
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;

    static FILE_SEQ: AtomicUsize = AtomicUsize::new(0);

    /// Write a serial-list file with `n` entries into the temp directory.
    pub fn sdr_file(n: usize) -> PathBuf {
        let seq = FILE_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "snd_sdrs_{}_{}_{}.txt",
            std::process::id(),
            seq,
            n
        ));
        let mut f = File::create(&path).expect("create sdr file");
        writeln!(f, "# test serials").unwrap();
        for i in 0..n {
            writeln!(f, "RF3E{:06}", i).unwrap();
        }
        path
    }

    /// A validated BS-only config with deterministic worker counts.
    pub fn bs_config(
        frame: &str,
        n_sdrs: usize,
        channel: &str,
        task_threads: usize,
        max_frame: u32,
    ) -> SounderConfig {
        let raw = RawConfig {
            base_stations: Some(RawBaseStations {
                fft_size: 64,
                cp_size: 16,
                ofdm_symbol_per_subframe: 7,
                prefix: 82,
                postfix: 68,
                sdr_id: vec![sdr_file(n_sdrs).to_string_lossy().into_owned()],
                channel: channel.into(),
                frame_schedule: vec![frame.into()],
                max_frame,
                task_thread: Some(task_threads),
                ..Default::default()
            }),
            clients: None,
        };
        let mut cfg = SounderConfig::from_raw(raw, Path::new("logs")).expect("test config");
        // host-independent worker layout for tests
        cfg.core_alloc = false;
        cfg.rx_thread_num = cfg.rx_thread_num.clamp(1, 2.min(n_sdrs.max(1)));
        cfg
    }
}
