// Copyright 2025-2026 CEMAXECUTER LLC

pub mod file;
pub mod mem;

use std::io;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Timelike};

/// Destination for recorded IQ, keyed by capture coordinates.
///
/// Writers may assume each (cell, antenna) pair is appended by a single
/// thread; a sink shared across recorder shards must serialize internally.
pub trait TraceSink: Send {
    fn append(
        &mut self,
        cell: usize,
        frame: u32,
        slot: u32,
        antenna: usize,
        iq: &[i16],
    ) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    /// Flush and release the underlying handle. Must be idempotent.
    fn close(&mut self) -> io::Result<()>;
}

/// Default trace path:
/// `{dir}/trace-{mode_tag}{Y-M-D-H-M-S}_{cells}x{antennas}[x{client_antennas}].hdf5`
pub fn trace_path(
    dir: &Path,
    mode_tag: &str,
    cells: usize,
    antennas: usize,
    client_antennas: Option<usize>,
) -> PathBuf {
    let now = chrono::Local::now();
    let stamp = format!(
        "{}-{}-{}-{}-{}-{}",
        now.year(),
        now.month(),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    );
    let dims = match client_antennas {
        Some(cl) => format!("{}x{}x{}", cells, antennas, cl),
        None => format!("{}x{}", cells, antennas),
    };
    dir.join(format!("trace-{}{}_{}.hdf5", mode_tag, stamp, dims))
}

/// Per-recorder variant of a trace path: `name.ext` becomes `name_r{id}.ext`.
pub fn shard_path(path: &Path, shard: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}_r{}.{}", stem, shard, ext.to_string_lossy()),
        None => format!("{}_r{}", stem, shard),
    };
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_path_dims() {
        let p = trace_path(Path::new("logs"), "uplink-", 2, 16, Some(4));
        let name = p.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("trace-uplink-"));
        assert!(name.ends_with("_2x16x4.hdf5"));

        let p = trace_path(Path::new("logs"), "", 1, 8, None);
        let name = p.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("_1x8.hdf5"));
    }

    #[test]
    fn test_shard_path() {
        let p = shard_path(Path::new("logs/trace-1_2x8.hdf5"), 3);
        assert_eq!(p, Path::new("logs/trace-1_2x8_r3.hdf5"));
    }
}
