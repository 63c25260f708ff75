use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::TraceSink;

const TRACE_MAGIC: u32 = 0x534e_4454; // "SNDT"
const TRACE_VERSION: u16 = 1;

/// Framed binary trace writer.
///
/// File header: magic, version, reserved. Each append writes a record
/// header `{cell, frame, slot, antenna, sample count}` followed by the
/// interleaved little-endian int16 IQ payload.
pub struct FileTraceSink {
    writer: Option<BufWriter<File>>,
    records: u64,
}

impl FileTraceSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_u32::<LittleEndian>(TRACE_MAGIC)?;
        writer.write_u16::<LittleEndian>(TRACE_VERSION)?;
        writer.write_u16::<LittleEndian>(0)?; // reserved
        log::info!("trace sink opened: {}", path.display());
        Ok(Self {
            writer: Some(writer),
            records: 0,
        })
    }

    pub fn records_written(&self) -> u64 {
        self.records
    }
}

impl TraceSink for FileTraceSink {
    fn append(
        &mut self,
        cell: usize,
        frame: u32,
        slot: u32,
        antenna: usize,
        iq: &[i16],
    ) -> io::Result<()> {
        let w = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "trace sink closed"))?;
        w.write_u32::<LittleEndian>(cell as u32)?;
        w.write_u32::<LittleEndian>(frame)?;
        w.write_u32::<LittleEndian>(slot)?;
        w.write_u32::<LittleEndian>(antenna as u32)?;
        w.write_u32::<LittleEndian>(iq.len() as u32)?;
        for &s in iq {
            w.write_i16::<LittleEndian>(s)?;
        }
        self.records += 1;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(w) = self.writer.as_mut() {
            w.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(mut w) = self.writer.take() {
            w.flush()?;
            log::info!("trace sink closed after {} records", self.records);
        }
        Ok(())
    }
}

impl Drop for FileTraceSink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::ReadBytesExt;
    use std::io::Read;

    #[test]
    fn test_record_layout() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("snd_trace_test_{}.bin", std::process::id()));

        let mut sink = FileTraceSink::create(&path).unwrap();
        sink.append(1, 7, 2, 5, &[100, -100, 42, -42]).unwrap();
        sink.close().unwrap();
        assert_eq!(sink.records_written(), 1);

        let mut f = File::open(&path).unwrap();
        assert_eq!(f.read_u32::<LittleEndian>().unwrap(), TRACE_MAGIC);
        assert_eq!(f.read_u16::<LittleEndian>().unwrap(), TRACE_VERSION);
        assert_eq!(f.read_u16::<LittleEndian>().unwrap(), 0);
        assert_eq!(f.read_u32::<LittleEndian>().unwrap(), 1); // cell
        assert_eq!(f.read_u32::<LittleEndian>().unwrap(), 7); // frame
        assert_eq!(f.read_u32::<LittleEndian>().unwrap(), 2); // slot
        assert_eq!(f.read_u32::<LittleEndian>().unwrap(), 5); // antenna
        assert_eq!(f.read_u32::<LittleEndian>().unwrap(), 4); // samples
        let mut payload = Vec::new();
        f.read_to_end(&mut payload).unwrap();
        assert_eq!(payload.len(), 8);
        assert_eq!(i16::from_le_bytes([payload[0], payload[1]]), 100);

        // double close is a no-op
        sink.close().unwrap();
        std::fs::remove_file(&path).unwrap();
    }
}
