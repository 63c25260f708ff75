//! Per-worker sample buffer rings.
//!
//! Each receive worker owns one ring: a contiguous byte buffer of packet
//! slots plus a bitset of in-use flags packed into machine words. The
//! worker is the sole producer; the recorder owning a packet's antenna is
//! the sole consumer. A slot's flag bit is the ownership handoff: the
//! producer flips 0->1 before writing, the consumer flips 1->0 after the
//! samples reach the trace sink.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

const WORD_BITS: usize = usize::BITS as usize;

/// Fixed packet header preceding the IQ payload in every slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub frame_id: u32,
    pub slot_id: u32,
    pub cell_id: u32,
    pub ant_id: u32,
}

pub const PACKET_HEADER_BYTES: usize = 16;

impl PacketHeader {
    fn write_to(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.frame_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.cell_id.to_le_bytes());
        buf[12..16].copy_from_slice(&self.ant_id.to_le_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        let word = |i: usize| u32::from_le_bytes(buf[i..i + 4].try_into().expect("header slice"));
        Self {
            frame_id: word(0),
            slot_id: word(4),
            cell_id: word(8),
            ant_id: word(12),
        }
    }
}

pub struct SampleBufferRing {
    buf: Box<[UnsafeCell<u8>]>,
    flags: Box<[AtomicUsize]>,
    num_slots: usize,
    slot_bytes: usize,
    payload_samps: usize,
}

// Packet regions are only touched by the thread holding the slot's claim
// bit; the flag words carry the acquire/release edges.
unsafe impl Send for SampleBufferRing {}
unsafe impl Sync for SampleBufferRing {}

impl SampleBufferRing {
    /// `num_slots` packet slots, each holding one captured symbol of
    /// `samps_per_symbol` complex int16 samples.
    pub fn new(num_slots: usize, samps_per_symbol: usize) -> Self {
        assert!(num_slots > 0, "ring must have at least one slot");
        let slot_bytes = PACKET_HEADER_BYTES + 4 * samps_per_symbol;
        let words = num_slots.div_ceil(WORD_BITS);
        let flags = (0..words).map(|_| AtomicUsize::new(0)).collect();
        let buf = (0..num_slots * slot_bytes)
            .map(|_| UnsafeCell::new(0u8))
            .collect();
        Self {
            buf,
            flags,
            num_slots,
            slot_bytes,
            payload_samps: samps_per_symbol,
        }
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn slot_bytes(&self) -> usize {
        self.slot_bytes
    }

    pub fn payload_samps(&self) -> usize {
        self.payload_samps
    }

    /// Byte offset of a packet slot within the ring buffer.
    pub fn offset_of(&self, slot: usize) -> usize {
        assert!(slot < self.num_slots, "slot {} out of range", slot);
        slot * self.slot_bytes
    }

    /// Try to take ownership of a free slot. Returns false while the
    /// consumer still holds it.
    pub fn claim(&self, slot: usize) -> bool {
        assert!(slot < self.num_slots, "slot {} out of range", slot);
        let mask = 1usize << (slot % WORD_BITS);
        let old = self.flags[slot / WORD_BITS].fetch_or(mask, Ordering::AcqRel);
        old & mask == 0
    }

    /// Return a slot to the free pool.
    pub fn release(&self, slot: usize) {
        assert!(slot < self.num_slots, "slot {} out of range", slot);
        let mask = 1usize << (slot % WORD_BITS);
        self.flags[slot / WORD_BITS].fetch_and(!mask, Ordering::AcqRel);
    }

    pub fn in_use(&self, slot: usize) -> bool {
        assert!(slot < self.num_slots, "slot {} out of range", slot);
        let mask = 1usize << (slot % WORD_BITS);
        self.flags[slot / WORD_BITS].load(Ordering::Acquire) & mask != 0
    }

    /// Number of slots currently claimed.
    pub fn in_use_count(&self) -> usize {
        self.flags
            .iter()
            .map(|w| w.load(Ordering::Acquire).count_ones() as usize)
            .sum()
    }

    /// Write one packet into a claimed slot.
    ///
    /// # Safety
    ///
    /// The caller must hold the slot's claim (a successful `claim` with no
    /// intervening `release`); two writers on one slot are a data race.
    pub unsafe fn write_packet(&self, slot: usize, header: &PacketHeader, iq: &[i16]) {
        assert!(slot < self.num_slots, "slot {} out of range", slot);
        assert_eq!(iq.len(), 2 * self.payload_samps, "payload length mismatch");
        let base = slot * self.slot_bytes;
        let buf = std::slice::from_raw_parts_mut(self.buf[base].get(), self.slot_bytes);
        header.write_to(&mut buf[..PACKET_HEADER_BYTES]);
        for (chunk, &s) in buf[PACKET_HEADER_BYTES..].chunks_exact_mut(2).zip(iq) {
            chunk.copy_from_slice(&s.to_le_bytes());
        }
    }

    /// Read the packet out of a claimed slot.
    ///
    /// # Safety
    ///
    /// The caller must be the sole owner of the slot's claim, with the
    /// producer's write ordered before it by the flag handoff.
    pub unsafe fn read_packet(&self, slot: usize) -> (PacketHeader, Vec<i16>) {
        assert!(slot < self.num_slots, "slot {} out of range", slot);
        let base = slot * self.slot_bytes;
        let buf = std::slice::from_raw_parts(self.buf[base].get() as *const u8, self.slot_bytes);
        let header = PacketHeader::read_from(&buf[..PACKET_HEADER_BYTES]);
        let iq = buf[PACKET_HEADER_BYTES..]
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        (header, iq)
    }
}
