//! TDD slot schedules.
//!
//! Each cell's frame is a string over `{B,P,U,D,N,G,R,C}` assigning one
//! role per slot. A schedule holds the frame list per cell plus per-role
//! slot-index tables built once at load; queries never allocate and
//! out-of-range lookups return `None` instead of panicking.

use thiserror::Error;

/// Role of one slot within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum SlotRole {
    Beacon = 0,
    Pilot,
    Uplink,
    Downlink,
    Noise,
    Guard,
    RefRx,
    RefTx,
}

pub const NUM_ROLES: usize = 8;

impl SlotRole {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'B' => Some(SlotRole::Beacon),
            'P' => Some(SlotRole::Pilot),
            'U' => Some(SlotRole::Uplink),
            'D' => Some(SlotRole::Downlink),
            'N' => Some(SlotRole::Noise),
            'G' => Some(SlotRole::Guard),
            'R' => Some(SlotRole::RefRx),
            'C' => Some(SlotRole::RefTx),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            SlotRole::Beacon => 'B',
            SlotRole::Pilot => 'P',
            SlotRole::Uplink => 'U',
            SlotRole::Downlink => 'D',
            SlotRole::Noise => 'N',
            SlotRole::Guard => 'G',
            SlotRole::RefRx => 'R',
            SlotRole::RefTx => 'C',
        }
    }
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("unknown slot role '{0}' in frame schedule")]
    UnknownRole(char),
    #[error("all frame schedules must have the same length (got {0} and {1})")]
    LengthMismatch(usize, usize),
    #[error("frame schedule is empty")]
    Empty,
}

/// One parsed frame: the role string plus per-role slot positions in
/// first-occurrence order.
#[derive(Debug, Clone)]
struct Frame {
    roles: Vec<SlotRole>,
    positions: [Vec<usize>; NUM_ROLES],
}

impl Frame {
    fn parse(text: &str) -> Result<Self, ScheduleError> {
        let mut roles = Vec::with_capacity(text.len());
        let mut positions: [Vec<usize>; NUM_ROLES] = Default::default();
        for (slot, c) in text.chars().enumerate() {
            let role = SlotRole::from_char(c).ok_or(ScheduleError::UnknownRole(c))?;
            positions[role as usize].push(slot);
            roles.push(role);
        }
        Ok(Self { roles, positions })
    }
}

/// Per-cell frame schedules with role lookup tables.
#[derive(Debug, Clone)]
pub struct Schedule {
    cells: Vec<Vec<Frame>>,
    frame_len: usize,
}

impl Schedule {
    /// Build from one frame-string list per cell. Every frame across
    /// every cell must have the same length.
    pub fn new(cell_frames: Vec<Vec<String>>) -> Result<Self, ScheduleError> {
        let mut frame_len = None;
        let mut cells = Vec::with_capacity(cell_frames.len());
        for frames in &cell_frames {
            let mut parsed = Vec::with_capacity(frames.len());
            for text in frames {
                let len = text.chars().count();
                match frame_len {
                    None => frame_len = Some(len),
                    Some(l) if l != len => {
                        return Err(ScheduleError::LengthMismatch(l, len));
                    }
                    _ => {}
                }
                parsed.push(Frame::parse(text)?);
            }
            cells.push(parsed);
        }
        let frame_len = frame_len.ok_or(ScheduleError::Empty)?;
        Ok(Self { cells, frame_len })
    }

    /// One frame string per cell (the common non-calibration layout).
    pub fn from_cell_strings(frames: Vec<String>) -> Result<Self, ScheduleError> {
        Self::new(frames.into_iter().map(|f| vec![f]).collect())
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    /// Slots per frame, identical across cells.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    fn frame(&self, cell: usize, frame_id: usize) -> Option<&Frame> {
        let frames = self.cells.get(cell)?;
        if frames.is_empty() {
            return None;
        }
        frames.get(frame_id % frames.len())
    }

    /// Role of `slot` in the (circularly indexed) frame, or `None` when
    /// the cell or slot is out of range.
    pub fn role_at(&self, cell: usize, frame_id: usize, slot: usize) -> Option<SlotRole> {
        self.frame(cell, frame_id)?.roles.get(slot).copied()
    }

    /// Zero-based ordinal of `slot` among the frame's slots of `role`,
    /// in first-occurrence order.
    pub fn index_of(
        &self,
        cell: usize,
        frame_id: usize,
        role: SlotRole,
        slot: usize,
    ) -> Option<usize> {
        self.frame(cell, frame_id)?.positions[role as usize]
            .iter()
            .position(|&s| s == slot)
    }

    /// Number of slots of `role` in the frame.
    pub fn count(&self, cell: usize, frame_id: usize, role: SlotRole) -> usize {
        self.frame(cell, frame_id)
            .map_or(0, |f| f.positions[role as usize].len())
    }

    /// Slot indices of `role` in the frame, first-occurrence order.
    pub fn positions(&self, cell: usize, frame_id: usize, role: SlotRole) -> &[usize] {
        self.frame(cell, frame_id)
            .map_or(&[][..], |f| &f.positions[role as usize])
    }

    pub fn is_pilot(&self, cell: usize, frame_id: usize, slot: usize) -> bool {
        self.role_at(cell, frame_id, slot) == Some(SlotRole::Pilot)
    }

    pub fn is_noise(&self, cell: usize, frame_id: usize, slot: usize) -> bool {
        self.role_at(cell, frame_id, slot) == Some(SlotRole::Noise)
    }

    /// Uplink-data slot predicate.
    pub fn is_data(&self, cell: usize, frame_id: usize, slot: usize) -> bool {
        self.role_at(cell, frame_id, slot) == Some(SlotRole::Uplink)
    }

    pub fn is_downlink(&self, cell: usize, frame_id: usize, slot: usize) -> bool {
        self.role_at(cell, frame_id, slot) == Some(SlotRole::Downlink)
    }
}

/// Generate the per-SDR calibration frames for reciprocal mode.
///
/// Frame length is `channels * n_sdrs - (channels - 1)`. The reference
/// SDR transmits one pilot at its own slot and receives (`R`) at every
/// other SDR's channel slots; every other SDR transmits pilots on its own
/// channel slots and receives at the reference slot. Channel slots that
/// would fall past the end of the frame are dropped.
pub fn reciprocal_frames(n_sdrs: usize, ref_index: usize, channels: usize) -> Vec<String> {
    assert!(ref_index < n_sdrs, "reference SDR index out of range");
    let len = channels * n_sdrs - (channels - 1);
    let mut frames = vec![vec![b'G'; len]; n_sdrs];

    frames[ref_index][channels * ref_index] = b'P';
    for i in 0..n_sdrs {
        if i == ref_index {
            continue;
        }
        for ch in 0..channels {
            let pos = channels * i + ch;
            if pos < len {
                frames[i][pos] = b'P';
                frames[ref_index][pos] = b'R';
            }
        }
        frames[i][channels * ref_index] = b'R';
    }

    frames
        .into_iter()
        .map(|f| String::from_utf8(f).expect("frames are ascii"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_cell_roles() {
        // beacon, pilot at 2, uplink at 4, downlink at 6, noise at 8
        let s = Schedule::from_cell_strings(vec!["BGPGUGDGN".into()]).unwrap();
        assert_eq!(s.frame_len(), 9);
        assert_eq!(s.role_at(0, 0, 0), Some(SlotRole::Beacon));
        assert_eq!(s.role_at(0, 0, 2), Some(SlotRole::Pilot));
        assert_eq!(s.role_at(0, 7, 2), Some(SlotRole::Pilot)); // circular
        assert!(s.is_pilot(0, 3, 2));
        assert!(s.is_data(0, 0, 4));
        assert!(s.is_downlink(0, 0, 6));
        assert!(s.is_noise(0, 0, 8));
        assert_eq!(s.index_of(0, 0, SlotRole::Pilot, 2), Some(0));
        assert_eq!(s.index_of(0, 0, SlotRole::Pilot, 3), None);
        // out of range is quiet
        assert_eq!(s.role_at(0, 0, 99), None);
        assert_eq!(s.role_at(5, 0, 0), None);
        assert!(!s.is_pilot(0, 0, 99));
    }

    #[test]
    fn test_counts_match_positions() {
        let s = Schedule::from_cell_strings(vec!["BGPPGUUUND".into()]).unwrap();
        for role in [
            SlotRole::Beacon,
            SlotRole::Pilot,
            SlotRole::Uplink,
            SlotRole::Downlink,
            SlotRole::Noise,
            SlotRole::Guard,
        ] {
            let pos = s.positions(0, 0, role);
            assert_eq!(s.count(0, 0, role), pos.len());
            for (ord, &slot) in pos.iter().enumerate() {
                assert_eq!(s.role_at(0, 0, slot), Some(role));
                assert_eq!(s.index_of(0, 0, role, slot), Some(ord));
            }
        }
        assert_eq!(s.count(0, 0, SlotRole::Pilot), 2);
        assert_eq!(s.count(0, 0, SlotRole::Uplink), 3);
    }

    #[test]
    fn test_frame_list_is_circular() {
        let s = Schedule::new(vec![vec!["PG".into(), "GP".into()]]).unwrap();
        assert_eq!(s.role_at(0, 0, 0), Some(SlotRole::Pilot));
        assert_eq!(s.role_at(0, 1, 0), Some(SlotRole::Guard));
        assert_eq!(s.role_at(0, 2, 0), Some(SlotRole::Pilot));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            Schedule::from_cell_strings(vec!["BGX".into()]),
            Err(ScheduleError::UnknownRole('X'))
        ));
        assert!(matches!(
            Schedule::from_cell_strings(vec!["BG".into(), "BGP".into()]),
            Err(ScheduleError::LengthMismatch(2, 3))
        ));
    }

    #[test]
    fn test_reciprocal_single_channel() {
        // one channel: length n, ref transmits one pilot, receives the rest
        let frames = reciprocal_frames(4, 3, 1);
        assert_eq!(frames, vec!["PGGR", "GPGR", "GGPR", "RRRP"]);
        for f in &frames {
            assert_eq!(f.len(), 4);
        }
        let ref_frame = &frames[3];
        assert_eq!(ref_frame.matches('P').count(), 1);
        assert_eq!(ref_frame.matches('R').count(), 3);
    }

    #[test]
    fn test_reciprocal_two_channels() {
        // length = 2*3 - 1 = 5; the last SDR's second channel slot is
        // past the end and dropped
        let frames = reciprocal_frames(3, 1, 2);
        assert_eq!(frames, vec!["PPRGG", "RRPGR", "GGRGP"]);
        // non-reference pilots start at channels * i
        assert_eq!(frames[0].find('P'), Some(0));
        assert_eq!(frames[2].find('P'), Some(4));
        // everyone receives the reference pilot slot
        assert_eq!(&frames[0][2..3], "R");
        assert_eq!(&frames[2][2..3], "R");
    }

    #[test]
    fn test_reciprocal_default_reference_layout() {
        // ref = last SDR: every slot fits, no clipping
        let frames = reciprocal_frames(3, 2, 2);
        assert_eq!(frames, vec!["PPGGR", "GGPPR", "RRRRP"]);
        assert_eq!(frames[2].matches('R').count(), 4);
    }

    #[test]
    fn test_reciprocal_as_schedule() {
        let frames = reciprocal_frames(3, 2, 2);
        let s = Schedule::new(vec![frames]).unwrap();
        // frame index selects the per-SDR frame, circularly
        assert_eq!(s.role_at(0, 2, 4), Some(SlotRole::Pilot));
        assert_eq!(s.role_at(0, 5, 4), Some(SlotRole::Pilot));
        assert_eq!(s.count(0, 0, SlotRole::Pilot), 2);
    }
}
