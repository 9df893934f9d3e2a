//! Slot addressing and the persisted record of one tile.
//!
//! A [`SlotRecord`] is what the store keeps per slot: the payload plus its
//! timestamps and the user's label, colour and trim window.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::audio::format::Payload;

/// Number of tiles on the board.
pub const SLOT_COUNT: usize = 9;

// ---------------------------------------------------------------------------
// SlotIndex
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("slot index {0} is out of range (expected 0..{SLOT_COUNT})")]
pub struct SlotRangeError(pub usize);

/// Index of one of the nine board slots, always in `0..SLOT_COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotIndex(u8);

impl SlotIndex {
    pub fn new(index: usize) -> Result<Self, SlotRangeError> {
        if index < SLOT_COUNT {
            Ok(Self(index as u8))
        } else {
            Err(SlotRangeError(index))
        }
    }

    /// Zero-based position on the board.
    pub fn get(self) -> usize {
        self.0 as usize
    }

    /// One-based number shown to the user and used in export file names.
    pub fn number(self) -> usize {
        self.get() + 1
    }

    pub fn all() -> impl Iterator<Item = SlotIndex> {
        (0..SLOT_COUNT as u8).map(SlotIndex)
    }
}

impl TryFrom<usize> for SlotIndex {
    type Error = SlotRangeError;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        Self::new(index)
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

// ---------------------------------------------------------------------------
// TrimWindow
// ---------------------------------------------------------------------------

/// Sub-range of a recording that playback is restricted to, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimWindow {
    pub start_sec: f64,
    pub end_sec: f64,
}

impl TrimWindow {
    pub fn length(&self) -> f64 {
        self.end_sec - self.start_sec
    }
}

// ---------------------------------------------------------------------------
// SlotRecord
// ---------------------------------------------------------------------------

/// Persisted content of one non-empty slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotRecord {
    pub payload: Payload,
    pub recorded_at: DateTime<Utc>,
    /// Whole seconds; `None` for records written before durations were tracked.
    pub duration_seconds: Option<u32>,
    pub label: Option<String>,
    pub color: Option<String>,
    pub trim: Option<TrimWindow>,
}

impl SlotRecord {
    pub fn new(payload: Payload, recorded_at: DateTime<Utc>, duration_seconds: Option<u32>) -> Self {
        Self {
            payload,
            recorded_at,
            duration_seconds,
            label: None,
            color: None,
            trim: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tile colours
// ---------------------------------------------------------------------------

/// Default tile colours, one per slot.
pub const TILE_PALETTE: [&str; SLOT_COUNT] = [
    "#FF6B6B", "#FF9F43", "#FECA57", "#48DBFB", "#1DD1A1", "#FF9FF3", "#54A0FF", "#5F27CD",
    "#00D2D3",
];

pub fn default_color(slot: SlotIndex) -> &'static str {
    TILE_PALETTE[slot.get()]
}

/// Accepts `#rgb` and `#rrggbb` hex colours.
pub fn is_valid_color(color: &str) -> bool {
    match color.strip_prefix('#') {
        Some(hex) => (hex.len() == 3 || hex.len() == 6) && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_index_accepts_zero_through_eight() {
        assert_eq!(SlotIndex::new(0).unwrap().get(), 0);
        assert_eq!(SlotIndex::new(8).unwrap().get(), 8);
    }

    #[test]
    fn slot_index_rejects_out_of_range() {
        assert_eq!(SlotIndex::new(9), Err(SlotRangeError(9)));
        assert!(SlotIndex::try_from(42usize).is_err());
    }

    #[test]
    fn all_yields_nine_slots_in_order() {
        let all: Vec<usize> = SlotIndex::all().map(SlotIndex::get).collect();
        assert_eq!(all, (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn number_is_one_based() {
        assert_eq!(SlotIndex::new(2).unwrap().number(), 3);
    }

    #[test]
    fn palette_has_a_colour_per_slot() {
        for slot in SlotIndex::all() {
            assert!(is_valid_color(default_color(slot)));
        }
    }

    #[test]
    fn colour_validation() {
        assert!(is_valid_color("#abc"));
        assert!(is_valid_color("#A0B1C2"));
        assert!(!is_valid_color("abc"));
        assert!(!is_valid_color("#abcd"));
        assert!(!is_valid_color("#ggg"));
    }
}
