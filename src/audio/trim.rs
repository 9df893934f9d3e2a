//! Silence trimming.
//!
//! The analyzer looks for the first and last sample, across all channels,
//! whose magnitude exceeds the threshold.  Windows shorter than
//! [`MIN_WINDOW_SECS`] are treated as "nothing worth keeping"; otherwise the
//! window is widened by [`GRACE_SECS`] on both sides so attacks and tails are
//! not clipped.

use super::format::DecodedAudio;
use crate::storage::{SlotRecord, TrimWindow};

pub const DEFAULT_SILENCE_THRESHOLD: f32 = 0.01;

/// Padding kept before the first and after the last audible sample.
pub const GRACE_SECS: f64 = 0.005;

/// Detected windows shorter than this are rejected.
pub const MIN_WINDOW_SECS: f64 = 0.1;

/// Returns the audible window of `audio`, or `None` if it is silent or the
/// audible part is too short to be worth trimming to.
pub fn find_trim_window(audio: &DecodedAudio, threshold: f32) -> Option<TrimWindow> {
    let frames = audio.frames();
    if frames == 0 || audio.sample_rate == 0 {
        return None;
    }

    let loud = |i: usize| audio.channels.iter().any(|ch| ch.get(i).is_some_and(|s| s.abs() > threshold));

    let first = (0..frames).find(|&i| loud(i))?;
    let last = (first..frames).rev().find(|&i| loud(i))?;

    let rate = audio.sample_rate as f64;
    let start = first as f64 / rate;
    let end = (last + 1) as f64 / rate;
    if end - start < MIN_WINDOW_SECS {
        return None;
    }

    Some(TrimWindow {
        start_sec: (start - GRACE_SECS).max(0.0),
        end_sec: (end + GRACE_SECS).min(audio.duration()),
    })
}

/// Copy of `record` restricted to `start..end`, with the duration updated.
pub fn apply_trim(record: &SlotRecord, start_sec: f64, end_sec: f64) -> SlotRecord {
    SlotRecord {
        trim: Some(TrimWindow { start_sec, end_sec }),
        duration_seconds: Some((end_sec - start_sec).round().max(0.0) as u32),
        ..record.clone()
    }
}
