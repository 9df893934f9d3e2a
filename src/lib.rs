//! Nine-slot soundboard: record a short clip into any of nine tiles, tap to
//! play it back, with recordings kept across restarts.

pub mod app;
pub mod audio;
pub mod board;
pub mod config;
pub mod storage;

mod sync;
