//! Audio plumbing: microphone capture, recording sessions, playback, trimming.
//!
//! # Data flow
//!
//! ```text
//! Microphone → cpal callback → ChunkRouter → CaptureTap (mpsc)
//!           → Recorder session → PayloadEncoder → Payload
//!
//! Payload → OutputContext::decode → resample → DecodedAudio (cached per slot)
//!         → Voice (play window from trim) → Mixer → speakers
//! ```

pub mod capture;
pub mod format;
pub mod output;
pub mod player;
pub mod recorder;
pub mod resample;
pub mod trim;

pub use capture::{AudioChunk, CaptureConstraints, CaptureDevice, CaptureError, CaptureManager, CaptureStream, CpalMicrophone};
pub use format::{DecodeError, DecodedAudio, EncodeError, Payload, PayloadEncoder, WavEncoder};
pub use output::CpalOutput;
pub use player::{OutputContext, PlaybackError, PlaybackManager, PlaybackStarted, Voice};
pub use recorder::{Recorder, Recording, RecordingHandle, RecordingLimits};
pub use trim::{apply_trim, find_trim_window};
