//! One-shot recording sessions over the shared capture stream.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──start()──► Recording ──stop() / auto-stop──► Stopped
//!                      │
//!                      └─ warning timer (visual only)
//! ```
//!
//! Chunks are buffered in an unbounded channel and flushed once, at stop
//! time, into a single [`Payload`].  Both timers are tokio tasks owned by the
//! session and aborted on every stop path, so `on_complete` runs exactly once
//! no matter how a manual stop and the auto-stop interleave.
//!
//! [`Recorder::start`] spawns tasks and therefore must be called from within
//! a tokio runtime.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::capture::{AudioChunk, CaptureStream, CaptureTap};
use super::format::{detect_supported_media_type, EncodeError, Payload, PayloadEncoder};
use crate::sync::lock;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Timing limits of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingLimits {
    /// When the "almost full" signal fires.
    pub warning_after: Duration,
    /// Hard cap; the session stops itself here.
    pub max_duration: Duration,
}

impl Default for RecordingLimits {
    fn default() -> Self {
        Self {
            warning_after: Duration::from_secs(25),
            max_duration: Duration::from_secs(30),
        }
    }
}

/// Output of a finished session.
#[derive(Debug, Clone)]
pub struct Recording {
    pub payload: Payload,
    /// Wall-clock time between start and stop.
    pub elapsed: Duration,
}

impl Recording {
    pub fn duration_seconds(&self) -> u32 {
        self.elapsed.as_secs_f64().round() as u32
    }
}

pub type CompletionCallback = Box<dyn FnOnce(Result<Recording, EncodeError>) + Send + 'static>;
pub type WarningCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Recording,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Manual,
    MaxDuration,
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

/// Creates sessions; the media type is probed once, here.
pub struct Recorder {
    encoder: Arc<dyn PayloadEncoder>,
    media_type: String,
    limits: RecordingLimits,
}

impl Recorder {
    pub fn new<S: AsRef<str>>(encoder: Arc<dyn PayloadEncoder>, preferred: &[S], limits: RecordingLimits) -> Self {
        let media_type = detect_supported_media_type(encoder.as_ref(), preferred);
        if media_type.is_empty() {
            log::info!("recorder: no preferred media type supported; encoder chooses");
        } else {
            log::info!("recorder: using {media_type}");
        }
        Self {
            encoder,
            media_type,
            limits,
        }
    }

    /// Probed media type; empty means "encoder default".
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn limits(&self) -> RecordingLimits {
        self.limits
    }

    /// Taps `stream` and begins buffering. `on_complete` fires exactly once,
    /// after the session stops.
    pub fn start(
        &self,
        stream: &dyn CaptureStream,
        on_complete: CompletionCallback,
        on_warning: Option<WarningCallback>,
    ) -> RecordingHandle {
        let (tx, rx) = mpsc::unbounded_channel();

        let session = Arc::new(Session {
            phase: Mutex::new(SessionPhase::Idle),
            tap: Mutex::new(None),
            chunks: Mutex::new(rx),
            timers: Mutex::new(Vec::new()),
            on_complete: Mutex::new(Some(on_complete)),
            encoder: Arc::clone(&self.encoder),
            media_type: self.media_type.clone(),
            started_at: Instant::now(),
        });

        *lock(&session.tap) = Some(stream.tap(tx));
        *lock(&session.phase) = SessionPhase::Recording;

        let mut timers = Vec::with_capacity(2);
        if let Some(on_warning) = on_warning {
            let s = Arc::clone(&session);
            let after = self.limits.warning_after;
            timers.push(tokio::spawn(async move {
                tokio::time::sleep(after).await;
                if s.phase() == SessionPhase::Recording {
                    log::debug!("recording reached {after:?}; warning");
                    on_warning();
                }
            }));
        }
        {
            let s = Arc::clone(&session);
            let max = self.limits.max_duration;
            timers.push(tokio::spawn(async move {
                tokio::time::sleep(max).await;
                s.finish(StopReason::MaxDuration);
            }));
        }
        *lock(&session.timers) = timers;

        RecordingHandle { session }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct Session {
    phase: Mutex<SessionPhase>,
    tap: Mutex<Option<CaptureTap>>,
    chunks: Mutex<UnboundedReceiver<AudioChunk>>,
    timers: Mutex<Vec<JoinHandle<()>>>,
    on_complete: Mutex<Option<CompletionCallback>>,
    encoder: Arc<dyn PayloadEncoder>,
    media_type: String,
    started_at: Instant,
}

impl Session {
    fn phase(&self) -> SessionPhase {
        *lock(&self.phase)
    }

    fn cancel_timers(&self) {
        for timer in lock(&self.timers).drain(..) {
            timer.abort();
        }
    }

    fn finish(&self, reason: StopReason) {
        {
            let mut phase = lock(&self.phase);
            if *phase != SessionPhase::Recording {
                return;
            }
            *phase = SessionPhase::Stopped;
        }
        self.cancel_timers();

        // Detach first so nothing arrives after the drain.
        drop(lock(&self.tap).take());
        let elapsed = self.started_at.elapsed();

        let mut chunks = Vec::new();
        {
            let mut rx = lock(&self.chunks);
            while let Ok(chunk) = rx.try_recv() {
                chunks.push(chunk);
            }
        }
        log::debug!(
            "recording stopped ({reason:?}) after {:.2}s, {} chunks",
            elapsed.as_secs_f64(),
            chunks.len()
        );

        let result = self
            .encoder
            .encode(&chunks, &self.media_type)
            .map(|payload| Recording { payload, elapsed });

        let callback = lock(&self.on_complete).take();
        if let Some(callback) = callback {
            callback(result);
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingHandle
// ---------------------------------------------------------------------------

/// Control handle for a running session. Clones refer to the same session.
#[derive(Clone)]
pub struct RecordingHandle {
    session: Arc<Session>,
}

impl RecordingHandle {
    /// Stops the session. Safe to call repeatedly and after the auto-stop.
    pub fn stop(&self) {
        self.session.cancel_timers();
        self.session.finish(StopReason::Manual);
    }

    pub fn phase(&self) -> SessionPhase {
        self.session.phase()
    }

    pub fn is_recording(&self) -> bool {
        self.phase() == SessionPhase::Recording
    }

    pub fn elapsed(&self) -> Duration {
        self.session.started_at.elapsed()
    }

    pub fn same_session(&self, other: &RecordingHandle) -> bool {
        Arc::ptr_eq(&self.session, &other.session)
    }
}

impl fmt::Debug for RecordingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingHandle")
            .field("phase", &self.phase())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
