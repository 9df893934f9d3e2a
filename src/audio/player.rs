//! Playback resource manager.
//!
//! One [`OutputContext`] per process, created lazily on first use, shared by
//! all slots.  Every `play` creates a fresh single-use [`Voice`]; voices of
//! different slots mix freely, while a new `play` on a slot stops that slot's
//! previous voice first.
//!
//! ```text
//!   play(slot) ─► stop(slot) ─► decoded(slot) ─► create_voice ─► register ─► start
//!                                   │ cache hit                     │
//!                                   ▼                               ▼
//!                         HashMap<SlotIndex, Arc<DecodedAudio>>   active[slot] = (id, voice)
//!
//!   voice ended ─► active[slot].id == id ? remove + on_ended() : ignore
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::OnceCell;

use super::format::{DecodeError, DecodedAudio, Payload};
use crate::storage::{SlotIndex, TrimWindow};
use crate::sync::lock;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("audio output unavailable: {0}")]
    OutputUnavailable(String),

    #[error("voice already stopped")]
    AlreadyStopped,
}

pub type EndedCallback = Box<dyn FnOnce() + Send + 'static>;

/// Portion of a buffer a voice plays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayWindow {
    pub offset_sec: f64,
    /// `None` plays to the end of the buffer.
    pub duration_sec: Option<f64>,
}

impl PlayWindow {
    pub const FULL: PlayWindow = PlayWindow {
        offset_sec: 0.0,
        duration_sec: None,
    };

    /// Play window for an optional trim, clamped to `natural` seconds.
    pub fn from_trim(trim: Option<TrimWindow>, natural: f64) -> Self {
        match trim {
            Some(t) => {
                let offset_sec = t.start_sec.clamp(0.0, natural);
                let end = t.end_sec.clamp(offset_sec, natural);
                PlayWindow {
                    offset_sec,
                    duration_sec: Some(end - offset_sec),
                }
            }
            None => Self::FULL,
        }
    }

    /// Seconds this window actually plays from a buffer of `natural` seconds.
    pub fn effective_duration(&self, natural: f64) -> f64 {
        let remaining = (natural - self.offset_sec).max(0.0);
        match self.duration_sec {
            Some(d) => d.min(remaining),
            None => remaining,
        }
    }
}

/// Reported once a voice has started.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackStarted {
    /// Context clock reading taken right after the voice started.
    pub start_time: f64,
    /// Seconds the voice will play for.
    pub duration: f64,
}

// ---------------------------------------------------------------------------
// Platform traits
// ---------------------------------------------------------------------------

/// A single-use playing source.
pub trait Voice: Send + Sync {
    /// Starts playback. `on_ended` fires once, on natural end or after `stop`.
    fn start(&self, on_ended: EndedCallback) -> Result<(), PlaybackError>;

    /// Stops playback; `AlreadyStopped` if it has finished.
    fn stop(&self) -> Result<(), PlaybackError>;
}

/// Audio output device abstraction.
#[async_trait]
pub trait OutputContext: Send + Sync {
    fn state(&self) -> ContextState;

    async fn resume(&self) -> Result<(), PlaybackError>;

    /// Monotonic context clock in seconds.
    fn current_time(&self) -> f64;

    async fn decode(&self, payload: &Payload) -> Result<DecodedAudio, DecodeError>;

    fn create_voice(&self, buffer: Arc<DecodedAudio>, window: PlayWindow) -> Result<Arc<dyn Voice>, PlaybackError>;
}

// Object-safety check
const _: () = {
    fn _assert_object_safe(_: Box<dyn OutputContext>, _: Box<dyn Voice>) {}
};

pub type ContextFactory = Arc<dyn Fn() -> Result<Arc<dyn OutputContext>, PlaybackError> + Send + Sync>;

// ---------------------------------------------------------------------------
// PlaybackManager
// ---------------------------------------------------------------------------

struct ActiveVoice {
    id: u64,
    voice: Arc<dyn Voice>,
}

type ActiveMap = Arc<Mutex<HashMap<SlotIndex, ActiveVoice>>>;

pub struct PlaybackManager {
    factory: ContextFactory,
    context: OnceCell<Arc<dyn OutputContext>>,
    active: ActiveMap,
    cache: Mutex<HashMap<SlotIndex, Arc<DecodedAudio>>>,
    next_voice_id: AtomicU64,
}

impl PlaybackManager {
    /// The context is built by `factory` on first use.
    pub fn new(factory: ContextFactory) -> Self {
        Self {
            factory,
            context: OnceCell::new(),
            active: Arc::new(Mutex::new(HashMap::new())),
            cache: Mutex::new(HashMap::new()),
            next_voice_id: AtomicU64::new(0),
        }
    }

    /// Manager around an already built context.
    pub fn with_context(context: Arc<dyn OutputContext>) -> Self {
        Self::new(Arc::new(move || -> Result<Arc<dyn OutputContext>, PlaybackError> {
            Ok(Arc::clone(&context))
        }))
    }

    async fn context(&self) -> Result<&Arc<dyn OutputContext>, PlaybackError> {
        self.context
            .get_or_try_init(|| async {
                let factory = Arc::clone(&self.factory);
                let context = tokio::task::spawn_blocking(move || factory())
                    .await
                    .map_err(|e| PlaybackError::OutputUnavailable(format!("output setup panicked: {e}")))??;
                log::info!("audio output context created");
                Ok(context)
            })
            .await
    }

    /// Creates the context if needed and resumes it if suspended.
    pub async fn ensure_running(&self) -> Result<(), PlaybackError> {
        let context = self.context().await?;
        match context.state() {
            ContextState::Running => Ok(()),
            ContextState::Suspended => context.resume().await,
            ContextState::Closed => Err(PlaybackError::OutputUnavailable("context closed".into())),
        }
    }

    /// Decodes `payload` without touching the cache.
    pub async fn decode(&self, payload: &Payload) -> Result<DecodedAudio, PlaybackError> {
        Ok(self.context().await?.decode(payload).await?)
    }

    /// Cached decode of the slot's payload.
    pub async fn decoded(&self, slot: SlotIndex, payload: &Payload) -> Result<Arc<DecodedAudio>, PlaybackError> {
        let cached = lock(&self.cache).get(&slot).cloned();
        if let Some(buffer) = cached {
            return Ok(buffer);
        }

        let decoded = Arc::new(self.decode(payload).await?);
        log::debug!("{slot}: decoded {:.2}s of audio", decoded.duration());
        Ok(Arc::clone(lock(&self.cache).entry(slot).or_insert(decoded)))
    }

    /// Plays the slot's payload, replacing any voice already playing on this
    /// slot. `on_ended` fires once, when this voice ends while still being
    /// the slot's current one.
    pub async fn play(
        &self,
        slot: SlotIndex,
        payload: &Payload,
        trim: Option<TrimWindow>,
        on_ended: EndedCallback,
    ) -> Result<PlaybackStarted, PlaybackError> {
        self.stop(slot);

        let buffer = self.decoded(slot, payload).await?;
        let context = self.context().await?;

        let natural = buffer.duration();
        let window = PlayWindow::from_trim(trim, natural);
        let voice = context.create_voice(Arc::clone(&buffer), window)?;
        let id = self.next_voice_id.fetch_add(1, Ordering::Relaxed);

        let active = Arc::clone(&self.active);
        let guarded: EndedCallback = Box::new(move || {
            let current = {
                let mut map = lock(&active);
                if map.get(&slot).is_some_and(|a| a.id == id) {
                    map.remove(&slot);
                    true
                } else {
                    false
                }
            };
            if current {
                on_ended();
            } else {
                log::debug!("{slot}: superseded voice {id} ended");
            }
        });

        // Another play on this slot may have registered while we decoded.
        let replaced = lock(&self.active).insert(
            slot,
            ActiveVoice {
                id,
                voice: Arc::clone(&voice),
            },
        );
        if let Some(previous) = replaced {
            stop_voice(slot, &previous.voice);
        }

        if let Err(e) = voice.start(guarded) {
            let mut map = lock(&self.active);
            if map.get(&slot).is_some_and(|a| a.id == id) {
                map.remove(&slot);
            }
            return Err(e);
        }

        let started = PlaybackStarted {
            start_time: context.current_time(),
            duration: window.effective_duration(natural),
        };
        log::debug!("{slot}: voice {id} started at {:.3}s for {:.2}s", started.start_time, started.duration);
        Ok(started)
    }

    /// Stops the slot's voice, if any.
    pub fn stop(&self, slot: SlotIndex) {
        let previous = lock(&self.active).remove(&slot);
        if let Some(previous) = previous {
            stop_voice(slot, &previous.voice);
        }
    }

    pub fn clear_cache(&self, slot: SlotIndex) {
        lock(&self.cache).remove(&slot);
    }

    pub fn is_cached(&self, slot: SlotIndex) -> bool {
        lock(&self.cache).contains_key(&slot)
    }

    pub fn is_playing(&self, slot: SlotIndex) -> bool {
        lock(&self.active).contains_key(&slot)
    }
}

fn stop_voice(slot: SlotIndex, voice: &Arc<dyn Voice>) {
    match voice.stop() {
        Ok(()) | Err(PlaybackError::AlreadyStopped) => {}
        Err(e) => log::warn!("{slot}: stopping voice failed: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
