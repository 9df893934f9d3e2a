//! Microphone capture via `cpal`, shared by every recording.
//!
//! ```text
//!   CaptureManager::acquire()
//!        │  cached stream still live? ── yes ──► reuse
//!        │ no
//!        ▼
//!   CaptureDevice::open(constraints) ──► Arc<dyn CaptureStream>
//!        │
//!        ▼
//!   stream.tap(tx) ──► CaptureTap (drop = detach)
//! ```
//!
//! The opened stream keeps running between recordings so that repeated
//! recordings never prompt for the microphone again.  Chunks are only
//! forwarded while a [`CaptureTap`] is attached.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::sync::lock;

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// A single buffer of raw audio as delivered by the cpal callback.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Interleaved PCM samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate of this chunk in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u16,
}

// ---------------------------------------------------------------------------
// CaptureConstraints
// ---------------------------------------------------------------------------

/// Processing the platform is asked to apply to the input signal.
///
/// Sample rate and channel count are deliberately absent: the platform picks
/// its native format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("microphone access was denied")]
    PermissionDenied,

    #[error("no input device found on the default audio host")]
    DeviceNotFound,

    #[error("input device unavailable: {0}")]
    DeviceUnavailable(String),
}

impl CaptureError {
    /// Message shown on the tile.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "Microphone access required. Tap again to retry.",
            Self::DeviceNotFound | Self::DeviceUnavailable(_) => "Microphone not available.",
        }
    }

    fn from_backend(description: String) -> Self {
        let lower = description.to_ascii_lowercase();
        if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
            Self::PermissionDenied
        } else {
            Self::DeviceUnavailable(description)
        }
    }
}

impl From<cpal::DefaultStreamConfigError> for CaptureError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        match err {
            cpal::DefaultStreamConfigError::BackendSpecific { err } => Self::from_backend(err.description),
            other => Self::DeviceUnavailable(other.to_string()),
        }
    }
}

impl From<cpal::BuildStreamError> for CaptureError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::BackendSpecific { err } => Self::from_backend(err.description),
            other => Self::DeviceUnavailable(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for CaptureError {
    fn from(err: cpal::PlayStreamError) -> Self {
        match err {
            cpal::PlayStreamError::BackendSpecific { err } => Self::from_backend(err.description),
            other => Self::DeviceUnavailable(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// ChunkRouter / CaptureTap
// ---------------------------------------------------------------------------

/// Forwards chunks from a running stream to at most one attached sink.
#[derive(Clone, Default)]
pub struct ChunkRouter {
    sink: Arc<Mutex<Option<(u64, UnboundedSender<AudioChunk>)>>>,
    next_id: Arc<AtomicU64>,
}

impl ChunkRouter {
    /// Attaches `sink`, replacing any previous one.
    pub fn attach(&self, sink: UnboundedSender<AudioChunk>) -> CaptureTap {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *lock(&self.sink) = Some((id, sink));
        CaptureTap {
            router: self.clone(),
            id,
        }
    }

    /// Called from the audio thread for every buffer.
    pub fn route(&self, chunk: AudioChunk) {
        if let Some((_, sink)) = lock(&self.sink).as_ref() {
            // Receiver gone means the session already flushed.
            let _ = sink.send(chunk);
        }
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.sink).is_some()
    }

    fn detach(&self, id: u64) {
        let mut sink = lock(&self.sink);
        if sink.as_ref().is_some_and(|(current, _)| *current == id) {
            *sink = None;
        }
    }
}

/// Attachment of one consumer to a capture stream; dropping it detaches.
pub struct CaptureTap {
    router: ChunkRouter,
    id: u64,
}

impl Drop for CaptureTap {
    fn drop(&mut self) {
        self.router.detach(self.id);
    }
}

// ---------------------------------------------------------------------------
// Platform traits
// ---------------------------------------------------------------------------

/// A running input stream.
pub trait CaptureStream: Send + Sync {
    /// `false` once the underlying device has gone away.
    fn is_live(&self) -> bool;

    /// Starts forwarding chunks to `sink` until the returned tap is dropped.
    fn tap(&self, sink: UnboundedSender<AudioChunk>) -> CaptureTap;
}

/// Opens input streams; one call may prompt the user for permission.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn open(&self, constraints: &CaptureConstraints) -> Result<Arc<dyn CaptureStream>, CaptureError>;
}

// Object-safety check
const _: () = {
    fn _assert_object_safe(_: Box<dyn CaptureDevice>, _: Box<dyn CaptureStream>) {}
};

// ---------------------------------------------------------------------------
// CaptureManager
// ---------------------------------------------------------------------------

/// Hands out the process-wide input stream, opening it on first use and
/// again whenever the cached one has ended.
pub struct CaptureManager {
    device: Arc<dyn CaptureDevice>,
    constraints: CaptureConstraints,
    cached: tokio::sync::Mutex<Option<Arc<dyn CaptureStream>>>,
}

impl CaptureManager {
    pub fn new(device: Arc<dyn CaptureDevice>, constraints: CaptureConstraints) -> Self {
        Self {
            device,
            constraints,
            cached: tokio::sync::Mutex::new(None),
        }
    }

    /// Returns a live stream. Failures are not retried; the next call tries
    /// again from scratch.
    pub async fn acquire(&self) -> Result<Arc<dyn CaptureStream>, CaptureError> {
        // Held across `open` so concurrent callers share a single prompt.
        let mut cached = self.cached.lock().await;
        if let Some(stream) = cached.as_ref() {
            if stream.is_live() {
                return Ok(Arc::clone(stream));
            }
            log::info!("capture stream ended; reopening");
        }
        *cached = None;

        let stream = self.device.open(&self.constraints).await?;
        *cached = Some(Arc::clone(&stream));
        Ok(stream)
    }
}

// ---------------------------------------------------------------------------
// AudioCapture (cpal)
// ---------------------------------------------------------------------------

/// RAII guard that keeps the cpal stream alive.
pub struct StreamHandle {
    _stream: cpal::Stream,
}

/// Default cpal input device and its preferred configuration.
pub struct AudioCapture {
    device: cpal::Device,
    config: cpal::StreamConfig,
    format: cpal::SampleFormat,
    sample_rate: u32,
    channels: u16,
}

impl AudioCapture {
    /// Opens the system default input device.
    pub fn new() -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(CaptureError::DeviceNotFound)?;

        let supported = device.default_input_config()?;

        let channels = supported.channels();
        let sample_rate = supported.sample_rate().0;
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        Ok(Self {
            device,
            config,
            format,
            sample_rate,
            channels,
        })
    }

    /// Starts the stream, routing every buffer through `router` as `f32`.
    /// `live` is cleared if the device disappears.
    pub fn start(&self, router: ChunkRouter, live: Arc<AtomicBool>) -> Result<StreamHandle, CaptureError> {
        let stream = match self.format {
            cpal::SampleFormat::F32 => self.build_typed::<f32>(router, live),
            cpal::SampleFormat::I16 => self.build_typed::<i16>(router, live),
            cpal::SampleFormat::U16 => self.build_typed::<u16>(router, live),
            other => Err(CaptureError::DeviceUnavailable(format!(
                "unsupported input sample format {other:?}"
            ))),
        }?;

        stream.play()?;
        Ok(StreamHandle { _stream: stream })
    }

    fn build_typed<T>(&self, router: ChunkRouter, live: Arc<AtomicBool>) -> Result<cpal::Stream, CaptureError>
    where
        T: cpal::SizedSample,
        f32: cpal::FromSample<T>,
    {
        let sample_rate = self.sample_rate;
        let channels = self.channels;

        let stream = self.device.build_input_stream(
            &self.config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                router.route(AudioChunk {
                    samples: to_f32(data),
                    sample_rate,
                    channels,
                });
            },
            move |err: cpal::StreamError| {
                log::error!("cpal input stream error: {err}");
                if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                    live.store(false, Ordering::SeqCst);
                }
            },
            None,
        )?;
        Ok(stream)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

/// Converts one device buffer to normalised `f32`.
fn to_f32<T>(data: &[T]) -> Vec<f32>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    data.iter().map(|&s| s.to_sample::<f32>()).collect()
}

// ---------------------------------------------------------------------------
// CpalMicrophone
// ---------------------------------------------------------------------------

/// [`CaptureDevice`] backed by the default cpal input.
///
/// `cpal::Stream` is not `Send`, so each opened stream lives on its own
/// thread until the returned [`CaptureStream`] is dropped.
#[derive(Debug, Default)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    pub fn new() -> Self {
        Self
    }
}

struct CpalStream {
    router: ChunkRouter,
    live: Arc<AtomicBool>,
    // Dropping the sender ends the stream thread.
    _shutdown: Mutex<std::sync::mpsc::Sender<()>>,
}

impl CaptureStream for CpalStream {
    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn tap(&self, sink: UnboundedSender<AudioChunk>) -> CaptureTap {
        self.router.attach(sink)
    }
}

#[async_trait]
impl CaptureDevice for CpalMicrophone {
    async fn open(&self, constraints: &CaptureConstraints) -> Result<Arc<dyn CaptureStream>, CaptureError> {
        // cpal exposes no voice-processing switches; the platform default
        // input path applies whatever processing the OS is configured for.
        log::debug!("opening default input with {constraints:?}");

        let router = ChunkRouter::default();
        let live = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<Result<(u32, u16), CaptureError>>();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();

        let thread_router = router.clone();
        let thread_live = Arc::clone(&live);
        std::thread::Builder::new()
            .name("soundboard-capture".into())
            .spawn(move || {
                let started = AudioCapture::new().and_then(|capture| {
                    let handle = capture.start(thread_router, Arc::clone(&thread_live))?;
                    Ok((capture, handle))
                });
                match started {
                    Ok((capture, handle)) => {
                        thread_live.store(true, Ordering::SeqCst);
                        let _ = ready_tx.send(Ok((capture.sample_rate(), capture.channels())));
                        // Blocks until the owning CpalStream is dropped.
                        let _ = shutdown_rx.recv();
                        drop(handle);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
                thread_live.store(false, Ordering::SeqCst);
            })
            .map_err(|e| CaptureError::DeviceUnavailable(format!("capture thread: {e}")))?;

        let (sample_rate, channels) = ready_rx
            .await
            .map_err(|_| CaptureError::DeviceUnavailable("capture thread exited".into()))??;
        log::info!("microphone open: {sample_rate} Hz, {channels} ch");

        Ok(Arc::new(CpalStream {
            router,
            live,
            _shutdown: Mutex::new(shutdown_tx),
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    struct FakeStream {
        router: ChunkRouter,
        live: AtomicBool,
    }

    impl CaptureStream for FakeStream {
        fn is_live(&self) -> bool {
            self.live.load(Ordering::SeqCst)
        }
        fn tap(&self, sink: UnboundedSender<AudioChunk>) -> CaptureTap {
            self.router.attach(sink)
        }
    }

    /// Counts opens; fails while `fail_with` is set.
    #[derive(Default)]
    struct FakeDevice {
        opens: AtomicUsize,
        fail_with: Mutex<Option<CaptureError>>,
        last: Mutex<Option<Arc<FakeStream>>>,
    }

    #[async_trait]
    impl CaptureDevice for FakeDevice {
        async fn open(&self, _: &CaptureConstraints) -> Result<Arc<dyn CaptureStream>, CaptureError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.fail_with.lock().unwrap().clone() {
                return Err(err);
            }
            let stream = Arc::new(FakeStream {
                router: ChunkRouter::default(),
                live: AtomicBool::new(true),
            });
            *self.last.lock().unwrap() = Some(Arc::clone(&stream));
            Ok(stream)
        }
    }

    fn chunk(value: f32) -> AudioChunk {
        AudioChunk {
            samples: vec![value; 4],
            sample_rate: 48_000,
            channels: 1,
        }
    }

    // --- constraints / errors ---

    #[test]
    fn default_constraints_enable_all_processing() {
        let c = CaptureConstraints::default();
        assert!(c.echo_cancellation && c.noise_suppression && c.auto_gain_control);
    }

    #[test]
    fn backend_permission_errors_map_to_permission_denied() {
        assert_eq!(
            CaptureError::from_backend("Access denied by user".into()),
            CaptureError::PermissionDenied
        );
        assert!(matches!(
            CaptureError::from_backend("device busy".into()),
            CaptureError::DeviceUnavailable(_)
        ));
    }

    #[test]
    fn user_messages_distinguish_permission_from_availability() {
        assert_ne!(
            CaptureError::PermissionDenied.user_message(),
            CaptureError::DeviceNotFound.user_message()
        );
    }

    // --- router / tap ---

    #[test]
    fn chunks_flow_only_while_tap_is_attached() {
        let router = ChunkRouter::default();
        router.route(chunk(0.1));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let tap = router.attach(tx);
        router.route(chunk(0.2));
        drop(tap);
        router.route(chunk(0.3));

        assert_eq!(rx.try_recv().unwrap().samples[0], 0.2);
        assert!(rx.try_recv().is_err());
        assert!(!router.is_attached());
    }

    #[test]
    fn dropping_a_replaced_tap_keeps_the_new_one() {
        let router = ChunkRouter::default();
        let (old_tx, _old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();

        let old = router.attach(old_tx);
        let _new = router.attach(new_tx);
        drop(old);
        router.route(chunk(0.5));

        assert!(new_rx.try_recv().is_ok());
    }

    // --- manager ---

    #[tokio::test]
    async fn acquire_reuses_live_stream() {
        let device = Arc::new(FakeDevice::default());
        let manager = CaptureManager::new(device.clone(), CaptureConstraints::default());

        let a = manager.acquire().await.unwrap();
        let b = manager.acquire().await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(device.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn acquire_reopens_after_stream_ends() {
        let device = Arc::new(FakeDevice::default());
        let manager = CaptureManager::new(device.clone(), CaptureConstraints::default());

        manager.acquire().await.unwrap();
        device.last.lock().unwrap().as_ref().unwrap().live.store(false, Ordering::SeqCst);
        manager.acquire().await.unwrap();

        assert_eq!(device.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_is_returned_and_next_acquire_retries() {
        let device = Arc::new(FakeDevice::default());
        *device.fail_with.lock().unwrap() = Some(CaptureError::PermissionDenied);
        let manager = CaptureManager::new(device.clone(), CaptureConstraints::default());

        assert_eq!(manager.acquire().await.err(), Some(CaptureError::PermissionDenied));

        *device.fail_with.lock().unwrap() = None;
        assert!(manager.acquire().await.is_ok());
        assert_eq!(device.opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn integer_device_buffers_are_normalised() {
        let from_i16 = to_f32(&[0i16, 16_384, i16::MIN]);
        assert_eq!(from_i16[0], 0.0);
        assert!((from_i16[1] - 0.5).abs() < 1e-4);
        assert_eq!(from_i16[2], -1.0);

        let from_u16 = to_f32(&[32_768u16, 0]);
        assert!(from_u16[0].abs() < 1e-4);
        assert_eq!(from_u16[1], -1.0);

        assert_eq!(to_f32(&[0.25f32]), vec![0.25]);
    }

    #[test]
    fn audio_chunk_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<AudioChunk>();
    }
}
