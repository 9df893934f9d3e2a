//! cpal-backed [`OutputContext`].
//!
//! ```text
//!   OutputThread (owns cpal::Stream)            dispatcher thread
//!        │  data callback                              ▲
//!        ▼                                             │ voice id
//!   Mixer { voices } ── voice reached its end ────────┘──► EndedCallback
//! ```
//!
//! The stream is created suspended and only starts pulling audio after
//! [`OutputContext::resume`].  Voices are mixed by summing and clamping.
//! End-of-voice callbacks never run on the audio thread; ids are handed to a
//! dispatcher thread which looks up and invokes the registered callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::format::{decode_payload, DecodeError, DecodedAudio, Payload};
use super::player::{ContextState, EndedCallback, OutputContext, PlayWindow, PlaybackError, Voice};
use super::resample::resample;
use crate::sync::lock;

// ---------------------------------------------------------------------------
// Mixer
// ---------------------------------------------------------------------------

struct MixVoice {
    id: u64,
    buffer: Arc<DecodedAudio>,
    position: usize,
    end: usize,
}

struct Mixer {
    voices: Mutex<Vec<MixVoice>>,
    frames_rendered: AtomicU64,
}

impl Mixer {
    fn new() -> Self {
        Self {
            voices: Mutex::new(Vec::new()),
            frames_rendered: AtomicU64::new(0),
        }
    }

    /// Fills one device buffer. Runs on the audio thread.
    fn render<T>(&self, data: &mut [T], channels: usize, ended: &Sender<u64>)
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        let frames = data.len() / channels.max(1);

        // Never block the audio thread; a contended lock costs one silent buffer.
        let Ok(mut voices) = self.voices.try_lock() else {
            data.fill(T::EQUILIBRIUM);
            return;
        };

        for (frame, out) in data.chunks_exact_mut(channels).enumerate() {
            for (ch, sample) in out.iter_mut().enumerate() {
                let mut acc = 0.0f32;
                for v in voices.iter() {
                    let pos = v.position + frame;
                    if pos < v.end {
                        let src = &v.buffer.channels[ch.min(v.buffer.channels.len() - 1)];
                        acc += src[pos];
                    }
                }
                *sample = T::from_sample(acc.clamp(-1.0, 1.0));
            }
        }

        voices.retain_mut(|v| {
            v.position += frames;
            if v.position >= v.end {
                let _ = ended.send(v.id);
                false
            } else {
                true
            }
        });
        drop(voices);

        self.frames_rendered.fetch_add(frames as u64, Ordering::Relaxed);
    }

    fn remove(&self, id: u64) -> bool {
        let mut voices = lock(&self.voices);
        let before = voices.len();
        voices.retain(|v| v.id != id);
        voices.len() != before
    }
}

// ---------------------------------------------------------------------------
// CpalOutput
// ---------------------------------------------------------------------------

const STATE_SUSPENDED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_CLOSED: u8 = 2;

enum OutputCommand {
    Resume(tokio::sync::oneshot::Sender<Result<(), PlaybackError>>),
}

type CallbackMap = Arc<Mutex<HashMap<u64, EndedCallback>>>;

/// Default cpal output device with a software mixer.
pub struct CpalOutput {
    mixer: Arc<Mixer>,
    commands: Mutex<Sender<OutputCommand>>,
    callbacks: CallbackMap,
    ended_tx: Mutex<Sender<u64>>,
    state: Arc<AtomicU8>,
    next_voice_id: AtomicU64,
    sample_rate: u32,
}

impl CpalOutput {
    /// Builds the stream on a dedicated thread and waits for it to be ready.
    /// Blocking; call from a blocking context.
    pub fn open() -> Result<Self, PlaybackError> {
        let mixer = Arc::new(Mixer::new());
        let callbacks: CallbackMap = Arc::new(Mutex::new(HashMap::new()));
        let state = Arc::new(AtomicU8::new(STATE_SUSPENDED));
        let (ended_tx, ended_rx) = mpsc::channel::<u64>();
        let (command_tx, command_rx) = mpsc::channel::<OutputCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, PlaybackError>>();

        spawn_dispatcher(ended_rx, Arc::clone(&callbacks))?;

        let thread_mixer = Arc::clone(&mixer);
        let thread_state = Arc::clone(&state);
        let thread_ended = ended_tx.clone();
        std::thread::Builder::new()
            .name("soundboard-output".into())
            .spawn(move || {
                let stream = match build_stream(thread_mixer, thread_ended, Arc::clone(&thread_state)) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        thread_state.store(STATE_CLOSED, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                run_output_thread(&stream, &command_rx, &thread_state);
                thread_state.store(STATE_CLOSED, Ordering::SeqCst);
            })
            .map_err(|e| PlaybackError::OutputUnavailable(format!("output thread: {e}")))?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| PlaybackError::OutputUnavailable("output thread exited".into()))??;
        log::info!("audio output open at {sample_rate} Hz");

        Ok(Self {
            mixer,
            commands: Mutex::new(command_tx),
            callbacks,
            ended_tx: Mutex::new(ended_tx),
            state,
            next_voice_id: AtomicU64::new(0),
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

fn run_output_thread(stream: &cpal::Stream, commands: &Receiver<OutputCommand>, state: &AtomicU8) {
    // Exits when the owning CpalOutput is dropped.
    while let Ok(command) = commands.recv() {
        match command {
            OutputCommand::Resume(reply) => {
                let result = stream
                    .play()
                    .map_err(|e| PlaybackError::OutputUnavailable(e.to_string()));
                if result.is_ok() {
                    state.store(STATE_RUNNING, Ordering::SeqCst);
                }
                let _ = reply.send(result);
            }
        }
    }
}

fn spawn_dispatcher(ended_rx: Receiver<u64>, callbacks: CallbackMap) -> Result<(), PlaybackError> {
    std::thread::Builder::new()
        .name("soundboard-voice-ended".into())
        .spawn(move || {
            while let Ok(id) = ended_rx.recv() {
                let callback = lock(&callbacks).remove(&id);
                if let Some(callback) = callback {
                    callback();
                }
            }
        })
        .map(|_| ())
        .map_err(|e| PlaybackError::OutputUnavailable(format!("dispatcher thread: {e}")))
}

fn build_stream(
    mixer: Arc<Mixer>,
    ended: Sender<u64>,
    state: Arc<AtomicU8>,
) -> Result<(cpal::Stream, u32), PlaybackError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlaybackError::OutputUnavailable("no output device".into()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| PlaybackError::OutputUnavailable(e.to_string()))?;

    let sample_rate = supported.sample_rate().0;
    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    let stream = match format {
        cpal::SampleFormat::F32 => build_typed::<f32>(&device, &config, mixer, ended, state),
        cpal::SampleFormat::I16 => build_typed::<i16>(&device, &config, mixer, ended, state),
        cpal::SampleFormat::U16 => build_typed::<u16>(&device, &config, mixer, ended, state),
        other => Err(PlaybackError::OutputUnavailable(format!(
            "unsupported sample format {other:?}"
        ))),
    }?;

    // cpal may auto-start streams on some hosts; stay suspended until resumed.
    let _ = stream.pause();
    Ok((stream, sample_rate))
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mixer: Arc<Mixer>,
    ended: Sender<u64>,
    state: Arc<AtomicU8>,
) -> Result<cpal::Stream, PlaybackError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels as usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| mixer.render(data, channels, &ended),
            move |err: cpal::StreamError| {
                log::error!("cpal output stream error: {err}");
                if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                    state.store(STATE_CLOSED, Ordering::SeqCst);
                }
            },
            None,
        )
        .map_err(|e| PlaybackError::OutputUnavailable(e.to_string()))
}

#[async_trait]
impl OutputContext for CpalOutput {
    fn state(&self) -> ContextState {
        match self.state.load(Ordering::SeqCst) {
            STATE_RUNNING => ContextState::Running,
            STATE_SUSPENDED => ContextState::Suspended,
            _ => ContextState::Closed,
        }
    }

    async fn resume(&self) -> Result<(), PlaybackError> {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        lock(&self.commands)
            .send(OutputCommand::Resume(reply_tx))
            .map_err(|_| PlaybackError::OutputUnavailable("output thread stopped".into()))?;
        reply_rx
            .await
            .map_err(|_| PlaybackError::OutputUnavailable("output thread stopped".into()))?
    }

    fn current_time(&self) -> f64 {
        self.mixer.frames_rendered.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    async fn decode(&self, payload: &Payload) -> Result<DecodedAudio, DecodeError> {
        let payload = payload.clone();
        let target = self.sample_rate;
        tokio::task::spawn_blocking(move || {
            let decoded = decode_payload(&payload)?;
            resample(decoded, target).map_err(|e| DecodeError::Resample(e.to_string()))
        })
        .await
        .map_err(|e| DecodeError::Corrupt(format!("decoder panicked: {e}")))?
    }

    fn create_voice(&self, buffer: Arc<DecodedAudio>, window: PlayWindow) -> Result<Arc<dyn Voice>, PlaybackError> {
        if self.state() == ContextState::Closed {
            return Err(PlaybackError::OutputUnavailable("context closed".into()));
        }
        if buffer.channels.is_empty() {
            return Err(PlaybackError::Decode(DecodeError::Corrupt("buffer has no channels".into())));
        }

        let rate = buffer.sample_rate as f64;
        let frames = buffer.frames();
        let start = ((window.offset_sec * rate) as usize).min(frames);
        let end = match window.duration_sec {
            Some(d) => (start + (d * rate).round() as usize).min(frames),
            None => frames,
        };

        Ok(Arc::new(CpalVoice {
            id: self.next_voice_id.fetch_add(1, Ordering::Relaxed),
            buffer,
            start,
            end,
            mixer: Arc::clone(&self.mixer),
            callbacks: Arc::clone(&self.callbacks),
            ended_tx: Mutex::new(lock(&self.ended_tx).clone()),
            started: std::sync::atomic::AtomicBool::new(false),
        }))
    }
}

// ---------------------------------------------------------------------------
// CpalVoice
// ---------------------------------------------------------------------------

struct CpalVoice {
    id: u64,
    buffer: Arc<DecodedAudio>,
    start: usize,
    end: usize,
    mixer: Arc<Mixer>,
    callbacks: CallbackMap,
    ended_tx: Mutex<Sender<u64>>,
    started: std::sync::atomic::AtomicBool,
}

impl Voice for CpalVoice {
    fn start(&self, on_ended: EndedCallback) -> Result<(), PlaybackError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(PlaybackError::AlreadyStopped);
        }
        lock(&self.callbacks).insert(self.id, on_ended);

        if self.start >= self.end {
            // Nothing to play; report the end straight away.
            let _ = lock(&self.ended_tx).send(self.id);
            return Ok(());
        }
        lock(&self.mixer.voices).push(MixVoice {
            id: self.id,
            buffer: Arc::clone(&self.buffer),
            position: self.start,
            end: self.end,
        });
        Ok(())
    }

    fn stop(&self) -> Result<(), PlaybackError> {
        if self.mixer.remove(self.id) {
            let _ = lock(&self.ended_tx).send(self.id);
            Ok(())
        } else {
            Err(PlaybackError::AlreadyStopped)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(values: Vec<f32>) -> Arc<DecodedAudio> {
        Arc::new(DecodedAudio {
            sample_rate: 4,
            channels: vec![values],
        })
    }

    #[test]
    fn mixer_sums_voices_and_reports_ends() {
        let mixer = Mixer::new();
        let (tx, rx) = mpsc::channel();
        {
            let mut voices = mixer.voices.lock().unwrap();
            voices.push(MixVoice {
                id: 1,
                buffer: buffer(vec![0.25; 2]),
                position: 0,
                end: 2,
            });
            voices.push(MixVoice {
                id: 2,
                buffer: buffer(vec![0.5; 8]),
                position: 0,
                end: 8,
            });
        }

        let mut out = vec![0.0f32; 4];
        mixer.render(&mut out, 1, &tx);

        assert_eq!(out, vec![0.75, 0.75, 0.5, 0.5]);
        assert_eq!(rx.try_recv().unwrap(), 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(mixer.frames_rendered.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn mixer_clamps_and_upmixes_mono() {
        let mixer = Mixer::new();
        let (tx, _rx) = mpsc::channel();
        for id in 0..3 {
            mixer.voices.lock().unwrap().push(MixVoice {
                id,
                buffer: buffer(vec![0.6; 4]),
                position: 0,
                end: 4,
            });
        }

        let mut out = vec![0.0f32; 4];
        mixer.render(&mut out, 2, &tx);
        assert!(out.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn remove_reports_whether_voice_was_playing() {
        let mixer = Mixer::new();
        mixer.voices.lock().unwrap().push(MixVoice {
            id: 7,
            buffer: buffer(vec![0.1; 4]),
            position: 0,
            end: 4,
        });
        assert!(mixer.remove(7));
        assert!(!mixer.remove(7));
    }
}
