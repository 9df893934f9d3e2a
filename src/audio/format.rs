//! Recorded payloads, media-type negotiation and decoding.
//!
//! Recording produces a [`Payload`]: an immutable byte blob tagged with the
//! media type the encoder actually wrote.  The encoder is a seam
//! ([`PayloadEncoder`]); the built-in [`WavEncoder`] writes 16-bit PCM WAV via
//! `hound`.
//!
//! ```text
//! Payload ─┬─ WAV (type or RIFF magic) → hound       ─┐
//!          └─ anything else            → symphonia   ─┴→ DecodedAudio
//!             (MP3, AAC/M4A, Ogg Vorbis, FLAC, ALAC)
//! ```

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use super::capture::AudioChunk;

/// Container formats tried in order when probing the encoder.
pub const PREFERRED_MEDIA_TYPES: &[&str] = &[
    "audio/webm;codecs=opus",
    "audio/webm",
    "audio/mp4",
    "audio/ogg;codecs=opus",
    WAV_MEDIA_TYPE,
];

pub const WAV_MEDIA_TYPE: &str = "audio/wav";

/// Media type assumed for imported files whose extension is unknown.
pub const FALLBACK_MEDIA_TYPE: &str = "audio/mpeg";

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Encoded audio plus the media type describing it. Clones share the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Payload {
    bytes: Arc<[u8]>,
    media_type: String,
}

impl Payload {
    pub fn new(bytes: impl Into<Arc<[u8]>>, media_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            media_type: media_type.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("media_type", &self.media_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// DecodedAudio
// ---------------------------------------------------------------------------

/// Planar `f32` PCM, one `Vec` per channel, all of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl DecodedAudio {
    /// Splits interleaved samples into planar channels. A trailing partial
    /// frame is dropped.
    pub fn from_interleaved(samples: &[f32], channels: u16, sample_rate: u32) -> Self {
        let n = channels.max(1) as usize;
        let frames = samples.len() / n;
        let mut planar = vec![Vec::with_capacity(frames); n];
        for frame in samples.chunks_exact(n) {
            for (ch, &s) in frame.iter().enumerate() {
                planar[ch].push(s);
            }
        }
        Self {
            sample_rate,
            channels: planar,
        }
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("captured chunks disagree on format ({0})")]
    MixedFormat(String),

    #[error("WAV encoding failed: {0}")]
    Wav(#[from] hound::Error),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unsupported media type: {0}")]
    Unsupported(String),

    #[error("audio data is corrupt: {0}")]
    Corrupt(String),

    #[error("resampling failed: {0}")]
    Resample(String),
}

// ---------------------------------------------------------------------------
// PayloadEncoder
// ---------------------------------------------------------------------------

/// Turns captured chunks into a single payload.
pub trait PayloadEncoder: Send + Sync {
    /// Whether the encoder can produce `media_type`.
    fn supports(&self, media_type: &str) -> bool;

    /// Encodes all chunks of one recording. `requested` is the probed media
    /// type (possibly empty); the returned payload's type is authoritative.
    fn encode(&self, chunks: &[AudioChunk], requested: &str) -> Result<Payload, EncodeError>;
}

/// Returns the first entry of `preferred` the encoder supports, or an empty
/// string to let the encoder choose.
pub fn detect_supported_media_type<S: AsRef<str>>(encoder: &dyn PayloadEncoder, preferred: &[S]) -> String {
    preferred
        .iter()
        .map(|candidate| candidate.as_ref())
        .find(|candidate| encoder.supports(candidate))
        .map(str::to_owned)
        .unwrap_or_default()
}

/// Strips parameters (`;codecs=...`) and lowercases.
fn base_type(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

pub fn is_wav(media_type: &str) -> bool {
    matches!(
        base_type(media_type).as_str(),
        "audio/wav" | "audio/wave" | "audio/x-wav" | "audio/vnd.wave"
    )
}

// ---------------------------------------------------------------------------
// WavEncoder
// ---------------------------------------------------------------------------

/// 16-bit PCM WAV encoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct WavEncoder;

impl PayloadEncoder for WavEncoder {
    fn supports(&self, media_type: &str) -> bool {
        is_wav(media_type)
    }

    fn encode(&self, chunks: &[AudioChunk], requested: &str) -> Result<Payload, EncodeError> {
        if !requested.is_empty() && !is_wav(requested) {
            log::warn!("encoder cannot produce {requested}; writing {WAV_MEDIA_TYPE}");
        }

        let (sample_rate, channels) = match chunks.first() {
            Some(first) => (first.sample_rate, first.channels),
            // An empty capture still yields a valid, silent file.
            None => (48_000, 1),
        };
        if let Some(odd) = chunks
            .iter()
            .find(|c| c.sample_rate != sample_rate || c.channels != channels)
        {
            return Err(EncodeError::MixedFormat(format!(
                "{sample_rate} Hz/{channels} ch vs {} Hz/{} ch",
                odd.sample_rate, odd.channels
            )));
        }

        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut bytes = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec)?;
            for sample in chunks.iter().flat_map(|c| c.samples.iter()) {
                let pcm = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                writer.write_sample(pcm)?;
            }
            writer.finalize()?;
        }

        Ok(Payload::new(bytes, WAV_MEDIA_TYPE))
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn decode_error(err: hound::Error) -> DecodeError {
    match err {
        hound::Error::Unsupported | hound::Error::TooWide | hound::Error::InvalidSampleFormat => {
            DecodeError::Unsupported(err.to_string())
        }
        other => DecodeError::Corrupt(other.to_string()),
    }
}

/// Decodes a WAV payload (any channel count, integer or float PCM).
pub fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, DecodeError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes)).map_err(decode_error)?;
    let spec = reader.spec();
    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(DecodeError::Corrupt(format!(
            "{} channels at {} Hz",
            spec.channels, spec.sample_rate
        )));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(decode_error)?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()
                .map_err(decode_error)?
        }
    };

    Ok(DecodedAudio::from_interleaved(&interleaved, spec.channels, spec.sample_rate))
}

/// Decodes compressed containers through symphonia's default registry.
///
/// Packets that fail to decode are skipped; a stream with no decodable
/// frames at all is `Corrupt`.  Anything symphonia cannot identify is
/// `Unsupported`.
pub fn decode_compressed(payload: &Payload) -> Result<DecodedAudio, DecodeError> {
    let media_type = payload.media_type();
    let source = MediaSourceStream::new(Box::new(Cursor::new(payload.shared_bytes())), Default::default());

    let mut hint = Hint::new();
    hint.mime_type(&base_type(media_type));
    if let Some(extension) = hint_extension(media_type) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, source, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| {
            log::debug!("no container reader for {media_type}: {e}");
            DecodeError::Unsupported(media_type.to_owned())
        })?;
    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DecodeError::Unsupported(format!("{media_type}: no audio track")))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track.codec_params.channels.map_or(0, |c| c.count() as u16);
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Unsupported(format!("{media_type}: {e}")))?;

    let mut interleaved = Vec::new();
    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(DecodeError::Corrupt(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                interleaved.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => log::debug!("skipping undecodable packet: {e}"),
            Err(e) => return Err(DecodeError::Corrupt(e.to_string())),
        }
    }

    if interleaved.is_empty() || channels == 0 || sample_rate == 0 {
        return Err(DecodeError::Corrupt(format!("{media_type}: no audio frames")));
    }
    Ok(DecodedAudio::from_interleaved(&interleaved, channels, sample_rate))
}

fn hint_extension(media_type: &str) -> Option<&'static str> {
    match base_type(media_type).as_str() {
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" | "audio/aac" => Some("m4a"),
        "audio/ogg" => Some("ogg"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        "audio/webm" => Some("webm"),
        _ => None,
    }
}

/// Decodes `payload`: WAV (by type or RIFF magic) through `hound`, every
/// other container through symphonia.
pub fn decode_payload(payload: &Payload) -> Result<DecodedAudio, DecodeError> {
    let bytes = payload.bytes();
    if is_wav(payload.media_type()) || bytes.starts_with(b"RIFF") {
        decode_wav(bytes)
    } else {
        decode_compressed(payload)
    }
}

// ---------------------------------------------------------------------------
// File extensions
// ---------------------------------------------------------------------------

/// Extension used when exporting a payload of `media_type`.
pub fn file_extension(media_type: &str) -> &'static str {
    let base = base_type(media_type);
    if base.contains("mp4") {
        "m4a"
    } else if base.contains("webm") {
        "webm"
    } else if base.contains("ogg") {
        "ogg"
    } else if is_wav(&base) {
        "wav"
    } else {
        "audio"
    }
}

/// Media type inferred from an imported file's extension.
pub fn media_type_for_extension(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "wav" | "wave" => WAV_MEDIA_TYPE,
        "m4a" | "mp4" | "aac" => "audio/mp4",
        "webm" => "audio/webm",
        "ogg" | "oga" | "opus" => "audio/ogg",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        _ => FALLBACK_MEDIA_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(samples: Vec<f32>, sample_rate: u32, channels: u16) -> AudioChunk {
        AudioChunk {
            samples,
            sample_rate,
            channels,
        }
    }

    struct OnlyMp4;

    impl PayloadEncoder for OnlyMp4 {
        fn supports(&self, media_type: &str) -> bool {
            media_type == "audio/mp4"
        }
        fn encode(&self, _: &[AudioChunk], requested: &str) -> Result<Payload, EncodeError> {
            Ok(Payload::new(Vec::new(), requested))
        }
    }

    struct Nothing;

    impl PayloadEncoder for Nothing {
        fn supports(&self, _: &str) -> bool {
            false
        }
        fn encode(&self, _: &[AudioChunk], _: &str) -> Result<Payload, EncodeError> {
            Ok(Payload::new(Vec::new(), "audio/x-native"))
        }
    }

    // --- media type probe ---

    #[test]
    fn probe_picks_first_supported_in_priority_order() {
        assert_eq!(detect_supported_media_type(&OnlyMp4, PREFERRED_MEDIA_TYPES), "audio/mp4");
        assert_eq!(detect_supported_media_type(&WavEncoder, PREFERRED_MEDIA_TYPES), "audio/wav");
    }

    #[test]
    fn probe_returns_empty_when_nothing_matches() {
        assert_eq!(detect_supported_media_type(&Nothing, PREFERRED_MEDIA_TYPES), "");
    }

    #[test]
    fn wav_detection_ignores_parameters_and_case() {
        assert!(is_wav("Audio/WAV"));
        assert!(is_wav("audio/x-wav; rate=48000"));
        assert!(!is_wav("audio/webm;codecs=opus"));
    }

    // --- WAV codec ---

    #[test]
    fn wav_encode_decode_preserves_shape() {
        let chunks = vec![
            chunk(vec![0.5, -0.5, 0.25, -0.25], 44_100, 2),
            chunk(vec![0.0, 0.0], 44_100, 2),
        ];
        let payload = WavEncoder.encode(&chunks, "audio/wav").unwrap();
        assert_eq!(payload.media_type(), "audio/wav");

        let decoded = decode_payload(&payload).unwrap();
        assert_eq!(decoded.sample_rate, 44_100);
        assert_eq!(decoded.channel_count(), 2);
        assert_eq!(decoded.frames(), 3);
        assert!((decoded.channels[0][0] - 0.5).abs() < 1e-3);
        assert!((decoded.channels[1][1] + 0.25).abs() < 1e-3);
    }

    #[test]
    fn empty_capture_encodes_to_silent_file() {
        let payload = WavEncoder.encode(&[], "").unwrap();
        let decoded = decode_payload(&payload).unwrap();
        assert_eq!(decoded.frames(), 0);
        assert_eq!(decoded.duration(), 0.0);
    }

    #[test]
    fn mixed_chunk_formats_are_rejected() {
        let chunks = vec![chunk(vec![0.0; 4], 48_000, 1), chunk(vec![0.0; 4], 44_100, 1)];
        assert!(matches!(
            WavEncoder.encode(&chunks, "audio/wav"),
            Err(EncodeError::MixedFormat(_))
        ));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let payload = Payload::new(b"definitely not audio".to_vec(), "audio/wav");
        assert!(decode_payload(&payload).is_err());
    }

    #[test]
    fn unrecognised_container_is_unsupported() {
        let payload = Payload::new(vec![0u8; 32], "audio/webm");
        assert_eq!(
            decode_payload(&payload),
            Err(DecodeError::Unsupported("audio/webm".into()))
        );
    }

    #[test]
    fn mp3_decodes_through_symphonia() {
        let payload = Payload::new(crate::audio::player::testing::mp3_bytes(40), "audio/mpeg");

        let decoded = decode_payload(&payload).unwrap();

        assert_eq!(decoded.sample_rate, 44_100);
        assert_eq!(decoded.channel_count(), 1);
        assert!((decoded.duration() - 40.0 * 1152.0 / 44_100.0).abs() < 0.1);
        assert!(decoded.channels[0].iter().all(|s| s.abs() < 0.01));
    }

    #[test]
    fn truncated_mp3_without_frames_is_rejected() {
        let payload = Payload::new(vec![0xFF, 0xFB, 0x90, 0xC0], "audio/mpeg");
        assert!(decode_payload(&payload).is_err());
    }

    #[test]
    fn duration_from_frames() {
        let audio = DecodedAudio {
            sample_rate: 8_000,
            channels: vec![vec![0.0; 12_000]],
        };
        assert!((audio.duration() - 1.5).abs() < 1e-9);
    }

    // --- extensions ---

    #[test]
    fn export_extension_by_media_type() {
        assert_eq!(file_extension("audio/mp4"), "m4a");
        assert_eq!(file_extension("audio/webm;codecs=opus"), "webm");
        assert_eq!(file_extension("audio/ogg;codecs=opus"), "ogg");
        assert_eq!(file_extension("audio/wav"), "wav");
        assert_eq!(file_extension("audio/mpeg"), "audio");
    }

    #[test]
    fn import_media_type_by_extension() {
        assert_eq!(media_type_for_extension("WAV"), "audio/wav");
        assert_eq!(media_type_for_extension("m4a"), "audio/mp4");
        assert_eq!(media_type_for_extension("xyz"), FALLBACK_MEDIA_TYPE);
    }
}
