//! Sample-rate conversion with `rubato`.
//!
//! Decoded payloads arrive at whatever rate they were recorded or imported
//! at; the output mixer runs at the device rate.  [`resample`] converts
//! planar audio between the two using an FFT resampler, processing fixed
//! input chunks and zero-padding the last one.

use rubato::{FftFixedIn, Resampler};
use thiserror::Error;

use super::format::DecodedAudio;

/// Input frames per resampler call.
const CHUNK_SIZE: usize = 1024;
const SUB_CHUNKS: usize = 2;

#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("cannot build resampler: {0}")]
    Construction(#[from] rubato::ResamplerConstructionError),

    #[error("resampling failed: {0}")]
    Process(#[from] rubato::ResampleError),
}

/// Returns `audio` converted to `target_rate`. Same-rate and empty input is
/// returned unchanged.
pub fn resample(audio: DecodedAudio, target_rate: u32) -> Result<DecodedAudio, ResampleError> {
    let source_rate = audio.sample_rate;
    let input_frames = audio.frames();
    if source_rate == target_rate || input_frames == 0 || audio.channels.is_empty() {
        return Ok(audio);
    }

    let channel_count = audio.channel_count();
    let mut resampler = FftFixedIn::<f32>::new(
        source_rate as usize,
        target_rate as usize,
        CHUNK_SIZE,
        SUB_CHUNKS,
        channel_count,
    )?;

    let expected_frames = (input_frames as f64 * target_rate as f64 / source_rate as f64).ceil() as usize;
    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(expected_frames + CHUNK_SIZE); channel_count];

    let mut pos = 0;
    while pos < input_frames {
        let needed = resampler.input_frames_next();
        let take = needed.min(input_frames - pos);

        let chunk: Vec<Vec<f32>> = audio
            .channels
            .iter()
            .map(|ch| {
                let mut buf = vec![0.0f32; needed];
                buf[..take].copy_from_slice(&ch[pos..pos + take]);
                buf
            })
            .collect();

        let processed = resampler.process(&chunk, None)?;
        for (out, ch) in output.iter_mut().zip(processed.iter()) {
            out.extend_from_slice(ch);
        }
        pos += needed;
    }

    for ch in &mut output {
        ch.truncate(expected_frames);
    }

    Ok(DecodedAudio {
        sample_rate: target_rate,
        channels: output,
    })
}
