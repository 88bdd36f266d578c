//! WAV decoding, resampling and writing.

use std::path::Path;

use bigvgan_vocoder::{Result, VocoderError};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Mono waveform in `[-1, 1]` at its native sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Samples, channels averaged.
    pub samples: Vec<f32>,
    /// Native sample rate in Hz.
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Duration in seconds.
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Source of decoded waveforms.
///
/// Implementations must be shareable across worker threads; every call only
/// touches the file it is given.
pub trait AudioDecoder: Send + Sync {
    /// Decode `path` to mono samples. Failures are [`VocoderError::AudioDecode`].
    fn decode(&self, path: &Path) -> Result<DecodedAudio>;
}

/// Decoder for PCM and float WAV files.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavDecoder;

impl AudioDecoder for WavDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedAudio> {
        load_wav(path)
    }
}

/// Load a WAV file as mono `f32` samples.
///
/// Integer samples are scaled by `2^(bits - 1)`; multi-channel audio is
/// averaged.
pub fn load_wav(path: impl AsRef<Path>) -> Result<DecodedAudio> {
    let path = path.as_ref();
    let reader = hound::WavReader::open(path).map_err(|e| VocoderError::decode(path, e))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| VocoderError::decode(path, e))?,
        hound::SampleFormat::Int => {
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_value))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| VocoderError::decode(path, e))?
        }
    };

    let channels = spec.channels.max(1) as usize;
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Frames fed to the interpolator per call.
const RESAMPLE_CHUNK: usize = 1024;

/// Resample with a windowed-sinc interpolator.
///
/// The interpolator's output delay is removed and its tail flushed with
/// zeros, so an event at input time `t` stays at `t` in the output. The
/// result holds exactly `ceil(len * to / from)` samples.
pub fn resample(samples: &[f32], from_sr: u32, to_sr: u32) -> Result<Vec<f32>> {
    if from_sr == to_sr || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if from_sr == 0 || to_sr == 0 {
        return Err(VocoderError::Config(format!(
            "cannot resample from {from_sr} Hz to {to_sr} Hz"
        )));
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = to_sr as f64 / from_sr as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)
        .map_err(resampler_error)?;

    let delay = resampler.output_delay();
    let expected = (samples.len() as f64 * ratio).ceil() as usize;
    let needed = delay + expected;
    let mut output = Vec::with_capacity(needed + RESAMPLE_CHUNK);

    let mut chunks = samples.chunks_exact(RESAMPLE_CHUNK);
    for chunk in chunks.by_ref() {
        let out = resampler.process(&[chunk], None).map_err(resampler_error)?;
        output.extend_from_slice(&out[0]);
    }
    let rest = chunks.remainder();
    if !rest.is_empty() {
        let out = resampler
            .process_partial(Some(&[rest][..]), None)
            .map_err(resampler_error)?;
        output.extend_from_slice(&out[0]);
    }
    while output.len() < needed {
        let out = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(resampler_error)?;
        if out[0].is_empty() {
            break;
        }
        output.extend_from_slice(&out[0]);
    }

    output.drain(..delay.min(output.len()));
    output.resize(expected, 0.0);
    Ok(output)
}

fn resampler_error(e: impl std::fmt::Display) -> VocoderError {
    VocoderError::Config(format!("resampler: {e}"))
}

/// Write mono samples as a 16-bit PCM WAV (`sample * 32767`, clamped).
pub fn save_audio(path: impl AsRef<Path>, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let to_io = |e: hound::Error| match e {
        hound::Error::IoError(e) => VocoderError::Io(e),
        other => VocoderError::Config(format!("wav writer: {other}")),
    };

    let mut writer = hound::WavWriter::create(path.as_ref(), spec).map_err(to_io)?;
    for &sample in samples {
        let scaled = (sample * 32767.0).clamp(-32767.0, 32767.0) as i16;
        writer.write_sample(scaled).map_err(to_io)?;
    }
    writer.finalize().map_err(to_io)?;
    Ok(())
}

/// Peak-normalize to `scale` (`x / max|x| * scale`); silence is only scaled.
pub fn peak_normalize(samples: &mut [f32], scale: f32) {
    let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    let gain = if peak > f32::MIN_POSITIVE {
        scale / peak
    } else {
        scale
    };
    for s in samples.iter_mut() {
        *s *= gain;
    }
}
