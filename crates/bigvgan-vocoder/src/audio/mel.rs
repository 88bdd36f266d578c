//! Mel filterbank and log-mel spectrogram computation.

use crate::config::BigVGANConfig;
use crate::error::Result;
use mlx_rs::Array;

use super::stft::{pad_last_axis, PadMode, Stft, StftConfig, WindowFn};

/// Additive floor of the spectral log, keeps true silence finite.
pub const SPECTRAL_FLOOR: f32 = 1e-9;

/// Mel filterbank configuration.
#[derive(Debug, Clone)]
pub struct MelConfig {
    /// Sampling rate in Hz.
    pub sr: i32,
    /// Number of FFT bins.
    pub n_fft: i32,
    /// Number of mel frequency bins.
    pub n_mels: i32,
    /// Minimum frequency in Hz.
    pub fmin: f32,
    /// Maximum frequency in Hz (defaults to sr/2).
    pub fmax: Option<f32>,
    /// Whether to use HTK formula (vs Slaney).
    pub htk: bool,
    /// Normalization type for filterbank.
    pub norm: MelNorm,
}

/// Mel filterbank normalization.
#[derive(Debug, Clone, Copy, Default)]
pub enum MelNorm {
    /// No normalization.
    None,
    /// Slaney-style normalization (area = 1).
    #[default]
    Slaney,
}

impl Default for MelConfig {
    fn default() -> Self {
        Self {
            sr: 24000,
            n_fft: 1024,
            n_mels: 100,
            fmin: 0.0,
            fmax: None,
            htk: false,
            norm: MelNorm::Slaney,
        }
    }
}

/// Convert frequency in Hz to mel scale.
///
/// # Arguments
/// * `freq` - Frequency in Hz
/// * `htk` - Use HTK formula if true, Slaney otherwise
pub fn hz_to_mel(freq: f64, htk: bool) -> f64 {
    if htk {
        return 2595.0 * (1.0 + freq / 700.0).log10();
    }
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4f64.ln() / 27.0;

    if freq >= min_log_hz {
        min_log_mel + (freq / min_log_hz).ln() / logstep
    } else {
        freq / f_sp
    }
}

/// Convert mel scale to frequency in Hz.
pub fn mel_to_hz(mel: f64, htk: bool) -> f64 {
    if htk {
        return 700.0 * (10.0f64.powf(mel / 2595.0) - 1.0);
    }
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4f64.ln() / 27.0;

    if mel >= min_log_mel {
        min_log_hz * ((mel - min_log_mel) * logstep).exp()
    } else {
        f_sp * mel
    }
}

/// Host-side mel filterbank, row-major `[n_mels, n_fft/2+1]`.
///
/// Triangles are built on the Hz axis between consecutive mel points, the
/// same construction librosa uses.
pub fn mel_filterbank_weights(config: &MelConfig) -> Vec<f32> {
    let fmax = config.fmax.unwrap_or(config.sr as f32 / 2.0) as f64;
    let n_freqs = (config.n_fft / 2 + 1) as usize;
    let n_mels = config.n_mels as usize;

    let fft_freqs: Vec<f64> = (0..n_freqs)
        .map(|k| k as f64 * config.sr as f64 / config.n_fft as f64)
        .collect();

    let mel_min = hz_to_mel(config.fmin as f64, config.htk);
    let mel_max = hz_to_mel(fmax, config.htk);
    let hz_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| {
            let mel = mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64;
            mel_to_hz(mel, config.htk)
        })
        .collect();

    let mut filterbank = vec![0.0f32; n_mels * n_freqs];
    for m in 0..n_mels {
        let lower_width = hz_points[m + 1] - hz_points[m];
        let upper_width = hz_points[m + 2] - hz_points[m + 1];
        let enorm = match config.norm {
            MelNorm::Slaney => 2.0 / (hz_points[m + 2] - hz_points[m]),
            MelNorm::None => 1.0,
        };
        for (k, &f) in fft_freqs.iter().enumerate() {
            let lower = (f - hz_points[m]) / lower_width;
            let upper = (hz_points[m + 2] - f) / upper_width;
            let weight = lower.min(upper).max(0.0);
            filterbank[m * n_freqs + k] = (weight * enorm) as f32;
        }
    }
    filterbank
}

/// Create mel filterbank matrix `[n_mels, n_fft/2+1]`.
pub fn mel_filterbank(config: &MelConfig) -> Result<Array> {
    let weights = mel_filterbank_weights(config);
    Ok(Array::from_slice(
        &weights,
        &[config.n_mels, config.n_fft / 2 + 1],
    ))
}

/// `ln(c * x + floor)`.
pub fn dynamic_range_compression(x: &Array, c: f32, floor: f32) -> Result<Array> {
    Ok(x
        .multiply(Array::from_f32(c))?
        .add(Array::from_f32(floor))?
        .log()?)
}

/// Inverse of [`dynamic_range_compression`]: `(exp(y) - floor) / c`.
pub fn dynamic_range_decompression(y: &Array, c: f32, floor: f32) -> Result<Array> {
    Ok(y
        .exp()?
        .subtract(Array::from_f32(floor))?
        .divide(Array::from_f32(c))?)
}

/// Stabilized log used for every mel in the system.
pub fn spectral_normalize(magnitudes: &Array) -> Result<Array> {
    dynamic_range_compression(magnitudes, 1.0, SPECTRAL_FLOOR)
}

/// Exact inverse of [`spectral_normalize`].
pub fn spectral_de_normalize(log_magnitudes: &Array) -> Result<Array> {
    dynamic_range_decompression(log_magnitudes, 1.0, SPECTRAL_FLOOR)
}

/// Log-mel front end: STFT magnitude, mel projection, stabilized log.
#[derive(Debug, Clone)]
pub struct MelSpectrogram {
    stft: Stft,
    /// Filterbank transposed to `[n_bins, n_mels]` for right-multiplication.
    filterbank_t: Array,
    n_mels: i32,
    /// Reflect padding applied on both sides when the STFT is uncentered.
    edge_pad: i32,
}

impl MelSpectrogram {
    /// Build the front end from a filterbank and STFT configuration.
    ///
    /// Uncentered STFTs are reflect-padded by `(n_fft - hop) / 2` so the
    /// frame count is `samples / hop`.
    pub fn new(mel: &MelConfig, stft: StftConfig) -> Result<Self> {
        let edge_pad = if stft.center {
            0
        } else {
            (stft.n_fft - stft.hop_length) / 2
        };
        let filterbank_t = mel_filterbank(mel)?.transpose_axes(&[1, 0])?;
        Ok(Self {
            stft: Stft::new(stft)?,
            filterbank_t,
            n_mels: mel.n_mels,
            edge_pad,
        })
    }

    /// Conditioning mel for a model config, with an optional fmax override
    /// (the loss mel uses `fmax_for_loss`).
    pub fn from_config(config: &BigVGANConfig, fmax: Option<f32>) -> Result<Self> {
        let mel = MelConfig {
            sr: config.sampling_rate,
            n_fft: config.n_fft,
            n_mels: config.num_mels,
            fmin: config.fmin,
            fmax: Some(fmax.unwrap_or_else(|| config.fmax_hz())),
            htk: false,
            norm: MelNorm::Slaney,
        };
        let stft = StftConfig::uncentered(config.n_fft, config.hop_size, config.win_size);
        Self::new(&mel, stft)
    }

    /// Number of mel bins.
    pub fn n_mels(&self) -> i32 {
        self.n_mels
    }

    /// Hop length in samples.
    pub fn hop_length(&self) -> i32 {
        self.stft.config.hop_length
    }

    /// Linear mel magnitudes `[batch, n_mels, frames]`.
    pub fn mel_magnitude(&self, audio: &Array) -> Result<Array> {
        let audio = super::stft::as_batch_signal(audio)?;
        let audio = pad_last_axis(&audio, self.edge_pad, self.edge_pad, PadMode::Reflect)?;
        let magnitude = self.stft.magnitude(&audio)?; // [batch, freq, frames]
        let mag_t = magnitude.transpose_axes(&[0, 2, 1])?; // [batch, frames, freq]
        let mel = mag_t.matmul(&self.filterbank_t)?; // [batch, frames, n_mels]
        Ok(mel.transpose_axes(&[0, 2, 1])?)
    }

    /// Log-mel spectrogram `[batch, n_mels, frames]`.
    pub fn forward(&self, audio: &Array) -> Result<Array> {
        spectral_normalize(&self.mel_magnitude(audio)?)
    }
}

/// One-shot log-mel spectrogram with explicit parameters.
#[allow(clippy::too_many_arguments)]
pub fn mel_spectrogram(
    audio: &Array,
    n_fft: i32,
    num_mels: i32,
    sampling_rate: i32,
    hop_size: i32,
    win_size: i32,
    fmin: f32,
    fmax: Option<f32>,
    center: bool,
) -> Result<Array> {
    let mel = MelConfig {
        sr: sampling_rate,
        n_fft,
        n_mels: num_mels,
        fmin,
        fmax,
        htk: false,
        norm: MelNorm::Slaney,
    };
    let stft = StftConfig {
        n_fft,
        hop_length: hop_size,
        win_length: Some(win_size),
        center,
        pad_mode: PadMode::Reflect,
        window: WindowFn::Hann,
    };
    MelSpectrogram::new(&mel, stft)?.forward(audio)
}
