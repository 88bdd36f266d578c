//! Short-Time Fourier Transform on MLX.
//!
//! The transform is expressed as a matrix product against a precomputed
//! windowed DFT basis, so real and imaginary parts stay ordinary `f32`
//! arrays and gradients flow through them without complex dtypes.

use crate::error::{Result, VocoderError};
use mlx_rs::Array;

/// Floor added under the square root of the magnitude.
pub const MAGNITUDE_EPS: f32 = 1e-9;

/// STFT configuration.
#[derive(Debug, Clone)]
pub struct StftConfig {
    /// FFT size.
    pub n_fft: i32,
    /// Hop size in samples.
    pub hop_length: i32,
    /// Window size (defaults to n_fft).
    pub win_length: Option<i32>,
    /// Whether to center the signal with `n_fft / 2` padding.
    pub center: bool,
    /// Padding mode when centering.
    pub pad_mode: PadMode,
    /// Analysis window.
    pub window: WindowFn,
}

/// Analysis window shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WindowFn {
    /// Periodic Hann window.
    #[default]
    Hann,
    /// All-ones window of `win_length` samples.
    Rectangular,
}

/// Padding modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PadMode {
    /// Reflect padding (mirror, edge sample not repeated).
    #[default]
    Reflect,
    /// Zero padding.
    Zeros,
    /// Replicate edge values.
    Replicate,
}

impl Default for StftConfig {
    fn default() -> Self {
        Self {
            n_fft: 1024,
            hop_length: 256,
            win_length: None,
            center: true,
            pad_mode: PadMode::Reflect,
            window: WindowFn::Hann,
        }
    }
}

impl StftConfig {
    /// Config with `win_length` and no centering, as used by the mel front end.
    pub fn uncentered(n_fft: i32, hop_length: i32, win_length: i32) -> Self {
        Self {
            n_fft,
            hop_length,
            win_length: Some(win_length),
            center: false,
            pad_mode: PadMode::Reflect,
            window: WindowFn::Hann,
        }
    }

    /// Effective window length.
    pub fn win_length(&self) -> i32 {
        self.win_length.unwrap_or(self.n_fft)
    }

    /// Number of one-sided frequency bins.
    pub fn n_bins(&self) -> i32 {
        self.n_fft / 2 + 1
    }

    fn validate(&self) -> Result<()> {
        if self.n_fft <= 0 || self.hop_length <= 0 {
            return Err(VocoderError::Config(format!(
                "STFT sizes must be positive (n_fft={}, hop={})",
                self.n_fft, self.hop_length
            )));
        }
        let win = self.win_length();
        if win <= 0 || win > self.n_fft {
            return Err(VocoderError::Config(format!(
                "STFT window {win} must be in 1..={}",
                self.n_fft
            )));
        }
        Ok(())
    }
}

/// Periodic Hann window of `size` samples, zero-padded to the center of
/// an `n_fft` frame.
///
/// hann[n] = 0.5 * (1 - cos(2*pi*n / size))
pub fn hann_window(size: i32, n_fft: i32) -> Vec<f32> {
    let pad_left = ((n_fft - size) / 2).max(0) as usize;
    let mut window = vec![0.0f32; n_fft.max(size) as usize];
    for n in 0..size as usize {
        let phase = 2.0 * std::f64::consts::PI * n as f64 / size as f64;
        window[pad_left + n] = (0.5 * (1.0 - phase.cos())) as f32;
    }
    window
}

/// Window of `size` samples centered in an `n_fft` frame.
pub fn frame_window(kind: WindowFn, size: i32, n_fft: i32) -> Vec<f32> {
    match kind {
        WindowFn::Hann => hann_window(size, n_fft),
        WindowFn::Rectangular => {
            let pad_left = ((n_fft - size) / 2).max(0) as usize;
            let mut window = vec![0.0f32; n_fft.max(size) as usize];
            window[pad_left..pad_left + size as usize].fill(1.0);
            window
        }
    }
}

/// Slice a `[batch, samples]` signal into `[batch, frames, frame_length]`.
pub fn frame_signal(signal: &Array, frame_length: i32, hop_length: i32) -> Result<Array> {
    let length = signal.dim(1);
    if length < frame_length {
        return Err(VocoderError::ShapeMismatch {
            expected: vec![signal.dim(0), frame_length],
            actual: signal.shape().to_vec(),
        });
    }
    let num_frames = (length - frame_length) / hop_length + 1;

    let mut indices = Vec::with_capacity((num_frames * frame_length) as usize);
    for t in 0..num_frames {
        let start = t * hop_length;
        indices.extend(start..start + frame_length);
    }
    let indices = Array::from_slice(&indices, &[num_frames, frame_length]);
    Ok(signal.take_axis(&indices, 1)?)
}

/// Real and imaginary planes of a spectral transform, each `[batch, bins, frames]`.
#[derive(Debug, Clone)]
pub struct StftOutput {
    /// Real part.
    pub real: Array,
    /// Imaginary part.
    pub imag: Array,
}

impl StftOutput {
    /// Stabilized magnitude `sqrt(re^2 + im^2 + eps)`.
    pub fn magnitude(&self) -> Result<Array> {
        let power = self
            .real
            .square()?
            .add(&self.imag.square()?)?
            .add(Array::from_f32(MAGNITUDE_EPS))?;
        Ok(power.sqrt()?)
    }
}

/// Precomputed STFT for one `(n_fft, hop, win)` configuration.
#[derive(Debug, Clone)]
pub struct Stft {
    /// Configuration.
    pub config: StftConfig,
    /// `w[n] * cos(2*pi*k*n/N)`, shape `[n_fft, n_bins]`.
    cos_basis: Array,
    /// `-w[n] * sin(2*pi*k*n/N)`, shape `[n_fft, n_bins]`.
    sin_basis: Array,
}

impl Stft {
    /// Build the windowed DFT basis.
    pub fn new(config: StftConfig) -> Result<Self> {
        config.validate()?;
        let n_fft = config.n_fft as usize;
        let n_bins = config.n_bins() as usize;
        let window = frame_window(config.window, config.win_length(), config.n_fft);

        let mut cos = vec![0.0f32; n_fft * n_bins];
        let mut sin = vec![0.0f32; n_fft * n_bins];
        for n in 0..n_fft {
            for k in 0..n_bins {
                // Reduce k*n modulo N first so the phase stays accurate for large frames.
                let phase =
                    2.0 * std::f64::consts::PI * ((k * n) % n_fft) as f64 / n_fft as f64;
                cos[n * n_bins + k] = window[n] * phase.cos() as f32;
                sin[n * n_bins + k] = -window[n] * phase.sin() as f32;
            }
        }

        let shape = [config.n_fft, n_bins as i32];
        Ok(Self {
            cos_basis: Array::from_slice(&cos, &shape),
            sin_basis: Array::from_slice(&sin, &shape),
            config,
        })
    }

    /// Frames produced for a signal of `length` samples.
    pub fn num_frames(&self, length: i32) -> i32 {
        let padded = if self.config.center {
            length + 2 * (self.config.n_fft / 2)
        } else {
            length
        };
        if padded < self.config.n_fft {
            0
        } else {
            (padded - self.config.n_fft) / self.config.hop_length + 1
        }
    }

    /// Slice a `[batch, samples]` signal into `[batch, frames, n_fft]`.
    pub fn frames(&self, signal: &Array) -> Result<Array> {
        let signal = as_batch_signal(signal)?;
        let signal = if self.config.center {
            let pad = self.config.n_fft / 2;
            pad_last_axis(&signal, pad, pad, self.config.pad_mode)?
        } else {
            signal
        };
        frame_signal(&signal, self.config.n_fft, self.config.hop_length)
    }

    /// Compute the STFT of `[samples]`, `[batch, samples]` or `[batch, 1, samples]`.
    pub fn forward(&self, signal: &Array) -> Result<StftOutput> {
        let frames = self.frames(signal)?;
        let real = frames.matmul(&self.cos_basis)?.transpose_axes(&[0, 2, 1])?;
        let imag = frames.matmul(&self.sin_basis)?.transpose_axes(&[0, 2, 1])?;
        Ok(StftOutput { real, imag })
    }

    /// Stabilized magnitude spectrogram `[batch, n_fft/2+1, frames]`.
    pub fn magnitude(&self, signal: &Array) -> Result<Array> {
        self.forward(signal)?.magnitude()
    }
}

/// Compute the magnitude spectrogram for a one-off configuration.
pub fn stft_magnitude(signal: &Array, config: &StftConfig) -> Result<Array> {
    Stft::new(config.clone())?.magnitude(signal)
}

/// Flatten `[samples]` or `[batch, 1, samples]` into `[batch, samples]`.
pub(crate) fn as_batch_signal(signal: &Array) -> Result<Array> {
    match signal.ndim() {
        1 => Ok(signal.reshape(&[1, -1])?),
        2 => Ok(signal.clone()),
        3 if signal.dim(1) == 1 => Ok(signal.reshape(&[signal.dim(0), signal.dim(2)])?),
        _ => Err(VocoderError::ShapeMismatch {
            expected: vec![-1, 1, -1],
            actual: signal.shape().to_vec(),
        }),
    }
}

/// Source index for position `i` (may be out of range) under `mode`.
fn source_index(i: i32, len: i32, mode: PadMode) -> i32 {
    match mode {
        PadMode::Replicate | PadMode::Zeros => i.clamp(0, len - 1),
        PadMode::Reflect => {
            if len == 1 {
                return 0;
            }
            let period = 2 * (len - 1);
            let m = i.rem_euclid(period);
            if m >= len {
                period - m
            } else {
                m
            }
        }
    }
}

/// Pad the last axis of any tensor by `left` / `right` samples.
pub fn pad_last_axis(x: &Array, left: i32, right: i32, mode: PadMode) -> Result<Array> {
    if left == 0 && right == 0 {
        return Ok(x.clone());
    }
    let axis = x.ndim() as i32 - 1;
    let len = x.dim(axis);

    if mode == PadMode::Zeros {
        let mut shape = x.shape().to_vec();
        let mut parts = Vec::with_capacity(3);
        shape[axis as usize] = left;
        let zeros_left = mlx_rs::ops::zeros::<f32>(&shape)?;
        shape[axis as usize] = right;
        let zeros_right = mlx_rs::ops::zeros::<f32>(&shape)?;
        if left > 0 {
            parts.push(&zeros_left);
        }
        parts.push(x);
        if right > 0 {
            parts.push(&zeros_right);
        }
        return Ok(mlx_rs::ops::concatenate_axis(&parts, axis)?);
    }

    let indices: Vec<i32> = (-left..len + right)
        .map(|i| source_index(i, len, mode))
        .collect();
    let indices = Array::from_slice(&indices, &[len + left + right]);
    Ok(x.take_axis(&indices, axis)?)
}
