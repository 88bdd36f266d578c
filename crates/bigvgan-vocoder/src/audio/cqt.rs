//! Constant-Q transform for the CQT discriminator.
//!
//! One bank of complex kernels covers the top octave. Lower octaves reuse
//! the same bank on a signal that is low-passed and decimated by two per
//! octave, with the hop halved each time so every octave yields the same
//! frame count.

use crate::audio::{frame_signal, pad_last_axis, PadMode, StftOutput};
use crate::error::{Result, VocoderError};
use crate::nn::DownSample1d;
use mlx_rs::ops::indexing::IndexOp;
use mlx_rs::Array;

/// Lowest analysed frequency (C1).
pub const CQT_FMIN: f64 = 32.70;

/// Filter length of the octave decimator.
const OCTAVE_FILTER_TAPS: i32 = 256;

/// Constant-Q transform settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CqtConfig {
    /// Sample rate of the analysed signal.
    pub sample_rate: i32,
    /// Hop of the top octave.
    pub hop_length: i32,
    /// Number of octaves.
    pub n_octaves: i32,
    /// Bins in each octave.
    pub bins_per_octave: i32,
    /// Center frequency of the lowest bin.
    pub fmin: f64,
}

impl CqtConfig {
    /// Total number of bins.
    pub fn n_bins(&self) -> i32 {
        self.n_octaves * self.bins_per_octave
    }

    /// Quality factor shared by every bin.
    pub fn q_factor(&self) -> f64 {
        1.0 / (2f64.powf(1.0 / self.bins_per_octave as f64) - 1.0)
    }

    /// Center frequency of `bin`, counting from the lowest.
    pub fn bin_frequency(&self, bin: i32) -> f64 {
        self.fmin * 2f64.powf(bin as f64 / self.bins_per_octave as f64)
    }

    fn validate(&self) -> Result<()> {
        if self.sample_rate <= 0
            || self.hop_length <= 0
            || self.n_octaves <= 0
            || self.bins_per_octave <= 0
        {
            return Err(VocoderError::DiscriminatorConfig(format!(
                "CQT sizes must be positive: {self:?}"
            )));
        }
        let decimation = 1i32
            .checked_shl((self.n_octaves - 1) as u32)
            .unwrap_or(i32::MAX);
        if self.hop_length % decimation != 0 {
            return Err(VocoderError::DiscriminatorConfig(format!(
                "CQT hop {} must be divisible by 2^(n_octaves - 1) = {decimation}",
                self.hop_length
            )));
        }
        let top = self.bin_frequency(self.n_bins() - 1);
        if top > self.sample_rate as f64 / 2.0 {
            return Err(VocoderError::DiscriminatorConfig(format!(
                "highest CQT bin {top:.1} Hz exceeds Nyquist of {} Hz",
                self.sample_rate
            )));
        }
        Ok(())
    }
}

/// Periodic Hann window.
fn hann(len: usize) -> Vec<f64> {
    (0..len)
        .map(|n| 0.5 * (1.0 - (2.0 * std::f64::consts::PI * n as f64 / len as f64).cos()))
        .collect()
}

/// Precomputed constant-Q transform.
#[derive(Debug, Clone)]
pub struct ConstantQTransform {
    /// Settings.
    pub config: CqtConfig,
    /// Length of every kernel, a power of two.
    pub kernel_length: i32,
    /// `[kernel_length, bins_per_octave]`.
    kernel_real: Array,
    /// `[kernel_length, bins_per_octave]`.
    kernel_imag: Array,
    /// `sqrt(filter length)` per output bin, `[1, n_bins, 1]`.
    length_scale: Array,
    decimate: DownSample1d,
}

impl ConstantQTransform {
    /// Build the top-octave kernel bank.
    pub fn new(config: CqtConfig) -> Result<Self> {
        config.validate()?;
        let sr = config.sample_rate as f64;
        let q = config.q_factor();
        let bpo = config.bins_per_octave as usize;
        let top_fmin = config.fmin * 2f64.powi(config.n_octaves - 1);

        let lengths: Vec<usize> = (0..bpo)
            .map(|k| {
                let freq = top_fmin * 2f64.powf(k as f64 / bpo as f64);
                (q * sr / freq).ceil() as usize
            })
            .collect();
        let kernel_length = lengths.iter().copied().max().unwrap_or(1).next_power_of_two();

        let mut real = vec![0.0f32; kernel_length * bpo];
        let mut imag = vec![0.0f32; kernel_length * bpo];
        for (k, &len) in lengths.iter().enumerate() {
            let freq = top_fmin * 2f64.powf(k as f64 / bpo as f64);
            let window = hann(len);
            let first = -((len as f64 / 2.0).ceil());
            let atoms: Vec<(f64, f64)> = window
                .iter()
                .enumerate()
                .map(|(n, w)| {
                    let phase = 2.0 * std::f64::consts::PI * freq * (first + n as f64) / sr;
                    (w * phase.cos() / len as f64, w * phase.sin() / len as f64)
                })
                .collect();
            let l1: f64 = atoms.iter().map(|(re, im)| re.hypot(*im)).sum();
            let l1 = if l1 > 0.0 { l1 } else { 1.0 };

            let start = ((kernel_length as f64 / 2.0 - len as f64 / 2.0).ceil() as usize)
                .saturating_sub(len % 2);
            for (n, (re, im)) in atoms.into_iter().enumerate() {
                let row = start + n;
                if row < kernel_length {
                    real[row * bpo + k] = (re / l1) as f32;
                    imag[row * bpo + k] = (im / l1) as f32;
                }
            }
        }

        let scale: Vec<f32> = (0..config.n_bins())
            .map(|bin| (q * sr / config.bin_frequency(bin)).ceil().sqrt() as f32)
            .collect();

        let kernel_length = kernel_length as i32;
        let shape = [kernel_length, bpo as i32];
        Ok(Self {
            kernel_real: Array::from_slice(&real, &shape),
            kernel_imag: Array::from_slice(&imag, &shape),
            length_scale: Array::from_slice(&scale, &[1, config.n_bins(), 1]),
            decimate: DownSample1d::with_kernel_size(2, OCTAVE_FILTER_TAPS)?,
            kernel_length,
            config,
        })
    }

    /// One octave: `[batch, samples]` to real/imag `[batch, bpo, frames]`.
    fn octave(&self, signal: &Array, hop: i32) -> Result<(Array, Array)> {
        let pad = self.kernel_length / 2;
        let padded = pad_last_axis(signal, pad, pad, PadMode::Reflect)?;
        let frames = frame_signal(&padded, self.kernel_length, hop)?;
        let real = frames.matmul(&self.kernel_real)?.transpose_axes(&[0, 2, 1])?;
        let imag = frames
            .matmul(&self.kernel_imag)?
            .transpose_axes(&[0, 2, 1])?
            .negative()?;
        Ok((real, imag))
    }

    /// Transform `[batch, samples]` into `[batch, n_bins, frames]` planes,
    /// lowest frequency first.
    pub fn forward(&self, signal: &Array) -> Result<StftOutput> {
        let mut octaves = Vec::with_capacity(self.config.n_octaves as usize);
        let mut current = signal.clone();
        let mut hop = self.config.hop_length;
        for octave in 0..self.config.n_octaves {
            if octave > 0 {
                let (batch, len) = (current.dim(0), current.dim(1));
                let down = self.decimate.forward(&current.reshape(&[batch, 1, len])?)?;
                let down_len = down.dim(2);
                current = down.reshape(&[batch, down_len])?;
                hop /= 2;
            }
            octaves.push(self.octave(&current, hop)?);
        }

        let frames = octaves
            .iter()
            .map(|(real, _)| real.dim(2))
            .min()
            .unwrap_or(0);
        let mut reals = Vec::with_capacity(octaves.len());
        let mut imags = Vec::with_capacity(octaves.len());
        for (real, imag) in octaves.iter().rev() {
            reals.push(real.index((.., .., ..frames)));
            imags.push(imag.index((.., .., ..frames)));
        }
        let real = mlx_rs::ops::concatenate_axis(&reals, 1)?;
        let imag = mlx_rs::ops::concatenate_axis(&imags, 1)?;

        Ok(StftOutput {
            real: real.multiply(&self.length_scale)?,
            imag: imag.multiply(&self.length_scale)?,
        })
    }
}
