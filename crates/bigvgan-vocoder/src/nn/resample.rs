//! Kaiser-windowed sinc resampling used by the anti-aliased activation.
//!
//! Filters are designed on the host once and applied per channel by folding
//! channels into the batch axis, so a single `[1, K, 1]` kernel serves every
//! channel without grouped convolution.

use crate::audio::{pad_last_axis, PadMode};
use crate::error::{Result, VocoderError};
use crate::nn::conv::zero_insert;
use mlx_rs::ops::indexing::IndexOp;
use mlx_rs::Array;

/// Zeroth-order modified Bessel function of the first kind.
fn bessel_i0(x: f64) -> f64 {
    let half = x / 2.0;
    let mut term = 1.0;
    let mut sum = 1.0;
    for k in 1..64 {
        term *= (half / k as f64) * (half / k as f64);
        sum += term;
        if term < sum * 1e-17 {
            break;
        }
    }
    sum
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        let px = std::f64::consts::PI * x;
        px.sin() / px
    }
}

/// Low-pass FIR of `kernel_size` taps, unit DC gain.
///
/// `cutoff` and `half_width` are fractions of the sample rate. The Kaiser
/// beta follows the standard attenuation formula for a transition band of
/// `4 * half_width`.
pub fn kaiser_sinc_filter1d(cutoff: f64, half_width: f64, kernel_size: i32) -> Vec<f32> {
    let even = kernel_size % 2 == 0;
    let half_size = kernel_size / 2;

    let delta_f = 4.0 * half_width;
    let attenuation =
        2.285 * (half_size - 1) as f64 * std::f64::consts::PI * delta_f + 7.95;
    let beta = if attenuation > 50.0 {
        0.1102 * (attenuation - 8.7)
    } else if attenuation >= 21.0 {
        0.5842 * (attenuation - 21.0).powf(0.4) + 0.07886 * (attenuation - 21.0)
    } else {
        0.0
    };

    let n = kernel_size as usize;
    let denom = bessel_i0(beta);
    let window: Vec<f64> = (0..n)
        .map(|i| {
            if n == 1 {
                return 1.0;
            }
            let ratio = 2.0 * i as f64 / (n - 1) as f64 - 1.0;
            bessel_i0(beta * (1.0 - ratio * ratio).max(0.0).sqrt()) / denom
        })
        .collect();

    if cutoff == 0.0 {
        return vec![0.0; n];
    }

    let taps: Vec<f64> = (0..n)
        .map(|i| {
            let time = if even {
                i as f64 - half_size as f64 + 0.5
            } else {
                i as f64 - half_size as f64
            };
            2.0 * cutoff * window[i] * sinc(2.0 * cutoff * time)
        })
        .collect();
    let total: f64 = taps.iter().sum();
    taps.iter().map(|t| (t / total) as f32).collect()
}

/// Run a `[K]` filter over every row of `[rows, length]` with the given stride.
fn filter_rows(rows: &Array, filter: &Array, stride: i32) -> Result<Array> {
    let (n, length) = (rows.dim(0), rows.dim(1));
    let x_nlc = rows.reshape(&[n, length, 1])?;
    let out = mlx_rs::ops::conv1d(&x_nlc, filter, stride, 0, 1, 1)?;
    let out_len = out.dim(1);
    Ok(out.reshape(&[n, out_len])?)
}

fn check_ratio(ratio: i32, kernel_size: i32) -> Result<()> {
    if ratio < 1 || kernel_size < ratio {
        return Err(VocoderError::Config(format!(
            "resampling ratio {ratio} needs 1 <= ratio <= kernel_size ({kernel_size})"
        )));
    }
    Ok(())
}

/// Band-limited interpolation by an integer ratio.
#[derive(Debug, Clone)]
pub struct UpSample1d {
    /// Upsampling ratio.
    pub ratio: i32,
    /// Filter length.
    pub kernel_size: i32,
    pad: i32,
    pad_left: i32,
    /// Filter as an OKI conv kernel `[1, K, 1]`.
    filter: Array,
}

impl UpSample1d {
    /// Upsampler with the default kernel size `6 * ratio` (rounded to even).
    pub fn new(ratio: i32) -> Result<Self> {
        Self::with_kernel_size(ratio, (6 * ratio / 2) * 2)
    }

    /// Upsampler with an explicit kernel size.
    pub fn with_kernel_size(ratio: i32, kernel_size: i32) -> Result<Self> {
        check_ratio(ratio, kernel_size)?;
        let pad = kernel_size / ratio - 1;
        let pad_left = pad * ratio + (kernel_size - ratio) / 2;
        let taps = kaiser_sinc_filter1d(0.5 / ratio as f64, 0.6 / ratio as f64, kernel_size);
        Ok(Self {
            ratio,
            kernel_size,
            pad,
            pad_left,
            filter: Array::from_slice(&taps, &[1, kernel_size, 1]),
        })
    }

    /// `[batch, channels, length]` to `[batch, channels, length * ratio]`.
    pub fn forward(&self, x: &Array) -> Result<Array> {
        let (batch, channels, length) = (x.dim(0), x.dim(1), x.dim(2));
        let rows = x.reshape(&[batch * channels, 1, length])?;
        let rows = pad_last_axis(&rows, self.pad, self.pad, PadMode::Replicate)?;

        // Transposed conv: zero-stuff, then full correlation (filter is symmetric).
        let stuffed = zero_insert(&rows, self.ratio)?;
        let stuffed_len = stuffed.dim(2);
        let stuffed = stuffed.reshape(&[batch * channels, stuffed_len])?;
        let stuffed = pad_last_axis(&stuffed, self.kernel_size - 1, self.kernel_size - 1, PadMode::Zeros)?;
        let out = filter_rows(&stuffed, &self.filter, 1)?;

        let out_len = length * self.ratio;
        let out = out
            .index((.., self.pad_left..self.pad_left + out_len))
            .multiply(Array::from_f32(self.ratio as f32))?;
        Ok(out.reshape(&[batch, channels, out_len])?)
    }
}

/// Low-pass filter followed by decimation.
#[derive(Debug, Clone)]
pub struct DownSample1d {
    /// Decimation ratio.
    pub ratio: i32,
    /// Filter length.
    pub kernel_size: i32,
    pad_left: i32,
    pad_right: i32,
    filter: Array,
}

impl DownSample1d {
    /// Downsampler with the default kernel size `6 * ratio` (rounded to even).
    pub fn new(ratio: i32) -> Result<Self> {
        Self::with_kernel_size(ratio, (6 * ratio / 2) * 2)
    }

    /// Downsampler with an explicit kernel size.
    pub fn with_kernel_size(ratio: i32, kernel_size: i32) -> Result<Self> {
        check_ratio(ratio, kernel_size)?;
        let even = kernel_size % 2 == 0;
        let taps = kaiser_sinc_filter1d(0.5 / ratio as f64, 0.6 / ratio as f64, kernel_size);
        Ok(Self {
            ratio,
            kernel_size,
            pad_left: kernel_size / 2 - i32::from(even),
            pad_right: kernel_size / 2,
            filter: Array::from_slice(&taps, &[1, kernel_size, 1]),
        })
    }

    /// `[batch, channels, length]` to `[batch, channels, ceil(length / ratio)]`.
    pub fn forward(&self, x: &Array) -> Result<Array> {
        let (batch, channels, length) = (x.dim(0), x.dim(1), x.dim(2));
        let rows = x.reshape(&[batch * channels, length])?;
        let rows = pad_last_axis(&rows, self.pad_left, self.pad_right, PadMode::Replicate)?;
        let out = filter_rows(&rows, &self.filter, self.ratio)?;
        let out_len = out.dim(1);
        Ok(out.reshape(&[batch, channels, out_len])?)
    }
}
