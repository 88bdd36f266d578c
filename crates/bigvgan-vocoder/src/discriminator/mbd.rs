//! Multi-Band Discriminator (MBD).
//!
//! The complex STFT (real and imaginary parts as two channels) is split
//! along frequency into fixed bands; each band has its own convolution
//! stack and the band outputs are joined before a shared scoring head.

use std::collections::HashMap;
use std::rc::Rc;

use super::{
    check_waveform, normalize_volume, Discriminator, DiscriminatorFamily, DiscriminatorOutput,
};
use crate::audio::{Stft, StftConfig, WindowFn};
use crate::config::BigVGANConfig;
use crate::error::{Result, VocoderError};
use crate::nn::{join, leaky_relu, StateDict, WeightNormConv2d};
use mlx_rs::ops::indexing::IndexOp;
use mlx_rs::Array;

/// Band edges as fractions of the one-sided spectrum.
pub const MBD_BANDS: [(f32, f32); 5] = [(0.0, 0.1), (0.1, 0.25), (0.25, 0.5), (0.5, 0.75), (0.75, 1.0)];

const CHANNELS: i32 = 32;

/// Multi-Band Discriminator: one [`DiscriminatorB`] per window length.
pub type MultiBandDiscriminator = DiscriminatorFamily<DiscriminatorB>;

impl MultiBandDiscriminator {
    /// Build from `mbd_fft_sizes`.
    pub fn from_config(config: &BigVGANConfig) -> Result<Self> {
        let discriminators = config
            .mbd_fft_sizes
            .iter()
            .map(|&w| DiscriminatorB::new(w))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new("mbd", discriminators))
    }
}

/// Single multi-band discriminator.
#[derive(Debug)]
pub struct DiscriminatorB {
    /// Centered, rectangular-window STFT with hop `window_length / 4`.
    pub stft: Stft,
    /// `[start, end)` bin ranges.
    pub bands: Vec<(i32, i32)>,
    /// One convolution stack per band.
    pub band_convs: Vec<Vec<WeightNormConv2d>>,
    /// Shared scoring head.
    pub conv_post: WeightNormConv2d,
}

fn band_stack() -> Result<Vec<WeightNormConv2d>> {
    let mut convs = vec![WeightNormConv2d::new(2, CHANNELS, (3, 9), (1, 1), (1, 4), (1, 1))?];
    for _ in 0..3 {
        convs.push(WeightNormConv2d::new(
            CHANNELS,
            CHANNELS,
            (3, 9),
            (1, 2),
            (1, 4),
            (1, 1),
        )?);
    }
    convs.push(WeightNormConv2d::new(
        CHANNELS,
        CHANNELS,
        (3, 3),
        (1, 1),
        (1, 1),
        (1, 1),
    )?);
    Ok(convs)
}

impl DiscriminatorB {
    /// Create a discriminator analysing windows of `window_length` samples.
    pub fn new(window_length: i32) -> Result<Self> {
        if window_length < 8 {
            return Err(VocoderError::DiscriminatorConfig(format!(
                "MBD window length {window_length} is too short"
            )));
        }
        let stft = Stft::new(StftConfig {
            n_fft: window_length,
            hop_length: window_length / 4,
            win_length: Some(window_length),
            window: WindowFn::Rectangular,
            ..Default::default()
        })?;

        let n_bins = stft.config.n_bins();
        let bands: Vec<(i32, i32)> = MBD_BANDS
            .iter()
            .map(|(lo, hi)| ((lo * n_bins as f32) as i32, (hi * n_bins as f32) as i32))
            .collect();
        if let Some(empty) = bands.iter().find(|(lo, hi)| hi <= lo) {
            return Err(VocoderError::DiscriminatorConfig(format!(
                "MBD band {empty:?} is empty for window length {window_length}"
            )));
        }

        let band_convs = bands
            .iter()
            .map(|_| band_stack())
            .collect::<Result<Vec<_>>>()?;
        let conv_post = WeightNormConv2d::new(CHANNELS, 1, (3, 3), (1, 1), (1, 1), (1, 1))?;

        Ok(Self {
            stft,
            bands,
            band_convs,
            conv_post,
        })
    }

    /// Band slices of the `[batch, 2, frames, bins]` complex spectrogram.
    pub fn spectrogram(&self, audio: &Array) -> Result<Vec<Array>> {
        let x = normalize_volume(audio)?;
        let spec = self.stft.forward(&x)?;
        let (batch, bins, frames) = (spec.real.dim(0), spec.real.dim(1), spec.real.dim(2));
        let real = spec.real.reshape(&[batch, 1, bins, frames])?;
        let imag = spec.imag.reshape(&[batch, 1, bins, frames])?;
        let x = mlx_rs::ops::concatenate_axis(&[real, imag], 1)?.transpose_axes(&[0, 1, 3, 2])?;
        Ok(self
            .bands
            .iter()
            .map(|&(lo, hi)| x.index((.., .., .., lo..hi)))
            .collect())
    }
}

impl Discriminator for DiscriminatorB {
    fn forward(&self, audio: &Array) -> Result<DiscriminatorOutput> {
        check_waveform(audio)?;
        let bands = self.spectrogram(audio)?;

        let mut feature_maps = Vec::new();
        let mut outputs = Vec::with_capacity(bands.len());
        for (mut band, stack) in bands.into_iter().zip(&self.band_convs) {
            for (i, conv) in stack.iter().enumerate() {
                band = leaky_relu(&conv.forward(&band)?)?;
                // The input layer of each band is not matched.
                if i > 0 {
                    feature_maps.push(band.clone());
                }
            }
            outputs.push(band);
        }

        let x = mlx_rs::ops::concatenate_axis(&outputs, -1)?;
        let score = self.conv_post.forward(&x)?;
        feature_maps.push(score.clone());

        Ok(DiscriminatorOutput {
            score,
            feature_maps,
        })
    }
}

impl StateDict for DiscriminatorB {
    fn state_dict_into(&self, prefix: &str, out: &mut HashMap<Rc<str>, Array>) {
        for (b, stack) in self.band_convs.iter().enumerate() {
            for (j, conv) in stack.iter().enumerate() {
                conv.state_dict_into(&join(prefix, format!("band_convs.{b}.{j}")), out);
            }
        }
        self.conv_post.state_dict_into(&join(prefix, "conv_post"), out);
    }

    fn load_state_dict_from(
        &mut self,
        prefix: &str,
        params: &HashMap<Rc<str>, Array>,
    ) -> Result<()> {
        for (b, stack) in self.band_convs.iter_mut().enumerate() {
            for (j, conv) in stack.iter_mut().enumerate() {
                conv.load_state_dict_from(&join(prefix, format!("band_convs.{b}.{j}")), params)?;
            }
        }
        self.conv_post
            .load_state_dict_from(&join(prefix, "conv_post"), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discriminator::MultiDiscriminator;

    #[test]
    fn test_band_edges() {
        let disc = DiscriminatorB::new(512).unwrap();
        // 257 bins
        assert_eq!(disc.bands, vec![(0, 25), (25, 64), (64, 128), (128, 192), (192, 257)]);
    }

    #[test]
    fn test_stft_is_centered_rectangular() {
        let disc = DiscriminatorB::new(256).unwrap();
        assert_eq!(disc.stft.config.window, WindowFn::Rectangular);
        assert!(disc.stft.config.center);
        assert_eq!(disc.stft.config.hop_length, 64);
    }

    #[test]
    fn test_band_discriminator_forward() {
        let disc = DiscriminatorB::new(256).unwrap();
        let audio = mlx_rs::random::normal::<f32>(&[2, 1, 2048], None, None, None).unwrap();

        let bands = disc.spectrogram(&audio).unwrap();
        assert_eq!(bands.len(), 5);
        // centered: 2048 / 64 + 1 frames
        assert_eq!(bands[0].shape(), &[2, 2, 33, 12]);

        let output = disc.forward(&audio).unwrap();
        output.score.eval().unwrap();
        // four matched layers per band plus the head
        assert_eq!(output.feature_maps.len(), 5 * 4 + 1);
        assert_eq!(output.score.dim(1), 1);
    }

    #[test]
    fn test_mbd_from_config() {
        let config = BigVGANConfig {
            mbd_fft_sizes: vec![256, 128],
            ..Default::default()
        };
        let mbd = MultiBandDiscriminator::from_config(&config).unwrap();
        assert_eq!(mbd.len(), 2);
        assert_eq!(mbd.name(), "mbd");
    }
}
