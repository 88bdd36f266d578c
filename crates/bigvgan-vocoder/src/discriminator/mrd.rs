//! Multi-Resolution Discriminator (MRD) for BigVGAN.
//!
//! The MRD analyzes audio at multiple spectral resolutions to capture
//! both fine-grained and coarse spectral details.

use std::collections::HashMap;
use std::rc::Rc;

use super::{check_waveform, conv_step, Discriminator, DiscriminatorFamily, DiscriminatorOutput};
use crate::audio::{pad_last_axis, PadMode, Stft, StftConfig, WindowFn};
use crate::config::BigVGANConfig;
use crate::error::{Result, VocoderError};
use crate::nn::{join, StateDict, WeightNormConv2d};
use mlx_rs::Array;

/// Multi-Resolution Discriminator: one [`DiscriminatorR`] per `[n_fft, hop, win]`.
pub type MultiResolutionDiscriminator = DiscriminatorFamily<DiscriminatorR>;

impl MultiResolutionDiscriminator {
    /// Build from `resolutions` and `discriminator_channel_mult`.
    pub fn from_config(config: &BigVGANConfig) -> Result<Self> {
        let discriminators = config
            .resolutions
            .iter()
            .map(|r| match r.as_slice() {
                &[n_fft, hop, win] => {
                    DiscriminatorR::new(n_fft, hop, win, config.discriminator_channel_mult)
                }
                other => Err(VocoderError::DiscriminatorConfig(format!(
                    "resolution must be [n_fft, hop, win], got {other:?}"
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new("mrd", discriminators))
    }
}

/// Single resolution discriminator over a linear magnitude spectrogram.
#[derive(Debug)]
pub struct DiscriminatorR {
    /// Uncentered, rectangular-window STFT.
    pub stft: Stft,
    /// Convolution stack.
    pub convs: Vec<WeightNormConv2d>,
    /// Projection to one score channel.
    pub conv_post: WeightNormConv2d,
}

impl DiscriminatorR {
    /// Create a new resolution discriminator.
    ///
    /// # Arguments
    /// * `n_fft` - FFT size
    /// * `hop_length` - Hop size
    /// * `win_length` - Window size
    /// * `channel_mult` - Width multiplier
    pub fn new(n_fft: i32, hop_length: i32, win_length: i32, channel_mult: i32) -> Result<Self> {
        if n_fft <= 0 || hop_length <= 0 || hop_length > n_fft || win_length > n_fft {
            return Err(VocoderError::DiscriminatorConfig(format!(
                "invalid resolution [{n_fft}, {hop_length}, {win_length}]"
            )));
        }
        let stft = Stft::new(StftConfig {
            window: WindowFn::Rectangular,
            ..StftConfig::uncentered(n_fft, hop_length, win_length)
        })
        .map_err(|e| VocoderError::DiscriminatorConfig(e.to_string()))?;

        let ch = 32 * channel_mult;
        let mut convs = vec![WeightNormConv2d::new(1, ch, (3, 9), (1, 1), (1, 4), (1, 1))?];
        for _ in 0..3 {
            convs.push(WeightNormConv2d::new(ch, ch, (3, 9), (1, 2), (1, 4), (1, 1))?);
        }
        convs.push(WeightNormConv2d::new(ch, ch, (3, 3), (1, 1), (1, 1), (1, 1))?);
        let conv_post = WeightNormConv2d::new(ch, 1, (3, 3), (1, 1), (1, 1), (1, 1))?;

        Ok(Self {
            stft,
            convs,
            conv_post,
        })
    }

    /// `[batch, 1, samples]` to `[batch, 1, n_fft/2+1, frames]`.
    pub fn spectrogram(&self, audio: &Array) -> Result<Array> {
        let config = &self.stft.config;
        let pad = (config.n_fft - config.hop_length) / 2;
        let x = pad_last_axis(audio, pad, pad, PadMode::Reflect)?;
        let magnitude = self.stft.magnitude(&x)?;
        let (batch, bins, frames) = (magnitude.dim(0), magnitude.dim(1), magnitude.dim(2));
        Ok(magnitude.reshape(&[batch, 1, bins, frames])?)
    }
}

impl Discriminator for DiscriminatorR {
    fn forward(&self, audio: &Array) -> Result<DiscriminatorOutput> {
        check_waveform(audio)?;
        let batch = audio.dim(0);
        let mut x = self.spectrogram(audio)?;

        let mut feature_maps = Vec::with_capacity(self.convs.len() + 1);
        for conv in &self.convs {
            x = conv_step(&x, conv, &mut feature_maps)?;
        }
        let x = self.conv_post.forward(&x)?;
        feature_maps.push(x.clone());

        Ok(DiscriminatorOutput {
            score: x.reshape(&[batch, -1])?,
            feature_maps,
        })
    }
}

impl StateDict for DiscriminatorR {
    fn state_dict_into(&self, prefix: &str, out: &mut HashMap<Rc<str>, Array>) {
        for (i, conv) in self.convs.iter().enumerate() {
            conv.state_dict_into(&join(prefix, format!("convs.{i}")), out);
        }
        self.conv_post.state_dict_into(&join(prefix, "conv_post"), out);
    }

    fn load_state_dict_from(
        &mut self,
        prefix: &str,
        params: &HashMap<Rc<str>, Array>,
    ) -> Result<()> {
        for (i, conv) in self.convs.iter_mut().enumerate() {
            conv.load_state_dict_from(&join(prefix, format!("convs.{i}")), params)?;
        }
        self.conv_post
            .load_state_dict_from(&join(prefix, "conv_post"), params)
    }
}
