//! Multi-Period Discriminator (MPD) for BigVGAN.
//!
//! The MPD captures periodic patterns in audio by reshaping the waveform
//! into a 2D grid whose width is the period, then convolving along the
//! height axis only, so each column sees samples exactly one period apart.

use std::collections::HashMap;
use std::rc::Rc;

use super::{check_waveform, conv_step, Discriminator, DiscriminatorFamily, DiscriminatorOutput};
use crate::audio::{pad_last_axis, PadMode};
use crate::config::BigVGANConfig;
use crate::error::{Result, VocoderError};
use crate::nn::{get_padding, join, StateDict, WeightNormConv2d};
use mlx_rs::Array;

const KERNEL_SIZE: i32 = 5;
const STRIDE: i32 = 3;

/// Multi-Period Discriminator: one [`DiscriminatorP`] per period.
pub type MultiPeriodDiscriminator = DiscriminatorFamily<DiscriminatorP>;

impl MultiPeriodDiscriminator {
    /// Build from `mpd_reshapes` and `discriminator_channel_mult`.
    pub fn from_config(config: &BigVGANConfig) -> Result<Self> {
        Self::with_periods(&config.mpd_reshapes, config.discriminator_channel_mult)
    }

    /// Build with explicit periods.
    pub fn with_periods(periods: &[i32], channel_mult: i32) -> Result<Self> {
        let discriminators = periods
            .iter()
            .map(|&p| DiscriminatorP::new(p, channel_mult))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new("mpd", discriminators))
    }
}

/// Single period discriminator.
#[derive(Debug)]
pub struct DiscriminatorP {
    /// Grid width.
    pub period: i32,
    /// Convolution stack.
    pub convs: Vec<WeightNormConv2d>,
    /// Projection to one score channel.
    pub conv_post: WeightNormConv2d,
}

impl DiscriminatorP {
    /// Create a new period discriminator.
    ///
    /// # Arguments
    /// * `period` - Reshaping period
    /// * `channel_mult` - Width multiplier
    pub fn new(period: i32, channel_mult: i32) -> Result<Self> {
        if period < 1 || channel_mult < 1 {
            return Err(VocoderError::DiscriminatorConfig(format!(
                "period {period} and channel multiplier {channel_mult} must be positive"
            )));
        }

        // 1 -> 32 -> 128 -> 512 -> 1024 -> 1024
        let widths = [1, 32, 128, 512, 1024, 1024];
        let padding = (get_padding(KERNEL_SIZE, 1), 0);
        let convs = widths
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                let in_ch = if i == 0 { 1 } else { pair[0] * channel_mult };
                let stride = if i < 4 { STRIDE } else { 1 };
                WeightNormConv2d::new(
                    in_ch,
                    pair[1] * channel_mult,
                    (KERNEL_SIZE, 1),
                    (stride, 1),
                    padding,
                    (1, 1),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let conv_post =
            WeightNormConv2d::new(1024 * channel_mult, 1, (3, 1), (1, 1), (1, 0), (1, 1))?;

        Ok(Self {
            period,
            convs,
            conv_post,
        })
    }
}

impl Discriminator for DiscriminatorP {
    fn forward(&self, audio: &Array) -> Result<DiscriminatorOutput> {
        check_waveform(audio)?;
        let (batch, samples) = (audio.dim(0), audio.dim(2));

        // Reflect-pad the tail up to a whole number of periods.
        let remainder = samples % self.period;
        let x = if remainder != 0 {
            pad_last_axis(audio, 0, self.period - remainder, PadMode::Reflect)?
        } else {
            audio.clone()
        };
        let rows = x.dim(2) / self.period;
        let mut x = x.reshape(&[batch, 1, rows, self.period])?;

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

impl StateDict for DiscriminatorP {
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
