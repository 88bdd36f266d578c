//! Multi-Scale Sub-band CQT Discriminator (CQTD).
//!
//! The waveform is upsampled by two, transformed with a constant-Q
//! transform, and each octave of the (real, imaginary) plane gets its own
//! input convolution before a shared dilated stack.

use std::collections::HashMap;
use std::rc::Rc;

use super::{
    check_waveform, conv_step, normalize_volume, Discriminator, DiscriminatorFamily,
    DiscriminatorOutput,
};
use crate::audio::{ConstantQTransform, CqtConfig, CQT_FMIN};
use crate::config::BigVGANConfig;
use crate::error::{Result, VocoderError};
use crate::nn::{join, Conv2d, StateDict, UpSample1d, WeightNormConv2d};
use mlx_rs::ops::indexing::IndexOp;
use mlx_rs::Array;

const KERNEL: (i32, i32) = (3, 9);
const STRIDE: (i32, i32) = (1, 2);

/// `((k0 - 1) * d0 / 2, (k1 - 1) * d1 / 2)`
fn padding_2d(kernel: (i32, i32), dilation: (i32, i32)) -> (i32, i32) {
    (
        (kernel.0 - 1) * dilation.0 / 2,
        (kernel.1 - 1) * dilation.1 / 2,
    )
}

/// CQT discriminator family: one [`DiscriminatorCQT`] per hop/octave/bins triple.
pub type MultiScaleSubbandCQTDiscriminator = DiscriminatorFamily<DiscriminatorCQT>;

impl MultiScaleSubbandCQTDiscriminator {
    /// Build from the `cqtd_*` fields.
    pub fn from_config(config: &BigVGANConfig) -> Result<Self> {
        let n = config.cqtd_hop_lengths.len();
        if n == 0 || config.cqtd_n_octaves.len() != n || config.cqtd_bins_per_octaves.len() != n {
            return Err(VocoderError::DiscriminatorConfig(format!(
                "cqtd_hop_lengths ({}), cqtd_n_octaves ({}) and cqtd_bins_per_octaves ({}) must be non-empty and equal length",
                n,
                config.cqtd_n_octaves.len(),
                config.cqtd_bins_per_octaves.len()
            )));
        }
        let discriminators = (0..n)
            .map(|i| {
                DiscriminatorCQT::new(
                    config,
                    config.cqtd_hop_lengths[i],
                    config.cqtd_n_octaves[i],
                    config.cqtd_bins_per_octaves[i],
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new("cqtd", discriminators))
    }
}

/// Single CQT sub-discriminator.
#[derive(Debug)]
pub struct DiscriminatorCQT {
    /// Transform at twice the audio sample rate.
    pub cqt: ConstantQTransform,
    /// Doubles the sample rate before the transform.
    pub resample: UpSample1d,
    /// One input convolution per octave, without weight norm.
    pub conv_pres: Vec<Conv2d>,
    /// Shared convolution stack.
    pub convs: Vec<WeightNormConv2d>,
    /// Projection to one score channel.
    pub conv_post: WeightNormConv2d,
    /// Normalize volume before the transform.
    pub normalize_volume: bool,
}

impl DiscriminatorCQT {
    /// Create a sub-discriminator for one hop/octave/bins setting.
    pub fn new(
        config: &BigVGANConfig,
        hop_length: i32,
        n_octaves: i32,
        bins_per_octave: i32,
    ) -> Result<Self> {
        let filters = config.cqtd_filters;
        let max_filters = config.cqtd_max_filters;
        let scale = config.cqtd_filters_scale;
        if filters <= 0 || max_filters <= 0 || scale <= 0 || config.cqtd_dilations.is_empty() {
            return Err(VocoderError::DiscriminatorConfig(format!(
                "CQT filters {filters}, max {max_filters}, scale {scale} and dilations {:?} must be positive and non-empty",
                config.cqtd_dilations
            )));
        }

        let cqt = ConstantQTransform::new(CqtConfig {
            sample_rate: config.sampling_rate * 2,
            hop_length,
            n_octaves,
            bins_per_octave,
            fmin: CQT_FMIN,
        })?;

        let conv_pres = (0..n_octaves)
            .map(|_| Conv2d::new(2, 2, KERNEL, (1, 1), padding_2d(KERNEL, (1, 1))))
            .collect::<Result<Vec<_>>>()?;

        let width = |layer: u32| -> i32 {
            scale
                .checked_pow(layer)
                .and_then(|s| s.checked_mul(filters))
                .map_or(max_filters, |w| w.min(max_filters))
        };

        let mut convs = vec![WeightNormConv2d::new(
            2,
            filters,
            KERNEL,
            (1, 1),
            padding_2d(KERNEL, (1, 1)),
            (1, 1),
        )?];
        let mut in_ch = filters;
        for (i, &d) in config.cqtd_dilations.iter().enumerate() {
            let out_ch = width(i as u32 + 1);
            convs.push(WeightNormConv2d::new(
                in_ch,
                out_ch,
                KERNEL,
                STRIDE,
                padding_2d(KERNEL, (d, 1)),
                (d, 1),
            )?);
            in_ch = out_ch;
        }
        let out_ch = width(config.cqtd_dilations.len() as u32 + 1);
        let square = (KERNEL.0, KERNEL.0);
        convs.push(WeightNormConv2d::new(
            in_ch,
            out_ch,
            square,
            (1, 1),
            padding_2d(square, (1, 1)),
            (1, 1),
        )?);
        let conv_post =
            WeightNormConv2d::new(out_ch, 1, square, (1, 1), padding_2d(square, (1, 1)), (1, 1))?;

        Ok(Self {
            cqt,
            resample: UpSample1d::new(2)?,
            conv_pres,
            convs,
            conv_post,
            normalize_volume: config.cqtd_normalize_volume,
        })
    }

    /// `[batch, 1, samples]` to `[batch, 2, frames, n_bins]`.
    pub fn transform(&self, audio: &Array) -> Result<Array> {
        let x = if self.normalize_volume {
            normalize_volume(audio)?
        } else {
            audio.clone()
        };
        let x = self.resample.forward(&x)?;
        let (batch, samples) = (x.dim(0), x.dim(2));
        let z = self.cqt.forward(&x.reshape(&[batch, samples])?)?;

        let (bins, frames) = (z.real.dim(1), z.real.dim(2));
        let real = z.real.reshape(&[batch, 1, bins, frames])?;
        let imag = z.imag.reshape(&[batch, 1, bins, frames])?;
        Ok(mlx_rs::ops::concatenate_axis(&[real, imag], 1)?.transpose_axes(&[0, 1, 3, 2])?)
    }
}

impl Discriminator for DiscriminatorCQT {
    fn forward(&self, audio: &Array) -> Result<DiscriminatorOutput> {
        check_waveform(audio)?;
        let z = self.transform(audio)?;

        let bpo = self.cqt.config.bins_per_octave;
        let octaves = self
            .conv_pres
            .iter()
            .enumerate()
            .map(|(i, conv)| {
                let lo = i as i32 * bpo;
                conv.forward(&z.index((.., .., .., lo..lo + bpo)))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut x = mlx_rs::ops::concatenate_axis(&octaves, -1)?;

        let mut feature_maps = Vec::with_capacity(self.convs.len());
        for conv in &self.convs {
            x = conv_step(&x, conv, &mut feature_maps)?;
        }
        let score = self.conv_post.forward(&x)?;

        Ok(DiscriminatorOutput {
            score,
            feature_maps,
        })
    }
}

impl StateDict for DiscriminatorCQT {
    fn state_dict_into(&self, prefix: &str, out: &mut HashMap<Rc<str>, Array>) {
        for (i, conv) in self.conv_pres.iter().enumerate() {
            conv.state_dict_into(&join(prefix, format!("conv_pres.{i}")), out);
        }
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
        for (i, conv) in self.conv_pres.iter_mut().enumerate() {
            conv.load_state_dict_from(&join(prefix, format!("conv_pres.{i}")), params)?;
        }
        for (i, conv) in self.convs.iter_mut().enumerate() {
            conv.load_state_dict_from(&join(prefix, format!("convs.{i}")), params)?;
        }
        self.conv_post
            .load_state_dict_from(&join(prefix, "conv_post"), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discriminator::MultiDiscriminator;

    fn config() -> BigVGANConfig {
        BigVGANConfig {
            sampling_rate: 8000,
            cqtd_filters: 4,
            cqtd_max_filters: 6,
            cqtd_filters_scale: 2,
            cqtd_dilations: vec![1, 2],
            cqtd_hop_lengths: vec![64],
            cqtd_n_octaves: vec![4],
            cqtd_bins_per_octaves: vec![12],
            ..Default::default()
        }
    }

    #[test]
    fn test_filter_growth_is_capped() {
        let disc = DiscriminatorCQT::new(&config(), 64, 4, 12).unwrap();
        let widths: Vec<i32> = disc.convs.iter().map(|c| c.out_channels).collect();
        assert_eq!(widths, vec![4, 6, 6, 6]);
        assert_eq!(disc.conv_pres.len(), 4);
        assert_eq!(disc.convs[2].dilation, (2, 1));
        assert_eq!(disc.convs[2].padding, (2, 4));
    }

    #[test]
    fn test_cqt_discriminator_forward() {
        let disc = DiscriminatorCQT::new(&config(), 64, 4, 12).unwrap();
        let audio = mlx_rs::random::normal::<f32>(&[1, 1, 1024], None, None, None).unwrap();

        let z = disc.transform(&audio).unwrap();
        z.eval().unwrap();
        assert_eq!(z.dim(1), 2);
        assert_eq!(z.dim(3), 48);

        let output = disc.forward(&audio).unwrap();
        output.score.eval().unwrap();
        assert_eq!(output.feature_maps.len(), 4);
        assert_eq!(output.score.dim(1), 1);
    }

    #[test]
    fn test_mismatched_lists_rejected() {
        let config = BigVGANConfig {
            cqtd_n_octaves: vec![4, 4],
            ..config()
        };
        assert!(matches!(
            MultiScaleSubbandCQTDiscriminator::from_config(&config),
            Err(VocoderError::DiscriminatorConfig(_))
        ));
    }

    #[test]
    fn test_conv_pres_are_plain() {
        let disc = DiscriminatorCQT::new(&config(), 64, 4, 12).unwrap();
        let mut out = HashMap::new();
        disc.state_dict_into("d", &mut out);
        assert!(out.contains_key("d.conv_pres.0.weight"));
        assert!(!out.contains_key("d.conv_pres.0.weight_g"));
        assert!(out.contains_key("d.convs.0.weight_g"));
        assert_eq!(
            out.keys().filter(|k| k.starts_with("d.conv_pres.")).count(),
            8
        );
    }

    #[test]
    fn test_family_len() {
        let cqtd = MultiScaleSubbandCQTDiscriminator::from_config(&config()).unwrap();
        assert_eq!(cqtd.len(), 1);
    }
}
