//! Discriminators for BigVGAN adversarial training.
//!
//! Four families look at a waveform from different angles:
//! - Multi-Period Discriminator (MPD): 2D grid of a fixed period
//! - Multi-Resolution Discriminator (MRD): STFT magnitudes
//! - Multi-Band Discriminator (MBD): complex STFT split into sub-bands
//! - Multi-Scale Sub-band CQT Discriminator (CQTD): constant-Q transform
//!
//! Every sub-discriminator implements [`Discriminator`]; a family is a
//! [`DiscriminatorFamily`] of one sub-discriminator type and implements
//! [`MultiDiscriminator`]. [`CombinedDiscriminator`] runs an ordered list of
//! families and concatenates their outputs in registration order.

mod cqt;
mod mbd;
mod mpd;
mod mrd;

use std::collections::HashMap;
use std::fmt::Debug;
use std::rc::Rc;

pub use cqt::{DiscriminatorCQT, MultiScaleSubbandCQTDiscriminator};
pub use mbd::{DiscriminatorB, MultiBandDiscriminator, MBD_BANDS};
pub use mpd::{DiscriminatorP, MultiPeriodDiscriminator};
pub use mrd::{DiscriminatorR, MultiResolutionDiscriminator};

use crate::config::BigVGANConfig;
use crate::error::{Result, VocoderError};
use crate::nn::{join, StateDict};
use mlx_rs::Array;

/// Score and intermediate activations of one sub-discriminator.
#[derive(Debug, Clone)]
pub struct DiscriminatorOutput {
    /// Unbounded logits.
    pub score: Array,
    /// Post-activation feature maps in layer order.
    pub feature_maps: Vec<Array>,
}

/// A single sub-discriminator.
pub trait Discriminator: StateDict + Debug {
    /// Score a `[batch, 1, samples]` waveform.
    fn forward(&self, audio: &Array) -> Result<DiscriminatorOutput>;
}

/// Paired outputs for a (real, generated) call, one entry per sub-discriminator.
#[derive(Debug, Clone, Default)]
pub struct DiscriminatorOutputs {
    /// Scores of the real waveform.
    pub real_scores: Vec<Array>,
    /// Scores of the generated waveform.
    pub generated_scores: Vec<Array>,
    /// Feature maps of the real waveform.
    pub real_feature_maps: Vec<Vec<Array>>,
    /// Feature maps of the generated waveform.
    pub generated_feature_maps: Vec<Vec<Array>>,
}

impl DiscriminatorOutputs {
    /// Number of sub-discriminator entries.
    pub fn len(&self) -> usize {
        self.real_scores.len()
    }

    /// True when no sub-discriminator contributed.
    pub fn is_empty(&self) -> bool {
        self.real_scores.is_empty()
    }

    fn push(&mut self, real: DiscriminatorOutput, generated: DiscriminatorOutput) {
        self.real_scores.push(real.score);
        self.generated_scores.push(generated.score);
        self.real_feature_maps.push(real.feature_maps);
        self.generated_feature_maps.push(generated.feature_maps);
    }

    /// Append `other` after the current entries.
    pub fn extend(&mut self, other: DiscriminatorOutputs) {
        self.real_scores.extend(other.real_scores);
        self.generated_scores.extend(other.generated_scores);
        self.real_feature_maps.extend(other.real_feature_maps);
        self.generated_feature_maps.extend(other.generated_feature_maps);
    }
}

/// A family aggregator: scores a (real, generated) pair with every member.
pub trait MultiDiscriminator: StateDict + Debug {
    /// Short family name, also the state-dict prefix inside a combined ensemble.
    fn name(&self) -> &str;

    /// Number of sub-discriminators.
    fn len(&self) -> usize;

    /// True when the family has no members.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every member on both waveforms.
    fn forward(&self, real: &Array, generated: &Array) -> Result<DiscriminatorOutputs>;
}

/// One sub-discriminator per configuration entry.
#[derive(Debug)]
pub struct DiscriminatorFamily<D> {
    name: &'static str,
    /// Members in configuration order.
    pub discriminators: Vec<D>,
}

impl<D: Discriminator> DiscriminatorFamily<D> {
    /// Wrap already-built members.
    pub fn new(name: &'static str, discriminators: Vec<D>) -> Self {
        Self {
            name,
            discriminators,
        }
    }
}

impl<D: Discriminator> MultiDiscriminator for DiscriminatorFamily<D> {
    fn name(&self) -> &str {
        self.name
    }

    fn len(&self) -> usize {
        self.discriminators.len()
    }

    fn forward(&self, real: &Array, generated: &Array) -> Result<DiscriminatorOutputs> {
        let mut outputs = DiscriminatorOutputs::default();
        for d in &self.discriminators {
            outputs.push(d.forward(real)?, d.forward(generated)?);
        }
        Ok(outputs)
    }
}

impl<D: Discriminator> StateDict for DiscriminatorFamily<D> {
    fn state_dict_into(&self, prefix: &str, out: &mut HashMap<Rc<str>, Array>) {
        for (i, d) in self.discriminators.iter().enumerate() {
            d.state_dict_into(&join(prefix, format!("discriminators.{i}")), out);
        }
    }

    fn load_state_dict_from(
        &mut self,
        prefix: &str,
        params: &HashMap<Rc<str>, Array>,
    ) -> Result<()> {
        for (i, d) in self.discriminators.iter_mut().enumerate() {
            d.load_state_dict_from(&join(prefix, format!("discriminators.{i}")), params)?;
        }
        Ok(())
    }
}

/// Ordered ensemble of discriminator families.
#[derive(Debug, Default)]
pub struct CombinedDiscriminator {
    /// Families in registration order.
    pub families: Vec<Box<dyn MultiDiscriminator>>,
}

impl CombinedDiscriminator {
    /// Ensemble over the given families, in order.
    pub fn new(families: Vec<Box<dyn MultiDiscriminator>>) -> Self {
        Self { families }
    }

    /// MPD plus the spectral family the configuration selects (MBD, CQTD or MRD).
    pub fn from_config(config: &BigVGANConfig) -> Result<Self> {
        let mpd = MultiPeriodDiscriminator::from_config(config)?;
        let spectral: Box<dyn MultiDiscriminator> = if config.use_mbd_instead_of_mrd {
            Box::new(MultiBandDiscriminator::from_config(config)?)
        } else if config.use_cqtd_instead_of_mrd {
            Box::new(MultiScaleSubbandCQTDiscriminator::from_config(config)?)
        } else {
            Box::new(MultiResolutionDiscriminator::from_config(config)?)
        };
        let combined = Self::new(vec![Box::new(mpd), spectral]);
        tracing::debug!(
            families = ?combined.families.iter().map(|f| f.name()).collect::<Vec<_>>(),
            sub_discriminators = combined.len(),
            "built discriminator ensemble"
        );
        Ok(combined)
    }

    /// Register another family after the existing ones.
    pub fn push(&mut self, family: Box<dyn MultiDiscriminator>) {
        self.families.push(family);
    }

    /// Total sub-discriminators across families.
    pub fn len(&self) -> usize {
        self.families.iter().map(|f| f.len()).sum()
    }

    /// True when no family is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Score a (real, generated) pair with every family.
    pub fn forward(&self, real: &Array, generated: &Array) -> Result<DiscriminatorOutputs> {
        let mut outputs = DiscriminatorOutputs::default();
        for family in &self.families {
            outputs.extend(family.forward(real, generated)?);
        }
        Ok(outputs)
    }
}

impl StateDict for CombinedDiscriminator {
    fn state_dict_into(&self, prefix: &str, out: &mut HashMap<Rc<str>, Array>) {
        for family in &self.families {
            family.state_dict_into(&join(prefix, family.name()), out);
        }
    }

    fn load_state_dict_from(
        &mut self,
        prefix: &str,
        params: &HashMap<Rc<str>, Array>,
    ) -> Result<()> {
        for family in &mut self.families {
            let name = family.name().to_string();
            family.load_state_dict_from(&join(prefix, name), params)?;
        }
        Ok(())
    }
}

/// Zero-mean the last axis and scale its peak to 0.8.
pub fn normalize_volume(x: &Array) -> Result<Array> {
    let centered = x.subtract(&x.mean_axis(-1, true)?)?;
    let peak = centered
        .abs()?
        .max_axis(-1, true)?
        .add(Array::from_f32(1e-9))?;
    Ok(centered
        .multiply(Array::from_f32(0.8))?
        .divide(&peak)?)
}

/// Require a `[batch, 1, samples]` waveform.
pub(crate) fn check_waveform(audio: &Array) -> Result<()> {
    if audio.ndim() != 3 || audio.dim(1) != 1 {
        return Err(VocoderError::ShapeMismatch {
            expected: vec![-1, 1, -1],
            actual: audio.shape().to_vec(),
        });
    }
    Ok(())
}

/// Run `layer` then leaky ReLU, recording the activation.
pub(crate) fn conv_step(
    x: &Array,
    layer: &crate::nn::WeightNormConv2d,
    feature_maps: &mut Vec<Array>,
) -> Result<Array> {
    let x = crate::nn::leaky_relu(&layer.forward(x)?)?;
    feature_maps.push(x.clone());
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::to_host;

    fn small_config() -> BigVGANConfig {
        BigVGANConfig {
            sampling_rate: 8000,
            mpd_reshapes: vec![2, 3],
            resolutions: vec![vec![256, 64, 256], vec![128, 32, 96]],
            mbd_fft_sizes: vec![256, 128],
            cqtd_filters: 4,
            cqtd_max_filters: 8,
            cqtd_dilations: vec![1, 2],
            cqtd_hop_lengths: vec![64, 32],
            cqtd_n_octaves: vec![4, 4],
            cqtd_bins_per_octaves: vec![12, 8],
            ..Default::default()
        }
    }

    #[test]
    fn test_combined_order_and_pairing() {
        for (mbd, cqtd, expected) in [(false, true, 4), (true, false, 4), (false, false, 4)] {
            let config = BigVGANConfig {
                use_mbd_instead_of_mrd: mbd,
                use_cqtd_instead_of_mrd: cqtd,
                ..small_config()
            };
            let combined = CombinedDiscriminator::from_config(&config).unwrap();
            assert_eq!(combined.families[0].name(), "mpd");
            assert_eq!(combined.len(), expected);

            let real = mlx_rs::random::normal::<f32>(&[1, 1, 2048], None, None, None).unwrap();
            let fake = mlx_rs::random::normal::<f32>(&[1, 1, 2048], None, None, None).unwrap();
            let out = combined.forward(&real, &fake).unwrap();
            assert_eq!(out.len(), expected);
            assert_eq!(out.generated_scores.len(), expected);
            for (r, g) in out.real_feature_maps.iter().zip(&out.generated_feature_maps) {
                assert_eq!(r.len(), g.len());
                for (a, b) in r.iter().zip(g) {
                    assert_eq!(a.shape(), b.shape());
                }
            }
        }
    }

    #[test]
    fn test_combined_state_dict_prefixes() {
        let config = BigVGANConfig {
            use_cqtd_instead_of_mrd: false,
            ..small_config()
        };
        let combined = CombinedDiscriminator::from_config(&config).unwrap();
        let params = combined.state_dict();
        assert!(params.contains_key("mpd.discriminators.1.convs.0.weight_v"));
        assert!(params.contains_key("mrd.discriminators.0.conv_post.bias"));
    }

    #[test]
    fn test_normalize_volume() {
        let x = Array::from_slice(&[1.0f32, 3.0, 5.0, 7.0], &[1, 1, 4]);
        let y = to_host(&normalize_volume(&x).unwrap()).unwrap();
        let peak = y.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!((peak - 0.8).abs() < 1e-5);
        assert!(y.iter().sum::<f32>().abs() < 1e-5);
    }

    #[test]
    fn test_rejects_unbatched_waveform() {
        let mpd = MultiPeriodDiscriminator::from_config(&small_config()).unwrap();
        let x = mlx_rs::ops::zeros::<f32>(&[2048]).unwrap();
        assert!(matches!(
            mpd.forward(&x, &x),
            Err(VocoderError::ShapeMismatch { .. })
        ));
    }
}
