//! Loss functions for BigVGAN training.
//!
//! BigVGAN uses a combination of losses:
//! - Least-squares adversarial loss (generator and discriminator)
//! - Feature matching loss over every discriminator layer
//! - Log-mel reconstruction loss, single or multi-scale
//!
//! Scores and feature maps arrive as the position-aligned lists of
//! [`DiscriminatorOutputs`].

use crate::audio::{MelConfig, MelNorm, MelSpectrogram, PadMode, StftConfig, WindowFn};
use crate::config::BigVGANConfig;
use crate::discriminator::DiscriminatorOutputs;
use crate::error::{Result, VocoderError};
use mlx_rs::Array;

/// Scale applied to the summed feature matching loss.
pub const FEATURE_LOSS_SCALE: f32 = 2.0;

/// Window lengths of the default multi-scale mel loss.
pub const MULTISCALE_WINDOWS: [i32; 7] = [32, 64, 128, 256, 512, 1024, 2048];

/// Mel counts paired with [`MULTISCALE_WINDOWS`].
pub const MULTISCALE_N_MELS: [i32; 7] = [5, 10, 20, 40, 80, 160, 320];

fn check_pairing(real: usize, generated: usize) -> Result<()> {
    if real != generated {
        return Err(VocoderError::ShapeMismatch {
            expected: vec![real as i32],
            actual: vec![generated as i32],
        });
    }
    Ok(())
}

fn sum_all(terms: &[Array]) -> Result<Array> {
    let mut total = Array::from_f32(0.0);
    for term in terms {
        total = total.add(term)?;
    }
    Ok(total)
}

/// Output from discriminator loss computation.
#[derive(Debug)]
pub struct DiscriminatorLoss {
    /// Sum over all entries.
    pub total: Array,
    /// `mean((1 - D(x))^2)` per entry.
    pub real_losses: Vec<Array>,
    /// `mean(D(G(z))^2)` per entry.
    pub generated_losses: Vec<Array>,
}

/// Discriminator adversarial loss.
///
/// L_adv(D) = Σ E[(1 - D(x))²] + E[D(G(z))²]
pub fn discriminator_loss(
    real_scores: &[Array],
    generated_scores: &[Array],
) -> Result<DiscriminatorLoss> {
    check_pairing(real_scores.len(), generated_scores.len())?;

    let one = Array::from_f32(1.0);
    let mut real_losses = Vec::with_capacity(real_scores.len());
    let mut generated_losses = Vec::with_capacity(generated_scores.len());
    for (real, generated) in real_scores.iter().zip(generated_scores) {
        real_losses.push(one.subtract(real)?.square()?.mean(None)?);
        generated_losses.push(generated.square()?.mean(None)?);
    }
    let total = sum_all(&real_losses)?.add(&sum_all(&generated_losses)?)?;

    Ok(DiscriminatorLoss {
        total,
        real_losses,
        generated_losses,
    })
}

/// Output from the generator adversarial loss.
#[derive(Debug)]
pub struct GeneratorAdversarialLoss {
    /// Sum over all entries.
    pub total: Array,
    /// `mean((1 - D(G(z)))^2)` per entry.
    pub losses: Vec<Array>,
}

/// Generator adversarial loss.
///
/// L_adv(G) = Σ E[(1 - D(G(z)))²]
pub fn generator_loss(generated_scores: &[Array]) -> Result<GeneratorAdversarialLoss> {
    let one = Array::from_f32(1.0);
    let losses = generated_scores
        .iter()
        .map(|g| Ok(one.subtract(g)?.square()?.mean(None)?))
        .collect::<Result<Vec<_>>>()?;
    Ok(GeneratorAdversarialLoss {
        total: sum_all(&losses)?,
        losses,
    })
}

/// Feature matching loss.
///
/// L_fm = 2 * Σ_d Σ_l E[|D_l(x) - D_l(G(z))|]
pub fn feature_loss(
    real_feature_maps: &[Vec<Array>],
    generated_feature_maps: &[Vec<Array>],
) -> Result<Array> {
    check_pairing(real_feature_maps.len(), generated_feature_maps.len())?;

    let mut total = Array::from_f32(0.0);
    for (real, generated) in real_feature_maps.iter().zip(generated_feature_maps) {
        check_pairing(real.len(), generated.len())?;
        for (r, g) in real.iter().zip(generated) {
            total = total.add(&r.subtract(g)?.abs()?.mean(None)?)?;
        }
    }
    Ok(total.multiply(Array::from_f32(FEATURE_LOSS_SCALE))?)
}

/// Log-mel L1 loss summed over several STFT resolutions.
#[derive(Debug, Clone)]
pub struct MultiScaleMelLoss {
    /// One front end per scale.
    pub scales: Vec<MelSpectrogram>,
}

impl MultiScaleMelLoss {
    /// Default scales: windows 32..2048 with hop `window / 4`.
    pub fn new(sampling_rate: i32) -> Result<Self> {
        Self::with_scales(sampling_rate, &MULTISCALE_WINDOWS, &MULTISCALE_N_MELS)
    }

    /// Explicit windows and mel counts; hop is `window / 4`, full band.
    pub fn with_scales(sampling_rate: i32, windows: &[i32], n_mels: &[i32]) -> Result<Self> {
        if windows.is_empty() || windows.len() != n_mels.len() {
            return Err(VocoderError::Config(format!(
                "mel loss needs one mel count per window ({} windows, {} mel counts)",
                windows.len(),
                n_mels.len()
            )));
        }
        let scales = windows
            .iter()
            .zip(n_mels)
            .map(|(&window, &mels)| {
                let mel = MelConfig {
                    sr: sampling_rate,
                    n_fft: window,
                    n_mels: mels,
                    fmin: 0.0,
                    fmax: None,
                    htk: false,
                    norm: MelNorm::Slaney,
                };
                let stft = StftConfig {
                    n_fft: window,
                    hop_length: (window / 4).max(1),
                    win_length: Some(window),
                    center: true,
                    pad_mode: PadMode::Reflect,
                    window: WindowFn::Hann,
                };
                MelSpectrogram::new(&mel, stft)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { scales })
    }

    /// Σ_scales mean|log-mel(reference) - log-mel(generated)|
    pub fn forward(&self, reference: &Array, generated: &Array) -> Result<Array> {
        let mut total = Array::from_f32(0.0);
        for scale in &self.scales {
            let reference = scale.forward(reference)?;
            let generated = scale.forward(generated)?;
            total = total.add(&reference.subtract(&generated)?.abs()?.mean(None)?)?;
        }
        Ok(total)
    }
}

/// Mel reconstruction term, as selected by `use_multiscale_melloss`.
#[derive(Debug, Clone)]
pub enum MelReconstructionLoss {
    /// Sum over several resolutions.
    MultiScale(MultiScaleMelLoss),
    /// L1 between loss mels at the model's own resolution.
    SingleScale(MelSpectrogram),
}

impl MelReconstructionLoss {
    /// Build the configured variant; the single-scale mel uses `fmax_for_loss`.
    pub fn from_config(config: &BigVGANConfig) -> Result<Self> {
        if config.use_multiscale_melloss {
            Ok(Self::MultiScale(MultiScaleMelLoss::new(config.sampling_rate)?))
        } else {
            Ok(Self::SingleScale(MelSpectrogram::from_config(
                config,
                Some(config.fmax_for_loss_hz()),
            )?))
        }
    }

    /// Unweighted reconstruction loss between two waveforms.
    pub fn forward(&self, reference: &Array, generated: &Array) -> Result<Array> {
        match self {
            Self::MultiScale(loss) => loss.forward(reference, generated),
            Self::SingleScale(mel) => {
                let diff = mel.forward(reference)?.subtract(&mel.forward(generated)?)?;
                Ok(diff.abs()?.mean(None)?)
            }
        }
    }
}

/// Output from the combined generator objective.
#[derive(Debug)]
pub struct GeneratorLoss {
    /// Adversarial + feature + weighted mel.
    pub total: Array,
    /// Summed adversarial term.
    pub adversarial: Array,
    /// Per-entry adversarial terms.
    pub adversarial_losses: Vec<Array>,
    /// Scaled feature matching term.
    pub feature_matching: Array,
    /// Weighted mel term.
    pub mel: Array,
}

/// Combine ensemble outputs and an unweighted mel loss into the generator
/// objective, weighting the mel term by `lambda_mel`.
pub fn generator_objective(
    outputs: &DiscriminatorOutputs,
    mel_loss: &Array,
    lambda_mel: f32,
) -> Result<GeneratorLoss> {
    let adversarial = generator_loss(&outputs.generated_scores)?;
    let feature_matching =
        feature_loss(&outputs.real_feature_maps, &outputs.generated_feature_maps)?;
    let mel = mel_loss.multiply(Array::from_f32(lambda_mel))?;
    let total = adversarial
        .total
        .add(&feature_matching)?
        .add(&mel)?;

    Ok(GeneratorLoss {
        total,
        adversarial: adversarial.total,
        adversarial_losses: adversarial.losses,
        feature_matching,
        mel,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(x: &Array) -> f32 {
        x.eval().unwrap();
        x.item::<f32>()
    }

    fn random(shape: &[i32]) -> Array {
        mlx_rs::random::normal::<f32>(shape, None, None, None).unwrap()
    }

    #[test]
    fn test_discriminator_loss_non_negative_and_per_entry() {
        let real = vec![random(&[2, 10]), random(&[2, 7])];
        let fake = vec![random(&[2, 10]), random(&[2, 7])];
        let loss = discriminator_loss(&real, &fake).unwrap();
        assert_eq!(loss.real_losses.len(), 2);
        assert_eq!(loss.generated_losses.len(), 2);
        assert!(scalar(&loss.total) >= 0.0);
    }

    #[test]
    fn test_discriminator_loss_perfect_discriminator() {
        let real = vec![Array::from_slice(&[1.0f32; 4], &[1, 4])];
        let fake = vec![Array::from_slice(&[0.0f32; 4], &[1, 4])];
        let loss = discriminator_loss(&real, &fake).unwrap();
        assert!(scalar(&loss.total).abs() < 1e-7);
    }

    #[test]
    fn test_discriminator_loss_rejects_unpaired() {
        let real = vec![random(&[1, 4])];
        assert!(discriminator_loss(&real, &[]).is_err());
    }

    #[test]
    fn test_generator_loss() {
        let fake = vec![Array::from_slice(&[0.0f32, 2.0], &[1, 2]), random(&[1, 3])];
        let loss = generator_loss(&fake).unwrap();
        assert_eq!(loss.losses.len(), 2);
        // mean((1-0)^2, (1-2)^2) = 1
        assert!((scalar(&loss.losses[0]) - 1.0).abs() < 1e-6);
        assert!(scalar(&loss.total) >= 1.0);
    }

    #[test]
    fn test_feature_loss_zero_for_identical_maps() {
        let maps = vec![vec![random(&[1, 4, 8]), random(&[1, 2, 3])]];
        let loss = feature_loss(&maps, &maps.clone()).unwrap();
        assert_eq!(scalar(&loss), 0.0);
    }

    #[test]
    fn test_feature_loss_positive_and_scaled() {
        let real = vec![vec![Array::from_slice(&[0.0f32; 4], &[1, 4])]];
        let fake = vec![vec![Array::from_slice(&[0.5f32; 4], &[1, 4])]];
        let loss = feature_loss(&real, &fake).unwrap();
        assert!((scalar(&loss) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_multiscale_mel_loss() {
        let loss = MultiScaleMelLoss::new(24000).unwrap();
        assert_eq!(loss.scales.len(), 7);

        let reference = random(&[1, 1, 4096]);
        let same = loss.forward(&reference, &reference).unwrap();
        assert!(scalar(&same).abs() < 1e-6);

        let other = random(&[1, 1, 4096]);
        assert!(scalar(&loss.forward(&reference, &other).unwrap()) > 0.0);
    }

    #[test]
    fn test_single_scale_variant() {
        let config = BigVGANConfig {
            use_multiscale_melloss: false,
            fmax_for_loss: Some(8000.0),
            ..Default::default()
        };
        let loss = MelReconstructionLoss::from_config(&config).unwrap();
        assert!(matches!(loss, MelReconstructionLoss::SingleScale(_)));
        let y = random(&[1, 1, 2048]);
        assert!(scalar(&loss.forward(&y, &y).unwrap()).abs() < 1e-6);
    }

    #[test]
    fn test_generator_objective_weights() {
        let outputs = DiscriminatorOutputs {
            real_scores: vec![random(&[1, 4])],
            generated_scores: vec![Array::from_slice(&[1.0f32; 4], &[1, 4])],
            real_feature_maps: vec![vec![Array::from_slice(&[0.0f32; 2], &[1, 2])]],
            generated_feature_maps: vec![vec![Array::from_slice(&[1.0f32; 2], &[1, 2])]],
        };
        let mel = Array::from_f32(0.5);
        let loss = generator_objective(&outputs, &mel, 15.0).unwrap();
        assert!(scalar(&loss.adversarial).abs() < 1e-7);
        assert!((scalar(&loss.feature_matching) - 2.0).abs() < 1e-6);
        assert!((scalar(&loss.mel) - 7.5).abs() < 1e-6);
        assert!((scalar(&loss.total) - 9.5).abs() < 1e-5);
    }
}
