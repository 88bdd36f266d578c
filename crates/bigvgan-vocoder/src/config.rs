//! BigVGAN hyperparameters.
//!
//! A single [`BigVGANConfig`] is read once by every component (generator,
//! discriminators, losses, dataset) and never mutated afterwards. The field
//! names match the `config.json` files shipped with BigVGAN checkpoints so
//! those files deserialize directly.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VocoderError};

/// BigVGAN model and training configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BigVGANConfig {
    /// Number of mel frequency bins.
    #[serde(default = "default_num_mels")]
    pub num_mels: i32,

    /// Upsampling rates for each stage.
    /// Product must equal hop_size (e.g., [4,4,2,2,2,2] = 256).
    #[serde(default = "default_upsample_rates")]
    pub upsample_rates: Vec<i32>,

    /// Kernel sizes for upsampling convolutions.
    #[serde(default = "default_upsample_kernel_sizes")]
    pub upsample_kernel_sizes: Vec<i32>,

    /// Channel dimension after the first convolution.
    #[serde(default = "default_upsample_initial_channel")]
    pub upsample_initial_channel: i32,

    /// Kernel sizes of the parallel residual blocks.
    #[serde(default = "default_resblock_kernel_sizes")]
    pub resblock_kernel_sizes: Vec<i32>,

    /// Dilation schedule of each residual block.
    #[serde(default = "default_resblock_dilation_sizes")]
    pub resblock_dilation_sizes: Vec<Vec<i32>>,

    /// Residual block variant.
    #[serde(default)]
    pub resblock: ResblockKind,

    /// Periodic activation used inside the anti-aliased wrapper.
    #[serde(default)]
    pub activation: ActivationKind,

    /// Store Snake parameters in log space.
    #[serde(default = "default_true")]
    pub snake_logscale: bool,

    /// Bias on the final convolution.
    #[serde(default = "default_true")]
    pub use_bias_at_final: bool,

    /// Bound the output with tanh instead of clamping.
    #[serde(default = "default_true")]
    pub use_tanh_at_final: bool,

    /// Audio sampling rate in Hz.
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: i32,

    /// FFT size for mel spectrogram.
    #[serde(default = "default_n_fft")]
    pub n_fft: i32,

    /// Hop size in samples.
    #[serde(default = "default_hop_size")]
    pub hop_size: i32,

    /// Window size for STFT.
    #[serde(default = "default_n_fft")]
    pub win_size: i32,

    /// Minimum frequency for mel filterbank.
    #[serde(default)]
    pub fmin: f32,

    /// Maximum frequency for mel filterbank. `None` means Nyquist.
    #[serde(default)]
    pub fmax: Option<f32>,

    /// Maximum frequency of the mel used by the reconstruction loss.
    #[serde(default)]
    pub fmax_for_loss: Option<f32>,

    /// Training segment length in samples.
    #[serde(default = "default_segment_size")]
    pub segment_size: i32,

    /// Width multiplier for period and resolution discriminators.
    #[serde(default = "default_one")]
    pub discriminator_channel_mult: i32,

    /// Periods of the multi-period discriminator.
    #[serde(default = "default_mpd_reshapes")]
    pub mpd_reshapes: Vec<i32>,

    /// `[n_fft, hop, win]` triples of the multi-resolution discriminator.
    #[serde(default = "default_resolutions")]
    pub resolutions: Vec<Vec<i32>>,

    /// Window lengths of the multi-band discriminator.
    #[serde(default = "default_mbd_fft_sizes")]
    pub mbd_fft_sizes: Vec<i32>,

    /// Use the multi-band discriminator as the spectral family.
    #[serde(default)]
    pub use_mbd_instead_of_mrd: bool,

    /// Use the CQT discriminator as the spectral family.
    #[serde(default = "default_true")]
    pub use_cqtd_instead_of_mrd: bool,

    /// Base filter count of the CQT discriminator.
    #[serde(default = "default_cqtd_filters")]
    pub cqtd_filters: i32,

    /// Filter count ceiling of the CQT discriminator.
    #[serde(default = "default_cqtd_max_filters")]
    pub cqtd_max_filters: i32,

    /// Per-layer filter growth of the CQT discriminator.
    #[serde(default = "default_one")]
    pub cqtd_filters_scale: i32,

    /// Time dilations of the CQT discriminator.
    #[serde(default = "default_cqtd_dilations")]
    pub cqtd_dilations: Vec<i32>,

    /// One hop length per CQT sub-discriminator.
    #[serde(default = "default_cqtd_hop_lengths")]
    pub cqtd_hop_lengths: Vec<i32>,

    /// One octave count per CQT sub-discriminator.
    #[serde(default = "default_cqtd_n_octaves")]
    pub cqtd_n_octaves: Vec<i32>,

    /// One bins-per-octave value per CQT sub-discriminator.
    #[serde(default = "default_cqtd_bins_per_octaves")]
    pub cqtd_bins_per_octaves: Vec<i32>,

    /// Normalize volume before the CQT.
    #[serde(default)]
    pub cqtd_normalize_volume: bool,

    /// Use the multi-scale mel loss instead of a single-resolution one.
    #[serde(default = "default_true")]
    pub use_multiscale_melloss: bool,

    /// Weight of the mel reconstruction loss.
    #[serde(default = "default_lambda_melloss")]
    pub lambda_melloss: f32,

    /// Seed for dataset shuffling and segment selection.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

/// Periodic activation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActivationKind {
    /// Snake activation: x + (1/α) * sin²(αx)
    Snake,
    /// SnakeBeta activation: x + (1/β) * sin²(αx)
    #[default]
    SnakeBeta,
}

/// Residual block variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ResblockKind {
    /// Dual-path block: two convolutions per dilation.
    #[default]
    #[serde(rename = "1")]
    DualPath,
    /// Single-path block: one convolution per dilation.
    #[serde(rename = "2")]
    SinglePath,
}

// Default functions for serde
fn default_num_mels() -> i32 {
    100
}
fn default_upsample_rates() -> Vec<i32> {
    vec![4, 4, 2, 2, 2, 2]
}
fn default_upsample_kernel_sizes() -> Vec<i32> {
    vec![8, 8, 4, 4, 4, 4]
}
fn default_upsample_initial_channel() -> i32 {
    1536
}
fn default_resblock_kernel_sizes() -> Vec<i32> {
    vec![3, 7, 11]
}
fn default_resblock_dilation_sizes() -> Vec<Vec<i32>> {
    vec![vec![1, 3, 5], vec![1, 3, 5], vec![1, 3, 5]]
}
fn default_true() -> bool {
    true
}
fn default_one() -> i32 {
    1
}
fn default_sampling_rate() -> i32 {
    24000
}
fn default_n_fft() -> i32 {
    1024
}
fn default_hop_size() -> i32 {
    256
}
fn default_segment_size() -> i32 {
    65536
}
fn default_mpd_reshapes() -> Vec<i32> {
    vec![2, 3, 5, 7, 11]
}
fn default_resolutions() -> Vec<Vec<i32>> {
    vec![vec![1024, 120, 600], vec![2048, 240, 1200], vec![512, 50, 240]]
}
fn default_mbd_fft_sizes() -> Vec<i32> {
    vec![2048, 1024, 512]
}
fn default_cqtd_filters() -> i32 {
    128
}
fn default_cqtd_max_filters() -> i32 {
    1024
}
fn default_cqtd_dilations() -> Vec<i32> {
    vec![1, 2, 4]
}
fn default_cqtd_hop_lengths() -> Vec<i32> {
    vec![512, 256, 256]
}
fn default_cqtd_n_octaves() -> Vec<i32> {
    vec![9, 9, 9]
}
fn default_cqtd_bins_per_octaves() -> Vec<i32> {
    vec![24, 36, 48]
}
fn default_lambda_melloss() -> f32 {
    15.0
}
fn default_seed() -> u64 {
    1234
}

impl Default for BigVGANConfig {
    fn default() -> Self {
        Self::v2_24khz_100band_256x()
    }
}

impl BigVGANConfig {
    /// BigVGAN v2 configuration for 24kHz, 100 mel bands.
    ///
    /// Matches `nvidia/bigvgan_v2_24khz_100band_256x`.
    pub fn v2_24khz_100band_256x() -> Self {
        Self {
            num_mels: 100,
            upsample_rates: default_upsample_rates(),
            upsample_kernel_sizes: default_upsample_kernel_sizes(),
            upsample_initial_channel: 1536,
            resblock_kernel_sizes: default_resblock_kernel_sizes(),
            resblock_dilation_sizes: default_resblock_dilation_sizes(),
            resblock: ResblockKind::DualPath,
            activation: ActivationKind::SnakeBeta,
            snake_logscale: true,
            use_bias_at_final: false,
            use_tanh_at_final: false,
            sampling_rate: 24000,
            n_fft: 1024,
            hop_size: 256,
            win_size: 1024,
            fmin: 0.0,
            fmax: None,
            fmax_for_loss: None,
            segment_size: 65536,
            discriminator_channel_mult: 1,
            mpd_reshapes: default_mpd_reshapes(),
            resolutions: default_resolutions(),
            mbd_fft_sizes: default_mbd_fft_sizes(),
            use_mbd_instead_of_mrd: false,
            use_cqtd_instead_of_mrd: true,
            cqtd_filters: 128,
            cqtd_max_filters: 1024,
            cqtd_filters_scale: 1,
            cqtd_dilations: default_cqtd_dilations(),
            cqtd_hop_lengths: default_cqtd_hop_lengths(),
            cqtd_n_octaves: default_cqtd_n_octaves(),
            cqtd_bins_per_octaves: default_cqtd_bins_per_octaves(),
            cqtd_normalize_volume: false,
            use_multiscale_melloss: true,
            lambda_melloss: 15.0,
            seed: 1234,
        }
    }

    /// BigVGAN v2 configuration for 22.05kHz, 80 mel bands.
    pub fn v2_22khz_80band_256x() -> Self {
        Self {
            num_mels: 80,
            sampling_rate: 22050,
            ..Self::v2_24khz_100band_256x()
        }
    }

    /// BigVGAN v2 configuration for 44.1kHz, 128 mel bands.
    ///
    /// Matches `nvidia/bigvgan_v2_44khz_128band_512x`.
    pub fn v2_44khz_128band_512x() -> Self {
        Self {
            num_mels: 128,
            upsample_rates: vec![8, 4, 2, 2, 2, 2],
            upsample_kernel_sizes: vec![16, 8, 4, 4, 4, 4],
            sampling_rate: 44100,
            n_fft: 2048,
            hop_size: 512,
            win_size: 2048,
            ..Self::v2_24khz_100band_256x()
        }
    }

    /// Base (smaller) configuration for 24kHz.
    ///
    /// ~14M parameters, faster inference.
    pub fn base_24khz_100band() -> Self {
        Self {
            upsample_initial_channel: 512,
            ..Self::v2_24khz_100band_256x()
        }
    }

    /// Parse a `config.json` document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a `config.json` file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check the structural invariants the components rely on.
    pub fn validate(&self) -> Result<()> {
        if self.num_mels <= 0 || self.upsample_initial_channel <= 0 {
            return Err(VocoderError::Config(
                "num_mels and upsample_initial_channel must be positive".into(),
            ));
        }
        if self.upsample_rates.is_empty()
            || self.upsample_rates.len() != self.upsample_kernel_sizes.len()
        {
            return Err(VocoderError::Config(format!(
                "upsample_rates ({}) and upsample_kernel_sizes ({}) must be non-empty and equal length",
                self.upsample_rates.len(),
                self.upsample_kernel_sizes.len()
            )));
        }
        for (&u, &k) in self.upsample_rates.iter().zip(&self.upsample_kernel_sizes) {
            if u <= 0 || k < u {
                return Err(VocoderError::Config(format!(
                    "upsample kernel {k} must be at least its rate {u}"
                )));
            }
            // Padding is (k - u) / 2 per side; an odd difference adds a sample.
            if (k - u) % 2 != 0 {
                return Err(VocoderError::Config(format!(
                    "upsample kernel {k} and rate {u} must differ by an even amount"
                )));
            }
        }
        if self.resblock_kernel_sizes.is_empty()
            || self.resblock_kernel_sizes.len() != self.resblock_dilation_sizes.len()
        {
            return Err(VocoderError::Config(
                "resblock_kernel_sizes and resblock_dilation_sizes must be non-empty and equal length"
                    .into(),
            ));
        }
        if let Some(k) = self.resblock_kernel_sizes.iter().find(|k| **k % 2 == 0) {
            return Err(VocoderError::Config(format!(
                "resblock kernel size {k} must be odd"
            )));
        }
        let stages = u32::try_from(self.upsample_rates.len()).unwrap_or(u32::MAX);
        if self.upsample_initial_channel.checked_shr(stages).unwrap_or(0) == 0 {
            return Err(VocoderError::Config(
                "upsample_initial_channel too small for the number of stages".into(),
            ));
        }
        if self.hop_size != self.upsample_factor() {
            return Err(VocoderError::Config(format!(
                "hop_size {} must equal the product of upsample_rates {}",
                self.hop_size,
                self.upsample_factor()
            )));
        }
        if self.segment_size <= 0 || self.segment_size % self.hop_size != 0 {
            return Err(VocoderError::Config(format!(
                "segment_size {} must be a positive multiple of hop_size {}",
                self.segment_size, self.hop_size
            )));
        }
        if self.win_size > self.n_fft {
            return Err(VocoderError::Config(format!(
                "win_size {} exceeds n_fft {}",
                self.win_size, self.n_fft
            )));
        }
        Ok(())
    }

    /// Calculate total upsampling factor.
    pub fn upsample_factor(&self) -> i32 {
        self.upsample_rates.iter().product()
    }

    /// Get the number of upsampling stages.
    pub fn num_upsample_stages(&self) -> usize {
        self.upsample_rates.len()
    }

    /// Channel count entering each stage, plus the final stage output.
    pub fn channel_sizes(&self) -> Vec<i32> {
        (0..=self.num_upsample_stages())
            .map(|i| {
                let shift = u32::try_from(i).unwrap_or(u32::MAX);
                self.upsample_initial_channel.checked_shr(shift).unwrap_or(0)
            })
            .collect()
    }

    /// Upper mel frequency of the conditioning mel.
    pub fn fmax_hz(&self) -> f32 {
        self.fmax.unwrap_or(self.sampling_rate as f32 / 2.0)
    }

    /// Upper mel frequency of the loss mel.
    pub fn fmax_for_loss_hz(&self) -> f32 {
        self.fmax_for_loss
            .unwrap_or(self.sampling_rate as f32 / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BigVGANConfig::default();
        assert_eq!(config.num_mels, 100);
        assert_eq!(config.sampling_rate, 24000);
        assert_eq!(config.upsample_factor(), 256);
        config.validate().unwrap();
    }

    #[test]
    fn test_presets_validate() {
        BigVGANConfig::v2_22khz_80band_256x().validate().unwrap();
        BigVGANConfig::v2_44khz_128band_512x().validate().unwrap();
        BigVGANConfig::base_24khz_100band().validate().unwrap();
        assert_eq!(BigVGANConfig::v2_44khz_128band_512x().upsample_factor(), 512);
    }

    #[test]
    fn test_channel_sizes() {
        let config = BigVGANConfig::v2_24khz_100band_256x();
        assert_eq!(
            config.channel_sizes(),
            vec![1536, 768, 384, 192, 96, 48, 24]
        );
    }

    #[test]
    fn test_json_enums() {
        let json = r#"{
            "resblock": "2",
            "activation": "snake",
            "num_mels": 80,
            "upsample_rates": [8, 8, 2, 2],
            "upsample_kernel_sizes": [16, 16, 4, 4],
            "upsample_initial_channel": 512,
            "hop_size": 256,
            "segment_size": 8192,
            "fmax": 8000
        }"#;
        let config = BigVGANConfig::from_json_str(json).unwrap();
        assert_eq!(config.resblock, ResblockKind::SinglePath);
        assert_eq!(config.activation, ActivationKind::Snake);
        assert_eq!(config.fmax_hz(), 8000.0);
        assert_eq!(config.fmax_for_loss_hz(), 12000.0);
        assert_eq!(config.mpd_reshapes, vec![2, 3, 5, 7, 11]);
    }

    #[test]
    fn test_validate_rejects_hop_mismatch() {
        let config = BigVGANConfig {
            hop_size: 300,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(VocoderError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_even_resblock_kernel() {
        let config = BigVGANConfig {
            resblock_kernel_sizes: vec![3, 6, 11],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_odd_kernel_rate_gap() {
        let config = BigVGANConfig {
            upsample_rates: vec![4],
            upsample_kernel_sizes: vec![7],
            upsample_initial_channel: 32,
            hop_size: 4,
            segment_size: 64,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(VocoderError::Config(_))));

        let config = BigVGANConfig {
            upsample_kernel_sizes: vec![8],
            ..config
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_too_many_stages() {
        let config = BigVGANConfig {
            upsample_rates: vec![1; 40],
            upsample_kernel_sizes: vec![1; 40],
            hop_size: 1,
            segment_size: 64,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(VocoderError::Config(_))));
        assert_eq!(config.channel_sizes()[40], 0);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let json = serde_json::to_string_pretty(&BigVGANConfig::default()).unwrap();
        std::fs::write(&path, json).unwrap();
        let loaded = BigVGANConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded, BigVGANConfig::default());
    }
}
