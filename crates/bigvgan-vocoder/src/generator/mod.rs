//! BigVGAN Generator for mel-to-waveform synthesis.
//!
//! The generator converts mel spectrograms to audio waveforms using
//! transposed convolutions for upsampling and AMP blocks for processing.
//! After every upsampling stage the parallel AMP blocks (one per resblock
//! kernel size) are averaged, which fuses several receptive fields.

use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use crate::config::BigVGANConfig;
use crate::error::{Result, VocoderError};
use crate::nn::{
    join, AMPBlock, Activation1d, StateDict, WeightNormConv1d, WeightNormConvTranspose1d,
    INIT_STD,
};
use mlx_rs::Array;

/// BigVGAN neural vocoder.
///
/// Converts mel spectrograms [batch, n_mels, frames] to audio waveforms
/// [batch, 1, frames * prod(upsample_rates)].
#[derive(Debug)]
pub struct BigVGAN {
    /// Model configuration.
    pub config: BigVGANConfig,
    /// Initial convolution from mel channels to hidden.
    pub conv_pre: WeightNormConv1d,
    /// Upsampling stages (transposed convolutions).
    pub ups: Vec<WeightNormConvTranspose1d>,
    /// AMP blocks, `num_kernels` per stage, stage-major.
    pub resblocks: Vec<AMPBlock>,
    /// Final activation.
    pub activation_post: Activation1d,
    /// Final convolution to single channel audio.
    pub conv_post: WeightNormConv1d,
}

impl BigVGAN {
    /// Create a new BigVGAN generator from configuration.
    pub fn new(config: BigVGANConfig) -> Result<Self> {
        config.validate()?;
        let num_kernels = config.resblock_kernel_sizes.len();

        let conv_pre = WeightNormConv1d::new(
            config.num_mels,
            config.upsample_initial_channel,
            7,
            None,
            Some(3),
            None,
            None,
        )?;

        let mut ups = Vec::with_capacity(config.num_upsample_stages());
        let mut resblocks = Vec::with_capacity(config.num_upsample_stages() * num_kernels);
        let channel_sizes = config.channel_sizes();

        for (i, (&rate, &kernel_size)) in config
            .upsample_rates
            .iter()
            .zip(&config.upsample_kernel_sizes)
            .enumerate()
        {
            let (in_channels, out_channels) = (channel_sizes[i], channel_sizes[i + 1]);
            let mut up = WeightNormConvTranspose1d::new(
                in_channels,
                out_channels,
                kernel_size,
                rate,
                (kernel_size - rate) / 2,
            )?;
            up.weight.init_normal(INIT_STD)?;
            ups.push(up);

            for (&k, dilations) in config
                .resblock_kernel_sizes
                .iter()
                .zip(&config.resblock_dilation_sizes)
            {
                resblocks.push(AMPBlock::new(
                    config.resblock,
                    out_channels,
                    k,
                    dilations,
                    config.activation,
                    config.snake_logscale,
                )?);
            }
        }

        let channels = channel_sizes[config.num_upsample_stages()];
        let activation_post =
            Activation1d::from_kind(config.activation, channels, config.snake_logscale)?;

        let mut conv_post = WeightNormConv1d::new(
            channels,
            1,
            7,
            None,
            Some(3),
            None,
            Some(config.use_bias_at_final),
        )?;
        conv_post.weight.init_normal(INIT_STD)?;

        tracing::debug!(
            stages = ups.len(),
            resblocks = resblocks.len(),
            resblock = ?config.resblock,
            activation = ?config.activation,
            "built BigVGAN generator"
        );

        Ok(Self {
            config,
            conv_pre,
            ups,
            resblocks,
            activation_post,
            conv_post,
        })
    }

    /// Create BigVGAN v2 24kHz 100-band model.
    pub fn v2_24khz_100band_256x() -> Result<Self> {
        Self::new(BigVGANConfig::v2_24khz_100band_256x())
    }

    /// Create BigVGAN v2 44.1kHz 128-band model.
    pub fn v2_44khz_128band_512x() -> Result<Self> {
        Self::new(BigVGANConfig::v2_44khz_128band_512x())
    }

    /// Samples produced per mel frame.
    pub fn hop_length(&self) -> i32 {
        self.config.upsample_factor()
    }

    /// Forward pass: convert mel spectrogram to audio.
    ///
    /// # Arguments
    /// * `mel` - Mel spectrogram [batch, n_mels, frames]
    ///
    /// # Returns
    /// Audio waveform [batch, 1, frames * hop] bounded to [-1, 1]
    pub fn forward(&self, mel: &Array) -> Result<Array> {
        if mel.ndim() != 3 || mel.dim(1) != self.config.num_mels {
            return Err(VocoderError::ShapeMismatch {
                expected: vec![-1, self.config.num_mels, -1],
                actual: mel.shape().to_vec(),
            });
        }

        let mut x = self.conv_pre.forward(mel)?;

        let num_kernels = self.config.resblock_kernel_sizes.len();
        for (up, blocks) in self.ups.iter().zip(self.resblocks.chunks(num_kernels)) {
            x = up.forward(&x)?;

            let mut fused: Option<Array> = None;
            for block in blocks {
                let out = block.forward(&x)?;
                fused = Some(match fused {
                    Some(acc) => acc.add(&out)?,
                    None => out,
                });
            }
            if let Some(fused) = fused {
                x = fused.divide(Array::from_f32(num_kernels as f32))?;
            }
        }

        x = self.activation_post.forward(&x)?;
        x = self.conv_post.forward(&x)?;

        if self.config.use_tanh_at_final {
            Ok(mlx_rs::ops::tanh(&x)?)
        } else {
            let x = mlx_rs::ops::maximum(&x, Array::from_f32(-1.0))?;
            Ok(mlx_rs::ops::minimum(&x, Array::from_f32(1.0))?)
        }
    }

    /// Generate audio from a mel spectrogram (inference helper).
    ///
    /// # Arguments
    /// * `mel` - Mel spectrogram [n_mels, frames] or [batch, n_mels, frames]
    ///
    /// # Returns
    /// Audio samples [samples] or [batch, samples]
    pub fn generate(&self, mel: &Array) -> Result<Array> {
        let unbatched = mel.ndim() == 2;
        let mel = if unbatched {
            mel.reshape(&[1, mel.dim(0), mel.dim(1)])?
        } else {
            mel.clone()
        };

        let audio = self.forward(&mel)?;
        let (batch, samples) = (audio.dim(0), audio.dim(2));
        if unbatched {
            Ok(audio.reshape(&[samples])?)
        } else {
            Ok(audio.reshape(&[batch, samples])?)
        }
    }

    /// Fold weight norm into every convolution for inference. Safe to call
    /// more than once.
    pub fn remove_weight_norm(&mut self) -> Result<()> {
        tracing::debug!("removing weight norm from generator");
        self.conv_pre.remove_weight_norm()?;
        for up in &mut self.ups {
            up.remove_weight_norm()?;
        }
        for block in &mut self.resblocks {
            block.remove_weight_norm()?;
        }
        self.conv_post.remove_weight_norm()
    }

    /// Save all parameters to a safetensors file.
    pub fn save_weights(&self, path: impl AsRef<Path>) -> Result<()> {
        let params = self.state_dict();
        Array::save_safetensors(params, None, path)?;
        Ok(())
    }

    /// Load parameters from a safetensors file written by [`Self::save_weights`]
    /// or converted from a BigVGAN generator checkpoint.
    pub fn load_weights(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let loaded = Array::load_safetensors(path.as_ref())?;
        let params: HashMap<Rc<str>, Array> = loaded
            .into_iter()
            .map(|(k, v)| (Rc::from(k.as_str()), v))
            .collect();
        self.load_state_dict_from("", &params)?;
        tracing::info!(path = %path.as_ref().display(), tensors = params.len(), "loaded generator weights");
        Ok(())
    }

    /// Build a generator from a directory holding `config.json` and
    /// `model.safetensors`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let config = BigVGANConfig::from_json_file(dir.join("config.json"))?;
        let mut model = Self::new(config)?;
        model.load_weights(dir.join("model.safetensors"))?;
        Ok(model)
    }
}

impl StateDict for BigVGAN {
    fn state_dict_into(&self, prefix: &str, out: &mut HashMap<Rc<str>, Array>) {
        self.conv_pre.state_dict_into(&join(prefix, "conv_pre"), out);
        for (i, up) in self.ups.iter().enumerate() {
            up.state_dict_into(&join(prefix, format!("ups.{i}.0")), out);
        }
        for (i, block) in self.resblocks.iter().enumerate() {
            block.state_dict_into(&join(prefix, format!("resblocks.{i}")), out);
        }
        self.activation_post
            .state_dict_into(&join(prefix, "activation_post"), out);
        self.conv_post.state_dict_into(&join(prefix, "conv_post"), out);
    }

    fn load_state_dict_from(
        &mut self,
        prefix: &str,
        params: &HashMap<Rc<str>, Array>,
    ) -> Result<()> {
        self.conv_pre
            .load_state_dict_from(&join(prefix, "conv_pre"), params)?;
        for (i, up) in self.ups.iter_mut().enumerate() {
            up.load_state_dict_from(&join(prefix, format!("ups.{i}.0")), params)?;
        }
        for (i, block) in self.resblocks.iter_mut().enumerate() {
            block.load_state_dict_from(&join(prefix, format!("resblocks.{i}")), params)?;
        }
        self.activation_post
            .load_state_dict_from(&join(prefix, "activation_post"), params)?;
        self.conv_post
            .load_state_dict_from(&join(prefix, "conv_post"), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::to_host;
    use crate::config::{ActivationKind, ResblockKind};

    fn tiny_config(resblock: ResblockKind, activation: ActivationKind) -> BigVGANConfig {
        BigVGANConfig {
            num_mels: 8,
            upsample_rates: vec![4, 2],
            upsample_kernel_sizes: vec![8, 4],
            upsample_initial_channel: 16,
            resblock_kernel_sizes: vec![3, 5],
            resblock_dilation_sizes: vec![vec![1, 3], vec![1, 3]],
            resblock,
            activation,
            hop_size: 8,
            n_fft: 32,
            win_size: 32,
            segment_size: 64,
            ..Default::default()
        }
    }

    #[test]
    fn test_bigvgan_structure() {
        let model = BigVGAN::new(BigVGANConfig::base_24khz_100band()).unwrap();
        assert_eq!(model.ups.len(), 6);
        assert_eq!(model.resblocks.len(), 18);
        assert_eq!(model.hop_length(), 256);
    }

    #[test]
    fn test_bigvgan_forward_shape_all_variants() {
        for resblock in [ResblockKind::DualPath, ResblockKind::SinglePath] {
            for activation in [ActivationKind::Snake, ActivationKind::SnakeBeta] {
                let model = BigVGAN::new(tiny_config(resblock, activation)).unwrap();
                let mel = mlx_rs::random::normal::<f32>(&[2, 8, 5], None, None, None).unwrap();
                let audio = model.forward(&mel).unwrap();
                audio.eval().unwrap();
                assert_eq!(audio.shape(), &[2, 1, 40]);
            }
        }
    }

    #[test]
    fn test_bigvgan_rejects_wrong_mel_bins() {
        let model =
            BigVGAN::new(tiny_config(ResblockKind::DualPath, ActivationKind::SnakeBeta)).unwrap();
        let mel = mlx_rs::ops::zeros::<f32>(&[1, 7, 5]).unwrap();
        assert!(matches!(
            model.forward(&mel),
            Err(VocoderError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_bigvgan_generate_unbatched() {
        let model =
            BigVGAN::new(tiny_config(ResblockKind::SinglePath, ActivationKind::Snake)).unwrap();
        let mel = mlx_rs::random::normal::<f32>(&[8, 3], None, None, None).unwrap();
        let audio = model.generate(&mel).unwrap();
        audio.eval().unwrap();
        assert_eq!(audio.shape(), &[24]);
    }

    #[test]
    fn test_output_range_with_clamp_and_tanh() {
        for use_tanh in [true, false] {
            let config = BigVGANConfig {
                use_tanh_at_final: use_tanh,
                ..tiny_config(ResblockKind::DualPath, ActivationKind::SnakeBeta)
            };
            let model = BigVGAN::new(config).unwrap();
            let mel = mlx_rs::random::normal::<f32>(&[1, 8, 4], None, Some(5.0), None).unwrap();
            let audio = to_host(&model.forward(&mel).unwrap()).unwrap();
            assert!(audio.iter().all(|v| (-1.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_remove_weight_norm_twice() {
        let mut model =
            BigVGAN::new(tiny_config(ResblockKind::DualPath, ActivationKind::SnakeBeta)).unwrap();
        let mel = mlx_rs::random::normal::<f32>(&[1, 8, 4], None, None, None).unwrap();
        let before = to_host(&model.forward(&mel).unwrap()).unwrap();
        model.remove_weight_norm().unwrap();
        model.remove_weight_norm().unwrap();
        let after = to_host(&model.forward(&mel).unwrap()).unwrap();
        for (a, b) in before.iter().zip(&after) {
            assert!((a - b).abs() < 1e-4);
        }
        assert!(model.state_dict().contains_key("conv_pre.weight"));
    }

    #[test]
    fn test_state_dict_names() {
        let model =
            BigVGAN::new(tiny_config(ResblockKind::DualPath, ActivationKind::SnakeBeta)).unwrap();
        let params = model.state_dict();
        for key in [
            "conv_pre.weight_v",
            "ups.1.0.weight_g",
            "resblocks.3.convs1.1.bias",
            "resblocks.0.activations.2.act.alpha",
            "activation_post.act.beta",
            "conv_post.weight_v",
        ] {
            assert!(params.contains_key(key), "missing {key}");
        }
        assert!(!params.contains_key("conv_post.bias"));
    }

    #[test]
    fn test_weights_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        let config = tiny_config(ResblockKind::SinglePath, ActivationKind::SnakeBeta);

        let model = BigVGAN::new(config.clone()).unwrap();
        model.save_weights(&path).unwrap();

        let mut restored = BigVGAN::new(config).unwrap();
        restored.load_weights(&path).unwrap();

        let mel = mlx_rs::random::normal::<f32>(&[1, 8, 3], None, None, None).unwrap();
        let a = to_host(&model.forward(&mel).unwrap()).unwrap();
        let b = to_host(&restored.forward(&mel).unwrap()).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-6);
        }
    }
}
