//! Anti-aliased Multi-Periodicity (AMP) residual blocks.
//!
//! Both variants keep channel count and length: every convolution is
//! stride 1 with `get_padding(kernel_size, dilation)` padding, and each
//! dilation step adds its output back onto the running residual.

use std::collections::HashMap;
use std::rc::Rc;

use crate::config::{ActivationKind, ResblockKind};
use crate::error::{Result, VocoderError};
use crate::nn::{get_padding, join, Activation1d, StateDict, WeightNormConv1d};
use mlx_rs::Array;

/// Std of the normal init used for generator convolutions.
pub(crate) const INIT_STD: f32 = 0.01;

fn dilated_conv(channels: i32, kernel_size: i32, dilation: i32) -> Result<WeightNormConv1d> {
    let mut conv = WeightNormConv1d::new(
        channels,
        channels,
        kernel_size,
        None,
        Some(get_padding(kernel_size, dilation)),
        Some(dilation),
        None,
    )?;
    conv.weight.init_normal(INIT_STD)?;
    Ok(conv)
}

fn check_kernel(kernel_size: i32, dilations: &[i32]) -> Result<()> {
    if kernel_size % 2 == 0 || dilations.is_empty() {
        return Err(VocoderError::Config(format!(
            "AMP block needs an odd kernel and at least one dilation (kernel {kernel_size}, dilations {dilations:?})"
        )));
    }
    Ok(())
}

/// Dual-path block: activation, dilated conv, activation, conv, residual add.
#[derive(Debug)]
pub struct AMPBlock1 {
    /// Dilated convolutions.
    pub convs1: Vec<WeightNormConv1d>,
    /// Dilation-1 convolutions.
    pub convs2: Vec<WeightNormConv1d>,
    /// Interleaved activations: even indices precede `convs1`, odd precede `convs2`.
    pub activations: Vec<Activation1d>,
}

impl AMPBlock1 {
    /// Create the block.
    pub fn new(
        channels: i32,
        kernel_size: i32,
        dilations: &[i32],
        activation: ActivationKind,
        logscale: bool,
    ) -> Result<Self> {
        check_kernel(kernel_size, dilations)?;
        let convs1 = dilations
            .iter()
            .map(|&d| dilated_conv(channels, kernel_size, d))
            .collect::<Result<Vec<_>>>()?;
        let convs2 = dilations
            .iter()
            .map(|_| dilated_conv(channels, kernel_size, 1))
            .collect::<Result<Vec<_>>>()?;
        let activations = (0..2 * dilations.len())
            .map(|_| Activation1d::from_kind(activation, channels, logscale))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            convs1,
            convs2,
            activations,
        })
    }

    /// Forward pass over `[batch, channels, time]`.
    pub fn forward(&self, x: &Array) -> Result<Array> {
        let mut x = x.clone();
        for (i, (c1, c2)) in self.convs1.iter().zip(&self.convs2).enumerate() {
            let xt = self.activations[2 * i].forward(&x)?;
            let xt = c1.forward(&xt)?;
            let xt = self.activations[2 * i + 1].forward(&xt)?;
            let xt = c2.forward(&xt)?;
            x = xt.add(&x)?;
        }
        Ok(x)
    }

    /// Fold weight norm in every convolution. Idempotent.
    pub fn remove_weight_norm(&mut self) -> Result<()> {
        for conv in self.convs1.iter_mut().chain(self.convs2.iter_mut()) {
            conv.remove_weight_norm()?;
        }
        Ok(())
    }
}

impl StateDict for AMPBlock1 {
    fn state_dict_into(&self, prefix: &str, out: &mut HashMap<Rc<str>, Array>) {
        for (j, conv) in self.convs1.iter().enumerate() {
            conv.state_dict_into(&join(prefix, format!("convs1.{j}")), out);
        }
        for (j, conv) in self.convs2.iter().enumerate() {
            conv.state_dict_into(&join(prefix, format!("convs2.{j}")), out);
        }
        for (k, act) in self.activations.iter().enumerate() {
            act.state_dict_into(&join(prefix, format!("activations.{k}")), out);
        }
    }

    fn load_state_dict_from(
        &mut self,
        prefix: &str,
        params: &HashMap<Rc<str>, Array>,
    ) -> Result<()> {
        for (j, conv) in self.convs1.iter_mut().enumerate() {
            conv.load_state_dict_from(&join(prefix, format!("convs1.{j}")), params)?;
        }
        for (j, conv) in self.convs2.iter_mut().enumerate() {
            conv.load_state_dict_from(&join(prefix, format!("convs2.{j}")), params)?;
        }
        for (k, act) in self.activations.iter_mut().enumerate() {
            act.load_state_dict_from(&join(prefix, format!("activations.{k}")), params)?;
        }
        Ok(())
    }
}

/// Single-path block: activation, dilated conv, residual add.
#[derive(Debug)]
pub struct AMPBlock2 {
    /// Dilated convolutions.
    pub convs: Vec<WeightNormConv1d>,
    /// One activation per convolution.
    pub activations: Vec<Activation1d>,
}

impl AMPBlock2 {
    /// Create the block.
    pub fn new(
        channels: i32,
        kernel_size: i32,
        dilations: &[i32],
        activation: ActivationKind,
        logscale: bool,
    ) -> Result<Self> {
        check_kernel(kernel_size, dilations)?;
        let convs = dilations
            .iter()
            .map(|&d| dilated_conv(channels, kernel_size, d))
            .collect::<Result<Vec<_>>>()?;
        let activations = dilations
            .iter()
            .map(|_| Activation1d::from_kind(activation, channels, logscale))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { convs, activations })
    }

    /// Forward pass over `[batch, channels, time]`.
    pub fn forward(&self, x: &Array) -> Result<Array> {
        let mut x = x.clone();
        for (conv, act) in self.convs.iter().zip(&self.activations) {
            let xt = conv.forward(&act.forward(&x)?)?;
            x = xt.add(&x)?;
        }
        Ok(x)
    }

    /// Fold weight norm in every convolution. Idempotent.
    pub fn remove_weight_norm(&mut self) -> Result<()> {
        for conv in &mut self.convs {
            conv.remove_weight_norm()?;
        }
        Ok(())
    }
}

impl StateDict for AMPBlock2 {
    fn state_dict_into(&self, prefix: &str, out: &mut HashMap<Rc<str>, Array>) {
        for (j, conv) in self.convs.iter().enumerate() {
            conv.state_dict_into(&join(prefix, format!("convs.{j}")), out);
        }
        for (k, act) in self.activations.iter().enumerate() {
            act.state_dict_into(&join(prefix, format!("activations.{k}")), out);
        }
    }

    fn load_state_dict_from(
        &mut self,
        prefix: &str,
        params: &HashMap<Rc<str>, Array>,
    ) -> Result<()> {
        for (j, conv) in self.convs.iter_mut().enumerate() {
            conv.load_state_dict_from(&join(prefix, format!("convs.{j}")), params)?;
        }
        for (k, act) in self.activations.iter_mut().enumerate() {
            act.load_state_dict_from(&join(prefix, format!("activations.{k}")), params)?;
        }
        Ok(())
    }
}

/// Residual block of either variant.
#[derive(Debug)]
pub enum AMPBlock {
    /// Variant "1".
    DualPath(AMPBlock1),
    /// Variant "2".
    SinglePath(AMPBlock2),
}

impl AMPBlock {
    /// Build the configured variant.
    pub fn new(
        kind: ResblockKind,
        channels: i32,
        kernel_size: i32,
        dilations: &[i32],
        activation: ActivationKind,
        logscale: bool,
    ) -> Result<Self> {
        Ok(match kind {
            ResblockKind::DualPath => Self::DualPath(AMPBlock1::new(
                channels,
                kernel_size,
                dilations,
                activation,
                logscale,
            )?),
            ResblockKind::SinglePath => Self::SinglePath(AMPBlock2::new(
                channels,
                kernel_size,
                dilations,
                activation,
                logscale,
            )?),
        })
    }

    /// Forward pass over `[batch, channels, time]`.
    pub fn forward(&self, x: &Array) -> Result<Array> {
        match self {
            Self::DualPath(block) => block.forward(x),
            Self::SinglePath(block) => block.forward(x),
        }
    }

    /// Fold weight norm in every convolution. Idempotent.
    pub fn remove_weight_norm(&mut self) -> Result<()> {
        match self {
            Self::DualPath(block) => block.remove_weight_norm(),
            Self::SinglePath(block) => block.remove_weight_norm(),
        }
    }
}

impl StateDict for AMPBlock {
    fn state_dict_into(&self, prefix: &str, out: &mut HashMap<Rc<str>, Array>) {
        match self {
            Self::DualPath(block) => block.state_dict_into(prefix, out),
            Self::SinglePath(block) => block.state_dict_into(prefix, out),
        }
    }

    fn load_state_dict_from(
        &mut self,
        prefix: &str,
        params: &HashMap<Rc<str>, Array>,
    ) -> Result<()> {
        match self {
            Self::DualPath(block) => block.load_state_dict_from(prefix, params),
            Self::SinglePath(block) => block.load_state_dict_from(prefix, params),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::to_host;

    #[test]
    fn test_amp_block_shapes() {
        for kind in [ResblockKind::DualPath, ResblockKind::SinglePath] {
            let block = AMPBlock::new(kind, 8, 3, &[1, 3, 5], ActivationKind::SnakeBeta, true)
                .unwrap();
            let x = mlx_rs::random::normal::<f32>(&[2, 8, 50], None, None, None).unwrap();
            let y = block.forward(&x).unwrap();
            y.eval().unwrap();
            assert_eq!(y.shape(), &[2, 8, 50]);
        }
    }

    #[test]
    fn test_amp_block_layer_counts() {
        let AMPBlock::DualPath(block) =
            AMPBlock::new(ResblockKind::DualPath, 4, 5, &[1, 3], ActivationKind::Snake, false)
                .unwrap()
        else {
            panic!("expected dual-path block");
        };
        assert_eq!(block.convs1.len(), 2);
        assert_eq!(block.convs2.len(), 2);
        assert_eq!(block.activations.len(), 4);
        assert_eq!(block.convs1[1].dilation, 3);
        assert_eq!(block.convs1[1].padding, 6);
    }

    #[test]
    fn test_even_kernel_rejected() {
        let err = AMPBlock::new(ResblockKind::SinglePath, 4, 4, &[1], ActivationKind::Snake, true)
            .unwrap_err();
        assert!(matches!(err, VocoderError::Config(_)));
    }

    #[test]
    fn test_remove_weight_norm_twice_keeps_output() {
        let mut block =
            AMPBlock::new(ResblockKind::SinglePath, 4, 3, &[1, 3], ActivationKind::SnakeBeta, true)
                .unwrap();
        let x = mlx_rs::random::normal::<f32>(&[1, 4, 20], None, None, None).unwrap();
        let before = to_host(&block.forward(&x).unwrap()).unwrap();
        block.remove_weight_norm().unwrap();
        block.remove_weight_norm().unwrap();
        let after = to_host(&block.forward(&x).unwrap()).unwrap();
        for (a, b) in before.iter().zip(&after) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_state_dict_names() {
        let block =
            AMPBlock::new(ResblockKind::DualPath, 4, 3, &[1, 3], ActivationKind::SnakeBeta, true)
                .unwrap();
        let mut out = HashMap::new();
        block.state_dict_into("resblocks.0", &mut out);
        for key in [
            "resblocks.0.convs1.1.weight_v",
            "resblocks.0.convs2.0.bias",
            "resblocks.0.activations.3.act.beta",
        ] {
            assert!(out.contains_key(key), "missing {key}");
        }
        // 4 convs * 3 tensors + 4 activations * 2 tensors
        assert_eq!(out.len(), 20);
    }
}
