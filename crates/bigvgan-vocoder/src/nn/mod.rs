//! Neural network layers for BigVGAN.
//!
//! This module provides the core building blocks:
//! - Kaiser-sinc up/down resampling
//! - Snake/SnakeBeta periodic activations and the anti-aliased wrapper
//! - AMP (anti-aliased multi-periodicity) residual blocks
//! - Weight-normalized and plain convolutions

mod activation;
mod amp_block;
mod conv;
mod resample;

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::Result;
use mlx_rs::Array;

pub use activation::{Activation1d, PeriodicActivation, Snake, SnakeBeta};
pub use amp_block::{AMPBlock, AMPBlock1, AMPBlock2};
pub(crate) use amp_block::INIT_STD;
pub use conv::{
    get_padding, Conv2d, WeightNormConv1d, WeightNormConv2d, WeightNormConvTranspose1d, WeightNormWeight,
};
pub(crate) use conv::{check_shape, require};
pub use resample::{kaiser_sinc_filter1d, DownSample1d, UpSample1d};

/// Flat, dotted-name parameter maps compatible with BigVGAN checkpoints.
pub trait StateDict {
    /// Insert every parameter under `prefix`.
    fn state_dict_into(&self, prefix: &str, out: &mut HashMap<Rc<str>, Array>);

    /// Replace every parameter from `params`, failing on missing or mis-shaped entries.
    fn load_state_dict_from(
        &mut self,
        prefix: &str,
        params: &HashMap<Rc<str>, Array>,
    ) -> Result<()>;

    /// Collect all parameters into a new map.
    fn state_dict(&self) -> HashMap<Rc<str>, Array> {
        let mut out = HashMap::new();
        self.state_dict_into("", &mut out);
        out
    }
}

/// `prefix.name`, or `name` at the root.
pub(crate) fn join(prefix: &str, name: impl std::fmt::Display) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// `leaky_relu` with the slope every BigVGAN discriminator and generator uses.
pub(crate) fn leaky_relu(x: &Array) -> Result<Array> {
    Ok(mlx_rs::nn::leaky_relu(x, 0.1)?)
}
