//! Periodic activation functions for BigVGAN.
//!
//! BigVGAN uses Snake and SnakeBeta activations that introduce
//! periodic inductive bias for modeling audio harmonics. They are always
//! applied at twice the sample rate through [`Activation1d`], which keeps the
//! harmonics the nonlinearity creates from folding back into the band.

use std::collections::HashMap;
use std::rc::Rc;

use crate::config::ActivationKind;
use crate::error::Result;
use crate::nn::{check_shape, join, require, DownSample1d, StateDict, UpSample1d};
use mlx_rs::macros::ModuleParameters;
use mlx_rs::module::Param;
use mlx_rs::Array;

const NO_DIV_BY_ZERO: f32 = 1e-9;

fn init_param(channels: i32, logscale: bool) -> Result<Array> {
    // Initialize to 1.0 (or log(1) = 0 for logscale)
    let init_val = if logscale { 0.0 } else { 1.0 };
    Ok(mlx_rs::ops::broadcast_to(
        &Array::from_f32(init_val),
        &[channels],
    )?)
}

/// Per-channel parameter as a positive `[1, channels, 1]` tensor.
fn positive(param: &Param<Array>, logscale: bool) -> Result<Array> {
    let value = param.as_ref().reshape(&[1, -1, 1])?;
    if logscale {
        Ok(value.exp()?)
    } else {
        Ok(value)
    }
}

/// `x + 1/(scale + eps) * sin²(alpha * x)`
fn snake(x: &Array, alpha: &Array, scale: &Array) -> Result<Array> {
    let sin_ax = x.multiply(alpha)?.sin()?;
    let periodic = sin_ax
        .square()?
        .divide(&scale.add(Array::from_f32(NO_DIV_BY_ZERO))?)?;
    Ok(x.add(&periodic)?)
}

/// Snake activation function.
///
/// Snake(x) = x + (1/α) * sin²(αx)
///
/// The learnable parameter α controls the frequency of the periodic component.
/// Higher α values capture higher frequency content.
#[derive(Debug, ModuleParameters)]
pub struct Snake {
    /// Learnable frequency parameter, one per channel.
    #[param]
    pub alpha: Param<Array>,
    /// Whether alpha is in log scale (exp(alpha) is used).
    pub alpha_logscale: bool,
}

impl Snake {
    /// Create a new Snake activation.
    pub fn new(channels: i32, alpha_logscale: bool) -> Result<Self> {
        Ok(Self {
            alpha: Param::new(init_param(channels, alpha_logscale)?),
            alpha_logscale,
        })
    }

    /// Forward pass over `[batch, channels, time]`.
    pub fn forward(&self, x: &Array) -> Result<Array> {
        let alpha = positive(&self.alpha, self.alpha_logscale)?;
        snake(x, &alpha, &alpha)
    }
}

/// SnakeBeta activation function.
///
/// SnakeBeta(x) = x + (1/β) * sin²(αx)
///
/// Extends Snake with separate α (frequency) and β (magnitude) parameters.
#[derive(Debug, ModuleParameters)]
pub struct SnakeBeta {
    /// Learnable frequency parameter.
    #[param]
    pub alpha: Param<Array>,
    /// Learnable magnitude parameter.
    #[param]
    pub beta: Param<Array>,
    /// Whether parameters are in log scale.
    pub logscale: bool,
}

impl SnakeBeta {
    /// Create a new SnakeBeta activation.
    pub fn new(channels: i32, logscale: bool) -> Result<Self> {
        Ok(Self {
            alpha: Param::new(init_param(channels, logscale)?),
            beta: Param::new(init_param(channels, logscale)?),
            logscale,
        })
    }

    /// Forward pass over `[batch, channels, time]`.
    pub fn forward(&self, x: &Array) -> Result<Array> {
        let alpha = positive(&self.alpha, self.logscale)?;
        let beta = positive(&self.beta, self.logscale)?;
        snake(x, &alpha, &beta)
    }
}

/// Periodic nonlinearity selected once from [`ActivationKind`].
#[derive(Debug)]
pub enum PeriodicActivation {
    /// Snake.
    Snake(Snake),
    /// SnakeBeta.
    SnakeBeta(SnakeBeta),
}

impl PeriodicActivation {
    /// Build the activation for `channels` channels.
    pub fn new(kind: ActivationKind, channels: i32, logscale: bool) -> Result<Self> {
        Ok(match kind {
            ActivationKind::Snake => Self::Snake(Snake::new(channels, logscale)?),
            ActivationKind::SnakeBeta => Self::SnakeBeta(SnakeBeta::new(channels, logscale)?),
        })
    }

    /// Apply the nonlinearity.
    pub fn forward(&self, x: &Array) -> Result<Array> {
        match self {
            Self::Snake(act) => act.forward(x),
            Self::SnakeBeta(act) => act.forward(x),
        }
    }
}

impl StateDict for PeriodicActivation {
    fn state_dict_into(&self, prefix: &str, out: &mut HashMap<Rc<str>, Array>) {
        match self {
            Self::Snake(act) => {
                out.insert(Rc::from(join(prefix, "alpha")), act.alpha.as_ref().clone());
            }
            Self::SnakeBeta(act) => {
                out.insert(Rc::from(join(prefix, "alpha")), act.alpha.as_ref().clone());
                out.insert(Rc::from(join(prefix, "beta")), act.beta.as_ref().clone());
            }
        }
    }

    fn load_state_dict_from(
        &mut self,
        prefix: &str,
        params: &HashMap<Rc<str>, Array>,
    ) -> Result<()> {
        let load = |param: &mut Param<Array>, name: &str| -> Result<()> {
            let key = join(prefix, name);
            let value = require(params, &key)?;
            check_shape(&key, param.as_ref().shape(), value)?;
            *param = Param::new(value.clone());
            Ok(())
        };
        match self {
            Self::Snake(act) => load(&mut act.alpha, "alpha"),
            Self::SnakeBeta(act) => {
                load(&mut act.alpha, "alpha")?;
                load(&mut act.beta, "beta")
            }
        }
    }
}

/// Anti-aliased activation wrapper.
///
/// Process: Upsample(2×) → Activate → Downsample(2×). Output shape equals
/// input shape whenever the two ratios match.
#[derive(Debug)]
pub struct Activation1d {
    /// Inner activation function.
    pub act: PeriodicActivation,
    /// Interpolation stage.
    pub upsample: UpSample1d,
    /// Decimation stage.
    pub downsample: DownSample1d,
}

impl Activation1d {
    /// Wrap `act` with the default ratio 2 and 12-tap filters.
    pub fn new(act: PeriodicActivation) -> Result<Self> {
        Self::with_ratios(act, 2, 2, 12, 12)
    }

    /// Wrap `act` with explicit ratios and filter lengths.
    pub fn with_ratios(
        act: PeriodicActivation,
        up_ratio: i32,
        down_ratio: i32,
        up_kernel_size: i32,
        down_kernel_size: i32,
    ) -> Result<Self> {
        Ok(Self {
            act,
            upsample: UpSample1d::with_kernel_size(up_ratio, up_kernel_size)?,
            downsample: DownSample1d::with_kernel_size(down_ratio, down_kernel_size)?,
        })
    }

    /// Build from a config-level activation kind.
    pub fn from_kind(kind: ActivationKind, channels: i32, logscale: bool) -> Result<Self> {
        Self::new(PeriodicActivation::new(kind, channels, logscale)?)
    }

    /// Forward pass over `[batch, channels, time]`.
    pub fn forward(&self, x: &Array) -> Result<Array> {
        let x = self.upsample.forward(x)?;
        let x = self.act.forward(&x)?;
        self.downsample.forward(&x)
    }
}

impl StateDict for Activation1d {
    fn state_dict_into(&self, prefix: &str, out: &mut HashMap<Rc<str>, Array>) {
        self.act.state_dict_into(&join(prefix, "act"), out);
    }

    fn load_state_dict_from(
        &mut self,
        prefix: &str,
        params: &HashMap<Rc<str>, Array>,
    ) -> Result<()> {
        self.act.load_state_dict_from(&join(prefix, "act"), params)
    }
}
