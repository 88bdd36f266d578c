//! Audio signal processing on MLX.
//!
//! - STFT as a windowed DFT matrix product
//! - Slaney mel filterbank and stabilized log compression
//! - Constant-Q transform for the CQT discriminator

mod cqt;
mod mel;
mod stft;

pub use cqt::*;
pub use mel::*;
pub use stft::*;

use crate::error::Result;
use mlx_rs::Array;

/// Evaluate `x` and copy it to a host `Vec<f32>` in row-major order.
pub fn to_host(x: &Array) -> Result<Vec<f32>> {
    x.eval()?;
    Ok(x.as_slice::<f32>().to_vec())
}
