//! Neural vocoder for text-to-speech synthesis.
//!
//! This crate implements BigVGAN, a universal neural vocoder that converts
//! mel spectrograms to high-fidelity audio waveforms, together with the
//! discriminator ensemble and losses it is trained with. Tensors run on MLX.
//!
//! # Architecture
//!
//! BigVGAN uses:
//! - Transposed convolutions for upsampling (256× for 24kHz)
//! - Anti-aliased Multi-Periodicity (AMP) blocks with Snake activations
//! - Period, resolution, band and CQT discriminators for adversarial training
//!
//! # Example
//!
//! ```ignore
//! use bigvgan_vocoder::{BigVGAN, BigVGANConfig};
//!
//! // Load a converted checkpoint directory (config.json + model.safetensors)
//! let mut vocoder = BigVGAN::from_dir("checkpoints/bigvgan_v2_24khz_100band_256x")?;
//! vocoder.remove_weight_norm()?;
//!
//! // Generate audio from mel spectrogram
//! let mel = /* [batch, 100, frames] */;
//! let audio = vocoder.forward(&mel)?;
//! ```

#![warn(missing_docs)]
#![allow(clippy::too_many_arguments)]

pub mod audio;
pub mod config;
pub mod discriminator;
pub mod error;
pub mod generator;
pub mod loss;
pub mod nn;

pub use config::*;
pub use error::*;
pub use generator::BigVGAN;
