//! Training support for BigVGAN.
//!
//! This crate provides the checkpoint contract shared with the external
//! training loop:
//! - `<prefix><8-digit step>` naming for generator (`g_`) and
//!   discriminator/optimizer (`do_`) files
//! - Latest-checkpoint selection with an explicit override file
//! - Safetensors snapshots of any [`StateDict`](bigvgan_vocoder::nn::StateDict)

#![warn(missing_docs)]

pub mod checkpoint;

pub use checkpoint::*;
