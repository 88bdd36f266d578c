//! Training data for BigVGAN.
//!
//! This crate provides:
//! - WAV decoding, windowed-sinc resampling and 16-bit PCM writing
//! - `.npy` reading for precomputed fine-tuning mels
//! - Transcript filelists resolved to audio paths
//! - A segment sampling dataset with bounded retry on corrupt audio

#![warn(missing_docs)]

pub mod audio;
pub mod dataset;
pub mod filelist;
pub mod npy;

pub use audio::*;
pub use dataset::*;
pub use filelist::*;
pub use npy::*;
