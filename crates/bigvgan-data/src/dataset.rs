//! Segment sampling dataset.
//!
//! Each item is a `(mel, audio, filename, mel_for_loss)` sample:
//! - Training: a random `segment_size` crop (zero-padded when short),
//!   peak-normalized, with its mel computed on the fly.
//! - Evaluation: the head segment, or the whole clip trimmed to a multiple of
//!   `hop_size` when not splitting.
//! - Fine-tuning: the mel is read from `<base_mels_path>/<stem>.npy` and the
//!   audio is cut to the same random frame window.
//!
//! Decode failures outside fine-tuning are retried on a random other index
//! a bounded number of times.

use std::path::{Path, PathBuf};

use bigvgan_vocoder::audio::MelSpectrogram;
use bigvgan_vocoder::{BigVGANConfig, Result, VocoderError};
use mlx_rs::Array;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::audio::{peak_normalize, resample, AudioDecoder, DecodedAudio, WavDecoder};
use crate::npy::read_npy;

/// Peak level of volume-normalized training audio.
pub const PEAK_SCALE: f32 = 0.95;

/// Dataset behaviour switches.
#[derive(Debug, Clone)]
pub struct MelDatasetConfig {
    /// Cut items to `segment_size`.
    pub split: bool,
    /// Random segment offsets; otherwise the head of each clip is used.
    pub random_offsets: bool,
    /// Shuffle the file order once at construction.
    pub shuffle: bool,
    /// Seed of the construction shuffle.
    pub seed: u64,
    /// Read precomputed mels instead of computing them.
    pub fine_tuning: bool,
    /// Directory of precomputed `.npy` mels.
    pub base_mels_path: Option<PathBuf>,
    /// Extra attempts after a decode failure.
    pub max_retries: usize,
}

impl Default for MelDatasetConfig {
    fn default() -> Self {
        Self {
            split: true,
            random_offsets: true,
            shuffle: true,
            seed: 1234,
            fine_tuning: false,
            base_mels_path: None,
            max_retries: 10,
        }
    }
}

impl MelDatasetConfig {
    /// Random segments from a shuffled list.
    pub fn training(seed: u64) -> Self {
        Self {
            seed,
            ..Default::default()
        }
    }

    /// Whole clips in list order.
    pub fn validation() -> Self {
        Self {
            split: false,
            random_offsets: false,
            shuffle: false,
            ..Default::default()
        }
    }

    /// Enable fine-tuning on precomputed mels.
    pub fn with_fine_tuning(mut self, base_mels_path: impl Into<PathBuf>) -> Self {
        self.fine_tuning = true;
        self.base_mels_path = Some(base_mels_path.into());
        self
    }
}

/// One dataset item.
#[derive(Debug, Clone)]
pub struct MelSample {
    /// Conditioning mel `[num_mels, frames]`.
    pub mel: Array,
    /// Waveform `[frames * hop_size]`.
    pub audio: Array,
    /// Source file.
    pub filename: PathBuf,
    /// Loss mel `[num_mels, frames]` (uses `fmax_for_loss`).
    pub mel_loss: Array,
}

/// Dataset of `<mel, audio>` pairs over a list of audio files.
#[derive(Debug)]
pub struct MelDataset<D = WavDecoder> {
    files: Vec<PathBuf>,
    config: BigVGANConfig,
    options: MelDatasetConfig,
    decoder: D,
    mel: MelSpectrogram,
    mel_loss: MelSpectrogram,
}

impl MelDataset<WavDecoder> {
    /// Dataset over WAV files.
    pub fn new(
        files: Vec<PathBuf>,
        config: &BigVGANConfig,
        options: MelDatasetConfig,
    ) -> Result<Self> {
        Self::with_decoder(files, config, options, WavDecoder)
    }
}

impl<D: AudioDecoder> MelDataset<D> {
    /// Dataset with a custom decoder.
    pub fn with_decoder(
        mut files: Vec<PathBuf>,
        config: &BigVGANConfig,
        options: MelDatasetConfig,
        decoder: D,
    ) -> Result<Self> {
        config.validate()?;
        if files.is_empty() {
            return Err(VocoderError::Config("dataset has no files".into()));
        }
        if options.fine_tuning && options.base_mels_path.is_none() {
            return Err(VocoderError::Config(
                "fine-tuning requires base_mels_path".into(),
            ));
        }

        if options.shuffle {
            let mut rng = rand::rngs::StdRng::seed_from_u64(options.seed);
            files.shuffle(&mut rng);
        }

        let mel = MelSpectrogram::from_config(config, None)?;
        let mel_loss = MelSpectrogram::from_config(config, Some(config.fmax_for_loss_hz()))?;

        tracing::debug!(
            "MelDataset: {} files, split={}, fine_tuning={}",
            files.len(),
            options.split,
            options.fine_tuning
        );

        Ok(Self {
            files,
            config: config.clone(),
            options,
            decoder,
            mel,
            mel_loss,
        })
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Files in iteration order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Behaviour switches.
    pub fn options(&self) -> &MelDatasetConfig {
        &self.options
    }

    /// Fetch item `index`.
    ///
    /// Outside fine-tuning a decode failure moves on to a random index drawn
    /// from `rng`, up to `max_retries` times, then fails with
    /// [`VocoderError::RetriesExhausted`]. Fine-tuning returns the first
    /// error unchanged. Any other error is returned immediately.
    pub fn get<R: Rng + ?Sized>(&self, index: usize, rng: &mut R) -> Result<MelSample> {
        if index >= self.files.len() {
            return Err(VocoderError::Config(format!(
                "index {index} out of range for {} files",
                self.files.len()
            )));
        }

        let mut index = index;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let err = match self.load(index, rng) {
                Ok(sample) => return Ok(sample),
                Err(e) => e,
            };
            if self.options.fine_tuning || !err.is_decode() {
                return Err(err);
            }
            if attempts > self.options.max_retries {
                tracing::error!("Giving up after {attempts} attempts: {err}");
                return Err(VocoderError::RetriesExhausted {
                    attempts,
                    source: Box::new(err),
                });
            }
            tracing::warn!(
                "Failed to load item {index} (attempt {attempts}), skipping: {err}"
            );
            index = rng.gen_range(0..self.files.len());
        }
    }

    fn load<R: Rng + ?Sized>(&self, index: usize, rng: &mut R) -> Result<MelSample> {
        let path = &self.files[index];
        let audio = self.decoder.decode(path)?;
        if self.options.fine_tuning {
            self.load_precomputed(path, audio, rng)
        } else {
            self.load_computed(path, audio, rng)
        }
    }

    fn load_computed<R: Rng + ?Sized>(
        &self,
        path: &Path,
        audio: DecodedAudio,
        rng: &mut R,
    ) -> Result<MelSample> {
        let sr = self.config.sampling_rate as u32;
        let segment = self.config.segment_size as usize;
        let hop = self.config.hop_size as usize;

        let mut samples = if self.options.split {
            // Crop at the source rate, then resample the crop.
            let source_segment = if audio.sample_rate == sr {
                segment
            } else {
                (segment as f64 * audio.sample_rate as f64 / sr as f64).ceil() as usize
            };
            let chunk = self.crop_or_pad(&audio.samples, source_segment, rng);
            let mut chunk = resample(&chunk, audio.sample_rate, sr)?;
            chunk.resize(segment, 0.0);
            chunk
        } else {
            let mut clip = resample(&audio.samples, audio.sample_rate, sr)?;
            clip.truncate(clip.len() - clip.len() % hop);
            clip
        };
        if samples.is_empty() {
            return Err(VocoderError::decode(path, "clip is shorter than one hop"));
        }

        peak_normalize(&mut samples, PEAK_SCALE);
        let audio = Array::from_slice(&samples, &[1, samples.len() as i32]);
        let mel = self.mel.forward(&audio)?;
        self.finish(path, audio, mel)
    }

    fn load_precomputed<R: Rng + ?Sized>(
        &self,
        path: &Path,
        audio: DecodedAudio,
        rng: &mut R,
    ) -> Result<MelSample> {
        if audio.sample_rate != self.config.sampling_rate as u32 {
            return Err(VocoderError::Config(format!(
                "{}: sample rate {} differs from {}; fine-tuning audio is not resampled",
                path.display(),
                audio.sample_rate,
                self.config.sampling_rate
            )));
        }

        let stem = path
            .file_stem()
            .ok_or_else(|| VocoderError::decode(path, "no file name"))?;
        let base = self.options.base_mels_path.as_deref().unwrap_or(Path::new("."));
        let mel_path = base.join(format!("{}.npy", stem.to_string_lossy()));
        let npy = read_npy(&mel_path)?;

        let num_mels = self.config.num_mels as usize;
        let (channels, frames) = npy
            .as_matrix()
            .filter(|(c, _)| *c == num_mels)
            .ok_or_else(|| VocoderError::ShapeMismatch {
                expected: vec![1, num_mels as i32, -1],
                actual: npy.shape.iter().map(|&d| d as i32).collect(),
            })?;

        let mut samples = audio.samples;
        let (mel_data, frames) = if self.options.split {
            let segment = self.config.segment_size as usize;
            let hop = self.config.hop_size as usize;
            let frames_per_segment = segment.div_ceil(hop);

            let mut start = 0;
            if samples.len() >= segment {
                if self.options.random_offsets {
                    start = rng.gen_range(0..=frames.saturating_sub(frames_per_segment + 1));
                }
                let lo = (start * hop).min(samples.len());
                let hi = ((start + frames_per_segment) * hop).min(samples.len());
                samples = samples[lo..hi].to_vec();
            }
            // Zero-padding may misalign the last frame when the clip is not
            // a whole number of hops.
            samples.resize(segment, 0.0);
            let window = frame_window(&npy.data, channels, frames, start, frames_per_segment);
            (window, frames_per_segment)
        } else {
            (npy.data, frames)
        };

        let audio = Array::from_slice(&samples, &[1, samples.len() as i32]);
        let mel = Array::from_slice(&mel_data, &[1, channels as i32, frames as i32]);
        self.finish(path, audio, mel)
    }

    fn crop_or_pad<R: Rng + ?Sized>(&self, samples: &[f32], len: usize, rng: &mut R) -> Vec<f32> {
        if samples.len() >= len {
            let start = if self.options.random_offsets {
                rng.gen_range(0..=samples.len() - len)
            } else {
                0
            };
            samples[start..start + len].to_vec()
        } else {
            let mut padded = samples.to_vec();
            padded.resize(len, 0.0);
            padded
        }
    }

    /// Loss mel plus the length check shared by every path.
    fn finish(&self, path: &Path, audio: Array, mel: Array) -> Result<MelSample> {
        let mel_loss = self.mel_loss.forward(&audio)?;
        let hop = self.config.hop_size;
        let samples = audio.dim(1);
        for frames in [mel.dim(2), mel_loss.dim(2)] {
            if samples != frames * hop {
                return Err(VocoderError::ShapeMismatch {
                    expected: vec![frames * hop],
                    actual: vec![samples],
                });
            }
        }

        let n_mels = mel.dim(1);
        let frames = mel.dim(2);
        Ok(MelSample {
            mel: mel.reshape(&[n_mels, frames])?,
            audio: audio.reshape(&[samples])?,
            filename: path.to_path_buf(),
            mel_loss: mel_loss.reshape(&[mel_loss.dim(1), mel_loss.dim(2)])?,
        })
    }
}

/// Frames `start..start + len` of a row-major `[channels, frames]` matrix,
/// zero-padded past the end.
fn frame_window(data: &[f32], channels: usize, frames: usize, start: usize, len: usize) -> Vec<f32> {
    let mut out = vec![0.0; channels * len];
    let end = (start + len).min(frames);
    if start < end {
        for c in 0..channels {
            let row = &data[c * frames + start..c * frames + end];
            out[c * len..c * len + row.len()].copy_from_slice(row);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigvgan_vocoder::audio::to_host;
    use rand::rngs::StdRng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sine decoder that fails its first `failures` calls.
    struct FlakyDecoder {
        calls: AtomicUsize,
        failures: usize,
        len: usize,
        sample_rate: u32,
    }

    impl FlakyDecoder {
        fn new(failures: usize, len: usize, sample_rate: u32) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures,
                len,
                sample_rate,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl AudioDecoder for FlakyDecoder {
        fn decode(&self, path: &Path) -> Result<DecodedAudio> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(VocoderError::decode(path, "corrupt header"));
            }
            let samples = (0..self.len)
                .map(|i| 0.3 * (i as f32 * 0.05).sin())
                .collect();
            Ok(DecodedAudio {
                samples,
                sample_rate: self.sample_rate,
            })
        }
    }

    fn config() -> BigVGANConfig {
        BigVGANConfig {
            num_mels: 8,
            upsample_rates: vec![4, 4],
            upsample_kernel_sizes: vec![8, 8],
            sampling_rate: 8000,
            n_fft: 64,
            hop_size: 16,
            win_size: 64,
            segment_size: 256,
            ..Default::default()
        }
    }

    fn files(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("wavs/{i}.wav"))).collect()
    }

    fn dataset<D: AudioDecoder>(options: MelDatasetConfig, decoder: D) -> MelDataset<D> {
        MelDataset::with_decoder(files(4), &config(), options, decoder).unwrap()
    }

    #[test]
    fn test_training_item_shapes() {
        let ds = dataset(MelDatasetConfig::training(7), FlakyDecoder::new(0, 1000, 8000));
        let mut rng = StdRng::seed_from_u64(0);
        let sample = ds.get(0, &mut rng).unwrap();

        assert_eq!(sample.audio.shape(), &[256]);
        assert_eq!(sample.mel.shape(), &[8, 16]);
        assert_eq!(sample.mel_loss.shape(), &[8, 16]);
        let peak = to_host(&sample.audio)
            .unwrap()
            .iter()
            .fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - PEAK_SCALE).abs() < 1e-5);
    }

    #[test]
    fn test_short_clip_is_zero_padded() {
        let ds = dataset(MelDatasetConfig::training(7), FlakyDecoder::new(0, 100, 8000));
        let sample = ds.get(1, &mut StdRng::seed_from_u64(0)).unwrap();
        let audio = to_host(&sample.audio).unwrap();
        assert_eq!(audio.len(), 256);
        assert!(audio[100..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_head_crop_is_deterministic() {
        let options = MelDatasetConfig {
            split: true,
            ..MelDatasetConfig::validation()
        };
        let ds = dataset(options, FlakyDecoder::new(0, 1000, 8000));

        let a = ds.get(0, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = ds.get(0, &mut StdRng::seed_from_u64(2)).unwrap();
        assert_eq!(to_host(&a.audio).unwrap(), to_host(&b.audio).unwrap());
    }

    #[test]
    fn test_unsplit_clip_is_trimmed_to_hops() {
        let ds = dataset(MelDatasetConfig::validation(), FlakyDecoder::new(0, 1000, 8000));
        let sample = ds.get(2, &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(sample.audio.shape(), &[992]);
        assert_eq!(sample.mel.shape(), &[8, 62]);
    }

    #[test]
    fn test_other_rate_is_resampled_to_segment() {
        let ds = dataset(MelDatasetConfig::training(7), FlakyDecoder::new(0, 4000, 16000));
        let sample = ds.get(0, &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(sample.audio.shape(), &[256]);
    }

    #[test]
    fn test_decode_failure_is_retried() {
        let ds = dataset(MelDatasetConfig::training(7), FlakyDecoder::new(1, 1000, 8000));
        let sample = ds.get(0, &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(sample.audio.shape(), &[256]);
        assert_eq!(ds.decoder.calls(), 2);
    }

    #[test]
    fn test_retries_are_bounded() {
        let options = MelDatasetConfig {
            max_retries: 3,
            ..MelDatasetConfig::training(7)
        };
        let ds = dataset(options, FlakyDecoder::new(usize::MAX, 1000, 8000));
        let err = ds.get(0, &mut StdRng::seed_from_u64(0)).unwrap_err();

        assert!(matches!(err, VocoderError::RetriesExhausted { attempts: 4, .. }));
        assert!(err.is_decode());
        assert_eq!(ds.decoder.calls(), 4);
    }

    #[test]
    fn test_fine_tuning_propagates_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let options = MelDatasetConfig::training(7).with_fine_tuning(dir.path());
        let ds = dataset(options, FlakyDecoder::new(1, 1000, 8000));

        let err = ds.get(0, &mut StdRng::seed_from_u64(0)).unwrap_err();
        assert!(matches!(err, VocoderError::AudioDecode { .. }));
        assert_eq!(ds.decoder.calls(), 1);
    }

    /// Audio sample `i` is `frame(i) / 100`; mel value at `(c, t)` is `t`.
    struct RampDecoder(usize);

    impl AudioDecoder for RampDecoder {
        fn decode(&self, _path: &Path) -> Result<DecodedAudio> {
            Ok(DecodedAudio {
                samples: (0..self.0).map(|i| (i / 16) as f32 / 100.0).collect(),
                sample_rate: 8000,
            })
        }
    }

    #[test]
    fn test_fine_tuning_keeps_mel_and_audio_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let frames = 40;
        let mel: Vec<f32> = (0..8 * frames).map(|i| (i % frames) as f32).collect();
        for i in 0..4 {
            crate::npy::write_npy(dir.path().join(format!("{i}.npy")), &[8, frames], &mel)
                .unwrap();
        }

        let options = MelDatasetConfig::training(7).with_fine_tuning(dir.path());
        let ds = dataset(options, RampDecoder(frames * 16));

        for seed in 0..5 {
            let sample = ds.get(3, &mut StdRng::seed_from_u64(seed)).unwrap();
            assert_eq!(sample.mel.shape(), &[8, 16]);
            assert_eq!(sample.audio.shape(), &[256]);

            let mel = to_host(&sample.mel).unwrap();
            let audio = to_host(&sample.audio).unwrap();
            assert!(mel[0] <= (frames - 17) as f32);
            assert!((audio[0] * 100.0 - mel[0]).abs() < 1e-4);
            assert!((audio[255] * 100.0 - mel[15]).abs() < 1e-4);
        }
    }

    #[test]
    fn test_fine_tuning_rejects_other_rate() {
        let dir = tempfile::tempdir().unwrap();
        let options = MelDatasetConfig::training(7).with_fine_tuning(dir.path());
        let ds = dataset(options, FlakyDecoder::new(0, 1000, 16000));
        assert!(matches!(
            ds.get(0, &mut StdRng::seed_from_u64(0)),
            Err(VocoderError::Config(_))
        ));
    }

    #[test]
    fn test_shape_mismatch_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..4 {
            crate::npy::write_npy(dir.path().join(format!("{i}.npy")), &[8, 10], &[0.0; 80])
                .unwrap();
        }
        let options = MelDatasetConfig::validation().with_fine_tuning(dir.path());
        let ds = dataset(options, RampDecoder(1000));
        assert!(matches!(
            ds.get(0, &mut StdRng::seed_from_u64(0)),
            Err(VocoderError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_shuffle_is_seeded() {
        let a = dataset(MelDatasetConfig::training(3), WavDecoder);
        let b = dataset(MelDatasetConfig::training(3), WavDecoder);
        assert_eq!(a.files(), b.files());

        let mut sorted = a.files().to_vec();
        sorted.sort();
        assert_eq!(sorted, files(4));

        let ordered = dataset(MelDatasetConfig::validation(), WavDecoder);
        assert_eq!(ordered.files(), files(4).as_slice());
    }

    #[test]
    fn test_construction_errors() {
        let empty = MelDataset::new(Vec::new(), &config(), MelDatasetConfig::default());
        assert!(matches!(empty, Err(VocoderError::Config(_))));

        let options = MelDatasetConfig {
            fine_tuning: true,
            ..Default::default()
        };
        assert!(MelDataset::new(files(1), &config(), options).is_err());
    }
}
