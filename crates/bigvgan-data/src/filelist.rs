//! Transcript filelists.
//!
//! Each non-empty line is `<id>|<text>...`; the identifier names
//! `<root>/<id>.wav`.

use std::path::{Path, PathBuf};

use bigvgan_vocoder::{Result, VocoderError};

/// Extension appended to every identifier.
pub const AUDIO_EXTENSION: &str = "wav";

/// Resolve every identifier in `contents` against `root`, in file order.
pub fn parse_filelist(contents: &str, root: &Path) -> Vec<PathBuf> {
    contents
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(|line| {
            let id = line.split('|').next().unwrap_or(line);
            root.join(format!("{id}.{AUDIO_EXTENSION}"))
        })
        .collect()
}

/// Read and resolve one filelist.
pub fn read_filelist(filelist: impl AsRef<Path>, root: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let contents = std::fs::read_to_string(filelist.as_ref())?;
    Ok(parse_filelist(&contents, root.as_ref()))
}

/// Where the training, validation and unseen validation lists live.
#[derive(Debug, Clone, Default)]
pub struct FilelistConfig {
    /// Directory holding the training and validation audio.
    pub wavs_dir: PathBuf,
    /// Training transcript.
    pub training_file: PathBuf,
    /// Validation transcript.
    pub validation_file: PathBuf,
    /// Transcripts of the out-of-distribution validation sets.
    pub unseen_files: Vec<PathBuf>,
    /// Audio directory of each unseen set, paired by position.
    pub unseen_wavs_dirs: Vec<PathBuf>,
}

/// Resolved audio paths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetFilelist {
    /// Training audio.
    pub training: Vec<PathBuf>,
    /// Validation audio.
    pub validation: Vec<PathBuf>,
    /// One list per unseen validation set.
    pub unseen: Vec<Vec<PathBuf>>,
}

/// Build the training, validation and unseen lists.
pub fn get_dataset_filelist(config: &FilelistConfig) -> Result<DatasetFilelist> {
    if config.unseen_files.len() != config.unseen_wavs_dirs.len() {
        return Err(VocoderError::Config(format!(
            "{} unseen filelists but {} unseen audio directories",
            config.unseen_files.len(),
            config.unseen_wavs_dirs.len()
        )));
    }

    let training = read_filelist(&config.training_file, &config.wavs_dir)?;
    let validation = read_filelist(&config.validation_file, &config.wavs_dir)?;
    let unseen = config
        .unseen_files
        .iter()
        .zip(&config.unseen_wavs_dirs)
        .map(|(file, dir)| read_filelist(file, dir))
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!(
        "Filelists: {} training, {} validation, {} unseen sets",
        training.len(),
        validation.len(),
        unseen.len()
    );

    Ok(DatasetFilelist {
        training,
        validation,
        unseen,
    })
}
