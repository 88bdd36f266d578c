//! Training checkpoint naming, selection and save/load.
//!
//! Checkpoints are single files named `<prefix><step>` with the step
//! zero-padded to eight digits (`g_00012000`). Only the parameter map is
//! stored here; optimizer state belongs to the training loop.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use bigvgan_vocoder::nn::StateDict;
use bigvgan_vocoder::Result;
use mlx_rs::Array;

/// Prefix of generator checkpoints.
pub const GENERATOR_PREFIX: &str = "g_";

/// Prefix of discriminator (and optimizer) checkpoints.
pub const DISCRIMINATOR_PREFIX: &str = "do_";

/// Digits in the step suffix.
pub const STEP_DIGITS: usize = 8;

/// `<prefix><step>` with the step zero-padded to [`STEP_DIGITS`].
pub fn checkpoint_name(prefix: &str, step: u64) -> String {
    format!("{prefix}{step:0width$}", width = STEP_DIGITS)
}

/// Step encoded in `name`, if it is exactly `prefix` plus eight digits.
pub fn checkpoint_step(name: &str, prefix: &str) -> Option<u64> {
    let suffix = name.strip_prefix(prefix)?;
    if suffix.len() != STEP_DIGITS || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Select the checkpoint to resume from.
///
/// `renamed_file`, when given and present in `dir`, is returned regardless
/// of any numbered checkpoints. Otherwise the highest-numbered
/// `<prefix><step>` file wins. `Ok(None)` means a fresh start, including
/// when `dir` does not exist.
pub fn scan_checkpoint(
    dir: impl AsRef<Path>,
    prefix: &str,
    renamed_file: Option<&str>,
) -> Result<Option<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Ok(None);
    }

    if let Some(renamed) = renamed_file {
        let path = dir.join(renamed);
        if path.is_file() {
            tracing::info!("Resuming from renamed checkpoint {:?}", path);
            return Ok(Some(path));
        }
    }

    let latest = list_checkpoints(dir, prefix)?.pop().map(|(_, path)| path);
    match &latest {
        Some(path) => tracing::info!("Resuming from checkpoint {:?}", path),
        None => tracing::info!("No {prefix} checkpoint in {:?}", dir),
    }
    Ok(latest)
}

/// Numbered checkpoints in `dir`, oldest first.
pub fn list_checkpoints(dir: impl AsRef<Path>, prefix: &str) -> Result<Vec<(u64, PathBuf)>> {
    let mut checkpoints: Vec<(u64, PathBuf)> = fs::read_dir(dir.as_ref())?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            let step = checkpoint_step(&name, prefix)?;
            Some((step, entry.path()))
        })
        .collect();

    checkpoints.sort_by_key(|(step, _)| *step);
    Ok(checkpoints)
}

/// Parameters read back from a checkpoint file.
#[derive(Debug)]
pub struct Checkpoint {
    /// Step parsed from the file name; `None` for renamed files.
    pub step: Option<u64>,
    /// Parameter map.
    pub params: HashMap<Rc<str>, Array>,
}

/// Write `params` to `<dir>/<prefix><step>`, creating `dir` if needed.
pub fn save_checkpoint(
    dir: impl AsRef<Path>,
    prefix: &str,
    step: u64,
    params: &HashMap<Rc<str>, Array>,
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let path = dir.join(checkpoint_name(prefix, step));
    Array::save_safetensors(params.clone(), None, &path)?;

    tracing::info!("Saved checkpoint at step {} to {:?}", step, path);
    Ok(path)
}

/// Read a checkpoint written by [`save_checkpoint`] (or a renamed copy).
pub fn load_checkpoint(path: impl AsRef<Path>) -> Result<Checkpoint> {
    let path = path.as_ref();
    let params: HashMap<Rc<str>, Array> = Array::load_safetensors(path)?
        .into_iter()
        .map(|(k, v)| (Rc::from(k.as_str()), v))
        .collect();

    let step = path
        .file_name()
        .map(|name| name.to_string_lossy())
        .and_then(|name| {
            let prefix = name.trim_end_matches(|c: char| c.is_ascii_digit());
            checkpoint_step(&name, prefix)
        });

    tracing::info!(
        "Loaded checkpoint {:?} ({} tensors, step {:?})",
        path,
        params.len(),
        step
    );
    Ok(Checkpoint { step, params })
}

/// Snapshot a model's parameters.
pub fn save_model(
    model: &impl StateDict,
    dir: impl AsRef<Path>,
    prefix: &str,
    step: u64,
) -> Result<PathBuf> {
    save_checkpoint(dir, prefix, step, &model.state_dict())
}

/// Restore a model from the checkpoint `scan_checkpoint` selects.
///
/// Returns `Ok(None)` when there is nothing to resume from, otherwise the
/// step of the restored checkpoint (`Some(None)` for a renamed file).
pub fn resume_model(
    model: &mut impl StateDict,
    dir: impl AsRef<Path>,
    prefix: &str,
    renamed_file: Option<&str>,
) -> Result<Option<Option<u64>>> {
    let Some(path) = scan_checkpoint(dir, prefix, renamed_file)? else {
        return Ok(None);
    };
    let checkpoint = load_checkpoint(&path)?;
    model.load_state_dict_from("", &checkpoint.params)?;
    Ok(Some(checkpoint.step))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn params(value: f32) -> HashMap<Rc<str>, Array> {
        let mut params = HashMap::new();
        params.insert(Rc::from("w"), Array::from_slice(&[value, value], &[2]));
        params
    }

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn test_checkpoint_name() {
        assert_eq!(checkpoint_name("g_", 2500), "g_00002500");
        assert_eq!(checkpoint_name("do_", 0), "do_00000000");
    }

    #[test]
    fn test_checkpoint_step() {
        assert_eq!(checkpoint_step("g_00000042", "g_"), Some(42));
        assert_eq!(checkpoint_step("g_42", "g_"), None);
        assert_eq!(checkpoint_step("g_0000004a", "g_"), None);
        assert_eq!(checkpoint_step("do_00000042", "g_"), None);
        assert_eq!(checkpoint_step("g_00000042.json", "g_"), None);
    }

    #[test]
    fn test_scan_picks_highest_step() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["g_00000001", "g_00000003", "g_00000002", "do_00000009"] {
            touch(temp_dir.path(), name);
        }

        let latest = scan_checkpoint(temp_dir.path(), "g_", None).unwrap();
        assert_eq!(latest, Some(temp_dir.path().join("g_00000003")));
    }

    #[test]
    fn test_scan_empty_dir_is_none() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(scan_checkpoint(temp_dir.path(), "g_", None).unwrap(), None);
        assert_eq!(
            scan_checkpoint(temp_dir.path().join("missing"), "g_", Some("g_best")).unwrap(),
            None
        );
    }

    #[test]
    fn test_renamed_file_wins() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["g_00000001", "g_00000002", "g_00000003", "bigvgan_generator.pt"] {
            touch(temp_dir.path(), name);
        }

        let selected =
            scan_checkpoint(temp_dir.path(), "g_", Some("bigvgan_generator.pt")).unwrap();
        assert_eq!(selected, Some(temp_dir.path().join("bigvgan_generator.pt")));

        // An absent override falls back to the numbered files.
        let selected = scan_checkpoint(temp_dir.path(), "g_", Some("absent.pt")).unwrap();
        assert_eq!(selected, Some(temp_dir.path().join("g_00000003")));
    }

    #[test]
    fn test_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = save_checkpoint(temp_dir.path().join("ckpt"), "g_", 50, &params(1.5)).unwrap();
        assert_eq!(path.file_name().unwrap(), "g_00000050");

        let checkpoint = load_checkpoint(&path).unwrap();
        assert_eq!(checkpoint.step, Some(50));
        let w = &checkpoint.params["w"];
        w.eval().unwrap();
        assert_eq!(w.as_slice::<f32>(), &[1.5, 1.5]);
    }

    #[test]
    fn test_list_checkpoints_sorted() {
        let temp_dir = TempDir::new().unwrap();
        for step in [30, 10, 20] {
            save_checkpoint(temp_dir.path(), "do_", step, &params(step as f32)).unwrap();
        }
        let steps: Vec<u64> = list_checkpoints(temp_dir.path(), "do_")
            .unwrap()
            .iter()
            .map(|(s, _)| *s)
            .collect();
        assert_eq!(steps, vec![10, 20, 30]);
    }
}
