//! Save and resume generator and discriminator parameters by checkpoint name.

use bigvgan_trainer::{
    resume_model, save_model, scan_checkpoint, DISCRIMINATOR_PREFIX, GENERATOR_PREFIX,
};
use bigvgan_vocoder::discriminator::CombinedDiscriminator;
use bigvgan_vocoder::nn::StateDict;
use bigvgan_vocoder::{BigVGAN, BigVGANConfig};

fn tiny_config() -> BigVGANConfig {
    BigVGANConfig {
        num_mels: 8,
        upsample_rates: vec![4, 2],
        upsample_kernel_sizes: vec![8, 4],
        upsample_initial_channel: 16,
        resblock_kernel_sizes: vec![3],
        resblock_dilation_sizes: vec![vec![1, 3]],
        sampling_rate: 8000,
        n_fft: 32,
        hop_size: 8,
        win_size: 32,
        segment_size: 64,
        mpd_reshapes: vec![2],
        resolutions: vec![vec![64, 16, 64]],
        use_cqtd_instead_of_mrd: false,
        ..Default::default()
    }
}

fn host(model: &impl StateDict, key: &str) -> Vec<f32> {
    let params = model.state_dict();
    let value = &params[key];
    value.eval().unwrap();
    value.as_slice::<f32>().to_vec()
}

#[test]
fn fresh_directory_has_nothing_to_resume() {
    let dir = tempfile::tempdir().unwrap();
    let mut generator = BigVGAN::new(tiny_config()).unwrap();
    let resumed = resume_model(&mut generator, dir.path(), GENERATOR_PREFIX, None).unwrap();
    assert!(resumed.is_none());
}

#[test]
fn latest_generator_and_discriminator_are_restored() {
    let dir = tempfile::tempdir().unwrap();
    let config = tiny_config();

    let generator = BigVGAN::new(config.clone()).unwrap();
    let discriminator = CombinedDiscriminator::from_config(&config).unwrap();
    save_model(&BigVGAN::new(config.clone()).unwrap(), dir.path(), GENERATOR_PREFIX, 1000).unwrap();
    save_model(&generator, dir.path(), GENERATOR_PREFIX, 2000).unwrap();
    save_model(&discriminator, dir.path(), DISCRIMINATOR_PREFIX, 2000).unwrap();

    assert_eq!(
        scan_checkpoint(dir.path(), GENERATOR_PREFIX, None).unwrap(),
        Some(dir.path().join("g_00002000"))
    );

    let mut restored = BigVGAN::new(config.clone()).unwrap();
    let step = resume_model(&mut restored, dir.path(), GENERATOR_PREFIX, None).unwrap();
    assert_eq!(step, Some(Some(2000)));
    assert_eq!(
        host(&restored, "conv_pre.weight_v"),
        host(&generator, "conv_pre.weight_v")
    );

    let mut restored = CombinedDiscriminator::from_config(&config).unwrap();
    let step = resume_model(&mut restored, dir.path(), DISCRIMINATOR_PREFIX, None).unwrap();
    assert_eq!(step, Some(Some(2000)));
    let key = "mpd.discriminators.0.convs.0.weight_v";
    assert_eq!(host(&restored, key), host(&discriminator, key));
}
