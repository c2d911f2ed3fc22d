// Startup checks and the startup contract of the assembled bird

use std::path::Path;
use std::sync::Arc;

use squawker::audio::{PacedSink, WavFileSource};
use squawker::file_manager::AssetError;
use squawker::hardware::{MotorChannel, SwitchSensor};
use squawker::motion::EyeState;
use squawker::simulator::{SimBird, SimMotorDriver};
use squawker::{Config, Squawker, SquawkerError};

fn write_wav(path: &Path, bits_per_sample: u16) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for _ in 0..800 {
        match bits_per_sample {
            8 => writer.write_sample(0i8).unwrap(),
            _ => writer.write_sample(0i16).unwrap(),
        }
    }
    writer.finalize().unwrap();
}

async fn squawker_for(dir: &Path, bird: &SimBird) -> Result<Squawker, SquawkerError> {
    Squawker::new(
        Config::default(),
        dir,
        bird.context(),
        Arc::new(WavFileSource),
        Arc::new(PacedSink),
    )
    .await
}

#[tokio::test]
async fn test_missing_sound_directory_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let bird = SimBird::new(Arc::new(SimMotorDriver::new()));
    let err = squawker_for(&dir.path().join("nowhere"), &bird).await.err().unwrap();
    assert!(matches!(err, SquawkerError::Assets(AssetError::Missing(_))));
}

#[tokio::test]
async fn test_eight_bit_asset_fails_before_hardware() {
    let dir = tempfile::tempdir().unwrap();
    write_wav(&dir.path().join("good.wav"), 16);
    write_wav(&dir.path().join("tinny.wav"), 8);
    let driver = Arc::new(SimMotorDriver::new());
    let bird = SimBird::new(driver.clone());

    let err = squawker_for(dir.path(), &bird).await.err().unwrap();
    assert!(matches!(err, SquawkerError::Audio(_)));
    assert!(driver.commands().iter().all(|c| c.throttle == 0.0));
}

#[tokio::test]
async fn test_invalid_config_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write_wav(&dir.path().join("good.wav"), 16);
    let bird = SimBird::new(Arc::new(SimMotorDriver::new()));
    let mut config = Config::default();
    config.audio.threshold_low = 20.0;

    let err = Squawker::new(config, dir.path(), bird.context(), Arc::new(WavFileSource), Arc::new(PacedSink))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SquawkerError::Config(_)));
}

#[tokio::test]
async fn test_start_homes_body_and_opens_eyes() {
    let dir = tempfile::tempdir().unwrap();
    write_wav(&dir.path().join("good.wav"), 16);
    let driver = Arc::new(SimMotorDriver::new());
    let bird = SimBird::with_phases(driver.clone(), 120.0, 12.0);
    let squawker = squawker_for(dir.path(), &bird).await.unwrap();

    tokio::time::pause();
    let mechanism = bird.spawn();
    squawker.start().await.unwrap();
    mechanism.abort();

    let ctx = bird.context();
    assert_eq!(ctx.body_position(), 0);
    assert!(bird.body_home().read());
    assert_eq!(
        EyeState::from_switches(bird.left_eye().read(), bird.right_eye().read()),
        EyeState::Open
    );

    squawker.kill_motors();
    assert_eq!(driver.throttle(MotorChannel::Body), 0.0);
    assert_eq!(driver.throttle(MotorChannel::EyeBeak), 0.0);
    assert_eq!(driver.release_count(), 1);
}
