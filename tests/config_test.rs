//! Integration tests for configuration loading.

use recmux::config::{self, Config};
use recmux::{EncoderConfig, TrackEncoder};
use recmux_mp4::{AudioMetadata, EncodedFrame, FrameType};
use std::io::Write;
use std::time::Duration;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn defaults_without_sections() {
    let file = write_config("");
    let config = config::load_config(file.path()).unwrap();
    assert_eq!(config.muxer.fragment_duration_secs, 10);
    assert_eq!(config.encoder.batch_size, 32);
    assert_eq!(config.encoder.channel_capacity, 256);
    assert!(config.logging.filter.is_none());
}

#[test]
fn full_config_parses() {
    let file = write_config(
        r#"
[muxer]
fragment_duration_secs = 4

[encoder]
batch_size = 16
channel_capacity = 64

[logging]
filter = "recmux=debug"
"#,
    );
    let config = config::load_config(file.path()).unwrap();
    assert_eq!(config.muxer.fragment_duration_secs, 4);
    assert_eq!(config.muxer.muxer_config().fragment_duration_secs, 4);
    assert_eq!(config.encoder.batch_size, 16);
    assert_eq!(config.encoder.channel_capacity, 64);
    assert_eq!(config.logging.filter.as_deref(), Some("recmux=debug"));
}

#[test]
fn zero_fragment_duration_rejected() {
    let file = write_config("[muxer]\nfragment_duration_secs = 0\n");
    let err = config::load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("Fragment duration"));
}

#[test]
fn zero_batch_size_rejected() {
    let file = write_config("[encoder]\nbatch_size = 0\n");
    assert!(config::load_config(file.path()).is_err());
}

#[test]
fn malformed_toml_rejected() {
    let file = write_config("[muxer\nfragment_duration_secs = ");
    let err = config::load_config(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to parse config file"));
}

#[test]
fn explicit_path_wins() {
    let file = write_config("[muxer]\nfragment_duration_secs = 2\n");
    let config = config::load_config_or_default(Some(file.path())).unwrap();
    assert_eq!(config.muxer.fragment_duration_secs, 2);
}

#[test]
fn default_config_is_valid() {
    assert!(config::validate_config(&Config::default()).is_ok());
}

#[test]
fn zero_channel_capacity_rejected() {
    let file = write_config("[encoder]\nchannel_capacity = 0\n");
    assert!(config::load_config(file.path()).is_err());
}

#[tokio::test]
async fn encoder_section_sizes_channel_encoder() {
    let file = write_config("[encoder]\nbatch_size = 2\nchannel_capacity = 3\n");
    let config = config::load_config(file.path()).unwrap();
    let (handle, mut encoder) = config
        .encoder
        .channel_encoder(EncoderConfig::Audio(AudioMetadata::aac_lc(48000, 2)))
        .unwrap();

    handle.ready().await.unwrap();
    for i in 0..2 {
        let frame = EncodedFrame::new(vec![0x21], FrameType::AudioSample, i);
        handle.push(frame).await.unwrap();
    }
    // Ready plus two frames fill the queue
    let frame = EncodedFrame::new(vec![0x21], FrameType::AudioSample, 2);
    let blocked = tokio::time::timeout(Duration::from_millis(50), handle.push(frame)).await;
    assert!(blocked.is_err());

    encoder.metadata().await.unwrap();
    assert_eq!(encoder.encoded_track().await.unwrap().len(), 2);
}
