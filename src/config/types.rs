use recmux_mp4::writer::DEFAULT_FRAGMENT_DURATION_SECS;
use recmux_mp4::{MuxerConfig, Result};
use serde::{Deserialize, Serialize};

use crate::encoder::{
    channel_encoder, ChannelEncoder, EncoderConfig, EncoderHandle, DEFAULT_BATCH_SIZE,
    DEFAULT_CHANNEL_CAPACITY,
};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub muxer: MuxerSection,

    #[serde(default)]
    pub encoder: EncoderSection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MuxerSection {
    /// Target duration of one fragment in seconds
    #[serde(default = "default_fragment_duration")]
    pub fragment_duration_secs: u32,
}

fn default_fragment_duration() -> u32 {
    DEFAULT_FRAGMENT_DURATION_SECS
}

impl Default for MuxerSection {
    fn default() -> Self {
        Self {
            fragment_duration_secs: default_fragment_duration(),
        }
    }
}

impl MuxerSection {
    pub fn muxer_config(&self) -> MuxerConfig {
        MuxerConfig {
            fragment_duration_secs: self.fragment_duration_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EncoderSection {
    /// Maximum frames forwarded to the muxer per pull
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Depth of the queue between an encoder thread and the muxer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl Default for EncoderSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl EncoderSection {
    /// Queue-backed encoder pair sized by this section.
    pub fn channel_encoder(
        &self,
        config: EncoderConfig,
    ) -> Result<(EncoderHandle, ChannelEncoder)> {
        channel_encoder(config, self.channel_capacity, self.batch_size)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// `tracing-subscriber` filter directive, used when RUST_LOG is unset
    #[serde(default)]
    pub filter: Option<String>,
}
