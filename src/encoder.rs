//! Track encoder collaborators.
//!
//! The muxing core never encodes anything itself. It pulls already
//! compressed frames from one [`TrackEncoder`] per track. Encoders run on
//! their own threads or tasks and hand frames over through a bounded queue
//! (see [`channel_encoder`]), so every wait happens on the encoder side.

use async_trait::async_trait;
use recmux_mp4::{
    AudioMetadata, EncodedFrame, Error, Result, TrackKind, TrackMetadata, VideoMetadata,
};
use std::collections::VecDeque;
use tokio::sync::mpsc::{self, error::TryRecvError};

/// Default number of frames returned by one pull.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Default depth of the encoder queue.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Source of compressed frames for one track.
#[async_trait]
pub trait TrackEncoder: Send {
    /// Wait until the encoder is ready and report its track metadata.
    ///
    /// Fails with [`Error::Cancelled`] when the encoder is canceled first.
    async fn metadata(&mut self) -> Result<TrackMetadata>;

    /// Pull the next batch of frames.
    ///
    /// May wait for the encoder to produce data. Returns an empty batch once
    /// the stream is complete.
    async fn encoded_track(&mut self) -> Result<Vec<EncodedFrame>>;

    /// Whether the final frame of the stream has been handed out.
    fn is_complete(&self) -> bool;
}

/// Encoder parameters checked when an encoder is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderConfig {
    Audio(AudioMetadata),
    Video(VideoMetadata),
}

impl EncoderConfig {
    pub fn kind(&self) -> TrackKind {
        self.metadata().kind()
    }

    /// Metadata the encoder reports once it is ready.
    pub fn metadata(&self) -> TrackMetadata {
        match *self {
            Self::Audio(audio) => TrackMetadata::Audio(audio),
            Self::Video(video) => TrackMetadata::Video(video),
        }
    }

    /// Reject invalid dimensions, rates and channel counts.
    pub fn validate(&self) -> Result<()> {
        self.metadata().validate()
    }
}

#[derive(Debug)]
enum Message {
    Ready,
    Frame(EncodedFrame),
    EndOfStream,
    Cancel,
}

/// Create a queue-backed encoder pair.
///
/// The [`EncoderHandle`] goes to whatever thread or task produces frames;
/// the [`ChannelEncoder`] is handed to the orchestrator. At most `batch`
/// frames are returned per pull.
pub fn channel_encoder(
    config: EncoderConfig,
    capacity: usize,
    batch: usize,
) -> Result<(EncoderHandle, ChannelEncoder)> {
    config.validate()?;
    if capacity == 0 {
        return Err(Error::config("encoder channel capacity cannot be 0"));
    }
    if batch == 0 {
        return Err(Error::config("encoder batch size cannot be 0"));
    }

    let (tx, rx) = mpsc::channel(capacity);
    let handle = EncoderHandle {
        kind: config.kind(),
        tx,
    };
    let encoder = ChannelEncoder {
        metadata: config.metadata(),
        rx,
        batch,
        ready: false,
        complete: false,
        pending: VecDeque::new(),
    };
    Ok((handle, encoder))
}

/// Producer side of a [`ChannelEncoder`].
#[derive(Debug, Clone)]
pub struct EncoderHandle {
    kind: TrackKind,
    tx: mpsc::Sender<Message>,
}

impl EncoderHandle {
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    async fn send(&self, message: Message) -> Result<()> {
        self.tx.send(message).await.map_err(|_| Error::Cancelled)
    }

    fn blocking_send(&self, message: Message) -> Result<()> {
        self.tx.blocking_send(message).map_err(|_| Error::Cancelled)
    }

    /// Signal that the encoder is configured and its metadata is final.
    pub async fn ready(&self) -> Result<()> {
        self.send(Message::Ready).await
    }

    /// Queue one frame, waiting while the queue is full.
    pub async fn push(&self, frame: EncodedFrame) -> Result<()> {
        self.send(Message::Frame(frame)).await
    }

    /// Mark the end of the stream.
    pub async fn finish(&self) -> Result<()> {
        self.send(Message::EndOfStream).await
    }

    /// Cancel the stream; the next pull fails with [`Error::Cancelled`].
    pub async fn cancel(&self) -> Result<()> {
        self.send(Message::Cancel).await
    }

    /// [`ready`](Self::ready) for use outside the async runtime.
    pub fn blocking_ready(&self) -> Result<()> {
        self.blocking_send(Message::Ready)
    }

    pub fn blocking_push(&self, frame: EncodedFrame) -> Result<()> {
        self.blocking_send(Message::Frame(frame))
    }

    pub fn blocking_finish(&self) -> Result<()> {
        self.blocking_send(Message::EndOfStream)
    }

    pub fn blocking_cancel(&self) -> Result<()> {
        self.blocking_send(Message::Cancel)
    }
}

/// Consumer side of the encoder queue.
#[derive(Debug)]
pub struct ChannelEncoder {
    metadata: TrackMetadata,
    rx: mpsc::Receiver<Message>,
    batch: usize,
    ready: bool,
    complete: bool,
    /// Frames pushed before the ready signal.
    pending: VecDeque<EncodedFrame>,
}

impl ChannelEncoder {
    pub fn kind(&self) -> TrackKind {
        self.metadata.kind()
    }

    fn accept(&mut self, message: Option<Message>, frames: &mut Vec<EncodedFrame>) -> Result<()> {
        match message {
            Some(Message::Frame(frame)) => frames.push(frame),
            Some(Message::Ready) => self.ready = true,
            Some(Message::EndOfStream) => {
                tracing::debug!(track = %self.kind(), "Encoder stream complete");
                self.complete = true;
            }
            Some(Message::Cancel) => {
                tracing::warn!(track = %self.kind(), "Encoder canceled");
                return Err(Error::Cancelled);
            }
            None => {
                tracing::warn!(track = %self.kind(), "Encoder queue closed before end of stream");
                return Err(Error::Cancelled);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TrackEncoder for ChannelEncoder {
    async fn metadata(&mut self) -> Result<TrackMetadata> {
        while !self.ready {
            match self.rx.recv().await {
                Some(Message::Frame(frame)) => self.pending.push_back(frame),
                Some(Message::EndOfStream) => {
                    return Err(Error::metadata(format!(
                        "{} encoder ended before reporting metadata",
                        self.kind()
                    )));
                }
                message => {
                    let mut ignored = Vec::new();
                    self.accept(message, &mut ignored)?;
                }
            }
        }
        Ok(self.metadata)
    }

    async fn encoded_track(&mut self) -> Result<Vec<EncodedFrame>> {
        if self.complete {
            return Ok(Vec::new());
        }

        let mut frames: Vec<EncodedFrame> = self.pending.drain(..).collect();
        if frames.is_empty() {
            let message = self.rx.recv().await;
            self.accept(message, &mut frames)?;
        }
        while frames.len() < self.batch && !self.complete {
            match self.rx.try_recv() {
                Ok(message) => self.accept(Some(message), &mut frames)?,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.accept(None, &mut frames)?,
            }
        }
        Ok(frames)
    }

    fn is_complete(&self) -> bool {
        self.complete
    }
}
