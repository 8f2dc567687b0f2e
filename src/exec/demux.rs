//! Channel demultiplexing for remote command streams.
//!
//! # Responsibilities
//! - Pull fragments from a duplex transport into one reusable buffer
//! - Read the channel index from the first byte of every message
//! - Skip per-channel preamble bytes on the first fragment of a channel
//! - Dispatch payload slices to a [`ChannelHandler`]
//!
//! # Wire Format
//! ```text
//! message  := channel:u8 payload*
//! fragment := up to buffer.len() bytes of a message, last one flagged
//!             end_of_message
//!
//! channel 1 = stdout, 2 = stderr, 3 = control (terminal Status JSON)
//! ```
//!
//! # Design Decisions
//! - One buffer per read call, no pooling; bounded by configuration
//! - The handler is awaited inline, so a slow consumer slows the reader
//! - Transport errors propagate unchanged, no retries

use std::collections::HashSet;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::exec::error::ExecError;

/// Channel index carried in the first byte of each message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelIndex(pub u8);

impl ChannelIndex {
    pub const STDIN: Self = Self(0);
    pub const STDOUT: Self = Self(1);
    pub const STDERR: Self = Self(2);
    pub const ERROR: Self = Self(3);
    pub const RESIZE: Self = Self(4);
}

impl std::fmt::Display for ChannelIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stream flavour; decides how many preamble bytes each channel carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    #[default]
    RemoteCommand,
    /// Port-forward streams prefix every channel with a 2 byte port number.
    PortForward,
}

impl StreamMode {
    pub fn leading_bytes(self) -> usize {
        match self {
            StreamMode::RemoteCommand => 0,
            StreamMode::PortForward => 2,
        }
    }
}

/// Result of one receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    /// Bytes written to the front of the buffer.
    pub len: usize,
    /// Last fragment of the current message.
    pub end_of_message: bool,
}

/// A duplex transport delivering channel-prefixed messages in fragments.
#[async_trait]
pub trait FrameSource: Send {
    /// Fill `buf` with the next fragment. `None` once the stream is closed.
    async fn receive(&mut self, buf: &mut [u8]) -> Result<Option<Fragment>, ExecError>;

    /// Human readable transport state for diagnostics.
    fn state(&self) -> String {
        "unknown".to_string()
    }
}

/// Consumer of demultiplexed payload.
#[async_trait]
pub trait ChannelHandler: Send {
    async fn on_data(&mut self, channel: ChannelIndex, data: &[u8]) -> Result<(), ExecError>;
}

/// Decodes a [`FrameSource`] into per-channel payload.
#[derive(Debug, Clone, Copy)]
pub struct Demultiplexer {
    mode: StreamMode,
    buffer_size: usize,
}

impl Demultiplexer {
    pub fn new(mode: StreamMode, buffer_size: usize) -> Self {
        Self {
            mode,
            buffer_size: buffer_size.max(2),
        }
    }

    /// Read until the source closes, dispatching every payload fragment.
    pub async fn read<S, H>(
        &self,
        source: &mut S,
        handler: &mut H,
        cancel: &CancellationToken,
    ) -> Result<(), ExecError>
    where
        S: FrameSource + ?Sized,
        H: ChannelHandler + ?Sized,
    {
        let mut buffer = vec![0u8; self.buffer_size];
        let mut skipped: HashSet<u8> = HashSet::new();

        while let Some(first) = receive(source, &mut buffer, cancel).await? {
            if first.len < 2 {
                if !first.end_of_message {
                    drain_message(source, &mut buffer, cancel).await?;
                }
                continue;
            }

            let channel = buffer[0];
            let mut fragment = first;
            let mut offset = 1;

            loop {
                let skip = if skipped.insert(channel) {
                    self.mode.leading_bytes()
                } else {
                    0
                };

                // A fragment no longer than the preamble is dropped whole.
                let available = fragment.len - offset;
                if skip < available {
                    let start = offset + skip;
                    handler
                        .on_data(ChannelIndex(channel), &buffer[start..fragment.len])
                        .await?;
                }

                if fragment.end_of_message {
                    break;
                }

                offset = 0;
                fragment = match receive(source, &mut buffer, cancel).await? {
                    Some(next) => next,
                    None => return Ok(()),
                };
            }
        }

        Ok(())
    }
}

async fn receive<S>(
    source: &mut S,
    buffer: &mut [u8],
    cancel: &CancellationToken,
) -> Result<Option<Fragment>, ExecError>
where
    S: FrameSource + ?Sized,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(ExecError::Cancelled),
        fragment = source.receive(buffer) => fragment,
    }
}

async fn drain_message<S>(
    source: &mut S,
    buffer: &mut [u8],
    cancel: &CancellationToken,
) -> Result<(), ExecError>
where
    S: FrameSource + ?Sized,
{
    while let Some(fragment) = receive(source, buffer, cancel).await? {
        if fragment.end_of_message {
            break;
        }
    }
    Ok(())
}

/// Adapts a stream of whole messages into buffer-sized fragments.
pub struct MessageFrames {
    messages: BoxStream<'static, Result<Bytes, ExecError>>,
    pending: Option<Bytes>,
    closed: bool,
}

impl MessageFrames {
    pub fn new(messages: BoxStream<'static, Result<Bytes, ExecError>>) -> Self {
        Self {
            messages,
            pending: None,
            closed: false,
        }
    }
}

#[async_trait]
impl FrameSource for MessageFrames {
    async fn receive(&mut self, buf: &mut [u8]) -> Result<Option<Fragment>, ExecError> {
        let mut message = match self.pending.take() {
            Some(rest) => rest,
            None => match self.messages.next().await {
                Some(message) => message?,
                None => {
                    self.closed = true;
                    return Ok(None);
                }
            },
        };

        let len = message.len().min(buf.len());
        buf[..len].copy_from_slice(&message[..len]);
        let rest = message.split_off(len);
        let end_of_message = rest.is_empty();
        if !end_of_message {
            self.pending = Some(rest);
        }

        Ok(Some(Fragment {
            len,
            end_of_message,
        }))
    }

    fn state(&self) -> String {
        if self.closed { "closed" } else { "open" }.to_string()
    }
}
