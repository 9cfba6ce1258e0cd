//! Message ports: the bidirectional channel to the supervisor.

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout},
    sync::mpsc,
};
use tracing::warn;

use super::BridgeError;
use crate::protocol::{parse_envelope, to_json_line, DecodeError, Envelope};

/// A typed, bidirectional envelope channel
///
/// `recv` must be cancel-safe: the bridge races it against outbound events.
#[async_trait]
pub trait MessagePort: Send {
    async fn send(&mut self, envelope: Envelope) -> Result<(), BridgeError>;

    /// `None` once the peer side has gone away; a malformed frame yields
    /// `Some(Err(_))` and leaves the port usable
    async fn recv(&mut self) -> Option<Result<Envelope, DecodeError>>;
}

/// In-process port backed by a pair of tokio channels
pub struct ChannelPort {
    tx: mpsc::Sender<Envelope>,
    rx: mpsc::Receiver<Envelope>,
}

impl ChannelPort {
    /// Two connected ends; what one sends the other receives
    pub fn pair(buffer: usize) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(buffer.max(1));
        let (b_tx, b_rx) = mpsc::channel(buffer.max(1));
        (Self { tx: a_tx, rx: b_rx }, Self { tx: b_tx, rx: a_rx })
    }
}

#[async_trait]
impl MessagePort for ChannelPort {
    async fn send(&mut self, envelope: Envelope) -> Result<(), BridgeError> {
        self.tx.send(envelope).await.map_err(|_| BridgeError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<Envelope, DecodeError>> {
        self.rx.recv().await.map(Ok)
    }
}

/// Newline-delimited JSON over a byte stream
pub struct LinePort<R, W> {
    reader: BufReader<R>,
    writer: W,
    /// Bytes of the frame being read; survives a cancelled `recv`
    frame: Vec<u8>,
}

impl<R, W> LinePort<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader: BufReader::new(reader), writer, frame: Vec::new() }
    }
}

impl LinePort<Stdin, Stdout> {
    /// Port over the process's standard input and output
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

#[async_trait]
impl<R, W> MessagePort for LinePort<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, envelope: Envelope) -> Result<(), BridgeError> {
        let mut line = to_json_line(&envelope)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Envelope, DecodeError>> {
        loop {
            match self.reader.read_until(b'\n', &mut self.frame).await {
                Ok(0) if self.frame.is_empty() => return None,
                Ok(_) => {
                    let frame = std::mem::take(&mut self.frame);
                    match decode_frame(&frame) {
                        Some(decoded) => return Some(decoded),
                        None => continue,
                    }
                },
                Err(e) => {
                    warn!("Message port read failed: {}", e);
                    return None;
                },
            }
        }
    }
}

/// `None` for a blank line
fn decode_frame(frame: &[u8]) -> Option<Result<Envelope, DecodeError>> {
    let text = match std::str::from_utf8(frame) {
        Ok(text) => text.trim(),
        Err(e) => return Some(Err(DecodeError::Envelope(format!("frame is not valid UTF-8: {e}")))),
    };
    if text.is_empty() {
        return None;
    }
    Some(parse_envelope(text))
}
