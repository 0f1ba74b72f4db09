//! Message framing for the session channel.
//!
//! The server speaks WebSocket on its `http` port; every envelope travels as
//! one JSON text frame. [`MessageReader`] and [`MessageWriter`] are the two
//! halves of a [`WebSocketStream`], reading and writing one envelope at a
//! time.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message};

/// Maximum envelope size (16 MiB); completion and symbol search replies get large.
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("websocket failed: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("message of {len} bytes exceeds maximum {MAX_MESSAGE_BYTES}")]
    TooLarge { len: usize },
    #[error("message body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Split an open websocket into its envelope reader and writer.
pub fn split<S>(ws: WebSocketStream<S>) -> (MessageReader<S>, MessageWriter<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (sink, stream) = ws.split();
    (MessageReader { stream }, MessageWriter { sink })
}

/// Reads JSON envelopes from the receiving half of a websocket.
pub struct MessageReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> MessageReader<S> {
    /// Read the next envelope.
    ///
    /// Returns `Ok(None)` once the peer closes the socket. Control frames are
    /// skipped.
    pub async fn read_message(&mut self) -> Result<Option<serde_json::Value>, CodecError> {
        loop {
            let message = match self.stream.next().await {
                None
                | Some(Err(
                    tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
                )) => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(message)) => message,
            };

            match message {
                Message::Text(text) => {
                    check_size(text.len())?;
                    return Ok(Some(serde_json::from_str(&text)?));
                }
                Message::Binary(bytes) => {
                    check_size(bytes.len())?;
                    return Ok(Some(serde_json::from_slice(&bytes)?));
                }
                Message::Close(_) => return Ok(None),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}

fn check_size(len: usize) -> Result<(), CodecError> {
    if len > MAX_MESSAGE_BYTES {
        return Err(CodecError::TooLarge { len });
    }
    Ok(())
}

/// Writes JSON envelopes to the sending half of a websocket.
pub struct MessageWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> MessageWriter<S> {
    /// Write one envelope as a text frame and flush it.
    pub async fn write_message(&mut self, msg: &serde_json::Value) -> Result<(), CodecError> {
        let body = serde_json::to_string(msg)?;
        self.sink.send(Message::text(body)).await?;
        Ok(())
    }

    /// Send a close frame so the peer sees the end of the stream.
    pub async fn shutdown(&mut self) -> Result<(), CodecError> {
        self.sink.close().await?;
        Ok(())
    }
}
