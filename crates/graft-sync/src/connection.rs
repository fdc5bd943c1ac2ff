//! Outbound half of a connection and its lifecycle.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::codec;
use crate::error::{Result, SyncError};
use crate::messages::{Frame, Message};

/// Connection lifecycle. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Closing,
    Closed,
}

/// Owns the write side of the stream.
///
/// Every send runs the message's `after_send` hook once the frame has been
/// flushed. A write failure closes the connection.
pub struct Connection {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    state: ConnectionState,
    max_frame_size: usize,
    frames_sent: u64,
    /// Set when a `Finish` request has been flushed.
    transfer_written: bool,
}

impl Connection {
    pub fn new<W>(writer: W, max_frame_size: usize) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Box::new(writer),
            state: ConnectionState::Connecting,
            max_frame_size,
            frames_sent: 0,
            transfer_written: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Move from `Connecting` to `Connected`.
    pub fn mark_connected(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Connecting => {
                self.state = ConnectionState::Connected;
                Ok(())
            }
            ConnectionState::Connected => Ok(()),
            state => Err(SyncError::Connection(format!(
                "cannot connect from state {:?}",
                state
            ))),
        }
    }

    /// Record that the read side failed or ended; nothing more is sent.
    pub fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Whether a complete outgoing transfer (through `Finish`) was written.
    pub fn transfer_written(&self) -> bool {
        self.transfer_written
    }

    pub(crate) fn set_transfer_written(&mut self) {
        self.transfer_written = true;
    }

    /// Send a message as a request.
    pub async fn request(&mut self, message: Message) -> Result<()> {
        self.send(Frame::request(message)).await
    }

    /// Send a message as a response.
    pub async fn respond(&mut self, message: Message) -> Result<()> {
        self.send(Frame::response(message)).await
    }

    async fn send(&mut self, frame: Frame) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(SyncError::Connection(format!(
                "cannot send {} in state {:?}",
                frame.message.kind(),
                self.state
            )));
        }

        if let Err(e) = codec::write_frame(&mut self.writer, &frame, self.max_frame_size).await {
            self.state = ConnectionState::Closed;
            return Err(e);
        }
        self.frames_sent += 1;

        frame.message.after_send(self, frame.direction);
        Ok(())
    }

    /// Shut down the write side. Idempotent.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closing;
        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!(error = %e, "error shutting down stream");
        }
        self.state = ConnectionState::Closed;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("frames_sent", &self.frames_sent)
            .finish()
    }
}
