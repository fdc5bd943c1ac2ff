//! Inbound half of a connection.
//!
//! The receiver is a tokio task that decodes one frame at a time from the
//! read side of the stream and pushes it into a bounded queue. It never
//! touches the store. When the queue is full, `send` waits, which stops the
//! task from reading, which in turn stops the peer once the transport's own
//! buffers fill up.

use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec;
use crate::error::SyncError;
use crate::messages::Frame;

/// An item in the inbound queue.
#[derive(Debug)]
pub enum Inbound {
    Frame(Frame),
    /// The stream failed; no further items follow.
    Failed(SyncError),
}

/// Handle to a running receiver task.
#[derive(Debug)]
pub struct Receiver {
    handle: JoinHandle<()>,
}

impl Receiver {
    /// Spawn a receiver over `reader`, returning the handle and the
    /// consuming end of the queue.
    ///
    /// The queue closes (yields `None`) after a clean end of stream or after
    /// an [`Inbound::Failed`] item.
    pub fn spawn<R>(
        reader: R,
        capacity: usize,
        max_frame_size: usize,
    ) -> (Self, mpsc::Receiver<Inbound>)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(receive_loop(reader, tx, max_frame_size));
        (Self { handle }, rx)
    }

    /// Whether the task has stopped reading.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop reading immediately.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn receive_loop<R>(mut reader: R, tx: mpsc::Sender<Inbound>, max_frame_size: usize)
where
    R: AsyncRead + Send + Unpin,
{
    loop {
        match codec::read_frame(&mut reader, max_frame_size).await {
            Ok(Some(frame)) => {
                tracing::trace!(kind = frame.message.kind(), "frame received");
                if tx.send(Inbound::Frame(frame)).await.is_err() {
                    tracing::debug!("inbound queue dropped, receiver stopping");
                    return;
                }
            }
            Ok(None) => {
                tracing::debug!("peer closed the stream");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "receive failed, closing connection");
                let _ = tx.send(Inbound::Failed(e)).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Message;
    use graft_core::NodeRef;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    const MAX: usize = 1024 * 1024;

    #[tokio::test]
    async fn test_full_queue_blocks_without_loss() {
        let (mut writer, reader) = tokio::io::duplex(64 * 1024);
        let (_receiver, mut queue) = Receiver::spawn(reader, 2, MAX);

        for i in 0..5 {
            let frame = Frame::request(Message::NodeData(NodeRef::new(format!("n{}", i), "Page")));
            codec::write_frame(&mut writer, &frame, MAX).await.unwrap();
        }

        // Give the receiver time to fill the queue and stall.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.len(), 2);

        let mut seen = Vec::new();
        for _ in 0..5 {
            match queue.recv().await {
                Some(Inbound::Frame(Frame {
                    message: Message::NodeData(node),
                    ..
                })) => seen.push(node.id.to_string()),
                other => panic!("unexpected inbound item: {:?}", other),
            }
        }
        assert_eq!(seen, vec!["n0", "n1", "n2", "n3", "n4"]);
    }

    #[tokio::test]
    async fn test_clean_eof_closes_queue() {
        let (writer, reader) = tokio::io::duplex(1024);
        let (receiver, mut queue) = Receiver::spawn(reader, 8, MAX);
        drop(writer);

        assert!(queue.recv().await.is_none());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(receiver.is_finished());
    }

    #[tokio::test]
    async fn test_decode_error_reported_then_closed() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let (_receiver, mut queue) = Receiver::spawn(reader, 8, MAX);

        writer.write_u32(2).await.unwrap();
        writer.write_all(&[0xff, 0x00]).await.unwrap();

        match queue.recv().await {
            Some(Inbound::Failed(e)) => assert!(e.is_fatal()),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(queue.recv().await.is_none());
    }
}
