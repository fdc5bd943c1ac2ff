//! Sync session: one connection, one apply context, one processing loop.
//!
//! The session owns the write side of the stream and the consuming end of
//! the receiver's queue. It is the only place that decides whether an error
//! ends the session: fatal errors (stream failures) are returned, anything
//! else raised while handling a message is logged and counted, and the loop
//! moves on.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, error::TryRecvError};

use graft_core::{ExportSet, SyncableInfo};
use graft_store::GraphStore;

use crate::connection::Connection;
use crate::context::{ApplyStats, SessionValue, SyncContext, SYNCABLES_KEY};
use crate::error::{Result, SyncError};
use crate::export::send_export_set;
use crate::messages::{Direction, Frame, Message, PullRoot, SyncErrorCode};
use crate::receiver::{Inbound, Receiver};

/// Called with (messages processed, expected total) after every message.
pub type ProgressCallback = Box<dyn FnMut(u64, Option<u64>) + Send>;

/// Count of fully processed messages.
#[derive(Default)]
pub struct Progress {
    processed: u64,
    total: Option<u64>,
    callback: Option<ProgressCallback>,
}

impl Progress {
    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    fn set_total(&mut self, total: u64) {
        self.total = Some(total);
    }

    fn advance(&mut self) {
        self.processed += 1;
        if let Some(callback) = self.callback.as_mut() {
            callback(self.processed, self.total);
        }
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress")
            .field("processed", &self.processed)
            .field("total", &self.total)
            .finish()
    }
}

/// Summary of a closed session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Messages whose hook ran to completion (successfully or not).
    pub messages_processed: u64,
    /// Messages rejected or whose hook failed non-fatally.
    pub messages_failed: u64,
    pub frames_sent: u64,
    pub stats: ApplyStats,
}

/// One side of a sync connection.
pub struct SyncSession<S: GraphStore> {
    conn: Connection,
    inbound: mpsc::Receiver<Inbound>,
    inbound_closed: bool,
    receiver: Receiver,
    ctx: SyncContext<S>,
    progress: Progress,
    failed: u64,
}

impl<S: GraphStore> SyncSession<S> {
    /// Start a session over separate read and write halves.
    pub fn new<R, W>(reader: R, writer: W, ctx: SyncContext<S>) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let config = ctx.config();
        let (receiver, inbound) =
            Receiver::spawn(reader, config.queue_capacity, config.max_frame_size);

        let mut conn = Connection::new(writer, config.max_frame_size);
        conn.mark_connected()?;

        Ok(Self {
            conn,
            inbound,
            inbound_closed: false,
            receiver,
            ctx,
            progress: Progress::default(),
            failed: 0,
        })
    }

    /// Start a session over a full-duplex stream.
    pub fn from_stream<T>(stream: T, ctx: SyncContext<S>) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer, ctx)
    }

    /// Install a progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: FnMut(u64, Option<u64>) + Send + 'static,
    {
        self.progress.callback = Some(Box::new(callback));
        self
    }

    pub fn context(&self) -> &SyncContext<S> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut SyncContext<S> {
        &mut self.ctx
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Processing loop
    // ─────────────────────────────────────────────────────────────────────────

    /// Run the hook for one inbound frame.
    ///
    /// Returns an error only if it is fatal; the connection is then closed.
    pub async fn dispatch(&mut self, frame: Frame) -> Result<()> {
        let Frame { direction, message } = frame;
        let kind = message.kind();

        if let Err(reason) = message.validate_limits() {
            let e = SyncError::InvalidMessage(format!("{}: {}", kind, reason));
            tracing::warn!(error = %e, "message rejected");
            self.failed += 1;
            if direction == Direction::Request {
                self.conn
                    .respond(Message::error(SyncErrorCode::MessageTooLarge, &e))
                    .await?;
            }
            self.progress.advance();
            return Ok(());
        }

        let result = match direction {
            Direction::Request => message.on_request(&mut self.conn, &mut self.ctx).await,
            Direction::Response => message.on_response(&mut self.conn, &mut self.ctx).await,
        };

        if let Err(e) = result {
            if e.is_fatal() {
                tracing::error!(kind, error = %e, "fatal error, closing connection");
                self.conn.close().await;
                return Err(e);
            }
            self.failed += 1;
            match e {
                SyncError::UnresolvedEndpoint { .. } => {
                    tracing::warn!(kind, error = %e, "relationship dropped")
                }
                _ => tracing::warn!(kind, error = %e, "message skipped"),
            }
        }

        if let Some(total) = self.ctx.expected_total() {
            self.progress.set_total(total);
        }
        self.progress.advance();
        Ok(())
    }

    /// Dispatch everything already queued without waiting for more.
    ///
    /// Returns the number of frames dispatched.
    pub async fn process_pending(&mut self) -> Result<usize> {
        let mut dispatched = 0;
        while !self.inbound_closed {
            match self.inbound.try_recv() {
                Ok(Inbound::Frame(frame)) => {
                    self.dispatch(frame).await?;
                    dispatched += 1;
                }
                Ok(Inbound::Failed(e)) => return Err(self.receive_failed(e).await),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.inbound_closed = true,
            }
        }
        Ok(dispatched)
    }

    /// Wait for the next inbound frame. `None` once the peer has closed.
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.inbound_closed {
            return Ok(None);
        }
        match self.inbound.recv().await {
            Some(Inbound::Frame(frame)) => Ok(Some(frame)),
            Some(Inbound::Failed(e)) => Err(self.receive_failed(e).await),
            None => {
                self.inbound_closed = true;
                Ok(None)
            }
        }
    }

    async fn receive_failed(&mut self, e: SyncError) -> SyncError {
        self.inbound_closed = true;
        self.conn.close().await;
        e
    }

    /// Process frames until `done` holds, the peer reports an error, or the
    /// stream ends.
    async fn run_until<F>(&mut self, waiting_for: &str, done: F) -> Result<()>
    where
        F: Fn(&SyncContext<S>) -> bool,
    {
        loop {
            if let Some((code, message)) = self.ctx.take_peer_error() {
                return Err(SyncError::Peer { code, message });
            }
            if done(&self.ctx) {
                return Ok(());
            }
            match self.next_frame().await? {
                Some(frame) => self.dispatch(frame).await?,
                None => {
                    return Err(SyncError::Connection(format!(
                        "peer closed while waiting for {}",
                        waiting_for
                    )))
                }
            }
        }
    }

    /// Answer the peer's requests until it closes the stream.
    pub async fn serve(&mut self) -> Result<()> {
        while let Some(frame) = self.next_frame().await? {
            self.dispatch(frame).await?;
        }
        tracing::debug!(processed = self.progress.processed(), "peer finished");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Client operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Send an export set and wait until the peer has committed it.
    pub async fn push(&mut self, set: &ExportSet) -> Result<()> {
        self.ctx.reset_transfer_flags();
        self.progress.set_total(set.total_size());

        send_export_set(
            &mut self.conn,
            self.ctx.files(),
            self.ctx.config().chunk_size,
            set,
        )
        .await?;

        self.run_until("the transfer to be committed", |ctx| {
            ctx.outgoing_finished()
        })
        .await
    }

    /// Ask the peer for the closure of `root` and apply it locally.
    pub async fn pull(&mut self, root: PullRoot, recursive: bool) -> Result<()> {
        self.ctx.reset_transfer_flags();

        self.conn
            .request(Message::PullRequest {
                root,
                recursive,
                total: None,
            })
            .await?;

        self.run_until("the pulled transfer", |ctx| ctx.incoming_finished())
            .await
    }

    /// Ask the peer for descriptors of its syncables.
    pub async fn list_syncables(&mut self, types: Vec<String>) -> Result<Vec<SyncableInfo>> {
        self.ctx.remove_value(SYNCABLES_KEY);

        self.conn
            .request(Message::ListSyncables {
                types,
                syncables: None,
            })
            .await?;

        self.run_until("the syncables listing", |ctx| {
            ctx.value(SYNCABLES_KEY).is_some()
        })
        .await?;

        match self.ctx.remove_value(SYNCABLES_KEY) {
            Some(SessionValue::Syncables(syncables)) => Ok(syncables),
            _ => Ok(Vec::new()),
        }
    }

    /// Tear the session down and close the stream.
    ///
    /// An open transaction scope that was never marked successful is rolled
    /// back and incomplete file transfers are discarded.
    pub async fn close(mut self) -> SessionReport {
        self.ctx.teardown().await;
        self.conn.close().await;
        self.receiver.abort();

        SessionReport {
            messages_processed: self.progress.processed(),
            messages_failed: self.failed,
            frames_sent: self.conn.frames_sent(),
            stats: self.ctx.stats().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{read_frame, write_frame};
    use crate::config::SyncConfig;
    use graft_core::{NodeRef, PropertyMap, RelationshipRef, TypeRegistry};
    use graft_store::{FileStorage, MemoryGraphStore};
    use std::sync::{Arc, Mutex};
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    const MAX: usize = 1024 * 1024;

    struct Harness {
        _dir: tempfile::TempDir,
        store: Arc<MemoryGraphStore>,
        session: SyncSession<MemoryGraphStore>,
        peer_read: ReadHalf<DuplexStream>,
        peer_write: WriteHalf<DuplexStream>,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryGraphStore::new());
        let ctx = SyncContext::new(
            store.clone(),
            FileStorage::new(dir.path()),
            Arc::new(TypeRegistry::standard()),
            SyncConfig::default(),
        );
        let (local, remote) = tokio::io::duplex(256 * 1024);
        let session = SyncSession::from_stream(local, ctx).unwrap();
        let (peer_read, peer_write) = tokio::io::split(remote);
        Harness {
            _dir: dir,
            store,
            session,
            peer_read,
            peer_write,
        }
    }

    async fn send(h: &mut Harness, message: Message) {
        write_frame(&mut h.peer_write, &Frame::request(message), MAX)
            .await
            .unwrap();
    }

    fn page(id: &str) -> Message {
        Message::NodeData(
            NodeRef::new(id, "Page").with_properties(PropertyMap::new().with("name", id)),
        )
    }

    #[tokio::test]
    async fn test_dangling_relationship_does_not_stop_loop() {
        let mut h = harness();
        send(&mut h, Message::Begin).await;
        send(&mut h, page("A")).await;
        send(
            &mut h,
            Message::RelationshipData(RelationshipRef::new("R", "LINK", "A", "missing")),
        )
        .await;
        send(&mut h, page("B")).await;
        send(&mut h, Message::Finish).await;
        drop(h.peer_write);

        h.session.serve().await.unwrap();

        assert_eq!(h.store.node_count().unwrap(), 2);
        assert_eq!(h.store.relationship_count().unwrap(), 0);
        let report = h.session.close().await;
        assert_eq!(report.messages_processed, 5);
        assert_eq!(report.messages_failed, 1);
        assert_eq!(report.stats.relationships_dropped, 1);
    }

    #[tokio::test]
    async fn test_begin_and_finish_are_answered() {
        let mut h = harness();
        send(&mut h, Message::Begin).await;
        send(&mut h, Message::Finish).await;
        drop(h.peer_write);
        h.session.serve().await.unwrap();

        let first = read_frame(&mut h.peer_read, MAX).await.unwrap().unwrap();
        let second = read_frame(&mut h.peer_read, MAX).await.unwrap().unwrap();
        assert!(matches!((first.direction, first.message), (Direction::Response, Message::Begin)));
        assert!(matches!((second.direction, second.message), (Direction::Response, Message::Finish)));
    }

    #[tokio::test]
    async fn test_missing_finish_rolls_back_on_close() {
        let mut h = harness();
        send(&mut h, Message::Begin).await;
        send(&mut h, page("A")).await;
        drop(h.peer_write);

        h.session.serve().await.unwrap();
        assert_eq!(h.store.node_count().unwrap(), 1);

        h.session.close().await;
        assert_eq!(h.store.node_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_oversized_request_rejected_with_error() {
        let mut h = harness();
        send(
            &mut h,
            Message::ListSyncables {
                types: vec!["Page".into(); crate::messages::limits::MAX_TYPE_FILTERS + 1],
                syncables: None,
            },
        )
        .await;
        drop(h.peer_write);
        h.session.serve().await.unwrap();

        let reply = read_frame(&mut h.peer_read, MAX).await.unwrap().unwrap();
        assert!(matches!(
            reply.message,
            Message::Error {
                code: SyncErrorCode::MessageTooLarge,
                ..
            }
        ));
        let report = h.session.close().await;
        assert_eq!(report.messages_processed, 1);
        assert_eq!(report.messages_failed, 1);
    }

    #[tokio::test]
    async fn test_corrupt_stream_is_fatal() {
        use tokio::io::AsyncWriteExt;

        let mut h = harness();
        send(&mut h, page("A")).await;
        h.peer_write.write_u32(4).await.unwrap();
        h.peer_write.write_all(&[0xff; 4]).await.unwrap();

        let err = h.session.serve().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(h.store.node_count().unwrap(), 1);
        assert!(!h.session.connection().is_connected());
    }

    #[tokio::test]
    async fn test_process_pending_and_progress_callback() {
        let mut h = harness();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        h.session = h
            .session
            .with_progress(move |done, _total| sink.lock().unwrap().push(done));

        assert_eq!(h.session.process_pending().await.unwrap(), 0);

        send(&mut h, page("A")).await;
        send(&mut h, page("B")).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(h.session.process_pending().await.unwrap(), 2);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(h.session.progress().processed(), 2);
    }
}
