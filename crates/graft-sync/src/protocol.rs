//! Message lifecycle hooks.
//!
//! Which hook runs is decided only by the frame's direction: the side that
//! receives a request runs `on_request`, the side that receives the paired
//! reply runs `on_response`, and the sender runs `after_send` once the frame
//! is flushed. Data messages are fire-and-forget and have no reply.

use graft_store::GraphStore;

use crate::connection::Connection;
use crate::context::{SessionValue, SyncContext, SYNCABLES_KEY};
use crate::error::Result;
use crate::export::{build_export_set, resolve_root, send_export_set};
use crate::messages::{Direction, Message, SyncErrorCode};

impl Message {
    /// Handle this message as a request from the peer.
    pub async fn on_request<S: GraphStore>(
        self,
        conn: &mut Connection,
        ctx: &mut SyncContext<S>,
    ) -> Result<()> {
        match self {
            Message::Begin => {
                ctx.begin_transaction().await;
                conn.respond(Message::Begin).await
            }

            Message::Finish => {
                ctx.mark_success();
                ctx.end_transaction().await;
                ctx.set_incoming_finished();
                conn.respond(Message::Finish).await
            }

            Message::ListSyncables { types, .. } => {
                let syncables = match ctx.list_syncables(&types).await {
                    Ok(syncables) => syncables,
                    Err(e) => {
                        conn.respond(Message::error(SyncErrorCode::InternalError, &e))
                            .await?;
                        return Err(e);
                    }
                };
                tracing::debug!(count = syncables.len(), "answering list-syncables");
                conn.respond(Message::ListSyncables {
                    types,
                    syncables: Some(syncables),
                })
                .await
            }

            Message::PullRequest {
                root, recursive, ..
            } => {
                let entity = match resolve_root(ctx.store(), &root).await {
                    Ok(Some(entity)) => entity,
                    Ok(None) => {
                        tracing::info!(%root, "pull root not found");
                        return conn
                            .respond(Message::error(
                                SyncErrorCode::NotFound,
                                format!("no entity {}", root),
                            ))
                            .await;
                    }
                    Err(e) => {
                        conn.respond(Message::error(SyncErrorCode::InternalError, &e))
                            .await?;
                        return Err(e);
                    }
                };

                let chunk_size = ctx.config().chunk_size;
                let set = match build_export_set(
                    ctx.store(),
                    ctx.registry(),
                    ctx.files(),
                    &entity,
                    recursive,
                    chunk_size,
                )
                .await
                {
                    Ok(set) => set,
                    Err(e) => {
                        conn.respond(Message::error(SyncErrorCode::InternalError, &e))
                            .await?;
                        return Err(e);
                    }
                };
                tracing::info!(%root, total = set.total_size(), "serving pull");

                conn.respond(Message::PullRequest {
                    root,
                    recursive,
                    total: Some(set.total_size()),
                })
                .await?;
                send_export_set(conn, ctx.files(), chunk_size, &set).await
            }

            Message::NodeData(node) => ctx.store_node(&node).await.map(|_| ()),

            Message::RelationshipData(rel) => ctx.store_relationship(&rel).await.map(|_| ()),

            Message::FileBegin { node, size } => ctx.begin_file(node, size),

            Message::FileChunk {
                container_id,
                sequence,
                data,
            } => ctx.file_chunk(&container_id, sequence, &data),

            Message::FileEnd {
                container_id,
                chunk_count,
                checksum,
            } => ctx
                .finish_file(&container_id, chunk_count, &checksum)
                .await
                .map(|_| ()),

            Message::Error { code, message } => {
                tracing::warn!(?code, %message, "peer reported error");
                Ok(())
            }
        }
    }

    /// Handle this message as the peer's reply to one of our requests.
    pub async fn on_response<S: GraphStore>(
        self,
        _conn: &mut Connection,
        ctx: &mut SyncContext<S>,
    ) -> Result<()> {
        match self {
            Message::Begin => {
                ctx.set_peer_ready();
                Ok(())
            }

            Message::Finish => {
                tracing::debug!("peer committed transfer");
                ctx.set_outgoing_finished();
                Ok(())
            }

            Message::ListSyncables { syncables, .. } => {
                let syncables = syncables.unwrap_or_default();
                ctx.store_value(SYNCABLES_KEY, SessionValue::Syncables(syncables));
                Ok(())
            }

            Message::PullRequest { total, .. } => {
                if let Some(total) = total {
                    ctx.set_expected_total(total);
                }
                Ok(())
            }

            Message::Error { code, message } => {
                tracing::warn!(?code, %message, "peer rejected request");
                ctx.record_peer_error(code, message);
                Ok(())
            }

            other @ (Message::NodeData(_)
            | Message::RelationshipData(_)
            | Message::FileBegin { .. }
            | Message::FileChunk { .. }
            | Message::FileEnd { .. }) => {
                tracing::debug!(kind = other.kind(), "unexpected reply to fire-and-forget message");
                Ok(())
            }
        }
    }

    /// Run by the sender once the frame has been written.
    pub fn after_send(&self, conn: &mut Connection, direction: Direction) {
        match (self, direction) {
            (Message::Finish, Direction::Request) => {
                conn.set_transfer_written();
                tracing::debug!(frames = conn.frames_sent(), "transfer written");
            }
            _ => tracing::trace!(kind = self.kind(), ?direction, "frame sent"),
        }
    }
}
