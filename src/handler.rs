//! The per-connection read-parse-execute-write loop and the registry of
//! currently active connections a shutdown needs to drain.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::connection::Connection;
use crate::database::Engine;
use crate::resp::{ParseItem, Reply, RespParser, UNKNOWN_ERR_BYTES};
use crate::util::CmdLine;

/// Owns the command engine and the set of connections currently being served,
/// so a shutdown can reach every one of them.
pub struct RespHandler {
    engine: Arc<Engine>,
    active: Mutex<HashMap<u64, Arc<Connection>>>,
    next_id: AtomicU64,
    closing: AtomicBool,
}

impl RespHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        RespHandler {
            engine,
            active: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            closing: AtomicBool::new(false),
        }
    }

    /// Drive one accepted socket to completion. If the handler is already
    /// shutting down, the socket is closed immediately without ever
    /// constructing per-connection state.
    pub async fn handle(&self, stream: TcpStream, peer_addr: SocketAddr) {
        if self.closing.load(Ordering::SeqCst) {
            drop(stream);
            return;
        }

        let (read_half, write_half) = stream.into_split();
        let conn = Arc::new(Connection::new(write_half, peer_addr));
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.active.lock().await.insert(id, conn.clone());

        self.serve(&conn, read_half).await;

        self.active.lock().await.remove(&id);
        conn.close().await;
    }

    async fn serve(&self, conn: &Arc<Connection>, read_half: tokio::net::tcp::OwnedReadHalf) {
        let mut parser = RespParser::new(BufReader::new(read_half));
        loop {
            match parser.next_payload().await {
                Ok(ParseItem::Eof) => {
                    debug!(peer = %conn.remote_addr(), "connection closed by peer");
                    return;
                }
                Err(e) => {
                    let err = crate::error::Error::from(e);
                    if err.is_peer_closed() {
                        debug!(peer = %conn.remote_addr(), "connection closed by peer");
                    } else {
                        debug!(peer = %conn.remote_addr(), error = %err, "closing connection after io error");
                    }
                    return;
                }
                Ok(ParseItem::Protocol(msg)) => {
                    if self.write_reply(conn, &Reply::err(format!("ERR {msg}"))).await.is_err() {
                        return;
                    }
                }
                Ok(ParseItem::Reply(Reply::EmptyMultiBulk)) => {
                    debug!(peer = %conn.remote_addr(), "empty payload");
                }
                Ok(ParseItem::Reply(Reply::MultiBulk(items))) => {
                    let cmd_line: CmdLine = items.into_iter().map(Option::unwrap_or_default).collect();
                    match self.engine.exec(conn.as_ref(), &cmd_line).await {
                        Some(reply) => {
                            if self.write_reply(conn, &reply).await.is_err() {
                                return;
                            }
                        }
                        None => {
                            if conn.write(UNKNOWN_ERR_BYTES).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                Ok(ParseItem::Reply(_other)) => {
                    debug!(peer = %conn.remote_addr(), "require multi bulk reply");
                }
            }
        }
    }

    async fn write_reply(&self, conn: &Connection, reply: &Reply) -> std::io::Result<()> {
        conn.write(&reply.to_bytes()).await
    }

    /// Marks the handler as closing, closes every active connection (which
    /// drains their in-flight replies), and returns once all of them are shut
    /// down. Called after the accept loop has stopped so no new connections
    /// race with the drain.
    pub async fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        let conns: Vec<Arc<Connection>> = self.active.lock().await.values().cloned().collect();
        info!(count = conns.len(), "draining active connections");
        for conn in conns {
            conn.close().await;
        }
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }
}
