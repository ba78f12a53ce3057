//! Per-client connection state: the write half of the socket guarded by a
//! mutex, an in-flight-reply counter that lets `close` drain outstanding
//! writes, and the connection's currently selected database index.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::database::DbContext;

/// How long `close` waits for in-flight writes to drain before closing the
/// socket unconditionally.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Connection {
    write_half: Mutex<OwnedWriteHalf>,
    in_flight: AtomicUsize,
    selected_db: AtomicUsize,
    peer_addr: SocketAddr,
}

impl Connection {
    pub fn new(write_half: OwnedWriteHalf, peer_addr: SocketAddr) -> Self {
        Connection {
            write_half: Mutex::new(write_half),
            in_flight: AtomicUsize::new(0),
            selected_db: AtomicUsize::new(0),
            peer_addr,
        }
    }

    /// Writes `bytes` to the socket. A no-op for an empty slice (the `NoReply`
    /// case). The in-flight counter is incremented before acquiring the write
    /// and decremented only after it completes, so `close`'s drain wait can
    /// never observe a reply as "done" while it is still being written.
    pub async fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.write_half.lock().await;
        let result = guard.write_all(bytes).await;
        drop(guard);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Waits up to `DRAIN_TIMEOUT` for in-flight replies to finish, then shuts
    /// down the socket regardless of whether the drain succeeded.
    pub async fn close(&self) {
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while self.in_flight.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let mut guard = self.write_half.lock().await;
        let _ = guard.shutdown().await;
    }
}

impl DbContext for Connection {
    fn db_index(&self) -> usize {
        self.selected_db.load(Ordering::SeqCst)
    }

    fn select_db(&self, index: usize) {
        self.selected_db.store(index, Ordering::SeqCst);
    }
}

/// The connection the AOF replay path executes commands against at boot. It
/// never writes to a socket; its only job is to carry the selected-database
/// state that `SELECT` lines in the file mutate, which is what routes the
/// commands that follow them to the right slot.
pub struct ReplayContext {
    selected_db: AtomicUsize,
}

impl ReplayContext {
    pub fn new() -> Self {
        ReplayContext {
            selected_db: AtomicUsize::new(0),
        }
    }
}

impl Default for ReplayContext {
    fn default() -> Self {
        Self::new()
    }
}

impl DbContext for ReplayContext {
    fn db_index(&self) -> usize {
        self.selected_db.load(Ordering::SeqCst)
    }

    fn select_db(&self, index: usize) {
        self.selected_db.store(index, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_context_defaults_to_db_zero() {
        let ctx = ReplayContext::new();
        assert_eq!(ctx.db_index(), 0);
        ctx.select_db(3);
        assert_eq!(ctx.db_index(), 3);
    }
}
