use std::panic::{self, AssertUnwindSafe};

use tokio::sync::mpsc::Sender;
use tracing::error;

use crate::resp::Reply;
use crate::util::CmdLine;

use super::slot::{AofEntry, Db};

/// Whatever a connection can tell the engine about which database it is
/// currently talking to. Implemented by the real per-socket `Connection` and
/// by the lightweight synthetic connection the AOF replay path uses — both
/// need nothing more than this to route `SELECT` and subsequent commands.
pub trait DbContext {
    fn db_index(&self) -> usize;
    fn select_db(&self, index: usize);
}

/// A fixed-length, never-resized sequence of logical databases. Built once at
/// startup from the configured database count and torn down at shutdown.
pub struct Engine {
    slots: Vec<Db>,
}

impl Engine {
    pub fn new(databases: usize) -> Self {
        let databases = databases.max(1);
        Engine {
            slots: (0..databases).map(Db::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> &Db {
        &self.slots[index]
    }

    /// Wires every slot's `AddAof` hook to the AOF writer's queue. Called once
    /// at boot, before any connection is accepted, so no synchronization with
    /// concurrent readers of `self.slots` is needed.
    pub fn install_aof(&mut self, sender: Sender<AofEntry>) {
        for slot in &mut self.slots {
            slot.set_aof_sender(sender.clone());
        }
    }

    /// Top-level dispatch: handles `SELECT` itself (it acts on the connection's
    /// context, not on a single database's keyspace), otherwise resolves the
    /// connection's currently selected slot and delegates.
    ///
    /// A panic anywhere downstream is caught and logged; the caller gets `None`
    /// back and is expected to write the generic unknown-error reply rather
    /// than propagate the panic into the connection's read loop.
    ///
    /// The AOF send (if the command emits one) happens after the panic-catching
    /// section returns, as a genuine `.await`: a full AOF queue blocks this
    /// command's caller rather than being dropped, per the channel's documented
    /// backpressure contract.
    pub async fn exec(&self, ctx: &dyn DbContext, cmd_line: &CmdLine) -> Option<Reply> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.exec_inner(ctx, cmd_line)));
        match outcome {
            Ok((reply, aof_entry)) => {
                if let Some(entry) = aof_entry {
                    let db_index = entry.0;
                    self.slots[db_index].send_aof(entry).await;
                }
                Some(reply)
            }
            Err(payload) => {
                let msg = panic_message(&payload);
                error!(panic = %msg, "recovered from panic in command dispatch");
                None
            }
        }
    }

    fn exec_inner(&self, ctx: &dyn DbContext, cmd_line: &CmdLine) -> (Reply, Option<AofEntry>) {
        if cmd_line.is_empty() {
            return (Reply::err("ERR empty command"), None);
        }
        let name = String::from_utf8_lossy(&cmd_line[0]).to_lowercase();
        if name == "select" {
            return (self.exec_select(ctx, cmd_line), None);
        }
        let slot = &self.slots[ctx.db_index()];
        slot.exec(cmd_line)
    }

    fn exec_select(&self, ctx: &dyn DbContext, cmd_line: &CmdLine) -> Reply {
        if cmd_line.len() != 2 {
            return Reply::err_wrong_arity("select");
        }
        let index: i64 = match std::str::from_utf8(&cmd_line[1])
            .ok()
            .and_then(|s| s.parse().ok())
        {
            Some(n) => n,
            None => return Reply::err("ERR invalid DB index"),
        };
        if index < 0 || index as usize >= self.slots.len() {
            return Reply::err("ERR DB index is out of range");
        }
        ctx.select_db(index as usize);
        Reply::Ok
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
