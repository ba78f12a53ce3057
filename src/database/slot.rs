use tokio::sync::mpsc::Sender;
use tracing::warn;

use crate::dict::Dict;
use crate::resp::Reply;
use crate::util::{cmd_line_with_args, CmdLine};

use super::commands::lookup;
use super::entity::DataEntity;

/// What the AOF writer needs to know about a write that just succeeded:
/// which logical database it happened against, and the exact command line
/// (with the command name already lowercased — this is what actually lands
/// in the file, regardless of how the client capitalised it).
pub type AofEntry = (usize, CmdLine);

/// One logical database (the unit `SELECT` switches between). Owns its own
/// key space and, once wired up by the engine, a handle to the AOF writer
/// queue for commands the registry marks as writes.
pub struct Db {
    pub index: usize,
    pub data: Dict,
    aof: Option<Sender<AofEntry>>,
}

impl Db {
    pub fn new(index: usize) -> Self {
        Db {
            index,
            data: Dict::new(),
            aof: None,
        }
    }

    pub fn set_aof_sender(&mut self, sender: Sender<AofEntry>) {
        self.aof = Some(sender);
    }

    /// Execute one already-decoded command line against this database. The
    /// caller (the engine) has already stripped off any db-selection concern;
    /// `cmd_line[0]` is the command name, case-insensitively matched.
    ///
    /// Purely synchronous: it never touches the AOF channel. It hands back an
    /// `AofEntry` for the caller to actually send (see `Engine::exec`), so the
    /// channel's blocking backpressure happens at an `.await` point rather
    /// than inside a panic-catching, non-async dispatch path.
    pub fn exec(&self, cmd_line: &CmdLine) -> (Reply, Option<AofEntry>) {
        if cmd_line.is_empty() {
            return (Reply::err("ERR empty command"), None);
        }
        let name = String::from_utf8_lossy(&cmd_line[0]).to_lowercase();
        let cmd = match lookup(&name) {
            Some(c) => c,
            None => return (Reply::err_unknown_command(&name), None),
        };
        if !arity_ok(cmd.arity, cmd_line.len()) {
            return (Reply::err_wrong_arity(&name), None);
        }

        let outcome = (cmd.executor)(self, &cmd_line[1..]);
        let aof_entry = outcome.emit_aof.then(|| self.normalized_aof_entry(&name, cmd_line));
        (outcome.reply, aof_entry)
    }

    /// Re-stamps `cmd_line` with the lowercased command name, so the file
    /// always records a canonical spelling regardless of how the client wrote
    /// it on the wire.
    fn normalized_aof_entry(&self, name: &str, cmd_line: &CmdLine) -> AofEntry {
        (self.index, cmd_line_with_args(name, &cmd_line[1..]))
    }

    /// Sends one already-built AOF entry to the writer, awaiting the channel
    /// send so a full queue applies backpressure onto the caller rather than
    /// dropping the entry. A no-op if AOF is disabled for this slot.
    pub async fn send_aof(&self, entry: AofEntry) {
        let Some(sender) = &self.aof else {
            return;
        };
        if let Err(e) = sender.send(entry).await {
            warn!(db = self.index, error = %e, "aof writer is gone, dropping entry");
        }
    }

    pub fn get_entity(&self, key: &str) -> Option<DataEntity> {
        self.data.get(key)
    }

    pub fn put_entity(&self, key: &str, entity: DataEntity) -> i64 {
        self.data.put(key, entity)
    }

    pub fn put_if_exists(&self, key: &str, entity: DataEntity) -> i64 {
        self.data.put_if_exists(key, entity)
    }

    pub fn put_if_absent(&self, key: &str, entity: DataEntity) -> i64 {
        self.data.put_if_absent(key.to_string(), entity)
    }

    pub fn remove(&self, key: &str) -> i64 {
        self.data.remove(key)
    }

    /// Removes every key in `keys`; returns how many actually existed.
    pub fn removes(&self, keys: &[String]) -> i64 {
        keys.iter().map(|k| self.data.remove(k)).sum()
    }

    pub fn flush(&self) {
        self.data.clear();
    }
}

/// `arity > 0` is an exact required length of the whole command line
/// (name included); `arity < 0` is a minimum. Mirrors the registry's arity
/// convention used throughout the command table.
fn arity_ok(arity: i32, got: usize) -> bool {
    if arity >= 0 {
        got == arity as usize
    } else {
        got >= (-arity) as usize
    }
}
