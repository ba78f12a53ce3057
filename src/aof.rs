//! The append-only file: a single-writer asynchronous log of every mutating
//! command, and the boot-time replay that reconstructs state from it using
//! the same parser and dispatcher a live connection uses.

use std::io::ErrorKind;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::connection::ReplayContext;
use crate::database::{AofEntry, Engine};
use crate::error::Result;
use crate::resp::{ParseItem, Reply, RespParser};
use crate::util::CmdLine;

/// Capacity of the channel between command executors and the writer task.
/// Sending blocks once full: backpressure onto callers is the intended
/// behaviour under sustained write load exceeding disk throughput, rather
/// than dropping entries or growing memory without bound.
const QUEUE_CAPACITY: usize = 65536;

/// How often the writer task flushes and syncs the file to disk. Entries are
/// not fsynced individually; this bounds the durability window instead of
/// leaving it unbounded.
const SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Replays `path` into `engine` if it exists; a missing file is not an error
/// (AOF simply hasn't been written yet). Each multibulk frame in the file is
/// executed against a synthetic connection starting at database 0 — `SELECT`
/// frames mutate that connection's selected database, which is exactly how
/// the replay routes the commands that follow them to the right slot.
pub async fn load(engine: &Engine, path: &str) -> Result<()> {
    let file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let mut parser = RespParser::new(BufReader::new(file));
    let ctx = ReplayContext::new();
    let mut replayed = 0u64;

    loop {
        match parser.next_payload().await {
            Ok(ParseItem::Eof) => break,
            Ok(ParseItem::Reply(Reply::MultiBulk(items))) => {
                let cmd_line: CmdLine = items.into_iter().map(Option::unwrap_or_default).collect();
                engine.exec(&ctx, &cmd_line).await;
                replayed += 1;
            }
            Ok(ParseItem::Reply(_other)) => {
                warn!("skipping non-multibulk entry while replaying append only file");
            }
            Ok(ParseItem::Protocol(msg)) => {
                warn!(%msg, "protocol error while replaying append only file, skipping entry");
            }
            Err(e) => {
                warn!(error = %e, "read error while replaying append only file, stopping replay");
                break;
            }
        }
    }

    info!(replayed, path, "append only file replayed");
    Ok(())
}

/// Opens `path` for append (creating it with mode 0600 if missing), spawns
/// the single writer task, and installs `AddAof` senders on every slot of
/// `engine`. Must run before any connection is accepted.
pub fn start(engine: &mut Engine, path: &str) -> Result<JoinHandle<()>> {
    let file = open_for_append(path)?;
    let file = tokio::fs::File::from_std(file);

    let (tx, rx) = mpsc::channel::<AofEntry>(QUEUE_CAPACITY);
    engine.install_aof(tx);

    Ok(tokio::spawn(writer_loop(file, rx)))
}

#[cfg(unix)]
fn open_for_append(path: &str) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .append(true)
        .read(true)
        .create(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_for_append(path: &str) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .append(true)
        .read(true)
        .create(true)
        .open(path)
}

async fn writer_loop(file: tokio::fs::File, mut rx: mpsc::Receiver<AofEntry>) {
    let mut writer = BufWriter::new(file);
    let mut current_db: usize = 0;
    let mut last_sync = Instant::now();

    while let Some((db_index, cmd_line)) = rx.recv().await {
        if db_index != current_db {
            let select_line: CmdLine = vec![b"select".to_vec(), db_index.to_string().into_bytes()];
            match writer.write_all(&encode(&select_line)).await {
                Ok(()) => current_db = db_index,
                Err(e) => {
                    warn!(error = %e, db = db_index, "failed writing SELECT to append only file");
                    continue;
                }
            }
        }

        if let Err(e) = writer.write_all(&encode(&cmd_line)).await {
            warn!(error = %e, "failed writing entry to append only file");
            continue;
        }

        if last_sync.elapsed() >= SYNC_INTERVAL {
            if let Err(e) = flush_and_sync(&mut writer).await {
                warn!(error = %e, "failed syncing append only file");
            }
            last_sync = Instant::now();
        }
    }

    let _ = flush_and_sync(&mut writer).await;
}

async fn flush_and_sync(writer: &mut BufWriter<tokio::fs::File>) -> std::io::Result<()> {
    writer.flush().await?;
    writer.get_ref().sync_data().await
}

fn encode(cmd_line: &CmdLine) -> Vec<u8> {
    Reply::MultiBulk(cmd_line.iter().map(|arg| Some(arg.clone())).collect()).to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::entity::DataEntity;
    use crate::database::DbContext;
    use crate::util::cmd_line;
    use std::time::Duration as StdDuration;

    #[test]
    fn encode_matches_client_wire_format() {
        let line = cmd_line(&["select", "1"]);
        assert_eq!(encode(&line), b"*2\r\n$6\r\nselect\r\n$1\r\n1\r\n".to_vec());
    }

    #[tokio::test]
    async fn loading_a_missing_file_is_not_an_error() {
        let engine = Engine::new(16);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.aof");
        let result = load(&engine, path.to_str().unwrap()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn replays_flushdb_and_select_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.aof");

        let mut contents = Vec::new();
        contents.extend_from_slice(b"*1\r\n$7\r\nflushdb\r\n");
        contents.extend_from_slice(b"*2\r\n$6\r\nselect\r\n$1\r\n1\r\n");
        contents.extend_from_slice(b"*2\r\n$3\r\ndel\r\n$1\r\nx\r\n");
        tokio::fs::write(&path, &contents).await.unwrap();

        let engine = Engine::new(16);
        engine.slot(1).put_entity("x", DataEntity::Str(b"v".to_vec()));
        load(&engine, path.to_str().unwrap()).await.unwrap();

        assert_eq!(engine.slot(1).get_entity("x"), None);
    }

    #[tokio::test]
    async fn writer_task_persists_select_boundary_and_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("written.aof");

        let mut engine = Engine::new(16);
        let handle = start(&mut engine, path.to_str().unwrap()).unwrap();

        engine.exec(&ReplayContext::new(), &cmd_line(&["flushdb"])).await;

        let second_ctx = ReplayContext::new();
        second_ctx.select_db(2);
        engine.slot(2).put_entity("k", DataEntity::Str(b"v".to_vec()));
        engine.exec(&second_ctx, &cmd_line(&["del", "k"])).await;

        // Give the writer task a chance to drain the channel.
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        drop(engine);
        let _ = tokio::time::timeout(StdDuration::from_secs(1), handle).await;

        let written = tokio::fs::read(&path).await.unwrap();
        let text = String::from_utf8_lossy(&written);
        assert!(text.contains("flushdb"));
        assert!(text.contains("select"));
        assert!(text.contains("del"));
    }
}
