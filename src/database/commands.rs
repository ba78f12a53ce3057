//! The process-wide command table: a frozen lowercase-name -> {executor, arity}
//! registry, plus the executor functions themselves.
//!
//! `SELECT` is deliberately not in this table — it is handled one layer up, in
//! the engine, because it acts on the connection's selected-database context
//! rather than on a single `Db`'s keyspace (see `database::engine`).

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::resp::Reply;
use crate::wildcard;

use super::entity::DataEntity;
use super::slot::Db;

/// What an executor hands back to `Db::exec`: the reply to send, and whether
/// the command actually changed state and should be appended to the AOF.
/// Whether a command is "a write command" is necessary but not sufficient —
/// DEL with nothing deleted, or RENAMENX that refused because the destination
/// existed, are both no-ops and must not be logged.
pub struct Outcome {
    pub reply: Reply,
    pub emit_aof: bool,
}

impl Outcome {
    fn reply_only(reply: Reply) -> Self {
        Outcome {
            reply,
            emit_aof: false,
        }
    }

    fn with_aof(reply: Reply) -> Self {
        Outcome {
            reply,
            emit_aof: true,
        }
    }
}

pub struct Command {
    pub executor: fn(&Db, &[Vec<u8>]) -> Outcome,
    pub arity: i32,
}

static COMMAND_TABLE: Lazy<HashMap<&'static str, Command>> = Lazy::new(build_table);

/// Look up a command by its already-lowercased name.
pub fn lookup(name: &str) -> Option<&'static Command> {
    COMMAND_TABLE.get(name)
}

fn build_table() -> HashMap<&'static str, Command> {
    let mut table = HashMap::new();
    table.insert(
        "ping",
        Command {
            executor: ping,
            arity: -1,
        },
    );
    table.insert(
        "del",
        Command {
            executor: del,
            arity: -2,
        },
    );
    table.insert(
        "exists",
        Command {
            executor: exists,
            arity: -2,
        },
    );
    table.insert(
        "keys",
        Command {
            executor: keys,
            arity: 2,
        },
    );
    table.insert(
        "flushdb",
        Command {
            executor: flushdb,
            arity: -1,
        },
    );
    table.insert(
        "type",
        Command {
            executor: type_cmd,
            arity: 2,
        },
    );
    table.insert(
        "rename",
        Command {
            executor: rename,
            arity: 3,
        },
    );
    table.insert(
        "renamenx",
        Command {
            executor: renamenx,
            arity: 3,
        },
    );
    table
}

fn key_str(arg: &[u8]) -> String {
    String::from_utf8_lossy(arg).into_owned()
}

fn ping(_db: &Db, _args: &[Vec<u8>]) -> Outcome {
    Outcome::reply_only(Reply::Pong)
}

fn del(db: &Db, args: &[Vec<u8>]) -> Outcome {
    let keys: Vec<String> = args.iter().map(|a| key_str(a)).collect();
    let deleted = db.removes(&keys);
    let reply = Reply::int(deleted);
    if deleted > 0 {
        Outcome::with_aof(reply)
    } else {
        Outcome::reply_only(reply)
    }
}

fn exists(db: &Db, args: &[Vec<u8>]) -> Outcome {
    let count = args
        .iter()
        .filter(|a| db.get_entity(&key_str(a)).is_some())
        .count();
    Outcome::reply_only(Reply::int(count as i64))
}

fn keys(db: &Db, args: &[Vec<u8>]) -> Outcome {
    let pattern = &args[0];
    let mut matched = Vec::new();
    db.data.for_each(|k, _v| {
        if wildcard::is_match(pattern, k.as_bytes()) {
            matched.push(k.as_bytes().to_vec());
        }
        true
    });
    Outcome::reply_only(Reply::multi_bulk_keys(matched))
}

fn flushdb(db: &Db, _args: &[Vec<u8>]) -> Outcome {
    db.flush();
    Outcome::with_aof(Reply::Ok)
}

fn type_cmd(db: &Db, args: &[Vec<u8>]) -> Outcome {
    let reply = match db.get_entity(&key_str(&args[0])) {
        None => Reply::SimpleString("none".to_string()),
        Some(entity) => Reply::SimpleString(entity.type_name().to_string()),
    };
    Outcome::reply_only(reply)
}

fn rename(db: &Db, args: &[Vec<u8>]) -> Outcome {
    let src = key_str(&args[0]);
    let dst = key_str(&args[1]);
    match db.get_entity(&src) {
        None => Outcome::reply_only(Reply::err("ERR no such key")),
        Some(entity) => {
            db.put_entity(&dst, entity);
            db.remove(&src);
            Outcome::with_aof(Reply::Ok)
        }
    }
}

fn renamenx(db: &Db, args: &[Vec<u8>]) -> Outcome {
    let src = key_str(&args[0]);
    let dst = key_str(&args[1]);
    if db.get_entity(&dst).is_some() {
        return Outcome::reply_only(Reply::int(0));
    }
    match db.get_entity(&src) {
        None => Outcome::reply_only(Reply::err("ERR no such key")),
        Some(entity) => {
            db.put_entity(&dst, entity);
            db.remove(&src);
            Outcome::with_aof(Reply::int(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Db {
        Db::new(0)
    }

    #[test]
    fn ping_never_emits_aof() {
        let outcome = ping(&db(), &[]);
        assert_eq!(outcome.reply, Reply::Pong);
        assert!(!outcome.emit_aof);
    }

    #[test]
    fn del_with_nothing_deleted_does_not_emit_aof() {
        let d = db();
        let outcome = del(&d, &[b"missing".to_vec()]);
        assert_eq!(outcome.reply, Reply::int(0));
        assert!(!outcome.emit_aof);
    }

    #[test]
    fn del_with_a_deletion_emits_aof() {
        let d = db();
        d.put_entity("a", DataEntity::Str(b"1".to_vec()));
        let outcome = del(&d, &[b"a".to_vec()]);
        assert_eq!(outcome.reply, Reply::int(1));
        assert!(outcome.emit_aof);
    }

    #[test]
    fn exists_never_emits_aof() {
        let d = db();
        d.put_entity("a", DataEntity::Str(b"1".to_vec()));
        let outcome = exists(&d, &[b"a".to_vec(), b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(outcome.reply, Reply::int(2));
        assert!(!outcome.emit_aof);
    }

    #[test]
    fn keys_matches_wildcard_pattern() {
        let d = db();
        d.put_entity("foo", DataEntity::Str(b"1".to_vec()));
        d.put_entity("bar", DataEntity::Str(b"1".to_vec()));
        let outcome = keys(&d, &[b"f*".to_vec()]);
        match outcome.reply {
            Reply::MultiBulk(items) => {
                assert_eq!(items, vec![Some(b"foo".to_vec())]);
            }
            other => panic!("expected multibulk, got {other:?}"),
        }
        assert!(!outcome.emit_aof);
    }

    #[test]
    fn flushdb_always_emits_aof() {
        let d = db();
        let outcome = flushdb(&d, &[]);
        assert_eq!(outcome.reply, Reply::Ok);
        assert!(outcome.emit_aof);
        assert_eq!(d.data.len(), 0);
    }

    #[test]
    fn type_reports_string_for_string_entity() {
        let d = db();
        d.put_entity("a", DataEntity::Str(b"1".to_vec()));
        let outcome = type_cmd(&d, &[b"a".to_vec()]);
        assert_eq!(outcome.reply, Reply::SimpleString("string".into()));
    }

    #[test]
    fn type_reports_none_for_missing_key() {
        let d = db();
        let outcome = type_cmd(&d, &[b"missing".to_vec()]);
        assert_eq!(outcome.reply, Reply::SimpleString("none".into()));
    }

    #[test]
    fn rename_missing_source_does_not_emit_aof() {
        let d = db();
        let outcome = rename(&d, &[b"a".to_vec(), b"b".to_vec()]);
        assert!(outcome.reply.is_error());
        assert!(!outcome.emit_aof);
    }

    #[test]
    fn rename_moves_the_entity_and_emits_aof() {
        let d = db();
        d.put_entity("a", DataEntity::Str(b"v".to_vec()));
        let outcome = rename(&d, &[b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(outcome.reply, Reply::Ok);
        assert!(outcome.emit_aof);
        assert_eq!(d.get_entity("a"), None);
        assert_eq!(d.get_entity("b"), Some(DataEntity::Str(b"v".to_vec())));
    }

    #[test]
    fn renamenx_refuses_existing_destination_without_aof() {
        let d = db();
        d.put_entity("a", DataEntity::Str(b"1".to_vec()));
        d.put_entity("b", DataEntity::Str(b"2".to_vec()));
        let outcome = renamenx(&d, &[b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(outcome.reply, Reply::int(0));
        assert!(!outcome.emit_aof);
        assert_eq!(d.get_entity("a"), Some(DataEntity::Str(b"1".to_vec())));
    }

    #[test]
    fn renamenx_moves_entity_when_destination_free() {
        let d = db();
        d.put_entity("a", DataEntity::Str(b"1".to_vec()));
        let outcome = renamenx(&d, &[b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(outcome.reply, Reply::int(1));
        assert!(outcome.emit_aof);
    }
}
