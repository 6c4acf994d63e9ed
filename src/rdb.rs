//! Snapshot persistence: atomic temp-file-then-rename save, with background
//! saves forked off and reaped from the cron tick.
//!
//! The wire format here is this project's own -- a flat, uncompressed
//! sequence of typed entries -- rather than the teacher's bit-packed
//! length-prefix scheme with LZF string compression; there is no
//! compression dependency to carry for it (see DESIGN.md).

use std::fs::{rename, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::process::exit;

use libc::{close, fork, pid_t};

use crate::server::Server;
use crate::util::{self, LogLevel};
use crate::value::Value;

pub const MAGIC: &[u8] = b"CUTIS0000";
const OP_SELECT_DB: u8 = 0xFE;
const OP_EOF: u8 = 0xFF;

const TYPE_STRING: u8 = 0;
const TYPE_LIST: u8 = 1;
const TYPE_SET: u8 = 2;

fn write_len(w: &mut impl Write, n: u32) -> std::io::Result<()> {
    w.write_all(&n.to_be_bytes())
}

fn read_len(r: &mut impl Read) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn write_bytes(w: &mut impl Write, bytes: &[u8]) -> std::io::Result<()> {
    write_len(w, bytes.len() as u32)?;
    w.write_all(bytes)
}

fn read_bytes(r: &mut impl Read) -> std::io::Result<Vec<u8>> {
    let n = read_len(r)? as usize;
    let mut buf = vec![0u8; n];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Foreground, blocking save: writes a temp file then renames it over the
/// configured dump file so a reader never observes a half-written snapshot.
pub fn save(server: &mut Server) -> Result<(), String> {
    let tmp_file = format!("dump-{}.{}.cdb", std::process::id(), rand::random::<u32>());
    write_snapshot(server, &tmp_file)?;
    rename(&tmp_file, &server.config.dump_file).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_file);
        format!("rename {tmp_file} -> {}: {e}", server.config.dump_file)
    })?;
    util::log(server.config.verbosity, LogLevel::Notice, &server.config.log_file, "DB saved on disk");
    server.dirty = 0;
    server.last_save = util::get_time_ms();
    Ok(())
}

fn write_snapshot(server: &Server, path: &str) -> Result<(), String> {
    let file = OpenOptions::new().create(true).write(true).truncate(true).open(path).map_err(|e| e.to_string())?;
    let mut w = BufWriter::new(file);
    w.write_all(MAGIC).map_err(|e| e.to_string())?;

    for (i, db) in server.dbs.iter().enumerate() {
        if db.is_empty() {
            continue;
        }
        w.write_all(&[OP_SELECT_DB]).map_err(|e| e.to_string())?;
        write_len(&mut w, i as u32).map_err(|e| e.to_string())?;
        for (key, val) in db.iter() {
            write_entry(&mut w, key, val).map_err(|e| e.to_string())?;
        }
    }

    w.write_all(&[OP_EOF]).map_err(|e| e.to_string())?;
    w.flush().map_err(|e| e.to_string())?;
    w.get_ref().sync_all().map_err(|e| e.to_string())?;
    Ok(())
}

fn write_entry(w: &mut impl Write, key: &[u8], val: &Value) -> std::io::Result<()> {
    w.write_all(&[val.type_code()])?;
    write_bytes(w, key)?;
    match val {
        Value::Str(s) => write_bytes(w, s)?,
        Value::List(l) => {
            let items = l.borrow().to_vec();
            write_len(w, items.len() as u32)?;
            for item in items {
                write_bytes(w, &item)?;
            }
        },
        Value::Set(s) => {
            let set = s.borrow();
            write_len(w, set.len() as u32)?;
            for member in set.iter() {
                write_bytes(w, member)?;
            }
        },
    }
    Ok(())
}

/// Loads a snapshot at startup. A short read, a duplicate key, or a
/// database index the current `databases` count can't hold is a fatal
/// configuration/data mismatch, not something to silently paper over.
pub fn load(server: &mut Server, path: &str) -> Result<(), String> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return Ok(()), // no snapshot yet -- fresh start
    };
    let mut r = BufReader::new(file);

    let mut magic = vec![0u8; MAGIC.len()];
    r.read_exact(&mut magic).map_err(|e| format!("short read on magic: {e}"))?;
    if magic != MAGIC {
        fatal(server, "Wrong signature trying to load DB from file");
    }

    let mut db_idx = 0usize;
    loop {
        let mut op = [0u8; 1];
        if r.read_exact(&mut op).is_err() {
            fatal(server, "Short read or OOM loading DB. Unrecoverable error, aborting now.");
        }
        match op[0] {
            OP_EOF => break,
            OP_SELECT_DB => {
                let idx = read_len(&mut r).map_err(|e| e.to_string())? as usize;
                if idx >= server.dbs.len() {
                    fatal(server, "Data file references a database index beyond `databases`");
                }
                db_idx = idx;
            },
            type_code => {
                let key = read_bytes(&mut r).map_err(|e| e.to_string())?;
                let val = read_value(&mut r, type_code)?;
                if server.dbs[db_idx].contains(&key) {
                    fatal(server, "Duplicate key found loading DB");
                }
                server.dbs[db_idx].add(key, std::rc::Rc::new(val));
            },
        }
    }
    Ok(())
}

fn read_value(r: &mut impl Read, type_code: u8) -> Result<Value, String> {
    match type_code {
        TYPE_STRING => {
            let s = read_bytes(r).map_err(|e| e.to_string())?;
            Ok(Value::Str(std::rc::Rc::new(s)))
        },
        TYPE_LIST => {
            let n = read_len(r).map_err(|e| e.to_string())?;
            let mut l = crate::list::List::new();
            for _ in 0..n {
                l.push_back(std::rc::Rc::new(read_bytes(r).map_err(|e| e.to_string())?));
            }
            Ok(Value::List(std::cell::RefCell::new(l)))
        },
        TYPE_SET => {
            let n = read_len(r).map_err(|e| e.to_string())?;
            let mut s = std::collections::HashSet::new();
            for _ in 0..n {
                s.insert(std::rc::Rc::new(read_bytes(r).map_err(|e| e.to_string())?));
            }
            Ok(Value::Set(std::cell::RefCell::new(s)))
        },
        other => Err(format!("unknown value type tag {other} in snapshot")),
    }
}

fn fatal(server: &Server, msg: &str) -> ! {
    util::log(server.config.verbosity, LogLevel::Warning, &server.config.log_file, msg);
    exit(1);
}

/// Forks a child that writes the snapshot and exits 0/1 accordingly; the
/// parent just records the child pid and returns immediately. The cron
/// tick reaps it with `wait4(..., WNOHANG)`.
pub fn save_background(server: &mut Server) -> Result<pid_t, String> {
    let pid = unsafe { fork() };
    if pid < 0 {
        return Err(format!("fork: {}", util::error()));
    }
    if pid == 0 {
        unsafe { close(server.listen_fd) };
        match save(server) {
            Ok(()) => exit(0),
            Err(_) => exit(1),
        }
    }
    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_roundtrips_through_byte_buffers() {
        let mut buf = Vec::new();
        write_entry(&mut buf, b"greeting", &Value::Str(std::rc::Rc::new(b"hi".to_vec()))).unwrap();
        let mut cur = std::io::Cursor::new(buf);
        let mut type_byte = [0u8; 1];
        std::io::Read::read_exact(&mut cur, &mut type_byte).unwrap();
        assert_eq!(type_byte[0], TYPE_STRING);
        let key = read_bytes(&mut cur).unwrap();
        assert_eq!(key, b"greeting");
        let val = read_value(&mut cur, TYPE_STRING).unwrap();
        assert!(matches!(val, Value::Str(ref s) if s.as_slice() == b"hi"));
    }

    #[test]
    fn list_and_set_entries_roundtrip() {
        let mut l = crate::list::List::new();
        l.push_back(std::rc::Rc::new(b"a".to_vec()));
        l.push_back(std::rc::Rc::new(b"b".to_vec()));
        let mut buf = Vec::new();
        write_entry(&mut buf, b"mylist", &Value::List(std::cell::RefCell::new(l))).unwrap();
        let mut cur = std::io::Cursor::new(buf);
        let mut type_byte = [0u8; 1];
        std::io::Read::read_exact(&mut cur, &mut type_byte).unwrap();
        let _key = read_bytes(&mut cur).unwrap();
        let val = read_value(&mut cur, type_byte[0]).unwrap();
        match val {
            Value::List(l) => assert_eq!(l.borrow().to_vec().len(), 2),
            _ => panic!("expected list"),
        }
    }
}
