//! Command table and handler implementations.
//!
//! Every handler has the shape `fn(&mut Server, i32)`: it reads the calling
//! client's already-complete `argv` out of `server.clients`, mutates
//! `server.dbs`, and queues its reply through `client::add_reply*`. Reply
//! formatting here is this protocol's own (bare decimal lengths, no `:`/`*`
//! sigils) and intentionally does not reuse the teacher's RESP encoder.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::client::{self, StepResult};
use crate::list::List;
use crate::pattern::glob_match;
use crate::server::Server;
use crate::value::{self, bytes_from, Bytes, Value};

pub struct CommandSpec {
    pub name: &'static str,
    /// Positive: exact argument count (including the command name).
    /// Negative: minimum argument count, `-n` means "at least n".
    pub arity: i32,
    /// Whether the last inline argument is actually a byte-count prefix for
    /// a trailing bulk payload that replaces it once fully read.
    pub bulk: bool,
    pub handler: fn(&mut Server, i32),
}

macro_rules! table {
    ($(($name:expr, $arity:expr, $bulk:expr, $handler:expr)),* $(,)?) => {
        &[$(CommandSpec { name: $name, arity: $arity, bulk: $bulk, handler: $handler }),*]
    };
}

static COMMANDS: &[CommandSpec] = table![
    ("ping", 1, false, ping_command),
    ("echo", 2, true, echo_command),
    ("quit", 1, false, quit_command),
    ("select", 2, false, select_command),
    ("set", 3, true, set_command),
    ("setnx", 3, true, setnx_command),
    ("get", 2, false, get_command),
    ("exists", 2, false, exists_command),
    ("del", 2, false, del_command),
    ("incr", 2, false, incr_command),
    ("decr", 2, false, decr_command),
    ("type", 2, false, type_command),
    ("keys", 2, false, keys_command),
    ("randomkey", 1, false, randomkey_command),
    ("rename", 3, false, rename_command),
    ("renamenx", 3, false, renamenx_command),
    ("move", 3, false, move_command),
    ("dbsize", 1, false, dbsize_command),
    ("rpush", 3, true, rpush_command),
    ("lpush", 3, true, lpush_command),
    ("llen", 2, false, llen_command),
    ("lindex", 3, false, lindex_command),
    ("lrange", 4, false, lrange_command),
    ("ltrim", 4, false, ltrim_command),
    ("lset", 4, true, lset_command),
    ("lrem", 4, true, lrem_command),
    ("lpop", 2, false, lpop_command),
    ("rpop", 2, false, rpop_command),
    ("rpoplpush", 3, false, rpoplpush_command),
    ("sadd", 3, true, sadd_command),
    ("srem", 3, true, srem_command),
    ("sismember", 3, true, sismember_command),
    ("scard", 2, false, scard_command),
    ("sinter", -2, false, sinter_command),
    ("smembers", 2, false, sinter_command),
    ("save", 1, false, save_command),
    ("bgsave", 1, false, bgsave_command),
    ("lastsave", 1, false, lastsave_command),
    ("shutdown", 1, false, shutdown_command),
];

pub fn lookup(name: &[u8]) -> Option<&'static CommandSpec> {
    let lower = name.to_ascii_lowercase();
    COMMANDS.iter().find(|c| c.name.as_bytes() == lower.as_slice())
}

/// Dispatches the client's fully-assembled `argv`. Called only once the
/// parser has a complete command (immediately for non-bulk commands, after
/// the trailing bulk payload arrives otherwise).
pub(crate) fn process_command(server: &mut Server, fd: i32) -> StepResult {
    let name = match server.clients.get(&fd) {
        Some(c) if !c.argv.is_empty() => c.argv[0].clone(),
        _ => return StepResult::Stop,
    };
    let spec = match lookup(&name) {
        Some(s) => s,
        None => return StepResult::Progressed,
    };
    (spec.handler)(server, fd);
    if server.clients.contains_key(&fd) {
        StepResult::Progressed
    } else {
        StepResult::Stop
    }
}

fn argv(server: &Server, fd: i32) -> Vec<Vec<u8>> {
    server.clients[&fd].argv.clone()
}

fn db_index(server: &Server, fd: i32) -> usize {
    server.clients[&fd].db_index
}

fn touch_dirty(server: &mut Server) {
    server.dirty += 1;
}

// ---------------------------------------------------------------- general

fn ping_command(server: &mut Server, fd: i32) {
    client::add_reply(server, fd, value::PONG);
}

fn echo_command(server: &mut Server, fd: i32) {
    let a = argv(server, fd);
    let msg = a[1].clone();
    client::add_reply_owned(server, fd, client::bulk_reply(&msg));
}

fn quit_command(server: &mut Server, fd: i32) {
    client::add_reply(server, fd, value::OK);
    server.free_client(fd);
}

fn select_command(server: &mut Server, fd: i32) {
    let a = argv(server, fd);
    let idx: i64 = match std::str::from_utf8(&a[1]).ok().and_then(|s| s.parse().ok()) {
        Some(i) => i,
        None => return client::add_reply(server, fd, value::ERR_GENERIC),
    };
    if idx < 0 || idx as usize >= server.dbs.len() {
        return client::add_reply_owned(server, fd, client::error_reply("invalid DB index"));
    }
    if let Some(c) = server.clients.get_mut(&fd) {
        c.db_index = idx as usize;
    }
    client::add_reply(server, fd, value::OK);
}

fn shutdown_command(server: &mut Server, fd: i32) {
    match crate::rdb::save(server) {
        Ok(()) => server.event_loop.stop = true,
        Err(_) => client::add_reply_owned(server, fd, client::error_reply("can't quit, problems saving the DB")),
    }
}

fn save_command(server: &mut Server, fd: i32) {
    match crate::rdb::save(server) {
        Ok(()) => client::add_reply(server, fd, value::OK),
        Err(_) => client::add_reply_owned(server, fd, client::error_reply("background save failed")),
    }
}

fn bgsave_command(server: &mut Server, fd: i32) {
    if server.bg_saving_pid.is_some() {
        return client::add_reply_owned(server, fd, client::error_reply("background save already in progress"));
    }
    match server.start_background_save() {
        Ok(()) => client::add_reply_owned(server, fd, client::status_reply("Background saving started")),
        Err(e) => client::add_reply_owned(server, fd, client::error_reply(&e)),
    }
}

fn lastsave_command(server: &mut Server, fd: i32) {
    client::add_reply_owned(server, fd, client::int_reply(server.last_save as i64));
}

// ---------------------------------------------------------------- generic keyspace

fn exists_command(server: &mut Server, fd: i32) {
    let a = argv(server, fd);
    let idx = db_index(server, fd);
    let found = server.dbs[idx].contains(&a[1]);
    client::add_reply(server, fd, if found { value::C_ONE } else { value::C_ZERO });
}

fn del_command(server: &mut Server, fd: i32) {
    let a = argv(server, fd);
    let idx = db_index(server, fd);
    if server.dbs[idx].delete(&a[1]) {
        touch_dirty(server);
    }
    client::add_reply(server, fd, value::OK);
}

fn type_command(server: &mut Server, fd: i32) {
    let a = argv(server, fd);
    let idx = db_index(server, fd);
    let name = server.dbs[idx].find(&a[1]).map(|v| v.type_name()).unwrap_or("none");
    client::add_reply_owned(server, fd, client::status_reply(name));
}

fn keys_command(server: &mut Server, fd: i32) {
    let a = argv(server, fd);
    let idx = db_index(server, fd);
    let pattern = &a[1];
    let all_keys = pattern == b"*";
    let mut matched: Vec<&Vec<u8>> = server.dbs[idx]
        .iter()
        .filter(|(k, _)| all_keys || glob_match(pattern, k, false))
        .map(|(k, _)| k)
        .collect();
    matched.sort();
    let mut out = Vec::new();
    out.extend_from_slice(client::int_reply(matched.len() as i64).as_slice());
    for k in matched {
        out.extend_from_slice(&client::bulk_reply(k));
    }
    client::add_reply_owned(server, fd, out);
}

fn randomkey_command(server: &mut Server, fd: i32) {
    let idx = db_index(server, fd);
    match server.dbs[idx].get_random() {
        Some((k, _)) => client::add_reply_owned(server, fd, client::bulk_reply(k)),
        None => client::add_reply(server, fd, value::EMPTY_BULK),
    }
}

fn dbsize_command(server: &mut Server, fd: i32) {
    let idx = db_index(server, fd);
    client::add_reply_owned(server, fd, client::int_reply(server.dbs[idx].len() as i64));
}

fn rename_generic(server: &mut Server, fd: i32, overwrite: bool) {
    let a = argv(server, fd);
    let idx = db_index(server, fd);
    let (src, dst) = (&a[1], &a[2]);
    if src == dst {
        return client::add_reply(server, fd, value::SAME_OBJECT_ERR);
    }
    let val = match server.dbs[idx].delete_no_free(src) {
        Some((_, v)) => v,
        None => return client::add_reply(server, fd, value::NO_KEY_ERR),
    };
    if !overwrite && server.dbs[idx].contains(dst) {
        server.dbs[idx].replace(src.clone(), val);
        return client::add_reply_owned(server, fd, client::error_reply("destination key exists"));
    }
    server.dbs[idx].replace(dst.clone(), val);
    touch_dirty(server);
    client::add_reply(server, fd, value::OK);
}

fn rename_command(server: &mut Server, fd: i32) {
    rename_generic(server, fd, true);
}

fn renamenx_command(server: &mut Server, fd: i32) {
    rename_generic(server, fd, false);
}

fn move_command(server: &mut Server, fd: i32) {
    let a = argv(server, fd);
    let idx = db_index(server, fd);
    let dst_idx: i64 = match std::str::from_utf8(&a[2]).ok().and_then(|s| s.parse().ok()) {
        Some(n) => n,
        None => return client::add_reply(server, fd, value::ERR_GENERIC),
    };
    if dst_idx < 0 || dst_idx as usize >= server.dbs.len() {
        return client::add_reply_owned(server, fd, client::error_reply("invalid DB index"));
    }
    let dst_idx = dst_idx as usize;
    if dst_idx == idx {
        return client::add_reply(server, fd, value::SAME_OBJECT_ERR);
    }
    if !server.dbs[idx].contains(&a[1]) {
        return client::add_reply(server, fd, value::NO_KEY_ERR);
    }
    if server.dbs[dst_idx].contains(&a[1]) {
        return client::add_reply_owned(server, fd, client::error_reply("target DB already contains the moved key"));
    }
    let (_, val) = server.dbs[idx].delete_no_free(&a[1]).unwrap();
    server.dbs[dst_idx].replace(a[1].clone(), val);
    touch_dirty(server);
    client::add_reply(server, fd, value::OK);
}

// ---------------------------------------------------------------- strings

fn set_command(server: &mut Server, fd: i32) {
    let a = argv(server, fd);
    let idx = db_index(server, fd);
    server.dbs[idx].replace(a[1].clone(), Rc::new(Value::Str(bytes_from(&a[2]))));
    touch_dirty(server);
    client::add_reply(server, fd, value::OK);
}

fn setnx_command(server: &mut Server, fd: i32) {
    let a = argv(server, fd);
    let idx = db_index(server, fd);
    if server.dbs[idx].contains(&a[1]) {
        return client::add_reply(server, fd, value::C_ZERO);
    }
    server.dbs[idx].add(a[1].clone(), Rc::new(Value::Str(bytes_from(&a[2]))));
    touch_dirty(server);
    client::add_reply(server, fd, value::C_ONE);
}

fn get_command(server: &mut Server, fd: i32) {
    let a = argv(server, fd);
    let idx = db_index(server, fd);
    match server.dbs[idx].find(&a[1]) {
        None => client::add_reply(server, fd, value::NIL),
        Some(v) => match v.as_str() {
            Some(s) => {
                let bytes = s.to_vec();
                client::add_reply_owned(server, fd, client::bulk_reply(&bytes));
            },
            None => client::add_reply(server, fd, value::WRONG_TYPE_ERR),
        },
    }
}

fn incr_decr(server: &mut Server, fd: i32, delta: i64) {
    let a = argv(server, fd);
    let idx = db_index(server, fd);
    let current: i64 = match server.dbs[idx].find(&a[1]) {
        None => 0,
        Some(v) => match v.as_str() {
            Some(s) => match std::str::from_utf8(s).ok().and_then(|s| s.trim().parse().ok()) {
                Some(n) => n,
                None => return client::add_reply_owned(server, fd, client::error_reply("value is not an integer")),
            },
            None => return client::add_reply(server, fd, value::WRONG_TYPE_ERR),
        },
    };
    let next = current.wrapping_add(delta);
    let rendered = next.to_string().into_bytes();
    server.dbs[idx].replace(a[1].clone(), Rc::new(Value::Str(Rc::new(rendered))));
    touch_dirty(server);
    client::add_reply_owned(server, fd, client::int_reply(next));
}

fn incr_command(server: &mut Server, fd: i32) {
    incr_decr(server, fd, 1);
}

fn decr_command(server: &mut Server, fd: i32) {
    incr_decr(server, fd, -1);
}

// ---------------------------------------------------------------- lists

fn push_generic(server: &mut Server, fd: i32, front: bool) {
    let a = argv(server, fd);
    let idx = db_index(server, fd);
    let existing = server.dbs[idx].find(&a[1]).cloned();
    match existing {
        Some(v) => match v.as_list() {
            Some(l) => {
                if front {
                    l.borrow_mut().push_front(bytes_from(&a[2]));
                } else {
                    l.borrow_mut().push_back(bytes_from(&a[2]));
                }
            },
            None => return client::add_reply(server, fd, value::WRONG_TYPE_ERR),
        },
        None => {
            let mut l = List::new();
            l.push_back(bytes_from(&a[2]));
            server.dbs[idx].add(a[1].clone(), Rc::new(Value::List(RefCell::new(l))));
        },
    }
    touch_dirty(server);
    client::add_reply(server, fd, value::OK);
}

fn rpush_command(server: &mut Server, fd: i32) {
    push_generic(server, fd, false);
}

fn lpush_command(server: &mut Server, fd: i32) {
    push_generic(server, fd, true);
}

fn llen_command(server: &mut Server, fd: i32) {
    let a = argv(server, fd);
    let idx = db_index(server, fd);
    match server.dbs[idx].find(&a[1]) {
        None => client::add_reply(server, fd, value::C_ZERO),
        Some(v) => match v.as_list() {
            Some(l) => client::add_reply_owned(server, fd, client::int_reply(l.borrow().len() as i64)),
            None => client::add_reply(server, fd, value::NEG_ONE),
        },
    }
}

fn lindex_command(server: &mut Server, fd: i32) {
    let a = argv(server, fd);
    let index: isize = match std::str::from_utf8(&a[2]).ok().and_then(|s| s.parse().ok()) {
        Some(n) => n,
        None => return client::add_reply(server, fd, value::ERR_GENERIC),
    };
    let idx = db_index(server, fd);
    match server.dbs[idx].find(&a[1]) {
        None => client::add_reply(server, fd, value::NIL),
        Some(v) => match v.as_list() {
            Some(l) => match l.borrow().get(index) {
                Some(item) => client::add_reply_owned(server, fd, client::bulk_reply(&item)),
                None => client::add_reply(server, fd, value::NIL),
            },
            None => client::add_reply(server, fd, value::WRONG_TYPE_ERR),
        },
    }
}

fn lrange_command(server: &mut Server, fd: i32) {
    let a = argv(server, fd);
    let idx = db_index(server, fd);
    let list_len = match server.dbs[idx].find(&a[1]) {
        None => return client::add_reply_owned(server, fd, client::int_reply(0)),
        Some(v) => match v.as_list() {
            Some(l) => l.borrow().len(),
            None => return client::add_reply(server, fd, value::WRONG_TYPE_ERR),
        },
    };
    let (start, end) = match parse_range(&a[2], &a[3], list_len) {
        Some(r) => r,
        None => return client::add_reply(server, fd, value::ERR_GENERIC),
    };
    let items = match server.dbs[idx].find(&a[1]).unwrap().as_list() {
        Some(l) => l.borrow().range(start, end),
        None => unreachable!(),
    };
    let mut out = client::int_reply(items.len() as i64);
    for item in items {
        out.extend_from_slice(&client::bulk_reply(&item));
    }
    client::add_reply_owned(server, fd, out);
}

fn ltrim_command(server: &mut Server, fd: i32) {
    let a = argv(server, fd);
    let idx = db_index(server, fd);
    let list_len = match server.dbs[idx].find(&a[1]) {
        None => return client::add_reply(server, fd, value::OK),
        Some(v) => match v.as_list() {
            Some(l) => l.borrow().len(),
            None => return client::add_reply(server, fd, value::WRONG_TYPE_ERR),
        },
    };
    match parse_range(&a[2], &a[3], list_len) {
        Some((start, end)) => {
            if let Some(l) = server.dbs[idx].find(&a[1]).unwrap().as_list() {
                l.borrow_mut().retain_range(start, end);
            }
            touch_dirty(server);
            client::add_reply(server, fd, value::OK);
        },
        None => client::add_reply(server, fd, value::ERR_GENERIC),
    }
}

fn lset_command(server: &mut Server, fd: i32) {
    let a = argv(server, fd);
    let index: isize = match std::str::from_utf8(&a[2]).ok().and_then(|s| s.parse().ok()) {
        Some(n) => n,
        None => return client::add_reply(server, fd, value::ERR_GENERIC),
    };
    let idx = db_index(server, fd);
    match server.dbs[idx].find(&a[1]) {
        None => client::add_reply(server, fd, value::NO_KEY_ERR),
        Some(v) => match v.as_list() {
            Some(l) => {
                if l.borrow().set(index, bytes_from(&a[3])) {
                    touch_dirty(server);
                    client::add_reply(server, fd, value::OK);
                } else {
                    client::add_reply(server, fd, value::OUT_OF_RANGE_ERR);
                }
            },
            None => client::add_reply(server, fd, value::WRONG_TYPE_ERR),
        },
    }
}

fn lrem_command(server: &mut Server, fd: i32) {
    let a = argv(server, fd);
    let count: i64 = match std::str::from_utf8(&a[2]).ok().and_then(|s| s.parse().ok()) {
        Some(n) => n,
        None => return client::add_reply(server, fd, value::ERR_GENERIC),
    };
    let idx = db_index(server, fd);
    let target = a[3].clone();
    match server.dbs[idx].find(&a[1]) {
        None => client::add_reply(server, fd, value::C_ZERO),
        Some(v) => match v.as_list() {
            Some(l) => {
                let from_tail = count < 0;
                let removed = l
                    .borrow_mut()
                    .remove_matching(count.unsigned_abs() as usize, from_tail, |item| item.as_slice() == target.as_slice());
                if removed > 0 {
                    touch_dirty(server);
                }
                client::add_reply_owned(server, fd, client::int_reply(removed as i64));
            },
            None => client::add_reply(server, fd, value::WRONG_TYPE_ERR),
        },
    }
}

fn pop_generic(server: &mut Server, fd: i32, front: bool) {
    let a = argv(server, fd);
    let idx = db_index(server, fd);
    let val = match server.dbs[idx].find(&a[1]) {
        None => return client::add_reply(server, fd, value::NIL),
        Some(v) => v.clone(),
    };
    let list = match val.as_list() {
        Some(l) => l,
        None => return client::add_reply(server, fd, value::WRONG_TYPE_ERR),
    };
    let popped = if front { list.borrow_mut().pop_front() } else { list.borrow_mut().pop_back() };
    let now_empty = list.borrow().is_empty();
    if now_empty {
        server.dbs[idx].delete(&a[1]);
    }
    match popped {
        Some(item) => {
            touch_dirty(server);
            client::add_reply_owned(server, fd, client::bulk_reply(&item));
        },
        None => client::add_reply(server, fd, value::NIL),
    }
}

fn lpop_command(server: &mut Server, fd: i32) {
    pop_generic(server, fd, true);
}

fn rpop_command(server: &mut Server, fd: i32) {
    pop_generic(server, fd, false);
}

fn rpoplpush_command(server: &mut Server, fd: i32) {
    let a = argv(server, fd);
    let idx = db_index(server, fd);
    let src_val = match server.dbs[idx].find(&a[1]) {
        None => return client::add_reply(server, fd, value::NIL),
        Some(v) => v.clone(),
    };
    let src_list = match src_val.as_list() {
        Some(l) => l,
        None => return client::add_reply(server, fd, value::WRONG_TYPE_ERR),
    };
    let item = match src_list.borrow_mut().pop_back() {
        Some(item) => item,
        None => return client::add_reply(server, fd, value::NIL),
    };
    if src_list.borrow().is_empty() {
        server.dbs[idx].delete(&a[1]);
    }

    let dst_existing = server.dbs[idx].find(&a[2]).cloned();
    match dst_existing {
        Some(v) => match v.as_list() {
            Some(l) => l.borrow_mut().push_front(item.clone()),
            None => return client::add_reply(server, fd, value::WRONG_TYPE_ERR),
        },
        None => {
            let mut l = List::new();
            l.push_back(item.clone());
            server.dbs[idx].add(a[2].clone(), Rc::new(Value::List(RefCell::new(l))));
        },
    }
    touch_dirty(server);
    client::add_reply_owned(server, fd, client::bulk_reply(&item));
}

fn parse_range(start_tok: &[u8], end_tok: &[u8], len: usize) -> Option<(usize, usize)> {
    let start: isize = std::str::from_utf8(start_tok).ok()?.parse().ok()?;
    let end: isize = std::str::from_utf8(end_tok).ok()?.parse().ok()?;
    let norm = |i: isize| -> isize {
        if i < 0 {
            (len as isize + i).max(0)
        } else {
            i
        }
    };
    Some((norm(start) as usize, norm(end) as usize))
}

// ---------------------------------------------------------------- sets

fn sadd_command(server: &mut Server, fd: i32) {
    let a = argv(server, fd);
    let idx = db_index(server, fd);
    let existing = server.dbs[idx].find(&a[1]).cloned();
    let member = bytes_from(&a[2]);
    let added = match existing {
        Some(v) => match v.as_set() {
            Some(s) => s.borrow_mut().insert(member),
            None => return client::add_reply(server, fd, value::WRONG_TYPE_ERR),
        },
        None => {
            let mut s = HashSet::new();
            s.insert(member);
            server.dbs[idx].add(a[1].clone(), Rc::new(Value::Set(RefCell::new(s))));
            true
        },
    };
    if added {
        touch_dirty(server);
    }
    client::add_reply(server, fd, if added { value::C_ONE } else { value::C_ZERO });
}

fn srem_command(server: &mut Server, fd: i32) {
    let a = argv(server, fd);
    let idx = db_index(server, fd);
    let member = a[2].clone();
    match server.dbs[idx].find(&a[1]) {
        None => client::add_reply(server, fd, value::C_ZERO),
        Some(v) => match v.as_set() {
            Some(s) => {
                let removed = s.borrow_mut().remove(&member);
                if removed {
                    touch_dirty(server);
                    let empty = s.borrow().is_empty();
                    if empty {
                        server.dbs[idx].delete(&a[1]);
                    }
                }
                client::add_reply(server, fd, if removed { value::C_ONE } else { value::C_ZERO });
            },
            None => client::add_reply(server, fd, value::WRONG_TYPE_ERR),
        },
    }
}

fn sismember_command(server: &mut Server, fd: i32) {
    let a = argv(server, fd);
    let idx = db_index(server, fd);
    let member = a[2].clone();
    match server.dbs[idx].find(&a[1]) {
        None => client::add_reply(server, fd, value::C_ZERO),
        Some(v) => match v.as_set() {
            Some(s) => client::add_reply(server, fd, if s.borrow().contains(&member) { value::C_ONE } else { value::C_ZERO }),
            None => client::add_reply(server, fd, value::WRONG_TYPE_ERR),
        },
    }
}

fn scard_command(server: &mut Server, fd: i32) {
    let a = argv(server, fd);
    let idx = db_index(server, fd);
    match server.dbs[idx].find(&a[1]) {
        None => client::add_reply(server, fd, value::C_ZERO),
        Some(v) => match v.as_set() {
            Some(s) => client::add_reply_owned(server, fd, client::int_reply(s.borrow().len() as i64)),
            None => client::add_reply(server, fd, value::WRONG_TYPE_ERR),
        },
    }
}

/// A single key behaves like `SMEMBERS`; several keys intersect. Sorting by
/// cardinality first keeps the intersection loop's inner scans small, and a
/// wrong-typed key anywhere in the list short-circuits the whole command.
fn sinter_command(server: &mut Server, fd: i32) {
    let a = argv(server, fd);
    let idx = db_index(server, fd);
    let mut sets: Vec<Rc<Value>> = Vec::with_capacity(a.len() - 1);
    for key in &a[1..] {
        match server.dbs[idx].find(key) {
            None => return client::add_reply_owned(server, fd, client::int_reply(0)),
            Some(v) => {
                if v.as_set().is_none() {
                    return client::add_reply(server, fd, value::WRONG_TYPE_ERR);
                }
                sets.push(v.clone());
            },
        }
    }
    sets.sort_by_key(|v| v.as_set().unwrap().borrow().len());

    let mut result: Vec<Bytes> = sets[0].as_set().unwrap().borrow().iter().cloned().collect();
    for s in &sets[1..] {
        let other = s.as_set().unwrap().borrow();
        result.retain(|m| other.contains(m));
        if result.is_empty() {
            break;
        }
    }

    let mut out = client::int_reply(result.len() as i64);
    for m in result {
        out.extend_from_slice(&client::bulk_reply(&m));
    }
    client::add_reply_owned(server, fd, out);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(lookup(b"GET").is_some());
        assert!(lookup(b"Get").is_some());
        assert!(lookup(b"bogus").is_none());
    }

    #[test]
    fn parse_range_clamps_negative_indices() {
        assert_eq!(parse_range(b"-2", b"-1", 5), Some((3, 4)));
        assert_eq!(parse_range(b"0", b"-1", 5), Some((0, 4)));
    }

    #[test]
    fn every_command_has_a_nonzero_arity() {
        for c in COMMANDS {
            assert!(!c.name.is_empty());
            assert!(c.arity != 0);
        }
    }
}
