//! Per-connection state machine: query buffer, inline/bulk argument parser,
//! and the reply queue drained by the writable callback.

use std::borrow::Cow;
use std::collections::VecDeque;

use crate::cmd;
use crate::eventloop::Mask;
use crate::server::Server;
use crate::util::get_time_ms;
use crate::value;

pub const MAX_ARGS: usize = 16;
pub const MAX_INLINE_LEN: usize = 1024;
pub const MAX_STRING_LEN: i64 = 1_073_741_824; // CUTIS_MAX_STRING_LENGTH, 1 GiB
const IO_BUF_LEN: usize = 1024;
const MAX_WRITE_PER_EVENT: usize = 1024 * 64;

pub struct Client {
    pub fd: i32,
    pub addr: String,
    pub db_index: usize,
    pub query_buf: Vec<u8>,
    pub argv: Vec<Vec<u8>>,
    /// -1 means "reading inline"; otherwise the number of raw bytes still
    /// needed to complete the pending bulk argument (payload + CRLF).
    pub bulk_len: i64,
    pub reply_queue: VecDeque<Cow<'static, [u8]>>,
    pub sent_len: usize,
    pub last_interaction: u128,
    pub should_close: bool,
}

impl Client {
    pub fn new(fd: i32, addr: String) -> Self {
        Client {
            fd,
            addr,
            db_index: 0,
            query_buf: Vec::new(),
            argv: Vec::new(),
            bulk_len: -1,
            reply_queue: VecDeque::new(),
            sent_len: 0,
            last_interaction: get_time_ms(),
            should_close: false,
        }
    }

    pub fn reset(&mut self) {
        self.argv.clear();
        self.bulk_len = -1;
    }
}

/// Queues a shared, immortal reply fragment. Registers a writable interest
/// the first time something lands in an empty queue.
pub fn add_reply(server: &mut Server, fd: i32, data: &'static [u8]) {
    add_reply_cow(server, fd, Cow::Borrowed(data));
}

/// Queues a freshly produced reply (bulk payloads, formatted integers...).
pub fn add_reply_owned(server: &mut Server, fd: i32, data: Vec<u8>) {
    add_reply_cow(server, fd, Cow::Owned(data));
}

fn add_reply_cow(server: &mut Server, fd: i32, data: Cow<'static, [u8]>) {
    let was_empty = server.clients.get(&fd).map_or(true, |c| c.reply_queue.is_empty());
    if let Some(c) = server.clients.get_mut(&fd) {
        c.reply_queue.push_back(data);
    } else {
        return;
    }
    if was_empty {
        let _ = server.event_loop.create_file_event(fd, Mask::Writable, send_reply_to_client);
    }
}

/// Formats a value as this protocol's bulk form: `<len>\r\n<bytes>\r\n`.
pub fn bulk_reply(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 16);
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.extend_from_slice(value::CRLF);
    out.extend_from_slice(bytes);
    out.extend_from_slice(value::CRLF);
    out
}

/// Formats a bare decimal integer reply (no `:` sigil in this protocol).
pub fn int_reply(n: i64) -> Vec<u8> {
    format!("{n}\r\n").into_bytes()
}

pub fn status_reply(status: &str) -> Vec<u8> {
    format!("+{status}\r\n").into_bytes()
}

pub fn error_reply(msg: &str) -> Vec<u8> {
    format!("-ERR {msg}\r\n").into_bytes()
}

/// Readable callback: read up to `IO_BUF_LEN` bytes, append to the query
/// buffer, then drive the parser until it cannot make progress.
pub fn read_query_from_client(server: &mut Server, fd: i32, _mask: Mask) {
    let mut buf = [0u8; IO_BUF_LEN];
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, IO_BUF_LEN) };

    if n == 0 {
        server.free_client(fd);
        return;
    }
    if n < 0 {
        let err = crate::util::error();
        if err == libc::EAGAIN || err == libc::EWOULDBLOCK {
            return;
        }
        server.free_client(fd);
        return;
    }

    if let Some(c) = server.clients.get_mut(&fd) {
        c.query_buf.extend_from_slice(&buf[..n as usize]);
        c.last_interaction = get_time_ms();
    } else {
        return;
    }

    process_input_buffer(server, fd);
}

/// Drains the reply queue, respecting a per-call write budget so one very
/// chatty client cannot starve the rest of the loop.
pub fn send_reply_to_client(server: &mut Server, fd: i32, _mask: Mask) {
    let mut total_written = 0usize;
    loop {
        if total_written >= MAX_WRITE_PER_EVENT {
            break;
        }
        let (chunk, sent_len) = match server.clients.get(&fd) {
            Some(c) => match c.reply_queue.front() {
                Some(chunk) => (chunk.clone().into_owned(), c.sent_len),
                None => break,
            },
            None => return,
        };

        let remaining = &chunk[sent_len..];
        let n = unsafe { libc::write(fd, remaining.as_ptr() as *const libc::c_void, remaining.len()) };
        if n < 0 {
            let err = crate::util::error();
            if err == libc::EAGAIN || err == libc::EWOULDBLOCK {
                break;
            }
            server.free_client(fd);
            return;
        }
        total_written += n as usize;
        if let Some(c) = server.clients.get_mut(&fd) {
            c.sent_len += n as usize;
            if c.sent_len >= chunk.len() {
                c.reply_queue.pop_front();
                c.sent_len = 0;
            }
        }
    }

    let queue_empty = server.clients.get(&fd).map_or(true, |c| c.reply_queue.is_empty());
    if queue_empty {
        server.event_loop.delete_file_event(fd, Mask::Writable);
    }
}

pub(crate) enum StepResult {
    /// A command line was dispatched; keep looping if bytes remain.
    Progressed,
    /// Not enough bytes yet; stop until the next readable callback.
    NeedMore,
    /// Protocol error or the client closed itself (e.g. via QUIT).
    Stop,
}

fn process_input_buffer(server: &mut Server, fd: i32) {
    loop {
        if server.clients.get(&fd).is_none() {
            return;
        }
        let bulk_len = server.clients[&fd].bulk_len;
        let step = if bulk_len == -1 { parse_inline(server, fd) } else { parse_bulk(server, fd) };
        match step {
            StepResult::Progressed => {
                if server.clients.get(&fd).map_or(true, |c| c.query_buf.is_empty()) {
                    break;
                }
            },
            StepResult::NeedMore | StepResult::Stop => break,
        }
    }
}

fn parse_inline(server: &mut Server, fd: i32) -> StepResult {
    let newline_pos = {
        let c = &server.clients[&fd];
        c.query_buf.iter().position(|&b| b == b'\n')
    };

    let nl = match newline_pos {
        Some(p) => p,
        None => {
            let too_long = server.clients[&fd].query_buf.len() >= MAX_INLINE_LEN;
            if too_long {
                crate::util::log(
                    server.config.verbosity,
                    crate::util::LogLevel::Verbose,
                    &server.config.log_file,
                    "Protocol error: too big inline request",
                );
                server.free_client(fd);
                return StepResult::Stop;
            }
            return StepResult::NeedMore;
        },
    };

    let line: Vec<u8> = {
        let c = server.clients.get_mut(&fd).unwrap();
        let mut line: Vec<u8> = c.query_buf.drain(..=nl).collect();
        line.pop(); // '\n'
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        line
    };

    let mut argv: Vec<Vec<u8>> = line
        .split(|&b| b == b' ')
        .filter(|tok| !tok.is_empty())
        .map(|tok| tok.to_vec())
        .take(MAX_ARGS)
        .collect();

    if argv.is_empty() {
        return StepResult::Progressed;
    }

    let spec = match cmd::lookup(&argv[0]) {
        Some(s) => s,
        None => {
            let name = String::from_utf8_lossy(&argv[0]).to_string();
            add_reply_owned(server, fd, error_reply(&format!("unknown command '{name}'")));
            reset_client(server, fd);
            return StepResult::Progressed;
        },
    };

    let arity_ok = if spec.arity >= 0 { argv.len() as i64 == spec.arity as i64 } else { argv.len() as i64 >= -(spec.arity as i64) };
    if !arity_ok {
        add_reply_owned(server, fd, error_reply(&format!("wrong number of arguments for '{}'", spec.name)));
        reset_client(server, fd);
        return StepResult::Progressed;
    }

    if spec.bulk {
        let len_tok = argv.pop().unwrap();
        let n: i64 = match std::str::from_utf8(&len_tok).ok().and_then(|s| s.trim().parse().ok()) {
            Some(n) if (0..=MAX_STRING_LEN).contains(&n) => n,
            _ => {
                add_reply_owned(server, fd, error_reply("invalid bulk length"));
                server.free_client(fd);
                return StepResult::Stop;
            },
        };
        if let Some(c) = server.clients.get_mut(&fd) {
            c.argv = argv;
            c.bulk_len = n + 2;
        }
        // It's a good idea to check this since the code above is small and
        // this condition happens most of the times: the payload already
        // arrived in the same read() as the command line.
        if server.clients[&fd].query_buf.len() >= (n + 2) as usize {
            return parse_bulk(server, fd);
        }
        return StepResult::NeedMore;
    }

    if let Some(c) = server.clients.get_mut(&fd) {
        c.argv = argv;
    }
    let result = cmd::process_command(server, fd);
    reset_client(server, fd);
    result
}

fn parse_bulk(server: &mut Server, fd: i32) -> StepResult {
    let bulk_len = server.clients[&fd].bulk_len as usize;
    if server.clients[&fd].query_buf.len() < bulk_len {
        return StepResult::NeedMore;
    }

    let c = server.clients.get_mut(&fd).unwrap();
    let mut payload: Vec<u8> = c.query_buf.drain(..bulk_len).collect();
    payload.truncate(payload.len().saturating_sub(2)); // drop trailing CRLF
    c.argv.push(payload);
    c.bulk_len = -1;

    let result = cmd::process_command(server, fd);
    reset_client(server, fd);
    result
}

fn reset_client(server: &mut Server, fd: i32) {
    if let Some(c) = server.clients.get_mut(&fd) {
        c.reset();
    }
}
