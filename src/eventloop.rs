//! A simple event-driven programming library: single-threaded `select`-based
//! reactor with file events and self-rescheduling time events.
//!
//! The original module-level-global version (`Lazy<RwLock<_>>` statics read
//! and written from every callback) only exists because the upstream
//! codebase never needed to pass a "this server" pointer anywhere. Since
//! this server is genuinely single-threaded, that indirection buys nothing
//! but runtime borrow-checking through `RwLock`; here the loop state lives
//! on an owned `EventLoop` and callbacks are plain `fn` pointers taking
//! `&mut Server` explicitly, so the borrow checker enforces at compile time
//! what the teacher enforced at runtime.

use std::mem::zeroed;
use std::time::Duration;

use crate::server::Server;
use crate::util::get_time_ms;

/// `select(2)` cannot watch more descriptors than this no matter how the
/// registration table is sized, so there is no point pretending otherwise.
pub const SET_SIZE: usize = libc::FD_SETSIZE;

pub type FileProc = fn(&mut Server, i32, Mask);
pub type TimeProc = fn(&mut Server, u64) -> i64;

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Mask {
    None,
    Readable,
    Writable,
    ReadWritable,
}

impl Mask {
    pub fn is_readable(&self) -> bool {
        matches!(self, Mask::Readable | Mask::ReadWritable)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, Mask::Writable | Mask::ReadWritable)
    }

    pub fn union(self, other: Mask) -> Mask {
        match (self, other) {
            (Mask::None, o) => o,
            (s, Mask::None) => s,
            (Mask::ReadWritable, _) | (_, Mask::ReadWritable) => Mask::ReadWritable,
            (Mask::Readable, Mask::Writable) | (Mask::Writable, Mask::Readable) => Mask::ReadWritable,
            (s, _) => s,
        }
    }

    pub fn without(self, other: Mask) -> Mask {
        match (self, other) {
            (_, Mask::None) => self,
            (Mask::None, _) => Mask::None,
            (_, Mask::ReadWritable) => Mask::None,
            (Mask::Readable, Mask::Readable) => Mask::None,
            (Mask::ReadWritable, Mask::Readable) => Mask::Writable,
            (Mask::Writable, Mask::Writable) => Mask::None,
            (Mask::ReadWritable, Mask::Writable) => Mask::Readable,
            _ => self,
        }
    }
}

#[derive(Clone, Copy)]
struct FileEvent {
    mask: Mask,
    rproc: Option<FileProc>,
    wproc: Option<FileProc>,
}

struct TimeEvent {
    id: u64,
    when_ms: u128,
    proc: TimeProc,
}

pub struct EventLoop {
    events: Vec<FileEvent>,
    time_events: Vec<TimeEvent>,
    next_time_id: u64,
    max_fd: i32,
    pub stop: bool,
}

/// Returned by a time proc: reschedule this many ms from now, or stop.
pub const NO_MORE: i64 = -1;

impl EventLoop {
    pub fn new() -> Self {
        EventLoop {
            events: vec![FileEvent { mask: Mask::None, rproc: None, wproc: None }; SET_SIZE],
            time_events: Vec::new(),
            next_time_id: 0,
            max_fd: -1,
            stop: false,
        }
    }

    pub fn create_file_event(&mut self, fd: i32, mask: Mask, proc: FileProc) -> Result<(), String> {
        if fd as usize >= SET_SIZE {
            return Err(format!("fd {fd} exceeds the select() fd_set capacity ({SET_SIZE})"));
        }
        let fe = &mut self.events[fd as usize];
        fe.mask = fe.mask.union(mask);
        if mask.is_readable() {
            fe.rproc = Some(proc);
        }
        if mask.is_writable() {
            fe.wproc = Some(proc);
        }
        if fd > self.max_fd {
            self.max_fd = fd;
        }
        Ok(())
    }

    pub fn delete_file_event(&mut self, fd: i32, mask: Mask) {
        if fd as usize >= SET_SIZE || self.events[fd as usize].mask == Mask::None {
            return;
        }
        let fe = &mut self.events[fd as usize];
        fe.mask = fe.mask.without(mask);
        if !fe.mask.is_readable() {
            fe.rproc = None;
        }
        if !fe.mask.is_writable() {
            fe.wproc = None;
        }
        if fd == self.max_fd && fe.mask == Mask::None {
            let mut j = self.max_fd - 1;
            while j >= 0 && self.events[j as usize].mask == Mask::None {
                j -= 1;
            }
            self.max_fd = j;
        }
    }

    pub fn create_time_event(&mut self, milliseconds: u128, proc: TimeProc) -> u64 {
        let id = self.next_time_id;
        self.next_time_id += 1;
        self.time_events.push(TimeEvent { id, when_ms: get_time_ms() + milliseconds, proc });
        id
    }

    pub fn delete_time_event(&mut self, id: u64) {
        self.time_events.retain(|e| e.id != id);
    }

    fn nearest_timer_ms(&self) -> Option<u128> {
        self.time_events.iter().map(|e| e.when_ms).min()
    }
}

/// Process every pending time event, then every pending file event that may
/// have been registered by the time-event callbacks just run.
pub fn process_events(server: &mut Server, dont_wait: bool) -> u32 {
    let mut processed = 0u32;

    if server.event_loop.max_fd != -1 {
        let mut readfds: libc::fd_set = unsafe { zeroed() };
        let mut writefds: libc::fd_set = unsafe { zeroed() };
        unsafe {
            libc::FD_ZERO(&mut readfds);
            libc::FD_ZERO(&mut writefds);
        }
        for fd in 0..=server.event_loop.max_fd {
            let mask = server.event_loop.events[fd as usize].mask;
            if mask.is_readable() {
                unsafe { libc::FD_SET(fd, &mut readfds) };
            }
            if mask.is_writable() {
                unsafe { libc::FD_SET(fd, &mut writefds) };
            }
        }

        let timeout_ms = if dont_wait {
            Some(0u128)
        } else {
            server.event_loop.nearest_timer_ms().map(|when| {
                let now = get_time_ms();
                if when <= now { 0 } else { when - now }
            })
        };

        let mut tv = timeout_ms.map(|ms| libc::timeval {
            tv_sec: (ms / 1000) as libc::time_t,
            tv_usec: ((ms % 1000) * 1000) as libc::suseconds_t,
        });
        let tv_ptr = tv.as_mut().map_or(std::ptr::null_mut(), |t| t as *mut _);

        let ready = unsafe {
            libc::select(server.event_loop.max_fd + 1, &mut readfds, &mut writefds, std::ptr::null_mut(), tv_ptr)
        };

        if ready > 0 {
            for fd in 0..=server.event_loop.max_fd {
                let readable = unsafe { libc::FD_ISSET(fd, &readfds) };
                let writable = unsafe { libc::FD_ISSET(fd, &writefds) };
                if !readable && !writable {
                    continue;
                }
                let rproc = server.event_loop.events[fd as usize].rproc;
                let wproc = server.event_loop.events[fd as usize].wproc;
                if readable {
                    if let Some(p) = rproc {
                        p(server, fd, Mask::Readable);
                    }
                }
                if writable {
                    if let Some(p) = wproc {
                        p(server, fd, Mask::Writable);
                    }
                }
                processed += 1;
            }
        }
    } else if dont_wait {
        // nothing registered and we must not block: nothing to do.
    } else if let Some(when) = server.event_loop.nearest_timer_ms() {
        let now = get_time_ms();
        let sleep_ms = if when <= now { 0 } else { when - now };
        std::thread::sleep(Duration::from_millis(sleep_ms as u64));
    }

    processed + process_time_events(server)
}

pub fn process_time_events(server: &mut Server) -> u32 {
    let mut processed = 0u32;
    // Cap the pass at events already registered when we started, so a
    // handler that re-registers new timers cannot loop forever.
    let max_id = server.event_loop.next_time_id;
    let now = get_time_ms();

    let due: Vec<(u64, TimeProc)> = server
        .event_loop
        .time_events
        .iter()
        .filter(|e| e.id < max_id && e.when_ms <= now)
        .map(|e| (e.id, e.proc))
        .collect();

    for (id, proc) in due {
        let ret = proc(server, id);
        processed += 1;
        if let Some(e) = server.event_loop.time_events.iter_mut().find(|e| e.id == id) {
            if ret == NO_MORE {
                let dead_id = id;
                server.event_loop.time_events.retain(|e| e.id != dead_id);
            } else {
                e.when_ms = get_time_ms() + ret as u128;
            }
        }
    }

    processed
}

pub fn ae_main(server: &mut Server) {
    server.event_loop.stop = false;
    while !server.event_loop.stop {
        process_events(server, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_union_and_without() {
        assert_eq!(Mask::Readable.union(Mask::Writable), Mask::ReadWritable);
        assert_eq!(Mask::ReadWritable.without(Mask::Writable), Mask::Readable);
        assert_eq!(Mask::Readable.without(Mask::Readable), Mask::None);
    }
}
