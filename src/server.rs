//! Server orchestrator: owns every database, every connected client, and the
//! event loop that drives them, plus the cron tick that used to live in a
//! separate handler module (folded in here since nothing else calls it).

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::process::exit;

use libc::pid_t;

use crate::client::{self, Client};
use crate::config::Config;
use crate::dict::Dict;
use crate::eventloop::{EventLoop, Mask, NO_MORE};
use crate::net;
use crate::rdb;
use crate::util::{self, LogLevel};
use crate::value::Value;
use std::rc::Rc;

const IDLE_SWEEP_EVERY_N_TICKS: u64 = 10;
const DB_SHRINK_THRESHOLD_SIZE: usize = 16384;
const DB_SHRINK_THRESHOLD_PERMILLE: usize = 100; // 10%

pub struct Server {
    pub config: Config,
    pub listen_fd: i32,
    pub dbs: Vec<Dict<Rc<Value>>>,
    pub clients: HashMap<i32, Client>,
    pub event_loop: EventLoop,
    pub dirty: u64,
    pub last_save: u128,
    pub start_time: u128,
    pub cron_loops: u64,
    pub bg_saving_pid: Option<pid_t>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        let databases = config.databases;
        Server {
            config,
            listen_fd: -1,
            dbs: (0..databases).map(|_| Dict::new()).collect(),
            clients: HashMap::new(),
            event_loop: EventLoop::new(),
            dirty: 0,
            last_save: util::get_time_ms(),
            start_time: util::get_time_ms(),
            cron_loops: 0,
            bg_saving_pid: None,
        }
    }

    pub fn init(&mut self) {
        crate::signal::install_handlers();

        let fd = match net::tcp_server(self.config.port, &self.config.bind_addr) {
            Ok(fd) => fd,
            Err(e) => {
                util::log(self.config.verbosity, LogLevel::Warning, &self.config.log_file, &format!("Opening TCP port: {e}"));
                exit(1);
            },
        };
        if let Err(e) = net::nonblock(fd) {
            util::log(self.config.verbosity, LogLevel::Warning, &self.config.log_file, &format!("nonblock: {e}"));
            exit(1);
        }
        self.listen_fd = fd;

        if let Err(e) = self.event_loop.create_file_event(fd, Mask::Readable, accept_handler) {
            util::oom(&self.config.log_file, &e);
        }
        self.event_loop.create_time_event(1000, server_cron);
    }

    pub fn free_client(&mut self, fd: i32) {
        self.event_loop.delete_file_event(fd, Mask::ReadWritable);
        self.clients.remove(&fd);
        unsafe {
            libc::close(fd);
        }
    }

    pub fn start_background_save(&mut self) -> Result<(), String> {
        let pid = rdb::save_background(self)?;
        util::log(self.config.verbosity, LogLevel::Notice, &self.config.log_file, &format!("Background saving started by pid {pid}"));
        self.bg_saving_pid = Some(pid);
        Ok(())
    }

    fn total_keys(&self) -> usize {
        self.dbs.iter().map(|d| d.len()).sum()
    }
}

pub fn accept_handler(server: &mut Server, fd: i32, _mask: Mask) {
    let (client_fd, ip, port) = match net::accept(fd) {
        Ok(t) => t,
        Err(e) => {
            util::log(server.config.verbosity, LogLevel::Warning, &server.config.log_file, &format!("Accepting client connection: {e}"));
            return;
        },
    };

    if server.config.max_clients > 0 && server.clients.len() as u32 >= server.config.max_clients {
        let msg = b"-ERR max number of clients reached\r\n";
        unsafe {
            libc::write(client_fd, msg.as_ptr() as *const libc::c_void, msg.len());
            libc::close(client_fd);
        }
        return;
    }

    if net::nonblock(client_fd).is_err() || net::tcp_no_delay(client_fd).is_err() {
        unsafe { libc::close(client_fd) };
        return;
    }
    let _ = net::tcp_keepalive(client_fd);

    let addr = format!("{}:{}", Ipv4Addr::from(ip.to_be_bytes()), port);
    util::log(server.config.verbosity, LogLevel::Verbose, &server.config.log_file, &format!("Accepted {addr}"));

    server.clients.insert(client_fd, Client::new(client_fd, addr));
    if let Err(e) = server.event_loop.create_file_event(client_fd, Mask::Readable, client::read_query_from_client) {
        util::log(server.config.verbosity, LogLevel::Warning, &server.config.log_file, &format!("create_file_event: {e}"));
        server.free_client(client_fd);
    }
}

/// Cron tick: DB shrink/log housekeeping every 5 loops, idle sweep every 10,
/// bgsave reaping and save-policy evaluation every loop.
pub fn server_cron(server: &mut Server, _id: u64) -> i64 {
    if crate::signal::interrupted() {
        util::log(server.config.verbosity, LogLevel::Warning, &server.config.log_file, "Received SIGINT, saving and shutting down");
        let _ = rdb::save(server);
        server.event_loop.stop = true;
        return NO_MORE;
    }

    server.cron_loops += 1;
    let loops = server.cron_loops;

    if loops % 5 == 0 {
        for (i, db) in server.dbs.iter_mut().enumerate() {
            if db.is_empty() {
                continue;
            }
            util::log(
                server.config.verbosity,
                LogLevel::Verbose,
                &server.config.log_file,
                &format!("DB {i}: {} keys in {} slots HT.", db.len(), db.capacity()),
            );
            if db.capacity() >= DB_SHRINK_THRESHOLD_SIZE && db.load_factor_permille() < DB_SHRINK_THRESHOLD_PERMILLE {
                db.resize();
            }
        }
        util::log(
            server.config.verbosity,
            LogLevel::Verbose,
            &server.config.log_file,
            &format!("{} clients connected, {} bytes in use", server.clients.len(), crate::zmalloc::MemCounter::used_memory()),
        );
    }

    if loops % IDLE_SWEEP_EVERY_N_TICKS == 0 {
        sweep_idle_clients(server);
    }

    reap_background_save(server);
    if server.bg_saving_pid.is_none() {
        maybe_save(server);
    }

    1000
}

fn sweep_idle_clients(server: &mut Server) {
    if server.config.timeout_secs <= 0 {
        return;
    }
    let timeout_ms = (server.config.timeout_secs as u128) * 1000;
    let now = util::get_time_ms();
    let timed_out: Vec<i32> = server
        .clients
        .values()
        .filter(|c| now.saturating_sub(c.last_interaction) > timeout_ms)
        .map(|c| c.fd)
        .collect();
    for fd in timed_out {
        util::log(server.config.verbosity, LogLevel::Verbose, &server.config.log_file, &format!("Closing idle client fd {fd}"));
        server.free_client(fd);
    }
}

fn reap_background_save(server: &mut Server) {
    let Some(expected_pid) = server.bg_saving_pid else { return };
    let mut status: i32 = 0;
    let pid = unsafe { libc::wait4(-1, &mut status, libc::WNOHANG, std::ptr::null_mut()) };
    if pid == 0 || pid != expected_pid {
        return;
    }
    let exit_code = libc::WEXITSTATUS(status);
    let by_signal = libc::WIFSIGNALED(status);
    if !by_signal && exit_code == 0 {
        util::log(server.config.verbosity, LogLevel::Notice, &server.config.log_file, "Background saving terminated with success");
        server.dirty = 0;
        server.last_save = util::get_time_ms();
    } else {
        util::log(server.config.verbosity, LogLevel::Warning, &server.config.log_file, "Background saving terminated with error");
    }
    server.bg_saving_pid = None;
}

fn maybe_save(server: &mut Server) {
    let now = util::get_time_ms();
    for sp in server.config.save_params.clone() {
        let elapsed_secs = now.saturating_sub(server.last_save) / 1000;
        if server.dirty as u64 >= sp.changes && elapsed_secs as u64 >= sp.seconds {
            util::log(
                server.config.verbosity,
                LogLevel::Notice,
                &server.config.log_file,
                &format!("{} changes in {} seconds. Saving...", sp.changes, sp.seconds),
            );
            let _ = server.start_background_save();
            break;
        }
    }
}

pub fn print_banner(server: &Server) {
    util::log(server.config.verbosity, LogLevel::Notice, &server.config.log_file, &format!("cutis server starting, PID {}", std::process::id()));
    util::log(server.config.verbosity, LogLevel::Notice, &server.config.log_file, &format!("Port: {}", server.config.port));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_server_has_configured_database_count() {
        let mut cfg = Config::new();
        cfg.databases = 4;
        let server = Server::new(cfg);
        assert_eq!(server.dbs.len(), 4);
        assert_eq!(server.total_keys(), 0);
    }
}
