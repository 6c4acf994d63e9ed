//! Signal policy: SIGHUP/SIGPIPE are ignored outright (the teacher does the
//! same, since a dead client socket should surface as a write error, not a
//! process-wide signal); SIGINT sets a flag the cron tick checks so shutdown
//! can save the DB before the process exits, rather than dying mid-write.

use std::sync::atomic::{AtomicBool, Ordering};

use libc::{signal, SIGHUP, SIGINT, SIGPIPE, SIG_IGN};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_sig: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

pub fn install_handlers() {
    unsafe {
        signal(SIGHUP, SIG_IGN);
        signal(SIGPIPE, SIG_IGN);
        signal(SIGINT, on_sigint as usize);
    }
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}
