//! Basic TCP socket stuff made a bit less boring.

use std::mem::{size_of, size_of_val, zeroed};
use std::net::Ipv4Addr;
use libc::{accept as c_accept, bind, c_void, close, fcntl, listen, setsockopt, sockaddr, sockaddr_in, socket,
    strerror, AF_INET, EINTR, F_GETFL, F_SETFL, INADDR_ANY, IPPROTO_TCP, O_NONBLOCK, SOCK_STREAM, SOL_SOCKET,
    SO_KEEPALIVE, SO_REUSEADDR, TCP_NODELAY};
use crate::util::error;

fn os_err(prefix: &str) -> String {
    unsafe { format!("{prefix}: {}", std::ffi::CStr::from_ptr(strerror(error())).to_string_lossy()) }
}

pub fn tcp_server(port: u16, bindaddr: &str) -> Result<i32, String> {
    let on: i32 = 1;
    unsafe {
        let sock = socket(AF_INET, SOCK_STREAM, 0);
        if sock == -1 {
            return Err(os_err("socket"));
        }
        if setsockopt(sock, SOL_SOCKET, SO_REUSEADDR, &on as *const _ as *const c_void, size_of::<i32>() as u32) == -1 {
            close(sock);
            return Err(os_err("setsockopt SO_REUSEADDR"));
        }

        let mut sa: sockaddr_in = zeroed();
        #[cfg(target_os = "linux")]
        {
            sa.sin_family = AF_INET as u16;
        }
        #[cfg(target_os = "macos")]
        {
            sa.sin_family = AF_INET as u8;
        }
        sa.sin_port = port.to_be();
        sa.sin_addr.s_addr = INADDR_ANY.to_be();
        if !bindaddr.is_empty() {
            match bindaddr.parse::<Ipv4Addr>() {
                Ok(addr) => sa.sin_addr.s_addr = u32::from(addr).to_be(),
                Err(e) => {
                    close(sock);
                    return Err(format!("Invalid bind address '{bindaddr}': {e}"));
                },
            }
        }

        if bind(sock, &sa as *const _ as *const sockaddr, size_of::<sockaddr_in>() as u32) == -1 {
            close(sock);
            return Err(os_err("bind"));
        }
        if listen(sock, 511) == -1 {
            // the magic 511 constant is from nginx
            close(sock);
            return Err(os_err("listen"));
        }
        Ok(sock)
    }
}

pub fn accept(serversock: i32) -> Result<(i32, u32, u16), String> {
    loop {
        unsafe {
            let mut sa: sockaddr_in = zeroed();
            let mut len = size_of::<sockaddr_in>() as u32;
            let fd = c_accept(serversock, &mut sa as *mut _ as *mut sockaddr, &mut len);
            if fd == -1 {
                if error() == EINTR {
                    continue;
                }
                return Err(os_err("accept"));
            }
            let ip = u32::from_be(sa.sin_addr.s_addr);
            let client_port = u16::from_be(sa.sin_port);
            return Ok((fd, ip, client_port));
        }
    }
}

pub fn nonblock(fd: i32) -> Result<(), String> {
    unsafe {
        let flag = fcntl(fd, F_GETFL);
        if flag == -1 {
            return Err(os_err("fcntl(F_GETFL)"));
        }
        if fcntl(fd, F_SETFL, flag | O_NONBLOCK) == -1 {
            return Err(os_err("fcntl(F_SETFL,O_NONBLOCK)"));
        }
    }
    Ok(())
}

pub fn tcp_no_delay(fd: i32) -> Result<(), String> {
    let yes: i32 = 1;
    unsafe {
        if setsockopt(fd, IPPROTO_TCP, TCP_NODELAY, &yes as *const _ as *const c_void, size_of_val(&yes) as u32) == -1 {
            return Err(os_err("setsockopt TCP_NODELAY"));
        }
    }
    Ok(())
}

pub fn tcp_keepalive(fd: i32) -> Result<(), String> {
    let yes: i32 = 1;
    unsafe {
        if setsockopt(fd, SOL_SOCKET, SO_KEEPALIVE, &yes as *const _ as *const c_void, size_of_val(&yes) as u32) == -1 {
            return Err(os_err("setsockopt SO_KEEPALIVE"));
        }
    }
    Ok(())
}
