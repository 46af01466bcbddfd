// SPDX-License-Identifier: MIT
//! Daemon discovery files and the singleton lock.
//!
//! The endpoint file under the user cache directory holds the daemon PID;
//! the socket path next to it is the IPC endpoint. A non-blocking flock on
//! a separate lock file guarantees at most one live daemon per user.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use crate::config::{pid_path, socket_path};

pub fn write_pid(pid: u32) -> std::io::Result<()> {
    let path = pid_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, pid.to_string())
}

pub fn read_pid() -> Option<u32> {
    std::fs::read_to_string(pid_path())
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

pub fn remove_pid() {
    let _ = std::fs::remove_file(pid_path());
}

pub fn is_process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

/// A daemon is considered running when its pidfile names a live process and
/// the socket exists. A stale pidfile (dead process) does not count.
pub fn is_daemon_running() -> bool {
    match read_pid() {
        Some(pid) => is_process_alive(pid) && Path::new(&socket_path()).exists(),
        None => false,
    }
}

pub struct DaemonLock {
    _file: File,
}

impl DaemonLock {
    /// Try to become the one daemon instance. Returns None when another
    /// live daemon already holds the lock.
    pub fn acquire() -> Option<DaemonLock> {
        let lock_path = pid_path().with_extension("lock");
        if let Some(parent) = lock_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&lock_path)
            .ok()?;
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            Some(DaemonLock { _file: file })
        } else {
            None
        }
    }
}
