//! Pipe Transport (C3): an anonymous unidirectional byte pipe carrying one JSON-encoded
//! [`crate::model::Suite`] from a worker to the master (§4.4).
//!
//! This crate targets POSIX only (see the Windows open question in `SPEC_FULL.md`): the write end
//! is left inheritable across `exec` by clearing nothing (new fds from `libc::pipe` default to
//! inheritable), while the read end gets `FD_CLOEXEC` so it's closed automatically in the child.

use std::fs::File;
use std::io::Read;
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::OrchestratorError;

/// The read end of a pipe, owned by the master.
pub struct ReadPipe {
    file: File,
}

/// The write end of a pipe. In the master, dropped promptly after spawning the child so EOF is
/// observable; in a worker, used directly to write the result suite.
pub struct WritePipe {
    file: File,
}

fn set_cloexec(fd: RawFd, enabled: bool) -> std::io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }
        let new_flags = if enabled { flags | libc::FD_CLOEXEC } else { flags & !libc::FD_CLOEXEC };
        if libc::fcntl(fd, libc::F_SETFD, new_flags) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Create a fresh anonymous pipe: the read end is `FD_CLOEXEC` (closed across `exec`), the write
/// end is left inheritable so a spawned worker keeps it open.
///
/// # Errors
/// Returns [`OrchestratorError::Io`] if the underlying `pipe(2)` syscall fails.
pub fn create_pipe() -> Result<(ReadPipe, WritePipe), OrchestratorError> {
    let mut fds: [RawFd; 2] = [0; 2];
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(OrchestratorError::Io(std::io::Error::last_os_error()));
    }
    let (read_fd, write_fd) = (fds[0], fds[1]);
    set_cloexec(read_fd, true).map_err(OrchestratorError::Io)?;

    // SAFETY: read_fd/write_fd were just returned by pipe(2) above and are owned here.
    let read_file = unsafe { File::from_raw_fd(read_fd) };
    let write_file = unsafe { File::from_raw_fd(write_fd) };
    Ok((ReadPipe { file: read_file }, WritePipe { file: write_file }))
}

impl ReadPipe {
    /// Read the pipe to EOF and decode it as UTF-8, checking `interrupted` between reads so a
    /// hung worker that never writes or closes its end doesn't block this call forever.
    ///
    /// The fd is switched to non-blocking first: a plain blocking `read_to_string` would run to
    /// completion before the caller (`crate::master::spawn_one_worker`) ever reaches its
    /// `wait_with_interrupt` poll loop, defeating Ctrl-C (§4.7 Cancellation).
    ///
    /// # Errors
    /// Returns [`OrchestratorError::Io`] on a read failure or invalid UTF-8, or
    /// [`OrchestratorError::Interrupted`] if `interrupted` becomes `true` before EOF.
    pub fn read_to_string(mut self, interrupted: &AtomicBool) -> Result<String, OrchestratorError> {
        set_nonblocking(self.file.as_raw_fd(), true).map_err(OrchestratorError::Io)?;

        let mut bytes = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match self.file.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => bytes.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    if interrupted.load(Ordering::SeqCst) {
                        return Err(OrchestratorError::Interrupted);
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => return Err(OrchestratorError::Io(err)),
            }
        }

        String::from_utf8(bytes).map_err(|err| OrchestratorError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, err)))
    }
}

fn set_nonblocking(fd: RawFd, enabled: bool) -> std::io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }
        let new_flags = if enabled { flags | libc::O_NONBLOCK } else { flags & !libc::O_NONBLOCK };
        if libc::fcntl(fd, libc::F_SETFL, new_flags) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

impl WritePipe {
    /// The raw file descriptor, for passing as `--pipe=<fd>` on the worker command line.
    #[must_use]
    pub fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// Reconstruct a `WritePipe` from a raw fd the current process inherited (used inside a
    /// worker that received `--pipe <fd>`).
    ///
    /// # Safety
    /// `fd` must be a valid, open, write-only file descriptor not otherwise owned.
    #[must_use]
    pub unsafe fn from_raw_fd(fd: RawFd) -> Self {
        WritePipe { file: File::from_raw_fd(fd) }
    }

    /// Write a complete JSON suite and close the pipe.
    ///
    /// `EPIPE` (the master died or closed its read end early) is swallowed per §4.4; any other
    /// I/O error surfaces.
    ///
    /// # Errors
    /// Returns [`OrchestratorError::Io`] for any write failure other than `EPIPE`.
    pub fn write_suite(self, json: &str) -> Result<(), OrchestratorError> {
        use std::io::Write;
        let mut file = self.file;
        match file.write_all(json.as_bytes()) {
            Ok(()) => Ok(()),
            Err(err) if err.raw_os_error() == Some(libc::EPIPE) => Ok(()),
            Err(err) => Err(OrchestratorError::Io(err)),
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_round_trips_a_payload() {
        let (read, write) = create_pipe().unwrap();
        write.write_suite("{\"benchmarks\":[]}").unwrap();
        let interrupted = AtomicBool::new(false);
        let payload = read.read_to_string(&interrupted).unwrap();
        assert_eq!(payload, "{\"benchmarks\":[]}");
    }

    #[test]
    fn read_to_string_stops_when_interrupted_before_eof() {
        let (read, write) = create_pipe().unwrap();
        // Write end stays open (not dropped), so EOF never arrives on its own.
        let interrupted = AtomicBool::new(true);
        let err = read.read_to_string(&interrupted).unwrap_err();
        assert!(matches!(err, OrchestratorError::Interrupted));
        drop(write);
    }
}
