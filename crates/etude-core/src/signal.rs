//! Self-pipe bridge that turns asynchronous signals into readiness events.
//!
//! The installed handler only writes the signal number as one byte into the
//! bridge's write end. The reactor watches the read end like any other
//! descriptor and translates the drained bytes into [`ControlFlags`] from
//! ordinary loop context.

use crate::error::EtudeResult;
use crate::syscalls;
use libc::{c_int, c_void};
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::{debug, trace};

/// Write end the signal handler forwards into. Signal handlers cannot carry
/// state, so this is the one process-wide cell; -1 when no bridge is installed.
static FORWARD_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn forward_signal(sig: c_int) {
    // SAFETY: only async-signal-safe calls below (send, errno access).
    unsafe {
        let saved_errno = *libc::__errno_location();
        let fd = FORWARD_FD.load(Ordering::Relaxed);
        if fd >= 0 {
            let byte = sig as u8;
            libc::send(
                fd,
                &byte as *const u8 as *const c_void,
                1,
                libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL,
            );
        }
        *libc::__errno_location() = saved_errno;
    }
}

/// Loop-control state derived from drained signal bytes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ControlFlags {
    pub timeout_pending: bool,
    pub stop_requested: bool,
}

impl ControlFlags {
    pub fn absorb(&mut self, sig: c_int) {
        match sig {
            libc::SIGALRM => self.timeout_pending = true,
            libc::SIGTERM | libc::SIGINT => self.stop_requested = true,
            other => trace!(signal = other, "ignoring unexpected signal byte"),
        }
    }
}

#[derive(Debug)]
pub struct SignalBridge {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl SignalBridge {
    pub fn new() -> EtudeResult<Self> {
        let (read_fd, write_fd) = syscalls::socket_pair()?;
        Ok(Self { read_fd, write_fd })
    }

    /// Descriptor to register with the reactor's readiness context.
    #[inline]
    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Route `signals` into this bridge. Only one bridge receives OS signals
    /// at a time; installing a second one takes over delivery.
    pub fn install(&self, signals: &[c_int]) -> EtudeResult<()> {
        FORWARD_FD.store(self.write_fd, Ordering::SeqCst);
        for &sig in signals {
            syscalls::install_signal_handler(sig, forward_signal)?;
        }
        debug!(?signals, "signal handlers installed");
        Ok(())
    }

    /// A handle that posts signal bytes from ordinary threads.
    pub fn sender(&self) -> EtudeResult<SignalSender> {
        let fd = unsafe { libc::dup(self.write_fd) };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(SignalSender { fd })
    }

    /// Read every pending byte and fold it into `flags`.
    pub fn drain(&self, flags: &mut ControlFlags) -> EtudeResult<usize> {
        let mut buf = [0u8; 64];
        let mut total = 0;
        while let Some(n) = syscalls::recv_nonblocking(self.read_fd, &mut buf)? {
            if n == 0 {
                break;
            }
            for &byte in &buf[..n] {
                flags.absorb(c_int::from(byte));
            }
            total += n;
        }
        Ok(total)
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        let _ = FORWARD_FD.compare_exchange(self.write_fd, -1, Ordering::SeqCst, Ordering::SeqCst);
        syscalls::close_fd(self.read_fd);
        syscalls::close_fd(self.write_fd);
    }
}

/// Posts signal numbers into a bridge without going through the kernel's
/// signal machinery. Used for Ctrl-C hooks and for stopping a reactor that
/// runs on another thread.
#[derive(Debug)]
pub struct SignalSender {
    fd: RawFd,
}

impl SignalSender {
    pub fn notify(&self, sig: c_int) -> EtudeResult<()> {
        let byte = [sig as u8];
        // A full channel already holds unread bytes, so the reactor will wake.
        syscalls::send_nonblocking(self.fd, &byte)?;
        Ok(())
    }

    /// Ask the reactor to leave its loop.
    pub fn stop(&self) -> EtudeResult<()> {
        self.notify(libc::SIGTERM)
    }

    pub fn try_clone(&self) -> EtudeResult<Self> {
        let fd = unsafe { libc::dup(self.fd) };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(Self { fd })
    }
}

impl Drop for SignalSender {
    fn drop(&mut self) {
        syscalls::close_fd(self.fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_from_signal_bytes() {
        let mut flags = ControlFlags::default();
        flags.absorb(libc::SIGALRM);
        assert_eq!(
            flags,
            ControlFlags {
                timeout_pending: true,
                stop_requested: false
            }
        );
        flags.absorb(libc::SIGUSR1);
        assert!(!flags.stop_requested);
        flags.absorb(libc::SIGTERM);
        assert!(flags.stop_requested);
    }

    #[test]
    fn test_sender_bytes_drain_into_flags() {
        let bridge = SignalBridge::new().unwrap();
        let sender = bridge.sender().unwrap();
        sender.notify(libc::SIGALRM).unwrap();
        sender.try_clone().unwrap().stop().unwrap();

        let mut flags = ControlFlags::default();
        assert_eq!(bridge.drain(&mut flags).unwrap(), 2);
        assert!(flags.timeout_pending);
        assert!(flags.stop_requested);

        // Fully drained: nothing left, no blocking.
        let mut again = ControlFlags::default();
        assert_eq!(bridge.drain(&mut again).unwrap(), 0);
        assert_eq!(again, ControlFlags::default());
    }
}
