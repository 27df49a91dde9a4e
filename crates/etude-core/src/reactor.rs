// src/reactor.rs
//! The single-threaded event loop.
//!
//! Connections are registered edge-triggered and one-shot, so every handler
//! drains its socket and then re-arms exactly one interest (or retires the
//! connection). The listener and the signal channel are level-triggered and
//! never need re-arming.

use crate::config::{IDLE_TIMESLOTS, LISTEN_BACKLOG, MAX_EVENTS};
use crate::conn::{Next, ReadOutcome};
use crate::error::{EtudeError, EtudeResult};
use crate::metrics::ReactorMetrics;
use crate::server::ServerConfig;
use crate::signal::{ControlFlags, SignalBridge, SignalSender};
use crate::slab::ConnectionSlab;
use crate::syscalls::{
    self, EV_HANGUP, EV_READABLE, EV_WRITABLE, Epoll, LEVEL_READ, ONESHOT_READ, ONESHOT_WRITE,
    epoll_event,
};
use crate::timer::{TimerId, TimerList};
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: u64 = u64::MAX;
const SIGNAL_TOKEN: u64 = u64::MAX - 1;

const BUSY_MESSAGE: &[u8] = b"Internal server busy";

/// Connection tokens carry the descriptor in the high half and the slot in
/// the low half, so an event queued for a retired socket cannot reach a new
/// occupant of the same slot. No descriptor is ever `-1`, so these never
/// collide with the reserved tokens.
#[inline]
fn conn_token(slot: usize, fd: RawFd) -> u64 {
    (u64::from(fd as u32) << 32) | slot as u64
}

#[inline]
fn split_token(token: u64) -> (usize, RawFd) {
    ((token & u64::from(u32::MAX)) as usize, (token >> 32) as u32 as RawFd)
}

/// Slot an event belongs to, if that slot still holds the socket it was queued for.
fn live_slot(slab: &ConnectionSlab, token: u64) -> Option<usize> {
    let (slot, fd) = split_token(token);
    slab.get(slot).filter(|conn| conn.fd == fd).map(|_| slot)
}

fn idle_timeout(timeslot_secs: u32) -> Duration {
    Duration::from_secs(u64::from(timeslot_secs) * u64::from(IDLE_TIMESLOTS))
}

/// What an idle timer knows about its connection.
#[derive(Debug, Clone, Copy)]
struct ClientData {
    token: usize,
    fd: RawFd,
    peer: SocketAddr,
}

pub struct Reactor {
    epoll: Epoll,
    listen_fd: RawFd,
    local_addr: SocketAddr,
    bridge: SignalBridge,
    slab: ConnectionSlab,
    timers: TimerList<ClientData>,
    flags: ControlFlags,
    doc_root: PathBuf,
    timeslot_secs: u32,
    metrics: Arc<ReactorMetrics>,
}

impl Reactor {
    /// Bind, register the listener and signal channel, install signal
    /// handlers and schedule the first alarm. Any failure here is fatal to
    /// the caller.
    pub fn listen(config: &ServerConfig) -> EtudeResult<Self> {
        if config.timeslot_secs == 0 {
            return Err(EtudeError::Config("timeslot must be at least one second".into()));
        }

        let epoll = Epoll::new()?;
        let bridge = SignalBridge::new()?;
        let listen_fd = syscalls::create_listen_socket(&config.addr, LISTEN_BACKLOG)?;

        let mut reactor = Self {
            epoll,
            listen_fd,
            local_addr: config.addr,
            bridge,
            slab: ConnectionSlab::new(config.max_connections),
            timers: TimerList::with_capacity(config.max_connections),
            flags: ControlFlags::default(),
            doc_root: config.doc_root.clone(),
            timeslot_secs: config.timeslot_secs,
            metrics: Arc::new(ReactorMetrics::new()),
        };
        reactor.local_addr = syscalls::local_addr(listen_fd)?;

        reactor.epoll.add(listen_fd, LISTENER_TOKEN, LEVEL_READ)?;
        reactor
            .epoll
            .add(reactor.bridge.read_fd(), SIGNAL_TOKEN, LEVEL_READ)?;

        syscalls::ignore_signal(libc::SIGPIPE)?;
        reactor.bridge.install(&[libc::SIGALRM, libc::SIGTERM])?;
        syscalls::schedule_alarm(reactor.timeslot_secs);

        info!(
            addr = %reactor.local_addr,
            doc_root = %reactor.doc_root.display(),
            timeslot = reactor.timeslot_secs,
            max_connections = config.max_connections,
            "listening"
        );
        Ok(reactor)
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle that makes `run` return from another thread or a Ctrl-C hook.
    pub fn stop_handle(&self) -> EtudeResult<SignalSender> {
        self.bridge.sender()
    }

    pub fn metrics(&self) -> Arc<ReactorMetrics> {
        Arc::clone(&self.metrics)
    }

    fn idle_timeout(&self) -> Duration {
        idle_timeout(self.timeslot_secs)
    }

    /// Dispatch readiness events until a stop is requested. Every remaining
    /// connection is retired before returning.
    pub fn run(&mut self) -> EtudeResult<()> {
        let mut events = vec![epoll_event { events: 0, u64: 0 }; MAX_EVENTS];

        while !self.flags.stop_requested {
            let n = match self.epoll.wait(&mut events, -1) {
                Ok(n) => n,
                Err(e) => {
                    error!(error = %e, "readiness wait failed");
                    self.close_all();
                    return Err(e);
                }
            };

            for event in &events[..n] {
                let token = event.u64;
                let bits = event.events;
                match token {
                    LISTENER_TOKEN => self.accept_all(),
                    SIGNAL_TOKEN => self.drain_signals(),
                    _ => self.dispatch(token, bits),
                }
            }

            if self.flags.timeout_pending {
                self.sweep();
                self.flags.timeout_pending = false;
            }
        }

        self.close_all();
        info!("reactor stopped");
        Ok(())
    }

    fn accept_all(&mut self) {
        loop {
            match syscalls::accept_connection(self.listen_fd) {
                Ok(Some((fd, peer))) => self.admit(fd, peer),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn admit(&mut self, fd: RawFd, peer: SocketAddr) {
        let Some(token) = self.slab.allocate(fd) else {
            warn!(%peer, "connection table full, rejecting");
            let _ = syscalls::send_nonblocking(fd, BUSY_MESSAGE);
            syscalls::close_fd(fd);
            self.metrics.inc_rejected();
            return;
        };

        if let Err(e) = self.epoll.add(fd, conn_token(token, fd), ONESHOT_READ) {
            warn!(%peer, error = %e, "cannot register connection");
            self.slab.free(token);
            syscalls::close_fd(fd);
            return;
        }

        let expire = Instant::now() + self.idle_timeout();
        let timer = self.timers.insert(expire, ClientData { token, fd, peer });
        if let Some(conn) = self.slab.get_mut(token) {
            conn.peer = peer;
            conn.timer = Some(timer);
        }
        self.metrics.inc_conn();
        debug!(%peer, token, "connection admitted");
    }

    fn drain_signals(&mut self) {
        match self.bridge.drain(&mut self.flags) {
            Ok(n) => trace!(bytes = n, flags = ?self.flags, "signals drained"),
            Err(e) => warn!(error = %e, "signal channel read failed"),
        }
    }

    fn dispatch(&mut self, raw: u64, bits: u32) {
        let Some(token) = live_slot(&self.slab, raw) else {
            let (slot, fd) = split_token(raw);
            trace!(slot, fd, "event for a retired socket");
            return;
        };

        if bits & EV_HANGUP != 0 {
            self.evict(token, "peer hang-up");
        } else if bits & EV_READABLE != 0 {
            self.on_readable(token);
        } else if bits & EV_WRITABLE != 0 {
            self.on_writable(token);
        }
    }

    fn on_readable(&mut self, token: usize) {
        let Some(conn) = self.slab.get_mut(token) else {
            return;
        };

        let (next, timer) = match conn.read_once() {
            Ok(ReadOutcome::Open) => (
                conn.process(&self.doc_root, &self.metrics),
                conn.timer,
            ),
            Ok(ReadOutcome::PeerClosed) => {
                self.evict(token, "peer closed");
                return;
            }
            Err(e) => {
                debug!(token, error = %e, "read failed");
                self.evict(token, "read error");
                return;
            }
        };

        self.touch(timer);
        self.rearm(token, next);
    }

    fn on_writable(&mut self, token: usize) {
        let Some(conn) = self.slab.get_mut(token) else {
            return;
        };
        let next = conn.write(&self.metrics);
        let timer = conn.timer;

        if next != Next::Close {
            self.touch(timer);
        }
        self.rearm(token, next);
    }

    /// Push the idle deadline out after traffic.
    fn touch(&mut self, timer: Option<TimerId>) {
        if let Some(id) = timer {
            let expire = Instant::now() + self.idle_timeout();
            self.timers.reschedule(id, expire);
        }
    }

    fn rearm(&mut self, token: usize, next: Next) {
        let Some(fd) = self.slab.get(token).map(|c| c.fd) else {
            return;
        };
        let interest = match next {
            Next::Read => ONESHOT_READ,
            Next::Write => ONESHOT_WRITE,
            Next::Close => {
                self.evict(token, "response complete");
                return;
            }
        };
        if let Err(e) = self.epoll.modify(fd, conn_token(token, fd), interest) {
            warn!(token, error = %e, "re-arm failed");
            self.evict(token, "re-arm failed");
        }
    }

    /// Retire a connection whose timer is still pending.
    fn evict(&mut self, token: usize, reason: &'static str) {
        let Some(conn) = self.slab.get(token) else {
            return;
        };
        debug!(token, peer = %conn.peer, reason, "closing connection");
        if let Some(id) = conn.timer {
            self.timers.remove(id);
        }
        retire(&self.epoll, &mut self.slab, &self.metrics, token);
    }

    /// Evict every connection whose idle deadline has passed, then re-arm the alarm.
    fn sweep(&mut self) {
        let Self {
            epoll,
            slab,
            timers,
            metrics,
            ..
        } = self;

        let evicted = timers.tick(Instant::now(), |client| {
            debug!(peer = %client.peer, fd = client.fd, "idle connection evicted");
            metrics.inc_evicted();
            retire(epoll, slab, metrics, client.token);
        });

        syscalls::schedule_alarm(self.timeslot_secs);
        debug!(evicted, metrics = ?self.metrics.snapshot(), "timer sweep");
    }

    fn close_all(&mut self) {
        let tokens: Vec<usize> = self.slab.occupied().collect();
        for token in tokens {
            self.evict(token, "shutdown");
        }
    }
}

/// Deregister, close and free a slot. The caller has already dealt with its timer.
fn retire(epoll: &Epoll, slab: &mut ConnectionSlab, metrics: &ReactorMetrics, token: usize) {
    let Some(conn) = slab.get_mut(token) else {
        return;
    };
    let fd = conn.fd;
    if let Err(e) = epoll.delete(fd) {
        trace!(fd, error = %e, "deregister failed");
    }
    syscalls::close_fd(fd);
    slab.free(token);
    metrics.dec_conn();
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.close_all();
        syscalls::close_fd(self.listen_fd);
    }
}
