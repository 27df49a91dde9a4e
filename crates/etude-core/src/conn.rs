// src/conn.rs
use crate::error::EtudeResult;
use crate::file::{self, MappedFile};
use crate::http::{READ_BUF_SIZE, ResponseHeader, Status};
use crate::metrics::ReactorMetrics;
use crate::parser::{ParseStatus, RequestParser};
use crate::syscalls;
use crate::timer::TimerId;
use std::net::{Ipv4Addr, SocketAddr};
use std::os::fd::RawFd;
use std::path::Path;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConnState {
    #[default]
    Free = 0,
    Reading = 1,
    Writing = 2,
}

/// What the reactor must arm next for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Read,
    Write,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Drained until would-block or the buffer filled up.
    Open,
    PeerClosed,
}

pub struct Conn {
    pub fd: RawFd, // Socket, or next free index while the slot is free
    pub state: ConnState,
    pub peer: SocketAddr,
    pub timer: Option<TimerId>,
    pub requests_served: u32,

    read_buf: [u8; READ_BUF_SIZE],
    read_idx: usize,
    parser: RequestParser,

    header: ResponseHeader,
    header_sent: usize,
    file: Option<MappedFile>,
    file_sent: usize,
    linger: bool,
}

impl Conn {
    pub fn empty() -> Self {
        Self {
            fd: -1,
            state: ConnState::Free,
            peer: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            timer: None,
            requests_served: 0,
            read_buf: [0; READ_BUF_SIZE],
            read_idx: 0,
            parser: RequestParser::new(),
            header: ResponseHeader::new(),
            header_sent: 0,
            file: None,
            file_sent: 0,
            linger: false,
        }
    }

    /// Bind a freshly accepted socket to this slot.
    pub fn attach(&mut self, fd: RawFd) {
        self.fd = fd;
        self.state = ConnState::Reading;
        self.timer = None;
        self.requests_served = 0;
        self.reset_request();
    }

    /// Drop per-request state so the next request starts clean. Buffers are
    /// not zeroed: everything past `read_idx` is unreachable to the parser.
    pub fn reset_request(&mut self) {
        self.read_idx = 0;
        self.parser.reset();
        self.header.clear();
        self.header_sent = 0;
        self.file = None;
        self.file_sent = 0;
        self.linger = false;
        if self.state != ConnState::Free {
            self.state = ConnState::Reading;
        }
    }

    /// Release everything the slot holds besides the descriptor number.
    pub fn release(&mut self) {
        self.file = None;
        self.timer = None;
        self.state = ConnState::Free;
    }

    #[inline]
    pub fn linger(&self) -> bool {
        self.linger
    }

    #[inline]
    pub fn read_len(&self) -> usize {
        self.read_idx
    }

    /// Whether a file mapping is still held for the current response.
    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.file.is_some()
    }

    #[inline]
    pub fn has_pending_output(&self) -> bool {
        self.header_sent < self.header.len()
            || self
                .file
                .as_ref()
                .is_some_and(|f| self.file_sent < f.len())
    }

    /// Receive until the socket would block. Registration is edge-triggered,
    /// so anything left unread here would never be reported again.
    pub fn read_once(&mut self) -> EtudeResult<ReadOutcome> {
        while self.read_idx < READ_BUF_SIZE {
            match syscalls::recv_nonblocking(self.fd, &mut self.read_buf[self.read_idx..])? {
                None => break,
                Some(0) => return Ok(ReadOutcome::PeerClosed),
                Some(n) => self.read_idx += n,
            }
        }
        trace!(fd = self.fd, buffered = self.read_idx, "read drained");
        Ok(ReadOutcome::Open)
    }

    /// Run the parser over the buffered bytes and queue a response once a
    /// request is complete.
    pub fn process(&mut self, doc_root: &Path, metrics: &ReactorMetrics) -> Next {
        match self.parser.parse(&mut self.read_buf[..self.read_idx]) {
            Ok(ParseStatus::Incomplete) if self.read_idx == READ_BUF_SIZE => {
                debug!(fd = self.fd, "request exceeds read buffer");
                Next::Close
            }
            Ok(ParseStatus::Incomplete) => Next::Read,
            Ok(ParseStatus::Complete) => {
                metrics.inc_req();
                self.requests_served += 1;
                self.prepare_response(doc_root)
            }
            Err(e) => {
                debug!(fd = self.fd, error = ?e, "bad request");
                metrics.inc_req();
                self.linger = self.parser.keep_alive();
                self.queue_canned(Status::BadRequest)
            }
        }
    }

    fn prepare_response(&mut self, doc_root: &Path) -> Next {
        let req = self.parser.request(&self.read_buf[..self.read_idx]);
        self.linger = req.keep_alive;

        let served = file::resolve(doc_root, req.path).and_then(|path| {
            let mapped = file::open(&path)?;
            Ok((mapped, file::content_type(&path)))
        });
        debug!(
            fd = self.fd,
            path = req.path,
            status = served.as_ref().map_or_else(|s| s.code(), |_| 200),
            "request complete"
        );

        match served {
            Ok((mapped, content_type)) => {
                match self
                    .header
                    .head(Status::Ok, mapped.len(), content_type, self.linger)
                {
                    Ok(()) => {
                        self.file = Some(mapped);
                        self.state = ConnState::Writing;
                        Next::Write
                    }
                    Err(_) => self.queue_canned(Status::InternalError),
                }
            }
            Err(status) => self.queue_canned(status),
        }
    }

    fn queue_canned(&mut self, status: Status) -> Next {
        self.header.clear();
        self.file = None;
        match self.header.canned(status, self.linger) {
            Ok(()) => {
                self.state = ConnState::Writing;
                Next::Write
            }
            Err(e) => {
                debug!(fd = self.fd, error = %e, "cannot build error response");
                Next::Close
            }
        }
    }

    /// Flush the queued header and file bytes with scatter writes.
    ///
    /// Partial writes advance both cursors and retry; would-block keeps the
    /// cursors for the next writable notification.
    pub fn write(&mut self, metrics: &ReactorMetrics) -> Next {
        if self.header.is_empty() {
            self.reset_request();
            return Next::Read;
        }

        loop {
            let header = &self.header.as_bytes()[self.header_sent..];
            let body = match &self.file {
                Some(f) => &f.as_slice()[self.file_sent..],
                None => &[][..],
            };
            if header.is_empty() && body.is_empty() {
                break;
            }

            match syscalls::writev_nonblocking(self.fd, &[header, body]) {
                Ok(None) => return Next::Write,
                Ok(Some(0)) => {
                    self.file = None;
                    return Next::Close;
                }
                Ok(Some(n)) => {
                    let from_header = n.min(header.len());
                    self.header_sent += from_header;
                    self.file_sent += n - from_header;
                    metrics.add_bytes(n);
                }
                Err(e) => {
                    debug!(fd = self.fd, error = %e, "write failed");
                    self.file = None;
                    return Next::Close;
                }
            }
        }

        // Unmap as soon as the response is out.
        self.file = None;
        if self.linger {
            self.reset_request();
            Next::Read
        } else {
            Next::Close
        }
    }
}

impl Default for Conn {
    fn default() -> Self {
        Self::empty()
    }
}
