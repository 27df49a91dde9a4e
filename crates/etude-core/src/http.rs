// src/http.rs
use crate::error::{EtudeError, EtudeResult};
use arrayvec::ArrayVec;
use std::time::SystemTime;

pub const READ_BUF_SIZE: usize = 2048;
pub const WRITE_BUF_SIZE: usize = 1024;
pub const MAX_PATH_LEN: usize = 200;

pub const SERVER_NAME: &str = "etude";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Trace,
    Connect,
    Unknown,
}

impl Method {
    pub fn from_bytes(b: &[u8]) -> Self {
        match b {
            b"GET" => Method::Get,
            b"POST" => Method::Post,
            b"PUT" => Method::Put,
            b"DELETE" => Method::Delete,
            b"PATCH" => Method::Patch,
            b"HEAD" => Method::Head,
            b"OPTIONS" => Method::Options,
            b"TRACE" => Method::Trace,
            b"CONNECT" => Method::Connect,
            _ => Method::Unknown,
        }
    }
}

/// Response statuses this server produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    Forbidden,
    NotFound,
    InternalError,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::InternalError => 500,
        }
    }

    fn status_line(self) -> &'static [u8] {
        match self {
            Status::Ok => b"HTTP/1.1 200 OK\r\n",
            Status::BadRequest => b"HTTP/1.1 400 Bad Request\r\n",
            Status::Forbidden => b"HTTP/1.1 403 Forbidden\r\n",
            Status::NotFound => b"HTTP/1.1 404 Not Found\r\n",
            Status::InternalError => b"HTTP/1.1 500 Internal Error\r\n",
        }
    }

    /// Fixed body sent in place of file content for error statuses.
    pub fn canned_body(self) -> &'static [u8] {
        match self {
            Status::Ok => b"",
            Status::BadRequest => {
                b"Your request has bad syntax or is inherently impossible to satisfy.\n"
            }
            Status::Forbidden => b"You do not have permission to get file from this server.\n",
            Status::NotFound => b"The requested file was not found on this server.\n",
            Status::InternalError => b"There was an unusual problem serving the request file.\n",
        }
    }
}

/// Response header block assembled in a fixed-capacity buffer.
///
/// Every append either writes all of its bytes or none of them and reports
/// [`EtudeError::ResponseOverflow`].
#[derive(Debug, Default)]
pub struct ResponseHeader {
    buf: ArrayVec<u8, WRITE_BUF_SIZE>,
}

impl ResponseHeader {
    pub fn new() -> Self {
        Self {
            buf: ArrayVec::new(),
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining_capacity()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    fn append(&mut self, parts: &[&[u8]]) -> EtudeResult<()> {
        let needed: usize = parts.iter().map(|p| p.len()).sum();
        if needed > self.buf.remaining_capacity() {
            return Err(EtudeError::ResponseOverflow);
        }
        for part in parts {
            self.buf
                .try_extend_from_slice(part)
                .map_err(|_| EtudeError::ResponseOverflow)?;
        }
        Ok(())
    }

    pub fn status_line(&mut self, status: Status) -> EtudeResult<()> {
        self.append(&[status.status_line()])
    }

    pub fn header(&mut self, name: &str, value: &[u8]) -> EtudeResult<()> {
        self.append(&[name.as_bytes(), b": ", value, b"\r\n"])
    }

    pub fn content_length(&mut self, len: usize) -> EtudeResult<()> {
        let mut itoa_buf = itoa::Buffer::new();
        let digits = itoa_buf.format(len);
        self.header("Content-Length", digits.as_bytes())
    }

    pub fn content_type(&mut self, mime: &str) -> EtudeResult<()> {
        self.header("Content-Type", mime.as_bytes())
    }

    pub fn date(&mut self, now: SystemTime) -> EtudeResult<()> {
        self.header("Date", httpdate::fmt_http_date(now).as_bytes())
    }

    pub fn connection(&mut self, keep_alive: bool) -> EtudeResult<()> {
        let value: &[u8] = if keep_alive { b"keep-alive" } else { b"close" };
        self.header("Connection", value)
    }

    pub fn blank_line(&mut self) -> EtudeResult<()> {
        self.append(&[b"\r\n".as_slice()])
    }

    /// Inline body bytes after the blank line (canned error bodies).
    pub fn body(&mut self, bytes: &[u8]) -> EtudeResult<()> {
        self.append(&[bytes])
    }

    /// Status line plus the headers every response carries, up to and
    /// including the blank line.
    pub fn head(
        &mut self,
        status: Status,
        content_len: usize,
        content_type: &str,
        keep_alive: bool,
    ) -> EtudeResult<()> {
        self.status_line(status)?;
        self.header("Server", SERVER_NAME.as_bytes())?;
        self.date(SystemTime::now())?;
        self.content_length(content_len)?;
        self.content_type(content_type)?;
        self.connection(keep_alive)?;
        self.blank_line()
    }

    /// Complete response for an error status with its canned body.
    pub fn canned(&mut self, status: Status, keep_alive: bool) -> EtudeResult<()> {
        let body = status.canned_body();
        self.head(status, body.len(), "text/plain; charset=utf-8", keep_alive)?;
        self.body(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_layout() {
        let mut header = ResponseHeader::new();
        header.head(Status::Ok, 1234, "text/html", true).unwrap();
        let text = std::str::from_utf8(header.as_bytes()).unwrap();

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("\r\nContent-Length: 1234\r\n"));
        assert!(text.contains("\r\nContent-Type: text/html\r\n"));
        assert!(text.contains("\r\nConnection: keep-alive\r\n"));
        assert!(text.contains("\r\nServer: etude\r\n"));
        assert!(text.contains("\r\nDate: "));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_canned_not_found() {
        let mut header = ResponseHeader::new();
        header.canned(Status::NotFound, false).unwrap();
        let text = std::str::from_utf8(header.as_bytes()).unwrap();

        let body = "The requested file was not found on this server.\n";
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains(&format!("Content-Length: {}\r\n", body.len())));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with(&format!("\r\n\r\n{}", body)));
    }

    #[test]
    fn test_overflow_fails_closed() {
        let mut header = ResponseHeader::new();
        let filler = vec![b'x'; WRITE_BUF_SIZE - 10];
        header.body(&filler).unwrap();
        let before = header.len();

        let err = header.header("Content-Type", b"text/html").unwrap_err();
        assert!(matches!(err, EtudeError::ResponseOverflow));
        assert_eq!(header.len(), before);
        assert_eq!(header.remaining(), 10);

        header.blank_line().unwrap();
        assert_eq!(header.len(), before + 2);
    }

    #[test]
    fn test_method_from_bytes() {
        assert_eq!(Method::from_bytes(b"GET"), Method::Get);
        assert_eq!(Method::from_bytes(b"get"), Method::Unknown);
        assert_eq!(Method::from_bytes(b"POST"), Method::Post);
    }
}
