// src/parser.rs
//! Incremental HTTP/1.1 request parser.
//!
//! The parser owns no bytes. Each call to [`RequestParser::parse`] receives the
//! connection's read buffer up to its write cursor and resumes at the last
//! checked position, so a request may arrive in any number of pieces. Line
//! terminators are overwritten with NUL in place once consumed.

use crate::http::{Method, READ_BUF_SIZE};
use std::num::IntErrorKind;
use std::ops::Range;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// A `\r` not followed by `\n`.
    MalformedLine,
    /// Request line is not `METHOD SP TARGET SP VERSION`.
    InvalidRequestLine,
    UnsupportedMethod,
    UnsupportedVersion,
    /// Target is empty, not origin-form after normalization, or not UTF-8.
    InvalidTarget,
    InvalidContentLength,
    /// Declared body cannot fit into the read buffer.
    TooLarge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    RequestLine,
    Header,
    Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// Wait for more bytes.
    Incomplete,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineStatus {
    /// Terminator found; the line ends at this index.
    Complete(usize),
    Open,
    Bad,
}

/// A parsed request borrowing from the read buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<'a> {
    pub method: Method,
    pub path: &'a str,
    pub host: Option<&'a str>,
    pub content_length: usize,
    pub keep_alive: bool,
    pub body: &'a [u8],
}

#[derive(Debug, Clone)]
pub struct RequestParser {
    state: CheckState,
    checked_idx: usize,
    start_line: usize,
    method: Method,
    path: Range<usize>,
    host: Option<Range<usize>>,
    content_length: usize,
    keep_alive: bool,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    pub fn new() -> Self {
        Self {
            state: CheckState::RequestLine,
            checked_idx: 0,
            start_line: 0,
            method: Method::Get,
            path: 0..0,
            host: None,
            content_length: 0,
            keep_alive: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    #[inline]
    pub fn state(&self) -> CheckState {
        self.state
    }

    #[inline]
    pub fn checked_idx(&self) -> usize {
        self.checked_idx
    }

    #[inline]
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Advance over `buf`, the read buffer filled up to its write cursor.
    pub fn parse(&mut self, buf: &mut [u8]) -> Result<ParseStatus, ParseError> {
        loop {
            if self.state == CheckState::Content {
                // checked_idx stays on the header boundary while the body fills.
                return if buf.len() >= self.body_end() {
                    Ok(ParseStatus::Complete)
                } else {
                    Ok(ParseStatus::Incomplete)
                };
            }

            let end = match self.scan_line(buf) {
                LineStatus::Complete(end) => end,
                LineStatus::Open => return Ok(ParseStatus::Incomplete),
                LineStatus::Bad => return Err(ParseError::MalformedLine),
            };
            let start = self.start_line;
            self.start_line = self.checked_idx;

            match self.state {
                CheckState::RequestLine => {
                    self.parse_request_line(buf, start..end)?;
                    self.state = CheckState::Header;
                }
                CheckState::Header if start == end => {
                    if self.body_end() > READ_BUF_SIZE {
                        return Err(ParseError::TooLarge);
                    }
                    self.state = CheckState::Content;
                }
                CheckState::Header => self.parse_header(buf, start..end)?,
                CheckState::Content => unreachable!("content is checked before scanning"),
            }
        }
    }

    /// The parsed request. Meaningful once `parse` reported `Complete`.
    pub fn request<'a>(&self, buf: &'a [u8]) -> Request<'a> {
        let body_start = self.checked_idx.min(buf.len());
        let body_end = self.body_end().min(buf.len());
        Request {
            method: self.method,
            path: std::str::from_utf8(&buf[self.path.clone()]).unwrap_or(""),
            host: self
                .host
                .clone()
                .and_then(|r| std::str::from_utf8(&buf[r]).ok()),
            content_length: self.content_length,
            keep_alive: self.keep_alive,
            body: &buf[body_start..body_end],
        }
    }

    /// Buffer offset one past the declared body. Saturates, so an absurd
    /// length can only ever compare as too large.
    #[inline]
    fn body_end(&self) -> usize {
        self.checked_idx.saturating_add(self.content_length)
    }

    fn scan_line(&mut self, buf: &mut [u8]) -> LineStatus {
        let Some(offset) = memchr::memchr2(b'\r', b'\n', &buf[self.checked_idx..]) else {
            self.checked_idx = buf.len();
            return LineStatus::Open;
        };
        let idx = self.checked_idx + offset;

        if buf[idx] == b'\n' {
            buf[idx] = 0;
            self.checked_idx = idx + 1;
            return LineStatus::Complete(idx);
        }

        // Leave a trailing '\r' unconsumed until its partner arrives.
        self.checked_idx = idx;
        match buf.get(idx + 1) {
            None => LineStatus::Open,
            Some(b'\n') => {
                buf[idx] = 0;
                buf[idx + 1] = 0;
                self.checked_idx = idx + 2;
                LineStatus::Complete(idx)
            }
            Some(_) => LineStatus::Bad,
        }
    }

    fn parse_request_line(&mut self, buf: &[u8], line: Range<usize>) -> Result<(), ParseError> {
        let text = &buf[line.clone()];

        let method_end = text
            .iter()
            .position(|b| is_space(*b))
            .ok_or(ParseError::InvalidRequestLine)?;
        let method = Method::from_bytes(&text[..method_end]);
        if method != Method::Get {
            return Err(ParseError::UnsupportedMethod);
        }

        let target_start = skip_spaces(text, method_end);
        let target_len = text[target_start..]
            .iter()
            .position(|b| is_space(*b))
            .ok_or(ParseError::InvalidRequestLine)?;
        let target_end = target_start + target_len;

        let version_start = skip_spaces(text, target_end);
        let version_end = trim_end(text, version_start);
        if &text[version_start..version_end] != b"HTTP/1.1" {
            return Err(ParseError::UnsupportedVersion);
        }

        let target = normalize_target(text, target_start..target_end)?;
        if std::str::from_utf8(&text[target.clone()]).is_err() {
            return Err(ParseError::InvalidTarget);
        }

        self.method = method;
        self.path = line.start + target.start..line.start + target.end;
        trace!(path_len = target.len(), "request line parsed");
        Ok(())
    }

    fn parse_header(&mut self, buf: &[u8], line: Range<usize>) -> Result<(), ParseError> {
        let text = &buf[line.clone()];

        if let Some(value) = header_value(text, b"Connection:") {
            if text[value].eq_ignore_ascii_case(b"keep-alive") {
                self.keep_alive = true;
            }
        } else if let Some(value) = header_value(text, b"Content-Length:") {
            let digits =
                std::str::from_utf8(&text[value]).map_err(|_| ParseError::InvalidContentLength)?;
            let len = digits.parse::<usize>().map_err(|e| match e.kind() {
                IntErrorKind::PosOverflow => ParseError::TooLarge,
                _ => ParseError::InvalidContentLength,
            })?;
            if len > READ_BUF_SIZE {
                return Err(ParseError::TooLarge);
            }
            self.content_length = len;
        } else if let Some(value) = header_value(text, b"Host:") {
            self.host = Some(line.start + value.start..line.start + value.end);
        } else {
            trace!(len = text.len(), "ignoring unrecognized header");
        }
        Ok(())
    }
}

#[inline]
fn is_space(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

fn skip_spaces(text: &[u8], mut from: usize) -> usize {
    while from < text.len() && is_space(text[from]) {
        from += 1;
    }
    from
}

fn trim_end(text: &[u8], start: usize) -> usize {
    let mut end = text.len();
    while end > start && is_space(text[end - 1]) {
        end -= 1;
    }
    end
}

/// Trimmed value range of `text` when its name matches `prefix` (which
/// includes the colon) ignoring ASCII case.
fn header_value(text: &[u8], prefix: &[u8]) -> Option<Range<usize>> {
    if text.len() < prefix.len() || !text[..prefix.len()].eq_ignore_ascii_case(prefix) {
        return None;
    }
    let start = skip_spaces(text, prefix.len());
    Some(start..trim_end(text, start))
}

/// Reduce an origin- or absolute-form target to its path, without query.
fn normalize_target(text: &[u8], target: Range<usize>) -> Result<Range<usize>, ParseError> {
    let mut start = target.start;
    let end = target.end;

    for scheme in [b"http://".as_slice(), b"https://".as_slice()] {
        let raw = &text[start..end];
        if raw.len() >= scheme.len() && raw[..scheme.len()].eq_ignore_ascii_case(scheme) {
            let authority = start + scheme.len();
            let slash = text[authority..end]
                .iter()
                .position(|b| *b == b'/')
                .ok_or(ParseError::InvalidTarget)?;
            start = authority + slash;
            break;
        }
    }

    let end = text[start..end]
        .iter()
        .position(|b| *b == b'?')
        .map_or(end, |q| start + q);

    if start == end || text[start] != b'/' {
        return Err(ParseError::InvalidTarget);
    }
    Ok(start..end)
}
