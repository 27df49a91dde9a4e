// src/file.rs
//! Document-root lookup and read-only file mappings.

use crate::error::EtudeResult;
use crate::http::{MAX_PATH_LEN, Status};
use libc::c_void;
use std::fs::{self, File};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::ptr;
use tracing::{debug, trace};

const OTHER_READABLE: u32 = 0o004;

/// A whole file mapped `PROT_READ`/`MAP_PRIVATE`.
///
/// The region is unmapped exactly once, when the value is dropped. The file
/// descriptor used to create it can be closed right after `map` returns.
#[derive(Debug)]
pub struct MappedFile {
    ptr: *mut c_void,
    len: usize,
}

// SAFETY: the mapping is read-only and exclusively owned; nothing else holds
// the pointer, so moving it to another thread cannot create aliasing writes.
unsafe impl Send for MappedFile {}

impl MappedFile {
    pub fn map(file: &File) -> EtudeResult<Self> {
        let len = file.metadata()?.len() as usize;
        if len == 0 {
            return Ok(Self::empty());
        }

        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error().into());
        }
        Ok(Self { ptr, len })
    }

    pub fn empty() -> Self {
        Self {
            ptr: ptr::null_mut(),
            len: 0,
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        if self.len == 0 {
            return &[];
        }
        // SAFETY: ptr/len describe a live PROT_READ mapping owned by self.
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        if self.len > 0 {
            unsafe {
                libc::munmap(self.ptr, self.len);
            }
        }
    }
}

/// Join a request path onto `doc_root`.
///
/// `/` resolves to `index.html`. Empty and `.` segments collapse, `..`
/// segments and backslashes are refused.
pub fn resolve(doc_root: &Path, target: &str) -> Result<PathBuf, Status> {
    if target.contains('\0') {
        return Err(Status::BadRequest);
    }

    let mut path = doc_root.to_path_buf();
    let mut segments = 0;
    for segment in target.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(Status::Forbidden),
            s if s.contains('\\') => return Err(Status::Forbidden),
            s => {
                path.push(s);
                segments += 1;
            }
        }
    }
    if segments == 0 {
        path.push("index.html");
    }

    if path.as_os_str().len() > MAX_PATH_LEN {
        return Err(Status::BadRequest);
    }
    Ok(path)
}

/// Stat, permission-check and map the file at `path`.
pub fn open(path: &Path) -> Result<MappedFile, Status> {
    let meta = fs::metadata(path).map_err(|_| Status::NotFound)?;
    if meta.permissions().mode() & OTHER_READABLE == 0 {
        debug!(path = %path.display(), "file is not world-readable");
        return Err(Status::Forbidden);
    }
    if meta.is_dir() {
        return Err(Status::BadRequest);
    }

    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Status::NotFound,
        io::ErrorKind::PermissionDenied => Status::Forbidden,
        _ => Status::InternalError,
    })?;
    let mapped = MappedFile::map(&file).map_err(|e| {
        debug!(path = %path.display(), error = %e, "mmap failed");
        Status::InternalError
    })?;
    trace!(path = %path.display(), len = mapped.len(), "file mapped");
    Ok(mapped)
}

/// `Content-Type` value for a served file.
pub fn content_type(path: &Path) -> &'static str {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("application/octet-stream")
}
