// src/slab.rs
use crate::conn::{Conn, ConnState};
use std::os::fd::RawFd;

/// Fixed table of connection slots. The slot index is carried in the epoll token.
pub struct ConnectionSlab {
    entries: Box<[Conn]>,
    head_free: i32,
    active_count: usize,
}

impl ConnectionSlab {
    /// Allocate every slot once up front.
    pub fn new(capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        for i in 0..capacity {
            let mut conn = Conn::empty();
            // A free slot's fd is the index of the next free slot, -1 ends the list.
            conn.fd = if i == capacity - 1 { -1 } else { (i + 1) as i32 };
            entries.push(conn);
        }

        Self {
            entries: entries.into_boxed_slice(),
            head_free: if capacity == 0 { -1 } else { 0 },
            active_count: 0,
        }
    }

    /// O(1). `None` when every slot is taken.
    #[inline]
    pub fn allocate(&mut self, fd: RawFd) -> Option<usize> {
        if self.head_free == -1 {
            return None;
        }

        let idx = self.head_free as usize;
        let conn = &mut self.entries[idx];
        self.head_free = conn.fd;
        conn.attach(fd);

        self.active_count += 1;
        Some(idx)
    }

    /// O(1). Out-of-range indices and double frees are ignored.
    #[inline]
    pub fn free(&mut self, index: usize) {
        let Some(conn) = self.entries.get_mut(index) else {
            return;
        };
        if conn.state == ConnState::Free {
            return;
        }

        conn.release();
        conn.fd = self.head_free;
        self.head_free = index as i32;
        self.active_count -= 1;
    }

    /// Occupied slot by index. Free slots read as `None`.
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Conn> {
        self.entries
            .get_mut(index)
            .filter(|c| c.state != ConnState::Free)
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Conn> {
        self.entries
            .get(index)
            .filter(|c| c.state != ConnState::Free)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.active_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.active_count == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.head_free == -1
    }

    /// Indices of every occupied slot.
    pub fn occupied(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, c)| c.state != ConnState::Free)
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::Next;
    use crate::metrics::ReactorMetrics;
    use crate::syscalls;
    use std::io::Write;
    use std::os::fd::IntoRawFd;
    use std::os::unix::fs::PermissionsExt;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_slab_operations() {
        let mut slab = ConnectionSlab::new(10);

        assert_eq!(slab.len(), 0);
        assert_eq!(slab.capacity(), 10);

        let idx1 = slab.allocate(100).unwrap();
        assert_eq!(idx1, 0);
        assert_eq!(slab.get(idx1).unwrap().fd, 100);
        assert_eq!(slab.get(idx1).unwrap().state, ConnState::Reading);

        let idx2 = slab.allocate(101).unwrap();
        assert_eq!(idx2, 1);

        slab.free(idx1);
        assert_eq!(slab.len(), 1);
        assert!(slab.get(idx1).is_none());

        // Freed slot goes to the head of the free list and is reused first.
        let idx3 = slab.allocate(102).unwrap();
        assert_eq!(idx3, 0);
        assert_eq!(slab.get(idx3).unwrap().fd, 102);
    }

    #[test]
    fn test_full_and_double_free() {
        let mut slab = ConnectionSlab::new(2);
        let a = slab.allocate(10).unwrap();
        let b = slab.allocate(11).unwrap();
        assert!(slab.is_full());
        assert_eq!(slab.allocate(12), None);

        slab.free(a);
        slab.free(a);
        slab.free(99);
        assert_eq!(slab.len(), 1);
        assert_eq!(slab.occupied().collect::<Vec<_>>(), vec![b]);

        assert_eq!(slab.allocate(13), Some(a));
        assert_eq!(slab.allocate(14), None);
    }

    #[test]
    fn test_free_drops_mapping_of_evicted_slot() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("a.txt");
        std::fs::write(&path, b"mapped").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let (server, mut client) = UnixStream::pair().unwrap();
        server.set_nonblocking(true).unwrap();
        let fd = server.into_raw_fd();
        client.write_all(b"GET /a.txt HTTP/1.1\r\n\r\n").unwrap();

        let metrics = ReactorMetrics::new();
        let mut slab = ConnectionSlab::new(1);
        let idx = slab.allocate(fd).unwrap();
        let conn = slab.get_mut(idx).unwrap();
        conn.read_once().unwrap();
        assert_eq!(conn.process(root.path(), &metrics), Next::Write);
        assert!(conn.is_mapped());

        // Evicted before a single byte went out.
        slab.free(idx);
        assert!(!slab.entries[idx].is_mapped());
        assert!(slab.get(idx).is_none());
        syscalls::close_fd(fd);
    }
}
