// src/metrics.rs
use std::sync::atomic::{AtomicUsize, Ordering};

/// Reactor counters, shared as `Arc<ReactorMetrics>` so other threads can read them.
#[repr(C, align(64))]
#[derive(Debug)]
pub struct ReactorMetrics {
    pub active_conns: AtomicUsize,
    pub req_count: AtomicUsize,
    pub bytes_sent: AtomicUsize,
    pub rejected_busy: AtomicUsize,
    pub idle_evicted: AtomicUsize,
}

/// Plain copy of the counters at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub active_conns: usize,
    pub req_count: usize,
    pub bytes_sent: usize,
    pub rejected_busy: usize,
    pub idle_evicted: usize,
}

impl ReactorMetrics {
    pub fn new() -> Self {
        Self {
            active_conns: AtomicUsize::new(0),
            req_count: AtomicUsize::new(0),
            bytes_sent: AtomicUsize::new(0),
            rejected_busy: AtomicUsize::new(0),
            idle_evicted: AtomicUsize::new(0),
        }
    }

    pub fn inc_req(&self) {
        self.req_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_conn(&self) {
        self.active_conns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_conn(&self) {
        self.active_conns.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.rejected_busy.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_evicted(&self) {
        self.idle_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_conns: self.active_conns.load(Ordering::Relaxed),
            req_count: self.req_count.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            rejected_busy: self.rejected_busy.load(Ordering::Relaxed),
            idle_evicted: self.idle_evicted.load(Ordering::Relaxed),
        }
    }
}

impl Default for ReactorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let m = ReactorMetrics::new();
        m.inc_conn();
        m.inc_conn();
        m.dec_conn();
        m.inc_req();
        m.add_bytes(512);
        m.inc_evicted();

        let snap = m.snapshot();
        assert_eq!(snap.active_conns, 1);
        assert_eq!(snap.req_count, 1);
        assert_eq!(snap.bytes_sent, 512);
        assert_eq!(snap.rejected_busy, 0);
        assert_eq!(snap.idle_evicted, 1);
    }
}
