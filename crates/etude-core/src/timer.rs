//! Idle-connection timers kept in a list sorted by expiration.
//!
//! Nodes live in an arena and link to each other by slot index, so unlinking
//! a node given its [`TimerId`] is O(1) without any aliasing pointers. A
//! `TimerId` carries the slot generation: once its timer fires or is removed,
//! every operation on the stale id is a no-op.
//!
//! Equal expirations keep insertion order, so `tick` evicts ties first-in
//! first-out.

use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Node<T> {
    expire: Instant,
    data: T,
    prev: Option<u32>,
    next: Option<u32>,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    node: Option<Node<T>>,
    next_free: Option<u32>,
}

#[derive(Debug)]
pub struct TimerList<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl<T> Default for TimerList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerList<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_head: None,
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Earliest pending expiration.
    pub fn peek_expiry(&self) -> Option<Instant> {
        self.head.map(|h| self.node(h).expire)
    }

    pub fn expiry(&self, id: TimerId) -> Option<Instant> {
        self.resolve(id).map(|idx| self.node(idx).expire)
    }

    pub fn get(&self, id: TimerId) -> Option<&T> {
        self.resolve(id).map(|idx| &self.node(idx).data)
    }

    /// Timers in expiration order.
    pub fn iter(&self) -> impl Iterator<Item = (Instant, &T)> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let idx = cursor?;
            let node = self.node(idx);
            cursor = node.next;
            Some((node.expire, &node.data))
        })
    }

    /// Add a timer. O(1) for an empty list or a new earliest deadline,
    /// otherwise a scan from the head.
    pub fn insert(&mut self, expire: Instant, data: T) -> TimerId {
        let node = Node {
            expire,
            data,
            prev: None,
            next: None,
        };

        let index = match self.free_head {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                self.free_head = slot.next_free.take();
                slot.node = Some(node);
                index
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                    next_free: None,
                });
                index
            }
        };

        self.link_ordered(index);
        self.len += 1;

        TimerId {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    /// Move a timer to a new expiration. Returns `false` for a stale id.
    ///
    /// A timer that still expires no later than its successor stays where it
    /// is. One that moved later is reinserted by scanning forward from its
    /// former successor instead of from the head.
    pub fn reschedule(&mut self, id: TimerId, expire: Instant) -> bool {
        let Some(idx) = self.resolve(id) else {
            return false;
        };

        let (prev, next) = {
            let node = self.node_mut(idx);
            node.expire = expire;
            (node.prev, node.next)
        };

        if prev.is_some_and(|p| expire < self.node(p).expire) {
            self.unlink(idx);
            self.link_ordered(idx);
            return true;
        }

        match next {
            Some(n) if self.node(n).expire < expire => {
                self.unlink(idx);
                self.link_after(idx, n);
            }
            _ => {}
        }
        true
    }

    /// Unlink and drop a timer, handing back its data. O(1).
    pub fn remove(&mut self, id: TimerId) -> Option<T> {
        let idx = self.resolve(id)?;
        self.unlink(idx);
        Some(self.release(idx))
    }

    /// Fire every timer whose expiration is at or before `now`, earliest
    /// first. Stops at the first pending timer. Returns how many fired.
    pub fn tick<F>(&mut self, now: Instant, mut on_expire: F) -> usize
    where
        F: FnMut(T),
    {
        let mut fired = 0;
        while let Some(head) = self.head {
            if now < self.node(head).expire {
                break;
            }
            self.unlink(head);
            on_expire(self.release(head));
            fired += 1;
        }
        fired
    }

    fn resolve(&self, id: TimerId) -> Option<u32> {
        let slot = self.slots.get(id.index as usize)?;
        (slot.generation == id.generation && slot.node.is_some()).then_some(id.index)
    }

    fn node(&self, idx: u32) -> &Node<T> {
        match &self.slots[idx as usize].node {
            Some(node) => node,
            None => unreachable!("linked timer slot {idx} is vacant"),
        }
    }

    fn node_mut(&mut self, idx: u32) -> &mut Node<T> {
        match &mut self.slots[idx as usize].node {
            Some(node) => node,
            None => unreachable!("linked timer slot {idx} is vacant"),
        }
    }

    fn link_ordered(&mut self, idx: u32) {
        let expire = self.node(idx).expire;
        match self.head {
            None => {
                self.head = Some(idx);
                self.tail = Some(idx);
            }
            Some(head) if expire < self.node(head).expire => {
                self.node_mut(head).prev = Some(idx);
                self.node_mut(idx).next = Some(head);
                self.head = Some(idx);
            }
            Some(head) => self.link_after(idx, head),
        }
    }

    /// Splice `idx` before the first node after `start` that expires strictly
    /// later, or at the tail. `start` must not expire later than `idx`.
    fn link_after(&mut self, idx: u32, start: u32) {
        let expire = self.node(idx).expire;
        let mut prev = start;
        let mut cursor = self.node(start).next;

        while let Some(cur) = cursor {
            if expire < self.node(cur).expire {
                self.node_mut(prev).next = Some(idx);
                self.node_mut(cur).prev = Some(idx);
                let node = self.node_mut(idx);
                node.prev = Some(prev);
                node.next = Some(cur);
                return;
            }
            prev = cur;
            cursor = self.node(cur).next;
        }

        self.node_mut(prev).next = Some(idx);
        let node = self.node_mut(idx);
        node.prev = Some(prev);
        node.next = None;
        self.tail = Some(idx);
    }

    fn unlink(&mut self, idx: u32) {
        let (prev, next) = {
            let node = self.node_mut(idx);
            (node.prev.take(), node.next.take())
        };

        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
    }

    fn release(&mut self, idx: u32) -> T {
        let slot = &mut self.slots[idx as usize];
        let node = match slot.node.take() {
            Some(node) => node,
            None => unreachable!("released timer slot {idx} is vacant"),
        };
        slot.generation = slot.generation.wrapping_add(1);
        slot.next_free = self.free_head;
        self.free_head = Some(idx);
        self.len -= 1;
        node.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(base: Instant, secs: u64) -> Instant {
        base + Duration::from_secs(secs)
    }

    fn order<T: Copy>(list: &TimerList<T>) -> Vec<T> {
        list.iter().map(|(_, d)| *d).collect()
    }

    fn assert_sorted<T>(list: &TimerList<T>) {
        let expiries: Vec<Instant> = list.iter().map(|(e, _)| e).collect();
        assert!(expiries.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(expiries.len(), list.len());
    }

    #[test]
    fn test_insert_orders_ties_by_insertion() {
        let base = Instant::now();
        let mut list = TimerList::new();
        list.insert(at(base, 10), "ten");
        list.insert(at(base, 5), "five-a");
        list.insert(at(base, 20), "twenty");
        list.insert(at(base, 5), "five-b");

        assert_eq!(order(&list), vec!["five-a", "five-b", "ten", "twenty"]);
        assert_eq!(list.peek_expiry(), Some(at(base, 5)));
    }

    #[test]
    fn test_tick_evicts_expired_prefix() {
        let base = Instant::now();
        let mut list = TimerList::new();
        for (secs, name) in [(10, "ten"), (5, "five-a"), (20, "twenty"), (5, "five-b")] {
            list.insert(at(base, secs), name);
        }

        let mut fired = Vec::new();
        let count = list.tick(at(base, 12), |name| fired.push(name));

        assert_eq!(count, 3);
        assert_eq!(fired, vec!["five-a", "five-b", "ten"]);
        assert_eq!(order(&list), vec!["twenty"]);
    }

    #[test]
    fn test_tick_fires_nothing_before_head() {
        let base = Instant::now();
        let mut list = TimerList::new();
        list.insert(at(base, 3), 1);
        assert_eq!(list.tick(at(base, 2), |_| panic!("fired early")), 0);
        assert_eq!(list.tick(at(base, 3), |_| {}), 1);
        assert!(list.is_empty());
        assert_eq!(list.peek_expiry(), None);
    }

    #[test]
    fn test_remove_head_middle_tail() {
        let base = Instant::now();
        let mut list = TimerList::new();
        let a = list.insert(at(base, 1), 'a');
        let b = list.insert(at(base, 2), 'b');
        let c = list.insert(at(base, 3), 'c');
        let d = list.insert(at(base, 4), 'd');

        assert_eq!(list.remove(b), Some('b'));
        assert_eq!(order(&list), vec!['a', 'c', 'd']);
        assert_eq!(list.remove(a), Some('a'));
        assert_eq!(order(&list), vec!['c', 'd']);
        assert_eq!(list.remove(d), Some('d'));
        assert_eq!(order(&list), vec!['c']);
        assert_eq!(list.remove(c), Some('c'));
        assert!(list.is_empty());

        // Stale handles are rejected, even after their slot is reused.
        assert_eq!(list.remove(a), None);
        let e = list.insert(at(base, 9), 'e');
        assert_eq!(list.get(d), None);
        assert!(!list.reschedule(c, at(base, 1)));
        assert_eq!(list.get(e), Some(&'e'));
    }

    #[test]
    fn test_reschedule_in_place_when_still_ordered() {
        let base = Instant::now();
        let mut list = TimerList::new();
        let a = list.insert(at(base, 1), 'a');
        list.insert(at(base, 5), 'b');

        assert!(list.reschedule(a, at(base, 4)));
        assert_eq!(order(&list), vec!['a', 'b']);
        assert_eq!(list.expiry(a), Some(at(base, 4)));
    }

    #[test]
    fn test_reschedule_moves_later_timer_forward() {
        let base = Instant::now();
        let mut list = TimerList::new();
        let a = list.insert(at(base, 1), 'a');
        list.insert(at(base, 2), 'b');
        list.insert(at(base, 3), 'c');
        let d = list.insert(at(base, 4), 'd');

        assert!(list.reschedule(a, at(base, 3)));
        assert_eq!(order(&list), vec!['b', 'c', 'a', 'd']);

        assert!(list.reschedule(d, at(base, 0)));
        assert_eq!(order(&list), vec!['d', 'b', 'c', 'a']);

        let x = list.insert(at(base, 10), 'x');
        assert!(list.reschedule(x, at(base, 11)));
        assert_eq!(order(&list), vec!['d', 'b', 'c', 'a', 'x']);
        assert_sorted(&list);
    }

    #[test]
    fn test_random_operations_keep_list_sorted() {
        let base = Instant::now();
        let mut list = TimerList::new();
        let mut live: Vec<TimerId> = Vec::new();
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for _ in 0..2_000 {
            let roll = next() % 10;
            let secs = next() % 50;
            if roll < 5 || live.is_empty() {
                live.push(list.insert(at(base, secs), secs));
            } else if roll < 8 {
                let id = live[(next() as usize) % live.len()];
                assert!(list.reschedule(id, at(base, secs)));
            } else {
                let id = live.swap_remove((next() as usize) % live.len());
                assert!(list.remove(id).is_some());
            }
            assert_sorted(&list);
        }

        let before: Vec<Instant> = list.iter().map(|(e, _)| e).collect();
        let cutoff = at(base, 25);
        let fired = list.tick(cutoff, |_| {});
        let expected_fired = before.iter().filter(|e| **e <= cutoff).count();
        assert_eq!(fired, expected_fired);
        let after: Vec<Instant> = list.iter().map(|(e, _)| e).collect();
        assert_eq!(after.as_slice(), &before[expected_fired..]);
    }
}
