//! Composite list operations built from the link primitives.
//!
//! Each operation is a retry loop: take the links it needs via the
//! fallible `try_*` steps, and on any conflict roll everything back and
//! back off. Contention is therefore invisible to callers except as
//! latency; the observable results are the documented sentinel returns.

use std::ptr::NonNull;
use std::sync::atomic::Ordering::{Relaxed, Release};

use crate::atomic::LinkPtr;
use crate::backoff::Backoff;
use crate::lock::unlock_link;
use crate::node::Node;

impl Node {
    /// Splices `elem` immediately before `self`.
    ///
    /// When `self` is a list head this is a tail-append. The operation is
    /// *trusting*: `elem` may be in any state and its fields are
    /// overwritten wholesale, so the caller must exclusively own it.
    ///
    /// # Safety
    ///
    /// `self` must be an initialized member (or head) of a list; `elem`
    /// must be exclusively owned by the caller and must stay alive and
    /// unmoved while it is a member.
    pub unsafe fn append(&self, elem: &Node) {
        let mut backoff = Backoff::new();
        let prev = loop {
            if let Some(prev) = self.try_lock_prev() {
                break prev;
            }
            backoff.relax();
        };
        // elem is unpublished until the release stores below.
        elem.prev.store(prev.into(), Relaxed);
        elem.next.store(LinkPtr::of(self), Relaxed);
        prev.as_ref().next.store(LinkPtr::of(elem), Release);
        self.prev.store(LinkPtr::of(elem), Release);
    }

    /// Splices `elem` immediately after `self`. Mirror of
    /// [`append`](Node::append); head-insert when `self` is a head.
    ///
    /// # Safety
    ///
    /// Same contract as [`append`](Node::append).
    pub unsafe fn insert(&self, elem: &Node) {
        let mut backoff = Backoff::new();
        let next = loop {
            if let Some(next) = self.try_lock_next() {
                break next;
            }
            backoff.relax();
        };
        elem.next.store(next.into(), Relaxed);
        elem.prev.store(LinkPtr::of(self), Relaxed);
        next.as_ref().prev.store(LinkPtr::of(elem), Release);
        self.next.store(LinkPtr::of(elem), Release);
    }

    /// Atomically captures a detached element, transitioning it from the
    /// self-loop to fully-locked. Returns `false` (restoring the observed
    /// state) if the element is not detached.
    unsafe fn try_capture_detached(&self) -> bool {
        let this = LinkPtr::of(self);
        let mut backoff = Backoff::new();
        loop {
            let next = self.next.swap_busy();
            if next.is_busy() {
                backoff.relax();
                continue;
            }
            if next != this {
                self.next.store(next, Release);
                return false;
            }
            let prev = self.prev.swap_busy();
            if prev.is_busy() {
                self.next.store(next, Release);
                backoff.relax();
                continue;
            }
            if prev != this {
                self.prev.store(prev, Release);
                self.next.store(next, Release);
                return false;
            }
            return true;
        }
    }

    /// Like [`append`](Node::append), but for a possibly-shared `elem`:
    /// succeeds only if `elem` is detached, which it first verifies by
    /// atomically transitioning the element from self-loop to
    /// fully-locked. Returns `false` without modifying anything if `elem`
    /// is a member of some list.
    ///
    /// # Safety
    ///
    /// `self` must be an initialized member (or head) of a list; `elem`
    /// must be initialized and must stay alive and unmoved while it is a
    /// member.
    pub unsafe fn try_append(&self, elem: &Node) -> bool {
        if !elem.try_capture_detached() {
            return false;
        }
        self.append(elem);
        true
    }

    /// Like [`insert`](Node::insert), but for a possibly-shared `elem`.
    /// See [`try_append`](Node::try_append).
    ///
    /// # Safety
    ///
    /// Same contract as [`try_append`](Node::try_append).
    pub unsafe fn try_insert(&self, elem: &Node) -> bool {
        if !elem.try_capture_detached() {
            return false;
        }
        self.insert(elem);
        true
    }

    /// Removes `self` from whatever list it is a member of.
    ///
    /// Head-less: the element's own links locate the neighbors, so no list
    /// head is involved. Returns `true` if the element was linked, `false`
    /// if it was already detached. Either way the element is detached
    /// afterwards.
    ///
    /// # Safety
    ///
    /// `self` and its current neighbors must stay alive for the duration
    /// of the call.
    pub unsafe fn delete(&self) -> bool {
        let mut backoff = Backoff::new();
        loop {
            if let Some(ends) = self.try_lock_full() {
                if ends.prev == NonNull::from(self) {
                    // Already detached; put the self-loop back.
                    self.unlock_self();
                    return false;
                }
                unlock_link(ends);
                self.unlock_self();
                return true;
            }
            backoff.relax();
        }
    }

    /// Removes and returns the first element of the list headed by `self`,
    /// or `None` if the list is empty. The returned element is detached.
    ///
    /// # Safety
    ///
    /// `self` must be an initialized list head whose members stay alive
    /// for the duration of the call.
    pub unsafe fn pop(&self) -> Option<NonNull<Node>> {
        let this = LinkPtr::of(self);
        let mut backoff = Backoff::new();
        loop {
            let first = match self.try_lock_next() {
                Some(first) => first,
                None => {
                    backoff.relax();
                    continue;
                }
            };
            if first == NonNull::from(self) {
                // Empty: the lock revealed the self-loop.
                self.unlock_next_link(first);
                return None;
            }
            let first_ref = first.as_ref();

            // The first→second link completes the isolation of `first`.
            let second = first_ref.next.swap_busy();
            if second.is_busy() {
                first_ref.prev.store(this, Release);
                self.next.store(first.into(), Release);
                backoff.relax();
                continue;
            }
            let second_ref = second.deref();
            let forward = second_ref.prev.swap_busy();
            if forward.is_busy() {
                first_ref.next.store(second, Release);
                first_ref.prev.store(this, Release);
                self.next.store(first.into(), Release);
                backoff.relax();
                continue;
            }
            debug_assert_eq!(forward, LinkPtr::from(first));

            second_ref.prev.store(this, Release);
            self.next.store(second, Release);
            first_ref.unlock_self();
            return Some(first);
        }
    }

    /// Detaches the entire chain following the head `self` and returns its
    /// first node, or `None` if the list is empty.
    ///
    /// The detached chain keeps its own terminator convention: the first
    /// node's `prev` points at the former last node, and the last node's
    /// `next` is null. The head is left empty.
    ///
    /// # Safety
    ///
    /// `self` must be an initialized list head whose members stay alive
    /// for the duration of the call.
    ///
    /// **Restriction:** `behead` is safe against concurrent *head-local*
    /// operations (`append`, `insert`, `try_*`, `pop`, another `behead` on
    /// the same head) because they all contend on the head fields held
    /// `BUSY` here. It is **not** safe against concurrent operations on
    /// interior links, that is, `delete` of a mid-list element (including
    /// the current tail) or a running traversal: those never touch the head,
    /// and they can race the terminator store into the former tail's
    /// `next`. Callers must quiesce such operations around a `behead`.
    pub unsafe fn behead(&self) -> Option<NonNull<Node>> {
        let this = LinkPtr::of(self);
        let mut backoff = Backoff::new();
        loop {
            let first = match self.try_lock_next() {
                Some(first) => first,
                None => {
                    backoff.relax();
                    continue;
                }
            };
            if first == NonNull::from(self) {
                self.unlock_next_link(first);
                return None;
            }

            // Capture the tail; holding the head's own `prev` shuts out
            // concurrent appends while the terminator is written.
            let last = self.prev.swap_busy();
            if last.is_busy() {
                first.as_ref().prev.store(this, Release);
                self.next.store(first.into(), Release);
                backoff.relax();
                continue;
            }

            first.as_ref().prev.store(last, Release);
            last.deref().next.store(LinkPtr::null(), Release);
            self.prev.store(this, Release);
            self.next.store(this, Release);
            return Some(first);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container_of;
    use std::sync::atomic::Ordering::Acquire;

    struct Entry {
        value: i64,
        node: Node,
    }

    fn entry(value: i64) -> Box<Entry> {
        Box::new(Entry {
            value,
            node: Node::new(),
        })
    }

    fn new_head() -> Box<Node> {
        let head = Box::new(Node::new());
        head.init();
        head
    }

    unsafe fn value_of(node: &Node) -> i64 {
        (*container_of!(node as *const Node, Entry, node)).value
    }

    /// Walks the list forward collecting payloads, checking structural
    /// health along the way: no BUSY or null at rest, and the backward
    /// walk visits the exact reverse.
    unsafe fn snapshot(head: &Node) -> Vec<i64> {
        let head_ptr = LinkPtr::of(head);
        let mut forward = Vec::new();
        let mut values = Vec::new();
        let mut cur = head.next.load(Acquire);
        while cur != head_ptr {
            assert!(!cur.is_busy(), "BUSY at rest");
            assert!(!cur.is_null(), "null at rest");
            forward.push(cur);
            values.push(value_of(cur.deref()));
            cur = cur.deref().next.load(Acquire);
        }
        let mut backward = Vec::new();
        let mut cur = head.prev.load(Acquire);
        while cur != head_ptr {
            assert!(!cur.is_busy(), "BUSY at rest");
            assert!(!cur.is_null(), "null at rest");
            backward.push(cur);
            cur = cur.deref().prev.load(Acquire);
        }
        backward.reverse();
        assert_eq!(forward, backward, "prev walk must mirror next walk");
        values
    }

    #[test]
    fn append_builds_in_order() {
        let head = new_head();
        let (e1, e2, e3) = (entry(1), entry(2), entry(3));
        unsafe {
            head.append(&e1.node);
            head.append(&e2.node);
            head.append(&e3.node);
            assert_eq!(snapshot(&head), [1, 2, 3]);
        }
    }

    #[test]
    fn insert_adds_after_head() {
        let head = new_head();
        let (e1, e2, e3, e0) = (entry(1), entry(2), entry(3), entry(0));
        unsafe {
            head.append(&e1.node);
            head.append(&e2.node);
            head.append(&e3.node);
            head.insert(&e0.node);
            assert_eq!(snapshot(&head), [0, 1, 2, 3]);
        }
    }

    #[test]
    fn delete_unlinks_and_detaches() {
        let head = new_head();
        let (e1, e2, e3) = (entry(1), entry(2), entry(3));
        unsafe {
            head.append(&e1.node);
            head.append(&e2.node);
            head.append(&e3.node);

            assert!(e2.node.delete());
            assert_eq!(snapshot(&head), [1, 3]);
            assert!(e2.node.is_detached());

            // Second delete is a no-op.
            assert!(!e2.node.delete());
            assert!(e2.node.is_detached());
        }
    }

    #[test]
    fn pop_returns_first_detached() {
        let head = new_head();
        let (e1, e2, e3) = (entry(1), entry(2), entry(3));
        unsafe {
            head.append(&e1.node);
            head.append(&e2.node);
            head.append(&e3.node);

            let popped = head.pop().expect("non-empty");
            assert_eq!(popped, NonNull::from(&e1.node));
            assert!(e1.node.is_detached());
            assert_eq!(snapshot(&head), [2, 3]);
        }
    }

    #[test]
    fn behead_detaches_the_whole_chain() {
        let head = new_head();
        let (e1, e2, e3) = (entry(1), entry(2), entry(3));
        unsafe {
            head.append(&e1.node);
            head.append(&e2.node);
            head.append(&e3.node);

            let first = head.behead().expect("non-empty");
            assert_eq!(first, NonNull::from(&e1.node));
            assert!(head.is_empty());
            assert_eq!(snapshot(&head), [] as [i64; 0]);

            // Chain convention: first.prev is the former last, last.next
            // is null.
            assert_eq!(e1.node.prev.load(Acquire), LinkPtr::of(&e3.node));
            assert!(e3.node.next.load(Acquire).is_null());

            // The chain itself is walkable forward to the terminator.
            let mut values = Vec::new();
            let mut cur = LinkPtr::from(first);
            while !cur.is_null() {
                values.push(value_of(cur.deref()));
                cur = cur.deref().next.load(Acquire);
            }
            assert_eq!(values, [1, 2, 3]);
        }
    }

    #[test]
    fn append_then_delete_restores_the_list() {
        let head = new_head();
        let (e1, e2, e) = (entry(1), entry(2), entry(9));
        unsafe {
            head.append(&e1.node);
            head.append(&e2.node);
            head.append(&e.node);
            assert!(e.node.delete());
            assert_eq!(snapshot(&head), [1, 2]);
        }
    }

    #[test]
    fn pop_then_append_rotates() {
        let head = new_head();
        let (e1, e2, e3) = (entry(1), entry(2), entry(3));
        unsafe {
            head.append(&e1.node);
            head.append(&e2.node);
            head.append(&e3.node);

            let popped = head.pop().expect("non-empty");
            head.append(popped.as_ref());
            assert_eq!(snapshot(&head), [2, 3, 1]);
        }
    }

    #[test]
    fn behead_then_reappend_restores_order() {
        let head = new_head();
        let (e1, e2, e3) = (entry(1), entry(2), entry(3));
        unsafe {
            head.append(&e1.node);
            head.append(&e2.node);
            head.append(&e3.node);

            let mut cur = match head.behead() {
                Some(first) => LinkPtr::from(first),
                None => unreachable!(),
            };
            while !cur.is_null() {
                let node = cur.deref();
                cur = node.next.load(Acquire);
                head.append(node);
            }
            assert_eq!(snapshot(&head), [1, 2, 3]);
        }
    }

    #[test]
    fn empty_list_boundaries() {
        let head = new_head();
        unsafe {
            assert!(head.pop().is_none());
            assert!(head.behead().is_none());
            assert!(head.is_empty());
            assert_eq!(snapshot(&head), [] as [i64; 0]);
        }
    }

    #[test]
    fn single_element_boundaries() {
        let head = new_head();
        let e = entry(7);
        unsafe {
            head.append(&e.node);
            let popped = head.pop().expect("one element");
            assert_eq!(popped, NonNull::from(&e.node));
            assert!(head.is_empty());
            assert!(e.node.is_detached());

            // delete on a single element empties the list the same way.
            head.append(&e.node);
            assert!(e.node.delete());
            assert!(head.is_empty());
            assert!(e.node.is_detached());
        }
    }

    #[test]
    fn try_append_refuses_linked_elements() {
        let head = new_head();
        let other = new_head();
        let e = entry(1);
        e.node.init();
        unsafe {
            assert!(head.try_append(&e.node));
            assert_eq!(snapshot(&head), [1]);

            // Already a member: no-op on both lists.
            assert!(!other.try_append(&e.node));
            assert!(!other.try_insert(&e.node));
            assert_eq!(snapshot(&head), [1]);
            assert_eq!(snapshot(&other), [] as [i64; 0]);
        }
    }

    #[test]
    fn try_insert_adds_at_head() {
        let head = new_head();
        let (e1, e2) = (entry(1), entry(2));
        e1.node.init();
        e2.node.init();
        unsafe {
            assert!(head.try_insert(&e1.node));
            assert!(head.try_insert(&e2.node));
            assert_eq!(snapshot(&head), [2, 1]);
        }
    }

    #[test]
    fn concurrent_appends_preserve_every_element() {
        const THREADS: usize = 4;
        const PER_THREAD: usize = 250;

        let head = new_head();
        let pools: Vec<Vec<Box<Entry>>> = (0..THREADS)
            .map(|t| {
                (0..PER_THREAD)
                    .map(|i| entry((t * PER_THREAD + i) as i64))
                    .collect()
            })
            .collect();

        crossbeam_utils::thread::scope(|scope| {
            for pool in &pools {
                let head = &head;
                scope.spawn(move |_| {
                    for e in pool {
                        unsafe { head.append(&e.node) };
                    }
                });
            }
        })
        .unwrap();

        let mut values = unsafe { snapshot(&head) };
        values.sort_unstable();
        let expected: Vec<i64> = (0..(THREADS * PER_THREAD) as i64).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn conservation_under_concurrent_append_and_pop() {
        use rand::Rng;

        const THREADS: usize = 4;
        const OPS: usize = 400;
        const SEED_NODES: usize = 32;

        let head = new_head();
        let pools: Vec<Vec<Box<Entry>>> = (0..THREADS)
            .map(|t| (0..SEED_NODES).map(|i| entry((t * SEED_NODES + i) as i64)).collect())
            .collect();

        let deltas: Vec<i64> = crossbeam_utils::thread::scope(|scope| {
            let handles: Vec<_> = pools
                .iter()
                .map(|pool| {
                    let head = &head;
                    scope.spawn(move |_| {
                        let mut rng = rand::thread_rng();
                        let mut delta = 0i64;
                        // Nodes this thread currently holds detached; a
                        // popped node becomes the popper's to reuse.
                        let mut stash: Vec<NonNull<Node>> =
                            pool.iter().map(|e| NonNull::from(&e.node)).collect();
                        for _ in 0..OPS {
                            if !stash.is_empty() && rng.gen_bool(0.5) {
                                let node = stash.pop().unwrap();
                                unsafe { head.append(node.as_ref()) };
                                delta += 1;
                            } else if let Some(node) = unsafe { head.pop() } {
                                assert!(unsafe { node.as_ref().is_detached() });
                                stash.push(node);
                                delta -= 1;
                            }
                        }
                        delta
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
        .unwrap();

        let expected: i64 = deltas.iter().sum();
        let values = unsafe { snapshot(&head) };
        assert_eq!(values.len() as i64, expected);
    }

    #[test]
    fn conservation_under_concurrent_append_and_delete() {
        use rand::Rng;

        const THREADS: usize = 4;
        const OPS: usize = 400;
        const OWNED: usize = 24;

        let head = new_head();
        let pools: Vec<Vec<Box<Entry>>> = (0..THREADS)
            .map(|t| (0..OWNED).map(|i| entry((t * OWNED + i) as i64)).collect())
            .collect();

        let counts: Vec<i64> = crossbeam_utils::thread::scope(|scope| {
            let handles: Vec<_> = pools
                .iter()
                .map(|pool| {
                    let head = &head;
                    scope.spawn(move |_| {
                        let mut rng = rand::thread_rng();
                        // Only the owner ever touches these nodes, so it
                        // knows exactly which are linked.
                        let mut linked = vec![false; pool.len()];
                        for _ in 0..OPS {
                            let i = rng.gen_range(0..pool.len());
                            unsafe {
                                if linked[i] {
                                    assert!(pool[i].node.delete());
                                    linked[i] = false;
                                } else {
                                    head.append(&pool[i].node);
                                    linked[i] = true;
                                }
                            }
                        }
                        linked.iter().filter(|&&l| l).count() as i64
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
        .unwrap();

        let expected: i64 = counts.iter().sum();
        let values = unsafe { snapshot(&head) };
        assert_eq!(values.len() as i64, expected);
    }
}
