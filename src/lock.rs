//! Link and element lock primitives.
//!
//! A *link* is the edge from node A's `next` to node B's `prev`. Locking it
//! means exchanging both fields with `BUSY`; the prior values (a pointer to
//! B, a pointer to A) are the link contents that the owner must preserve in
//! order to unlock. Every acquisition here follows the same discipline:
//!
//! * the exchange that takes an end is acquire-ordered, and a prior value
//!   of `BUSY` means another thread owns that end;
//! * on a conflict partway through a multi-step acquisition, every field
//!   this thread swapped to `BUSY` is restored, in LIFO order, with
//!   release stores;
//! * nothing is held across a retry, so there is no hold-and-wait cycle:
//!   two threads colliding on overlapping links both roll back, and the
//!   caller's back-off de-synchronizes them.
//!
//! The fallible `try_*` steps return `None` on conflict and leave the list
//! exactly as it was; the blocking wrappers retry with
//! [`Backoff`](crate::Backoff) until they win.

use std::ptr::NonNull;
use std::sync::atomic::Ordering::Release;

use crate::atomic::LinkPtr;
use crate::backoff::Backoff;
use crate::node::Node;

/// The saved contents of locked links around an element.
///
/// `prev` is the element's predecessor and `next` its successor at the
/// moment the locks were taken. The pair is handed back to the unlock
/// family: [`unlock_full`](Node::unlock_full) restores the element between
/// the two, [`unlock_link`] reconnects them directly (bypassing the
/// element), and [`unlock_elem`](Node::unlock_elem) rewrites only the
/// element's own fields.
#[derive(Copy, Clone, Debug)]
pub struct Ends {
    pub prev: NonNull<Node>,
    pub next: NonNull<Node>,
}

impl Node {
    /// One attempt at locking the outgoing link `self` → successor.
    ///
    /// On success both ends are `BUSY` and the successor is returned. On
    /// conflict, everything is restored and `None` is returned.
    pub(crate) unsafe fn try_lock_next(&self) -> Option<NonNull<Node>> {
        let next = self.next.swap_busy();
        if next.is_busy() {
            return None;
        }
        debug_assert!(!next.is_null(), "locking a link of an uninitialized node");

        let back = next.deref().prev.swap_busy();
        if back.is_busy() {
            // The successor is being locked from its other side.
            self.next.store(next, Release);
            return None;
        }
        debug_assert_eq!(back, LinkPtr::of(self));
        Some(next.as_non_null())
    }

    /// Non-blocking mirror of [`try_lock_next`](Node::try_lock_next) for
    /// the incoming link predecessor → `self`: on a conflict at either
    /// end, restores what was taken and returns `None` instead of
    /// retrying.
    ///
    /// # Safety
    ///
    /// Same contract as [`lock_next_link`](Node::lock_next_link).
    pub unsafe fn try_lock_prev(&self) -> Option<NonNull<Node>> {
        let prev = self.prev.swap_busy();
        if prev.is_busy() {
            return None;
        }
        debug_assert!(!prev.is_null(), "locking a link of an uninitialized node");

        let forward = prev.deref().next.swap_busy();
        if forward.is_busy() {
            self.prev.store(prev, Release);
            return None;
        }
        debug_assert_eq!(forward, LinkPtr::of(self));
        Some(prev.as_non_null())
    }

    /// One attempt at locking only the element's own two fields.
    pub(crate) unsafe fn try_lock_elem(&self) -> Option<Ends> {
        let next = self.next.swap_busy();
        if next.is_busy() {
            return None;
        }
        let prev = self.prev.swap_busy();
        if prev.is_busy() {
            self.next.store(next, Release);
            return None;
        }
        Some(Ends {
            prev: prev.as_non_null(),
            next: next.as_non_null(),
        })
    }

    /// One attempt at fully locking the element and both adjacent links.
    ///
    /// Stage one takes the incoming link, stage two the outgoing one; a
    /// stage-two conflict also releases stage one. If the element turns out
    /// to be detached (its `prev` is itself), it is fully locked after its
    /// own two fields are, and `(self, self)` is returned for the caller to
    /// interpret.
    pub(crate) unsafe fn try_lock_full(&self) -> Option<Ends> {
        let this = LinkPtr::of(self);

        let prev = self.prev.swap_busy();
        if prev.is_busy() {
            return None;
        }
        if prev == this {
            // Detached self-loop: there is no incoming link to take.
            let next = self.next.swap_busy();
            if next.is_busy() {
                self.prev.store(prev, Release);
                return None;
            }
            debug_assert_eq!(next, this);
            let own = NonNull::from(self);
            return Some(Ends { prev: own, next: own });
        }

        let prev_ref = prev.deref();
        let forward = prev_ref.next.swap_busy();
        if forward.is_busy() {
            self.prev.store(prev, Release);
            return None;
        }
        debug_assert_eq!(forward, this);

        let next = self.next.swap_busy();
        if next.is_busy() {
            prev_ref.next.store(forward, Release);
            self.prev.store(prev, Release);
            return None;
        }
        let back = next.deref().prev.swap_busy();
        if back.is_busy() {
            self.next.store(next, Release);
            prev_ref.next.store(forward, Release);
            self.prev.store(prev, Release);
            return None;
        }
        debug_assert_eq!(back, this);

        Some(Ends {
            prev: prev.as_non_null(),
            next: next.as_non_null(),
        })
    }

    /// Locks the outgoing link `self` → successor, retrying with back-off
    /// until it succeeds, and returns the successor.
    ///
    /// # Safety
    ///
    /// `self` must be an initialized member (or head) of a list whose nodes
    /// stay alive for the duration of the call.
    pub unsafe fn lock_next_link(&self) -> NonNull<Node> {
        let mut backoff = Backoff::new();
        loop {
            if let Some(next) = self.try_lock_next() {
                return next;
            }
            backoff.relax();
        }
    }

    /// Locks the incoming link predecessor → `self`, retrying with back-off
    /// until it succeeds, and returns the predecessor.
    ///
    /// # Safety
    ///
    /// Same contract as [`lock_next_link`](Node::lock_next_link).
    pub unsafe fn lock_prev_link(&self) -> NonNull<Node> {
        let mut backoff = Backoff::new();
        loop {
            if let Some(prev) = self.try_lock_prev() {
                return prev;
            }
            backoff.relax();
        }
    }

    /// Locks only the element's own two fields, leaving its neighbors fully
    /// functional, and returns the saved field values.
    ///
    /// The element is isolated for observation: operations that need either
    /// of its links will wait, but operations elsewhere (including on the
    /// immediate neighbors' far links) proceed. The saved values must be
    /// handed back to [`unlock_elem`](Node::unlock_elem).
    ///
    /// # Safety
    ///
    /// Same contract as [`lock_next_link`](Node::lock_next_link).
    pub unsafe fn lock_elem(&self) -> Ends {
        let mut backoff = Backoff::new();
        loop {
            if let Some(ends) = self.try_lock_elem() {
                return ends;
            }
            backoff.relax();
        }
    }

    /// Fully locks the element: its own two fields and both adjacent links.
    ///
    /// On return the element is isolated (all four involved fields `BUSY`)
    /// and the saved `(predecessor, successor)` pair identifies the locked
    /// neighborhood. A detached element yields `(self, self)`.
    ///
    /// # Safety
    ///
    /// Same contract as [`lock_next_link`](Node::lock_next_link).
    pub unsafe fn lock_full(&self) -> Ends {
        let mut backoff = Backoff::new();
        loop {
            if let Some(ends) = self.try_lock_full() {
                return ends;
            }
            backoff.relax();
        }
    }

    /// Releases the link `self` → `next` taken by
    /// [`lock_next_link`](Node::lock_next_link).
    ///
    /// # Safety
    ///
    /// The calling thread must own the link, and `next` must be the value
    /// the lock returned.
    pub unsafe fn unlock_next_link(&self, next: NonNull<Node>) {
        next.as_ref().prev.store(LinkPtr::of(self), Release);
        self.next.store(next.into(), Release);
    }

    /// Releases the link `prev` → `self` taken by
    /// [`lock_prev_link`](Node::lock_prev_link) or
    /// [`try_lock_prev`](Node::try_lock_prev).
    ///
    /// # Safety
    ///
    /// The calling thread must own the link, and `prev` must be the value
    /// the lock returned.
    pub unsafe fn unlock_prev_link(&self, prev: NonNull<Node>) {
        prev.as_ref().next.store(LinkPtr::of(self), Release);
        self.prev.store(prev.into(), Release);
    }

    /// Restores the element's own fields from the values saved by
    /// [`lock_elem`](Node::lock_elem).
    ///
    /// # Safety
    ///
    /// The calling thread must own both of the element's fields, and `ends`
    /// must be the saved pair.
    pub unsafe fn unlock_elem(&self, ends: Ends) {
        self.prev.store(ends.prev.into(), Release);
        self.next.store(ends.next.into(), Release);
    }

    /// Reattaches the element between its saved neighbors, releasing
    /// everything [`lock_full`](Node::lock_full) took.
    ///
    /// # Safety
    ///
    /// The calling thread must own the full lock, and `ends` must be the
    /// saved pair.
    pub unsafe fn unlock_full(&self, ends: Ends) {
        let this = LinkPtr::of(self);
        ends.next.as_ref().prev.store(this, Release);
        self.next.store(ends.next.into(), Release);
        ends.prev.as_ref().next.store(this, Release);
        self.prev.store(ends.prev.into(), Release);
    }

    /// Writes the self-loop, marking the element detached.
    ///
    /// # Safety
    ///
    /// The calling thread must own both of the element's fields (or the
    /// element must be unpublished).
    pub unsafe fn unlock_self(&self) {
        let this = LinkPtr::of(self);
        self.prev.store(this, Release);
        self.next.store(this, Release);
    }
}

/// Reconnects the saved neighbors directly to each other, bypassing the
/// element they were locked around.
///
/// After [`lock_full`](Node::lock_full), this is the splice that removes
/// the element from the list; the element itself stays fully locked until
/// [`unlock_self`](Node::unlock_self) (or a reinsertion) rewrites it.
///
/// # Safety
///
/// The calling thread must own `ends.prev.next` and `ends.next.prev`, and
/// the two nodes must outlive the call.
pub unsafe fn unlock_link(ends: Ends) {
    ends.next.as_ref().prev.store(ends.prev.into(), Release);
    ends.prev.as_ref().next.store(ends.next.into(), Release);
}
