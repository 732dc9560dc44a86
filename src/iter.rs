//! List traversal over the link locks.
//!
//! Both traversal styles share one invariant: between steps the traversal
//! owns exactly one locked link P→X (P's `next` and X's `prev` are
//! `BUSY`), where X is the next candidate item. A step either terminates
//! (X is the head: restore the link and leave) or additionally takes X's
//! outgoing link to some Y, yielding a bounded locked neighborhood for one
//! body execution. Every path out (normal termination, an early break,
//! and a panicking body) releases every held lock, so concurrent
//! operations elsewhere in the list keep working; operations touching the
//! held neighborhood wait on `BUSY` and proceed once the traversal moves
//! on.
//!
//! The traversal retries the inner acquisition while the owned link stays
//! held. That cannot deadlock: whoever owns the contended end is either a
//! composite operation (which always rolls back fully and backs off) or a
//! traversal strictly ahead of this one (which never waits on anything
//! behind it, and terminates at the head).

use std::ops::ControlFlow;
use std::ptr::NonNull;
use std::sync::atomic::Ordering::{Relaxed, Release};

use scopeguard::ScopeGuard;

use crate::atomic::LinkPtr;
use crate::backoff::Backoff;
use crate::lock::{unlock_link, Ends};
use crate::node::Node;

/// What the traversal does with the item a body just examined.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Leave (or put back) the item in the list and move on.
    Keep,
    /// Take the item out. It ends detached, ready for reuse or
    /// re-insertion, the removal analogue of [`delete`](Node::delete)
    /// from inside a traversal.
    Remove,
}

impl Node {
    /// Takes the initial link head→first, retrying with back-off.
    unsafe fn acquire_first(&self) -> NonNull<Node> {
        let mut backoff = Backoff::new();
        loop {
            if let Some(first) = self.try_lock_next() {
                return first;
            }
            backoff.relax();
        }
    }

    /// Takes the outgoing link of `from`, retrying with back-off while the
    /// caller's owned link stays held.
    unsafe fn acquire_outgoing(from: NonNull<Node>) -> NonNull<Node> {
        let mut backoff = Backoff::new();
        loop {
            if let Some(next) = from.as_ref().try_lock_next() {
                return next;
            }
            backoff.relax();
        }
    }

    /// Restores the owned link P→X.
    unsafe fn release_owned(p: NonNull<Node>, x: NonNull<Node>) {
        x.as_ref().prev.store(p.into(), Release);
        p.as_ref().next.store(x.into(), Release);
    }

    /// Iterates over the list headed by `self`, presenting each item
    /// *fully locked* to `body`.
    ///
    /// While the body runs, the item's own fields and both adjacent link
    /// ends are `BUSY`; `back` names the (locked) neighbors. The body
    /// returns a [`Disposition`] wrapped in [`ControlFlow`]:
    /// `Continue(d)` applies `d` and advances, `Break(d)` applies `d` and
    /// stops early. Removed items end detached.
    ///
    /// A panicking body reattaches the item before the panic propagates,
    /// leaving the list consistent.
    ///
    /// # Safety
    ///
    /// `self` must be an initialized list head, and all members must stay
    /// alive and unmoved while the traversal runs.
    pub unsafe fn for_each_locked<F>(&self, mut body: F)
    where
        F: FnMut(&Node, Ends) -> ControlFlow<Disposition, Disposition>,
    {
        let head = NonNull::from(self);
        let mut p = head;
        let mut x = self.acquire_first();
        loop {
            if x == head {
                Self::release_owned(p, x);
                return;
            }
            let y = Self::acquire_outgoing(x);
            // Held now: p.next, x.prev, x.next, y.prev; x is fully locked.
            let back = Ends { prev: p, next: y };

            let guard = scopeguard::guard((x, back), |(x, back)| unsafe {
                x.as_ref().unlock_full(back);
            });
            let flow = body(x.as_ref(), back);
            let _ = ScopeGuard::into_inner(guard);

            let (disposition, stop) = match flow {
                ControlFlow::Continue(d) => (d, false),
                ControlFlow::Break(d) => (d, true),
            };
            match disposition {
                Disposition::Keep => {
                    // Release P→X; the owned link becomes X→Y.
                    Self::release_owned(p, x);
                    p = x;
                }
                Disposition::Remove => {
                    // The owned link's contents become P→Y; X leaves
                    // detached.
                    x.as_ref().unlock_self();
                }
            }
            x = y;
            if stop {
                Self::release_owned(p, x);
                return;
            }
        }
    }

    /// Iterates over the list headed by `self`, presenting each item
    /// *detached* to `body` while the traversal holds the gap the item
    /// came out of.
    ///
    /// Before the body runs, the item is a self-loop and only its former
    /// neighbors (named by `back`) have a `BUSY` end facing the gap.
    /// Because the item is detached, the body may hand it to another list
    /// (`append`/`insert` on some other head); in that case it must
    /// answer [`Disposition::Remove`] so the traversal does not reattach
    /// it. `Keep` puts the item back between its former neighbors.
    ///
    /// A panicking body forfeits the item: the gap is closed over it and
    /// the item stays detached.
    ///
    /// # Safety
    ///
    /// Same contract as [`for_each_locked`](Node::for_each_locked); in
    /// addition, an item handed to another list must be answered with
    /// `Remove`, and while the body runs the detached item belongs to the
    /// body alone: no other thread may capture it (e.g. via `try_append`)
    /// during that window.
    pub unsafe fn for_each_unlocked<F>(&self, mut body: F)
    where
        F: FnMut(&Node, Ends) -> ControlFlow<Disposition, Disposition>,
    {
        let head = NonNull::from(self);
        let mut p = head;
        let mut x = self.acquire_first();
        loop {
            if x == head {
                Self::release_owned(p, x);
                return;
            }
            let y = Self::acquire_outgoing(x);
            let item = x.as_ref();
            // Detach the item; the traversal owns the gap P…Y.
            item.unlock_self();
            let back = Ends { prev: p, next: y };

            let guard = scopeguard::guard(back, |back| unsafe {
                unlock_link(back);
            });
            let flow = body(item, back);
            let _ = ScopeGuard::into_inner(guard);

            let (disposition, stop) = match flow {
                ControlFlow::Continue(d) => (d, false),
                ControlFlow::Break(d) => (d, true),
            };
            match disposition {
                Disposition::Keep => {
                    // Re-link the item between P and Y; the owned link
                    // becomes X→Y. The item is unpublished until the
                    // release store into P's `next`.
                    item.prev.store(p.into(), Relaxed);
                    item.next.store(LinkPtr::busy(), Relaxed);
                    p.as_ref().next.store(x.into(), Release);
                    p = x;
                }
                Disposition::Remove => {
                    // The owned link's contents become P→Y.
                }
            }
            x = y;
            if stop {
                Self::release_owned(p, x);
                return;
            }
        }
    }
}
