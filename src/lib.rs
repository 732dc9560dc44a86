//! A concurrent intrusive doubly-linked list synchronized by per-link
//! locking.
//!
//! Instead of guarding the whole list with a mutex, a thread briefly
//! "cuts" an individual link (the `next`/`prev` pointer pair joining two
//! adjacent nodes) by atomically exchanging both ends with a reserved
//! `BUSY` sentinel. Winning both exchanges grants the exclusive right to
//! reconnect the link, so threads operating on disjoint regions of the
//! same list proceed fully in parallel; contention is localized to at most
//! three adjacent nodes. Conflicts are resolved by rolling back every
//! taken end and retrying after an exponential [`Backoff`], which is the
//! sole forward-progress mechanism: there are no fairness or worst-case
//! latency guarantees.
//!
//! The list is *intrusive*: a [`Node`] is embedded in a caller-owned
//! payload struct (recovered with [`container_of!`]), and a bare `Node`
//! serves as the list head. The list is cyclic through the head, never
//! allocates, and never frees: storage and reclamation are entirely the
//! caller's. If members can be freed while other threads still run list
//! operations, an external reclamation protocol (reference counting,
//! epochs, hazard pointers, a pool with reuse safe against the retry
//! races) is required on top.
//!
//! # Example
//!
//! ```
//! use linklock::{container_of, Node};
//!
//! struct Task {
//!     id: u32,
//!     node: Node,
//! }
//!
//! let head = Node::new();
//! head.init();
//!
//! let task = Task { id: 7, node: Node::new() };
//! unsafe {
//!     head.append(&task.node);
//!     let popped = head.pop().unwrap();
//!     let recovered = &*container_of!(popped.as_ptr(), Task, node);
//!     assert_eq!(recovered.id, 7);
//!     assert!(task.node.is_detached());
//! }
//! ```
//!
//! # Caveats
//!
//! * All locking is exclusive; there are no shared/read locks.
//! * [`behead`](Node::behead) is safe against concurrent head-local
//!   operations but **not** against concurrent mid-list
//!   [`delete`](Node::delete)s; see its documentation.
//! * Traversal bodies may break early (via `ControlFlow::Break`) and may
//!   panic (the traversal restores its locks first), but must not be
//!   escaped by other non-local means.

mod atomic;
mod backoff;
mod iter;
mod list;
mod lock;
mod node;

pub use self::backoff::{Backoff, SLEEP_BASE, SLEEP_CAP};
pub use self::iter::Disposition;
pub use self::lock::{unlock_link, Ends};
pub use self::node::Node;

#[doc(hidden)]
pub mod __private {
    pub use memoffset::offset_of;
}
