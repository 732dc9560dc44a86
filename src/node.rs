//! The two-pointer link cell embedded in user data.

use std::fmt;
use std::sync::atomic::Ordering::{Acquire, Release};

use crate::atomic::{AtomicLink, LinkPtr};

/// A member cell of a concurrent doubly-linked list.
///
/// A `Node` is embedded by the caller inside a payload struct, or used bare
/// as a list head; head and element share the same shape and the head's
/// payload is simply absent. The list is cyclic through the head, so an
/// empty list is a head whose both fields point at itself, and a node
/// removed from a list is left in the same self-loop ("detached") state.
///
/// The cell's two fields are atomic words that may transiently hold the
/// reserved `BUSY` sentinel while some thread owns the corresponding link;
/// at rest no field is ever `BUSY`.
///
/// The list never allocates or frees: node storage and payload lifetime are
/// entirely the caller's. A node must not be moved or dropped while it is a
/// member of a list, and if members can be freed while other threads still
/// run list operations, an external reclamation protocol (reference
/// counting, epochs, hazard pointers, a pool with safe reuse) is required
/// on top.
pub struct Node {
    pub(crate) prev: AtomicLink,
    pub(crate) next: AtomicLink,
}

impl Node {
    /// Returns a new node with both fields null.
    ///
    /// The node is not yet usable as a list member: call [`init`] to put it
    /// in the detached state, or hand it to a trusting splice (`append`,
    /// `insert`) which overwrites the fields wholesale.
    ///
    /// [`init`]: Node::init
    pub const fn new() -> Node {
        Node {
            prev: AtomicLink::null(),
            next: AtomicLink::null(),
        }
    }

    /// Initializes the node to the detached/empty state (a self-loop).
    ///
    /// On a head this produces the empty list. Must not be called on a node
    /// that is currently a member of a list; that would corrupt the list
    /// around it.
    pub fn init(&self) {
        let this = LinkPtr::of(self);
        self.prev.store(this, Release);
        self.next.store(this, Release);
    }

    /// Returns `true` if the node is currently in the self-loop state.
    ///
    /// This is an advisory observation: unless the caller otherwise
    /// prevents concurrent membership changes for this node, the answer may
    /// be stale by the time it is returned.
    pub fn is_detached(&self) -> bool {
        let this = LinkPtr::of(self);
        self.prev.load(Acquire) == this && self.next.load(Acquire) == this
    }

    /// Returns `true` if the list headed by `self` is empty.
    ///
    /// Advisory in the same way as [`is_detached`](Node::is_detached).
    pub fn is_empty(&self) -> bool {
        self.next.load(Acquire) == LinkPtr::of(self)
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("prev", &self.prev)
            .field("next", &self.next)
            .finish()
    }
}

/// Recovers a pointer to the struct embedding a [`Node`].
///
/// Given a `*const Node` (or `*mut Node`) that is known to be the `$field`
/// field of a `$container`, produces a `*const $container` by fixed-offset
/// adjustment.
///
/// # Safety
///
/// The expansion must be used in an `unsafe` context. The pointer must
/// really address the `$field` field of a live `$container`; anything else
/// is undefined behavior.
///
/// # Examples
///
/// ```
/// use linklock::{container_of, Node};
///
/// struct Task {
///     id: u32,
///     node: Node,
/// }
///
/// let task = Task { id: 7, node: Node::new() };
/// let node_ptr = &task.node as *const Node;
/// let recovered = unsafe { &*container_of!(node_ptr, Task, node) };
/// assert_eq!(recovered.id, 7);
/// ```
#[macro_export]
macro_rules! container_of {
    ($node:expr, $container:path, $field:ident) => {
        ($node as *const $crate::Node)
            .cast::<u8>()
            .sub($crate::__private::offset_of!($container, $field))
            .cast::<$container>()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_is_null_on_both_ends() {
        let node = Node::new();
        assert!(node.prev.load(Acquire).is_null());
        assert!(node.next.load(Acquire).is_null());
        assert!(!node.is_detached());
    }

    #[test]
    fn init_detaches() {
        let node = Node::new();
        node.init();
        assert!(node.is_detached());
        assert!(node.is_empty());
    }

    #[test]
    fn container_of_recovers_payload() {
        struct Entry {
            before: u64,
            node: Node,
            value: i32,
        }

        let entry = Entry {
            before: 0xdead_beef,
            node: Node::new(),
            value: -3,
        };
        let recovered = unsafe { &*container_of!(&entry.node as *const Node, Entry, node) };
        assert_eq!(recovered.before, 0xdead_beef);
        assert_eq!(recovered.value, -3);
    }
}
