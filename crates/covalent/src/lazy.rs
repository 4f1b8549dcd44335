//! Deferred references.
//!
//! A [`LazyRef`] holds a constructor and runs it the first time the value
//! is needed. Schemas that refer to themselves, directly or through other
//! schemas, are built this way without recursing at construction time.

use std::fmt;
use std::sync::{Arc, OnceLock};

/// An indirection cell resolved on first use.
///
/// Clones share the cell, so resolution happens once for all of them.
pub struct LazyRef<T> {
    cell: Arc<OnceLock<T>>,
    init: Arc<dyn Fn() -> T + Send + Sync>,
}

impl<T> LazyRef<T> {
    pub fn new(init: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            cell: Arc::new(OnceLock::new()),
            init: Arc::new(init),
        }
    }

    /// A cell that is already resolved.
    pub fn resolved(value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        let cell = OnceLock::new();
        let fallback = value.clone();
        let _ = cell.set(value);
        Self {
            cell: Arc::new(cell),
            init: Arc::new(move || fallback.clone()),
        }
    }

    pub fn get(&self) -> &T {
        self.cell.get_or_init(|| (self.init)())
    }

    pub fn is_resolved(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<T> Clone for LazyRef<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            init: Arc::clone(&self.init),
        }
    }
}

impl<T> fmt::Debug for LazyRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never force or print the target; it may point back at us.
        if self.is_resolved() {
            f.write_str("LazyRef(resolved)")
        } else {
            f.write_str("LazyRef(pending)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_resolves_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let lazy = LazyRef::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            41 + 1
        });
        let copy = lazy.clone();

        assert!(!lazy.is_resolved());
        assert_eq!(*copy.get(), 42);
        assert_eq!(*lazy.get(), 42);
        assert!(lazy.is_resolved());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_self_reference() {
        struct Node {
            name: &'static str,
            next: LazyRef<Arc<Node>>,
        }

        fn node() -> Arc<Node> {
            Arc::new(Node {
                name: "loop",
                next: LazyRef::new(node),
            })
        }

        let start = node();
        let third = start.next.get().next.get();
        assert_eq!(third.name, "loop");
        assert_eq!(format!("{:?}", start.next), "LazyRef(resolved)");
        assert!(LazyRef::resolved(7).is_resolved());
    }
}
