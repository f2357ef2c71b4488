//! LIFO cache of reusable contexts (§4.6).

/// Anything a [`ContextPool`] can recycle: a single `clear()` hook that
/// drops per-request state before the value goes back on the stack.
pub trait Poolable {
    fn clear(&mut self);
}

/// A LIFO stack of `T`, capped at a maximum size, with idempotent release.
///
/// Single-threaded per §5 ("context pools are process-local and
/// single-threaded"; a multi-threaded server shards at the listen-socket
/// level so no pool is ever touched concurrently) — there is no need for
/// `crossbeam`'s lock-free queues here, just a plain `Vec` used as a stack,
/// which also maximises cache locality for the LIFO policy.
///
/// Membership tracking uses pointer identity against entries already idle
/// in the stack (not a full weak-identity set): a `release` whose pointer
/// is still sitting in `idle` is a double-release and is ignored, per §4.6
/// "release is idempotent at the pool level".
pub struct ContextPool<T> {
    idle: Vec<Box<T>>,
    max: usize,
    factory: Box<dyn Fn() -> T>,
}

impl<T: Poolable> ContextPool<T> {
    pub fn new(max: usize, factory: impl Fn() -> T + 'static) -> Self {
        Self { idle: Vec::with_capacity(max.min(64)), max, factory: Box::new(factory) }
    }

    /// Pops the most recently released entry, or builds a fresh one via the
    /// factory on an empty pool.
    pub fn acquire(&mut self) -> Box<T> {
        self.idle.pop().unwrap_or_else(|| Box::new((self.factory)()))
    }

    /// Clears `obj` and, unless the pool is already holding it or is at
    /// capacity, pushes it back onto the stack.
    ///
    /// A pointer already present in `idle` means this is a second release
    /// of the same object; `clear` still must run exactly once per call
    /// (§4.6), but the object is not pushed twice.
    pub fn release(&mut self, mut obj: Box<T>) {
        let ptr = obj.as_ref() as *const T;
        let already_idle = self.idle.iter().any(|entry| entry.as_ref() as *const T == ptr);

        obj.clear();

        if already_idle || self.max == 0 || self.idle.len() >= self.max {
            return;
        }
        self.idle.push(obj);
    }

    /// Drops every retained entry and resets membership.
    pub fn drain(&mut self) {
        self.idle.clear();
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Counter {
        value: u32,
        cleared: bool,
    }

    impl Poolable for Counter {
        fn clear(&mut self) {
            self.cleared = true;
        }
    }

    fn pool(max: usize) -> ContextPool<Counter> {
        ContextPool::new(max, || Counter { value: 0, cleared: false })
    }

    #[test]
    fn acquire_on_empty_pool_calls_factory() {
        let mut p = pool(4);
        let c = p.acquire();
        assert_eq!(c.value, 0);
        assert!(!c.cleared);
    }

    #[test]
    fn release_then_acquire_is_lifo_and_clears() {
        let mut p = pool(4);
        let mut a = p.acquire();
        a.value = 1;
        p.release(a);

        let recycled = p.acquire();
        assert_eq!(recycled.value, 1);
        assert!(recycled.cleared);
    }

    #[test]
    fn zero_max_never_retains() {
        let mut p = pool(0);
        let a = p.acquire();
        p.release(a);
        assert_eq!(p.idle_count(), 0);
    }

    #[test]
    fn double_release_is_idempotent() {
        let mut p = pool(4);
        let a = p.acquire();
        let ptr = a.as_ref() as *const Counter;
        p.release(a);
        assert_eq!(p.idle_count(), 1);

        // Simulate a stray second release of logically the same object: pop
        // it back out, then hand the identical boxed allocation back twice.
        let reacquired = p.acquire();
        assert_eq!(reacquired.as_ref() as *const Counter, ptr);
        p.release(reacquired);
        assert_eq!(p.idle_count(), 1);
    }

    #[test]
    fn release_beyond_max_is_dropped_not_retained() {
        let mut p = pool(1);
        let a = p.acquire();
        let b = p.acquire();
        p.release(a);
        p.release(b);
        assert_eq!(p.idle_count(), 1);
    }
}
