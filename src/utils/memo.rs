//! At-most-once memoization for derived values of an immutable operator.

use std::sync::OnceLock;

/// Single-assignment cache cell.
///
/// The cached value is a pure function of the owning instance's immutable
/// state, so racing first computations are benign duplicates: whichever value
/// lands first wins and all callers observe it.
#[derive(Debug, Default)]
pub struct Memo<V>(OnceLock<V>);

impl<V> Memo<V> {
    pub fn new() -> Self {
        Self(OnceLock::new())
    }

    pub fn get(&self) -> Option<&V> {
        self.0.get()
    }

    /// Return the cached value, computing it with `init` on first access.
    /// A failed `init` leaves the cell empty.
    pub fn get_or_try_init<E>(&self, init: impl FnOnce() -> Result<V, E>) -> Result<&V, E> {
        if let Some(v) = self.0.get() {
            return Ok(v);
        }
        let v = init()?;
        Ok(self.0.get_or_init(|| v))
    }
}

// Derived operators start with cold caches.
impl<V> Clone for Memo<V> {
    fn clone(&self) -> Self {
        Self(OnceLock::new())
    }
}
