use std::sync::{Arc, RwLock};

/// Clonable mutable cell holding the latest value of an input signal.
///
/// Every input of the decision engine (manual bitrate, min/max auto bitrate,
/// throttling limits) is such a cell: writers update it at any time, and the
/// engine reads the latest value on its next recomputation. There is no
/// subscription mechanism; recomputation is driven explicitly by the caller.
///
/// Writers and readers may live on different threads, hence the `RwLock`,
/// but the engine itself never holds a guard across a decision.
pub struct SharedRef<T>(Arc<RwLock<T>>);

impl<T> Clone for SharedRef<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Clone> SharedRef<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// Read the latest value.
    pub fn get(&self) -> T {
        self.0
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Replace the value.
    pub fn set(&self, value: T) {
        *self
            .0
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = value;
    }
}

impl<T: std::fmt::Debug + Clone> std::fmt::Debug for SharedRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SharedRef").field(&self.get()).finish()
    }
}

impl<T: Clone + Default> Default for SharedRef<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
