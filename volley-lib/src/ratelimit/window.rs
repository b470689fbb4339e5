use std::collections::VecDeque;

/// A rolling window that keeps at most `capacity` elements,
/// dropping the oldest one when full.
#[derive(Debug, Clone)]
pub struct Window<T> {
    data: VecDeque<T>,
    capacity: usize,
}

impl<T> Window<T> {
    /// Create a new window with the given capacity (at least one)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push an element to the window, removing the oldest if at capacity
    pub fn push(&mut self, item: T) {
        if self.data.len() >= self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(item);
    }

    /// Get the number of elements currently in the window
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the window is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Maximum number of retained elements
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate from oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.data.iter()
    }

    /// Split into the older and the newer half (the newer half gets the
    /// extra element for odd lengths)
    #[must_use]
    pub fn halves(&self) -> (Vec<&T>, Vec<&T>) {
        let mid = self.data.len() / 2;
        let older = self.data.iter().take(mid).collect();
        let newer = self.data.iter().skip(mid).collect();
        (older, newer)
    }

    /// Copy the window contents into a vector, oldest first
    #[must_use]
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.data.iter().cloned().collect()
    }
}

impl<T> Default for Window<T> {
    fn default() -> Self {
        Self::new(100)
    }
}
