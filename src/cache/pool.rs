//! Expiry-ordered pool backing the resolution cache.

use tokio::time::Instant;

/// A cached payload and the instant after which it must not be served.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub expires: Instant,
}

/// Binary min-heap of entries keyed by `expires`.
///
/// The head (index 0) always holds the soonest expiry. Lookups by anything
/// other than expiry go through [`CachePool::range`], which scans every
/// entry in storage order.
#[derive(Debug)]
pub struct CachePool<T> {
    list: Vec<CacheEntry<T>>,
}

impl<T> CachePool<T> {
    pub fn new() -> Self {
        Self {
            list: Vec::with_capacity(64),
        }
    }

    pub fn head(&self) -> Option<&CacheEntry<T>> {
        self.list.first()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn push(&mut self, entry: CacheEntry<T>) {
        self.list.push(entry);
        self.sift_up(self.list.len() - 1);
    }

    /// Remove and return the entry with the soonest expiry.
    pub fn pop(&mut self) -> Option<CacheEntry<T>> {
        let last = self.list.len().checked_sub(1)?;
        self.swap(0, last);
        let entry = self.list.pop();
        self.sift_down(0);
        entry
    }

    /// Pop the head only if it has expired at `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<CacheEntry<T>> {
        match self.head() {
            Some(head) if head.expires <= now => self.pop(),
            _ => None,
        }
    }

    /// First entry whose payload satisfies `f`, in storage order.
    pub fn range<F>(&self, mut f: F) -> Option<&T>
    where
        F: FnMut(&T) -> bool,
    {
        self.list.iter().map(|entry| &entry.data).find(|data| f(*data))
    }

    pub fn clear(&mut self) {
        self.list.clear();
    }

    /// Every parent expires no later than its children.
    #[cfg(test)]
    pub(crate) fn is_heap(&self) -> bool {
        (1..self.list.len()).all(|i| self.list[(i - 1) / 2].expires <= self.list[i].expires)
    }

    fn less(&self, i: usize, j: usize) -> bool {
        self.list[i].expires < self.list[j].expires
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.list.swap(i, j);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if !self.less(i, parent) {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.list.len();
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            let mut child = left;
            let right = left + 1;
            if right < n && self.less(right, left) {
                child = right;
            }
            if !self.less(child, i) {
                break;
            }
            self.swap(i, child);
            i = child;
        }
    }
}

impl<T> Default for CachePool<T> {
    fn default() -> Self {
        Self::new()
    }
}
