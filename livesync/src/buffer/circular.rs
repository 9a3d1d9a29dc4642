//! Fixed-capacity ring buffer.
//!
//! # Design
//!
//! - Slots are indexed from `head`, wrapping at capacity
//! - Drop-oldest policy: pushing into a full buffer evicts the front and hands
//!   it back to the caller
//! - Resizing keeps the newest `min(len, new_capacity)` entries in order

/// A bounded double-ended ring.
///
/// # Invariants
///
/// - `len <= slots.len()`
/// - Slots `head .. head + len` (mod capacity) are `Some`, all others `None`
#[derive(Debug, Clone)]
pub struct CircularBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> CircularBuffer<T> {
    /// Creates an empty buffer holding at most `capacity` entries.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
            head: 0,
            len: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    #[inline]
    fn slot(&self, index: usize) -> usize {
        (self.head + index) % self.capacity()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        self.slots[self.slot(index)].as_ref()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index >= self.len {
            return None;
        }
        let slot = self.slot(index);
        self.slots[slot].as_mut()
    }

    #[must_use]
    pub fn front(&self) -> Option<&T> {
        self.get(0)
    }

    #[must_use]
    pub fn back(&self) -> Option<&T> {
        self.len.checked_sub(1).and_then(|i| self.get(i))
    }

    /// Appends to the back, returning the evicted front when full.
    pub fn push_back(&mut self, value: T) -> Option<T> {
        let evicted = if self.is_full() { self.pop_front() } else { None };
        let slot = self.slot(self.len);
        self.slots[slot] = Some(value);
        self.len += 1;
        evicted
    }

    /// Prepends to the front, returning the evicted back when full.
    pub fn push_front(&mut self, value: T) -> Option<T> {
        let evicted = if self.is_full() { self.pop_back() } else { None };
        self.head = (self.head + self.capacity() - 1) % self.capacity();
        self.slots[self.head] = Some(value);
        self.len += 1;
        evicted
    }

    pub fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let value = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        value
    }

    pub fn pop_back(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let slot = self.slot(self.len - 1);
        self.len -= 1;
        self.slots[slot].take()
    }

    /// Inserts `value` so it ends up at `index`, shifting later entries back.
    ///
    /// When the buffer is full the front is evicted first and returned, so the
    /// new entry lands one position earlier than requested. Indices past the
    /// end append.
    pub fn insert(&mut self, index: usize, value: T) -> Option<T> {
        let mut index = index.min(self.len);
        let evicted = if self.is_full() {
            index = index.saturating_sub(1);
            self.pop_front()
        } else {
            None
        };

        // Open a gap at `index` by shifting the tail back one slot.
        let mut pos = self.len;
        while pos > index {
            let from = self.slot(pos - 1);
            let to = self.slot(pos);
            self.slots[to] = self.slots[from].take();
            pos -= 1;
        }
        let slot = self.slot(index);
        self.slots[slot] = Some(value);
        self.len += 1;
        evicted
    }

    /// Removes and returns the entry at `index`.
    pub fn remove(&mut self, index: usize) -> Option<T> {
        if index >= self.len {
            return None;
        }
        let slot = self.slot(index);
        let value = self.slots[slot].take();
        for pos in index..self.len - 1 {
            let from = self.slot(pos + 1);
            let to = self.slot(pos);
            self.slots[to] = self.slots[from].take();
        }
        self.len -= 1;
        value
    }

    /// Changes the capacity, keeping the newest entries.
    pub fn set_capacity(&mut self, capacity: usize) {
        let capacity = capacity.max(1);
        if capacity == self.capacity() {
            return;
        }
        while self.len > capacity {
            self.pop_front();
        }
        let mut slots: Vec<Option<T>> = Vec::with_capacity(capacity);
        while let Some(value) = self.pop_front() {
            slots.push(Some(value));
        }
        let len = slots.len();
        slots.resize_with(capacity, || None);
        self.slots = slots;
        self.head = 0;
        self.len = len;
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            buffer: self,
            front: 0,
            back: self.len,
        }
    }
}

/// Front-to-back iterator over a [`CircularBuffer`].
pub struct Iter<'a, T> {
    buffer: &'a CircularBuffer<T>,
    front: usize,
    back: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        let item = self.buffer.get(self.front);
        self.front += 1;
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.back - self.front;
        (remaining, Some(remaining))
    }
}

impl<T> DoubleEndedIterator for Iter<'_, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        self.back -= 1;
        self.buffer.get(self.back)
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

impl<'a, T> IntoIterator for &'a CircularBuffer<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
