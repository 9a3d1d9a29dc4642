use std::sync::Arc;

use parking_lot::Mutex;

use super::{Registrable, SourceId};
use crate::event::{Subscribers, Subscription};
use crate::trace::debug;

/// An explicit collection of registered objects keyed by id.
///
/// Owned by the application root and passed to whatever needs to register.
/// Added/removed handlers run after the internal lock is released.
pub struct Registry<T: ?Sized + Registrable + 'static> {
    entries: Mutex<Vec<Arc<T>>>,
    added: Subscribers<Arc<T>>,
    removed: Subscribers<Arc<T>>,
}

impl<T: ?Sized + Registrable + 'static> Registry<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            added: Subscribers::new(),
            removed: Subscribers::new(),
        }
    }

    /// Adds `entry`.
    ///
    /// Returns false if its id is empty or already registered.
    pub fn register(&self, entry: Arc<T>) -> bool {
        let id = entry.id();
        if !id.is_valid() {
            return false;
        }
        {
            let mut entries = self.entries.lock();
            if entries.iter().any(|e| e.id() == id) {
                return false;
            }
            entries.push(Arc::clone(&entry));
        }
        debug!(id = %id, name = %entry.friendly_name(), "registered");
        self.added.emit(&entry);
        true
    }

    /// Removes the entry with `id`, returning it.
    pub fn unregister(&self, id: &SourceId) -> Option<Arc<T>> {
        let entry = {
            let mut entries = self.entries.lock();
            let index = entries.iter().position(|e| &e.id() == id)?;
            entries.remove(index)
        };
        debug!(id = %id, "unregistered");
        self.removed.emit(&entry);
        Some(entry)
    }

    #[must_use]
    pub fn get(&self, id: &SourceId) -> Option<Arc<T>> {
        self.entries.lock().iter().find(|e| &e.id() == id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &SourceId) -> bool {
        self.entries.lock().iter().any(|e| &e.id() == id)
    }

    /// Snapshot of the current entries in registration order.
    #[must_use]
    pub fn entries(&self) -> Vec<Arc<T>> {
        self.entries.lock().clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = Arc<T>> {
        self.entries().into_iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry, firing `removed` for each.
    pub fn clear(&self) {
        let drained: Vec<Arc<T>> = std::mem::take(&mut *self.entries.lock());
        for entry in &drained {
            self.removed.emit(entry);
        }
    }

    pub fn on_added(&self, handler: impl Fn(&Arc<T>) + Send + Sync + 'static) -> Subscription {
        self.added.subscribe(handler)
    }

    pub fn on_removed(&self, handler: impl Fn(&Arc<T>) + Send + Sync + 'static) -> Subscription {
        self.removed.subscribe(handler)
    }
}

impl<T: ?Sized + Registrable + 'static> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
