//! Subscriber lists with scoped unsubscription.
//!
//! Handlers are snapshotted under the lock and invoked after it is released,
//! so a handler may subscribe, unsubscribe or emit on the same list without
//! deadlocking. Dropping the returned [`Subscription`] removes the handler.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Handler<A> = dyn Fn(&A) + Send + Sync;

struct Inner<A: ?Sized> {
    next_id: u64,
    handlers: Vec<(u64, Arc<Handler<A>>)>,
}

/// A list of handlers for events carrying `A`.
pub struct Subscribers<A: ?Sized> {
    inner: Arc<Mutex<Inner<A>>>,
}

impl<A: ?Sized + 'static> Subscribers<A> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_id: 0,
                handlers: Vec::new(),
            })),
        }
    }

    /// Registers `handler` until the returned guard is dropped.
    pub fn subscribe(&self, handler: impl Fn(&A) + Send + Sync + 'static) -> Subscription {
        let handler: Arc<Handler<A>> = Arc::new(handler);
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.handlers.push((id, handler));
            id
        };

        let weak: Weak<Mutex<Inner<A>>> = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.lock().handlers.retain(|(handler_id, _)| *handler_id != id);
                }
            })),
        }
    }

    /// Invokes every handler registered at the time of the call.
    pub fn emit(&self, arg: &A) {
        let snapshot: Vec<Arc<Handler<A>>> = self
            .inner
            .lock()
            .handlers
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in snapshot {
            handler(arg);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every handler. Outstanding guards become no-ops.
    pub fn clear(&self) {
        self.inner.lock().handlers.clear();
    }
}

impl<A: ?Sized + 'static> Default for Subscribers<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: ?Sized> fmt::Debug for Subscribers<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("len", &self.inner.lock().handlers.len())
            .finish()
    }
}

/// Keeps a handler registered while alive.
#[must_use = "dropping a Subscription immediately unsubscribes the handler"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Leaves the handler registered for the lifetime of its list.
    pub fn detach(mut self) {
        self.cancel = None;
    }

    /// Unsubscribes now.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_reaches_all_handlers() {
        let subscribers = Subscribers::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        let t1 = Arc::clone(&total);
        let _a = subscribers.subscribe(move |v| {
            t1.fetch_add(*v as usize, Ordering::SeqCst);
        });
        let t2 = Arc::clone(&total);
        let _b = subscribers.subscribe(move |v| {
            t2.fetch_add(*v as usize * 10, Ordering::SeqCst);
        });

        subscribers.emit(&2);
        assert_eq!(total.load(Ordering::SeqCst), 22);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let subscribers = Subscribers::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = subscribers.subscribe(move |()| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        subscribers.emit(&());
        drop(sub);
        subscribers.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(subscribers.is_empty());
    }

    #[test]
    fn detached_subscription_stays_registered() {
        let subscribers = Subscribers::<()>::new();
        subscribers.subscribe(|()| {}).detach();
        assert_eq!(subscribers.len(), 1);
    }

    #[test]
    fn handler_can_subscribe_during_emit() {
        let subscribers = Arc::new(Subscribers::<()>::new());
        let inner = Arc::clone(&subscribers);
        let parked = Arc::new(Mutex::new(Vec::new()));
        let parked_in_handler = Arc::clone(&parked);
        let _sub = subscribers.subscribe(move |()| {
            let sub = inner.subscribe(|()| {});
            parked_in_handler.lock().push(sub);
        });

        subscribers.emit(&());
        assert_eq!(subscribers.len(), 2);
    }

    #[test]
    fn guard_outliving_list_is_harmless() {
        let subscribers = Subscribers::<()>::new();
        let sub = subscribers.subscribe(|()| {});
        drop(subscribers);
        drop(sub);
    }
}
