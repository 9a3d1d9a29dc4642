//! Typed handles for incoming messages.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use super::wire::{Binary, Codec, Json, Text};
use crate::event::{Subscribers, Subscription};

/// Notifies subscribers when a payload-less message arrives.
#[derive(Clone)]
pub struct EventReceiver {
    ordinal: u16,
    subscribers: Arc<Subscribers<()>>,
}

impl EventReceiver {
    pub(crate) fn new(ordinal: u16, subscribers: Arc<Subscribers<()>>) -> Self {
        Self {
            ordinal,
            subscribers,
        }
    }

    #[must_use]
    pub fn ordinal(&self) -> u16 {
        self.ordinal
    }

    /// Calls `handler` for every arrival until the guard is dropped.
    pub fn on_receive(&self, handler: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.subscribers.subscribe(move |()| handler())
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl fmt::Debug for EventReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventReceiver")
            .field("ordinal", &self.ordinal)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// Decodes arrivals with `C` and hands them to subscribers.
pub struct DataReceiver<C: Codec> {
    ordinal: u16,
    subscribers: Arc<Subscribers<C::Value>>,
    _codec: PhantomData<fn() -> C>,
}

pub type BinaryReceiver<T> = DataReceiver<Binary<T>>;
pub type JsonReceiver<T> = DataReceiver<Json<T>>;
pub type TextReceiver = DataReceiver<Text>;

impl<C: Codec> DataReceiver<C> {
    pub(crate) fn new(ordinal: u16, subscribers: Arc<Subscribers<C::Value>>) -> Self {
        Self {
            ordinal,
            subscribers,
            _codec: PhantomData,
        }
    }

    #[must_use]
    pub fn ordinal(&self) -> u16 {
        self.ordinal
    }

    /// Calls `handler` with every decoded value until the guard is dropped.
    pub fn on_receive(
        &self,
        handler: impl Fn(&C::Value) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribers.subscribe(handler)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<C: Codec> Clone for DataReceiver<C> {
    fn clone(&self) -> Self {
        Self::new(self.ordinal, Arc::clone(&self.subscribers))
    }
}

impl<C: Codec> fmt::Debug for DataReceiver<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataReceiver")
            .field("ordinal", &self.ordinal)
            .field("type", &C::type_name())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
