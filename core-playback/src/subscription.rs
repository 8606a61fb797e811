//! Scoped media listener registrations.
//!
//! Every listener added to a [`MediaElement`] is wrapped in a [`Subscription`]
//! that removes it again when dropped, so a component tears down its wiring by
//! dropping the [`SubscriptionSet`] it owns.

use bridge_traits::{ListenerId, MediaElement, MediaEvent};
use std::sync::Arc;

pub struct Subscription {
    element: Arc<dyn MediaElement>,
    id: Option<ListenerId>,
}

impl Subscription {
    pub fn new<F>(element: &Arc<dyn MediaElement>, listener: F) -> Self
    where
        F: Fn(MediaEvent) + Send + Sync + 'static,
    {
        let id = element.add_listener(Box::new(listener));
        Self {
            element: Arc::clone(element),
            id: Some(id),
        }
    }

    pub fn id(&self) -> Option<ListenerId> {
        self.id
    }

    pub fn cancel(&mut self) {
        if let Some(id) = self.id.take() {
            self.element.remove_listener(id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[derive(Default)]
pub struct SubscriptionSet {
    items: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, subscription: Subscription) {
        self.items.push(subscription);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Removes every listener now.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}
