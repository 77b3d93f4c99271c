//! Optional UI-lifecycle integration for selectors.
//!
//! A host component creates a [`SelectorController`] for a selector it
//! renders from, calls [`connect`](SelectorController::connect) when it
//! enters the tree and [`disconnect`](SelectorController::disconnect) when
//! it leaves. While connected, every republication caches the latest value
//! and asks the host to refresh.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use super::typed::{Selector, SelectorSubscription};

/// Lifecycle hooks a UI host exposes to the controller.
pub trait ControllerHost: Send + Sync {
    /// Ask the host to re-render with the controller's latest value.
    fn request_refresh(&self);
}

/// Bridges one selector to one host's render lifecycle.
pub struct SelectorController<T> {
    selector: Selector<T>,
    host: Arc<dyn ControllerHost>,
    latest: Arc<RwLock<Option<Arc<T>>>>,
    subscription: Mutex<Option<SelectorSubscription>>,
}

impl<T: Clone + Send + Sync + 'static> SelectorController<T> {
    /// Create a controller; no subscription exists until `connect`.
    pub fn new(selector: Selector<T>, host: Arc<dyn ControllerHost>) -> Self {
        SelectorController {
            selector,
            host,
            latest: Arc::new(RwLock::new(None)),
            subscription: Mutex::new(None),
        }
    }

    /// Host entered the tree: seed the cached value and start listening.
    /// Connecting twice is a no-op.
    pub fn connect(&self) {
        let mut slot = self.subscription.lock();
        if slot.is_some() {
            return;
        }
        *self.latest.write() = self.selector.get();
        let latest = Arc::clone(&self.latest);
        let host = Arc::clone(&self.host);
        *slot = Some(self.selector.subscribe(move |value: &T| {
            *latest.write() = Some(Arc::new(value.clone()));
            host.request_refresh();
        }));
    }

    /// Host left the tree: stop listening. The cached value remains readable.
    pub fn disconnect(&self) {
        if let Some(sub) = self.subscription.lock().take() {
            sub.unsubscribe();
        }
    }

    /// The most recently observed value.
    pub fn value(&self) -> Option<Arc<T>> {
        self.latest.read().clone()
    }
}
