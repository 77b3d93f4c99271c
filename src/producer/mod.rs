//! Cancellable asynchronous action producers.
//!
//! An [`ActionProducer`] is a factory for one cancellable async sequence of
//! actions. Its body receives an [`ActionScope`] and feeds actions into the
//! store through [`ActionScope::emit`]; `emit` and
//! [`ActionScope::checkpoint`] are the sequence's suspension points, and
//! both observe cooperative cancellation first. A superseded call therefore
//! sees [`ProducerError::Cancelled`] at its very next suspension point,
//! propagates it with `?`, and none of its actions reach the store from the
//! cancellation point on.
//!
//! ```ignore
//! let refresh = ActionProducer::new(move |scope| {
//!     let client = client.clone();
//!     let started = started.clone();
//!     let loaded = loaded.clone();
//!     async move {
//!         scope.emit(started.of(())).await?;
//!         let rows = client.fetch().await.map_err(ProducerError::failed)?;
//!         scope.checkpoint().await?; // staleness check after external I/O
//!         scope.emit(loaded.of(rows)).await?;
//!         Ok(())
//!     }
//! })
//! .keep_latest();
//!
//! store.dispatch_producer(refresh.call());
//! ```

mod policies;

pub use policies::{KeepLatest, KeyedKeepFirst, KeyedKeepLatest};

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

use crate::action::Action;
use crate::error::{ProducerError, ProducerResult};

/// Where emitted actions go. Implemented by the store.
pub(crate) trait ActionSink: Send + Sync {
    fn accept(&self, action: Action);
}

/// Cooperative cancellation check, evaluated at every suspension point.
#[derive(Clone)]
pub struct CancelProbe(Arc<dyn Fn() -> bool + Send + Sync>);

impl CancelProbe {
    /// A probe that never cancels (plain, unwrapped dispatch).
    pub fn never() -> Self {
        CancelProbe(Arc::new(|| false))
    }

    pub(crate) fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        CancelProbe(Arc::new(f))
    }

    /// Whether the owning call has been superseded.
    pub fn is_cancelled(&self) -> bool {
        (self.0)()
    }
}

/// The yield surface handed to a producer body.
pub struct ActionScope {
    sink: Arc<dyn ActionSink>,
    probe: CancelProbe,
}

impl ActionScope {
    /// Yield one action into the store.
    ///
    /// Checks cancellation before forwarding: an action from a superseded
    /// call never reaches the store. Suspends afterwards, so independent
    /// producers interleave at emit granularity.
    pub async fn emit(&self, action: Action) -> ProducerResult<()> {
        if self.probe.is_cancelled() {
            return Err(ProducerError::Cancelled);
        }
        self.sink.accept(action);
        tokio::task::yield_now().await;
        Ok(())
    }

    /// A bare suspension point: checks cancellation without emitting.
    ///
    /// Call this after awaiting an external dependency so a superseded call
    /// terminates at the resume boundary instead of doing further work.
    pub async fn checkpoint(&self) -> ProducerResult<()> {
        if self.probe.is_cancelled() {
            return Err(ProducerError::Cancelled);
        }
        tokio::task::yield_now().await;
        Ok(())
    }

    /// Non-suspending cancellation peek.
    pub fn is_cancelled(&self) -> bool {
        self.probe.is_cancelled()
    }
}

type RunFn = Arc<dyn Fn(ActionScope) -> BoxFuture<'static, ProducerResult<()>> + Send + Sync>;

/// Factory for a cancellable asynchronous action sequence.
#[derive(Clone)]
pub struct ActionProducer {
    run: RunFn,
}

impl ActionProducer {
    /// Wrap an async closure as a producer.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(ActionScope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProducerResult<()>> + Send + 'static,
    {
        ActionProducer {
            run: Arc::new(move |scope| f(scope).boxed()),
        }
    }

    /// One plain invocation: runs to completion, never cancelled.
    pub fn call(&self) -> ProducerCall {
        self.call_with_probe(CancelProbe::never())
    }

    pub(crate) fn call_with_probe(&self, probe: CancelProbe) -> ProducerCall {
        let run = Arc::clone(&self.run);
        ProducerCall {
            run: Box::new(move |scope| run(scope)),
            probe,
            noop: false,
        }
    }

    /// Wrap with the Keep-Latest policy: a new call supersedes the previous
    /// one, and only the most recent call ever completes.
    pub fn keep_latest(self) -> KeepLatest {
        KeepLatest::new(self)
    }

    /// Wrap with the Keyed-Keep-First policy: a call whose key matches the
    /// in-flight one is a no-op; a different key supersedes it.
    pub fn keyed_keep_first<K>(self) -> KeyedKeepFirst<K>
    where
        K: Eq + Clone + Send + 'static,
    {
        KeyedKeepFirst::new(self)
    }

    /// Wrap with the Keyed-Keep-Latest policy: Keep-Latest independently per
    /// key; distinct keys never cancel each other.
    pub fn keyed_keep_latest<K>(self) -> KeyedKeepLatest<K>
    where
        K: Eq + std::hash::Hash + Clone + Send + 'static,
    {
        KeyedKeepLatest::new(self)
    }
}

type CallFn = Box<dyn FnOnce(ActionScope) -> BoxFuture<'static, ProducerResult<()>> + Send>;

/// One invocation of a producer, ready to be dispatched into a store.
///
/// Carries the cancellation probe its policy assigned and, for keyed
/// policies, the completion hook that releases the key.
pub struct ProducerCall {
    run: CallFn,
    probe: CancelProbe,
    noop: bool,
}

impl ProducerCall {
    /// A call that completes immediately without yielding anything.
    /// Keyed-Keep-First returns this for a key already in flight.
    pub fn noop() -> Self {
        ProducerCall {
            run: Box::new(|_| futures::future::ready(Ok(())).boxed()),
            probe: CancelProbe::never(),
            noop: true,
        }
    }

    /// Whether this call is the keyed no-op.
    pub fn is_noop(&self) -> bool {
        self.noop
    }

    pub(crate) fn with_wrapper<W>(self, wrap: W) -> Self
    where
        W: FnOnce(BoxFuture<'static, ProducerResult<()>>) -> BoxFuture<'static, ProducerResult<()>>
            + Send
            + 'static,
    {
        let run = self.run;
        ProducerCall {
            run: Box::new(move |scope| wrap(run(scope))),
            probe: self.probe,
            noop: self.noop,
        }
    }

    pub(crate) fn execute(self, sink: Arc<dyn ActionSink>) -> BoxFuture<'static, ProducerResult<()>> {
        let scope = ActionScope {
            sink,
            probe: self.probe.clone(),
        };
        (self.run)(scope)
    }
}
