//! Work functions and the one-shot settlement handle passed to them.

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::oneshot;

use super::task::Task;

/// Outcome signalled by work: the resolution or the rejection reason
pub type Settlement = std::result::Result<Value, Value>;

type SyncFn = Box<dyn FnOnce(&Task) -> Settlement + Send>;
type CallbackFn = Box<dyn FnOnce(Resolver, &Task) + Send>;
type FutureFn = Box<dyn FnOnce(Task) -> BoxFuture<'static, Settlement> + Send>;

/// A task's own work. It runs at most once.
pub enum Work {
    /// The returned value is the resolution; an `Err` or a panic is the rejection
    Sync(SyncFn),
    /// Settles only through the `Resolver`; the call's return is ignored
    Callback(CallbackFn),
    /// Settles with the output of the future
    Future(FutureFn),
}

impl Work {
    /// Work that resolves immediately with `null`
    pub fn noop() -> Self {
        Self::Sync(Box::new(|_| Ok(Value::Null)))
    }

    pub fn sync<F>(f: F) -> Self
    where
        F: FnOnce(&Task) -> Settlement + Send + 'static,
    {
        Self::Sync(Box::new(f))
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce(Resolver, &Task) + Send + 'static,
    {
        Self::Callback(Box::new(f))
    }

    pub fn future<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Task) -> Fut + Send + 'static,
        Fut: Future<Output = Settlement> + Send + 'static,
    {
        Self::Future(Box::new(move |task| f(task).boxed()))
    }

    /// Run the work against `task`, waiting for its signal
    pub(crate) async fn invoke(self, task: &Task) -> Settlement {
        match self {
            Self::Sync(f) => panic::catch_unwind(AssertUnwindSafe(|| f(task)))
                .unwrap_or_else(|payload| Err(panic_reason(payload))),
            Self::Callback(f) => {
                let (resolver, signal) = Resolver::channel();
                let handle = resolver.clone();
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| f(resolver, task))) {
                    handle.reject(panic_reason(payload));
                }
                drop(handle);
                match signal.await {
                    Ok(settlement) => settlement,
                    Err(_) => {
                        task.warn("the resolver was dropped without settling");
                        future::pending().await
                    }
                }
            }
            Self::Future(f) => {
                let fut = match panic::catch_unwind(AssertUnwindSafe(|| f(task.clone()))) {
                    Ok(fut) => fut,
                    Err(payload) => return Err(panic_reason(payload)),
                };
                AssertUnwindSafe(fut)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(panic_reason(payload)))
            }
        }
    }
}

impl Default for Work {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Sync(_) => "Sync",
            Self::Callback(_) => "Callback",
            Self::Future(_) => "Future",
        };
        f.debug_tuple("Work").field(&kind).finish()
    }
}

/// Cloneable resolve/reject handle; the first signal wins
#[derive(Clone)]
pub struct Resolver {
    tx: Arc<Mutex<Option<oneshot::Sender<Settlement>>>>,
}

impl Resolver {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<Settlement>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Resolve with `value`. Returns false if already settled.
    pub fn resolve(&self, value: impl Into<Value>) -> bool {
        self.settle(Ok(value.into()))
    }

    /// Reject with `reason`. Returns false if already settled.
    pub fn reject(&self, reason: impl Into<Value>) -> bool {
        self.settle(Err(reason.into()))
    }

    pub fn settle(&self, settlement: Settlement) -> bool {
        match self.tx.lock().take() {
            Some(tx) => tx.send(settlement).is_ok(),
            None => false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.tx.lock().is_none()
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// Turn a panic payload into a rejection reason
pub(crate) fn panic_reason(payload: Box<dyn Any + Send>) -> Value {
    if let Some(s) = payload.downcast_ref::<&str>() {
        Value::String(s.to_string())
    } else if let Some(s) = payload.downcast_ref::<String>() {
        Value::String(s.clone())
    } else if let Some(v) = payload.downcast_ref::<Value>() {
        v.clone()
    } else {
        Value::String("unknown panic".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_first_signal_wins() {
        let (resolver, rx) = Resolver::channel();
        let other = resolver.clone();
        assert!(resolver.resolve("first"));
        assert!(!other.reject("second"));
        assert!(other.is_settled());
        assert_eq!(rx.await.unwrap(), Ok(json!("first")));
    }

    #[test]
    fn test_panic_reason() {
        let payload = panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_reason(payload), json!("boom"));

        let payload = panic::catch_unwind(|| std::panic::panic_any(json!({"code": 3}))).unwrap_err();
        assert_eq!(panic_reason(payload), json!({"code": 3}));
    }
}
