use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

use super::Value;

struct State {
    slot: Mutex<Option<Result<Value>>>,
    ready: Condvar,
}

/// Pending result of an asynchronous guest call.
///
/// The consumer side. Clones observe the same settlement.
#[derive(Clone)]
pub struct Future {
    state: Arc<State>,
}

/// Producer side of a [`Future`]. Settles at most once.
pub struct Promise {
    state: Arc<State>,
}

impl Future {
    pub fn pending() -> (Future, Promise) {
        let state = Arc::new(State {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        });
        (
            Future {
                state: state.clone(),
            },
            Promise { state },
        )
    }

    pub fn resolved(value: Value) -> Future {
        let (future, promise) = Future::pending();
        promise.resolve(value);
        future
    }

    pub fn is_ready(&self) -> bool {
        self.state.slot.lock().is_some()
    }

    /// Blocks until settled. `None` waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<Value> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = self.state.slot.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            match deadline {
                Some(deadline) => {
                    if self.state.ready.wait_until(&mut slot, deadline).timed_out()
                        && slot.is_none()
                    {
                        return Err(Error::FutureTimeout);
                    }
                }
                None => self.state.ready.wait(&mut slot),
            }
        }
    }

    pub fn same(&self, other: &Future) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl Promise {
    pub fn resolve(self, value: Value) {
        self.settle(Ok(value));
    }

    pub fn reject(self, error: Error) {
        self.settle(Err(error));
    }

    fn settle(self, result: Result<Value>) {
        let mut slot = self.state.slot.lock();
        if slot.is_none() {
            *slot = Some(result);
            self.state.ready.notify_all();
        }
    }
}

impl fmt::Debug for Future {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Future(ready={})", self.is_ready())
    }
}
