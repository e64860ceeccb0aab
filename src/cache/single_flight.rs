//! Deduplication of concurrent computations for the same key

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
enum CallState<V> {
    Running,
    Done(V),
    Abandoned,
}

#[derive(Debug)]
struct Call<V> {
    state: Mutex<CallState<V>>,
    finished: Condvar,
}

/// Ensures at most one in-flight computation per key
///
/// The first caller for a key (the leader) runs the computation; callers that
/// arrive while it is running block until it finishes and receive a clone of its
/// result. If the leader panics, waiting callers retry and one of them becomes
/// the new leader.
#[derive(Debug)]
pub struct SingleFlight<K, V> {
    calls: Mutex<HashMap<K, Arc<Call<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

/// Publishes the leader's outcome and unregisters the call, even on unwind
struct LeaderGuard<'a, K: Eq + Hash, V> {
    flight: &'a SingleFlight<K, V>,
    key: &'a K,
    call: Arc<Call<V>>,
    result: Option<V>,
}

impl<K: Eq + Hash, V> Drop for LeaderGuard<'_, K, V> {
    fn drop(&mut self) {
        self.flight.calls.lock().remove(self.key);
        let mut state = self.call.state.lock();
        *state = match self.result.take() {
            Some(value) => CallState::Done(value),
            None => CallState::Abandoned,
        };
        self.call.finished.notify_all();
    }
}

impl<K: Eq + Hash + Clone, V: Clone> SingleFlight<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `compute` for `key` unless an identical call is already in flight
    pub fn run<F>(&self, key: &K, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        let call = loop {
            let existing = {
                let mut calls = self.calls.lock();
                match calls.get(key) {
                    Some(call) => Arc::clone(call),
                    None => {
                        let call = Arc::new(Call {
                            state: Mutex::new(CallState::Running),
                            finished: Condvar::new(),
                        });
                        calls.insert(key.clone(), Arc::clone(&call));
                        break call;
                    }
                }
            };
            if let Some(value) = Self::wait(&existing) {
                return value;
            }
        };

        let mut guard = LeaderGuard {
            flight: self,
            key,
            call,
            result: None,
        };
        let value = compute();
        guard.result = Some(value.clone());
        value
    }

    /// Block until `call` settles; `None` means its leader gave up
    fn wait(call: &Call<V>) -> Option<V> {
        let mut state = call.state.lock();
        loop {
            if let CallState::Done(value) = &*state {
                return Some(value.clone());
            }
            if matches!(*state, CallState::Abandoned) {
                return None;
            }
            call.finished.wait(&mut state);
        }
    }

    /// Number of keys currently being computed
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}
