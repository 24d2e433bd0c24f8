//! In-flight request coalescing: at most one pipeline execution per URL key
//! at any time, with concurrent callers sharing the leader's result.
//!
//! A leader that is canceled mid-pipeline (its future dropped) still
//! publishes a bare result through a drop guard, so waiters wake up, notice
//! the result carries no metadata and re-execute for themselves if their own
//! request is still alive.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::types::Preview;

type Slot = Option<Arc<Preview>>;

#[derive(Default)]
pub struct FlightGroup {
    calls: Mutex<HashMap<String, watch::Receiver<Slot>>>,
}

impl FlightGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` under the single-flight contract for `key`. Returns the
    /// result and whether it was shared from another caller's execution.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> (Arc<Preview>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Preview>,
    {
        enum Role {
            Leader(watch::Sender<Slot>),
            Waiter(watch::Receiver<Slot>),
        }

        let role = {
            let mut calls = self.calls.lock().expect("flight registry poisoned");
            match calls.entry(key.to_string()) {
                std::collections::hash_map::Entry::Occupied(entry) => {
                    Role::Waiter(entry.get().clone())
                }
                std::collections::hash_map::Entry::Vacant(entry) => {
                    let (tx, rx) = watch::channel(None);
                    entry.insert(rx);
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Leader(tx) => {
                let mut leader = Leader {
                    group: self,
                    key,
                    tx,
                    published: false,
                };
                let result = Arc::new(work().await);
                leader.publish(result.clone());
                (result, false)
            }
            Role::Waiter(mut rx) => loop {
                if let Some(result) = rx.borrow_and_update().clone() {
                    return (result, true);
                }
                if rx.changed().await.is_err() {
                    // leader vanished without publishing; fall back to a
                    // bare result so the caller re-executes
                    return (Arc::new(Preview::new(key)), true);
                }
            },
        }
    }

    fn forget(&self, key: &str) {
        self.calls
            .lock()
            .expect("flight registry poisoned")
            .remove(key);
    }
}

/// Publishes the leader's result exactly once, even when the leader future
/// is dropped before the pipeline finishes.
struct Leader<'a> {
    group: &'a FlightGroup,
    key: &'a str,
    tx: watch::Sender<Slot>,
    published: bool,
}

impl Leader<'_> {
    fn publish(&mut self, result: Arc<Preview>) {
        self.published = true;
        self.group.forget(self.key);
        let _ = self.tx.send(Some(result));
    }
}

impl Drop for Leader<'_> {
    fn drop(&mut self) {
        if !self.published {
            self.group.forget(self.key);
            let _ = self.tx.send(Some(Arc::new(Preview::new(self.key))));
        }
    }
}
