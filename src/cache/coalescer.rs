//! Async single-flight request coalescer.
//!
//! Concurrent callers for the same key observe exactly one producer
//! invocation, all receiving the identical result or error. A
//! `tokio::sync::watch` channel broadcasts the producer's result to every
//! concurrent waiter without the lost-wakeup risk a bare `Notify` would have
//! here (a receiver created at any point before or after the send still
//! observes the value). The map entry lives only while the call is in
//! flight and is evicted right after delivery, so the next call re-executes.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

#[derive(Debug, Clone)]
pub struct ProducerError(pub Arc<str>);

impl fmt::Display for ProducerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ProducerError {}

type Slot<V> = Arc<watch::Sender<Option<Result<V, ProducerError>>>>;

pub struct Coalescer<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> Default for Coalescer<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> Coalescer<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `producer` for `key` if no call is in flight; otherwise waits
    /// for the in-flight call's result. All waiters see the identical
    /// result or identical error.
    pub async fn get_or_execute<F, Fut>(&self, key: K, producer: F) -> Result<V, ProducerError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, ProducerError>>,
    {
        let (sender, is_leader, mut receiver) = {
            let mut slots = self.slots.lock().await;
            if let Some(sender) = slots.get(&key) {
                let receiver = sender.subscribe();
                (sender.clone(), false, receiver)
            } else {
                let (tx, rx) = watch::channel(None);
                let tx = Arc::new(tx);
                slots.insert(key.clone(), tx.clone());
                (tx, true, rx)
            }
        };

        if is_leader {
            let result = producer().await;
            let _ = sender.send(Some(result.clone()));
            self.slots.lock().await.remove(&key);
            return result;
        }

        loop {
            if let Some(r) = receiver.borrow().clone() {
                return r;
            }
            if receiver.changed().await.is_err() {
                return Err(ProducerError(Arc::from(
                    "coalescer producer dropped without a result",
                )));
            }
        }
    }

    pub async fn clear(&self, key: &K) {
        self.slots.lock().await.remove(key);
    }
}
