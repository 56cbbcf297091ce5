//! In-memory fakes for [`crate::substrate::ClusteringSubstrate`], for
//! this crate's own tests and for integration tests that exercise the
//! facade without a real clustering backend.
//!
//! Locks are modeled with `tokio::sync::Mutex` (a task blocks waiting
//! for it the same way it would wait on a real distributed lock), and
//! topics with `tokio::sync::broadcast`, so that multiple
//! [`InMemorySubstrate`] handles cloned from the same instance see each
//! other's publishes and multiple [`crate::LeadershipService`]s can be
//! wired together to simulate a cluster of more than one node.

use crate::error::PublishError;
use crate::substrate::{ClusteringSubstrate, LockGuard, NamedLock, OrderedTopic, SubscriptionId};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, OwnedMutexGuard};

struct InMemoryLockGuard {
    _guard: OwnedMutexGuard<()>,
}

impl LockGuard for InMemoryLockGuard {
    fn unlock(self: Box<Self>) {}
}

struct InMemoryNamedLock {
    mutex: Arc<tokio::sync::Mutex<()>>,
}

#[async_trait]
impl NamedLock for InMemoryNamedLock {
    async fn lock_interruptibly(&self) -> Box<dyn LockGuard> {
        let guard = self.mutex.clone().lock_owned().await;
        Box::new(InMemoryLockGuard { _guard: guard })
    }
}

struct InMemoryOrderedTopic {
    sender: broadcast::Sender<Vec<u8>>,
    next_id: AtomicU64,
    subscriptions: DashMap<u64, tokio::task::JoinHandle<()>>,
}

#[async_trait]
impl OrderedTopic for InMemoryOrderedTopic {
    async fn publish(&self, bytes: Vec<u8>) -> Result<(), PublishError> {
        // No receivers is a normal, if unusual, state (nothing
        // subscribed yet); a dropped channel never happens since this
        // struct holds the sender itself.
        let _ = self.sender.send(bytes);
        Ok(())
    }

    fn subscribe(&self, handler: Arc<dyn Fn(Vec<u8>) + Send + Sync>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut receiver = self.sender.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(bytes) => handler(bytes),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.subscriptions.insert(id, task);
        SubscriptionId(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Some((_, task)) = self.subscriptions.remove(&id.0) {
            task.abort();
        }
    }
}

/// A single process's worth of in-memory locks and topics, keyed by
/// name. Build several [`LeadershipService`](crate::LeadershipService)s
/// over the same `Arc<InMemorySubstrate>` to simulate a cluster of more
/// than one node sharing one clustering backend.
#[derive(Default)]
pub struct InMemorySubstrate {
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    topics: DashMap<String, Arc<InMemoryOrderedTopic>>,
}

impl InMemorySubstrate {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClusteringSubstrate for InMemorySubstrate {
    async fn lock(&self, name: &str) -> Arc<dyn NamedLock> {
        let mutex = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        Arc::new(InMemoryNamedLock { mutex })
    }

    async fn ordered_topic(&self, name: &str) -> Arc<dyn OrderedTopic> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| {
                let (sender, _) = broadcast::channel(1024);
                Arc::new(InMemoryOrderedTopic {
                    sender,
                    next_id: AtomicU64::new(0),
                    subscriptions: DashMap::new(),
                })
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_serializes_two_contenders() {
        let substrate = InMemorySubstrate::new();
        let lock = substrate.lock("l").await;

        let guard = lock.lock_interruptibly().await;

        let lock2 = substrate.lock("l").await;
        let second = tokio::spawn(async move {
            let g = lock2.lock_interruptibly().await;
            g.unlock();
        });

        tokio::task::yield_now().await;
        assert!(!second.is_finished());

        guard.unlock();
        second.await.unwrap();
    }

    #[tokio::test]
    async fn subscribers_observe_published_bytes() {
        let substrate = InMemorySubstrate::new();
        let topic = substrate.ordered_topic("t").await;

        let received = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let received_clone = received.clone();
        topic.subscribe(Arc::new(move |bytes| {
            received_clone.lock().push(bytes);
        }));

        topic.publish(b"hello".to_vec()).await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(received.lock().as_slice(), [b"hello".to_vec()]);
    }
}
