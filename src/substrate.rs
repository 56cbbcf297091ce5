//! External collaborators consumed by the engine: the clustering
//! substrate's named lock and ordered broadcast topic.
//!
//! A strongly consistent lock combined with best-effort broadcast is
//! the hardest thing to tame here. Their implementations are out of
//! scope for this crate; only the traits and the naming convention
//! live here. Cluster membership discovery (learning this process's
//! own identity) is likewise out of scope: `LeadershipService` takes
//! its `local_node` directly as a constructor argument instead of
//! through a lookup trait.

use crate::error::PublishError;
use async_trait::async_trait;
use std::sync::Arc;

/// Opaque handle to a subscription on an [`OrderedTopic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// A held lock. Release is an explicit step (`unlock`), not a `Drop`
/// side effect: the engine must release under its own monitor so that
/// the unlock and the `LEADER_BOOTED` post/publish stay ordered with
/// respect to each other (see `DESIGN.md`).
pub trait LockGuard: Send {
    fn unlock(self: Box<Self>);
}

/// A cluster-wide strongly consistent named mutex.
///
/// `lock_interruptibly` blocks until held. Cancellation is structural:
/// callers race this future against their own cancellation signal with
/// `tokio::select!` and drop it on the losing branch, rather than the
/// lock itself needing to know about cancellation.
#[async_trait]
pub trait NamedLock: Send + Sync {
    async fn lock_interruptibly(&self) -> Box<dyn LockGuard>;
}

/// A cluster-wide totally-ordered best-effort broadcast topic.
///
/// `publish` may fail or be silently dropped; the engine logs and
/// ignores such failures. Delivery, including to the publisher's own
/// messages, is asynchronous and substrate-driven.
#[async_trait]
pub trait OrderedTopic: Send + Sync {
    async fn publish(&self, bytes: Vec<u8>) -> Result<(), PublishError>;
    fn subscribe(&self, handler: Arc<dyn Fn(Vec<u8>) + Send + Sync>) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Supplies named locks and ordered topics on demand.
///
/// `name` for a topic `t` is always `"LeadershipService/{t}/lock"` or
/// `"LeadershipService/{t}/topic"` — callers never need to build these
/// strings themselves; see [`crate::engine::lock_name`] and
/// [`crate::engine::topic_name`].
#[async_trait]
pub trait ClusteringSubstrate: Send + Sync {
    async fn lock(&self, name: &str) -> Arc<dyn NamedLock>;
    async fn ordered_topic(&self, name: &str) -> Arc<dyn OrderedTopic>;
}
