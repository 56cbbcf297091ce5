/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! # Leadership Election
//!
//! Per-topic leadership election for a clustered controller, built on
//! two primitives a clustering substrate is expected to provide: a
//! strongly consistent named lock, and a best-effort ordered broadcast
//! topic. Exactly one node holds the named lock for a given topic at a
//! time; while it does, it is that topic's leader, and it announces the
//! fact (and any change) to the rest of the cluster over the topic.
//!
//! [`LeadershipService`] is the facade: register interest in a topic
//! with [`LeadershipService::run_for_leadership`], read the current
//! believed leader with [`LeadershipService::get_leader`], and listen
//! for changes with [`LeadershipService::add_listener`].

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod listener;
pub mod model;
pub mod substrate;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use codec::{EventCodec, JsonEventCodec};
pub use config::ElectionConfig;
pub use error::{CodecError, LeadershipError, PublishError, Result};
pub use listener::{LeadershipEventListener, ListenerRegistry};
pub use model::{ControllerNode, Leadership, LeadershipEvent, LeadershipEventType, NodeId};
pub use substrate::{ClusteringSubstrate, LockGuard, NamedLock, OrderedTopic, SubscriptionId};

use dashmap::DashMap;
use engine::Topic;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::info;

/// Runs leadership election for every topic this process has registered
/// interest in.
///
/// One [`Topic`] engine is created per distinct topic name, the first
/// time [`run_for_leadership`](LeadershipService::run_for_leadership) is
/// called for it; subsequent calls for the same name are no-ops. All
/// topics share one [`ListenerRegistry`], so a listener added once
/// observes every topic's events.
#[derive(Clone)]
pub struct LeadershipService {
    local_node: ControllerNode,
    substrate: Arc<dyn ClusteringSubstrate>,
    codec: Arc<dyn EventCodec>,
    listeners: Arc<ListenerRegistry>,
    config: ElectionConfig,
    topics: Arc<DashMap<String, Arc<Topic>>>,
}

impl LeadershipService {
    /// Build a service bound to `local_node`, backed by `substrate`, and
    /// using the JSON wire codec with default timing.
    ///
    /// Returns an error if `config` fails [`ElectionConfig::validate`].
    pub fn new(
        local_node: ControllerNode,
        substrate: Arc<dyn ClusteringSubstrate>,
    ) -> Result<Self> {
        Self::with_config(local_node, substrate, ElectionConfig::default())
    }

    /// As [`LeadershipService::new`], with an explicit [`ElectionConfig`].
    pub fn with_config(
        local_node: ControllerNode,
        substrate: Arc<dyn ClusteringSubstrate>,
        config: ElectionConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            local_node,
            substrate,
            codec: Arc::new(JsonEventCodec),
            listeners: Arc::new(ListenerRegistry::new()),
            config,
            topics: Arc::new(DashMap::new()),
        })
    }

    /// Use a codec other than the default [`JsonEventCodec`].
    pub fn with_codec(mut self, codec: Arc<dyn EventCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Register interest in `topic`'s leadership and start contending
    /// for it. Idempotent: a second call for a topic already being
    /// contended for is a no-op, even across concurrent callers.
    pub async fn run_for_leadership(&self, topic: &str) -> Result<()> {
        if topic.is_empty() {
            return Err(LeadershipError::InvalidTopic);
        }

        // The entry API lets a concurrent second caller for the same
        // topic observe the first caller's engine instead of racing to
        // build a second one; neither branch holds the map's internal
        // lock across the subsequent `.await`.
        let (engine, is_new) = match self.topics.entry(topic.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => (entry.get().clone(), false),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let engine = Arc::new(Topic::new(
                    topic,
                    self.local_node.clone(),
                    self.substrate.clone(),
                    self.codec.clone(),
                    self.listeners.clone(),
                    self.config,
                ));
                entry.insert(engine.clone());
                (engine, true)
            }
        };

        if is_new {
            info!(%topic, node = %self.local_node, "registered for leadership");
            engine.start().await;
        }
        Ok(())
    }

    /// Withdraw from `topic`'s leadership, stepping down if this node
    /// currently holds it. A no-op if this process never registered
    /// interest in `topic`.
    pub async fn withdraw(&self, topic: &str) -> Result<()> {
        if topic.is_empty() {
            return Err(LeadershipError::InvalidTopic);
        }
        if let Some((_, engine)) = self.topics.remove(topic) {
            info!(%topic, node = %self.local_node, "withdrawing from leadership");
            engine.stop().await;
        }
        Ok(())
    }

    /// Best-effort snapshot of the currently-believed leader for
    /// `topic`, or `None` if unknown or this process never registered
    /// interest in it.
    pub fn get_leader(&self, topic: &str) -> Option<ControllerNode> {
        self.topics.get(topic).and_then(|e| e.get_leader())
    }

    /// A cluster-wide view of every topic's leader. Not implemented by
    /// this core: each node only ever knows the topics it has itself
    /// registered interest in, never the full set in play across the
    /// cluster.
    pub fn get_leader_board(&self) -> Result<()> {
        Err(LeadershipError::Unsupported)
    }

    /// Subscribe to leadership events across all topics.
    pub fn add_listener(&self, listener: Arc<dyn LeadershipEventListener>) {
        self.listeners.add_listener(listener);
    }

    /// Unsubscribe a previously added listener.
    pub fn remove_listener(&self, listener: &Arc<dyn LeadershipEventListener>) {
        self.listeners.remove_listener(listener);
    }

    /// Tear down every topic this process is contending for, in
    /// parallel, and drain the topic map.
    ///
    /// Equivalent to calling [`withdraw`](Self::withdraw) on every
    /// registered topic, but does it concurrently rather than one at a
    /// time, and is the right call to make as the surrounding process
    /// shuts down rather than as individual topics lose interest.
    pub async fn shutdown(&self) {
        info!(node = %self.local_node, "shutting down leadership service");
        let engines: Vec<Arc<Topic>> = self.topics.iter().map(|e| e.value().clone()).collect();
        self.topics.clear();

        let mut teardown = JoinSet::new();
        for engine in engines {
            teardown.spawn(async move { engine.stop().await });
        }
        while teardown.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::InMemorySubstrate;

    fn service(node: &str) -> LeadershipService {
        let substrate: Arc<dyn ClusteringSubstrate> = Arc::new(InMemorySubstrate::new());
        LeadershipService::new(ControllerNode::new(node), substrate).unwrap()
    }

    #[tokio::test]
    async fn rejects_empty_topic_name() {
        let service = service("node-a");
        assert!(matches!(
            service.run_for_leadership("").await,
            Err(LeadershipError::InvalidTopic)
        ));
        assert!(matches!(
            service.withdraw("").await,
            Err(LeadershipError::InvalidTopic)
        ));
    }

    #[tokio::test]
    async fn solo_node_becomes_leader() {
        let service = service("node-a");
        service.run_for_leadership("sdn").await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(
            service.get_leader("sdn"),
            Some(ControllerNode::new("node-a"))
        );
        service.withdraw("sdn").await.unwrap();
    }

    #[tokio::test]
    async fn get_leader_on_unregistered_topic_is_none() {
        let service = service("node-a");
        assert_eq!(service.get_leader("unknown"), None);
    }

    #[tokio::test]
    async fn withdraw_on_unregistered_topic_is_a_no_op() {
        let service = service("node-a");
        assert!(service.withdraw("unknown").await.is_ok());
    }

    #[tokio::test]
    async fn run_for_leadership_is_idempotent() {
        let service = service("node-a");
        service.run_for_leadership("sdn").await.unwrap();
        service.run_for_leadership("sdn").await.unwrap();
        assert_eq!(service.topics.len(), 1);
        service.withdraw("sdn").await.unwrap();
    }

    #[tokio::test]
    async fn leader_board_is_unsupported() {
        let service = service("node-a");
        assert!(matches!(
            service.get_leader_board(),
            Err(LeadershipError::Unsupported)
        ));
    }

    #[tokio::test]
    async fn shutdown_drains_every_registered_topic() {
        let service = service("node-a");
        service.run_for_leadership("sdn").await.unwrap();
        service.run_for_leadership("fabric").await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(service.topics.len(), 2);

        service.shutdown().await;

        assert_eq!(service.topics.len(), 0);
        assert_eq!(service.get_leader("sdn"), None);
        assert_eq!(service.get_leader("fabric"), None);
    }
}
