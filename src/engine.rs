//! The per-topic election engine — the core of this crate.
//!
//! Drives one topic's election: tries to become leader, announces
//! leadership while held, tracks the remote leader when someone else
//! holds it, and detects/resolves split-brain when the ordered
//! broadcast reveals a conflicting leader.

use crate::codec::EventCodec;
use crate::config::ElectionConfig;
use crate::error::CodecError;
use crate::listener::ListenerRegistry;
use crate::model::{ControllerNode, Leadership, LeadershipEvent, LeadershipEventType};
use crate::substrate::{ClusteringSubstrate, OrderedTopic, SubscriptionId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The named lock identity for a topic's election.
pub fn lock_name(topic: &str) -> String {
    format!("LeadershipService/{topic}/lock")
}

/// The ordered broadcast topic identity for a topic's election.
pub fn topic_name(topic: &str) -> String {
    format!("LeadershipService/{topic}/topic")
}

struct EngineState {
    leader: Option<ControllerNode>,
    /// Internal monotonic clock for staleness math. The wire timestamp
    /// on `LeadershipEvent` is wall-clock; this is not, so that NTP
    /// adjustments across the cluster cannot make a remote leader look
    /// fresher than it is.
    last_leadership_update: Option<Instant>,
}

struct TaskHandles {
    lock_holder: JoinHandle<()>,
    periodic: JoinHandle<()>,
}

/// Per-topic election engine.
///
/// One engine exists per topic name, owned by the service facade's
/// map. Both worker tasks are spawned in `start()` and both are torn
/// down in `stop()` before it returns. `leader == Some(local_node)` is
/// only ever set immediately after the lock-holder task's
/// `lock_interruptibly().await` resolves. `get_leader()` takes a
/// short-lived lock on `state`, not the per-iteration cancellation
/// token, so it never blocks on election progress.
pub struct Topic {
    topic_name: String,
    local_node: ControllerNode,
    substrate: Arc<dyn ClusteringSubstrate>,
    codec: Arc<dyn EventCodec>,
    listeners: Arc<ListenerRegistry>,
    config: ElectionConfig,
    state: Mutex<EngineState>,
    is_shutdown: Arc<AtomicBool>,
    step_down: Mutex<CancellationToken>,
    tasks: Mutex<Option<TaskHandles>>,
    subscription: Mutex<Option<(Arc<dyn OrderedTopic>, SubscriptionId)>>,
}

impl Topic {
    pub fn new(
        topic_name: impl Into<String>,
        local_node: ControllerNode,
        substrate: Arc<dyn ClusteringSubstrate>,
        codec: Arc<dyn EventCodec>,
        listeners: Arc<ListenerRegistry>,
        config: ElectionConfig,
    ) -> Self {
        Self {
            topic_name: topic_name.into(),
            local_node,
            substrate,
            codec,
            listeners,
            config,
            state: Mutex::new(EngineState {
                leader: None,
                last_leadership_update: None,
            }),
            is_shutdown: Arc::new(AtomicBool::new(false)),
            step_down: Mutex::new(CancellationToken::new()),
            tasks: Mutex::new(None),
            subscription: Mutex::new(None),
        }
    }

    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    /// Best-effort snapshot of the currently-believed leader.
    /// Non-blocking; may be stale by the time the caller reads it.
    pub fn get_leader(&self) -> Option<ControllerNode> {
        self.state.lock().leader.clone()
    }

    /// Acquire the lock and ordered topic handles, subscribe to the
    /// topic, and spawn the two worker tasks.
    pub async fn start(self: Arc<Self>) {
        info!(topic = %self.topic_name, node = %self.local_node, "starting election engine");

        let lock = self.substrate.lock(&lock_name(&self.topic_name)).await;
        let ordered_topic = self
            .substrate
            .ordered_topic(&topic_name(&self.topic_name))
            .await;

        let incoming = {
            let engine = self.clone();
            Arc::new(move |bytes: Vec<u8>| engine.handle_incoming(bytes))
        };
        let subscription_id = ordered_topic.subscribe(incoming);
        *self.subscription.lock() = Some((ordered_topic.clone(), subscription_id));

        let lock_holder = {
            let engine = self.clone();
            tokio::spawn(async move { engine.run_lock_holder(lock, ordered_topic).await })
        };
        let periodic = {
            let engine = self.clone();
            tokio::spawn(async move { engine.run_periodic().await })
        };

        *self.tasks.lock() = Some(TaskHandles {
            lock_holder,
            periodic,
        });
    }

    /// Tear down this engine: stop both workers, unsubscribe, and
    /// ensure no further local dispatch or remote publish occurs once
    /// this returns.
    ///
    /// The periodic task is hard-aborted: it only reads state, so it
    /// has no cleanup obligation, and a cooperative shutdown check
    /// could let it publish one more heartbeat after `stop()` returns.
    /// The lock-holder task instead must run its own cleanup (unlock,
    /// post+publish `LEADER_BOOTED`) under the monitor, so it is
    /// cancelled cooperatively via `step_down` and joined, not aborted.
    pub async fn stop(&self) {
        info!(topic = %self.topic_name, node = %self.local_node, "stopping election engine");
        // Order matters: set the flag *before* cancelling, so that the
        // lock-holder's check-and-install critical section (see
        // run_lock_holder) can never install a fresh, uncancelled token
        // after observing shutdown — see DESIGN.md for the race this
        // avoids.
        self.is_shutdown.store(true, Ordering::SeqCst);
        self.step_down.lock().cancel();

        if let Some((ordered_topic, id)) = self.subscription.lock().take() {
            ordered_topic.unsubscribe(id);
        }

        if let Some(tasks) = self.tasks.lock().take() {
            tasks.periodic.abort();
            let _ = tasks.lock_holder.await;
        }
    }

    /// The lock-holder task: repeatedly tries to acquire the named
    /// lock, holds leadership while it does, and releases it on
    /// cancellation or shutdown.
    async fn run_lock_holder(
        self: Arc<Self>,
        lock: Arc<dyn crate::substrate::NamedLock>,
        ordered_topic: Arc<dyn OrderedTopic>,
    ) {
        loop {
            // Checking shutdown and installing the fresh token happen
            // under the same critical section: otherwise stop() could
            // observe the old token, cancel it, and have this loop
            // install an uncancelled replacement right afterwards,
            // hanging forever waiting on a lock no one will release.
            let token = {
                let mut guard = self.step_down.lock();
                if self.is_shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let token = CancellationToken::new();
                *guard = token.clone();
                token
            };

            let guard = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    // Cancelled while still trying to acquire: re-enter
                    // election. No LEADER_ELECTED was ever posted, so
                    // there is nothing to step down from.
                    continue;
                }
                guard = lock.lock_interruptibly() => guard,
            };

            {
                let mut state = self.state.lock();
                state.leader = Some(self.local_node.clone());
                state.last_leadership_update = Some(Instant::now());
            }
            self.post_and_publish(
                LeadershipEventType::LeaderElected,
                self.local_node.clone(),
                &ordered_topic,
            )
            .await;

            // Hold the lock until cancelled: either a step-down request
            // (local withdraw / stop / split-brain loss) or shutdown.
            token.cancelled().await;

            {
                let mut state = self.state.lock();
                if state.leader.as_ref() == Some(&self.local_node) {
                    state.leader = None;
                }
            }
            self.post_and_publish(
                LeadershipEventType::LeaderBooted,
                self.local_node.clone(),
                &ordered_topic,
            )
            .await;
            guard.unlock();
        }
    }

    /// The periodic task: heartbeats while leading, staleness checks
    /// otherwise.
    async fn run_periodic(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.periodic_interval);
        // The source runs work immediately then sleeps; tokio::interval's
        // default immediate first tick matches that without a manual delay.
        loop {
            if self.is_shutdown.load(Ordering::SeqCst) {
                return;
            }
            interval.tick().await;
            if self.is_shutdown.load(Ordering::SeqCst) {
                return;
            }
            self.periodic_tick().await;
        }
    }

    async fn periodic_tick(&self) {
        let leader = self.state.lock().leader.clone();
        let Some(leader) = leader else { return };

        if leader.id == self.local_node.id {
            // Posts locally as well as publishing remotely, like
            // LEADER_ELECTED: the self-message filter in handle_incoming
            // means the redelivered broadcast copy never reaches this
            // node's own listeners, so a publish-only heartbeat would
            // never surface here (see DESIGN.md).
            let Some((ordered_topic, _)) = self.subscription.lock().clone() else {
                return;
            };
            self.post_and_publish(LeadershipEventType::LeaderReelected, leader, &ordered_topic)
                .await;
        } else {
            // Re-check and clear under one lock acquisition: handle_incoming
            // runs concurrently on its own task and may have refreshed
            // `leader`/`last_leadership_update` for this same node between
            // the read above and this point. Committing a stale snapshot's
            // verdict here would wipe out that fresh update and post a
            // spurious LEADER_BOOTED for a leader that just re-announced
            // itself.
            let expired = {
                let mut state = self.state.lock();
                match &state.leader {
                    Some(current) if current.id == leader.id => {
                        let stale = match state.last_leadership_update {
                            Some(last) => last.elapsed() > self.config.remote_timeout,
                            None => true,
                        };
                        if stale {
                            state.leader = None;
                            true
                        } else {
                            false
                        }
                    }
                    // Leader changed (or was cleared) since the read above;
                    // nothing to evict here, the next tick will reassess.
                    _ => false,
                }
            };
            if expired {
                warn!(topic = %self.topic_name, leader = %leader, "remote leader timed out");
                // Local only: this reflects a local belief, not a
                // cluster fact, so it is never broadcast.
                let event = LeadershipEvent::new(
                    LeadershipEventType::LeaderBooted,
                    Leadership::new(self.topic_name.clone(), leader),
                );
                self.listeners.dispatch(&event);
            }
        }
    }

    /// Incoming broadcast handler. Invoked synchronously by the
    /// substrate on message arrival; must not block.
    fn handle_incoming(&self, bytes: Vec<u8>) {
        let event = match self.codec.decode(&bytes) {
            Ok(event) => event,
            Err(CodecError::Serialization(reason)) => {
                error!(topic = %self.topic_name, %reason, "dropping undecodable broadcast message");
                return;
            }
        };

        if event.subject.topic != self.topic_name {
            return;
        }
        if event.subject.leader.id == self.local_node.id {
            return;
        }

        match event.event_type {
            LeadershipEventType::LeaderElected | LeadershipEventType::LeaderReelected => {
                // Check-and-mutate under one lock acquisition: run_lock_holder
                // runs concurrently on its own task and can commit
                // `state.leader = Some(local_node)` in the window between a
                // separate check and write, which would otherwise leave this
                // process holding the external lock while `state.leader` is
                // overwritten with the other node's id here -- and the
                // split-brain detector above keys off `state.leader`, so it
                // would never notice and step down.
                let was_self_leading = {
                    let mut state = self.state.lock();
                    if state.leader.as_ref() == Some(&self.local_node) {
                        true
                    } else {
                        state.leader = Some(event.subject.leader.clone());
                        state.last_leadership_update = Some(Instant::now());
                        false
                    }
                };
                if was_self_leading {
                    warn!(
                        topic = %self.topic_name,
                        other = %event.subject.leader,
                        "split-brain detected, stepping down"
                    );
                    self.step_down.lock().cancel();
                }
                self.listeners.dispatch(&event);
            }
            LeadershipEventType::LeaderBooted => {
                let mut state = self.state.lock();
                if state.leader.as_ref() == Some(&event.subject.leader) {
                    state.leader = None;
                }
                drop(state);
                self.listeners.dispatch(&event);
            }
        }
    }

    /// Post an event to local listeners and publish it to the ordered
    /// topic. Publish failures are logged and ignored.
    async fn post_and_publish(
        &self,
        event_type: LeadershipEventType,
        leader: ControllerNode,
        ordered_topic: &Arc<dyn OrderedTopic>,
    ) {
        let event = LeadershipEvent::new(event_type, Leadership::new(self.topic_name.clone(), leader));
        self.listeners.dispatch(&event);

        match self.codec.encode(&event) {
            Ok(bytes) => {
                if let Err(e) = ordered_topic.publish(bytes).await {
                    warn!(topic = %self.topic_name, error = %e, "broadcast publish failed, relying on next heartbeat");
                }
            }
            Err(e) => {
                error!(topic = %self.topic_name, error = %e, "failed to encode outgoing leadership event");
            }
        }
        debug!(topic = %self.topic_name, ?event.event_type, "posted leadership event");
    }
}
