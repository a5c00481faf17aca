//! Cluster facade: node lifecycle and administrative triggers
//!
//! The facade owns the registry, the identity counter, and the election
//! epoch. It never touches node state directly; administrative commands
//! travel through the same mailboxes as protocol traffic, and results
//! come back over oneshot channels or the published snapshots.
//!
//! All methods take `&self`, so scripted scenarios can drive several
//! operations concurrently from one shared handle.

use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::mailbox::mailbox;
use crate::node::{run_node, NodeState};
use crate::registry::{PeerHandle, Registry};
use crate::types::{AdminCmd, Envelope, NodeId, NodeStatus, SyncOutcome};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct TaskHandle {
    quit_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

/// A simulated cluster of peer nodes
pub struct Cluster {
    config: ClusterConfig,
    registry: Registry,
    /// Election epoch. Bumping it clears every node's nomination latch
    /// without touching the nodes themselves.
    epoch: Arc<AtomicU64>,
    next_id: AtomicU32,
    tasks: Mutex<HashMap<NodeId, TaskHandle>>,
}

impl Cluster {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            registry: Registry::new(),
            epoch: Arc::new(AtomicU64::new(0)),
            next_id: AtomicU32::new(0),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> ClusterConfig {
        self.config
    }

    /// Start a fresh node and return its identity. Identities are
    /// assigned monotonically and never reused, even after removal.
    pub async fn create_node(&self) -> NodeId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (outbox, inbound) = mailbox(self.config.mailbox_capacity);
        let (state, published) =
            NodeState::new(id, self.registry.clone(), Arc::clone(&self.epoch), self.config);

        // Register before spawning so the node is addressable from its
        // first instant.
        self.registry.insert(id, PeerHandle { outbox, published }).await;

        let (quit_tx, quit_rx) = oneshot::channel();
        let join = tokio::spawn(run_node(state, inbound, quit_rx));
        self.tasks.lock().await.insert(id, TaskHandle { quit_tx, join });

        info!("Node {} started", id);
        id
    }

    /// Graceful removal: deregister, then stop the task. Peers get no
    /// goodbye; the identity simply stops resolving.
    pub async fn remove_node(&self, id: NodeId) -> Result<(), ClusterError> {
        if self.registry.remove(id).await.is_none() {
            return Err(ClusterError::NodeNotFound(id));
        }

        let handle = self.tasks.lock().await.remove(&id);
        if let Some(handle) = handle {
            let _ = handle.quit_tx.send(());
            if handle.join.await.is_err() {
                warn!("Node {} task panicked before removal", id);
            }
        }

        info!("Node {} removed from the cluster", id);
        Ok(())
    }

    /// Crash a node in place. It stays registered and addressable but
    /// drops all protocol work from now on. Deadness is observable in
    /// `list_nodes` by the time this returns.
    pub async fn kill_node(&self, id: NodeId) -> Result<(), ClusterError> {
        // The administrative latch reset comes first and applies even
        // when the target turns out to be unknown.
        self.epoch.fetch_add(1, Ordering::SeqCst);

        let Some(peer) = self.registry.peer(id).await else {
            return Err(ClusterError::NodeNotFound(id));
        };
        if peer.outbox.deliver(Envelope::Admin(AdminCmd::Kill)).await.is_err() {
            return Err(ClusterError::NodeNotFound(id));
        }

        let mut published = peer.published;
        let _ = published.wait_for(|state| state.dead).await;
        Ok(())
    }

    /// Start a bully election round on the given node. Fire and forget:
    /// the round runs on the node's own task.
    pub async fn trigger_election(&self, id: NodeId) -> Result<(), ClusterError> {
        let Some(peer) = self.registry.peer(id).await else {
            return Err(ClusterError::NodeNotFound(id));
        };
        if peer.published.borrow().dead {
            return Err(ClusterError::NodeDead(id));
        }
        if peer
            .outbox
            .deliver(Envelope::Admin(AdminCmd::StartElection))
            .await
            .is_err()
        {
            return Err(ClusterError::NodeNotFound(id));
        }
        Ok(())
    }

    /// Have the given node pull the coordinator's clock, waiting for
    /// the attempt to finish. A timeout is a normal outcome, not an
    /// error; see `SyncOutcome`.
    pub async fn trigger_sync(&self, id: NodeId) -> Result<SyncOutcome, ClusterError> {
        self.epoch.fetch_add(1, Ordering::SeqCst);

        let Some(peer) = self.registry.peer(id).await else {
            return Err(ClusterError::NodeNotFound(id));
        };
        if peer.published.borrow().dead {
            return Err(ClusterError::NodeDead(id));
        }

        let (done_tx, done_rx) = oneshot::channel();
        let cmd = Envelope::Admin(AdminCmd::RequestSync { done: done_tx });
        if peer.outbox.deliver(cmd).await.is_err() {
            return Err(ClusterError::NodeNotFound(id));
        }
        match done_rx.await {
            Ok(outcome) => outcome,
            // Killed after the liveness check; the node dropped the command.
            Err(_) => Err(ClusterError::NodeDead(id)),
        }
    }

    /// Snapshots of every registered node, ordered by identity
    pub async fn list_nodes(&self) -> Vec<NodeStatus> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        self.registry.statuses(epoch).await
    }

    /// Stop every node task and empty the registry
    pub async fn shutdown(&self) {
        let drained: Vec<(NodeId, TaskHandle)> =
            self.tasks.lock().await.drain().collect();

        let mut joins = Vec::with_capacity(drained.len());
        for (id, handle) in drained {
            let _ = handle.quit_tx.send(());
            joins.push((id, handle.join));
        }
        for (id, join) in joins {
            if join.await.is_err() {
                warn!("Node {} task panicked during shutdown", id);
            }
        }

        self.registry.clear().await;
        info!("Cluster shut down");
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new(ClusterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tokio::time::sleep;

    fn accelerated() -> Cluster {
        Cluster::new(ClusterConfig::accelerated())
    }

    /// Accelerated timing with drift disabled, for exact clock checks
    fn lockstep() -> Cluster {
        Cluster::new(ClusterConfig {
            drift_rate: 0.0,
            ..ClusterConfig::accelerated()
        })
    }

    async fn converged<F>(cluster: &Cluster, deadline: Duration, check: F) -> bool
    where
        F: Fn(&[NodeStatus]) -> bool,
    {
        let started = Instant::now();
        loop {
            if check(&cluster.list_nodes().await) {
                return true;
            }
            if started.elapsed() > deadline {
                return false;
            }
            sleep(Duration::from_millis(5)).await;
        }
    }

    fn status_of(statuses: &[NodeStatus], id: NodeId) -> NodeStatus {
        statuses
            .iter()
            .copied()
            .find(|s| s.id == id)
            .unwrap_or_else(|| panic!("node {} missing from listing", id))
    }

    #[tokio::test]
    async fn test_identities_are_never_reused() {
        let cluster = accelerated();
        assert_eq!(cluster.create_node().await, 0);
        assert_eq!(cluster.create_node().await, 1);
        assert_eq!(cluster.create_node().await, 2);

        cluster.remove_node(1).await.unwrap();
        assert_eq!(cluster.create_node().await, 3);

        let ids: Vec<NodeId> = cluster.list_nodes().await.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 2, 3]);
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_unknown_node_is_not_found() {
        let cluster = accelerated();
        assert_eq!(cluster.remove_node(5).await, Err(ClusterError::NodeNotFound(5)));

        let id = cluster.create_node().await;
        cluster.remove_node(id).await.unwrap();
        assert_eq!(
            cluster.remove_node(id).await,
            Err(ClusterError::NodeNotFound(id))
        );
        assert!(cluster.list_nodes().await.is_empty());
    }

    #[tokio::test]
    async fn test_kill_unknown_node_is_not_found() {
        let cluster = accelerated();
        assert_eq!(cluster.kill_node(2).await, Err(ClusterError::NodeNotFound(2)));
    }

    #[tokio::test]
    async fn test_kill_marks_dead_before_returning() {
        let cluster = accelerated();
        cluster.create_node().await;
        let victim = cluster.create_node().await;

        cluster.kill_node(victim).await.unwrap();
        let statuses = cluster.list_nodes().await;
        assert!(!statuses[0].dead);
        assert!(statuses[1].dead);

        // Killing again changes nothing further.
        cluster.kill_node(victim).await.unwrap();
        assert!(cluster.list_nodes().await[1].dead);
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_dead_node_clock_keeps_ticking() {
        let cluster = lockstep();
        let id = cluster.create_node().await;
        cluster.kill_node(id).await.unwrap();

        let before = status_of(&cluster.list_nodes().await, id).clock;
        sleep(cluster.config().tick_interval * 5).await;
        let after = status_of(&cluster.list_nodes().await, id).clock;

        // Deadness silences the protocol, not the clock.
        assert!(
            after > before + 2.0,
            "dead node's clock stalled: {} -> {}",
            before,
            after
        );
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_dead_node_rejects_triggers() {
        let cluster = accelerated();
        let id = cluster.create_node().await;
        cluster.kill_node(id).await.unwrap();

        assert_eq!(
            cluster.trigger_election(id).await,
            Err(ClusterError::NodeDead(id))
        );
        assert_eq!(cluster.trigger_sync(id).await, Err(ClusterError::NodeDead(id)));
    }

    #[tokio::test]
    async fn test_sync_before_any_election_is_unreachable() {
        let cluster = accelerated();
        let first = cluster.create_node().await;
        cluster.create_node().await;

        assert_eq!(
            cluster.trigger_sync(first).await,
            Err(ClusterError::CoordinatorUnreachable(first))
        );
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_election_converges_on_highest_identity() {
        let cluster = accelerated();
        for _ in 0..5 {
            cluster.create_node().await;
        }

        cluster.trigger_election(0).await.unwrap();

        let done = converged(&cluster, Duration::from_secs(2), |statuses| {
            statuses.iter().all(|s| s.known_coordinator == Some(4))
        })
        .await;
        assert!(done, "cluster did not converge on node 4");

        // Latches are transient: all clear once the round is over.
        assert!(cluster
            .list_nodes()
            .await
            .iter()
            .all(|s| !s.election_invoked));
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_dead_node_does_not_block_election() {
        let cluster = accelerated();
        for _ in 0..5 {
            cluster.create_node().await;
        }
        cluster.kill_node(3).await.unwrap();

        let statuses = cluster.list_nodes().await;
        assert_eq!(statuses.len(), 5, "killed node must stay listed");
        assert!(status_of(&statuses, 3).dead);

        cluster.trigger_election(0).await.unwrap();

        let done = converged(&cluster, Duration::from_secs(2), |statuses| {
            statuses
                .iter()
                .filter(|s| !s.dead)
                .all(|s| s.known_coordinator == Some(4))
        })
        .await;
        assert!(done, "live nodes did not converge on node 4");
        // The dead node heard nothing.
        assert_eq!(
            status_of(&cluster.list_nodes().await, 3).known_coordinator,
            None
        );
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_removing_highest_shifts_the_win() {
        let cluster = accelerated();
        for _ in 0..5 {
            cluster.create_node().await;
        }
        cluster.remove_node(4).await.unwrap();

        cluster.trigger_election(0).await.unwrap();

        let done = converged(&cluster, Duration::from_secs(2), |statuses| {
            statuses.len() == 4 && statuses.iter().all(|s| s.known_coordinator == Some(3))
        })
        .await;
        assert!(done, "cluster did not converge on node 3");
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_sync_round_trip_pulls_requester_to_coordinator_clock() {
        let cluster = lockstep();
        let requester = cluster.create_node().await;
        cluster.create_node().await;

        // Give the early nodes a clear head start before the eventual
        // coordinator exists, so the pull is visible.
        sleep(cluster.config().tick_interval * 8).await;
        let coordinator = cluster.create_node().await;

        cluster.trigger_election(requester).await.unwrap();
        let elected = converged(&cluster, Duration::from_secs(2), |statuses| {
            statuses
                .iter()
                .all(|s| s.known_coordinator == Some(coordinator))
        })
        .await;
        assert!(elected, "cluster did not converge on node 2");

        let before = status_of(&cluster.list_nodes().await, requester).clock;

        let outcome = cluster.trigger_sync(requester).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Serviced { coordinator });

        // The response is applied on the requester's next mailbox turn.
        let pulled = converged(&cluster, Duration::from_secs(1), |statuses| {
            let requester_clock = status_of(statuses, requester).clock;
            let coordinator_clock = status_of(statuses, coordinator).clock;
            requester_clock + 4.0 < before
                && (requester_clock - coordinator_clock).abs() <= 3.0
        })
        .await;
        assert!(pulled, "requester clock was not pulled down to the coordinator");
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_killed_coordinator_times_out_and_reelects() {
        let cluster = accelerated();
        for _ in 0..3 {
            cluster.create_node().await;
        }

        cluster.trigger_election(0).await.unwrap();
        let elected = converged(&cluster, Duration::from_secs(2), |statuses| {
            statuses.iter().all(|s| s.known_coordinator == Some(2))
        })
        .await;
        assert!(elected);

        cluster.kill_node(2).await.unwrap();

        let outcome = cluster.trigger_sync(0).await.unwrap();
        assert_eq!(outcome, SyncOutcome::TimedOut { presumed_dead: 2 });

        let reelected = converged(&cluster, Duration::from_secs(2), |statuses| {
            statuses
                .iter()
                .filter(|s| !s.dead)
                .all(|s| s.known_coordinator == Some(1))
        })
        .await;
        assert!(reelected, "survivors did not converge on node 1");
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_removed_coordinator_is_unreachable_not_a_timeout() {
        let cluster = accelerated();
        for _ in 0..3 {
            cluster.create_node().await;
        }

        cluster.trigger_election(0).await.unwrap();
        let elected = converged(&cluster, Duration::from_secs(2), |statuses| {
            statuses.iter().all(|s| s.known_coordinator == Some(2))
        })
        .await;
        assert!(elected);

        cluster.remove_node(2).await.unwrap();

        // Graceful departure reports immediately, well under the
        // timeout, and starts no election.
        let started = Instant::now();
        let result = cluster.trigger_sync(0).await;
        assert_eq!(result, Err(ClusterError::CoordinatorUnreachable(0)));
        assert!(started.elapsed() < cluster.config().sync_timeout);

        sleep(cluster.config().tick_interval * 3).await;
        let statuses = cluster.list_nodes().await;
        assert_eq!(status_of(&statuses, 0).known_coordinator, Some(2));
        assert_eq!(status_of(&statuses, 1).known_coordinator, Some(2));
        cluster.shutdown().await;
    }
}
