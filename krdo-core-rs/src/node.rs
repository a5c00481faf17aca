//! Single-writer node task: clock, bully election, and clock sync.
//!
//! Each node is one tokio task owning all of its state. The task
//! multiplexes three sources: the clock tick, the mailbox, and the
//! termination signal. Administrative commands arrive through the same
//! mailbox as protocol traffic, so every mutation of node state happens
//! here and nowhere else.
//!
//! Protocol rules implemented by the handlers:
//! - ELECTION goes only to strictly higher identities; a live receiver
//!   vetoes with NACK and contests with its own election, once per round
//! - a node with no live higher peer at send time wins immediately
//! - VICTORY overwrites the known coordinator wherever it lands
//! - only a live coordinator answers SYNC_REQUEST; everyone else stays
//!   silent and the requester finds out via its timeout

use crate::clock::DriftClock;
use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::mailbox::Mailbox;
use crate::registry::Registry;
use crate::types::{AdminCmd, Envelope, Message, NodeId, PublishedState, SyncOutcome};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// All state owned by one node's task
pub struct NodeState {
    id: NodeId,
    clock: DriftClock,
    is_coordinator: bool,
    known_coordinator: Option<NodeId>,
    dead: bool,
    /// Epoch in which this node last nominated itself. Counts as the
    /// election-invoked latch only while it matches the cluster epoch.
    nominated_epoch: Option<u64>,
    epoch: Arc<AtomicU64>,
    registry: Registry,
    config: ClusterConfig,
    published: watch::Sender<PublishedState>,
}

impl NodeState {
    /// Build the state for a fresh node and hand back the receiver its
    /// snapshots will be published on.
    pub fn new(
        id: NodeId,
        registry: Registry,
        epoch: Arc<AtomicU64>,
        config: ClusterConfig,
    ) -> (Self, watch::Receiver<PublishedState>) {
        let (published, published_rx) = watch::channel(PublishedState::initial(id));
        let state = Self {
            id,
            clock: DriftClock::new(config.drift_rate),
            is_coordinator: false,
            known_coordinator: None,
            dead: false,
            nominated_epoch: None,
            epoch,
            registry,
            config,
            published,
        };
        (state, published_rx)
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn publish(&self) {
        self.published.send_replace(PublishedState {
            id: self.id,
            clock: self.clock.value(),
            known_coordinator: self.known_coordinator,
            dead: self.dead,
            nominated_epoch: self.nominated_epoch,
        });
    }

    async fn handle_message(&mut self, msg: Message) {
        if self.dead {
            debug!("Node {}: dead, dropping {}", self.id, msg.kind());
            return;
        }

        match msg {
            Message::Election { from } => self.handle_election(from).await,
            Message::Nack { from } => self.handle_nack(from),
            Message::Victory { from } => self.handle_victory(from),
            Message::SyncRequest { from, ack } => self.handle_sync_request(from, ack).await,
            Message::SyncResponse { from, clock } => self.handle_sync_response(from, clock),
        }
    }

    async fn handle_admin(&mut self, cmd: AdminCmd) {
        match cmd {
            AdminCmd::Kill => {
                if !self.dead {
                    info!("Node {} has been killed", self.id);
                }
                self.dead = true;
            }
            AdminCmd::StartElection => {
                if self.dead {
                    debug!("Node {}: dead, ignoring election trigger", self.id);
                    return;
                }
                self.initiate_election().await;
            }
            AdminCmd::RequestSync { done } => {
                if self.dead {
                    // Dropping `done` tells the facade the node went dead.
                    debug!("Node {}: dead, ignoring sync trigger", self.id);
                    return;
                }
                let outcome = self.request_sync().await;
                let _ = done.send(outcome);
            }
        }
    }

    /// Start a bully election round: probe every strictly higher peer,
    /// win on the spot if none of them can ever answer.
    async fn initiate_election(&mut self) {
        info!("Election: node {} initiating election", self.id);

        let higher = self.registry.higher_peers(self.id).await;
        if higher.is_empty() {
            self.become_coordinator().await;
            return;
        }

        for peer in &higher {
            let probe = Envelope::Protocol(Message::Election { from: self.id });
            if peer.outbox.deliver(probe).await.is_err() {
                debug!(
                    "Election: node {} left before the probe from {} arrived",
                    peer.id, self.id
                );
            }
        }

        // Dead peers never answer. If every higher peer was already
        // crashed at send time, no NACK can come and the initiator wins.
        if higher.iter().all(|peer| peer.dead) {
            self.become_coordinator().await;
        } else {
            info!("Election: node {} will not become coordinator this round", self.id);
        }
    }

    /// A lower node is contesting: veto it, then contest ourselves
    /// unless already nominated this round.
    async fn handle_election(&mut self, from: NodeId) {
        if self.id <= from {
            // Probes only go to higher identities; anything else is noise.
            debug!("Election: node {} ignoring ELECTION from node {}", self.id, from);
            return;
        }

        info!("Election: node {} handling request from node {}", self.id, from);

        let Some(origin) = self.registry.outbox(from).await else {
            info!("Election: initiating node {} left before node {} could answer", from, self.id);
            return;
        };

        info!("Election: node {} sending NACK to node {}", self.id, from);
        let veto = Envelope::Protocol(Message::Nack { from: self.id });
        if origin.deliver(veto).await.is_err() {
            debug!("Election: node {} closed its mailbox mid-round", from);
        }

        let epoch = self.current_epoch();
        if self.nominated_epoch == Some(epoch) {
            info!("Election: node {} already nominated itself this round, skipping", self.id);
            return;
        }
        self.nominated_epoch = Some(epoch);
        self.initiate_election().await;
    }

    /// A higher node vetoed us. Informational only: the higher node's
    /// own election will eventually produce the VICTORY.
    fn handle_nack(&mut self, from: NodeId) {
        info!("Election: node {} received NACK from node {}", self.id, from);
    }

    fn handle_victory(&mut self, from: NodeId) {
        info!("Election: node {} accepts node {} as coordinator", self.id, from);
        // A deposed coordinator keeps its own flag set; stale responses
        // are filtered by known_coordinator on arrival.
        self.known_coordinator = Some(from);
        self.nominated_epoch = None;
    }

    async fn become_coordinator(&mut self) {
        info!("Victory: node {} won the election and is announcing victory", self.id);
        self.is_coordinator = true;
        self.known_coordinator = Some(self.id);
        self.nominated_epoch = None;

        for (peer, outbox) in self.registry.broadcast_targets(self.id).await {
            let announce = Envelope::Protocol(Message::Victory { from: self.id });
            if outbox.deliver(announce).await.is_err() {
                debug!("Victory: node {} left before the announcement arrived", peer);
            }
        }
    }

    /// Coordinator side of a sync exchange: response first, then the
    /// acknowledgment that unblocks the requester's wait.
    async fn handle_sync_request(&mut self, from: NodeId, ack: oneshot::Sender<()>) {
        if !self.is_coordinator {
            debug!(
                "Sync: node {} is not the coordinator, dropping SYNC_REQUEST from node {}",
                self.id, from
            );
            return;
        }

        info!("Sync: coordinator {} sending its clock to node {}", self.id, from);
        let Some(requester) = self.registry.outbox(from).await else {
            debug!("Sync: requesting node {} left before the response", from);
            return;
        };

        let response = Envelope::Protocol(Message::SyncResponse {
            from: self.id,
            clock: self.clock.value(),
        });
        if requester.deliver(response).await.is_err() {
            debug!("Sync: requesting node {} closed its mailbox", from);
            return;
        }
        let _ = ack.send(());
    }

    fn handle_sync_response(&mut self, from: NodeId, clock: f64) {
        if self.known_coordinator != Some(from) {
            debug!("Sync: node {} discarding stale SYNC_RESPONSE from node {}", self.id, from);
            return;
        }
        info!("Sync: node {} updated its clock to {:.3} from coordinator {}", self.id, clock, from);
        self.clock.set(clock);
    }

    /// Requester side: probe the trusted coordinator and wait for its
    /// acknowledgment. A timeout means the coordinator is presumed dead
    /// and a new election starts right here.
    async fn request_sync(&mut self) -> Result<SyncOutcome, ClusterError> {
        let Some(coordinator) = self.known_coordinator else {
            warn!("Sync: node {} has no known coordinator", self.id);
            return Err(ClusterError::CoordinatorUnreachable(self.id));
        };

        if coordinator == self.id {
            // The coordinator's own clock is already the reference.
            info!("Sync: node {} is the coordinator, nothing to pull", self.id);
            return Ok(SyncOutcome::Serviced { coordinator });
        }

        let Some(target) = self.registry.outbox(coordinator).await else {
            // The coordinator departed gracefully. Reported as-is; a new
            // election is deliberately NOT started on this path, unlike
            // the timeout below.
            warn!(
                "Sync: node {}: known coordinator {} is not registered",
                self.id, coordinator
            );
            return Err(ClusterError::CoordinatorUnreachable(self.id));
        };

        info!(
            "Sync: node {} sending SYNC_REQUEST to coordinator {}",
            self.id, coordinator
        );
        let (ack_tx, ack_rx) = oneshot::channel();
        let request = Envelope::Protocol(Message::SyncRequest {
            from: self.id,
            ack: ack_tx,
        });
        if target.deliver(request).await.is_err() {
            warn!("Sync: node {}: coordinator {} closed its mailbox", self.id, coordinator);
            return Err(ClusterError::CoordinatorUnreachable(self.id));
        }

        // A crashed coordinator drops the request and with it the ack
        // sender. That has to read as silence, not as a wake-up.
        let acked = async move {
            match ack_rx.await {
                Ok(()) => {}
                Err(_) => std::future::pending::<()>().await,
            }
        };
        let timeout = self.config.sync_timeout;

        tokio::select! {
            _ = acked => {
                info!(
                    "Sync: node {} received acknowledgment from coordinator {}",
                    self.id, coordinator
                );
                Ok(SyncOutcome::Serviced { coordinator })
            }
            _ = sleep(timeout) => {
                warn!(
                    "Sync: node {} timed out waiting for coordinator {}, starting an election",
                    self.id, coordinator
                );
                self.initiate_election().await;
                Ok(SyncOutcome::TimedOut { presumed_dead: coordinator })
            }
        }
    }
}

/// Drive one node until its termination signal fires or its mailbox
/// closes. The clock ticks in the same loop, so nothing else ever
/// touches the node's state.
pub async fn run_node(mut state: NodeState, mut mailbox: Mailbox, mut quit: oneshot::Receiver<()>) {
    let mut ticker = interval_at(
        Instant::now() + state.config.tick_interval,
        state.config.tick_interval,
    );
    // Ticks missed while handling a message are lost, not replayed.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    state.publish();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                state.clock.advance();
                state.publish();
            }
            envelope = mailbox.recv() => {
                match envelope {
                    Some(Envelope::Protocol(msg)) => state.handle_message(msg).await,
                    Some(Envelope::Admin(cmd)) => state.handle_admin(cmd).await,
                    None => break,
                }
                state.publish();
            }
            _ = &mut quit => {
                info!("Node {} shutting down", state.id);
                mailbox.close();
                break;
            }
        }
    }
}
