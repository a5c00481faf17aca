//! Shared cluster registry: the identity-to-mailbox directory
//!
//! The registry is the one structure touched by every node task and
//! every administrative call. All iteration and mutation goes through
//! a single `RwLock`; lookups clone the cheap handles out so that no
//! guard is ever held across a mailbox send.

use crate::mailbox::Outbox;
use crate::types::{NodeId, NodeStatus, PublishedState};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Registered peer: where to deliver, plus the node's published state
#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub outbox: Outbox,
    pub published: watch::Receiver<PublishedState>,
}

/// Higher-identity peer as observed at lookup time
#[derive(Debug, Clone)]
pub struct HigherPeer {
    pub id: NodeId,
    pub dead: bool,
    pub outbox: Outbox,
}

/// Identity-ordered directory of all registered nodes, crashed ones
/// included. Graceful removal deletes an entry; kill does not.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<BTreeMap<NodeId, PeerHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node. At most one entry per identity; identities are
    /// never reused, so this cannot displace a live peer.
    pub async fn insert(&self, id: NodeId, handle: PeerHandle) {
        self.inner.write().await.insert(id, handle);
    }

    /// Delete an entry (graceful removal)
    pub async fn remove(&self, id: NodeId) -> Option<PeerHandle> {
        self.inner.write().await.remove(&id)
    }

    /// Full handle for one identity
    pub async fn peer(&self, id: NodeId) -> Option<PeerHandle> {
        self.inner.read().await.get(&id).cloned()
    }

    /// Delivery handle for one identity
    pub async fn outbox(&self, id: NodeId) -> Option<Outbox> {
        self.inner.read().await.get(&id).map(|h| h.outbox.clone())
    }

    /// Peers with strictly higher identity, with their published dead
    /// flag at lookup time
    pub async fn higher_peers(&self, id: NodeId) -> Vec<HigherPeer> {
        use std::ops::Bound;
        let map = self.inner.read().await;
        map.range((Bound::Excluded(id), Bound::Unbounded))
            .map(|(peer_id, handle)| HigherPeer {
                id: *peer_id,
                dead: handle.published.borrow().dead,
                outbox: handle.outbox.clone(),
            })
            .collect()
    }

    /// Delivery handles for every node except `exclude`
    pub async fn broadcast_targets(&self, exclude: NodeId) -> Vec<(NodeId, Outbox)> {
        let map = self.inner.read().await;
        map.iter()
            .filter(|(peer_id, _)| **peer_id != exclude)
            .map(|(peer_id, handle)| (*peer_id, handle.outbox.clone()))
            .collect()
    }

    /// Snapshots of all nodes, ordered by identity, projected against
    /// the given election epoch
    pub async fn statuses(&self, epoch: u64) -> Vec<NodeStatus> {
        let map = self.inner.read().await;
        map.values()
            .map(|handle| handle.published.borrow().status(epoch))
            .collect()
    }

    /// Drop every entry (cluster shutdown)
    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::{mailbox, Mailbox};

    fn test_handle(id: NodeId, dead: bool) -> (PeerHandle, Mailbox, watch::Sender<PublishedState>) {
        let (outbox, inbound) = mailbox(8);
        let mut state = PublishedState::initial(id);
        state.dead = dead;
        let (tx, rx) = watch::channel(state);
        (
            PeerHandle {
                outbox,
                published: rx,
            },
            inbound,
            tx,
        )
    }

    #[tokio::test]
    async fn test_insert_lookup_remove() {
        let registry = Registry::new();
        let (handle, _inbound, _tx) = test_handle(3, false);
        registry.insert(3, handle).await;

        assert!(registry.peer(3).await.is_some());
        assert!(registry.outbox(3).await.is_some());
        assert!(registry.peer(4).await.is_none());

        assert!(registry.remove(3).await.is_some());
        assert!(registry.peer(3).await.is_none());
        assert!(registry.remove(3).await.is_none());
    }

    #[tokio::test]
    async fn test_higher_peers_are_strictly_higher() {
        let registry = Registry::new();
        let mut keep = Vec::new();
        for id in 0..5 {
            let (handle, inbound, tx) = test_handle(id, id == 3);
            registry.insert(id, handle).await;
            keep.push((inbound, tx));
        }

        let higher = registry.higher_peers(2).await;
        let ids: Vec<NodeId> = higher.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![3, 4]);
        assert!(higher[0].dead);
        assert!(!higher[1].dead);

        assert!(registry.higher_peers(4).await.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_targets_exclude_sender() {
        let registry = Registry::new();
        let mut keep = Vec::new();
        for id in 0..3 {
            let (handle, inbound, tx) = test_handle(id, false);
            registry.insert(id, handle).await;
            keep.push((inbound, tx));
        }

        let targets = registry.broadcast_targets(1).await;
        let ids: Vec<NodeId> = targets.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![0, 2]);
    }

    #[tokio::test]
    async fn test_statuses_ordered_by_identity() {
        let registry = Registry::new();
        let mut keep = Vec::new();
        for id in [4u32, 0, 2] {
            let (handle, inbound, tx) = test_handle(id, false);
            registry.insert(id, handle).await;
            keep.push((inbound, tx));
        }

        let statuses = registry.statuses(0).await;
        let ids: Vec<NodeId> = statuses.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 2, 4]);
    }
}
