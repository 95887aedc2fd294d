//! Peer registry module
//!
//! Keeps every live peer reachable by address and by identifier. Both
//! indices sit behind a single lock so a peer is always present in both or
//! in neither.

use crate::error::RelayError;
use crate::peer::{Peer, PeerAddr, PeerHandle, PeerId};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Default)]
struct Indices {
    by_addr: HashMap<PeerAddr, Peer>,
    by_id: HashMap<PeerId, PeerAddr>,
}

impl Indices {
    fn get_by_id(&self, id: &PeerId) -> Option<&Peer> {
        self.by_id.get(id).and_then(|addr| self.by_addr.get(addr))
    }

    fn insert(&mut self, handle: PeerHandle, addr: PeerAddr, id: PeerId) -> Peer {
        // An identifier held by another address would leave that peer
        // reachable by address only, so it goes entirely.
        if let Some(owner) = self.by_id.get(&id).cloned() {
            if owner != addr {
                warn!("Identifier {} taken over from {} by {}", id, owner, addr);
                self.by_addr.remove(&owner);
            }
        }

        let peer = match self.by_addr.get_mut(&addr) {
            Some(existing) => {
                if existing.id != id {
                    debug!("Peer {} renamed: {} -> {}", addr, existing.id, id);
                    self.by_id.remove(&existing.id);
                }
                existing.id = id.clone();
                existing.handle = handle;
                existing.clone()
            }
            None => {
                let peer = Peer::new(addr.clone(), id.clone(), handle);
                self.by_addr.insert(addr.clone(), peer.clone());
                peer
            }
        };

        self.by_id.insert(id, addr);
        peer
    }
}

/// Concurrent index of live peers
#[derive(Debug, Default)]
pub struct PeerRegistry {
    indices: RwLock<Indices>,
}

impl PeerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the peer currently registered under `id`
    pub async fn lookup_by_id(&self, id: &PeerId) -> Option<Peer> {
        self.indices.read().await.get_by_id(id).cloned()
    }

    /// Look up the peer registered for the connection at `addr`
    pub async fn lookup_by_address(&self, addr: &PeerAddr) -> Option<Peer> {
        self.indices.read().await.by_addr.get(addr).cloned()
    }

    /// Register `id` for `addr`, or update the existing entry for `addr` in place
    ///
    /// Does not check identifier uniqueness; use [`PeerRegistry::try_register`]
    /// when the identifier comes from a client.
    pub async fn register(&self, handle: PeerHandle, addr: PeerAddr, id: PeerId) -> Peer {
        let mut indices = self.indices.write().await;
        let peer = indices.insert(handle, addr, id);
        info!("Registered peer: {} (total: {})", peer, indices.by_addr.len());
        peer
    }

    /// Register `id` for `addr` unless another peer already holds `id`
    ///
    /// The check and the insert happen under one write lock, so of two
    /// concurrent calls with the same identifier at most one succeeds.
    pub async fn try_register(&self, handle: PeerHandle, addr: PeerAddr, id: PeerId) -> Result<Peer, RelayError> {
        let mut indices = self.indices.write().await;
        if indices.by_id.contains_key(&id) {
            trace!("Identifier {} already registered, rejecting {}", id, addr);
            return Err(RelayError::name_taken(id.as_str()));
        }

        let peer = indices.insert(handle, addr, id);
        info!("Registered peer: {} (total: {})", peer, indices.by_addr.len());
        Ok(peer)
    }

    /// Remove the peer at `addr` from both indices; absent peers are ignored
    pub async fn unregister(&self, addr: &PeerAddr) -> Option<Peer> {
        let mut indices = self.indices.write().await;
        let peer = indices.by_addr.remove(addr)?;
        if indices.by_id.get(&peer.id) == Some(addr) {
            indices.by_id.remove(&peer.id);
        }
        info!("Removed peer: {} (remaining: {})", peer, indices.by_addr.len());
        Some(peer)
    }

    /// Snapshot of all registered peers, in no particular order
    pub async fn list_all(&self) -> Vec<Peer> {
        self.indices.read().await.by_addr.values().cloned().collect()
    }

    /// Number of registered peers
    pub async fn len(&self) -> usize {
        self.indices.read().await.by_addr.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
