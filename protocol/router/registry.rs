// Route Registry - Per-chain routing and trust configuration
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{Address, BridgeError, BridgeEvent, ChainId, EventLog};

struct RegistryState {
    admin: Address,
    routes: HashMap<ChainId, Address>,
    trusted_remotes: HashMap<ChainId, Address>,
}

/// Keyed configuration store. Every mutation checks the administrator identity.
#[derive(Clone)]
pub struct RouteRegistry {
    state: Arc<RwLock<RegistryState>>,
    events: EventLog,
}

impl RouteRegistry {
    pub fn new(admin: Address, events: EventLog) -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState {
                admin,
                routes: HashMap::new(),
                trusted_remotes: HashMap::new(),
            })),
            events,
        }
    }

    pub fn events(&self) -> EventLog {
        self.events.clone()
    }

    pub async fn admin(&self) -> Address {
        self.state.read().await.admin
    }

    pub async fn ensure_admin(&self, caller: Address) -> Result<(), BridgeError> {
        if self.state.read().await.admin != caller {
            tracing::warn!(?caller, "rejected administrative call");
            return Err(BridgeError::Unauthorized(caller));
        }
        Ok(())
    }

    pub async fn set_route(
        &self,
        caller: Address,
        destination: ChainId,
        receiver: Address,
    ) -> Result<(), BridgeError> {
        {
            let mut state = self.state.write().await;
            if state.admin != caller {
                return Err(BridgeError::Unauthorized(caller));
            }
            state.routes.insert(destination, receiver);
        }

        tracing::info!(destination, ?receiver, "route updated");
        self.events
            .emit(BridgeEvent::RouteUpdated {
                destination,
                receiver,
            })
            .await;
        Ok(())
    }

    pub async fn route(&self, destination: ChainId) -> Option<Address> {
        self.state.read().await.routes.get(&destination).copied()
    }

    pub async fn require_route(&self, destination: ChainId) -> Result<Address, BridgeError> {
        self.route(destination)
            .await
            .ok_or(BridgeError::RouteNotSet(destination))
    }

    pub async fn set_trusted_remote(
        &self,
        caller: Address,
        chain: ChainId,
        remote: Address,
    ) -> Result<(), BridgeError> {
        {
            let mut state = self.state.write().await;
            if state.admin != caller {
                return Err(BridgeError::Unauthorized(caller));
            }
            state.trusted_remotes.insert(chain, remote);
        }

        tracing::info!(chain, ?remote, "trusted remote updated");
        self.events
            .emit(BridgeEvent::TrustedRemoteUpdated { chain, remote })
            .await;
        Ok(())
    }

    pub async fn trusted_remote(&self, chain: ChainId) -> Option<Address> {
        self.state.read().await.trusted_remotes.get(&chain).copied()
    }

    /// True only when an entry exists for `chain` and equals `origin`.
    pub async fn is_trusted_origin(&self, chain: ChainId, origin: Address) -> bool {
        self.trusted_remote(chain).await == Some(origin)
    }

    pub async fn transfer_admin(&self, caller: Address, next: Address) -> Result<(), BridgeError> {
        {
            let mut state = self.state.write().await;
            if state.admin != caller {
                return Err(BridgeError::Unauthorized(caller));
            }
            state.admin = next;
        }

        tracing::warn!(previous = ?caller, ?next, "administrator transferred");
        self.events
            .emit(BridgeEvent::AdminTransferred {
                previous: caller,
                next,
            })
            .await;
        Ok(())
    }

    /// Snapshot of all routes, sorted by chain id.
    pub async fn routes(&self) -> Vec<(ChainId, Address)> {
        let state = self.state.read().await;
        let mut routes: Vec<_> = state.routes.iter().map(|(c, a)| (*c, *a)).collect();
        routes.sort_by_key(|(chain, _)| *chain);
        routes
    }
}
