//! The abstract discovery-provider interface (spec §4.E): one implementation
//! per transport. Grounded in `original_source/C/Cpp_include/c4PeerDiscovery.hh`'s
//! provider vtable, translated to an `async_trait` the way the teacher's
//! `NetworkLayer` abstracts over transport concerns behind trait objects.
use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use super::peer::Peer;

/// A URL plus enough information for the caller to dial it; resolved by
/// [`Provider::resolve_url`].
#[derive(Debug, Clone)]
pub struct ResolvedAddress {
    pub url: String,
}

/// Reported by a provider when its browsing or publishing state changes.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub active: bool,
    pub error: Option<String>,
}

/// One peer-discovery transport (DNS-SD, Bluetooth LE, ...). Every provider
/// instance is owned exclusively by one [`super::manager::DiscoveryManager`]
/// and serializes its own work on a single per-provider task, mirroring the
/// spec's "all calls are serialized on a single per-provider event queue".
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn start_browsing(&self) -> Result<()>;
    async fn stop_browsing(&self) -> Result<()>;

    /// Subscribes (`enable=true`) or unsubscribes from a peer's metadata feed.
    async fn monitor_metadata(&self, peer_id: &str, enable: bool) -> Result<()>;

    async fn resolve_url(&self, peer_id: &str) -> Result<ResolvedAddress>;
    async fn cancel_resolve_url(&self, peer_id: &str);

    async fn start_publishing(
        &self,
        display_name: &str,
        port: u16,
        metadata: HashMap<String, Vec<u8>>,
    ) -> Result<()>;
    async fn stop_publishing(&self) -> Result<()>;
    async fn update_metadata(&self, metadata: HashMap<String, Vec<u8>>) -> Result<()>;

    /// Stops everything. After this resolves the provider must not report any
    /// further peer events (spec: "must stop reporting new peers").
    async fn shutdown(&self);
}

/// What a provider hands the manager when a peer appears, changes, or leaves.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    BrowseStateChanged(StateChange),
    PublishStateChanged(StateChange),
    /// `more_coming = true` means the manager should accumulate this into the
    /// current batch rather than notifying observers immediately (spec §4.D).
    PeerAdded { peer: Peer, more_coming: bool },
    PeerRemoved { provider: String, peer_id: String, more_coming: bool },
    PeerMetadataChanged(Peer),
}
