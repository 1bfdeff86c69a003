//! Peer discovery manager (spec §4.D): owns provider instances, aggregates
//! their peer events into `MetaPeer`s, and debounces burst notifications
//! into single `AddedPeers`/`RemovedPeers` batches. Grounded in the shape of
//! the teacher's `NetworkLayer`/`NetworkHandle` split
//! (`src/network/layer/{mod,runtime}.rs`, `src/network/handle.rs`): a handle
//! type exposes the public API, backed by a task that owns the real state and
//! drains provider events from an mpsc channel.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::actor::{Actor, Mailbox, Timer, TimerWheel};
use crate::error::{Error, Result};
use crate::observer::{ObserverList, Subscription};

use super::meta_peer::MetaPeer;
use super::peer::{provisional_peer_id, Peer, PeerGroupID, PeerID};
use super::provider::{Provider, ProviderEvent, StateChange};

/// Debounce window for flushing a peer batch that stalled mid-burst (spec
/// §4.D: "or when a timer debounces stale batches").
const BATCH_DEBOUNCE: Duration = Duration::from_millis(50);

/// What observers of a [`DiscoveryManager`] are notified with (spec §4.D's
/// "Observer contract").
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    Browsing { provider: String, active: bool, error: Option<String> },
    Publishing { provider: String, active: bool, error: Option<String> },
    AddedPeers(Vec<Peer>),
    RemovedPeers(Vec<Peer>),
    PeerMetadataChanged(Peer),
}

/// The mailbox-owned state: every mutation of `meta_peers`/the pending
/// batches runs serialized inside this actor's task, so no lock is needed.
struct DiscoveryActor {
    meta_peers: HashMap<PeerID, Arc<MetaPeer>>,
    pending_added: Vec<Peer>,
    pending_removed: Vec<Peer>,
    observers: Arc<ObserverList<DiscoveryEvent>>,
}

impl Actor for DiscoveryActor {}

pub struct DiscoveryManager {
    peer_group_id: PeerGroupID,
    this_peer_id: PeerID,
    providers: HashMap<String, Arc<dyn Provider>>,
    mailbox: Mailbox<DiscoveryActor>,
    observers: Arc<ObserverList<DiscoveryEvent>>,
    timers: Arc<TimerWheel>,
    debounce_timer: std::sync::Mutex<Option<Timer>>,
    event_tx: mpsc::UnboundedSender<ProviderEvent>,
    _driver: tokio::task::JoinHandle<()>,
    _mailbox_task: tokio::task::JoinHandle<()>,
}

impl DiscoveryManager {
    /// The channel providers must be constructed with: callers create it
    /// first via this function, build their providers against the returned
    /// sender (some provider constructors are async, so this can't happen
    /// inside [`DiscoveryManager::new`] itself), then pass both halves in.
    pub fn event_channel() -> (mpsc::UnboundedSender<ProviderEvent>, mpsc::UnboundedReceiver<ProviderEvent>) {
        mpsc::unbounded_channel()
    }

    /// `events` must be the pair returned by [`DiscoveryManager::event_channel`],
    /// with `providers` constructed against its sender half.
    pub fn new(
        peer_group_id: PeerGroupID,
        this_peer_id: PeerID,
        providers: Vec<Arc<dyn Provider>>,
        events: (mpsc::UnboundedSender<ProviderEvent>, mpsc::UnboundedReceiver<ProviderEvent>),
        timers: Arc<TimerWheel>,
    ) -> Arc<Self> {
        let (event_tx, mut event_rx) = events;
        let providers: HashMap<String, Arc<dyn Provider>> =
            providers.into_iter().map(|p| (p.name().to_string(), p)).collect();
        let observers = Arc::new(ObserverList::new());

        let actor = DiscoveryActor {
            meta_peers: HashMap::new(),
            pending_added: Vec::new(),
            pending_removed: Vec::new(),
            observers: observers.clone(),
        };
        let (mailbox, mailbox_task) = Mailbox::spawn(actor, timers.clone(), "discovery");

        let driver_mailbox = mailbox.clone();
        let driver = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                let mailbox = driver_mailbox.clone();
                mailbox.enqueue(move |actor| Self::handle_event(actor, event));
            }
        });

        Arc::new(DiscoveryManager {
            peer_group_id,
            this_peer_id,
            providers,
            mailbox,
            observers,
            timers,
            debounce_timer: std::sync::Mutex::new(None),
            event_tx,
            _driver: driver,
            _mailbox_task: mailbox_task,
        })
    }

    pub fn peer_group_id(&self) -> &PeerGroupID {
        &self.peer_group_id
    }

    pub fn this_peer_id(&self) -> PeerID {
        self.this_peer_id
    }

    /// A channel each provider implementation should be given so it can push
    /// events back into this manager.
    pub fn event_sender(&self) -> mpsc::UnboundedSender<ProviderEvent> {
        self.event_tx.clone()
    }

    pub async fn start_browsing(&self) -> Result<()> {
        for provider in self.providers.values() {
            provider.start_browsing().await?;
        }
        Ok(())
    }

    pub async fn stop_browsing(&self) -> Result<()> {
        for provider in self.providers.values() {
            provider.stop_browsing().await?;
        }
        Ok(())
    }

    pub async fn start_publishing(
        &self,
        display_name: &str,
        port: u16,
        metadata: HashMap<String, Vec<u8>>,
    ) -> Result<()> {
        for provider in self.providers.values() {
            provider.start_publishing(display_name, port, metadata.clone()).await?;
        }
        Ok(())
    }

    pub async fn stop_publishing(&self) -> Result<()> {
        for provider in self.providers.values() {
            provider.stop_publishing().await?;
        }
        Ok(())
    }

    pub async fn update_metadata(&self, metadata: HashMap<String, Vec<u8>>) -> Result<()> {
        for provider in self.providers.values() {
            provider.update_metadata(metadata.clone()).await?;
        }
        Ok(())
    }

    /// A snapshot of every currently-online peer across all providers.
    pub async fn peers(&self) -> Vec<Peer> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.mailbox.enqueue(move |actor| {
            let peers = actor.meta_peers.values().flat_map(|m| m.peers()).filter(|p| p.online).collect();
            let _ = tx.send(peers);
        });
        rx.await.unwrap_or_default()
    }

    pub async fn peer_with_id(&self, id: PeerID) -> Option<Arc<MetaPeer>> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.mailbox.enqueue(move |actor| {
            let _ = tx.send(actor.meta_peers.get(&id).cloned());
        });
        rx.await.ok().flatten()
    }

    pub fn add_observer(
        &self,
        callback: impl Fn(&DiscoveryEvent) + Send + Sync + 'static,
    ) -> Subscription<DiscoveryEvent> {
        self.observers.subscribe(callback)
    }

    /// Instructs every provider to stop, in parallel, then waits for all of
    /// them (spec §4.D: "waits for a completion callback from each").
    pub async fn shutdown(&self) {
        let shutdowns = self.providers.values().map(|p| p.shutdown());
        futures::future::join_all(shutdowns).await;
    }

    /// Applied on the actor's own mailbox, so no lock is needed: events
    /// from every provider are serialized through the same single-threaded
    /// queue (spec §4.A).
    fn handle_event(actor: &mut DiscoveryActor, event: ProviderEvent) {
        match event {
            ProviderEvent::BrowseStateChanged(StateChange { active, error }) => {
                actor.observers.notify(&DiscoveryEvent::Browsing {
                    provider: String::new(),
                    active,
                    error,
                });
            }
            ProviderEvent::PublishStateChanged(StateChange { active, error }) => {
                actor.observers.notify(&DiscoveryEvent::Publishing {
                    provider: String::new(),
                    active,
                    error,
                });
            }
            ProviderEvent::PeerAdded { peer, more_coming } => {
                let id = provisional_peer_id(&peer.provider, &peer.id);
                actor
                    .meta_peers
                    .entry(id)
                    .and_modify(|m| m.add_peer(peer.clone()))
                    .or_insert_with(|| Arc::new(MetaPeer::new(id, peer.clone())));
                actor.pending_added.push(peer);
                if !more_coming {
                    Self::flush(actor);
                }
            }
            ProviderEvent::PeerRemoved { provider, peer_id, more_coming } => {
                let id = provisional_peer_id(&provider, &peer_id);
                let mut removed = None;
                if let Some(meta) = actor.meta_peers.get(&id) {
                    if let Some(mut peer) = meta.peers().into_iter().find(|p| p.id == peer_id) {
                        peer.mark_offline();
                        meta.remove_peer(&provider, &peer_id);
                        removed = Some(peer);
                    }
                    if meta.is_empty() {
                        actor.meta_peers.remove(&id);
                    }
                }
                if let Some(peer) = removed {
                    actor.pending_removed.push(peer);
                }
                if !more_coming {
                    Self::flush(actor);
                }
            }
            ProviderEvent::PeerMetadataChanged(peer) => {
                actor.observers.notify(&DiscoveryEvent::PeerMetadataChanged(peer));
            }
        }
    }

    fn flush(actor: &mut DiscoveryActor) {
        if !actor.pending_added.is_empty() {
            actor.observers.notify(&DiscoveryEvent::AddedPeers(std::mem::take(&mut actor.pending_added)));
        }
        if !actor.pending_removed.is_empty() {
            actor.observers.notify(&DiscoveryEvent::RemovedPeers(std::mem::take(&mut actor.pending_removed)));
        }
    }

    /// Arms (or rearms) the stale-batch debounce timer. Providers that start
    /// a burst but stop calling back before setting `more_coming=false` would
    /// otherwise hold peers in limbo forever.
    pub fn arm_batch_debounce(self: &Arc<Self>) {
        let mailbox = self.mailbox.clone();
        let timer = Timer::new(self.timers.clone(), move || {
            let mailbox = mailbox.clone();
            mailbox.enqueue(|actor| Self::flush(actor));
        });
        timer.auto_delete();
        timer.fire_after(BATCH_DEBOUNCE);
        *self.debounce_timer.lock().unwrap() = Some(timer);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoopProvider {
        name: &'static str,
    }

    #[async_trait]
    impl Provider for NoopProvider {
        fn name(&self) -> &str {
            self.name
        }
        async fn start_browsing(&self) -> Result<()> {
            Ok(())
        }
        async fn stop_browsing(&self) -> Result<()> {
            Ok(())
        }
        async fn monitor_metadata(&self, _peer_id: &str, _enable: bool) -> Result<()> {
            Ok(())
        }
        async fn resolve_url(&self, _peer_id: &str) -> Result<super::super::provider::ResolvedAddress> {
            Err(Error::unimplemented("no-op provider"))
        }
        async fn cancel_resolve_url(&self, _peer_id: &str) {}
        async fn start_publishing(
            &self,
            _display_name: &str,
            _port: u16,
            _metadata: HashMap<String, Vec<u8>>,
        ) -> Result<()> {
            Ok(())
        }
        async fn stop_publishing(&self) -> Result<()> {
            Ok(())
        }
        async fn update_metadata(&self, _metadata: HashMap<String, Vec<u8>>) -> Result<()> {
            Ok(())
        }
        async fn shutdown(&self) {}
    }

    fn manager() -> Arc<DiscoveryManager> {
        let timers = TimerWheel::new();
        let events = DiscoveryManager::event_channel();
        DiscoveryManager::new(
            PeerGroupID::new("testapp").unwrap(),
            PeerID([0; 16]),
            vec![Arc::new(NoopProvider { name: "dnssd" })],
            events,
            timers,
        )
    }

    #[tokio::test]
    async fn batch_with_more_coming_false_flushes_immediately() {
        let mgr = manager();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let _sub = mgr.add_observer(move |event| {
            if let DiscoveryEvent::AddedPeers(peers) = event {
                c.fetch_add(peers.len(), Ordering::SeqCst);
            }
        });
        let tx = mgr.event_sender();
        tx.send(ProviderEvent::PeerAdded { peer: Peer::new("dnssd", "a"), more_coming: true }).unwrap();
        tx.send(ProviderEvent::PeerAdded { peer: Peer::new("dnssd", "b"), more_coming: false }).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn peers_snapshot_reflects_additions() {
        let mgr = manager();
        let tx = mgr.event_sender();
        tx.send(ProviderEvent::PeerAdded { peer: Peer::new("dnssd", "a"), more_coming: false }).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let peers = mgr.peers().await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].id, "a");
    }
}
