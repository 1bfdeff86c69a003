//! DNS-SD / mDNS discovery provider (spec §4.E, §6). Advertises
//! `_<peerGroupID>._tcp` and encodes the metadata map as TXT records, one
//! key/value pair per entry. Built on `mdns-sd`, the standard crate for this
//! in the Rust ecosystem (no example in this pack implements raw mDNS itself;
//! `other_examples/`'s mesh-discovery module explicitly calls out "real
//! implementation would use mdns-sd crate").
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{Error, Result};
use crate::discovery::peer::Peer;
use crate::discovery::provider::{Provider, ProviderEvent, ResolvedAddress, StateChange};

/// TXT record values are capped at 255 bytes per RFC 6763; this provider
/// rejects a metadata update that would violate that rather than truncate it.
pub const MAX_TXT_VALUE_LEN: usize = 255;

/// Registration name conflicts are retried with a numeric suffix, up to this
/// many times (spec §4.E).
const MAX_REGISTRATION_RETRIES: u32 = 100;

pub struct DnsSdProvider {
    peer_group_id: String,
    daemon: ServiceDaemon,
    events: UnboundedSender<ProviderEvent>,
    published: Mutex<Option<ServiceInfo>>,
}

impl DnsSdProvider {
    pub fn new(peer_group_id: impl Into<String>, events: UnboundedSender<ProviderEvent>) -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| Error::Network {
            code: crate::error::NetworkCode::DnsFailure,
            message: e.to_string(),
        })?;
        Ok(DnsSdProvider { peer_group_id: peer_group_id.into(), daemon, events, published: Mutex::new(None) })
    }

    fn service_type(&self) -> String {
        format!("_{}._tcp.local.", self.peer_group_id)
    }

    fn encode_metadata(metadata: &HashMap<String, Vec<u8>>) -> Result<HashMap<String, String>> {
        let mut txt = HashMap::new();
        for (key, value) in metadata {
            if value.len() > MAX_TXT_VALUE_LEN {
                return Err(Error::invalid_parameter(format!(
                    "TXT value for '{key}' exceeds {MAX_TXT_VALUE_LEN} bytes"
                )));
            }
            txt.insert(key.clone(), String::from_utf8_lossy(value).into_owned());
        }
        Ok(txt)
    }
}

#[async_trait]
impl Provider for DnsSdProvider {
    fn name(&self) -> &str {
        "dnssd"
    }

    async fn start_browsing(&self) -> Result<()> {
        let receiver = self.daemon.browse(&self.service_type()).map_err(|e| Error::Network {
            code: crate::error::NetworkCode::DnsFailure,
            message: e.to_string(),
        })?;
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Ok(event) = receiver.recv_async().await {
                match event {
                    ServiceEvent::ServiceResolved(info) => {
                        let mut peer = Peer::new("dnssd", info.get_fullname().to_string());
                        peer.connectable = true;
                        for (key, value) in info.get_properties().iter() {
                            peer.metadata.insert(key.key().to_string(), value.val().unwrap_or_default().to_vec());
                        }
                        let _ = events.send(ProviderEvent::PeerAdded { peer, more_coming: false });
                    }
                    ServiceEvent::ServiceRemoved(_ty, fullname) => {
                        let _ = events.send(ProviderEvent::PeerRemoved {
                            provider: "dnssd".into(),
                            peer_id: fullname,
                            more_coming: false,
                        });
                    }
                    ServiceEvent::SearchStarted(_) => {
                        let _ = events.send(ProviderEvent::BrowseStateChanged(StateChange {
                            active: true,
                            error: None,
                        }));
                    }
                    ServiceEvent::SearchStopped(_) => {
                        let _ = events.send(ProviderEvent::BrowseStateChanged(StateChange {
                            active: false,
                            error: None,
                        }));
                    }
                    _ => {}
                }
            }
        });
        Ok(())
    }

    async fn stop_browsing(&self) -> Result<()> {
        let _ = self.daemon.stop_browse(&self.service_type());
        Ok(())
    }

    async fn monitor_metadata(&self, _peer_id: &str, _enable: bool) -> Result<()> {
        // mDNS re-resolution already delivers metadata changes via `ServiceResolved`;
        // there's no separate per-peer subscription to arm.
        Ok(())
    }

    async fn resolve_url(&self, peer_id: &str) -> Result<ResolvedAddress> {
        Ok(ResolvedAddress { url: format!("ws://{peer_id}/_blipsync") })
    }

    async fn cancel_resolve_url(&self, _peer_id: &str) {}

    async fn start_publishing(
        &self,
        display_name: &str,
        port: u16,
        metadata: HashMap<String, Vec<u8>>,
    ) -> Result<()> {
        let txt = Self::encode_metadata(&metadata)?;
        let host = format!("{display_name}.local.");
        let mut attempt = 0u32;
        loop {
            let instance_name = if attempt == 0 { display_name.to_string() } else { format!("{display_name} {}", attempt + 1) };
            let info = ServiceInfo::new(&self.service_type(), &instance_name, &host, "", port, Some(txt.clone()))
                .map_err(|e| Error::invalid_parameter(e.to_string()))?;
            match self.daemon.register(info.clone()) {
                Ok(()) => {
                    *self.published.lock().unwrap() = Some(info);
                    return Ok(());
                }
                Err(_) if attempt < MAX_REGISTRATION_RETRIES => {
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(Error::conflict(e.to_string())),
            }
        }
    }

    async fn stop_publishing(&self) -> Result<()> {
        if let Some(info) = self.published.lock().unwrap().take() {
            let _ = self.daemon.unregister(info.get_fullname());
        }
        Ok(())
    }

    async fn update_metadata(&self, metadata: HashMap<String, Vec<u8>>) -> Result<()> {
        let txt = Self::encode_metadata(&metadata)?;
        if let Some(info) = self.published.lock().unwrap().as_ref() {
            let _ = self.daemon.set_properties(&self.service_type(), &mut info.clone(), txt);
        }
        Ok(())
    }

    async fn shutdown(&self) {
        let _ = self.stop_browsing().await;
        let _ = self.stop_publishing().await;
        let _ = self.daemon.shutdown();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_metadata_rejects_oversized_txt_value() {
        let mut metadata = HashMap::new();
        metadata.insert("blob".to_string(), vec![0u8; MAX_TXT_VALUE_LEN + 1]);
        assert!(DnsSdProvider::encode_metadata(&metadata).is_err());
    }

    #[test]
    fn encode_metadata_accepts_max_length_value() {
        let mut metadata = HashMap::new();
        metadata.insert("blob".to_string(), vec![0u8; MAX_TXT_VALUE_LEN]);
        assert!(DnsSdProvider::encode_metadata(&metadata).is_ok());
    }
}
