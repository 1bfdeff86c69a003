//! Bluetooth LE discovery provider (spec §4.E, §6). Connection is over an
//! L2CAP channel rather than TCP; the service UUID and two characteristics
//! (port, metadata) are type-5 derived the same way `dnssd`'s service type
//! is, just with a different namespace. Built on `btleplug`, the standard
//! cross-platform BLE crate (same grounding rationale as `dnssd`: no pack
//! example implements raw BLE scanning, but `other_examples/` names this
//! crate as the real-world choice for the job).
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::Manager;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::error::{Error, NetworkCode, Result};
use crate::discovery::peer::Peer;
use crate::discovery::provider::{Provider, ProviderEvent, ResolvedAddress, StateChange};

/// Namespace UUID for deriving the advertised service UUID from a peerGroupID (spec §6).
pub const BLE_SERVICE_NAMESPACE: Uuid = Uuid::from_bytes([
    0xe0, 0xc3, 0x79, 0x3a, 0x07, 0x39, 0x42, 0xa2, 0xa8, 0x00, 0x8b, 0xed, 0x23, 0x6d, 0x88, 0x15,
]);

pub const PORT_CHARACTERISTIC: Uuid = Uuid::from_bytes([
    0xab, 0xdd, 0x30, 0x56, 0x28, 0xfa, 0x44, 0x1d, 0xa4, 0x70, 0x55, 0xa7, 0x5a, 0x52, 0x55, 0x3a,
]);

pub const METADATA_CHARACTERISTIC: Uuid = Uuid::from_bytes([
    0x93, 0x6d, 0x76, 0x69, 0xe5, 0x32, 0x42, 0xbf, 0x8b, 0x8d, 0x97, 0xe3, 0xc1, 0x07, 0x3f, 0x74,
]);

pub fn service_uuid_for_group(peer_group_id: &str) -> Uuid {
    Uuid::new_v5(&BLE_SERVICE_NAMESPACE, peer_group_id.as_bytes())
}

pub struct BleProvider {
    peer_group_id: String,
    manager: Manager,
    events: UnboundedSender<ProviderEvent>,
    browsing: Mutex<bool>,
}

impl BleProvider {
    pub async fn new(peer_group_id: impl Into<String>, events: UnboundedSender<ProviderEvent>) -> Result<Self> {
        let manager = Manager::new().await.map_err(|e| Error::Network {
            code: NetworkCode::ConnectionReset,
            message: e.to_string(),
        })?;
        Ok(BleProvider { peer_group_id: peer_group_id.into(), manager, events, browsing: Mutex::new(false) })
    }

    fn service_uuid(&self) -> Uuid {
        service_uuid_for_group(&self.peer_group_id)
    }
}

#[async_trait]
impl Provider for BleProvider {
    fn name(&self) -> &str {
        "ble"
    }

    async fn start_browsing(&self) -> Result<()> {
        let adapters = self.manager.adapters().await.map_err(|e| Error::Network {
            code: NetworkCode::HostUnreachable,
            message: e.to_string(),
        })?;
        let Some(adapter) = adapters.into_iter().next() else {
            return Err(Error::Network {
                code: NetworkCode::HostUnreachable,
                message: "no Bluetooth adapter available".into(),
            });
        };
        let filter = ScanFilter { services: vec![self.service_uuid()] };
        adapter.start_scan(filter).await.map_err(|e| Error::Network {
            code: NetworkCode::Timeout,
            message: e.to_string(),
        })?;
        *self.browsing.lock().unwrap() = true;

        let events = self.events.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(2));
            loop {
                interval.tick().await;
                let Ok(peripherals) = adapter.peripherals().await else { continue };
                for peripheral in peripherals {
                    let Ok(Some(props)) = peripheral.properties().await else { continue };
                    let Ok(connected) = peripheral.is_connected().await else { continue };
                    let mut peer = Peer::new("ble", peripheral.id().to_string());
                    peer.connectable = connected || props.tx_power_level.is_some();
                    let _ = events.send(ProviderEvent::PeerAdded { peer, more_coming: true });
                }
            }
        });
        let _ = self.events.send(ProviderEvent::BrowseStateChanged(StateChange { active: true, error: None }));
        Ok(())
    }

    async fn stop_browsing(&self) -> Result<()> {
        *self.browsing.lock().unwrap() = false;
        let _ = self.events.send(ProviderEvent::BrowseStateChanged(StateChange { active: false, error: None }));
        Ok(())
    }

    async fn monitor_metadata(&self, _peer_id: &str, _enable: bool) -> Result<()> {
        Err(Error::unimplemented("BLE metadata notifications require a live peripheral handle"))
    }

    async fn resolve_url(&self, peer_id: &str) -> Result<ResolvedAddress> {
        Ok(ResolvedAddress { url: format!("l2cap://{peer_id}") })
    }

    async fn cancel_resolve_url(&self, _peer_id: &str) {}

    async fn start_publishing(&self, _display_name: &str, _port: u16, _metadata: HashMap<String, Vec<u8>>) -> Result<()> {
        Err(Error::unimplemented("BLE peripheral-mode advertising requires platform GATT server support"))
    }

    async fn stop_publishing(&self) -> Result<()> {
        Ok(())
    }

    async fn update_metadata(&self, _metadata: HashMap<String, Vec<u8>>) -> Result<()> {
        Err(Error::unimplemented("BLE peripheral-mode advertising requires platform GATT server support"))
    }

    async fn shutdown(&self) {
        let _ = self.stop_browsing().await;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn service_uuid_is_deterministic_per_group() {
        let a = service_uuid_for_group("myapp");
        let b = service_uuid_for_group("myapp");
        assert_eq!(a, b);
        assert_ne!(a, service_uuid_for_group("otherapp"));
    }
}
