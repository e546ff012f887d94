//! In-memory repositories. Both repositories of a [`MemoryStore`] share one
//! lock over the gateway and device tables, so the constraints of the
//! Postgres schema hold across them: unique serial numbers, IPv4 addresses
//! and device UIDs, devices only referencing existing gateways, and devices
//! detached when their gateway is deleted.

use crate::errors::{Error, Result};
use crate::model::{Gateway, PeripheralDevice};
use crate::repository::{DeviceRepository, GatewayRepository};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    gateways: Vec<Gateway>,
    devices: Vec<PeripheralDevice>,
}

impl Tables {
    fn check_gateway_unique(&self, candidate: &Gateway) -> Result<()> {
        if self
            .gateways
            .iter()
            .any(|g| g.serial_number == candidate.serial_number)
        {
            return Err(Error::duplicate_serial_number());
        }
        self.check_ipv4_free(candidate)
    }

    fn check_ipv4_free(&self, candidate: &Gateway) -> Result<()> {
        let taken = self
            .gateways
            .iter()
            .any(|g| g.id != candidate.id && g.ipv4_address == candidate.ipv4_address);
        if taken {
            return Err(Error::duplicate_ipv4_address());
        }
        Ok(())
    }

    fn check_device(&self, candidate: &PeripheralDevice) -> Result<()> {
        if self
            .devices
            .iter()
            .any(|d| d.uid == candidate.uid && d.id != candidate.id)
        {
            return Err(Error::duplicate_uid(candidate.uid));
        }
        match candidate.gateway_id {
            Some(gateway_id) if !self.gateways.iter().any(|g| g.id == gateway_id) => {
                Err(Error::gateway_not_found())
            }
            _ => Ok(()),
        }
    }
}

/// Shared tables behind a pair of memory repositories
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gateways(&self) -> MemoryGatewayRepository {
        MemoryGatewayRepository {
            tables: self.tables.clone(),
        }
    }

    pub fn devices(&self) -> MemoryDeviceRepository {
        MemoryDeviceRepository {
            tables: self.tables.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryGatewayRepository {
    tables: Arc<RwLock<Tables>>,
}

#[async_trait]
impl GatewayRepository for MemoryGatewayRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Gateway>> {
        let tables = self.tables.read().await;
        Ok(tables.gateways.iter().find(|g| g.id == id).cloned())
    }

    async fn find_by_serial_number(&self, serial_number: &str) -> Result<Option<Gateway>> {
        let tables = self.tables.read().await;
        Ok(tables
            .gateways
            .iter()
            .find(|g| g.serial_number == serial_number)
            .cloned())
    }

    async fn find_by_ipv4_address(&self, ipv4_address: &str) -> Result<Option<Gateway>> {
        let tables = self.tables.read().await;
        Ok(tables
            .gateways
            .iter()
            .find(|g| g.ipv4_address == ipv4_address)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Gateway>> {
        Ok(self.tables.read().await.gateways.clone())
    }

    async fn create(&self, gateway: Gateway) -> Result<Gateway> {
        let mut tables = self.tables.write().await;
        tables.check_gateway_unique(&gateway)?;
        tables.gateways.push(gateway.clone());
        Ok(gateway)
    }

    async fn save(&self, gateway: Gateway) -> Result<Gateway> {
        let mut tables = self.tables.write().await;
        tables.check_ipv4_free(&gateway)?;
        let row = tables
            .gateways
            .iter_mut()
            .find(|g| g.id == gateway.id)
            .ok_or_else(Error::gateway_not_found)?;

        row.name = gateway.name;
        row.ipv4_address = gateway.ipv4_address;
        row.status = gateway.status;
        row.location = gateway.location;
        row.updated_at = gateway.updated_at;
        Ok(row.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.gateways.len();
        tables.gateways.retain(|g| g.id != id);
        if tables.gateways.len() == before {
            return Ok(false);
        }

        for device in tables.devices.iter_mut() {
            if device.gateway_id == Some(id) {
                device.gateway_id = None;
            }
        }
        Ok(true)
    }
}

#[derive(Debug, Clone)]
pub struct MemoryDeviceRepository {
    tables: Arc<RwLock<Tables>>,
}

#[async_trait]
impl DeviceRepository for MemoryDeviceRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<PeripheralDevice>> {
        let tables = self.tables.read().await;
        Ok(tables.devices.iter().find(|d| d.id == id).cloned())
    }

    async fn find_by_uid(&self, uid: i64) -> Result<Option<PeripheralDevice>> {
        let tables = self.tables.read().await;
        Ok(tables.devices.iter().find(|d| d.uid == uid).cloned())
    }

    async fn list_by_gateways(&self, gateway_ids: &[Uuid]) -> Result<Vec<PeripheralDevice>> {
        let tables = self.tables.read().await;
        Ok(tables
            .devices
            .iter()
            .filter(|d| d.gateway_id.is_some_and(|id| gateway_ids.contains(&id)))
            .cloned()
            .collect())
    }

    async fn count_by_gateway(&self, gateway_id: Uuid) -> Result<u64> {
        let tables = self.tables.read().await;
        Ok(tables
            .devices
            .iter()
            .filter(|d| d.gateway_id == Some(gateway_id))
            .count() as u64)
    }

    async fn create(&self, device: PeripheralDevice) -> Result<PeripheralDevice> {
        let mut tables = self.tables.write().await;
        tables.check_device(&device)?;
        tables.devices.push(device.clone());
        Ok(device)
    }

    async fn save(&self, device: PeripheralDevice) -> Result<PeripheralDevice> {
        let mut tables = self.tables.write().await;
        tables.check_device(&device)?;
        let row = tables
            .devices
            .iter_mut()
            .find(|d| d.id == device.id)
            .ok_or_else(Error::device_not_found)?;
        *row = device;
        Ok(row.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeviceStatus, GatewayStatus, NewDevice, NewGateway};

    fn gateway(serial: &str, ip: &str) -> Gateway {
        Gateway::new(NewGateway {
            serial_number: serial.to_string(),
            name: "Gateway".to_string(),
            ipv4_address: ip.to_string(),
            status: GatewayStatus::Active,
            location: None,
        })
    }

    fn device(gateway_id: Uuid, uid: i64) -> PeripheralDevice {
        PeripheralDevice::attached(
            gateway_id,
            NewDevice {
                uid,
                vendor: "Vendor".to_string(),
                status: DeviceStatus::Online,
                last_seen_at: None,
            },
        )
    }

    #[tokio::test]
    async fn test_gateway_unique_indexes() {
        let repo = MemoryStore::new().gateways();
        repo.create(gateway("GW001", "10.0.0.1")).await.unwrap();

        let err = repo.create(gateway("GW001", "10.0.0.2")).await.unwrap_err();
        assert_eq!(err.to_string(), Error::duplicate_serial_number().to_string());

        let err = repo.create(gateway("GW002", "10.0.0.1")).await.unwrap_err();
        assert_eq!(err.to_string(), Error::duplicate_ipv4_address().to_string());
    }

    #[tokio::test]
    async fn test_save_never_writes_serial_number() {
        let repo = MemoryStore::new().gateways();
        let mut stored = repo.create(gateway("GW001", "10.0.0.1")).await.unwrap();

        stored.serial_number = "GW999".to_string();
        stored.name = "Renamed".to_string();
        let saved = repo.save(stored).await.unwrap();

        assert_eq!(saved.serial_number, "GW001");
        assert_eq!(saved.name, "Renamed");
    }

    #[tokio::test]
    async fn test_save_rejects_ip_taken_by_other_gateway() {
        let repo = MemoryStore::new().gateways();
        repo.create(gateway("GW001", "10.0.0.1")).await.unwrap();
        let mut second = repo.create(gateway("GW002", "10.0.0.2")).await.unwrap();

        second.ipv4_address = "10.0.0.1".to_string();
        assert!(matches!(repo.save(second).await, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_list_preserves_insertion_order() {
        let repo = MemoryStore::new().gateways();
        for i in 1..=3 {
            repo.create(gateway(&format!("GW00{}", i), &format!("10.0.0.{}", i)))
                .await
                .unwrap();
        }

        let serials: Vec<String> = repo
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|g| g.serial_number)
            .collect();
        assert_eq!(serials, vec!["GW001", "GW002", "GW003"]);
    }

    #[tokio::test]
    async fn test_device_uid_unique_and_counts() {
        let store = MemoryStore::new();
        let gateways = store.gateways();
        let repo = store.devices();
        let gw_a = gateways.create(gateway("GW001", "10.0.0.1")).await.unwrap().id;
        let gw_b = gateways.create(gateway("GW002", "10.0.0.2")).await.unwrap().id;

        repo.create(device(gw_a, 1)).await.unwrap();
        repo.create(device(gw_a, 2)).await.unwrap();
        assert!(matches!(
            repo.create(device(gw_b, 1)).await,
            Err(Error::Conflict(_))
        ));

        assert_eq!(repo.count_by_gateway(gw_a).await.unwrap(), 2);
        assert_eq!(repo.count_by_gateway(gw_b).await.unwrap(), 0);
        assert_eq!(repo.list_by_gateways(&[gw_a, gw_b]).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_reports_missing_rows() {
        let repo = MemoryStore::new().gateways();
        let stored = repo.create(gateway("GW001", "10.0.0.1")).await.unwrap();

        assert!(repo.delete(stored.id).await.unwrap());
        assert!(!repo.delete(stored.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_detaches_remaining_devices() {
        let store = MemoryStore::new();
        let gateways = store.gateways();
        let devices = store.devices();
        let gw = gateways.create(gateway("GW001", "10.0.0.1")).await.unwrap();
        let attached = devices.create(device(gw.id, 7)).await.unwrap();

        assert!(gateways.delete(gw.id).await.unwrap());

        let stored = devices.find_by_id(attached.id).await.unwrap().unwrap();
        assert!(stored.is_orphaned());
        assert_eq!(devices.count_by_gateway(gw.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_device_requires_existing_gateway() {
        let store = MemoryStore::new();
        let devices = store.devices();

        let err = devices.create(device(Uuid::new_v4(), 1)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(devices.find_by_uid(1).await.unwrap().is_none());
    }
}
