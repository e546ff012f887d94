//! Gateway and peripheral-device business rules.
//!
//! Uniqueness and capacity checks run against the repositories before each
//! write (check-then-act). Uniqueness races are closed by the repositories'
//! own unique constraints, which report the same conflict errors. The
//! per-gateway device limit has no storage-level counterpart, so two
//! concurrent attachments to a gateway holding `max - 1` devices can both
//! succeed.

use crate::errors::{Error, Result};
use crate::metrics::{
    CAPACITY_REJECTIONS_TOTAL, CONFLICTS_TOTAL, DEVICES_ATTACHED_TOTAL, DEVICES_DETACHED_TOTAL,
    DEVICES_ORPHANED_TOTAL, GATEWAYS_CREATED_TOTAL, GATEWAYS_DELETED_TOTAL,
};
use crate::model::{
    CapacityInfo, Gateway, GatewayChanges, GatewayWithDevices, NewDevice, NewGateway,
    PeripheralDevice, RemovalSummary,
};
use crate::repository::{DeviceRepository, GatewayRepository};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_DEVICES_PER_GATEWAY: usize = 10;

#[derive(Clone)]
pub struct GatewayService {
    gateways: Arc<dyn GatewayRepository>,
    devices: Arc<dyn DeviceRepository>,
    max_devices_per_gateway: usize,
}

impl GatewayService {
    pub fn new(
        gateways: Arc<dyn GatewayRepository>,
        devices: Arc<dyn DeviceRepository>,
        max_devices_per_gateway: usize,
    ) -> Self {
        Self {
            gateways,
            devices,
            max_devices_per_gateway,
        }
    }

    pub fn max_devices_per_gateway(&self) -> usize {
        self.max_devices_per_gateway
    }

    pub async fn create_gateway(&self, input: NewGateway) -> Result<Gateway> {
        if self
            .gateways
            .find_by_serial_number(&input.serial_number)
            .await?
            .is_some()
        {
            return Err(conflict(Error::duplicate_serial_number()));
        }
        if self
            .gateways
            .find_by_ipv4_address(&input.ipv4_address)
            .await?
            .is_some()
        {
            return Err(conflict(Error::duplicate_ipv4_address()));
        }

        let gateway = self
            .gateways
            .create(Gateway::new(input))
            .await
            .map_err(conflict)?;

        GATEWAYS_CREATED_TOTAL.inc();
        info!(
            gateway_id = %gateway.id,
            serial_number = %gateway.serial_number,
            ipv4_address = %gateway.ipv4_address,
            "Gateway created"
        );
        Ok(gateway)
    }

    pub async fn find_all(&self) -> Result<Vec<GatewayWithDevices>> {
        let gateways = self.gateways.list().await?;
        let ids: Vec<Uuid> = gateways.iter().map(|g| g.id).collect();
        let mut devices = self.devices.list_by_gateways(&ids).await?;

        Ok(gateways
            .into_iter()
            .map(|gateway| {
                let (own, rest): (Vec<_>, Vec<_>) = devices
                    .drain(..)
                    .partition(|d| d.gateway_id == Some(gateway.id));
                devices = rest;
                GatewayWithDevices {
                    gateway,
                    devices: own,
                }
            })
            .collect())
    }

    pub async fn find_one(&self, id: Uuid) -> Result<GatewayWithDevices> {
        let gateway = self.require_gateway(id).await?;
        let devices = self.devices.list_by_gateways(&[id]).await?;
        Ok(GatewayWithDevices { gateway, devices })
    }

    /// Applies a partial update. The input type has no serial number, so the
    /// serial stays as created.
    pub async fn update(&self, id: Uuid, changes: GatewayChanges) -> Result<GatewayWithDevices> {
        let mut gateway = self.require_gateway(id).await?;

        if let Some(ip) = changes.ipv4_address.as_deref() {
            if ip != gateway.ipv4_address {
                let holder = self.gateways.find_by_ipv4_address(ip).await?;
                if holder.is_some_and(|other| other.id != id) {
                    return Err(conflict(Error::duplicate_ipv4_address()));
                }
            }
        }

        gateway.apply(changes);
        let gateway = self.gateways.save(gateway).await.map_err(conflict)?;
        let devices = self.devices.list_by_gateways(&[id]).await?;

        info!(gateway_id = %id, "Gateway updated");
        Ok(GatewayWithDevices { gateway, devices })
    }

    /// Deletes a gateway after detaching every device it holds.
    pub async fn remove(&self, id: Uuid) -> Result<RemovalSummary> {
        self.require_gateway(id).await?;

        let attached = self.devices.list_by_gateways(&[id]).await?;
        let mut orphaned = 0u64;
        for mut device in attached {
            device.gateway_id = None;
            self.devices.save(device).await?;
            orphaned += 1;
        }

        if !self.gateways.delete(id).await? {
            return Err(Error::gateway_not_found());
        }

        GATEWAYS_DELETED_TOTAL.inc();
        DEVICES_ORPHANED_TOTAL.inc_by(orphaned as f64);
        info!(gateway_id = %id, orphaned, "Gateway deleted");

        Ok(RemovalSummary {
            id,
            removed: true,
            orphaned_devices: orphaned,
            message: format!("Gateway deleted. {} devices have been orphaned.", orphaned),
        })
    }

    pub async fn attach_device(
        &self,
        gateway_id: Uuid,
        input: NewDevice,
    ) -> Result<PeripheralDevice> {
        self.require_gateway(gateway_id).await?;

        let count = self.devices.count_by_gateway(gateway_id).await?;
        if count >= self.max_devices_per_gateway as u64 {
            CAPACITY_REJECTIONS_TOTAL.inc();
            warn!(%gateway_id, count, "Gateway is at device capacity");
            return Err(Error::capacity_exceeded(self.max_devices_per_gateway, count));
        }

        if self.devices.find_by_uid(input.uid).await?.is_some() {
            return Err(conflict(Error::duplicate_uid(input.uid)));
        }

        let device = self
            .devices
            .create(PeripheralDevice::attached(gateway_id, input))
            .await
            .map_err(conflict)?;

        DEVICES_ATTACHED_TOTAL.inc();
        info!(%gateway_id, device_id = %device.id, uid = device.uid, "Device attached");
        Ok(device)
    }

    /// Orphans a device. Orphaned devices and devices held by another gateway
    /// get the same not-found error.
    pub async fn detach_device(
        &self,
        gateway_id: Uuid,
        device_id: Uuid,
    ) -> Result<PeripheralDevice> {
        let mut device = self
            .devices
            .find_by_id(device_id)
            .await?
            .ok_or_else(Error::device_not_found)?;

        if device.gateway_id != Some(gateway_id) {
            return Err(Error::device_not_on_gateway());
        }

        device.gateway_id = None;
        let device = self.devices.save(device).await?;

        DEVICES_DETACHED_TOTAL.inc();
        info!(%gateway_id, %device_id, "Device detached");
        Ok(device)
    }

    pub async fn find_device(&self, device_id: Uuid) -> Result<PeripheralDevice> {
        self.devices
            .find_by_id(device_id)
            .await?
            .ok_or_else(Error::device_not_found)
    }

    /// Attached-device count. Unknown gateway ids count as zero.
    pub async fn device_count(&self, gateway_id: Uuid) -> Result<u64> {
        self.devices.count_by_gateway(gateway_id).await
    }

    pub async fn can_accept_device(&self, gateway_id: Uuid) -> Result<bool> {
        let count = self.device_count(gateway_id).await?;
        Ok(count < self.max_devices_per_gateway as u64)
    }

    pub async fn capacity_info(&self, gateway_id: Uuid) -> Result<CapacityInfo> {
        let count = self.device_count(gateway_id).await?;
        Ok(self.capacity_for(gateway_id.to_string(), count))
    }

    /// Capacity of a gateway currently holding `count` devices.
    pub fn capacity_for(&self, gateway_id: String, count: u64) -> CapacityInfo {
        let max = self.max_devices_per_gateway as u64;
        CapacityInfo {
            gateway_id,
            current_device_count: count,
            max_devices: self.max_devices_per_gateway,
            can_accept_more: count < max,
            remaining_capacity: max.saturating_sub(count),
            is_at_capacity: count >= max,
        }
    }

    async fn require_gateway(&self, id: Uuid) -> Result<Gateway> {
        self.gateways.find_by_id(id).await?.ok_or_else(|| {
            debug!(gateway_id = %id, "Gateway lookup missed");
            Error::gateway_not_found()
        })
    }
}

fn conflict(err: Error) -> Error {
    if let Error::Conflict(message) = &err {
        CONFLICTS_TOTAL.inc();
        warn!("Rejected: {}", message);
    }
    err
}
