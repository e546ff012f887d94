//! Persistence abstraction consumed by the gateway service.
//!
//! Implementations must enforce unique serial numbers, IPv4 addresses and
//! device UIDs themselves and report violations as the same
//! [`Error::Conflict`](crate::errors::Error::Conflict) the service pre-checks
//! raise, so a lost check-then-act race surfaces identically.

use crate::errors::Result;
use crate::model::{Gateway, PeripheralDevice};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait GatewayRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Gateway>>;

    async fn find_by_serial_number(&self, serial_number: &str) -> Result<Option<Gateway>>;

    async fn find_by_ipv4_address(&self, ipv4_address: &str) -> Result<Option<Gateway>>;

    /// All gateways in creation order
    async fn list(&self) -> Result<Vec<Gateway>>;

    async fn create(&self, gateway: Gateway) -> Result<Gateway>;

    /// Persists mutable fields. `serial_number` is never written.
    async fn save(&self, gateway: Gateway) -> Result<Gateway>;

    /// Returns `false` when no row matched.
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<PeripheralDevice>>;

    async fn find_by_uid(&self, uid: i64) -> Result<Option<PeripheralDevice>>;

    /// Devices attached to any of `gateway_ids`, in creation order
    async fn list_by_gateways(&self, gateway_ids: &[Uuid]) -> Result<Vec<PeripheralDevice>>;

    async fn count_by_gateway(&self, gateway_id: Uuid) -> Result<u64>;

    async fn create(&self, device: PeripheralDevice) -> Result<PeripheralDevice>;

    async fn save(&self, device: PeripheralDevice) -> Result<PeripheralDevice>;
}
