use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle label of a gateway. Any value may replace any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "gateway_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    Active,
    Inactive,
    Decommissioned,
}

impl GatewayStatus {
    pub const ALL: [GatewayStatus; 3] = [
        GatewayStatus::Active,
        GatewayStatus::Inactive,
        GatewayStatus::Decommissioned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayStatus::Active => "active",
            GatewayStatus::Inactive => "inactive",
            GatewayStatus::Decommissioned => "decommissioned",
        }
    }
}

impl FromStr for GatewayStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|v| v.as_str() == s).ok_or(())
    }
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "device_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Maintenance,
}

impl DeviceStatus {
    pub const ALL: [DeviceStatus; 3] = [
        DeviceStatus::Online,
        DeviceStatus::Offline,
        DeviceStatus::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Maintenance => "maintenance",
        }
    }
}

impl FromStr for DeviceStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|v| v.as_str() == s).ok_or(())
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Managed network access point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Gateway {
    pub id: Uuid,
    pub serial_number: String,
    pub name: String,
    pub ipv4_address: String,
    pub status: GatewayStatus,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Gateway {
    pub fn new(input: NewGateway) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            serial_number: input.serial_number,
            name: input.name,
            ipv4_address: input.ipv4_address,
            status: input.status,
            location: input.location,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merges the provided fields, leaving the rest untouched.
    pub fn apply(&mut self, changes: GatewayChanges) {
        if let Some(name) = changes.name {
            self.name = name;
        }
        if let Some(ipv4_address) = changes.ipv4_address {
            self.ipv4_address = ipv4_address;
        }
        if let Some(status) = changes.status {
            self.status = status;
        }
        if let Some(location) = changes.location {
            self.location = location;
        }
        self.updated_at = Utc::now();
    }
}

/// Device record. `gateway_id` is a back-reference and may be `None` (orphaned).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PeripheralDevice {
    pub id: Uuid,
    pub uid: i64,
    pub vendor: String,
    pub status: DeviceStatus,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub gateway_id: Option<Uuid>,
    pub device_type_id: Option<i32>,
}

impl PeripheralDevice {
    pub fn attached(gateway_id: Uuid, input: NewDevice) -> Self {
        Self {
            id: Uuid::new_v4(),
            uid: input.uid,
            vendor: input.vendor,
            status: input.status,
            created_at: Utc::now(),
            last_seen_at: input.last_seen_at,
            gateway_id: Some(gateway_id),
            device_type_id: None,
        }
    }

    pub fn is_orphaned(&self) -> bool {
        self.gateway_id.is_none()
    }
}

/// Shape-validated gateway creation input
#[derive(Debug, Clone, PartialEq)]
pub struct NewGateway {
    pub serial_number: String,
    pub name: String,
    pub ipv4_address: String,
    pub status: GatewayStatus,
    pub location: Option<String>,
}

/// Shape-validated partial update. Has no serial number slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayChanges {
    pub name: Option<String>,
    pub ipv4_address: Option<String>,
    pub status: Option<GatewayStatus>,
    /// `Some(None)` clears the location.
    pub location: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDevice {
    pub uid: i64,
    pub vendor: String,
    pub status: DeviceStatus,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Gateway together with its currently attached devices
#[derive(Debug, Clone, Serialize)]
pub struct GatewayWithDevices {
    #[serde(flatten)]
    pub gateway: Gateway,
    pub devices: Vec<PeripheralDevice>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalSummary {
    pub id: Uuid,
    pub removed: bool,
    pub orphaned_devices: u64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityInfo {
    pub gateway_id: String,
    pub current_device_count: u64,
    pub max_devices: usize,
    pub can_accept_more: bool,
    pub remaining_capacity: u64,
    pub is_at_capacity: bool,
}
