use crate::errors::{Error, Result};
use crate::model::{Gateway, PeripheralDevice};
use crate::repository::{DeviceRepository, GatewayRepository};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

// Unique index names from migrations/
const SERIAL_NUMBER_INDEX: &str = "uq_gateways_serial_number";
const IPV4_ADDRESS_INDEX: &str = "uq_gateways_ipv4_address";
const DEVICE_UID_INDEX: &str = "uq_peripheral_devices_uid";
// Postgres' default name for the peripheral_devices.gateway_id reference
const DEVICE_GATEWAY_FK: &str = "peripheral_devices_gateway_id_fkey";

pub async fn make_pool(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// Name of the unique index a write tripped over, if that is why it failed.
fn violated_unique_index(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => db_err.constraint(),
        _ => None,
    }
}

/// Name of the foreign key a device write referenced a missing row through.
fn violated_foreign_key(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => db_err.constraint(),
        _ => None,
    }
}

fn gateway_conflict(index: &str) -> Option<Error> {
    match index {
        SERIAL_NUMBER_INDEX => Some(Error::duplicate_serial_number()),
        IPV4_ADDRESS_INDEX => Some(Error::duplicate_ipv4_address()),
        _ => None,
    }
}

fn device_conflict(index: &str, uid: i64) -> Option<Error> {
    (index == DEVICE_UID_INDEX).then(|| Error::duplicate_uid(uid))
}

// The gateway was deleted between the existence check and the insert.
fn missing_gateway(constraint: &str) -> Option<Error> {
    (constraint == DEVICE_GATEWAY_FK).then(Error::gateway_not_found)
}

fn map_gateway_write(err: sqlx::Error) -> Error {
    let conflict = violated_unique_index(&err).and_then(gateway_conflict);
    match conflict {
        Some(conflict) => conflict,
        None => {
            error!("Gateway write failed: {}", err);
            Error::Database(err)
        }
    }
}

fn map_device_write(err: sqlx::Error, uid: i64) -> Error {
    let rejected = violated_unique_index(&err)
        .and_then(|index| device_conflict(index, uid))
        .or_else(|| violated_foreign_key(&err).and_then(missing_gateway));
    match rejected {
        Some(rejected) => rejected,
        None => {
            error!("Device write failed: {}", err);
            Error::Database(err)
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgGatewayRepository {
    pool: PgPool,
}

impl PgGatewayRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GatewayRepository for PgGatewayRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Gateway>> {
        let gateway = sqlx::query_as::<_, Gateway>(
            "SELECT id, serial_number, name, ipv4_address, status, location, created_at, updated_at
             FROM gateways WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(gateway)
    }

    async fn find_by_serial_number(&self, serial_number: &str) -> Result<Option<Gateway>> {
        let gateway = sqlx::query_as::<_, Gateway>(
            "SELECT id, serial_number, name, ipv4_address, status, location, created_at, updated_at
             FROM gateways WHERE serial_number = $1",
        )
        .bind(serial_number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(gateway)
    }

    async fn find_by_ipv4_address(&self, ipv4_address: &str) -> Result<Option<Gateway>> {
        let gateway = sqlx::query_as::<_, Gateway>(
            "SELECT id, serial_number, name, ipv4_address, status, location, created_at, updated_at
             FROM gateways WHERE ipv4_address = $1",
        )
        .bind(ipv4_address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(gateway)
    }

    async fn list(&self) -> Result<Vec<Gateway>> {
        let gateways = sqlx::query_as::<_, Gateway>(
            "SELECT id, serial_number, name, ipv4_address, status, location, created_at, updated_at
             FROM gateways ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(gateways)
    }

    async fn create(&self, gateway: Gateway) -> Result<Gateway> {
        sqlx::query_as::<_, Gateway>(
            "INSERT INTO gateways
                (id, serial_number, name, ipv4_address, status, location, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING id, serial_number, name, ipv4_address, status, location, created_at, updated_at",
        )
        .bind(gateway.id)
        .bind(&gateway.serial_number)
        .bind(&gateway.name)
        .bind(&gateway.ipv4_address)
        .bind(gateway.status)
        .bind(&gateway.location)
        .bind(gateway.created_at)
        .bind(gateway.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_gateway_write)
    }

    async fn save(&self, gateway: Gateway) -> Result<Gateway> {
        sqlx::query_as::<_, Gateway>(
            "UPDATE gateways
             SET name = $2, ipv4_address = $3, status = $4, location = $5, updated_at = $6
             WHERE id = $1
             RETURNING id, serial_number, name, ipv4_address, status, location, created_at, updated_at",
        )
        .bind(gateway.id)
        .bind(&gateway.name)
        .bind(&gateway.ipv4_address)
        .bind(gateway.status)
        .bind(&gateway.location)
        .bind(gateway.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_gateway_write)?
        .ok_or_else(Error::gateway_not_found)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM gateways WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone)]
pub struct PgDeviceRepository {
    pool: PgPool,
}

impl PgDeviceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceRepository for PgDeviceRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<PeripheralDevice>> {
        let device = sqlx::query_as::<_, PeripheralDevice>(
            "SELECT id, uid, vendor, status, created_at, last_seen_at, gateway_id, device_type_id
             FROM peripheral_devices WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(device)
    }

    async fn find_by_uid(&self, uid: i64) -> Result<Option<PeripheralDevice>> {
        let device = sqlx::query_as::<_, PeripheralDevice>(
            "SELECT id, uid, vendor, status, created_at, last_seen_at, gateway_id, device_type_id
             FROM peripheral_devices WHERE uid = $1",
        )
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(device)
    }

    async fn list_by_gateways(&self, gateway_ids: &[Uuid]) -> Result<Vec<PeripheralDevice>> {
        if gateway_ids.is_empty() {
            return Ok(Vec::new());
        }

        let devices = sqlx::query_as::<_, PeripheralDevice>(
            "SELECT id, uid, vendor, status, created_at, last_seen_at, gateway_id, device_type_id
             FROM peripheral_devices
             WHERE gateway_id = ANY($1)
             ORDER BY created_at, id",
        )
        .bind(gateway_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(devices)
    }

    async fn count_by_gateway(&self, gateway_id: Uuid) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM peripheral_devices WHERE gateway_id = $1")
                .bind(gateway_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn create(&self, device: PeripheralDevice) -> Result<PeripheralDevice> {
        let uid = device.uid;
        sqlx::query_as::<_, PeripheralDevice>(
            "INSERT INTO peripheral_devices
                (id, uid, vendor, status, created_at, last_seen_at, gateway_id, device_type_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING id, uid, vendor, status, created_at, last_seen_at, gateway_id, device_type_id",
        )
        .bind(device.id)
        .bind(device.uid)
        .bind(&device.vendor)
        .bind(device.status)
        .bind(device.created_at)
        .bind(device.last_seen_at)
        .bind(device.gateway_id)
        .bind(device.device_type_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_device_write(e, uid))
    }

    async fn save(&self, device: PeripheralDevice) -> Result<PeripheralDevice> {
        let uid = device.uid;
        sqlx::query_as::<_, PeripheralDevice>(
            "UPDATE peripheral_devices
             SET uid = $2, vendor = $3, status = $4, last_seen_at = $5,
                 gateway_id = $6, device_type_id = $7
             WHERE id = $1
             RETURNING id, uid, vendor, status, created_at, last_seen_at, gateway_id, device_type_id",
        )
        .bind(device.id)
        .bind(device.uid)
        .bind(&device.vendor)
        .bind(device.status)
        .bind(device.last_seen_at)
        .bind(device.gateway_id)
        .bind(device.device_type_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_device_write(e, uid))?
        .ok_or_else(Error::device_not_found)
    }
}
