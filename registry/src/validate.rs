use crate::errors::{Error, Result};
use crate::model::{DeviceStatus, GatewayChanges, GatewayStatus, NewDevice, NewGateway};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::net::Ipv4Addr;
use tracing::debug;

const SERIAL_MIN: usize = 3;
const SERIAL_MAX: usize = 100;
const NAME_MIN: usize = 2;
const NAME_MAX: usize = 100;
const LOCATION_MAX: usize = 200;

/// Raw body of `POST /api/gateways`
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGatewayPayload {
    pub serial_number: Option<String>,
    pub name: Option<String>,
    pub ipv4_address: Option<String>,
    pub status: Option<String>,
    pub location: Option<String>,
}

/// Raw body of `PATCH /api/gateways/:id`
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateGatewayPayload {
    pub name: Option<String>,
    pub ipv4_address: Option<String>,
    pub status: Option<String>,
    /// Absent leaves the location alone, `null` clears it.
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub location: Option<Option<String>>,
    /// Accepted so clients sending it are not rejected; never applied.
    pub serial_number: Option<serde_json::Value>,
}

/// Raw body of `POST /api/gateways/:id/devices`
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttachDevicePayload {
    pub uid: Option<i64>,
    pub vendor: Option<String>,
    pub status: Option<String>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Collects one message per failed rule
#[derive(Default)]
struct Violations(Vec<String>);

impl Violations {
    fn push(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    fn finish<T>(self, value: impl FnOnce() -> T) -> Result<T> {
        if self.0.is_empty() {
            Ok(value())
        } else {
            Err(Error::Validation(self.0))
        }
    }
}

pub fn validate_new_gateway(payload: CreateGatewayPayload) -> Result<NewGateway> {
    let mut violations = Violations::default();

    match payload.serial_number.as_deref() {
        None | Some("") => violations.push("Serial number is required"),
        Some(serial) => check_serial_number(serial, &mut violations),
    }
    match payload.name.as_deref() {
        None | Some("") => violations.push("Gateway name is required"),
        Some(name) => check_name(name, &mut violations),
    }
    match payload.ipv4_address.as_deref() {
        Some(ip) => check_ipv4(ip, &mut violations),
        None => violations.push(IPV4_MESSAGE),
    }
    let status = payload
        .status
        .as_deref()
        .and_then(|s| s.parse::<GatewayStatus>().ok());
    if status.is_none() {
        violations.push(GATEWAY_STATUS_MESSAGE);
    }
    if let Some(location) = payload.location.as_deref() {
        check_location(location, &mut violations);
    }

    violations.finish(|| NewGateway {
        serial_number: payload.serial_number.unwrap_or_default(),
        name: payload.name.unwrap_or_default(),
        ipv4_address: payload.ipv4_address.unwrap_or_default(),
        status: status.unwrap_or(GatewayStatus::Active),
        location: payload.location,
    })
}

/// Validates the provided fields only. A `serial_number` is dropped here and
/// never reaches the service.
pub fn validate_gateway_changes(payload: UpdateGatewayPayload) -> Result<GatewayChanges> {
    let mut violations = Violations::default();

    if payload.serial_number.is_some() {
        debug!("Ignoring serial_number in gateway update payload");
    }

    if let Some(name) = payload.name.as_deref() {
        if name.is_empty() {
            violations.push("Gateway name is required");
        } else {
            check_name(name, &mut violations);
        }
    }
    if let Some(ip) = payload.ipv4_address.as_deref() {
        check_ipv4(ip, &mut violations);
    }
    let mut status = None;
    if let Some(raw) = payload.status.as_deref() {
        status = raw.parse::<GatewayStatus>().ok();
        if status.is_none() {
            violations.push(GATEWAY_STATUS_MESSAGE);
        }
    }
    if let Some(Some(location)) = payload.location.as_ref() {
        check_location(location, &mut violations);
    }

    violations.finish(|| GatewayChanges {
        name: payload.name,
        ipv4_address: payload.ipv4_address,
        status,
        location: payload.location,
    })
}

pub fn validate_new_device(payload: AttachDevicePayload) -> Result<NewDevice> {
    let mut violations = Violations::default();

    match payload.uid {
        None => violations.push("UID is required"),
        Some(uid) if uid <= 0 => violations.push("UID must be a positive number"),
        Some(_) => {}
    }
    if payload.vendor.as_deref().map_or(true, str::is_empty) {
        violations.push("Vendor is required");
    }
    let status = payload
        .status
        .as_deref()
        .and_then(|s| s.parse::<DeviceStatus>().ok());
    if status.is_none() {
        violations.push(DEVICE_STATUS_MESSAGE);
    }

    violations.finish(|| NewDevice {
        uid: payload.uid.unwrap_or_default(),
        vendor: payload.vendor.unwrap_or_default(),
        status: status.unwrap_or(DeviceStatus::Offline),
        last_seen_at: payload.last_seen_at,
    })
}

const IPV4_MESSAGE: &str = "IPv4 address must be a valid IPv4 format";
const GATEWAY_STATUS_MESSAGE: &str = "Status must be one of: active, inactive, decommissioned";
const DEVICE_STATUS_MESSAGE: &str = "Status must be one of: online, offline, maintenance";

fn check_serial_number(serial: &str, violations: &mut Violations) {
    let len = serial.chars().count();
    if len < SERIAL_MIN {
        violations.push(format!(
            "Serial number must be at least {} characters long",
            SERIAL_MIN
        ));
    }
    if len > SERIAL_MAX {
        violations.push(format!(
            "Serial number cannot exceed {} characters",
            SERIAL_MAX
        ));
    }
}

fn check_name(name: &str, violations: &mut Violations) {
    let len = name.chars().count();
    if len < NAME_MIN {
        violations.push(format!(
            "Gateway name must be at least {} characters long",
            NAME_MIN
        ));
    }
    if len > NAME_MAX {
        violations.push(format!("Gateway name cannot exceed {} characters", NAME_MAX));
    }
}

// Ipv4Addr's parser only accepts four decimal octets without leading zeros.
fn check_ipv4(ip: &str, violations: &mut Violations) {
    if ip.parse::<Ipv4Addr>().is_err() {
        violations.push(IPV4_MESSAGE);
    }
}

fn check_location(location: &str, violations: &mut Violations) {
    if location.chars().count() > LOCATION_MAX {
        violations.push(format!("Location cannot exceed {} characters", LOCATION_MAX));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_gateway_payload() -> CreateGatewayPayload {
        CreateGatewayPayload {
            serial_number: Some("GW001".to_string()),
            name: Some("Gateway 1".to_string()),
            ipv4_address: Some("192.168.1.1".to_string()),
            status: Some("active".to_string()),
            location: None,
        }
    }

    fn messages(result: Result<impl std::fmt::Debug>) -> Vec<String> {
        match result {
            Err(Error::Validation(messages)) => messages,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_gateway() {
        let gateway = validate_new_gateway(valid_gateway_payload()).unwrap();
        assert_eq!(gateway.serial_number, "GW001");
        assert_eq!(gateway.status, GatewayStatus::Active);
    }

    #[test]
    fn test_empty_gateway_reports_every_field() {
        let messages = messages(validate_new_gateway(CreateGatewayPayload::default()));

        assert!(messages.contains(&"Serial number is required".to_string()));
        assert!(messages.contains(&"Gateway name is required".to_string()));
        assert!(messages.contains(&IPV4_MESSAGE.to_string()));
        assert!(messages.contains(&GATEWAY_STATUS_MESSAGE.to_string()));
        assert_eq!(messages.len(), 4);
    }

    #[test]
    fn test_length_limits() {
        let mut payload = valid_gateway_payload();
        payload.serial_number = Some("GW".to_string());
        payload.name = Some("x".repeat(101));
        payload.location = Some("y".repeat(201));

        let messages = messages(validate_new_gateway(payload));
        assert_eq!(
            messages,
            vec![
                "Serial number must be at least 3 characters long",
                "Gateway name cannot exceed 100 characters",
                "Location cannot exceed 200 characters",
            ]
        );
    }

    #[test]
    fn test_invalid_ipv4_formats() {
        for ip in ["256.1.1.1", "192.168.1", "192.168.001.1", "::1", "gateway.local"] {
            let mut payload = valid_gateway_payload();
            payload.ipv4_address = Some(ip.to_string());
            assert_eq!(
                messages(validate_new_gateway(payload)),
                vec![IPV4_MESSAGE],
                "{} should be rejected",
                ip
            );
        }
    }

    #[test]
    fn test_unknown_gateway_status() {
        let mut payload = valid_gateway_payload();
        payload.status = Some("retired".to_string());
        assert_eq!(
            messages(validate_new_gateway(payload)),
            vec![GATEWAY_STATUS_MESSAGE]
        );
    }

    #[test]
    fn test_update_drops_serial_number() {
        let changes = validate_gateway_changes(UpdateGatewayPayload {
            serial_number: Some(serde_json::json!("GW002")),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(changes, GatewayChanges::default());
    }

    #[test]
    fn test_update_location_null_clears() {
        let payload: UpdateGatewayPayload =
            serde_json::from_value(serde_json::json!({ "location": null })).unwrap();
        let changes = validate_gateway_changes(payload).unwrap();
        assert_eq!(changes.location, Some(None));

        let payload: UpdateGatewayPayload =
            serde_json::from_value(serde_json::json!({ "name": "Renamed" })).unwrap();
        let changes = validate_gateway_changes(payload).unwrap();
        assert_eq!(changes.location, None);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let payload = serde_json::json!({
            "serial_number": "GW001",
            "name": "Gateway",
            "ipv4_address": "10.0.0.1",
            "status": "active",
            "bogus": 1
        });
        assert!(serde_json::from_value::<CreateGatewayPayload>(payload).is_err());

        let payload = serde_json::json!({ "uid": 1, "vendor": "V", "status": "online", "extra": true });
        assert!(serde_json::from_value::<AttachDevicePayload>(payload).is_err());

        let payload = serde_json::json!({ "serial_number": "GW002", "color": "red" });
        assert!(serde_json::from_value::<UpdateGatewayPayload>(payload).is_err());

        let payload = serde_json::json!({ "serial_number": "GW002" });
        assert!(serde_json::from_value::<UpdateGatewayPayload>(payload).is_ok());
    }

    #[test]
    fn test_update_validates_provided_fields_only() {
        let changes = validate_gateway_changes(UpdateGatewayPayload {
            status: Some("decommissioned".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(changes.status, Some(GatewayStatus::Decommissioned));
        assert!(changes.name.is_none());

        let result = validate_gateway_changes(UpdateGatewayPayload {
            ipv4_address: Some("10.0.0".to_string()),
            name: Some("G".to_string()),
            ..Default::default()
        });
        assert_eq!(
            messages(result),
            vec![
                "Gateway name must be at least 2 characters long",
                IPV4_MESSAGE,
            ]
        );
    }

    #[test]
    fn test_valid_device() {
        let device = validate_new_device(AttachDevicePayload {
            uid: Some(12345),
            vendor: Some("Vendor 1".to_string()),
            status: Some("online".to_string()),
            last_seen_at: None,
        })
        .unwrap();

        assert_eq!(device.uid, 12345);
        assert_eq!(device.status, DeviceStatus::Online);
    }

    #[test]
    fn test_invalid_device() {
        let messages = messages(validate_new_device(AttachDevicePayload {
            uid: Some(0),
            vendor: Some(String::new()),
            status: Some("lost".to_string()),
            last_seen_at: None,
        }));

        assert_eq!(
            messages,
            vec![
                "UID must be a positive number",
                "Vendor is required",
                DEVICE_STATUS_MESSAGE,
            ]
        );
    }

    #[test]
    fn test_missing_uid() {
        let messages = messages(validate_new_device(AttachDevicePayload {
            uid: None,
            vendor: Some("Vendor".to_string()),
            status: Some("offline".to_string()),
            last_seen_at: None,
        }));

        assert_eq!(messages, vec!["UID is required"]);
    }
}
