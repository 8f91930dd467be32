use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use duet_backend::{Backend, Collection};
use duet_types::User;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceName {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(rename = "altitudeAccuracy", default)]
    pub altitude_accuracy: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub coords: Coordinates,
    /// Milliseconds since the epoch.
    #[serde(default)]
    pub timestamp: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapRegion {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "latitudeDelta")]
    pub latitude_delta: f64,
    #[serde(rename = "longitudeDelta")]
    pub longitude_delta: f64,
}

/// Device state one partner shares with the other. Stored as a JSON string
/// in the user's `info` attribute and replaced wholesale on every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceTelemetry {
    #[serde(rename = "deviceInfo", default)]
    pub device: Option<DeviceName>,
    #[serde(rename = "networkInfo", default)]
    pub network_info: Option<String>,
    /// 0.0 to 1.0
    #[serde(rename = "batteryLevel", default)]
    pub battery_level: Option<f64>,
    /// Platform battery state code (unknown, unplugged, charging, full).
    #[serde(rename = "batteryState", default)]
    pub battery_state: Option<u8>,
    #[serde(default)]
    pub location: Option<LocationFix>,
    /// Reverse-geocoded place name.
    #[serde(rename = "currentLocation", default)]
    pub current_location: Option<String>,
    #[serde(rename = "initialRegion", default)]
    pub initial_region: Option<MapRegion>,
}

impl DeviceTelemetry {
    pub fn coordinates(&self) -> Option<Coordinates> {
        self.location.map(|l| l.coords)
    }

    /// Battery as a whole percentage.
    pub fn battery_percent(&self) -> Option<u8> {
        self.battery_level.map(|l| (l.clamp(0.0, 1.0) * 100.0).round() as u8)
    }
}

/// Parse a partner's shared telemetry. `None` when they have not shared any
/// or the blob does not parse.
pub fn partner_telemetry(partner: &User) -> Option<DeviceTelemetry> {
    let raw = partner.info.as_deref().filter(|s| !s.trim().is_empty())?;
    match serde_json::from_str(raw) {
        Ok(telemetry) => Some(telemetry),
        Err(e) => {
            warn!("Ignoring unreadable telemetry of user {}: {}", partner.id, e);
            None
        }
    }
}

/// Pushes this device's telemetry into the user profile whenever it changes.
pub struct TelemetryPublisher {
    backend: Arc<dyn Backend>,
    user_id: String,
    last: Option<DeviceTelemetry>,
}

impl TelemetryPublisher {
    pub fn new(backend: Arc<dyn Backend>, user_id: impl Into<String>) -> Self {
        Self {
            backend,
            user_id: user_id.into(),
            last: None,
        }
    }

    /// Publish `snapshot` unless it equals the last one published. Returns
    /// whether it was written. Failures are logged and not retried.
    pub async fn publish(&mut self, snapshot: &DeviceTelemetry) -> bool {
        if self.last.as_ref() == Some(snapshot) {
            debug!("Telemetry unchanged, skipping publish");
            return false;
        }

        let blob = match serde_json::to_string(snapshot) {
            Ok(blob) => blob,
            Err(e) => {
                warn!("Cannot encode telemetry: {}", e);
                return false;
            }
        };

        match self
            .backend
            .update_document(Collection::Users, &self.user_id, json!({ "info": blob }))
            .await
        {
            Ok(_) => {
                self.last = Some(snapshot.clone());
                true
            }
            Err(e) => {
                warn!("Telemetry publish failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use duet_backend::MemoryBackend;
    use duet_backend::memory::Call;
    use duet_types::Gender;

    use super::*;

    fn snapshot(level: f64) -> DeviceTelemetry {
        DeviceTelemetry {
            device: Some(DeviceName { name: "Pixel".into() }),
            network_info: Some("WIFI".into()),
            battery_level: Some(level),
            battery_state: Some(2),
            location: Some(LocationFix {
                coords: Coordinates {
                    latitude: 52.52,
                    longitude: 13.405,
                    ..Coordinates::default()
                },
                timestamp: None,
            }),
            current_location: Some("Berlin".into()),
            initial_region: None,
        }
    }

    fn user(info: Option<&str>) -> User {
        User {
            id: "u2".into(),
            account_id: "a2".into(),
            email: "b@example.com".into(),
            username: "bea".into(),
            avatar: String::new(),
            gender: Gender::Female,
            relationship_id: None,
            info: info.map(str::to_owned),
        }
    }

    #[test]
    fn reads_blob_written_by_mobile_client() {
        let raw = r#"{"deviceInfo":{"name":"iPhone"},"batteryLevel":0.42,"networkInfo":"CELLULAR",
            "currentLocation":"Lisbon","batteryState":1,
            "initialRegion":{"latitude":38.7,"longitude":-9.1,"latitudeDelta":0.01,"longitudeDelta":0.01},
            "location":{"coords":{"accuracy":5,"longitude":-9.14,"altitude":12,"heading":0,"latitude":38.72,"altitudeAccuracy":3,"speed":0},"timestamp":1719000000000}}"#;
        let telemetry = partner_telemetry(&user(Some(raw))).unwrap();
        assert_eq!(telemetry.device.as_ref().unwrap().name, "iPhone");
        assert_eq!(telemetry.battery_percent(), Some(42));
        assert_eq!(telemetry.coordinates().unwrap().latitude, 38.72);
        assert_eq!(telemetry.current_location.as_deref(), Some("Lisbon"));
    }

    #[test]
    fn missing_or_broken_blob() {
        assert_eq!(partner_telemetry(&user(None)), None);
        assert_eq!(partner_telemetry(&user(Some("{not json"))), None);
    }

    #[tokio::test]
    async fn publishes_only_changes() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .seed_document(Collection::Users, json!({"$id": "u1", "accountId": "a1"}))
            .unwrap();

        let mut publisher = TelemetryPublisher::new(backend.clone(), "u1");
        assert!(publisher.publish(&snapshot(0.5)).await);
        assert!(!publisher.publish(&snapshot(0.5)).await);
        assert!(publisher.publish(&snapshot(0.4)).await);
        assert_eq!(
            backend
                .calls()
                .iter()
                .filter(|c| matches!(c, Call::UpdateDocument(Collection::Users, _)))
                .count(),
            2
        );

        let stored = &backend.documents(Collection::Users)[0];
        let blob: DeviceTelemetry = serde_json::from_str(stored["info"].as_str().unwrap()).unwrap();
        assert_eq!(blob, snapshot(0.4));
    }

    #[tokio::test]
    async fn publish_failure_is_swallowed() {
        let backend = Arc::new(MemoryBackend::new());
        let mut publisher = TelemetryPublisher::new(backend.clone(), "nobody");
        assert!(!publisher.publish(&snapshot(0.9)).await);
        // Not recorded as published, so the next attempt writes again
        assert!(publisher.last.is_none());
    }
}
