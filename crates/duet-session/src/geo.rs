use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Reminders fire when the device comes within this distance.
pub const REMINDER_RADIUS_KM: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

impl LatLng {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// Great-circle distance in kilometres (haversine).
pub fn distance_km(a: LatLng, b: LatLng) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Label position for a polyline: the middle point, or the mean of the two
/// middle points when the count is even.
pub fn midpoint(points: &[LatLng]) -> Option<LatLng> {
    if points.is_empty() {
        return None;
    }
    let mid = points.len() / 2;
    if points.len() % 2 == 1 {
        return Some(points[mid]);
    }
    let (a, b) = (points[mid - 1], points[mid]);
    Some(LatLng::new(
        (a.latitude + b.latitude) / 2.0,
        (a.longitude + b.longitude) / 2.0,
    ))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reminder {
    pub at: LatLng,
    pub message: String,
}

/// Location reminders dropped on the map. Kept on the device only.
#[derive(Debug, Default)]
pub struct ReminderBoard {
    reminders: Vec<Reminder>,
}

impl ReminderBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, at: LatLng, message: impl Into<String>) {
        self.reminders.push(Reminder {
            at,
            message: message.into(),
        });
    }

    pub fn reminders(&self) -> &[Reminder] {
        &self.reminders
    }

    /// Reminders within [`REMINDER_RADIUS_KM`] of `position`.
    pub fn due(&self, position: LatLng) -> Vec<&Reminder> {
        self.reminders
            .iter()
            .filter(|r| distance_km(position, r.at) < REMINDER_RADIUS_KM)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_distance() {
        let berlin = LatLng::new(52.5200, 13.4050);
        let paris = LatLng::new(48.8566, 2.3522);
        let d = distance_km(berlin, paris);
        assert!((d - 878.0).abs() < 5.0, "got {}", d);
        assert_eq!(distance_km(berlin, berlin), 0.0);
    }

    #[test]
    fn midpoints() {
        assert_eq!(midpoint(&[]), None);
        let a = LatLng::new(0.0, 0.0);
        let b = LatLng::new(2.0, 4.0);
        let c = LatLng::new(10.0, 10.0);
        assert_eq!(midpoint(&[a]), Some(a));
        assert_eq!(midpoint(&[a, b]), Some(LatLng::new(1.0, 2.0)));
        assert_eq!(midpoint(&[a, b, c]), Some(b));
    }

    #[test]
    fn reminders_fire_nearby_only() {
        let mut board = ReminderBoard::new();
        let home = LatLng::new(40.0, -74.0);
        board.add(home, "water the plants");
        board.add(LatLng::new(41.0, -74.0), "far away");

        // Roughly 55 m north
        let due = board.due(LatLng::new(40.0005, -74.0));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].message, "water the plants");
        assert!(board.due(LatLng::new(40.01, -74.0)).is_empty());
    }
}
