//! Shared types for the wayfinding engine

use serde::{Deserialize, Deserializer, Serialize};
use std::borrow::Borrow;
use std::time::{SystemTime, UNIX_EPOCH};

/// Observations older than this are discarded as unreliable
pub const STALENESS_MS: u64 = 3000;

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Newtype wrapper for location identifiers to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(pub String);

impl LocationId {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LocationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Borrow<str> for LocationId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Planar coordinate in map units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
}

impl Coordinate {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// Compass bearing toward `other`: 0 = north (+y), increasing clockwise
    pub fn bearing_to(&self, other: &Coordinate) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let theta_deg = dy.atan2(dx).to_degrees();
        (90.0 - theta_deg + 360.0).rem_euclid(360.0)
    }
}

/// Latest sighting of a bound beacon, keyed by the location it marks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub location: LocationId,
    pub rssi: i32,
    pub observed_at: u64,
}

impl Observation {
    /// Whether the observation is still within the staleness window at `now`.
    /// Timestamps ahead of `now` count as fresh.
    #[inline]
    pub fn is_fresh(&self, now: u64) -> bool {
        self.is_fresh_within(now, STALENESS_MS)
    }

    #[inline]
    pub fn is_fresh_within(&self, now: u64, window_ms: u64) -> bool {
        now.saturating_sub(self.observed_at) <= window_ms
    }
}

/// Raw advertisement as reported by a scanner, before identity resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub identity: String,
    pub rssi: i32,
    pub timestamp: u64,
}

/// Rotation to apply to a display arrow so it points along `target_bearing`
/// while the device faces `heading`. Result lies in (-180, 180].
pub fn relative_rotation(target_bearing: f64, heading: f64) -> f64 {
    let r = (target_bearing - heading).rem_euclid(360.0);
    if r > 180.0 {
        r - 360.0
    } else {
        r
    }
}

/// Compass heading from a device-orientation alpha angle
pub fn heading_from_alpha(alpha: f64) -> f64 {
    (alpha - 360.0).abs()
}

/// Scanner MQTT message: a single advertisement or a batch
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ScannerMessage {
    Batch {
        #[serde(default)]
        scanner: Option<String>,
        adverts: Vec<ScannerAdvert>,
    },
    Single(ScannerAdvert),
}

#[derive(Debug, Deserialize)]
pub struct ScannerAdvert {
    pub name: String,
    pub rssi: i32,
    /// Timestamp - can be ISO 8601 string or epoch milliseconds integer
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub ts: TimestampValue,
}

/// Timestamp that can be either ISO 8601 string or epoch milliseconds
#[derive(Debug, Clone, Default)]
pub enum TimestampValue {
    #[default]
    None,
    IsoString(String),
    EpochMs(u64),
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<TimestampValue, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = TimestampValue;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or integer timestamp")
        }

        fn visit_str<E>(self, value: &str) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::IsoString(value.to_string()))
        }

        fn visit_u64<E>(self, value: u64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::EpochMs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::EpochMs(u64::try_from(value).unwrap_or(0)))
        }

        fn visit_unit<E>(self) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::None)
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearing_cardinal_directions() {
        let origin = Coordinate::new(0.0, 0.0);
        assert!((origin.bearing_to(&Coordinate::new(0.0, 10.0)) - 0.0).abs() < 1e-9);
        assert!((origin.bearing_to(&Coordinate::new(10.0, 0.0)) - 90.0).abs() < 1e-9);
        assert!((origin.bearing_to(&Coordinate::new(0.0, -10.0)) - 180.0).abs() < 1e-9);
        assert!((origin.bearing_to(&Coordinate::new(-10.0, 0.0)) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_relative_rotation_wraps() {
        assert_eq!(relative_rotation(90.0, 0.0), 90.0);
        assert_eq!(relative_rotation(10.0, 350.0), 20.0);
        assert_eq!(relative_rotation(350.0, 10.0), -20.0);
        assert_eq!(relative_rotation(180.0, 0.0), 180.0);
    }

    #[test]
    fn test_heading_from_alpha() {
        assert_eq!(heading_from_alpha(0.0), 360.0);
        assert_eq!(heading_from_alpha(90.0), 270.0);
    }

    #[test]
    fn test_observation_freshness_window() {
        let obs = Observation { location: "a".into(), rssi: -60, observed_at: 10_000 };
        assert!(obs.is_fresh(10_000 + 2999));
        assert!(obs.is_fresh(10_000 + STALENESS_MS));
        assert!(!obs.is_fresh(10_000 + 3001));
        assert!(obs.is_fresh(9_000));
    }

    #[test]
    fn test_scanner_message_shapes() {
        let single: ScannerMessage =
            serde_json::from_str(r#"{"name":"ESP32_A","rssi":-61,"ts":1767617600000}"#).unwrap();
        assert!(matches!(single, ScannerMessage::Single(ScannerAdvert { rssi: -61, .. })));

        let batch: ScannerMessage = serde_json::from_str(
            r#"{"scanner":"s1","adverts":[{"name":"ESP32_A","rssi":-70},{"name":"ESP32_B","rssi":-50,"ts":"2026-01-05T16:41:30.048+00:00"}]}"#,
        )
        .unwrap();
        match batch {
            ScannerMessage::Batch { adverts, .. } => {
                assert_eq!(adverts.len(), 2);
                assert!(matches!(adverts[0].ts, TimestampValue::None));
                assert!(matches!(adverts[1].ts, TimestampValue::IsoString(_)));
            }
            ScannerMessage::Single(_) => panic!("expected batch"),
        }
    }
}
