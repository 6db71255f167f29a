//! Wall-clock helpers
//!
//! Timestamps on the wire are milliseconds since the Unix epoch. Only the edges of
//! the system read the clock; the evolution engine receives timestamps as input.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current time in milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Serde adapter storing a `Duration` as integer milliseconds
pub mod duration_ms {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize a duration as milliseconds
    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis: u64 = value.as_millis().try_into().unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    /// Deserialize a duration from milliseconds
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn test_duration_ms_roundtrip() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Holder {
            #[serde(with = "duration_ms")]
            interval: Duration,
        }

        let json = serde_json::to_string(&Holder {
            interval: Duration::from_secs(30),
        })
        .unwrap();
        assert_eq!(json, r#"{"interval":30000}"#);

        let parsed: Holder = serde_json::from_str(r#"{"interval":250}"#).unwrap();
        assert_eq!(parsed.interval, Duration::from_millis(250));
    }
}
