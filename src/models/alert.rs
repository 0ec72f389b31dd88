use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Reasons an incoming payload could not be turned into an [`AlertRecord`].
#[derive(Debug, Error)]
pub enum MalformedEvent {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("payload is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("coordinate `{field}` is not a finite number: {value}")]
    InvalidCoordinate { field: &'static str, value: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// One SOS signal as sent by an alert source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub user_id: String,
    /// ISO-8601, source supplied. Never used for ordering.
    pub timestamp: String,
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAlert {
    user_id: Option<String>,
    timestamp: Option<String>,
    location: Option<RawLocation>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLocation {
    #[serde(default, deserialize_with = "parse_f64_option")]
    latitude: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    longitude: Option<f64>,
}

impl AlertRecord {
    /// Decodes and validates a channel payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, MalformedEvent> {
        let raw: RawAlert = serde_json::from_slice(payload)?;

        let user_id = raw
            .user_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(MalformedEvent::MissingField("userId"))?;
        let timestamp = raw
            .timestamp
            .ok_or(MalformedEvent::MissingField("timestamp"))?;
        let location = raw
            .location
            .ok_or(MalformedEvent::MissingField("location"))?;
        let latitude = finite("location.latitude", location.latitude)?;
        let longitude = finite("location.longitude", location.longitude)?;

        Ok(Self {
            user_id,
            timestamp,
            location: Location {
                latitude,
                longitude,
            },
            message: raw.message,
        })
    }

    /// Exact match on the four identifying fields. `message` is not part of
    /// an alert's identity.
    pub fn same_alert(&self, other: &AlertRecord) -> bool {
        self.user_id == other.user_id
            && self.timestamp == other.timestamp
            && self.location.latitude == other.location.latitude
            && self.location.longitude == other.location.longitude
    }
}

fn finite(field: &'static str, value: Option<f64>) -> Result<f64, MalformedEvent> {
    match value {
        None => Err(MalformedEvent::MissingField(field)),
        Some(v) if !v.is_finite() => Err(MalformedEvent::InvalidCoordinate { field, value: v }),
        Some(v) => Ok(v),
    }
}

fn parse_f64_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrFloat {
        String(String),
        Float(f64),
    }

    let v: Option<StringOrFloat> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrFloat::Float(f)) => Ok(Some(f)),
        Some(StringOrFloat::String(s)) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.trim().parse::<f64>().map(Some).map_err(serde::de::Error::custom)
            }
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsing_sos_payload() {
        let payload = br#"
        {
            "userId": "u-4821",
            "timestamp": "2025-11-29T06:15:15.000Z",
            "location": { "latitude": 12.9716, "longitude": 77.5946 },
            "message": "Car broke down, unsafe area"
        }
        "#;

        let alert = AlertRecord::from_payload(payload).unwrap();
        assert_eq!(alert.user_id, "u-4821");
        assert_eq!(alert.timestamp, "2025-11-29T06:15:15.000Z");
        assert_eq!(alert.location.latitude, 12.9716);
        assert_eq!(alert.location.longitude, 77.5946);
        assert_eq!(alert.message.as_deref(), Some("Car broke down, unsafe area"));
    }

    #[test]
    fn test_parsing_gateway_string_coordinates() {
        let payload = br#"{
            "userId": "0848086072",
            "timestamp": "2025-11-29 06:15:15",
            "location": { "latitude": "+20.652494", "longitude": "-100.391404" }
        }"#;

        let alert = AlertRecord::from_payload(payload).unwrap();
        assert_eq!(alert.location.latitude, 20.652494);
        assert_eq!(alert.location.longitude, -100.391404);
        assert_eq!(alert.message, None);
    }

    #[test]
    fn test_missing_user_id_is_malformed() {
        let payload = br#"{"timestamp":"T1","location":{"latitude":1.0,"longitude":2.0}}"#;
        assert!(matches!(
            AlertRecord::from_payload(payload),
            Err(MalformedEvent::MissingField("userId"))
        ));

        let blank = br#"{"userId":"  ","timestamp":"T1","location":{"latitude":1.0,"longitude":2.0}}"#;
        assert!(matches!(
            AlertRecord::from_payload(blank),
            Err(MalformedEvent::MissingField("userId"))
        ));
    }

    #[test]
    fn test_missing_location_is_malformed() {
        let payload = br#"{"userId":"u1","timestamp":"T1"}"#;
        assert!(matches!(
            AlertRecord::from_payload(payload),
            Err(MalformedEvent::MissingField("location"))
        ));

        let half = br#"{"userId":"u1","timestamp":"T1","location":{"latitude":1.0}}"#;
        assert!(matches!(
            AlertRecord::from_payload(half),
            Err(MalformedEvent::MissingField("location.longitude"))
        ));
    }

    #[test]
    fn test_non_finite_coordinate_is_rejected() {
        let payload = br#"{"userId":"u1","timestamp":"T1","location":{"latitude":"NaN","longitude":2.0}}"#;
        assert!(matches!(
            AlertRecord::from_payload(payload),
            Err(MalformedEvent::InvalidCoordinate { field: "location.latitude", .. })
        ));
    }

    #[test]
    fn test_garbage_is_invalid_json() {
        assert!(matches!(
            AlertRecord::from_payload(b"not json"),
            Err(MalformedEvent::InvalidJson(_))
        ));
    }

    #[test]
    fn test_same_alert_ignores_message() {
        let payload = br#"{"userId":"u1","timestamp":"T1","location":{"latitude":1.0,"longitude":2.0},"message":"a"}"#;
        let a = AlertRecord::from_payload(payload).unwrap();
        let mut b = a.clone();
        b.message = None;
        assert!(a.same_alert(&b));

        b.timestamp = "T2".to_string();
        assert!(!a.same_alert(&b));
    }

    #[test]
    fn test_serializes_camel_case() {
        let alert = AlertRecord {
            user_id: "u1".to_string(),
            timestamp: "T1".to_string(),
            location: Location {
                latitude: 1.5,
                longitude: 2.5,
            },
            message: None,
        };
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["location"]["longitude"], 2.5);
        assert!(json.get("message").is_none());
    }
}
