use serde::{Serialize, Deserialize, Serializer, Deserializer};
use std::time::{SystemTime, Duration, UNIX_EPOCH};

/// Serializes Duration as seconds
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    duration.as_secs_f64().serialize(serializer)
}

/// Deserializes Duration from seconds
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(serde::de::Error::custom(format!("invalid duration: {} seconds", secs)));
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Serializes SystemTime as duration since UNIX_EPOCH
pub fn serialize_time<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let duration = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    duration.as_secs_f64().serialize(serializer)
}

/// Deserializes SystemTime from duration since UNIX_EPOCH
pub fn deserialize_time<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
where
    D: Deserializer<'de>,
{
    let duration = deserialize_duration(deserializer)?;
    Ok(UNIX_EPOCH + duration)
}

/// Serializes an optional SystemTime, `null` when absent
pub fn serialize_opt_time<S>(time: &Option<SystemTime>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match time {
        Some(time) => serializer.serialize_some(
            &time
                .duration_since(UNIX_EPOCH)
                .unwrap_or_else(|_| Duration::from_secs(0))
                .as_secs_f64(),
        ),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json;

    #[test]
    fn test_time_serialization() {
        #[derive(Serialize, Deserialize)]
        struct Test {
            #[serde(serialize_with = "serialize_time")]
            #[serde(deserialize_with = "deserialize_time")]
            time: SystemTime,
        }

        let original = Test {
            time: SystemTime::now(),
        };

        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: Test = serde_json::from_str(&serialized).unwrap();

        let diff = deserialized.time
            .duration_since(original.time)
            .unwrap_or_else(|e| e.duration());

        assert!(diff < Duration::from_millis(1));
    }

    #[test]
    fn test_duration_rejects_negative() {
        #[derive(Deserialize)]
        struct Test {
            #[serde(deserialize_with = "deserialize_duration")]
            #[allow(dead_code)]
            interval: Duration,
        }

        assert!(serde_json::from_str::<Test>(r#"{"interval": -1.0}"#).is_err());
        assert!(serde_json::from_str::<Test>(r#"{"interval": 2.5}"#).is_ok());
    }

    #[test]
    fn test_optional_time() {
        #[derive(Serialize)]
        struct Test {
            #[serde(serialize_with = "serialize_opt_time")]
            at: Option<SystemTime>,
        }

        let none = serde_json::to_string(&Test { at: None }).unwrap();
        assert_eq!(none, r#"{"at":null}"#);

        let some = serde_json::to_string(&Test { at: Some(UNIX_EPOCH + Duration::from_secs(2)) }).unwrap();
        assert_eq!(some, r#"{"at":2.0}"#);
    }
}
