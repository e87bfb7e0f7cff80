//! Config durations: whole seconds or humantime strings such as `"25s"`.

pub mod duration {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Seconds(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match RawDuration::deserialize(deserializer)? {
            RawDuration::Seconds(seconds) => Ok(Duration::from_secs(seconds)),
            RawDuration::Text(text) => humantime::parse_duration(&text)
                .map_err(|e| D::Error::custom(format!("invalid duration '{text}': {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Wrapper {
        #[serde(with = "super::duration")]
        value: Duration,
    }

    #[test]
    fn test_parses_human_strings_and_seconds() {
        let parsed: Wrapper = toml::from_str("value = \"8d\"").unwrap();
        assert_eq!(parsed.value, Duration::from_secs(8 * 86_400));

        let parsed: Wrapper = toml::from_str("value = 25").unwrap();
        assert_eq!(parsed.value, Duration::from_secs(25));
    }

    #[test]
    fn test_serializes_as_human_string() {
        let text = toml::to_string(&Wrapper {
            value: Duration::from_secs(90),
        })
        .unwrap();
        assert!(text.contains("1m 30s"));
    }

    #[test]
    fn test_rejects_garbage_and_negative_seconds() {
        assert!(toml::from_str::<Wrapper>("value = \"soon\"").is_err());
        assert!(toml::from_str::<Wrapper>("value = -5").is_err());
    }
}
