//! Serde helpers storing [`Duration`] values as whole seconds.
//!
//! Use with `#[serde(with = "crate::task::duration_secs")]`.

use serde::{Deserialize, Deserializer, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;

pub(crate) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_secs())
}

pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}

/// Same encoding for maps of durations.
pub(crate) mod map {
    use super::{BTreeMap, Deserialize, Deserializer, Duration, Serializer};
    use serde::ser::SerializeMap;

    pub(crate) fn serialize<K, S>(
        value: &BTreeMap<K, Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        K: serde::Serialize,
        S: Serializer,
    {
        let mut entries = serializer.serialize_map(Some(value.len()))?;
        for (key, duration) in value {
            entries.serialize_entry(key, &duration.as_secs())?;
        }
        entries.end()
    }

    pub(crate) fn deserialize<'de, K, D>(deserializer: D) -> Result<BTreeMap<K, Duration>, D::Error>
    where
        K: Deserialize<'de> + Ord,
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<K, u64>::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .map(|(key, seconds)| (key, Duration::from_secs(seconds)))
            .collect())
    }
}
