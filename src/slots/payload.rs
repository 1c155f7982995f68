//! Upstream slot payload shape and the merge rule for multi-date fetches.
//!
//! `masters` and `times` may each arrive as either a JSON object keyed by master-id, or
//! an empty JSON array when there is nothing to report. A custom deserializer accepts
//! both (see SPEC_FULL.md §9).

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Deserialize)]
pub struct MasterInfo {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub service_name: String,
}

/// A mapping from master-id to value, or an empty array when the upstream has
/// nothing to report for this field.
#[derive(Debug, Clone, Default)]
pub struct MasterMap<V>(pub BTreeMap<u64, V>);

impl<'de, V> Deserialize<'de> for MasterMap<V>
where
    V: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct MasterMapVisitor<V>(std::marker::PhantomData<V>);

        impl<'de, V> Visitor<'de> for MasterMapVisitor<V>
        where
            V: Deserialize<'de>,
        {
            type Value = MasterMap<V>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an object keyed by master id, or an empty array")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                // The only well-formed array shape observed upstream is the empty one.
                if seq.next_element::<de::IgnoredAny>()?.is_some() {
                    return Err(de::Error::custom(
                        "expected an empty array when masters/times is not an object",
                    ));
                }
                Ok(MasterMap(BTreeMap::new()))
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut out = BTreeMap::new();
                while let Some((key, value)) = map.next_entry::<String, V>()? {
                    let id: u64 = key
                        .parse()
                        .map_err(|_| de::Error::custom(format!("non-numeric master id: {key}")))?;
                    out.insert(id, value);
                }
                Ok(MasterMap(out))
            }
        }

        deserializer.deserialize_any(MasterMapVisitor(std::marker::PhantomData))
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SlotData {
    #[serde(default)]
    pub masters: MasterMap<MasterInfo>,
    #[serde(default)]
    pub dates_true: Vec<String>,
    #[serde(default)]
    pub times: MasterMap<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotPayload {
    pub data: SlotData,
}

impl SlotPayload {
    /// Merges `other` (a fetch for a later date of the same source) into `self`:
    /// masters union with `other` winning key collisions; time arrays concatenate.
    pub fn merge(&mut self, mut other: SlotPayload) {
        for (id, info) in other.data.masters.0 {
            self.data.masters.0.insert(id, info);
        }
        for (id, times) in other.data.times.0.drain() {
            self.data.times.0.entry(id).or_default().extend(times);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_empty_array_shape() {
        let json = r#"{"data":{"masters":[],"dates_true":[],"times":[]}}"#;
        let payload: SlotPayload = serde_json::from_str(json).unwrap();
        assert!(payload.data.masters.0.is_empty());
        assert!(payload.data.times.0.is_empty());
    }

    #[test]
    fn deserializes_object_shape() {
        let json = r#"{"data":{"masters":{"5":{"username":"A_lab1_aud101","service_name":"Lab defence"}},"dates_true":["2025-01-10"],"times":{"5":["2025-01-10 10:35:00"]}}}"#;
        let payload: SlotPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.data.masters.0.len(), 1);
        assert_eq!(payload.data.times.0[&5], vec!["2025-01-10 10:35:00"]);
    }

    #[test]
    fn merge_unions_masters_with_rhs_winning() {
        let mut lhs: SlotPayload = serde_json::from_str(
            r#"{"data":{"masters":{"5":{"username":"old","service_name":"old"}},"dates_true":[],"times":{"5":["2025-01-10 10:35:00"]}}}"#,
        )
        .unwrap();
        let rhs: SlotPayload = serde_json::from_str(
            r#"{"data":{"masters":{"5":{"username":"new","service_name":"new"}},"dates_true":[],"times":{"5":["2025-01-11 14:15:00"]}}}"#,
        )
        .unwrap();

        lhs.merge(rhs);

        assert_eq!(lhs.data.masters.0[&5].username, "new");
        assert_eq!(
            lhs.data.times.0[&5],
            vec!["2025-01-10 10:35:00", "2025-01-11 14:15:00"]
        );
    }
}
