//! Shared measurement types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Index of a Platform Configuration Register.
pub type PcrIndex = u8;

/// Number of PCRs in a TPM 2.0 PC-client bank. Valid indices are `0..PCR_BANK_SIZE`.
pub const PCR_BANK_SIZE: u8 = 24;

/// Domain tag prefixed to the canonical encoding of a [`MeasurementSet`].
const CANONICAL_TAG: &[u8] = b"pcrbind.measurements.v1";

/// Ordered mapping from register index to measured value.
///
/// Backed by a `BTreeMap`, so iteration and the canonical encoding are always
/// in ascending index order regardless of how the set was built. Values are
/// opaque byte strings and serialize as lowercase hex.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeasurementSet {
    #[serde(with = "hex_values")]
    values: BTreeMap<PcrIndex, Vec<u8>>,
}

impl MeasurementSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from `(index, value)` pairs. Later duplicates win.
    pub fn from_pairs<I, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (PcrIndex, V)>,
        V: AsRef<[u8]>,
    {
        pairs
            .into_iter()
            .map(|(index, value)| (index, value.as_ref().to_vec()))
            .collect()
    }

    /// Insert or replace the value of a register, returning the previous value.
    pub fn insert(&mut self, index: PcrIndex, value: impl Into<Vec<u8>>) -> Option<Vec<u8>> {
        self.values.insert(index, value.into())
    }

    pub fn get(&self, index: PcrIndex) -> Option<&[u8]> {
        self.values.get(&index).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Register indices in ascending order.
    pub fn indices(&self) -> Vec<PcrIndex> {
        self.values.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PcrIndex, &[u8])> {
        self.values.iter().map(|(index, value)| (*index, value.as_slice()))
    }

    /// Canonical, order-independent byte encoding used for key derivation
    /// and response signing.
    ///
    /// Layout: tag ∥ entry count (u32 BE) ∥ for each entry in ascending index
    /// order: index (1 byte) ∥ value length (u32 BE) ∥ value.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let body: usize = self.values.values().map(|v| 5 + v.len()).sum();
        let mut out = Vec::with_capacity(CANONICAL_TAG.len() + 4 + body);
        out.extend_from_slice(CANONICAL_TAG);
        out.extend_from_slice(&(self.values.len() as u32).to_be_bytes());
        for (index, value) in &self.values {
            out.push(*index);
            out.extend_from_slice(&(value.len() as u32).to_be_bytes());
            out.extend_from_slice(value);
        }
        out
    }
}

impl FromIterator<(PcrIndex, Vec<u8>)> for MeasurementSet {
    fn from_iter<T: IntoIterator<Item = (PcrIndex, Vec<u8>)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

mod hex_values {
    use super::PcrIndex;
    use serde::de::Error as _;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        values: &BTreeMap<PcrIndex, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(values.len()))?;
        for (index, value) in values {
            map.serialize_entry(index, &hex::encode(value))?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<PcrIndex, Vec<u8>>, D::Error> {
        let raw = BTreeMap::<PcrIndex, String>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(index, value)| {
                hex::decode(&value)
                    .map(|bytes| (index, bytes))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_bytes_ignore_insertion_order() {
        let mut forward = MeasurementSet::new();
        forward.insert(0, b"aa".to_vec());
        forward.insert(1, b"bb".to_vec());
        forward.insert(7, b"cc".to_vec());

        let mut reverse = MeasurementSet::new();
        reverse.insert(7, b"cc".to_vec());
        reverse.insert(1, b"bb".to_vec());
        reverse.insert(0, b"aa".to_vec());

        assert_eq!(forward.canonical_bytes(), reverse.canonical_bytes());
        assert_eq!(forward.indices(), vec![0, 1, 7]);
    }

    #[test]
    fn test_canonical_bytes_are_length_prefixed() {
        // Shifting a byte between adjacent values must change the encoding.
        let a = MeasurementSet::from_pairs([(0, "ab"), (1, "c")]);
        let b = MeasurementSet::from_pairs([(0, "a"), (1, "bc")]);
        assert_ne!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[test]
    fn test_json_renders_values_as_hex() {
        let set = MeasurementSet::from_pairs([(7, [0xde_u8, 0xad]), (0, [0x01_u8, 0x02])]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"{"0":"0102","7":"dead"}"#);

        let parsed: MeasurementSet = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, set);
    }

    #[test]
    fn test_json_rejects_non_hex_values() {
        let result: Result<MeasurementSet, _> = serde_json::from_str(r#"{"0":"zz"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_insert_replaces_value() {
        let mut set = MeasurementSet::from_pairs([(7, "cc")]);
        let previous = set.insert(7, "zz");
        assert_eq!(previous.as_deref(), Some(b"cc".as_slice()));
        assert_eq!(set.get(7), Some(b"zz".as_slice()));
        assert_eq!(set.len(), 1);
    }
}
