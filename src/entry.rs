/// Entry message: the only artifact handed to the storage layer.
///
/// Create produces one raw label table (`encrypted_labels_a`). Get and Put
/// produce two sealed channel tables. Blob sizes are fixed by the protocol
/// configuration; the storage layer agrees on them out of band.
use serde::{Deserialize, Serialize};

use crate::config::ProtocolConfig;
use crate::crypto::aead::RECORD_LEN;
use crate::crypto::kdf::LABEL_LEN;
use crate::error::{OblivError, Result};
use crate::table::check_len;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key_name: String,
    #[serde(with = "hex")]
    pub encrypted_labels_a: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "hex_opt")]
    pub encrypted_labels_b: Option<Vec<u8>>,
}

impl Entry {
    pub fn raw(key_name: &str, labels: Vec<u8>) -> Self {
        Self {
            key_name: key_name.to_string(),
            encrypted_labels_a: labels,
            encrypted_labels_b: None,
        }
    }

    pub fn channels(key_name: &str, a: Vec<u8>, b: Vec<u8>) -> Self {
        Self {
            key_name: key_name.to_string(),
            encrypted_labels_a: a,
            encrypted_labels_b: Some(b),
        }
    }

    /// True for Get/Put output.
    pub fn has_channels(&self) -> bool {
        self.encrypted_labels_b.is_some()
    }

    /// Both channel tables, or `MissingChannel` for a Create entry.
    pub fn channel_tables(&self) -> Result<(&[u8], &[u8])> {
        match &self.encrypted_labels_b {
            Some(b) => Ok((&self.encrypted_labels_a, b)),
            None => Err(OblivError::MissingChannel(self.key_name.clone())),
        }
    }

    /// Per-bit records of channel A (raw labels for a Create entry).
    pub fn records_a(&self) -> std::slice::ChunksExact<'_, u8> {
        let len = if self.has_channels() { RECORD_LEN } else { LABEL_LEN };
        self.encrypted_labels_a.chunks_exact(len)
    }

    /// Per-bit records of channel B, if present.
    pub fn records_b(&self) -> Option<std::slice::ChunksExact<'_, u8>> {
        self.encrypted_labels_b
            .as_ref()
            .map(|b| b.chunks_exact(RECORD_LEN))
    }

    /// Check blob sizes against `config`.
    pub fn validate(&self, config: &ProtocolConfig) -> Result<()> {
        match &self.encrypted_labels_b {
            None => check_len(self.encrypted_labels_a.len(), config.label_table_len()),
            Some(b) => {
                check_len(self.encrypted_labels_a.len(), config.sealed_table_len())?;
                check_len(b.len(), config.sealed_table_len())
            }
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| OblivError::Serialization(e.to_string()))
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| OblivError::Serialization(e.to_string()))
    }
}

mod hex_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
