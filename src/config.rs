/// Protocol-wide configuration.
///
/// Every participant (this client and the storage layer) must agree on these
/// values out of band: they fix the size of every label table and the
/// derivation context of every label.
use serde::{Deserialize, Serialize};

use crate::crypto::aead::RECORD_LEN;
use crate::crypto::kdf::{CONTEXT_LEN, LABEL_LEN};
use crate::error::{OblivError, Result};

pub const DEFAULT_VALUE_SIZE: usize = 1024;
pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_CONTEXT: [u8; CONTEXT_LEN] = *b"oblivkv1";
pub const DEFAULT_FILLER: u8 = b' ';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Fixed value width in bytes. Values are right-padded to this length.
    pub value_size: usize,
    /// Worker pool size; also the number of byte partitions per operation.
    pub workers: usize,
    /// Derivation context tag.
    pub context: [u8; CONTEXT_LEN],
    /// Padding byte.
    pub filler: u8,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            value_size: DEFAULT_VALUE_SIZE,
            workers: DEFAULT_WORKERS,
            context: DEFAULT_CONTEXT,
            filler: DEFAULT_FILLER,
        }
    }
}

impl ProtocolConfig {
    /// Config with a custom value width and defaults elsewhere.
    pub fn with_value_size(value_size: usize) -> Self {
        Self {
            value_size,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.value_size == 0 {
            return Err(OblivError::Config("value_size must be at least 1".into()));
        }
        if self.workers == 0 {
            return Err(OblivError::Config("workers must be at least 1".into()));
        }
        Ok(())
    }

    /// Number of bit positions in a label table.
    pub fn bit_count(&self) -> usize {
        self.value_size * 8
    }

    /// Bytes per partition: `ceil(value_size / workers)`.
    pub fn chunk_bytes(&self) -> usize {
        self.value_size.div_ceil(self.workers.max(1))
    }

    /// Length of a raw label table (Create output, Decode input).
    pub fn label_table_len(&self) -> usize {
        self.bit_count() * LABEL_LEN
    }

    /// Length of one sealed channel table (Get/Put output).
    pub fn sealed_table_len(&self) -> usize {
        self.bit_count() * RECORD_LEN
    }

    /// Check `value` against the fixed width and right-pad it with the filler.
    pub fn pad(&self, value: &[u8]) -> Result<Vec<u8>> {
        check_value_len(value.len(), self.value_size)?;
        let mut padded = Vec::with_capacity(self.value_size);
        padded.extend_from_slice(value);
        padded.resize(self.value_size, self.filler);
        Ok(padded)
    }
}

/// A stored value length must satisfy `0 < len <= value_size`.
pub fn check_value_len(len: usize, value_size: usize) -> Result<()> {
    if len == 0 {
        return Err(OblivError::EmptyValue);
    }
    if len > value_size {
        return Err(OblivError::ValueTooLong {
            len,
            max: value_size,
        });
    }
    Ok(())
}
