/// Label table layout.
///
/// A table holds one fixed-size record per bit position `n = 8 * i + j`,
/// where `i` is the byte index into the padded value and `j` the bit within
/// that byte, least-significant bit first. Records are stored back to back in
/// increasing `n`.
///
/// Work is split into contiguous byte partitions of `ceil(value_size / T)`
/// bytes; partition `p` owns bytes `[p * chunk, min((p + 1) * chunk, value_size))`
/// and therefore the record range `[8 * start, 8 * end)` of every table.
use std::ops::Range;

use crate::config::ProtocolConfig;
use crate::error::{OblivError, Result};

/// Bit `j` (LSB first) of `byte`, as 0 or 1.
#[inline]
pub fn bit_of(byte: u8, j: usize) -> u8 {
    (byte >> j) & 1
}

/// Linear bit position of bit `j` in byte `byte_index`.
#[inline]
pub fn bit_index(byte_index: usize, j: usize) -> usize {
    8 * byte_index + j
}

/// Reject a table whose length is not `expected`.
pub fn check_len(actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(OblivError::TableLength { actual, expected });
    }
    Ok(())
}

/// Static assignment of byte ranges to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPlan {
    value_size: usize,
    chunk_bytes: usize,
}

impl PartitionPlan {
    pub fn new(config: &ProtocolConfig) -> Self {
        Self {
            value_size: config.value_size,
            chunk_bytes: config.chunk_bytes().max(1),
        }
    }

    /// Bytes per partition (the last one may be shorter).
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }

    /// Bytes of a table of `record_len`-sized records covered by one partition.
    pub fn span(&self, record_len: usize) -> usize {
        self.chunk_bytes * 8 * record_len
    }

    /// First value byte owned by partition `part`.
    pub fn start(&self, part: usize) -> usize {
        part * self.chunk_bytes
    }

    /// Byte ranges of every non-empty partition, in order.
    pub fn ranges(&self) -> Vec<Range<usize>> {
        (0..self.value_size)
            .step_by(self.chunk_bytes)
            .map(|start| start..(start + self.chunk_bytes).min(self.value_size))
            .collect()
    }
}
