/// Label engine: the Create, Get, Put, Decode and Resolve operations.
///
/// Every operation splits the value's byte range with the same
/// [`PartitionPlan`] and runs one task per partition on a dedicated rayon
/// pool. Each task writes only into its own sub-slice of the preallocated
/// output tables and the calling thread blocks until all tasks have joined.
/// If any task fails the whole operation fails and nothing is committed to
/// the key store.
mod create;
mod decode;
mod rekey;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::config::ProtocolConfig;
use crate::error::{OblivError, Result};
use crate::table::PartitionPlan;

pub struct LabelEngine {
    config: ProtocolConfig,
    plan: PartitionPlan,
    pool: ThreadPool,
}

impl LabelEngine {
    pub fn new(config: ProtocolConfig) -> Result<Self> {
        config.validate()?;

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("oblivkv-worker-{i}"))
            .build()
            .map_err(|e| OblivError::Config(e.to_string()))?;
        let plan = PartitionPlan::new(&config);

        debug!(
            value_size = config.value_size,
            workers = config.workers,
            chunk_bytes = plan.chunk_bytes(),
            partitions = plan.ranges().len(),
            "Label engine ready"
        );

        Ok(Self { config, plan, pool })
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }
}

impl std::fmt::Debug for LabelEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelEngine")
            .field("config", &self.config)
            .field("plan", &self.plan)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::ProtocolConfig;
    use crate::crypto::kdf::{derive_label, LABEL_LEN};
    use crate::crypto::sensitive::MasterSecret;
    use crate::table::{bit_index, bit_of};

    use super::LabelEngine;

    pub fn engine(value_size: usize, workers: usize) -> LabelEngine {
        let mut config = ProtocolConfig::with_value_size(value_size);
        config.workers = workers;
        LabelEngine::new(config).unwrap()
    }

    /// Sequential reference: the true label table of `padded` under `secret`.
    pub fn reference_table(config: &ProtocolConfig, secret: &MasterSecret, padded: &[u8]) -> Vec<u8> {
        let mut table = Vec::with_capacity(padded.len() * 8 * LABEL_LEN);
        for (i, &byte) in padded.iter().enumerate() {
            for j in 0..8 {
                let label =
                    derive_label(secret, &config.context, bit_index(i, j), bit_of(byte, j)).unwrap();
                table.extend_from_slice(label.as_bytes());
            }
        }
        table
    }
}
