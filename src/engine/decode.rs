use rayon::prelude::*;
use subtle::{Choice, ConstantTimeEq};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::crypto::aead::{open_label, RECORD_LEN};
use crate::crypto::kdf::{derive_pair, LABEL_LEN};
use crate::crypto::sensitive::Label;
use crate::config::check_value_len;
use crate::entry::Entry;
use crate::error::{OblivError, Result};
use crate::keystore::KeyStore;
use crate::table::{bit_index, check_len};

use super::LabelEngine;

impl LabelEngine {
    /// Recover the value encoded by a raw label table under `key`'s current
    /// secret, truncated to the recorded length.
    ///
    /// Each supplied label is compared in constant time against both
    /// canonical labels of its position. A table containing any label that
    /// matches neither is rejected as a whole after the full pass.
    pub fn decode(&self, store: &KeyStore, key: &str, labels: &[u8]) -> Result<Vec<u8>> {
        check_len(labels.len(), self.config.label_table_len())?;

        let (secret, value_len) =
            store.with_key(key, |state| Ok((state.secret.clone(), state.value_len)))?;
        let value_len = value_len.ok_or_else(|| OblivError::LengthUnknown(key.to_string()))?;
        check_value_len(value_len, self.config.value_size)?;

        // Holds the padded plaintext; wiped on drop, only the prefix leaves.
        let mut value = Zeroizing::new(vec![0u8; self.config.value_size]);
        let context = &self.config.context;
        let plan = self.plan;

        let verdicts: Vec<Choice> = self.pool.install(|| {
            value
                .par_chunks_mut(plan.chunk_bytes())
                .zip(labels.par_chunks(plan.span(LABEL_LEN)))
                .enumerate()
                .map(|(part, (bytes, records))| -> Result<Choice> {
                    let start = plan.start(part);
                    let mut valid = Choice::from(1);
                    for (offset, byte) in bytes.iter_mut().enumerate() {
                        let mut acc = 0u8;
                        for j in 0..8 {
                            let pos = bit_index(offset, j) * LABEL_LEN;
                            let supplied = Label::from_slice(&records[pos..pos + LABEL_LEN])
                                .ok_or_else(|| OblivError::TableLength {
                                    actual: labels.len(),
                                    expected: self.config.label_table_len(),
                                })?;
                            let (label0, label1) =
                                derive_pair(&secret, context, bit_index(start + offset, j))?;
                            let is0 = supplied.ct_eq(&label0);
                            let is1 = supplied.ct_eq(&label1);
                            valid &= is0 | is1;
                            acc |= is1.unwrap_u8() << j;
                        }
                        *byte = acc;
                    }
                    Ok(valid)
                })
                .collect::<Result<Vec<Choice>>>()
        })?;

        let valid = verdicts.into_iter().fold(Choice::from(1), |acc, v| acc & v);
        if !bool::from(valid) {
            warn!(key = %key, "Label table does not match the current epoch");
            return Err(OblivError::Integrity(key.to_string()));
        }

        info!(key = %key, value_len, "Decoded label table");
        Ok(value[..value_len].to_vec())
    }

    /// Open a Get/Put entry with the previous epoch's raw label table,
    /// yielding the new raw label table.
    ///
    /// At each position the prior label opens channel A or channel B; the
    /// plaintext is the new label. A position where neither opens means the
    /// prior table is not the one this entry was sealed for.
    pub fn resolve(&self, prior: &[u8], entry: &Entry) -> Result<Vec<u8>> {
        check_len(prior.len(), self.config.label_table_len())?;
        let (channel_a, channel_b) = entry.channel_tables()?;
        check_len(channel_a.len(), self.config.sealed_table_len())?;
        check_len(channel_b.len(), self.config.sealed_table_len())?;

        let mut labels = vec![0u8; self.config.label_table_len()];
        let plan = self.plan;
        let sealed_span = plan.span(RECORD_LEN);

        self.pool.install(|| {
            labels
                .par_chunks_mut(plan.span(LABEL_LEN))
                .zip(prior.par_chunks(plan.span(LABEL_LEN)))
                .zip(
                    channel_a
                        .par_chunks(sealed_span)
                        .zip(channel_b.par_chunks(sealed_span)),
                )
                .try_for_each(|((out, held), (records_a, records_b))| -> Result<()> {
                    let opened = out
                        .chunks_exact_mut(LABEL_LEN)
                        .zip(held.chunks_exact(LABEL_LEN))
                        .zip(
                            records_a
                                .chunks_exact(RECORD_LEN)
                                .zip(records_b.chunks_exact(RECORD_LEN)),
                        );
                    for ((dst, held), (rec_a, rec_b)) in opened {
                        let held = Label::from_slice(held)
                            .ok_or_else(|| OblivError::Integrity(entry.key_name.clone()))?;
                        let new = open_label(&held, rec_a)
                            .or_else(|_| open_label(&held, rec_b))
                            .map_err(|_| OblivError::Integrity(entry.key_name.clone()))?;
                        dst.copy_from_slice(new.as_bytes());
                    }
                    Ok(())
                })
        })?;

        info!(key = %entry.key_name, "Resolved channel tables");
        Ok(labels)
    }
}
