/// Oblivious re-keying: Get (read) and Put (blind overwrite).
///
/// Per bit position `n` with old labels `old0, old1`, new labels
/// `new0, new1` and a fresh coin `r`:
///
/// | op  | channel A                  | channel B              |
/// |-----|----------------------------|------------------------|
/// | Get | seal(old[1-r], new[1-r])   | seal(old[r], new[r])   |
/// | Put | seal(old[1-r], new[c])     | seal(old[r], new[c])   |
///
/// where `c` is the new value's bit. Whoever holds the true old label opens
/// exactly the record keyed under it; which channel that is changes with
/// every call.
use rayon::prelude::*;
use subtle::Choice;
use tracing::info;

use crate::crypto::aead::{seal_label_into, RECORD_LEN};
use crate::crypto::kdf::derive_pair;
use crate::crypto::sensitive::{Label, MasterSecret, SensitiveVec};
use crate::entry::Entry;
use crate::error::Result;
use crate::keystore::KeyStore;
use crate::table::{bit_index, bit_of};

use super::LabelEngine;

impl LabelEngine {
    /// Rotate `key`'s secret and emit both channels so the holder of the
    /// current labels can recover the new ones.
    pub fn get(&self, store: &KeyStore, key: &str) -> Result<Entry> {
        let entry = store.with_key(key, |state| {
            let new_secret = MasterSecret::generate();
            let (a, b) = self.reseal(&state.secret, &new_secret, None)?;
            state.secret = new_secret;
            Ok(Entry::channels(key, a, b))
        })?;

        info!(key = %key, bits = self.config.bit_count(), "Re-keyed for read");
        Ok(entry)
    }

    /// Rotate `key`'s secret so that either old label opens to the new
    /// label of `value`, without knowing the previous value.
    pub fn put(&self, store: &KeyStore, key: &str, value: &[u8]) -> Result<Entry> {
        let padded = SensitiveVec::new(self.config.pad(value)?);

        let entry = store.with_key(key, |state| {
            let new_secret = MasterSecret::generate();
            let (a, b) = self.reseal(&state.secret, &new_secret, Some(padded.as_bytes()))?;
            state.secret = new_secret;
            state.value_len = Some(value.len());
            Ok(Entry::channels(key, a, b))
        })?;

        info!(
            key = %key,
            value_len = value.len(),
            bits = self.config.bit_count(),
            "Re-keyed for write"
        );
        Ok(entry)
    }

    /// Produce channel tables A and B. `target` is the padded new value for
    /// Put, `None` for Get.
    fn reseal(
        &self,
        old_secret: &MasterSecret,
        new_secret: &MasterSecret,
        target: Option<&[u8]>,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut table_a = vec![0u8; self.config.sealed_table_len()];
        let mut table_b = vec![0u8; self.config.sealed_table_len()];
        let context = &self.config.context;
        let plan = self.plan;
        let span = plan.span(RECORD_LEN);

        self.pool.install(|| {
            table_a
                .par_chunks_mut(span)
                .zip(table_b.par_chunks_mut(span))
                .enumerate()
                .try_for_each(|(part, (out_a, out_b))| -> Result<()> {
                    let start = plan.start(part);
                    let bytes = out_a.len() / (8 * RECORD_LEN);
                    // Drawn per task and per call; never shared.
                    let coins = SensitiveVec::random(bytes);

                    for offset in 0..bytes {
                        let i = start + offset;
                        for j in 0..8 {
                            let n = bit_index(i, j);
                            let (old0, old1) = derive_pair(old_secret, context, n)?;
                            let (new0, new1) = derive_pair(new_secret, context, n)?;
                            let r = Choice::from(bit_of(coins.as_bytes()[offset], j));

                            let key_a = Label::select(&old1, &old0, r);
                            let key_b = Label::select(&old0, &old1, r);
                            let (msg_a, msg_b) = match target {
                                None => (
                                    Label::select(&new1, &new0, r),
                                    Label::select(&new0, &new1, r),
                                ),
                                Some(padded) => {
                                    let c = Choice::from(bit_of(padded[i], j));
                                    let msg = Label::select(&new0, &new1, c);
                                    (msg.clone(), msg)
                                }
                            };

                            let pos = bit_index(offset, j) * RECORD_LEN;
                            seal_label_into(&key_a, &msg_a, &mut out_a[pos..pos + RECORD_LEN])?;
                            seal_label_into(&key_b, &msg_b, &mut out_b[pos..pos + RECORD_LEN])?;
                        }
                    }
                    Ok(())
                })
        })?;

        Ok((table_a, table_b))
    }
}
